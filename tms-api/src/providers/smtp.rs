//! SMTP transport for SMTP, Exchange and Office365 profiles.

use super::provider_error;
use async_trait::async_trait;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tms_core::email::{
    AuthType, EmailProvider, EncryptionType, Message, Priority, ProviderConfig, ProviderType,
};
use tms_core::EmailError;

pub struct SmtpProvider {
    provider_type: ProviderType,
}

impl SmtpProvider {
    pub fn new(provider_type: ProviderType) -> Self {
        Self { provider_type }
    }

    fn fail(&self, reason: impl Into<String>) -> EmailError {
        provider_error(self.provider_type, reason)
    }

    fn transport(
        &self,
        config: &ProviderConfig,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, EmailError> {
        let builder = match config.encryption_type {
            EncryptionType::None => {
                tracing::warn!(
                    host = %config.host,
                    port = config.port,
                    "Using unencrypted SMTP transport"
                );
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            }
            EncryptionType::SslTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| self.fail(format!("Failed to create SMTP transport: {e}")))?,
            EncryptionType::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| self.fail(format!("Failed to create SMTP transport: {e}")))?
            }
        };
        let builder = builder.port(config.port).timeout(Some(config.timeout));

        let builder = match config.auth_type {
            AuthType::Plain | AuthType::Login if config.username.is_empty() => builder,
            AuthType::Plain => builder
                .credentials(Credentials::new(config.username.clone(), config.password.clone()))
                .authentication(vec![Mechanism::Plain]),
            AuthType::Login => builder
                .credentials(Credentials::new(config.username.clone(), config.password.clone()))
                .authentication(vec![Mechanism::Login]),
            // The password column carries the access token for XOAUTH2.
            AuthType::OAuth2 => builder
                .credentials(Credentials::new(config.username.clone(), config.password.clone()))
                .authentication(vec![Mechanism::Xoauth2]),
            AuthType::ApiKey => {
                let user = if config.username.is_empty() {
                    "apikey".to_string()
                } else {
                    config.username.clone()
                };
                builder
                    .credentials(Credentials::new(user, config.api_key.clone()))
                    .authentication(vec![Mechanism::Plain])
            }
            AuthType::CramMd5 => {
                return Err(self.fail("CRAM-MD5 authentication is not supported"));
            }
        };

        Ok(builder.build())
    }

    fn mailbox(&self, address: &str, name: Option<&str>) -> Result<Mailbox, EmailError> {
        let parsed = address
            .parse()
            .map_err(|e| self.fail(format!("Invalid email address {address:?}: {e}")))?;
        Ok(Mailbox::new(name.filter(|n| !n.is_empty()).map(str::to_string), parsed))
    }

    fn body(&self, message: &Message) -> Result<MultiPart, EmailError> {
        let text = message.text.clone().unwrap_or_default();
        let alternative = if text.is_empty() {
            MultiPart::alternative().singlepart(SinglePart::html(message.html.clone()))
        } else {
            MultiPart::alternative_plain_html(text, message.html.clone())
        };
        if message.attachments.is_empty() {
            return Ok(alternative);
        }

        let mut mixed = MultiPart::mixed().multipart(alternative);
        for attachment in &message.attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .or_else(|_| ContentType::parse("application/octet-stream"))
                .map_err(|e| self.fail(format!("Invalid content type: {e}")))?;
            let part = match &attachment.content_id {
                Some(cid) if attachment.is_inline() => MimeAttachment::new_inline(cid.clone())
                    .body(attachment.data.clone(), content_type),
                _ => MimeAttachment::new(attachment.file_name.clone())
                    .body(attachment.data.clone(), content_type),
            };
            mixed = mixed.singlepart(part);
        }
        Ok(mixed)
    }

    fn build(&self, message: &Message) -> Result<(lettre::Message, String), EmailError> {
        let domain = message
            .from
            .address
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or("localhost");
        let message_id = format!("<{}@{}>", uuid::Uuid::now_v7(), domain);

        let mut builder = lettre::Message::builder()
            .from(self.mailbox(&message.from.address, message.from.name.as_deref())?)
            .subject(message.subject.clone())
            .message_id(Some(message_id.clone()));
        for to in &message.to {
            builder = builder.to(self.mailbox(to, None)?);
        }
        for cc in &message.cc {
            builder = builder.cc(self.mailbox(cc, None)?);
        }
        for bcc in &message.bcc {
            builder = builder.bcc(self.mailbox(bcc, None)?);
        }
        if let Some(reply_to) = message.reply_to.as_deref().filter(|r| !r.is_empty()) {
            builder = builder.reply_to(self.mailbox(reply_to, None)?);
        }

        let mut email = builder
            .multipart(self.body(message)?)
            .map_err(|e| self.fail(format!("Failed to build email message: {e}")))?;

        let priority = match message.priority {
            Priority::High => "1 (Highest)",
            Priority::Medium => "3 (Normal)",
            Priority::Low => "5 (Lowest)",
        };
        let extra = message
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .chain([("X-Priority".to_string(), priority.to_string())]);
        for (name, value) in extra {
            let name = HeaderName::new_from_ascii(name)
                .map_err(|e| self.fail(format!("Invalid header name: {e}")))?;
            email.headers_mut().insert_raw(HeaderValue::new(name, value));
        }

        Ok((email, message_id))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    async fn send(&self, config: &ProviderConfig, message: &Message) -> Result<String, EmailError> {
        let transport = self.transport(config)?;
        let (email, message_id) = self.build(message)?;

        transport
            .send(email)
            .await
            .map_err(|e| self.fail(format!("Failed to send email: {e}")))?;

        tracing::info!(
            provider = %self.provider_type,
            host = %config.host,
            recipients = message.to.len(),
            message_id = %message_id,
            "email sent over SMTP"
        );
        Ok(message_id)
    }

    async fn test_connection(&self, config: &ProviderConfig) -> Result<(), EmailError> {
        let transport = self.transport(config)?;
        match transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(self.fail(format!(
                "SMTP server {}:{} did not accept the connection",
                config.host, config.port
            ))),
            Err(e) => Err(self.fail(format!("SMTP connection test failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tms_core::email::{Attachment, Mailbox as FromBox, Metadata};

    fn config(auth_type: AuthType) -> ProviderConfig {
        ProviderConfig {
            provider_type: ProviderType::Smtp,
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "ops".to_string(),
            password: "secret".to_string(),
            api_key: String::new(),
            oauth2_client_id: String::new(),
            oauth2_client_secret: String::new(),
            oauth2_tenant_id: String::new(),
            auth_type,
            encryption_type: EncryptionType::StartTls,
            timeout: Duration::from_secs(30),
            max_connections: 5,
            metadata: Metadata::new(),
        }
    }

    fn message() -> Message {
        let mut headers = BTreeMap::new();
        headers.insert("X-Queue-ID".to_string(), "q_1".to_string());
        Message {
            from: FromBox::new("ops@example.com", "Ops"),
            to: vec!["ann@example.com".to_string()],
            cc: vec![],
            bcc: vec![],
            subject: "Hello".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: Some("Hi".to_string()),
            reply_to: None,
            headers,
            priority: Priority::High,
            attachments: vec![Attachment {
                file_name: "a.txt".to_string(),
                content_type: "text/plain".to_string(),
                data: b"abc".to_vec(),
                content_id: None,
            }],
        }
    }

    #[test]
    fn test_build_sets_headers_and_message_id() {
        let provider = SmtpProvider::new(ProviderType::Smtp);
        let (email, id) = provider.build(&message()).unwrap();
        assert!(id.ends_with("@example.com>"));
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("X-Queue-ID: q_1"));
        assert!(raw.contains("X-Priority: 1 (Highest)"));
        assert!(raw.contains("a.txt"));
    }

    #[test]
    fn test_invalid_recipient_is_provider_error() {
        let provider = SmtpProvider::new(ProviderType::Smtp);
        let mut msg = message();
        msg.to = vec!["not-an-address".to_string()];
        assert!(matches!(provider.build(&msg), Err(EmailError::Provider { .. })));
    }

    #[tokio::test]
    async fn test_cram_md5_is_rejected() {
        let provider = SmtpProvider::new(ProviderType::Smtp);
        assert!(provider.transport(&config(AuthType::CramMd5)).is_err());
        assert!(provider.transport(&config(AuthType::Login)).is_ok());
    }
}
