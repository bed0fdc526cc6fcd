//! SendGrid v3 mail send client.

use super::provider_error;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tms_core::email::{EmailProvider, Message, ProviderConfig, ProviderType};
use tms_core::EmailError;

const DEFAULT_BASE_URL: &str = "https://api.sendgrid.com";

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> Address<'a> {
    fn bare(email: &'a str) -> Self {
        Self { email, name: None }
    }
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridAttachment<'a> {
    content: String,
    #[serde(rename = "type")]
    content_type: &'a str,
    filename: &'a str,
    disposition: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct MailSend<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<Address<'a>>,
    subject: &'a str,
    content: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<SendGridAttachment<'a>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: &'a BTreeMap<String, String>,
}

fn addresses(list: &[String]) -> Vec<Address<'_>> {
    list.iter().map(|a| Address::bare(a)).collect()
}

fn mail_send(message: &Message) -> MailSend<'_> {
    let mut content = Vec::with_capacity(2);
    if let Some(text) = message.text.as_deref().filter(|t| !t.is_empty()) {
        content.push(Content {
            kind: "text/plain",
            value: text,
        });
    }
    content.push(Content {
        kind: "text/html",
        value: &message.html,
    });

    MailSend {
        personalizations: vec![Personalization {
            to: addresses(&message.to),
            cc: addresses(&message.cc),
            bcc: addresses(&message.bcc),
        }],
        from: Address {
            email: &message.from.address,
            name: message.from.name.as_deref(),
        },
        reply_to: message
            .reply_to
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(Address::bare),
        subject: &message.subject,
        content,
        attachments: message
            .attachments
            .iter()
            .map(|a| SendGridAttachment {
                content: STANDARD.encode(&a.data),
                content_type: &a.content_type,
                filename: &a.file_name,
                disposition: if a.is_inline() { "inline" } else { "attachment" },
                content_id: a.content_id.as_deref(),
            })
            .collect(),
        headers: &message.headers,
    }
}

/// SendGrid transport. The profile host, when set, replaces the public API
/// base URL.
pub struct SendGridProvider {
    default_base_url: String,
}

impl Default for SendGridProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SendGridProvider {
    pub fn new() -> Self {
        Self {
            default_base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the provider at a different API base, e.g. a local stub.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            default_base_url: base_url.into(),
        }
    }

    fn fail(&self, reason: impl Into<String>) -> EmailError {
        provider_error(ProviderType::SendGrid, reason)
    }

    fn base_url<'a>(&'a self, config: &'a ProviderConfig) -> &'a str {
        let host = config.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            self.default_base_url.trim_end_matches('/')
        }
    }

    fn client(&self, config: &ProviderConfig) -> Result<Client, EmailError> {
        Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| self.fail(format!("Failed to build HTTP client: {e}")))
    }

    async fn error_body(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("errors")?
                    .as_array()?
                    .iter()
                    .filter_map(|e| e.get("message")?.as_str().map(str::to_string))
                    .reduce(|a, b| format!("{a}; {b}"))
            })
            .unwrap_or(body);
        format!("SendGrid returned {}: {}", status.as_u16(), detail)
    }
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::SendGrid
    }

    async fn send(&self, config: &ProviderConfig, message: &Message) -> Result<String, EmailError> {
        let url = format!("{}/v3/mail/send", self.base_url(config));
        let response = self
            .client(config)?
            .post(&url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .json(&mail_send(message))
            .send()
            .await
            .map_err(|e| self.fail(format!("Failed to send email: {e}")))?;

        if !response.status().is_success() {
            return Err(self.fail(Self::error_body(response).await));
        }

        let message_id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

        tracing::info!(
            recipients = message.to.len(),
            message_id = %message_id,
            "email accepted by SendGrid"
        );
        Ok(message_id)
    }

    async fn test_connection(&self, config: &ProviderConfig) -> Result<(), EmailError> {
        if config.api_key.is_empty() {
            return Err(self.fail("API key is required"));
        }
        let url = format!("{}/v3/scopes", self.base_url(config));
        let response = self
            .client(config)?
            .get(&url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .send()
            .await
            .map_err(|e| self.fail(format!("SendGrid connection test failed: {e}")))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(self.fail("SendGrid rejected the API key"))
            }
            _ => Err(self.fail(Self::error_body(response).await)),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tms_core::email::{Attachment, AuthType, EncryptionType, Mailbox, Metadata, Priority};

    fn config(host: &str) -> ProviderConfig {
        ProviderConfig {
            provider_type: ProviderType::SendGrid,
            host: host.to_string(),
            port: 443,
            username: String::new(),
            password: String::new(),
            api_key: "SG.key".to_string(),
            oauth2_client_id: String::new(),
            oauth2_client_secret: String::new(),
            oauth2_tenant_id: String::new(),
            auth_type: AuthType::ApiKey,
            encryption_type: EncryptionType::SslTls,
            timeout: Duration::from_secs(5),
            max_connections: 1,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_mail_send_body() {
        let mut headers = BTreeMap::new();
        headers.insert("X-Organization-ID".to_string(), "org_1".to_string());
        let message = Message {
            from: Mailbox::new("ops@example.com", "Ops"),
            to: vec!["a@example.com".to_string()],
            cc: vec!["c@example.com".to_string()],
            bcc: vec![],
            subject: "Hi".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: Some("Hi".to_string()),
            reply_to: Some("support@example.com".to_string()),
            headers,
            priority: Priority::Medium,
            attachments: vec![Attachment {
                file_name: "logo.png".to_string(),
                content_type: "image/png".to_string(),
                data: vec![1, 2, 3],
                content_id: Some("logo".to_string()),
            }],
        };

        let body = serde_json::to_value(mail_send(&message)).unwrap();
        assert_eq!(body["personalizations"][0]["to"][0]["email"], "a@example.com");
        assert_eq!(body["personalizations"][0]["cc"][0]["email"], "c@example.com");
        assert!(body["personalizations"][0].get("bcc").is_none());
        assert_eq!(body["from"]["name"], "Ops");
        assert_eq!(body["reply_to"]["email"], "support@example.com");
        assert_eq!(body["content"][0]["type"], "text/plain");
        assert_eq!(body["content"][1]["type"], "text/html");
        assert_eq!(body["attachments"][0]["content"], "AQID");
        assert_eq!(body["attachments"][0]["disposition"], "inline");
        assert_eq!(body["headers"]["X-Organization-ID"], "org_1");
    }

    #[test]
    fn test_base_url_override() {
        let provider = SendGridProvider::new();
        assert_eq!(provider.base_url(&config("")), DEFAULT_BASE_URL);
        assert_eq!(provider.base_url(&config("smtp.sendgrid.net")), DEFAULT_BASE_URL);
        assert_eq!(
            provider.base_url(&config("http://127.0.0.1:9000/")),
            "http://127.0.0.1:9000"
        );
    }

    #[tokio::test]
    async fn test_connection_requires_api_key() {
        let provider = SendGridProvider::with_base_url("http://127.0.0.1:9");
        let mut cfg = config("");
        cfg.api_key.clear();
        let err = provider.test_connection(&cfg).await.unwrap_err();
        assert!(err.to_string().contains("API key is required"));
    }
}
