//! Email profiles: provider credentials and sending limits.

use super::Metadata;
use crate::error::{FieldCode, MultiError};
use crate::pulid::Pulid;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("Invalid email regex")
});

/// True when `value` looks like a deliverable email address.
pub fn is_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "SMTP")]
    Smtp,
    SendGrid,
    #[serde(rename = "AWS_SES")]
    AwsSes,
    Mailgun,
    Postmark,
    Exchange,
    Office365,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Smtp => "SMTP",
            ProviderType::SendGrid => "SendGrid",
            ProviderType::AwsSes => "AWS_SES",
            ProviderType::Mailgun => "Mailgun",
            ProviderType::Postmark => "Postmark",
            ProviderType::Exchange => "Exchange",
            ProviderType::Office365 => "Office365",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            ProviderType::Smtp,
            ProviderType::SendGrid,
            ProviderType::AwsSes,
            ProviderType::Mailgun,
            ProviderType::Postmark,
            ProviderType::Exchange,
            ProviderType::Office365,
        ]
        .into_iter()
        .find(|p| p.as_str() == s)
    }

    /// Providers that speak SMTP on the wire.
    pub fn is_smtp_family(&self) -> bool {
        matches!(
            self,
            ProviderType::Smtp | ProviderType::Exchange | ProviderType::Office365
        )
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthType {
    Plain,
    Login,
    #[serde(rename = "CRAMMD5")]
    CramMd5,
    OAuth2,
    #[serde(rename = "APIKey")]
    ApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionType {
    None,
    #[serde(rename = "SSL_TLS")]
    SslTls,
    #[serde(rename = "STARTTLS")]
    StartTls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProfileStatus {
    #[default]
    Active,
    Inactive,
}

/// An organization's sending configuration.
///
/// `password`, `api_key` and `oauth2_client_secret` hold ciphertext once the
/// profile has been stored. Clients that read a profile and send it back
/// unchanged keep the stored secret; a different value is treated as new
/// plaintext and encrypted on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailProfile {
    #[serde(default)]
    pub id: Pulid,
    #[serde(default)]
    pub organization_id: Pulid,
    #[serde(default)]
    pub business_unit_id: Pulid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ProfileStatus,
    pub provider_type: ProviderType,
    pub auth_type: AuthType,
    pub encryption_type: EncryptionType,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, rename = "oauth2ClientId")]
    pub oauth2_client_id: String,
    #[serde(default, rename = "oauth2ClientSecret")]
    pub oauth2_client_secret: String,
    #[serde(default, rename = "oauth2TenantId")]
    pub oauth2_tenant_id: String,
    pub from_address: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default = "defaults::max_connections")]
    pub max_connections: i32,
    #[serde(default = "defaults::timeout_seconds")]
    pub timeout_seconds: i32,
    #[serde(default = "defaults::retry_count")]
    pub retry_count: i32,
    #[serde(default = "defaults::retry_delay_seconds")]
    pub retry_delay_seconds: i32,
    #[serde(default = "defaults::rate_limit_per_minute")]
    pub rate_limit_per_minute: i32,
    #[serde(default = "defaults::rate_limit_per_hour")]
    pub rate_limit_per_hour: i32,
    #[serde(default = "defaults::rate_limit_per_day")]
    pub rate_limit_per_day: i32,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

mod defaults {
    pub fn max_connections() -> i32 {
        5
    }
    pub fn timeout_seconds() -> i32 {
        30
    }
    pub fn retry_count() -> i32 {
        3
    }
    pub fn retry_delay_seconds() -> i32 {
        5
    }
    pub fn rate_limit_per_minute() -> i32 {
        60
    }
    pub fn rate_limit_per_hour() -> i32 {
        1000
    }
    pub fn rate_limit_per_day() -> i32 {
        10000
    }
}

/// Secret columns that are encrypted at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretField {
    Password,
    ApiKey,
    OAuth2ClientSecret,
}

impl SecretField {
    pub const ALL: [SecretField; 3] = [
        SecretField::Password,
        SecretField::ApiKey,
        SecretField::OAuth2ClientSecret,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SecretField::Password => "password",
            SecretField::ApiKey => "apiKey",
            SecretField::OAuth2ClientSecret => "oauth2ClientSecret",
        }
    }
}

impl EmailProfile {
    /// A minimal SMTP profile, mostly useful as a starting point for tests
    /// and fixtures.
    pub fn smtp(organization_id: Pulid, name: &str, host: &str, from_address: &str) -> Self {
        Self {
            id: Pulid::nil(),
            organization_id,
            business_unit_id: Pulid::nil(),
            name: name.to_string(),
            description: String::new(),
            status: ProfileStatus::Active,
            provider_type: ProviderType::Smtp,
            auth_type: AuthType::Plain,
            encryption_type: EncryptionType::StartTls,
            host: host.to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            api_key: String::new(),
            oauth2_client_id: String::new(),
            oauth2_client_secret: String::new(),
            oauth2_tenant_id: String::new(),
            from_address: from_address.to_string(),
            from_name: String::new(),
            reply_to: None,
            max_connections: defaults::max_connections(),
            timeout_seconds: defaults::timeout_seconds(),
            retry_count: defaults::retry_count(),
            retry_delay_seconds: defaults::retry_delay_seconds(),
            rate_limit_per_minute: defaults::rate_limit_per_minute(),
            rate_limit_per_hour: defaults::rate_limit_per_hour(),
            rate_limit_per_day: defaults::rate_limit_per_day(),
            is_default: false,
            metadata: Metadata::new(),
            version: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn secret(&self, field: SecretField) -> &str {
        match field {
            SecretField::Password => &self.password,
            SecretField::ApiKey => &self.api_key,
            SecretField::OAuth2ClientSecret => &self.oauth2_client_secret,
        }
    }

    pub fn secret_mut(&mut self, field: SecretField) -> &mut String {
        match field {
            SecretField::Password => &mut self.password,
            SecretField::ApiKey => &mut self.api_key,
            SecretField::OAuth2ClientSecret => &mut self.oauth2_client_secret,
        }
    }

    /// Whether the provider and auth type read `field` at send time.
    pub fn uses_secret(&self, field: SecretField) -> bool {
        let api_provider = matches!(
            self.provider_type,
            ProviderType::SendGrid | ProviderType::Mailgun | ProviderType::Postmark
        );
        match field {
            SecretField::Password => {
                self.provider_type == ProviderType::AwsSes
                    || (!api_provider && self.auth_type != AuthType::ApiKey)
            }
            SecretField::ApiKey => {
                api_provider
                    || self.provider_type == ProviderType::AwsSes
                    || self.auth_type == AuthType::ApiKey
            }
            SecretField::OAuth2ClientSecret => self.auth_type == AuthType::OAuth2,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ProfileStatus::Active
    }

    /// Struct-level validation, including provider-specific requirements.
    pub fn check(&self) -> MultiError {
        let mut errs = MultiError::new();

        if self.organization_id.is_nil() {
            errs.add("organizationId", FieldCode::Required, "Organization ID is required");
        }

        let name_len = self.name.chars().count();
        if name_len == 0 {
            errs.add("name", FieldCode::Required, "Name is required");
        } else if name_len > 255 {
            errs.add(
                "name",
                FieldCode::InvalidLength,
                "Name must be between 1 and 255 characters",
            );
        }

        if self.description.chars().count() > 1000 {
            errs.add(
                "description",
                FieldCode::InvalidLength,
                "Description must be less than 1000 characters",
            );
        }

        if self.from_address.is_empty() {
            errs.add("fromAddress", FieldCode::Required, "From Address is required");
        } else if !is_email(&self.from_address) {
            errs.add(
                "fromAddress",
                FieldCode::InvalidFormat,
                "From Address must be a valid email",
            );
        }

        if let Some(reply_to) = self.reply_to.as_deref().filter(|r| !r.is_empty()) {
            if !is_email(reply_to) {
                errs.add(
                    "replyTo",
                    FieldCode::InvalidFormat,
                    "Reply To must be a valid email",
                );
            }
        }

        range(&mut errs, "maxConnections", self.max_connections, 1, 100);
        range(&mut errs, "timeoutSeconds", self.timeout_seconds, 5, 300);
        range(&mut errs, "retryCount", self.retry_count, 0, 10);
        range(&mut errs, "retryDelaySeconds", self.retry_delay_seconds, 1, 60);
        range(&mut errs, "rateLimitPerMinute", self.rate_limit_per_minute, 1, 1000);
        range(&mut errs, "rateLimitPerHour", self.rate_limit_per_hour, 1, 100_000);
        range(&mut errs, "rateLimitPerDay", self.rate_limit_per_day, 1, 1_000_000);

        self.check_provider(&mut errs);
        errs
    }

    fn check_provider(&self, errs: &mut MultiError) {
        match self.provider_type {
            ProviderType::Smtp => {
                if self.host.is_empty() {
                    errs.add("host", FieldCode::Required, "Host is required for SMTP");
                }
                if self.port == 0 {
                    errs.add("port", FieldCode::Required, "Port is required for SMTP");
                } else {
                    range(errs, "port", self.port, 1, 65535);
                }
                if self.auth_type != AuthType::ApiKey && self.username.is_empty() {
                    errs.add(
                        "username",
                        FieldCode::Required,
                        "Username is required for SMTP authentication",
                    );
                }
                if matches!(self.auth_type, AuthType::Plain | AuthType::Login)
                    && self.password.is_empty()
                {
                    errs.add(
                        "password",
                        FieldCode::Required,
                        "Password is required for Plain or Login authentication",
                    );
                }
            }
            ProviderType::SendGrid | ProviderType::Mailgun | ProviderType::Postmark => {
                if self.api_key.is_empty() {
                    errs.add(
                        "apiKey",
                        FieldCode::Required,
                        format!("API Key is required for {}", self.provider_type),
                    );
                }
            }
            ProviderType::AwsSes => {
                let has_region = self
                    .metadata
                    .get("region")
                    .and_then(|v| v.as_str())
                    .is_some_and(|r| !r.is_empty());
                if !has_region {
                    errs.add(
                        "metadata.region",
                        FieldCode::Required,
                        "AWS region is required in metadata for AWS SES",
                    );
                }
            }
            ProviderType::Exchange | ProviderType::Office365 => {
                if !is_email(&self.username) {
                    errs.add(
                        "username",
                        FieldCode::InvalidFormat,
                        format!("Username must be a valid email for {}", self.provider_type),
                    );
                }
                if self.auth_type == AuthType::OAuth2 {
                    let mut oauth = MultiError::new();
                    if self.oauth2_client_id.is_empty() {
                        oauth.add("clientId", FieldCode::Required, "Client ID is required");
                    }
                    if self.oauth2_client_secret.is_empty() {
                        oauth.add(
                            "clientSecret",
                            FieldCode::Required,
                            "Client Secret is required",
                        );
                    }
                    if self.oauth2_tenant_id.is_empty() {
                        oauth.add("tenantId", FieldCode::Required, "Tenant ID is required");
                    }
                    errs.extend_prefixed("oauth2", oauth);
                }
            }
        }
    }
}

fn range(errs: &mut MultiError, field: &str, value: i32, min: i32, max: i32) {
    if value < min || value > max {
        errs.add(
            field,
            FieldCode::OutOfRange,
            format!("{} must be between {} and {}", field, min, max),
        );
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulid::prefix;

    fn valid_smtp() -> EmailProfile {
        let mut p = EmailProfile::smtp(
            Pulid::new(prefix::ORGANIZATION),
            "Primary",
            "smtp.example.com",
            "noreply@example.com",
        );
        p.username = "mailer".to_string();
        p.password = "hunter2".to_string();
        p
    }

    #[test]
    fn test_valid_smtp_profile_passes() {
        assert!(valid_smtp().check().is_empty());
    }

    #[test]
    fn test_smtp_requires_host_port_and_credentials() {
        let mut p = valid_smtp();
        p.host.clear();
        p.port = 70000;
        p.username.clear();
        p.password.clear();
        let errs = p.check();
        assert!(errs.has_field("host"));
        assert!(errs.has_field("port"));
        assert!(errs.has_field("username"));
        assert!(errs.has_field("password"));
    }

    #[test]
    fn test_smtp_api_key_auth_skips_username() {
        let mut p = valid_smtp();
        p.auth_type = AuthType::ApiKey;
        p.username.clear();
        p.password.clear();
        assert!(p.check().is_empty());
    }

    #[test]
    fn test_api_key_providers_require_key() {
        let mut p = valid_smtp();
        p.provider_type = ProviderType::SendGrid;
        p.auth_type = AuthType::ApiKey;
        assert!(p.check().has_field("apiKey"));
        p.api_key = "SG.xxx".to_string();
        assert!(p.check().is_empty());
    }

    #[test]
    fn test_ses_requires_region() {
        let mut p = valid_smtp();
        p.provider_type = ProviderType::AwsSes;
        assert!(p.check().has_field("metadata.region"));
        p.metadata
            .insert("region".to_string(), serde_json::json!("us-east-1"));
        assert!(p.check().is_empty());
    }

    #[test]
    fn test_office365_oauth_requirements() {
        let mut p = valid_smtp();
        p.provider_type = ProviderType::Office365;
        p.auth_type = AuthType::OAuth2;
        p.username = "not-an-email".to_string();
        let errs = p.check();
        assert!(errs.has_field("username"));
        assert!(errs.has_field("oauth2.clientId"));
        assert!(errs.has_field("oauth2.clientSecret"));
        assert!(errs.has_field("oauth2.tenantId"));
    }

    #[test]
    fn test_general_ranges_and_addresses() {
        let mut p = valid_smtp();
        p.name = "x".repeat(256);
        p.from_address = "nope".to_string();
        p.reply_to = Some("also nope".to_string());
        p.max_connections = 0;
        p.timeout_seconds = 301;
        p.retry_count = 11;
        let errs = p.check();
        for f in [
            "name",
            "fromAddress",
            "replyTo",
            "maxConnections",
            "timeoutSeconds",
            "retryCount",
        ] {
            assert!(errs.has_field(f), "missing {f}");
        }
    }

    #[test]
    fn test_profile_json_shape() {
        let p = valid_smtp();
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["providerType"], "SMTP");
        assert_eq!(json["encryptionType"], "STARTTLS");
        assert_eq!(json["authType"], "Plain");
        assert!(json.get("oauth2ClientSecret").is_some());
        let back: EmailProfile = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_is_email() {
        assert!(is_email("ops@trenova.app"));
        assert!(!is_email("ops@"));
        assert!(!is_email("ops trenova.app"));
    }
}
