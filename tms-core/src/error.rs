//! Error types for TMS core operations
//!
//! Every fallible core call returns [`TmsResult`]. Errors cross component
//! boundaries wrapped in [`TmsError::Context`], which records the operation
//! name and the entity identifiers involved so a failure deep in the sequence
//! store still says which organization and kind it was serving.

use crate::pulid::PulidError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Abstract error classification used for surface mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    AuthenticationRequired,
    AuthorizationDenied,
    BusinessRule,
    RateLimited,
    Internal,
    Integration,
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("{entity} already exists: {reason}")]
    Duplicate { entity: String, reason: String },

    #[error("query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("connection pool error: {reason}")]
    Pool { reason: String },

    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        StorageError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

/// Sequence generation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("invalid sequence format: {reason}")]
    InvalidFormat { reason: String },

    #[error("invalid sequence number: {reason}")]
    InvalidNumber { reason: String },

    #[error("invalid sequence type: {kind}")]
    InvalidSequenceType { kind: String },

    #[error("sequence update conflict for {key}")]
    UpdateConflict { key: String },

    #[error("failed to allocate sequence after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
}

/// Email pipeline errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmailError {
    #[error("cannot delete the default email profile")]
    CannotDeleteDefault,

    #[error("email is not scheduled")]
    NotScheduled,

    #[error("email cannot be retried: status {status}, retries {retry_count}/{max_retries}")]
    CannotRetry {
        status: String,
        retry_count: i32,
        max_retries: i32,
    },

    #[error("no default email profile configured for organization {organization_id}")]
    NoDefaultProfile { organization_id: String },

    #[error("failed to convert attachments: {reason}")]
    ConvertAttachments { reason: String },

    #[error("email provider not registered: {provider_type}")]
    ProviderNotRegistered { provider_type: String },

    /// Provider failures display the provider's message verbatim so it can be
    /// stored on the queue row as-is.
    #[error("{reason}")]
    Provider {
        provider_type: String,
        reason: String,
    },

    #[error("template error: {reason}")]
    Template { reason: String },
}

/// Encryption errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed: {reason}")]
    EncryptFailed { reason: String },

    #[error("ciphertext is not valid base64: {reason}")]
    InvalidEncoding { reason: String },

    #[error("ciphertext too short: {len} bytes")]
    CiphertextTooShort { len: usize },

    #[error("decryption failed: authentication tag mismatch")]
    AuthenticationFailed,

    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,
}

/// Session validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session expired")]
    Expired,

    #[error("session is not active")]
    NotActive,

    #[error("session not found")]
    NotFound,

    #[error("session ip address mismatch")]
    IpMismatch,

    #[error("session storage error: {reason}")]
    Storage { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

// ============================================================================
// MULTI-ERROR
// ============================================================================

/// Field-level validation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldCode {
    Required,
    Invalid,
    InvalidLength,
    OutOfRange,
    InvalidFormat,
    TypeMismatch,
    AlreadyExists,
}

impl fmt::Display for FieldCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldCode::Required => "required",
            FieldCode::Invalid => "invalid",
            FieldCode::InvalidLength => "invalidLength",
            FieldCode::OutOfRange => "outOfRange",
            FieldCode::InvalidFormat => "invalidFormat",
            FieldCode::TypeMismatch => "typeMismatch",
            FieldCode::AlreadyExists => "alreadyExists",
        };
        f.write_str(s)
    }
}

/// One field-scoped validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub code: FieldCode,
    pub detail: String,
}

/// Collector for field-scoped validation failures.
///
/// Presents as a single error value; callers add failures as they check and
/// finish with [`MultiError::into_result`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultiError {
    errors: Vec<FieldError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, code: FieldCode, detail: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            code,
            detail: detail.into(),
        });
    }

    /// Merge another collector, prefixing its field names.
    pub fn extend_prefixed(&mut self, prefix: &str, other: MultiError) {
        for e in other.errors {
            self.errors.push(FieldError {
                field: format!("{}.{}", prefix, e.field),
                ..e
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    pub fn into_result(self) -> Result<(), MultiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed")?;
        for (idx, e) in self.errors.iter().enumerate() {
            let sep = if idx == 0 { ": " } else { "; " };
            write!(f, "{}{} ({}): {}", sep, e.field, e.code, e.detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

// ============================================================================
// CONTEXT TAGS
// ============================================================================

/// Operation name plus identifying tags attached when an error crosses a
/// component boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub operation: String,
    pub tags: Vec<(String, String)>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            tags: Vec::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operation)
    }
}

// ============================================================================
// MASTER ERROR
// ============================================================================

/// Master error type for all TMS core errors.
#[derive(Debug, Clone, Error)]
pub enum TmsError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] MultiError),

    #[error("invalid identifier: {0}")]
    Identifier(#[from] PulidError),

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("permission denied: {action} on {resource}")]
    AuthorizationDenied { action: String, resource: String },

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("internal error: {reason}")]
    Internal { reason: String },

    #[error("{context}: {source}")]
    Context {
        context: ErrorContext,
        #[source]
        source: Box<TmsError>,
    },
}

impl TmsError {
    pub fn internal(reason: impl Into<String>) -> Self {
        TmsError::Internal {
            reason: reason.into(),
        }
    }

    /// Wrap with an operation context.
    pub fn wrap(self, context: ErrorContext) -> Self {
        TmsError::Context {
            context,
            source: Box::new(self),
        }
    }

    /// Innermost error beneath every context layer.
    pub fn root(&self) -> &TmsError {
        let mut current = self;
        while let TmsError::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Outermost context, if any.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            TmsError::Context { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Operation names from outermost to innermost.
    pub fn operations(&self) -> Vec<&str> {
        let mut ops = Vec::new();
        let mut current = self;
        while let TmsError::Context { context, source } = current {
            ops.push(context.operation.as_str());
            current = source;
        }
        ops
    }

    /// First value for `key` found while walking the context chain.
    pub fn tag(&self, key: &str) -> Option<&str> {
        let mut current = self;
        while let TmsError::Context { context, source } = current {
            if let Some(v) = context.get(key) {
                return Some(v);
            }
            current = source;
        }
        None
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            TmsError::Storage(e) => match e {
                StorageError::NotFound { .. } => ErrorKind::NotFound,
                StorageError::Duplicate { .. } => ErrorKind::Conflict,
                _ => ErrorKind::Internal,
            },
            TmsError::Sequence(e) => match e {
                SequenceError::InvalidFormat { .. }
                | SequenceError::InvalidNumber { .. }
                | SequenceError::InvalidSequenceType { .. } => ErrorKind::Validation,
                SequenceError::UpdateConflict { .. } | SequenceError::MaxRetriesExceeded { .. } => {
                    ErrorKind::Conflict
                }
            },
            TmsError::Email(e) => match e {
                EmailError::CannotDeleteDefault
                | EmailError::NotScheduled
                | EmailError::CannotRetry { .. } => ErrorKind::BusinessRule,
                EmailError::NoDefaultProfile { .. } => ErrorKind::NotFound,
                EmailError::Template { .. } => ErrorKind::Validation,
                EmailError::ConvertAttachments { .. }
                | EmailError::ProviderNotRegistered { .. }
                | EmailError::Provider { .. } => ErrorKind::Integration,
            },
            TmsError::Session(SessionError::Storage { .. }) => ErrorKind::Internal,
            TmsError::Session(_) | TmsError::AuthenticationRequired => {
                ErrorKind::AuthenticationRequired
            }
            TmsError::Validation(_) | TmsError::Identifier(_) => ErrorKind::Validation,
            TmsError::Unauthorized { .. } => ErrorKind::Unauthorized,
            TmsError::AuthorizationDenied { .. } => ErrorKind::AuthorizationDenied,
            TmsError::RateLimited => ErrorKind::RateLimited,
            TmsError::Crypto(_) | TmsError::Config(_) | TmsError::Internal { .. } => {
                ErrorKind::Internal
            }
            // root() never returns a context layer
            TmsError::Context { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type alias for TMS core operations.
pub type TmsResult<T> = Result<T, TmsError>;

/// Attach operation context to any error convertible into [`TmsError`].
pub trait ResultExt<T> {
    /// Tag the error with an operation name.
    fn op(self, operation: &str) -> TmsResult<T>;

    /// Tag the error with a lazily built context.
    fn with_context<F>(self, f: F) -> TmsResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<TmsError>,
{
    fn op(self, operation: &str) -> TmsResult<T> {
        self.map_err(|e| e.into().wrap(ErrorContext::new(operation)))
    }

    fn with_context<F>(self, f: F) -> TmsResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| e.into().wrap(f()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_displays_reason_verbatim() {
        let err = TmsError::from(EmailError::Provider {
            provider_type: "SMTP".to_string(),
            reason: "550 mailbox unavailable".to_string(),
        });
        assert_eq!(err.to_string(), "550 mailbox unavailable");
    }

    #[test]
    fn test_context_chain_root_and_tags() {
        let inner: TmsResult<()> = Err(SequenceError::UpdateConflict {
            key: "pro_number".to_string(),
        }
        .into());
        let err = inner
            .with_context(|| ErrorContext::new("get next sequence").tag("org", "org_1"))
            .op("generate")
            .unwrap_err();

        assert_eq!(err.operations(), vec!["generate", "get next sequence"]);
        assert_eq!(err.tag("org"), Some("org_1"));
        assert_eq!(err.tag("missing"), None);
        assert!(matches!(
            err.root(),
            TmsError::Sequence(SequenceError::UpdateConflict { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().starts_with("generate: get next sequence: "));
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            TmsError::from(StorageError::not_found("email profile", "prof_x")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            TmsError::from(EmailError::CannotDeleteDefault).kind(),
            ErrorKind::BusinessRule
        );
        assert_eq!(
            TmsError::from(CryptoError::AuthenticationFailed).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            TmsError::from(SessionError::Expired).kind(),
            ErrorKind::AuthenticationRequired
        );
        assert_eq!(
            TmsError::from(EmailError::ConvertAttachments {
                reason: "x".to_string()
            })
            .kind(),
            ErrorKind::Integration
        );
        assert_eq!(TmsError::RateLimited.kind(), ErrorKind::RateLimited);
    }

    #[test]
    fn test_multi_error_collects_fields() {
        let mut errs = MultiError::new();
        assert!(errs.clone().into_result().is_ok());

        errs.add("name", FieldCode::Required, "Name is required");
        errs.add("port", FieldCode::OutOfRange, "Port must be between 1 and 65535");
        assert_eq!(errs.len(), 2);
        assert!(errs.has_field("port"));

        let msg = errs.to_string();
        assert!(msg.contains("name (required): Name is required"));
        assert!(msg.contains("; port (outOfRange)"));

        let err = TmsError::from(errs.into_result().unwrap_err());
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_multi_error_prefixed_merge() {
        let mut inner = MultiError::new();
        inner.add("clientId", FieldCode::Required, "Client ID is required");
        let mut outer = MultiError::new();
        outer.extend_prefixed("oauth2", inner);
        assert!(outer.has_field("oauth2.clientId"));
    }
}
