//! Email domain model
//!
//! - [`EmailProfile`]: provider credentials, encrypted at rest
//! - [`EmailTemplate`]: subject/HTML/text templates with a variable schema
//! - [`QueueItem`]: persisted outbound email with its status machine
//! - [`EmailLog`]: per-item delivery log with idempotent event merge
//! - [`EmailProvider`]: transport contract

mod log;
mod message;
mod profile;
mod provider;
mod queue;
mod template;

pub use log::{BounceType, EmailLog, LogEvent, LogStatus};
pub use message::{Attachment, AttachmentMeta, AttachmentPayload, Mailbox, Message};
pub use profile::{
    is_email, AuthType, EmailProfile, EncryptionType, ProfileStatus, ProviderType, SecretField,
};
pub use provider::{EmailProvider, ProviderConfig};
pub use queue::{
    Priority, QueueItem, QueueStatus, DEFAULT_MAX_RETRIES, META_ORGANIZATION_ID, META_QUEUE_ID,
};
pub use template::{sample_data, EmailTemplate, PropertySchema, VariableType, VariablesSchema};

/// Free-form JSON metadata attached to email records.
pub type Metadata = serde_json::Map<String, serde_json::Value>;
