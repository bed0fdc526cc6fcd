//! TMS Storage - Collaborator Contracts
//!
//! Traits the services depend on, the sequence retry loop that sits on top
//! of [`SequenceAllocator`], and in-memory implementations used by tests and
//! single-node deployments. PostgreSQL implementations live in `tms-api`.

pub mod attachment;
pub mod cache;
pub mod email;
pub mod format;
pub mod sequence;
pub mod session;

pub use attachment::{validate_attachments, AttachmentHandler, InMemoryAttachmentHandler};
pub use cache::{InMemoryCache, RateLimitCache, WindowHit};
pub use email::{
    InMemoryEmailStore, LogRepository, ProfileRepository, QueueRepository, TemplateRepository,
};
pub use format::{FormatOverrideStore, InMemoryFormatOverrides};
pub use sequence::{
    InMemorySequenceAllocator, RetryPolicy, SequenceAllocator, SequenceKey, SequenceRequest,
    SequenceStore,
};
pub use session::{InMemorySessionStore, SessionPolicy, SessionService};
