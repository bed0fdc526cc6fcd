//! Email pipeline services
//!
//! - [`ProfileService`]: provider profiles with secrets encrypted at rest
//! - [`TemplateService`]: template CRUD, compile cache and rendering
//! - [`MessageBuilder`]: queue item plus profile to provider message
//! - [`EmailSender`]: provider dispatch with decrypted settings
//! - [`QueueProcessor`]: the per-item status machine and polling pass
//! - [`EmailService`]: the entry points the routes and the job call

mod builder;
mod processor;
mod profile;
mod sender;
mod service;
mod template;

pub use builder::MessageBuilder;
pub use processor::{ItemOutcome, ProcessStats, QueueProcessor};
pub use profile::ProfileService;
pub use sender::EmailSender;
pub use service::{
    EmailService, EmailStatusResponse, EmailStores, QueueEmailRequest, SendEmailRequest,
    SendEmailResponse, SendTemplatedEmailRequest, TestProfileResponse,
};
pub use template::{RenderedEmail, TemplateService};
