//! Application services sitting between the routes and the repositories.

pub mod email;
pub mod seqgen;

pub use email::EmailService;
pub use seqgen::{FormatProvider, GenerateRequest, SequenceGenerator};
