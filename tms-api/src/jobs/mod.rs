//! Background Jobs
//!
//! - `email_queue`: polls the email queue and delivers due items
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(email_queue_task(service, EmailQueueConfig::from_env(), shutdown_rx));
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod email_queue;

pub use email_queue::{email_queue_task, EmailQueueMetrics, EmailQueueSnapshot};
