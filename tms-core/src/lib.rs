//! TMS Core - Domain Types
//!
//! Pure data structures and pure functions shared by the storage and HTTP
//! layers. Nothing in this crate performs I/O.

pub mod crypto;
pub mod email;
pub mod error;
pub mod pulid;
pub mod sequence;
pub mod session;
pub mod tenant;

pub use crypto::Encryptor;
pub use error::{
    ConfigError, CryptoError, EmailError, ErrorContext, ErrorKind, FieldCode, FieldError,
    MultiError, ResultExt, SequenceError, SessionError, StorageError, TmsError, TmsResult,
};
pub use pulid::{Pulid, PulidError};
pub use session::{Session, SessionStatus, MAX_SESSION_AGE};
pub use tenant::TenantContext;

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
