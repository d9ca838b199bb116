pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod remote;
pub mod store;
pub mod sync;
pub mod tasks;

pub use config::SyncConfig;
pub use error::{ResolveError, SyncError};
pub use models::{ConnectionState, ConnectionStatus, PollRecord, RemoteStatus};
pub use store::{PollReader, PollStore};
pub use sync::engine::{SessionHandle, SessionState};
