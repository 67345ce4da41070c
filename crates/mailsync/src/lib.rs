pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;
pub mod sync;
pub mod transport;

pub use config::{load_config, load_config_from_env, load_config_from_str, SyncSettings};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ErrorClass, MailsyncError, Result};
pub use logging::LogFormat;
pub use model::{
    Attachment, FolderKind, FolderRef, ItemDelta, ItemKey, MailboxItem, SyncBatch, SyncCursor,
};
pub use store::{LocalStore, SqliteStore, StoreError};
pub use sync::{
    DraftMigrator, DraftState, FolderSyncCoordinator, FolderSyncRequest, SyncCoordination,
    SyncError, SyncMode, SyncOutcome,
};
pub use transport::{
    BatchRequest, DraftContent, DraftService, RemoteDraft, ResponseStatus, SyncResponse,
    SyncTransport, TransportError,
};
