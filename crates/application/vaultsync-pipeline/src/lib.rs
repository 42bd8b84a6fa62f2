mod io_utils;
pub mod scheduler;
pub mod sync;
pub mod tracker;

pub use scheduler::{OperationExecutor, OperationHandle, OperationScheduler, QueueStatus};
pub use sync::{
    ConflictCoordinator, ConflictDialog, CryptoProvider, FileSystem, FileTransfer,
    HttpRemoteSyncApi, LocalChanges, LocalFileSystem, MetadataStore, ReconciliationPlanner,
    RemoteSyncApi, SyncError, SyncOptions, SyncPlan, SyncService,
};
pub use tracker::{ProgressBook, ProgressCallback};
