//! Transfer orchestration: multipart uploads, session pooling and the
//! recursive copy and delete workers.

pub mod cache;
mod copy;
mod delete;
pub mod listener;
pub mod local;
pub mod multipart;
pub mod pool;
mod report;
mod status;

pub use cache::ListingCache;
pub use copy::CopyWorker;
pub use delete::DeleteWorker;
pub use listener::{
    ConnectionCallback, DisabledConnectionCallback, DisabledLoginCallback, DisabledPasswordCallback,
    DisabledProgressListener, LoginCallback, PasswordCallback, ProgressListener, StaticPassword,
};
pub use local::{LocalFile, LocalSource};
pub use multipart::{MAXIMUM_UPLOAD_PARTS, MultipartUploader, part_size_for};
pub use pool::{PooledSession, SessionFactory, SessionPool};
pub use report::{CopyMethod, FailurePolicy, ItemOutcome, TransferReport};
pub use status::{Interrupt, TransferStatus};
