pub mod chunk;
pub mod job;
pub mod progress;
pub mod record;

pub use chunk::{ByteRange, ChunkDescriptor, ChunkPlan, Strategy};
pub use job::{DownloadItem, DownloadJob, FileSpec, ItemId, JobState};
pub use progress::{DownloadEvent, ProgressEvent, ProgressSnapshot};
pub use record::{DownloadRecord, RecordStatus};
