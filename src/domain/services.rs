//! Download engine: capability inspection, chunk planning, chunk workers, progress,
//! assembly, resume and batch sequencing.

pub mod batch;
pub mod chunk_worker;
pub mod download;
pub mod infer_name;
pub mod merge_parts;
pub mod inspect;
pub mod progress;
pub mod resume;
pub mod speed;
pub mod split_parts;
