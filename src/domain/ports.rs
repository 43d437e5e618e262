pub mod download_service;
pub mod progress_tracker;
pub mod record_store;
pub mod storage_service;
