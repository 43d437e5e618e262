pub mod download_service;
pub mod progress_service;
