//! Adapters: configuration, the http range transport and storage.

pub mod config;
#[cfg(feature = "http")]
pub mod network;
pub mod storage;
