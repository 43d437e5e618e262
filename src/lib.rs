//! # vaultdl
//!
//! Resumable, parallel, chunked download engine for game installers.
//!
//! Large files are fetched as concurrent byte ranges into part containers that survive
//! failures and restarts, then assembled byte exact into the final output.

pub mod application;
pub mod domain;
pub mod infra;
pub mod interfaces;
pub mod utils;
