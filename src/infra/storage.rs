pub mod fs_adapter;
pub mod record_store;
