pub mod images;
pub mod job_store;
pub mod processor;
pub mod queue;
pub mod storage;
pub mod store_master;
