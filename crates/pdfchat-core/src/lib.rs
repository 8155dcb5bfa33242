pub mod chunker;
pub mod collection;
pub mod database;
pub mod jobs;
pub mod models;
pub mod vector;

pub use database::DbPool;
pub use models::{IngestJob, StreamRecord};
