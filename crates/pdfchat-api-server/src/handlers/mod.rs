pub mod chat;
pub mod health;
pub mod ingest;
pub mod message;
