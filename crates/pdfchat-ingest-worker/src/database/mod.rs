pub mod listener;
pub mod models;
pub mod repository;

pub use listener::NotificationListener;
pub use models::StagedDocument;
pub use pdfchat_core::database::DbPool;
pub use repository::Repository;
