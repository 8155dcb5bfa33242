pub mod repository;

pub use pdfchat_core::database::DbPool;
pub use repository::Repository;
