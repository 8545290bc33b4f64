pub mod models;
pub mod queries;
pub mod sqlite;

pub use models::FileRecord;
pub use sqlite::{MetadataCache, LEGACY_TABLE, SCHEMA_VERSION};
