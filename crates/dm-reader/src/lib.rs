pub mod config;
pub mod reader;

pub use config::{ConfigError, ReaderConfig};
pub use dm_db::DbError;
pub use reader::ChatReader;
