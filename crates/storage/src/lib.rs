pub mod error;
pub mod keys;
pub mod memory;
pub mod records;
pub mod rest;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use memory::{MemoryCache, MemoryRemote};
pub use records::LessonSheet;
pub use rest::{RestConfig, RestRemote};
pub use sqlite::SqliteCache;
pub use traits::*;
