mod bridge;
mod kv;
mod preferences;
mod schema;
mod types;

pub use bridge::{PersistedRecord, StorageBridge, STORAGE_KEY, STORAGE_SCHEMA_VERSION};
pub use kv::KeyValueStore;
pub use schema::Database;
pub use types::DatabaseError;
