// Authentication module
// Manages token lifecycle, claim decoding and session persistence

mod claims;
mod manager;
mod refresh;
mod storage;
mod types;

pub use claims::decode_claims;
pub use manager::{TokenManager, DEFAULT_REFRESH_THRESHOLD};
pub use storage::{keys, KeyValueStore, MemoryStore, SqliteStore};
pub use types::{AuthSession, Claims, Role};
