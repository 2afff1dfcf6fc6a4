// Shared helpers for unit tests

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{MemoryStore, TokenManager, DEFAULT_REFRESH_THRESHOLD};

/// Unsigned JWT carrying `payload`
pub fn unsigned_token(payload: Value) -> String {
    format!(
        "{}.{}.sig",
        general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}

/// Student token expiring `exp_offset_secs` from now
pub fn student_token(exp_offset_secs: i64) -> String {
    unsigned_token(json!({
        "sub": "s@school.edu",
        "uuid": "user-42",
        "role_id": 3,
        "role_name": "Student",
        "exp": Utc::now().timestamp() + exp_offset_secs,
    }))
}

/// Token manager over a fresh memory store, refreshing against `base_url`
pub fn token_manager(base_url: &str) -> (Arc<TokenManager>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = TokenManager::new(store.clone(), base_url, DEFAULT_REFRESH_THRESHOLD, 5)
        .expect("token manager");
    (Arc::new(manager), store)
}
