use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::claims::decode_claims;
use super::refresh;
use super::storage::{keys, KeyValueStore};
use super::types::{AuthSession, Claims, Role};

/// Default safety margin before the real expiry (5 minutes)
pub const DEFAULT_REFRESH_THRESHOLD: u64 = 300;

/// Token manager
/// Single source of truth for authentication state, mirrored to durable storage
pub struct TokenManager {
    /// Current session, token and claims swapped together
    session: RwLock<Option<AuthSession>>,

    /// Bumped under the session write lock whenever the session is replaced
    generation: AtomicU64,

    /// Serializes refresh attempts
    refresh_lock: Mutex<()>,

    /// Durable storage for restart survival
    store: Arc<dyn KeyValueStore>,

    /// HTTP client for refresh requests, separate from the request pipeline
    client: Client,

    /// Refresh endpoint
    refresh_url: String,

    /// Seconds before expiry at which a token counts as expired
    refresh_threshold: i64,
}

impl TokenManager {
    /// Create a new TokenManager for the given API base URL
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        base_url: &str,
        refresh_threshold: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            session: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
            store,
            client,
            refresh_url: refresh::refresh_url(base_url),
            refresh_threshold: refresh_threshold as i64,
        })
    }

    /// Hold a new session and persist it, replacing any previous one
    ///
    /// Returns false if the access token could not be decoded; nothing is
    /// stored in that case.
    pub async fn store_tokens(&self, access_token: &str, refresh_token: &str, email: &str) -> bool {
        let claims = match decode_claims(access_token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::error!("Refusing to store undecodable access token: {:#}", e);
                return false;
            }
        };

        let session = AuthSession {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            email: Some(email.to_string()),
            claims,
        };

        let mut guard = self.session.write().await;
        self.persist(&session);
        *guard = Some(session);
        self.generation.fetch_add(1, Ordering::SeqCst);
        drop(guard);

        tracing::info!(email = email, "Session stored");
        true
    }

    /// Load a persisted session on cold start
    ///
    /// Returns false when no complete session is stored or it cannot be read.
    pub async fn load_tokens(&self) -> bool {
        match self.read_persisted() {
            Ok(Some(session)) => {
                tracing::debug!(user = ?session.claims.uuid, "Loaded persisted session");
                let mut guard = self.session.write().await;
                *guard = Some(session);
                self.generation.fetch_add(1, Ordering::SeqCst);
                true
            }
            Ok(None) => {
                tracing::debug!("No persisted session");
                false
            }
            Err(e) => {
                tracing::warn!("Failed to load persisted session: {:#}", e);
                false
            }
        }
    }

    fn read_persisted(&self) -> Result<Option<AuthSession>> {
        let access_token = self.store.get(keys::ACCESS_TOKEN)?;
        let refresh_token = self.store.get(keys::REFRESH_TOKEN)?;

        let (Some(access_token), Some(refresh_token)) = (access_token, refresh_token) else {
            return Ok(None);
        };

        let fresh = decode_claims(&access_token).ok();

        let mut claims = match self.store.get(keys::DECODED_JWT)? {
            Some(blob) => {
                let stored: Claims =
                    serde_json::from_str(&blob).context("Failed to parse stored claims")?;
                match fresh {
                    // Blob left over from a different token
                    Some(fresh) if fresh.exp != stored.exp => {
                        tracing::warn!("Stored claims do not match access token, re-decoding");
                        fresh
                    }
                    _ => stored,
                }
            }
            None => match fresh {
                Some(fresh) => fresh,
                None => decode_claims(&access_token)?,
            },
        };

        if claims.role_id.is_none() {
            claims.role_id = self
                .store
                .get(keys::USER_ROLE_ID)?
                .and_then(|id| id.parse().ok());
        }
        if claims.role_name.is_none() {
            claims.role_name = self.store.get(keys::USER_ROLE_NAME)?;
        }
        if claims.uuid.is_none() {
            claims.uuid = self.store.get(keys::USER_UUID)?;
        }

        Ok(Some(AuthSession {
            access_token,
            refresh_token,
            email: self.store.get(keys::USER_EMAIL)?,
            claims,
        }))
    }

    /// Get a usable access token, refreshing once if it is about to expire
    ///
    /// `None` means the user must authenticate again.
    pub async fn get_valid_token(&self) -> Option<String> {
        let held = self.session.read().await.is_some();
        if !held && !self.load_tokens().await {
            return None;
        }

        if let Some(token) = self.current_unexpired_token().await {
            return Some(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(token) = self.current_unexpired_token().await {
            return Some(token);
        }

        tracing::debug!("Access token expiring, attempting refresh");
        if self.refresh_access_token().await {
            self.session
                .read()
                .await
                .as_ref()
                .map(|s| s.access_token.clone())
        } else {
            None
        }
    }

    async fn current_unexpired_token(&self) -> Option<String> {
        let session = self.session.read().await;
        session
            .as_ref()
            .filter(|s| !s.claims.is_expiring_at(Utc::now(), self.refresh_threshold))
            .map(|s| s.access_token.clone())
    }

    /// Replace the access token using the refresh token
    pub(crate) async fn refresh_access_token(&self) -> bool {
        let (refresh_token, previous, generation) = {
            let guard = self.session.read().await;
            let Some(session) = guard.as_ref() else {
                return false;
            };
            (
                session.refresh_token.clone(),
                session.claims.clone(),
                self.generation.load(Ordering::SeqCst),
            )
        };

        let data = match refresh::refresh_access_token(&self.client, &self.refresh_url, &refresh_token)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Token refresh failed: {:#}", e);
                return false;
            }
        };

        let mut claims = match decode_claims(&data.access_token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::error!("Refreshed token could not be decoded: {:#}", e);
                return false;
            }
        };
        claims.carry_over_identity(&previous);

        let mut guard = self.session.write().await;
        // Cleared while the refresh was in flight
        let Some(session) = guard.as_mut() else {
            tracing::warn!("Session cleared during refresh, discarding new token");
            return false;
        };
        // Replaced by another login while the refresh was in flight
        if self.generation.load(Ordering::SeqCst) != generation
            || session.refresh_token != refresh_token
        {
            tracing::warn!("Session replaced during refresh, discarding new token");
            return false;
        }

        session.access_token = data.access_token;
        session.claims = claims;
        if let Some(rotated) = data.refresh_token {
            session.refresh_token = rotated;
        }
        self.persist(session);
        true
    }

    /// Forget the session in memory and in storage
    pub async fn clear_tokens(&self) {
        let mut guard = self.session.write().await;
        *guard = None;
        self.generation.fetch_add(1, Ordering::SeqCst);

        for key in keys::ALL {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key = key, "Failed to remove persisted key: {:#}", e);
            }
        }
        drop(guard);

        tracing::info!("Session cleared");
    }

    /// Write every session field; a failing key does not stop the rest
    fn persist(&self, session: &AuthSession) {
        let blob = match serde_json::to_string(&session.claims) {
            Ok(blob) => Some(blob),
            Err(e) => {
                tracing::error!("Failed to serialize claims: {}", e);
                None
            }
        };
        let role_id = session.claims.role_id.map(|id| id.to_string());

        let fields: [(&str, Option<&str>); 7] = [
            (keys::ACCESS_TOKEN, Some(session.access_token.as_str())),
            (keys::REFRESH_TOKEN, Some(session.refresh_token.as_str())),
            (keys::USER_EMAIL, session.email.as_deref()),
            (keys::DECODED_JWT, blob.as_deref()),
            (keys::USER_UUID, session.claims.uuid.as_deref()),
            (keys::USER_ROLE_ID, role_id.as_deref()),
            (keys::USER_ROLE_NAME, session.claims.role_name.as_deref()),
        ];

        for (key, value) in fields {
            // Absent fields are removed so nothing from an older session survives
            let result = match value {
                Some(value) => self.store.set(key, value),
                None => self.store.remove(key),
            };
            if let Err(e) = result {
                tracing::error!(key = key, "Failed to persist session field: {:#}", e);
            }
        }
    }

    /// Whether a session is currently held in memory
    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Claims of the current session
    pub async fn claims(&self) -> Option<Claims> {
        self.session.read().await.as_ref().map(|s| s.claims.clone())
    }

    /// Role of the current user, Guest when logged out
    pub async fn role(&self) -> Role {
        let session = self.session.read().await;
        Role::from_id(session.as_ref().and_then(|s| s.claims.role_id))
    }

    pub async fn is_admin(&self) -> bool {
        self.role().await.is_admin()
    }

    pub async fn is_teacher(&self) -> bool {
        self.role().await.is_teacher()
    }

    pub async fn is_student(&self) -> bool {
        self.role().await.is_student()
    }

    pub async fn is_guest(&self) -> bool {
        self.role().await.is_guest()
    }

    pub async fn has_teacher_permissions(&self) -> bool {
        self.role().await.has_teacher_permissions()
    }

    pub async fn has_admin_permissions(&self) -> bool {
        self.role().await.has_admin_permissions()
    }

    pub async fn user_id(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.claims.uuid.clone())
    }

    pub async fn email(&self) -> Option<String> {
        let session = self.session.read().await;
        session
            .as_ref()
            .and_then(|s| s.email.clone().or_else(|| s.claims.subject().map(str::to_string)))
    }

    pub async fn role_name(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.claims.role_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStore;
    use crate::test_support::{student_token, unsigned_token as token};
    use serde_json::json;

    fn manager(store: Arc<dyn KeyValueStore>, base_url: &str) -> TokenManager {
        TokenManager::new(store, base_url, DEFAULT_REFRESH_THRESHOLD, 5).unwrap()
    }

    /// Store whose removals of one key always fail
    struct FailingRemoveStore {
        inner: MemoryStore,
        failing_key: &'static str,
    }

    impl KeyValueStore for FailingRemoveStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            if key == self.failing_key {
                anyhow::bail!("disk full");
            }
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn test_valid_token_returned_without_refresh() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .expect(0)
            .create_async()
            .await;

        let manager = manager(Arc::new(MemoryStore::new()), &server.url());
        let access = student_token(3600);
        assert!(manager.store_tokens(&access, "r-1", "s@school.edu").await);

        assert_eq!(manager.get_valid_token().await, Some(access));
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_expiring_token_refreshed_once() {
        let mut server = mockito::Server::new_async().await;
        let renewed = token(json!({"sub": "s@school.edu", "exp": Utc::now().timestamp() + 3600}));
        let refresh = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": renewed}).to_string())
            .expect(1)
            .create_async()
            .await;

        let manager = manager(Arc::new(MemoryStore::new()), &server.url());
        // Still valid for 4 minutes, inside the 5 minute margin
        manager
            .store_tokens(&student_token(240), "r-1", "s@school.edu")
            .await;

        assert_eq!(manager.get_valid_token().await, Some(renewed.clone()));
        // Second call uses the refreshed token
        assert_eq!(manager.get_valid_token().await, Some(renewed));
        refresh.assert_async().await;

        // Identity carried over from the previous claims
        assert_eq!(manager.user_id().await.as_deref(), Some("user-42"));
        assert_eq!(manager.role().await, Role::Student);
        assert_eq!(manager.role_name().await.as_deref(), Some("Student"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let renewed = token(json!({"exp": Utc::now().timestamp() + 3600}));
        let refresh = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": renewed}).to_string())
            .expect(1)
            .create_async()
            .await;

        let manager = manager(Arc::new(MemoryStore::new()), &server.url());
        manager
            .store_tokens(&student_token(-10), "r-1", "s@school.edu")
            .await;

        let (a, b) = tokio::join!(manager.get_valid_token(), manager.get_valid_token());
        assert_eq!(a, Some(renewed.clone()));
        assert_eq!(b, Some(renewed));
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_landing_after_new_login_is_discarded() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now().timestamp();
        let renewed_a = token(json!({"uuid": "user-A", "role_id": 1, "exp": now + 3600}));
        let refresh = server
            .mock("POST", "/auth/refresh")
            .match_body(mockito::Matcher::Json(json!({"refresh_token": "r-A"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": renewed_a, "refresh_token": "r-A2"}).to_string())
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), &server.url());
        let expired_a = token(json!({
            "sub": "a@school.edu", "uuid": "user-A", "role_id": 1,
            "role_name": "Admin", "exp": now - 10
        }));
        let access_b = token(json!({
            "sub": "b@school.edu", "uuid": "user-B", "role_id": 3,
            "role_name": "Student", "exp": now + 3600
        }));
        manager.store_tokens(&expired_a, "r-A", "a@school.edu").await;

        // The refresh is waiting on the network when B logs in
        let (refreshed, _) = tokio::join!(manager.get_valid_token(), async {
            manager.clear_tokens().await;
            assert!(manager.store_tokens(&access_b, "r-B", "b@school.edu").await);
        });

        refresh.assert_async().await;
        assert_eq!(refreshed, None);
        assert_eq!(manager.user_id().await.as_deref(), Some("user-B"));
        assert_eq!(manager.role().await, Role::Student);
        assert_eq!(manager.get_valid_token().await, Some(access_b.clone()));
        assert_eq!(store.get(keys::USER_UUID).unwrap().as_deref(), Some("user-B"));
        assert_eq!(store.get(keys::ACCESS_TOKEN).unwrap(), Some(access_b));
        assert_eq!(store.get(keys::REFRESH_TOKEN).unwrap().as_deref(), Some("r-B"));
    }

    #[tokio::test]
    async fn test_failed_refresh_yields_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let manager = manager(Arc::new(MemoryStore::new()), &server.url());
        manager
            .store_tokens(&student_token(-60), "r-1", "s@school.edu")
            .await;

        assert_eq!(manager.get_valid_token().await, None);
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_persisted() {
        let mut server = mockito::Server::new_async().await;
        let renewed = token(json!({"exp": Utc::now().timestamp() + 3600}));
        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": renewed, "refresh_token": "r-2"}).to_string())
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), &server.url());
        manager
            .store_tokens(&student_token(0), "r-1", "s@school.edu")
            .await;

        assert!(manager.get_valid_token().await.is_some());
        assert_eq!(
            store.get(keys::REFRESH_TOKEN).unwrap().as_deref(),
            Some("r-2")
        );
        assert_eq!(
            store.get(keys::ACCESS_TOKEN).unwrap(),
            Some(renewed)
        );
        // Identity fields still indexed after refresh
        assert_eq!(store.get(keys::USER_ROLE_ID).unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_string_role_id_accepted() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = manager(store.clone(), "http://127.0.0.1:9");
        let access = token(json!({
            "sub": "t@school.edu", "uuid": "user-7", "role_id": "2",
            "exp": Utc::now().timestamp() + 3600
        }));

        assert!(first.store_tokens(&access, "r-1", "t@school.edu").await);
        assert_eq!(first.role().await, Role::Teacher);
        assert_eq!(store.get(keys::USER_ROLE_ID).unwrap().as_deref(), Some("2"));

        // Persisted claims reload as a number
        let restarted = manager(store, "http://127.0.0.1:9");
        assert!(restarted.load_tokens().await);
        assert_eq!(restarted.role().await, Role::Teacher);
    }

    #[tokio::test]
    async fn test_store_then_load_after_restart() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = manager(store.clone(), "http://127.0.0.1:9");
        first
            .store_tokens(&student_token(3600), "r-1", "s@school.edu")
            .await;

        let restarted = manager(store, "http://127.0.0.1:9");
        assert!(restarted.load_tokens().await);
        assert_eq!(restarted.claims().await, first.claims().await);
        assert_eq!(restarted.role().await, Role::Student);
        assert_eq!(restarted.role_name().await.as_deref(), Some("Student"));
        assert_eq!(restarted.user_id().await.as_deref(), Some("user-42"));
        assert_eq!(restarted.email().await.as_deref(), Some("s@school.edu"));
    }

    #[tokio::test]
    async fn test_lazy_load_in_get_valid_token() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let access = student_token(3600);
        manager(store.clone(), "http://127.0.0.1:9")
            .store_tokens(&access, "r-1", "s@school.edu")
            .await;

        let restarted = manager(store, "http://127.0.0.1:9");
        assert!(!restarted.is_authenticated().await);
        assert_eq!(restarted.get_valid_token().await, Some(access));
        assert!(restarted.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_load_backfills_role_from_individual_keys() {
        let store = Arc::new(MemoryStore::new());
        let payload = json!({"sub": "t@school.edu", "exp": Utc::now().timestamp() + 3600});
        store.set(keys::ACCESS_TOKEN, &token(payload.clone())).unwrap();
        store.set(keys::REFRESH_TOKEN, "r-1").unwrap();
        store.set(keys::DECODED_JWT, &payload.to_string()).unwrap();
        store.set(keys::USER_ROLE_ID, "2").unwrap();
        store.set(keys::USER_ROLE_NAME, "Teacher").unwrap();
        store.set(keys::USER_UUID, "user-7").unwrap();

        let manager = manager(store, "http://127.0.0.1:9");
        assert!(manager.load_tokens().await);
        assert!(manager.is_teacher().await);
        assert!(manager.has_teacher_permissions().await);
        assert_eq!(manager.role_name().await.as_deref(), Some("Teacher"));
        assert_eq!(manager.user_id().await.as_deref(), Some("user-7"));
    }

    #[tokio::test]
    async fn test_load_discards_claims_from_another_token() {
        let store = Arc::new(MemoryStore::new());
        let access = student_token(3600);
        store.set(keys::ACCESS_TOKEN, &access).unwrap();
        store.set(keys::REFRESH_TOKEN, "r-1").unwrap();
        store
            .set(
                keys::DECODED_JWT,
                &json!({"uuid": "someone-else", "role_id": 1, "exp": 1}).to_string(),
            )
            .unwrap();

        let manager = manager(store, "http://127.0.0.1:9");
        assert!(manager.load_tokens().await);
        assert_eq!(manager.user_id().await.as_deref(), Some("user-42"));
        assert!(!manager.is_admin().await);
    }

    #[tokio::test]
    async fn test_load_requires_both_tokens() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::ACCESS_TOKEN, &student_token(3600)).unwrap();

        let manager = manager(store, "http://127.0.0.1:9");
        assert!(!manager.load_tokens().await);
        assert!(manager.get_valid_token().await.is_none());
    }

    #[tokio::test]
    async fn test_load_with_corrupt_claims_fails_quietly() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::ACCESS_TOKEN, "opaque").unwrap();
        store.set(keys::REFRESH_TOKEN, "r-1").unwrap();
        store.set(keys::DECODED_JWT, "{not json").unwrap();

        let manager = manager(store, "http://127.0.0.1:9");
        assert!(!manager.load_tokens().await);
        assert!(!manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_store_rejects_undecodable_token() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), "http://127.0.0.1:9");

        assert!(!manager.store_tokens("opaque", "r-1", "s@school.edu").await);
        assert!(store.is_empty());
        assert!(manager.is_guest().await);
    }

    #[tokio::test]
    async fn test_clear_tokens_continues_past_failed_removal() {
        let store = Arc::new(FailingRemoveStore {
            inner: MemoryStore::new(),
            failing_key: keys::USER_EMAIL,
        });
        let manager = manager(store.clone(), "http://127.0.0.1:9");
        manager
            .store_tokens(&student_token(3600), "r-1", "s@school.edu")
            .await;
        assert_eq!(store.inner.len(), keys::ALL.len());

        manager.clear_tokens().await;

        for key in keys::ALL.iter().filter(|k| **k != keys::USER_EMAIL) {
            assert_eq!(store.get(key).unwrap(), None, "{} survived clear", key);
        }
        assert!(!manager.is_authenticated().await);
        assert_eq!(manager.role().await, Role::Guest);
    }

    #[tokio::test]
    async fn test_new_session_overwrites_previous_identity() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), "http://127.0.0.1:9");
        manager
            .store_tokens(&student_token(3600), "r-1", "s@school.edu")
            .await;

        let guest = token(json!({"sub": "g@school.edu", "exp": Utc::now().timestamp() + 3600}));
        manager.store_tokens(&guest, "r-2", "g@school.edu").await;

        assert_eq!(store.get(keys::USER_UUID).unwrap(), None);
        assert_eq!(store.get(keys::USER_ROLE_ID).unwrap(), None);
        assert!(manager.is_guest().await);
    }
}
