// Integration tests for the classroom client
//
// These tests drive the public services against a mock API server and check
// the whole path: token storage, refresh, request classification and the
// assessment session.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use mockito::Matcher;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use classroom_client::{
    api::{AssessmentService, AuthService, UserService},
    assessment::{
        AssessmentSessionController, SessionPhase, SessionStart, SubmitConfirmation,
        SubmitOutcome,
    },
    auth::{keys, KeyValueStore, SqliteStore, TokenManager},
    classify::STEP_UP_ERROR_CODE,
    error::ApiError,
    http_client::{ClassroomHttpClient, StepUpOutcome, StepUpVerifier},
    notify::{ChannelNotifier, Notification},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

fn token(exp_offset_secs: i64) -> String {
    let payload = json!({
        "sub": "t@school.edu",
        "uuid": "user-7",
        "role_id": 2,
        "role_name": "Teacher",
        "exp": Utc::now().timestamp() + exp_offset_secs,
    });
    format!(
        "{}.{}.sig",
        general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}

struct App {
    client: Arc<ClassroomHttpClient>,
    tokens: Arc<TokenManager>,
    store: Arc<dyn KeyValueStore>,
    notifications: UnboundedReceiver<Notification>,
}

impl App {
    fn new(
        server: &mockito::ServerGuard,
        store: Arc<dyn KeyValueStore>,
        step_up: Arc<dyn StepUpVerifier>,
    ) -> Self {
        let tokens = Arc::new(
            TokenManager::new(store.clone(), &server.url(), 300, 5)
                .expect("Failed to create token manager"),
        );
        let (notifier, notifications) = ChannelNotifier::new();
        let client = Arc::new(
            ClassroomHttpClient::new(
                &server.url(),
                tokens.clone(),
                Arc::new(notifier),
                step_up,
                5,
                5,
            )
            .expect("Failed to create HTTP client"),
        );

        Self {
            client,
            tokens,
            store,
            notifications,
        }
    }

    fn drain(&mut self) -> Vec<Notification> {
        let mut seen = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            seen.push(notification);
        }
        seen
    }
}

struct ScriptedStepUp(StepUpOutcome);

#[async_trait]
impl StepUpVerifier for ScriptedStepUp {
    async fn verify(&self) -> StepUpOutcome {
        self.0.clone()
    }
}

struct AlwaysConfirm;

#[async_trait]
impl SubmitConfirmation for AlwaysConfirm {
    async fn confirm(&self, _unanswered: usize) -> bool {
        true
    }
}

fn user_body() -> Value {
    json!({"id": "user-7", "email": "t@school.edu", "first_name": "Tess",
           "last_name": "Teacher", "role_id": 2})
}

// ==================================================================================================
// Session lifecycle
// ==================================================================================================

#[tokio::test]
async fn test_expired_token_refreshed_transparently() {
    let mut server = mockito::Server::new_async().await;
    let stale = token(-360);
    let fresh = token(3600);

    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(json!({"access_token": stale, "refresh_token": "refresh-1"}).to_string())
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .match_body(Matcher::Json(json!({"refresh_token": "refresh-1"})))
        .with_status(200)
        .with_body(json!({"access_token": fresh, "refresh_token": "refresh-2"}).to_string())
        .expect(1)
        .create_async()
        .await;
    let me = server
        .mock("GET", "/users/me")
        .match_header("authorization", format!("Bearer {}", fresh).as_str())
        .with_status(200)
        .with_body(user_body().to_string())
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.sqlite3");
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let mut app = App::new(
        &server,
        store,
        Arc::new(ScriptedStepUp(StepUpOutcome::Cancelled)),
    );

    AuthService::new(app.client.clone())
        .login("t@school.edu", "hunter2")
        .await
        .unwrap();
    let user = UserService::new(app.client.clone()).me().await.unwrap();

    refresh.assert_async().await;
    me.assert_async().await;
    assert_eq!(user.display_name(), "Tess Teacher");
    assert!(app.drain().is_empty());
    assert_eq!(
        app.store.get(keys::REFRESH_TOKEN).unwrap().as_deref(),
        Some("refresh-2")
    );

    // A restart picks up the refreshed session
    drop(app);
    let reopened: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let restarted = App::new(
        &server,
        reopened,
        Arc::new(ScriptedStepUp(StepUpOutcome::Cancelled)),
    );
    assert!(restarted.tokens.load_tokens().await);
    assert_eq!(restarted.tokens.get_valid_token().await, Some(fresh));
    assert_eq!(restarted.tokens.user_id().await.as_deref(), Some("user-7"));
    assert!(restarted.tokens.has_teacher_permissions().await);
}

#[tokio::test]
async fn test_401_clears_session_and_notifies_once() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/users/me")
        .with_status(401)
        .with_body(json!({"message": "jwt expired"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KeyValueStore> =
        Arc::new(SqliteStore::open(&dir.path().join("session.sqlite3")).unwrap());
    let mut app = App::new(
        &server,
        store,
        Arc::new(ScriptedStepUp(StepUpOutcome::Cancelled)),
    );
    app.tokens
        .store_tokens(&token(3600), "refresh-1", "t@school.edu")
        .await;

    let err = UserService::new(app.client.clone()).me().await.unwrap_err();

    assert!(matches!(err, ApiError::Unauthorized));
    assert!(err.is_session_terminal());
    assert_eq!(app.drain(), vec![Notification::Unauthorized]);
    assert!(!app.tokens.is_authenticated().await);
    for key in keys::ALL {
        assert_eq!(app.store.get(key).unwrap(), None, "{} left behind", key);
    }
}

#[tokio::test]
async fn test_session_replaced_on_plain_403() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/users/me")
        .with_status(403)
        .with_body(json!({"error": "SESSION_REVOKED"}).to_string())
        .create_async()
        .await;

    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::in_memory().unwrap());
    let mut app = App::new(
        &server,
        store,
        Arc::new(ScriptedStepUp(StepUpOutcome::Verified)),
    );
    app.tokens
        .store_tokens(&token(3600), "refresh-1", "t@school.edu")
        .await;

    let err = UserService::new(app.client.clone()).me().await.unwrap_err();

    assert!(matches!(err, ApiError::SessionReplaced));
    assert_eq!(app.drain(), vec![Notification::AnotherDeviceLogin]);
    assert!(!app.tokens.is_authenticated().await);
}

// ==================================================================================================
// Step-up
// ==================================================================================================

#[tokio::test]
async fn test_role_change_replayed_after_step_up() {
    let mut server = mockito::Server::new_async().await;
    let challenged = server
        .mock("PUT", "/users/user-9/role")
        .match_header("x-crucial-auth-verified", Matcher::Missing)
        .with_status(403)
        .with_body(json!({"code": STEP_UP_ERROR_CODE}).to_string())
        .expect(1)
        .create_async()
        .await;
    let replayed = server
        .mock("PUT", "/users/user-9/role")
        .match_header("x-crucial-auth-verified", "true")
        .match_body(Matcher::Json(json!({"role_id": 1})))
        .with_status(200)
        .with_body(
            json!({"id": "user-9", "email": "a@school.edu", "role_id": 1, "role_name": "Admin"})
                .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::in_memory().unwrap());
    let mut app = App::new(
        &server,
        store,
        Arc::new(ScriptedStepUp(StepUpOutcome::Verified)),
    );
    app.tokens
        .store_tokens(&token(3600), "refresh-1", "t@school.edu")
        .await;

    let user = UserService::new(app.client.clone())
        .update_role("user-9", classroom_client::auth::Role::Admin)
        .await
        .unwrap();

    challenged.assert_async().await;
    replayed.assert_async().await;
    assert_eq!(user.role_id, 1);
    assert!(app.drain().is_empty());
    assert!(app.tokens.is_authenticated().await);
}

// ==================================================================================================
// Assessment session
// ==================================================================================================

#[tokio::test]
async fn test_take_assessment_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let end_time = (Utc::now() + chrono::Duration::seconds(600)).to_rfc3339();

    server
        .mock("POST", "/assessments/a-1/submissions")
        .with_status(201)
        .with_body(
            json!({
                "assessment_id": "a-1",
                "submission_id": "s-1",
                "user_id": "user-7",
                "end_time": end_time,
                "questions": [
                    {"id": "q-1", "text": "2 + 2?",
                     "choices": [{"id": "c-1", "text": "3"}, {"id": "c-2", "text": "4"}]}
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;
    let create = server
        .mock("POST", "/submissions/s-1/answers")
        .match_body(Matcher::Json(json!({"question_id": "q-1", "choice_id": "c-1"})))
        .with_status(201)
        .with_body(json!({"id": "ans-1", "question_id": "q-1", "choice_id": "c-1"}).to_string())
        .expect(1)
        .create_async()
        .await;
    let update = server
        .mock("PUT", "/answers/ans-1")
        .match_body(Matcher::Json(json!({"choice_id": "c-2"})))
        .with_status(200)
        .with_body(json!({"id": "ans-1", "question_id": "q-1", "choice_id": "c-2"}).to_string())
        .expect(1)
        .create_async()
        .await;
    let submit = server
        .mock("POST", "/submissions/s-1/submit")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::in_memory().unwrap());
    let app = App::new(
        &server,
        store,
        Arc::new(ScriptedStepUp(StepUpOutcome::Cancelled)),
    );
    app.tokens
        .store_tokens(&token(3600), "refresh-1", "t@school.edu")
        .await;

    let (notifier, mut notifications) = ChannelNotifier::new();
    let controller = AssessmentSessionController::new(
        "a-1",
        Arc::new(AssessmentService::new(app.client.clone())),
        Arc::new(notifier),
    );

    controller.initialize(SessionStart::Fresh).await.unwrap();
    let remaining = controller.remaining_seconds().await;
    assert!((599..=600).contains(&remaining), "remaining = {}", remaining);

    controller.select_answer("q-1", "c-1").await.unwrap();
    controller.select_answer("q-1", "c-2").await.unwrap();
    let outcome = controller.submit_manual(&AlwaysConfirm).await.unwrap();

    create.assert_async().await;
    update.assert_async().await;
    submit.assert_async().await;
    assert_eq!(outcome, SubmitOutcome::Submitted);
    assert_eq!(controller.phase().await, SessionPhase::Submitted);
    assert_eq!(
        notifications.try_recv().unwrap(),
        Notification::Success("Assessment submitted".to_string())
    );
}
