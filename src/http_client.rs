use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenManager;
use crate::classify::{
    classify, extract_message, Failure, Verdict, FALLBACK_MESSAGE, STEP_UP_VERIFIED_HEADER,
    TIMEOUT_MESSAGE,
};
use crate::error::ApiError;
use crate::notify::Notifier;

/// Result of an out-of-band step-up verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepUpOutcome {
    Verified,
    Failed(String),
    Cancelled,
}

/// Runs the extra verification a sensitive request asks for
#[async_trait]
pub trait StepUpVerifier: Send + Sync {
    async fn verify(&self) -> StepUpOutcome;
}

/// Verifier for contexts with no way to prompt the user
#[derive(Clone, Copy, Default)]
pub struct NoStepUp;

#[async_trait]
impl StepUpVerifier for NoStepUp {
    async fn verify(&self) -> StepUpOutcome {
        StepUpOutcome::Cancelled
    }
}

/// HTTP client for the classroom API
/// Attaches the bearer token and settles failures through the classifier list
pub struct ClassroomHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// API base URL without trailing slash
    base_url: String,

    /// Authentication state
    tokens: Arc<TokenManager>,

    /// Where user-facing messages go
    notifier: Arc<dyn Notifier>,

    /// Step-up verification flow
    step_up: Arc<dyn StepUpVerifier>,
}

impl ClassroomHttpClient {
    /// Create a new HTTP client
    pub fn new(
        base_url: &str,
        tokens: Arc<TokenManager>,
        notifier: Arc<dyn Notifier>,
        step_up: Arc<dyn StepUpVerifier>,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            notifier,
            step_up,
        })
    }

    /// Absolute URL for an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Start a request against an API path
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Token manager behind this client
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Notifier behind this client
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Build and execute a request
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let request = builder
            .build()
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to build request: {}", e)))?;
        self.execute(request).await
    }

    /// Execute a request and decode a JSON response
    pub async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Execute a request, discarding the response body
    pub async fn send_empty(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        self.send(builder).await.map(|_| ())
    }

    /// Execute a request outside the pipeline
    ///
    /// The bearer token is still attached, but failures only map to an
    /// error: no session clearing, no notifications, no step-up. Used by the
    /// credential endpoints, where a rejection means a wrong password.
    pub async fn send_direct(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let mut request = builder
            .build()
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to build request: {}", e)))?;
        self.authorize(&mut request).await;

        tracing::debug!(method = %request.method(), url = %request.url(), "Sending direct HTTP request");

        let response = self.client.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&error_text)
            .ok()
            .and_then(|body| extract_message(&body))
            .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());

        tracing::debug!(status = %status, message = %message, "Direct request rejected");
        Err(ApiError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Execute a request through the pipeline
    ///
    /// A step-up response pauses the request, runs the verifier and replays
    /// it once with the marker header. Every other failure is terminal.
    pub async fn execute(&self, request: Request) -> Result<Response, ApiError> {
        let mut request = request;
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let method = request.method().clone();
        let url = request.url().clone();

        loop {
            self.authorize(&mut request).await;

            // Multipart bodies cannot be cloned and so cannot be replayed
            let replay = request.try_clone();
            let replayed = request.headers().contains_key(STEP_UP_VERIFIED_HEADER);

            tracing::debug!(
                request_id = %request_id,
                method = %method,
                url = %url,
                replayed = replayed,
                "Sending HTTP request"
            );

            let failure = match self.client.execute(request).await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(
                        request_id = %request_id,
                        status = %response.status(),
                        "Request successful"
                    );
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let error_text = response.text().await.unwrap_or_default();

                    tracing::warn!(
                        request_id = %request_id,
                        status = status,
                        url = %url,
                        response_body = %error_text,
                        "Received error response"
                    );

                    Failure::Status {
                        status,
                        body: serde_json::from_str(&error_text).ok(),
                        replayed,
                    }
                }
                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_request() {
                        "request_error"
                    } else {
                        "unknown"
                    };

                    tracing::warn!(
                        request_id = %request_id,
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        "HTTP request error"
                    );

                    if e.is_timeout() {
                        Failure::Timeout
                    } else {
                        Failure::Transport(e.to_string())
                    }
                }
            };

            match classify(&failure) {
                Verdict::StepUpRequired => {
                    request = self.verify_for_replay(replay, &request_id).await?;
                }
                verdict => return Err(self.settle(verdict).await),
            }
        }
    }

    /// Attach the bearer token when one is available
    async fn authorize(&self, request: &mut Request) {
        let Some(token) = self.tokens.get_valid_token().await else {
            request.headers_mut().remove(AUTHORIZATION);
            return;
        };

        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(value) => {
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(e) => tracing::error!("Access token is not a valid header value: {}", e),
        }
    }

    /// Run step-up verification and prepare the one replay
    async fn verify_for_replay(
        &self,
        replay: Option<Request>,
        request_id: &str,
    ) -> Result<Request, ApiError> {
        let Some(mut replay) = replay else {
            tracing::error!(request_id = %request_id, "Step-up required but request body cannot be replayed");
            let message = "This request cannot be retried after verification";
            self.notifier.show_error(message);
            return Err(ApiError::StepUpFailed(message.to_string()));
        };

        tracing::info!(request_id = %request_id, "Step-up verification required, pausing request");

        match self.step_up.verify().await {
            StepUpOutcome::Verified => {
                tracing::info!(request_id = %request_id, "Step-up verified, replaying request");
                replay
                    .headers_mut()
                    .insert(STEP_UP_VERIFIED_HEADER, HeaderValue::from_static("true"));
                Ok(replay)
            }
            StepUpOutcome::Failed(reason) => {
                tracing::warn!(request_id = %request_id, reason = %reason, "Step-up verification failed");
                self.notifier.show_error(&reason);
                Err(ApiError::StepUpFailed(reason))
            }
            StepUpOutcome::Cancelled => {
                tracing::info!(request_id = %request_id, "Step-up verification cancelled");
                Err(ApiError::StepUpCancelled)
            }
        }
    }

    /// Apply the side effects of a terminal verdict
    async fn settle(&self, verdict: Verdict) -> ApiError {
        match verdict {
            Verdict::Unauthorized => {
                self.tokens.clear_tokens().await;
                self.notifier.unauthorized();
                ApiError::Unauthorized
            }
            Verdict::SessionReplaced => {
                self.tokens.clear_tokens().await;
                self.notifier.another_device_login();
                ApiError::SessionReplaced
            }
            Verdict::StepUpRequired | Verdict::StepUpExhausted => {
                self.notifier
                    .show_error("Verification was not accepted, please try again later");
                ApiError::StepUpExhausted
            }
            Verdict::Message { status, message } => {
                self.notifier.show_error(&message);
                ApiError::Api { status, message }
            }
            Verdict::Timeout => {
                self.notifier.show_error(TIMEOUT_MESSAGE);
                ApiError::Timeout
            }
            Verdict::Network(message) => {
                self.notifier.show_error(&message);
                ApiError::Network(message)
            }
        }
    }
}
