use std::sync::Arc;

use crate::auth::Claims;
use crate::error::ApiError;
use crate::http_client::ClassroomHttpClient;
use crate::models::user::{CrucialVerifyRequest, LoginRequest, LoginResponse, RegisterRequest};
use crate::validation::{validate_email, validate_name, validate_password};

/// Login, registration and password re-verification
///
/// Credential endpoints go through the direct path: a rejected password is
/// an ordinary error, not a lost session.
#[derive(Clone)]
pub struct AuthService {
    client: Arc<ClassroomHttpClient>,
}

impl AuthService {
    pub fn new(client: Arc<ClassroomHttpClient>) -> Self {
        Self { client }
    }

    /// Log in and persist the issued tokens
    pub async fn login(&self, email: &str, password: &str) -> Result<Claims, ApiError> {
        let email = email.trim();
        validate_email(email)?;
        validate_password(password)?;

        let response = self
            .client
            .send_direct(
                self.client
                    .post("/auth/login")
                    .json(&LoginRequest { email, password }),
            )
            .await?;
        let tokens: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        let manager = self.client.tokens();
        if !manager
            .store_tokens(&tokens.access_token, &tokens.refresh_token, email)
            .await
        {
            return Err(ApiError::Decode(
                "Server returned an unreadable access token".to_string(),
            ));
        }

        let claims = manager
            .claims()
            .await
            .ok_or_else(|| ApiError::Decode("Login did not produce a session".to_string()))?;

        tracing::info!(email = %email, role = %claims.role_id.unwrap_or_default(), "Logged in");
        Ok(claims)
    }

    /// Create an account; the user logs in afterwards
    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        validate_email(&request.email)?;
        validate_password(&request.password)?;
        validate_name("First name", &request.first_name)?;
        validate_name("Last name", &request.last_name)?;

        self.client
            .send_direct(self.client.post("/auth/register").json(request))
            .await?;

        tracing::info!(email = %request.email, "Registered new account");
        Ok(())
    }

    pub async fn logout(&self) {
        self.client.tokens().clear_tokens().await;
        tracing::info!("Logged out");
    }

    /// Re-enter the password to unlock a sensitive request
    pub async fn verify_crucial(&self, password: &str) -> Result<(), ApiError> {
        validate_password(password)?;

        self.client
            .send_direct(
                self.client
                    .post("/auth/crucial-verify")
                    .json(&CrucialVerifyRequest { password }),
            )
            .await?;

        tracing::debug!("Step-up password verified");
        Ok(())
    }
}
