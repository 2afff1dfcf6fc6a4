// Terminal prompts for the interactive flows

use async_trait::async_trait;
use dialoguer::{Confirm, Password};

use crate::api::AuthService;
use crate::assessment::SubmitConfirmation;
use crate::error::ApiError;
use crate::http_client::{StepUpOutcome, StepUpVerifier};

/// Asks on the terminal before a manual submit
#[derive(Clone, Copy, Default)]
pub struct TerminalConfirmation;

#[async_trait]
impl SubmitConfirmation for TerminalConfirmation {
    async fn confirm(&self, unanswered: usize) -> bool {
        let prompt = submit_prompt(unanswered);

        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new().with_prompt(prompt).default(false).interact()
        })
        .await;

        match answer {
            Ok(Ok(confirmed)) => confirmed,
            Ok(Err(e)) => {
                tracing::warn!("Submit confirmation unavailable: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("Submit confirmation task failed: {}", e);
                false
            }
        }
    }
}

fn submit_prompt(unanswered: usize) -> String {
    match unanswered {
        0 => "Submit your answers?".to_string(),
        1 => "1 question is unanswered. Submit anyway?".to_string(),
        n => format!("{} questions are unanswered. Submit anyway?", n),
    }
}

/// Step-up by re-entering the account password
///
/// The password is checked out of band against the verify endpoint, so the
/// paused request is only replayed once the server has accepted it.
pub struct PasswordStepUp {
    auth: AuthService,
}

impl PasswordStepUp {
    pub fn new(auth: AuthService) -> Self {
        Self { auth }
    }
}

#[async_trait]
impl StepUpVerifier for PasswordStepUp {
    async fn verify(&self) -> StepUpOutcome {
        let password = tokio::task::spawn_blocking(|| {
            Password::new()
                .with_prompt("This action needs your password again")
                .allow_empty_password(true)
                .interact()
        })
        .await;

        let password = match password {
            Ok(Ok(password)) if !password.is_empty() => password,
            Ok(Ok(_)) => return StepUpOutcome::Cancelled,
            Ok(Err(e)) => {
                tracing::warn!("Password prompt unavailable: {}", e);
                return StepUpOutcome::Cancelled;
            }
            Err(e) => {
                tracing::error!("Password prompt task failed: {}", e);
                return StepUpOutcome::Cancelled;
            }
        };

        step_up_outcome(self.auth.verify_crucial(&password).await)
    }
}

fn step_up_outcome(result: Result<(), ApiError>) -> StepUpOutcome {
    match result {
        Ok(()) => StepUpOutcome::Verified,
        Err(ApiError::Api { message, .. }) => StepUpOutcome::Failed(message),
        Err(e) => StepUpOutcome::Failed(e.to_string()),
    }
}
