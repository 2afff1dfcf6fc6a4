use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::answers::{AnswerBook, AnswerOp, AnswerState};
use crate::error::ApiError;
use crate::models::{AnswerRecord, Assessment, Choice, SubmissionSession, SubmissionStatus};
use crate::notify::Notifier;

/// Server operations a session needs
#[async_trait]
pub trait AssessmentBackend: Send + Sync {
    async fn start_submission(&self, assessment_id: &str) -> Result<SubmissionSession, ApiError>;

    async fn get_submission(&self, submission_id: &str) -> Result<SubmissionSession, ApiError>;

    async fn create_answer(
        &self,
        submission_id: &str,
        question_id: &str,
        choice_id: &str,
    ) -> Result<AnswerRecord, ApiError>;

    async fn update_answer(&self, answer_id: &str, choice_id: &str)
        -> Result<AnswerRecord, ApiError>;

    async fn submit(&self, submission_id: &str) -> Result<(), ApiError>;
}

/// Asks the user to confirm a manual submission
#[async_trait]
pub trait SubmitConfirmation: Send + Sync {
    async fn confirm(&self, unanswered: usize) -> bool;
}

/// How a session begins
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStart {
    Fresh,
    Resume { submission_id: String },
}

impl SessionStart {
    /// Pick fresh or resume from the assessment's submission status
    ///
    /// `None` when the assessment was already submitted.
    pub fn for_assessment(assessment: &Assessment) -> Option<Self> {
        match (assessment.submission_status, &assessment.submission_id) {
            (SubmissionStatus::Submitted, _) => None,
            (SubmissionStatus::InProgress, Some(submission_id)) => Some(SessionStart::Resume {
                submission_id: submission_id.clone(),
            }),
            _ => Some(SessionStart::Fresh),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    Active,
    Submitting,
    Submitted,
    /// Countdown reached zero; `submitted` tells whether the final submit went through
    TimeUp { submitted: bool },
    Errored(String),
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Submitted | SessionPhase::TimeUp { .. } | SessionPhase::Errored(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// User did not confirm
    Declined,
    /// Session was not active, another submit already won
    Skipped,
}

/// Read-only view of a session for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub remaining_seconds: i64,
    pub submission_id: Option<String>,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionView {
    pub id: String,
    pub text: String,
    pub choices: Vec<Choice>,
    pub selected_choice: Option<String>,
    pub answer: Option<AnswerState>,
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct SessionState {
    phase: SessionPhase,
    session: Option<SubmissionSession>,
    remaining: i64,
    answers: AnswerBook,
}

/// Runs one timed question-answering session to completion
pub struct AssessmentSessionController {
    assessment_id: String,
    backend: Arc<dyn AssessmentBackend>,
    notifier: Arc<dyn Notifier>,
    clock: Clock,
    state: Mutex<SessionState>,
}

impl AssessmentSessionController {
    pub fn new(
        assessment_id: &str,
        backend: Arc<dyn AssessmentBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            assessment_id: assessment_id.to_string(),
            backend,
            notifier,
            clock: Arc::new(Utc::now),
            state: Mutex::new(SessionState {
                phase: SessionPhase::Uninitialized,
                session: None,
                remaining: 0,
                answers: AnswerBook::default(),
            }),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn assessment_id(&self) -> &str {
        &self.assessment_id
    }

    /// Start a new submission or resume an existing one
    ///
    /// On failure the session ends in `Errored` without partial state.
    pub async fn initialize(&self, start: SessionStart) -> Result<(), ApiError> {
        {
            let mut state = self.state.lock().await;
            if state.phase != SessionPhase::Uninitialized {
                return Err(ApiError::Validation(
                    "Assessment session already initialized".to_string(),
                ));
            }
            state.phase = SessionPhase::Loading;
        }

        tracing::info!(assessment_id = %self.assessment_id, start = ?start, "Initializing assessment session");

        let result = match &start {
            SessionStart::Fresh => self.backend.start_submission(&self.assessment_id).await,
            SessionStart::Resume { submission_id } => {
                self.backend.get_submission(submission_id).await
            }
        };

        let mut state = self.state.lock().await;
        match result {
            Ok(session) => {
                state.remaining = session.remaining_seconds((self.clock)());
                state.answers = AnswerBook::from_questions(&session.questions);
                let submission_id = session.submission_id.clone();
                state.session = Some(session);

                // Resumed after the deadline
                if state.remaining <= 0 {
                    state.phase = SessionPhase::Submitting;
                    drop(state);
                    self.auto_submit(&submission_id).await;
                    return Ok(());
                }

                tracing::info!(
                    submission_id = %submission_id,
                    remaining = state.remaining,
                    "Assessment session active"
                );
                state.phase = SessionPhase::Active;
                Ok(())
            }
            Err(e) => {
                tracing::error!(assessment_id = %self.assessment_id, "Failed to initialize session: {}", e);
                state.phase = SessionPhase::Errored(e.to_string());
                Err(e)
            }
        }
    }

    /// Advance the countdown by one second
    ///
    /// Reaching zero submits automatically. Returns whether the countdown
    /// should keep running.
    pub async fn tick(&self) -> bool {
        let submission_id = {
            let mut state = self.state.lock().await;
            match state.phase {
                SessionPhase::Uninitialized | SessionPhase::Loading => return true,
                // A manual submit may still fail and hand the session back
                SessionPhase::Submitting => {
                    state.remaining = (state.remaining - 1).max(0);
                    return true;
                }
                SessionPhase::Active => {}
                _ => return false,
            }

            state.remaining = (state.remaining - 1).max(0);
            if state.remaining > 0 {
                return true;
            }

            let Some(submission_id) = state.session.as_ref().map(|s| s.submission_id.clone())
            else {
                return false;
            };
            state.phase = SessionPhase::Submitting;
            submission_id
        };

        self.auto_submit(&submission_id).await;
        false
    }

    async fn auto_submit(&self, submission_id: &str) {
        tracing::info!(submission_id = %submission_id, "Time is up, submitting automatically");

        let result = self.backend.submit(submission_id).await;

        // The deadline has passed whatever the network said
        let mut state = self.state.lock().await;
        match result {
            Ok(()) => {
                state.phase = SessionPhase::TimeUp { submitted: true };
                self.notifier
                    .show_success("Time's up! Your answers have been submitted");
            }
            Err(e) => {
                tracing::error!(submission_id = %submission_id, "Automatic submit failed: {}", e);
                state.phase = SessionPhase::TimeUp { submitted: false };
                self.notifier
                    .show_error("Time's up! Your answers could not be submitted");
            }
        }
    }

    /// Submit after the user confirms
    pub async fn submit_manual(
        &self,
        confirmation: &dyn SubmitConfirmation,
    ) -> Result<SubmitOutcome, ApiError> {
        let unanswered = {
            let state = self.state.lock().await;
            if state.phase != SessionPhase::Active {
                return Ok(SubmitOutcome::Skipped);
            }
            let total = state.session.as_ref().map_or(0, |s| s.questions.len());
            total.saturating_sub(state.answers.answered_count())
        };

        if !confirmation.confirm(unanswered).await {
            tracing::debug!("Manual submit declined");
            return Ok(SubmitOutcome::Declined);
        }

        let submission_id = {
            let mut state = self.state.lock().await;
            // The countdown may have won while the user was deciding
            if state.phase != SessionPhase::Active {
                return Ok(SubmitOutcome::Skipped);
            }
            let Some(submission_id) = state.session.as_ref().map(|s| s.submission_id.clone())
            else {
                return Ok(SubmitOutcome::Skipped);
            };
            state.phase = SessionPhase::Submitting;
            submission_id
        };

        tracing::info!(submission_id = %submission_id, "Submitting assessment");
        let result = self.backend.submit(&submission_id).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(()) => {
                state.phase = SessionPhase::Submitted;
                self.notifier.show_success("Assessment submitted");
                Ok(SubmitOutcome::Submitted)
            }
            Err(e) => {
                tracing::error!(submission_id = %submission_id, "Manual submit failed: {}", e);
                // The countdown ran out while the submit was in flight
                if state.remaining <= 0 {
                    drop(state);
                    self.auto_submit(&submission_id).await;
                    return Err(e);
                }
                state.phase = SessionPhase::Active;
                self.notifier
                    .show_error("Failed to submit assessment, please try again");
                Err(e)
            }
        }
    }

    /// Select a choice, saving it to the server
    ///
    /// The selection shows immediately and is rolled back if the save fails.
    pub async fn select_answer(&self, question_id: &str, choice_id: &str) -> Result<(), ApiError> {
        let (op, submission_id) = {
            let mut state = self.state.lock().await;
            if state.phase != SessionPhase::Active {
                return Err(ApiError::Validation(
                    "Assessment is not accepting answers".to_string(),
                ));
            }
            if state.remaining <= 0 {
                return Err(ApiError::Validation(
                    "Time is up, answers are closed".to_string(),
                ));
            }

            let session = state
                .session
                .as_ref()
                .ok_or_else(|| ApiError::Validation("No active submission".to_string()))?;
            let question = session.question(question_id).ok_or_else(|| {
                ApiError::Validation(format!("Unknown question: {}", question_id))
            })?;
            if !question.has_choice(choice_id) {
                return Err(ApiError::Validation(format!(
                    "Choice {} does not belong to question {}",
                    choice_id, question_id
                )));
            }
            let submission_id = session.submission_id.clone();

            (state.answers.select(question_id, choice_id), submission_id)
        };

        tracing::debug!(question_id = %question_id, choice_id = %choice_id, op = ?op, "Saving answer");

        let result = match &op {
            AnswerOp::Create => {
                self.backend
                    .create_answer(&submission_id, question_id, choice_id)
                    .await
            }
            AnswerOp::Update { answer_id } => {
                self.backend.update_answer(answer_id, choice_id).await
            }
        };

        let mut state = self.state.lock().await;
        match result {
            Ok(record) => {
                state.answers.confirm(question_id, record);
                Ok(())
            }
            Err(e) => {
                let rolled_back = state.answers.reject(question_id, choice_id);
                tracing::warn!(
                    question_id = %question_id,
                    rolled_back = rolled_back,
                    "Answer was not saved: {}",
                    e
                );
                self.notifier
                    .show_error("Could not save your answer, please try again");
                Err(e)
            }
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.lock().await.phase.clone()
    }

    pub async fn remaining_seconds(&self) -> i64 {
        self.state.lock().await.remaining
    }

    pub async fn snapshot(&self) -> SessionView {
        let state = self.state.lock().await;
        let questions = state
            .session
            .iter()
            .flat_map(|s| s.questions.iter())
            .map(|q| QuestionView {
                id: q.id.clone(),
                text: q.text.clone(),
                choices: q.choices.clone(),
                selected_choice: state.answers.selected_choice(&q.id).map(str::to_string),
                answer: state.answers.state(&q.id).cloned(),
            })
            .collect();

        SessionView {
            phase: state.phase.clone(),
            remaining_seconds: state.remaining,
            submission_id: state.session.as_ref().map(|s| s.submission_id.clone()),
            questions,
        }
    }
}
