use async_trait::async_trait;
use std::sync::Arc;

use crate::assessment::AssessmentBackend;
use crate::error::ApiError;
use crate::http_client::ClassroomHttpClient;
use crate::models::assessment::{CreateAnswerRequest, UpdateAnswerRequest};
use crate::models::{AnswerRecord, Assessment, SubmissionSession};

#[derive(Clone)]
pub struct AssessmentService {
    client: Arc<ClassroomHttpClient>,
}

impl AssessmentService {
    pub fn new(client: Arc<ClassroomHttpClient>) -> Self {
        Self { client }
    }

    /// Assessments of a class, with the caller's submission status
    pub async fn list(&self, class_id: &str) -> Result<Vec<Assessment>, ApiError> {
        self.client
            .send_json(self.client.get(&format!("/classes/{}/assessments", class_id)))
            .await
    }

    pub async fn get(&self, assessment_id: &str) -> Result<Assessment, ApiError> {
        self.client
            .send_json(self.client.get(&format!("/assessments/{}", assessment_id)))
            .await
    }
}

#[async_trait]
impl AssessmentBackend for AssessmentService {
    async fn start_submission(&self, assessment_id: &str) -> Result<SubmissionSession, ApiError> {
        self.client
            .send_json(
                self.client
                    .post(&format!("/assessments/{}/submissions", assessment_id)),
            )
            .await
    }

    async fn get_submission(&self, submission_id: &str) -> Result<SubmissionSession, ApiError> {
        self.client
            .send_json(self.client.get(&format!("/submissions/{}", submission_id)))
            .await
    }

    async fn create_answer(
        &self,
        submission_id: &str,
        question_id: &str,
        choice_id: &str,
    ) -> Result<AnswerRecord, ApiError> {
        self.client
            .send_json(
                self.client
                    .post(&format!("/submissions/{}/answers", submission_id))
                    .json(&CreateAnswerRequest {
                        question_id,
                        choice_id,
                    }),
            )
            .await
    }

    async fn update_answer(
        &self,
        answer_id: &str,
        choice_id: &str,
    ) -> Result<AnswerRecord, ApiError> {
        self.client
            .send_json(
                self.client
                    .put(&format!("/answers/{}", answer_id))
                    .json(&UpdateAnswerRequest { choice_id }),
            )
            .await
    }

    async fn submit(&self, submission_id: &str) -> Result<(), ApiError> {
        self.client
            .send_empty(
                self.client
                    .post(&format!("/submissions/{}/submit", submission_id)),
            )
            .await
    }
}
