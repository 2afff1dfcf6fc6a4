use anyhow::Context;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::sync::Arc;

use crate::error::ApiError;
use crate::http_client::ClassroomHttpClient;
use crate::models::assignment::GradeRequest;
use crate::models::{Assignment, AssignmentSubmission};
use crate::validation::validate_score;

#[derive(Clone)]
pub struct AssignmentService {
    client: Arc<ClassroomHttpClient>,
}

impl AssignmentService {
    pub fn new(client: Arc<ClassroomHttpClient>) -> Self {
        Self { client }
    }

    pub async fn list(&self, class_id: &str) -> Result<Vec<Assignment>, ApiError> {
        self.client
            .send_json(self.client.get(&format!("/classes/{}/assignments", class_id)))
            .await
    }

    /// Upload a file as the caller's submission
    ///
    /// Streamed multipart bodies cannot be replayed, so a step-up request
    /// on this endpoint fails instead of prompting.
    pub async fn upload_submission(
        &self,
        assignment_id: &str,
        path: &Path,
    ) -> Result<AssignmentSubmission, ApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "submission".to_string());

        tracing::info!(
            assignment_id = %assignment_id,
            file = %file_name,
            size = bytes.len(),
            "Uploading assignment submission"
        );

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));

        self.client
            .send_json(
                self.client
                    .post(&format!("/assignments/{}/submissions", assignment_id))
                    .multipart(form),
            )
            .await
    }

    /// Grade a submission, checking the score range locally first
    pub async fn grade(
        &self,
        submission_id: &str,
        score: u32,
        max_score: u32,
    ) -> Result<AssignmentSubmission, ApiError> {
        validate_score(score, max_score)?;

        self.client
            .send_json(
                self.client
                    .put(&format!("/assignment-submissions/{}/grade", submission_id))
                    .json(&GradeRequest { score }),
            )
            .await
    }
}
