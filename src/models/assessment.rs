use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==================================================================================================
// Assessments
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed time in seconds
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    /// Submission of the current user, if one was started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(default)]
    pub submission_status: SubmissionStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    #[default]
    NotStarted,
    InProgress,
    Submitted,
}

// ==================================================================================================
// Submissions
// ==================================================================================================

/// A timed attempt at an assessment with its questions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionSession {
    pub assessment_id: String,
    pub submission_id: String,
    pub user_id: String,
    pub end_time: DateTime<Utc>,
    pub questions: Vec<Question>,
}

impl SubmissionSession {
    /// Whole seconds left at `now`, never negative
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_seconds().max(0)
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub choices: Vec<Choice>,
    /// Answer given earlier in a resumed submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted: Option<SubmittedAnswer>,
}

impl Question {
    pub fn has_choice(&self, choice_id: &str) -> bool {
        self.choices.iter().any(|c| c.id == choice_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub choice_id: String,
    pub answer_id: String,
}

// ==================================================================================================
// Answers
// ==================================================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CreateAnswerRequest<'a> {
    pub question_id: &'a str,
    pub choice_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateAnswerRequest<'a> {
    pub choice_id: &'a str,
}

/// Answer as accepted by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Server-assigned answer id
    pub id: String,
    pub question_id: String,
    pub choice_id: String,
}
