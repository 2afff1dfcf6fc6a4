// Data models for the classroom API

pub mod assessment;
pub mod assignment;
pub mod class;
pub mod user;

pub use assessment::{
    AnswerRecord, Assessment, Choice, Question, SubmissionSession, SubmissionStatus,
    SubmittedAnswer,
};
pub use assignment::{Assignment, AssignmentSubmission};
pub use class::Class;
pub use user::User;
