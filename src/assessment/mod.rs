// Timed assessment sessions

mod answers;
mod controller;
mod timer;

pub use answers::{AnswerBook, AnswerOp, AnswerState, Confirmed};
pub use controller::{
    AssessmentBackend, AssessmentSessionController, Clock, QuestionView, SessionPhase,
    SessionStart, SessionView, SubmitConfirmation, SubmitOutcome,
};
pub use timer::Countdown;
