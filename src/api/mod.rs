// Typed wrappers over the classroom API, one service per area

mod assessments;
mod assignments;
mod auth;
mod classes;
mod users;

pub use assessments::AssessmentService;
pub use assignments::AssignmentService;
pub use auth::AuthService;
pub use classes::ClassService;
pub use users::UserService;
