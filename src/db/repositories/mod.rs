//! Database repositories
//!
//! One repository per entity. Each exposes an `async_trait` interface and a
//! `Sqlx*` implementation that works on SQLite and MySQL.

pub mod course;
pub mod department;
pub mod exam_name;
pub mod moderation_log;
pub mod password_reset;
pub mod question;
pub mod session;
pub mod user;

pub use course::{CourseRepository, SqlxCourseRepository};
pub use department::{DepartmentRepository, SqlxDepartmentRepository};
pub use exam_name::{ExamNameRepository, SqlxExamNameRepository};
pub use moderation_log::{ModerationLogRepository, SqlxModerationLogRepository};
pub use password_reset::{PasswordResetRepository, SqlxPasswordResetRepository};
pub use question::{QuestionOrder, QuestionRepository, ReviewUpdate, SqlxQuestionRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{RoleChange, SqlxUserRepository, UserRepository};
