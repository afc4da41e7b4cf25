//! Data models
//!
//! Database entities of the exam archive and the input types that create or
//! change them.

mod moderation;
mod pagination;
mod question;
mod session;
mod taxonomy;
mod user;

pub use moderation::{ModerationAction, ModerationLogEntry};
pub use pagination::{ListParams, PagedResult};
pub use question::{
    ExamSession, NewQuestion, Question, QuestionFilter, QuestionStatus, QuestionWithMeta,
};
pub use session::{PasswordReset, Session};
pub use taxonomy::{
    Course, CreateCourseInput, CreateDepartmentInput, CreateExamNameInput, Department, ExamName,
    UpdateCourseInput, UpdateDepartmentInput, UpdateExamNameInput,
};
pub use user::{User, UserRole};
