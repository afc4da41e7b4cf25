//! Services layer - Business logic
//!
//! Services implement the archive's rules on top of the repositories:
//! - validation and error mapping
//! - coordinating repositories, cache, object store and mail
//! - role checks that do not belong in the HTTP layer

pub mod admin;
pub mod download;
pub mod email;
pub mod feedback;
pub mod moderation;
pub mod password;
pub mod question;
pub mod rate_limiter;
pub mod storage;
pub mod taxonomy;
pub mod user;

pub use admin::{AdminService, AdminServiceError, AdminStats};
pub use download::{Download, DownloadService, DownloadServiceError};
pub use email::{EmailError, Mailer, SmtpMailer};
pub use feedback::{FeedbackInput, FeedbackKind, FeedbackService, FeedbackServiceError};
pub use moderation::{ModerationService, ModerationServiceError};
pub use password::{hash_password, verify_password};
pub use question::{QuestionInput, QuestionService, QuestionServiceError, UploadedFile};
pub use rate_limiter::LoginRateLimiter;
pub use storage::{LocalObjectStore, ObjectStore, StoredObject};
pub use taxonomy::{TaxonomyService, TaxonomyServiceError};
pub use user::{LoginInput, RegisterInput, ResetPasswordInput, UserService, UserServiceError};
