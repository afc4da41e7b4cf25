//! Taxonomy models
//!
//! Departments, exam names and courses are the reference rows used to
//! classify a question. Each carries an `active` flag; inactive entries stay
//! attached to existing questions but are hidden from public pickers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub id: i64,
    /// Short unique code, e.g. "CSE"
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of examination, e.g. "Midterm" or "Final"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExamName {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Course {
    pub id: i64,
    /// Unique course code, e.g. "CSE101"
    pub code: String,
    pub title: String,
    pub department_id: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDepartmentInput {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Partial update; `description: Some("")` clears the description
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDepartmentInput {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExamNameInput {
    pub name: String,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateExamNameInput {
    pub name: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCourseInput {
    pub code: String,
    pub title: String,
    pub department_id: i64,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCourseInput {
    pub code: Option<String>,
    pub title: Option<String>,
    pub department_id: Option<i64>,
    pub active: Option<bool>,
}
