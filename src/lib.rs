//! ExamVault - university exam question archive
//!
//! Students upload photos of past exam papers, moderators review them and
//! everyone can browse, filter and download the approved archive.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
