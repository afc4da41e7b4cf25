//! Download service
//!
//! Single-paper downloads and zip bundles of approved questions.

use crate::config::ArchiveConfig;
use crate::db::repositories::QuestionRepository;
use crate::models::{Question, QuestionFilter, QuestionStatus};
use crate::services::storage::ObjectStore;
use anyhow::Context;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Object store reads in flight while building a bundle
const READ_CONCURRENCY: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum DownloadServiceError {
    #[error("Question not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("None of the requested questions could be downloaded")]
    NothingToBundle,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// A file ready to be sent as an attachment
#[derive(Debug, Clone)]
pub struct Download {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Attachment name for a question: `{course}-{year}-{id}.{ext}`
pub fn download_name(question: &Question) -> String {
    let course = question
        .course_code
        .as_deref()
        .map(sanitize_component)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "paper".to_string());
    format!(
        "{}-{}-{}.{}",
        course,
        question.exam_year,
        question.id,
        question.file_extension()
    )
}

/// Keep names safe inside a zip and a Content-Disposition header
fn sanitize_component(s: &str) -> String {
    s.chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() => Some(c),
            '-' | '_' | '.' => Some(c),
            ' ' => Some('_'),
            _ => None,
        })
        .collect()
}

/// Hand out unique entry names, suffixing repeats with `-1`, `-2`, ...
#[derive(Debug, Default)]
pub struct EntryNames {
    used: HashSet<String>,
    next_suffix: HashMap<String, usize>,
}

impl EntryNames {
    pub fn claim(&mut self, name: &str) -> String {
        if self.used.insert(name.to_string()) {
            return name.to_string();
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{}", ext)),
            None => (name, String::new()),
        };
        let n = self.next_suffix.entry(name.to_string()).or_insert(0);
        loop {
            *n += 1;
            let candidate = format!("{}-{}{}", stem, n, ext);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

pub struct DownloadService {
    questions: Arc<dyn QuestionRepository>,
    store: Arc<dyn ObjectStore>,
    config: ArchiveConfig,
}

impl DownloadService {
    pub fn new(
        questions: Arc<dyn QuestionRepository>,
        store: Arc<dyn ObjectStore>,
        config: ArchiveConfig,
    ) -> Self {
        Self {
            questions,
            store,
            config,
        }
    }

    /// Image of one approved question
    pub async fn download(&self, id: i64) -> Result<Download, DownloadServiceError> {
        let question = self
            .questions
            .get_by_id(id)
            .await
            .context("Failed to load question")?
            .filter(|q| q.status == QuestionStatus::Approved)
            .ok_or(DownloadServiceError::NotFound)?;

        let bytes = self
            .store
            .get(&question.storage_key)
            .await
            .with_context(|| format!("Failed to read image of question {}", id))?;

        Ok(Download {
            filename: download_name(&question),
            content_type: content_type_for(question.file_extension()).to_string(),
            bytes,
        })
    }

    /// Zip of the requested approved questions.
    ///
    /// Unknown, unapproved and unreadable ids are left out; an empty result
    /// is an error.
    pub async fn bundle(&self, ids: &[i64]) -> Result<Download, DownloadServiceError> {
        let ids = self.prepare_ids(ids)?;

        let filter = QuestionFilter {
            status: Some(QuestionStatus::Approved),
            ..Default::default()
        };
        let questions = self
            .questions
            .list_by_ids(&ids, &filter)
            .await
            .context("Failed to load questions")?;

        let reads: Vec<_> = stream::iter(questions)
            .map(|question| {
                let store = Arc::clone(&self.store);
                async move {
                    let read = store.get(&question.storage_key).await;
                    (question, read)
                }
            })
            .buffered(READ_CONCURRENCY)
            .collect()
            .await;

        let mut names = EntryNames::default();
        let mut entries = Vec::with_capacity(reads.len());
        for (question, read) in reads {
            match read {
                Ok(bytes) => entries.push((names.claim(&download_name(&question)), bytes)),
                Err(e) => tracing::warn!(
                    "Skipping question {} in bundle, image unreadable: {}",
                    question.id,
                    e
                ),
            }
        }

        if entries.is_empty() {
            return Err(DownloadServiceError::NothingToBundle);
        }

        let count = entries.len();
        let bytes = tokio::task::spawn_blocking(move || write_zip(entries))
            .await
            .context("Zip task failed")??;

        tracing::info!("Built bundle of {} questions ({} bytes)", count, bytes.len());

        Ok(Download {
            filename: format!("questions-bulk-{}.zip", chrono::Utc::now().timestamp_millis()),
            content_type: "application/zip".to_string(),
            bytes,
        })
    }

    fn prepare_ids(&self, ids: &[i64]) -> Result<Vec<i64>, DownloadServiceError> {
        let mut seen = HashSet::new();
        let ids: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .take(self.config.max_bulk_items)
            .collect();
        if ids.is_empty() {
            return Err(DownloadServiceError::ValidationError(
                "No question ids given".into(),
            ));
        }
        Ok(ids)
    }
}

fn write_zip(entries: Vec<(String, Vec<u8>)>) -> anyhow::Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("Failed to add {} to zip", name))?;
        zip.write_all(&bytes)?;
    }
    let cursor = zip.finish().context("Failed to finish zip")?;
    Ok(cursor.into_inner())
}
