//! Pre-transfer gate. Files that fail here never reach the orchestrator.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::models::FileItem;
use crate::config::ValidationConfig;

static RESERVED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"|?*\x00-\x1F]"#).expect("static regex"));

/// Extensions accepted for upload, with the content type each implies.
const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("pdf", "application/pdf"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("txt", "text/plain"),
    ("zip", "application/zip"),
];

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// File signatures checked against the declared type.
const SIGNATURES: &[(&[u8], &str)] = &[
    (&[0x89, 0x50, 0x4e, 0x47], "image/png"),
    (&[0xff, 0xd8, 0xff, 0xe0], "image/jpeg"),
    (&[0xff, 0xd8, 0xff, 0xe1], "image/jpeg"),
    (&[0xff, 0xd8, 0xff, 0xe2], "image/jpeg"),
    (&[0xff, 0xd8, 0xff, 0xe8], "image/jpeg"),
    (&[0x25, 0x50, 0x44, 0x46], "application/pdf"),
    (&[0x50, 0x4b, 0x03, 0x04], "application/zip"),
    (&[0x50, 0x4b, 0x05, 0x06], "application/zip"),
    (&[0x50, 0x4b, 0x07, 0x08], "application/zip"),
    (&[0xd0, 0xcf, 0x11, 0xe0], "application/msword"),
];

/// Content type for a file name, from its extension.
pub fn content_type_for(name: &str) -> &'static str {
    extension(name)
        .and_then(|ext| {
            ALLOWED_TYPES
                .iter()
                .find(|(allowed, _)| *allowed == ext)
                .map(|(_, content_type)| *content_type)
        })
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}

fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn detect_signature(content: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|(magic, _)| content.starts_with(magic))
        .map(|(_, content_type)| *content_type)
}

/// Why a file was refused. Display strings are shown to users as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ValidationError {
    #[error("too many files")]
    TooManyFiles,

    #[error("file is too large")]
    TooLarge,

    #[error("file type is not supported")]
    UnsupportedType,

    #[error("file name contains characters that are not allowed")]
    InvalidName,

    #[error("file content does not match its type")]
    ContentMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub file_name: String,
    pub reason: ValidationError,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub accepted: Vec<FileItem>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Clone)]
pub struct Validator {
    max_files: usize,
    max_file_size: u64,
}

impl Validator {
    pub fn new(max_files: usize, max_file_size: u64) -> Self {
        Self {
            max_files,
            max_file_size,
        }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(config.max_files, config.max_file_size_mb * 1024 * 1024)
    }

    /// Check a single file against the name, type, size and content rules.
    pub fn check_file(&self, file: &FileItem) -> Result<(), ValidationError> {
        if file.name.is_empty()
            || RESERVED_CHARS.is_match(&file.name)
            || file.name.contains("..")
            || file.name.starts_with('.')
        {
            return Err(ValidationError::InvalidName);
        }

        let Some(ext) = extension(&file.name) else {
            return Err(ValidationError::UnsupportedType);
        };
        if !ALLOWED_TYPES.iter().any(|(allowed, _)| *allowed == ext) {
            return Err(ValidationError::UnsupportedType);
        }

        if file.size > self.max_file_size {
            return Err(ValidationError::TooLarge);
        }

        if needs_sniffing(&file.content_type) {
            if let Some(detected) = detect_signature(&file.content) {
                if !same_family(&file.content_type, detected) {
                    return Err(ValidationError::ContentMismatch);
                }
            }
        }

        Ok(())
    }

    /// Split a submission into accepted and rejected files.
    ///
    /// Files past `max_files` are rejected in submission order; the first
    /// `max_files` are still checked individually.
    pub fn validate_batch(&self, files: Vec<FileItem>) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (index, file) in files.into_iter().enumerate() {
            let verdict = if index >= self.max_files {
                Err(ValidationError::TooManyFiles)
            } else {
                self.check_file(&file)
            };

            match verdict {
                Ok(()) => report.accepted.push(file),
                Err(reason) => report.rejected.push(Rejection {
                    file_name: file.name,
                    reason,
                }),
            }
        }

        report
    }
}

fn needs_sniffing(content_type: &str) -> bool {
    content_type.starts_with("image/") || content_type == "application/pdf" || content_type.contains("zip")
}

fn same_family(declared: &str, detected: &str) -> bool {
    declared == detected || (declared.starts_with("image/") && detected.starts_with("image/"))
}
