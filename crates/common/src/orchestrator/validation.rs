use serde::{Deserialize, Serialize};

use crate::error::TesseraError;

const MB: u64 = 1024 * 1024;

/// One accepted category of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: String,
    /// Exact types (`application/pdf`) or wildcards (`image/*`)
    pub mime_types: Vec<String>,
    pub max_size: u64,
}

impl CategoryRule {
    fn matches(&self, mime_type: &str) -> bool {
        self.mime_types.iter().any(|pattern| match pattern.strip_suffix("/*") {
            Some(prefix) => mime_type
                .split_once('/')
                .map(|(top, _)| top.eq_ignore_ascii_case(prefix))
                .unwrap_or(false),
            None => pattern.eq_ignore_ascii_case(mime_type),
        })
    }
}

/// Accepted MIME types and per-category size ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowList {
    pub rules: Vec<CategoryRule>,
}

impl Default for AllowList {
    fn default() -> Self {
        let rule = |category: &str, mime_types: &[&str], max_size: u64| CategoryRule {
            category: category.to_string(),
            mime_types: mime_types.iter().map(|m| m.to_string()).collect(),
            max_size,
        };

        Self {
            rules: vec![
                rule("image", &["image/*"], 10 * MB),
                rule("video", &["video/*"], 100 * MB),
                rule("audio", &["audio/*"], 50 * MB),
                rule(
                    "document",
                    &[
                        "application/pdf",
                        "text/*",
                        "application/json",
                        "application/msword",
                        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                        "application/octet-stream",
                        "application/zip",
                    ],
                    25 * MB,
                ),
            ],
        }
    }
}

impl AllowList {
    /// Check a file against the rules; the first rule matching the type decides.
    pub fn check(&self, mime_type: &str, size: u64) -> Result<&CategoryRule, TesseraError> {
        if size == 0 {
            return Err(TesseraError::Validation("file is empty".into()));
        }

        let rule = self
            .rules
            .iter()
            .find(|rule| rule.matches(mime_type))
            .ok_or_else(|| {
                TesseraError::Validation(format!("file type {} is not allowed", mime_type))
            })?;

        if size > rule.max_size {
            return Err(TesseraError::Validation(format!(
                "{} files are limited to {} bytes, got {}",
                rule.category, rule.max_size, size
            )));
        }
        Ok(rule)
    }
}
