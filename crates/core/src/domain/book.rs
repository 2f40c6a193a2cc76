// Book Domain Model (generation payload and result)

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Maximum length of any free-text field in a book request
pub const MAX_TEXT_FIELD_LEN: usize = 256;

/// Chapter count bounds (inclusive)
pub const MAX_CHAPTERS: u32 = 50;

/// Section-per-chapter bounds (inclusive)
pub const MAX_SECTIONS: u32 = 20;

/// Book generation parameters submitted with a join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRequest {
    pub name: String,
    pub author: String,
    pub title: String,
    pub topic: String,
    pub target_audience: String,
    pub num_chapters: u32,
    pub num_sections: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
}

impl BookRequest {
    /// Validate the request before it is admitted into a lane
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("name", &self.name),
            ("author", &self.author),
            ("title", &self.title),
            ("topic", &self.topic),
            ("targetAudience", &self.target_audience),
        ];

        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(DomainError::InvalidPayload(format!(
                    "{} cannot be empty",
                    field
                )));
            }
            if value.chars().count() > MAX_TEXT_FIELD_LEN {
                return Err(DomainError::InvalidPayload(format!(
                    "{} too long (max {} characters)",
                    field, MAX_TEXT_FIELD_LEN
                )));
            }
        }

        if !(1..=MAX_CHAPTERS).contains(&self.num_chapters) {
            return Err(DomainError::InvalidPayload(format!(
                "numChapters out of range (1..={})",
                MAX_CHAPTERS
            )));
        }

        if !(1..=MAX_SECTIONS).contains(&self.num_sections) {
            return Err(DomainError::InvalidPayload(format!(
                "numSections out of range (1..={})",
                MAX_SECTIONS
            )));
        }

        Ok(())
    }

    /// A small valid request (for tests and CLI smoke runs)
    pub fn sample(title: impl Into<String>) -> Self {
        Self {
            name: "sample".to_string(),
            author: "Quill".to_string(),
            title: title.into(),
            topic: "Rust".to_string(),
            target_audience: "developers".to_string(),
            num_chapters: 3,
            num_sections: 2,
            cover: None,
        }
    }
}

/// Generated book as returned by the generation worker (opaque JSON)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookArtifact(serde_json::Value);

impl BookArtifact {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}
