//! The question sent to the answering service.
//!
//! An [`AnswerRequest`] describes a single question about a compliance
//! control. When both the assessment and the control are known, the request
//! is cacheable: its completed answer is stored under that pair.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identifier, unique per stream invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Language the answer should be generated in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Croatian
    Hr,
    #[default]
    En,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Hr => "hr",
            Self::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hr" => Ok(Self::Hr),
            "en" => Ok(Self::En),
            other => Err(format!("unsupported language '{other}' (expected 'hr' or 'en')")),
        }
    }
}

/// A question for the answering service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    /// The question text
    pub question: String,

    /// Organization the assessment belongs to
    pub organization_id: String,

    /// Assessment the question is asked within
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_id: Option<String>,

    /// Control the question is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_id: Option<String>,

    /// Free-form context forwarded to the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Answer language
    #[serde(default)]
    pub language: Language,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            organization_id: organization_id.into(),
            assessment_id: None,
            control_id: None,
            context: None,
            language: Language::default(),
        }
    }

    /// Scope the request to an (assessment, control) pair.
    pub fn for_control(
        mut self,
        assessment_id: impl Into<String>,
        control_id: impl Into<String>,
    ) -> Self {
        self.assessment_id = Some(assessment_id.into());
        self.control_id = Some(control_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// The (assessment, control) pair this request is cached under, if both are set.
    pub fn cache_scope(&self) -> Option<(&str, &str)> {
        match (&self.assessment_id, &self.control_id) {
            (Some(a), Some(c)) => Some((a.as_str(), c.as_str())),
            _ => None,
        }
    }
}
