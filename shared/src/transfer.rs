//! JSON export/import of the whole planner state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Document, Section, SectionId, Theme, TripMeta};
use crate::{AppError, ErrorKind};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("file is not valid JSON: {0}")]
    Syntax(String),

    #[error("file must contain a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid list file: {0}")]
    Invalid(String),

    #[error("could not encode export: {0}")]
    Encode(String),
}

impl From<TransferError> for AppError {
    fn from(error: TransferError) -> Self {
        let kind = match error {
            TransferError::Encode(_) => ErrorKind::Serialization,
            _ => ErrorKind::Validation,
        };
        AppError::new(kind, format!("Error importing list: {error}"))
    }
}

/// The export file layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub data: Vec<Section>,
    pub meta: TripMeta,
    #[serde(rename = "collapsedSections", default)]
    pub collapsed_sections: Vec<SectionId>,
    /// Kept as text so a file with an unknown theme still imports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

impl Bundle {
    #[must_use]
    pub fn from_document(document: &Document) -> Self {
        Self {
            data: document.sections.clone(),
            meta: document.meta.clone(),
            collapsed_sections: document.collapsed_sections.iter().cloned().collect(),
            theme: Some(document.theme.as_str().to_string()),
        }
    }

    /// Pretty-printed with two-space indentation.
    pub fn to_json(&self) -> Result<String, TransferError> {
        serde_json::to_string_pretty(self).map_err(|e| TransferError::Encode(e.to_string()))
    }

    /// Parses an export file. `data` and `meta` must both be present (and not
    /// null) and the trip dates must be valid; nothing is applied when
    /// validation fails.
    pub fn from_json(raw: &str) -> Result<Self, TransferError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| TransferError::Syntax(e.to_string()))?;
        let object = value.as_object().ok_or(TransferError::NotAnObject)?;

        for field in ["data", "meta"] {
            if object.get(field).map_or(true, serde_json::Value::is_null) {
                return Err(TransferError::MissingField(field));
            }
        }

        let bundle: Self =
            serde_json::from_value(value).map_err(|e| TransferError::Invalid(e.to_string()))?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Checks what the planner would otherwise reject on edit: malformed
    /// dates and an end date before the start date.
    pub fn validate(&self) -> Result<(), TransferError> {
        self.meta
            .validate_dates()
            .map_err(|problem| TransferError::Invalid(problem.to_string()))
    }

    /// The theme to apply, if the file carries a recognised one.
    #[must_use]
    pub fn parsed_theme(&self) -> Option<Theme> {
        self.theme.as_deref().and_then(|raw| raw.parse().ok())
    }

    /// Builds the document this bundle describes. Collapsed ids that match no
    /// section are dropped; the theme falls back to `current_theme`.
    #[must_use]
    pub fn into_document(self, current_theme: Theme) -> Document {
        let theme = self.parsed_theme().unwrap_or(current_theme);
        let mut document = Document {
            sections: self.data,
            meta: self.meta,
            collapsed_sections: self.collapsed_sections.into_iter().collect(),
            theme,
        };
        document.prune_collapsed();
        document
    }
}
