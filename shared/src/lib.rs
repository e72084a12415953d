//! Shared core of the camping-list planner.
//!
//! The core owns the checklist document, every rule about how it may change,
//! the undo/redo history and the load/save protocol. Crux shells drive it
//! through [`App`]; native harnesses use [`Planner`] directly with the traits
//! in [`capabilities`].

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod history;
pub mod model;
pub mod persistence;
pub mod planner;
pub mod query;
pub mod template;
pub mod transfer;
pub mod view;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use app::{App, AppView, Capabilities, Effect, Event, Model};
pub use capabilities::{
    Delay, KeyValueStore, KvError, MemoryStore, ShellStore, TemplateTransport,
};
pub use command::{Command, CommandOutcome};
pub use config::{ConfigError, PlannerConfig};
pub use history::{History, Snapshot};
pub use model::{Document, Item, ItemId, Section, SectionId, Theme, TripMeta, WeightUnit};
pub use persistence::{ListSource, LoadReport, Persistence, PersistenceError, Slice};
pub use planner::{CheckOutcome, ItemDetails, ItemPatch, MutationError, Planner};
pub use query::{CostSummary, ItemLocation, SearchResult, WeightSummary};
pub use template::{TemplateLoader, TemplateOrigin, TemplateOutcome};
pub use transfer::{Bundle, TransferError};
pub use view::ViewModel;

#[cfg(not(target_arch = "wasm32"))]
pub use capabilities::{SqliteStore, TokioDelay};

pub const MAX_HISTORY_SIZE: usize = 50;
pub const TEMPLATE_FETCH_ATTEMPTS: u32 = 3;
pub const INITIAL_RETRY_DELAY_MS: u64 = 500;
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;
pub const DEFAULT_STORAGE_PREFIX: &str = "campChecklist";
pub const DEFAULT_TEMPLATE_URL: &str = "camplist.json";
pub const DEPENDENCY_REMINDER_MS: u64 = 5000;
pub const PERMIT_DEADLINE_WARNING_DAYS: i64 = 14;
pub const GRAMS_PER_POUND: f64 = 453.592;
pub const GRAMS_PER_KILOGRAM: f64 = 1000.0;

const QUOTA_ADVICE: &str =
    "Storage space is full. Please remove some items or clear other website data.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Validation,
    QuotaExceeded,
    Storage,
    Corrupted,
    Network,
    Serialization,
    InvalidState,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Validation => "VALIDATION_ERROR",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::Storage => "STORAGE_ERROR",
            Self::Corrupted => "CORRUPTED_DATA",
            Self::Network => "NETWORK_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Corruption and a full store need an acknowledgement; everything else is
    /// shown as a transient notice.
    #[must_use]
    pub const fn needs_acknowledgement(self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::Corrupted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Storage messages name the affected slice when the error carries a
    /// `slice` context entry.
    #[must_use]
    pub fn user_facing_message(&self) -> String {
        let slice = self.context.get("slice");
        match self.kind {
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::Validation | ErrorKind::Corrupted => self.message.clone(),
            ErrorKind::QuotaExceeded => match slice {
                Some(slice) => format!("Could not save {slice} changes. {QUOTA_ADVICE}"),
                None => QUOTA_ADVICE.into(),
            },
            ErrorKind::Storage => match slice {
                Some(slice) => format!(
                    "An unexpected error occurred while saving the {slice}. Please try again."
                ),
                None => "An unexpected error occurred while saving. Please try again.".into(),
            },
            ErrorKind::Network => {
                "Could not reach the server. Please check your connection and try again.".into()
            }
            ErrorKind::Serialization => {
                "A data error occurred. Please export your list and reload the page.".into()
            }
            ErrorKind::InvalidState | ErrorKind::Internal => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

/// How the shell should surface a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    #[default]
    Toast,
    Dialog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl NoticeKind {
    #[must_use]
    pub const fn default_duration_ms(self) -> u64 {
        match self {
            Self::Info => 3000,
            Self::Success => 2000,
            Self::Warning => 4000,
            Self::Error => 5000,
        }
    }
}

/// A user-visible message produced by the core for the shell to display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub kind: NoticeKind,
    pub presentation: Presentation,
    pub created_at_ms: u64,
    pub duration_ms: u64,
}

impl Notice {
    #[must_use]
    pub fn toast(message: impl Into<String>, kind: NoticeKind) -> Self {
        Self {
            message: message.into(),
            kind,
            presentation: Presentation::Toast,
            created_at_ms: get_current_time_ms(),
            duration_ms: kind.default_duration_ms(),
        }
    }

    #[must_use]
    pub fn dialog(message: impl Into<String>) -> Self {
        Self {
            presentation: Presentation::Dialog,
            ..Self::toast(message, NoticeKind::Error)
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    #[must_use]
    pub fn is_dialog(&self) -> bool {
        self.presentation == Presentation::Dialog
    }
}

impl From<&AppError> for Notice {
    fn from(error: &AppError) -> Self {
        if error.kind.needs_acknowledgement() {
            Notice::dialog(error.user_facing_message())
        } else {
            Notice::toast(error.user_facing_message(), NoticeKind::Error)
        }
    }
}

/// Exponential backoff: `base_ms * 2^attempt`, capped at [`MAX_RETRY_DELAY_MS`].
#[must_use]
pub fn calculate_retry_delay(base_ms: u64, attempt: u32) -> u64 {
    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    exponential.min(MAX_RETRY_DELAY_MS)
}

#[cfg(not(target_arch = "wasm32"))]
#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(target_arch = "wasm32")]
#[must_use]
pub fn get_current_time_ms() -> u64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let now = js_sys::Date::now() as u64;
    now
}

#[cfg(test)]
mod tests {
    use super::*;

    mod retry_tests {
        use super::*;

        #[test]
        fn test_retry_delay_doubles_from_base() {
            assert_eq!(calculate_retry_delay(INITIAL_RETRY_DELAY_MS, 0), 500);
            assert_eq!(calculate_retry_delay(INITIAL_RETRY_DELAY_MS, 1), 1000);
            assert_eq!(calculate_retry_delay(INITIAL_RETRY_DELAY_MS, 2), 2000);
        }

        #[test]
        fn test_retry_delay_capped() {
            assert_eq!(calculate_retry_delay(INITIAL_RETRY_DELAY_MS, 40), MAX_RETRY_DELAY_MS);
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn test_app_error_new() {
            let error = AppError::new(ErrorKind::NotFound, "item tent-1 missing");
            assert_eq!(error.kind, ErrorKind::NotFound);
            assert_eq!(error.code(), "NOT_FOUND");
            assert!(error.internal_message.is_none());
        }

        #[test]
        fn test_app_error_display_includes_internal() {
            let error = AppError::new(ErrorKind::Storage, "write failed")
                .with_internal("disk I/O error");
            assert_eq!(
                error.to_string(),
                "[STORAGE_ERROR] write failed (internal: disk I/O error)"
            );
        }

        #[test]
        fn test_app_error_with_context() {
            let error = AppError::new(ErrorKind::Validation, "bad dates")
                .with_context("start_date", "2025-07-10");
            assert_eq!(error.context.get("start_date").unwrap(), "2025-07-10");
        }

        #[test]
        fn test_quota_message_differs_from_generic_storage() {
            let quota = AppError::new(ErrorKind::QuotaExceeded, "full");
            let storage = AppError::new(ErrorKind::Storage, "io");
            assert!(quota.user_facing_message().starts_with("Storage space is full"));
            assert!(storage.user_facing_message().contains("unexpected error"));
        }

        #[test]
        fn test_storage_messages_name_the_slice() {
            let quota =
                AppError::new(ErrorKind::QuotaExceeded, "full").with_context("slice", "checklist");
            assert_eq!(
                quota.user_facing_message(),
                format!("Could not save checklist changes. {QUOTA_ADVICE}")
            );
            let storage =
                AppError::new(ErrorKind::Storage, "io").with_context("slice", "trip info");
            assert_eq!(
                storage.user_facing_message(),
                "An unexpected error occurred while saving the trip info. Please try again."
            );
        }

        #[test]
        fn test_validation_and_corruption_messages_pass_through() {
            let error = AppError::new(
                ErrorKind::Validation,
                "End date cannot be before the start date.",
            );
            assert_eq!(
                error.user_facing_message(),
                "End date cannot be before the start date."
            );
            let error = AppError::new(ErrorKind::Corrupted, "Could not load saved trip info.");
            assert_eq!(error.user_facing_message(), "Could not load saved trip info.");
        }
    }

    mod notice_tests {
        use super::*;

        #[test]
        fn test_toast_defaults() {
            let notice = Notice::toast("List imported successfully", NoticeKind::Success);
            assert_eq!(notice.presentation, Presentation::Toast);
            assert_eq!(notice.duration_ms, 2000);
        }

        #[test]
        fn test_dialog_is_an_error() {
            let notice = Notice::dialog("Storage full");
            assert!(notice.is_dialog());
            assert_eq!(notice.kind, NoticeKind::Error);
        }

        #[test]
        fn test_quota_error_becomes_dialog() {
            let error = AppError::new(ErrorKind::QuotaExceeded, "full");
            assert!(Notice::from(&error).is_dialog());

            assert!(Notice::from(&AppError::new(ErrorKind::Corrupted, "bad")).is_dialog());

            let error = AppError::new(ErrorKind::Network, "offline");
            let notice = Notice::from(&error);
            assert!(!notice.is_dialog());
            assert_eq!(notice.kind, NoticeKind::Error);
        }
    }
}
