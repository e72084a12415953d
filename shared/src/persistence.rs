//! Load/save orchestration over a [`KeyValueStore`].
//!
//! Each slice of the document lives under its own key and is read and written
//! independently. Reads never fail: missing data is initialised, unreadable
//! data is replaced with defaults and, for the checklist and trip info,
//! written back so the store heals itself.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::capabilities::{Delay, KeyValueStore, KvError, StorageKeys, TemplateTransport};
use crate::model::{
    decode_sections_repaired, fallback_sections, Document, Section, SectionId, Theme, TripMeta,
    WeightUnit,
};
use crate::template::{TemplateLoader, TemplateOrigin, TemplateOutcome};
use crate::{AppError, ErrorKind, Notice, NoticeKind};

/// One independently persisted part of the planner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slice {
    List,
    Meta,
    Collapsed,
    Theme,
    WeightUnit,
}

impl Slice {
    /// Failures to save critical slices are reported to the user; the others
    /// are only logged.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::List | Self::Meta)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::List => "checklist",
            Self::Meta => "trip info",
            Self::Collapsed => "collapsed sections",
            Self::Theme => "theme preference",
            Self::WeightUnit => "weight unit",
        }
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("could not save {slice}: storage is full")]
    QuotaExceeded { slice: Slice },

    #[error("could not save {slice}: {source}")]
    Write {
        slice: Slice,
        #[source]
        source: KvError,
    },

    #[error("could not encode {slice}: {message}")]
    Encode { slice: Slice, message: String },
}

impl PersistenceError {
    #[must_use]
    pub fn from_kv(slice: Slice, error: KvError) -> Self {
        if error.is_quota_exceeded() {
            Self::QuotaExceeded { slice }
        } else {
            Self::Write {
                slice,
                source: error,
            }
        }
    }

    #[must_use]
    pub fn slice(&self) -> Slice {
        match self {
            Self::QuotaExceeded { slice }
            | Self::Write { slice, .. }
            | Self::Encode { slice, .. } => *slice,
        }
    }

    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// What to tell the user, if anything. Only the checklist and trip info
    /// are worth interrupting for; a full store needs an acknowledgement.
    #[must_use]
    pub fn notice(&self) -> Option<Notice> {
        if !self.slice().is_critical() {
            return None;
        }
        Some(Notice::from(&AppError::from(self.clone())))
    }
}

impl From<PersistenceError> for AppError {
    fn from(error: PersistenceError) -> Self {
        let slice = error.slice();
        let app = match &error {
            PersistenceError::QuotaExceeded { .. } => {
                AppError::new(ErrorKind::QuotaExceeded, error.to_string())
            }
            PersistenceError::Write { source, .. } => {
                AppError::new(ErrorKind::Storage, error.to_string())
                    .with_internal(source.to_string())
            }
            PersistenceError::Encode { .. } => {
                AppError::new(ErrorKind::Serialization, error.to_string())
            }
        };
        app.with_context("slice", slice.label())
    }
}

/// The dialog shown when a stored slice could not be read and was replaced.
fn corruption_notice(slice: Slice, message: &str) -> Notice {
    Notice::from(&AppError::new(ErrorKind::Corrupted, message).with_context("slice", slice.label()))
}

// ============================================================================
// Load
// ============================================================================

/// Where the checklist came from at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSource {
    Stored,
    Template(TemplateOrigin),
    /// Stored data could not be read and was replaced with the built-in list.
    Recovered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub document: Document,
    pub weight_unit: WeightUnit,
    pub list_source: ListSource,
    pub notices: Vec<Notice>,
}

pub struct Persistence<S> {
    store: S,
    keys: StorageKeys,
}

impl<S: KeyValueStore> Persistence<S> {
    pub fn new(store: S, keys: StorageKeys) -> Self {
        Self { store, keys }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Which slice a key belongs to, for failures reported after the fact.
    #[must_use]
    pub fn slice_for_key(&self, key: &str) -> Option<Slice> {
        [
            (&self.keys.data, Slice::List),
            (&self.keys.meta, Slice::Meta),
            (&self.keys.collapsed_sections, Slice::Collapsed),
            (&self.keys.theme, Slice::Theme),
            (&self.keys.weight_unit, Slice::WeightUnit),
        ]
        .into_iter()
        .find_map(|(k, slice)| (k == key).then_some(slice))
    }

    /// True when there is no stored checklist, so loading needs the template.
    /// A stored list that cannot be read is recovered instead.
    #[must_use]
    pub fn needs_template(&self) -> bool {
        matches!(self.store.get(&self.keys.data), Ok(None))
    }

    pub async fn load_all<T, D>(&self, loader: &TemplateLoader<T, D>) -> LoadReport
    where
        T: TemplateTransport,
        D: Delay,
    {
        let template = if self.needs_template() {
            Some(loader.fetch().await)
        } else {
            None
        };
        self.load_with(template)
    }

    /// Loads every slice. `template` supplies the checklist when none is
    /// stored; without one the built-in list is used.
    #[instrument(skip_all, fields(prefix_key = %self.keys.data))]
    pub fn load_with(&self, template: Option<TemplateOutcome>) -> LoadReport {
        let mut notices = Vec::new();

        let (sections, list_source) = self.load_list(template, &mut notices);
        let meta = self.load_meta(&mut notices);
        let collapsed_sections = self.load_collapsed();
        let theme = self.load_theme();
        let weight_unit = self.load_weight_unit();

        info!(
            ?list_source,
            sections = sections.len(),
            collapsed = collapsed_sections.len(),
            %theme,
            "planner state loaded"
        );

        LoadReport {
            document: Document {
                sections,
                meta,
                collapsed_sections,
                theme,
            },
            weight_unit,
            list_source,
            notices,
        }
    }

    fn load_list(
        &self,
        template: Option<TemplateOutcome>,
        notices: &mut Vec<Notice>,
    ) -> (Vec<Section>, ListSource) {
        let stored = self
            .store
            .get(&self.keys.data)
            .map_err(|e| e.to_string())
            .and_then(|raw| match raw {
                Some(bytes) => decode_sections_repaired(&bytes)
                    .map(Some)
                    .map_err(|e| e.to_string()),
                None => Ok(None),
            });

        match stored {
            Ok(Some(decoded)) => {
                if decoded.repaired {
                    warn!("stored checklist had unreadable entries, saving the repaired list");
                    if let Err(e) = self.save_list(&decoded.sections) {
                        notices.extend(e.notice());
                    }
                }
                (decoded.sections, ListSource::Stored)
            }
            Ok(None) => {
                let outcome = template.unwrap_or_else(TemplateOutcome::fallback);
                notices.extend(outcome.notice);
                if let Err(e) = self.save_list(&outcome.sections) {
                    notices.push(initial_save_notice(&e));
                }
                (outcome.sections, ListSource::Template(outcome.origin))
            }
            Err(reason) => {
                error!(%reason, "stored checklist is unreadable, using built-in list");
                notices.push(corruption_notice(
                    Slice::List,
                    "Could not load saved checklist data. Using default list.",
                ));
                let sections = fallback_sections();
                if let Err(PersistenceError::QuotaExceeded { .. }) = self.save_list(&sections) {
                    notices.push(Notice::dialog(
                        "Storage full: Could not even save the default checklist.",
                    ));
                }
                (sections, ListSource::Recovered)
            }
        }
    }

    fn load_meta(&self, notices: &mut Vec<Notice>) -> TripMeta {
        let stored = self
            .store
            .get(&self.keys.meta)
            .map_err(|e| e.to_string())
            .and_then(|raw| match raw {
                Some(bytes) => serde_json::from_slice::<TripMeta>(&bytes)
                    .map(Some)
                    .map_err(|e| e.to_string()),
                None => Ok(None),
            });

        match stored {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                let meta = TripMeta::default();
                if let Err(e) = self.save_meta(&meta) {
                    notices.push(initial_save_notice(&e));
                }
                meta
            }
            Err(reason) => {
                error!(%reason, "stored trip info is unreadable, using defaults");
                notices.push(corruption_notice(
                    Slice::Meta,
                    "Could not load saved trip info. Using defaults.",
                ));
                let meta = TripMeta::default();
                if let Err(PersistenceError::QuotaExceeded { .. }) = self.save_meta(&meta) {
                    notices.push(Notice::dialog(
                        "Storage full: Could not even save the default trip info.",
                    ));
                }
                meta
            }
        }
    }

    fn load_collapsed(&self) -> BTreeSet<SectionId> {
        match self.store.get(&self.keys.collapsed_sections) {
            Ok(Some(bytes)) => serde_json::from_slice::<Vec<SectionId>>(&bytes)
                .map(|ids| ids.into_iter().collect())
                .unwrap_or_else(|e| {
                    error!(error = %e, "collapsed sections are unreadable, expanding all");
                    BTreeSet::new()
                }),
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                error!(error = %e, "could not read collapsed sections");
                BTreeSet::new()
            }
        }
    }

    fn load_theme(&self) -> Theme {
        self.load_raw_string(&self.keys.theme)
            .and_then(|raw| {
                raw.parse::<Theme>()
                    .map_err(|value| warn!(%value, "ignoring stored theme"))
                    .ok()
            })
            .unwrap_or_default()
    }

    fn load_weight_unit(&self) -> WeightUnit {
        self.load_raw_string(&self.keys.weight_unit)
            .and_then(|raw| {
                raw.parse::<WeightUnit>()
                    .map_err(|value| warn!(%value, "ignoring stored weight unit"))
                    .ok()
            })
            .unwrap_or_default()
    }

    fn load_raw_string(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(Some(bytes)) => String::from_utf8(bytes)
                .map_err(|e| error!(key, error = %e, "stored preference is not UTF-8"))
                .ok()
                .filter(|s| !s.is_empty()),
            Ok(None) => None,
            Err(e) => {
                error!(key, error = %e, "could not read preference");
                None
            }
        }
    }

    // ========================================================================
    // Save
    // ========================================================================

    #[instrument(skip_all, fields(sections = sections.len()))]
    pub fn save_list(&self, sections: &[Section]) -> Result<(), PersistenceError> {
        self.write_json(Slice::List, &self.keys.data, &sections)
    }

    #[instrument(skip_all)]
    pub fn save_meta(&self, meta: &TripMeta) -> Result<(), PersistenceError> {
        self.write_json(Slice::Meta, &self.keys.meta, meta)
    }

    #[instrument(skip_all, fields(collapsed = collapsed.len()))]
    pub fn save_collapsed(
        &self,
        collapsed: &BTreeSet<SectionId>,
    ) -> Result<(), PersistenceError> {
        let ids: Vec<&SectionId> = collapsed.iter().collect();
        self.write_json(Slice::Collapsed, &self.keys.collapsed_sections, &ids)
    }

    #[instrument(skip(self))]
    pub fn save_theme(&self, theme: Theme) -> Result<(), PersistenceError> {
        self.write(Slice::Theme, &self.keys.theme, theme.as_str().as_bytes())
    }

    #[instrument(skip(self))]
    pub fn save_weight_unit(&self, unit: WeightUnit) -> Result<(), PersistenceError> {
        self.write(Slice::WeightUnit, &self.keys.weight_unit, unit.as_str().as_bytes())
    }

    /// Writes the slices undo/redo can change. Every slice is attempted even
    /// if an earlier one fails.
    pub fn save_restorable(&self, document: &Document) -> Vec<PersistenceError> {
        [
            self.save_list(&document.sections),
            self.save_meta(&document.meta),
            self.save_collapsed(&document.collapsed_sections),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect()
    }

    /// Removes the checklist and trip info ahead of a reset. Failures are
    /// logged and do not stop the reset.
    #[instrument(skip_all)]
    pub fn clear_list_and_meta(&self) {
        for key in [&self.keys.data, &self.keys.meta] {
            if let Err(e) = self.store.remove(key) {
                error!(key = %key, error = %e, "could not remove stored data during reset");
            }
        }
    }

    fn write_json<V: Serialize + ?Sized>(
        &self,
        slice: Slice,
        key: &str,
        value: &V,
    ) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            error!(%slice, error = %e, "could not encode");
            PersistenceError::Encode {
                slice,
                message: e.to_string(),
            }
        })?;
        self.write(slice, key, &bytes)
    }

    fn write(&self, slice: Slice, key: &str, bytes: &[u8]) -> Result<(), PersistenceError> {
        self.store.set(key, bytes).map_err(|e| {
            error!(%slice, key, error = %e, "save failed");
            PersistenceError::from_kv(slice, e)
        })
    }
}

fn initial_save_notice(error: &PersistenceError) -> Notice {
    let slice = error.slice();
    if error.is_quota_exceeded() {
        Notice::dialog(format!(
            "Could not save initial {slice}. Storage space may be full."
        ))
    } else {
        Notice::toast(
            format!("An unexpected error occurred saving the initial {slice}."),
            NoticeKind::Error,
        )
    }
}
