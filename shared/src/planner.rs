//! The planner context: one loaded document plus everything that may change it.
//!
//! Every mutation follows the same order: validate, record a snapshot, apply,
//! persist. Validation failures return before the snapshot, so a rejected call
//! leaves both the document and the history untouched. Save failures never
//! undo the in-memory change; they queue a [`Notice`] instead.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{Delay, KeyValueStore, KvError, TemplateTransport};
use crate::config::{ConfigError, PlannerConfig};
use crate::history::History;
use crate::model::{
    parse_number_or_zero, sanitize_number, DateProblem, Document, Item, ItemId, Section,
    SectionId, Theme, TripMeta, WeightUnit,
};
use crate::persistence::{ListSource, LoadReport, Persistence, PersistenceError};
use crate::query::{self, CostSummary, ItemLocation, SearchResult, WeightSummary};
use crate::template::{TemplateLoader, TemplateOutcome};
use crate::transfer::{Bundle, TransferError};
use crate::{AppError, ErrorKind, Notice, NoticeKind, DEPENDENCY_REMINDER_MS};

const IMPORT_NOTICE_MS: u64 = 3000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("section '{0}' not found")]
    SectionNotFound(String),

    #[error("item '{0}' not found")]
    ItemNotFound(String),

    #[error("Item text cannot be empty.")]
    EmptyText,

    #[error("Section title cannot be empty.")]
    EmptyTitle,

    #[error("source and target are the same")]
    SameTarget,

    #[error("End date cannot be before the start date.")]
    InvalidDateRange,

    #[error("{field} is not a valid date: '{value}'")]
    InvalidDate { field: &'static str, value: String },

    #[error("invalid theme value '{0}'")]
    InvalidTheme(String),
}

impl From<MutationError> for AppError {
    fn from(error: MutationError) -> Self {
        let kind = match &error {
            MutationError::SectionNotFound(_) | MutationError::ItemNotFound(_) => {
                ErrorKind::NotFound
            }
            MutationError::SameTarget => ErrorKind::InvalidState,
            _ => ErrorKind::Validation,
        };
        AppError::new(kind, error.to_string())
    }
}

impl From<DateProblem> for MutationError {
    fn from(problem: DateProblem) -> Self {
        match problem {
            DateProblem::Malformed(invalid) => Self::InvalidDate {
                field: invalid.field,
                value: invalid.value,
            },
            DateProblem::EndBeforeStart => Self::InvalidDateRange,
        }
    }
}

/// Numeric and flag fields edited together in the item details form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemDetails {
    pub weight: f64,
    pub packed: bool,
    pub cost: f64,
    pub permit_required: bool,
    pub regulation_notes: String,
}

impl ItemDetails {
    /// Builds details from raw form input; unparsable numbers become 0.
    #[must_use]
    pub fn from_form(
        weight: &str,
        packed: bool,
        cost: &str,
        permit_required: bool,
        regulation_notes: &str,
    ) -> Self {
        Self {
            weight: parse_number_or_zero(weight),
            packed,
            cost: parse_number_or_zero(cost),
            permit_required,
            regulation_notes: regulation_notes.to_string(),
        }
    }
}

/// A partial item update. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemPatch {
    pub text: Option<String>,
    pub checked: Option<bool>,
    pub note: Option<String>,
    pub requires: Option<Vec<ItemId>>,
    pub weight: Option<f64>,
    pub packed: Option<bool>,
    pub cost: Option<f64>,
    pub permit_required: Option<bool>,
    pub regulation_notes: Option<String>,
}

impl ItemPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when the patch would turn an unchecked item into a checked one.
    fn checks(&self, item: &Item) -> bool {
        self.checked == Some(true) && !item.checked
    }

    fn apply_to(self, item: &mut Item) {
        if let Some(text) = self.text {
            item.text = text.trim().to_string();
        }
        if let Some(checked) = self.checked {
            item.checked = checked;
        }
        if let Some(note) = self.note {
            item.note = note;
        }
        if let Some(requires) = self.requires {
            item.requires = requires.into_iter().filter(|id| *id != item.id).collect();
        }
        if let Some(weight) = self.weight {
            item.weight = sanitize_number(weight);
        }
        if let Some(packed) = self.packed {
            item.packed = packed;
        }
        if let Some(cost) = self.cost {
            item.cost = sanitize_number(cost);
        }
        if let Some(permit_required) = self.permit_required {
            item.permit_required = permit_required;
        }
        if let Some(regulation_notes) = self.regulation_notes {
            item.regulation_notes = regulation_notes;
        }
    }
}

/// Result of checking an item: the texts of required items still unchecked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub missing_dependencies: Vec<String>,
}

/// State that [`crate::command`] restores when a command panics mid-way.
pub(crate) struct Checkpoint {
    document: Document,
    weight_unit: WeightUnit,
    history: History,
}

pub struct Planner<S> {
    document: Document,
    weight_unit: WeightUnit,
    history: History,
    persistence: Persistence<S>,
    notices: Vec<Notice>,
    list_source: ListSource,
}

impl<S: KeyValueStore> Planner<S> {
    /// Loads persisted state (or the template, or the built-in list) and
    /// returns a planner ready for mutations. History starts empty.
    #[instrument(skip_all, fields(prefix = %config.storage_prefix))]
    pub async fn load<T, D>(
        config: &PlannerConfig,
        store: S,
        loader: &TemplateLoader<T, D>,
    ) -> Result<Self, ConfigError>
    where
        T: TemplateTransport,
        D: Delay,
    {
        config.validate()?;
        let persistence = Persistence::new(store, config.storage_keys()?);
        let report = persistence.load_all(loader).await;
        Ok(Self::from_report(config, persistence, report))
    }

    /// Builds a planner from an already completed load.
    #[must_use]
    pub fn from_report(
        config: &PlannerConfig,
        persistence: Persistence<S>,
        report: LoadReport,
    ) -> Self {
        Self {
            document: report.document,
            weight_unit: report.weight_unit,
            history: History::new(config.history_limit),
            persistence,
            notices: report.notices,
            list_source: report.list_source,
        }
    }

    // ========================================================================
    // Items
    // ========================================================================

    pub fn add_item(&mut self, section_id: &str, text: &str) -> Result<Item, MutationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MutationError::EmptyText);
        }
        let index = self.section_index(section_id)?;

        self.history.record(&self.document);
        let item = Item::new(ItemId::generate(), text);
        self.document.sections[index].items.push(item.clone());
        self.persist_list();
        debug!(item_id = %item.id, section_id, "item added");
        Ok(item)
    }

    pub fn delete_item(&mut self, item_id: &str) -> Result<(), MutationError> {
        let (section, index) = self.item_position(item_id)?;
        self.history.record(&self.document);
        self.document.sections[section].items.remove(index);
        self.persist_list();
        debug!(item_id, "item deleted");
        Ok(())
    }

    pub fn edit_item_text(&mut self, item_id: &str, text: &str) -> Result<(), MutationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MutationError::EmptyText);
        }
        self.modify_item(item_id, |item| item.text = text.to_string())
    }

    /// An empty note is allowed and clears it.
    pub fn edit_item_note(&mut self, item_id: &str, note: &str) -> Result<(), MutationError> {
        self.modify_item(item_id, |item| item.note = note.to_string())
    }

    pub fn edit_item_details(
        &mut self,
        item_id: &str,
        details: ItemDetails,
    ) -> Result<(), MutationError> {
        self.modify_item(item_id, |item| {
            item.weight = sanitize_number(details.weight);
            item.packed = details.packed;
            item.cost = sanitize_number(details.cost);
            item.permit_required = details.permit_required;
            item.regulation_notes = details.regulation_notes;
        })
    }

    /// Sets the checked flag. Checking an item whose requirements are still
    /// unchecked succeeds and queues a reminder listing them.
    pub fn toggle_item_checked(
        &mut self,
        item_id: &str,
        checked: bool,
    ) -> Result<CheckOutcome, MutationError> {
        self.modify_item(item_id, |item| item.checked = checked)?;
        if !checked {
            return Ok(CheckOutcome::default());
        }
        Ok(self.remind_missing(item_id))
    }

    /// Applies any subset of item fields in one undoable step. An empty patch
    /// is a no-op and records nothing. A patch that checks the item reminds
    /// about unchecked requirements the same way a toggle does.
    pub fn update_item(
        &mut self,
        item_id: &str,
        patch: ItemPatch,
    ) -> Result<CheckOutcome, MutationError> {
        if patch.text.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(MutationError::EmptyText);
        }
        if patch.is_empty() {
            self.item_position(item_id)?;
            return Ok(CheckOutcome::default());
        }
        let mut checks = false;
        self.modify_item(item_id, |item| {
            checks = patch.checks(item);
            patch.apply_to(item);
        })?;
        if !checks {
            return Ok(CheckOutcome::default());
        }
        Ok(self.remind_missing(item_id))
    }

    /// Moves an item so it sits immediately before `target_item_id`, in the
    /// target's section.
    pub fn move_item(&mut self, item_id: &str, target_item_id: &str) -> Result<(), MutationError> {
        if item_id == target_item_id {
            return Err(MutationError::SameTarget);
        }
        let (src_section, src_index) = self.item_position(item_id)?;
        let (dst_section, dst_index) = self.item_position(target_item_id)?;

        self.history.record(&self.document);
        let item = self.document.sections[src_section].items.remove(src_index);
        let insert_at = if src_section == dst_section && src_index < dst_index {
            dst_index - 1
        } else {
            dst_index
        };
        self.document.sections[dst_section].items.insert(insert_at, item);
        self.persist_list();
        debug!(item_id, target_item_id, "item moved");
        Ok(())
    }

    /// Removes every checked item. Returns how many were removed; nothing is
    /// recorded or written when no item is checked.
    pub fn clear_completed(&mut self) -> usize {
        let checked = self
            .document
            .sections
            .iter()
            .flat_map(|s| &s.items)
            .filter(|item| item.checked)
            .count();
        if checked == 0 {
            return 0;
        }

        self.history.record(&self.document);
        for section in &mut self.document.sections {
            section.items.retain(|item| !item.checked);
        }
        self.persist_list();
        info!(removed = checked, "completed items cleared");
        checked
    }

    // ========================================================================
    // Sections
    // ========================================================================

    pub fn add_section(&mut self, title: &str) -> Result<Section, MutationError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(MutationError::EmptyTitle);
        }
        self.history.record(&self.document);
        let section = Section::new(SectionId::generate(), title);
        self.document.sections.push(section.clone());
        self.persist_list();
        debug!(section_id = %section.id, "section added");
        Ok(section)
    }

    /// Removes the section with all its items and forgets its collapsed flag.
    pub fn delete_section(&mut self, section_id: &str) -> Result<(), MutationError> {
        let index = self.section_index(section_id)?;
        self.history.record(&self.document);
        let removed = self.document.sections.remove(index);
        let was_collapsed = self.document.collapsed_sections.remove(&removed.id);
        self.persist_list();
        if was_collapsed {
            self.persist_collapsed();
        }
        debug!(section_id, items = removed.items.len(), "section deleted");
        Ok(())
    }

    pub fn rename_section(&mut self, section_id: &str, title: &str) -> Result<(), MutationError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(MutationError::EmptyTitle);
        }
        let index = self.section_index(section_id)?;
        self.history.record(&self.document);
        self.document.sections[index].title = title.to_string();
        self.persist_list();
        Ok(())
    }

    /// Moves a section so it sits immediately before `target_section_id`.
    pub fn move_section(
        &mut self,
        section_id: &str,
        target_section_id: &str,
    ) -> Result<(), MutationError> {
        if section_id == target_section_id {
            return Err(MutationError::SameTarget);
        }
        let src = self.section_index(section_id)?;
        let dst = self.section_index(target_section_id)?;

        self.history.record(&self.document);
        let section = self.document.sections.remove(src);
        let insert_at = if src < dst { dst - 1 } else { dst };
        self.document.sections.insert(insert_at, section);
        self.persist_list();
        debug!(section_id, target_section_id, "section moved");
        Ok(())
    }

    /// Collapsed state is view-only, so unknown ids are accepted as-is.
    pub fn set_collapsed(&mut self, section_id: &str, collapsed: bool) {
        self.history.record(&self.document);
        let id = SectionId::from(section_id);
        if collapsed {
            self.document.collapsed_sections.insert(id);
        } else {
            self.document.collapsed_sections.remove(&id);
        }
        self.persist_collapsed();
    }

    // ========================================================================
    // Trip info and preferences
    // ========================================================================

    /// Replaces the trip info. Dates must be ISO dates (or empty) and the end
    /// date may not precede the start date.
    pub fn update_meta(&mut self, meta: TripMeta) -> Result<(), MutationError> {
        meta.validate_dates()?;

        self.history.record(&self.document);
        self.document.meta = meta;
        if let Err(e) = self.persistence.save_meta(&self.document.meta) {
            self.report(&e);
        }
        Ok(())
    }

    /// Theme changes are not undoable.
    pub fn set_theme(&mut self, theme: Theme) {
        self.document.theme = theme;
        if let Err(e) = self.persistence.save_theme(theme) {
            self.report(&e);
        }
    }

    /// Accepts `system`, `light` or `dark`; anything else is ignored.
    pub fn set_theme_str(&mut self, raw: &str) -> Result<Theme, MutationError> {
        match raw.parse::<Theme>() {
            Ok(theme) => {
                self.set_theme(theme);
                Ok(theme)
            }
            Err(value) => {
                warn!(%value, "invalid theme value ignored");
                Err(MutationError::InvalidTheme(value))
            }
        }
    }

    pub fn set_weight_unit(&mut self, unit: WeightUnit) {
        self.weight_unit = unit;
        if let Err(e) = self.persistence.save_weight_unit(unit) {
            self.report(&e);
        }
    }

    // ========================================================================
    // Whole-document operations
    // ========================================================================

    /// Discards the checklist and trip info and starts again from the
    /// template. Not undoable; existing history entries stay reachable.
    #[instrument(skip_all)]
    pub async fn reset_all<T, D>(&mut self, loader: &TemplateLoader<T, D>)
    where
        T: TemplateTransport,
        D: Delay,
    {
        self.begin_reset();
        let outcome = loader.fetch().await;
        self.finish_reset(outcome);
    }

    /// First half of a reset: forgets the stored list and trip info. The
    /// in-memory document is untouched until [`Self::finish_reset`].
    pub fn begin_reset(&mut self) {
        info!("resetting checklist and trip info");
        self.persistence.clear_list_and_meta();
    }

    /// Second half of a reset: installs the fetched (or built-in) list with
    /// default trip info. Collapsed ids of sections that no longer exist are
    /// dropped.
    pub fn finish_reset(&mut self, outcome: TemplateOutcome) {
        self.notices.extend(outcome.notice);
        self.document.sections = outcome.sections;
        self.document.meta = TripMeta::default();
        if self.document.prune_collapsed() {
            self.persist_collapsed();
        }
        self.persist_list();
        if let Err(e) = self.persistence.save_meta(&self.document.meta) {
            self.report(&e);
        }
        self.list_source = ListSource::Template(outcome.origin);
    }

    /// Restores the previous snapshot and persists it. Returns false when
    /// there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        if !self.history.undo(&mut self.document) {
            return false;
        }
        self.persist_restorable();
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.history.redo(&mut self.document) {
            return false;
        }
        self.persist_restorable();
        true
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn export_json(&self) -> Result<String, TransferError> {
        Bundle::from_document(&self.document).to_json()
    }

    /// Imports an export file. Nothing changes unless the whole file is
    /// valid. History is cleared on success.
    pub fn import_json(&mut self, raw: &str) -> Result<(), TransferError> {
        match Bundle::from_json(raw) {
            Ok(bundle) => {
                self.replace_document(bundle)?;
                self.notices.push(
                    Notice::toast("List imported successfully", NoticeKind::Success)
                        .with_duration(IMPORT_NOTICE_MS),
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "import rejected");
                let message = AppError::from(e.clone()).user_facing_message();
                self.notices.push(Notice::toast(message, NoticeKind::Error));
                Err(e)
            }
        }
    }

    /// Replaces the document wholesale, as a fresh load would. A bundle with
    /// invalid trip dates is rejected before anything changes.
    #[instrument(skip_all, fields(sections = bundle.data.len()))]
    pub fn replace_document(&mut self, bundle: Bundle) -> Result<(), TransferError> {
        bundle.validate()?;
        let theme_changed = bundle
            .parsed_theme()
            .is_some_and(|theme| theme != self.document.theme);
        self.document = bundle.into_document(self.document.theme);
        self.history.clear();
        self.persist_restorable();
        if theme_changed {
            if let Err(e) = self.persistence.save_theme(self.document.theme) {
                self.report(&e);
            }
        }
        info!("document replaced");
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn weight_unit(&self) -> WeightUnit {
        self.weight_unit
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn list_source(&self) -> ListSource {
        self.list_source
    }

    pub fn store(&self) -> &S {
        self.persistence.store()
    }

    pub fn find_item(&self, item_id: &str) -> Option<ItemLocation<'_>> {
        query::find_item(&self.document, item_id)
    }

    pub fn find_section(&self, section_id: &str) -> Option<(usize, &Section)> {
        query::find_section(&self.document, section_id)
    }

    pub fn weight_summary(&self) -> WeightSummary {
        query::weight_summary(&self.document)
    }

    pub fn cost_summary(&self) -> CostSummary {
        query::cost_summary(&self.document)
    }

    pub fn permit_required_items(&self) -> Vec<&Item> {
        query::permit_required_items(&self.document)
    }

    pub fn search(&self, query: &str) -> SearchResult {
        query::search(&self.document, query)
    }

    pub fn days_until_permit_deadline(&self, today: NaiveDate) -> Option<i64> {
        self.document.meta.days_until_permit_deadline(today)
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Hands queued notices to the shell and clears the queue.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub(crate) fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    /// Records a write that failed after the planner handed it off, as a
    /// shell with asynchronous storage reports it.
    pub fn report_save_failure(&mut self, key: &str, error: KvError) {
        match self.persistence.slice_for_key(key) {
            Some(slice) => {
                warn!(%slice, key, error = %error, "deferred save failed");
                self.report(&PersistenceError::from_kv(slice, error));
            }
            None => warn!(key, error = %error, "save failed for an unknown key"),
        }
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            document: self.document.clone(),
            weight_unit: self.weight_unit,
            history: self.history.clone(),
        }
    }

    /// Restores a checkpoint and writes it back, since the interrupted
    /// command may already have saved part of its change.
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.document = checkpoint.document;
        self.weight_unit = checkpoint.weight_unit;
        self.history = checkpoint.history;
        self.persist_restorable();
        if let Err(e) = self.persistence.save_weight_unit(self.weight_unit) {
            self.report(&e);
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn section_index(&self, section_id: &str) -> Result<usize, MutationError> {
        query::locate_section(&self.document, section_id)
            .ok_or_else(|| MutationError::SectionNotFound(section_id.to_string()))
    }

    fn item_position(&self, item_id: &str) -> Result<(usize, usize), MutationError> {
        query::locate_item(&self.document, item_id)
            .ok_or_else(|| MutationError::ItemNotFound(item_id.to_string()))
    }

    fn modify_item(
        &mut self,
        item_id: &str,
        change: impl FnOnce(&mut Item),
    ) -> Result<(), MutationError> {
        let (section, index) = self.item_position(item_id)?;
        self.history.record(&self.document);
        change(&mut self.document.sections[section].items[index]);
        self.persist_list();
        Ok(())
    }

    fn persist_list(&mut self) {
        if let Err(e) = self.persistence.save_list(&self.document.sections) {
            self.report(&e);
        }
    }

    fn persist_collapsed(&mut self) {
        if let Err(e) = self
            .persistence
            .save_collapsed(&self.document.collapsed_sections)
        {
            self.report(&e);
        }
    }

    fn persist_restorable(&mut self) {
        for error in self.persistence.save_restorable(&self.document) {
            self.report(&error);
        }
    }

    fn remind_missing(&mut self, item_id: &str) -> CheckOutcome {
        let missing = query::find_item(&self.document, item_id)
            .map(|loc| query::missing_dependencies(&self.document, loc.item))
            .unwrap_or_default();
        if !missing.is_empty() {
            warn!(item_id, missing = ?missing, "checked item has unchecked requirements");
            self.notices.push(
                Notice::toast(
                    format!("Reminder: You might also need: {}", missing.join(", ")),
                    NoticeKind::Warning,
                )
                .with_duration(DEPENDENCY_REMINDER_MS),
            );
        }
        CheckOutcome {
            missing_dependencies: missing,
        }
    }

    fn report(&mut self, error: &PersistenceError) {
        self.notices.extend(error.notice());
    }
}
