//! Serializable commands for shells that drive the planner by message.

use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::capabilities::KeyValueStore;
use crate::model::{TripMeta, WeightUnit};
use crate::planner::{ItemDetails, ItemPatch, Planner};
use crate::{AppError, ErrorKind, Notice, NoticeKind};

/// One user action. Resetting needs the template and goes through
/// [`Planner::reset_all`], or the app's reset event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    AddItem { section_id: String, text: String },
    DeleteItem { item_id: String },
    EditItemText { item_id: String, text: String },
    EditItemNote { item_id: String, note: String },
    EditItemDetails { item_id: String, details: ItemDetails },
    ToggleItemChecked { item_id: String, checked: bool },
    UpdateItem { item_id: String, patch: ItemPatch },
    MoveItem { item_id: String, target_item_id: String },
    AddSection { title: String },
    DeleteSection { section_id: String },
    RenameSection { section_id: String, title: String },
    MoveSection { section_id: String, target_section_id: String },
    SetCollapsed { section_id: String, collapsed: bool },
    UpdateMeta { meta: TripMeta },
    SetTheme { theme: String },
    SetWeightUnit { unit: WeightUnit },
    ClearCompleted,
    Undo,
    Redo,
    Import { json: String },
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddItem { .. } => "add_item",
            Self::DeleteItem { .. } => "delete_item",
            Self::EditItemText { .. } => "edit_item_text",
            Self::EditItemNote { .. } => "edit_item_note",
            Self::EditItemDetails { .. } => "edit_item_details",
            Self::ToggleItemChecked { .. } => "toggle_item_checked",
            Self::UpdateItem { .. } => "update_item",
            Self::MoveItem { .. } => "move_item",
            Self::AddSection { .. } => "add_section",
            Self::DeleteSection { .. } => "delete_section",
            Self::RenameSection { .. } => "rename_section",
            Self::MoveSection { .. } => "move_section",
            Self::SetCollapsed { .. } => "set_collapsed",
            Self::UpdateMeta { .. } => "update_meta",
            Self::SetTheme { .. } => "set_theme",
            Self::SetWeightUnit { .. } => "set_weight_unit",
            Self::ClearCompleted => "clear_completed",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Import { .. } => "import",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    Done,
    Created { id: String },
    Checked { missing_dependencies: Vec<String> },
    Cleared { removed: usize },
    /// Undo or redo with nothing to apply.
    Unchanged,
    Rejected { error: AppError },
    /// The command panicked; state was rolled back to before it ran.
    Failed { error: AppError },
}

impl CommandOutcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        !matches!(
            self,
            Self::Unchanged | Self::Rejected { .. } | Self::Failed { .. }
        )
    }
}

fn rejected(error: impl Into<AppError>) -> CommandOutcome {
    CommandOutcome::Rejected {
        error: error.into(),
    }
}

impl<S: KeyValueStore> Planner<S> {
    /// Runs one command. If it panics part-way, the document, the weight unit
    /// and the history are restored to their state before the call, written
    /// back to the store, and an error notice is queued.
    pub fn dispatch(&mut self, command: Command) -> CommandOutcome {
        let name = command.name();
        debug!(command = name, "dispatching");
        let checkpoint = self.checkpoint();

        match panic::catch_unwind(AssertUnwindSafe(|| self.apply(command))) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(command = name, "command panicked, state rolled back");
                self.rollback(checkpoint);
                let error = AppError::new(ErrorKind::Internal, format!("{name} failed"));
                self.push_notice(Notice::toast(error.user_facing_message(), NoticeKind::Error));
                CommandOutcome::Failed { error }
            }
        }
    }

    fn apply(&mut self, command: Command) -> CommandOutcome {
        match command {
            Command::AddItem { section_id, text } => match self.add_item(&section_id, &text) {
                Ok(item) => CommandOutcome::Created {
                    id: item.id.to_string(),
                },
                Err(e) => rejected(e),
            },
            Command::DeleteItem { item_id } => self.delete_item(&item_id).into(),
            Command::EditItemText { item_id, text } => self.edit_item_text(&item_id, &text).into(),
            Command::EditItemNote { item_id, note } => self.edit_item_note(&item_id, &note).into(),
            Command::EditItemDetails { item_id, details } => {
                self.edit_item_details(&item_id, details).into()
            }
            Command::ToggleItemChecked { item_id, checked } => {
                match self.toggle_item_checked(&item_id, checked) {
                    Ok(outcome) => CommandOutcome::Checked {
                        missing_dependencies: outcome.missing_dependencies,
                    },
                    Err(e) => rejected(e),
                }
            }
            Command::UpdateItem { item_id, patch } => match self.update_item(&item_id, patch) {
                Ok(outcome) if !outcome.missing_dependencies.is_empty() => {
                    CommandOutcome::Checked {
                        missing_dependencies: outcome.missing_dependencies,
                    }
                }
                Ok(_) => CommandOutcome::Done,
                Err(e) => rejected(e),
            },
            Command::MoveItem {
                item_id,
                target_item_id,
            } => self.move_item(&item_id, &target_item_id).into(),
            Command::AddSection { title } => match self.add_section(&title) {
                Ok(section) => CommandOutcome::Created {
                    id: section.id.to_string(),
                },
                Err(e) => rejected(e),
            },
            Command::DeleteSection { section_id } => self.delete_section(&section_id).into(),
            Command::RenameSection { section_id, title } => {
                self.rename_section(&section_id, &title).into()
            }
            Command::MoveSection {
                section_id,
                target_section_id,
            } => self.move_section(&section_id, &target_section_id).into(),
            Command::SetCollapsed {
                section_id,
                collapsed,
            } => {
                self.set_collapsed(&section_id, collapsed);
                CommandOutcome::Done
            }
            Command::UpdateMeta { meta } => self.update_meta(meta).into(),
            Command::SetTheme { theme } => match self.set_theme_str(&theme) {
                Ok(_) => CommandOutcome::Done,
                Err(e) => rejected(e),
            },
            Command::SetWeightUnit { unit } => {
                self.set_weight_unit(unit);
                CommandOutcome::Done
            }
            Command::ClearCompleted => CommandOutcome::Cleared {
                removed: self.clear_completed(),
            },
            Command::Undo => applied_or_unchanged(self.undo()),
            Command::Redo => applied_or_unchanged(self.redo()),
            Command::Import { json } => match self.import_json(&json) {
                Ok(()) => CommandOutcome::Done,
                Err(e) => rejected(e),
            },
        }
    }
}

fn applied_or_unchanged(applied: bool) -> CommandOutcome {
    if applied {
        CommandOutcome::Done
    } else {
        CommandOutcome::Unchanged
    }
}

impl<E: Into<AppError>> From<Result<(), E>> for CommandOutcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Done,
            Err(e) => rejected(e),
        }
    }
}
