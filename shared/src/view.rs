//! Render-ready projection of the planner state.

use chrono::{DateTime, NaiveDate};
use serde::Serialize;

use crate::capabilities::KeyValueStore;
use crate::history::History;
use crate::model::{Document, Item, ItemId, SectionId, Theme, TripMeta, WeightUnit};
use crate::planner::Planner;
use crate::query::{self, CostSummary};
use crate::get_current_time_ms;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemView {
    pub id: ItemId,
    pub text: String,
    pub checked: bool,
    pub note: String,
    pub packed: bool,
    pub weight: String,
    pub cost: f64,
    pub permit_required: bool,
    pub regulation_notes: String,
    pub requires: Vec<ItemId>,
}

impl ItemView {
    fn new(item: &Item, unit: WeightUnit) -> Self {
        Self {
            id: item.id.clone(),
            text: item.text.clone(),
            checked: item.checked,
            note: item.note.clone(),
            packed: item.packed,
            weight: unit.format(item.weight),
            cost: item.cost,
            permit_required: item.permit_required,
            regulation_notes: item.regulation_notes.clone(),
            requires: item.requires.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionView {
    pub id: SectionId,
    pub title: String,
    pub collapsed: bool,
    pub checked_count: usize,
    pub items: Vec<ItemView>,
    pub weight: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub sections: Vec<SectionView>,
    pub meta: TripMeta,
    pub theme: Theme,
    pub weight_unit: WeightUnit,
    pub can_undo: bool,
    pub can_redo: bool,
    pub total_weight: String,
    pub packed_weight: String,
    pub cost: CostSummary,
    pub permit_items: Vec<ItemId>,
    pub days_until_permit_deadline: Option<i64>,
    pub permit_deadline_near: bool,
}

impl ViewModel {
    #[must_use]
    pub fn build(
        document: &Document,
        unit: WeightUnit,
        history: &History,
        today: NaiveDate,
    ) -> Self {
        let weight = query::weight_summary(document);
        let sections = document
            .sections
            .iter()
            .zip(&weight.sections)
            .map(|(section, section_weight)| SectionView {
                id: section.id.clone(),
                title: section.title.clone(),
                collapsed: document.collapsed_sections.contains(&section.id),
                checked_count: section.items.iter().filter(|i| i.checked).count(),
                items: section.items.iter().map(|i| ItemView::new(i, unit)).collect(),
                weight: unit.format(section_weight.total_g),
            })
            .collect();

        Self {
            sections,
            meta: document.meta.clone(),
            theme: document.theme,
            weight_unit: unit,
            can_undo: history.can_undo(),
            can_redo: history.can_redo(),
            total_weight: unit.format(weight.total_g),
            packed_weight: unit.format(weight.packed_g),
            cost: query::cost_summary(document),
            permit_items: query::permit_required_items(document)
                .into_iter()
                .map(|i| i.id.clone())
                .collect(),
            days_until_permit_deadline: document.meta.days_until_permit_deadline(today),
            permit_deadline_near: document.meta.permit_deadline_is_near(today),
        }
    }
}

/// Today's date in UTC, from the host clock.
#[must_use]
pub fn today() -> NaiveDate {
    i64::try_from(get_current_time_ms())
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map_or(NaiveDate::MIN, |dt| dt.date_naive())
}

impl<S: KeyValueStore> Planner<S> {
    pub fn view(&self) -> ViewModel {
        self.view_at(today())
    }

    pub fn view_at(&self, today: NaiveDate) -> ViewModel {
        ViewModel::build(self.document(), self.weight_unit(), self.history(), today)
    }
}
