//! Read-only projections over a [`Document`]. Everything here is recomputed
//! on demand; lists are small enough that no incremental state is kept.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::{Document, Item, ItemId, Section, SectionId};

/// Where an item lives in the document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemLocation<'a> {
    pub section: &'a Section,
    pub section_index: usize,
    pub index: usize,
    pub item: &'a Item,
}

#[must_use]
pub fn find_item<'a>(document: &'a Document, item_id: &str) -> Option<ItemLocation<'a>> {
    document
        .sections
        .iter()
        .enumerate()
        .find_map(|(section_index, section)| {
            section
                .items
                .iter()
                .position(|item| item.id.as_str() == item_id)
                .map(|index| ItemLocation {
                    section,
                    section_index,
                    index,
                    item: &section.items[index],
                })
        })
}

#[must_use]
pub fn find_section<'a>(document: &'a Document, section_id: &str) -> Option<(usize, &'a Section)> {
    document
        .sections
        .iter()
        .enumerate()
        .find(|(_, section)| section.id.as_str() == section_id)
}

/// Index pair `(section, item)` for mutation code that needs `&mut` access.
pub(crate) fn locate_item(document: &Document, item_id: &str) -> Option<(usize, usize)> {
    find_item(document, item_id).map(|loc| (loc.section_index, loc.index))
}

pub(crate) fn locate_section(document: &Document, section_id: &str) -> Option<usize> {
    find_section(document, section_id).map(|(index, _)| index)
}

// ============================================================================
// Weight
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionWeight {
    pub section_id: SectionId,
    pub title: String,
    pub total_g: f64,
    pub packed_g: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WeightSummary {
    pub total_g: f64,
    pub packed_g: f64,
    pub sections: Vec<SectionWeight>,
}

#[must_use]
pub fn weight_summary(document: &Document) -> WeightSummary {
    let sections: Vec<SectionWeight> = document
        .sections
        .iter()
        .map(|section| {
            let (total_g, packed_g) =
                section
                    .items
                    .iter()
                    .fold((0.0, 0.0), |(total, packed), item| {
                        let weight = item.weight;
                        (total + weight, if item.packed { packed + weight } else { packed })
                    });
            SectionWeight {
                section_id: section.id.clone(),
                title: section.title.clone(),
                total_g,
                packed_g,
            }
        })
        .collect();

    WeightSummary {
        total_g: sections.iter().map(|s| s.total_g).sum(),
        packed_g: sections.iter().map(|s| s.packed_g).sum(),
        sections,
    }
}

// ============================================================================
// Cost
// ============================================================================

pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CostSummary {
    pub total: f64,
    /// Keyed by section title, sorted. Only titles with a positive total appear.
    pub by_section: BTreeMap<String, f64>,
}

#[must_use]
pub fn cost_summary(document: &Document) -> CostSummary {
    let mut by_section: BTreeMap<String, f64> = BTreeMap::new();
    for section in &document.sections {
        let title = if section.title.trim().is_empty() {
            UNCATEGORIZED.to_string()
        } else {
            section.title.clone()
        };
        let subtotal: f64 = section.items.iter().map(|item| item.cost).sum();
        *by_section.entry(title).or_insert(0.0) += subtotal;
    }
    by_section.retain(|_, cost| *cost > 0.0);

    CostSummary {
        total: document
            .sections
            .iter()
            .flat_map(|s| &s.items)
            .map(|item| item.cost)
            .sum(),
        by_section,
    }
}

// ============================================================================
// Permits, dependencies, search
// ============================================================================

#[must_use]
pub fn permit_required_items(document: &Document) -> Vec<&Item> {
    document
        .sections
        .iter()
        .flat_map(|s| &s.items)
        .filter(|item| item.permit_required)
        .collect()
}

/// Texts of the unchecked items that `item` requires. Dangling ids are skipped.
#[must_use]
pub fn missing_dependencies(document: &Document, item: &Item) -> Vec<String> {
    item.requires
        .iter()
        .filter_map(|id| find_item(document, id.as_str()))
        .filter(|loc| !loc.item.checked)
        .map(|loc| loc.item.text.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SearchResult {
    /// Matching item ids in document order.
    pub item_ids: Vec<ItemId>,
    /// Number of matches per section, in document order.
    pub per_section: Vec<(SectionId, usize)>,
}

impl SearchResult {
    #[must_use]
    pub fn matches(&self, item_id: &str) -> bool {
        self.item_ids.iter().any(|id| id.as_str() == item_id)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.item_ids.len()
    }
}

/// Case-insensitive substring filter over item text and note.
#[must_use]
pub fn search(document: &Document, query: &str) -> SearchResult {
    let needle = query.trim().to_lowercase();
    let mut result = SearchResult::default();

    for section in &document.sections {
        let before = result.item_ids.len();
        result.item_ids.extend(
            section
                .items
                .iter()
                .filter(|item| {
                    needle.is_empty()
                        || item.text.to_lowercase().contains(&needle)
                        || item.note.to_lowercase().contains(&needle)
                })
                .map(|item| item.id.clone()),
        );
        result
            .per_section
            .push((section.id.clone(), result.item_ids.len() - before));
    }

    result
}
