use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

use crate::{GRAMS_PER_KILOGRAM, GRAMS_PER_POUND, PERMIT_DEADLINE_WARNING_DAYS};

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn generate() -> Self {
                Self(format!("{}-{}", $prefix, Uuid::new_v4().simple()))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

typed_id!(ItemId, "item");
typed_id!(SectionId, "section");

// --- Lenient decoding for data written by older versions ---

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Numbers were historically written by form inputs, so strings and nulls show
/// up in stored lists. Anything unparsable reads as zero.
fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let number = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_number_or_zero(&s),
        _ => 0.0,
    };
    Ok(sanitize_number(number))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

/// Flags written as `"true"`/`"false"` strings or as 0/1 are read by value;
/// anything else is false.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n.abs() > f64::EPSILON),
        Some(Value::String(s)) => matches!(s.trim(), "true" | "1"),
        _ => false,
    })
}

/// Keeps the string and numeric entries of a `requires` array.
fn lenient_ids<'de, D>(deserializer: D) -> Result<Vec<ItemId>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::Array(entries)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(ItemId(s)),
            Value::Number(n) => Some(ItemId(n.to_string())),
            _ => None,
        })
        .collect())
}

/// Parses a form value the way a loose numeric input is read: surrounding
/// whitespace is ignored and anything that is not a finite number becomes 0.
#[must_use]
pub fn parse_number_or_zero(raw: &str) -> f64 {
    sanitize_number(raw.trim().parse::<f64>().unwrap_or(0.0))
}

#[must_use]
pub fn sanitize_number(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

// --- Checklist ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub text: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub checked: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub note: String,
    /// Soft references; ids that no longer exist are ignored by dependency checks.
    #[serde(default, deserialize_with = "lenient_ids")]
    pub requires: Vec<ItemId>,
    /// Grams.
    #[serde(default, deserialize_with = "lenient_number")]
    pub weight: f64,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub packed: bool,
    #[serde(default, deserialize_with = "lenient_number")]
    pub cost: f64,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub permit_required: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub regulation_notes: String,
}

impl Item {
    #[must_use]
    pub fn new(id: ItemId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            checked: false,
            note: String::new(),
            requires: Vec::new(),
            weight: 0.0,
            packed: false,
            cost: 0.0,
            permit_required: false,
            regulation_notes: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<Item>,
}

impl Section {
    #[must_use]
    pub fn new(id: SectionId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            items: Vec::new(),
        }
    }
}

/// The minimal list used when neither storage nor the remote template can
/// provide one.
#[must_use]
pub fn fallback_sections() -> Vec<Section> {
    let mut general = Section::new(SectionId::new("general"), "General");
    general.items.push(Item::new(ItemId::new("tent"), "Tent"));
    vec![general]
}

/// A decoded checklist plus whether any entry had to be repaired or dropped
/// to get there.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSections {
    pub sections: Vec<Section>,
    pub repaired: bool,
}

/// Decodes a stored or fetched checklist. Missing optional item fields are
/// filled with their defaults, so the result is already normalized.
pub fn decode_sections(raw: &[u8]) -> Result<Vec<Section>, serde_json::Error> {
    decode_sections_repaired(raw).map(|decoded| decoded.sections)
}

/// Fails only when `raw` is not a JSON array. Entries that are not objects
/// are dropped, missing or numeric ids are replaced with generated or string
/// ids, and scalar fields of the wrong type are coerced, so one bad item never
/// costs the rest of the list.
pub fn decode_sections_repaired(raw: &[u8]) -> Result<DecodedSections, serde_json::Error> {
    let entries: Vec<Value> = serde_json::from_slice(raw)?;
    let mut repaired = false;
    let mut sections = Vec::with_capacity(entries.len());

    for entry in entries {
        let Value::Object(mut fields) = entry else {
            warn!("dropping checklist section that is not an object");
            repaired = true;
            continue;
        };
        repaired |= ensure_id(&mut fields, || SectionId::generate().0);
        repaired |= repair_items(&mut fields);

        match serde_json::from_value::<Section>(Value::Object(fields)) {
            Ok(section) => sections.push(section),
            Err(e) => {
                warn!(error = %e, "dropping unreadable checklist section");
                repaired = true;
            }
        }
    }

    Ok(DecodedSections { sections, repaired })
}

fn ensure_id(fields: &mut Map<String, Value>, generate: impl FnOnce() -> String) -> bool {
    let id = match fields.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => return false,
        Some(Value::Number(n)) => n.to_string(),
        _ => generate(),
    };
    warn!(%id, "checklist entry had no usable id");
    fields.insert("id".into(), Value::String(id));
    true
}

fn repair_items(fields: &mut Map<String, Value>) -> bool {
    let items = match fields.remove("items") {
        None | Some(Value::Null) => return false,
        Some(Value::Array(items)) => items,
        Some(_) => {
            warn!("section items are not a list, dropping them");
            fields.insert("items".into(), Value::Array(Vec::new()));
            return true;
        }
    };

    let mut repaired = false;
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(mut item) => {
                repaired |= ensure_id(&mut item, || ItemId::generate().0);
                kept.push(Value::Object(item));
            }
            _ => {
                warn!("dropping checklist item that is not an object");
                repaired = true;
            }
        }
    }
    fields.insert("items".into(), Value::Array(kept));
    repaired
}

// --- Trip metadata ---

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TripMeta {
    #[serde(deserialize_with = "lenient_string")]
    pub destination: String,
    #[serde(deserialize_with = "lenient_string")]
    pub destination_address: String,
    #[serde(deserialize_with = "lenient_string")]
    pub destination_place_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub destination_lat: String,
    #[serde(deserialize_with = "lenient_string")]
    pub destination_lng: String,
    #[serde(deserialize_with = "lenient_string")]
    pub start_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub end_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub notes: String,
    #[serde(deserialize_with = "lenient_string")]
    pub permit_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub permit_deadline: String,
    #[serde(deserialize_with = "lenient_string")]
    pub fire_rules: String,
}

/// A date field that is present but not an ISO `YYYY-MM-DD` date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDate {
    pub field: &'static str,
    pub value: String,
}

/// Why a trip's dates cannot be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateProblem {
    Malformed(InvalidDate),
    EndBeforeStart,
}

impl From<InvalidDate> for DateProblem {
    fn from(error: InvalidDate) -> Self {
        Self::Malformed(error)
    }
}

impl fmt::Display for DateProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(InvalidDate { field, value }) => {
                write!(f, "{field} is not a valid date: '{value}'")
            }
            Self::EndBeforeStart => f.write_str("End date cannot be before the start date."),
        }
    }
}

fn parse_optional_date(
    field: &'static str,
    value: &str,
) -> Result<Option<NaiveDate>, InvalidDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    NaiveDate::from_str(trimmed)
        .map(Some)
        .map_err(|_| InvalidDate {
            field,
            value: value.to_string(),
        })
}

impl TripMeta {
    pub fn start(&self) -> Result<Option<NaiveDate>, InvalidDate> {
        parse_optional_date("startDate", &self.start_date)
    }

    pub fn end(&self) -> Result<Option<NaiveDate>, InvalidDate> {
        parse_optional_date("endDate", &self.end_date)
    }

    pub fn permit_deadline_date(&self) -> Result<Option<NaiveDate>, InvalidDate> {
        parse_optional_date("permitDeadline", &self.permit_deadline)
    }

    /// Every date must be empty or ISO, and the end may not precede the start.
    pub fn validate_dates(&self) -> Result<(), DateProblem> {
        let start = self.start()?;
        let end = self.end()?;
        self.permit_deadline_date()?;
        match (start, end) {
            (Some(start), Some(end)) if end < start => Err(DateProblem::EndBeforeStart),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn days_until_permit_deadline(&self, today: NaiveDate) -> Option<i64> {
        let deadline = self.permit_deadline_date().ok().flatten()?;
        Some(deadline.signed_duration_since(today).num_days())
    }

    #[must_use]
    pub fn permit_deadline_is_near(&self, today: NaiveDate) -> bool {
        self.days_until_permit_deadline(today)
            .is_some_and(|days| (0..=PERMIT_DEADLINE_WARNING_DAYS).contains(&days))
    }
}

// --- Preferences ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

impl Theme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "system" => Ok(Self::System),
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display unit for weights. Items always store grams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    #[default]
    G,
    Kg,
    Lb,
}

impl WeightUnit {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::G => "g",
            Self::Kg => "kg",
            Self::Lb => "lb",
        }
    }

    /// Grams are rounded to whole numbers, kilograms and pounds to two decimals.
    #[must_use]
    pub fn from_grams(self, grams: f64) -> f64 {
        match self {
            Self::G => grams.round(),
            Self::Kg => round_two_places(grams / GRAMS_PER_KILOGRAM),
            Self::Lb => round_two_places(grams / GRAMS_PER_POUND),
        }
    }

    #[must_use]
    pub fn format(self, grams: f64) -> String {
        match self {
            Self::G => format!("{}g", self.from_grams(grams)),
            Self::Kg | Self::Lb => format!("{:.2}{}", self.from_grams(grams), self.as_str()),
        }
    }
}

fn round_two_places(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl FromStr for WeightUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "g" => Ok(Self::G),
            "kg" => Ok(Self::Kg),
            "lb" => Ok(Self::Lb),
            other => Err(other.to_string()),
        }
    }
}

// --- Document ---

/// Everything the planner holds in memory for one trip.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub sections: Vec<Section>,
    pub meta: TripMeta,
    pub collapsed_sections: BTreeSet<SectionId>,
    pub theme: Theme,
}

impl Document {
    #[must_use]
    pub fn new(sections: Vec<Section>, meta: TripMeta) -> Self {
        Self {
            sections,
            meta,
            collapsed_sections: BTreeSet::new(),
            theme: Theme::System,
        }
    }

    #[must_use]
    pub fn fallback() -> Self {
        Self::new(fallback_sections(), TripMeta::default())
    }

    #[must_use]
    pub fn is_collapsed(&self, section_id: &str) -> bool {
        self.collapsed_sections.contains(&SectionId::from(section_id))
    }

    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    /// Forgets collapsed flags of sections that no longer exist. Returns true
    /// when anything was removed.
    pub fn prune_collapsed(&mut self) -> bool {
        let before = self.collapsed_sections.len();
        let sections = &self.sections;
        self.collapsed_sections
            .retain(|id| sections.iter().any(|section| &section.id == id));
        self.collapsed_sections.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_prefixed_and_distinct() {
        let a = ItemId::generate();
        let b = ItemId::generate();
        assert!(a.as_str().starts_with("item-"));
        assert!(SectionId::generate().as_str().starts_with("section-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&ItemId::new("tent")).unwrap();
        assert_eq!(json, "\"tent\"");
    }

    #[test]
    fn test_legacy_item_gets_defaults() {
        let raw = br#"[{"id":"general","title":"General","items":[
            {"id":"tent","text":"Tent","checked":false,"note":""}
        ]}]"#;
        let sections = decode_sections(raw).unwrap();
        let item = &sections[0].items[0];
        assert!(item.requires.is_empty());
        assert_eq!(item.weight, 0.0);
        assert!(!item.packed);
        assert_eq!(item.cost, 0.0);
        assert!(!item.permit_required);
        assert_eq!(item.regulation_notes, "");
        assert_eq!(sections, fallback_sections());
    }

    #[test]
    fn test_numeric_strings_and_nulls_are_coerced() {
        let raw = br#"[{"id":"s","title":"S","items":[
            {"id":"a","text":"A","weight":"450","cost":"abc"},
            {"id":"b","text":"B","weight":null,"cost":12.5,"note":null}
        ]}]"#;
        let sections = decode_sections(raw).unwrap();
        assert_eq!(sections[0].items[0].weight, 450.0);
        assert_eq!(sections[0].items[0].cost, 0.0);
        assert_eq!(sections[0].items[1].weight, 0.0);
        assert_eq!(sections[0].items[1].cost, 12.5);
        assert_eq!(sections[0].items[1].note, "");
    }

    #[test]
    fn test_wrongly_typed_item_fields_are_coerced() {
        let raw = br#"[{"id":"s","title":"S","items":[
            {"id":"a","text":"A","checked":"false","packed":"true","permitRequired":1},
            {"id":"b","text":42,"checked":{"nested":true},"requires":"fuel","note":["x"]},
            {"id":"c","text":"C","requires":["a",7,null,{"id":"b"}]}
        ]}]"#;
        let decoded = decode_sections_repaired(raw).unwrap();
        assert!(!decoded.repaired);
        let items = &decoded.sections[0].items;
        assert!(!items[0].checked);
        assert!(items[0].packed);
        assert!(items[0].permit_required);
        assert_eq!(items[1].text, "42");
        assert!(!items[1].checked);
        assert!(items[1].requires.is_empty());
        assert_eq!(items[1].note, "");
        assert_eq!(items[2].requires, vec![ItemId::new("a"), ItemId::new("7")]);
    }

    #[test]
    fn test_bad_entries_are_repaired_or_dropped() {
        let raw = br#"[
            {"id":"s","title":"S","items":[
                {"id":"a","text":"A","checked":true},
                "stray",
                {"text":"No id"},
                {"id":12,"text":"Numeric id"}
            ]},
            17,
            {"title":"Untitled id","items":{"oops":true}}
        ]"#;
        let decoded = decode_sections_repaired(raw).unwrap();
        assert!(decoded.repaired);
        assert_eq!(decoded.sections.len(), 2);

        let items = &decoded.sections[0].items;
        assert_eq!(items.len(), 3);
        assert!(items[0].checked);
        assert!(items[1].id.as_str().starts_with("item-"));
        assert_eq!(items[1].text, "No id");
        assert_eq!(items[2].id.as_str(), "12");

        let second = &decoded.sections[1];
        assert!(second.id.as_str().starts_with("section-"));
        assert!(second.items.is_empty());
    }

    #[test]
    fn test_item_serializes_camel_case() {
        let mut item = Item::new(ItemId::new("permit"), "Fire permit");
        item.permit_required = true;
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["permitRequired"], serde_json::json!(true));
        assert_eq!(value["regulationNotes"], serde_json::json!(""));
    }

    #[test]
    fn test_non_array_checklist_is_rejected() {
        assert!(decode_sections(b"{\"id\":\"x\"}").is_err());
        assert!(decode_sections(b"not json").is_err());
    }

    #[test]
    fn test_meta_missing_fields_default() {
        let meta: TripMeta =
            serde_json::from_str(r#"{"destination":"Yosemite","startDate":"2025-07-01"}"#).unwrap();
        assert_eq!(meta.destination, "Yosemite");
        assert_eq!(meta.permit_url, "");
        assert_eq!(meta.destination_lat, "");
    }

    #[test]
    fn test_meta_numeric_coordinates_become_strings() {
        let meta: TripMeta =
            serde_json::from_str(r#"{"destinationLat":37.74,"destinationLng":-119.58}"#).unwrap();
        assert_eq!(meta.destination_lat, "37.74");
        assert_eq!(meta.destination_lng, "-119.58");
    }

    #[test]
    fn test_validate_dates() {
        let mut meta = TripMeta {
            start_date: "2025-07-10".into(),
            end_date: "2025-07-05".into(),
            ..TripMeta::default()
        };
        assert_eq!(meta.validate_dates(), Err(DateProblem::EndBeforeStart));
        meta.end_date = "2025-07-12".into();
        assert_eq!(meta.validate_dates(), Ok(()));
        meta.permit_deadline = "soon".into();
        assert!(matches!(
            meta.validate_dates(),
            Err(DateProblem::Malformed(InvalidDate { field: "permitDeadline", .. }))
        ));
    }

    #[test]
    fn test_prune_collapsed_keeps_existing_sections() {
        let mut doc = Document::fallback();
        doc.collapsed_sections.insert(SectionId::new("general"));
        assert!(!doc.prune_collapsed());
        doc.collapsed_sections.insert(SectionId::new("gone"));
        assert!(doc.prune_collapsed());
        assert_eq!(doc.collapsed_sections.len(), 1);
        assert!(doc.is_collapsed("general"));
    }

    #[test]
    fn test_permit_deadline_proximity() {
        let meta = TripMeta {
            permit_deadline: "2025-06-20".into(),
            ..TripMeta::default()
        };
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        assert_eq!(meta.days_until_permit_deadline(today), Some(10));
        assert!(meta.permit_deadline_is_near(today));

        let later = NaiveDate::from_ymd_opt(2025, 6, 25).unwrap();
        assert!(!meta.permit_deadline_is_near(later));
        assert!(!TripMeta::default().permit_deadline_is_near(today));
    }

    #[test]
    fn test_theme_parsing() {
        assert_eq!("dark".parse::<Theme>(), Ok(Theme::Dark));
        assert_eq!(" light ".parse::<Theme>(), Ok(Theme::Light));
        assert!("purple".parse::<Theme>().is_err());
        assert_eq!(Theme::default(), Theme::System);
    }

    #[test]
    fn test_weight_unit_conversion() {
        assert_eq!(WeightUnit::G.from_grams(1234.4), 1234.0);
        assert_eq!(WeightUnit::Kg.from_grams(1500.0), 1.5);
        assert_eq!(WeightUnit::Lb.from_grams(453.592), 1.0);
        assert_eq!(WeightUnit::Kg.format(1500.0), "1.50kg");
        assert_eq!(WeightUnit::G.format(250.0), "250g");
        assert_eq!(WeightUnit::Lb.format(907.184), "2.00lb");
    }

    #[test]
    fn test_parse_number_or_zero() {
        assert_eq!(parse_number_or_zero(" 12.5 "), 12.5);
        assert_eq!(parse_number_or_zero(""), 0.0);
        assert_eq!(parse_number_or_zero("heavy"), 0.0);
        assert_eq!(parse_number_or_zero("inf"), 0.0);
    }

    #[test]
    fn test_fallback_document_shape() {
        let doc = Document::fallback();
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].id.as_str(), "general");
        assert_eq!(doc.sections[0].items[0].text, "Tent");
        assert_eq!(doc.theme, Theme::System);
        assert!(doc.collapsed_sections.is_empty());
    }
}
