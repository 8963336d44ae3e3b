//! Request parameters.
//!
//! Commands arrive as a flat string map. [`BeginRequest::parse`] turns it
//! into a typed request, including the `selectedItems` JSON object whose keys
//! look like `itemForRequirement4836935344586752` and whose values are an item
//! id, or `""` to leave the slot to automatic resolution.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::entity::EntityKey;
use crate::error::ValidationError;
use crate::resolver::SlotSelection;

/// Parameter carrying the client's slot overrides.
pub const SELECTED_ITEMS: &str = "selectedItems";

const SELECTION_KEY_PATTERN: &str = r"^itemForRequirement(\d+)$";

static SELECTION_KEY: OnceLock<Regex> = OnceLock::new();

fn selection_key() -> Result<&'static Regex, ValidationError> {
    if let Some(re) = SELECTION_KEY.get() {
        return Ok(re);
    }
    let compiled = Regex::new(SELECTION_KEY_PATTERN)
        .map_err(|e| ValidationError::malformed(SELECTED_ITEMS, format!("key pattern: {e}")))?;
    Ok(SELECTION_KEY.get_or_init(|| compiled))
}

/// Typed `begin` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginRequest {
    /// Id of the subject entity (idea or skill, depending on the kind).
    pub subject_id: u64,
    pub selections: Vec<SlotSelection>,
}

impl BeginRequest {
    #[must_use]
    pub const fn new(subject_id: u64) -> Self {
        Self {
            subject_id,
            selections: Vec::new(),
        }
    }

    /// Pins `item_id` to the requirement, or with `None` asks for the
    /// automatic choice.
    #[must_use]
    pub fn select(mut self, requirement_id: u64, item_id: Option<u64>) -> Self {
        self.selections.push(SlotSelection {
            slot: EntityKey::requirement(requirement_id),
            chosen: item_id.map(EntityKey::item),
        });
        self
    }

    /// Parses `params`, reading the subject id from `subject_param`.
    ///
    /// # Errors
    /// `MalformedInput` if the subject id is missing or not numeric, or if
    /// `selectedItems` is not an object of well-formed selections.
    pub fn parse(subject_param: &str, params: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let raw = params
            .get(subject_param)
            .ok_or_else(|| ValidationError::malformed(subject_param, "missing"))?;
        let subject_id = parse_id(subject_param, raw)?;
        let selections = match params.get(SELECTED_ITEMS) {
            Some(raw) if !raw.trim().is_empty() => parse_selected_items(raw)?,
            _ => Vec::new(),
        };
        Ok(Self {
            subject_id,
            selections,
        })
    }
}

fn parse_id(field: &str, raw: &str) -> Result<u64, ValidationError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ValidationError::malformed(field, format!("'{raw}' is not a numeric id")))
}

/// Decodes the `selectedItems` object into slot selections, in key order.
///
/// # Errors
/// `MalformedInput` for invalid JSON, a non-object, a key not of the form
/// `itemForRequirement<id>`, or a value that is neither `""` nor an id.
pub fn parse_selected_items(raw: &str) -> Result<Vec<SlotSelection>, ValidationError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| ValidationError::malformed(SELECTED_ITEMS, format!("invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| ValidationError::malformed(SELECTED_ITEMS, "expected a JSON object"))?;
    let pattern = selection_key()?;

    let mut selections = Vec::with_capacity(object.len());
    for (key, value) in object {
        let requirement_id = pattern
            .captures(key)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .ok_or_else(|| {
                ValidationError::malformed(SELECTED_ITEMS, format!("unexpected key '{key}'"))
            })?;
        let chosen = match value {
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(parse_id(key, s)?),
            serde_json::Value::Number(n) => Some(n.as_u64().ok_or_else(|| {
                ValidationError::malformed(key.as_str(), format!("'{n}' is not a valid item id"))
            })?),
            other => {
                return Err(ValidationError::malformed(
                    key.as_str(),
                    format!("expected an item id or \"\", got {other}"),
                ))
            }
        };
        selections.push(SlotSelection {
            slot: EntityKey::requirement(requirement_id),
            chosen: chosen.map(EntityKey::item),
        });
    }
    Ok(selections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_parse_subject_only() {
        let request = BeginRequest::parse("ideaId", &params(&[("ideaId", "42")])).unwrap();
        assert_eq!(request, BeginRequest::new(42));
    }

    #[test]
    fn test_missing_or_non_numeric_subject() {
        let err = BeginRequest::parse("ideaId", &params(&[])).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedInput { ref field, .. } if field == "ideaId"));

        let err = BeginRequest::parse("ideaId", &params(&[("ideaId", "forty-two")])).unwrap_err();
        assert!(err.to_string().contains("forty-two"));
    }

    #[test]
    fn test_selected_items() {
        let request = BeginRequest::parse(
            "ideaId",
            &params(&[
                ("ideaId", "42"),
                (
                    "selectedItems",
                    r#"{"itemForRequirement3": "7", "itemForRequirement5": "", "itemForRequirement8": 11}"#,
                ),
            ]),
        )
        .unwrap();
        let expected = BeginRequest::new(42)
            .select(3, Some(7))
            .select(5, None)
            .select(8, Some(11));
        assert_eq!(request, expected);
    }

    #[test]
    fn test_rejects_bad_selection_keys_and_values() {
        for raw in [
            r#"{"itemFor3": "7"}"#,
            r#"{"itemForRequirement": "7"}"#,
            r#"{"itemForRequirement3x": "7"}"#,
            r#"{"itemForRequirement3": "seven"}"#,
            r#"{"itemForRequirement3": -1}"#,
            r#"{"itemForRequirement3": null}"#,
            r#"["itemForRequirement3"]"#,
            "not json",
        ] {
            assert!(parse_selected_items(raw).is_err(), "accepted {raw}");
        }
    }

    #[test]
    fn test_blank_selected_items_is_ignored() {
        let request =
            BeginRequest::parse("skillId", &params(&[("skillId", " 9 "), ("selectedItems", "  ")])).unwrap();
        assert_eq!(request, BeginRequest::new(9));
    }
}
