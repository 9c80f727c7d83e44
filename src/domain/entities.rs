//! Domain entities
//!
//! Contains the records the recovery pipeline moves around: upstream form
//! submissions, CRM contacts, the per-form field mapping and the update plan.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One form-fill event as returned by the submissions endpoint.
///
/// Unknown keys are kept in `extra` so a snapshot written back to disk keeps
/// everything the upstream sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(
        rename = "submittedAt",
        alias = "timestamp",
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub submitted_at: Option<i64>,
    #[serde(default)]
    pub values: Vec<RawFieldValue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single `{name, value}` pair. Both sides stay untyped JSON because the
/// upstream occasionally sends numbers, nulls or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFieldValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawFieldValue {
    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: Some(Value::String(name.to_string())),
            value: Some(Value::String(value.to_string())),
            extra: Map::new(),
        }
    }

    /// Both name and value as strings, or `None` when either is missing or not a string.
    pub fn as_strings(&self) -> Option<(&str, &str)> {
        match (&self.name, &self.value) {
            (Some(Value::String(n)), Some(Value::String(v))) => Some((n.as_str(), v.as_str())),
            _ => None,
        }
    }
}

impl Submission {
    pub fn from_pairs(submitted_at: Option<i64>, pairs: &[(&str, &str)]) -> Self {
        Self {
            submitted_at,
            values: pairs.iter().map(|(n, v)| RawFieldValue::text(n, v)).collect(),
            extra: Map::new(),
        }
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

/// CRM contact as seen by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Option<String>>,
}

impl Contact {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: Option<&str>) -> Self {
        self.properties
            .insert(name.to_string(), value.map(ToString::to_string));
        self
    }

    /// Null, the empty string and a lone space all count as "not filled in".
    pub fn is_blank(&self, property: &str) -> bool {
        match self.properties.get(property) {
            None | Some(None) => true,
            Some(Some(v)) => v.is_empty() || v == " ",
        }
    }
}

/// Submission field name → CRM property name, for one form.
pub type FieldMapping = BTreeMap<String, String>;

/// Form id → field mapping. Built once from configuration and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormFieldMap(BTreeMap<String, FieldMapping>);

impl FormFieldMap {
    pub fn new(forms: BTreeMap<String, FieldMapping>) -> Self {
        Self(forms)
    }

    pub fn mapping(&self, form_id: &str) -> Option<&FieldMapping> {
        self.0.get(form_id)
    }

    pub fn form_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn contains(&self, form_id: &str) -> bool {
        self.0.contains_key(form_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// CRM properties the resolver must read for this form, plus `email`.
    pub fn crm_properties(&self, form_id: &str) -> Vec<String> {
        let mut props = vec!["email".to_string()];
        if let Some(mapping) = self.mapping(form_id) {
            for property in mapping.values() {
                if !props.contains(property) {
                    props.push(property.clone());
                }
            }
        }
        props
    }
}

/// Properties staged for one contact. Empty means "nothing to write".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdatePlan(BTreeMap<String, String>);

impl UpdatePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, property: &str, value: &str) {
        self.0.insert(property.to_string(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.0.get(property).map(String::as_str)
    }

    pub fn contains(&self, property: &str) -> bool {
        self.0.contains_key(property)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl FromIterator<(String, String)> for UpdatePlan {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Trim + lowercase. Used for dedupe keys and per-email lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
