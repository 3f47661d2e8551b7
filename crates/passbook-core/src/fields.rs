//! Pass field set, styles and the fixed field vocabularies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{PassError, PassResult};

/// Top-level keys every pass must carry.
pub const REQUIRED_TOP_LEVEL: &[&str] = &[
    "description",
    "formatVersion",
    "organizationName",
    "passTypeIdentifier",
    "serialNumber",
    "teamIdentifier",
];

/// Base image names. Each also has a high-resolution variant with a `2x` suffix.
pub const IMAGES: &[&str] = &["background", "footer", "icon", "logo", "strip", "thumbnail"];

/// Marker carried by high-resolution image names (`icon2x`).
pub const HIGH_RES_MARKER: &str = "2x";

/// Generic alias merged into the active style key.
pub const STRUCTURE_KEY: &str = "structure";

/// Pass style; exactly one is active per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassStyle {
    BoardingPass,
    Coupon,
    EventTicket,
    StoreCard,
    Generic,
}

impl PassStyle {
    pub const ALL: [PassStyle; 5] = [
        PassStyle::BoardingPass,
        PassStyle::Coupon,
        PassStyle::EventTicket,
        PassStyle::StoreCard,
        PassStyle::Generic,
    ];

    /// Key under which the style-specific fields live.
    pub fn as_str(&self) -> &'static str {
        match self {
            PassStyle::BoardingPass => "boardingPass",
            PassStyle::Coupon => "coupon",
            PassStyle::EventTicket => "eventTicket",
            PassStyle::StoreCard => "storeCard",
            PassStyle::Generic => "generic",
        }
    }
}

impl fmt::Display for PassStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PassStyle {
    type Err = PassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PassStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| PassError::InvalidStyle {
                style: s.to_string(),
            })
    }
}

/// Every recognized image key, base names first, then high-resolution variants.
pub fn image_names() -> impl Iterator<Item = String> {
    IMAGES
        .iter()
        .map(|name| name.to_string())
        .chain(IMAGES.iter().map(|name| format!("{name}{HIGH_RES_MARKER}")))
}

pub fn is_image_name(name: &str) -> bool {
    image_names().any(|known| known == name)
}

/// Archive entry name for an image key: `icon` -> `icon.png`, `icon2x` -> `icon@2x.png`.
pub fn image_entry_name(name: &str) -> String {
    let name = if name.contains(HIGH_RES_MARKER) {
        name.replacen(HIGH_RES_MARKER, "@2x", 1)
    } else {
        name.to_string()
    };
    format!("{name}.png")
}

/// Ordered pass fields, serialized verbatim into `pass.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    fields: Map<String, Value>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> PassResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(PassError::InvalidFields {
                reason: format!("fields must be an object, got {}", json_type(&other)),
            }),
        }
    }

    pub fn from_json_slice(bytes: &[u8]) -> PassResult<Self> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| PassError::InvalidFields {
            reason: e.to_string(),
        })?;
        Self::from_value(value)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Store `relevantDate` as an RFC 3339 timestamp.
    pub fn set_relevant_date(&mut self, date: DateTime<Utc>) {
        self.insert(
            "relevantDate",
            date.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }

    /// Copy every key of `other` into `self`, overwriting existing keys.
    pub fn extend(&mut self, other: FieldSet) {
        for (key, value) in other.fields {
            self.fields.insert(key, value);
        }
    }

    /// Fold the `structure` alias into the style key and make sure the style key exists.
    ///
    /// Keys from the alias overwrite keys already present under the style key.
    pub fn normalize_style(&mut self, style: PassStyle) -> PassResult<()> {
        let key = style.as_str();
        let structure = self.remove(STRUCTURE_KEY);

        let entry = self
            .fields
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        if let Some(structure) = structure {
            match (entry, structure) {
                (Value::Object(target), Value::Object(alias)) => {
                    for (k, v) in alias {
                        target.insert(k, v);
                    }
                }
                (_, other) => {
                    return Err(PassError::InvalidFields {
                        reason: format!(
                            "{STRUCTURE_KEY} and {key} must be objects, got {}",
                            json_type(&other)
                        ),
                    })
                }
            }
        }

        Ok(())
    }

    /// Serialized `pass.json` bytes.
    pub fn to_bytes(&self) -> PassResult<Vec<u8>> {
        serde_json::to_vec(&self.fields).map_err(|e| PassError::InvalidFields {
            reason: e.to_string(),
        })
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for FieldSet {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// JavaScript-flavoured type name used in error messages.
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn style_parses_closed_set() {
        assert_eq!("coupon".parse::<PassStyle>().unwrap(), PassStyle::Coupon);
        assert_eq!(
            "boardingPass".parse::<PassStyle>().unwrap(),
            PassStyle::BoardingPass
        );
        let err = "postcard".parse::<PassStyle>().unwrap_err();
        assert!(matches!(err, PassError::InvalidStyle { style } if style == "postcard"));
    }

    #[test]
    fn image_vocabulary_has_high_res_variants() {
        let names: Vec<String> = image_names().collect();
        assert_eq!(names.len(), 12);
        assert!(names.contains(&"thumbnail2x".to_string()));
        assert!(is_image_name("logo2x"));
        assert!(!is_image_name("banner"));
    }

    #[test]
    fn entry_names_follow_suffix_convention() {
        assert_eq!(image_entry_name("icon"), "icon.png");
        assert_eq!(image_entry_name("icon2x"), "icon@2x.png");
        assert_eq!(image_entry_name("background2x"), "background@2x.png");
    }

    #[test]
    fn structure_alias_merges_into_style() {
        let mut fields = FieldSet::from_value(json!({
            "coupon": {"headerFields": [], "primaryFields": [{"key": "a"}]},
            "structure": {"primaryFields": [{"key": "b"}]}
        }))
        .unwrap();
        fields.normalize_style(PassStyle::Coupon).unwrap();

        assert!(!fields.contains_key("structure"));
        let coupon = fields.get("coupon").unwrap();
        assert_eq!(coupon["primaryFields"][0]["key"], "b");
        assert!(coupon.get("headerFields").is_some());
    }

    #[test]
    fn missing_style_key_is_created() {
        let mut fields = FieldSet::new().with("description", "x");
        fields.normalize_style(PassStyle::Generic).unwrap();
        assert_eq!(fields.get("generic"), Some(&json!({})));
    }

    #[test]
    fn relevant_date_is_rfc3339() {
        let mut fields = FieldSet::new();
        fields.set_relevant_date(Utc.with_ymd_and_hms(2024, 5, 1, 18, 30, 0).unwrap());
        assert_eq!(fields.get("relevantDate"), Some(&json!("2024-05-01T18:30:00Z")));
    }

    #[test]
    fn non_object_fields_rejected() {
        let err = FieldSet::from_value(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }
}
