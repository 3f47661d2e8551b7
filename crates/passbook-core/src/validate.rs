//! Field-schema checks run before any archive or signing work.
//!
//! The checks are flat presence/type checks. Image fields are expected to be
//! resolved (and removed) before `validate_fields` runs.

use serde_json::Value;

use crate::error::{PassError, PassResult};
use crate::fields::{json_type, FieldSet, PassStyle, REQUIRED_TOP_LEVEL};

/// Style-specific keys and the only style they may appear under.
const STYLE_ONLY_FIELDS: &[(&str, PassStyle)] = &[("transitType", PassStyle::BoardingPass)];

/// Validate a field set whose style key has already been normalized.
pub fn validate_fields(fields: &FieldSet, style: PassStyle) -> PassResult<()> {
    check_single_style(fields, style)?;
    check_required(fields)?;
    check_style_only_fields(fields, style)?;

    if let Some(locations) = fields.get("locations") {
        check_locations(locations)?;
    }

    if let Some(barcode) = fields.get("barcode") {
        check_barcode(barcode)?;
    }

    Ok(())
}

fn check_single_style(fields: &FieldSet, style: PassStyle) -> PassResult<()> {
    for other in PassStyle::ALL {
        if other != style && fields.contains_key(other.as_str()) {
            return Err(PassError::ConflictingStyle {
                style: style.to_string(),
                other: other.to_string(),
            });
        }
    }
    Ok(())
}

fn check_required(fields: &FieldSet) -> PassResult<()> {
    for attr in REQUIRED_TOP_LEVEL {
        let present = match fields.get(attr) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64() != Some(0.0),
            Some(_) => true,
        };
        if !present {
            return Err(PassError::MissingField {
                field: attr.to_string(),
            });
        }
    }
    Ok(())
}

fn check_style_only_fields(fields: &FieldSet, style: PassStyle) -> PassResult<()> {
    let Some(Value::Object(style_fields)) = fields.get(style.as_str()) else {
        return Ok(());
    };

    for (field, allowed) in STYLE_ONLY_FIELDS {
        let used = style_fields
            .get(*field)
            .is_some_and(|value| !value.is_null());
        if used && style != *allowed {
            return Err(PassError::FieldNotAllowed {
                field: field.to_string(),
                allowed: allowed.to_string(),
                style: style.to_string(),
            });
        }
    }
    Ok(())
}

fn check_locations(locations: &Value) -> PassResult<()> {
    let Value::Array(entries) = locations else {
        return Err(PassError::InvalidLocation {
            reason: format!("locations must be an array, got {}", json_type(locations)),
        });
    };

    for (index, location) in entries.iter().enumerate() {
        for coord in ["latitude", "longitude"] {
            if !location.get(coord).is_some_and(Value::is_number) {
                return Err(PassError::InvalidLocation {
                    reason: format!(
                        "locations[{index}].{coord} is missing or is not a number"
                    ),
                });
            }
        }
    }
    Ok(())
}

fn check_barcode(barcode: &Value) -> PassResult<()> {
    if !barcode.is_object() {
        return Err(PassError::InvalidBarcode {
            reason: format!("barcode must be an object, got {}", json_type(barcode)),
        });
    }

    for key in ["format", "message", "messageEncoding"] {
        if !barcode.get(key).is_some_and(Value::is_string) {
            return Err(PassError::InvalidBarcode {
                reason: format!("barcode.{key} is required and must be a string"),
            });
        }
    }
    Ok(())
}
