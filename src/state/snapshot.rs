use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::canonical::{self, HashDomain};
use crate::error::{GateError, Result};

const MAX_LABEL_CHARS: usize = 256;
const MAX_IDENTITY_CHARS: usize = 128;

/// Canonical capture of the focused UI element. Carries identity and flags
/// only: no typed text, clipboard, or element value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub app: String,
    pub role: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    pub focused: bool,
    pub enabled: bool,
    pub stable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Snapshot {
    /// Content address of the snapshot.
    pub fn content_hash(&self) -> String {
        match serde_json::to_value(self) {
            Ok(value) => canonical::hash_value(HashDomain::Snapshot, &value),
            // Plain strings, integers and bools always encode.
            Err(_) => canonical::hash_value(HashDomain::Snapshot, &Value::Null),
        }
    }
}

/// Canonicalize a raw observation. Unknown fields are dropped; a missing or
/// mistyped identity field rejects the whole observation.
pub fn normalize(raw: &Value) -> Result<Snapshot> {
    let Value::Object(map) = raw else {
        return reject("observation is not an object".into());
    };

    let app = required_identity(map, "app")?;
    let role = required_identity(map, "role")?;
    let label: String = optional_string(map, "label")?
        .map(|l| l.trim().chars().take(MAX_LABEL_CHARS).collect())
        .unwrap_or_default();
    let element_id = optional_string(map, "element_id")?.map(|s| clip(s.trim()));
    let window = optional_string(map, "window")?.map(|s| clip(s.trim()));
    let bounds = parse_bounds(map)?;

    let snapshot = Snapshot {
        app,
        role,
        label,
        element_id,
        window,
        bounds,
        focused: flag(map, "focused", false)?,
        enabled: flag(map, "enabled", true)?,
        stable: flag(map, "stable", true)?,
    };

    let dropped = map.keys().filter(|k| !is_canonical_field(k)).count();
    if dropped > 0 {
        tracing::debug!(dropped, "stripped non-canonical observation fields");
    }
    Ok(snapshot)
}

const CANONICAL_FIELDS: &[&str] = &[
    "app",
    "role",
    "label",
    "element_id",
    "window",
    "bounds",
    "bbox",
    "focused",
    "enabled",
    "stable",
];

fn is_canonical_field(key: &str) -> bool {
    CANONICAL_FIELDS.contains(&key)
}

fn reject<T>(reason: String) -> Result<T> {
    tracing::warn!(%reason, "rejected observation");
    Err(GateError::MalformedState(reason))
}

fn clip(s: &str) -> String {
    s.chars().take(MAX_IDENTITY_CHARS).collect()
}

fn required_identity(map: &Map<String, Value>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(clip(s.trim())),
        Some(Value::String(_)) => reject(format!("`{key}` is empty")),
        Some(_) => reject(format!("`{key}` must be a string")),
        None => reject(format!("missing `{key}`")),
    }
}

fn optional_string<'a>(map: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => reject(format!("`{key}` must be a string")),
    }
}

fn flag(map: &Map<String, Value>, key: &str, default: bool) -> Result<bool> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => reject(format!("`{key}` must be a boolean")),
    }
}

/// Accepts `bounds: {x, y, width, height}` or `bbox: [x, y, width, height]`.
/// Fractional coordinates round to the nearest integer.
fn parse_bounds(map: &Map<String, Value>) -> Result<Option<Bounds>> {
    let coords: Vec<&Value> = match (map.get("bounds"), map.get("bbox")) {
        (Some(Value::Object(b)), _) => ["x", "y", "width", "height"]
            .iter()
            .map(|k| b.get(*k).unwrap_or(&Value::Null))
            .collect(),
        (None | Some(Value::Null), Some(Value::Array(items))) if items.len() == 4 => {
            items.iter().collect()
        }
        (None | Some(Value::Null), None | Some(Value::Null)) => return Ok(None),
        _ => return reject("bounds must be {x, y, width, height} or a 4-element bbox".into()),
    };

    let mut out = [0i64; 4];
    for (slot, value) in out.iter_mut().zip(coords) {
        *slot = match integer(value) {
            Some(n) => n,
            None => return reject("bounds coordinates must be numbers".into()),
        };
    }
    if out[2] < 0 || out[3] < 0 {
        return reject("bounds must have non-negative size".into());
    }
    Ok(Some(Bounds {
        x: out[0],
        y: out[1],
        width: out[2],
        height: out[3],
    }))
}

#[allow(clippy::cast_possible_truncation)]
fn integer(value: &Value) -> Option<i64> {
    let n = value.as_number()?;
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.is_finite() && f.abs() < 1e12)
            .map(|f| f.round() as i64)
    })
}
