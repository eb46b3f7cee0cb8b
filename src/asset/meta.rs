//! Per-asset metadata stored as a JSON blob in the index.
//!
//! The blob holds the opaque field bag returned by the metadata extractor
//! plus the values later stages cache (currently the HDR flag).
//!
//! ```json
//! { "fields": { "DateTimeOriginal": "2023:06:01 10:00:00", ... }, "hdr": false }
//! ```
//!
//! Older indexes stored grouped objects instead:
//!
//! ```json
//! { "File": {...}, "QuickTime": { "LivePhotoAuto": true }, "EXIF": {...}, "WebImg": { "HDR": true } }
//! ```
//!
//! Those are still readable; they are rewritten in the current shape the next
//! time the metadata changes.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque key/value bag produced by the metadata extractor.
pub type MetadataBag = Map<String, Value>;

/// Capture-time keys, in priority order.
const DATE_KEYS: &[&str] = &[
    "DateTimeOriginal",
    "ModifyDate",
    "CreationDate",
    "CreateDate",
    "DateCreated",
];

/// Keys that flag an auto-generated live-photo companion clip.
const COMPANION_KEYS: &[&str] = &["LivePhotoAuto", "Live-photoAuto"];

/// Groups used by the legacy blob layout.
const LEGACY_GROUPS: &[&str] = &["File", "QuickTime", "EXIF", "Composite"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Extracted fields; `None` until extraction succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<MetadataBag>,
    /// HDR classification for videos; `None` until classified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdr: Option<bool>,
}

impl AssetMetadata {
    pub fn from_fields(fields: MetadataBag) -> Self {
        Self {
            fields: Some(fields),
            hdr: None,
        }
    }

    /// Decode a blob from the index, accepting both layouts.
    pub fn from_blob(blob: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(blob)?;
        let Value::Object(map) = value else {
            return Ok(Self::default());
        };

        if map.contains_key("fields") || map.contains_key("hdr") || map.is_empty() {
            return serde_json::from_value(Value::Object(map));
        }

        Ok(Self::from_legacy(&map))
    }

    fn from_legacy(map: &MetadataBag) -> Self {
        let mut fields = MetadataBag::new();
        for group in LEGACY_GROUPS {
            if let Some(Value::Object(entries)) = map.get(*group) {
                for (key, value) in entries {
                    if !value.is_null() {
                        fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        let hdr = map
            .get("WebImg")
            .and_then(|w| w.get("HDR"))
            .and_then(Value::as_bool);

        Self {
            fields: Some(fields),
            hdr,
        }
    }

    pub fn to_blob(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Whether extraction has produced fields for this asset.
    pub fn has_fields(&self) -> bool {
        self.fields.is_some()
    }

    fn field(&self, key: &str) -> Option<&Value> {
        self.fields.as_ref()?.get(key)
    }

    /// Whether this is an auto-generated companion clip (live photo video).
    pub fn is_companion_clip(&self) -> bool {
        COMPANION_KEYS
            .iter()
            .filter_map(|key| self.field(key))
            .any(is_truthy_flag)
    }

    /// Best-effort capture timestamp in milliseconds since the Unix epoch.
    ///
    /// Returns `0` when no date field is present or parseable.
    pub fn capture_timestamp_ms(&self) -> i64 {
        DATE_KEYS
            .iter()
            .filter_map(|key| self.field(key))
            .filter_map(Value::as_str)
            .find_map(parse_exif_datetime)
            .unwrap_or(0)
    }
}

fn is_truthy_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => s.trim() == "1",
        _ => false,
    }
}

/// Parse an EXIF-style datetime (`YYYY:MM:DD HH:MM:SS[.fff][±HH:MM|Z]`).
///
/// Values without an offset are read as UTC.
pub fn parse_exif_datetime(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.len() < 19 || !raw.is_char_boundary(10) {
        return None;
    }

    // Normalise the date separators so both "2023:06:01" and "2023-06-01" parse.
    let mut normalized: String = raw.to_owned();
    normalized.replace_range(0..10, &raw[0..10].replace(':', "-"));
    let normalized = normalized.replacen('T', " ", 1);
    let normalized = match normalized.strip_suffix('Z') {
        Some(s) => format!("{s}+00:00"),
        None => normalized,
    };

    if let Ok(dt) = DateTime::<FixedOffset>::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f%:z")
    {
        return Some(dt.timestamp_millis());
    }

    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> AssetMetadata {
        let Value::Object(map) = value else {
            unreachable!()
        };
        AssetMetadata::from_fields(map)
    }

    #[test]
    fn test_parse_exif_datetime() {
        assert_eq!(parse_exif_datetime("1970:01:01 00:00:01"), Some(1000));
        assert_eq!(parse_exif_datetime("1970:01:01 01:00:00+01:00"), Some(0));
        assert_eq!(parse_exif_datetime("1970:01:01 00:00:00.250Z"), Some(250));
        assert_eq!(parse_exif_datetime("1970-01-01T00:00:02"), Some(2000));
        assert_eq!(parse_exif_datetime("0000:00:00 00:00:00"), None);
        assert_eq!(parse_exif_datetime("garbage"), None);
    }

    #[test]
    fn test_capture_timestamp_priority() {
        let m = meta(json!({
            "ModifyDate": "1970:01:01 00:00:02",
            "DateTimeOriginal": "1970:01:01 00:00:01",
            "CreateDate": "1970:01:01 00:00:03",
        }));
        assert_eq!(m.capture_timestamp_ms(), 1000);

        // Unparseable higher-priority values fall through
        let m = meta(json!({
            "DateTimeOriginal": "0000:00:00 00:00:00",
            "CreationDate": "1970:01:01 00:00:05",
        }));
        assert_eq!(m.capture_timestamp_ms(), 5000);
    }

    #[test]
    fn test_capture_timestamp_absent_is_zero() {
        assert_eq!(meta(json!({ "Model": "X" })).capture_timestamp_ms(), 0);
        assert_eq!(AssetMetadata::default().capture_timestamp_ms(), 0);
    }

    #[test]
    fn test_companion_clip() {
        assert!(meta(json!({ "LivePhotoAuto": 1 })).is_companion_clip());
        assert!(meta(json!({ "Live-photoAuto": "1" })).is_companion_clip());
        assert!(meta(json!({ "LivePhotoAuto": true })).is_companion_clip());
        assert!(!meta(json!({ "LivePhotoAuto": 0 })).is_companion_clip());
        assert!(!meta(json!({})).is_companion_clip());
    }

    #[test]
    fn test_blob_current_layout() {
        let mut m = meta(json!({ "Model": "X" }));
        m.hdr = Some(true);
        let blob = m.to_blob().unwrap();
        assert_eq!(AssetMetadata::from_blob(&blob).unwrap(), m);
    }

    #[test]
    fn test_blob_legacy_layout() {
        let blob = serde_json::to_vec(&json!({
            "File": { "MIMEType": "video/quicktime" },
            "QuickTime": { "LivePhotoAuto": true, "Duration": null },
            "EXIF": {},
            "Composite": {},
            "WebImg": { "HDR": true },
        }))
        .unwrap();
        let m = AssetMetadata::from_blob(&blob).unwrap();
        assert_eq!(m.hdr, Some(true));
        assert!(m.is_companion_clip());
        let fields = m.fields.unwrap();
        assert_eq!(fields.get("MIMEType"), Some(&json!("video/quicktime")));
        assert!(!fields.contains_key("Duration"));
    }

    #[test]
    fn test_blob_hdr_only() {
        let blob = br#"{"hdr":false}"#;
        let m = AssetMetadata::from_blob(blob).unwrap();
        assert_eq!(m.hdr, Some(false));
        assert!(!m.has_fields());
    }
}
