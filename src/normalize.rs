//! Payload normalization boundary.
//!
//! The backend is inconsistent about field casing (`health_score` vs
//! `healthScore`), tag shape (`"vip"` vs `{"name": "vip"}`) and date encoding
//! (RFC 3339, naive datetimes, bare dates). Every store maps raw JSON through
//! these helpers so that only canonical types leave a fetch.
//!
//! All helpers are total: missing or malformed input yields the caller's
//! default, never an error. Canonical entities serialize in camelCase with
//! RFC 3339 dates, which these helpers accept, so normalizing an already
//! normalized payload is a no-op.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::types::{AiInsight, InsightKind};

/// First non-null value among `keys`.
pub fn field<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find(|value| !value.is_null())
}

/// String field. Numbers are stringified (ids sometimes arrive numeric).
pub fn string(raw: &Value, keys: &[&str]) -> Option<String> {
    match field(raw, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Non-blank string field.
pub fn text(raw: &Value, keys: &[&str]) -> Option<String> {
    string(raw, keys).filter(|s| !s.trim().is_empty())
}

/// String field that may also arrive as `{name: ...}` (company, owner).
pub fn name_or_text(raw: &Value, keys: &[&str]) -> Option<String> {
    match field(raw, keys)? {
        inner @ Value::Object(_) => text(inner, &["name"]),
        _ => text(raw, keys),
    }
}

pub fn string_or(raw: &Value, keys: &[&str], default: &str) -> String {
    string(raw, keys).unwrap_or_else(|| default.to_string())
}

/// Numeric field. Numeric strings (`"125000.50"`) are accepted.
pub fn number(raw: &Value, keys: &[&str]) -> Option<f64> {
    match field(raw, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

pub fn number_or(raw: &Value, keys: &[&str], default: f64) -> f64 {
    number(raw, keys).unwrap_or(default)
}

/// Non-negative count. Fractions are truncated.
pub fn count(raw: &Value, keys: &[&str]) -> u32 {
    number(raw, keys)
        .map(|n| n.max(0.0).min(u32::MAX as f64) as u32)
        .unwrap_or(0)
}

/// 0–100 score, clamped.
pub fn score(raw: &Value, keys: &[&str], default: f64) -> f64 {
    number(raw, keys).unwrap_or(default).clamp(0.0, 100.0)
}

/// Signed -100..=100 score (sentiment), clamped. Absent reads as neutral.
pub fn signed_score(raw: &Value, keys: &[&str]) -> f64 {
    number(raw, keys).unwrap_or(0.0).clamp(-100.0, 100.0)
}

pub fn boolean(raw: &Value, keys: &[&str]) -> Option<bool> {
    match field(raw, keys)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}

/// Parse any date encoding the backend emits.
///
/// Accepted: RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.f]` / `YYYY-MM-DD HH:MM:SS`
/// (assumed UTC), bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Date field. Integers are read as epoch milliseconds.
pub fn date(raw: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    match field(raw, keys)? {
        Value::String(s) => parse_date(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Date field with a caller-chosen fallback for absent or unparseable values.
pub fn date_or(raw: &Value, keys: &[&str], fallback: DateTime<Utc>) -> DateTime<Utc> {
    date(raw, keys).unwrap_or(fallback)
}

/// Current time truncated to whole milliseconds, so fallback timestamps
/// survive a serialize/normalize round trip unchanged.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Array field; anything else is treated as empty.
pub fn array<'a>(raw: &'a Value, keys: &[&str]) -> &'a [Value] {
    field(raw, keys)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.trim().is_empty(),
        Value::Number(n) => n.as_f64().map(|v| v == 0.0).unwrap_or(true),
        _ => false,
    }
}

/// Extract a tag name from `"vip"` or `{"name": "vip", ...}`.
fn tag_name(value: &Value) -> Option<String> {
    if is_falsy(value) {
        return None;
    }
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(_) => text(value, &["name", "label"]).map(|s| s.trim().to_string()),
        _ => None,
    }
}

/// Flatten a tag array of strings and `{name}` objects, dropping falsy entries.
pub fn tags(raw: &Value, keys: &[&str]) -> Vec<String> {
    array(raw, keys).iter().filter_map(tag_name).collect()
}

/// List of free-text entries. Objects contribute their `text`/`description`/
/// `title`/`name`; blanks are dropped.
pub fn string_list(raw: &Value, keys: &[&str]) -> Vec<String> {
    array(raw, keys)
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => text(item, &["text", "description", "title", "name"]),
            _ => None,
        })
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// Items of a list payload: a bare array, or an object carrying the array under
/// one of `keys` (the domain's plural name, `items`, `results`).
pub fn list_items<'a>(payload: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Some(items) = payload.as_array() {
        return items;
    }
    for key in keys.iter().chain(["items", "results"].iter()) {
        if let Some(items) = payload.get(*key).and_then(Value::as_array) {
            return items;
        }
    }
    &[]
}

/// Nested single entity: `{"contact": {...}}` or the object itself.
pub fn entity<'a>(payload: &'a Value, key: &str) -> &'a Value {
    match payload.get(key) {
        Some(inner) if inner.is_object() => inner,
        _ => payload,
    }
}

/// `health_score` → `healthScore`. Keys without underscores pass through.
pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for (i, c) in key.chars().enumerate() {
        if c == '_' && i > 0 {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn in_alias_group(group: &[&str], key: &str) -> bool {
    group.contains(&key) || group.contains(&to_camel_case(key).as_str())
}

/// Shallow merge of a push patch into a serialized entity. Keys the patch
/// omits are preserved.
///
/// `fields` lists the accepted keys of each aliased field. A patch key found in
/// a group first strips the whole group from `base`, so `{"amount": 5}` beats
/// a stored `value` when the result is renormalized. Patch keys outside every
/// group are written camel-cased.
pub fn merge_patch(base: &mut Value, patch: &Value, fields: &[&[&str]]) {
    let Some(patch) = patch.as_object() else {
        return;
    };
    if !base.is_object() {
        *base = Value::Object(Map::new());
    }
    let Some(target) = base.as_object_mut() else {
        return;
    };

    for key in patch.keys() {
        for group in fields.iter().filter(|group| in_alias_group(group, key)) {
            for alias in group.iter() {
                target.remove(*alias);
            }
        }
    }
    for (key, value) in patch {
        if fields.iter().any(|group| in_alias_group(group, key)) {
            target.insert(key.clone(), value.clone());
        } else {
            target.insert(to_camel_case(key), value.clone());
        }
    }
}

/// AI insight shared by contacts, deals, events and the dashboard.
pub fn insight(raw: &Value) -> AiInsight {
    let created_at = date_or(raw, &["created_at", "createdAt", "timestamp"], now());
    AiInsight {
        id: string(raw, &["id"]).unwrap_or_else(|| format!("insight-{}", created_at.timestamp_millis())),
        kind: InsightKind::parse(string(raw, &["type", "kind"]).as_deref()),
        title: string_or(raw, &["title"], ""),
        description: string_or(raw, &["description", "content", "text"], ""),
        confidence: score(raw, &["confidence"], 0.0),
        actionable: boolean(raw, &["actionable", "is_actionable", "isActionable"]).unwrap_or(false),
        created_at,
    }
}

pub fn insights(raw: &Value, keys: &[&str]) -> Vec<AiInsight> {
    array(raw, keys)
        .iter()
        .filter(|item| item.is_object())
        .map(insight)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_field_prefers_first_present_key() {
        let raw = json!({"health_score": null, "healthScore": 82});
        assert_eq!(number(&raw, &["health_score", "healthScore"]), Some(82.0));
        let raw = json!({"health_score": 40, "healthScore": 82});
        assert_eq!(number(&raw, &["health_score", "healthScore"]), Some(40.0));
    }

    #[test]
    fn test_number_accepts_numeric_strings() {
        let raw = json!({"value": "125000.50", "bad": "abc"});
        assert_eq!(number(&raw, &["value"]), Some(125000.5));
        assert_eq!(number(&raw, &["bad"]), None);
        assert_eq!(count(&json!({"n": -4}), &["n"]), 0);
        assert_eq!(score(&json!({"s": 140}), &["s"], 0.0), 100.0);
    }

    #[test]
    fn test_parse_date_variants() {
        let rfc = parse_date("2026-03-01T14:30:00Z").unwrap();
        assert_eq!(rfc.to_rfc3339(), "2026-03-01T14:30:00+00:00");

        let offset = parse_date("2026-03-01T14:30:00+02:00").unwrap();
        assert_eq!(offset.to_rfc3339(), "2026-03-01T12:30:00+00:00");

        let naive = parse_date("2026-03-01T14:30:00.250").unwrap();
        assert_eq!(naive.timestamp_subsec_millis(), 250);

        let bare = parse_date("2026-03-01").unwrap();
        assert_eq!((bare.year(), bare.month(), bare.day()), (2026, 3, 1));
        assert_eq!(bare.to_rfc3339(), "2026-03-01T00:00:00+00:00");

        assert!(parse_date("next tuesday").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_date_or_fallback_for_invalid() {
        let fallback = parse_date("2020-01-01").unwrap();
        let raw = json!({"created_at": "garbage"});
        assert_eq!(date_or(&raw, &["created_at"], fallback), fallback);
        assert_eq!(date_or(&json!({}), &["created_at"], fallback), fallback);
        let millis = json!({"createdAt": 1_700_000_000_000_i64});
        assert_eq!(date(&millis, &["createdAt"]).unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_tags_mixed_shapes() {
        let raw = json!({"tags": ["vip", {"name": "renewal", "color": "red"}, "", null, false, {"color": "x"}, 0, "  "]});
        assert_eq!(tags(&raw, &["tags"]), vec!["vip", "renewal"]);
    }

    #[test]
    fn test_list_items_shapes() {
        let bare = json!([{"id": 1}]);
        assert_eq!(list_items(&bare, &["contacts"]).len(), 1);
        let keyed = json!({"contacts": [{"id": 1}, {"id": 2}], "total": 2});
        assert_eq!(list_items(&keyed, &["contacts"]).len(), 2);
        let items = json!({"items": [{"id": 1}]});
        assert_eq!(list_items(&items, &["contacts"]).len(), 1);
        assert!(list_items(&json!({"total": 0}), &["contacts"]).is_empty());
    }

    #[test]
    fn test_to_camel_case() {
        assert_eq!(to_camel_case("health_score"), "healthScore");
        assert_eq!(to_camel_case("deals_closing_this_month"), "dealsClosingThisMonth");
        assert_eq!(to_camel_case("healthScore"), "healthScore");
        assert_eq!(to_camel_case("_id"), "_id");
    }

    #[test]
    fn test_merge_patch_preserves_omitted_fields() {
        let mut base = json!({"id": "c1", "healthScore": 50, "tags": ["a"]});
        merge_patch(&mut base, &json!({"health_score": 75}), &[]);
        assert_eq!(base, json!({"id": "c1", "healthScore": 75, "tags": ["a"]}));
    }

    #[test]
    fn test_merge_patch_alias_replaces_stored_key() {
        let fields: &[&[&str]] = &[&["value", "amount"], &["phone", "phone_number", "phoneNumber"]];
        let mut base = json!({"id": "d1", "value": 1000, "phone": "111", "stage": "prospect"});
        merge_patch(&mut base, &json!({"amount": 9000, "phone_number": "222"}), fields);
        assert_eq!(
            base,
            json!({"id": "d1", "amount": 9000, "phone_number": "222", "stage": "prospect"})
        );
        assert_eq!(number(&base, &["value", "amount"]), Some(9000.0));
    }

    #[test]
    fn test_merge_patch_keeps_every_alias_the_patch_sends() {
        let fields: &[&[&str]] = &[&["value", "amount"]];
        let mut base = json!({"value": 1});
        merge_patch(&mut base, &json!({"amount": 2, "value": 3}), fields);
        assert_eq!(base, json!({"amount": 2, "value": 3}));
    }

    #[test]
    fn test_signed_score_clamps_without_rescaling() {
        assert_eq!(signed_score(&json!({"s": 35}), &["s"]), 35.0);
        assert_eq!(signed_score(&json!({"s": -0.4}), &["s"]), -0.4);
        assert_eq!(signed_score(&json!({"s": -140}), &["s"]), -100.0);
        assert_eq!(signed_score(&json!({}), &["s"]), 0.0);
    }

    fn tag_entry() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[a-z ]{0,8}".prop_map(Value::from),
            "[a-z]{0,8}".prop_map(|name| json!({ "name": name })),
            Just(Value::Null),
            Just(Value::Bool(false)),
            Just(json!(0)),
            Just(json!({ "color": "blue" })),
        ]
    }

    proptest! {
        #[test]
        fn prop_tags_flat_non_empty_and_idempotent(entries in prop::collection::vec(tag_entry(), 0..12)) {
            let raw = json!({ "tags": entries });
            let once = tags(&raw, &["tags"]);
            prop_assert!(once.iter().all(|t| !t.trim().is_empty()));

            let twice = tags(&json!({ "tags": once.clone() }), &["tags"]);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_missing_or_bad_dates_use_fallback(value in prop_oneof![
            Just(Value::Null),
            "[a-z]{0,10}".prop_map(Value::from),
            Just(json!({})),
        ]) {
            let fallback = parse_date("2024-06-01T00:00:00Z").unwrap();
            let raw = json!({ "date": value });
            prop_assert_eq!(date_or(&raw, &["date"], fallback), fallback);
        }

        #[test]
        fn prop_parse_date_roundtrips_canonical(secs in 0i64..4_000_000_000, millis in 0u32..1000) {
            let dt = DateTime::<Utc>::from_timestamp(secs, millis * 1_000_000).unwrap();
            let rendered = serde_json::to_value(dt).unwrap();
            let parsed = date(&json!({ "at": rendered }), &["at"]).unwrap();
            prop_assert_eq!(parsed, dt);
        }
    }
}
