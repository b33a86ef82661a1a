//! Validates and canonicalizes the opaque JSON payloads carried by glyphs,
//! syntaxes, and metrics. Pure functions over `serde_json::Value` — no I/O,
//! no knowledge of project state.
//!
//! Canonical form relies on `serde_json`'s default map representation being a
//! `BTreeMap` (the `preserve_order` feature is never enabled in this
//! workspace), so `serde_json::to_vec` on an already-parsed `Value` always
//! produces the same bytes for the same logical object regardless of the key
//! order the client sent.

use crate::error::HubError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Decodes and re-encodes a JSON object, used only for byte-equality "did it
/// change?" comparisons. Fails on non-object or invalid JSON.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
	// `Value` is already a parsed tree; re-serializing it is the canonicalization step.
	serde_json::to_vec(value).expect("Value serialization is infallible")
}

/// Normalizes a raw snapshot field (`glyphs`/`syntaxes`/`metrics` input): empty
/// or absent becomes the provided default, non-null input must parse as an
/// object, else `InvalidPayload`.
pub fn normalize_raw_object(input: &Value) -> Result<Value, HubError> {
	match input {
		Value::Null => Ok(Value::Object(Map::new())),
		Value::Object(_) => Ok(input.clone()),
		_ => Err(HubError::InvalidPayload("expected a JSON object".to_string())),
	}
}

fn extract_trimmed_id(obj: &Map<String, Value>) -> Result<String, HubError> {
	let id = obj
		.get("id")
		.and_then(Value::as_str)
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.ok_or_else(|| HubError::InvalidPayload("entity is missing a non-empty id".to_string()))?;
	Ok(id.to_string())
}

/// Parses the array form of an entity collection (`glyphs`/`syntaxes` field of
/// a full-snapshot request): must be a JSON array of objects, each with a
/// non-empty trimmed `id`. Duplicate ids overwrite earlier occurrences
/// (later wins). Empty/null input normalizes to an empty map.
pub fn parse_entity_array_by_id(input: &Value) -> Result<BTreeMap<String, Value>, HubError> {
	let items = match input {
		Value::Null => return Ok(BTreeMap::new()),
		Value::Array(items) => items,
		_ => return Err(HubError::InvalidPayload("expected a JSON array".to_string())),
	};

	let mut map = BTreeMap::new();
	for item in items {
		let obj = item
			.as_object()
			.ok_or_else(|| HubError::InvalidPayload("array element is not an object".to_string()))?;
		let id = extract_trimmed_id(obj)?;
		map.insert(id, item.clone());
	}
	Ok(map)
}

/// Parses the single-item form of an entity (`glyph`/`syntax` field of a
/// `PUT /api/glyph` or `PUT /api/syntax` request): must be a JSON object with
/// a non-empty trimmed `id`. Returns the trimmed id and the canonical value.
pub fn parse_entity_item(input: &Value) -> Result<(String, Value), HubError> {
	let obj = input
		.as_object()
		.ok_or_else(|| HubError::InvalidPayload("entity is not a JSON object".to_string()))?;
	let id = extract_trimmed_id(obj)?;
	Ok((id, input.clone()))
}

/// Emits a JSON array whose elements are sorted by `id` ascending. This
/// ordering is an external contract: persisted snapshots and the snapshot
/// event are byte-stable modulo payload mutation.
pub fn serialize_entity_map(entities: &BTreeMap<String, Value>) -> Vec<Value> {
	// `BTreeMap` iteration is already id-ascending.
	entities.values().cloned().collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn canonical_bytes_are_stable_regardless_of_key_order() {
		let a = json!({"id": "x", "name": "A", "extra": 1});
		let b = json!({"extra": 1, "name": "A", "id": "x"});
		assert_eq!(canonical_bytes(&a), canonical_bytes(&b));
	}

	#[test]
	fn parse_entity_array_rejects_non_array() {
		let err = parse_entity_array_by_id(&json!({"id": "a"})).unwrap_err();
		assert!(matches!(err, HubError::InvalidPayload(_)));
	}

	#[test]
	fn parse_entity_array_requires_non_empty_id() {
		let err = parse_entity_array_by_id(&json!([{"name": "no id"}])).unwrap_err();
		assert!(matches!(err, HubError::InvalidPayload(_)));

		let err = parse_entity_array_by_id(&json!([{"id": "   "}])).unwrap_err();
		assert!(matches!(err, HubError::InvalidPayload(_)));
	}

	#[test]
	fn parse_entity_array_duplicate_id_later_wins() {
		let map =
			parse_entity_array_by_id(&json!([{"id": "a", "v": 1}, {"id": "a", "v": 2}])).unwrap();
		assert_eq!(map.len(), 1);
		assert_eq!(map["a"]["v"], 2);
	}

	#[test]
	fn parse_entity_array_null_is_empty() {
		let map = parse_entity_array_by_id(&Value::Null).unwrap();
		assert!(map.is_empty());
	}

	#[test]
	fn parse_entity_item_trims_id() {
		let (id, value) = parse_entity_item(&json!({"id": "  a  ", "name": "A"})).unwrap();
		assert_eq!(id, "a");
		assert_eq!(value["name"], "A");
	}

	#[test]
	fn normalize_raw_object_defaults_null() {
		let value = normalize_raw_object(&Value::Null).unwrap();
		assert_eq!(value, json!({}));
	}

	#[test]
	fn normalize_raw_object_rejects_non_object() {
		let err = normalize_raw_object(&json!([1, 2])).unwrap_err();
		assert!(matches!(err, HubError::InvalidPayload(_)));
	}

	#[test]
	fn serialize_entity_map_is_id_sorted() {
		let mut map = BTreeMap::new();
		map.insert("b".to_string(), json!({"id": "b"}));
		map.insert("a".to_string(), json!({"id": "a"}));
		let out = serialize_entity_map(&map);
		assert_eq!(out[0]["id"], "a");
		assert_eq!(out[1]["id"], "b");
	}
}
