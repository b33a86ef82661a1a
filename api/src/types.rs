use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `projectID`s must match this pattern; anything else is coerced to `"default"`.
///
/// See [`sanitize_project_id`].
const PROJECT_ID_CHARS: fn(char) -> bool =
	|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';

/// The project id used when the client-supplied id is empty or contains characters
/// outside `[A-Za-z0-9_-]`.
pub const DEFAULT_PROJECT_ID: &str = "default";

/// Sanitizes a client-supplied `project` query parameter per spec §6.5: any value not
/// matching `^[A-Za-z0-9_-]+$` (including the empty string) is coerced to `"default"`.
pub fn sanitize_project_id(raw: &str) -> String {
	if !raw.is_empty() && raw.chars().all(PROJECT_ID_CHARS) {
		raw.to_string()
	} else {
		DEFAULT_PROJECT_ID.to_string()
	}
}

/// Identifies which of the three entity kinds a mutation or event concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
	/// A single glyph, keyed by its `id`.
	Glyph,
	/// A single syntax rule, keyed by its `id`.
	Syntax,
	/// The singleton metrics object for a project.
	Metrics,
}

/// The authoritative, in-memory-shaped view of one project. Returned by reads,
/// by successful/conflicting full-snapshot replaces, and persisted verbatim
/// (modulo the legacy flat-format fallback, see `persistence`) as `<project>.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
	/// Sanitized project id.
	pub project: String,
	/// Project-level version, strictly monotonic across successful mutations.
	pub version: u64,
	/// UTC RFC-3339 timestamp (nanosecond precision) of the last successful mutation.
	pub updated_at: String,
	/// Glyphs sorted by `id` ascending.
	#[serde(default)]
	pub glyphs: Vec<Value>,
	/// Per-glyph-id version numbers.
	#[serde(default)]
	pub glyph_versions: BTreeMap<String, u64>,
	/// Syntaxes sorted by `id` ascending.
	#[serde(default)]
	pub syntaxes: Vec<Value>,
	/// Per-syntax-id version numbers.
	#[serde(default)]
	pub syntax_versions: BTreeMap<String, u64>,
	/// The project's metrics payload. Defaults to `{}`.
	#[serde(default = "empty_object")]
	pub metrics: Value,
	/// Version of the metrics payload. `0` iff metrics have never been set.
	#[serde(default)]
	pub metrics_version: u64,
}

fn empty_object() -> Value {
	Value::Object(Default::default())
}

impl ProjectDocument {
	/// Constructs the empty default document for a project id that has never been
	/// created: `glyphs = []`, `syntaxes = []`, `metrics = {}`, all versions `0`.
	pub fn empty(project: String, updated_at: String) -> Self {
		Self {
			project,
			version: 0,
			updated_at,
			glyphs: Vec::new(),
			glyph_versions: BTreeMap::new(),
			syntaxes: Vec::new(),
			syntax_versions: BTreeMap::new(),
			metrics: empty_object(),
			metrics_version: 0,
		}
	}
}

/// `PUT /api/project` request body.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReplaceProjectRequest {
	/// Echoed in the resulting event so the originator can suppress its own echo.
	#[serde(default)]
	pub client_id: Option<String>,
	/// The `projectVersion` the client believes it is editing against.
	pub base_version: u64,
	/// New glyph set. Missing/null is normalized to `[]`.
	#[serde(default)]
	pub glyphs: Value,
	/// New syntax set. Missing/null is normalized to `[]`.
	#[serde(default)]
	pub syntaxes: Value,
	/// New metrics value. Missing/null is normalized to `{}`.
	#[serde(default)]
	pub metrics: Value,
}

/// `PUT /api/glyph` request body.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpsertGlyphRequest {
	/// Echoed in the resulting event so the originator can suppress its own echo.
	#[serde(default)]
	pub client_id: Option<String>,
	/// The `glyphVersions[id]` the client believes it is editing against (`0` if absent).
	pub base_version: u64,
	/// The glyph to insert or replace, as a JSON object with at minimum an `id` field.
	pub glyph: Value,
}

/// `DELETE /api/glyph` request body.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteGlyphRequest {
	/// Echoed in the resulting event so the originator can suppress its own echo.
	#[serde(default)]
	pub client_id: Option<String>,
	/// The `glyphVersions[id]` the client believes it is deleting.
	pub base_version: u64,
	/// The id of the glyph to remove.
	pub id: String,
}

/// `PUT /api/syntax` request body.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpsertSyntaxRequest {
	/// Echoed in the resulting event so the originator can suppress its own echo.
	#[serde(default)]
	pub client_id: Option<String>,
	/// The `syntaxVersions[id]` the client believes it is editing against (`0` if absent).
	pub base_version: u64,
	/// The syntax rule to insert or replace, as a JSON object with at minimum an `id` field.
	pub syntax: Value,
}

/// `DELETE /api/syntax` request body.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteSyntaxRequest {
	/// Echoed in the resulting event so the originator can suppress its own echo.
	#[serde(default)]
	pub client_id: Option<String>,
	/// The `syntaxVersions[id]` the client believes it is deleting.
	pub base_version: u64,
	/// The id of the syntax rule to remove.
	pub id: String,
}

/// `PUT /api/metrics` request body.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateMetricsRequest {
	/// Echoed in the resulting event so the originator can suppress its own echo.
	#[serde(default)]
	pub client_id: Option<String>,
	/// The `metricsVersion` the client believes it is editing against.
	pub base_version: u64,
	/// The new metrics payload.
	pub metrics: Value,
}

/// Response for a single-entity mutation (glyph/syntax/metrics upsert or delete),
/// reused verbatim as the 409 conflict body for the same operations (spec §6.2).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMutationResponse {
	/// Sanitized project id.
	pub project: String,
	/// Which entity kind this mutation concerned.
	pub entity: EntityKind,
	/// The entity's id. Absent for metrics, which is a singleton.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub entity_id: Option<String>,
	/// The entity's version after the operation (or the current version, on conflict).
	pub version: u64,
	/// The project's version after the operation (or the current version, on conflict).
	pub project_version: u64,
	/// `true` if this response represents a delete (or a conflicting delete of an
	/// entity that has since been removed).
	pub deleted: bool,
	/// UTC RFC-3339 timestamp of the last successful mutation.
	pub updated_at: String,
	/// The entity's current payload. `None` for deletes.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub payload: Option<Value>,
}
