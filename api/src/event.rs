//! The typed events published by the hub to every subscriber of a project,
//! per spec §4.3.

use crate::types::ProjectDocument;
use serde::Serialize;
use serde_json::Value;

/// Fields common to a single-entity change event (glyph or syntax upsert/delete).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEventData {
	/// Sanitized project id.
	pub project: String,
	/// The glyph's or syntax's id.
	pub entity_id: String,
	/// The entity's version after this change.
	pub version: u64,
	/// The project's version after this change.
	pub project_version: u64,
	/// The entity's current payload. `None` for deletes.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub payload: Option<Value>,
	/// `true` if this event represents a delete.
	pub deleted: bool,
	/// The `clientId` of the mutation that produced this event, if any, so
	/// the originator can suppress its own echo.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	/// UTC RFC-3339 timestamp of the mutation that produced this event.
	pub updated_at: String,
}

/// Fields for a metrics-update event.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsEventData {
	/// Sanitized project id.
	pub project: String,
	/// The metrics payload's version after this change.
	pub version: u64,
	/// The project's version after this change.
	pub project_version: u64,
	/// The metrics payload after this change.
	pub payload: Value,
	/// The `clientId` of the mutation that produced this event, if any, so
	/// the originator can suppress its own echo.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	/// UTC RFC-3339 timestamp of the mutation that produced this event.
	pub updated_at: String,
}

/// One fanned-out change notification. Carries everything needed to render
/// an SSE `event:`/`data:` pair (see [`Event::event_type`] and [`Event::to_json`]).
#[derive(Clone, Debug)]
pub enum Event {
	/// The full project document. Emitted on subscribe and on full-snapshot replace.
	Snapshot(Box<ProjectDocument>),
	/// A glyph was inserted or replaced.
	GlyphUpsert(EntityEventData),
	/// A glyph was removed.
	GlyphDelete(EntityEventData),
	/// A syntax rule was inserted or replaced.
	SyntaxUpsert(EntityEventData),
	/// A syntax rule was removed.
	SyntaxDelete(EntityEventData),
	/// The metrics singleton was replaced.
	MetricsUpdate(MetricsEventData),
}

impl Event {
	/// The SSE `event:` field value.
	pub fn event_type(&self) -> &'static str {
		match self {
			Event::Snapshot(_) => "snapshot",
			Event::GlyphUpsert(_) => "glyph_upsert",
			Event::GlyphDelete(_) => "glyph_delete",
			Event::SyntaxUpsert(_) => "syntax_upsert",
			Event::SyntaxDelete(_) => "syntax_delete",
			Event::MetricsUpdate(_) => "metrics_update",
		}
	}

	/// The JSON value carried in the SSE `data:` field.
	pub fn to_json(&self) -> Value {
		match self {
			Event::Snapshot(doc) => {
				serde_json::to_value(doc.as_ref()).expect("ProjectDocument serialization is infallible")
			},
			Event::GlyphUpsert(data)
			| Event::GlyphDelete(data)
			| Event::SyntaxUpsert(data)
			| Event::SyntaxDelete(data) => {
				serde_json::to_value(data).expect("EntityEventData serialization is infallible")
			},
			Event::MetricsUpdate(data) => {
				serde_json::to_value(data).expect("MetricsEventData serialization is infallible")
			},
		}
	}

	/// The `projectVersion` carried by this event, used to assert ordering in tests.
	pub fn project_version(&self) -> u64 {
		match self {
			Event::Snapshot(doc) => doc.version,
			Event::GlyphUpsert(data)
			| Event::GlyphDelete(data)
			| Event::SyntaxUpsert(data)
			| Event::SyntaxDelete(data) => data.project_version,
			Event::MetricsUpdate(data) => data.project_version,
		}
	}
}
