//! In-memory state for a single project: entity maps, per-entity version
//! tables, the metrics singleton, and the broadcast sender subscribers attach
//! to. Pure data plus pure mutation logic — no I/O, no locking (the owning
//! [`crate::file_hub::FileBackedHub`] serializes access via its outer mutex).

use api::codec;
use api::error::{ConflictBody, HubError};
use api::event::{EntityEventData, Event, MetricsEventData};
use api::hub::SUBSCRIBER_QUEUE_CAPACITY;
use api::types::{EntityKind, EntityMutationResponse, ProjectDocument};
use crate::now_rfc3339;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Everything the hub holds in memory for one project.
#[derive(Clone)]
pub(crate) struct ProjectState {
	pub(crate) project: String,
	pub(crate) version: u64,
	pub(crate) updated_at: String,
	pub(crate) glyphs: BTreeMap<String, Value>,
	pub(crate) glyph_versions: BTreeMap<String, u64>,
	pub(crate) syntaxes: BTreeMap<String, Value>,
	pub(crate) syntax_versions: BTreeMap<String, u64>,
	pub(crate) metrics: Value,
	pub(crate) metrics_version: u64,
	events: broadcast::Sender<Event>,
}

impl ProjectState {
	/// A brand-new project, never persisted.
	pub(crate) fn empty(project: String) -> Self {
		let (events, _) = broadcast::channel(SUBSCRIBER_QUEUE_CAPACITY);
		Self {
			project,
			version: 0,
			updated_at: now_rfc3339(),
			glyphs: BTreeMap::new(),
			glyph_versions: BTreeMap::new(),
			syntaxes: BTreeMap::new(),
			syntax_versions: BTreeMap::new(),
			metrics: Value::Object(Default::default()),
			metrics_version: 0,
			events,
		}
	}

	/// Rehydrates state from a document loaded from disk.
	pub(crate) fn from_document(doc: ProjectDocument) -> Self {
		let (events, _) = broadcast::channel(SUBSCRIBER_QUEUE_CAPACITY);
		let glyphs = doc.glyphs.into_iter().filter_map(entry_by_id).collect();
		let syntaxes = doc.syntaxes.into_iter().filter_map(entry_by_id).collect();
		Self {
			project: doc.project,
			version: doc.version,
			updated_at: doc.updated_at,
			glyphs,
			glyph_versions: doc.glyph_versions,
			syntaxes,
			syntax_versions: doc.syntax_versions,
			metrics: doc.metrics,
			metrics_version: doc.metrics_version,
			events,
		}
	}

	pub(crate) fn to_document(&self) -> ProjectDocument {
		ProjectDocument {
			project: self.project.clone(),
			version: self.version,
			updated_at: self.updated_at.clone(),
			glyphs: codec::serialize_entity_map(&self.glyphs),
			glyph_versions: self.glyph_versions.clone(),
			syntaxes: codec::serialize_entity_map(&self.syntaxes),
			syntax_versions: self.syntax_versions.clone(),
			metrics: self.metrics.clone(),
			metrics_version: self.metrics_version,
		}
	}

	pub(crate) fn subscribe(&self) -> (Event, broadcast::Receiver<Event>) {
		(Event::Snapshot(Box::new(self.to_document())), self.events.subscribe())
	}

	pub(crate) fn publish(&self, event: Event) {
		// Err means there are currently no live receivers; not an error for us.
		let _ = self.events.send(event);
	}

	fn entity_response(
		&self, entity: EntityKind, entity_id: Option<String>, version: u64, deleted: bool,
		payload: Option<Value>,
	) -> EntityMutationResponse {
		EntityMutationResponse {
			project: self.project.clone(),
			entity,
			entity_id,
			version,
			project_version: self.version,
			deleted,
			updated_at: self.updated_at.clone(),
			payload,
		}
	}

	pub(crate) fn upsert_glyph(
		&mut self, id: String, value: Value, base_version: u64, client_id: Option<String>,
	) -> Result<(EntityMutationResponse, Option<Event>), HubError> {
		upsert_entity(
			self, EntityKind::Glyph, id, value, base_version, client_id,
			|s| &mut s.glyphs, |s| &mut s.glyph_versions,
			Event::GlyphUpsert,
		)
	}

	pub(crate) fn delete_glyph(
		&mut self, id: String, base_version: u64, client_id: Option<String>,
	) -> Result<(EntityMutationResponse, Option<Event>), HubError> {
		delete_entity(
			self, EntityKind::Glyph, id, base_version, client_id,
			|s| &mut s.glyphs, |s| &mut s.glyph_versions,
			Event::GlyphDelete,
		)
	}

	pub(crate) fn upsert_syntax(
		&mut self, id: String, value: Value, base_version: u64, client_id: Option<String>,
	) -> Result<(EntityMutationResponse, Option<Event>), HubError> {
		upsert_entity(
			self, EntityKind::Syntax, id, value, base_version, client_id,
			|s| &mut s.syntaxes, |s| &mut s.syntax_versions,
			Event::SyntaxUpsert,
		)
	}

	pub(crate) fn delete_syntax(
		&mut self, id: String, base_version: u64, client_id: Option<String>,
	) -> Result<(EntityMutationResponse, Option<Event>), HubError> {
		delete_entity(
			self, EntityKind::Syntax, id, base_version, client_id,
			|s| &mut s.syntaxes, |s| &mut s.syntax_versions,
			Event::SyntaxDelete,
		)
	}

	pub(crate) fn update_metrics(
		&mut self, new_metrics: Value, base_version: u64, client_id: Option<String>,
	) -> Result<(EntityMutationResponse, Option<Event>), HubError> {
		if base_version != self.metrics_version {
			let resp = self.entity_response(
				EntityKind::Metrics, None, self.metrics_version, false, Some(self.metrics.clone()),
			);
			return Err(HubError::Conflict(ConflictBody::Entity(Box::new(resp))));
		}

		let changed = codec::canonical_bytes(&self.metrics) != codec::canonical_bytes(&new_metrics);
		if !changed {
			let resp = self.entity_response(
				EntityKind::Metrics, None, self.metrics_version, false, Some(new_metrics),
			);
			return Ok((resp, None));
		}

		self.metrics = new_metrics.clone();
		self.metrics_version += 1;
		self.version += 1;
		self.updated_at = now_rfc3339();

		let resp = self.entity_response(
			EntityKind::Metrics, None, self.metrics_version, false, Some(new_metrics.clone()),
		);
		let event = Event::MetricsUpdate(MetricsEventData {
			project: self.project.clone(),
			version: self.metrics_version,
			project_version: self.version,
			payload: new_metrics,
			client_id,
			updated_at: self.updated_at.clone(),
		});
		Ok((resp, Some(event)))
	}

	pub(crate) fn replace_project(
		&mut self, glyphs_in: &Value, syntaxes_in: &Value, metrics_in: &Value, base_version: u64,
		_client_id: Option<String>,
	) -> Result<(ProjectDocument, Option<Event>), HubError> {
		if base_version != self.version {
			return Err(HubError::Conflict(ConflictBody::Project(Box::new(self.to_document()))));
		}

		let incoming_glyphs = codec::parse_entity_array_by_id(glyphs_in)?;
		let incoming_syntaxes = codec::parse_entity_array_by_id(syntaxes_in)?;
		let incoming_metrics = codec::normalize_raw_object(metrics_in)?;

		let new_glyph_versions =
			reconcile_versions(&self.glyphs, &self.glyph_versions, &incoming_glyphs);
		let new_syntax_versions =
			reconcile_versions(&self.syntaxes, &self.syntax_versions, &incoming_syntaxes);
		let metrics_changed =
			codec::canonical_bytes(&self.metrics) != codec::canonical_bytes(&incoming_metrics);

		self.glyphs = incoming_glyphs;
		self.glyph_versions = new_glyph_versions;
		self.syntaxes = incoming_syntaxes;
		self.syntax_versions = new_syntax_versions;
		self.metrics = incoming_metrics;
		if metrics_changed {
			self.metrics_version += 1;
		}
		self.version += 1;
		self.updated_at = now_rfc3339();

		let doc = self.to_document();
		let event = Event::Snapshot(Box::new(doc.clone()));
		Ok((doc, Some(event)))
	}
}

fn entry_by_id(value: Value) -> Option<(String, Value)> {
	let id = value.get("id")?.as_str()?.to_string();
	Some((id, value))
}

/// Reconciles a full-snapshot entity array against the previous map:
/// unchanged payload keeps its version, changed payload bumps it, a
/// brand-new id starts at 1. Ids absent from `incoming` are simply not
/// carried into the result (spec §4.2.3: "removing ids not present").
fn reconcile_versions(
	previous: &BTreeMap<String, Value>, previous_versions: &BTreeMap<String, u64>,
	incoming: &BTreeMap<String, Value>,
) -> BTreeMap<String, u64> {
	let mut result = BTreeMap::new();
	for (id, value) in incoming {
		let version = match previous.get(id) {
			None => 1,
			Some(existing) => {
				if codec::canonical_bytes(existing) == codec::canonical_bytes(value) {
					previous_versions.get(id).copied().unwrap_or(1).max(1)
				} else {
					previous_versions.get(id).copied().unwrap_or(0) + 1
				}
			},
		};
		result.insert(id.clone(), version);
	}
	result
}

#[allow(clippy::too_many_arguments)]
fn upsert_entity(
	state: &mut ProjectState, kind: EntityKind, id: String, value: Value, base_version: u64,
	client_id: Option<String>, map: impl Fn(&mut ProjectState) -> &mut BTreeMap<String, Value>,
	versions: impl Fn(&mut ProjectState) -> &mut BTreeMap<String, u64>,
	make_event: fn(EntityEventData) -> Event,
) -> Result<(EntityMutationResponse, Option<Event>), HubError> {
	let current_version = versions(state).get(&id).copied().unwrap_or(0);
	if base_version != current_version {
		let payload = map(state).get(&id).cloned();
		let resp = state.entity_response(kind, Some(id), current_version, false, payload);
		return Err(HubError::Conflict(ConflictBody::Entity(Box::new(resp))));
	}

	let existing = map(state).get(&id).cloned();
	let changed = existing
		.as_ref()
		.map(|e| codec::canonical_bytes(e) != codec::canonical_bytes(&value))
		.unwrap_or(true);
	if !changed {
		let resp = state.entity_response(kind, Some(id), current_version, false, Some(value));
		return Ok((resp, None));
	}

	let new_version = if existing.is_some() { current_version + 1 } else { 1 };
	map(state).insert(id.clone(), value.clone());
	versions(state).insert(id.clone(), new_version);
	state.version += 1;
	state.updated_at = now_rfc3339();

	let resp = state.entity_response(kind, Some(id.clone()), new_version, false, Some(value.clone()));
	let event = make_event(EntityEventData {
		project: state.project.clone(),
		entity_id: id,
		version: new_version,
		project_version: state.version,
		payload: Some(value),
		deleted: false,
		client_id,
		updated_at: state.updated_at.clone(),
	});
	Ok((resp, Some(event)))
}

#[allow(clippy::too_many_arguments)]
fn delete_entity(
	state: &mut ProjectState, kind: EntityKind, id: String, base_version: u64,
	client_id: Option<String>, map: impl Fn(&mut ProjectState) -> &mut BTreeMap<String, Value>,
	versions: impl Fn(&mut ProjectState) -> &mut BTreeMap<String, u64>,
	make_event: fn(EntityEventData) -> Event,
) -> Result<(EntityMutationResponse, Option<Event>), HubError> {
	let current_version = versions(state).get(&id).copied().unwrap_or(0);
	if base_version != current_version {
		let payload = map(state).get(&id).cloned();
		let resp = state.entity_response(kind, Some(id), current_version, current_version == 0, payload);
		return Err(HubError::Conflict(ConflictBody::Entity(Box::new(resp))));
	}

	if current_version == 0 {
		let resp = state.entity_response(kind, Some(id), 0, true, None);
		return Ok((resp, None));
	}

	map(state).remove(&id);
	versions(state).remove(&id);
	state.version += 1;
	state.updated_at = now_rfc3339();

	let resp = state.entity_response(kind, Some(id.clone()), current_version, true, None);
	let event = make_event(EntityEventData {
		project: state.project.clone(),
		entity_id: id,
		version: current_version,
		project_version: state.version,
		payload: None,
		deleted: true,
		client_id,
		updated_at: state.updated_at.clone(),
	});
	Ok((resp, Some(event)))
}
