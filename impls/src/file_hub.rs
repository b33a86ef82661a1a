//! [`FileBackedHub`]: the concrete, file-persisted implementation of
//! [`api::hub::Hub`]. A single `tokio::sync::Mutex` guards a map of resident
//! [`ProjectState`]s for structural access (load/insert/read); disk I/O
//! always happens outside that lock (spec §5). A second, per-project
//! `tokio::sync::Mutex` (see [`FileBackedHub::project_write_lock`]) is held
//! across each mutation's entire mutate-persist-publish sequence so that two
//! writers racing on the *same* project can never interleave at the I/O
//! boundary; writers for different projects never contend on it.

use crate::persistence;
use crate::project_state::ProjectState;
use api::error::HubError;
use api::event::Event;
use api::hub::{Hub, Subscription};
use api::types::{
	sanitize_project_id, DeleteGlyphRequest, DeleteSyntaxRequest, EntityMutationResponse,
	ProjectDocument, ReplaceProjectRequest, UpdateMetricsRequest, UpsertGlyphRequest,
	UpsertSyntaxRequest,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Backs the hub with a directory of JSON files (spec §4.4).
pub struct FileBackedHub {
	data_dir: PathBuf,
	projects: Mutex<HashMap<String, ProjectState>>,
	write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
	next_subscriber_id: AtomicU64,
}

impl FileBackedHub {
	/// Opens (without yet reading anything from) `data_dir` as the backing
	/// store. Projects are loaded lazily, the first time each is touched.
	pub fn new(data_dir: impl Into<PathBuf>) -> Self {
		Self {
			data_dir: data_dir.into(),
			projects: Mutex::new(HashMap::new()),
			write_locks: Mutex::new(HashMap::new()),
			next_subscriber_id: AtomicU64::new(1),
		}
	}

	/// Returns the per-project write lock for `project_id`, creating it on
	/// first use. Held across [`FileBackedHub::run_mutation`]'s entire
	/// mutate-persist-publish sequence so that mutations to one project are
	/// fully serialized (spec §5) while mutations to other projects proceed
	/// uncontended.
	async fn project_write_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
		let mut guard = self.write_locks.lock().await;
		Arc::clone(guard.entry(project_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
	}

	/// Ensures `project_id` is resident in memory, loading its on-disk
	/// aggregate (if any) or creating an empty project. Disk reads happen
	/// outside the hub lock; a short second acquisition commits the result,
	/// so a concurrent loader racing us simply loses harmlessly.
	async fn ensure_resident(&self, project_id: &str) -> Result<(), HubError> {
		{
			let guard = self.projects.lock().await;
			if guard.contains_key(project_id) {
				return Ok(());
			}
		}

		let data_dir = self.data_dir.clone();
		let project_id_owned = project_id.to_string();
		let loaded = tokio::task::spawn_blocking(move || {
			persistence::load_aggregate(&data_dir, &project_id_owned)
		})
		.await
		.map_err(|e| HubError::StorageFailure(e.to_string()))??;

		let mut guard = self.projects.lock().await;
		guard.entry(project_id.to_string()).or_insert_with(|| match loaded {
			Some(doc) => ProjectState::from_document(doc),
			None => ProjectState::empty(sanitize_project_id(project_id)),
		});
		Ok(())
	}

	async fn persist(&self, doc: ProjectDocument) -> Result<(), HubError> {
		let data_dir = self.data_dir.clone();
		tokio::task::spawn_blocking(move || persistence::persist_project(&data_dir, &doc))
			.await
			.map_err(|e| HubError::StorageFailure(e.to_string()))?
			.map_err(HubError::from)
	}

	/// Runs `mutate` against the resident project under the hub lock,
	/// persists the result outside the lock, and publishes the resulting
	/// event only once persistence has succeeded. On persistence failure the
	/// in-memory state is rolled back to its pre-mutation value, so a failed
	/// write is never visible to a later read or a subscriber.
	///
	/// The project's write lock is held for the full duration of this
	/// method, so a second mutation racing on the same project waits for
	/// this one to either commit or roll back before it can observe or
	/// touch the project's state; a rollback can therefore never clobber a
	/// concurrent mutation's committed result.
	async fn run_mutation<R>(
		&self, project_id: &str,
		mutate: impl FnOnce(&mut ProjectState) -> Result<(R, Option<Event>), HubError>,
	) -> Result<R, HubError> {
		self.ensure_resident(project_id).await?;

		let write_lock = self.project_write_lock(project_id).await;
		let _write_guard = write_lock.lock().await;

		let (result, event, prior, new_doc) = {
			let mut guard = self.projects.lock().await;
			let state = guard.get_mut(project_id).expect("ensure_resident just populated this entry");
			let prior = state.clone();
			let (result, event) = mutate(state)?;
			let new_doc = state.to_document();
			(result, event, prior, new_doc)
		};

		if let Err(err) = self.persist(new_doc).await {
			log::warn!("persisting project '{project_id}' failed, rolling back in-memory state: {err}");
			let mut guard = self.projects.lock().await;
			guard.insert(project_id.to_string(), prior);
			return Err(err);
		}

		if let Some(event) = event {
			let guard = self.projects.lock().await;
			if let Some(state) = guard.get(project_id) {
				state.publish(event);
			}
		}

		Ok(result)
	}
}

#[async_trait]
impl Hub for FileBackedHub {
	async fn get_project(&self, project_id: &str) -> Result<ProjectDocument, HubError> {
		{
			let guard = self.projects.lock().await;
			if let Some(state) = guard.get(project_id) {
				return Ok(state.to_document());
			}
		}

		let data_dir = self.data_dir.clone();
		let project_id_owned = project_id.to_string();
		let loaded = tokio::task::spawn_blocking(move || {
			persistence::load_aggregate(&data_dir, &project_id_owned)
		})
		.await
		.map_err(|e| HubError::StorageFailure(e.to_string()))??;

		match loaded {
			Some(doc) => {
				let mut guard = self.projects.lock().await;
				let state =
					guard.entry(project_id.to_string()).or_insert_with(|| ProjectState::from_document(doc));
				Ok(state.to_document())
			},
			None => Err(HubError::NotFound(format!("project '{project_id}' has not been created"))),
		}
	}

	async fn replace_project(
		&self, project_id: &str, request: ReplaceProjectRequest,
	) -> Result<ProjectDocument, HubError> {
		self.run_mutation(project_id, |state| {
			state.replace_project(
				&request.glyphs, &request.syntaxes, &request.metrics, request.base_version,
				request.client_id,
			)
		})
		.await
	}

	async fn upsert_glyph(
		&self, project_id: &str, request: UpsertGlyphRequest,
	) -> Result<EntityMutationResponse, HubError> {
		let (id, value) = api::codec::parse_entity_item(&request.glyph)?;
		self.run_mutation(project_id, |state| {
			state.upsert_glyph(id, value, request.base_version, request.client_id)
		})
		.await
	}

	async fn delete_glyph(
		&self, project_id: &str, request: DeleteGlyphRequest,
	) -> Result<EntityMutationResponse, HubError> {
		self.run_mutation(project_id, |state| {
			state.delete_glyph(request.id, request.base_version, request.client_id)
		})
		.await
	}

	async fn upsert_syntax(
		&self, project_id: &str, request: UpsertSyntaxRequest,
	) -> Result<EntityMutationResponse, HubError> {
		let (id, value) = api::codec::parse_entity_item(&request.syntax)?;
		self.run_mutation(project_id, |state| {
			state.upsert_syntax(id, value, request.base_version, request.client_id)
		})
		.await
	}

	async fn delete_syntax(
		&self, project_id: &str, request: DeleteSyntaxRequest,
	) -> Result<EntityMutationResponse, HubError> {
		self.run_mutation(project_id, |state| {
			state.delete_syntax(request.id, request.base_version, request.client_id)
		})
		.await
	}

	async fn update_metrics(
		&self, project_id: &str, request: UpdateMetricsRequest,
	) -> Result<EntityMutationResponse, HubError> {
		self.run_mutation(project_id, |state| {
			state.update_metrics(request.metrics, request.base_version, request.client_id)
		})
		.await
	}

	async fn subscribe(&self, project_id: &str) -> Subscription {
		self.ensure_resident(project_id).await.ok();
		let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
		let guard = self.projects.lock().await;
		let state = guard.get(project_id).expect("ensure_resident populates every project");
		let (initial_snapshot, receiver) = state.subscribe();
		Subscription { id, initial_snapshot, receiver }
	}

	async fn unsubscribe(&self, _project_id: &str, _subscriber_id: u64) {
		// Dropping `Subscription::receiver` already reclaims the broadcast
		// slot; nothing further to release here.
	}
}
