use crate::error::HubError;
use crate::event::Event;
use crate::types::{
	DeleteGlyphRequest, DeleteSyntaxRequest, EntityMutationResponse, ProjectDocument,
	ReplaceProjectRequest, UpdateMetricsRequest, UpsertGlyphRequest, UpsertSyntaxRequest,
};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Bounded mailbox capacity for a single subscriber's event queue (spec §4.3).
///
/// Implemented on top of [`tokio::sync::broadcast`], whose internal ring
/// buffer already gives every receiver drop-oldest-on-overflow semantics: a
/// subscriber that falls more than `SUBSCRIBER_QUEUE_CAPACITY` events behind
/// loses the oldest ones and picks back up with the next live event on its
/// next `recv`, rather than blocking the publisher or any other subscriber.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 32;

/// A live subscription to a project's change stream. Dropping
/// [`Subscription::receiver`] is itself the unsubscribe: the broadcast
/// channel reclaims the slot automatically. Callers should still call
/// [`Hub::unsubscribe`] on disconnect so the hub can account for it eagerly
/// rather than only on the next publish.
pub struct Subscription {
	/// Opaque id used to identify this subscriber to [`Hub::unsubscribe`].
	pub id: u64,
	/// The project's state as of subscribe time, always delivered first and
	/// exactly once to this subscriber (never re-broadcast to others).
	pub initial_snapshot: Event,
	/// Receives every event published for the project after subscribe time.
	pub receiver: broadcast::Receiver<Event>,
}

/// An interface that must be implemented by every backend implementation of
/// the collaboration hub.
///
/// All mutation methods take `project_id` pre-sanitized (spec §6.5) by the
/// caller; the hub itself never coerces ids.
#[async_trait]
pub trait Hub: Send + Sync {
	/// Reads the current document for a project. `NotFound` if there is no
	/// in-memory state and no on-disk artifact for `project_id`.
	async fn get_project(&self, project_id: &str) -> Result<ProjectDocument, HubError>;

	/// Full-snapshot replace: reconciles entity maps and metrics against
	/// `request`, per spec §4.2.3.
	async fn replace_project(
		&self, project_id: &str, request: ReplaceProjectRequest,
	) -> Result<ProjectDocument, HubError>;

	/// Inserts or replaces a single glyph.
	async fn upsert_glyph(
		&self, project_id: &str, request: UpsertGlyphRequest,
	) -> Result<EntityMutationResponse, HubError>;

	/// Removes a single glyph. Idempotent: deleting an absent glyph with a
	/// matching (i.e. zero) base version is a no-op success.
	async fn delete_glyph(
		&self, project_id: &str, request: DeleteGlyphRequest,
	) -> Result<EntityMutationResponse, HubError>;

	/// Inserts or replaces a single syntax rule. Symmetric to [`Hub::upsert_glyph`].
	async fn upsert_syntax(
		&self, project_id: &str, request: UpsertSyntaxRequest,
	) -> Result<EntityMutationResponse, HubError>;

	/// Removes a single syntax rule. Symmetric to [`Hub::delete_glyph`].
	async fn delete_syntax(
		&self, project_id: &str, request: DeleteSyntaxRequest,
	) -> Result<EntityMutationResponse, HubError>;

	/// Replaces the metrics singleton.
	async fn update_metrics(
		&self, project_id: &str, request: UpdateMetricsRequest,
	) -> Result<EntityMutationResponse, HubError>;

	/// Attaches a new subscriber to `project_id`, creating the project
	/// (loading from disk, or empty) if it did not already exist. The
	/// returned [`Subscription`]'s receiver yields one `snapshot` event
	/// immediately, followed by every subsequent change event in
	/// publish order (subject to the drop-oldest policy of spec §4.3).
	async fn subscribe(&self, project_id: &str) -> Subscription;

	/// Detaches a subscriber previously returned by [`Hub::subscribe`].
	/// A no-op if the subscriber (or the project) is already gone.
	async fn unsubscribe(&self, project_id: &str, subscriber_id: u64);
}
