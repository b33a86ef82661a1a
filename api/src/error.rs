use crate::types::{EntityMutationResponse, ProjectDocument};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

/// Carries the authoritative server-side state returned alongside a conflict.
///
/// Single-entity operations (glyph/syntax/metrics upsert or delete) report the
/// [`EntityMutationResponse`] shape; the full-snapshot replace reports the
/// whole [`ProjectDocument`].
#[derive(Debug, Clone)]
pub enum ConflictBody {
	/// Conflict on a single glyph, syntax, or metrics mutation.
	Entity(Box<EntityMutationResponse>),
	/// Conflict on a full-snapshot project replace.
	Project(Box<ProjectDocument>),
}

/// Error taxonomy for the collaboration hub. Each variant maps to exactly
/// one HTTP status code at the service boundary.
#[derive(Debug)]
pub enum HubError {
	/// Malformed JSON, wrong shape, missing/empty id, or missing `baseVersion`. Surfaced as 400.
	InvalidPayload(String),
	/// `baseVersion` did not match the current version for the mutation's target. Surfaced as 409.
	Conflict(ConflictBody),
	/// Read of a project with no in-memory state and no on-disk artifact. Surfaced as 404.
	NotFound(String),
	/// I/O error while loading or persisting a project. Surfaced as 500.
	StorageFailure(String),
}

impl Display for HubError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			HubError::InvalidPayload(message) => write!(f, "Invalid payload: {}", message),
			HubError::Conflict(_) => write!(f, "Version conflict"),
			HubError::NotFound(message) => write!(f, "Not found: {}", message),
			HubError::StorageFailure(message) => write!(f, "Storage failure: {}", message),
		}
	}
}

impl Error for HubError {}

impl From<io::Error> for HubError {
	fn from(err: io::Error) -> Self {
		HubError::StorageFailure(err.to_string())
	}
}

impl From<serde_json::Error> for HubError {
	fn from(err: serde_json::Error) -> Self {
		HubError::InvalidPayload(err.to_string())
	}
}
