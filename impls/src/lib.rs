//! Hosts collaboration-hub-protocol compliant [`Hub`] implementations for
//! various backends.
//!
//! The hub mediates concurrent edits to a structured JSON "project" document
//! — glyphs, syntax rules, and a metrics singleton — shared by many clients
//! over HTTP and server-sent events. [`file_hub::FileBackedHub`] is the sole
//! backend: a single in-memory map of project state guarded by one mutex,
//! persisted to a local directory on every successful write.
//!
//! [`Hub`]: api::hub::Hub

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]

use chrono::Utc;

/// Backs the [`api::hub::Hub`] trait with a directory of JSON files.
pub mod file_hub;
mod persistence;
mod project_state;

#[macro_use]
extern crate api;

pub(crate) fn now_rfc3339() -> String {
	Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
	use crate::file_hub::FileBackedHub;

	define_hub_tests!(
		FileBackedHubTest,
		FileBackedHub,
		FileBackedHub::new(tempfile::tempdir().unwrap().into_path())
	);
}
