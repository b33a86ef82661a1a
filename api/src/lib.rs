//! Hosts the API contract for the collaboration hub.
//!
//! The hub mediates concurrent edits to a structured JSON "project" document
//! shared by many clients: an in-memory entity map per project, versioned
//! per-entity for optimistic concurrency control, persisted to disk on every
//! successful write and fanned out to subscribers over server-sent events.
//! This crate defines the wire-independent contract — types, errors, the
//! entity codec, and the [`hub::Hub`] trait — leaving transport (HTTP/SSE)
//! and storage backends to downstream crates.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]

/// Validates and canonicalizes the opaque JSON payloads carried by glyphs,
/// syntaxes, and metrics.
pub mod codec;

/// Implements the error type ([`error::HubError`]) returned by every [`hub::Hub`] method.
pub mod error;

/// The events published by the hub to every subscriber of a project.
pub mod event;

/// Contains the [`hub::Hub`] trait which must be implemented by every backend
/// implementation of the collaboration hub.
pub mod hub;

/// Defines a shared test suite any [`hub::Hub`] implementation can run via
/// [`define_hub_tests!`]. Only compiled when the `test-utils` feature is enabled.
#[cfg(feature = "test-utils")]
pub mod hub_tests;

/// Contains request/response types for the hub's five mutation operations and
/// its read contract.
pub mod types;
