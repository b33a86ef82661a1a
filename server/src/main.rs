//! Hosts the collaboration hub's HTTP/SSE server binary.
//!
//! The hub mediates concurrent edits to a structured JSON "project" document
//! — glyphs, syntax rules, and a metrics singleton — shared by many browser
//! clients. It maintains an authoritative in-memory state per project,
//! persists it to disk on every successful write, fans out change events to
//! subscribers over server-sent events, and rejects stale writes using
//! per-entity version numbers.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::signal::unix::SignalKind;

use impls::file_hub::FileBackedHub;

mod service;
mod tracing_init;
mod util;

use service::HubService;
use util::config::Configuration;

/// How long `main` waits for in-flight requests (chiefly long-lived SSE
/// streams) to drain after a shutdown signal before giving up (spec §5).
const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();
	let Configuration { addr, data_dir, allow_origin, ui_dir, log_level } =
		match util::config::load_configuration(&args) {
			Ok(cfg) => cfg,
			Err(e) => {
				eprintln!("Failed to load configuration: {}", e);
				std::process::exit(1);
			},
		};

	tracing_init::configure_tracer(&log_level);

	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(runtime) => runtime,
		Err(e) => {
			eprintln!("Failed to setup tokio runtime: {}", e);
			std::process::exit(1);
		},
	};

	runtime.block_on(async move {
		let mut sigterm_stream = match tokio::signal::unix::signal(SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				tracing::error!(error = %e, "failed to register SIGTERM stream");
				std::process::exit(1);
			},
		};

		let hub: Arc<dyn api::hub::Hub> = Arc::new(FileBackedHub::new(data_dir.clone()));
		let service = HubService::new(hub, allow_origin, ui_dir);

		let listener = match TcpListener::bind(addr).await {
			Ok(listener) => listener,
			Err(e) => {
				tracing::error!(error = %e, %addr, "failed to bind listening port");
				std::process::exit(1);
			},
		};
		tracing::info!(%addr, data_dir = %data_dir.display(), "listening for incoming connections");

		let graceful = GracefulShutdown::new();
		loop {
			tokio::select! {
				res = listener.accept() => {
					match res {
						Ok((stream, peer_addr)) => {
							let io_stream = TokioIo::new(stream);
							let svc = service.clone();
							let conn = http1::Builder::new().serve_connection(io_stream, svc);
							let conn = graceful.watch(conn);
							tokio::spawn(async move {
								if let Err(err) = conn.await {
									tracing::debug!(error = %err, %peer_addr, "connection error");
								}
							});
						},
						Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
					}
				}
				_ = tokio::signal::ctrl_c() => {
					tracing::info!("received CTRL-C, shutting down");
					break;
				}
				_ = sigterm_stream.recv() => {
					tracing::info!("received SIGTERM, shutting down");
					break;
				}
			}
		}

		tokio::select! {
			_ = graceful.shutdown() => {
				tracing::info!("all connections drained cleanly");
			},
			_ = tokio::time::sleep(SHUTDOWN_DRAIN_DEADLINE) => {
				tracing::warn!("shutdown drain deadline elapsed, exiting with connections still open");
			},
		}
	});
}
