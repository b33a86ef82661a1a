//! The HTTP/SSE surface (spec §4.5, §6): a hand-rolled [`hyper::service::Service`]
//! that decodes requests, dispatches to the [`Hub`], and maps the result back
//! to a status code and JSON body.

use api::error::{ConflictBody, HubError};
use api::event::Event;
use api::hub::{Hub, Subscription};
use api::types::{
	sanitize_project_id, DeleteGlyphRequest, DeleteSyntaxRequest, EntityMutationResponse,
	ReplaceProjectRequest, UpdateMetricsRequest, UpsertGlyphRequest, UpsertSyntaxRequest,
};
use async_stream::stream;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const MAX_REQUEST_BODY_BYTES: usize = 20 * 1024 * 1024;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Serves the collaboration hub's HTTP and SSE surface over a single hub instance.
#[derive(Clone)]
pub struct HubService {
	hub: Arc<dyn Hub>,
	allow_origin: Arc<str>,
	ui_dir: Option<Arc<Path>>,
}

impl HubService {
	/// Builds the service. `ui_dir`, if set, is served for any GET request that
	/// doesn't match a known API route.
	pub fn new(hub: Arc<dyn Hub>, allow_origin: String, ui_dir: Option<PathBuf>) -> Self {
		Self {
			hub,
			allow_origin: Arc::from(allow_origin.as_str()),
			ui_dir: ui_dir.map(|p| Arc::from(p.as_path())),
		}
	}
}

impl Service<Request<Incoming>> for HubService {
	type Response = Response<BoxBody<Bytes, Infallible>>;
	type Error = Infallible;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn call(&self, req: Request<Incoming>) -> Self::Future {
		let hub = Arc::clone(&self.hub);
		let allow_origin = Arc::clone(&self.allow_origin);
		let ui_dir = self.ui_dir.clone();
		Box::pin(async move { Ok(route(hub, allow_origin, ui_dir, req).await) })
	}
}

async fn route(
	hub: Arc<dyn Hub>, allow_origin: Arc<str>, ui_dir: Option<Arc<Path>>, req: Request<Incoming>,
) -> Response<BoxBody<Bytes, Infallible>> {
	let start = std::time::Instant::now();
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	let request_origin =
		req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()).map(str::to_string);

	let response = dispatch(&hub, &ui_dir, &allow_origin, req).await;
	let response = apply_cors(response, &allow_origin, request_origin.as_deref());

	let elapsed_ms = start.elapsed().as_millis();
	let status = response.status().as_u16();
	if response.status().is_server_error() {
		tracing::error!(%method, %path, status, elapsed_ms, "request failed");
	} else {
		tracing::info!(%method, %path, status, elapsed_ms, "request handled");
	}
	response
}

async fn dispatch(
	hub: &Arc<dyn Hub>, ui_dir: &Option<Arc<Path>>, allow_origin: &str, req: Request<Incoming>,
) -> Response<BoxBody<Bytes, Infallible>> {
	let method = req.method().clone();
	let path = req.uri().path().to_string();

	if method == Method::OPTIONS && is_api_path(&path) {
		let request_origin =
			req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()).map(str::to_string);
		return apply_cors(preflight_response(), allow_origin, request_origin.as_deref());
	}

	let project_id = sanitize_project_id(query_param(req.uri().query(), "project").unwrap_or(""));

	match (&method, path.as_str()) {
		(&Method::GET, "/healthz") => json_response(StatusCode::OK, &serde_json::json!({"status": "ok"})),

		(&Method::GET, "/api/project") => match hub.get_project(&project_id).await {
			Ok(doc) => json_response(StatusCode::OK, &doc),
			Err(err) => error_response(err),
		},
		(&Method::PUT, "/api/project") => {
			handle_mutation(req, |body: ReplaceProjectRequest| async move {
				hub.replace_project(&project_id, body).await.map(|doc| json_response(StatusCode::OK, &doc))
			})
			.await
		},
		(&Method::PUT, "/api/glyph") => {
			handle_mutation(req, |body: UpsertGlyphRequest| async move {
				hub.upsert_glyph(&project_id, body).await.map(respond_entity)
			})
			.await
		},
		(&Method::DELETE, "/api/glyph") => {
			handle_mutation(req, |body: DeleteGlyphRequest| async move {
				hub.delete_glyph(&project_id, body).await.map(respond_entity)
			})
			.await
		},
		(&Method::PUT, "/api/syntax") => {
			handle_mutation(req, |body: UpsertSyntaxRequest| async move {
				hub.upsert_syntax(&project_id, body).await.map(respond_entity)
			})
			.await
		},
		(&Method::DELETE, "/api/syntax") => {
			handle_mutation(req, |body: DeleteSyntaxRequest| async move {
				hub.delete_syntax(&project_id, body).await.map(respond_entity)
			})
			.await
		},
		(&Method::PUT, "/api/metrics") => {
			handle_mutation(req, |body: UpdateMetricsRequest| async move {
				hub.update_metrics(&project_id, body).await.map(respond_entity)
			})
			.await
		},

		(&Method::GET, "/api/events") => {
			let subscription = hub.subscribe(&project_id).await;
			sse_response(Arc::clone(hub), project_id, subscription)
		},

		(_, p) if is_api_path(p) || p == "/healthz" => {
			plain_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
		},
		(&Method::GET, p) => serve_static(ui_dir, p).await,
		_ => plain_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
	}
}

fn is_api_path(path: &str) -> bool {
	matches!(path, "/api/project" | "/api/glyph" | "/api/syntax" | "/api/metrics" | "/api/events")
}

fn respond_entity(resp: EntityMutationResponse) -> Response<BoxBody<Bytes, Infallible>> {
	json_response(StatusCode::OK, &resp)
}

async fn handle_mutation<T, Fut>(
	req: Request<Incoming>, handler: impl FnOnce(T) -> Fut,
) -> Response<BoxBody<Bytes, Infallible>>
where
	T: DeserializeOwned,
	Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>, HubError>>,
{
	match decode_json::<T>(req.into_body()).await {
		Ok(body) => match handler(body).await {
			Ok(response) => response,
			Err(err) => error_response(err),
		},
		Err(err) => error_response(err),
	}
}

async fn decode_json<T: DeserializeOwned>(body: Incoming) -> Result<T, HubError> {
	let limited = Limited::new(body, MAX_REQUEST_BODY_BYTES);
	let collected = limited
		.collect()
		.await
		.map_err(|_| HubError::InvalidPayload("request body too large or unreadable".to_string()))?;
	let bytes = collected.to_bytes();
	serde_json::from_slice(&bytes).map_err(HubError::from)
}

fn query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
	query?.split('&').find_map(|pair| {
		let (k, v) = pair.split_once('=')?;
		(k == key).then_some(v)
	})
}

fn full(bytes: Vec<u8>) -> BoxBody<Bytes, Infallible> {
	Full::new(Bytes::from(bytes)).boxed()
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<BoxBody<Bytes, Infallible>> {
	let bytes = serde_json::to_vec(value).expect("response payloads are always serializable");
	Response::builder()
		.status(status)
		.header("content-type", "application/json")
		.body(full(bytes))
		.expect("static header set upheld by construction")
}

fn plain_error(status: StatusCode, message: impl Into<String>) -> Response<BoxBody<Bytes, Infallible>> {
	json_response(status, &serde_json::json!({"error": message.into()}))
}

fn error_response(err: HubError) -> Response<BoxBody<Bytes, Infallible>> {
	match err {
		HubError::InvalidPayload(msg) => plain_error(StatusCode::BAD_REQUEST, msg),
		HubError::NotFound(msg) => plain_error(StatusCode::NOT_FOUND, msg),
		HubError::StorageFailure(msg) => {
			tracing::error!(error = %msg, "storage failure");
			plain_error(StatusCode::INTERNAL_SERVER_ERROR, "internal storage failure")
		},
		HubError::Conflict(ConflictBody::Entity(resp)) => {
			json_response(StatusCode::CONFLICT, resp.as_ref())
		},
		HubError::Conflict(ConflictBody::Project(doc)) => {
			json_response(StatusCode::CONFLICT, doc.as_ref())
		},
	}
}

fn cors_origin_value(configured: &str, request_origin: Option<&str>) -> Option<String> {
	if configured == "*" {
		Some("*".to_string())
	} else {
		request_origin.filter(|origin| *origin == configured).map(str::to_string)
	}
}

fn apply_cors(
	mut response: Response<BoxBody<Bytes, Infallible>>, allow_origin: &str, request_origin: Option<&str>,
) -> Response<BoxBody<Bytes, Infallible>> {
	if let Some(value) = cors_origin_value(allow_origin, request_origin) {
		if let Ok(header_value) = HeaderValue::from_str(&value) {
			response.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, header_value);
		}
	}
	response
}

fn preflight_response() -> Response<BoxBody<Bytes, Infallible>> {
	Response::builder()
		.status(StatusCode::NO_CONTENT)
		.header("access-control-allow-methods", "GET,PUT,DELETE,OPTIONS")
		.header("access-control-allow-headers", "Content-Type,Last-Event-ID")
		.body(full(Vec::new()))
		.expect("static preflight response is always valid")
}

/// Drops the subscriber from the hub's bookkeeping once the SSE stream ends,
/// whether by graceful channel closure or the client disconnecting mid-stream.
struct SubscriptionGuard {
	hub: Arc<dyn Hub>,
	project_id: String,
	id: u64,
}

impl Drop for SubscriptionGuard {
	fn drop(&mut self) {
		let hub = Arc::clone(&self.hub);
		let project_id = std::mem::take(&mut self.project_id);
		let id = self.id;
		tokio::spawn(async move { hub.unsubscribe(&project_id, id).await });
	}
}

fn sse_response(
	hub: Arc<dyn Hub>, project_id: String, subscription: Subscription,
) -> Response<BoxBody<Bytes, Infallible>> {
	let Subscription { id, initial_snapshot, mut receiver } = subscription;
	let guard = SubscriptionGuard { hub, project_id, id };

	let body = stream! {
		let _guard = guard;
		yield Ok::<_, Infallible>(Frame::data(encode_sse_event(&initial_snapshot)));
		loop {
			tokio::select! {
				received = receiver.recv() => {
					match received {
						Ok(event) => yield Ok(Frame::data(encode_sse_event(&event))),
						Err(broadcast::error::RecvError::Lagged(_)) => continue,
						Err(broadcast::error::RecvError::Closed) => break,
					}
				},
				_ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
					yield Ok(Frame::data(encode_ping()));
				},
			}
		}
	};

	Response::builder()
		.status(StatusCode::OK)
		.header("content-type", "text/event-stream")
		.header("cache-control", "no-cache")
		.body(StreamBody::new(body).boxed())
		.expect("sse response is always valid")
}

fn encode_sse_event(event: &Event) -> Bytes {
	let json = serde_json::to_string(&event.to_json()).expect("Event::to_json always serializes");
	Bytes::from(format!("event: {}\ndata: {}\n\n", event.event_type(), json))
}

fn encode_ping() -> Bytes {
	let nanos = std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_nanos())
		.unwrap_or(0);
	Bytes::from(format!(": ping {nanos}\n\n"))
}

async fn serve_static(ui_dir: &Option<Arc<Path>>, path: &str) -> Response<BoxBody<Bytes, Infallible>> {
	let Some(root) = ui_dir else {
		return plain_error(StatusCode::NOT_FOUND, "not found");
	};

	let relative = path.trim_start_matches('/');
	if relative.contains("..") {
		return plain_error(StatusCode::BAD_REQUEST, "invalid path");
	}

	let candidate = if relative.is_empty() { root.join("index.html") } else { root.join(relative) };
	match tokio::fs::read(&candidate).await {
		Ok(bytes) => Response::builder()
			.status(StatusCode::OK)
			.header("content-type", guess_content_type(&candidate))
			.body(full(bytes))
			.expect("static file response is always valid"),
		Err(_) => plain_error(StatusCode::NOT_FOUND, "not found"),
	}
}

fn guess_content_type(path: &Path) -> &'static str {
	match path.extension().and_then(|ext| ext.to_str()) {
		Some("html") => "text/html; charset=utf-8",
		Some("js") => "application/javascript",
		Some("css") => "text/css",
		Some("json") => "application/json",
		Some("svg") => "image/svg+xml",
		Some("png") => "image/png",
		Some("wasm") => "application/wasm",
		_ => "application/octet-stream",
	}
}
