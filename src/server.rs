//! Axum front door: turns HTTP traffic into worker events.

use std::sync::Arc;

use axum::{
  body::Bytes,
  extract::State,
  http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::ClientRegistry;
use crate::net::{self, Destination};
use crate::worker::{EventSender, Message};

/// Header browsers use to say what a request is for.
const FETCH_DEST: &str = "sec-fetch-dest";

#[derive(Clone)]
pub struct AppState {
  pub events: EventSender,
  pub clients: Arc<ClientRegistry>,
  pub origin: Url,
}

#[derive(Debug, Deserialize)]
struct SyncSignal {
  tag: String,
}

#[derive(Debug, Deserialize)]
struct ClickSignal {
  action: Option<String>,
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/__swcache/version", get(version_handler))
    .route("/__swcache/message", post(message_handler))
    .route("/__swcache/sync", post(sync_handler))
    .route("/__swcache/push", post(push_handler))
    .route("/__swcache/notificationclick", post(click_handler))
    .fallback(proxy_handler)
    .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
  F: std::future::Future<Output = ()> + Send + 'static,
{
  let addr = listener.local_addr()?;
  info!(%addr, origin = %state.origin, "Listening");

  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| eyre!("Server failed: {}", e))
}

/// GET /__swcache/version
async fn version_handler(State(state): State<AppState>) -> Response {
  match state.events.message(Message::GetVersion).await {
    Ok(reply) => Json(reply).into_response(),
    Err(e) => unavailable(e),
  }
}

/// POST /__swcache/message: `{"type": "CACHE_UPDATE" | "GET_VERSION"}`.
async fn message_handler(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
  let message: Message = match serde_json::from_value(body) {
    Ok(m) => m,
    Err(e) => {
      return (StatusCode::BAD_REQUEST, format!("unrecognized message: {}", e)).into_response();
    }
  };

  match state.events.message(message).await {
    Ok(reply) => Json(reply).into_response(),
    Err(e) => unavailable(e),
  }
}

/// POST /__swcache/sync: `{"tag": "..."}`.
async fn sync_handler(State(state): State<AppState>, Json(signal): Json<SyncSignal>) -> Response {
  accepted(state.events.sync(&signal.tag))
}

/// POST /__swcache/push: body is the push text, if any.
async fn push_handler(State(state): State<AppState>, body: Bytes) -> Response {
  let text = (!body.is_empty()).then(|| String::from_utf8_lossy(&body).into_owned());
  accepted(state.events.push(text))
}

/// POST /__swcache/notificationclick: `{"action": "open" | "close" | null}`.
async fn click_handler(State(state): State<AppState>, Json(signal): Json<ClickSignal>) -> Response {
  accepted(state.events.notification_click(signal.action))
}

/// Everything else is an application request.
async fn proxy_handler(
  State(state): State<AppState>,
  method: Method,
  uri: Uri,
  headers: HeaderMap,
  body: Bytes,
) -> Response {
  let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
  let url = match state.origin.join(path) {
    Ok(url) => url,
    Err(e) => return (StatusCode::BAD_REQUEST, format!("bad path: {}", e)).into_response(),
  };

  let destination = headers
    .get(FETCH_DEST)
    .and_then(|v| v.to_str().ok())
    .map(Destination::from_header)
    .unwrap_or_default();

  if destination == Destination::Document {
    if let Err(e) = state.clients.observe_navigation(&url) {
      warn!(error = %e, "Failed to record navigation");
    }
  }

  let mut request = net::Request::new(method.as_str(), url, destination);
  request.headers = headers
    .iter()
    .filter(|(name, _)| **name != header::HOST)
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();
  if !body.is_empty() {
    request.body = Some(body.to_vec());
  }

  debug!(method = %request.method, url = %request.url, "Proxying");
  match state.events.fetch(request).await {
    Ok(response) => into_http(response),
    Err(e) => {
      warn!(error = %e, "Upstream request failed");
      (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response()
    }
  }
}

fn into_http(response: net::Response) -> Response {
  let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
  let mut headers = HeaderMap::new();
  for (name, value) in &response.headers {
    if let (Ok(name), Ok(value)) = (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) {
      headers.append(name, value);
    }
  }

  (status, headers, response.body).into_response()
}

fn accepted(result: Result<()>) -> Response {
  match result {
    Ok(()) => StatusCode::ACCEPTED.into_response(),
    Err(e) => unavailable(e),
  }
}

fn unavailable(e: color_eyre::Report) -> Response {
  (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
}
