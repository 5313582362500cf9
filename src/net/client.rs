use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderName, HeaderValue};

use super::types::{Request, Response};

/// Request headers never forwarded upstream. Encoding is left to reqwest so
/// it only asks for what it can decode.
const SKIPPED_REQUEST_HEADERS: &[&str] = &[
  "accept-encoding",
  "connection",
  "content-length",
  "host",
  "keep-alive",
  "transfer-encoding",
];

/// Response headers describing the wire framing rather than the buffered body.
/// `content-encoding` is kept: reqwest removes it itself when it decodes.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
  "connection",
  "content-length",
  "keep-alive",
  "transfer-encoding",
];

/// Anything the worker can fetch a request through.
///
/// An `Err` means the request never produced a response (connection refused,
/// DNS failure, ...). HTTP error statuses come back as `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network access over HTTP via reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::none())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      if is_listed(SKIPPED_REQUEST_HEADERS, name) {
        continue;
      }
      let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
      ) else {
        continue;
      };
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter(|(name, _)| !is_listed(SKIPPED_RESPONSE_HEADERS, name.as_str()))
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

fn is_listed(list: &[&str], name: &str) -> bool {
  list.iter().any(|h| h.eq_ignore_ascii_case(name))
}
