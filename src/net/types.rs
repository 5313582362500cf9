use url::Url;

/// What kind of resource a request is for, as reported by the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  /// Top-level navigation (an HTML page)
  Document,
  Image,
  /// Scripts, styles, fetch()/XHR and everything else
  #[default]
  Other,
}

impl Destination {
  /// Parse a `Sec-Fetch-Dest` header value.
  pub fn from_header(value: &str) -> Self {
    match value.trim().to_ascii_lowercase().as_str() {
      "document" => Destination::Document,
      "image" => Destination::Image,
      _ => Destination::Other,
    }
  }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: &str, url: Url, destination: Destination) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
      destination,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url, Destination::Other)
  }

  /// A POST carrying a JSON body.
  pub fn post_json(url: Url, body: Vec<u8>) -> Self {
    Self {
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: Some(body),
      ..Self::new("POST", url, Destination::Other)
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }
}

/// A response snapshot. Bodies are fully buffered so a response can be both
/// returned to the requester and written to a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, status_text: &str, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: status_text.to_string(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Placeholder returned for non-document requests when the network is down.
  pub fn offline() -> Self {
    Self::new(503, "Service Unavailable", "Offline - Content not available")
      .with_header("Content-Type", "text/plain")
  }

  /// Status in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
