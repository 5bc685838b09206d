//! Request and response snapshots passed between the shell, the network and the cache.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use url::Url;

/// What kind of resource the page asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  /// Top-level document load (a navigation)
  Document,
  /// Subresources, fetch()/XHR and anything else that is not a navigation
  #[default]
  Empty,
}

/// An intercepted page request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
}

impl Request {
  /// A plain GET subresource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::Empty,
    }
  }

  /// A GET request for a top-level document.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::Document,
    }
  }

  /// Parse `raw` relative to `origin` (root-relative paths are allowed).
  pub fn parse(origin: &Url, raw: &str) -> Result<Self> {
    let url = origin
      .join(raw)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", raw, e))?;
    Ok(Self::get(url))
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
  }
}

/// How a response relates to the page origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response
  Cors,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      other => Err(eyre!("Unknown response type '{}'", other)),
    }
  }

  /// Classify a response URL against the page origin.
  pub fn classify(origin: &Url, response_url: &Url) -> Self {
    if origin.origin() == response_url.origin() {
      Self::Basic
    } else {
      Self::Cors
    }
  }
}

/// A fully buffered response.
///
/// The body is a `Bytes` handle, so `clone()` hands out an independent
/// reader over the same buffer. A response that is both cached and returned
/// must be cloned before either side takes it.
#[derive(Debug, Clone)]
pub struct Response {
  pub url: Url,
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub response_type: ResponseType,
  pub body: Bytes,
}

impl Response {
  /// 2xx, the condition the install step requires of every manifest entry.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Whether a runtime fetch result may be written to the cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.response_type == ResponseType::Basic
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
