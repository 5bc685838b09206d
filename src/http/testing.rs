//! Canned network for tests.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use super::{Network, Request, Response, ResponseType};

pub const ORIGIN: &str = "https://devcard.example/";

pub struct FakeNetwork {
  origin: Url,
  routes: Mutex<HashMap<String, (u16, Bytes)>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      origin: Url::parse(ORIGIN).unwrap(),
      routes: Mutex::new(HashMap::new()),
      offline: AtomicBool::new(false),
      calls: AtomicUsize::new(0),
    }
  }

  /// Serve `body` with status 200 for `path` (resolved against the origin).
  pub fn route(self, path: &str, body: &str) -> Self {
    self.set(path, 200, body);
    self
  }

  pub fn set(&self, path: &str, status: u16, body: &str) {
    let url = self.origin.join(path).unwrap();
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), (status, Bytes::from(body.to_string())));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
    }

    let (status, body) = self
      .routes
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .unwrap_or((404, Bytes::from_static(b"not found")));

    Ok(Response {
      url: request.url.clone(),
      status,
      status_text: String::new(),
      headers: vec![("content-length".to_string(), body.len().to_string())],
      response_type: ResponseType::classify(&self.origin, &request.url),
      body,
    })
  }
}
