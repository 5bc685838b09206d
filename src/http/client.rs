use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::future::Future;
use url::Url;

use crate::config::Config;

use super::types::{Request, Response, ResponseType};

/// Source of network responses for the shell.
///
/// An `Err` means the request never produced a response (offline, DNS,
/// connection reset). HTTP error statuses are returned as `Ok` responses.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// reqwest-backed network client
#[derive(Clone)]
pub struct NetworkClient {
  client: reqwest::Client,
  origin: Url,
}

impl NetworkClient {
  pub fn new(config: &Config) -> Result<Self> {
    let origin = config.origin()?;
    let user_agent = config
      .user_agent
      .clone()
      .unwrap_or_else(|| format!("devcard-shell/{}", env!("CARGO_PKG_VERSION")));

    let client = reqwest::Client::builder()
      .user_agent(user_agent)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }
}

impl Network for NetworkClient {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", request.method, e))?;

    let resp = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let url = resp.url().clone();
    let status = resp.status();
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();

    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

    Ok(Response {
      response_type: ResponseType::classify(&self.origin, &url),
      url,
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
    })
  }
}
