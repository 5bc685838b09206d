//! The offline shell: install, activate and fetch interception.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::clients::{ClientId, ClientRegistry};
use super::lifecycle::{ActivationReport, InstallReport, Registration, WorkerState};
use crate::cache::{CacheInfo, CacheLayer, CacheResult, CacheStorage, RequestKey};
use crate::config::Config;
use crate::http::{Network, Request, Response};

/// Snapshot of registrations and cache generations.
#[derive(Debug, Clone)]
pub struct ShellStatus {
  /// Generation this shell installs and activates
  pub generation: String,
  /// Generation currently serving fetches
  pub controller: Option<String>,
  pub registrations: Vec<Registration>,
  pub caches: Vec<CacheInfo>,
}

/// One version of the offline shell.
///
/// Each shell owns a single cache generation, named by the configuration.
/// Fetches are served from whichever generation is currently activated,
/// which may belong to an older shell until this one activates.
pub struct OfflineShell<S: CacheStorage, N: Network> {
  generation: String,
  origin: Url,
  manifest: Vec<String>,
  fallback: Url,
  cache: CacheLayer<S>,
  network: N,
  clients: ClientRegistry,
}

impl<S: CacheStorage, N: Network> OfflineShell<S, N> {
  pub fn new(config: &Config, storage: Arc<S>, network: N) -> Result<Self> {
    let origin = config.origin()?;
    let fallback = origin.join(&config.fallback_document).map_err(|e| {
      eyre!(
        "Invalid fallback document '{}': {}",
        config.fallback_document,
        e
      )
    })?;

    Ok(Self {
      generation: config.cache_name.clone(),
      origin,
      manifest: config.manifest.clone(),
      fallback,
      cache: CacheLayer::shared(storage),
      network,
      clients: ClientRegistry::new(),
    })
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn storage(&self) -> &S {
    self.cache.storage()
  }

  pub fn clients(&self) -> &ClientRegistry {
    &self.clients
  }

  /// Generation of the activated registration, if any.
  pub fn controller(&self) -> Result<Option<String>> {
    Ok(
      self
        .storage()
        .registrations()?
        .into_iter()
        .find(|r| r.state == WorkerState::Activated)
        .map(|r| r.generation),
    )
  }

  /// Pre-cache the manifest into this shell's generation.
  ///
  /// All-or-nothing: every manifest URL must fetch with a 2xx status before
  /// anything is written. On failure the generation is left untouched and
  /// the install can be retried.
  pub async fn install(&self) -> Result<InstallReport> {
    let generation = self.generation.as_str();
    info!(generation, entries = self.manifest.len(), "installing");

    let previous = self.storage().registration(generation)?;
    let serving = previous
      .as_ref()
      .is_some_and(|r| r.state == WorkerState::Activated);
    if !serving {
      self
        .storage()
        .set_registration(generation, WorkerState::Installing)?;
    }

    let result = self.precache().await;

    let entries = match result {
      Ok(entries) => entries,
      Err(e) => {
        warn!(generation, error = %e, "install failed");
        self.restore_registration(previous.as_ref())?;
        return Err(e.wrap_err(format!("Failed to install {}", generation)));
      }
    };

    if let Err(e) = self.storage().put_all(generation, &entries) {
      warn!(generation, error = %e, "install failed");
      self.restore_registration(previous.as_ref())?;
      return Err(e.wrap_err(format!("Failed to install {}", generation)));
    }

    if !serving {
      self
        .storage()
        .set_registration(generation, WorkerState::Installed)?;
    }

    let bytes: u64 = entries.iter().map(|(_, r)| r.body.len() as u64).sum();
    let cached: Vec<String> = entries
      .iter()
      .map(|(key, _)| key.url().to_string())
      .collect();

    // Activation never waits for clients of the previous version to close.
    info!(generation, bytes, "installed, ready to activate");

    Ok(InstallReport {
      generation: generation.to_string(),
      cached,
      bytes,
    })
  }

  /// Fetch every manifest entry. The first failure aborts the batch.
  async fn precache(&self) -> Result<Vec<(RequestKey, Response)>> {
    let requests = self
      .manifest
      .iter()
      .map(|entry| Request::parse(&self.origin, entry))
      .collect::<Result<Vec<_>>>()?;

    try_join_all(requests.iter().map(|request| async move {
      let response = self.network.fetch(request).await?;
      if !response.ok() {
        return Err(eyre!(
          "Request for {} failed with status {}",
          request.url,
          response.status
        ));
      }
      debug!(url = %request.url, bytes = response.body.len(), "precached");
      Ok((RequestKey::new(&request.url), response))
    }))
    .await
  }

  fn restore_registration(&self, previous: Option<&Registration>) -> Result<()> {
    match previous {
      Some(r) => self.storage().set_registration(&r.generation, r.state),
      None => self.storage().remove_registration(&self.generation),
    }
  }

  /// Make this shell's generation the controller.
  ///
  /// Deletes every other generation, retires older registrations and claims
  /// all open clients.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let generation = self.generation.as_str();

    let registration = self
      .storage()
      .registration(generation)?
      .ok_or_else(|| eyre!("Cannot activate {}: not installed", generation))?;
    if !registration.state.can_activate() {
      return Err(eyre!(
        "Cannot activate {}: worker is {}",
        generation,
        registration.state
      ));
    }

    if registration.state != WorkerState::Activated {
      self
        .storage()
        .set_registration(generation, WorkerState::Activating)?;
    }
    info!(generation, "activating");

    let mut deleted = Vec::new();
    for name in self.storage().cache_names()? {
      if name != generation && self.storage().delete_cache(&name)? {
        info!(cache = %name, "deleted old cache");
        deleted.push(name);
      }
    }

    self.storage().promote(generation)?;
    let claimed = self.clients.claim(generation)?;
    info!(generation, deleted = deleted.len(), claimed, "activated");

    Ok(ActivationReport {
      generation: generation.to_string(),
      deleted,
      claimed,
    })
  }

  /// Intercept a page request.
  ///
  /// Cache first, then network. A navigation that fails both falls back to
  /// the cached shell document; any other failure is returned as an error.
  pub async fn handle_fetch(&self, request: &Request) -> Result<CacheResult<Response>> {
    let Some(generation) = self.controller()? else {
      debug!(url = %request.url, "no controller, passing through");
      let response = self.network.fetch(request).await?;
      return Ok(CacheResult::passthrough(response));
    };

    let result = self
      .cache
      .fetch_one(&generation, request, || self.network.fetch(request))
      .await;

    match result {
      Ok(result) => Ok(result),
      Err(e) if request.is_navigation() => {
        let fallback = Request::get(self.fallback.clone());
        match self.cache.lookup(&generation, &fallback)? {
          Some(cached) => {
            warn!(url = %request.url, error = %e, "serving offline fallback");
            Ok(CacheResult::offline(cached.response, cached.cached_at))
          }
          None => {
            warn!(url = %request.url, error = %e, "fetch failed, no fallback cached");
            Err(e)
          }
        }
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "fetch failed");
        Err(e)
      }
    }
  }

  /// Register an open page. It is controlled right away if a controller exists.
  pub fn open_client(&self, url: Url) -> Result<ClientId> {
    let controller = self.controller()?;
    self.clients.open(url, controller)
  }

  pub fn status(&self) -> Result<ShellStatus> {
    Ok(ShellStatus {
      generation: self.generation.clone(),
      controller: self.controller()?,
      registrations: self.storage().registrations()?,
      caches: self.storage().cache_info()?,
    })
  }

  /// URLs stored in a generation (defaults to this shell's).
  pub fn keys(&self, generation: Option<&str>) -> Result<Vec<String>> {
    self
      .storage()
      .keys(generation.unwrap_or(&self.generation))
  }
}
