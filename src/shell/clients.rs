//! Open page instances and the generation controlling each of them.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;
use url::Url;

/// Identifier handed out by [`ClientRegistry::open`].
pub type ClientId = u64;

#[derive(Debug, Clone)]
pub struct Client {
  pub id: ClientId,
  pub url: Url,
  /// Generation serving this client's requests, if any
  pub controller: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
  next_id: ClientId,
  clients: BTreeMap<ClientId, Client>,
}

/// In-memory registry of open clients.
///
/// Library API for hosts that keep page instances alive across activations.
/// The CLI runs one command per process and never opens clients, so its
/// `activate` always claims zero.
#[derive(Debug, Default)]
pub struct ClientRegistry {
  inner: Mutex<Inner>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a newly loaded page. It is controlled from the start when a
  /// controller already exists.
  pub fn open(&self, url: Url, controller: Option<String>) -> Result<ClientId> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.next_id += 1;
    let id = inner.next_id;
    inner.clients.insert(
      id,
      Client {
        id,
        url,
        controller,
      },
    );
    Ok(id)
  }

  pub fn close(&self, id: ClientId) -> Result<bool> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.clients.remove(&id).is_some())
  }

  pub fn get(&self, id: ClientId) -> Result<Option<Client>> {
    let inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.clients.get(&id).cloned())
  }

  /// Take control of every open client. Returns how many changed controller.
  pub fn claim(&self, generation: &str) -> Result<usize> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut claimed = 0;
    for client in inner.clients.values_mut() {
      if client.controller.as_deref() != Some(generation) {
        client.controller = Some(generation.to_string());
        claimed += 1;
      }
    }
    Ok(claimed)
  }

  pub fn len(&self) -> usize {
    self.inner.lock().map(|i| i.clients.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn page() -> Url {
    Url::parse("https://devcard.example/").unwrap()
  }

  #[test]
  fn test_claim_takes_over_open_clients() {
    let registry = ClientRegistry::new();
    let a = registry.open(page(), None).unwrap();
    let b = registry.open(page(), Some("v1".to_string())).unwrap();

    assert_eq!(registry.claim("v2").unwrap(), 2);
    assert_eq!(registry.get(a).unwrap().unwrap().controller.as_deref(), Some("v2"));
    assert_eq!(registry.get(b).unwrap().unwrap().controller.as_deref(), Some("v2"));

    // Already controlled clients are not counted again
    assert_eq!(registry.claim("v2").unwrap(), 0);
  }

  #[test]
  fn test_close_removes_client() {
    let registry = ClientRegistry::new();
    let id = registry.open(page(), None).unwrap();
    assert_eq!(registry.len(), 1);
    assert!(registry.close(id).unwrap());
    assert!(!registry.close(id).unwrap());
    assert!(registry.is_empty());
  }
}
