//! Keyed client pool.
//!
//! Hands out one client per identity, creating it on first use. Nothing here
//! cares what the identity is (a certificate thumbprint, a tenant, a host).

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::ClientError;

type Factory<K, C> = dyn Fn(&K) -> Result<C, ClientError> + Send + Sync;

pub struct KeyedClientPool<K, C>
where
    K: Eq + Hash,
{
    clients: DashMap<K, C>,
    factory: Arc<Factory<K, C>>,
}

impl<K, C> KeyedClientPool<K, C>
where
    K: Eq + Hash + Clone + fmt::Debug,
    C: Clone,
{
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&K) -> Result<C, ClientError> + Send + Sync + 'static,
    {
        Self {
            clients: DashMap::new(),
            factory: Arc::new(factory),
        }
    }

    /// Client for `key`, created by the factory when absent.
    ///
    /// A failed creation is not remembered.
    pub fn lookup_or_create(&self, key: &K) -> Result<C, ClientError> {
        if let Some(client) = self.clients.get(key) {
            return Ok(client.clone());
        }
        let entry = self.clients.entry(key.clone());
        let client = match entry {
            dashmap::mapref::entry::Entry::Occupied(occupied) => occupied.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                debug!(key = ?key, "creating pooled client");
                let client = (self.factory)(key)?;
                vacant.insert(client.clone());
                client
            }
        };
        Ok(client)
    }

    pub fn remove(&self, key: &K) -> Option<C> {
        self.clients.remove(key).map(|(_, client)| client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Pool of HTTP clients sharing one request timeout.
pub type HttpClientPool = KeyedClientPool<String, reqwest::Client>;

impl HttpClientPool {
    /// Pool whose clients are built with `timeout_ms` and a per-identity
    /// user agent.
    pub fn with_timeout(timeout_ms: u64) -> Self {
        KeyedClientPool::new(move |identity: &String| {
            reqwest::Client::builder()
                .timeout(std::time::Duration::from_millis(timeout_ms))
                .user_agent(format!("kframe-client/{} ({})", env!("CARGO_PKG_VERSION"), identity))
                .build()
                .map_err(ClientError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lookup_or_create_reuses_clients() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let pool: KeyedClientPool<String, Arc<String>> = KeyedClientPool::new(move |key: &String| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(format!("client-{}", key)))
        });

        let a = pool.lookup_or_create(&"a".to_string()).unwrap();
        let again = pool.lookup_or_create(&"a".to_string()).unwrap();
        let b = pool.lookup_or_create(&"b".to_string()).unwrap();

        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(*b, "client-b");
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let pool: KeyedClientPool<u32, u32> = KeyedClientPool::new(|key: &u32| {
            if *key == 0 {
                Err(ClientError::Config("no identity".to_string()))
            } else {
                Ok(*key * 10)
            }
        });
        assert!(pool.lookup_or_create(&0).is_err());
        assert!(pool.is_empty());
        assert_eq!(pool.lookup_or_create(&3).unwrap(), 30);
        assert_eq!(pool.remove(&3), Some(30));
    }

    #[test]
    fn test_http_pool_builds_clients() {
        let pool = HttpClientPool::with_timeout(1_000);
        pool.lookup_or_create(&"default".to_string()).unwrap();
        assert_eq!(pool.len(), 1);
    }
}
