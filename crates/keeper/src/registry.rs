//! Pool registry loaded from a content-addressed document.
//!
//! A refresh either replaces the whole pool set with a fully validated one or
//! leaves the previous set in place. A failed or partial fetch never empties
//! the active set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use tranche_types::{Pool, PoolId};

use crate::config::{RegistryConfig, RetryConfig};
use crate::error::{KeeperError, KeeperResult};

/// Active pools ordered by address
pub type PoolMap = BTreeMap<PoolId, Pool>;

/// Registry document as published
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub version: Option<String>,
    pub pools: Vec<Pool>,
}

impl RegistryDocument {
    /// Validate every entry and build the active set. One bad entry rejects
    /// the whole document.
    pub fn into_pool_map(self) -> KeeperResult<PoolMap> {
        let mut pools = PoolMap::new();
        let mut seen = std::collections::HashSet::new();

        for pool in self.pools {
            pool.validate()
                .map_err(|e| KeeperError::InvalidConfig(format!("registry entry {}: {}", pool.address, e)))?;

            if !seen.insert(pool.address) {
                return Err(KeeperError::InvalidConfig(format!(
                    "registry lists pool {} more than once",
                    pool.address
                )));
            }

            if pool.disabled {
                debug!(pool = %pool.address, name = pool.name(), "Skipping disabled pool");
                continue;
            }

            pools.insert(pool.address, pool);
        }

        Ok(pools)
    }
}

/// Where registry documents come from
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn fetch(&self) -> KeeperResult<RegistryDocument>;

    /// Human-readable location for log lines
    fn describe(&self) -> String;
}

/// Fetches the registry document from an IPFS HTTP gateway
pub struct IpfsRegistrySource {
    client: reqwest::Client,
    url: String,
}

impl IpfsRegistrySource {
    pub fn new(config: &RegistryConfig) -> KeeperResult<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            url: config.document_url(),
        })
    }
}

#[async_trait]
impl RegistrySource for IpfsRegistrySource {
    async fn fetch(&self) -> KeeperResult<RegistryDocument> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let document = response.json::<RegistryDocument>().await?;
        Ok(document)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// In-memory view of the active pool set
pub struct PoolRegistry {
    source: Arc<dyn RegistrySource>,
    retry: RetryConfig,
    pools: RwLock<Arc<PoolMap>>,
}

impl PoolRegistry {
    pub fn new(source: Arc<dyn RegistrySource>, retry: RetryConfig) -> Self {
        Self {
            source,
            retry,
            pools: RwLock::new(Arc::new(PoolMap::new())),
        }
    }

    /// Current pool set. Later refreshes do not affect a returned snapshot.
    pub async fn snapshot(&self) -> Arc<PoolMap> {
        self.pools.read().await.clone()
    }

    /// Fetch, validate and swap in a new pool set.
    ///
    /// Retries with backoff; after the last failed attempt the previous set is
    /// kept and `RegistryUnavailable` is returned.
    pub async fn refresh(&self) -> KeeperResult<Arc<PoolMap>> {
        let attempts = self.retry.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let result = match self.source.fetch().await {
                Ok(document) => document.into_pool_map(),
                Err(e) => Err(e),
            };

            match result {
                Ok(map) => {
                    let map = Arc::new(map);
                    *self.pools.write().await = map.clone();
                    info!(
                        source = %self.source.describe(),
                        pools = map.len(),
                        "Pool registry refreshed"
                    );
                    return Ok(map);
                }
                Err(e) => {
                    warn!(
                        source = %self.source.describe(),
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "Registry fetch failed"
                    );
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        tokio::time::sleep(Duration::from_millis(self.retry.delay_for_attempt(attempt))).await;
                    }
                }
            }
        }

        Err(KeeperError::RegistryUnavailable {
            attempts,
            reason: last_error,
        })
    }
}
