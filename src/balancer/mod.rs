//! Metadata-balancer client: weighted group cache, periodic refresh
//! worker, and the out-of-band group-topology queries.

pub mod cache;
pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{ProxyError, Result};
use crate::key::GroupId;

pub use cache::{GroupWeights, WeightCache};
pub use transport::{BalancerTransport, HttpBalancerTransport, BALANCER_SERVICE};

#[derive(Debug, Serialize)]
struct GroupWeightsRequest {
    stamp: u64,
}

/// Raw decode shape of a `get_group_info` reply; unknown map keys are
/// ignored for forward compatibility.
#[derive(Debug, Default, Deserialize)]
struct GroupInfoRaw {
    #[serde(default)]
    couples: Vec<Vec<GroupId>>,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupInfoStatus {
    #[default]
    Unknown,
    Coupled,
    Bad,
}

/// The balancer's view of one group: its replication cohorts and health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub couples: Vec<Vec<GroupId>>,
    pub status: GroupInfoStatus,
}

impl From<GroupInfoRaw> for GroupInfo {
    fn from(raw: GroupInfoRaw) -> Self {
        let status = match raw.status.as_str() {
            "bad" => GroupInfoStatus::Bad,
            "coupled" => GroupInfoStatus::Coupled,
            _ => GroupInfoStatus::Unknown,
        };
        Self {
            couples: raw.couples,
            status,
        }
    }
}

/// Client for the metadata balancer. Holds the weighted group cache and,
/// while running, one background refresh worker.
pub struct Balancer {
    transport: Arc<dyn BalancerTransport>,
    cache: Arc<WeightCache>,
    stamp: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Balancer {
    /// Build the client and start the refresh worker.
    pub fn start(transport: Arc<dyn BalancerTransport>, refresh_period: Duration) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cache = Arc::new(WeightCache::new());
        let stamp = Arc::new(AtomicU64::new(0));

        // The worker owns only the component handles, so dropping the
        // balancer is enough to let it unwind.
        let worker = tokio::spawn(refresh_loop(
            Arc::clone(&transport),
            Arc::clone(&cache),
            Arc::clone(&stamp),
            refresh_period,
            shutdown_rx,
        ));

        Arc::new(Self {
            transport,
            cache,
            stamp,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// One weighted-cache refresh round trip.
    pub async fn refresh(&self) -> Result<()> {
        refresh_once(&*self.transport, &self.cache, &self.stamp).await
    }

    /// Weighted pick of `count` groups. An uninitialized cache triggers one
    /// synchronous refresh first.
    pub async fn choose_groups(&self, count: u64) -> Result<Vec<GroupId>> {
        if !self.cache.initialized() {
            self.refresh().await?;
        }

        let groups = self.cache.choose(count).ok_or_else(|| {
            ProxyError::BalancerUnavailable(format!("no weighted groups of size {}", count))
        })?;
        tracing::info!("chosen groups: {:?}", groups);
        Ok(groups)
    }

    pub async fn group_info(&self, group: GroupId) -> Result<GroupInfo> {
        let request =
            rmp_serde::to_vec(&group).map_err(|e| ProxyError::Encoding(e.to_string()))?;
        let raw = self.transport.call("get_group_info", request).await?;
        let info: GroupInfoRaw =
            rmp_serde::from_slice(&raw).map_err(|e| ProxyError::Encoding(e.to_string()))?;
        Ok(info.into())
    }

    /// Healthy replication cohorts.
    pub async fn symmetric_groups(&self) -> Result<Vec<Vec<GroupId>>> {
        let raw = self
            .transport
            .call("get_symmetric_groups", empty_request()?)
            .await?;
        rmp_serde::from_slice(&raw).map_err(|e| ProxyError::Encoding(e.to_string()))
    }

    /// Degraded cohorts, keyed by the group that reported them.
    pub async fn bad_groups(&self) -> Result<HashMap<GroupId, Vec<GroupId>>> {
        let raw = self.transport.call("get_bad_groups", empty_request()?).await?;
        rmp_serde::from_slice(&raw).map_err(|e| ProxyError::Encoding(e.to_string()))
    }

    /// Union of symmetric and bad groups, sorted and deduplicated.
    pub async fn all_groups(&self) -> Result<Vec<GroupId>> {
        let mut all: Vec<GroupId> = Vec::new();

        for cohort in self.symmetric_groups().await? {
            all.extend(cohort);
        }
        for cohort in self.bad_groups().await?.into_values() {
            all.extend(cohort);
        }

        all.sort_unstable();
        all.dedup();
        Ok(all)
    }

    /// Stop the refresh worker and wait for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let worker = self.worker.lock().expect("worker slot poisoned").take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl Drop for Balancer {
    fn drop(&mut self) {
        // If shutdown was never awaited, the signal still makes the worker
        // exit on its next wake-up.
        let _ = self.shutdown_tx.send(true);
    }
}

async fn refresh_loop(
    transport: Arc<dyn BalancerTransport>,
    cache: Arc<WeightCache>,
    stamp: Arc<AtomicU64>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        match refresh_once(&*transport, &cache, &stamp).await {
            Ok(()) => tracing::info!("updated group weights"),
            Err(error) => tracing::error!("group weights refresh failed: {}", error),
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown_rx.changed() => break,
        }
    }
}

async fn refresh_once(
    transport: &dyn BalancerTransport,
    cache: &WeightCache,
    stamp: &AtomicU64,
) -> Result<()> {
    let stamp = stamp.fetch_add(1, Ordering::SeqCst) + 1;
    let request = rmp_serde::to_vec(&GroupWeightsRequest { stamp })
        .map_err(|e| ProxyError::Encoding(e.to_string()))?;

    let raw = transport.call("get_group_weights", request).await?;
    let weights: GroupWeights =
        rmp_serde::from_slice(&raw).map_err(|e| ProxyError::Encoding(e.to_string()))?;

    cache.install(weights);
    Ok(())
}

fn empty_request() -> Result<Vec<u8>> {
    rmp_serde::to_vec(&"").map_err(|e| ProxyError::Encoding(e.to_string()))
}
