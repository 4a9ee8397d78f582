//! Public facade over the write, read, and bulk engines.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::balancer::{Balancer, BalancerTransport, GroupInfo, HttpBalancerTransport};
use crate::config::ProxyConfig;
use crate::container::DataContainer;
use crate::error::{ProxyError, Result};
use crate::key::{GroupId, Key, ObjectId};
use crate::lookup::LookupResult;
use crate::operations::{
    BulkOperation, RangeGetRequest, ReadOperation, ReadRequest, WriteOperation, WriteRequest,
};
use crate::quorum::SuccessMode;
use crate::selector::GroupSelector;
use crate::session::{FoundIndex, IndexEntry, RawNodeStat, Remote, Session};

/// Per-node statistics in caller units.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStats {
    pub addr: String,
    pub id: String,
    pub la: [f32; 3],
    pub vm_total: u64,
    pub vm_free: u64,
    pub vm_cached: u64,
    /// Total storage, MB.
    pub storage_size: u64,
    /// Available storage, MB.
    pub available_size: u64,
    pub files: u64,
    pub fsid: u64,
}

impl From<RawNodeStat> for NodeStats {
    fn from(raw: RawNodeStat) -> Self {
        Self {
            addr: raw.addr,
            id: raw.id,
            la: [
                raw.la[0] as f32 / 100.0,
                raw.la[1] as f32 / 100.0,
                raw.la[2] as f32 / 100.0,
            ],
            vm_total: raw.vm_total,
            vm_free: raw.vm_free,
            vm_cached: raw.vm_cached,
            storage_size: raw.frsize * raw.blocks / 1024 / 1024,
            available_size: raw.bavail * raw.bsize / 1024 / 1024,
            files: raw.files,
            fsid: raw.fsid,
        }
    }
}

/// Smart client for the grouped, replicated object store. One instance is
/// safe for concurrent use; every operation carries its own settings.
pub struct StorageProxy {
    session: Arc<dyn Session>,
    config: Arc<ProxyConfig>,
    balancer: Option<Arc<Balancer>>,
    write_op: WriteOperation,
    read_op: ReadOperation,
    bulk_op: BulkOperation,
}

impl StorageProxy {
    pub fn new(config: ProxyConfig, session: Arc<dyn Session>) -> Result<Self> {
        let transport = match &config.balancer {
            Some(balancer) => Some(Arc::new(HttpBalancerTransport::new(
                &balancer.endpoint,
                Duration::from_secs(config.wait_timeout),
            )?) as Arc<dyn BalancerTransport>),
            None => None,
        };
        Self::with_balancer_transport(config, session, transport)
    }

    /// Construct with an explicit balancer transport. The balancer (and
    /// its refresh worker) only exists when both the configuration section
    /// and a transport are present.
    pub fn with_balancer_transport(
        config: ProxyConfig,
        session: Arc<dyn Session>,
        transport: Option<Arc<dyn BalancerTransport>>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let balancer = match (&config.balancer, transport) {
            (Some(settings), Some(transport)) => Some(Balancer::start(
                transport,
                Duration::from_secs(settings.group_weights_refresh_period),
            )),
            _ => None,
        };

        let selector = GroupSelector::new(config.groups.clone());

        Ok(Self {
            write_op: WriteOperation::new(
                Arc::clone(&session),
                selector.clone(),
                balancer.clone(),
                Arc::clone(&config),
            ),
            read_op: ReadOperation::new(
                Arc::clone(&session),
                selector.clone(),
                Arc::clone(&config),
            ),
            bulk_op: BulkOperation::new(Arc::clone(&session), selector, Arc::clone(&config)),
            session,
            config,
            balancer,
        })
    }

    pub async fn lookup(&self, key: &Key, groups: &[GroupId]) -> Result<LookupResult> {
        self.read_op.lookup(key, groups).await
    }

    pub async fn read(&self, request: ReadRequest) -> Result<DataContainer> {
        self.read_op.read(request).await
    }

    pub async fn write(&self, request: WriteRequest) -> Result<Vec<LookupResult>> {
        self.write_op.run(request).await
    }

    pub async fn remove(&self, key: &Key, groups: &[GroupId]) -> Result<()> {
        self.read_op.remove(key, groups).await
    }

    pub async fn range_get(&self, request: RangeGetRequest) -> Result<Vec<String>> {
        self.read_op.range_get(request).await
    }

    pub async fn bulk_read(
        &self,
        keys: Vec<Key>,
        cflags: u64,
        groups: &[GroupId],
    ) -> Result<HashMap<Key, DataContainer>> {
        self.bulk_op.bulk_read(keys, cflags, groups).await
    }

    pub async fn bulk_write(
        &self,
        keys: Vec<Key>,
        data: Vec<DataContainer>,
        cflags: u64,
        groups: &[GroupId],
        success_mode: Option<SuccessMode>,
    ) -> Result<HashMap<Key, Vec<LookupResult>>> {
        self.bulk_op
            .bulk_write(keys, data, cflags, groups, success_mode)
            .await
    }

    pub async fn lookup_addr(&self, key: &Key, groups: &[GroupId]) -> Result<Vec<Remote>> {
        self.read_op.lookup_addr(key, groups).await
    }

    pub async fn exec_script(
        &self,
        key: &Key,
        script: &str,
        data: Bytes,
        groups: &[GroupId],
    ) -> Result<String> {
        self.read_op.exec_script(key, script, data, groups).await
    }

    /// True while enough transport states are live to serve requests.
    pub fn ping(&self) -> bool {
        self.session.state_count() >= self.config.die_limit
    }

    pub async fn stat_log(&self) -> Result<Vec<NodeStats>> {
        let raw = self.session.stat().await?;
        Ok(raw.into_iter().map(NodeStats::from).collect())
    }

    /// 40-hex form of the key's raw id. Debug use.
    pub async fn id_str(&self, key: &Key) -> Result<String> {
        let id = match key {
            Key::Id { id, .. } => *id,
            Key::Name { name, .. } => self.session.transform(name).await?,
        };
        Ok(id.to_short_hex())
    }

    pub async fn update_indexes(&self, key: &Key, entries: &[IndexEntry]) -> Result<()> {
        Ok(self.session.update_indexes(key, entries).await?)
    }

    pub async fn find_indexes(&self, indexes: &[String]) -> Result<Vec<FoundIndex>> {
        Ok(self.session.find_indexes(indexes).await?)
    }

    pub async fn find_indexes_raw(&self, ids: &[ObjectId]) -> Result<Vec<FoundIndex>> {
        Ok(self.session.find_indexes_raw(ids).await?)
    }

    pub async fn check_indexes(&self, key: &Key) -> Result<Vec<IndexEntry>> {
        Ok(self.session.check_indexes(key).await?)
    }

    pub async fn get_symmetric_groups(&self) -> Result<Vec<Vec<GroupId>>> {
        self.balancer()?.symmetric_groups().await
    }

    pub async fn get_bad_groups(&self) -> Result<HashMap<GroupId, Vec<GroupId>>> {
        self.balancer()?.bad_groups().await
    }

    pub async fn get_all_groups(&self) -> Result<Vec<GroupId>> {
        self.balancer()?.all_groups().await
    }

    pub async fn get_metabalancer_group_info(&self, group: GroupId) -> Result<GroupInfo> {
        self.balancer()?.group_info(group).await
    }

    /// Stop background work deterministically. Dropping the proxy without
    /// this still signals the refresh worker to exit on its next wake-up.
    pub async fn shutdown(&self) {
        if let Some(balancer) = &self.balancer {
            balancer.shutdown().await;
        }
    }

    fn balancer(&self) -> Result<&Arc<Balancer>> {
        self.balancer.as_ref().ok_or_else(|| {
            ProxyError::BalancerUnavailable("balancer is not configured".to_string())
        })
    }
}
