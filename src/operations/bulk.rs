//! Bulk read/write with per-key result aggregation and whole-batch
//! rollback when any key misses its acceptance threshold.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::ProxyConfig;
use crate::container::DataContainer;
use crate::error::{ProxyError, Result};
use crate::key::{GroupId, Key, ObjectId};
use crate::lookup::LookupResult;
use crate::quorum::SuccessMode;
use crate::selector::GroupSelector;
use crate::session::Session;

pub struct BulkOperation {
    session: Arc<dyn Session>,
    selector: GroupSelector,
    config: Arc<ProxyConfig>,
}

impl BulkOperation {
    pub fn new(session: Arc<dyn Session>, selector: GroupSelector, config: Arc<ProxyConfig>) -> Self {
        Self {
            session,
            selector,
            config,
        }
    }

    /// Fan the bulk response back onto the caller's keys. Keys the store
    /// did not answer for are simply absent from the map.
    pub async fn bulk_read(
        &self,
        keys: Vec<Key>,
        cflags: u64,
        groups: &[GroupId],
    ) -> Result<HashMap<Key, DataContainer>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let groups = self.selector.select(groups, 0)?;
        let (ids, by_id) = self.materialize(keys).await?;

        let replies = self
            .session
            .bulk_read(&ids, &groups, cflags)
            .await
            .map_err(|error| {
                tracing::error!("can not bulk read data: {}", error);
                ProxyError::from(error)
            })?;

        let mut out = HashMap::with_capacity(replies.len());
        for reply in replies {
            if let Some(key) = by_id.get(&reply.id) {
                out.insert(key.clone(), DataContainer::unpack(reply.data, false)?);
            }
        }
        Ok(out)
    }

    pub async fn bulk_write(
        &self,
        keys: Vec<Key>,
        data: Vec<DataContainer>,
        cflags: u64,
        groups: &[GroupId],
        success_mode: Option<SuccessMode>,
    ) -> Result<HashMap<Key, Vec<LookupResult>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        if keys.len() != data.len() {
            return Err(ProxyError::InvalidRequest(
                "counts of keys and data are not equal".to_string(),
            ));
        }

        let replication = if groups.is_empty() {
            self.config.resolved_replication()
        } else {
            groups.len()
        };
        let mode = success_mode.unwrap_or(self.config.success_mode);
        let groups = self.selector.select(groups, 0)?;

        let payloads: Vec<Bytes> = data.iter().map(DataContainer::pack).collect();
        let (ids, by_id) = self.materialize(keys).await?;

        let replies = self
            .session
            .bulk_write(&ids, &payloads, &groups, cflags)
            .await
            .map_err(|error| {
                tracing::error!("can not bulk write data: {}", error);
                ProxyError::from(error)
            })?;

        let style = self.config.path_style();
        let mut results: HashMap<Key, Vec<LookupResult>> = HashMap::new();
        let mut succeeded: HashMap<Key, Vec<GroupId>> = HashMap::new();

        for reply in &replies {
            let Some(key) = by_id.get(&reply.id) else {
                continue;
            };
            results
                .entry(key.clone())
                .or_default()
                .push(LookupResult::parse(reply, &style));
            succeeded
                .entry(key.clone())
                .or_default()
                .push(reply.group_id);
        }

        let required = mode.required(replication);
        let rejected = by_id.values().any(|key| {
            succeeded.get(key).map_or(0, Vec::len) < required
        });

        if rejected {
            for (key, groups) in &succeeded {
                if let Err(error) = self.session.remove(key, groups).await {
                    tracing::error!("bulk compensation remove failed for key {}: {}", key, error);
                }
            }
            return Err(ProxyError::BulkWriteRejected);
        }

        Ok(results)
    }

    /// Resolve every key to its raw id, keeping the id → key side table
    /// for fanning results back.
    async fn materialize(&self, keys: Vec<Key>) -> Result<(Vec<ObjectId>, HashMap<ObjectId, Key>)> {
        let mut ids = Vec::with_capacity(keys.len());
        let mut by_id = HashMap::with_capacity(keys.len());

        for key in keys {
            let id = match &key {
                Key::Id { id, .. } => *id,
                Key::Name { name, .. } => self.session.transform(name).await?,
            };
            ids.push(id);
            by_id.insert(id, key);
        }

        Ok((ids, by_id))
    }
}
