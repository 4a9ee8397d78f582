//! Read-side engine: single reads with per-group fallback, the lookup
//! elimination loop, removal, range reads, address lookups, and script
//! execution.

use std::sync::Arc;

use bytes::Bytes;

use crate::config::ProxyConfig;
use crate::container::DataContainer;
use crate::error::{ProxyError, Result};
use crate::key::{GroupId, Key, ObjectId, OBJECT_ID_BYTES};
use crate::lookup::LookupResult;
use crate::selector::GroupSelector;
use crate::session::{IoFlags, RangeQuery, Remote, Session, SessionError};

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub key: Key,
    pub offset: u64,
    pub size: u64,
    pub cflags: u64,
    pub ioflags: IoFlags,
    pub groups: Vec<GroupId>,
    /// Pick the replica with the newest version instead of group order.
    pub latest: bool,
    /// Parse the body as embedded TLV frames.
    pub embedded: bool,
}

impl ReadRequest {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            offset: 0,
            size: 0,
            cflags: 0,
            ioflags: IoFlags::empty(),
            groups: Vec::new(),
            latest: false,
            embedded: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RangeGetRequest {
    pub from: Key,
    pub to: Key,
    pub limit_start: u64,
    pub limit_num: u64,
    pub cflags: u64,
    pub ioflags: IoFlags,
    pub groups: Vec<GroupId>,
    /// Key used for group selection and error reporting; `from` otherwise.
    pub reference: Option<Key>,
}

impl RangeGetRequest {
    pub fn new(from: Key, to: Key) -> Self {
        Self {
            from,
            to,
            limit_start: 0,
            limit_num: 0,
            cflags: 0,
            ioflags: IoFlags::empty(),
            groups: Vec::new(),
            reference: None,
        }
    }
}

pub struct ReadOperation {
    session: Arc<dyn Session>,
    selector: GroupSelector,
    config: Arc<ProxyConfig>,
}

impl ReadOperation {
    pub fn new(session: Arc<dyn Session>, selector: GroupSelector, config: Arc<ProxyConfig>) -> Self {
        Self {
            session,
            selector,
            config,
        }
    }

    pub async fn read(&self, request: ReadRequest) -> Result<DataContainer> {
        let groups = self.selector.select(&request.groups, 0)?;

        let raw = match self
            .session
            .read(
                &request.key,
                request.offset,
                request.size,
                &groups,
                request.cflags,
                request.ioflags,
                request.latest,
            )
            .await
        {
            Ok(raw) => raw,
            Err(SessionError::NotFound) => {
                tracing::warn!("key {} missing from groups {:?}", request.key, groups);
                return Err(ProxyError::NotFound(request.key.to_string()));
            }
            Err(error) => {
                tracing::error!("can not get data for key {}: {}", request.key, error);
                return Err(error.into());
            }
        };

        DataContainer::unpack(raw, request.embedded)
    }

    /// Lookup with group elimination: every replied group that could not
    /// serve the key is dropped and the remainder retried, until a group
    /// answers or the candidate set empties.
    pub async fn lookup(&self, key: &Key, groups: &[GroupId]) -> Result<LookupResult> {
        let mut remaining = self.selector.select(groups, 0)?;

        while !remaining.is_empty() {
            let entries = self.session.lookup(key, &remaining).await?;
            if entries.is_empty() {
                break;
            }

            let before = remaining.len();
            for entry in entries {
                match entry.result {
                    Ok(reply) => {
                        return Ok(LookupResult::parse(&reply, &self.config.path_style()));
                    }
                    Err(error) => {
                        tracing::debug!("group {} misses key {}: {}", entry.group_id, key, error);
                        remaining.retain(|group| *group != entry.group_id);
                    }
                }
            }

            if remaining.len() == before {
                break;
            }
        }

        tracing::error!("can not get download info for key {}", key);
        Err(ProxyError::NotFound(key.to_string()))
    }

    pub async fn remove(&self, key: &Key, groups: &[GroupId]) -> Result<()> {
        let groups = self.selector.select(groups, 0)?;
        self.session.remove(key, &groups).await.map_err(|error| {
            tracing::error!("can't remove object {}: {}", key, error);
            ProxyError::from(error)
        })
    }

    /// Sequential range read over the candidate groups; the first group
    /// that yields entries wins. With NODATA set the result is a single
    /// textual entry count, otherwise the entry bodies.
    pub async fn range_get(&self, request: RangeGetRequest) -> Result<Vec<String>> {
        let groups = self.selector.select(&request.groups, 0)?;
        let reference = request.reference.clone().unwrap_or_else(|| request.from.clone());

        let query = RangeQuery {
            from: request
                .from
                .raw_id()
                .unwrap_or(ObjectId::from_bytes([0u8; OBJECT_ID_BYTES])),
            to: request
                .to
                .raw_id()
                .unwrap_or(ObjectId::from_bytes([0xff; OBJECT_ID_BYTES])),
            limit_start: request.limit_start,
            limit_num: request.limit_num,
            flags: request.ioflags,
            kind: request.from.kind(),
        };

        for group in &groups {
            let entries = match self.session.read_range(&query, *group).await {
                Ok(entries) => entries,
                Err(error) => {
                    tracing::debug!("range read failed in group {}: {}", group, error);
                    continue;
                }
            };
            if entries.is_empty() {
                continue;
            }

            if request.ioflags.contains(IoFlags::NODATA) {
                let total: u64 = entries.iter().map(|entry| entry.count).sum();
                return Ok(vec![total.to_string()]);
            }

            return Ok(entries
                .into_iter()
                .map(|entry| String::from_utf8_lossy(&entry.data).into_owned())
                .collect());
        }

        tracing::error!(
            "range request failed for key {} in {} groups",
            reference,
            groups.len()
        );
        Err(ProxyError::NotFound(reference.to_string()))
    }

    pub async fn lookup_addr(&self, key: &Key, groups: &[GroupId]) -> Result<Vec<Remote>> {
        let groups = self.selector.select(groups, 0)?;

        let mut addrs = Vec::with_capacity(groups.len());
        for group in groups {
            addrs.push(self.session.lookup_address(key, group).await?);
        }
        Ok(addrs)
    }

    pub async fn exec_script(
        &self,
        key: &Key,
        script: &str,
        payload: Bytes,
        groups: &[GroupId],
    ) -> Result<String> {
        let live = self.session.state_count();
        if live < self.config.die_limit {
            return Err(ProxyError::TooFewStates {
                live,
                required: self.config.die_limit,
            });
        }

        let groups = self.selector.select(groups, 0)?;
        self.session
            .exec_script(key, script, payload, &groups)
            .await
            .map_err(|error| {
                tracing::error!("can not execute script {}: {}", script, error);
                ProxyError::from(error)
            })
    }
}
