//! Replicated write engine: one-shot and chunked uploads, quorum
//! evaluation, post-write compensation, and metadata finalize.

use std::sync::Arc;

use bytes::Bytes;

use crate::balancer::Balancer;
use crate::config::{BalancerUsage, ProxyConfig};
use crate::container::DataContainer;
use crate::error::{ProxyError, Result};
use crate::key::{GroupId, Key};
use crate::lookup::LookupResult;
use crate::quorum::SuccessMode;
use crate::selector::GroupSelector;
use crate::session::{IoFlags, LocationReply, Session};

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub key: Key,
    pub data: DataContainer,
    pub offset: u64,
    /// Reserved size for the PREPARE/COMMIT flavors; unused otherwise.
    pub size: u64,
    pub cflags: u64,
    pub ioflags: IoFlags,
    pub groups: Vec<GroupId>,
    /// Per-call policy override; the configured mode applies otherwise.
    pub success_mode: Option<SuccessMode>,
}

impl WriteRequest {
    pub fn new(key: Key, data: DataContainer) -> Self {
        Self {
            key,
            data,
            offset: 0,
            size: 0,
            cflags: 0,
            ioflags: IoFlags::empty(),
            groups: Vec::new(),
            success_mode: None,
        }
    }
}

/// Tracks the surviving group set across the calls of one upload and keeps
/// the authoritative reply vector for the caller.
struct WriteTracker {
    mode: SuccessMode,
    replication: usize,
    desired: Vec<GroupId>,
    surviving: Vec<GroupId>,
    result: Vec<LocationReply>,
}

impl WriteTracker {
    fn new(mode: SuccessMode, replication: usize, desired: Vec<GroupId>) -> Self {
        Self {
            mode,
            replication,
            desired,
            surviving: Vec::new(),
            result: Vec::new(),
        }
    }

    /// Fold in one call's replies. Only an authoritative call (the one-shot
    /// write, the final commit) replaces the reported result; every call
    /// shrinks the surviving set.
    fn record(&mut self, replies: Vec<LocationReply>, authoritative: bool) {
        self.surviving = replies.iter().map(|reply| reply.group_id).collect();
        if authoritative {
            self.result = replies;
        }
    }

    fn accepted(&self) -> bool {
        self.mode.accepts(self.surviving.len(), self.replication)
    }

    fn surviving(&self) -> &[GroupId] {
        &self.surviving
    }

    fn has_incomplete(&self) -> bool {
        self.desired.len() != self.surviving.len()
    }

    fn incomplete_groups(&self) -> Vec<GroupId> {
        let mut incomplete: Vec<GroupId> = self
            .desired
            .iter()
            .copied()
            .filter(|group| !self.surviving.contains(group))
            .collect();
        incomplete.sort_unstable();
        incomplete
    }

    fn result(&self) -> &[LocationReply] {
        &self.result
    }
}

pub struct WriteOperation {
    session: Arc<dyn Session>,
    selector: GroupSelector,
    balancer: Option<Arc<Balancer>>,
    config: Arc<ProxyConfig>,
}

impl WriteOperation {
    pub fn new(
        session: Arc<dyn Session>,
        selector: GroupSelector,
        balancer: Option<Arc<Balancer>>,
        config: Arc<ProxyConfig>,
    ) -> Self {
        Self {
            session,
            selector,
            balancer,
            config,
        }
    }

    pub async fn run(&self, request: WriteRequest) -> Result<Vec<LookupResult>> {
        let live = self.session.state_count();
        if live < self.config.die_limit {
            return Err(ProxyError::TooFewStates {
                live,
                required: self.config.die_limit,
            });
        }

        let replication = if request.groups.is_empty() {
            self.config.resolved_replication()
        } else {
            request.groups.len()
        };
        let mode = request.success_mode.unwrap_or(self.config.success_mode);
        let key_str = request.key.to_string();

        let mut targets = self.selector.select(&request.groups, 0)?;
        targets = self
            .consult_balancer(targets, &request, replication)
            .await?;
        if replication > 0 && targets.len() > replication {
            targets.truncate(replication);
        }

        let content = request.data.pack();

        let flavor = request.ioflags & (IoFlags::PREPARE | IoFlags::COMMIT | IoFlags::PLAIN_WRITE);
        let chunked = flavor.is_empty()
            && self.config.chunk_size > 0
            && (content.len() as u64) > self.config.chunk_size
            && !request.key.by_id();

        let mut tracker = WriteTracker::new(mode, replication, targets.clone());

        let upload = if !flavor.is_empty() {
            self.run_flavored(&request, content, &targets, &mut tracker)
                .await
        } else if chunked {
            self.run_chunked(&request, &content, &targets, &mut tracker)
                .await
        } else {
            self.session
                .write_data(
                    &request.key,
                    content,
                    request.offset,
                    &targets,
                    request.cflags,
                    request.ioflags,
                )
                .await
                .map_err(ProxyError::from)
                .map(|replies| tracker.record(replies, true))
        };

        if let Err(error) = upload {
            tracing::error!("can't write data for key {}: {}", key_str, error);
            return Err(error);
        }

        if !tracker.accepted() {
            self.compensate(&request.key, &targets).await;
            return Err(ProxyError::WriteRejected(key_str));
        }

        if tracker.has_incomplete() {
            let incomplete = tracker.incomplete_groups();
            tracing::warn!(
                "removing incomplete copies of key {} from groups {:?}",
                key_str,
                incomplete
            );
            self.compensate(&request.key, &incomplete).await;
        }

        // Metadata finalize; a failure fails the write but the durable
        // body is left in place.
        if let Err(error) = self
            .session
            .write_metadata(&request.key, tracker.surviving())
            .await
        {
            tracing::error!("can't write metadata for key {}: {}", key_str, error);
            return Err(error.into());
        }

        Ok(LookupResult::parse_all(
            tracker.result(),
            &self.config.path_style(),
        ))
    }

    /// Single low-level call of the flavor picked by ioflags; no chunking.
    async fn run_flavored(
        &self,
        request: &WriteRequest,
        content: Bytes,
        targets: &[GroupId],
        tracker: &mut WriteTracker,
    ) -> Result<()> {
        let replies = if request.ioflags.contains(IoFlags::PREPARE) {
            self.session
                .write_prepare(
                    &request.key,
                    content,
                    request.offset,
                    request.size,
                    targets,
                    request.cflags,
                    request.ioflags,
                )
                .await?
        } else if request.ioflags.contains(IoFlags::COMMIT) {
            self.session
                .write_commit(
                    &request.key,
                    content,
                    request.offset,
                    request.size,
                    targets,
                    request.cflags,
                    request.ioflags,
                )
                .await?
        } else {
            self.session
                .write_plain(
                    &request.key,
                    content,
                    request.offset,
                    targets,
                    request.cflags,
                    request.ioflags,
                )
                .await?
        };

        tracker.record(replies, true);
        Ok(())
    }

    /// Chunked upload: prepare with the first extent, plain writes for the
    /// middle, commit for the last. Each chunk goes only to the groups
    /// that survived the previous one; the upload is abandoned as soon as
    /// the surviving set stops satisfying acceptance.
    async fn run_chunked(
        &self,
        request: &WriteRequest,
        content: &Bytes,
        targets: &[GroupId],
        tracker: &mut WriteTracker,
    ) -> Result<()> {
        let chunk = self.config.chunk_size;
        let total = content.len() as u64;
        let mut offset = request.offset;

        let first = content.slice(offset as usize..((offset + chunk).min(total)) as usize);
        let replies = self
            .session
            .write_prepare(
                &request.key,
                first,
                offset,
                total,
                targets,
                request.cflags,
                request.ioflags,
            )
            .await?;
        tracker.record(replies, false);

        while tracker.accepted() {
            offset += chunk;

            if offset + chunk >= total {
                let last = content.slice(offset as usize..total as usize);
                let replies = self
                    .session
                    .write_commit(
                        &request.key,
                        last,
                        offset,
                        total,
                        tracker.surviving(),
                        request.cflags,
                        request.ioflags,
                    )
                    .await?;
                tracker.record(replies, true);
                break;
            }

            let body = content.slice(offset as usize..(offset + chunk) as usize);
            let replies = self
                .session
                .write_plain(
                    &request.key,
                    body,
                    offset,
                    tracker.surviving(),
                    request.cflags,
                    request.ioflags,
                )
                .await?;
            tracker.record(replies, false);
        }

        Ok(())
    }

    /// Write-time group augmentation from the weighted cache.
    async fn consult_balancer(
        &self,
        fallback: Vec<GroupId>,
        request: &WriteRequest,
        replication: usize,
    ) -> Result<Vec<GroupId>> {
        let usage = self.config.balancer_usage();
        let Some(balancer) = &self.balancer else {
            return Ok(fallback);
        };
        if usage < BalancerUsage::Optional {
            return Ok(fallback);
        }
        if request.groups.len() == replication && usage != BalancerUsage::Mandatory {
            return Ok(fallback);
        }

        match balancer.choose_groups(replication as u64).await {
            Ok(groups) => Ok(groups),
            Err(error) => {
                tracing::error!(
                    "balancer selection failed for key {}: {}",
                    request.key,
                    error
                );
                if usage >= BalancerUsage::Normal {
                    Err(error)
                } else {
                    Ok(fallback)
                }
            }
        }
    }

    /// Best-effort removal; failures are logged and swallowed.
    async fn compensate(&self, key: &Key, groups: &[GroupId]) {
        if groups.is_empty() {
            return;
        }
        if let Err(error) = self.session.remove(key, groups).await {
            tracing::error!("compensation remove failed for key {}: {}", key, error);
        }
    }
}
