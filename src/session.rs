//! Contract over the underlying storage transport.
//!
//! The proxy never talks to storage nodes directly; it drives an injected
//! [`Session`] implementation. Every per-call setting (groups, cflags,
//! ioflags) travels in the call arguments, so a shared session never leaks
//! settings between concurrent calls.

use async_trait::async_trait;
use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::{GroupId, Key, ObjectId};

bitflags! {
    /// Per-call io flags. Any of the first three selects a single
    /// low-level write flavor and disables chunking; NODATA switches
    /// range reads to counting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IoFlags: u64 {
        const PREPARE     = 1;
        const COMMIT      = 2;
        const PLAIN_WRITE = 4;
        const NODATA      = 8;
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("not found")]
    NotFound,
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Network(String),
}

/// A storage node address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_family")]
    pub family: i32,
}

fn default_family() -> i32 {
    2 // AF_INET
}

impl Remote {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            family: default_family(),
        }
    }
}

/// Where a backend stored (or found) one copy of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDescriptor {
    /// Raw filesystem path on the node.
    Plain { fs_path: String },
    /// Packed blob format: backing file plus the object's extent in it.
    Blob {
        file: String,
        offset: u64,
        size: u64,
    },
}

/// One group's successful reply to a write or lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationReply {
    pub group_id: GroupId,
    pub id: ObjectId,
    pub addr: Remote,
    pub storage: StorageDescriptor,
}

/// One group's entry in a lookup sweep; failures are kept so the caller
/// can eliminate the group and retry the rest.
#[derive(Debug, Clone)]
pub struct LookupEntry {
    pub group_id: GroupId,
    pub result: SessionResult<LocationReply>,
}

/// Range query descriptor; absent bounds cover the whole keyspace.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub from: ObjectId,
    pub to: ObjectId,
    pub limit_start: u64,
    pub limit_num: u64,
    pub flags: IoFlags,
    pub kind: u32,
}

#[derive(Debug, Clone)]
pub struct RangeEntry {
    pub data: Bytes,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct BulkReadReply {
    pub id: ObjectId,
    pub data: Bytes,
}

/// Secondary-index entry, forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub index: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct FoundIndex {
    pub id: ObjectId,
    pub indexes: Vec<IndexEntry>,
}

/// Raw per-node statistics as the transport reports them. The proxy
/// converts them into [`crate::NodeStats`] for callers.
#[derive(Debug, Clone, Default)]
pub struct RawNodeStat {
    pub addr: String,
    pub id: String,
    /// Load averages scaled by 100.
    pub la: [u32; 3],
    pub vm_total: u64,
    pub vm_free: u64,
    pub vm_cached: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bavail: u64,
    pub bsize: u64,
    pub files: u64,
    pub fsid: u64,
}

/// The storage transport. Implementations are safe for concurrent use;
/// write primitives return only the groups that accepted (failed groups
/// are absent from the reply vector), while `lookup` reports per-group
/// failures explicitly.
#[async_trait]
#[allow(clippy::too_many_arguments)]
pub trait Session: Send + Sync {
    /// Number of live transport states.
    fn state_count(&self) -> usize;

    /// Transform a symbolic name into its raw storage id.
    async fn transform(&self, name: &str) -> SessionResult<ObjectId>;

    async fn write_data(
        &self,
        key: &Key,
        payload: Bytes,
        offset: u64,
        groups: &[GroupId],
        cflags: u64,
        ioflags: IoFlags,
    ) -> SessionResult<Vec<LocationReply>>;

    /// Reserve `total_size` bytes and write the first extent.
    async fn write_prepare(
        &self,
        key: &Key,
        payload: Bytes,
        offset: u64,
        total_size: u64,
        groups: &[GroupId],
        cflags: u64,
        ioflags: IoFlags,
    ) -> SessionResult<Vec<LocationReply>>;

    /// Write the final extent and seal the object at `total_size` bytes.
    async fn write_commit(
        &self,
        key: &Key,
        payload: Bytes,
        offset: u64,
        total_size: u64,
        groups: &[GroupId],
        cflags: u64,
        ioflags: IoFlags,
    ) -> SessionResult<Vec<LocationReply>>;

    /// Write an intermediate extent of a prepared object.
    async fn write_plain(
        &self,
        key: &Key,
        payload: Bytes,
        offset: u64,
        groups: &[GroupId],
        cflags: u64,
        ioflags: IoFlags,
    ) -> SessionResult<Vec<LocationReply>>;

    /// Metadata finalize for a completed body upload.
    async fn write_metadata(&self, key: &Key, groups: &[GroupId]) -> SessionResult<()>;

    /// Read one copy, falling back across `groups` internally. An error
    /// means every supplied group failed.
    async fn read(
        &self,
        key: &Key,
        offset: u64,
        size: u64,
        groups: &[GroupId],
        cflags: u64,
        ioflags: IoFlags,
        latest: bool,
    ) -> SessionResult<Bytes>;

    async fn lookup(&self, key: &Key, groups: &[GroupId]) -> SessionResult<Vec<LookupEntry>>;

    async fn remove(&self, key: &Key, groups: &[GroupId]) -> SessionResult<()>;

    async fn read_range(
        &self,
        query: &RangeQuery,
        group: GroupId,
    ) -> SessionResult<Vec<RangeEntry>>;

    async fn bulk_read(
        &self,
        ids: &[ObjectId],
        groups: &[GroupId],
        cflags: u64,
    ) -> SessionResult<Vec<BulkReadReply>>;

    async fn bulk_write(
        &self,
        ids: &[ObjectId],
        payloads: &[Bytes],
        groups: &[GroupId],
        cflags: u64,
    ) -> SessionResult<Vec<LocationReply>>;

    async fn lookup_address(&self, key: &Key, group: GroupId) -> SessionResult<Remote>;

    async fn exec_script(
        &self,
        key: &Key,
        script: &str,
        payload: Bytes,
        groups: &[GroupId],
    ) -> SessionResult<String>;

    async fn stat(&self) -> SessionResult<Vec<RawNodeStat>>;

    async fn update_indexes(&self, key: &Key, entries: &[IndexEntry]) -> SessionResult<()>;

    async fn find_indexes(&self, indexes: &[String]) -> SessionResult<Vec<FoundIndex>>;

    async fn find_indexes_raw(&self, ids: &[ObjectId]) -> SessionResult<Vec<FoundIndex>>;

    async fn check_indexes(&self, key: &Key) -> SessionResult<Vec<IndexEntry>>;
}
