//! Scripted collaborators for engine tests: a mock storage session that
//! records every call and injects per-group failures, and a canned
//! balancer transport.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::balancer::BalancerTransport;
use crate::error::{ProxyError, Result};
use crate::key::{GroupId, Key, ObjectId, OBJECT_ID_BYTES};
use crate::session::{
    BulkReadReply, FoundIndex, IndexEntry, IoFlags, LocationReply, LookupEntry, RangeEntry,
    RangeQuery, RawNodeStat, Remote, Session, SessionError, SessionResult, StorageDescriptor,
};

/// Deterministic id for a name, independent of the session.
pub(crate) fn test_id(name: &str) -> ObjectId {
    let mut raw = [0u8; OBJECT_ID_BYTES];
    for round in 0..4u64 {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        round.hash(&mut hasher);
        let chunk = hasher.finish().to_be_bytes();
        raw[(round as usize) * 8..(round as usize + 1) * 8].copy_from_slice(&chunk);
    }
    ObjectId::from_bytes(raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteFlavor {
    Data,
    Prepare,
    Commit,
    Plain,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedWrite {
    pub flavor: WriteFlavor,
    pub offset: u64,
    pub len: u64,
    pub total: u64,
    pub groups: Vec<GroupId>,
}

#[derive(Default)]
pub(crate) struct MockSession {
    pub state_count: usize,
    /// Groups that fail, per successive write call; exhausted entries mean
    /// "no failures".
    write_failures: Mutex<VecDeque<Vec<GroupId>>>,
    pub writes: Mutex<Vec<RecordedWrite>>,
    pub removes: Mutex<Vec<(String, Vec<GroupId>)>>,
    pub metadata_writes: Mutex<Vec<Vec<GroupId>>>,
    pub metadata_fails: AtomicBool,
    pub remove_fails: AtomicBool,
    lookup_rounds: Mutex<VecDeque<Vec<LookupEntry>>>,
    pub lookup_calls: Mutex<Vec<Vec<GroupId>>>,
    read_response: Mutex<Option<SessionResult<Bytes>>>,
    range_responses: Mutex<HashMap<GroupId, SessionResult<Vec<RangeEntry>>>>,
    bulk_read_response: Mutex<Vec<BulkReadReply>>,
    pub bulk_read_calls: Mutex<Vec<(Vec<ObjectId>, Vec<GroupId>)>>,
    bulk_write_response: Mutex<Vec<LocationReply>>,
    pub bulk_write_calls: Mutex<Vec<(Vec<ObjectId>, Vec<usize>, Vec<GroupId>)>>,
    exec_response: Mutex<Option<SessionResult<String>>>,
    pub exec_calls: Mutex<Vec<(String, Vec<GroupId>)>>,
    stats: Mutex<Vec<RawNodeStat>>,
    pub index_updates: Mutex<Vec<(String, Vec<IndexEntry>)>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            state_count: 16,
            ..Self::default()
        }
    }

    pub fn with_states(state_count: usize) -> Self {
        Self {
            state_count,
            ..Self::default()
        }
    }

    pub fn fail_writes(&self, plan: Vec<Vec<GroupId>>) {
        *self.write_failures.lock().unwrap() = plan.into();
    }

    pub fn script_lookup(&self, rounds: Vec<Vec<LookupEntry>>) {
        *self.lookup_rounds.lock().unwrap() = rounds.into();
    }

    pub fn set_read(&self, response: SessionResult<Bytes>) {
        *self.read_response.lock().unwrap() = Some(response);
    }

    pub fn set_range(&self, group: GroupId, response: SessionResult<Vec<RangeEntry>>) {
        self.range_responses.lock().unwrap().insert(group, response);
    }

    pub fn set_bulk_read(&self, replies: Vec<BulkReadReply>) {
        *self.bulk_read_response.lock().unwrap() = replies;
    }

    pub fn set_bulk_write(&self, replies: Vec<LocationReply>) {
        *self.bulk_write_response.lock().unwrap() = replies;
    }

    pub fn set_exec(&self, response: SessionResult<String>) {
        *self.exec_response.lock().unwrap() = Some(response);
    }

    pub fn set_stats(&self, stats: Vec<RawNodeStat>) {
        *self.stats.lock().unwrap() = stats;
    }

    pub fn key_id(key: &Key) -> ObjectId {
        match key {
            Key::Id { id, .. } => *id,
            Key::Name { name, .. } => test_id(name),
        }
    }

    pub fn reply_for(key: &Key, group: GroupId) -> LocationReply {
        let id = Self::key_id(key);
        LocationReply {
            group_id: group,
            id,
            addr: Remote::new(format!("node-{}", group), 0),
            storage: StorageDescriptor::Plain {
                fs_path: format!("/srv/{}/{}", group, id.to_short_hex()),
            },
        }
    }

    pub fn ok_entry(key: &Key, group: GroupId) -> LookupEntry {
        LookupEntry {
            group_id: group,
            result: Ok(Self::reply_for(key, group)),
        }
    }

    pub fn err_entry(group: GroupId) -> LookupEntry {
        LookupEntry {
            group_id: group,
            result: Err(SessionError::NotFound),
        }
    }

    fn record_write(
        &self,
        flavor: WriteFlavor,
        key: &Key,
        len: u64,
        offset: u64,
        total: u64,
        groups: &[GroupId],
    ) -> Vec<LocationReply> {
        let failed = self
            .write_failures
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        self.writes.lock().unwrap().push(RecordedWrite {
            flavor,
            offset,
            len,
            total,
            groups: groups.to_vec(),
        });

        groups
            .iter()
            .filter(|group| !failed.contains(group))
            .map(|group| Self::reply_for(key, *group))
            .collect()
    }
}

#[async_trait]
impl Session for MockSession {
    fn state_count(&self) -> usize {
        self.state_count
    }

    async fn transform(&self, name: &str) -> SessionResult<ObjectId> {
        Ok(test_id(name))
    }

    async fn write_data(
        &self,
        key: &Key,
        payload: Bytes,
        offset: u64,
        groups: &[GroupId],
        _cflags: u64,
        _ioflags: IoFlags,
    ) -> SessionResult<Vec<LocationReply>> {
        Ok(self.record_write(WriteFlavor::Data, key, payload.len() as u64, offset, 0, groups))
    }

    async fn write_prepare(
        &self,
        key: &Key,
        payload: Bytes,
        offset: u64,
        total_size: u64,
        groups: &[GroupId],
        _cflags: u64,
        _ioflags: IoFlags,
    ) -> SessionResult<Vec<LocationReply>> {
        Ok(self.record_write(
            WriteFlavor::Prepare,
            key,
            payload.len() as u64,
            offset,
            total_size,
            groups,
        ))
    }

    async fn write_commit(
        &self,
        key: &Key,
        payload: Bytes,
        offset: u64,
        total_size: u64,
        groups: &[GroupId],
        _cflags: u64,
        _ioflags: IoFlags,
    ) -> SessionResult<Vec<LocationReply>> {
        Ok(self.record_write(
            WriteFlavor::Commit,
            key,
            payload.len() as u64,
            offset,
            total_size,
            groups,
        ))
    }

    async fn write_plain(
        &self,
        key: &Key,
        payload: Bytes,
        offset: u64,
        groups: &[GroupId],
        _cflags: u64,
        _ioflags: IoFlags,
    ) -> SessionResult<Vec<LocationReply>> {
        Ok(self.record_write(WriteFlavor::Plain, key, payload.len() as u64, offset, 0, groups))
    }

    async fn write_metadata(&self, _key: &Key, groups: &[GroupId]) -> SessionResult<()> {
        if self.metadata_fails.load(Ordering::SeqCst) {
            return Err(SessionError::Network("metadata write failed".to_string()));
        }
        self.metadata_writes.lock().unwrap().push(groups.to_vec());
        Ok(())
    }

    async fn read(
        &self,
        _key: &Key,
        _offset: u64,
        _size: u64,
        _groups: &[GroupId],
        _cflags: u64,
        _ioflags: IoFlags,
        _latest: bool,
    ) -> SessionResult<Bytes> {
        self.read_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Err(SessionError::NotFound))
    }

    async fn lookup(&self, _key: &Key, groups: &[GroupId]) -> SessionResult<Vec<LookupEntry>> {
        self.lookup_calls.lock().unwrap().push(groups.to_vec());
        Ok(self
            .lookup_rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn remove(&self, key: &Key, groups: &[GroupId]) -> SessionResult<()> {
        self.removes
            .lock()
            .unwrap()
            .push((key.to_string(), groups.to_vec()));
        if self.remove_fails.load(Ordering::SeqCst) {
            return Err(SessionError::Network("remove failed".to_string()));
        }
        Ok(())
    }

    async fn read_range(
        &self,
        _query: &RangeQuery,
        group: GroupId,
    ) -> SessionResult<Vec<RangeEntry>> {
        self.range_responses
            .lock()
            .unwrap()
            .get(&group)
            .cloned()
            .unwrap_or(Ok(Vec::new()))
    }

    async fn bulk_read(
        &self,
        ids: &[ObjectId],
        groups: &[GroupId],
        _cflags: u64,
    ) -> SessionResult<Vec<BulkReadReply>> {
        self.bulk_read_calls
            .lock()
            .unwrap()
            .push((ids.to_vec(), groups.to_vec()));
        Ok(self.bulk_read_response.lock().unwrap().clone())
    }

    async fn bulk_write(
        &self,
        ids: &[ObjectId],
        payloads: &[Bytes],
        groups: &[GroupId],
        _cflags: u64,
    ) -> SessionResult<Vec<LocationReply>> {
        self.bulk_write_calls.lock().unwrap().push((
            ids.to_vec(),
            payloads.iter().map(Bytes::len).collect(),
            groups.to_vec(),
        ));
        Ok(self.bulk_write_response.lock().unwrap().clone())
    }

    async fn lookup_address(&self, _key: &Key, group: GroupId) -> SessionResult<Remote> {
        Ok(Remote::new(format!("node-{}", group), 1000 + group as u16))
    }

    async fn exec_script(
        &self,
        _key: &Key,
        script: &str,
        _payload: Bytes,
        groups: &[GroupId],
    ) -> SessionResult<String> {
        self.exec_calls
            .lock()
            .unwrap()
            .push((script.to_string(), groups.to_vec()));
        self.exec_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Ok(String::new()))
    }

    async fn stat(&self) -> SessionResult<Vec<RawNodeStat>> {
        Ok(self.stats.lock().unwrap().clone())
    }

    async fn update_indexes(&self, key: &Key, entries: &[IndexEntry]) -> SessionResult<()> {
        self.index_updates
            .lock()
            .unwrap()
            .push((key.to_string(), entries.to_vec()));
        Ok(())
    }

    async fn find_indexes(&self, _indexes: &[String]) -> SessionResult<Vec<FoundIndex>> {
        Ok(Vec::new())
    }

    async fn find_indexes_raw(&self, _ids: &[ObjectId]) -> SessionResult<Vec<FoundIndex>> {
        Ok(Vec::new())
    }

    async fn check_indexes(&self, _key: &Key) -> SessionResult<Vec<IndexEntry>> {
        Ok(Vec::new())
    }
}

/// Canned balancer bus: one response per method, every call recorded.
#[derive(Default)]
pub(crate) struct MockBalancerTransport {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    recorded: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockBalancerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: &str, payload: Vec<u8>) {
        self.responses
            .lock()
            .unwrap()
            .insert(method.to_string(), payload);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .filter(|(recorded, _)| recorded == method)
            .count()
    }

    pub fn recorded_payloads(&self, method: &str) -> Vec<Vec<u8>> {
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .filter(|(recorded, _)| recorded == method)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl BalancerTransport for MockBalancerTransport {
    async fn call(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.recorded
            .lock()
            .unwrap()
            .push((method.to_string(), payload));

        self.responses
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .ok_or_else(|| {
                ProxyError::BalancerUnavailable(format!("no scripted response for {}", method))
            })
    }
}
