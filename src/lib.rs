//! Quarry proxy - smart client for the Quarry replicated object store.
//!
//! The store shards its nodes into groups; each group is an independent
//! replica set of the same keyspace. This crate hides replica selection,
//! quorum policy, chunked uploads, partial-failure compensation, and
//! optional balancer placement advice behind a single
//! upload/download/lookup interface.

pub mod balancer;
pub mod config;
pub mod container;
pub mod error;
pub mod key;
pub mod lookup;
pub mod operations;
pub mod proxy;
pub mod quorum;
pub mod selector;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use balancer::{
    Balancer, BalancerTransport, GroupInfo, GroupInfoStatus, HttpBalancerTransport,
};
pub use config::{BalancerConfig, BalancerUsage, ProxyConfig};
pub use container::{DataContainer, Timespec};
pub use error::{ProxyError, Result};
pub use key::{GroupId, Key, ObjectId};
pub use lookup::{BlobLocation, LookupResult, PathStyle};
pub use operations::{RangeGetRequest, ReadRequest, WriteRequest};
pub use proxy::{NodeStats, StorageProxy};
pub use quorum::SuccessMode;
pub use selector::GroupSelector;
pub use session::{
    BulkReadReply, FoundIndex, IndexEntry, IoFlags, LocationReply, LookupEntry, RangeEntry,
    RangeQuery, RawNodeStat, Remote, Session, SessionError, SessionResult, StorageDescriptor,
};
