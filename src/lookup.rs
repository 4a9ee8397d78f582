//! Caller-facing location of one object copy, with path derivation.

use crate::key::GroupId;
use crate::session::{LocationReply, StorageDescriptor};

/// How storage paths are rendered for callers.
#[derive(Debug, Clone, Copy)]
pub struct PathStyle {
    pub eblob: bool,
    pub base_port: u16,
    pub directory_bit_num: u32,
}

/// The object's extent inside a packed blob file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub file: String,
    pub offset: u64,
    pub size: u64,
}

/// One successful write/lookup in one group, with the download path
/// derived per the configured style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    pub group_id: GroupId,
    pub host: String,
    pub port: u16,
    pub family: i32,
    pub path: String,
    pub blob: Option<BlobLocation>,
}

impl LookupResult {
    pub fn parse(reply: &LocationReply, style: &PathStyle) -> Self {
        let port = style.base_port.wrapping_add(reply.group_id as u16);

        let (path, blob) = match &reply.storage {
            StorageDescriptor::Plain { fs_path } => (fs_path.clone(), None),
            StorageDescriptor::Blob { file, .. } if !style.eblob => (file.clone(), None),
            StorageDescriptor::Blob { file, offset, size } => {
                let shard = reply.id.low_bits(style.directory_bit_num);
                let logical = format!("/{}/{}", shard, reply.id.to_short_hex());
                (
                    logical,
                    Some(BlobLocation {
                        file: file.clone(),
                        offset: *offset,
                        size: *size,
                    }),
                )
            }
        };

        Self {
            group_id: reply.group_id,
            host: reply.addr.host.clone(),
            port,
            family: reply.addr.family,
            path,
            blob,
        }
    }

    pub fn parse_all(replies: &[LocationReply], style: &PathStyle) -> Vec<Self> {
        replies
            .iter()
            .map(|reply| Self::parse(reply, style))
            .collect()
    }

    /// `host:port/path` download form.
    pub fn url(&self) -> String {
        format!("{}:{}{}", self.host, self.port, self.path)
    }
}
