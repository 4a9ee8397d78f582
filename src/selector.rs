use rand::seq::SliceRandom;

use crate::error::{ProxyError, Result};
use crate::key::GroupId;

/// Produces the ordered candidate group list for one call.
///
/// An explicit caller list is taken as is. The configured default list is
/// used otherwise, with every entry after the first shuffled: the head is
/// an affinity anchor, the rest spread load. The shuffle operates on a
/// local copy; the default list itself is immutable after construction.
#[derive(Debug, Clone)]
pub struct GroupSelector {
    defaults: Vec<GroupId>,
}

impl GroupSelector {
    pub fn new(defaults: Vec<GroupId>) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &[GroupId] {
        &self.defaults
    }

    /// Candidate groups for a call. `count` of zero means "no truncation".
    pub fn select(&self, explicit: &[GroupId], count: usize) -> Result<Vec<GroupId>> {
        let mut groups = if !explicit.is_empty() {
            explicit.to_vec()
        } else {
            let mut defaults = self.defaults.clone();
            if defaults.len() > 1 {
                defaults[1..].shuffle(&mut rand::thread_rng());
            }
            defaults
        };

        if count > 0 && count < groups.len() {
            groups.truncate(count);
        }

        if groups.is_empty() {
            return Err(ProxyError::NoGroups);
        }

        Ok(groups)
    }
}
