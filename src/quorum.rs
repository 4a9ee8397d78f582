use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Write-acceptance policy: how many groups must confirm a write before it
/// is reported successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessMode {
    Any,
    Quorum,
    All,
    AtLeast(u32),
}

impl Default for SuccessMode {
    fn default() -> Self {
        SuccessMode::Quorum
    }
}

impl SuccessMode {
    /// Required successes for a given replication count.
    pub fn required(&self, replication: usize) -> usize {
        match self {
            SuccessMode::Any => 1,
            SuccessMode::Quorum => replication / 2 + 1,
            SuccessMode::All => replication,
            SuccessMode::AtLeast(n) => *n as usize,
        }
    }

    /// Acceptance predicate over the number of groups that replied without
    /// error. ALL demands exact coverage; the other modes are thresholds.
    pub fn accepts(&self, successes: usize, replication: usize) -> bool {
        match self {
            SuccessMode::All => successes == replication,
            _ => successes >= self.required(replication),
        }
    }
}

impl fmt::Display for SuccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuccessMode::Any => f.write_str("any"),
            SuccessMode::Quorum => f.write_str("quorum"),
            SuccessMode::All => f.write_str("all"),
            SuccessMode::AtLeast(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for SuccessMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SuccessMode::AtLeast(n) => serializer.serialize_u32(*n),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for SuccessMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u32),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            // 0 means "not set": fall back to the default policy.
            Repr::Num(0) => Ok(SuccessMode::Quorum),
            Repr::Num(n) => Ok(SuccessMode::AtLeast(n)),
            Repr::Text(text) => match text.to_ascii_lowercase().as_str() {
                "any" => Ok(SuccessMode::Any),
                "quorum" => Ok(SuccessMode::Quorum),
                "all" => Ok(SuccessMode::All),
                other => other
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .map(SuccessMode::AtLeast)
                    .ok_or_else(|| D::Error::custom(format!("unknown success mode: {}", other))),
            },
        }
    }
}
