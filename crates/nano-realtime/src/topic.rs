//! Subscription topics.
//!
//! Kinds arrive on the wire as free-form strings; they are parsed once into
//! a [`Topic`] so routing is a hash lookup on a typed key. The wildcard is
//! its own variant rather than a magic string.

use std::fmt;

use nano_core::ids::JobId;

const WILDCARD: &str = "*";
const JOB_PREFIX: &str = "job:";
const ERROR_SUFFIX: &str = ":error";

/// A subscription key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every inbound message (`"*"`).
    All,
    /// Progress and result updates for one job (`"job:<id>"`).
    Job(JobId),
    /// Failures for one job (`"job:<id>:error"`).
    JobError(JobId),
    /// Any other kind, matched exactly.
    Kind(String),
}

impl Topic {
    /// Parse a wire kind string.
    pub fn parse(kind: &str) -> Self {
        if kind == WILDCARD {
            return Self::All;
        }
        if let Some(rest) = kind.strip_prefix(JOB_PREFIX) {
            if let Some(id) = rest.strip_suffix(ERROR_SUFFIX) {
                if !id.is_empty() {
                    return Self::JobError(JobId::from(id));
                }
            } else if !rest.is_empty() {
                return Self::Job(JobId::from(rest));
            }
        }
        Self::Kind(kind.to_string())
    }

    /// Whether this is the wildcard topic.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(WILDCARD),
            Self::Job(id) => write!(f, "{JOB_PREFIX}{id}"),
            Self::JobError(id) => write!(f, "{JOB_PREFIX}{id}{ERROR_SUFFIX}"),
            Self::Kind(kind) => f.write_str(kind),
        }
    }
}

impl From<&str> for Topic {
    fn from(kind: &str) -> Self {
        Self::parse(kind)
    }
}

impl From<String> for Topic {
    fn from(kind: String) -> Self {
        Self::parse(&kind)
    }
}
