use serde::{Deserialize, Serialize};
use std::fmt;

/// A named telemetry source and the URL of its aggregate stream.
///
/// Equality covers every field, so an active and an inactive record for the
/// same cluster are different values. Discovery diffing depends on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub url: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl Cluster {
    /// Create an active cluster
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            active: true,
        }
    }

    #[must_use]
    pub fn inactive(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            active: false,
        }
    }

    /// The same cluster marked as gone
    #[must_use]
    pub fn as_down(&self) -> Self {
        Self::inactive(self.name.clone(), self.url.clone())
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.active { "up" } else { "down" };
        write!(f, "{} ({}) [{state}]", self.name, self.url)
    }
}
