use serde::{Deserialize, Serialize};

/// Engine options. Every field has a default, so hosts can embed this in
/// their own configuration and set only what they need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Longest batch accepted; longer batches are answered with a single
    /// "Invalid Request" error. `None` means unbounded.
    pub max_batch_len: Option<usize>,

    /// Whether server errors for failed methods carry the failure kind and
    /// message as `data`.
    pub expose_error_details: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_batch_len: None,
            expose_error_details: true,
        }
    }
}

impl Config {
    /// Whether a batch of `len` requests is within the configured limit.
    pub fn accepts_batch(&self, len: usize) -> bool {
        self.max_batch_len.map_or(true, |max| len <= max)
    }
}
