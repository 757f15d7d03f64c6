//! Shared vocabulary types used across the gateway components.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A (provider, model) pair, the key every per-model component tracks by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub provider: String,
    pub model: String,
}

impl ModelKey {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Account tier, used to derive queue priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    Free,
    #[default]
    Standard,
    Pro,
    Enterprise,
}

impl UserTier {
    /// Base queue priority for this tier, on the 0-100 scale.
    pub fn base_priority(&self) -> u8 {
        match self {
            Self::Free => 10,
            Self::Standard => 40,
            Self::Pro => 70,
            Self::Enterprise => 90,
        }
    }
}

/// Token counts for a single request, used for cost estimation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}
