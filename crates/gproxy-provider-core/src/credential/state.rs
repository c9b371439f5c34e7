use tokio::time::Instant;

use serde::{Deserialize, Serialize};

pub type CredentialId = i64;

#[derive(Debug, Clone)]
pub enum CredentialState {
    Active {
        backoff_level: u32,
    },
    Unavailable {
        until: Instant,
        reason: UnavailableReason,
        backoff_level: u32,
    },
}

impl CredentialState {
    pub fn active() -> Self {
        CredentialState::Active { backoff_level: 0 }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CredentialState::Active { .. })
    }

    pub fn unavailable_until(&self) -> Option<Instant> {
        match self {
            CredentialState::Unavailable { until, .. } => Some(*until),
            CredentialState::Active { .. } => None,
        }
    }

    /// Current exponential-backoff level, carried across timer-based recovery and
    /// only reset to 0 by a genuinely successful upstream response.
    pub fn backoff_level(&self) -> u32 {
        match self {
            CredentialState::Active { backoff_level } => *backoff_level,
            CredentialState::Unavailable { backoff_level, .. } => *backoff_level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailableReason {
    RateLimit,
    Timeout,
    Upstream5xx,
    AuthInvalid,
    ModelDisallow,
    Manual,
    Unknown,
}
