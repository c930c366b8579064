//! Delivery modes: which execution context runs a handler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Execution context for a subscriber method.
///
/// | Mode         | Runs on                         | Publisher blocks |
/// |--------------|---------------------------------|------------------|
/// | `Inline`     | the publishing thread           | yes              |
/// | `MainThread` | the installed primary scheduler | no               |
/// | `Background` | one serialized FIFO worker      | no               |
/// | `Async`      | the unbounded blocking pool     | no               |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Run synchronously before `post` returns.
    #[default]
    Inline,
    /// Hand off to the externally supplied primary-thread scheduler.
    MainThread,
    /// Hand off to the single serialized background worker.
    Background,
    /// Hand off to the pooled async executor; no ordering guarantees.
    Async,
}

impl DeliveryMode {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Inline => "inline",
            DeliveryMode::MainThread => "main_thread",
            DeliveryMode::Background => "background",
            DeliveryMode::Async => "async",
        }
    }

    /// True if the handler runs on the publishing thread.
    pub fn is_inline(&self) -> bool {
        matches!(self, DeliveryMode::Inline)
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized delivery mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown delivery mode `{0}`")]
pub struct UnknownMode(pub String);

impl FromStr for DeliveryMode {
    type Err = UnknownMode;

    /// Accepts the snake_case names plus the aliases used by code generators
    /// (`posting`, `main`, `primary`, `serialized`, `pooled`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" | "posting" => Ok(DeliveryMode::Inline),
            "main_thread" | "main" | "primary" => Ok(DeliveryMode::MainThread),
            "background" | "serialized" => Ok(DeliveryMode::Background),
            "async" | "pooled" => Ok(DeliveryMode::Async),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}
