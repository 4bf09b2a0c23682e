//! Pipeline identity and lifecycle states

use serde::{Deserialize, Serialize};

/// Index of a pipeline within one proxy run (`0..streams`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineId(pub usize);

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipeline-{}", self.0)
    }
}

/// Lifecycle of one pipeline attempt.
///
/// `Starting → Encapsulating → Ready → Forwarding → (Closed | Failed)`
///
/// Variants are ordered by progress, so a state never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Packet channel allocated, legs being launched
    Starting,
    /// Secure handshake in flight over the relay leg
    Encapsulating,
    /// Handshake complete
    Ready,
    /// Both bridges forwarding
    Forwarding,
    /// Torn down by an orderly stop or by another pipeline's failure
    Closed,
    /// Torn down by its own fatal error
    Failed,
}

impl PipelineState {
    /// Whether the pipeline has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}
