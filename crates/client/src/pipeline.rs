//! One pipeline attempt
//!
//! A pipeline owns a packet channel, runs the DTLS handshake over one end
//! and hands the other end to the supervisor, which serves it with a relay
//! egress bridge. Once the handshake completes the local ingress bridge
//! forwards until the pipeline's scope is cancelled or a leg fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use turnwire_core::{Conn, PipelineId, PipelineState, SharedConn};
use turnwire_dtls::SecureConnector;

use crate::ingress::LocalIngressBridge;
use crate::pipe::duplex_channel;
use crate::{ClientError, Result};

/// Which task a termination report came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Leg {
    Pipeline,
    Egress,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Pipeline => write!(f, "pipeline"),
            Leg::Egress => write!(f, "relay egress"),
        }
    }
}

/// Messages from pipeline and egress tasks to the supervisor control loop
pub(crate) enum PipelineEvent {
    /// The channel end that needs a relay egress bridge
    EgressReady { id: PipelineId, endpoint: SharedConn },
    /// DTLS handshake completed
    Established { id: PipelineId },
    /// A task for this pipeline returned
    Terminated {
        id: PipelineId,
        leg: Leg,
        result: Result<()>,
    },
}

/// Shared snapshot of pipeline states.
///
/// States only move forward; once terminal a pipeline stays put.
#[derive(Debug, Default)]
pub(crate) struct PipelineStates {
    states: Mutex<BTreeMap<PipelineId, PipelineState>>,
}

impl PipelineStates {
    pub fn reset(&self, count: usize) {
        let mut states = self.states.lock();
        states.clear();
        for i in 0..count {
            states.insert(PipelineId(i), PipelineState::Starting);
        }
    }

    /// Move `id` to `next` unless that would go backwards. Returns whether
    /// the state changed.
    pub fn advance(&self, id: PipelineId, next: PipelineState) -> bool {
        let mut states = self.states.lock();
        match states.get_mut(&id) {
            Some(current) if !current.is_terminal() && *current < next => {
                *current = next;
                true
            }
            _ => false,
        }
    }

    /// Mark every pipeline that has not finished as closed
    pub fn close_remaining(&self) {
        for state in self.states.lock().values_mut() {
            if !state.is_terminal() {
                *state = PipelineState::Closed;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<(PipelineId, PipelineState)> {
        self.states.lock().iter().map(|(id, s)| (*id, *s)).collect()
    }
}

/// Everything one pipeline task needs
pub(crate) struct PipelineTask {
    pub id: PipelineId,
    pub socket: Arc<UdpSocket>,
    pub connector: Arc<dyn SecureConnector>,
    pub events: mpsc::Sender<PipelineEvent>,
    pub states: Arc<PipelineStates>,
    pub cancel: CancellationToken,
    pub channel_capacity: usize,
}

impl PipelineTask {
    /// Drive the pipeline and report how it ended.
    ///
    /// The report is queued before the pipeline scope is cancelled so the
    /// supervisor sees this task's outcome ahead of its egress bridge's. A
    /// panic in the pipeline body is reported as a failure.
    pub async fn run(self) {
        let id = self.id;
        let events = self.events.clone();
        let _guard = self.cancel.clone().drop_guard();

        let (local, egress) = duplex_channel(self.channel_capacity);
        let local: SharedConn = Arc::new(local);

        let body = {
            let local = Arc::clone(&local);
            tokio::spawn(async move {
                self.encapsulate_and_forward(&local, Arc::new(egress)).await
            })
        };
        let result = match body.await {
            Ok(result) => result,
            Err(e) => Err(ClientError::TaskPanicked(e.to_string())),
        };

        let _ = events
            .send(PipelineEvent::Terminated {
                id,
                leg: Leg::Pipeline,
                result,
            })
            .await;

        if let Err(e) = local.close().await {
            debug!("{}: channel close: {}", id, e);
        }
    }

    async fn encapsulate_and_forward(&self, local: &SharedConn, egress: SharedConn) -> Result<()> {
        self.states.advance(self.id, PipelineState::Encapsulating);

        // Handshake records travel over the relay, so the egress end has to
        // be served before the handshake can finish.
        let ready = PipelineEvent::EgressReady {
            id: self.id,
            endpoint: egress,
        };
        if self.events.send(ready).await.is_err() {
            return Ok(());
        }

        debug!("{}: starting DTLS handshake", self.id);
        let secure = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(()),
            conn = self.connector.connect(Arc::clone(local)) => conn?,
        };

        self.states.advance(self.id, PipelineState::Ready);
        if self
            .events
            .send(PipelineEvent::Established { id: self.id })
            .await
            .is_err()
        {
            let _ = secure.close().await;
            return Ok(());
        }

        self.states.advance(self.id, PipelineState::Forwarding);
        LocalIngressBridge::new(Arc::clone(&self.socket))
            .run(secure, self.cancel.child_token())
            .await
    }
}
