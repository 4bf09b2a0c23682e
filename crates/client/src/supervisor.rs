//! Pipeline supervisor
//!
//! `TurnProxy` binds the listen socket, launches N pipelines and runs the
//! control loop that serves egress requests, tracks pipeline states and
//! tears everything down on the first pipeline termination or on `stop()`.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use turnwire_core::{
    Conn, CredentialResolver, PipelineId, PipelineState, ProxyConfig, SharedConn,
    StaticCredentialResolver,
};
use turnwire_dtls::{DtlsConnector, SecureConnector};
use turnwire_relay::{EgressSettings, RelayConnector, RelayEgressBridge, TurnConnector};

use crate::pipe::DEFAULT_CHANNEL_CAPACITY;
use crate::pipeline::{Leg, PipelineEvent, PipelineStates, PipelineTask};
use crate::{ClientError, Result};

/// Builder for [`TurnProxy`] with replaceable collaborators
pub struct TurnProxyBuilder {
    config: ProxyConfig,
    secure: Option<Arc<dyn SecureConnector>>,
    relay: Option<Arc<dyn RelayConnector>>,
    resolver: Option<Arc<dyn CredentialResolver>>,
    channel_capacity: usize,
}

impl TurnProxyBuilder {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            secure: None,
            relay: None,
            resolver: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_secure_connector(mut self, connector: Arc<dyn SecureConnector>) -> Self {
        self.secure = Some(connector);
        self
    }

    pub fn with_relay_connector(mut self, connector: Arc<dyn RelayConnector>) -> Self {
        self.relay = Some(connector);
        self
    }

    pub fn with_credential_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn build(self) -> TurnProxy {
        TurnProxy {
            shared: Arc::new(ProxyShared {
                config: self.config,
                secure: self.secure.unwrap_or_else(|| Arc::new(DtlsConnector::new())),
                relay: self.relay.unwrap_or_else(|| Arc::new(TurnConnector::new())),
                resolver: self
                    .resolver
                    .unwrap_or_else(|| Arc::new(StaticCredentialResolver::default())),
                channel_capacity: self.channel_capacity,
                run: Mutex::new(None),
                local_addr: Mutex::new(None),
                states: Arc::new(PipelineStates::default()),
                egress_spawned: AtomicUsize::new(0),
            }),
        }
    }
}

/// Tokens for the run in progress
#[derive(Clone)]
struct RunHandle {
    /// Global scope; every pipeline scope is a child
    shutdown: CancellationToken,
    /// Fired once the run has joined every task
    done: CancellationToken,
}

/// Clears the run slot when the run body exits, including on panic
struct RunFinish {
    shared: Arc<ProxyShared>,
    run: RunHandle,
}

impl Drop for RunFinish {
    fn drop(&mut self) {
        *self.shared.local_addr.lock() = None;
        *self.shared.run.lock() = None;
        self.run.done.cancel();
    }
}

/// UDP relay proxy running N DTLS-over-TURN pipelines
pub struct TurnProxy {
    shared: Arc<ProxyShared>,
}

struct ProxyShared {
    config: ProxyConfig,
    secure: Arc<dyn SecureConnector>,
    relay: Arc<dyn RelayConnector>,
    resolver: Arc<dyn CredentialResolver>,
    channel_capacity: usize,
    run: Mutex<Option<RunHandle>>,
    local_addr: Mutex<Option<SocketAddr>>,
    states: Arc<PipelineStates>,
    egress_spawned: AtomicUsize,
}

impl TurnProxy {
    /// Proxy with the DTLS, TURN and static credential defaults
    pub fn new(config: ProxyConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ProxyConfig) -> TurnProxyBuilder {
        TurnProxyBuilder::new(config)
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.run.lock().is_some()
    }

    /// Bound listen address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    /// State of every pipeline in the current or last run
    pub fn pipeline_states(&self) -> Vec<(PipelineId, PipelineState)> {
        self.shared.states.snapshot()
    }

    /// Relay egress bridges spawned in the current or last run
    pub fn egress_spawned(&self) -> usize {
        self.shared.egress_spawned.load(Ordering::SeqCst)
    }

    /// Run the proxy until `stop()` or until any pipeline terminates.
    ///
    /// Setup failures (invalid config, peer resolution, bind) are returned
    /// as errors. Pipeline failures are logged and end the run with
    /// `Ok(())` once every task has unwound.
    ///
    /// Dropping the returned future requests shutdown; the run keeps
    /// unwinding in the background and `stop()` waits for it.
    pub async fn start(&self) -> Result<()> {
        self.shared.config.validate()?;

        let run = {
            let mut guard = self.shared.run.lock();
            if guard.is_some() {
                return Err(ClientError::AlreadyRunning);
            }
            let run = RunHandle {
                shutdown: CancellationToken::new(),
                done: CancellationToken::new(),
            };
            *guard = Some(run.clone());
            run
        };

        let _cancel_on_drop = run.shutdown.clone().drop_guard();
        let shared = Arc::clone(&self.shared);
        let body = tokio::spawn(async move {
            let _finish = RunFinish {
                shared: Arc::clone(&shared),
                run: run.clone(),
            };
            shared.run_until_shutdown(&run.shutdown).await
        });

        match body.await {
            Ok(result) => result,
            Err(e) => Err(ClientError::TaskPanicked(e.to_string())),
        }
    }

    /// Request an orderly shutdown and wait for the run to unwind.
    ///
    /// Returns immediately when the proxy is not running.
    pub async fn stop(&self) {
        let run = self.shared.run.lock().clone();
        if let Some(run) = run {
            info!("Stopping proxy");
            run.shutdown.cancel();
            run.done.cancelled().await;
        }
    }
}

impl ProxyShared {
    async fn run_until_shutdown(&self, shutdown: &CancellationToken) -> Result<()> {
        let peer = tokio::net::lookup_host(&self.config.peer)
            .await
            .map_err(|e| ClientError::ResolvePeer(format!("{}: {}", self.config.peer, e)))?
            .next()
            .ok_or_else(|| {
                ClientError::ResolvePeer(format!("{}: no addresses", self.config.peer))
            })?;

        let socket = UdpSocket::bind(&self.config.listen)
            .await
            .map_err(|e| ClientError::Bind(format!("{}: {}", self.config.listen, e)))?;
        let socket = Arc::new(socket);
        let local_addr = socket
            .local_addr()
            .map_err(|e| ClientError::Bind(format!("{}: {}", self.config.listen, e)))?;
        *self.local_addr.lock() = Some(local_addr);
        info!(
            "Listening on {}, relaying to {} over {} with {} stream(s)",
            local_addr, peer, self.config.transport, self.config.streams
        );

        let bridge = Arc::new(RelayEgressBridge::new(
            Arc::clone(&self.resolver),
            Arc::clone(&self.relay),
            EgressSettings {
                locator: self.config.link.clone(),
                peer,
                transport: self.config.transport,
                realm: self.config.realm.clone(),
            },
        ));

        self.states.reset(self.config.streams);
        self.egress_spawned.store(0, Ordering::SeqCst);

        let (events_tx, events_rx) = mpsc::channel(self.config.streams * 4);
        let mut tasks = JoinSet::new();
        let mut scopes = HashMap::new();

        for i in 0..self.config.streams {
            let id = PipelineId(i);
            let cancel = shutdown.child_token();
            scopes.insert(id, cancel.clone());
            tasks.spawn(
                PipelineTask {
                    id,
                    socket: Arc::clone(&socket),
                    connector: Arc::clone(&self.secure),
                    events: events_tx.clone(),
                    states: Arc::clone(&self.states),
                    cancel,
                    channel_capacity: self.channel_capacity,
                }
                .run(),
            );
            debug!("{} started", id);
        }

        let control = ControlLoop {
            shutdown,
            states: &self.states,
            egress_spawned: &self.egress_spawned,
            bridge,
            events_tx,
            scopes,
            spawned: HashSet::new(),
        };
        control.run(events_rx, &mut tasks).await;

        shutdown.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("Pipeline task panicked: {}", e);
                }
            }
        }
        self.states.close_remaining();

        drop(socket);
        info!("Proxy stopped");
        Ok(())
    }
}

/// Event fan-in for one run
struct ControlLoop<'a> {
    shutdown: &'a CancellationToken,
    states: &'a PipelineStates,
    egress_spawned: &'a AtomicUsize,
    bridge: Arc<RelayEgressBridge>,
    events_tx: mpsc::Sender<PipelineEvent>,
    scopes: HashMap<PipelineId, CancellationToken>,
    spawned: HashSet<PipelineId>,
}

impl ControlLoop<'_> {
    async fn run(mut self, mut events: mpsc::Receiver<PipelineEvent>, tasks: &mut JoinSet<()>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                PipelineEvent::EgressReady { id, endpoint } => {
                    self.spawn_egress(id, endpoint, tasks).await;
                }
                PipelineEvent::Established { id } => {
                    info!("{}: DTLS connection established", id);
                }
                PipelineEvent::Terminated { id, leg, result } => {
                    match result {
                        Ok(()) => {
                            info!("{}: {} closed, shutting down", id, leg);
                            self.states.advance(id, PipelineState::Closed);
                        }
                        Err(e) => {
                            error!("{}: {} failed: {}", id, leg, e);
                            self.states.advance(id, PipelineState::Failed);
                        }
                    }
                    self.shutdown.cancel();
                    break;
                }
            }
        }
    }

    async fn spawn_egress(&mut self, id: PipelineId, endpoint: SharedConn, tasks: &mut JoinSet<()>) {
        let scope = match self.scopes.get(&id) {
            Some(scope) if !scope.is_cancelled() => scope.child_token(),
            _ => {
                debug!("{}: discarding egress request for cancelled pipeline", id);
                let _ = endpoint.close().await;
                return;
            }
        };
        if !self.spawned.insert(id) {
            warn!("{}: relay egress already running, ignoring request", id);
            return;
        }

        self.egress_spawned.fetch_add(1, Ordering::SeqCst);
        debug!("{}: spawning relay egress", id);

        let bridge = Arc::clone(&self.bridge);
        let events = self.events_tx.clone();
        tasks.spawn(async move {
            let bridge_task = tokio::spawn(async move { bridge.run(endpoint, scope).await });
            let result = match bridge_task.await {
                Ok(result) => result.map_err(ClientError::from),
                Err(e) => Err(ClientError::TaskPanicked(e.to_string())),
            };
            let _ = events
                .send(PipelineEvent::Terminated {
                    id,
                    leg: Leg::Egress,
                    result,
                })
                .await;
        });
    }
}
