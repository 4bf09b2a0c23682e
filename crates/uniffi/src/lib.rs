//! Turnwire UniFFI Bindings
//!
//! Mobile bindings for iOS (Swift) and Android (Kotlin) via uniffi.
//!
//! Exposes a blocking start/stop surface over the async proxy so a mobile
//! service thread can own the proxy's lifetime, and forwards log lines to a
//! host callback for in-app display.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::info;

use turnwire_client::{ClientError, TurnProxy};
use turnwire_core::{ProxyConfig, TransportMode};
use turnwire_logging::{LogLevel, LogSink};

// Export UniFFI scaffolding
uniffi::setup_scaffolding!();

// Global tokio runtime for async operations
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Initialize the library (call once at app startup)
#[uniffi::export]
pub fn init_library() {
    let runtime = RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
    });

    turnwire_logging::init(LogLevel::Debug);

    match runtime {
        Ok(_) => info!("Turnwire library initialized"),
        Err(e) => tracing::error!("Failed to create tokio runtime: {}", e),
    }
}

fn get_runtime() -> Result<&'static Runtime, TurnwireFfiError> {
    RUNTIME.get().ok_or(TurnwireFfiError::NotInitialized)
}

/// Receives every formatted log line
#[uniffi::export(callback_interface)]
pub trait LogCallback: Send + Sync {
    fn on_log(&self, line: String);
}

struct CallbackSink {
    callback: Box<dyn LogCallback>,
}

impl LogSink for CallbackSink {
    fn write_line(&self, line: &str) {
        self.callback.on_log(line.to_string());
    }
}

/// Send log lines to `callback` instead of stderr
#[uniffi::export]
pub fn set_log_callback(callback: Box<dyn LogCallback>) {
    turnwire_logging::set_sink(Arc::new(CallbackSink { callback }));
}

/// Stop forwarding log lines to the host
#[uniffi::export]
pub fn clear_log_callback() {
    turnwire_logging::clear_sink();
}

/// Proxy lifecycle as seen by the host app
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ProxyState {
    Stopped,
    Running,
    Stopping,
    Error,
}

/// Error types for proxy operations
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum TurnwireFfiError {
    #[error("Library not initialized")]
    NotInitialized,

    #[error("Already running")]
    AlreadyRunning,

    #[error("Invalid configuration: {msg}")]
    InvalidConfig { msg: String },

    #[error("Start failed: {msg}")]
    StartFailed { msg: String },
}

impl From<ClientError> for TurnwireFfiError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::AlreadyRunning => TurnwireFfiError::AlreadyRunning,
            ClientError::Config(e) => TurnwireFfiError::InvalidConfig { msg: e.to_string() },
            other => TurnwireFfiError::StartFailed {
                msg: other.to_string(),
            },
        }
    }
}

/// Run `proxy` until it ends on its own or `stop` fires, whichever is first
async fn run_until_stopped(
    proxy: &TurnProxy,
    stop: &CancellationToken,
) -> Result<(), ClientError> {
    tokio::select! {
        biased;
        _ = stop.cancelled() => {
            // The dropped start future has already requested shutdown.
            proxy.stop().await;
            Ok(())
        }
        result = proxy.start() => result,
    }
}

struct HandleState {
    state: ProxyState,
    proxy: Option<Arc<TurnProxy>>,
    /// Cancelled by `stop()`; outlives the gap before the proxy registers
    stop: Option<CancellationToken>,
    error: Option<String>,
}

/// One proxy instance owned by the host app.
///
/// `start()` blocks the calling thread until the proxy is torn down, so
/// hosts call it from a dedicated worker thread and call `stop()` from
/// another.
#[derive(uniffi::Object)]
pub struct TurnProxyHandle {
    config: RwLock<ProxyConfig>,
    state: Mutex<HandleState>,
}

#[uniffi::export]
impl TurnProxyHandle {
    #[uniffi::constructor]
    pub fn new(peer: String, link: String, listen: String) -> Result<Arc<Self>, TurnwireFfiError> {
        if RUNTIME.get().is_none() {
            return Err(TurnwireFfiError::NotInitialized);
        }

        Ok(Arc::new(Self {
            config: RwLock::new(ProxyConfig::new(peer, link, listen)),
            state: Mutex::new(HandleState {
                state: ProxyState::Stopped,
                proxy: None,
                stop: None,
                error: None,
            }),
        }))
    }

    /// Number of concurrent pipelines for the next start
    pub fn set_streams(&self, streams: u32) {
        self.config.write().streams = streams as usize;
    }

    /// Reach the relay over UDP (`true`) or TCP (`false`)
    pub fn set_udp(&self, udp: bool) {
        self.config.write().transport = TransportMode::from_udp(udp);
    }

    pub fn set_realm(&self, realm: String) {
        self.config.write().realm = realm;
    }

    /// Run the proxy until `stop()` or a pipeline failure
    pub fn start(&self) -> Result<(), TurnwireFfiError> {
        let runtime = get_runtime()?;

        let (proxy, stop) = {
            let mut state = self.state.lock();
            if state.proxy.is_some() {
                return Err(TurnwireFfiError::AlreadyRunning);
            }
            let proxy = Arc::new(TurnProxy::new(self.config.read().clone()));
            let stop = CancellationToken::new();
            state.proxy = Some(Arc::clone(&proxy));
            state.stop = Some(stop.clone());
            state.state = ProxyState::Running;
            state.error = None;
            (proxy, stop)
        };

        info!("Starting proxy");
        let result = runtime.block_on(run_until_stopped(&proxy, &stop));

        let mut state = self.state.lock();
        state.proxy = None;
        state.stop = None;
        match result {
            Ok(()) => {
                state.state = ProxyState::Stopped;
                Ok(())
            }
            Err(e) => {
                let err = TurnwireFfiError::from(e);
                state.state = ProxyState::Error;
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Request shutdown and wait for `start()` to return
    pub fn stop(&self) -> Result<(), TurnwireFfiError> {
        let runtime = get_runtime()?;

        let (proxy, stop) = {
            let mut state = self.state.lock();
            match (state.proxy.clone(), state.stop.clone()) {
                (Some(proxy), Some(stop)) => {
                    state.state = ProxyState::Stopping;
                    (proxy, stop)
                }
                _ => return Ok(()),
            }
        };

        stop.cancel();
        runtime.block_on(proxy.stop());
        Ok(())
    }

    pub fn state(&self) -> ProxyState {
        self.state.lock().state
    }

    /// Bound listen address while running
    pub fn local_addr(&self) -> Option<String> {
        let proxy = self.state.lock().proxy.clone();
        proxy.and_then(|p| p.local_addr()).map(|a| a.to_string())
    }

    /// Message of the last failed start
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }
}
