use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Condvar, Mutex, OnceLock, RwLock};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::config::{RuntimeConfig, ServerBuilder, ServerConfig, StartMode};
use crate::escape::Unescaper;
use crate::policy::{IpMask, PolicyError, PolicyState};
use crate::resource::Resource;
use crate::router::{PatternError, RouteTable};

/// Pluggable sink for access and error lines, alongside the structured
/// tracing events the crate emits.
pub trait LogSink: Send + Sync {
    fn access(&self, _line: &str) {}
    fn error(&self, _line: &str) {}
}

/// Extra gate on the accept path, consulted after the IP policy.
pub trait RequestValidator: Send + Sync {
    fn validate(&self, addr: &IpAddr) -> bool;
}

pub(crate) struct TlsMaterial {
    pub key: String,
    pub cert: String,
    pub trust: Option<String>,
}

pub(crate) struct ServerCore {
    pub(crate) config: ServerConfig,
    pub(crate) table: RwLock<RouteTable>,
    pub(crate) cache: ResponseCache,
    pub(crate) policy: RwLock<PolicyState>,
    pub(crate) unescaper: RwLock<Option<Arc<dyn Unescaper>>>,
    pub(crate) log_sink: RwLock<Option<Arc<dyn LogSink>>>,
    pub(crate) validator: RwLock<Option<Arc<dyn RequestValidator>>>,
    pub(crate) running: Mutex<bool>,
    pub(crate) lifecycle: Condvar,
    pub(crate) active_connections: AtomicUsize,
    pub(crate) per_ip: Mutex<HashMap<IpAddr, usize>>,
    pub(crate) bound_addr: OnceLock<SocketAddr>,
    pub(crate) tls: OnceLock<TlsMaterial>,
    pub(crate) daemons: Mutex<Vec<may::coroutine::JoinHandle<()>>>,
}

impl Drop for ServerCore {
    fn drop(&mut self) {
        let daemons = match self.daemons.get_mut() {
            Ok(daemons) => daemons,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handle in daemons.drain(..) {
            unsafe {
                handle.coroutine().cancel();
            }
            let _ = handle.join();
        }
    }
}

/// The embeddable HTTP/1.1 server.
///
/// A `Server` is a handle over shared state: clones are cheap and every
/// clone talks to the same route table, cache, policy and lifecycle. All
/// mutating operations take `&self`, so resources holding a clone may
/// register routes or ban peers while the server runs.
#[derive(Clone)]
pub struct Server {
    pub(crate) core: Arc<ServerCore>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn from_config(config: ServerConfig) -> Self {
        let table = RouteTable::new(config.regex_checking);
        let policy = PolicyState::new(config.default_policy);
        Server {
            core: Arc::new(ServerCore {
                config,
                table: RwLock::new(table),
                cache: ResponseCache::new(),
                policy: RwLock::new(policy),
                unescaper: RwLock::new(None),
                log_sink: RwLock::new(None),
                validator: RwLock::new(None),
                running: Mutex::new(false),
                lifecycle: Condvar::new(),
                active_connections: AtomicUsize::new(0),
                per_ip: Mutex::new(HashMap::new()),
                bound_addr: OnceLock::new(),
                tls: OnceLock::new(),
                daemons: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a resource under a URL template. When a
    /// method-not-acceptable resource is configured, the registration
    /// inherits a reference to it.
    pub fn register_resource(
        &self,
        template: &str,
        resource: Arc<dyn Resource>,
        family: bool,
    ) -> Result<(), PatternError> {
        let not_acceptable = self.core.config.method_not_acceptable_resource.clone();
        self.core
            .table
            .write()
            .expect("route table lock poisoned")
            .register(template, resource, family, not_acceptable)
    }

    pub fn unregister_resource(&self, template: &str) {
        self.core
            .table
            .write()
            .expect("route table lock poisoned")
            .unregister(template);
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.core.table.read().expect("route table lock poisoned").len()
    }

    pub fn ban_ip(&self, spec: &str) -> Result<(), PolicyError> {
        let mask = IpMask::parse(spec)?;
        self.core
            .policy
            .write()
            .expect("policy lock poisoned")
            .bans
            .insert(mask);
        info!(addr = %spec, "address banned");
        Ok(())
    }

    pub fn unban_ip(&self, spec: &str) -> Result<(), PolicyError> {
        let mask = IpMask::parse(spec)?;
        self.core
            .policy
            .write()
            .expect("policy lock poisoned")
            .bans
            .remove(&mask);
        Ok(())
    }

    pub fn allow_ip(&self, spec: &str) -> Result<(), PolicyError> {
        let mask = IpMask::parse(spec)?;
        self.core
            .policy
            .write()
            .expect("policy lock poisoned")
            .allowances
            .insert(mask);
        Ok(())
    }

    pub fn disallow_ip(&self, spec: &str) -> Result<(), PolicyError> {
        let mask = IpMask::parse(spec)?;
        self.core
            .policy
            .write()
            .expect("policy lock poisoned")
            .allowances
            .remove(&mask);
        Ok(())
    }

    /// Accept-path admission: the IP policy first, then the configured
    /// request validator.
    pub(crate) fn admits(&self, ip: &IpAddr) -> bool {
        if self.core.config.ban_system_enabled {
            let policy = self.core.policy.read().expect("policy lock poisoned");
            if !policy.admits(ip) {
                return false;
            }
        }
        let validator = self
            .core
            .validator
            .read()
            .expect("validator lock poisoned")
            .clone();
        match validator {
            Some(validator) => validator.validate(ip),
            None => true,
        }
    }

    /// The response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.core.cache
    }

    pub fn set_log_sink(&self, sink: Option<Arc<dyn LogSink>>) {
        *self.core.log_sink.write().expect("log sink lock poisoned") = sink;
    }

    pub fn log_sink(&self) -> Option<Arc<dyn LogSink>> {
        self.core.log_sink.read().expect("log sink lock poisoned").clone()
    }

    pub fn set_request_validator(&self, validator: Option<Arc<dyn RequestValidator>>) {
        *self.core.validator.write().expect("validator lock poisoned") = validator;
    }

    pub fn request_validator(&self) -> Option<Arc<dyn RequestValidator>> {
        self.core.validator.read().expect("validator lock poisoned").clone()
    }

    pub fn set_unescaper(&self, unescaper: Option<Arc<dyn Unescaper>>) {
        *self.core.unescaper.write().expect("unescaper lock poisoned") = unescaper;
    }

    pub fn unescaper(&self) -> Option<Arc<dyn Unescaper>> {
        self.core.unescaper.read().expect("unescaper lock poisoned").clone()
    }

    /// Start serving.
    ///
    /// Returns `false` with a single-line diagnostic when the
    /// configuration is unusable (no port, unreadable TLS material) or the
    /// listener cannot bind. With `blocking` set, waits on the lifecycle
    /// condition until [`Server::stop`] is called.
    pub fn start(&self, blocking: bool) -> bool {
        if self.is_running() {
            warn!("server already running");
            return true;
        }
        if let Err(e) = self.launch() {
            self.error_log(&format!("failed to start server: {e:#}"));
            return false;
        }
        {
            let mut running = self.core.running.lock().expect("lifecycle mutex poisoned");
            *running = true;
        }
        info!(addr = ?self.local_addr(), "server started");
        if blocking {
            let mut running = self.core.running.lock().expect("lifecycle mutex poisoned");
            while *running {
                running = self
                    .core
                    .lifecycle
                    .wait(running)
                    .expect("lifecycle mutex poisoned");
            }
        }
        true
    }

    /// Signal the lifecycle: clears the running flag and wakes any blocking
    /// `start`. Daemon teardown happens when the last handle drops;
    /// in-flight requests run to completion.
    pub fn stop(&self) {
        {
            let mut running = self.core.running.lock().expect("lifecycle mutex poisoned");
            if *running {
                *running = false;
                info!("server stopping");
            }
        }
        self.core.lifecycle.notify_all();
    }

    pub fn is_running(&self) -> bool {
        *self.core.running.lock().expect("lifecycle mutex poisoned")
    }

    /// Address the listener actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.core.bound_addr.get().copied()
    }

    /// PEM material loaded at start, for the TLS collaborator:
    /// `(key, cert, trust)`.
    pub fn https_material(&self) -> Option<(&str, &str, Option<&str>)> {
        self.core
            .tls
            .get()
            .map(|m| (m.key.as_str(), m.cert.as_str(), m.trust.as_deref()))
    }

    /// Block until the listener answers TCP connects, for callers that need
    /// the server ready before issuing requests.
    pub fn wait_ready(&self) -> io::Result<()> {
        let addr = self.local_addr().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "server not started")
        })?;
        for _ in 0..50 {
            if std::net::TcpStream::connect(addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    fn launch(&self) -> anyhow::Result<()> {
        let config = &self.core.config;
        let addr = match config.bind_address {
            Some(addr) => addr,
            None => {
                if config.port == 0 {
                    return Err(anyhow!("no port or bind address configured"));
                }
                if config.use_ipv6 {
                    SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), config.port)
                } else {
                    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port)
                }
            }
        };
        if config.use_ssl {
            self.load_tls_material()?;
        }

        let stack_size = if config.max_thread_stack_size > 0 {
            config.max_thread_stack_size
        } else {
            RuntimeConfig::from_env().stack_size
        };
        may::config().set_stack_size(stack_size);
        let daemon_count = match config.start_mode {
            StartMode::InternalThreads => {
                if config.max_threads > 0 {
                    may::config().set_workers(config.max_threads);
                }
                1
            }
            StartMode::ExternalSelect | StartMode::Remanaged => {
                let workers = config.max_threads.max(1);
                may::config().set_workers(workers);
                workers
            }
        };

        let listener = may::net::TcpListener::bind(addr)
            .with_context(|| format!("unable to bind daemon to {addr}"))?;
        let local = listener.local_addr().context("listener has no local address")?;
        let _ = self.core.bound_addr.set(local);

        let handles =
            crate::server::daemon::spawn_daemons(self, listener, daemon_count, stack_size)
                .context("unable to spawn daemon pool")?;
        self.core
            .daemons
            .lock()
            .expect("daemon list poisoned")
            .extend(handles);
        info!(
            addr = %local,
            daemons = daemon_count,
            mode = ?config.start_mode,
            stack_size = stack_size,
            "daemon pool started"
        );
        Ok(())
    }

    fn load_tls_material(&self) -> anyhow::Result<()> {
        let config = &self.core.config;
        let key_path = config
            .https_mem_key
            .as_ref()
            .ok_or_else(|| anyhow!("use_ssl set but https_mem_key missing"))?;
        let cert_path = config
            .https_mem_cert
            .as_ref()
            .ok_or_else(|| anyhow!("use_ssl set but https_mem_cert missing"))?;
        let key = fs::read_to_string(key_path)
            .with_context(|| format!("unable to read https key {}", key_path.display()))?;
        let cert = fs::read_to_string(cert_path)
            .with_context(|| format!("unable to read https cert {}", cert_path.display()))?;
        let trust = match &config.https_mem_trust {
            Some(path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("unable to read https trust {}", path.display()))?,
            ),
            None => None,
        };
        info!(
            key_bytes = key.len(),
            cert_bytes = cert.len(),
            trust = trust.is_some(),
            "https material loaded"
        );
        let _ = self.core.tls.set(TlsMaterial { key, cert, trust });
        Ok(())
    }
}
