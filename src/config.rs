//! Server configuration.
//!
//! [`ServerBuilder`] is the fluent front door: a host application names a
//! port, tweaks the knobs it cares about and gets a [`crate::Server`] back.
//! HTTPS material is given as file paths and loaded when the server starts,
//! so a bad path surfaces as a failed start rather than a panic mid-build.
//!
//! Runtime tuning that does not belong in code (coroutine stack size) comes
//! from the environment, see [`RuntimeConfig`].

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::policy::DefaultPolicy;
use crate::resource::Resource;
use crate::server::Server;

/// Who owns the accept loop and how the daemon pool is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// One daemon; the runtime's worker pool is sized from `max_threads`.
    #[default]
    InternalThreads,
    /// `max(1, max_threads)` daemons sharing the listener; the engine owns
    /// the pool sizing.
    ExternalSelect,
    /// As `ExternalSelect`, with the listening socket bound and prepared
    /// before any daemon spawns so bind errors surface from `start`.
    Remanaged,
}

/// TLS credential type forwarded to the TLS collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredType {
    #[default]
    None,
    Certificate,
    Anon,
}

/// Immutable server parameters, produced by [`ServerBuilder`].
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: Option<SocketAddr>,
    pub start_mode: StartMode,
    pub max_threads: usize,
    pub max_connections: usize,
    pub memory_limit: usize,
    pub connection_timeout: Duration,
    pub per_ip_connection_limit: usize,
    pub max_thread_stack_size: usize,
    pub use_ssl: bool,
    pub use_ipv6: bool,
    pub debug: bool,
    pub pedantic: bool,
    pub https_mem_key: Option<PathBuf>,
    pub https_mem_cert: Option<PathBuf>,
    pub https_mem_trust: Option<PathBuf>,
    pub https_priorities: Option<String>,
    pub cred_type: CredType,
    pub digest_auth_random: Option<String>,
    pub nonce_nc_size: usize,
    pub default_policy: DefaultPolicy,
    pub basic_auth_enabled: bool,
    pub digest_auth_enabled: bool,
    pub regex_checking: bool,
    pub ban_system_enabled: bool,
    pub post_process_enabled: bool,
    pub(crate) single_resource: Option<Arc<dyn Resource>>,
    pub(crate) not_found_resource: Option<Arc<dyn Resource>>,
    pub(crate) method_not_allowed_resource: Option<Arc<dyn Resource>>,
    pub(crate) method_not_acceptable_resource: Option<Arc<dyn Resource>>,
    pub(crate) internal_error_resource: Option<Arc<dyn Resource>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_address: None,
            start_mode: StartMode::default(),
            max_threads: 0,
            max_connections: 0,
            memory_limit: 0,
            connection_timeout: Duration::from_secs(180),
            per_ip_connection_limit: 0,
            max_thread_stack_size: 0,
            use_ssl: false,
            use_ipv6: false,
            debug: false,
            pedantic: false,
            https_mem_key: None,
            https_mem_cert: None,
            https_mem_trust: None,
            https_priorities: None,
            cred_type: CredType::default(),
            digest_auth_random: None,
            nonce_nc_size: 0,
            default_policy: DefaultPolicy::Accept,
            basic_auth_enabled: true,
            digest_auth_enabled: true,
            regex_checking: true,
            ban_system_enabled: true,
            post_process_enabled: true,
            single_resource: None,
            not_found_resource: None,
            method_not_allowed_resource: None,
            method_not_acceptable_resource: None,
            internal_error_resource: None,
        }
    }
}

/// Fluent construction of server parameters.
#[derive(Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Bind to an explicit address instead of the wildcard address plus
    /// `port`.
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = Some(addr);
        self
    }

    pub fn start_mode(mut self, mode: StartMode) -> Self {
        self.config.start_mode = mode;
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.config.max_threads = n;
        self
    }

    /// Global connection cap; zero means unlimited.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.config.max_connections = n;
        self
    }

    /// Per-connection buffer cap in bytes; oversize heads and declared
    /// bodies get a 413. Zero means unlimited.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config.memory_limit = bytes;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Connection cap per peer address; zero means unlimited.
    pub fn per_ip_connection_limit(mut self, n: usize) -> Self {
        self.config.per_ip_connection_limit = n;
        self
    }

    /// Coroutine stack size in bytes; zero defers to `PORTICO_STACK_SIZE`.
    pub fn max_thread_stack_size(mut self, bytes: usize) -> Self {
        self.config.max_thread_stack_size = bytes;
        self
    }

    pub fn use_ssl(mut self, enabled: bool) -> Self {
        self.config.use_ssl = enabled;
        self
    }

    pub fn use_ipv6(mut self, enabled: bool) -> Self {
        self.config.use_ipv6 = enabled;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Strict protocol checking: HTTP/1.1 requests without a `Host` header
    /// are rejected with a 400.
    pub fn pedantic(mut self, enabled: bool) -> Self {
        self.config.pedantic = enabled;
        self
    }

    /// Path to the PEM-encoded private key, loaded at start.
    pub fn https_mem_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.https_mem_key = Some(path.into());
        self
    }

    /// Path to the PEM-encoded certificate, loaded at start.
    pub fn https_mem_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.https_mem_cert = Some(path.into());
        self
    }

    /// Path to the PEM-encoded trust chain, loaded at start.
    pub fn https_mem_trust(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.https_mem_trust = Some(path.into());
        self
    }

    pub fn https_priorities(mut self, priorities: impl Into<String>) -> Self {
        self.config.https_priorities = Some(priorities.into());
        self
    }

    pub fn cred_type(mut self, cred_type: CredType) -> Self {
        self.config.cred_type = cred_type;
        self
    }

    pub fn digest_auth_random(mut self, random: impl Into<String>) -> Self {
        self.config.digest_auth_random = Some(random.into());
        self
    }

    pub fn nonce_nc_size(mut self, size: usize) -> Self {
        self.config.nonce_nc_size = size;
        self
    }

    pub fn default_policy(mut self, policy: DefaultPolicy) -> Self {
        self.config.default_policy = policy;
        self
    }

    pub fn basic_auth(mut self, enabled: bool) -> Self {
        self.config.basic_auth_enabled = enabled;
        self
    }

    pub fn digest_auth(mut self, enabled: bool) -> Self {
        self.config.digest_auth_enabled = enabled;
        self
    }

    /// Enable pattern matching in route resolution. When disabled the route
    /// table answers exact lookups only.
    pub fn regex_checking(mut self, enabled: bool) -> Self {
        self.config.regex_checking = enabled;
        self
    }

    pub fn ban_system(mut self, enabled: bool) -> Self {
        self.config.ban_system_enabled = enabled;
        self
    }

    /// Enable form-urlencoded body post-processing into request arguments.
    pub fn post_process(mut self, enabled: bool) -> Self {
        self.config.post_process_enabled = enabled;
        self
    }

    /// A single resource that handles every route; resolution is skipped
    /// and the capture map is always empty.
    pub fn single_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.config.single_resource = Some(resource);
        self
    }

    pub fn not_found_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.config.not_found_resource = Some(resource);
        self
    }

    pub fn method_not_allowed_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.config.method_not_allowed_resource = Some(resource);
        self
    }

    pub fn method_not_acceptable_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.config.method_not_acceptable_resource = Some(resource);
        self
    }

    pub fn internal_error_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.config.internal_error_resource = Some(resource);
        self
    }

    pub fn build(self) -> Server {
        Server::from_config(self.config)
    }
}

/// Runtime configuration loaded from environment variables.
///
/// `PORTICO_STACK_SIZE` sizes coroutine stacks, in decimal (`65536`) or
/// hex (`0x10000`). The default is 64 KB.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub stack_size: usize,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let stack_size = match env::var("PORTICO_STACK_SIZE") {
            Ok(val) => {
                if let Some(hex) = val.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).unwrap_or(0x10000)
                } else {
                    val.parse().unwrap_or(0x10000)
                }
            }
            Err(_) => 0x10000,
        };
        RuntimeConfig { stack_size }
    }
}
