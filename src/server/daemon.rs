use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use may::coroutine::JoinHandle;
use may::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::server::conn;
use crate::server::core::ServerCore;
use crate::server::Server;

/// Spawn `count` acceptor coroutines sharing one listener. The kernel
/// load-balances accepts across them.
///
/// Acceptors hold only a weak reference to the server core: connection
/// coroutines keep the core alive while they run, but parked acceptors do
/// not, so dropping the last user handle tears the pool down.
pub(crate) fn spawn_daemons(
    server: &Server,
    listener: TcpListener,
    count: usize,
    stack_size: usize,
) -> io::Result<Vec<JoinHandle<()>>> {
    let listener = Arc::new(listener);
    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        let core = Arc::downgrade(&server.core);
        let listener = listener.clone();
        let handle = unsafe {
            may::coroutine::Builder::new()
                .stack_size(stack_size)
                .spawn(move || accept_loop(core, listener))?
        };
        handles.push(handle);
    }
    Ok(handles)
}

fn accept_loop(core: Weak<ServerCore>, listener: Arc<TcpListener>) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let Some(core) = core.upgrade() else {
                    return;
                };
                handle_accept(&Server { core }, stream, peer);
            }
            Err(e) => {
                error!(error = %e, "accept failed");
            }
        }
    }
}

fn handle_accept(server: &Server, stream: TcpStream, peer: SocketAddr) {
    // Policy and validator run before any byte is read; a rejected peer's
    // stream is dropped on the floor.
    if !server.admits(&peer.ip()) {
        info!(peer = %peer, "connection rejected by policy");
        return;
    }
    let config = &server.core.config;
    if config.max_connections > 0
        && server.core.active_connections.load(Ordering::Acquire) >= config.max_connections
    {
        warn!(peer = %peer, limit = config.max_connections, "connection limit reached");
        return;
    }
    if config.per_ip_connection_limit > 0 {
        let per_ip = server.core.per_ip.lock().expect("per-ip map poisoned");
        if per_ip.get(&peer.ip()).copied().unwrap_or(0) >= config.per_ip_connection_limit {
            warn!(peer = %peer, limit = config.per_ip_connection_limit, "per-ip connection limit reached");
            return;
        }
    }

    let guard = ConnGuard::new(server.clone(), peer.ip());
    let server = server.clone();
    let stack_size = may::config().get_stack_size();
    let spawned = unsafe {
        may::coroutine::Builder::new()
            .stack_size(stack_size)
            .spawn(move || conn::serve(server, stream, peer, guard))
    };
    if let Err(e) = spawned {
        error!(error = %e, peer = %peer, "unable to spawn connection coroutine");
    }
}

/// Releases the global and per-IP connection counters when the connection
/// coroutine finishes, however it finishes.
pub(crate) struct ConnGuard {
    server: Server,
    ip: IpAddr,
}

impl ConnGuard {
    fn new(server: Server, ip: IpAddr) -> Self {
        server.core.active_connections.fetch_add(1, Ordering::AcqRel);
        *server
            .core
            .per_ip
            .lock()
            .expect("per-ip map poisoned")
            .entry(ip)
            .or_insert(0) += 1;
        Self { server, ip }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.server
            .core
            .active_connections
            .fetch_sub(1, Ordering::AcqRel);
        let mut per_ip = self
            .server
            .core
            .per_ip
            .lock()
            .expect("per-ip map poisoned");
        if let Some(count) = per_ip.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                per_ip.remove(&self.ip);
            }
        }
    }
}
