/*!
 * Network layer and event loop.
 *
 * A single-threaded `mio` poll loop: Token(0) is the listener, every
 * client gets its own token with a growable read/write `BytesMut` pair.
 * Command execution happens synchronously in the loop, not offloaded to
 * worker threads, since the store and AOF writer are single-threaded by
 * design (spec §5).
 */

use anyhow::Result;
use bytes::BytesMut;
use hashbrown::HashMap;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Socket, Type};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dispatcher::Dispatcher;
use crate::persistence::PersistenceManager;
use crate::protocol::{parse_requests, resp_ok};
use crate::storage::DataStore;

const READ_BUF: usize = 4096;
const POLL_TIMEOUT: Duration = Duration::from_millis(50);
const CLEANUP_INTERVAL: Duration = Duration::from_millis(100);
const PERSISTENCE_INTERVAL: Duration = Duration::from_millis(100);

const LISTENER: Token = Token(0);

struct Client {
    sock: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

const LISTEN_BACKLOG: i32 = 1024;

/// Bind a non-blocking TCP listener at `addr`. Goes through `socket2` so
/// `SO_REUSEADDR` is set explicitly before bind, rather than relying on
/// whatever a platform's default happens to be (spec §6).
pub fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// Run the event loop until `shutdown` is set. Owns `store` and
/// `dispatcher`/`persistence` for the lifetime of the server.
pub fn run(
    addr: SocketAddr,
    store: DataStore,
    dispatcher: Dispatcher,
    persistence: PersistenceManager,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let listener = bind(addr)?;
    run_with_listener(listener, store, dispatcher, persistence, shutdown)
}

/// Same as `run`, but takes an already-bound listener. Lets a caller
/// (tests, mainly) bind to an ephemeral port and learn its address before
/// the loop takes ownership of the socket.
pub fn run_with_listener(
    mut listener: TcpListener,
    mut store: DataStore,
    dispatcher: Dispatcher,
    persistence: PersistenceManager,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(1024);
    poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

    let mut clients: HashMap<usize, Client> = HashMap::new();
    let mut next_token: usize = 1;
    let mut last_cleanup = Instant::now();
    let mut last_persistence_tick = Instant::now();

    log::info!("listening on {local_addr}");

    while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if e.kind() != std::io::ErrorKind::Interrupted {
                return Err(e.into());
            }
            continue;
        }

        for ev in events.iter() {
            match ev.token() {
                LISTENER => accept_all(&listener, &poll, &mut clients, &mut next_token),
                Token(t) => handle_client_event(t, ev, &mut clients, &dispatcher, &mut store, &persistence),
            }
        }

        if last_cleanup.elapsed() >= CLEANUP_INTERVAL {
            let removed = store.cleanup_expired_keys();
            if removed > 0 {
                log::debug!("expired {removed} keys");
            }
            last_cleanup = Instant::now();
        }

        if last_persistence_tick.elapsed() >= PERSISTENCE_INTERVAL {
            persistence.periodic_tasks(&store);
            last_persistence_tick = Instant::now();
        }
    }

    log::info!("shutting down");
    persistence.stop();
    Ok(())
}

fn accept_all(listener: &TcpListener, poll: &Poll, clients: &mut HashMap<usize, Client>, next_token: &mut usize) {
    loop {
        match listener.accept() {
            Ok((mut sock, _addr)) => {
                let _ = sock.set_nodelay(true);
                let token = *next_token;
                *next_token += 1;

                if poll
                    .registry()
                    .register(&mut sock, Token(token), Interest::READABLE | Interest::WRITABLE)
                    .is_err()
                {
                    continue;
                }

                let mut write_buf = BytesMut::new();
                write_buf.extend_from_slice(&resp_ok());
                let _ = sock.write(&write_buf);
                write_buf.clear();

                clients.insert(
                    token,
                    Client {
                        sock,
                        read_buf: BytesMut::with_capacity(READ_BUF),
                        write_buf,
                    },
                );
            }
            Err(ref e) if would_block(e) => break,
            Err(e) => {
                log::warn!("accept error: {e}");
                break;
            }
        }
    }
}

fn handle_client_event(
    token: usize,
    ev: &mio::event::Event,
    clients: &mut HashMap<usize, Client>,
    dispatcher: &Dispatcher,
    store: &mut DataStore,
    persistence: &PersistenceManager,
) {
    let mut should_remove = false;

    if let Some(client) = clients.get_mut(&token) {
        if ev.is_readable() {
            let mut tmp = [0u8; READ_BUF];
            loop {
                match client.sock.read(&mut tmp) {
                    Ok(0) => {
                        should_remove = true;
                        break;
                    }
                    Ok(n) => client.read_buf.extend_from_slice(&tmp[..n]),
                    Err(ref e) if would_block(e) => break,
                    Err(_) => {
                        should_remove = true;
                        break;
                    }
                }
            }

            if !should_remove {
                for req in parse_requests(&mut client.read_buf) {
                    let reply = dispatcher.dispatch(store, persistence, &req.command, &req.args);
                    client.write_buf.extend_from_slice(&reply);
                }

                if !client.write_buf.is_empty() {
                    match client.sock.write(&client.write_buf) {
                        Ok(n) => {
                            let _ = client.write_buf.split_to(n);
                        }
                        Err(ref e) if would_block(e) => {}
                        Err(_) => should_remove = true,
                    }
                }
            }
        }

        if !should_remove && ev.is_writable() && !client.write_buf.is_empty() {
            match client.sock.write(&client.write_buf) {
                Ok(n) => {
                    let _ = client.write_buf.split_to(n);
                }
                Err(ref e) if would_block(e) => {}
                Err(_) => should_remove = true,
            }
        }
    }

    if should_remove {
        clients.remove(&token);
    }
}

#[inline]
fn would_block(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted)
}
