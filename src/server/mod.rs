//! Concurrent request server.
//!
//! A fixed pool of blocking worker threads shares one listening socket.
//! Each worker owns its own engine clone and runs one session per accepted
//! connection. With a single thread the accept loop runs on the caller's
//! thread.

pub mod http;
pub mod listener;

use crate::audio::{PcmSource, TimedRead};
use crate::config::ServerConfig;
use crate::decoder::{Decoder, SessionParams};
use crate::engine::DecodingEngine;
use crate::error::{Result, VoxgateError};
use crate::response::ResponseWriter;
use crate::response::json::JsonWriter;
use crate::response::multipart::MultipartWriter;
use listener::{Connection, ListenAddress, Listener};
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::os::unix::net::UnixStream;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept, so a persistent error does not spin.
const ACCEPT_RETRY: Duration = Duration::from_millis(50);

/// Longest wait for a wake-up connection to be established.
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// State shared read-only by every worker.
struct Shared {
    listener: Listener,
    shutdown: Arc<AtomicBool>,
    decoder: Decoder,
    multipart: bool,
    do_endpointing: bool,
    io_timeout: Option<Duration>,
}

/// A bound server, ready to serve.
pub struct Server {
    shared: Arc<Shared>,
    threads: usize,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub fn bind(config: &ServerConfig, decoder: Decoder) -> Result<Self> {
        if config.threads == 0 {
            return Err(VoxgateError::ConfigInvalidValue {
                key: "server.threads".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let address = ListenAddress::parse(&config.listen);
        let listener = Listener::bind(&address, config.backlog)?;
        info!("Listening on {} with {} thread(s)", listener.local_addr()?, config.threads);

        Ok(Self {
            shared: Arc::new(Shared {
                listener,
                shutdown: Arc::new(AtomicBool::new(false)),
                decoder,
                multipart: config.multipart,
                do_endpointing: config.do_endpointing,
                io_timeout: (config.io_timeout_secs > 0)
                    .then(|| Duration::from_secs(config.io_timeout_secs)),
            }),
            threads: config.threads,
        })
    }

    pub fn local_addr(&self) -> Result<ListenAddress> {
        self.shared.listener.local_addr()
    }

    /// Handle that stops this server from another thread.
    pub fn shutdown_trigger(&self) -> Result<ShutdownTrigger> {
        Ok(ShutdownTrigger {
            flag: Arc::clone(&self.shared.shutdown),
            address: self.local_addr()?,
            wakeups: self.threads,
        })
    }

    /// Serve until a [`ShutdownTrigger`] fires. Blocks the calling thread.
    ///
    /// Workers whose engine clone or thread fails to start are skipped; it is
    /// an error only when no worker could start at all.
    pub fn serve(&self, engine: Box<dyn DecodingEngine>) -> Result<()> {
        if self.threads == 1 {
            accept_loop(&self.shared, engine, 0);
            return Ok(());
        }

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(self.threads);
        for index in 0..self.threads {
            let engine = match engine.try_clone() {
                Ok(engine) => engine,
                Err(e) => {
                    error!("Failed to clone engine for worker {}: {}", index, e);
                    continue;
                }
            };
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("worker-{}", index))
                .spawn(move || accept_loop(&shared, engine, index));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to start worker {}: {}", index, e),
            }
        }
        drop(engine);

        if workers.is_empty() {
            return Err(VoxgateError::Other("no worker thread could be started".to_string()));
        }

        for worker in workers {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                error!("{} terminated abnormally", name);
            }
        }
        Ok(())
    }

    /// Serve on a background thread.
    pub fn spawn(self, engine: Box<dyn DecodingEngine>) -> Result<ServerHandle> {
        let trigger = self.shutdown_trigger()?;
        let thread = thread::Builder::new()
            .name("server".to_string())
            .spawn(move || self.serve(engine))?;
        Ok(ServerHandle { trigger, thread })
    }
}

/// Stops a serving [`Server`].
///
/// Workers block in `accept`, so besides setting the flag the trigger
/// connects to the listener once per worker to wake them.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    flag: Arc<AtomicBool>,
    address: ListenAddress,
    wakeups: usize,
}

impl ShutdownTrigger {
    /// Ask every worker to stop after its current session.
    pub fn trigger(&self) {
        if self.flag.swap(true, Ordering::SeqCst) {
            return;
        }
        for _ in 0..self.wakeups {
            if let Err(e) = self.wake() {
                warn!("Failed to wake a worker on {}: {}", self.address, e);
                break;
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn wake(&self) -> std::io::Result<()> {
        match &self.address {
            ListenAddress::Tcp(address) => {
                let target = wake_target(address.parse().map_err(std::io::Error::other)?);
                TcpStream::connect_timeout(&target, WAKE_TIMEOUT).map(drop)
            }
            ListenAddress::Unix(path) => UnixStream::connect(path).map(drop),
        }
    }
}

/// A wildcard bind address is reached through loopback.
fn wake_target(bound: SocketAddr) -> SocketAddr {
    let ip = match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, bound.port())
}

/// Handle to a server running on a background thread.
pub struct ServerHandle {
    trigger: ShutdownTrigger,
    thread: JoinHandle<Result<()>>,
}

impl ServerHandle {
    /// Ask every worker to stop after its current session.
    pub fn shutdown(&self) {
        self.trigger.trigger();
    }

    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| VoxgateError::Other("server thread panicked".to_string()))?
    }
}

fn accept_loop(shared: &Shared, mut engine: Box<dyn DecodingEngine>, index: usize) {
    debug!("Worker {} ready ({})", index, engine.name());
    while !shared.shutdown.load(Ordering::SeqCst) {
        let connection = match shared.listener.accept() {
            Ok(connection) => connection,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Accept failed: {}", e);
                thread::sleep(ACCEPT_RETRY);
                continue;
            }
        };
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let peer = connection.peer().to_string();
        debug!("Worker {} accepted {}", index, peer);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handle_connection(shared, connection, engine.as_mut())
        }));
        match outcome {
            Ok(Ok(())) => debug!("Worker {} finished {}", index, peer),
            Ok(Err(e)) => warn!("Connection {} failed: {}", peer, e),
            Err(_) => {
                error!("Worker {} panicked while serving {}", index, peer);
                engine.reset();
            }
        }
    }
    debug!("Worker {} stopped", index);
}

fn handle_connection(shared: &Shared, connection: Connection, engine: &mut dyn DecodingEngine) -> Result<()> {
    let mut output = connection.try_clone()?;
    output.set_write_timeout(shared.io_timeout)?;
    let mut input = connection;
    input.set_read_timeout(shared.io_timeout)?;

    let result = serve_request(shared, input, &mut output, engine);
    output.close();
    result
}

fn serve_request(
    shared: &Shared,
    input: Connection,
    output: &mut Connection,
    engine: &mut dyn DecodingEngine,
) -> Result<()> {
    let mut reader = BufReader::new(input);
    let head = match http::read_head(&mut reader) {
        Ok(head) => head,
        Err(e @ VoxgateError::Request { .. }) => {
            warn!("Rejecting request from {}: {}", output.peer(), e);
            return http::write_bad_request(output, &e.to_string());
        }
        Err(e) => return Err(e),
    };
    debug!("{} {} from {}", head.method, head.target, output.peer());

    let params = match SessionParams::with_defaults(shared.multipart, shared.do_endpointing)
        .apply_query(head.query())
    {
        Ok(params) => params,
        Err(e) => {
            warn!("Rejecting parameters {:?}: {}", head.query(), e);
            return http::write_bad_request(output, &e.to_string());
        }
    };
    let body = match http::HttpBody::new(reader, &head) {
        Ok(body) => body,
        Err(e) => return http::write_bad_request(output, &e.to_string()),
    };

    if head.expects_continue() {
        http::write_continue(output)?;
    }

    let multipart = params.multipart;
    let mut source = PcmSource::new(body, params).with_idle_timeout(shared.io_timeout);
    let mut writer: Box<dyn ResponseWriter> = if multipart {
        Box::new(MultipartWriter::new(output.try_clone()?))
    } else {
        Box::new(JsonWriter::new(output.try_clone()?))
    };
    http::write_response_head(output, "200 OK", writer.content_type())?;

    shared.decoder.run(engine, &mut source, writer.as_mut())
}
