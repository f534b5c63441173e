use crate::shared::dns;
use std::sync::{atomic, Arc};
use std::{io, net, thread, time};

/// A type implementing [`WireSink`] is able to deliver an encoded dns
/// response to the peer that originated the request. **The trait decouples
/// request handling from the server transport**, so the handling logic can
/// be exercised without sockets.
pub trait WireSink {
    fn send(&mut self, wire: &[u8]) -> io::Result<()>;
}

/// A type implementing [`PacketHandler`] serves a single dns datagram:
/// it receives the raw request bytes and a [`WireSink`] to reply through.
/// Implementors are shared across server workers and must be thread safe.
pub trait PacketHandler: Send + Sync + 'static {
    fn handle_packet(&self, wire: &[u8], sink: &mut dyn WireSink);
}

/// Parameters to be used when starting the UDP server with [start_udp_server].
#[derive(Clone)]
pub struct UdpParams {
    pub address: String,
    pub port: u16,
    pub threads: usize,
    pub write_timeout: time::Duration,
}

/// Replies to a single UDP request through the worker's socket.
struct UdpSink<'a> {
    socket: &'a net::UdpSocket,
    peer: net::SocketAddr,
}

impl WireSink for UdpSink<'_> {
    fn send(&mut self, wire: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < wire.len() {
            written += self.socket.send_to(&wire[written..], self.peer)?;
        }
        Ok(())
    }
}

/// Bind the server socket described by the passed [`UdpParams`].
pub fn setup_listening_socket(params: &UdpParams) -> io::Result<net::UdpSocket> {
    let listen_address: (&str, u16) = (&params.address, params.port);
    let socket = net::UdpSocket::bind(listen_address)?;
    socket.set_write_timeout(Some(params.write_timeout))?;
    Ok(socket)
}

/// Starts a new UDP server generic over a request handler ([`PacketHandler`]).
/// The configured number of worker threads is spawned, each one looping on a
/// clone of the server socket: receive a datagram, check the stop signal,
/// serve the request via the handler. The function blocks until the `stop`
/// flag is raised and every worker has observed it (see [wake_udp_server]).
pub fn start_udp_server<H>(handler: Arc<H>, params: UdpParams, stop: Arc<atomic::AtomicBool>) -> io::Result<()>
where
    H: PacketHandler,
{
    let socket = setup_listening_socket(&params)?;
    log::info!("Starting UDP server, address: '{}:{}'.", &params.address, params.port);
    serve_udp(socket, handler, params.threads, stop);
    Ok(())
}

/// Run the receive loops over an already bound socket. Exposed separately
/// from [start_udp_server] so callers binding to an ephemeral port can
/// learn the local address first.
pub fn serve_udp<H>(socket: net::UdpSocket, handler: Arc<H>, threads: usize, stop: Arc<atomic::AtomicBool>)
where
    H: PacketHandler,
{
    assert!(threads > 0);
    let mut workers = Vec::with_capacity(threads);
    for n in 0..threads {
        let socket = match socket.try_clone() {
            Ok(socket) => socket,
            Err(err) => {
                log::error!("Cannot clone server socket for worker {}: {}", n, err);
                continue;
            }
        };
        let handler = Arc::clone(&handler);
        let stop = Arc::clone(&stop);
        workers.push(thread::spawn(move || worker_loop(socket, handler, stop)));
    }
    for worker in workers {
        let _ = worker.join();
    }
    log::warn!("UDP server shut down.");
}

fn worker_loop<H: PacketHandler>(socket: net::UdpSocket, handler: Arc<H>, stop: Arc<atomic::AtomicBool>) {
    let mut buffer = [0; dns::MAX_UDP_MSG_BYTES];
    loop {
        let (n_read, peer) = match socket.recv_from(&mut buffer) {
            Ok(read_data) => read_data,
            Err(err) => {
                log::warn!("Cannot recv_from socket: {}", err);
                continue;
            }
        };
        if stop.load(atomic::Ordering::SeqCst) {
            return;
        }
        let mut sink = UdpSink { socket: &socket, peer };
        handler.handle_packet(&buffer[0..n_read], &mut sink);
    }
}

/// Unblock the server workers so they can observe the stop signal. The
/// only way to interrupt a blocking `recv_from` is delivering a datagram,
/// so one is sent per worker.
#[allow(unused_must_use)]
pub fn wake_udp_server(params: &UdpParams) {
    let server_addr: (&str, u16) = (&params.address, params.port);
    if let Ok(socket) = net::UdpSocket::bind("0.0.0.0:0") {
        for _ in 0..params.threads {
            socket.send_to(&[0], server_addr);
        }
    }
}
