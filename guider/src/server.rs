//! Polled TCP command server.
//!
//! One non-blocking listening socket; accepted connections live in an
//! insertion-ordered list with their connect timestamps. The frame loop
//! calls [`CommandServer::poll`] once per tick with a bounded window, during
//! which pending connects are accepted, complete lines are dispatched
//! through the command layer and replies are written back. Nothing here
//! blocks longer than the window, so the loop keeps up with the camera.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::command::{self, CommandContext, Outcome};
use crate::error::GuiderError;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 915;

/// How long each frame-loop tick spends in the socket poll.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Largest buffered request line before the connection is dropped.
const MAX_LINE_LEN: usize = 4096;

/// Sleep between idle poll passes inside the window.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

struct ClientConn {
    stream: TcpStream,
    peer: SocketAddr,
    connected_at: SystemTime,
    buffer: Vec<u8>,
    closing: bool,
}

pub struct CommandServer {
    listener: TcpListener,
    clients: Vec<ClientConn>,
}

impl CommandServer {
    /// Bind the listening socket on all interfaces.
    pub fn bind(port: u16) -> Result<Self, GuiderError> {
        Self::bind_addr(&format!("0.0.0.0:{port}"))
    }

    /// Bind on an explicit address (tests use an ephemeral loopback port).
    pub fn bind_addr(addr: &str) -> Result<Self, GuiderError> {
        let listener = TcpListener::bind(addr).map_err(GuiderError::Socket)?;
        listener.set_nonblocking(true).map_err(GuiderError::Socket)?;
        info!("listening for commands on {}", listener.local_addr().map_err(GuiderError::Socket)?);
        Ok(Self {
            listener,
            clients: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Run one bounded poll window: accept, read, dispatch, reply.
    pub fn poll(
        &mut self,
        window: Duration,
        ctx: &mut CommandContext<'_>,
    ) -> Result<(), GuiderError> {
        let deadline = Instant::now() + window;
        loop {
            let mut active = self.accept_pending();
            active |= self.service_clients(ctx)?;
            self.clients.retain(|c| !c.closing);

            if Instant::now() >= deadline {
                return Ok(());
            }
            if !active {
                std::thread::sleep(IDLE_SLEEP.min(
                    deadline.saturating_duration_since(Instant::now()),
                ));
            }
        }
    }

    fn accept_pending(&mut self) -> bool {
        let mut accepted = false;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("failed to set client socket non-blocking: {e}");
                        continue;
                    }
                    info!("client connected from {peer}");
                    self.clients.push(ClientConn {
                        stream,
                        peer,
                        connected_at: SystemTime::now(),
                        buffer: Vec::new(),
                        closing: false,
                    });
                    accepted = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return accepted,
                Err(e) => {
                    warn!("accept failed: {e}");
                    return accepted;
                }
            }
        }
    }

    fn service_clients(&mut self, ctx: &mut CommandContext<'_>) -> Result<bool, GuiderError> {
        let mut active = false;
        let mut read_buf = [0u8; 512];

        for client in &mut self.clients {
            loop {
                match client.stream.read(&mut read_buf) {
                    Ok(0) => {
                        debug!("client {} disconnected", client.peer);
                        client.closing = true;
                        break;
                    }
                    Ok(n) => {
                        active = true;
                        client.buffer.extend_from_slice(&read_buf[..n]);
                        if client.buffer.len() > MAX_LINE_LEN {
                            warn!("client {} exceeded line limit, dropping", client.peer);
                            client.closing = true;
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("read from {} failed: {e}", client.peer);
                        client.closing = true;
                        break;
                    }
                }
            }

            if client.closing {
                continue;
            }

            while let Some(newline) = client.buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = client.buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches(['\n', '\r']).trim();

                match command::handle_line(line, ctx)? {
                    Outcome::Reply(reply) => {
                        if let Err(e) = writeln!(client.stream, "{reply}") {
                            warn!("write to {} failed: {e}", client.peer);
                            client.closing = true;
                            break;
                        }
                    }
                    Outcome::Silent => {}
                    Outcome::Disconnect => {
                        client.closing = true;
                        break;
                    }
                }
            }
        }

        Ok(active)
    }

    /// Connection ages, oldest first, for operator diagnostics.
    pub fn client_ages(&self) -> Vec<(SocketAddr, SystemTime)> {
        self.clients
            .iter()
            .map(|c| (c.peer, c.connected_at))
            .collect()
    }
}
