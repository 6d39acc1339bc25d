//! TCP front end for stream interfaces
//!
//! The adapter owns one accept task; every connection runs on its own task in
//! a [`JoinSet`] owned by the accept task, so stopping the adapter tears down
//! the listener and all connections at once.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use devsim_core::{Adapter, AdapterError, Device, SimulationError, SimulationHandle, Value};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::dispatch::{dispatch, Dispatcher};
use crate::error::{BindingError, StreamError};
use crate::framing::{FramerEvent, StreamFramer};
use crate::interface::StreamInterface;

/// Protocol identifier of the stream adapter
pub const PROTOCOL: &str = "stream";

const READ_BUFFER_LEN: usize = 1024;

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Address to bind
    pub bind_address: String,
    /// Port to bind; 0 picks a free port
    pub port: u16,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9999,
        }
    }
}

#[derive(Debug)]
struct Framing {
    in_terminator: Vec<u8>,
    out_terminator: Vec<u8>,
    readtimeout: Duration,
}

/// Serves a [`StreamInterface`] over TCP
pub struct StreamAdapter<D: Device> {
    dispatcher: Arc<Dispatcher<D>>,
    framing: Arc<Framing>,
    options: StreamOptions,
    doc: String,
    local_addr: Option<SocketAddr>,
    server: Option<JoinHandle<()>>,
}

impl<D: Device> std::fmt::Debug for StreamAdapter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAdapter")
            .field("options", &self.options)
            .field("local_addr", &self.local_addr)
            .field("running", &self.server.is_some())
            .finish()
    }
}

impl<D: Device> StreamAdapter<D> {
    /// Bind the interface's commands; fails on any configuration error
    pub fn new(interface: StreamInterface<D>, options: StreamOptions) -> Result<Self, BindingError> {
        let dispatcher = Dispatcher::bind(&interface)?;
        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            framing: Arc::new(Framing {
                in_terminator: interface.in_terminator.into_bytes(),
                out_terminator: interface.out_terminator.into_bytes(),
                readtimeout: interface.readtimeout,
            }),
            options,
            doc: interface.doc,
            local_addr: None,
            server: None,
        })
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn bind(&self) -> Result<TcpListener, AdapterError> {
        let address = format!("{}:{}", self.options.bind_address, self.options.port);
        let listener = std::net::TcpListener::bind(&address)
            .map_err(|source| AdapterError::Bind { address, source })?;
        listener.set_nonblocking(true)?;
        Ok(TcpListener::from_std(listener)?)
    }
}

impl<D: Device> Adapter<D> for StreamAdapter<D> {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn start(&mut self, simulation: SimulationHandle<D>) -> Result<(), AdapterError> {
        if self.server.is_some() {
            return Ok(());
        }
        let listener = self.bind()?;
        let local_addr = listener.local_addr()?;
        info!("Stream adapter listening on {}", local_addr);

        self.local_addr = Some(local_addr);
        self.server = Some(tokio::spawn(serve(
            listener,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.framing),
            simulation,
        )));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            info!("Stream adapter on {:?} stopped", self.local_addr);
        }
        self.local_addr = None;
    }

    fn is_running(&self) -> bool {
        self.server.is_some()
    }

    fn options(&self) -> BTreeMap<String, Value> {
        let port = self
            .local_addr
            .map(|addr| addr.port())
            .unwrap_or(self.options.port);
        BTreeMap::from([
            ("bind_address".to_string(), Value::from(self.options.bind_address.clone())),
            ("port".to_string(), Value::from(port)),
            ("in_terminator".to_string(), Value::from(lossy(&self.framing.in_terminator))),
            ("out_terminator".to_string(), Value::from(lossy(&self.framing.out_terminator))),
            (
                "readtimeout".to_string(),
                Value::from(self.framing.readtimeout.as_millis() as i64),
            ),
        ])
    }

    fn documentation(&self) -> String {
        let mut doc = String::new();
        if !self.doc.is_empty() {
            doc.push_str(self.doc.trim());
            doc.push_str("\n\n");
        }
        doc.push_str("Parameters\n==========\n");
        doc.push_str(&format!(
            "Listening on: {}:{}\n",
            self.options.bind_address,
            self.local_addr.map(|a| a.port()).unwrap_or(self.options.port)
        ));
        doc.push_str(&format!(
            "Input terminator: {}\n",
            lossy(&self.framing.in_terminator).escape_debug()
        ));
        doc.push_str(&format!(
            "Output terminator: {}\n",
            lossy(&self.framing.out_terminator).escape_debug()
        ));
        doc.push_str(&format!(
            "Read timeout: {} ms\n\nCommands\n========\n",
            self.framing.readtimeout.as_millis()
        ));
        for (pattern, member, help) in self.dispatcher.describe() {
            doc.push_str(&format!("{}  ->  {}\n", pattern.escape_debug(), member));
            if let Some(help) = help {
                doc.push_str(&format!("    {}\n", help));
            }
        }
        doc
    }
}

impl<D: Device> Drop for StreamAdapter<D> {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

async fn serve<D: Device>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<D>>,
    framing: Arc<Framing>,
    simulation: SimulationHandle<D>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Client connected: {}", peer);
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        Arc::clone(&dispatcher),
                        Arc::clone(&framing),
                        simulation.clone(),
                    ));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Connection task panicked: {}", e);
                    }
                }
            }
        }
    }
}

async fn handle_connection<D: Device>(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher<D>>,
    framing: Arc<Framing>,
    simulation: SimulationHandle<D>,
) {
    let mut framer = StreamFramer::new(&framing.in_terminator, framing.readtimeout);
    let mut buf = [0u8; READ_BUFFER_LEN];

    let result: Result<(), ConnectionEnd> = async {
        loop {
            let deadline = framer.deadline();
            tokio::select! {
                read = stream.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(());
                    }
                    framer.push_bytes(&buf[..n], Instant::now());
                    while let Some(request) = framer.next_command() {
                        let reply = dispatch(&dispatcher, &simulation, &request).await?;
                        respond(&mut stream, reply, &framing.out_terminator).await?;
                    }
                }
                _ = wait_for(deadline) => match framer.poll_timeout(Instant::now()) {
                    Some(FramerEvent::Command(request)) => {
                        let reply = dispatch(&dispatcher, &simulation, &request).await?;
                        respond(&mut stream, reply, &framing.out_terminator).await?;
                    }
                    Some(FramerEvent::Timeout { discarded }) => {
                        let error = StreamError::ReadTimeout(discarded.len());
                        let reply = dispatcher.handle_error(&discarded, &error);
                        respond(&mut stream, reply, &framing.out_terminator).await?;
                    }
                    None => {}
                },
            }
        }
    }
    .await;

    match result {
        Ok(()) => info!("Client disconnected: {}", peer),
        Err(ConnectionEnd::Io(e)) => debug!("Connection to {} closed: {}", peer, e),
        Err(ConnectionEnd::Stopped) => info!("Closing connection to {}, simulation stopped", peer),
    }
}

enum ConnectionEnd {
    Io(std::io::Error),
    Stopped,
}

impl From<std::io::Error> for ConnectionEnd {
    fn from(e: std::io::Error) -> Self {
        ConnectionEnd::Io(e)
    }
}

impl From<SimulationError> for ConnectionEnd {
    fn from(_: SimulationError) -> Self {
        ConnectionEnd::Stopped
    }
}

async fn respond(stream: &mut TcpStream, reply: Option<String>, terminator: &[u8]) -> std::io::Result<()> {
    let Some(reply) = reply else {
        return Ok(());
    };
    let mut bytes = reply.into_bytes();
    bytes.extend_from_slice(terminator);
    stream.write_all(&bytes).await
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
