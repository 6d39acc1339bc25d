//! Control server
//!
//! One accept task plus one task per connection. Each request line is parsed
//! on the connection task and resolved on the simulation task, so a request
//! never overlaps with a cycle. Request errors are answered and never end the
//! connection.

use std::net::SocketAddr;

use devsim_core::{Device, SimulationHandle};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::error::ControlError;
use crate::object::{Exposed, Target};
use crate::wire::{Request, Response, MAX_LINE_LEN};

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlOptions {
    /// Address to bind
    pub bind_address: String,
    /// Port to bind; 0 picks a free port
    pub port: u16,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 10000,
        }
    }
}

/// Running control server
#[derive(Debug)]
pub struct ControlServer {
    local_addr: SocketAddr,
    server: Option<JoinHandle<()>>,
}

impl ControlServer {
    /// Bind and start serving `simulation`
    pub async fn start<D: Device>(
        options: &ControlOptions,
        simulation: SimulationHandle<D>,
    ) -> Result<Self, ControlError> {
        let address = format!("{}:{}", options.bind_address, options.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ControlError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ControlError::Bind { address, source })?;
        info!("Control server listening on {}", local_addr);

        let server = tokio::spawn(serve(listener, Exposed::<D>::new(), simulation));
        Ok(Self {
            local_addr,
            server: Some(server),
        })
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the accept task is alive
    pub fn is_running(&self) -> bool {
        self.server.as_ref().is_some_and(|s| !s.is_finished())
    }

    /// Close the listener and all connections
    pub fn stop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            info!("Control server on {} stopped", self.local_addr);
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve<D: Device>(listener: TcpListener, exposed: Exposed<D>, simulation: SimulationHandle<D>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Control client connected: {}", peer);
                    connections.spawn(handle_connection(stream, peer, exposed.clone(), simulation.clone()));
                }
                Err(e) => warn!("Failed to accept control connection: {}", e),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Control connection task panicked: {}", e);
                    }
                }
            }
        }
    }
}

async fn handle_connection<D: Device>(
    stream: TcpStream,
    peer: SocketAddr,
    exposed: Exposed<D>,
    simulation: SimulationHandle<D>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    loop {
        let response = match lines.next().await {
            Some(Ok(line)) if line.trim().is_empty() => continue,
            Some(Ok(line)) => match handle_line(&line, &exposed, &simulation).await {
                Some(response) => response,
                None => continue,
            },
            // The codec skips the rest of the line and carries on after it
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!("Control request from {} exceeds {} bytes", peer, MAX_LINE_LEN);
                let e = ControlError::Parse(format!("request exceeds {} bytes", MAX_LINE_LEN));
                Response::failure(None, &e)
            }
            Some(Err(LinesCodecError::Io(e))) => {
                debug!("Control connection to {} closed: {}", peer, e);
                return;
            }
            None => break,
        };
        if let Err(e) = send(&mut writer, &response).await {
            debug!("Control connection to {} closed: {}", peer, e);
            return;
        }
    }
    info!("Control client disconnected: {}", peer);
}

async fn send(writer: &mut OwnedWriteHalf, response: &Response) -> std::io::Result<()> {
    let mut bytes = match serde_json::to_vec(response) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to encode control response: {}", e);
            return Ok(());
        }
    };
    bytes.push(b'\n');
    writer.write_all(&bytes).await
}

/// Answer one request line; notifications get no response
pub async fn handle_line<D: Device>(
    line: &str,
    exposed: &Exposed<D>,
    simulation: &SimulationHandle<D>,
) -> Option<Response> {
    let request = match Request::parse(line) {
        Ok(request) => request,
        Err((id, e)) => {
            debug!("Rejected control request: {}", e);
            return Some(Response::failure(id, &e));
        }
    };
    let id = request.id.clone();
    let result = execute(request, exposed, simulation).await;

    let id = id?;
    Some(match result {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            debug!("Control request failed: {}", e);
            Response::failure(Some(id), &e)
        }
    })
}

async fn execute<D: Device>(
    request: Request,
    exposed: &Exposed<D>,
    simulation: &SimulationHandle<D>,
) -> Result<serde_json::Value, ControlError> {
    let target = Target::parse(&request.method)?;
    let exposed = exposed.clone();
    let params = request.params;
    let value = simulation
        .execute(move |sim| exposed.resolve(sim, &target, params))
        .await??;
    serde_json::to_value(value).map_err(|e| ControlError::Encode(e.to_string()))
}
