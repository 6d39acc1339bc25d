//! Modbus TCP adapter

use std::collections::BTreeMap;
use std::net::SocketAddr;

use devsim_core::{Adapter, AdapterError, Device, SimulationHandle, Value};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::bank::ModbusLayout;
use crate::protocol::{execute, ModbusProtocol};

/// Protocol identifier of the Modbus adapter
pub const PROTOCOL: &str = "modbus";

const READ_BUFFER_LEN: usize = 8192;

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusOptions {
    /// Address to bind
    pub bind_address: String,
    /// Port to bind; 0 picks a free port
    pub port: u16,
}

impl Default for ModbusOptions {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5020,
        }
    }
}

/// Serves a [`ModbusLayout`] over Modbus TCP
///
/// Requests run on the simulation task, so a response always reflects the
/// banks between two cycles.
#[derive(Debug)]
pub struct ModbusAdapter {
    layout: ModbusLayout,
    options: ModbusOptions,
    local_addr: Option<SocketAddr>,
    server: Option<JoinHandle<()>>,
}

impl ModbusAdapter {
    /// Adapter serving `layout`
    pub fn new(layout: ModbusLayout, options: ModbusOptions) -> Self {
        Self {
            layout,
            options,
            local_addr: None,
            server: None,
        }
    }

    /// Served banks
    pub fn layout(&self) -> &ModbusLayout {
        &self.layout
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl<D: Device> Adapter<D> for ModbusAdapter {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn start(&mut self, simulation: SimulationHandle<D>) -> Result<(), AdapterError> {
        if self.server.is_some() {
            return Ok(());
        }
        let address = format!("{}:{}", self.options.bind_address, self.options.port);
        let listener = std::net::TcpListener::bind(&address)
            .map_err(|source| AdapterError::Bind { address, source })?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;
        info!("Modbus adapter listening on {}", local_addr);

        self.local_addr = Some(local_addr);
        self.server = Some(tokio::spawn(serve(listener, self.layout.clone(), simulation)));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            info!("Modbus adapter on {:?} stopped", self.local_addr);
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
        ])
    }

    fn documentation(&self) -> String {
        let bank = |name: &str, b: &crate::DataBank| {
            format!("{}: 0x{:04X}..=0x{:04X}\n", name, b.start(), b.end())
        };
        let mut doc = format!(
            "Modbus TCP on {}:{}\n\n",
            self.options.bind_address,
            self.local_addr.map(|a| a.port()).unwrap_or(self.options.port)
        );
        doc.push_str(&bank("Discrete inputs", &self.layout.di));
        doc.push_str(&bank("Coils", &self.layout.co));
        doc.push_str(&bank("Input registers", &self.layout.ir));
        doc.push_str(&bank("Holding registers", &self.layout.hr));
        doc
    }
}

impl Drop for ModbusAdapter {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

async fn serve<D: Device>(listener: TcpListener, layout: ModbusLayout, simulation: SimulationHandle<D>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Modbus client connected: {}", peer);
                    connections.spawn(handle_connection(stream, peer, layout.clone(), simulation.clone()));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Modbus connection task panicked: {}", e);
                    }
                }
            }
        }
    }
}

async fn handle_connection<D: Device>(
    mut stream: TcpStream,
    peer: SocketAddr,
    layout: ModbusLayout,
    simulation: SimulationHandle<D>,
) {
    let mut protocol = ModbusProtocol::new();
    let mut buf = vec![0u8; READ_BUFFER_LEN];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Modbus connection to {} closed: {}", peer, e);
                return;
            }
        };
        let frames = protocol.push_bytes(&buf[..n]);
        if frames.is_empty() {
            continue;
        }

        let banks = layout.clone();
        let responses = match simulation
            .execute(move |_| {
                frames
                    .iter()
                    .map(|frame| execute(&banks, frame).encode())
                    .collect::<Vec<_>>()
            })
            .await
        {
            Ok(responses) => responses,
            Err(_) => {
                info!("Closing Modbus connection to {}, simulation stopped", peer);
                return;
            }
        };
        for response in responses {
            if let Err(e) = stream.write_all(&response).await {
                debug!("Modbus connection to {} closed: {}", peer, e);
                return;
            }
        }
    }
    info!("Modbus client disconnected: {}", peer);
}
