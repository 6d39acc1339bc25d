//! Wiring of the motor simulation and its front ends

use std::net::SocketAddr;

use anyhow::Context;
use devsim_control::ControlServer;
use devsim_core::{Simulation, SimulationError, SimulationHandle};
use devsim_modbus::ModbusAdapter;
use devsim_stream::StreamAdapter;
use tokio::task::JoinHandle;
use tracing::info;

use crate::motor::{self, Motor};
use crate::settings::Settings;

/// A running simulation with its adapters and control server
pub struct Runner {
    handle: SimulationHandle<Motor>,
    task: JoinHandle<Result<(), SimulationError>>,
    control: Option<ControlServer>,
}

impl Runner {
    /// Build the simulation from `settings` and start all enabled front ends
    pub async fn start(settings: &Settings) -> anyhow::Result<Self> {
        let layout = motor::layout();
        let mut simulation = Simulation::new(motor::setups(layout.clone()), settings.simulation.config())
            .context("failed to create simulation")?;

        if let Some(options) = &settings.stream {
            let adapter = StreamAdapter::new(motor::stream_interface(), options.clone())
                .context("invalid stream interface")?;
            simulation.add_adapter(adapter)?;
        }
        if let Some(options) = &settings.modbus {
            simulation.add_adapter(ModbusAdapter::new(layout, options.clone()))?;
        }

        let (handle, task) = simulation.spawn();
        let control = match &settings.control {
            Some(options) => Some(
                ControlServer::start(options, handle.clone())
                    .await
                    .context("failed to start control server")?,
            ),
            None => None,
        };

        let configuration = match handle.execute(|s| s.adapters().configuration(&[])).await {
            Ok(configuration) => configuration?,
            Err(_) => {
                // The simulation ended during startup, report why
                task.await.context("simulation task failed")??;
                anyhow::bail!("simulation stopped during startup");
            }
        };
        for (protocol, options) in configuration {
            info!("Adapter '{}': {:?}", protocol, options);
        }

        Ok(Self {
            handle,
            task,
            control,
        })
    }

    /// Handle for submitting work to the simulation
    pub fn handle(&self) -> &SimulationHandle<Motor> {
        &self.handle
    }

    /// Address of the control server, if enabled
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control.as_ref().map(ControlServer::local_addr)
    }

    /// Wait until the simulation ends; the control server goes down with it
    pub async fn wait(self) -> anyhow::Result<()> {
        let result = self.task.await.context("simulation task failed")?;
        drop(self.control);
        result.context("simulation aborted")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use devsim_control::{ControlClient, ControlOptions};
    use devsim_core::Value;
    use devsim_modbus::ModbusOptions;
    use devsim_stream::StreamOptions;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout, Instant};

    use super::*;
    use crate::settings::SimulationSettings;

    fn local_settings() -> Settings {
        Settings {
            simulation: SimulationSettings {
                setup: "default".into(),
                speed: 50.0,
                cycle_delay_ms: 5,
            },
            stream: Some(StreamOptions {
                bind_address: "127.0.0.1".into(),
                port: 0,
            }),
            modbus: Some(ModbusOptions {
                bind_address: "127.0.0.1".into(),
                port: 0,
            }),
            control: Some(ControlOptions {
                bind_address: "127.0.0.1".into(),
                port: 0,
            }),
        }
    }

    async fn port(runner: &Runner, protocol: &'static str) -> u16 {
        let configuration = runner
            .handle()
            .execute(|s| s.adapters().configuration(&[]))
            .await
            .unwrap()
            .unwrap();
        configuration[protocol]["port"].as_i64().unwrap() as u16
    }

    async fn read_reply(stream: &mut TcpStream) -> String {
        let mut reply = Vec::new();
        let mut byte = [0u8; 1];
        timeout(Duration::from_secs(5), async {
            while !reply.ends_with(b"\r\n") {
                stream.read_exact(&mut byte).await.unwrap();
                reply.push(byte[0]);
            }
        })
        .await
        .unwrap();
        reply.truncate(reply.len() - 2);
        String::from_utf8(reply).unwrap()
    }

    async fn modbus(stream: &mut TcpStream, request: &[u8], response_len: usize) -> Vec<u8> {
        stream.write_all(request).await.unwrap();
        let mut response = vec![0u8; response_len];
        timeout(Duration::from_secs(5), stream.read_exact(&mut response))
            .await
            .unwrap()
            .unwrap();
        response
    }

    async fn settle_at(client: &ControlClient, position: f64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let state = client.get("device", "state").await.unwrap();
            let current = client.get("device", "position").await.unwrap();
            if state == Value::from("idle") && current == Value::Float(position) {
                return;
            }
            assert!(Instant::now() < deadline, "motor did not settle at {}", position);
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_front_ends_share_one_motor() {
        let runner = Runner::start(&local_settings()).await.unwrap();
        let client = ControlClient::connect(runner.control_addr().unwrap()).await.unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", port(&runner, "stream").await))
            .await
            .unwrap();
        let mut modbus_stream = TcpStream::connect(("127.0.0.1", port(&runner, "modbus").await))
            .await
            .unwrap();

        stream.write_all(b"T=5\r\n").await.unwrap();
        assert_eq!(read_reply(&mut stream).await, "T=5.0");
        settle_at(&client, 5.0).await;

        // Read input registers 0..2: position and target in 0.1 mm
        let response = modbus(
            &mut modbus_stream,
            &[0, 1, 0, 0, 0, 6, 1, 0x04, 0, 0, 0, 2],
            13,
        )
        .await;
        assert_eq!(&response[7..], &[0x04u8, 4, 0, 50, 0, 50]);

        // Write the holding register setpoint to 1.0 mm
        let response = modbus(
            &mut modbus_stream,
            &[0, 2, 0, 0, 0, 6, 1, 0x06, 0, 0, 0, 10],
            12,
        )
        .await;
        assert_eq!(&response[7..], &[0x06u8, 0, 0, 0, 10]);
        settle_at(&client, 1.0).await;
        assert_eq!(read_target(&mut stream).await, "1.0");

        runner.handle().stop().await.unwrap();
        runner.wait().await.unwrap();
    }

    async fn read_target(stream: &mut TcpStream) -> String {
        stream.write_all(b"T?\r\n").await.unwrap();
        read_reply(stream).await
    }

    #[tokio::test]
    async fn test_switch_setup_through_control() {
        let runner = Runner::start(&local_settings()).await.unwrap();
        let client = ControlClient::connect(runner.control_addr().unwrap()).await.unwrap();

        client
            .call("simulation", "switch_setup", vec![Value::from("moving")])
            .await
            .unwrap();
        assert_eq!(client.get("simulation", "setup").await.unwrap(), Value::from("moving"));
        assert_eq!(client.get("device", "target").await.unwrap(), Value::Float(120.0));

        let halted = client.call("device", "stop", vec![]).await.unwrap();
        let Value::List(items) = halted else {
            panic!("unexpected stop result {:?}", halted);
        };
        assert_eq!(items[0], items[1]);

        runner.handle().stop().await.unwrap();
        runner.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_front_ends_are_not_started() {
        let settings = Settings {
            stream: None,
            modbus: None,
            control: None,
            ..local_settings()
        };
        let runner = Runner::start(&settings).await.unwrap();
        assert_eq!(runner.control_addr(), None);
        let protocols = runner
            .handle()
            .execute(|s| s.adapters().protocols())
            .await
            .unwrap();
        assert!(protocols.is_empty());

        runner.handle().stop().await.unwrap();
        runner.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_setup_fails_to_start() {
        let mut settings = local_settings();
        settings.simulation.setup = "flying".into();
        assert!(Runner::start(&settings).await.is_err());
    }
}
