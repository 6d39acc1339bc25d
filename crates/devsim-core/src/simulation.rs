//! Simulation runtime
//!
//! A [`Simulation`] owns the device, its setups and its adapters and runs as a
//! single tokio task. The task alternates between two kinds of work:
//!
//! - cycle ticks: every `cycle_delay` the device is advanced by the measured
//!   elapsed time multiplied by `speed`
//! - jobs: closures submitted through a [`SimulationHandle`] by protocol
//!   adapters and the control plane
//!
//! Jobs run to completion between ticks, so a protocol request, a control
//! request and a cycle never interleave. Results travel back over a oneshot
//! channel.
//!
//! # Example
//!
//! ```rust,no_run
//! use devsim_core::{Device, Registry, Setups, Simulation, SimulationConfig};
//!
//! struct Lamp {
//!     on: bool,
//! }
//!
//! impl Device for Lamp {
//!     fn members() -> Registry<Self> {
//!         Registry::new("Lamp").read_only("on", |l: &Lamp| l.on)
//!     }
//! }
//!
//! # async fn run() -> Result<(), devsim_core::SimulationError> {
//! let setups = Setups::new().with_default(|| Ok(Lamp { on: false }));
//! let simulation = Simulation::new(setups, SimulationConfig::default())?;
//! let (handle, task) = simulation.spawn();
//!
//! handle.with_device(|lamp| lamp.on = true).await?;
//! handle.stop().await?;
//! task.await.ok();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, trace};

use crate::adapter::{Adapter, AdapterCollection};
use crate::device::Device;
use crate::error::{AdapterError, SimulationError};
use crate::registry::Registry;
use crate::setup::{Setups, DEFAULT_SETUP};

/// Job queue depth
const JOB_QUEUE_CAPACITY: usize = 256;

/// Default time between cycles
pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_millis(100);

type Job<D> = Box<dyn FnOnce(&mut Simulation<D>) + Send>;

/// Initial simulation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Setup to start from
    pub setup: String,
    /// Simulated seconds per real second
    pub speed: f64,
    /// Real time between cycles
    pub cycle_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            setup: DEFAULT_SETUP.to_string(),
            speed: 1.0,
            cycle_delay: DEFAULT_CYCLE_DELAY,
        }
    }
}

/// Snapshot of the simulation counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationStatus {
    /// Active setup
    pub setup: String,
    /// Speed factor
    pub speed: f64,
    /// Cycle delay in seconds
    pub cycle_delay: f64,
    /// Processed cycles
    pub cycles: u64,
    /// Accumulated simulated time in seconds
    pub runtime: f64,
    /// Wall time since start in seconds
    pub uptime: f64,
    /// Whether cycle processing is paused
    pub paused: bool,
}

/// Device simulation
pub struct Simulation<D: Device> {
    device: D,
    registry: Arc<Registry<D>>,
    setups: Setups<D>,
    setup: String,
    adapters: AdapterCollection<D>,
    speed: f64,
    cycle_delay: Duration,
    cycles: u64,
    runtime: f64,
    started_at: Option<Instant>,
    paused: bool,
    stopping: bool,
    handle: SimulationHandle<D>,
    jobs: Option<mpsc::Receiver<Job<D>>>,
}

impl<D: Device> fmt::Debug for Simulation<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("setup", &self.setup)
            .field("speed", &self.speed)
            .field("cycle_delay", &self.cycle_delay)
            .field("cycles", &self.cycles)
            .field("paused", &self.paused)
            .finish()
    }
}

impl<D: Device> Simulation<D> {
    /// Build the simulation and its initial device
    pub fn new(setups: Setups<D>, config: SimulationConfig) -> Result<Self, SimulationError> {
        check_speed(config.speed)?;
        let device = setups.create(&config.setup)?;
        let (tx, rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        Ok(Self {
            device,
            registry: Arc::new(D::members()),
            setups,
            setup: config.setup,
            adapters: AdapterCollection::new(),
            speed: config.speed,
            cycle_delay: config.cycle_delay,
            cycles: 0,
            runtime: 0.0,
            started_at: None,
            paused: false,
            stopping: false,
            handle: SimulationHandle { jobs: tx },
            jobs: Some(rx),
        })
    }

    /// Register a protocol adapter; it is connected when the simulation starts
    pub fn add_adapter(&mut self, adapter: impl Adapter<D> + 'static) -> Result<(), AdapterError> {
        self.adapters.add(Box::new(adapter))
    }

    /// Handle for submitting work to this simulation
    pub fn handle(&self) -> SimulationHandle<D> {
        self.handle.clone()
    }

    /// Run the simulation on its own task
    pub fn spawn(self) -> (SimulationHandle<D>, JoinHandle<Result<(), SimulationError>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Cycle loop; returns when stopped or when a cycle fails
    pub async fn run(mut self) -> Result<(), SimulationError> {
        let mut jobs = self
            .jobs
            .take()
            .ok_or_else(|| SimulationError::InvalidState("simulation already ran".into()))?;

        self.started_at = Some(Instant::now());
        self.adapters.attach(self.handle.clone());
        if let Err(e) = self.adapters.connect(&[]) {
            error!("Failed to connect adapters: {}", e);
            self.shutdown_adapters();
            return Err(e.into());
        }
        info!(
            "Simulation started (setup '{}', speed {}, cycle delay {:?})",
            self.setup, self.speed, self.cycle_delay
        );

        let mut last_tick = Instant::now();
        let result = loop {
            if self.stopping {
                break Ok(());
            }

            let next_tick = last_tick + self.cycle_delay;
            tokio::select! {
                job = jobs.recv() => match job {
                    Some(job) => job(&mut self),
                    None => break Ok(()),
                },
                _ = sleep_until(next_tick) => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last_tick);
                    last_tick = now;
                    if let Err(e) = self.cycle(elapsed.as_secs_f64()) {
                        error!("Simulation aborted in cycle {}: {}", self.cycles + 1, e);
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown_adapters();
        // Pending jobs are dropped with the receiver; their callers see `Stopped`
        jobs.close();
        info!(
            "Simulation stopped after {} cycles ({:.3} s simulated)",
            self.cycles, self.runtime
        );
        result
    }

    fn shutdown_adapters(&mut self) {
        if let Err(e) = self.adapters.disconnect(&[]) {
            error!("Failed to disconnect adapters: {}", e);
        }
        self.adapters.detach();
    }

    fn cycle(&mut self, elapsed: f64) -> Result<(), SimulationError> {
        if self.paused {
            return Ok(());
        }
        let dt = elapsed * self.speed;
        self.device.process(dt).map_err(SimulationError::Fatal)?;
        self.cycles += 1;
        self.runtime += dt;
        trace!(cycle = self.cycles, dt, "Processed cycle");
        Ok(())
    }

    /// Process a single cycle for `elapsed` real seconds without the timer
    pub fn step(&mut self, elapsed: f64) -> Result<(), SimulationError> {
        if !(elapsed >= 0.0 && elapsed.is_finite()) {
            return Err(SimulationError::InvalidParameter(format!(
                "time step must be a non-negative number, got {}",
                elapsed
            )));
        }
        self.cycle(elapsed)
    }

    /// The device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The device, mutable
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Member table of the device type
    pub fn registry(&self) -> Arc<Registry<D>> {
        Arc::clone(&self.registry)
    }

    /// The adapters
    pub fn adapters(&self) -> &AdapterCollection<D> {
        &self.adapters
    }

    /// The adapters, mutable
    pub fn adapters_mut(&mut self) -> &mut AdapterCollection<D> {
        &mut self.adapters
    }

    /// Simulated seconds per real second
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Change the speed factor; applies from the next cycle
    pub fn set_speed(&mut self, speed: f64) -> Result<(), SimulationError> {
        check_speed(speed)?;
        self.speed = speed;
        Ok(())
    }

    /// Real time between cycles
    pub fn cycle_delay(&self) -> Duration {
        self.cycle_delay
    }

    /// Change the cycle delay; applies to the next wait
    pub fn set_cycle_delay(&mut self, delay: Duration) {
        self.cycle_delay = delay;
    }

    /// Change the cycle delay from seconds
    pub fn set_cycle_delay_secs(&mut self, seconds: f64) -> Result<(), SimulationError> {
        let delay = Duration::try_from_secs_f64(seconds).map_err(|_| {
            SimulationError::InvalidParameter(format!(
                "cycle delay must be a non-negative number, got {}",
                seconds
            ))
        })?;
        self.set_cycle_delay(delay);
        Ok(())
    }

    /// Processed cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Accumulated simulated time in seconds
    pub fn runtime(&self) -> f64 {
        self.runtime
    }

    /// Wall time in seconds since the cycle loop started
    pub fn uptime(&self) -> f64 {
        self.started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Whether the cycle loop is running
    pub fn is_started(&self) -> bool {
        self.started_at.is_some() && !self.stopping
    }

    /// Whether cycle processing is paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Stop processing cycles; adapters keep serving the current state
    pub fn pause(&mut self) -> Result<(), SimulationError> {
        if self.paused {
            return Err(SimulationError::InvalidState(
                "can only pause a running simulation".into(),
            ));
        }
        self.paused = true;
        info!("Simulation paused");
        Ok(())
    }

    /// Continue processing cycles
    pub fn resume(&mut self) -> Result<(), SimulationError> {
        if !self.paused {
            return Err(SimulationError::InvalidState(
                "can only resume a paused simulation".into(),
            ));
        }
        self.paused = false;
        info!("Simulation resumed");
        Ok(())
    }

    /// Request the cycle loop to exit after the current job
    pub fn stop(&mut self) {
        if !self.stopping {
            info!("Simulation stop requested");
        }
        self.stopping = true;
    }

    /// Active setup name
    pub fn setup(&self) -> &str {
        &self.setup
    }

    /// Available setup names
    pub fn setups(&self) -> Vec<String> {
        self.setups.names()
    }

    /// Replace the device with a fresh one from the named setup
    ///
    /// The new device is built first; on failure the current device stays.
    pub fn switch_setup(&mut self, name: &str) -> Result<(), SimulationError> {
        let device = self.setups.create(name)?;
        self.device = device;
        self.setup = name.to_string();
        info!("Switched to setup '{}'", name);
        Ok(())
    }

    /// Counter snapshot
    pub fn status(&self) -> SimulationStatus {
        SimulationStatus {
            setup: self.setup.clone(),
            speed: self.speed,
            cycle_delay: self.cycle_delay.as_secs_f64(),
            cycles: self.cycles,
            runtime: self.runtime,
            uptime: self.uptime(),
            paused: self.paused,
        }
    }

    /// Members exposed on the control plane as the `simulation` object
    pub fn members() -> Registry<Self> {
        Registry::new("Simulation")
            .read_write(
                "speed",
                |s: &Self| s.speed,
                |s, speed: f64| s.set_speed(speed).map_err(SimulationError::into_device_error),
            )
            .read_write(
                "cycle_delay",
                |s: &Self| s.cycle_delay.as_secs_f64(),
                |s, seconds: f64| {
                    s.set_cycle_delay_secs(seconds)
                        .map_err(SimulationError::into_device_error)
                },
            )
            .read_only("cycles", |s: &Self| s.cycles)
            .read_only("runtime", |s: &Self| s.runtime)
            .read_only("uptime", |s: &Self| s.uptime())
            .read_only("is_started", |s: &Self| s.is_started())
            .read_only("is_paused", |s: &Self| s.paused)
            .read_only("setup", |s: &Self| s.setup.clone())
            .read_only("setups", |s: &Self| s.setups())
            .read_only("device_documentation", |s: &Self| {
                s.adapters.documentation(&[]).unwrap_or_default()
            })
            .method0("pause", |s: &mut Self| {
                s.pause().map_err(SimulationError::into_device_error)
            })
            .method0("resume", |s: &mut Self| {
                s.resume().map_err(SimulationError::into_device_error)
            })
            .method0("stop", |s: &mut Self| {
                s.stop();
                Ok(())
            })
            .method1("switch_setup", |s: &mut Self, name: String| {
                s.switch_setup(&name)
                    .map_err(SimulationError::into_device_error)
            })
    }
}

fn check_speed(speed: f64) -> Result<(), SimulationError> {
    if speed >= 0.0 && speed.is_finite() {
        Ok(())
    } else {
        Err(SimulationError::InvalidParameter(format!(
            "speed must be a non-negative number, got {}",
            speed
        )))
    }
}

/// Cloneable handle for submitting work to a running simulation
pub struct SimulationHandle<D: Device> {
    jobs: mpsc::Sender<Job<D>>,
}

impl<D: Device> Clone for SimulationHandle<D> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
        }
    }
}

impl<D: Device> fmt::Debug for SimulationHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationHandle")
            .field("closed", &self.jobs.is_closed())
            .finish()
    }
}

impl<D: Device> SimulationHandle<D> {
    /// Run `f` on the simulation task between cycles and return its result
    pub async fn execute<R, F>(&self, f: F) -> Result<R, SimulationError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Simulation<D>) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<D> = Box::new(move |sim: &mut Simulation<D>| {
            let _ = tx.send(f(sim));
        });
        self.jobs
            .send(job)
            .await
            .map_err(|_| SimulationError::Stopped)?;
        rx.await.map_err(|_| SimulationError::Stopped)
    }

    /// Run `f` on the device between cycles
    pub async fn with_device<R, F>(&self, f: F) -> Result<R, SimulationError>
    where
        R: Send + 'static,
        F: FnOnce(&mut D) -> R + Send + 'static,
    {
        self.execute(move |sim| f(sim.device_mut())).await
    }

    /// Counter snapshot
    pub async fn status(&self) -> Result<SimulationStatus, SimulationError> {
        self.execute(|sim| sim.status()).await
    }

    /// Pause cycle processing
    pub async fn pause(&self) -> Result<(), SimulationError> {
        self.execute(|sim| sim.pause()).await?
    }

    /// Resume cycle processing
    pub async fn resume(&self) -> Result<(), SimulationError> {
        self.execute(|sim| sim.resume()).await?
    }

    /// Stop the simulation
    pub async fn stop(&self) -> Result<(), SimulationError> {
        self.execute(|sim| sim.stop()).await
    }

    /// Switch to another setup
    pub async fn switch_setup(&self, name: &str) -> Result<(), SimulationError> {
        let name = name.to_string();
        self.execute(move |sim| sim.switch_setup(&name)).await?
    }

    /// Whether the simulation task has gone away
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}
