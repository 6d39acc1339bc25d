//! devsim: the example motor behind the stream, Modbus and control front ends
//!
//! Settings are read from the JSON file named by `DEVSIM_CONFIG`, else from
//! `<config dir>/devsim/settings.json`, else the built-in defaults apply.
//! Logging is configured through `RUST_LOG`.

mod app;
mod motor;
mod settings;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app::Runner;
use settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "devsim_runner=info,devsim_core=info,devsim_stream=info,devsim_modbus=info,devsim_control=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting devsim {}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    let runner = Runner::start(&settings).await?;
    let handle = runner.handle().clone();
    if let Some(addr) = runner.control_addr() {
        info!("Control server on {}", addr);
    }

    let documentation = handle
        .execute(|s| s.adapters().documentation(&[]))
        .await??;
    if !documentation.is_empty() {
        info!("Device interfaces:\n{}", documentation);
    }

    let finished = runner.wait();
    tokio::pin!(finished);
    tokio::select! {
        result = &mut finished => return result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("Interrupted, stopping simulation");
        }
    }

    // The simulation may have stopped on its own in the meantime
    let _ = handle.stop().await;
    finished.await
}
