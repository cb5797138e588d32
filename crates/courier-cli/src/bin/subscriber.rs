//! Durable consumer with bounded concurrency. Runs until Ctrl-C, or until
//! `COURIER_SESSION_SECS` has elapsed.

use std::process::ExitCode;

use tracing::{error, info};

use courier_cli::{
    bootstrap, connect, publish_orders, render_json, run_subscriber, sample_orders,
    shutdown_on_ctrl_c, subscriber_stop,
};
use courier_core::CourierError;
use courier_core::config::BrokerBackend;

async fn run() -> Result<(), CourierError> {
    let config = bootstrap()?;
    let broker = connect(&config).await?;

    // Nothing else publishes into a fresh in-memory broker.
    if config.backend == BrokerBackend::Memory {
        broker.ensure_stream(&config.broker.stream_spec()).await?;
        publish_orders(broker.as_ref(), &sample_orders(1)).await?;
    }

    let stop = subscriber_stop(&config, shutdown_on_ctrl_c());
    let counts = run_subscriber(broker.as_ref(), &config, stop).await?;

    info!(
        received = counts.received,
        acked = counts.acked,
        failed = counts.failed,
        peak_in_flight = counts.peak_in_flight,
        "subscriber finished"
    );
    println!("{}", render_json(&counts)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "subscriber failed");
            ExitCode::FAILURE
        }
    }
}
