//! Creates the stream and publishes three orders.

use std::process::ExitCode;

use tracing::{error, info};

use courier_cli::{bootstrap, connect, publish_orders, sample_orders};
use courier_core::CourierError;

async fn run() -> Result<(), CourierError> {
    let config = bootstrap()?;
    let broker = connect(&config).await?;

    broker.ensure_stream(&config.broker.stream_spec()).await?;
    let acks = publish_orders(broker.as_ref(), &sample_orders(1)).await?;

    info!(published = acks.len(), stream = %config.broker.stream, "publisher finished");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "publisher failed");
            ExitCode::FAILURE
        }
    }
}
