//! Stream, consumer, publish, single fetch, batch fetch, bounded consume,
//! then delete the stream.

use std::process::ExitCode;

use tracing::error;

use courier_cli::{bootstrap, connect, render_json, walkthrough};
use courier_core::CourierError;

async fn run() -> Result<(), CourierError> {
    let config = bootstrap()?;
    let broker = connect(&config).await?;
    let report = walkthrough(broker.as_ref(), &config).await?;
    println!("{}", render_json(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "walkthrough failed");
            ExitCode::FAILURE
        }
    }
}
