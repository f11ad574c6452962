use modeldriver::shutdown::wait_for_shutdown_signal;
use modeldriver::{ModelDriverConfig, init_tracing, model_driver, supervise};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

const USAGE: &str = "usage: modeldriver <config.json>";

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let Some(path) = std::env::args_os().nth(1) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) => {
            error!("Failed to read {}: {}", path.to_string_lossy(), e);
            return ExitCode::from(2);
        }
    };

    let driver = match ModelDriverConfig::from_json(&raw).and_then(model_driver) {
        Ok(driver) => Arc::new(driver),
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let mut run = match supervise(driver.clone()).await {
        Ok(run) => run,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    tokio::select! {
        _ = &mut run => {}
        signal = wait_for_shutdown_signal() => {
            match signal {
                Ok(()) => {
                    info!(model = driver.name(), "Shutdown requested, terminating model");
                    driver.terminate().await;
                }
                Err(e) => warn!("Failed to install shutdown handlers: {}", e),
            }
            if let Err(e) = run.await {
                warn!("Run task ended abnormally: {}", e);
            }
        }
    }

    match driver.outcome() {
        Some(outcome) if outcome.is_success() => ExitCode::SUCCESS,
        Some(outcome) => {
            info!(model = driver.name(), "Model finished: {}", outcome);
            ExitCode::from(1)
        }
        None => ExitCode::from(1),
    }
}
