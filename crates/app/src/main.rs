mod cli;
mod html;
mod vision;

use anyhow::{Context, Result};
use tracing::info;

use crate::vision::{processing, telemetry};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = cli::load_config()?;
    let _telemetry = telemetry::init_tracing(&config.telemetry)?;
    telemetry::init_metrics_recorder();

    info!(
        video = %config.video_path.display(),
        size = %format!("{}x{}", config.width, config.height),
        classes = ?config.detector.classes,
        "starting traffic stream"
    );
    let detector = processing::load_detector(&config)?;

    actix_web::rt::System::new()
        .block_on(vision::run_server(config, detector))
        .context("stream server stopped with an error")
}
