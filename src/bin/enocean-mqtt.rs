//! Entry point: parses the CLI, loads the config file and EEP catalogue,
//! spawns the controller thread, and runs the gateway on the main thread
//! until interrupted.

use std::io::BufReader;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use enocean::config::{Cli, Config};
use enocean::controller::ControllerHandle;
use enocean::eep::xml;
use enocean::gateway::Gateway;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if std::env::var_os("RUST_LOG").is_none() {
        env_logger::Builder::new().filter_level(cli.log_level()).init();
    } else {
        env_logger::init();
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("enocean-mqtt: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&cli.config)?;

    let catalogue_path = cli.eep_catalogue.clone().unwrap_or_else(|| config.controller.eep_catalogue.clone());
    let file = std::fs::File::open(&catalogue_path)
        .map_err(|e| format!("could not open EEP catalogue {}: {e}", catalogue_path.display()))?;
    let catalogue = Arc::new(xml::load(BufReader::new(file))?);
    log::info!("enocean-mqtt: loaded {} EEP profiles from {}", catalogue.len(), catalogue_path.display());

    let equipment = config.resolve_equipment(&catalogue)?;
    log::info!("enocean-mqtt: {} equipment entries configured", equipment.len());

    let controller = Arc::new(ControllerHandle::spawn(&config.controller)?);

    // Give the startup probe a short window to populate adapter identity
    // before the gateway announces it (§5 "startup barrier"); the probe
    // itself has no hard timeout, so this is a best-effort wait rather
    // than a blocking barrier.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while controller.own_address().is_none() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    let mut gateway = Gateway::new(cli.config.clone(), &config.mqtt, catalogue, equipment, controller)?;
    gateway.publish_startup_state();

    let stop = gateway.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("enocean-mqtt: interrupted, shutting down");
        stop.store(true, std::sync::atomic::Ordering::SeqCst);
    })?;

    gateway.run();
    gateway.stop();
    Ok(())
}
