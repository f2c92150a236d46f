use clap::Parser;
use log::{error, info};
use vigil::configuration::{Args, Config};
use vigil::controller::{spawn_signal_handler, Controller};

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    info!("vigil v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut controller = match Controller::new(config.clone()) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    spawn_signal_handler(controller.exit_handle(), config.timing.shutdown_grace());

    if let Err(e) = controller.run().await {
        error!("{}, exiting...", e);
        std::process::exit(1);
    }
}
