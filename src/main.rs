use clap::Parser;
use http_receiver::configuration::config::{CliArgs, Config};
use http_receiver::controller::controller_handler::Controller;
use log::{error, info};
use std::io::Write;

const LOG_TAG: &str = "[http-receiver]";

#[tokio::main]
async fn main() {
    // Every line carries the service tag, RUST_LOG still controls the level
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "{} {} {}", LOG_TAG, record.level(), record.args()))
        .init();

    let args = CliArgs::parse();

    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Configuration loaded: {:?} storage, max body {} bytes",
        config.storage_backend, config.max_body_bytes
    );

    let controller = Controller::new(config);
    if let Err(e) = controller.run().await {
        error!("Receiver stopped with an error: {}, exiting...", e);
        std::process::exit(1);
    }
}
