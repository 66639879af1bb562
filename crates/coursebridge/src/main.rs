use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use coursebridge::{BridgeConfig, Daemon};

const DEFAULT_CONFIG_PATH: &str = "./instance/config.json";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    info!(path = %config_path, "loading configuration");
    let config = match BridgeConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %config_path, error = %e, "could not load configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = Daemon::new(config).run() {
        error!(error = %e, "daemon exited with error");
        std::process::exit(1);
    }
}
