use std::env;

use tracing_subscriber::EnvFilter;

use socket_server::config::Config;

#[tokio::main]
async fn main() {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_owned());
    let config = Config::load(&config_path).unwrap_or_else(|err| {
        eprintln!("FATAL: failed to load config from {config_path}: {err}");
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.logging.level.clone()))
        .init();

    if let Err(err) = socket_server::run(config).await {
        tracing::error!(%err, "server exited with error");
        std::process::exit(1);
    }
}
