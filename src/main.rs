mod api;
mod config;
mod error;
mod monitor;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use config::Config;
use monitor::MonitorServer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lab_monitor_server=info,warp=warn")),
        )
        .init();

    let config = Arc::new(Config::from_env());
    let server = Arc::new(MonitorServer::new());

    let bind_address = config.bind_address();
    let routes = api::routes::monitor_routes(server, config);

    tracing::info!(
        host = ?bind_address.0,
        port = bind_address.1,
        "Lab monitor server listening"
    );

    warp::serve(routes).run(bind_address).await;
}
