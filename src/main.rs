use log::{error, info};
use std::sync::Arc;
use trusty_poll_sync::notify::LogObserver;
use trusty_poll_sync::remote::http::HttpPollSource;
use trusty_poll_sync::remote::tcp::JsonLinesTransport;
use trusty_poll_sync::{PollReader, PollStore, SessionHandle, SyncConfig};

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return;
        }
    };

    // Pull endpoints
    let source = match HttpPollSource::new(config.server_url.clone(), config.refresh_timeout) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return;
        }
    };
    let transport = Arc::new(JsonLinesTransport::new(config.push_addr.clone()));

    // One store per session, shared read-only with the observer
    let store = Arc::new(PollStore::new());
    let observer = Arc::new(LogObserver::new(PollReader::new(
        Arc::clone(&store),
        config.suffix_len,
    )));

    let session = SessionHandle::start(&config, store, transport, source, observer);
    info!(
        "Session {} syncing polls from {} (push channel {})",
        session.id(),
        config.server_url,
        config.push_addr
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    session.shutdown().await;
}
