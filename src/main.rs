use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    glm_tool::config::init();

    let config = glm_tool::config::get();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(glm_tool::config::tracing_filter(&config.log_level))
        .init();

    tracing::info!(
        "config loaded: port={}, target={}, anthropic={}, debug={}, log_level={}",
        config.port,
        config.target_api_url,
        config.anthropic_api_url,
        config.debug,
        config.log_level
    );

    if let Err(e) = glm_tool::api::start_server().await {
        tracing::error!("server failed to start: {}", e);
        std::process::exit(1);
    }
}
