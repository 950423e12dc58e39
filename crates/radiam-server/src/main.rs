use radiam_config::{ConfigManager, ServerConfig};
use radiam_dict::Dictionary;
use radiam_server::app;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let instance = std::env::var("RADIAM_INSTANCE").ok();
    let manager = ConfigManager::from_env(instance).await?;

    let config_text = manager.read_object("serverConfig.json").await?;
    let config: ServerConfig = radiam_config::load_from_json(&config_text)?;
    radiam_logging::init(&config.log_level);
    radiam_metrics::register_metrics();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting radiam server"
    );

    let dict = match manager.read_object("dictionary.json").await {
        Ok(text) => Dictionary::from_json(&text)?,
        Err(e) => {
            warn!(error = %e, "no dictionary object found, using base definitions only");
            Dictionary::base()
        }
    };

    app::run(config, Arc::new(dict)).await?;
    Ok(())
}
