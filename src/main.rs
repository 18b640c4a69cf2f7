use anyhow::Result;
use log::info;
use std::env;
use std::sync::Arc;

use massban::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting massban v{}", massban::VERSION);

    let base_dir = MassBanConfig::base_dir_from_env()?;
    let config = MassBanConfig::resolve(base_dir, env::args().skip(1)).await?;
    info!(
        "Mass ban: {}, mass unban: {}",
        config.flags.mass_ban, config.flags.mass_unban
    );

    let twitch = TwitchConnection::new(TwitchConfig::new(&config.credentials, &config.settings));
    let mut session = MassBanSession::new(config, Box::new(twitch), Arc::new(HttpListSource::new()));

    // The session has already logged the failure and released the connection
    let report = session.run().await?;
    info!("Done: {} users banned, {} users unbanned", report.banned, report.unbanned);
    Ok(())
}
