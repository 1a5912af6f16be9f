use clap::Parser;
use toolbridge_rs::server::{init_logging, startup};
use toolbridge_rs::{BridgeConfig, BridgeState};

fn main() -> anyhow::Result<()> {
    let config = BridgeConfig::parse().validate()?;
    init_logging(config.log_level);

    let bridge_state = BridgeState::new(&config)?;
    actix_web::rt::System::new().block_on(async move {
        tokio::select! {
            res = startup(config, bridge_state) => res?,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down");
            }
        }
        Ok(())
    })
}
