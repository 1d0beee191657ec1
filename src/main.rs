use gatelink::{
    common::{logger, types::AnyResult},
    configs::Config,
    gateway::{GatewayConnection, GatewayEventType},
};
use serde_json::value::RawValue;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(config.logging.as_ref());

    if config.gateway.token.is_empty() {
        error!(
            "No gateway token configured; set gateway.token or {}",
            gatelink::configs::TOKEN_ENV
        );
        return Err("missing gateway token".into());
    }

    info!(
        "Starting {} v{} (intents {:?})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.gateway.intents
    );

    let sink = |event_type: &GatewayEventType, sequence: u64, payload: &RawValue| {
        debug!(
            "Dispatch #{} {} ({} bytes)",
            sequence,
            event_type,
            payload.get().len()
        );
    };
    let gateway = GatewayConnection::new(config.gateway, sink);

    tokio::select! {
        res = gateway.open() => {
            if let Err(e) = res {
                error!("Gateway failed to open: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted before the gateway became ready");
            gateway.close().await;
            return Ok(());
        }
    }

    info!("Gateway ready; press Ctrl-C to exit");
    let mut status = gateway.subscribe_status();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!("Gateway status: {} (latency {:?})", current, gateway.latency());
            }
        }
    }

    gateway.close().await;
    Ok(())
}
