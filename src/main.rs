//! Concierge - service-request lifecycle engine

use clap::Parser;
use tracing::{error, info, warn};

use concierge::{
    auth::Role,
    config::{Args, Command, StoreBackend},
    db::MongoClient,
    logging,
    model::Principal,
    nats::NatsClient,
    Platform,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Concierge - Service Request Engine");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Store: {:?}", args.store);
    if args.store == StoreBackend::Mongo {
        info!("MongoDB: {} (db {})", args.mongodb_uri, args.mongodb_db);
    }
    info!(
        "NATS bridge: {}",
        if args.nats.nats_enabled { args.nats.nats_url.as_str() } else { "disabled" }
    );
    info!("Notification retention: {}h", args.notification_retention_hours);
    info!(
        "Notification sweep: {}",
        match args.notification_sweep_secs {
            0 => "on read only".to_string(),
            secs => format!("every {}s", secs),
        }
    );
    info!("Role change TTL: {}s", args.role_change_ttl_secs);
    info!("Artifacts: {}", args.artifact_base_url);
    info!("======================================");

    let config = args.platform_config();
    let mut platform = match args.store {
        StoreBackend::Memory => Platform::in_memory(config),
        StoreBackend::Mongo => {
            let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
            Platform::with_mongo(&client, config).await?
        }
    };

    if let Some(ref id) = args.bootstrap_superuser {
        let principal = platform
            .registry
            .register(Principal::new(id.as_str(), Role::Superuser, "Bootstrap superuser"))
            .await?;
        warn!(principal = %principal.id, role = %principal.role, "Bootstrap principal registered (dev mode)");
    }

    match args.command() {
        Command::PurgeRejected { actor } => {
            let removed = platform.service.purge_rejected(&actor.into()).await?;
            info!("Purged {} rejected request(s)", removed);
            platform.shutdown().await;
        }
        Command::CleanupNotifications => {
            let removed = platform.dispatcher.cleanup_expired().await?;
            info!("Removed {} expired notification(s)", removed);
            platform.shutdown().await;
        }
        Command::Serve => {
            if args.nats.nats_enabled {
                let name = format!("concierge-{}", args.node_id);
                match NatsClient::new(&args.nats, &name).await {
                    Ok(client) => {
                        platform.attach_bridge(client).await?;
                        info!("NATS bridge started");
                    }
                    Err(e) => {
                        if args.dev_mode {
                            warn!("NATS connection failed (dev mode, continuing without): {}", e);
                        } else {
                            error!("NATS connection failed: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
            }

            info!("Concierge running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
            platform.shutdown().await;
        }
    }

    Ok(())
}
