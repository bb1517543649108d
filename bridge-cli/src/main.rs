use std::sync::Arc;

use anyhow::{Context, Result};
use bridge_core::{BotFactory, Nexus, NexusConfig, Platform, ReadyCallback, SurrogateBot};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Relays messages and presence between a Euphoria room and an Instant
/// room, each behind per-user surrogate impersonator bots.
#[derive(Parser, Debug)]
#[command(name = "euphoria-instant-bridge", version)]
struct Args {
    /// Euphoria room name (no leading `&`).
    #[arg(long, env = "BRIDGE_EUPHORIA_ROOM")]
    euphoria_room: String,

    /// Instant room name.
    #[arg(long, env = "BRIDGE_INSTANT_ROOM")]
    instant_room: String,

    /// Euphoria base URL; the room socket is `{base}/room/{room}/ws`.
    #[arg(long, env = "BRIDGE_EUPHORIA_BASE", default_value = "wss://euphoria.leet.nu")]
    euphoria_base: String,

    /// Instant room URL template, with `{}` standing in for the room name.
    #[arg(long, env = "INSTANT_ROOM_TEMPLATE", default_value = "wss://instant.leet.nu/room/{}/ws")]
    instant_room_template: String,

    /// Nickname the bridge's own two bots present as.
    #[arg(long, env = "BRIDGE_NICKNAME", default_value = "bridge")]
    nickname: String,

    /// Path to the SQLite id-map database; omit to keep state in memory.
    #[arg(long, env = "BRIDGE_DB")]
    db: Option<String>,

    /// Log level passed to the default `tracing` filter.
    #[arg(long, env = "BRIDGE_LOGLEVEL", default_value = "info")]
    loglevel: String,
}

/// Routes surrogate creation to the platform-specific factory, per spec
/// §4.4: `Nexus` holds a single `BotFactory`, but a surrogate's platform
/// determines which concrete adapter actually builds it.
struct CombinedBotFactory {
    euphoria: bridge_euphoria::EuphoriaBotFactory,
    instant: bridge_instant::InstantBotFactory,
}

impl BotFactory for CombinedBotFactory {
    fn make_bot(&self, platform: Platform, identity: &str, on_ready: ReadyCallback) -> Arc<dyn SurrogateBot> {
        match platform {
            Platform::Euphoria => self.euphoria.make_bot(platform, identity, on_ready),
            Platform::Instant => self.instant.make_bot(platform, identity, on_ready),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.loglevel).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let euphoria_room_url = bridge_euphoria::room_url(&args.euphoria_base, &args.euphoria_room);
    let instant_room_url = bridge_instant::room_url(&args.instant_room_template, &args.instant_room);

    let config = NexusConfig {
        db_path: args.db.clone(),
        euphoria_room: args.euphoria_room.clone(),
        instant_room: args.instant_room.clone(),
        ..NexusConfig::default()
    };

    // `Nexus::new` opens the id map and starts the scheduler but attaches
    // nothing else; the bot factory and endpoints are wired in afterward
    // since they each need this `Arc<Nexus>` themselves.
    let nexus = Nexus::new(config)?;
    nexus.start().context("nexus startup")?;

    nexus.set_bot_factory(Arc::new(CombinedBotFactory {
        euphoria: bridge_euphoria::EuphoriaBotFactory::new(euphoria_room_url.clone(), nexus.clone()),
        instant: bridge_instant::InstantBotFactory::new(instant_room_url.clone(), nexus.clone()),
    }));

    let on_ready: ReadyCallback = Arc::new(|| tracing::info!("bridge bot connected"));

    let euphoria_nexus = nexus.clone();
    let euphoria_bot = bridge_euphoria::EuphoriaBridgeEndpoint::connect(
        euphoria_room_url,
        args.euphoria_room.clone(),
        &args.nickname,
        on_ready.clone(),
        move |event| bridge_euphoria::relay::forward_event(&euphoria_nexus, event),
    );

    let instant_nexus = nexus.clone();
    let instant_bot = bridge_instant::InstantBridgeEndpoint::connect(
        instant_room_url,
        args.instant_room.clone(),
        &args.nickname,
        on_ready,
        move |conn, event| {
            bridge_instant::relay::forward_event(&instant_nexus, event, move |text| conn.send_raw(text));
        },
    );

    nexus.set_endpoints(euphoria_bot.clone(), instant_bot);
    nexus.set_log_source(euphoria_bot);

    tracing::info!(euphoria_room = %args.euphoria_room, instant_room = %args.instant_room, "bridge running");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    nexus.shutdown();
    tokio::task::spawn_blocking(move || nexus.join()).await?;
    Ok(())
}
