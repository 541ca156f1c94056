use clap::Parser;
use client::cache::DataCache;
use client::chat::ConsoleChat;
use client::config::Config;
use client::network::MultiworldClient;
use client::queue::{BroadcastMessage, MessageQueue};
use log::{error, info};
use shared::ItemImportance;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Coordination server host (overrides the config file)
    #[arg(long)]
    server: Option<String>,

    /// Coordination server port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Player slot name to join as (overrides the config file)
    #[arg(long)]
    slot: Option<String>,

    /// Deliver sample events instead of connecting to a server
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(server) = args.server {
        config.multiworld.world.server = server;
    }
    if let Some(port) = args.port {
        config.multiworld.world.port = port;
    }
    if let Some(slot) = args.slot {
        config.multiworld.world.slot = slot;
    }
    info!("loaded configuration");

    let mut cache = DataCache::new(&config.multiworld.cache.filepath);
    cache.load()?;

    let queue = MessageQueue::new();
    let chat = ConsoleChat::new(config.chat.display_mode);
    queue
        .register_listener(move |message| chat.deliver(message))
        .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flush_handle = tokio::spawn(queue.clone().run(shutdown_rx.clone()));

    if args.demo {
        info!("delivering sample events");
        for message in demo_messages() {
            queue.enqueue(message).await;
        }
        while !queue.is_empty().await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let _ = shutdown_tx.send(true);
        let _ = flush_handle.await;
        return Ok(());
    }

    info!(
        "starting multiworld connection to {}:{}",
        config.multiworld.world.server, config.multiworld.world.port
    );
    let relay = MultiworldClient::new(&config.multiworld, cache, queue.clone())?;
    let mut client_handle = relay.start(shutdown_rx.clone());

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(true);
            match (&mut client_handle).await {
                Ok(result) => result,
                Err(e) => {
                    error!("client task panicked: {e}");
                    Ok(())
                }
            }
        }
        joined = &mut client_handle => match joined {
            Ok(result) => result,
            Err(e) => {
                error!("client task panicked: {e}");
                Ok(())
            }
        },
    };

    let _ = shutdown_tx.send(true);
    let _ = flush_handle.await;

    if let Err(e) = result {
        error!("relay terminated: {e}");
        return Err(e.into());
    }

    Ok(())
}

/// Sample events for exercising the delivery path without a server.
fn demo_messages() -> Vec<BroadcastMessage> {
    vec![
        BroadcastMessage {
            sender: "Civil".to_string(),
            receiver: "Tea".to_string(),
            item: "A bag full of math rocks".to_string(),
            location: "Under the couch".to_string(),
            importance: ItemImportance::Normal,
        },
        BroadcastMessage {
            sender: "Tea".to_string(),
            receiver: "Nintendale".to_string(),
            item: "Way too many checks".to_string(),
            location: "Somewhere in Canada".to_string(),
            importance: ItemImportance::Progression,
        },
        BroadcastMessage {
            sender: "Salty".to_string(),
            receiver: "EOG".to_string(),
            item: "Turkey sandwich".to_string(),
            location: "The kitchen".to_string(),
            importance: ItemImportance::Helpful,
        },
        BroadcastMessage {
            sender: "Iruga".to_string(),
            receiver: "Iruga".to_string(),
            item: "A backflip into the void".to_string(),
            location: "The Navel".to_string(),
            importance: ItemImportance::Trap,
        },
    ]
}
