use std::{sync::Arc, time::Duration};

use clap::Parser;
use crossbeam_channel::bounded;
use linkcable_netplay::{ClientConfig, NetplayClient, NoopObserver};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Relay probe
#[derive(Parser, Debug)]
#[command(name = "linkcable-probe")]
#[command(about = "Connect to a linkcable relay and print its rooms and cores", long_about = None)]
struct Args {
    #[command(flatten)]
    client: ClientConfig,

    /// Only list cores of this room
    #[arg(long)]
    room: Option<u32>,

    /// Seconds to wait for each listing
    #[arg(long, default_value_t = 5)]
    wait_secs: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(short, long, default_value = "warn")]
    log_level: Level,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let wait = Duration::from_secs(args.wait_secs.max(1));
    let client = NetplayClient::new(args.client.clone(), Arc::new(NoopObserver));
    client.connect_configured()?;
    info!(host = %args.client.host, port = args.client.port, "probing relay");

    let room_ids = match args.room {
        Some(room) => vec![room],
        None => {
            let (tx, rx) = bounded(1);
            client.list_rooms(move |rooms| {
                let _ = tx.send(rooms.to_vec());
            })?;
            let rooms = rx.recv_timeout(wait)?;
            println!("{} room(s)", rooms.len());
            for room in &rooms {
                println!(
                    "  room {:>6}  {}/{} cores  flags {:#x}",
                    room.room_id, room.n_cores, room.capacity, room.flags
                );
            }
            rooms.iter().map(|room| room.room_id).collect()
        }
    };

    for room_id in room_ids {
        let (tx, rx) = bounded(1);
        client.list_cores(room_id, move |cores| {
            let _ = tx.send(cores.to_vec());
        })?;
        let cores = rx.recv_timeout(wait)?;
        println!("room {room_id}: {} core(s)", cores.len());
        for core in &cores {
            println!(
                "  core {:>6}  platform {}  {:<16} {:<12} crc32 {:08x}",
                core.core_id,
                core.platform,
                core.game_title(),
                core.game_code(),
                core.crc32
            );
        }
    }

    client.disconnect()?;
    Ok(())
}
