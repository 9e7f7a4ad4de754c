mod display;

use std::time::Duration;

use browser::{RegistryConfig, ServerFilter, ServerRegistry};
use clap::Parser;
use log::info;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Master server to query, as host:port (may be given multiple times)
    #[arg(short = 'm', long = "master")]
    masters: Vec<String>,

    /// Seconds between master list updates
    #[arg(long, default_value = "60")]
    update_interval: u64,

    /// Seconds between server status polls
    #[arg(long, default_value = "1")]
    poll_interval: u64,

    /// Also list servers that failed their last poll
    #[arg(long)]
    show_unresponsive: bool,

    /// Hide servers with an average ping above this many milliseconds
    #[arg(long)]
    max_ping: Option<u64>,

    /// Hide servers with fewer connected players
    #[arg(long, default_value = "0")]
    min_players: u32,

    /// Hide servers with fewer players on a team
    #[arg(long, default_value = "0")]
    min_playing: u32,

    /// Show at most this many servers
    #[arg(short = 'n', long)]
    max_servers: Option<usize>,

    /// Keep re-printing the table every this many seconds
    #[arg(short = 'w', long)]
    watch: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = RegistryConfig::default();
    if !args.masters.is_empty() {
        config.masters = args
            .masters
            .iter()
            .map(|master| parse_endpoint(master))
            .collect::<Result<_, _>>()?;
    }
    config.master_interval = Duration::from_secs(args.update_interval);
    config.poll_interval = Duration::from_secs(args.poll_interval);

    for (host, port) in &config.masters {
        info!("Using master server {}:{}", host, port);
    }

    let registry = ServerRegistry::new(config)?;

    let filter = ServerFilter {
        only_responsive: !args.show_unresponsive,
        max_servers: args.max_servers,
        max_ping: args.max_ping.map(Duration::from_millis),
        min_players: args.min_players,
        min_playing: args.min_playing,
    };

    match args.watch {
        None => {
            report(&registry, &filter).await;

            if registry.is_empty().await {
                return Err("no game servers discovered from any master".into());
            }
        }
        Some(seconds) => {
            let mut ticker = interval(Duration::from_secs(seconds.max(1)));
            loop {
                ticker.tick().await;
                report(&registry, &filter).await;
            }
        }
    }

    Ok(())
}

async fn report(registry: &ServerRegistry, filter: &ServerFilter) {
    let servers = registry.filter(filter).await;
    let online = registry.online().await;
    let max_playing = registry.max_playing().await;

    if servers.is_empty() {
        println!("No servers matched.");
    } else {
        println!("{}", display::format_table(&servers));
    }

    match max_playing {
        Some(playing) if online => {
            println!("online; busiest server has {} playing", playing);
        }
        _ => println!("offline"),
    }
}

fn parse_endpoint(master: &str) -> Result<(String, u16), Box<dyn std::error::Error>> {
    match master.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| format!("bad master port in {:?}", master))?;
            Ok((host.to_string(), port))
        }
        None => Ok((master.to_string(), 27950)),
    }
}
