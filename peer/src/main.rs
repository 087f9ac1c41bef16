use clap::Parser;
use log::{info, warn};
use peer::client::LogView;
use peer::node::{NodeConfig, PeerNode};
use shared::Direction;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host a new game and listen on this address (e.g. 127.0.0.1:7000)
    #[arg(long)]
    listen: Option<String>,

    /// Join the game hosted at this address
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Board side length (hosting only)
    #[arg(long, default_value = "10")]
    board_size: u32,

    /// Number of treasures to scatter (hosting only)
    #[arg(long, default_value = "10")]
    treasures: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let node = match (args.listen, args.connect) {
        (Some(listen), None) => {
            let config = NodeConfig {
                listen,
                board_size: args.board_size,
                treasure_count: args.treasures,
                ..NodeConfig::default()
            };
            info!("Hosting on {}", config.listen);
            PeerNode::host(config, Box::new(LogView)).await?
        }
        (None, Some(addr)) => {
            info!("Joining game at {addr}");
            PeerNode::join(NodeConfig::default(), addr, Box::new(LogView)).await?
        }
        _ => {
            return Err("pass exactly one of --listen or --connect".into());
        }
    };

    info!("Controls: type n/s/e/w to move, h to hold, then Enter");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(direction) = parse_intent(&line) else {
                    if !line.trim().is_empty() {
                        warn!("unknown command {line:?}; use n/s/e/w/h");
                    }
                    continue;
                };
                match node.submit_move(direction).await {
                    Ok(reply) if reply.illegal => info!("move rejected"),
                    Ok(_) => {}
                    Err(e) => warn!("move failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    node.shutdown().await;
    Ok(())
}

fn parse_intent(line: &str) -> Option<Direction> {
    match line.trim() {
        "n" | "N" => Some(Direction::North),
        "s" | "S" => Some(Direction::South),
        "e" | "E" => Some(Direction::East),
        "w" | "W" => Some(Direction::West),
        "h" | "H" => Some(Direction::Hold),
        _ => None,
    }
}
