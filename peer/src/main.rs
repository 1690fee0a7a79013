use clap::Parser;
use log::{info, warn};
use peer::identity::Identity;
use peer::judge::Judge;
use peer::mesh::{Mesh, MeshEvent};
use peer::session::{Command, Event, Outbound, Session};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Command line arguments.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Nickname shown to other players
    #[clap(short, long, default_value = "")]
    nickname: String,
    /// Address to listen on for inbound peers
    #[clap(short, long, default_value = "127.0.0.1:0")]
    listen: String,
    /// Peer addresses to dial on startup (repeatable)
    #[clap(short, long)]
    connect: Vec<String>,
    /// Round length in seconds
    #[clap(long, default_value = "60")]
    round_time: u32,
    /// Number of rounds per game
    #[clap(long, default_value = "5")]
    max_rounds: u32,
    /// Optional remote judge endpoint for semantic guess scoring
    #[clap(long)]
    judge: Option<String>,
}

/// Parses command-line arguments, wires the mesh to the session and runs
/// the single event loop until the process exits.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let args = Args::parse();

    let identity = Identity::generate();
    info!("Local peer id: {}", identity.id());

    let (mesh_tx, mut mesh_rx) = mpsc::unbounded_channel::<MeshEvent>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let mesh = Mesh::new(identity.public_key_hex().to_string(), mesh_tx);
    let addr = mesh.listen(&args.listen).await?;
    info!("Share this address with other players: {}", addr);
    for addr in &args.connect {
        if let Err(e) = mesh.connect(addr).await {
            warn!("Could not reach {}: {}", addr, e);
        }
    }

    // Pump queued outbound messages onto the wire.
    {
        let mesh = mesh.clone();
        tokio::spawn(async move {
            while let Some(outbound) = out_rx.recv().await {
                match outbound {
                    Outbound::Broadcast(message) => mesh.broadcast(&message.encode()).await,
                    Outbound::Send { to, message } => mesh.send_to(&to, &message.encode()).await,
                }
            }
        });
    }

    // Funnel mesh events into the session's event stream.
    {
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = mesh_rx.recv().await {
                if event_tx.send(Event::Mesh(event)).is_err() {
                    break;
                }
            }
        });
    }

    // Read player commands from stdin.
    {
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_command(&line) {
                    Some(command) => {
                        if event_tx.send(Event::Command(command)).is_err() {
                            break;
                        }
                    }
                    None if line.trim() == "quit" => std::process::exit(0),
                    None => {
                        println!(
                            "commands: start | guess <word> | vote agree|disagree | skip | again | quit"
                        );
                    }
                }
            }
        });
    }

    let nickname = if args.nickname.is_empty() {
        format!("player-{}", identity.id())
    } else {
        args.nickname
    };
    let judge = Judge::new(args.judge);
    let mut session = Session::new(
        identity.id().clone(),
        nickname,
        args.round_time,
        args.max_rounds,
        judge,
        out_tx,
        event_tx,
    );
    session.announce();

    while let Some(event) = event_rx.recv().await {
        session.handle_event(event).await;
    }

    Ok(())
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(' ') {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    match verb {
        "start" => Some(Command::Start),
        "guess" if !rest.is_empty() => Some(Command::Guess(rest.to_string())),
        "vote" => match rest {
            "agree" => Some(Command::Vote(true)),
            "disagree" => Some(Command::Vote(false)),
            _ => None,
        },
        "skip" => Some(Command::Skip),
        "again" => Some(Command::PlayAgain),
        _ => None,
    }
}
