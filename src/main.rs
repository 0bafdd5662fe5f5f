use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use calsync::config::ClusterConfig;
use calsync::net::Listener;
use calsync::node::Node;
use calsync::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "calsync")]
#[command(version)]
#[command(about = "A replicated scheduling calendar with Paxos consensus")]
struct Args {
    /// Node id (must match an entry in the cluster file)
    #[arg(long)]
    node_id: u64,

    /// Path to the cluster configuration file (JSON)
    #[arg(long, default_value = "cluster.json")]
    config: PathBuf,

    /// Directory for persisted log and calendar state
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = ClusterConfig::from_file(&args.config)?;
    config.node_id = args.node_id;
    config.data_dir = args.data_dir;
    config.validate()?;

    let node = Arc::new(Node::new(config)?);
    let listener = Listener::bind(node.listen_addr()?).await?;
    let addr = listener.local_addr()?;
    tracing::info!(node_id = node.node_id(), %addr, "Listening for peers");

    let shutdown = install_shutdown_handler();
    {
        let node = node.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            listener.run(node, shutdown).await;
        });
    }

    // Pick up records that may have been committed while this node was down.
    node.sync_missing_events().await;

    println!("Ready. Commands: add <name> <day> <start> <end> <participants...> | delete <id> | view [participant] | list [participant] | sync | exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(input)) => {
                        if !handle_command(&node, input.trim()).await {
                            break;
                        }
                    }
                    Ok(None) => break, // stdin closed
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read command");
                        break;
                    }
                }
            }
        }
    }

    println!("Ending the program");
    node.close().await;
    shutdown.cancel();
    println!("Program ended");
    Ok(())
}

/// Returns `false` when the loop should exit.
async fn handle_command(node: &Arc<Node>, input: &str) -> bool {
    let mut words = input.split_whitespace();
    let Some(operation) = words.next() else {
        return true;
    };
    let rest: Vec<&str> = words.collect();

    match operation {
        "add" => handle_add(node, &rest).await,
        "delete" => handle_delete(node, &rest).await,
        "view" => handle_view(node, &rest).await,
        "list" => handle_list(node, &rest).await,
        "sync" => node.sync_missing_events().await,
        "exit" => return false,
        _ => println!("Unknown command: {}", operation),
    }
    true
}

async fn handle_add(node: &Arc<Node>, args: &[&str]) {
    if args.len() < 5 {
        println!("Usage: add <name> <day> <start> <end> <participant> [participant...]");
        return;
    }
    let name = args[0];
    let (Ok(day), Ok(start), Ok(end)) = (args[1].parse(), args[2].parse(), args[3].parse()) else {
        println!("Day, start, and end must be integers");
        return;
    };
    let mut participants = Vec::new();
    for word in &args[4..] {
        match word.parse() {
            Ok(p) => participants.push(p),
            Err(_) => {
                println!("Invalid participant id: {}", word);
                return;
            }
        }
    }

    if node.add_appointment(name, day, start, end, participants).await {
        println!("Appointment added");
    } else {
        println!("Could not add appointment (conflict or no quorum)");
    }
}

async fn handle_delete(node: &Arc<Node>, args: &[&str]) {
    let Some(id) = args.first() else {
        println!("Usage: delete <appointment-id>");
        return;
    };
    if node.delete_appointment(id).await {
        println!("Appointment deleted");
    } else {
        println!("Could not delete appointment {}", id);
    }
}

async fn handle_view(node: &Arc<Node>, args: &[&str]) {
    match parse_participant(args) {
        Ok(Some(p)) => print!("{}", node.calendar_by_slot(p).await),
        Ok(None) => {
            for p in 0..node_count(node) {
                print!("{}", node.calendar_by_slot(p).await);
            }
        }
        Err(word) => println!("Invalid participant id: {}", word),
    }
}

async fn handle_list(node: &Arc<Node>, args: &[&str]) {
    match parse_participant(args) {
        Ok(Some(p)) => print!("{}", node.calendar_appointments(p).await),
        Ok(None) => {
            for p in 0..node_count(node) {
                print!("{}", node.calendar_appointments(p).await);
            }
        }
        Err(word) => println!("Invalid participant id: {}", word),
    }
}

fn parse_participant<'a>(args: &[&'a str]) -> Result<Option<u64>, &'a str> {
    match args.first() {
        None => Ok(None),
        Some(word) => word.parse().map(Some).map_err(|_| *word),
    }
}

fn node_count(node: &Arc<Node>) -> u64 {
    node.cluster_size() as u64
}
