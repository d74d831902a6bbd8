//! WebSocket chat room bridged through the event bus.
//!
//! Demonstrates:
//! - Binding a WebSocketServer and rejecting unknown paths
//! - Addressing sockets from other contexts through their text handler ids
//! - Publishing to every member of a room
//! - Request/reply between a socket and a bus service
//!
//! Usage:
//!   cargo run --example echo_bridge
//!   cargo run --example echo_bridge -- --no-wait
//!   cargo run --example echo_bridge -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use reactive_transport::transport::{DEFAULT_BIND_IP, connect};
use reactive_transport::{EventBus, HandlerId, Result, WebSocketOptions, WebSocketServer};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const ROOM_ADDRESS: &str = "room.broadcast";
const STATS_ADDRESS: &str = "room.stats";

// ============================================================================
// Args
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    no_wait: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            no_wait: args.iter().any(|a| a == "--no-wait"),
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "reactive_transport=debug"
    } else {
        "reactive_transport=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Echo Bridge ===\n");

    let bus = EventBus::new();
    let members: Arc<Mutex<Vec<HandlerId>>> = Arc::default();

    // ========================================================================
    // Room Services
    // ========================================================================

    println!("[1] Registering room services...");

    let room_members = Arc::clone(&members);
    let room_bus = bus.clone();
    bus.consumer_with_handler(ROOM_ADDRESS, move |msg| {
        let text = msg.body().to_string();
        for member in room_members.lock().iter() {
            if room_bus.send(member.as_str(), text.clone()).is_err() {
                tracing::debug!(%member, "Member left before delivery");
            }
        }
    });

    let stats_members = Arc::clone(&members);
    bus.consumer_with_handler(STATS_ADDRESS, move |msg| {
        msg.reply(stats_members.lock().len() as i64);
    });

    println!("    ✓ {ROOM_ADDRESS} and {STATS_ADDRESS} ready\n");

    // ========================================================================
    // Server
    // ========================================================================

    println!("[2] Binding WebSocket server...");

    let server_bus = bus.clone();
    let server_members = Arc::clone(&members);
    let server = WebSocketServer::bind(DEFAULT_BIND_IP, 0, &bus, move |ws| {
        if ws.path() != "/room" {
            let _ = ws.reject();
            return;
        }

        let id = ws.text_handler_id().clone();
        server_members.lock().push(id.clone());

        let leaving = Arc::clone(&server_members);
        ws.close_handler(move || leaving.lock().retain(|m| m != &id));

        let bus = server_bus.clone();
        ws.message_handler(move |msg| {
            if msg.is_text() {
                let _ = bus.publish(ROOM_ADDRESS, msg.text_data());
            }
        });
    })
    .await?;

    println!("    ✓ Listening on {}/room\n", server.ws_url());

    // ========================================================================
    // Clients
    // ========================================================================

    println!("[3] Connecting two clients...");

    let url = format!("{}/room", server.ws_url());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut clients = Vec::new();
    for name in ["alice", "bob"] {
        let tx = tx.clone();
        let client = connect(&url, &bus, &WebSocketOptions::new(), move |ws| {
            ws.message_handler(move |msg| {
                let _ = tx.send(format!("{name} <- {}", msg.text_data()));
            });
        })
        .await?;
        clients.push(client);
    }

    let stats = bus.request(STATS_ADDRESS, ()).await?;
    println!("    ✓ Room has {} member(s)\n", stats.body());

    // ========================================================================
    // Broadcast
    // ========================================================================

    println!("[4] alice says hello...");

    clients[0].write_text_message("hello room")?;
    for _ in 0..2 {
        if let Some(line) = rx.recv().await {
            println!("    {line}");
        }
    }
    println!();

    // ========================================================================
    // Done
    // ========================================================================

    if args.no_wait {
        println!("[--no-wait] Skipping wait");
    } else {
        println!("Press Ctrl+C to exit...");
        let _ = tokio::signal::ctrl_c().await;
    }

    for client in &clients {
        client.close();
    }
    server.close();
    bus.close();

    println!("\n=== Done ===");
    Ok(())
}
