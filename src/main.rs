// This is my main entry point for the meshchain node binary
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, info, LevelFilter};
use meshchain::config::{parse_socket_addr, DEFAULT_LISTEN_ADDR};
use meshchain::utils::spawn_periodic;
use meshchain::{
    Address, ChainStore, Command, ConsensusParams, Gossip, Messaging, NodeHandle, NodeIdentity,
    NodeSettings, Opt, PeerNetwork, Server, ShutdownToken, UdpTransport, Wallets, GLOBAL_CONFIG,
};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Gossip kind for the chat command
const CHAT: &str = "chat";

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    // I log at Info by default; RUST_LOG still wins when it's set
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

// Each command gets its own small function so I can read them separately
fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::Createwallet => {
            let mut wallets = Wallets::new();
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::ListAddresses => {
            let wallets = Wallets::new();
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::StartNode {
            config,
            listen,
            peers,
            miner,
            data_dir,
        } => start_node(config, listen, peers, miner, data_dir)?,
        Command::Chat { listen, peers } => chat(listen, peers)?,
        Command::Printchain { data_dir, port } => print_chain(data_dir, port)?,
    }
    Ok(())
}

fn start_node(
    config: Option<PathBuf>,
    listen: Option<SocketAddr>,
    peers: Vec<SocketAddr>,
    miner: Option<String>,
    data_dir: Option<String>,
) -> CliResult<()> {
    // Settings file first, then my command-line flags on top
    let mut settings = match config {
        Some(path) => NodeSettings::load(path)?,
        None => NodeSettings::default(),
    };
    if let Some(listen) = listen {
        settings.listen = listen.to_string();
    }
    settings
        .bootstrap
        .extend(peers.iter().map(SocketAddr::to_string));
    if let Some(dir) = data_dir {
        GLOBAL_CONFIG.set_data_dir(dir);
    }

    let miner = match miner {
        Some(miner) => {
            let address = miner.parse::<Address>()?;
            println!("Mining is on. Address to receive rewards: {address}");
            Some(address)
        }
        None => None,
    };

    // Each node gets its own database so several can share a machine
    let port = settings.listen_addr()?.port();
    let store = ChainStore::open(GLOBAL_CONFIG.node_db_path(port), settings.consensus())?;
    let node = Server::start(settings, Arc::new(store), miner)?;

    run_console(&node)?;
    node.shutdown();
    Ok(())
}

fn run_console(node: &NodeHandle) -> CliResult<()> {
    println!("Node {} on {}", node.identity().id, node.local_addr());
    println!("Commands: peers | tip | balance <addr> | send <from> <to> <amount> | quit");
    prompt()?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["quit"] | ["exit"] => break,
            ["peers"] => {
                let peers = node.peers();
                println!("{} peers", peers.len());
                for peer in peers {
                    println!("  {} at {}", peer.identity.id, peer.identity.address);
                }
            }
            ["tip"] => match node.tip() {
                Some(tip) => println!("Block {} #{}", tip.hash_hex(), tip.number),
                None => println!("No blocks yet"),
            },
            ["balance", address] => match address.parse::<Address>() {
                Ok(address) => println!(
                    "Balance of {address}: {} (nonce {})",
                    node.balance(&address)?,
                    node.nonce(&address)?
                ),
                Err(e) => println!("{e}"),
            },
            ["send", from, to, amount] => match send(node, from, to, amount) {
                Ok(id) => println!("Sent {id}"),
                Err(e) => println!("{e}"),
            },
            _ => println!("Unknown command: {line}"),
        }
        prompt()?;
    }
    Ok(())
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

// When I send from the console, the key has to be in my local wallet file
fn send(node: &NodeHandle, from: &str, to: &str, amount: &str) -> CliResult<String> {
    let amount: u64 = amount.parse()?;
    if amount == 0 {
        return Err("Amount must be positive".into());
    }
    let receiver = to.parse::<Address>()?;
    let wallets = Wallets::new();
    let wallet = wallets
        .get_wallet(from)
        .ok_or_else(|| format!("No wallet for {from}"))?;
    let tx = node.transfer(wallet, receiver, amount)?;
    Ok(tx.id())
}

// Chat only needs the mesh: peering and gossip, no chain
fn chat(listen: Option<SocketAddr>, peers: Vec<SocketAddr>) -> CliResult<()> {
    let settings = NodeSettings::default();
    let addr = match listen {
        Some(addr) => addr,
        None => parse_socket_addr(DEFAULT_LISTEN_ADDR)?,
    };

    let transport = Arc::new(UdpTransport::bind(addr)?);
    let messaging = Messaging::new(transport.clone());
    let identity = NodeIdentity::generate(messaging.local_addr())?;
    let peering = PeerNetwork::new(Arc::clone(&messaging), identity, settings.peering());
    let gossip = Gossip::new(Arc::clone(&peering), settings.gossip());
    gossip.subscribe(CHAT, |message| {
        let from = message.payload["from"].as_str().unwrap_or("?");
        let text = message.payload["text"].as_str().unwrap_or_default();
        info!("[{from}] {text}");
    });

    let token = ShutdownToken::new();
    let mut threads = vec![
        transport.spawn_receiver(messaging, token.clone())?,
        peering.start(token.clone())?,
        gossip.start(token.clone())?,
    ];
    // I report the peer count now and then so I can tell the mesh is alive
    let status = Arc::clone(&peering);
    threads.push(spawn_periodic(
        "chat-status",
        Duration::from_secs(30),
        token.clone(),
        move || info!("{} peers", status.peer_count()),
    )?);

    for peer in peers {
        peering.announce_to(peer);
    }
    println!("Chatting as {} on {}", peering.identity().id, addr);

    // Lines that repeat would hash to the same gossip id, so each carries a sequence number
    let seq = AtomicU64::new(0);
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let payload = json!({
            "from": peering.identity().id,
            "seq": seq.fetch_add(1, Ordering::Relaxed),
            "text": line,
        });
        gossip.publish(CHAT, payload)?;
    }

    token.shutdown();
    for handle in threads {
        if handle.join().is_err() {
            error!("A chat thread panicked during shutdown");
        }
    }
    Ok(())
}

fn print_chain(data_dir: Option<String>, port: u16) -> CliResult<()> {
    if let Some(dir) = data_dir {
        GLOBAL_CONFIG.set_data_dir(dir);
    }
    let store = ChainStore::open(GLOBAL_CONFIG.node_db_path(port), ConsensusParams::default())?;

    // The iterator walks from the tip back to the first block
    for block in store.iter() {
        let block = block?;
        println!("Block #{} {}", block.get_number(), block.hash_hex());
        println!("Pre block hash: {}", HEXLOWER.encode(block.get_previous_hash()));
        println!("Miner: {}", block.get_miner());
        println!("Difficulty: {} Nonce: {}", block.get_difficulty(), block.get_nonce());
        for tx in block.get_transactions() {
            println!(
                "- Transaction {}: {} -> {} amount {} nonce {}",
                tx.id(),
                tx.get_sender(),
                tx.get_receiver(),
                tx.get_amount(),
                tx.get_nonce()
            );
        }
        println!()
    }
    Ok(())
}
