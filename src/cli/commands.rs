use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "meshchain")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(name = "startnode", about = "Start a full node with a console on stdin")]
    StartNode {
        #[arg(long, help = "TOML settings file")]
        config: Option<PathBuf>,
        #[arg(long, help = "Address to listen on, overrides the settings file")]
        listen: Option<SocketAddr>,
        #[arg(long = "peer", help = "Bootstrap peer, may be repeated")]
        peers: Vec<SocketAddr>,
        #[arg(long, help = "Enable mining and send rewards to ADDRESS")]
        miner: Option<String>,
        #[arg(long = "data-dir", help = "Directory holding the chain databases")]
        data_dir: Option<String>,
    },
    #[command(name = "chat", about = "Join the mesh and gossip stdin lines")]
    Chat {
        #[arg(long, help = "Address to listen on")]
        listen: Option<SocketAddr>,
        #[arg(long = "peer", help = "Bootstrap peer, may be repeated")]
        peers: Vec<SocketAddr>,
    },
    #[command(name = "printchain", about = "Print the stored chain from the tip")]
    Printchain {
        #[arg(long = "data-dir", help = "Directory holding the chain databases")]
        data_dir: Option<String>,
        #[arg(long, default_value_t = 12345, help = "Listen port of the node that owns the chain")]
        port: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startnode_collects_repeated_peers() {
        let opt = Opt::try_parse_from([
            "meshchain",
            "startnode",
            "--listen",
            "127.0.0.1:3000",
            "--peer",
            "127.0.0.1:3001",
            "--peer",
            "127.0.0.1:3002",
        ])
        .unwrap();

        match opt.command {
            Command::StartNode {
                listen,
                peers,
                miner,
                ..
            } => {
                assert_eq!(listen, Some("127.0.0.1:3000".parse().unwrap()));
                assert_eq!(peers.len(), 2);
                assert!(miner.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_printchain_defaults_port() {
        let opt = Opt::try_parse_from(["meshchain", "printchain"]).unwrap();
        assert!(matches!(
            opt.command,
            Command::Printchain { port: 12345, data_dir: None }
        ));
    }
}
