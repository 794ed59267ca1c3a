//! `demo-node`: the CLI surface and node facade (C12) tying every library
//! crate together (spec.md §6).
//!
//! Grounded on `labs/28-web-server-axum`'s `tracing`/`tracing-subscriber`
//! init and `labs/31-key-value-store`'s config-file-plus-flags CLI shape,
//! generalized to `clap`'s derive API for the larger subcommand surface
//! this node needs.

use clap::{Parser, Subcommand};
use demo_node::config::{FileConfig, ResolvedConfig};
use demo_node::error::{self, NodeResult};
use demo_node::{admin, node, pidfile, remote};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "demo-node", about = "A peer-to-peer cryptocurrency node")]
struct Cli {
    /// Directory holding the stores, config.json, and lock files.
    #[arg(long, global = true, default_value = "data")]
    datadir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a genesis block and set the chain tip.
    CreateBlockChain {
        #[arg(long)]
        address: String,
        #[arg(long)]
        genesis: String,
    },
    /// Bootstrap a fresh data directory from a running peer via `getfblocks`.
    InitBlockChain {
        #[arg(long, default_value = "127.0.0.1")]
        nodehost: String,
        #[arg(long, default_value_t = 7000)]
        nodeport: u16,
    },
    /// Run the gossip server and block builder in the foreground.
    StartNode {
        #[arg(long)]
        minter: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Same runtime behavior as `startnode`, without writing a PID file —
    /// intended for test harnesses that already track the child process.
    StartIntNode {
        #[arg(long)]
        minter: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Signal a node running for this data directory to shut down.
    StopNode,
    /// Report whether a node is running for this data directory.
    NodeState,
    /// Print the main chain from tip to genesis.
    PrintChain {
        #[arg(long, default_value = "short")]
        view: String,
    },
    /// Mine one candidate block from the current mempool.
    MakeBlock,
    /// Remove the current chain tip.
    DropBlock,
    /// Rebuild the tx-index, tx-spent, and utxo buckets from genesis.
    ReindexUnspent,
    /// Request, sign, and submit a value transfer via a running node.
    Send {
        #[arg(long)]
        from: String,
        /// Hex-encoded raw P-256 scalar for `from`'s private key. Key
        /// generation and storage are a wallet concern outside this node's
        /// scope; the caller supplies the key material directly.
        #[arg(long)]
        privkey: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: f64,
        #[arg(long, default_value = "127.0.0.1")]
        nodehost: String,
        #[arg(long, default_value_t = 7000)]
        nodeport: u16,
    },
    /// Sum of an address's unspent outputs, via a running node.
    GetBalance {
        #[arg(long)]
        address: String,
        #[arg(long, default_value = "127.0.0.1")]
        nodehost: String,
        #[arg(long, default_value_t = 7000)]
        nodeport: u16,
    },
    /// Incoming/outgoing history for an address, via a running node.
    AddrHistory {
        #[arg(long)]
        address: String,
        #[arg(long, default_value = "127.0.0.1")]
        nodehost: String,
        #[arg(long, default_value_t = 7000)]
        nodeport: u16,
    },
    /// An address's unspent outputs, via a running node.
    ShowUnspent {
        #[arg(long)]
        address: String,
        #[arg(long, default_value = "127.0.0.1")]
        nodehost: String,
        #[arg(long, default_value_t = 7000)]
        nodeport: u16,
    },
    /// List pending mempool transactions for this data directory.
    UnapprovedTransactions,
    /// Remove one transaction from the mempool for this data directory.
    CancelTransaction {
        #[arg(long)]
        transaction: String,
    },
    /// List a running node's known peers (requires the auth token).
    ShowNodes {
        #[arg(long, default_value = "127.0.0.1")]
        nodehost: String,
        #[arg(long, default_value_t = 7000)]
        nodeport: u16,
        #[arg(long)]
        token: String,
    },
    /// Add a peer to a running node's peer set (requires the auth token).
    AddNode {
        #[arg(long)]
        node: String,
        #[arg(long, default_value = "127.0.0.1")]
        nodehost: String,
        #[arg(long, default_value_t = 7000)]
        nodeport: u16,
        #[arg(long)]
        token: String,
    },
    /// Remove a peer from a running node's peer set (requires the auth
    /// token).
    RemoveNode {
        #[arg(long)]
        node: String,
        #[arg(long, default_value = "127.0.0.1")]
        nodehost: String,
        #[arg(long, default_value_t = 7000)]
        nodeport: u16,
        #[arg(long)]
        token: String,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

fn resolved_config(data_dir: &Path, minter: Option<String>, port: Option<u16>) -> std::io::Result<ResolvedConfig> {
    let file = FileConfig::load(data_dir)?;
    Ok(ResolvedConfig::resolve(file, minter, port))
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let data_dir = PathBuf::from(&cli.datadir);

    match run(&data_dir, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(data_dir: &Path, command: Commands) -> NodeResult<()> {
    match command {
        Commands::CreateBlockChain { address, genesis } => {
            admin::create_blockchain(data_dir, &address, &genesis, demo_node_types::constants::DEFAULT_TARGET_BITS).await
        }
        Commands::InitBlockChain { nodehost, nodeport } => admin::init_blockchain(data_dir, &nodehost, nodeport).await,
        Commands::StartNode { minter, port } => {
            let config = resolved_config(data_dir, minter, port)?;
            node::run_foreground(data_dir, config, true).await
        }
        Commands::StartIntNode { minter, port } => {
            let config = resolved_config(data_dir, minter, port)?;
            node::run_foreground(data_dir, config, false).await
        }
        Commands::StopNode => stop_node(data_dir),
        Commands::NodeState => {
            node_state(data_dir);
            Ok(())
        }
        Commands::PrintChain { view } => admin::print_chain(data_dir, &view).await,
        Commands::MakeBlock => {
            let config = resolved_config(data_dir, None, None)?;
            admin::make_block(data_dir, config).await
        }
        Commands::DropBlock => admin::drop_block(data_dir).await,
        Commands::ReindexUnspent => admin::reindex_unspent(data_dir).await,
        Commands::Send { from, privkey, to, amount, nodehost, nodeport } => {
            remote::send(&nodehost, nodeport, &from, &privkey, &to, amount).await
        }
        Commands::GetBalance { address, nodehost, nodeport } => remote::get_balance(&nodehost, nodeport, &address).await,
        Commands::AddrHistory { address, nodehost, nodeport } => remote::addr_history(&nodehost, nodeport, &address).await,
        Commands::ShowUnspent { address, nodehost, nodeport } => remote::show_unspent(&nodehost, nodeport, &address).await,
        Commands::UnapprovedTransactions => admin::unapproved_transactions(data_dir).await,
        Commands::CancelTransaction { transaction } => admin::cancel_transaction(data_dir, &transaction).await,
        Commands::ShowNodes { nodehost, nodeport, token } => remote::show_nodes(&nodehost, nodeport, &token).await,
        Commands::AddNode { node, nodehost, nodeport, token } => remote::add_node(&nodehost, nodeport, &token, &node).await,
        Commands::RemoveNode { node, nodehost, nodeport, token } => {
            remote::remove_node(&nodehost, nodeport, &token, &node).await
        }
    }
}

fn stop_node(data_dir: &Path) -> NodeResult<()> {
    let Some(pid) = pidfile::read(data_dir) else {
        return Err(error::NodeError::NotRunning);
    };
    pidfile::terminate(pid)?;
    println!("sent shutdown signal to pid {pid}");
    Ok(())
}

fn node_state(data_dir: &Path) {
    match pidfile::read(data_dir) {
        Some(pid) if pidfile::is_alive(pid) => println!("running (pid {pid})"),
        Some(pid) => println!("stale pid file (pid {pid} not running)"),
        None => println!("not running"),
    }
}
