//! CLI do nó Kaidos: inicialização, servidor e comandos de cliente
//! contra um nó em execução.

use clap::{Args, Parser, Subcommand};
use kaidos_core::{Blockchain, ChainParams, ChainStore};
use serde_json::{json, Value};
use shared::types::NodeConfig;
use shared::{format_kd, KaidosError, Result};
use std::process::ExitCode;
use tracing::Level;

mod network;

#[derive(Parser)]
#[command(name = "kaidos-node")]
#[command(about = "Kaidos Node - UTXO blockchain node with proof-of-work mining")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the node data directory with a genesis block
    Init(InitArgs),
    /// Start the node HTTP server
    Start(StartArgs),
    /// Register a peer on a running node
    AddPeer(AddPeerArgs),
    /// List the peers known to a running node
    ListPeers(NodeArg),
    /// Mine a block paying the reward to an address
    Mine(MineArgs),
    /// Show blocks from a running node
    Blocks(BlocksArgs),
    /// Show pending transactions
    Transactions(NodeArg),
    /// Debug a transaction without admitting it
    Debug(FileArgs),
    /// Submit a signed transaction from a JSON file
    Send(FileArgs),
    /// List the UTXOs of an address
    Utxos(AddressArgs),
    /// Run the consensus sweep against all known peers
    Consensus(NodeArg),
}

#[derive(Args)]
struct InitArgs {
    /// Data directory for the chain state
    #[arg(long, default_value = "kaidos-data")]
    data_dir: String,
}

#[derive(Args)]
struct StartArgs {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Data directory for the chain state
    #[arg(long, default_value = "kaidos-data")]
    data_dir: String,

    /// Wallet database used to resolve public keys during validation
    #[arg(long, default_value = "kaidos-data/wallets.json")]
    wallet_db: String,

    /// Timeout for peer calls, in seconds
    #[arg(long, default_value = "5")]
    peer_timeout: u64,
}

#[derive(Args)]
struct NodeArg {
    /// Address of the running node
    #[arg(long, default_value = "127.0.0.1:5000")]
    node: String,
}

#[derive(Args)]
struct AddPeerArgs {
    /// Peer address to register (host:port)
    peer: String,

    #[command(flatten)]
    node: NodeArg,
}

#[derive(Args)]
struct MineArgs {
    /// Address that receives the block reward
    address: String,

    #[command(flatten)]
    node: NodeArg,
}

#[derive(Args)]
struct BlocksArgs {
    /// First block index
    #[arg(long)]
    start: Option<u64>,

    /// Last block index
    #[arg(long)]
    end: Option<u64>,

    #[command(flatten)]
    node: NodeArg,
}

#[derive(Args)]
struct FileArgs {
    /// Path to the transaction JSON file
    file: String,

    #[command(flatten)]
    node: NodeArg,
}

#[derive(Args)]
struct AddressArgs {
    /// Address to query
    address: String,

    #[command(flatten)]
    node: NodeArg,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Init(args) => init_node(&args),
        Commands::Start(args) => start_node(args).await,
        Commands::AddPeer(args) => add_peer(&args).await,
        Commands::ListPeers(args) => list_peers(&args).await,
        Commands::Mine(args) => mine_block(&args).await,
        Commands::Blocks(args) => show_blocks(&args).await,
        Commands::Transactions(args) => show_transactions(&args).await,
        Commands::Debug(args) => debug_transaction(&args).await,
        Commands::Send(args) => send_transaction(&args).await,
        Commands::Utxos(args) => show_utxos(&args).await,
        Commands::Consensus(args) => run_consensus(&args).await,
    }
}

fn init_node(args: &InitArgs) -> Result<()> {
    let store = ChainStore::new(format!("{}/chain.json", args.data_dir));

    let chain = match store.load()? {
        Some(state) => Blockchain::from_state(state, ChainParams::default())?,
        None => {
            let chain = Blockchain::new(ChainParams::default())?;
            store.save(&chain.state())?;
            chain
        }
    };

    chain.validate_chain()?;

    println!("Blockchain initialized successfully");
    println!(
        "Genesis block hash: {}",
        chain
            .block_by_index(0)
            .map(|block| block.hash.to_string())
            .unwrap_or_default()
    );
    println!("Chain length: {}", chain.chain_length());
    Ok(())
}

async fn start_node(args: StartArgs) -> Result<()> {
    let config = NodeConfig {
        host: args.host,
        port: args.port,
        data_dir: args.data_dir,
        wallet_db: args.wallet_db,
        peer_timeout_secs: args.peer_timeout,
    };

    println!("🚀 Starting Kaidos node on {}", config.self_address());
    network::serve(config).await
}

async fn add_peer(args: &AddPeerArgs) -> Result<()> {
    let body = post_json(
        &format!("http://{}/peers", args.node.node),
        &json!({ "address": args.peer }),
    )
    .await?;

    println!(
        "{}",
        body["message"].as_str().unwrap_or("Peer added successfully")
    );
    Ok(())
}

async fn list_peers(args: &NodeArg) -> Result<()> {
    let body = get_json(&format!("http://{}/peers", args.node)).await?;
    let peers = body["peers"].as_array().cloned().unwrap_or_default();

    if peers.is_empty() {
        println!("No peers found");
        return Ok(());
    }

    println!("Found {} peers:", peers.len());
    for peer in peers {
        println!("  Address: {}", peer["address"].as_str().unwrap_or("?"));
        println!(
            "  Last seen: {}",
            peer["last_seen"].as_str().unwrap_or("Never")
        );
        println!();
    }
    Ok(())
}

async fn mine_block(args: &MineArgs) -> Result<()> {
    let body = post_json(
        &format!("http://{}/blocks/mine", args.node.node),
        &json!({ "miner_address": args.address }),
    )
    .await?;

    let block = &body["block"];
    println!("⛏️  Block mined successfully:");
    println!("  Index: {}", block["index"]);
    println!("  Hash: {}", block["hash"].as_str().unwrap_or("?"));
    println!(
        "  Transactions: {}",
        block["transactions"].as_array().map_or(0, Vec::len)
    );
    println!("  Nonce: {}", block["nonce"]);
    println!(
        "  Reward: {} KD",
        body["reward"].as_u64().map(format_kd).unwrap_or_default()
    );
    Ok(())
}

async fn show_blocks(args: &BlocksArgs) -> Result<()> {
    let mut url = format!("http://{}/blocks", args.node.node);
    let mut params = Vec::new();
    if let Some(start) = args.start {
        params.push(format!("start={start}"));
    }
    if let Some(end) = args.end {
        params.push(format!("end={end}"));
    }
    if !params.is_empty() {
        url = format!("{url}?{}", params.join("&"));
    }

    let body = get_json(&url).await?;
    let blocks = body["blocks"].as_array().cloned().unwrap_or_default();

    println!("Chain with {} blocks:", blocks.len());
    for block in blocks {
        let hash = block["hash"].as_str().unwrap_or("?");
        let short = &hash[..hash.len().min(8)];
        println!(
            "  Block {} [{short}...] with {} transactions",
            block["index"],
            block["transactions"].as_array().map_or(0, Vec::len)
        );
    }
    Ok(())
}

async fn show_transactions(args: &NodeArg) -> Result<()> {
    let body = get_json(&format!("http://{}/transactions", args.node)).await?;
    let transactions = body["transactions"].as_array().cloned().unwrap_or_default();

    if transactions.is_empty() {
        println!("No pending transactions");
        return Ok(());
    }

    println!("{} pending transactions:", transactions.len());
    for tx in transactions {
        println!("  TXID: {}", tx["txid"].as_str().unwrap_or("?"));
        println!(
            "  Inputs: {}, Outputs: {}",
            tx["inputs"].as_array().map_or(0, Vec::len),
            tx["outputs"].as_array().map_or(0, Vec::len)
        );
        println!();
    }
    Ok(())
}

async fn debug_transaction(args: &FileArgs) -> Result<()> {
    let payload = read_json_file(&args.file)?;
    let body = post_json(
        &format!("http://{}/debug/transaction", args.node.node),
        &payload,
    )
    .await?;

    let report = serde_json::to_string_pretty(&body["validation_result"])
        .map_err(|e| KaidosError::Serialization(e.to_string()))?;
    println!("{report}");
    Ok(())
}

async fn send_transaction(args: &FileArgs) -> Result<()> {
    let payload = read_json_file(&args.file)?;
    let body = post_json(
        &format!("http://{}/transactions", args.node.node),
        &payload,
    )
    .await?;

    println!("Transaction added successfully");
    println!(
        "Transaction ID: {}",
        body["transaction_id"].as_str().unwrap_or("?")
    );
    Ok(())
}

async fn show_utxos(args: &AddressArgs) -> Result<()> {
    let body = get_json(&format!("http://{}/utxos/{}", args.node.node, args.address)).await?;
    let utxos = body["utxos"].as_array().cloned().unwrap_or_default();

    if utxos.is_empty() {
        println!("No UTXOs found for {}", args.address);
        return Ok(());
    }

    println!("Found {} UTXOs for {}:", utxos.len(), args.address);
    for utxo in utxos {
        println!(
            "  {}:{}  {} KD",
            utxo["txid"].as_str().unwrap_or("?"),
            utxo["vout"],
            utxo["amount"].as_u64().map(format_kd).unwrap_or_default()
        );
    }
    println!(
        "Balance: {} KD",
        body["balance"].as_u64().map(format_kd).unwrap_or_default()
    );
    Ok(())
}

async fn run_consensus(args: &NodeArg) -> Result<()> {
    let body = get_json(&format!("http://{}/consensus", args.node)).await?;

    println!("{}", body["message"].as_str().unwrap_or("?"));
    if let Some(length) = body["new_length"].as_u64().or_else(|| body["length"].as_u64()) {
        println!("Chain length: {length}");
    }
    Ok(())
}

fn read_json_file(path: &str) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| KaidosError::Database(format!("{path}: {e}")))?;
    serde_json::from_str(&contents).map_err(|e| KaidosError::Serialization(e.to_string()))
}

async fn get_json(url: &str) -> Result<Value> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| KaidosError::NodeConnection(e.to_string()))?;
    parse_response(response).await
}

async fn post_json(url: &str, payload: &Value) -> Result<Value> {
    let client = reqwest::Client::new();
    let response = client
        .post(url)
        .json(payload)
        .send()
        .await
        .map_err(|e| KaidosError::NodeConnection(e.to_string()))?;
    parse_response(response).await
}

/// Converte uma resposta da API: sucesso vira o JSON do corpo, erro
/// vira a mensagem `{error}` do nó
async fn parse_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| KaidosError::NodeConnection(e.to_string()))?;

    if status.is_success() {
        Ok(body)
    } else {
        let message = body["error"].as_str().unwrap_or("Unknown error").to_string();
        Err(KaidosError::NodeConnection(message))
    }
}
