//! CLI da carteira Kaidos: chaves, endereços, transações e multisig.
//!
//! As chaves vivem em um banco local explícito (`--wallet-db`); saldos e
//! UTXOs vêm do nó em execução via HTTP.

use clap::{Args, Parser, Subcommand};
use kaidos_core::{Hash256, UtxoRecord};
use kaidos_wallet::{build_transaction, create_multisig_input, sign_multisig_input, WalletStore};
use serde_json::{json, Value};
use shared::{format_kd, parse_kd, KaidosError, Result};
use std::process::ExitCode;
use tracing::Level;

#[derive(Parser)]
#[command(name = "kaidos-wallet")]
#[command(about = "Kaidos Wallet - RSA key management, signing and multisig")]
#[command(version)]
struct Cli {
    /// Wallet database path
    #[arg(long, default_value = "kaidos-data/wallets.json", global = true)]
    wallet_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new wallet with an initial address
    Create(CreateArgs),
    /// List wallets and their addresses
    List,
    /// Show the balance of an address
    Balance(AddressArgs),
    /// Create a new address for a wallet
    Address(WalletIdArgs),
    /// List the addresses of a wallet
    Addresses(WalletIdArgs),
    /// Build, sign and submit a transaction
    Tx(TxArgs),
    /// List the UTXOs of an address
    Utxos(AddressArgs),
    /// Register a multisig address from public key files
    Multisig(MultisigArgs),
    /// Add a multisig partial signature to a transaction file
    SignMultisig(SignMultisigArgs),
}

#[derive(Args)]
struct CreateArgs {
    /// Encrypt the private keys under a passphrase
    #[arg(long)]
    encrypted: bool,
}

#[derive(Args)]
struct AddressArgs {
    /// Address to query
    address: String,

    /// Address of the running node
    #[arg(long, default_value = "127.0.0.1:5000")]
    node: String,
}

#[derive(Args)]
struct WalletIdArgs {
    /// Wallet identifier
    wallet_id: String,
}

#[derive(Args)]
struct TxArgs {
    /// Sender address (must exist in the wallet database)
    sender: String,

    /// Recipient address
    recipient: String,

    /// Amount in KD (decimal)
    amount: String,

    /// Fee in KD left to the miner
    #[arg(long, default_value = "0")]
    fee: String,

    /// Address of the running node
    #[arg(long, default_value = "127.0.0.1:5000")]
    node: String,

    /// Also write the signed transaction to this file
    #[arg(long)]
    output: Option<String>,
}

#[derive(Args)]
struct MultisigArgs {
    /// Number of required signatures (m)
    required: usize,

    /// Public key PEM files of the participants
    #[arg(required = true)]
    public_keys: Vec<String>,
}

#[derive(Args)]
struct SignMultisigArgs {
    /// Transaction JSON file to amend
    transaction: String,

    /// Input txid to sign
    txid: String,

    /// Input vout to sign
    vout: u32,

    /// Wallet address whose key signs
    address: String,

    /// Index of this key in the multisig record
    key_index: usize,

    /// Output file (defaults to rewriting the input file)
    #[arg(long)]
    output: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Create(args) => create_wallet(&cli.wallet_db, args),
        Commands::List => list_wallets(&cli.wallet_db),
        Commands::Balance(args) => show_balance(args).await,
        Commands::Address(args) => create_address(&cli.wallet_db, args),
        Commands::Addresses(args) => list_addresses(&cli.wallet_db, args),
        Commands::Tx(args) => create_transaction(&cli.wallet_db, args).await,
        Commands::Utxos(args) => show_utxos(args).await,
        Commands::Multisig(args) => create_multisig(&cli.wallet_db, args),
        Commands::SignMultisig(args) => sign_multisig(&cli.wallet_db, args),
    }
}

fn prompt_passphrase(confirm: bool) -> Result<String> {
    let passphrase = rpassword::prompt_password("Enter passphrase: ")
        .map_err(|e| KaidosError::KeyGeneration(e.to_string()))?;

    if confirm {
        let confirmation = rpassword::prompt_password("Confirm passphrase: ")
            .map_err(|e| KaidosError::KeyGeneration(e.to_string()))?;
        if passphrase != confirmation {
            return Err(KaidosError::KeyGeneration(
                "Passphrases do not match".to_string(),
            ));
        }
    }

    Ok(passphrase)
}

/// Pede a senha quando a carteira dona do endereço é cifrada
fn passphrase_for_wallet(store: &WalletStore, wallet_id: &str) -> Result<Option<String>> {
    let encrypted = store
        .wallet(wallet_id)
        .is_some_and(|wallet| wallet.encrypted);

    if encrypted {
        Ok(Some(prompt_passphrase(false)?))
    } else {
        Ok(None)
    }
}

fn create_wallet(wallet_db: &str, args: &CreateArgs) -> Result<()> {
    let mut store = WalletStore::open(wallet_db)?;

    let passphrase = if args.encrypted {
        Some(prompt_passphrase(true)?)
    } else {
        None
    };

    let info = store.create_wallet(passphrase.as_deref())?;

    println!("Wallet created successfully!");
    println!("Wallet ID: {}", info.wallet_id);
    println!("Address: {}", info.address);
    println!("IMPORTANT: Keep your wallet ID and address safe.");
    if args.encrypted {
        println!("Your wallet is encrypted. You will need the passphrase for transactions.");
    } else {
        println!("Your wallet is not encrypted. Anyone with access to the database can use it.");
    }
    Ok(())
}

fn list_wallets(wallet_db: &str) -> Result<()> {
    let store = WalletStore::open(wallet_db)?;
    let wallets = store.list_wallets();

    if wallets.is_empty() {
        println!("No wallets found");
        return Ok(());
    }

    println!("Found {} wallets:", wallets.len());
    for wallet in wallets {
        println!("  Wallet ID: {}", wallet.wallet_id);
        println!("  Name: {}", wallet.name);
        println!("  Encrypted: {}", wallet.encrypted);
        println!("  Created: {}", wallet.created_at);

        let addresses = store.list_addresses(&wallet.wallet_id);
        if addresses.is_empty() {
            println!("  No addresses");
        } else {
            println!("  Addresses ({}):", addresses.len());
            for address in addresses {
                println!("    - {}", address.address);
            }
        }
        println!();
    }
    Ok(())
}

async fn show_balance(args: &AddressArgs) -> Result<()> {
    let body = get_json(&format!("http://{}/utxos/{}", args.node, args.address)).await?;
    let balance = body["balance"].as_u64().unwrap_or(0);
    println!("Balance for {}: {} KD", args.address, format_kd(balance));
    Ok(())
}

fn create_address(wallet_db: &str, args: &WalletIdArgs) -> Result<()> {
    let mut store = WalletStore::open(wallet_db)?;
    let passphrase = passphrase_for_wallet(&store, &args.wallet_id)?;

    let info = store.create_address(&args.wallet_id, passphrase.as_deref())?;

    println!("Address created successfully!");
    println!("Address: {}", info.address);
    Ok(())
}

fn list_addresses(wallet_db: &str, args: &WalletIdArgs) -> Result<()> {
    let store = WalletStore::open(wallet_db)?;

    if store.wallet(&args.wallet_id).is_none() {
        return Err(KaidosError::KeyGeneration(format!(
            "Wallet not found: {}",
            args.wallet_id
        )));
    }

    let addresses = store.list_addresses(&args.wallet_id);
    if addresses.is_empty() {
        println!("No addresses found for wallet: {}", args.wallet_id);
        return Ok(());
    }

    println!("Found {} addresses:", addresses.len());
    for address in addresses {
        println!("  Address: {}", address.address);
        println!("  Created: {}", address.created_at);
        println!();
    }
    Ok(())
}

async fn create_transaction(wallet_db: &str, args: &TxArgs) -> Result<()> {
    let store = WalletStore::open(wallet_db)?;

    let wallet_id = store
        .wallet_by_address(&args.sender)
        .map(|wallet| wallet.wallet_id.clone())
        .ok_or_else(|| {
            KaidosError::Signature(format!("Sender address not found: {}", args.sender))
        })?;
    let passphrase = passphrase_for_wallet(&store, &wallet_id)?;

    let amount = parse_kd(&args.amount)?;
    let fee = parse_kd(&args.fee)?;

    // UTXOs do remetente vem do no
    let body = get_json(&format!("http://{}/utxos/{}", args.node, args.sender)).await?;
    let utxos: Vec<UtxoRecord> = serde_json::from_value(body["utxos"].clone())
        .map_err(|e| KaidosError::Serialization(e.to_string()))?;

    let (inputs, outputs) = build_transaction(
        &store,
        &args.sender,
        &args.recipient,
        amount,
        fee,
        &utxos,
        passphrase.as_deref(),
    )?;

    let payload = json!({ "inputs": inputs, "outputs": outputs });

    if let Some(path) = &args.output {
        std::fs::write(
            path,
            serde_json::to_string_pretty(&payload)
                .map_err(|e| KaidosError::Serialization(e.to_string()))?,
        )
        .map_err(|e| KaidosError::Database(format!("{path}: {e}")))?;
        println!("Transaction saved to {path}");
    }

    let body = post_json(&format!("http://{}/transactions", args.node), &payload).await?;

    println!("Transaction submitted successfully:");
    println!(
        "  Transaction ID: {}",
        body["transaction_id"].as_str().unwrap_or("?")
    );
    println!("  Amount: {} KD", format_kd(amount));
    if fee > 0 {
        println!("  Fee: {} KD", format_kd(fee));
    }
    Ok(())
}

async fn show_utxos(args: &AddressArgs) -> Result<()> {
    let body = get_json(&format!("http://{}/utxos/{}", args.node, args.address)).await?;
    let utxos = body["utxos"].as_array().cloned().unwrap_or_default();

    if utxos.is_empty() {
        println!("No UTXOs found for {}", args.address);
        return Ok(());
    }

    println!("Found {} UTXOs for {}:", utxos.len(), args.address);
    for utxo in &utxos {
        println!(
            "  TXID: {}:{}",
            utxo["txid"].as_str().unwrap_or("?"),
            utxo["vout"]
        );
        println!(
            "  Amount: {} KD",
            utxo["amount"].as_u64().map(format_kd).unwrap_or_default()
        );
        println!();
    }
    println!(
        "Total balance: {} KD",
        body["balance"].as_u64().map(format_kd).unwrap_or_default()
    );
    Ok(())
}

fn create_multisig(wallet_db: &str, args: &MultisigArgs) -> Result<()> {
    let mut public_keys = Vec::with_capacity(args.public_keys.len());
    for path in &args.public_keys {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| KaidosError::KeyGeneration(format!("{path}: {e}")))?;
        public_keys.push(pem.trim().to_string());
    }

    let mut store = WalletStore::open(wallet_db)?;
    let record = store.register_multisig(public_keys, args.required)?;

    println!("Multi-signature address created successfully!");
    println!("Address: {}", record.address);
    println!(
        "Required signatures: {} of {}",
        record.required_signatures,
        record.public_keys.len()
    );
    Ok(())
}

fn sign_multisig(wallet_db: &str, args: &SignMultisigArgs) -> Result<()> {
    let store = WalletStore::open(wallet_db)?;

    let record = store.address_record(&args.address).ok_or_else(|| {
        KaidosError::Signature(format!("Address not found: {}", args.address))
    })?;
    let wallet_id = record.wallet_id.clone();
    let private_key_pem = record.private_key.clone();
    let passphrase = passphrase_for_wallet(&store, &wallet_id)?;

    let txid: Hash256 = args
        .txid
        .parse()
        .map_err(|_| KaidosError::Signature(format!("Invalid txid: {}", args.txid)))?;

    let contents = std::fs::read_to_string(&args.transaction)
        .map_err(|e| KaidosError::Database(format!("{}: {e}", args.transaction)))?;
    let mut payload: Value = serde_json::from_str(&contents)
        .map_err(|e| KaidosError::Serialization(e.to_string()))?;

    let inputs = payload["inputs"].as_array_mut().ok_or_else(|| {
        KaidosError::InvalidTransaction("Transaction has no inputs".to_string())
    })?;

    let input = inputs
        .iter_mut()
        .find(|input| {
            input["txid"].as_str() == Some(args.txid.as_str())
                && input["vout"].as_u64() == Some(u64::from(args.vout))
        })
        .ok_or_else(|| {
            KaidosError::InvalidTransaction(format!(
                "Input {}:{} not found in transaction",
                args.txid, args.vout
            ))
        })?;

    let partial = sign_multisig_input(
        &private_key_pem,
        passphrase.as_deref(),
        &txid,
        args.vout,
        args.key_index,
    )?;

    // Acrescenta a assinatura parcial preservando as anteriores
    let mut signatures: Vec<Value> = input["signatures"].as_array().cloned().unwrap_or_default();
    signatures.push(
        serde_json::to_value(&partial).map_err(|e| KaidosError::Serialization(e.to_string()))?,
    );
    let rebuilt = create_multisig_input(
        txid,
        args.vout,
        serde_json::from_value(Value::Array(signatures))
            .map_err(|e| KaidosError::Serialization(e.to_string()))?,
    );
    *input = serde_json::to_value(&rebuilt)
        .map_err(|e| KaidosError::Serialization(e.to_string()))?;

    let output_path = args.output.as_ref().unwrap_or(&args.transaction);
    std::fs::write(
        output_path,
        serde_json::to_string_pretty(&payload)
            .map_err(|e| KaidosError::Serialization(e.to_string()))?,
    )
    .map_err(|e| KaidosError::Database(format!("{output_path}: {e}")))?;

    println!("Transaction signed successfully!");
    println!(
        "Signature added for input {}:{} with key index {}",
        args.txid, args.vout, args.key_index
    );
    println!("Transaction saved to {output_path}");
    Ok(())
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
