//! Servidor HTTP do nó e coordenador de peers.
//!
//! O par (cadeia, peers) vive atrás de `RwLock`: o lock de escrita é o
//! escritor lógico único sobre (blocos, UTXOs, mempool). Nenhum handler
//! segura um lock através de I/O de rede — o estado remoto é buscado
//! primeiro e só então o resultado é aplicado.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use kaidos_core::{
    Block, Blockchain, ChainParams, ChainStore, JsonStore, Miner, Transaction, TxInput, TxOutput,
};
use kaidos_wallet::WalletStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::types::NodeConfig;
use shared::{Hash256, KaidosError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Registro de um peer conhecido
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Endereço `host:porta`, normalizado
    pub address: String,
    /// Último contato bem-sucedido
    pub last_seen: Option<DateTime<Utc>>,
    /// Peer que nos apresentou este endereço
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Conjunto de peers, único por endereço normalizado
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerRegistry {
    peers: Vec<PeerRecord>,
}

impl PeerRegistry {
    /// Verifica se o endereço (já normalizado) é conhecido
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.peers.iter().any(|peer| peer.address == address)
    }

    /// Insere um peer; retorna `false` se o endereço já era conhecido
    pub fn insert(&mut self, record: PeerRecord) -> bool {
        if self.contains(&record.address) {
            return false;
        }
        self.peers.push(record);
        true
    }

    /// Atualiza o `last_seen` de um peer conhecido
    pub fn touch(&mut self, address: &str) {
        if let Some(peer) = self.peers.iter_mut().find(|peer| peer.address == address) {
            peer.last_seen = Some(Utc::now());
        }
    }

    /// Todos os peers
    #[must_use]
    pub fn all(&self) -> &[PeerRecord] {
        &self.peers
    }

    /// Número de peers
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Verifica se não há peers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Normaliza um endereço de peer: `localhost` e `0.0.0.0` colapsam em
/// `127.0.0.1`
#[must_use]
pub fn normalize_peer_address(address: &str) -> String {
    match address.split_once(':') {
        Some((host, port)) => {
            let host = match host {
                "localhost" | "0.0.0.0" => "127.0.0.1",
                other => other,
            };
            format!("{host}:{port}")
        }
        None => address.to_string(),
    }
}

/// Estado compartilhado do nó
pub struct NodeContext {
    config: NodeConfig,
    chain: RwLock<Blockchain>,
    peers: RwLock<PeerRegistry>,
    chain_store: ChainStore,
    peer_store: JsonStore<Vec<PeerRecord>>,
    http: reqwest::Client,
}

/// Handle compartilhado entre handlers e tarefas de gossip
pub type SharedNode = Arc<NodeContext>;

impl NodeContext {
    /// Abre (ou inicializa) o estado do nó no diretório de dados
    ///
    /// # Errors
    ///
    /// Retorna `Database` se os snapshots não puderem ser lidos
    pub fn open(config: NodeConfig) -> Result<Self> {
        let chain_store = ChainStore::new(format!("{}/chain.json", config.data_dir));
        let peer_store = JsonStore::new(format!("{}/peers.json", config.data_dir));

        let chain = match chain_store.load()? {
            Some(state) => Blockchain::from_state(state, ChainParams::default())?,
            None => {
                let chain = Blockchain::new(ChainParams::default())?;
                chain_store.save(&chain.state())?;
                chain
            }
        };

        let peers = PeerRegistry {
            peers: peer_store.load()?.unwrap_or_default(),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.peer_timeout_secs))
            .build()
            .map_err(|e| KaidosError::NodeConnection(e.to_string()))?;

        info!(
            height = chain.latest_block().index,
            peers = peers.len(),
            "node state loaded"
        );

        Ok(Self {
            config,
            chain: RwLock::new(chain),
            peers: RwLock::new(peers),
            chain_store,
            peer_store,
            http,
        })
    }

    /// Diretório de carteiras recarregado a cada uso, para enxergar
    /// endereços criados pela CLI da carteira depois do start
    fn key_resolver(&self) -> Result<WalletStore> {
        WalletStore::open(&self.config.wallet_db)
    }

    /// Endereço próprio, normalizado
    fn self_address(&self) -> String {
        normalize_peer_address(&self.config.self_address())
    }

    fn persist_chain(&self, chain: &Blockchain) -> Result<()> {
        self.chain_store.save(&chain.state())
    }

    fn persist_peers(&self, peers: &PeerRegistry) -> Result<()> {
        self.peer_store.save(&peers.peers)
    }
}

/// Monta o roteador HTTP com as rotas do protocolo de peers
pub fn router(ctx: SharedNode) -> Router {
    Router::new()
        .route("/blocks", get(get_blocks).post(post_block))
        .route("/blocks/latest", get(get_latest_block))
        .route("/blocks/mine", post(mine_block))
        .route("/blocks/:hash", get(get_block_by_hash))
        .route("/transactions", get(get_transactions).post(post_transaction))
        .route("/transactions/:txid", get(get_transaction))
        .route("/utxos/:address", get(get_utxos))
        .route("/peers", get(get_peers).post(post_peer))
        .route("/consensus", get(run_consensus))
        .route("/debug/transaction", post(debug_transaction))
        .with_state(ctx)
}

/// Sobe o servidor do nó e serve até o processo terminar
///
/// # Errors
///
/// Retorna `NodeConnection` se o bind falhar e `Database` se o estado
/// não puder ser aberto
pub async fn serve(config: NodeConfig) -> Result<()> {
    let bind_address = config.self_address();
    let ctx = Arc::new(NodeContext::open(config)?);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| KaidosError::NodeConnection(format!("{bind_address}: {e}")))?;

    info!(%bind_address, "kaidos node listening");

    axum::serve(listener, router(ctx))
        .await
        .map_err(|e| KaidosError::NodeConnection(e.to_string()))
}

type ApiError = (StatusCode, Json<Value>);
type ApiResult = std::result::Result<Json<Value>, ApiError>;

fn bad_request(err: &KaidosError) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": err.to_string(), "code": err.code() })),
    )
}

fn not_found(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    start: Option<u64>,
    end: Option<u64>,
}

async fn get_blocks(State(ctx): State<SharedNode>, Query(range): Query<RangeParams>) -> ApiResult {
    let chain = ctx.chain.read().await;
    let start = range.start.unwrap_or(0);
    let end = range.end.unwrap_or(chain.latest_block().index);
    let blocks = chain.blocks_range(start, end);

    Ok(Json(json!({ "length": blocks.len(), "blocks": blocks })))
}

async fn post_block(State(ctx): State<SharedNode>, Json(block): Json<Block>) -> ApiResult {
    let keys = ctx.key_resolver().map_err(|e| bad_request(&e))?;

    let mut chain = ctx.chain.write().await;
    chain
        .append_block(block, &keys)
        .map_err(|e| bad_request(&e))?;
    ctx.persist_chain(&chain).map_err(|e| bad_request(&e))?;

    Ok(Json(json!({ "message": "Block added successfully" })))
}

async fn get_latest_block(State(ctx): State<SharedNode>) -> Json<Block> {
    let chain = ctx.chain.read().await;
    Json(chain.latest_block().clone())
}

async fn get_block_by_hash(State(ctx): State<SharedNode>, Path(hash): Path<String>) -> ApiResult {
    let hash: Hash256 = hash.parse().map_err(|_| not_found("Block"))?;

    let chain = ctx.chain.read().await;
    match chain.block_by_hash(&hash) {
        Some(block) => Ok(Json(json!(block))),
        None => Err(not_found("Block")),
    }
}

#[derive(Debug, Deserialize)]
struct MineRequest {
    #[serde(default)]
    miner_address: String,
}

async fn mine_block(State(ctx): State<SharedNode>, Json(request): Json<MineRequest>) -> ApiResult {
    if request.miner_address.is_empty() {
        return Err(bad_request(&KaidosError::InvalidBlock(
            "Miner address is required".to_string(),
        )));
    }

    let miner = Miner::new(request.miner_address);

    // Snapshot sob lock de leitura; a busca de nonce roda fora de
    // qualquer lock
    let (candidate, total_reward, difficulty) = {
        let chain = ctx.chain.read().await;
        chain.prepare_candidate(&miner).map_err(|e| bad_request(&e))?
    };

    let sealed = tokio::task::spawn_blocking(move || miner.seal(candidate, difficulty))
        .await
        .map_err(|e| {
            bad_request(&KaidosError::InvalidBlock(format!("Mining task failed: {e}")))
        })?
        .map_err(|e| bad_request(&e))?;

    let keys = ctx.key_resolver().map_err(|e| bad_request(&e))?;
    {
        let mut chain = ctx.chain.write().await;
        chain
            .append_block(sealed.block.clone(), &keys)
            .map_err(|e| bad_request(&e))?;
        ctx.persist_chain(&chain).map_err(|e| bad_request(&e))?;
    }

    // Gossip fora do lock; falhas individuais sao apenas registradas
    tokio::spawn(broadcast_block(ctx.clone(), sealed.block.clone()));

    Ok(Json(json!({
        "message": "Block mined successfully",
        "block": sealed.block,
        "reward": total_reward,
    })))
}

async fn get_transactions(State(ctx): State<SharedNode>) -> Json<Value> {
    let chain = ctx.chain.read().await;
    let transactions = chain.pending_transactions();
    Json(json!({ "count": transactions.len(), "transactions": transactions }))
}

/// Corpo de submissão de transação: inputs e outputs assinados
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxSubmission {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Aceito por compatibilidade; as assinaturas vivem nos inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

async fn post_transaction(
    State(ctx): State<SharedNode>,
    Json(submission): Json<TxSubmission>,
) -> ApiResult {
    if submission.inputs.is_empty() || submission.outputs.is_empty() {
        return Err(bad_request(&KaidosError::InvalidTransaction(
            "Transaction must have inputs and outputs".to_string(),
        )));
    }

    let keys = ctx.key_resolver().map_err(|e| bad_request(&e))?;

    let txid = {
        let mut chain = ctx.chain.write().await;
        let txid = chain
            .add_transaction(submission.inputs.clone(), submission.outputs.clone(), &keys)
            .map_err(|e| bad_request(&e))?;
        ctx.persist_chain(&chain).map_err(|e| bad_request(&e))?;
        txid
    };

    tokio::spawn(broadcast_transaction(ctx.clone(), submission));

    Ok(Json(json!({
        "message": "Transaction added successfully",
        "transaction_id": txid,
    })))
}

async fn get_transaction(State(ctx): State<SharedNode>, Path(txid): Path<String>) -> ApiResult {
    let txid: Hash256 = txid.parse().map_err(|_| not_found("Transaction"))?;

    let chain = ctx.chain.read().await;
    match chain.mempool().get(&txid) {
        Some(tx) => Ok(Json(json!(tx))),
        None => Err(not_found("Transaction")),
    }
}

async fn get_utxos(State(ctx): State<SharedNode>, Path(address): Path<String>) -> Json<Value> {
    let chain = ctx.chain.read().await;
    let utxos = chain.utxos_for_address(&address);

    Json(json!({
        "count": utxos.len(),
        "balance": chain.balance(&address),
        "utxos": utxos,
    }))
}

async fn get_peers(State(ctx): State<SharedNode>) -> Json<Value> {
    let peers = ctx.peers.read().await;
    Json(json!({ "count": peers.len(), "peers": peers.all() }))
}

#[derive(Debug, Deserialize)]
struct PeerRequest {
    #[serde(default)]
    address: String,
}

async fn post_peer(State(ctx): State<SharedNode>, Json(request): Json<PeerRequest>) -> ApiResult {
    if request.address.is_empty() {
        return Err(bad_request(&KaidosError::NodeConnection(
            "Missing peer address".to_string(),
        )));
    }

    let address = normalize_peer_address(&request.address);

    {
        let mut peers = ctx.peers.write().await;
        if !peers.insert(PeerRecord {
            address: address.clone(),
            last_seen: Some(Utc::now()),
            source: None,
        }) {
            return Ok(Json(json!({ "message": "Peer already exists" })));
        }
        ctx.persist_peers(&peers).map_err(|e| bad_request(&e))?;
    }

    // Registro reciproco, sincronizacao e descoberta; sem locks durante
    // as chamadas remotas
    connect_to_peer(&ctx, &address).await;

    Ok(Json(json!({ "message": "Peer added successfully" })))
}

async fn run_consensus(State(ctx): State<SharedNode>) -> ApiResult {
    let chains = collect_peer_chains(&ctx).await;
    let keys = ctx.key_resolver().map_err(|e| bad_request(&e))?;

    let mut chain = ctx.chain.write().await;
    let replaced = chain
        .resolve_conflicts(chains, &keys)
        .map_err(|e| bad_request(&e))?;

    if replaced {
        ctx.persist_chain(&chain).map_err(|e| bad_request(&e))?;
        Ok(Json(json!({
            "message": "Chain was replaced",
            "new_length": chain.chain_length(),
        })))
    } else {
        Ok(Json(json!({
            "message": "Chain is authoritative",
            "length": chain.chain_length(),
        })))
    }
}

#[derive(Debug, Deserialize)]
struct DebugRequest {
    #[serde(default)]
    inputs: Vec<TxInput>,
    #[serde(default)]
    outputs: Vec<TxOutput>,
}

async fn debug_transaction(
    State(ctx): State<SharedNode>,
    Json(request): Json<DebugRequest>,
) -> ApiResult {
    let tx = Transaction::new(request.inputs, request.outputs).map_err(|e| bad_request(&e))?;
    let keys = ctx.key_resolver().map_err(|e| bad_request(&e))?;

    let chain = ctx.chain.read().await;
    let report = chain.debug_transaction(&tx, &keys);

    Ok(Json(json!({
        "message": "Transaction debug information",
        "validation_result": report,
    })))
}

/// Registra-nos no peer e, em caso de sucesso, sincroniza a cadeia e
/// importa a lista de peers dele. Falhas são silenciosas: o nó degrada
/// para menos peers e segue.
async fn connect_to_peer(ctx: &SharedNode, address: &str) -> bool {
    let self_address = ctx.self_address();
    if *address == self_address {
        return false;
    }

    let url = format!("http://{address}/peers");
    let response = ctx
        .http
        .post(&url)
        .json(&json!({ "address": self_address }))
        .send()
        .await;

    match response {
        Ok(response) if response.status().is_success() => {
            {
                let mut peers = ctx.peers.write().await;
                peers.touch(address);
                if let Err(e) = ctx.persist_peers(&peers) {
                    warn!(error = %e, "failed to persist peers");
                }
            }

            sync_with_peer(ctx, address).await;
            discover_peers_from(ctx, address).await;
            true
        }
        Ok(response) => {
            warn!(peer = %address, status = %response.status(), "peer registration refused");
            false
        }
        Err(e) => {
            warn!(peer = %address, error = %e, "peer unreachable");
            false
        }
    }
}

/// Busca o último bloco do peer e, se ele estiver à frente, puxa a
/// cadeia completa e entrega ao resolvedor de forks
async fn sync_with_peer(ctx: &SharedNode, address: &str) {
    let url = format!("http://{address}/blocks/latest");
    let Ok(response) = ctx.http.get(&url).send().await else {
        return;
    };
    let Ok(peer_latest) = response.json::<Block>().await else {
        return;
    };

    let our_index = ctx.chain.read().await.latest_block().index;
    if peer_latest.index <= our_index {
        return;
    }

    let Some(blocks) = fetch_chain(ctx, address).await else {
        return;
    };

    let keys = match ctx.key_resolver() {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "wallet store unavailable during sync");
            return;
        }
    };

    let mut chain = ctx.chain.write().await;
    match chain.resolve_conflicts(vec![blocks], &keys) {
        Ok(true) => {
            if let Err(e) = ctx.persist_chain(&chain) {
                warn!(error = %e, "failed to persist chain after sync");
            }
        }
        Ok(false) => {}
        Err(e) => warn!(peer = %address, error = %e, "sync consensus failed"),
    }
}

/// Importa os peers conhecidos de um peer, exceto nós mesmos
async fn discover_peers_from(ctx: &SharedNode, address: &str) {
    #[derive(Deserialize)]
    struct PeersResponse {
        #[serde(default)]
        peers: Vec<PeerRecord>,
    }

    let url = format!("http://{address}/peers");
    let Ok(response) = ctx.http.get(&url).send().await else {
        return;
    };
    let Ok(listing) = response.json::<PeersResponse>().await else {
        return;
    };

    let self_address = ctx.self_address();
    let mut peers = ctx.peers.write().await;
    let mut changed = false;

    for peer in listing.peers {
        let normalized = normalize_peer_address(&peer.address);
        if normalized == self_address {
            continue;
        }
        changed |= peers.insert(PeerRecord {
            address: normalized,
            last_seen: None,
            source: Some(address.to_string()),
        });
    }

    if changed {
        if let Err(e) = ctx.persist_peers(&peers) {
            warn!(error = %e, "failed to persist discovered peers");
        }
    }
}

#[derive(Deserialize)]
struct BlocksResponse {
    #[serde(default)]
    blocks: Vec<Block>,
}

async fn fetch_chain(ctx: &SharedNode, address: &str) -> Option<Vec<Block>> {
    let url = format!("http://{address}/blocks");
    let response = ctx.http.get(&url).send().await.ok()?;
    let listing = response.json::<BlocksResponse>().await.ok()?;
    Some(listing.blocks)
}

/// Puxa as cadeias de todos os peers conhecidos; peers inacessíveis são
/// simplesmente pulados
async fn collect_peer_chains(ctx: &SharedNode) -> Vec<Vec<Block>> {
    let addresses: Vec<String> = {
        let peers = ctx.peers.read().await;
        peers.all().iter().map(|peer| peer.address.clone()).collect()
    };

    let mut chains = Vec::new();
    for address in addresses {
        match fetch_chain(ctx, &address).await {
            Some(blocks) => chains.push(blocks),
            None => warn!(peer = %address, "peer chain unavailable, skipping"),
        }
    }
    chains
}

/// Difunde um bloco aceito para todos os peers
async fn broadcast_block(ctx: SharedNode, block: Block) {
    let addresses: Vec<String> = {
        let peers = ctx.peers.read().await;
        peers.all().iter().map(|peer| peer.address.clone()).collect()
    };

    for address in addresses {
        let url = format!("http://{address}/blocks");
        if let Err(e) = ctx.http.post(&url).json(&block).send().await {
            warn!(peer = %address, error = %e, "block broadcast failed");
        }
    }
}

/// Difunde uma transação admitida para todos os peers
async fn broadcast_transaction(ctx: SharedNode, submission: TxSubmission) {
    let addresses: Vec<String> = {
        let peers = ctx.peers.read().await;
        peers.all().iter().map(|peer| peer.address.clone()).collect()
    };

    for address in addresses {
        let url = format!("http://{address}/transactions");
        if let Err(e) = ctx.http.post(&url).json(&submission).send().await {
            warn!(peer = %address, error = %e, "transaction broadcast failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_peer_address() {
        assert_eq!(normalize_peer_address("localhost:5000"), "127.0.0.1:5000");
        assert_eq!(normalize_peer_address("0.0.0.0:5000"), "127.0.0.1:5000");
        assert_eq!(normalize_peer_address("10.0.0.7:5001"), "10.0.0.7:5001");
        // Sem porta, o endereco passa intacto
        assert_eq!(normalize_peer_address("example"), "example");
    }

    #[test]
    fn test_peer_registry_dedup() {
        let mut registry = PeerRegistry::default();

        assert!(registry.insert(PeerRecord {
            address: "127.0.0.1:5001".to_string(),
            last_seen: None,
            source: None,
        }));
        // Mesmo endereco nao entra duas vezes
        assert!(!registry.insert(PeerRecord {
            address: "127.0.0.1:5001".to_string(),
            last_seen: None,
            source: Some("other".to_string()),
        }));

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("127.0.0.1:5001"));

        registry.touch("127.0.0.1:5001");
        assert!(registry.all()[0].last_seen.is_some());
    }
}
