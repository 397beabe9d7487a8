use serde::{Deserialize, Serialize};
use shared::{block_reward, Amount, Hash256, KaidosError, Result};
use tracing::info;

use crate::block::{Block, BlockStore};
use crate::keys::KeyResolver;
use crate::mempool::{Mempool, TransactionDebug};
use crate::miner::Miner;
use crate::storage::ChainState;
use crate::transaction::{Transaction, TxInput, TxOutput};
use crate::utxo::{UtxoRecord, UtxoStore};

/// Parâmetros da rede Kaidos
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    /// Recompensa inicial por bloco, na menor unidade
    pub initial_reward: Amount,
    /// Intervalo de halving em blocos
    pub halving_interval: u64,
    /// Dificuldade padrão (zeros hexadecimais iniciais)
    pub default_difficulty: u32,
    /// Tempo alvo entre blocos, em segundos
    pub target_block_time_secs: u64,
    /// Janela de blocos para o ajuste de dificuldade
    pub difficulty_window: usize,
    /// Vantagem de trabalho exigida de cadeias totalmente divergentes
    pub work_advantage: f64,
    /// Máximo de transações pendentes incluídas por bloco
    pub mempool_limit: usize,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            initial_reward: shared::INITIAL_REWARD,
            halving_interval: shared::HALVING_INTERVAL,
            default_difficulty: 4,
            target_block_time_secs: 600,
            difficulty_window: 10,
            work_advantage: 1.1, // 10% a mais de trabalho acumulado
            mempool_limit: 100,
        }
    }
}

/// Modo de validação de blocos.
///
/// `Full` é o caminho de anexação local; `Relaxed` valida cadeias
/// externas, onde o estado local de UTXOs não reflete o histórico do
/// candidato (estrutura, encadeamento e prova de trabalho apenas).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Full,
    Relaxed,
}

/// Estado da cadeia Kaidos: blocos, conjunto de UTXOs e mempool.
///
/// É o estado do escritor único: toda mutação (anexar bloco, admitir
/// transação, reorganizar) passa por `&mut self`.
#[derive(Debug, Clone)]
pub struct Blockchain {
    pub(crate) blocks: BlockStore,
    pub(crate) utxos: UtxoStore,
    pub(crate) mempool: Mempool,
    pub(crate) params: ChainParams,
}

impl Blockchain {
    /// Cria uma nova cadeia contendo só o bloco gênese
    ///
    /// # Errors
    ///
    /// Retorna erro se a criação do gênese falhar
    pub fn new(params: ChainParams) -> Result<Self> {
        let genesis = Block::genesis()?;
        info!(hash = %genesis.hash, "genesis block created");

        Ok(Self {
            blocks: BlockStore::with_genesis(genesis),
            utxos: UtxoStore::new(),
            mempool: Mempool::new(),
            params,
        })
    }

    /// Reconstrói a cadeia a partir de um estado persistido
    ///
    /// # Errors
    ///
    /// Retorna erro se o estado não contiver um gênese
    pub fn from_state(state: ChainState, params: ChainParams) -> Result<Self> {
        if state.blocks.is_empty() {
            return Err(KaidosError::Database(
                "Persisted state has no blocks".to_string(),
            ));
        }

        Ok(Self {
            blocks: BlockStore::from(state.blocks),
            utxos: UtxoStore::from(state.utxos),
            mempool: Mempool::from(state.mempool),
            params,
        })
    }

    /// Estado serializável da cadeia (o documento persistido)
    #[must_use]
    pub fn state(&self) -> ChainState {
        ChainState {
            blocks: self.blocks.clone().into(),
            utxos: self.utxos.clone().into(),
            mempool: self.mempool.clone().into(),
        }
    }

    /// Parâmetros da rede
    #[must_use]
    pub const fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Último bloco da cadeia
    #[must_use]
    pub fn latest_block(&self) -> &Block {
        self.blocks.latest()
    }

    /// Obtém um bloco pelo hash
    #[must_use]
    pub fn block_by_hash(&self, hash: &Hash256) -> Option<&Block> {
        self.blocks.by_hash(hash)
    }

    /// Obtém um bloco pela altura
    #[must_use]
    pub fn block_by_index(&self, index: u64) -> Option<&Block> {
        self.blocks.by_index(index)
    }

    /// Blocos no intervalo inclusivo `[start, end]`
    #[must_use]
    pub fn blocks_range(&self, start: u64, end: u64) -> Vec<Block> {
        self.blocks.range(start, end)
    }

    /// Número de blocos na cadeia
    #[must_use]
    pub fn chain_length(&self) -> usize {
        self.blocks.len()
    }

    /// Conjunto atual de UTXOs
    #[must_use]
    pub const fn utxos(&self) -> &UtxoStore {
        &self.utxos
    }

    /// UTXOs de um endereço
    #[must_use]
    pub fn utxos_for_address(&self, address: &str) -> Vec<UtxoRecord> {
        self.utxos
            .list_by_address(address)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Saldo de um endereço
    #[must_use]
    pub fn balance(&self, address: &str) -> Amount {
        self.utxos.balance(address)
    }

    /// Mempool
    #[must_use]
    pub const fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// Transações pendentes, ordenadas por timestamp
    #[must_use]
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.mempool.pending(self.params.mempool_limit)
    }

    /// Admite uma transação no mempool
    ///
    /// # Errors
    ///
    /// Retorna o erro de validação da admissão
    pub fn add_transaction(
        &mut self,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        keys: &dyn KeyResolver,
    ) -> Result<Hash256> {
        self.mempool
            .add_transaction(inputs, outputs, &mut self.utxos, keys)
    }

    /// Relatório de diagnóstico de uma transação, sem efeitos colaterais
    #[must_use]
    pub fn debug_transaction(&self, tx: &Transaction, keys: &dyn KeyResolver) -> TransactionDebug {
        self.mempool.debug_transaction(tx, &self.utxos, keys)
    }

    /// Recompensa de coinbase para a altura dada
    #[must_use]
    pub const fn reward(&self, height: u64) -> Amount {
        // Os parametros padrao seguem a agenda global de halving
        if self.params.initial_reward == shared::INITIAL_REWARD
            && self.params.halving_interval == shared::HALVING_INTERVAL
        {
            block_reward(height)
        } else {
            let halvings = height / self.params.halving_interval;
            if halvings >= Amount::BITS as u64 {
                0
            } else {
                self.params.initial_reward >> halvings
            }
        }
    }

    /// Total de taxas pagas por um conjunto de transações
    ///
    /// # Errors
    ///
    /// Retorna erro se alguma taxa não puder ser calculada
    pub fn total_fees(&self, transactions: &[Transaction]) -> Result<Amount> {
        let mut total = 0u64;

        for tx in transactions {
            let fee = tx.fee(&self.utxos)?;
            total = total
                .checked_add(fee)
                .ok_or_else(|| KaidosError::InvalidTransaction("Fee overflow".to_string()))?;
        }

        Ok(total)
    }

    /// Dificuldade corrente, derivada dos últimos blocos.
    ///
    /// A âncora é a menor contagem de zeros observada entre os blocos
    /// minerados da janela (a dificuldade sob a qual todos eles são
    /// válidos). A média dos intervalos ajusta a âncora em ±1 contra o
    /// tempo alvo; qualquer janela degenerada cai no padrão.
    #[must_use]
    pub fn difficulty(&self) -> u32 {
        let length = self.blocks.len();
        let window = self.params.difficulty_window.min(length);
        if window < 2 {
            return self.params.default_difficulty;
        }

        let blocks = &self.blocks.all()[length - window..];

        let mut timestamps: Vec<_> = blocks.iter().map(|block| block.timestamp).collect();
        timestamps.sort();

        #[allow(clippy::cast_precision_loss)] // Intervalos de tempo cabem em f64
        let intervals: Vec<f64> = timestamps
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0)
            .collect();
        if intervals.is_empty() {
            return self.params.default_difficulty;
        }

        #[allow(clippy::cast_precision_loss)]
        let average = intervals.iter().sum::<f64>() / intervals.len() as f64;

        let anchor = blocks
            .iter()
            .filter(|block| block.index > 0)
            .map(|block| block.hash.leading_hex_zeros())
            .min()
            .unwrap_or(self.params.default_difficulty)
            .max(1);

        #[allow(clippy::cast_precision_loss)]
        let target = self.params.target_block_time_secs as f64;

        if average < target / 2.0 {
            anchor + 1
        } else if average > target * 2.0 {
            anchor.saturating_sub(1).max(1)
        } else {
            anchor
        }
    }

    /// Valida um bloco candidato contra a ponta atual
    ///
    /// # Errors
    ///
    /// Retorna `InvalidBlock` (ou o erro de transação correspondente)
    /// quando alguma regra falha
    pub fn validate_block(
        &self,
        block: &Block,
        mode: ValidationMode,
        keys: &dyn KeyResolver,
    ) -> Result<()> {
        let latest = self.blocks.latest();

        if block.index != latest.index + 1 {
            return Err(KaidosError::InvalidBlock(format!(
                "Invalid index: expected {}, got {}",
                latest.index + 1,
                block.index
            )));
        }

        if block.previous_hash != latest.hash {
            return Err(KaidosError::InvalidBlock(
                "Invalid previous hash".to_string(),
            ));
        }

        if block.compute_hash()? != block.hash {
            return Err(KaidosError::InvalidBlock(
                "Block hash does not recompute".to_string(),
            ));
        }

        let difficulty = match mode {
            ValidationMode::Full => self.difficulty(),
            ValidationMode::Relaxed => self.params.default_difficulty,
        };
        if !block.hash.meets_difficulty(difficulty) {
            return Err(KaidosError::InvalidBlock(format!(
                "Insufficient proof of work for difficulty {difficulty}"
            )));
        }

        if mode == ValidationMode::Relaxed {
            return Ok(());
        }

        if crate::merkle::merkle_root(&block.transactions) != block.merkle_root {
            return Err(KaidosError::InvalidBlock("Invalid merkle root".to_string()));
        }

        self.validate_coinbase(block)?;

        // Cada transacao normal contra o estado imediatamente anterior
        // ao bloco
        for tx in block.transactions.iter().skip(1) {
            self.mempool.validate_for_block(tx, &self.utxos, keys)?;
        }

        Ok(())
    }

    fn validate_coinbase(&self, block: &Block) -> Result<()> {
        let Some(coinbase) = block.transactions.first() else {
            return Err(KaidosError::InvalidBlock(
                "Block has no transactions".to_string(),
            ));
        };

        if !coinbase.is_coinbase() {
            return Err(KaidosError::InvalidBlock(
                "First transaction is not coinbase".to_string(),
            ));
        }
        if !coinbase.inputs.is_empty() {
            return Err(KaidosError::InvalidBlock(
                "Coinbase must not have inputs".to_string(),
            ));
        }
        if block.transactions.iter().skip(1).any(Transaction::is_coinbase) {
            return Err(KaidosError::InvalidBlock(
                "Multiple coinbase transactions".to_string(),
            ));
        }
        if coinbase.outputs.len() != 1 {
            return Err(KaidosError::InvalidBlock(
                "Coinbase must have exactly one output".to_string(),
            ));
        }

        let fees = self.total_fees(&block.transactions[1..])?;
        let expected = self.reward(block.index).checked_add(fees).ok_or_else(|| {
            KaidosError::InvalidBlock("Coinbase value overflow".to_string())
        })?;

        // Comparacao exata em ponto fixo
        if coinbase.outputs[0].amount != expected {
            return Err(KaidosError::InvalidBlock(format!(
                "Invalid coinbase reward: expected {expected}, got {}",
                coinbase.outputs[0].amount
            )));
        }

        if block.miner_address.as_deref() != Some(coinbase.outputs[0].address.as_str()) {
            return Err(KaidosError::InvalidBlock(
                "Coinbase output does not pay the miner".to_string(),
            ));
        }

        Ok(())
    }

    /// Valida e anexa um bloco. Na aceitação, atomicamente: persiste o
    /// bloco, remove os UTXOs consumidos, cria os produzidos e tira as
    /// transações incluídas do mempool.
    ///
    /// # Errors
    ///
    /// Retorna o erro de validação; em caso de erro nada é mutado
    pub fn append_block(&mut self, block: Block, keys: &dyn KeyResolver) -> Result<()> {
        self.validate_block(&block, ValidationMode::Full, keys)?;

        // Aplicar sobre uma copia e so entao trocar o estado
        let mut utxos = self.utxos.clone();
        Self::apply_block(&block, &mut utxos)?;

        let included: Vec<Hash256> = block.transactions.iter().map(|tx| tx.txid).collect();

        info!(index = block.index, hash = %block.hash, "block appended");
        self.blocks.push(block);
        self.utxos = utxos;
        self.mempool.remove_transactions(&included);

        // Transacoes pendentes cujos inputs este bloco consumiu (por
        // exemplo, a mesma remessa admitida sob outro txid) sao orfas
        if !self.mempool.is_empty() {
            self.revalidate_mempool(keys);
        }

        Ok(())
    }

    /// Aplica as transações de um bloco a um conjunto de UTXOs:
    /// inputs consumidos saem, outputs entram
    pub(crate) fn apply_block(block: &Block, utxos: &mut UtxoStore) -> Result<()> {
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    utxos.remove(input.txid, input.vout);
                }
            }

            for (index, output) in tx.outputs.iter().enumerate() {
                let vout = u32::try_from(index).map_err(|_| {
                    KaidosError::InvalidBlock("Output index overflow".to_string())
                })?;
                utxos.insert(UtxoRecord::new(
                    tx.txid,
                    vout,
                    output.address.clone(),
                    output.amount,
                ));
            }
        }

        Ok(())
    }

    /// Monta o candidato de mineração sobre a ponta atual.
    /// Devolve o bloco não-selado, a recompensa total (recompensa +
    /// taxas) e a dificuldade a satisfazer.
    ///
    /// # Errors
    ///
    /// Retorna erro se as taxas ou o candidato não puderem ser montados
    pub fn prepare_candidate(&self, miner: &Miner) -> Result<(Block, Amount, u32)> {
        let pending = self.pending_transactions();
        let reward = self.reward(self.latest_block().index + 1);
        let fees = self.total_fees(&pending)?;

        let candidate = miner.build_candidate(self.latest_block(), pending, reward, fees)?;
        let total = reward.checked_add(fees).ok_or_else(|| {
            KaidosError::InvalidBlock("Coinbase value overflow".to_string())
        })?;

        Ok((candidate, total, self.difficulty()))
    }

    /// Minera e anexa o próximo bloco. Devolve o bloco selado e a
    /// recompensa total paga ao minerador.
    ///
    /// # Errors
    ///
    /// Retorna erro se a mineração ou a anexação falharem
    pub fn mine_next_block(
        &mut self,
        miner: &Miner,
        keys: &dyn KeyResolver,
    ) -> Result<(Block, Amount)> {
        let (candidate, total_reward, difficulty) = self.prepare_candidate(miner)?;
        let result = miner.seal(candidate, difficulty)?;

        self.append_block(result.block.clone(), keys)?;
        Ok((result.block, total_reward))
    }

    /// Varredura completa da cadeia: contiguidade, encadeamento,
    /// recomputação de hash e prova de trabalho na dificuldade padrão
    ///
    /// # Errors
    ///
    /// Retorna `ChainInvalid` com o primeiro defeito encontrado
    pub fn validate_chain(&self) -> Result<()> {
        let blocks = self.blocks.all();

        for i in 1..blocks.len() {
            let current = &blocks[i];
            let previous = &blocks[i - 1];

            if current.index != previous.index + 1 {
                return Err(KaidosError::ChainInvalid(format!(
                    "Non-contiguous index at height {}",
                    current.index
                )));
            }
            if current.previous_hash != previous.hash {
                return Err(KaidosError::ChainInvalid(format!(
                    "Broken linkage at height {}",
                    current.index
                )));
            }
            if current.compute_hash()? != current.hash {
                return Err(KaidosError::ChainInvalid(format!(
                    "Hash mismatch at height {}",
                    current.index
                )));
            }
            if !current.hash.meets_difficulty(self.params.default_difficulty) {
                return Err(KaidosError::ChainInvalid(format!(
                    "Insufficient proof of work at height {}",
                    current.index
                )));
            }
        }

        Ok(())
    }

    /// Estatísticas da cadeia
    #[must_use]
    pub fn stats(&self) -> BlockchainStats {
        BlockchainStats {
            height: self.latest_block().index,
            total_blocks: self.blocks.len() as u64,
            total_transactions: self
                .blocks
                .all()
                .iter()
                .map(|block| block.transactions.len() as u64)
                .sum(),
            total_utxos: self.utxos.len() as u64,
            mempool_size: self.mempool.len() as u64,
            difficulty: self.difficulty(),
        }
    }
}

/// Estatísticas da cadeia
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainStats {
    pub height: u64,
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub total_utxos: u64,
    pub mempool_size: u64,
    pub difficulty: u32,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers de teste compartilhados entre os módulos da cadeia.

    use super::*;
    use chrono::{Duration, Utc};

    /// Minera um bloco com timestamp deslocado, para que o ajuste de
    /// dificuldade veja intervalos controlados entre os blocos
    pub fn mine_spaced(
        chain: &Blockchain,
        miner_address: &str,
        transactions: Vec<Transaction>,
        minutes_from_now: i64,
    ) -> Block {
        let latest = chain.latest_block();
        let reward = chain.reward(latest.index + 1);
        let fees = chain.total_fees(&transactions).unwrap();

        let coinbase = Transaction::coinbase(miner_address, reward + fees);
        let mut all = vec![coinbase];
        all.extend(transactions);

        let mut block = Block::new(
            latest.index + 1,
            all,
            latest.hash,
            Some(miner_address.to_string()),
        )
        .unwrap();
        block.timestamp = Utc::now() + Duration::minutes(minutes_from_now);
        block.hash = block.compute_hash().unwrap();

        // Sela na mesma dificuldade que a anexacao vai exigir
        let difficulty = chain.difficulty();
        while !block.hash.meets_difficulty(difficulty) {
            block.nonce += 1;
            block.hash = block.compute_hash().unwrap();
        }

        block
    }

    /// Estende a cadeia com `count` blocos de coinbase espaçados de dez
    /// minutos à frente do gênese, segurando a dificuldade no padrão
    pub fn extend_chain(chain: &mut Blockchain, miner_address: &str, count: u64) {
        let keys = crate::keys::MemoryKeyResolver::new();
        let offset = i64::try_from(chain.latest_block().index).unwrap();
        for i in 0..count {
            let minutes = 10 * (offset + 1 + i64::try_from(i).unwrap());
            let block = mine_spaced(chain, miner_address, vec![], minutes);
            chain.append_block(block, &keys).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{extend_chain, mine_spaced};
    use super::*;
    use crate::keys::MemoryKeyResolver;
    use shared::{sign_input, KeyPair, COIN};

    #[test]
    fn test_genesis_only_chain() {
        let chain = Blockchain::new(ChainParams::default()).unwrap();

        assert_eq!(chain.chain_length(), 1);
        let genesis = chain.block_by_index(0).unwrap();
        assert_eq!(genesis.previous_hash.to_string(), "0".repeat(64));
        assert!(genesis.transactions.is_empty());
        assert!(chain.utxos().is_empty());
        assert!(chain.validate_chain().is_ok());
    }

    #[test]
    fn test_mine_one_block() {
        let mut chain = Blockchain::new(ChainParams::default()).unwrap();
        extend_chain(&mut chain, "KDTEST1", 1);

        assert_eq!(chain.chain_length(), 2);

        let block = chain.block_by_index(1).unwrap().clone();
        let coinbase = &block.transactions[0];
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.outputs[0].amount, 50 * COIN);
        assert_eq!(coinbase.outputs[0].address, "KDTEST1");

        // O conjunto de UTXOs contem exatamente a saida da coinbase
        assert_eq!(chain.utxos().len(), 1);
        let utxo = chain.utxos().get(coinbase.txid, 0).unwrap();
        assert_eq!(utxo.address, "KDTEST1");
        assert_eq!(utxo.amount, 50 * COIN);
        assert_eq!(chain.balance("KDTEST1"), 50 * COIN);
    }

    #[test]
    fn test_spend_with_fee() {
        let keypair = KeyPair::generate().unwrap();
        let address = keypair.address().unwrap();
        let mut keys = MemoryKeyResolver::new();
        keys.register(&address, keypair.public_key_pem().unwrap());

        let mut chain = Blockchain::new(ChainParams::default()).unwrap();
        extend_chain(&mut chain, &address, 1);
        let funding_txid = chain.block_by_index(1).unwrap().transactions[0].txid;

        // Gasta a coinbase: 30 para KDBOB, 19.5 de troco, 0.5 de taxa
        let signature = sign_input(&keypair.private_key, &funding_txid.to_string(), 0).unwrap();
        chain
            .add_transaction(
                vec![TxInput::new(funding_txid, 0, signature)],
                vec![
                    TxOutput::new("KDBOB", 30 * COIN),
                    TxOutput::new(&address, 19 * COIN + COIN / 2),
                ],
                &keys,
            )
            .unwrap();

        let pending = chain.pending_transactions();
        let block = mine_spaced(&chain, &address, pending, 20);
        chain.append_block(block, &keys).unwrap();

        assert_eq!(chain.balance("KDBOB"), 30 * COIN);
        // Troco + coinbase do segundo bloco (recompensa + taxa de 0.5)
        let expected =
            19 * COIN + COIN / 2 + chain.reward(2) + COIN / 2;
        assert_eq!(chain.balance(&address), expected);
        assert!(chain.mempool().is_empty());
    }

    #[test]
    fn test_append_rejects_bad_blocks() {
        let keys = MemoryKeyResolver::new();
        let mut chain = Blockchain::new(ChainParams::default()).unwrap();

        // Indice errado
        let mut block = mine_spaced(&chain, "KDMINER", vec![], 10);
        block.index = 5;
        block.hash = block.compute_hash().unwrap();
        assert!(matches!(
            chain.append_block(block, &keys),
            Err(KaidosError::InvalidBlock(_))
        ));

        // previous_hash errado
        let mut block = mine_spaced(&chain, "KDMINER", vec![], 10);
        block.previous_hash = Hash256::sha256(b"wrong");
        block.hash = block.compute_hash().unwrap();
        assert!(chain.append_block(block, &keys).is_err());

        // Hash que nao recomputa
        let mut block = mine_spaced(&chain, "KDMINER", vec![], 10);
        block.hash = Hash256::sha256(b"forged");
        assert!(chain.append_block(block, &keys).is_err());

        // Recompensa de coinbase errada
        let mut block = mine_spaced(&chain, "KDMINER", vec![], 10);
        block.transactions[0].outputs[0].amount = 60 * COIN;
        block.merkle_root = crate::merkle::merkle_root(&block.transactions);
        block.hash = block.compute_hash().unwrap();
        while !block.hash.meets_difficulty(4) {
            block.nonce += 1;
            block.hash = block.compute_hash().unwrap();
        }
        let err = chain.append_block(block, &keys).unwrap_err();
        assert!(matches!(err, KaidosError::InvalidBlock(_)));

        assert_eq!(chain.chain_length(), 1);
    }

    #[test]
    fn test_reward_halving_schedule() {
        let chain = Blockchain::new(ChainParams::default()).unwrap();

        assert_eq!(chain.reward(0), 50 * COIN);
        assert_eq!(chain.reward(210_000), 25 * COIN);
        assert_eq!(chain.reward(420_000), 12 * COIN + COIN / 2);
    }

    #[test]
    fn test_difficulty_default_for_short_chain() {
        let mut chain = Blockchain::new(ChainParams::default()).unwrap();
        assert_eq!(chain.difficulty(), 4);

        // Blocos espacados de dez minutos seguram a dificuldade
        extend_chain(&mut chain, "KDMINER", 3);
        assert_eq!(chain.difficulty(), 4);
    }

    #[test]
    fn test_difficulty_adjusts_up_and_down() {
        let keys = MemoryKeyResolver::new();

        // Blocos muito rapidos (1 minuto) sobem a dificuldade
        let mut fast = Blockchain::new(ChainParams::default()).unwrap();
        for i in 0..3u64 {
            let block = mine_spaced(&fast, "KDMINER", vec![], i as i64 + 1);
            fast.append_block(block, &keys).unwrap();
        }
        assert!(fast.difficulty() > 4);

        // Blocos muito lentos (40 minutos) descem a dificuldade
        let mut slow = Blockchain::new(ChainParams::default()).unwrap();
        for i in 0..3u64 {
            let block = mine_spaced(&slow, "KDMINER", vec![], 40 * (i as i64 + 1));
            slow.append_block(block, &keys).unwrap();
        }
        assert!(slow.difficulty() < 4);
    }

    #[test]
    fn test_state_round_trip() {
        let mut chain = Blockchain::new(ChainParams::default()).unwrap();
        extend_chain(&mut chain, "KDMINER", 2);

        let state = chain.state();
        let restored = Blockchain::from_state(state, ChainParams::default()).unwrap();

        assert_eq!(restored.chain_length(), 3);
        assert_eq!(restored.latest_block().hash, chain.latest_block().hash);
        assert_eq!(restored.balance("KDMINER"), chain.balance("KDMINER"));
        assert!(restored.validate_chain().is_ok());
    }

    #[test]
    fn test_stats() {
        let mut chain = Blockchain::new(ChainParams::default()).unwrap();
        extend_chain(&mut chain, "KDMINER", 2);

        let stats = chain.stats();
        assert_eq!(stats.height, 2);
        assert_eq!(stats.total_blocks, 3);
        assert_eq!(stats.total_transactions, 2); // duas coinbases
        assert_eq!(stats.total_utxos, 2);
        assert_eq!(stats.mempool_size, 0);
    }
}
