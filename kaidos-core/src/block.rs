use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Hash256, Result};
use std::collections::HashMap;

use crate::merkle::{self, ProofStep};
use crate::transaction::Transaction;

/// Bloco da cadeia Kaidos
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Altura: 0 no gênese, crescendo de um em um
    pub index: u64,
    /// Transações; a primeira é a coinbase em blocos não-gênese
    pub transactions: Vec<Transaction>,
    /// Hash do bloco anterior; zeros no gênese
    pub previous_hash: Hash256,
    /// Instante de criação
    pub timestamp: DateTime<Utc>,
    /// Nonce escolhido pelo minerador
    pub nonce: u64,
    /// Hash do bloco sobre os campos do cabeçalho
    pub hash: Hash256,
    /// Endereço que recebe a coinbase; ausente no gênese
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner_address: Option<String>,
    /// Raiz de Merkle das transações
    pub merkle_root: Hash256,
}

impl Block {
    /// Cria um bloco candidato com nonce zero e hash calculado
    ///
    /// # Errors
    ///
    /// Retorna erro se o cálculo do hash falhar
    pub fn new(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: Hash256,
        miner_address: Option<String>,
    ) -> Result<Self> {
        let mut block = Self {
            index,
            merkle_root: merkle::merkle_root(&transactions),
            transactions,
            previous_hash,
            timestamp: Utc::now(),
            nonce: 0,
            hash: Hash256::zero(),
            miner_address,
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    /// Cria o bloco gênese: índice 0, sem transações, antecessor zero
    ///
    /// # Errors
    ///
    /// Retorna erro se o cálculo do hash falhar
    pub fn genesis() -> Result<Self> {
        Self::new(0, Vec::new(), Hash256::zero(), None)
    }

    /// Hash do bloco: SHA-256 do JSON canônico (chaves ordenadas) dos
    /// campos do cabeçalho
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn compute_hash(&self) -> Result<Hash256> {
        let payload = shared::canonical_json(&serde_json::json!({
            "index": self.index,
            "merkle_root": self.merkle_root,
            "previous_hash": self.previous_hash,
            "timestamp": self.timestamp,
            "nonce": self.nonce,
            "miner_address": self.miner_address,
        }))?;
        Ok(Hash256::sha256(payload.as_bytes()))
    }

    /// Gera a prova de Merkle de uma transação deste bloco
    #[must_use]
    pub fn generate_transaction_proof(&self, txid: &Hash256) -> Option<Vec<ProofStep>> {
        merkle::generate_proof(txid, &self.transactions)
    }

    /// Verifica uma prova de Merkle contra a raiz deste bloco
    #[must_use]
    pub fn verify_transaction(&self, txid: &Hash256, proof: &[ProofStep]) -> bool {
        merkle::verify_proof(txid, &self.merkle_root, proof)
    }
}

/// Sequência ordenada de blocos com índice por hash
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Block>", into = "Vec<Block>")]
pub struct BlockStore {
    blocks: Vec<Block>,
    by_hash: HashMap<Hash256, usize>,
}

impl BlockStore {
    /// Cria um armazenamento contendo só o bloco dado (o gênese)
    #[must_use]
    pub fn with_genesis(genesis: Block) -> Self {
        let mut store = Self::default();
        store.push(genesis);
        store
    }

    /// Anexa um bloco ao final da sequência
    pub fn push(&mut self, block: Block) {
        self.by_hash.insert(block.hash, self.blocks.len());
        self.blocks.push(block);
    }

    /// Último bloco da cadeia
    ///
    /// # Panics
    ///
    /// Nunca deve entrar em pânico: o gênese existe por construção
    #[must_use]
    pub fn latest(&self) -> &Block {
        self.blocks.last().unwrap() // Gênese sempre existe
    }

    /// Obtém um bloco pelo hash
    #[must_use]
    pub fn by_hash(&self, hash: &Hash256) -> Option<&Block> {
        self.by_hash.get(hash).map(|&index| &self.blocks[index])
    }

    /// Obtém um bloco pela altura
    #[must_use]
    pub fn by_index(&self, index: u64) -> Option<&Block> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.blocks.get(index))
    }

    /// Blocos no intervalo inclusivo `[start, end]`, em ordem de altura
    #[must_use]
    pub fn range(&self, start: u64, end: u64) -> Vec<Block> {
        self.blocks
            .iter()
            .filter(|block| block.index >= start && block.index <= end)
            .cloned()
            .collect()
    }

    /// Todos os blocos, em ordem de altura
    #[must_use]
    pub fn all(&self) -> &[Block] {
        &self.blocks
    }

    /// Número de blocos
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Verifica se o armazenamento está vazio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Descarta os blocos com altura maior que `height`
    pub fn truncate_after(&mut self, height: u64) {
        let keep = usize::try_from(height.saturating_add(1)).unwrap_or(usize::MAX);
        while self.blocks.len() > keep {
            if let Some(removed) = self.blocks.pop() {
                self.by_hash.remove(&removed.hash);
            }
        }
    }
}

impl From<Vec<Block>> for BlockStore {
    fn from(mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|block| block.index);
        let mut store = Self::default();
        for block in blocks {
            store.push(block);
        }
        store
    }
}

impl From<BlockStore> for Vec<Block> {
    fn from(store: BlockStore) -> Self {
        store.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use shared::COIN;

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis().unwrap();

        assert_eq!(genesis.index, 0);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.previous_hash, Hash256::zero());
        assert_eq!(genesis.previous_hash.to_string(), "0".repeat(64));
        assert_eq!(genesis.merkle_root, Hash256::zero());
        assert!(genesis.miner_address.is_none());
        assert_eq!(genesis.hash, genesis.compute_hash().unwrap());
    }

    #[test]
    fn test_hash_changes_with_nonce() {
        let mut block = Block::genesis().unwrap();
        let original = block.hash;

        block.nonce += 1;
        let rehashed = block.compute_hash().unwrap();
        assert_ne!(original, rehashed);
    }

    #[test]
    fn test_hash_survives_serde_round_trip() {
        let coinbase = Transaction::coinbase("KDMINER", 50 * COIN);
        let block = Block::new(1, vec![coinbase], Hash256::sha256(b"prev"), Some("KDMINER".to_string()))
            .unwrap();

        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();

        // O hash recalculado do documento deserializado e identico
        assert_eq!(back.compute_hash().unwrap(), block.hash);
        assert_eq!(back, block);
    }

    #[test]
    fn test_merkle_proof_through_block() {
        let txs = vec![
            Transaction::coinbase("KDMINER", 50 * COIN),
            Transaction::coinbase("KDOTHER", 25 * COIN),
        ];
        let block = Block::new(1, txs, Hash256::zero(), Some("KDMINER".to_string())).unwrap();

        let txid = block.transactions[1].txid;
        let proof = block.generate_transaction_proof(&txid).unwrap();
        assert!(block.verify_transaction(&txid, &proof));

        let missing = Hash256::sha256(b"missing");
        assert!(block.generate_transaction_proof(&missing).is_none());
    }

    #[test]
    fn test_block_store_queries() {
        let genesis = Block::genesis().unwrap();
        let genesis_hash = genesis.hash;
        let mut store = BlockStore::with_genesis(genesis);

        let block1 = Block::new(1, vec![], genesis_hash, Some("KDMINER".to_string())).unwrap();
        let block1_hash = block1.hash;
        store.push(block1);

        assert_eq!(store.len(), 2);
        assert_eq!(store.latest().index, 1);
        assert_eq!(store.by_hash(&block1_hash).unwrap().index, 1);
        assert_eq!(store.by_index(0).unwrap().hash, genesis_hash);
        assert!(store.by_index(5).is_none());
        assert_eq!(store.range(0, 10).len(), 2);
        assert_eq!(store.range(1, 1).len(), 1);
    }

    #[test]
    fn test_truncate_after() {
        let genesis = Block::genesis().unwrap();
        let mut store = BlockStore::with_genesis(genesis);
        let mut prev = store.latest().hash;

        for i in 1..=3 {
            let block = Block::new(i, vec![], prev, Some("KDMINER".to_string())).unwrap();
            prev = block.hash;
            store.push(block);
        }

        let dropped_hash = store.by_index(3).unwrap().hash;
        store.truncate_after(1);

        assert_eq!(store.len(), 2);
        assert_eq!(store.latest().index, 1);
        assert!(store.by_hash(&dropped_hash).is_none());
    }
}
