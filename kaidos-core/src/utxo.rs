use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Amount, Hash256};
use std::collections::{BTreeSet, HashMap};

/// Identificador único de um UTXO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    /// Cria um novo `OutPoint`
    #[must_use]
    pub const fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

/// Saída de transação não gasta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    /// Transação que criou o output
    pub txid: Hash256,
    /// Índice do output na transação
    pub vout: u32,
    /// Endereço dono do output
    pub address: String,
    /// Valor na menor unidade
    pub amount: Amount,
    /// Instante de criação do registro
    pub created_at: DateTime<Utc>,
    /// Reserva leve consumida pela admissão no mempool; não remove o
    /// registro
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub spent_in_mempool: bool,
}

impl UtxoRecord {
    /// Cria um novo registro de UTXO
    #[must_use]
    pub fn new(txid: Hash256, vout: u32, address: String, amount: Amount) -> Self {
        Self {
            txid,
            vout,
            address,
            amount,
            created_at: Utc::now(),
            spent_in_mempool: false,
        }
    }

    /// Identificador único do registro
    #[must_use]
    pub const fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}

/// Conjunto de UTXOs com índice secundário por endereço.
///
/// `(txid, vout)` é chave única. As atualizações de flag são feitas
/// in-place, mantendo a identidade do registro estável.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<UtxoRecord>", into = "Vec<UtxoRecord>")]
pub struct UtxoStore {
    utxos: HashMap<OutPoint, UtxoRecord>,
    by_address: HashMap<String, BTreeSet<OutPoint>>,
}

impl UtxoStore {
    /// Cria um conjunto vazio
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insere um registro, substituindo qualquer registro anterior com a
    /// mesma chave `(txid, vout)`
    pub fn insert(&mut self, record: UtxoRecord) {
        let outpoint = record.outpoint();
        if let Some(previous) = self.utxos.insert(outpoint, record) {
            self.unindex(&previous.address, outpoint);
        }
        // O clone do endereco vive no indice secundario
        if let Some(inserted) = self.utxos.get(&outpoint) {
            self.by_address
                .entry(inserted.address.clone())
                .or_default()
                .insert(outpoint);
        }
    }

    /// Obtém um registro pela chave
    #[must_use]
    pub fn get(&self, txid: Hash256, vout: u32) -> Option<&UtxoRecord> {
        self.utxos.get(&OutPoint::new(txid, vout))
    }

    /// Verifica se a chave existe
    #[must_use]
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    /// Remove um registro. Idempotente: remover uma chave ausente
    /// retorna `false` sem efeito.
    pub fn remove(&mut self, txid: Hash256, vout: u32) -> bool {
        let outpoint = OutPoint::new(txid, vout);
        match self.utxos.remove(&outpoint) {
            Some(record) => {
                self.unindex(&record.address, outpoint);
                true
            }
            None => false,
        }
    }

    /// Marca um UTXO como reservado por uma transação do mempool
    pub fn mark_spent_in_mempool(&mut self, txid: Hash256, vout: u32) -> bool {
        match self.utxos.get_mut(&OutPoint::new(txid, vout)) {
            Some(record) => {
                record.spent_in_mempool = true;
                true
            }
            None => false,
        }
    }

    /// Remove todas as reservas de mempool (usado na reavaliação após
    /// uma reorganização)
    pub fn clear_mempool_flags(&mut self) {
        for record in self.utxos.values_mut() {
            record.spent_in_mempool = false;
        }
    }

    /// Lista os registros de um endereço, em ordem estável de chave
    #[must_use]
    pub fn list_by_address(&self, address: &str) -> Vec<&UtxoRecord> {
        self.by_address
            .get(address)
            .map(|outpoints| {
                outpoints
                    .iter()
                    .filter_map(|outpoint| self.utxos.get(outpoint))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Saldo de um endereço: soma dos valores de seus UTXOs
    #[must_use]
    pub fn balance(&self, address: &str) -> Amount {
        self.list_by_address(address)
            .iter()
            .map(|record| record.amount)
            .sum()
    }

    /// Remove todos os registros
    pub fn clear_all(&mut self) {
        self.utxos.clear();
        self.by_address.clear();
    }

    /// Número de registros
    #[must_use]
    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    /// Verifica se o conjunto está vazio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    /// Itera sobre todos os registros
    pub fn iter(&self) -> impl Iterator<Item = &UtxoRecord> {
        self.utxos.values()
    }

    fn unindex(&mut self, address: &str, outpoint: OutPoint) {
        if let Some(outpoints) = self.by_address.get_mut(address) {
            outpoints.remove(&outpoint);
            if outpoints.is_empty() {
                self.by_address.remove(address);
            }
        }
    }
}

impl From<Vec<UtxoRecord>> for UtxoStore {
    fn from(records: Vec<UtxoRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }
}

impl From<UtxoStore> for Vec<UtxoRecord> {
    fn from(store: UtxoStore) -> Self {
        // Ordem estavel no documento persistido
        let mut records: Self = store.utxos.into_values().collect();
        records.sort_by_key(UtxoRecord::outpoint);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::COIN;

    fn record(seed: &[u8], vout: u32, address: &str, amount: Amount) -> UtxoRecord {
        UtxoRecord::new(Hash256::sha256(seed), vout, address.to_string(), amount)
    }

    #[test]
    fn test_insert_get_remove() {
        let mut store = UtxoStore::new();
        let utxo = record(b"tx", 0, "KDALICE", 50 * COIN);
        let outpoint = utxo.outpoint();

        store.insert(utxo.clone());
        assert!(store.contains(&outpoint));
        assert_eq!(store.get(utxo.txid, 0).unwrap().amount, 50 * COIN);
        assert_eq!(store.len(), 1);

        // Remocao observavel e idempotente
        assert!(store.remove(utxo.txid, 0));
        assert!(store.get(utxo.txid, 0).is_none());
        assert!(!store.remove(utxo.txid, 0));
        assert!(store.is_empty());
    }

    #[test]
    fn test_mark_spent_in_mempool_is_in_place() {
        let mut store = UtxoStore::new();
        let utxo = record(b"tx", 0, "KDALICE", COIN);
        store.insert(utxo.clone());

        assert!(store.mark_spent_in_mempool(utxo.txid, 0));
        // A atualizacao e visivel e o registro continua existindo
        assert!(store.get(utxo.txid, 0).unwrap().spent_in_mempool);
        assert_eq!(store.len(), 1);

        store.clear_mempool_flags();
        assert!(!store.get(utxo.txid, 0).unwrap().spent_in_mempool);

        // Marcar chave ausente nao tem efeito
        assert!(!store.mark_spent_in_mempool(Hash256::zero(), 9));
    }

    #[test]
    fn test_address_index_and_balance() {
        let mut store = UtxoStore::new();
        store.insert(record(b"a", 0, "KDALICE", 10 * COIN));
        store.insert(record(b"a", 1, "KDALICE", 20 * COIN));
        store.insert(record(b"b", 0, "KDBOB", 30 * COIN));

        assert_eq!(store.list_by_address("KDALICE").len(), 2);
        assert_eq!(store.balance("KDALICE"), 30 * COIN);
        assert_eq!(store.balance("KDBOB"), 30 * COIN);
        assert_eq!(store.balance("KDNOBODY"), 0);

        let alice_utxo = record(b"a", 0, "KDALICE", 10 * COIN);
        store.remove(alice_utxo.txid, 0);
        assert_eq!(store.balance("KDALICE"), 20 * COIN);
    }

    #[test]
    fn test_reinsert_same_key_replaces() {
        let mut store = UtxoStore::new();
        store.insert(record(b"a", 0, "KDALICE", COIN));
        store.insert(record(b"a", 0, "KDBOB", 2 * COIN));

        assert_eq!(store.len(), 1);
        assert_eq!(store.balance("KDALICE"), 0);
        assert_eq!(store.balance("KDBOB"), 2 * COIN);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut store = UtxoStore::new();
        store.insert(record(b"a", 0, "KDALICE", COIN));
        store.insert(record(b"b", 2, "KDBOB", 3 * COIN));
        store.mark_spent_in_mempool(Hash256::sha256(b"a"), 0);

        let json = serde_json::to_string(&store).unwrap();
        let back: UtxoStore = serde_json::from_str(&json).unwrap();

        assert_eq!(back.len(), 2);
        assert!(back.get(Hash256::sha256(b"a"), 0).unwrap().spent_in_mempool);
        assert_eq!(back.balance("KDBOB"), 3 * COIN);
    }
}
