//! Resolução de chaves públicas para validação de assinaturas.
//!
//! Os endereços são hashes de chaves, então o validador precisa de um
//! diretório endereço → chave pública. O diretório é um handle explícito
//! injetado pelo chamador; tipicamente a carteira local do nó.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::verify_input;
use std::collections::HashMap;

use crate::transaction::TxInput;

/// Registro de um endereço multisig m-de-n
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigRecord {
    /// Endereço derivado (prefixo "KDM")
    pub address: String,
    /// Chaves públicas participantes, em PEM
    pub public_keys: Vec<String>,
    /// Número mínimo de assinaturas válidas
    pub required_signatures: usize,
    /// Instante de criação do registro
    pub created_at: DateTime<Utc>,
}

impl MultisigRecord {
    /// Verifica um input multisig: exige ao menos `required_signatures`
    /// assinaturas válidas sobre índices de chave distintos e dentro do
    /// intervalo. Um índice repetido não conta duas vezes.
    #[must_use]
    pub fn verify_input(&self, input: &TxInput) -> bool {
        if input.signatures.len() < self.required_signatures {
            return false;
        }

        let txid = input.txid.to_string();
        let mut valid = 0usize;
        let mut used_keys = std::collections::HashSet::new();

        for partial in &input.signatures {
            if partial.key_index >= self.public_keys.len()
                || used_keys.contains(&partial.key_index)
            {
                continue;
            }

            let pem = &self.public_keys[partial.key_index];
            if verify_input(pem, &txid, input.vout, &partial.signature) {
                valid += 1;
                used_keys.insert(partial.key_index);

                if valid >= self.required_signatures {
                    return true;
                }
            }
        }

        false
    }
}

/// Diretório endereço → chave usado pelo validador de transações
pub trait KeyResolver {
    /// Chave pública (PEM) de um endereço single-sig
    fn public_key_pem(&self, address: &str) -> Option<String>;

    /// Registro de um endereço multisig
    fn multisig_record(&self, address: &str) -> Option<MultisigRecord>;
}

/// Resolver em memória, para testes e nós embutidos
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyResolver {
    keys: HashMap<String, String>,
    multisig: HashMap<String, MultisigRecord>,
}

impl MemoryKeyResolver {
    /// Cria um resolver vazio
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra a chave pública de um endereço
    pub fn register(&mut self, address: impl Into<String>, public_key_pem: impl Into<String>) {
        self.keys.insert(address.into(), public_key_pem.into());
    }

    /// Registra um endereço multisig
    pub fn register_multisig(&mut self, record: MultisigRecord) {
        self.multisig.insert(record.address.clone(), record);
    }
}

impl KeyResolver for MemoryKeyResolver {
    fn public_key_pem(&self, address: &str) -> Option<String> {
        self.keys.get(address).cloned()
    }

    fn multisig_record(&self, address: &str) -> Option<MultisigRecord> {
        self.multisig.get(address).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::MultisigSignature;
    use shared::{derive_multisig_address, sign_input, Hash256, KeyPair};

    fn multisig_setup(m: usize, n: usize) -> (MultisigRecord, Vec<KeyPair>) {
        let keypairs: Vec<KeyPair> = (0..n).map(|_| KeyPair::generate().unwrap()).collect();
        let pems: Vec<String> = keypairs
            .iter()
            .map(|kp| kp.public_key_pem().unwrap())
            .collect();
        let address = derive_multisig_address(&pems, m).unwrap();

        let record = MultisigRecord {
            address,
            public_keys: pems,
            required_signatures: m,
            created_at: Utc::now(),
        };
        (record, keypairs)
    }

    // key_index refere-se a ordem das chaves no registro
    fn partial(keypairs: &[KeyPair], key_index: usize, txid: &Hash256) -> MultisigSignature {
        MultisigSignature {
            signature: sign_input(&keypairs[key_index].private_key, &txid.to_string(), 0).unwrap(),
            key_index,
        }
    }

    #[test]
    fn test_multisig_two_of_three() {
        let (record, keypairs) = multisig_setup(2, 3);
        let txid = Hash256::sha256(b"spend");

        let input = TxInput::multisig(
            txid,
            0,
            vec![
                partial(&keypairs, 0, &txid),
                partial(&keypairs, 2, &txid),
            ],
        );
        assert!(record.verify_input(&input));
    }

    #[test]
    fn test_multisig_insufficient_signatures() {
        let (record, keypairs) = multisig_setup(2, 3);
        let txid = Hash256::sha256(b"spend");

        let input = TxInput::multisig(txid, 0, vec![partial(&keypairs, 0, &txid)]);
        assert!(!record.verify_input(&input));
    }

    #[test]
    fn test_multisig_duplicate_key_index_does_not_count_twice() {
        let (record, keypairs) = multisig_setup(2, 3);
        let txid = Hash256::sha256(b"spend");

        let same = partial(&keypairs, 1, &txid);
        let input = TxInput::multisig(txid, 0, vec![same.clone(), same]);
        assert!(!record.verify_input(&input));
    }

    #[test]
    fn test_multisig_out_of_range_index_ignored() {
        let (record, keypairs) = multisig_setup(1, 2);
        let txid = Hash256::sha256(b"spend");

        let mut out_of_range = partial(&keypairs, 0, &txid);
        out_of_range.key_index = 7;
        let input = TxInput::multisig(txid, 0, vec![out_of_range]);
        assert!(!record.verify_input(&input));
    }

    #[test]
    fn test_memory_resolver() {
        let mut resolver = MemoryKeyResolver::new();
        resolver.register("KDALICE", "pem-data");

        assert_eq!(
            resolver.public_key_pem("KDALICE").as_deref(),
            Some("pem-data")
        );
        assert!(resolver.public_key_pem("KDBOB").is_none());
        assert!(resolver.multisig_record("KDM").is_none());
    }
}
