//! Árvore de Merkle sobre a lista de transações de um bloco.
//!
//! As folhas são `sha256(txid)` em hexadecimal e cada nível combina os
//! pares concatenando as strings hexadecimais. Um nível de tamanho ímpar
//! duplica o último elemento; a regra vale tanto para a raiz quanto para
//! as provas de inclusão.

use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use shared::Hash256;

/// Lado do irmão em um passo da prova de inclusão
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Um passo de uma prova de Merkle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Hash do irmão, em hexadecimal
    pub hash: String,
    /// Lado em que o irmão entra na concatenação
    pub position: Side,
}

fn hash_hex(data: &str) -> String {
    Hash256::sha256(data.as_bytes()).to_string()
}

fn leaf_hashes(transactions: &[Transaction]) -> Vec<String> {
    transactions
        .iter()
        .map(|tx| hash_hex(&tx.txid.to_string()))
        .collect()
}

/// Calcula a raiz de Merkle de uma lista de transações.
/// Lista vazia tem raiz zero.
#[must_use]
pub fn merkle_root(transactions: &[Transaction]) -> Hash256 {
    if transactions.is_empty() {
        return Hash256::zero();
    }

    let mut hashes = leaf_hashes(transactions);

    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity(hashes.len().div_ceil(2));

        for pair in hashes.chunks(2) {
            let left = &pair[0];
            // Nivel impar: o ultimo elemento combina consigo mesmo
            let right = pair.get(1).unwrap_or(left);
            next_level.push(hash_hex(&format!("{left}{right}")));
        }

        hashes = next_level;
    }

    // A raiz e sempre um hash sha256 valido em hexadecimal
    hashes[0].parse().unwrap_or_else(|_| Hash256::zero())
}

/// Gera a prova de inclusão de uma transação.
/// Retorna `None` se o txid não estiver na lista.
#[must_use]
pub fn generate_proof(txid: &Hash256, transactions: &[Transaction]) -> Option<Vec<ProofStep>> {
    let mut index = transactions.iter().position(|tx| tx.txid == *txid)?;
    let mut hashes = leaf_hashes(transactions);
    let mut proof = Vec::new();

    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity(hashes.len().div_ceil(2));

        for (pair_start, pair) in hashes.chunks(2).enumerate() {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next_level.push(hash_hex(&format!("{left}{right}")));

            let i = pair_start * 2;
            if i == index {
                proof.push(ProofStep {
                    hash: right.clone(),
                    position: Side::Right,
                });
            } else if i + 1 == index {
                proof.push(ProofStep {
                    hash: left.clone(),
                    position: Side::Left,
                });
            }
        }

        index /= 2;
        hashes = next_level;
    }

    Some(proof)
}

/// Verifica uma prova de inclusão contra a raiz
#[must_use]
pub fn verify_proof(txid: &Hash256, root: &Hash256, proof: &[ProofStep]) -> bool {
    let mut current = hash_hex(&txid.to_string());

    for step in proof {
        current = match step.position {
            Side::Left => hash_hex(&format!("{}{current}", step.hash)),
            Side::Right => hash_hex(&format!("{current}{}", step.hash)),
        };
    }

    current == root.to_string()
}
