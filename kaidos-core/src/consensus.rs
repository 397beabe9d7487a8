//! Resolução de forks: escolha da melhor cadeia candidata e
//! reorganização do histórico local.
//!
//! Cadeias candidatas chegam completas, do gênese à ponta. A troca do
//! sufixo divergente e a reconstrução do conjunto de UTXOs acontecem
//! sobre cópias e entram por uma única atribuição: observadores veem o
//! estado pré ou pós-reorganização, nunca um intermediário.

use shared::{KaidosError, Result};
use tracing::{info, warn};

use crate::block::{Block, BlockStore};
use crate::chain::Blockchain;
use crate::keys::KeyResolver;
use crate::utxo::UtxoStore;

impl Blockchain {
    /// Compara as cadeias candidatas com a local e adota a melhor.
    /// Devolve `true` se o histórico local foi substituído.
    ///
    /// # Errors
    ///
    /// Retorna `Consensus` se a reconstrução do estado falhar; a cadeia
    /// local permanece intacta nesse caso
    pub fn resolve_conflicts(
        &mut self,
        chains: Vec<Vec<Block>>,
        keys: &dyn KeyResolver,
    ) -> Result<bool> {
        let current_length = self.blocks.len();

        // Melhor candidata: estritamente mais longa e externamente valida
        let mut best: Option<Vec<Block>> = None;
        let mut best_length = current_length;

        for chain in chains {
            if chain.len() > best_length && self.validate_external_chain(&chain) {
                best_length = chain.len();
                best = Some(chain);
            }
        }

        let Some(candidate) = best else {
            return Ok(false);
        };

        // Prefixo comum por igualdade de hash
        let local = self.blocks.all();
        let mut common = 0usize;
        for (ours, theirs) in local.iter().zip(candidate.iter()) {
            if ours.hash == theirs.hash {
                common += 1;
            } else {
                break;
            }
        }

        // Cadeias totalmente divergentes (no maximo o genese em comum)
        // precisam de vantagem de trabalho acumulado
        if common <= 1 && current_length > 1 {
            let candidate_work = chain_work(&candidate);
            let local_work = chain_work(local);
            if candidate_work <= local_work * self.params.work_advantage {
                warn!(
                    candidate_work,
                    local_work, "divergent chain lacks work advantage, keeping local history"
                );
                return Ok(false);
            }
        }

        // Novo historico sobre uma copia: derruba os blocos depois do
        // ancestral comum e insere o sufixo da candidata
        let mut blocks = self.blocks.clone();
        if common == 0 {
            blocks = BlockStore::default();
        } else {
            blocks.truncate_after(u64::try_from(common - 1).unwrap_or(u64::MAX));
        }
        for block in candidate.into_iter().skip(common) {
            blocks.push(block);
        }
        if blocks.is_empty() {
            return Err(KaidosError::Consensus(
                "Empty replacement chain".to_string(),
            ));
        }

        // Reconstroi o conjunto de UTXOs do genese a nova ponta, a parte
        let mut utxos = UtxoStore::new();
        for block in blocks.all() {
            Self::apply_block(block, &mut utxos)
                .map_err(|e| KaidosError::Consensus(e.to_string()))?;
        }

        let new_tip = blocks.latest().hash;

        // Troca atomica do par (blocos, UTXOs)
        self.blocks = blocks;
        self.utxos = utxos;

        info!(height = self.blocks.len() - 1, tip = %new_tip, "chain reorganized");

        self.revalidate_mempool(keys);

        Ok(true)
    }

    /// Validação externa de uma cadeia candidata: gênese no índice 0 e,
    /// para cada bloco seguinte, contiguidade, encadeamento, hash
    /// recomputado e prova de trabalho na dificuldade padrão. A validação
    /// de transações é relaxada: o estado local de UTXOs não reflete o
    /// histórico da candidata.
    #[must_use]
    pub fn validate_external_chain(&self, chain: &[Block]) -> bool {
        let Some(first) = chain.first() else {
            return false;
        };
        if first.index != 0 {
            return false;
        }

        for pair in chain.windows(2) {
            let previous = &pair[0];
            let current = &pair[1];

            if current.index != previous.index + 1 {
                return false;
            }
            if current.previous_hash != previous.hash {
                return false;
            }
            match current.compute_hash() {
                Ok(hash) if hash == current.hash => {}
                _ => return false,
            }
            if !current
                .hash
                .meets_difficulty(self.params.default_difficulty)
            {
                return false;
            }
        }

        true
    }

    /// Reavalia o mempool contra o conjunto de UTXOs corrente:
    /// transações órfãs (por reorganização ou por um bloco que consumiu
    /// seus inputs sob outro txid) são descartadas e as reservas são
    /// remarcadas.
    pub(crate) fn revalidate_mempool(&mut self, keys: &dyn KeyResolver) {
        self.utxos.clear_mempool_flags();

        let mut surviving = crate::mempool::Mempool::new();
        let mut transactions: Vec<_> = std::mem::take(&mut self.mempool).into();
        transactions.sort_by_key(|tx| tx.timestamp);

        for tx in transactions {
            match surviving.validate_for_admission(&tx, &self.utxos, keys) {
                Ok(()) => {
                    for input in &tx.inputs {
                        self.utxos.mark_spent_in_mempool(input.txid, input.vout);
                    }
                    surviving.restore(tx);
                }
                Err(e) => {
                    info!(txid = %tx.txid, error = %e, "dropping orphaned mempool transaction");
                }
            }
        }

        self.mempool = surviving;
    }
}

/// Trabalho acumulado de uma cadeia: `Σ 2^zeros(hash)` por bloco
#[must_use]
pub fn chain_work(chain: &[Block]) -> f64 {
    chain
        .iter()
        .map(|block| 2f64.powi(i32::try_from(block.hash.leading_hex_zeros()).unwrap_or(i32::MAX)))
        .sum()
}
