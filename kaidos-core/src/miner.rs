use shared::{Amount, Result};
use tracing::info;

use crate::block::Block;
use crate::transaction::Transaction;

/// Resultado da mineração de um bloco
#[derive(Debug, Clone)]
pub struct MiningResult {
    /// Bloco selado, pronto para o gerente da cadeia
    pub block: Block,
    /// Número de hashes tentados
    pub attempts: u64,
}

/// Minerador de blocos.
///
/// Monta o candidato (coinbase na frente do snapshot do mempool) e faz a
/// busca de nonce. Não persiste nada: devolve o bloco selado ao gerente
/// da cadeia.
#[derive(Debug, Clone)]
pub struct Miner {
    /// Endereço que recebe recompensa e taxas
    pub miner_address: String,
}

impl Miner {
    /// Cria um minerador para o endereço dado
    #[must_use]
    pub fn new(miner_address: impl Into<String>) -> Self {
        Self {
            miner_address: miner_address.into(),
        }
    }

    /// Monta o bloco candidato: coinbase pagando `reward + fees` ao
    /// minerador, seguida do snapshot de transações pendentes
    ///
    /// # Errors
    ///
    /// Retorna erro se a soma da coinbase estourar ou se o hash inicial
    /// não puder ser calculado
    pub fn build_candidate(
        &self,
        latest: &Block,
        pending: Vec<Transaction>,
        reward: Amount,
        fees: Amount,
    ) -> Result<Block> {
        let coinbase_value = reward.checked_add(fees).ok_or_else(|| {
            shared::KaidosError::InvalidBlock("Coinbase value overflow".to_string())
        })?;
        let coinbase = Transaction::coinbase(&self.miner_address, coinbase_value);

        let mut transactions = vec![coinbase];
        transactions.extend(pending);

        Block::new(
            latest.index + 1,
            transactions,
            latest.hash,
            Some(self.miner_address.clone()),
        )
    }

    /// Busca de prova de trabalho: incrementa o nonce e recalcula o hash
    /// até obter `difficulty` zeros hexadecimais iniciais
    ///
    /// # Errors
    ///
    /// Retorna erro se o cálculo do hash falhar
    pub fn seal(&self, mut block: Block, difficulty: u32) -> Result<MiningResult> {
        let mut attempts = 0u64;

        while !block.hash.meets_difficulty(difficulty) {
            block.nonce += 1;
            block.hash = block.compute_hash()?;
            attempts += 1;
        }

        info!(
            index = block.index,
            nonce = block.nonce,
            attempts,
            difficulty,
            "block sealed"
        );

        Ok(MiningResult { block, attempts })
    }

    /// Conveniência: monta e sela um candidato
    ///
    /// # Errors
    ///
    /// Retorna erro se a montagem ou a busca de nonce falharem
    pub fn mine(
        &self,
        latest: &Block,
        pending: Vec<Transaction>,
        reward: Amount,
        fees: Amount,
        difficulty: u32,
    ) -> Result<MiningResult> {
        let candidate = self.build_candidate(latest, pending, reward, fees)?;
        self.seal(candidate, difficulty)
    }
}
