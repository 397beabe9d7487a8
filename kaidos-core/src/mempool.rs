//! Mempool e validador de transações.
//!
//! A admissão segue o pipeline: estrutura → existência dos UTXOs →
//! gasto duplo → assinaturas → saldo. Transações aceitas ficam com
//! `status = pending` e reservam seus UTXOs via `spent_in_mempool`.

use serde::{Deserialize, Serialize};
use shared::{checked_sum, Amount, Hash256, KaidosError, Result};
use tracing::debug;

use crate::keys::KeyResolver;
use crate::transaction::{Transaction, TxInput, TxOutput, TxStatus};
use crate::utxo::UtxoStore;

/// Conjunto de transações pendentes de inclusão em bloco
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mempool {
    transactions: Vec<Transaction>,
}

impl Mempool {
    /// Cria um mempool vazio
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admite uma transação candidata. Na aceitação, gera o txid
    /// determinístico, grava com `status = pending` e marca cada UTXO
    /// referenciado como reservado.
    ///
    /// # Errors
    ///
    /// Retorna o erro da primeira etapa de validação que falhar
    pub fn add_transaction(
        &mut self,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        utxos: &mut UtxoStore,
        keys: &dyn KeyResolver,
    ) -> Result<Hash256> {
        let mut tx = Transaction::new(inputs, outputs)?;
        tx.status = Some(TxStatus::Pending);

        self.validate_for_admission(&tx, utxos, keys)?;

        for input in &tx.inputs {
            utxos.mark_spent_in_mempool(input.txid, input.vout);
        }

        let txid = tx.txid;
        debug!(%txid, "transaction admitted to mempool");
        self.transactions.push(tx);
        Ok(txid)
    }

    /// Validação completa de admissão, sem efeitos colaterais
    ///
    /// # Errors
    ///
    /// Retorna erro estrutural, `UTXO not found`, `DoubleSpend`,
    /// assinatura inválida ou `InsufficientFunds`
    pub fn validate_for_admission(
        &self,
        tx: &Transaction,
        utxos: &UtxoStore,
        keys: &dyn KeyResolver,
    ) -> Result<()> {
        self.validate_transaction(tx, utxos, keys, true)
    }

    /// Validação usada na aceitação de blocos: as reservas de mempool
    /// não se aplicam, pois o bloco é autoritativo sobre elas
    ///
    /// # Errors
    ///
    /// Retorna erro estrutural, de UTXO, de assinatura ou de saldo
    pub fn validate_for_block(
        &self,
        tx: &Transaction,
        utxos: &UtxoStore,
        keys: &dyn KeyResolver,
    ) -> Result<()> {
        self.validate_transaction(tx, utxos, keys, false)
    }

    fn validate_transaction(
        &self,
        tx: &Transaction,
        utxos: &UtxoStore,
        keys: &dyn KeyResolver,
        check_reservations: bool,
    ) -> Result<()> {
        tx.validate_structure()?;

        let mut input_sum = 0u64;

        for input in &tx.inputs {
            let outpoint = format!("{}:{}", input.txid, input.vout);

            let utxo = utxos
                .get(input.txid, input.vout)
                .ok_or_else(|| {
                    KaidosError::InvalidTransaction(format!("UTXO not found: {outpoint}"))
                })?;

            if check_reservations
                && (utxo.spent_in_mempool || self.references(input.txid, input.vout, &tx.txid))
            {
                return Err(KaidosError::DoubleSpend(format!(
                    "UTXO already spent: {outpoint}"
                )));
            }

            if !self.verify_input_signature(input, &utxo.address, keys) {
                return Err(KaidosError::Signature(format!(
                    "Invalid signature for input: {outpoint}"
                )));
            }

            input_sum = input_sum.checked_add(utxo.amount).ok_or_else(|| {
                KaidosError::InvalidTransaction("Input value overflow".to_string())
            })?;
        }

        let output_sum = checked_sum(tx.outputs.iter().map(|output| output.amount))?;

        if input_sum < output_sum {
            return Err(KaidosError::InsufficientFunds {
                inputs: input_sum,
                outputs: output_sum,
            });
        }

        Ok(())
    }

    fn verify_input_signature(
        &self,
        input: &TxInput,
        address: &str,
        keys: &dyn KeyResolver,
    ) -> bool {
        if input.multisig {
            return keys
                .multisig_record(address)
                .is_some_and(|record| record.verify_input(input));
        }

        keys.public_key_pem(address).is_some_and(|pem| {
            shared::verify_input(&pem, &input.txid.to_string(), input.vout, &input.signature)
        })
    }

    /// Reinsere uma transação já validada (reavaliação pós-reorganização)
    pub(crate) fn restore(&mut self, tx: Transaction) {
        self.transactions.push(tx);
    }

    /// Verifica se algum UTXO é referenciado por outra transação do
    /// mempool (gasto duplo pendente)
    fn references(&self, txid: Hash256, vout: u32, excluding: &Hash256) -> bool {
        self.transactions.iter().any(|tx| {
            tx.txid != *excluding
                && tx
                    .inputs
                    .iter()
                    .any(|input| input.txid == txid && input.vout == vout)
        })
    }

    /// Relatório de diagnóstico de uma transação, sem efeitos colaterais
    #[must_use]
    pub fn debug_transaction(
        &self,
        tx: &Transaction,
        utxos: &UtxoStore,
        keys: &dyn KeyResolver,
    ) -> TransactionDebug {
        let mut report = TransactionDebug::failed();

        if (!tx.is_coinbase() && tx.inputs.is_empty()) || tx.outputs.is_empty() {
            report.error = Some("Transaction must have inputs and outputs".to_string());
            return report;
        }

        let mut input_sum: Amount = 0;
        for input in &tx.inputs {
            let mut details = InputDebug {
                txid: input.txid.to_string(),
                vout: input.vout,
                found: false,
                spent: false,
                signature_valid: false,
                amount: 0,
                address: None,
                error: None,
            };

            let Some(utxo) = utxos.get(input.txid, input.vout) else {
                details.error = Some("UTXO not found".to_string());
                report.input_details.push(details);
                continue;
            };

            details.found = true;
            details.amount = utxo.amount;
            details.address = Some(utxo.address.clone());

            if utxo.spent_in_mempool || self.references(input.txid, input.vout, &tx.txid) {
                details.spent = true;
                details.error = Some("UTXO already spent".to_string());
                report.input_details.push(details);
                continue;
            }

            if !self.verify_input_signature(input, &utxo.address, keys) {
                details.error = Some("Invalid signature".to_string());
                report.input_details.push(details);
                continue;
            }

            details.signature_valid = true;
            input_sum = input_sum.saturating_add(utxo.amount);
            report.input_details.push(details);
        }

        let mut output_sum: Amount = 0;
        for (index, output) in tx.outputs.iter().enumerate() {
            let mut details = OutputDebug {
                index,
                address: output.address.clone(),
                amount: output.amount,
                valid: true,
                error: None,
            };

            if output.amount == 0 || output.address.is_empty() {
                details.valid = false;
                details.error = Some("Invalid amount".to_string());
                report.output_details.outputs.push(details);
                continue;
            }

            output_sum = output_sum.saturating_add(output.amount);
            report.output_details.outputs.push(details);
        }

        report.balance.input_total = input_sum;
        report.balance.output_total = output_sum;
        report.output_details.total = output_sum;

        let inputs_ok = report
            .input_details
            .iter()
            .all(|details| details.signature_valid);
        let outputs_ok = report.output_details.outputs.iter().all(|o| o.valid);

        if input_sum < output_sum {
            report.error = Some(format!(
                "Insufficient funds: inputs total {input_sum}, outputs total {output_sum}"
            ));
            return report;
        }

        if inputs_ok && outputs_ok {
            report.balance.fee = input_sum - output_sum;
            report.validation_result = "Success".to_string();
        }

        report
    }

    /// Transações pendentes, ordenadas por timestamp
    #[must_use]
    pub fn pending(&self, limit: usize) -> Vec<Transaction> {
        let mut pending: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|tx| tx.status == Some(TxStatus::Pending))
            .cloned()
            .collect();
        pending.sort_by_key(|tx| tx.timestamp);
        pending.truncate(limit);
        pending
    }

    /// Obtém uma transação pelo txid
    #[must_use]
    pub fn get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.txid == *txid)
    }

    /// Transações que pagam a um endereço
    #[must_use]
    pub fn by_address(&self, address: &str) -> Vec<&Transaction> {
        self.transactions
            .iter()
            .filter(|tx| tx.outputs.iter().any(|output| output.address == address))
            .collect()
    }

    /// Atualiza o status de uma transação
    pub fn update_status(&mut self, txid: &Hash256, status: TxStatus) -> bool {
        match self.transactions.iter_mut().find(|tx| tx.txid == *txid) {
            Some(tx) => {
                tx.status = Some(status);
                true
            }
            None => false,
        }
    }

    /// Remove as transações com os txids dados; retorna quantas saíram
    pub fn remove_transactions(&mut self, txids: &[Hash256]) -> usize {
        let before = self.transactions.len();
        self.transactions.retain(|tx| !txids.contains(&tx.txid));
        before - self.transactions.len()
    }

    /// Esvazia o mempool; retorna quantas transações saíram
    pub fn clear(&mut self) -> usize {
        let count = self.transactions.len();
        self.transactions.clear();
        count
    }

    /// Número de transações no mempool
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Verifica se o mempool está vazio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Itera sobre as transações
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter()
    }
}

impl From<Vec<Transaction>> for Mempool {
    fn from(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }
}

impl From<Mempool> for Vec<Transaction> {
    fn from(mempool: Mempool) -> Self {
        mempool.transactions
    }
}

/// Relatório de diagnóstico de validação de uma transação
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDebug {
    /// `"Success"` ou `"Failed"`
    pub validation_result: String,
    /// Erro de nível superior, quando houver
    pub error: Option<String>,
    pub input_details: Vec<InputDebug>,
    pub output_details: OutputsDebug,
    pub balance: BalanceDebug,
}

impl TransactionDebug {
    fn failed() -> Self {
        Self {
            validation_result: "Failed".to_string(),
            error: None,
            input_details: Vec::new(),
            output_details: OutputsDebug {
                total: 0,
                outputs: Vec::new(),
            },
            balance: BalanceDebug {
                input_total: 0,
                output_total: 0,
                fee: 0,
            },
        }
    }
}

/// Diagnóstico de um input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDebug {
    pub txid: String,
    pub vout: u32,
    pub found: bool,
    pub spent: bool,
    pub signature_valid: bool,
    pub amount: Amount,
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Diagnóstico dos outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputsDebug {
    pub total: Amount,
    pub outputs: Vec<OutputDebug>,
}

/// Diagnóstico de um output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDebug {
    pub index: usize,
    pub address: String,
    pub amount: Amount,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Diagnóstico de saldo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceDebug {
    pub input_total: Amount,
    pub output_total: Amount,
    pub fee: Amount,
}
