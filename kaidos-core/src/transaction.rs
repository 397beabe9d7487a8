use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{canonical_json, checked_sum, Amount, Hash256, KaidosError, Result};

use crate::utxo::UtxoStore;

/// Assinatura parcial de um input multisig
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigSignature {
    /// Assinatura RSA-PSS em base64
    pub signature: String,
    /// Índice da chave pública correspondente no registro multisig
    pub key_index: usize,
}

/// Input de transação: referência a um UTXO mais a prova de gasto
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Transação que criou o output referenciado
    pub txid: Hash256,
    /// Índice do output na transação de origem
    pub vout: u32,
    /// Assinatura em base64 sobre `"<txid>:<vout>"` (single-sig)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    /// Assinaturas parciais (multisig)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<MultisigSignature>,
    /// Marca inputs com semântica multisig
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub multisig: bool,
}

impl TxInput {
    /// Cria um input single-sig
    #[must_use]
    pub const fn new(txid: Hash256, vout: u32, signature: String) -> Self {
        Self {
            txid,
            vout,
            signature,
            signatures: Vec::new(),
            multisig: false,
        }
    }

    /// Cria um input multisig com as assinaturas parciais coletadas
    #[must_use]
    pub const fn multisig(txid: Hash256, vout: u32, signatures: Vec<MultisigSignature>) -> Self {
        Self {
            txid,
            vout,
            signature: String::new(),
            signatures,
            multisig: true,
        }
    }
}

/// Output de transação
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Endereço do destinatário
    pub address: String,
    /// Valor na menor unidade
    pub amount: Amount,
}

impl TxOutput {
    /// Cria um novo output
    #[must_use]
    pub fn new(address: impl Into<String>, amount: Amount) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

/// Estado de uma transação no mempool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Rejected,
}

/// Transação do Kaidos
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Identificador determinístico
    pub txid: Hash256,
    /// Inputs; vazio apenas em coinbase
    pub inputs: Vec<TxInput>,
    /// Outputs; nunca vazio
    pub outputs: Vec<TxOutput>,
    /// Instante de criação
    pub timestamp: DateTime<Utc>,
    /// Marca a transação de coinbase de um bloco
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub coinbase: bool,
    /// Estado no mempool; ausente em transações já incluídas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TxStatus>,
}

impl Transaction {
    /// Cria uma transação normal com txid derivado de (inputs, outputs,
    /// timestamp)
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização canônica falhar
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Result<Self> {
        let timestamp = Utc::now();
        let txid = Self::compute_txid(&inputs, &outputs, timestamp)?;

        Ok(Self {
            txid,
            inputs,
            outputs,
            timestamp,
            coinbase: false,
            status: None,
        })
    }

    /// Cria a transação de coinbase de um bloco: sem inputs, um único
    /// output pagando `amount` (recompensa + taxas) ao minerador
    #[must_use]
    pub fn coinbase(miner_address: &str, amount: Amount) -> Self {
        let timestamp = Utc::now();
        let payload = format!("{miner_address}:{amount}:{}", timestamp.to_rfc3339());

        Self {
            txid: Hash256::sha256(payload.as_bytes()),
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(miner_address, amount)],
            timestamp,
            coinbase: true,
            status: None,
        }
    }

    /// Txid determinístico: sha256 do JSON canônico de
    /// `{inputs, outputs, timestamp}`
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização canônica falhar
    pub fn compute_txid(
        inputs: &[TxInput],
        outputs: &[TxOutput],
        timestamp: DateTime<Utc>,
    ) -> Result<Hash256> {
        let payload = canonical_json(&serde_json::json!({
            "inputs": inputs,
            "outputs": outputs,
            "timestamp": timestamp,
        }))?;
        Ok(Hash256::sha256(payload.as_bytes()))
    }

    /// Verifica se é a transação de coinbase
    #[must_use]
    pub const fn is_coinbase(&self) -> bool {
        self.coinbase
    }

    /// Valor total dos outputs
    ///
    /// # Errors
    ///
    /// Retorna erro em caso de overflow
    pub fn total_output_value(&self) -> Result<Amount> {
        checked_sum(self.outputs.iter().map(|output| output.amount))
    }

    /// Valor total dos inputs, consultando o conjunto de UTXOs
    ///
    /// # Errors
    ///
    /// Retorna erro se algum UTXO não existir ou em caso de overflow
    pub fn total_input_value(&self, utxos: &UtxoStore) -> Result<Amount> {
        let mut total = 0u64;

        for input in &self.inputs {
            let utxo = utxos.get(input.txid, input.vout).ok_or_else(|| {
                KaidosError::InvalidTransaction(format!(
                    "UTXO not found: {}:{}",
                    input.txid, input.vout
                ))
            })?;

            total = total.checked_add(utxo.amount).ok_or_else(|| {
                KaidosError::InvalidTransaction("Input value overflow".to_string())
            })?;
        }

        Ok(total)
    }

    /// Taxa paga pela transação (inputs − outputs; coinbase não paga)
    ///
    /// # Errors
    ///
    /// Retorna erro se os valores não puderem ser calculados
    pub fn fee(&self, utxos: &UtxoStore) -> Result<Amount> {
        if self.is_coinbase() {
            return Ok(0);
        }

        let input_value = self.total_input_value(utxos)?;
        let output_value = self.total_output_value()?;

        Ok(input_value.saturating_sub(output_value))
    }

    /// Validação estrutural: campos obrigatórios, listas não vazias,
    /// valores positivos
    ///
    /// # Errors
    ///
    /// Retorna erro se a transação não atender aos critérios estruturais
    pub fn validate_structure(&self) -> Result<()> {
        if self.is_coinbase() {
            if !self.inputs.is_empty() {
                return Err(KaidosError::InvalidTransaction(
                    "Coinbase transaction must not have inputs".to_string(),
                ));
            }
        } else if self.inputs.is_empty() {
            return Err(KaidosError::InvalidTransaction(
                "Transaction must have inputs and outputs".to_string(),
            ));
        }

        if self.outputs.is_empty() {
            return Err(KaidosError::InvalidTransaction(
                "Transaction must have inputs and outputs".to_string(),
            ));
        }

        for output in &self.outputs {
            if output.amount == 0 {
                return Err(KaidosError::InvalidTransaction(format!(
                    "Invalid amount: {}",
                    output.amount
                )));
            }
            if output.address.is_empty() {
                return Err(KaidosError::InvalidTransaction(
                    "Output address missing".to_string(),
                ));
            }
        }

        // Overflow nos outputs tambem e um erro estrutural
        self.total_output_value()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utxo::UtxoRecord;
    use shared::COIN;

    fn utxo(txid: Hash256, vout: u32, address: &str, amount: Amount) -> UtxoRecord {
        UtxoRecord::new(txid, vout, address.to_string(), amount)
    }

    #[test]
    fn test_coinbase_shape() {
        let tx = Transaction::coinbase("KDMINER", 50 * COIN);

        assert!(tx.is_coinbase());
        assert!(tx.inputs.is_empty());
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].amount, 50 * COIN);
        assert_eq!(tx.outputs[0].address, "KDMINER");
        assert!(tx.validate_structure().is_ok());
    }

    #[test]
    fn test_txid_depends_on_contents() {
        let ts = Utc::now();
        let inputs = vec![TxInput::new(Hash256::sha256(b"a"), 0, "sig".to_string())];
        let outputs = vec![TxOutput::new("KDBOB", COIN)];

        let txid1 = Transaction::compute_txid(&inputs, &outputs, ts).unwrap();
        let txid2 = Transaction::compute_txid(&inputs, &outputs, ts).unwrap();
        assert_eq!(txid1, txid2);

        let other_outputs = vec![TxOutput::new("KDEVE", COIN)];
        let txid3 = Transaction::compute_txid(&inputs, &other_outputs, ts).unwrap();
        assert_ne!(txid1, txid3);
    }

    #[test]
    fn test_structure_validation() {
        // Sem inputs nem outputs
        let empty = Transaction {
            txid: Hash256::zero(),
            inputs: vec![],
            outputs: vec![],
            timestamp: Utc::now(),
            coinbase: false,
            status: None,
        };
        assert!(empty.validate_structure().is_err());

        // Output com valor zero
        let zero_output = Transaction::new(
            vec![TxInput::new(Hash256::zero(), 0, "sig".to_string())],
            vec![TxOutput::new("KDBOB", 0)],
        )
        .unwrap();
        assert!(zero_output.validate_structure().is_err());

        // Coinbase com inputs e invalida
        let mut bad_coinbase = Transaction::coinbase("KDMINER", COIN);
        bad_coinbase
            .inputs
            .push(TxInput::new(Hash256::zero(), 0, "sig".to_string()));
        assert!(bad_coinbase.validate_structure().is_err());
    }

    #[test]
    fn test_fee_calculation() {
        let mut utxos = UtxoStore::new();
        let funding = Hash256::sha256(b"funding");
        utxos.insert(utxo(funding, 0, "KDALICE", 50 * COIN));

        let tx = Transaction::new(
            vec![TxInput::new(funding, 0, "sig".to_string())],
            vec![
                TxOutput::new("KDBOB", 30 * COIN),
                TxOutput::new("KDALICE", 19 * COIN + COIN / 2),
            ],
        )
        .unwrap();

        assert_eq!(tx.fee(&utxos).unwrap(), COIN / 2);
        assert_eq!(tx.total_input_value(&utxos).unwrap(), 50 * COIN);

        // Coinbase nao paga taxa
        let coinbase = Transaction::coinbase("KDMINER", COIN);
        assert_eq!(coinbase.fee(&utxos).unwrap(), 0);
    }

    #[test]
    fn test_input_serialization_forms() {
        // Input single-sig nao carrega campos multisig no JSON
        let single = TxInput::new(Hash256::sha256(b"x"), 0, "sig".to_string());
        let json = serde_json::to_value(&single).unwrap();
        assert!(json.get("signatures").is_none());
        assert!(json.get("multisig").is_none());

        // Input multisig carrega a flag e as assinaturas parciais
        let multi = TxInput::multisig(
            Hash256::sha256(b"x"),
            1,
            vec![MultisigSignature {
                signature: "sig".to_string(),
                key_index: 0,
            }],
        );
        let json = serde_json::to_value(&multi).unwrap();
        assert_eq!(json["multisig"], true);
        assert!(json.get("signature").is_none());

        let back: TxInput = serde_json::from_value(json).unwrap();
        assert_eq!(back, multi);
    }
}
