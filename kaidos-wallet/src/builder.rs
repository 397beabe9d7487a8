//! Montagem de transações: seleção gulosa de UTXOs, troco e assinatura
//! dos inputs.

use kaidos_core::{TxInput, TxOutput, UtxoRecord};
use shared::{Amount, KaidosError, Result};

use crate::store::WalletStore;

/// Monta uma transação pagando `amount` ao destinatário a partir dos
/// UTXOs do remetente, com `fee` reservado ao minerador. Seleciona UTXOs
/// até cobrir o total e devolve o troco ao remetente.
///
/// UTXOs já reservados por transações pendentes são ignorados.
///
/// # Errors
///
/// Retorna `InsufficientFunds` se os UTXOs disponíveis não cobrirem
/// `amount + fee`, e os erros de assinatura da loja de carteiras
pub fn build_transaction(
    store: &WalletStore,
    sender: &str,
    recipient: &str,
    amount: Amount,
    fee: Amount,
    utxos: &[UtxoRecord],
    passphrase: Option<&str>,
) -> Result<(Vec<TxInput>, Vec<TxOutput>)> {
    let needed = amount.checked_add(fee).ok_or_else(|| {
        KaidosError::InvalidTransaction("Amount overflow".to_string())
    })?;

    let spendable: Vec<&UtxoRecord> = utxos
        .iter()
        .filter(|utxo| utxo.address == sender && !utxo.spent_in_mempool)
        .collect();

    let mut selected = Vec::new();
    let mut selected_total: Amount = 0;

    for utxo in spendable {
        selected.push(utxo);
        selected_total = selected_total.saturating_add(utxo.amount);
        if selected_total >= needed {
            break;
        }
    }

    if selected_total < needed {
        return Err(KaidosError::InsufficientFunds {
            inputs: selected_total,
            outputs: needed,
        });
    }

    let mut inputs = Vec::with_capacity(selected.len());
    for utxo in &selected {
        let signature =
            store.sign_transaction_input(&utxo.txid, utxo.vout, sender, passphrase)?;
        inputs.push(TxInput::new(utxo.txid, utxo.vout, signature));
    }

    let mut outputs = vec![TxOutput::new(recipient, amount)];
    let change = selected_total - needed;
    if change > 0 {
        outputs.push(TxOutput::new(sender, change));
    }

    Ok((inputs, outputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Hash256, COIN};

    fn utxo(seed: &[u8], vout: u32, address: &str, amount: Amount) -> UtxoRecord {
        UtxoRecord::new(Hash256::sha256(seed), vout, address.to_string(), amount)
    }

    fn wallet_with_address() -> (WalletStore, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = WalletStore::open(dir.path().join("wallets.json")).unwrap();
        let info = store.create_wallet(None).unwrap();
        (store, info.address, dir)
    }

    #[test]
    fn test_build_with_change() {
        let (store, address, _dir) = wallet_with_address();
        let utxos = vec![utxo(b"a", 0, &address, 50 * COIN)];

        let (inputs, outputs) =
            build_transaction(&store, &address, "KDBOB", 30 * COIN, COIN / 2, &utxos, None)
                .unwrap();

        assert_eq!(inputs.len(), 1);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].address, "KDBOB");
        assert_eq!(outputs[0].amount, 30 * COIN);
        // Troco = 50 - 30 - 0.5
        assert_eq!(outputs[1].address, address);
        assert_eq!(outputs[1].amount, 19 * COIN + COIN / 2);

        // Os inputs saem assinados e verificaveis
        assert!(store.verify_input_signature(&inputs[0], &address));
    }

    #[test]
    fn test_build_exact_amount_no_change() {
        let (store, address, _dir) = wallet_with_address();
        let utxos = vec![utxo(b"a", 0, &address, 10 * COIN)];

        let (_, outputs) =
            build_transaction(&store, &address, "KDBOB", 10 * COIN, 0, &utxos, None).unwrap();

        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn test_build_selects_multiple_utxos() {
        let (store, address, _dir) = wallet_with_address();
        let utxos = vec![
            utxo(b"a", 0, &address, 10 * COIN),
            utxo(b"b", 0, &address, 10 * COIN),
            utxo(b"c", 0, &address, 10 * COIN),
        ];

        let (inputs, _) =
            build_transaction(&store, &address, "KDBOB", 15 * COIN, 0, &utxos, None).unwrap();

        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn test_build_insufficient_funds() {
        let (store, address, _dir) = wallet_with_address();
        let utxos = vec![utxo(b"a", 0, &address, 10 * COIN)];

        let err = build_transaction(&store, &address, "KDBOB", 20 * COIN, 0, &utxos, None)
            .unwrap_err();
        assert!(matches!(err, KaidosError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_build_skips_reserved_and_foreign_utxos() {
        let (store, address, _dir) = wallet_with_address();

        let mut reserved = utxo(b"a", 0, &address, 50 * COIN);
        reserved.spent_in_mempool = true;
        let foreign = utxo(b"b", 0, "KDOTHER", 50 * COIN);
        let utxos = vec![reserved, foreign];

        let err = build_transaction(&store, &address, "KDBOB", COIN, 0, &utxos, None)
            .unwrap_err();
        assert!(matches!(err, KaidosError::InsufficientFunds { .. }));
    }
}
