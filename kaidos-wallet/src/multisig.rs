//! Assinatura multisig m-de-n.
//!
//! O endereço multisig é derivado das chaves públicas ordenadas e do
//! limiar (ver `shared::derive_multisig_address`). Cada participante
//! assina `"<txid>:<vout>"` com sua chave e anexa o índice da chave no
//! registro; o input é válido com `m` assinaturas de índices distintos.

use kaidos_core::{MultisigSignature, TxInput};
use shared::{decode_private_key_pem, sign_input, Hash256, Result};

/// Assina um input multisig com uma chave privada em PEM
///
/// # Errors
///
/// Retorna `InvalidPassphrase` se a decifração falhar e `Signature` se
/// o PEM ou a assinatura falharem
pub fn sign_multisig_input(
    private_key_pem: &str,
    passphrase: Option<&str>,
    txid: &Hash256,
    vout: u32,
    key_index: usize,
) -> Result<MultisigSignature> {
    let private_key = decode_private_key_pem(private_key_pem, passphrase)?;
    let signature = sign_input(&private_key, &txid.to_string(), vout)?;

    Ok(MultisigSignature {
        signature,
        key_index,
    })
}

/// Monta um input multisig a partir das assinaturas parciais coletadas
#[must_use]
pub fn create_multisig_input(
    txid: Hash256,
    vout: u32,
    signatures: Vec<MultisigSignature>,
) -> TxInput {
    TxInput::multisig(txid, vout, signatures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WalletStore;
    use chrono::Utc;
    use kaidos_core::MultisigRecord;
    use shared::derive_multisig_address;

    struct Participant {
        public_pem: String,
        private_pem: String,
    }

    fn participants(n: usize) -> Vec<Participant> {
        (0..n)
            .map(|_| {
                let keypair = shared::KeyPair::generate().unwrap();
                Participant {
                    public_pem: keypair.public_key_pem().unwrap(),
                    private_pem: keypair.private_key_pem(None).unwrap(),
                }
            })
            .collect()
    }

    #[test]
    fn test_two_of_three_flow() {
        let people = participants(3);
        let pems: Vec<String> = people.iter().map(|p| p.public_pem.clone()).collect();

        let record = MultisigRecord {
            address: derive_multisig_address(&pems, 2).unwrap(),
            public_keys: pems,
            required_signatures: 2,
            created_at: Utc::now(),
        };

        let txid = Hash256::sha256(b"shared-funds");

        // Dois participantes assinam
        let sig0 = sign_multisig_input(&people[0].private_pem, None, &txid, 0, 0).unwrap();
        let sig2 = sign_multisig_input(&people[2].private_pem, None, &txid, 0, 2).unwrap();

        let input = create_multisig_input(txid, 0, vec![sig0, sig2]);
        assert!(input.multisig);
        assert!(record.verify_input(&input));
    }

    #[test]
    fn test_signature_with_wrong_key_index_rejected() {
        let people = participants(2);
        let pems: Vec<String> = people.iter().map(|p| p.public_pem.clone()).collect();

        let record = MultisigRecord {
            address: derive_multisig_address(&pems, 1).unwrap(),
            public_keys: pems,
            required_signatures: 1,
            created_at: Utc::now(),
        };

        let txid = Hash256::sha256(b"shared-funds");

        // Assinatura do participante 0 declarada como indice 1
        let mislabeled = sign_multisig_input(&people[0].private_pem, None, &txid, 0, 1).unwrap();
        let input = create_multisig_input(txid, 0, vec![mislabeled]);
        assert!(!record.verify_input(&input));
    }

    #[test]
    fn test_multisig_through_wallet_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = WalletStore::open(dir.path().join("wallets.json")).unwrap();

        let a = store.create_wallet(None).unwrap();
        let b = store.create_wallet(None).unwrap();
        let record = store
            .register_multisig(vec![a.public_key.clone(), b.public_key.clone()], 2)
            .unwrap();

        let txid = Hash256::sha256(b"shared-funds");
        let key_index_a = record
            .public_keys
            .iter()
            .position(|pem| *pem == a.public_key)
            .unwrap();
        let key_index_b = record
            .public_keys
            .iter()
            .position(|pem| *pem == b.public_key)
            .unwrap();

        let sig_a = sign_multisig_input(
            &store.address_record(&a.address).unwrap().private_key,
            None,
            &txid,
            1,
            key_index_a,
        )
        .unwrap();
        let sig_b = sign_multisig_input(
            &store.address_record(&b.address).unwrap().private_key,
            None,
            &txid,
            1,
            key_index_b,
        )
        .unwrap();

        let input = create_multisig_input(txid, 1, vec![sig_a, sig_b]);
        assert!(store.verify_input_signature(&input, &record.address));
    }
}
