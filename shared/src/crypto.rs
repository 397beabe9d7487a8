//! Primitivas criptográficas do Kaidos.
//!
//! O esquema de assinatura é RSA-2048 com padding PSS e SHA-256, fixado
//! por compatibilidade com chaves já persistidas. A mensagem assinada por
//! um input é a string literal `"<txid>:<vout>"`.

use crate::{Hash256, KaidosError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

const RSA_BITS: usize = 2048;

/// Par de chaves RSA
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
}

impl KeyPair {
    /// Gera um novo par de chaves RSA-2048
    ///
    /// # Errors
    ///
    /// Retorna erro se a geração da chave falhar
    pub fn generate() -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)
            .map_err(|e| KaidosError::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Endereço derivado da chave pública
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização DER falhar
    pub fn address(&self) -> Result<String> {
        derive_address(&self.public_key)
    }

    /// Chave pública em PEM (SubjectPublicKeyInfo)
    ///
    /// # Errors
    ///
    /// Retorna erro se a codificação falhar
    pub fn public_key_pem(&self) -> Result<String> {
        encode_public_key_pem(&self.public_key)
    }

    /// Chave privada em PKCS#8 PEM, cifrada quando há senha
    ///
    /// # Errors
    ///
    /// Retorna erro se a codificação ou cifração falhar
    pub fn private_key_pem(&self, passphrase: Option<&str>) -> Result<String> {
        encode_private_key_pem(&self.private_key, passphrase)
    }
}

/// Deriva o endereço de uma chave pública:
/// `"KD" + base32(primeiros 20 bytes de sha256(DER(pk)))`
///
/// # Errors
///
/// Retorna erro se a serialização DER da chave falhar
pub fn derive_address(public_key: &RsaPublicKey) -> Result<String> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| KaidosError::KeyGeneration(e.to_string()))?;
    let digest = Hash256::sha256(der.as_bytes());
    let encoded = base32::encode(
        base32::Alphabet::Rfc4648 { padding: true },
        &digest.as_bytes()[..20],
    );
    Ok(format!("KD{encoded}"))
}

/// Deriva um endereço multisig m-de-n a partir das chaves públicas e do
/// número mínimo de assinaturas. As chaves são ordenadas para que
/// qualquer participante derive o mesmo endereço.
///
/// # Errors
///
/// Retorna erro se `m` estiver fora do intervalo `1..=n`
pub fn derive_multisig_address(public_keys: &[String], required_signatures: usize) -> Result<String> {
    if required_signatures == 0 || required_signatures > public_keys.len() {
        return Err(KaidosError::KeyGeneration(format!(
            "Required signatures (m={required_signatures}) must be between 1 and {}",
            public_keys.len()
        )));
    }

    let mut sorted_keys = public_keys.to_vec();
    sorted_keys.sort();

    let payload = serde_json::json!({
        "public_keys": sorted_keys,
        "required_signatures": required_signatures,
    });

    let digest = Hash256::sha256(payload.to_string().as_bytes());
    let encoded = base32::encode(
        base32::Alphabet::Rfc4648 { padding: true },
        &digest.as_bytes()[..20],
    );
    Ok(format!("KDM{encoded}"))
}

fn input_message(txid: &str, vout: u32) -> Vec<u8> {
    format!("{txid}:{vout}").into_bytes()
}

/// Assina o input `"<txid>:<vout>"` e retorna a assinatura em base64
///
/// # Errors
///
/// Retorna erro se a assinatura RSA-PSS falhar
pub fn sign_input(private_key: &RsaPrivateKey, txid: &str, vout: u32) -> Result<String> {
    let digest = Sha256::digest(input_message(txid, vout));
    let mut rng = rand::thread_rng();
    let signature = private_key
        .sign_with_rng(&mut rng, Pss::new::<Sha256>(), &digest)
        .map_err(|e| KaidosError::Signature(e.to_string()))?;
    Ok(BASE64.encode(signature))
}

/// Verifica uma assinatura de input contra uma chave pública
#[must_use]
pub fn verify_input_with_key(
    public_key: &RsaPublicKey,
    txid: &str,
    vout: u32,
    signature_b64: &str,
) -> bool {
    let Ok(signature) = BASE64.decode(signature_b64) else {
        return false;
    };
    let digest = Sha256::digest(input_message(txid, vout));
    public_key
        .verify(Pss::new::<Sha256>(), &digest, &signature)
        .is_ok()
}

/// Verifica uma assinatura de input contra uma chave pública em PEM
#[must_use]
pub fn verify_input(public_key_pem: &str, txid: &str, vout: u32, signature_b64: &str) -> bool {
    match decode_public_key_pem(public_key_pem) {
        Ok(public_key) => verify_input_with_key(&public_key, txid, vout, signature_b64),
        Err(_) => false,
    }
}

/// Codifica uma chave pública em PEM
///
/// # Errors
///
/// Retorna erro se a codificação falhar
pub fn encode_public_key_pem(public_key: &RsaPublicKey) -> Result<String> {
    public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| KaidosError::KeyGeneration(e.to_string()))
}

/// Decodifica uma chave pública em PEM
///
/// # Errors
///
/// Retorna erro se o PEM não contiver uma chave RSA válida
pub fn decode_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| KaidosError::Signature(format!("Invalid public key: {e}")))
}

/// Codifica uma chave privada em PKCS#8 PEM, cifrada quando há senha
///
/// # Errors
///
/// Retorna erro se a codificação ou a cifração falhar
pub fn encode_private_key_pem(
    private_key: &RsaPrivateKey,
    passphrase: Option<&str>,
) -> Result<String> {
    match passphrase {
        Some(passphrase) => {
            let passphrase = Zeroizing::new(passphrase.as_bytes().to_vec());
            let mut rng = rand::thread_rng();
            private_key
                .to_pkcs8_encrypted_pem(&mut rng, passphrase.as_slice(), LineEnding::LF)
                .map(|pem| pem.to_string())
                .map_err(|e| KaidosError::KeyGeneration(e.to_string()))
        }
        None => private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| KaidosError::KeyGeneration(e.to_string())),
    }
}

/// Decodifica uma chave privada em PKCS#8 PEM.
///
/// Falha de decifração é distinta de falha de assinatura: senha errada
/// (ou ausente para um PEM cifrado) resulta em `InvalidPassphrase`.
///
/// # Errors
///
/// Retorna `InvalidPassphrase` se a decifração falhar e `Signature` se o
/// PEM não contiver uma chave válida
pub fn decode_private_key_pem(pem: &str, passphrase: Option<&str>) -> Result<RsaPrivateKey> {
    let encrypted = pem.contains("ENCRYPTED PRIVATE KEY");

    if encrypted {
        let Some(passphrase) = passphrase else {
            return Err(KaidosError::InvalidPassphrase);
        };
        let passphrase = Zeroizing::new(passphrase.as_bytes().to_vec());
        RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_slice())
            .map_err(|_| KaidosError::InvalidPassphrase)
    } else {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| KaidosError::Signature(format!("Invalid private key: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let keypair = KeyPair::generate().unwrap();
        let txid = "ab".repeat(32);

        let signature = sign_input(&keypair.private_key, &txid, 0).unwrap();
        assert!(verify_input_with_key(&keypair.public_key, &txid, 0, &signature));

        // Vout diferente nao verifica
        assert!(!verify_input_with_key(&keypair.public_key, &txid, 1, &signature));

        // Chave diferente nao verifica
        let other = KeyPair::generate().unwrap();
        assert!(!verify_input_with_key(&other.public_key, &txid, 0, &signature));
    }

    #[test]
    fn test_verify_with_pem() {
        let keypair = KeyPair::generate().unwrap();
        let pem = keypair.public_key_pem().unwrap();
        let signature = sign_input(&keypair.private_key, "deadbeef", 3).unwrap();

        assert!(verify_input(&pem, "deadbeef", 3, &signature));
        assert!(!verify_input(&pem, "deadbeef", 3, "not-base64!!"));
        assert!(!verify_input("garbage", "deadbeef", 3, &signature));
    }

    #[test]
    fn test_address_derivation() {
        let keypair = KeyPair::generate().unwrap();
        let address = keypair.address().unwrap();

        assert!(address.starts_with("KD"));
        assert!(!address.starts_with("KDM"));
        // 20 bytes em base32 = 32 caracteres
        assert_eq!(address.len(), 2 + 32);

        // Deterministico
        assert_eq!(address, keypair.address().unwrap());
    }

    #[test]
    fn test_multisig_address_order_independent() {
        let keys: Vec<String> = ["alpha", "bravo", "charlie"]
            .iter()
            .map(|k| (*k).to_string())
            .collect();
        let mut reversed = keys.clone();
        reversed.reverse();

        let addr1 = derive_multisig_address(&keys, 2).unwrap();
        let addr2 = derive_multisig_address(&reversed, 2).unwrap();

        assert_eq!(addr1, addr2);
        assert!(addr1.starts_with("KDM"));

        // Threshold diferente gera endereco diferente
        let addr3 = derive_multisig_address(&keys, 3).unwrap();
        assert_ne!(addr1, addr3);
    }

    #[test]
    fn test_multisig_address_invalid_m() {
        let keys = vec!["a".to_string(), "b".to_string()];
        assert!(derive_multisig_address(&keys, 0).is_err());
        assert!(derive_multisig_address(&keys, 3).is_err());
    }

    #[test]
    fn test_private_key_pem_round_trip() {
        let keypair = KeyPair::generate().unwrap();

        let plain = keypair.private_key_pem(None).unwrap();
        let loaded = decode_private_key_pem(&plain, None).unwrap();
        assert_eq!(loaded, keypair.private_key);
    }

    #[test]
    fn test_encrypted_private_key_pem() {
        let keypair = KeyPair::generate().unwrap();
        let pem = keypair.private_key_pem(Some("correct horse")).unwrap();
        assert!(pem.contains("ENCRYPTED PRIVATE KEY"));

        let loaded = decode_private_key_pem(&pem, Some("correct horse")).unwrap();
        assert_eq!(loaded, keypair.private_key);

        // Senha errada e senha ausente sao erros de decifracao
        assert!(matches!(
            decode_private_key_pem(&pem, Some("wrong")),
            Err(KaidosError::InvalidPassphrase)
        ));
        assert!(matches!(
            decode_private_key_pem(&pem, None),
            Err(KaidosError::InvalidPassphrase)
        ));
    }
}
