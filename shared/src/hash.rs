use crate::{KaidosError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Hash de 256 bits usado para identificar blocos e transações.
/// Serializa como string hexadecimal de 64 caracteres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Creates a zeroed hash (the genesis `previous_hash`)
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Creates a hash from a 32-byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the hash
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the SHA-256 hash of the provided data
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Verifica se o hash atende à dificuldade
    /// (número de zeros hexadecimais iniciais)
    #[must_use]
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_hex_zeros() >= difficulty
    }

    /// Conta os zeros hexadecimais (nibbles) iniciais do hash
    #[must_use]
    pub fn leading_hex_zeros(&self) -> u32 {
        let mut zeros = 0;
        for &byte in &self.0 {
            if byte == 0 {
                zeros += 2;
            } else {
                if byte >> 4 == 0 {
                    zeros += 1;
                }
                break;
            }
        }
        zeros
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = KaidosError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|_| KaidosError::Serialization(format!("Invalid hash hex: {s}")))?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KaidosError::Serialization("Hash must be 32 bytes".to_string()))?;
        Ok(Self(hash))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serialização JSON canônica: chaves ordenadas lexicograficamente.
///
/// Passa pelo `serde_json::Value` (mapa ordenado) para que o mesmo
/// documento produza sempre os mesmos bytes, independente da ordem
/// de declaração dos campos.
///
/// # Errors
///
/// Retorna erro se o valor não puder ser serializado
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)
        .map_err(|e| KaidosError::Serialization(e.to_string()))?;
    Ok(value.to_string())
}
