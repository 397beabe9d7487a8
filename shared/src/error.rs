use thiserror::Error;

/// Erros de todos os subsistemas do Kaidos
#[derive(Error, Debug)]
pub enum KaidosError {
    #[error("Bloco inválido: {0}")]
    InvalidBlock(String),

    #[error("Validação da cadeia falhou: {0}")]
    ChainInvalid(String),

    #[error("Transação inválida: {0}")]
    InvalidTransaction(String),

    #[error("Gasto duplo: {0}")]
    DoubleSpend(String),

    #[error("Fundos insuficientes: inputs somam {inputs}, outputs somam {outputs}")]
    InsufficientFunds { inputs: u64, outputs: u64 },

    #[error("Erro na geração de chaves: {0}")]
    KeyGeneration(String),

    #[error("Erro de assinatura: {0}")]
    Signature(String),

    #[error("Senha inválida")]
    InvalidPassphrase,

    #[error("Erro de conexão com o nó: {0}")]
    NodeConnection(String),

    #[error("Erro de consenso: {0}")]
    Consensus(String),

    #[error("Erro de banco de dados: {0}")]
    Database(String),

    #[error("Erro de serialização: {0}")]
    Serialization(String),
}

impl KaidosError {
    /// Código estável exposto na fronteira da API
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidBlock(_) => "INVALID_BLOCK",
            Self::ChainInvalid(_) => "CHAIN_INVALID",
            Self::InvalidTransaction(_) => "INVALID_TRANSACTION",
            Self::DoubleSpend(_) => "DOUBLE_SPEND",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::KeyGeneration(_) => "KEY_GENERATION",
            // Falha de decifração é um tipo distinto, mas reporta o mesmo
            // código de assinatura na API
            Self::Signature(_) | Self::InvalidPassphrase => "SIGNATURE",
            Self::NodeConnection(_) => "NODE_CONNECTION",
            Self::Consensus(_) => "CONSENSUS",
            Self::Database(_) => "DATABASE",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            KaidosError::DoubleSpend("x".to_string()).code(),
            "DOUBLE_SPEND"
        );
        assert_eq!(KaidosError::InvalidPassphrase.code(), "SIGNATURE");
        assert_eq!(
            KaidosError::InsufficientFunds {
                inputs: 1,
                outputs: 2
            }
            .code(),
            "INSUFFICIENT_FUNDS"
        );
    }
}
