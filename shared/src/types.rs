//! Tipos compartilhados entre módulos do Kaidos

use serde::{Deserialize, Serialize};

/// Alias para endereços (string imprimível com prefixo "KD"/"KDM")
pub type Address = String;

/// Alias para altura de bloco na cadeia
pub type BlockHeight = u64;

/// Alias para índice de saída de transação
pub type OutputIndex = u32;

/// Configurações do nó
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Endereço de bind do servidor HTTP
    pub host: String,
    /// Porta do servidor HTTP
    pub port: u16,
    /// Diretório de dados do nó (cadeia, UTXOs, mempool, peers)
    pub data_dir: String,
    /// Caminho do banco de carteiras usado para resolver chaves públicas
    pub wallet_db: String,
    /// Timeout das chamadas a peers, em segundos
    pub peer_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            data_dir: "kaidos-data".to_string(),
            wallet_db: "kaidos-data/wallets.json".to_string(),
            peer_timeout_secs: 5,
        }
    }
}

impl NodeConfig {
    /// Endereço público deste nó na forma `host:porta`
    #[must_use]
    pub fn self_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_defaults() {
        let config = NodeConfig::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5000);
        assert_eq!(config.self_address(), "0.0.0.0:5000");
    }
}
