//! Persistência em snapshot JSON.
//!
//! Cada loja grava o documento completo em um arquivo temporário ao lado
//! do destino e troca por renomeação, que é atômica no sistema de
//! arquivos: uma queda no meio da gravação deixa o snapshot anterior
//! intacto.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::{KaidosError, Result};
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::block::Block;
use crate::transaction::Transaction;
use crate::utxo::UtxoRecord;

/// Documento persistido da cadeia: o par (blocos, UTXOs) mais o mempool,
/// espelhando o esquema lógico
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainState {
    pub blocks: Vec<Block>,
    pub utxos: Vec<UtxoRecord>,
    pub mempool: Vec<Transaction>,
}

/// Loja de documentos JSON em um caminho explícito
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> JsonStore<T> {
    /// Cria uma loja apontando para o arquivo dado
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    /// Caminho do arquivo de snapshot
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verifica se há snapshot gravado
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Carrega o documento, se existir
    ///
    /// # Errors
    ///
    /// Retorna `Database` se a leitura ou a decodificação falharem
    pub fn load(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| KaidosError::Database(format!("{}: {e}", self.path.display())))?;
        let value = serde_json::from_str(&contents)
            .map_err(|e| KaidosError::Database(format!("{}: {e}", self.path.display())))?;
        Ok(Some(value))
    }

    /// Grava o documento de forma atômica (temporário + renomeação)
    ///
    /// # Errors
    ///
    /// Retorna `Database` se a gravação falhar; o snapshot anterior
    /// permanece válido nesse caso
    pub fn save(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| KaidosError::Database(format!("{}: {e}", parent.display())))?;
            }
        }

        let contents = serde_json::to_string(value)
            .map_err(|e| KaidosError::Database(e.to_string()))?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .map_err(|e| KaidosError::Database(format!("{}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| KaidosError::Database(format!("{}: {e}", self.path.display())))?;

        debug!(path = %self.path.display(), "snapshot saved");
        Ok(())
    }
}

/// Loja do estado da cadeia
pub type ChainStore = JsonStore<ChainState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::extend_chain;
    use crate::chain::{Blockchain, ChainParams};

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::new(dir.path().join("chain.json"));

        assert!(!store.exists());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::new(dir.path().join("chain.json"));

        let mut chain = Blockchain::new(ChainParams::default()).unwrap();
        extend_chain(&mut chain, "KDMINER", 2);

        store.save(&chain.state()).unwrap();
        assert!(store.exists());

        let loaded = store.load().unwrap().unwrap();
        let restored = Blockchain::from_state(loaded, ChainParams::default()).unwrap();

        assert_eq!(restored.chain_length(), chain.chain_length());
        assert_eq!(restored.latest_block().hash, chain.latest_block().hash);
        assert_eq!(restored.balance("KDMINER"), chain.balance("KDMINER"));
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::new(dir.path().join("nested/deep/chain.json"));

        store.save(&ChainState::default()).unwrap();
        assert!(store.exists());
    }

    #[test]
    fn test_failed_save_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        let store = ChainStore::new(&path);

        let chain = Blockchain::new(ChainParams::default()).unwrap();
        store.save(&chain.state()).unwrap();
        let saved = fs::read_to_string(&path).unwrap();

        // Um temporario abandonado nao afeta o snapshot principal
        fs::write(path.with_extension("tmp"), "garbage").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), saved);
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn test_corrupt_snapshot_is_database_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        fs::write(&path, "{not json").unwrap();

        let store = ChainStore::new(&path);
        assert!(matches!(store.load(), Err(KaidosError::Database(_))));
    }
}
