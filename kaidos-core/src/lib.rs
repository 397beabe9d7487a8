pub mod block;
pub mod chain;
pub mod consensus;
pub mod keys;
pub mod mempool;
pub mod merkle;
pub mod miner;
pub mod storage;
pub mod transaction;
pub mod utxo;

// Re-exports principais
pub use block::{Block, BlockStore};
pub use chain::{Blockchain, BlockchainStats, ChainParams, ValidationMode};
pub use keys::{KeyResolver, MemoryKeyResolver, MultisigRecord};
pub use mempool::{Mempool, TransactionDebug};
pub use merkle::{generate_proof, merkle_root, verify_proof, ProofStep, Side};
pub use miner::{Miner, MiningResult};
pub use storage::{ChainState, ChainStore, JsonStore};
pub use transaction::{MultisigSignature, Transaction, TxInput, TxOutput, TxStatus};
pub use utxo::{OutPoint, UtxoRecord, UtxoStore};

// Re-exports de tipos compartilhados
pub use shared::{Amount, Hash256, KaidosError, Result};
