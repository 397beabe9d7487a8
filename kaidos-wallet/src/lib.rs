pub mod builder;
pub mod multisig;
pub mod store;

// Re-exports principais
pub use builder::build_transaction;
pub use multisig::{create_multisig_input, sign_multisig_input};
pub use store::{AddressInfo, AddressRecord, WalletInfo, WalletRecord, WalletStore};

// Re-exports de tipos compartilhados
pub use shared::{KaidosError, Result};
