pub mod amount;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

// Re-exports principais
pub use amount::{
    block_reward, checked_sum, format_kd, parse_kd, Amount, COIN, HALVING_INTERVAL, INITIAL_REWARD,
};
pub use crypto::{
    decode_private_key_pem, decode_public_key_pem, derive_address, derive_multisig_address,
    encode_private_key_pem, encode_public_key_pem, sign_input, verify_input,
    verify_input_with_key, KeyPair,
};
pub use error::KaidosError;
pub use hash::{canonical_json, Hash256};

pub type Result<T> = std::result::Result<T, KaidosError>;
