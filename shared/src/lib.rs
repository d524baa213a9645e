pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{address_matches_key, KeyPair, PublicKey, Signature};
pub use error::BlockchainError;
pub use hash::Hash256;
pub use types::{Address, Amount, BlockId, Nonce, TxId};

pub type Result<T> = std::result::Result<T, BlockchainError>;
