//! Núcleo do Aurum: a máquina de estados de blocos e cadeia, o protocolo de
//! recepção por participante e o laço de controle do minerador, sobre um
//! barramento de difusão em memória.

pub mod block;
pub mod chain;
pub mod client;
pub mod error;
pub mod message;
pub mod miner;
pub mod net;
pub mod transaction;

pub use block::Block;
pub use chain::{ChainConfig, GenesisBuilder, PowTarget};
pub use client::Client;
pub use error::{GenesisError, ReceiveError, TxError};
pub use message::Message;
pub use miner::Miner;
pub use net::{spawn_node, FakeNet, Node};
pub use transaction::Transaction;
