use crate::block::Block;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use shared::{Address, BlockId};

/// Mensagens trocadas entre participantes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Transação difundida pelo originador
    PostTransaction(Transaction),
    /// Bloco com prova válida, difundido pelo minerador; também usado
    /// ponto-a-ponto como resposta a um pedido de bloco ausente
    ProofFound(Block),
    /// Pedido de um bloco ausente; só responde quem o tiver
    MissingBlock { from: Address, missing: BlockId },
    /// Auto-emitida por mineradores para reentrar no quantum de PoW
    StartMining,
}
