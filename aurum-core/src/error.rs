use shared::{Amount, BlockId, Nonce, TxId};
use thiserror::Error;

/// Motivos de rejeição de uma transação ao ser incluída em um bloco
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("Transação duplicada {0}")]
    DuplicateTransaction(TxId),

    #[error("Transação não assinada {0}")]
    UnsignedTransaction(TxId),

    #[error("Assinatura inválida na transação {0}")]
    InvalidSignature(TxId),

    #[error("Ouro insuficiente para a transação {id}: pedido {requested}, disponível {available}")]
    InsufficientFunds {
        id: TxId,
        requested: Amount,
        available: Amount,
    },

    #[error("Transação repetida {id}: nonce {got}, esperado {expected}")]
    ReplayedNonce {
        id: TxId,
        got: Nonce,
        expected: Nonce,
    },

    #[error("Transação fora de ordem {id}: nonce {got}, esperado {expected}")]
    OutOfOrderNonce {
        id: TxId,
        got: Nonce,
        expected: Nonce,
    },
}

/// Motivos pelos quais um bloco recebido não foi incorporado
#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("Bloco {0} já recebido anteriormente")]
    AlreadyKnown(BlockId),

    #[error("Bloco {0} não tem prova de trabalho válida")]
    InvalidProof(BlockId),

    #[error("Bloco {id} aguarda ancestral ausente {parent}")]
    MissingParent { id: BlockId, parent: BlockId },

    #[error("Bloco {id} rejeitado ao reexecutar transações: {reason}")]
    RerunFailure {
        id: BlockId,
        #[source]
        reason: TxError,
    },

    #[error(transparent)]
    Shared(#[from] shared::BlockchainError),
}

/// Erros na construção do bloco gênese
#[derive(Error, Debug)]
pub enum GenesisError {
    #[error("Defina starting_balance OU client, mas não ambos")]
    ConflictingBalanceMaps,

    #[error(transparent)]
    Shared(#[from] shared::BlockchainError),
}
