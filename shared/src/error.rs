use thiserror::Error;

/// Erros compartilhados entre os módulos do Aurum
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Hash inválido")]
    InvalidHash,

    #[error("Assinatura inválida")]
    InvalidSignature,

    #[error("Fundos insuficientes: pedido {requested}, disponível {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    #[error("Erro criptográfico: {0}")]
    CryptographicError(String),

    #[error("Erro de serialização: {0}")]
    SerializationError(String),
}
