//! Tipos compartilhados entre os módulos do Aurum

/// Endereço de um participante: base64 do hash da chave pública
pub type Address = String;

/// Alias para identificador único de transação
pub type TxId = crate::Hash256;

/// Alias para identificador único de bloco
pub type BlockId = crate::Hash256;

/// Alias para valor monetário (ouro)
pub type Amount = u64;

/// Alias para o contador de transações de um remetente
pub type Nonce = u64;
