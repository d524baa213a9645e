//! Primitivas criptográficas do Aurum: chaves RSA, assinaturas PKCS#1 v1.5
//! e derivação de endereços a partir da chave pública.

use crate::{Address, BlockchainError, Hash256, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Tamanho da chave RSA em bits. Pequeno de propósito: o simulador assina
/// milhares de transações e não protege valor real.
const KEY_BITS: usize = 1024;

/// Chave pública RSA, armazenada na forma DER (SubjectPublicKeyInfo)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(with = "hex::serde")]
    key_data: Vec<u8>,
}

/// Assinatura digital PKCS#1 v1.5
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(with = "hex::serde")]
    sig_data: Vec<u8>,
}

/// Par de chaves de um participante
#[derive(Debug, Clone)]
pub struct KeyPair {
    public_key: PublicKey,
    private_key: RsaPrivateKey,
}

impl PublicKey {
    /// Cria uma chave pública a partir dos bytes DER
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes não decodificarem como chave RSA
    pub fn from_der(bytes: Vec<u8>) -> Result<Self> {
        RsaPublicKey::from_public_key_der(&bytes)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Ok(Self { key_data: bytes })
    }

    /// Returns the raw DER bytes of the public key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    /// Deriva o endereço do participante: base64 do SHA-256 dos bytes DER
    #[must_use]
    pub fn address(&self) -> Address {
        BASE64.encode(Hash256::sha256(&self.key_data).as_bytes())
    }

    fn to_rsa(&self) -> Result<RsaPublicKey> {
        RsaPublicKey::from_public_key_der(&self.key_data)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))
    }
}

impl Signature {
    /// Verifica a assinatura de `message` sob a chave pública dada
    #[must_use]
    pub fn verify(&self, public_key: &PublicKey, message: &Hash256) -> bool {
        let Ok(key) = public_key.to_rsa() else {
            return false;
        };
        let digest = Hash256::sha256(message.as_bytes());
        key.verify(
            Pkcs1v15Sign::new::<Sha256>(),
            digest.as_bytes(),
            &self.sig_data,
        )
        .is_ok()
    }

    /// Returns the size in bytes of this signature
    #[must_use]
    pub fn size(&self) -> usize {
        self.sig_data.len()
    }
}

impl KeyPair {
    /// Gera um novo par de chaves RSA
    ///
    /// # Errors
    ///
    /// Retorna erro se a geração ou a codificação DER falharem
    pub fn generate() -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;

        let der = RsaPublicKey::from(&private_key)
            .to_public_key_der()
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;

        Ok(Self {
            public_key: PublicKey {
                key_data: der.as_bytes().to_vec(),
            },
            private_key,
        })
    }

    /// Returns the public half of the pair
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Endereço derivado da chave pública
    #[must_use]
    pub fn address(&self) -> Address {
        self.public_key.address()
    }

    /// Assina `message` com a chave privada (PKCS#1 v1.5 sobre SHA-256)
    ///
    /// # Errors
    ///
    /// Retorna erro se a operação RSA falhar
    pub fn sign(&self, message: &Hash256) -> Result<Signature> {
        let digest = Hash256::sha256(message.as_bytes());
        let sig_data = self
            .private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), digest.as_bytes())
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Ok(Signature { sig_data })
    }
}

/// Verifica se um endereço corresponde à chave pública dada
#[must_use]
pub fn address_matches_key(addr: &str, public_key: &PublicKey) -> bool {
    addr == public_key.address()
}
