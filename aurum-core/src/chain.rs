//! Parâmetros de consenso da cadeia e construção do bloco gênese.
//!
//! Os parâmetros precisam ser idênticos em todos os participantes para a
//! rede convergir; por isso viajam como valor de configuração explícito e
//! não como estado mutável do processo.

use crate::block::Block;
use crate::client::Client;
use crate::error::GenesisError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shared::{Address, Amount, Hash256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Limiar de prova de trabalho: inteiro de 256 bits em big-endian.
/// Um bloco é válido se seu id, interpretado da mesma forma, for
/// estritamente menor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PowTarget([u8; 32]);

impl PowTarget {
    /// Maior alvo possível: 2^256 − 1
    pub const MAX: Self = Self([0xff; 32]);

    /// Desloca o alvo `bits` posições para a direita
    #[must_use]
    pub fn shr(self, bits: u32) -> Self {
        if bits >= 256 {
            return Self([0u8; 32]);
        }
        let byte_shift = (bits / 8) as usize;
        let bit_shift = bits % 8;
        let mut out = [0u8; 32];
        for i in byte_shift..32 {
            out[i] = self.0[i - byte_shift] >> bit_shift;
            if bit_shift > 0 && i > byte_shift {
                out[i] |= self.0[i - byte_shift - 1] << (8 - bit_shift);
            }
        }
        Self(out)
    }

    /// Verdadeiro se o hash fica estritamente abaixo do alvo
    #[must_use]
    pub fn is_met_by(&self, hash: &Hash256) -> bool {
        hash.as_bytes() < &self.0
    }
}

impl fmt::Display for PowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for PowTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PowTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("alvo deve ter 32 bytes"))?;
        Ok(Self(arr))
    }
}

/// Parâmetros globais da cadeia
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Alvo base; o alvo efetivo é obtido deslocando-o para a direita
    pub pow_base_target: PowTarget,
    /// Deslocamento do alvo base, em bits
    pub pow_leading_zeroes: u32,
    /// Recompensa de coinbase por bloco
    pub coinbase_amount: Amount,
    /// Taxa mínima creditada ao minerador por transação
    pub default_tx_fee: Amount,
    /// Blocos abaixo da ponta considerados confirmados
    pub confirmed_depth: u64,
    /// Iterações de PoW entre retornos cooperativos à fila de mensagens
    pub mining_rounds: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            pow_base_target: PowTarget::MAX,
            pow_leading_zeroes: 15,
            coinbase_amount: 25,
            default_tx_fee: 1,
            // O gênese é sempre confirmado; seis blocos porque é o que o
            // Bitcoin usa.
            confirmed_depth: 6,
            mining_rounds: 2000,
        }
    }
}

impl ChainConfig {
    /// Alvo efetivo de prova de trabalho
    #[must_use]
    pub fn pow_target(&self) -> PowTarget {
        self.pow_base_target.shr(self.pow_leading_zeroes)
    }

    /// Cria um bloco vazio sobre `parent`, recompensando `reward_addr`
    ///
    /// # Errors
    ///
    /// Retorna erro se o id do pai não puder ser calculado
    pub fn make_block(&self, reward_addr: Address, parent: Option<&Block>) -> shared::Result<Block> {
        Block::new(
            Some(reward_addr),
            parent,
            self.pow_target(),
            self.coinbase_amount,
        )
    }

    /// Inicia a construção do bloco gênese
    #[must_use]
    pub fn genesis(&self) -> GenesisBuilder<'_> {
        GenesisBuilder {
            config: self,
            starting_balances: BTreeMap::new(),
            clients: Vec::new(),
        }
    }
}

/// Construtor do bloco gênese. Os saldos iniciais podem ser dados por
/// endereço (`starting_balance`) ou por cliente (`client`, que também
/// registra o gênese no cliente), mas não das duas formas.
pub struct GenesisBuilder<'a> {
    config: &'a ChainConfig,
    starting_balances: BTreeMap<Address, Amount>,
    clients: Vec<(&'a mut Client, Amount)>,
}

impl<'a> GenesisBuilder<'a> {
    /// Credita `amount` ao endereço dado no gênese
    #[must_use]
    pub fn starting_balance(mut self, address: Address, amount: Amount) -> Self {
        self.starting_balances.insert(address, amount);
        self
    }

    /// Credita `amount` ao cliente e instala o gênese nele ao construir
    #[must_use]
    pub fn client(mut self, client: &'a mut Client, amount: Amount) -> Self {
        self.clients.push((client, amount));
        self
    }

    /// Constrói o gênese e o distribui aos clientes registrados
    ///
    /// # Errors
    ///
    /// Retorna [`GenesisError::ConflictingBalanceMaps`] se as duas formas de
    /// saldo inicial foram usadas ao mesmo tempo
    pub fn build(self) -> Result<Arc<Block>, GenesisError> {
        if !self.starting_balances.is_empty() && !self.clients.is_empty() {
            return Err(GenesisError::ConflictingBalanceMaps);
        }

        let mut balances = self.starting_balances;
        for (client, amount) in &self.clients {
            balances.insert(client.address().clone(), *amount);
        }

        let mut genesis = Block::new(
            None,
            None,
            self.config.pow_target(),
            self.config.coinbase_amount,
        )
        .map_err(GenesisError::Shared)?;
        genesis.balances = balances;

        let genesis = Arc::new(genesis);
        for (client, _) in self.clients {
            client.set_genesis_block(Arc::clone(&genesis));
        }
        Ok(genesis)
    }
}
