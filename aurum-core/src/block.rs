use crate::chain::PowTarget;
use crate::error::TxError;
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Address, Amount, BlockId, BlockchainError, Hash256, Nonce, Result, TxId};
use std::collections::BTreeMap;

/// Um estado candidato do razão: cabeçalho, elo com o pai, transações
/// embutidas e o retrato derivado de saldos e próximos nonces.
///
/// Saldos, nonces e alvo não entram no hash do bloco: são deriváveis do pai
/// mais as transações mais a configuração, e cada participante os
/// reconstrói com [`Block::rerun`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Hash do bloco pai; ausente apenas no gênese
    pub prev_block_hash: Option<BlockId>,
    /// Limiar de prova de trabalho
    pub target: PowTarget,
    /// Saldos após aplicar as transações deste bloco sobre o retrato do pai
    pub balances: BTreeMap<Address, Amount>,
    /// Próximo nonce aceitável de cada remetente já visto
    pub next_nonce: BTreeMap<Address, Nonce>,
    /// Transações incluídas, indexadas por id
    pub transactions: BTreeMap<TxId, Transaction>,
    /// Distância até o gênese; 0 para o gênese
    pub chain_length: u64,
    /// Relógio de parede na construção (informativo)
    pub timestamp: DateTime<Utc>,
    /// Endereço creditado com coinbase e taxas quando este bloco vira pai
    pub reward_addr: Option<Address>,
    /// Coinbase carregado para reprodutibilidade
    pub coinbase_reward: Amount,
    /// Nonce de mineração
    pub proof: u64,
}

/// Serialização canônica do gênese: só o que não é derivável.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenesisRepr<'a> {
    chain_length: u64,
    timestamp: &'a DateTime<Utc>,
    balances: &'a BTreeMap<Address, Amount>,
}

/// Serialização canônica de blocos não-gênese.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockRepr<'a> {
    chain_length: u64,
    timestamp: &'a DateTime<Utc>,
    proof: u64,
    transactions: &'a BTreeMap<TxId, Transaction>,
    prev_block_hash: &'a BlockId,
    reward_addr: &'a Address,
}

impl Block {
    /// Constrói um bloco vazio. Com pai, herda cópias de `balances` e
    /// `next_nonce`, avança `chain_length` e — se o pai tem endereço de
    /// recompensa — credita ali as recompensas maturadas do pai.
    ///
    /// O coinbase deste próprio bloco não é creditado aqui: ele só vale
    /// quando este bloco virar pai ("mature coinbase").
    ///
    /// # Errors
    ///
    /// Retorna erro se o id do pai não puder ser calculado
    pub fn new(
        reward_addr: Option<Address>,
        parent: Option<&Block>,
        target: PowTarget,
        coinbase_reward: Amount,
    ) -> Result<Self> {
        let mut block = Self {
            prev_block_hash: None,
            target,
            balances: BTreeMap::new(),
            next_nonce: BTreeMap::new(),
            transactions: BTreeMap::new(),
            chain_length: 0,
            timestamp: Utc::now(),
            reward_addr,
            coinbase_reward,
            proof: 0,
        };

        if let Some(parent) = parent {
            block.prev_block_hash = Some(parent.id()?);
            block.balances = parent.balances.clone();
            block.next_nonce = parent.next_nonce.clone();
            // Comprimento decide entre cadeias concorrentes. Simplista: um
            // atacante poderia fazer uma cadeia longa de pouco trabalho,
            // mas serve para o simulador.
            block.chain_length = parent.chain_length + 1;
            block.credit_matured_rewards(parent);
        }

        Ok(block)
    }

    /// Verdadeiro se este é o primeiro bloco da cadeia
    #[must_use]
    pub const fn is_genesis(&self) -> bool {
        self.chain_length == 0
    }

    /// Serialização canônica usada para calcular a identidade. Campos
    /// deriváveis ficam de fora de propósito; desserializar mais `rerun`
    /// restaura o bloco completo.
    ///
    /// # Errors
    ///
    /// Retorna erro se faltarem campos obrigatórios de blocos não-gênese
    pub fn canonical_json(&self) -> Result<String> {
        let json = if self.is_genesis() {
            serde_json::to_string(&GenesisRepr {
                chain_length: self.chain_length,
                timestamp: &self.timestamp,
                balances: &self.balances,
            })
        } else {
            let prev_block_hash = self.prev_block_hash.as_ref().ok_or_else(|| {
                BlockchainError::SerializationError(
                    "bloco não-gênese sem hash do bloco anterior".to_string(),
                )
            })?;
            let reward_addr = self.reward_addr.as_ref().ok_or_else(|| {
                BlockchainError::SerializationError(
                    "bloco não-gênese sem endereço de recompensa".to_string(),
                )
            })?;
            serde_json::to_string(&BlockRepr {
                chain_length: self.chain_length,
                timestamp: &self.timestamp,
                proof: self.proof,
                transactions: &self.transactions,
                prev_block_hash,
                reward_addr,
            })
        };
        json.map_err(|e| BlockchainError::SerializationError(e.to_string()))
    }

    /// Identidade do bloco: hash da serialização canônica
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização canônica falhar
    pub fn id(&self) -> Result<BlockId> {
        Ok(Hash256::sha256(self.canonical_json()?.as_bytes()))
    }

    /// Verdadeiro se o hash do bloco fica abaixo do alvo. O gênese é
    /// isento.
    #[must_use]
    pub fn has_valid_proof(&self) -> bool {
        if self.is_genesis() {
            return true;
        }
        match self.id() {
            Ok(id) => self.target.is_met_by(&id),
            Err(_) => false,
        }
    }

    /// Total pago ao minerador deste bloco quando ele virar pai: coinbase
    /// mais as taxas das transações incluídas
    #[must_use]
    pub fn total_rewards(&self) -> Amount {
        self.transactions
            .values()
            .fold(self.coinbase_reward, |acc, tx| acc.saturating_add(tx.fee))
    }

    /// Saldo de um endereço neste retrato; 0 se nunca visto
    #[must_use]
    pub fn balance_of(&self, address: &str) -> Amount {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// Verdadeiro se a transação está neste bloco. Só o próprio bloco é
    /// examinado; a transação ainda pode estar em um ancestral.
    #[must_use]
    pub fn contains(&self, tx: &Transaction) -> bool {
        self.transactions.contains_key(&tx.id())
    }

    /// Aceita uma transação válida e a inclui no bloco, debitando o
    /// remetente e creditando as saídas contra o estado corrente (isto é,
    /// refletindo transações anteriores do mesmo bloco).
    ///
    /// # Errors
    ///
    /// Rejeita com o motivo nomeado: duplicada, não assinada, assinatura
    /// inválida, fundos insuficientes, nonce repetido ou fora de ordem
    pub fn add_transaction(&mut self, tx: Transaction) -> std::result::Result<(), TxError> {
        let id = tx.id();

        if self.transactions.contains_key(&id) {
            return Err(TxError::DuplicateTransaction(id));
        }
        if tx.sig.is_none() {
            return Err(TxError::UnsignedTransaction(id));
        }
        if !tx.valid_signature() {
            return Err(TxError::InvalidSignature(id));
        }
        if !tx.sufficient_funds(self) {
            return Err(TxError::InsufficientFunds {
                id,
                requested: tx.total_output(),
                available: self.balance_of(&tx.from),
            });
        }

        // Controle de nonce por remetente: impede replay e reordenação.
        let expected = self.next_nonce.get(&tx.from).copied().unwrap_or(0);
        if tx.nonce < expected {
            return Err(TxError::ReplayedNonce {
                id,
                got: tx.nonce,
                expected,
            });
        }
        if tx.nonce > expected {
            return Err(TxError::OutOfOrderNonce {
                id,
                got: tx.nonce,
                expected,
            });
        }
        self.next_nonce.insert(tx.from.clone(), tx.nonce + 1);

        let sender_balance = self.balance_of(&tx.from);
        self.balances
            .insert(tx.from.clone(), sender_balance - tx.total_output());
        for (address, amount) in &tx.outputs {
            let credited = self.balance_of(address).saturating_add(*amount);
            self.balances.insert(address.clone(), credited);
        }

        self.transactions.insert(id, tx);
        Ok(())
    }

    /// Um bloco recebido da rede não traz saldos nem nonces. Este método os
    /// reconstrói: reinicializa o estado a partir do pai, credita as
    /// recompensas maturadas do pai e reaplica todas as transações. Se
    /// alguma reaplicação falhar, o bloco é inválido.
    ///
    /// A ordem de reaplicação é canônica — `(from, nonce, id)` — para que
    /// participantes independentes cheguem ao mesmo estado.
    ///
    /// # Errors
    ///
    /// Devolve o motivo da primeira transação rejeitada
    pub fn rerun(&mut self, parent: &Block) -> std::result::Result<(), TxError> {
        self.balances = parent.balances.clone();
        self.next_nonce = parent.next_nonce.clone();
        self.credit_matured_rewards(parent);

        let previous = std::mem::take(&mut self.transactions);
        let mut ordered: Vec<Transaction> = previous.into_values().collect();
        ordered.sort_by(Transaction::canonical_order);

        for tx in ordered {
            self.add_transaction(tx)?;
        }
        Ok(())
    }

    /// Recompensas do pai maturam neste bloco.
    fn credit_matured_rewards(&mut self, parent: &Block) {
        if let Some(addr) = &parent.reward_addr {
            let credited = self
                .balance_of(addr)
                .saturating_add(parent.total_rewards());
            self.balances.insert(addr.clone(), credited);
        }
    }
}
