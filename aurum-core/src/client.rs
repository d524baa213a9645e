//! O núcleo de um participante comum: mantém a visão local da cadeia,
//! integra blocos recebidos (protocolo de recepção), acompanha a
//! profundidade de confirmação e origina transações.

use crate::block::Block;
use crate::chain::ChainConfig;
use crate::error::ReceiveError;
use crate::message::Message;
use crate::net::{FakeNet, Node};
use crate::transaction::Transaction;
use shared::{Address, Amount, BlockId, BlockchainError, KeyPair, Nonce, TxId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Client {
    name: String,
    net: FakeNet,
    keypair: KeyPair,
    address: Address,
    config: ChainConfig,
    /// Ordena as transações emitidas por este cliente; incrementado a cada
    /// emissão, o que evita replay
    nonce: Nonce,
    /// Transações emitidas e ainda não observadas no prefixo confirmado
    pending_outgoing: HashMap<TxId, Transaction>,
    /// Todos os blocos validados já vistos, por id
    blocks: HashMap<BlockId, Arc<Block>>,
    /// Blocos à espera de um ancestral ausente, por id do ancestral
    pending_blocks: HashMap<BlockId, Vec<Block>>,
    /// Bloco conhecido de maior comprimento; empates ficam com o primeiro
    last_block: Option<Arc<Block>>,
    /// Ancestral da ponta na profundidade de confirmação
    last_confirmed: Option<Arc<Block>>,
}

impl Client {
    /// Cria um participante com um par de chaves recém-gerado
    ///
    /// # Errors
    ///
    /// Retorna erro se a geração de chaves falhar
    pub fn new(
        name: impl Into<String>,
        net: FakeNet,
        config: ChainConfig,
        starting_block: Option<Arc<Block>>,
    ) -> shared::Result<Self> {
        let keypair = KeyPair::generate()?;
        let address = keypair.address();

        let mut client = Self {
            name: name.into(),
            net,
            keypair,
            address,
            config,
            nonce: 0,
            pending_outgoing: HashMap::new(),
            blocks: HashMap::new(),
            pending_blocks: HashMap::new(),
            last_block: None,
            last_confirmed: None,
        };
        if let Some(genesis) = starting_block {
            client.set_genesis_block(genesis);
        }
        Ok(client)
    }

    /// O gênese só pode ser instalado enquanto o cliente não tem cadeia
    pub fn set_genesis_block(&mut self, genesis: Arc<Block>) {
        if self.last_block.is_some() {
            warn!(
                "{}: não é possível instalar o gênese em cadeia existente",
                self.name
            );
            return;
        }
        match genesis.id() {
            Ok(id) => {
                self.blocks.insert(id, Arc::clone(&genesis));
                self.last_confirmed = Some(Arc::clone(&genesis));
                self.last_block = Some(genesis);
            }
            Err(e) => warn!("{}: gênese rejeitado: {e}", self.name),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub const fn config(&self) -> &ChainConfig {
        &self.config
    }

    #[must_use]
    pub const fn net(&self) -> &FakeNet {
        &self.net
    }

    /// Ponta atual da cadeia, se o gênese já foi instalado
    #[must_use]
    pub const fn head(&self) -> Option<&Arc<Block>> {
        self.last_block.as_ref()
    }

    /// Bloco confirmado mais recente
    #[must_use]
    pub const fn last_confirmed(&self) -> Option<&Arc<Block>> {
        self.last_confirmed.as_ref()
    }

    /// Busca um bloco conhecido pelo id
    #[must_use]
    pub fn block(&self, id: &BlockId) -> Option<&Arc<Block>> {
        self.blocks.get(id)
    }

    #[must_use]
    pub fn pending_outgoing(&self) -> &HashMap<TxId, Transaction> {
        &self.pending_outgoing
    }

    /// Ouro do cliente no último bloco confirmado. Blocos mais novos podem
    /// ser desfeitos, por isso só o confirmado conta.
    #[must_use]
    pub fn confirmed_balance(&self) -> Amount {
        self.last_confirmed
            .as_ref()
            .map_or(0, |b| b.balance_of(&self.address))
    }

    /// Ouro disponível: o confirmado menos o comprometido em transações
    /// pendentes de saída
    #[must_use]
    pub fn available_gold(&self) -> Amount {
        let pending_spent: Amount = self
            .pending_outgoing
            .values()
            .map(Transaction::total_output)
            .sum();
        self.confirmed_balance().saturating_sub(pending_spent)
    }

    /// Cria, assina e difunde uma transferência de ouro. A taxa é elevada
    /// ao mínimo da rede se necessário.
    ///
    /// # Errors
    ///
    /// Retorna erro se o ouro disponível não cobre o total pedido, ou se a
    /// assinatura falhar
    pub fn post_transaction(
        &mut self,
        outputs: BTreeMap<Address, Amount>,
        fee: Option<Amount>,
    ) -> shared::Result<Transaction> {
        let fee = fee
            .unwrap_or(self.config.default_tx_fee)
            .max(self.config.default_tx_fee);
        let requested = outputs
            .values()
            .fold(fee, |acc, v| acc.saturating_add(*v));
        let available = self.available_gold();
        if requested > available {
            return Err(BlockchainError::InsufficientFunds {
                requested,
                available,
            });
        }
        self.post_generic_transaction(outputs, fee)
    }

    /// Difunde uma transação sem validar fundos. Útil para transações
    /// especiais; em geral não deve ser chamada diretamente.
    ///
    /// # Errors
    ///
    /// Retorna erro se a construção ou a assinatura falharem
    pub fn post_generic_transaction(
        &mut self,
        outputs: BTreeMap<Address, Amount>,
        fee: Amount,
    ) -> shared::Result<Transaction> {
        let mut tx = Transaction::new(
            self.address.clone(),
            self.nonce,
            self.keypair.public_key().clone(),
            outputs,
            fee,
            String::new(),
        )?;
        tx.sign(&self.keypair)?;
        self.nonce += 1;

        info!("{}: transação {} criada e difundida", self.name, tx.id());
        self.pending_outgoing.insert(tx.id(), tx.clone());
        self.net.broadcast(&Message::PostTransaction(tx.clone()));
        Ok(tx)
    }

    /// Redifunde as transações pendentes de saída
    pub fn resend_pending_transactions(&self) {
        for tx in self.pending_outgoing.values() {
            self.net.broadcast(&Message::PostTransaction(tx.clone()));
        }
    }

    /// Ids dos blocos da cadeia, da ponta ao gênese. Vazio enquanto o
    /// gênese não foi instalado.
    #[must_use]
    pub fn chain_ids(&self) -> Vec<BlockId> {
        let mut ids = Vec::new();
        let mut cursor = self.last_block.clone();
        while let Some(block) = cursor {
            if let Ok(id) = block.id() {
                ids.push(id);
            }
            cursor = block
                .prev_block_hash
                .as_ref()
                .and_then(|prev| self.blocks.get(prev))
                .cloned();
        }
        ids
    }

    /// Valida e incorpora um bloco, possivelmente avançando a ponta da
    /// cadeia. As transações do bloco são reexecutadas para reconstruir os
    /// saldos; qualquer falha invalida o bloco inteiro.
    ///
    /// Um bloco cujo ancestral ainda não chegou fica estacionado e um
    /// pedido `MissingBlock` é difundido (apenas para o primeiro que espera
    /// por aquele ancestral). Quando o ancestral chegar, os que esperavam
    /// são reprocessados em ordem.
    ///
    /// # Errors
    ///
    /// Devolve o motivo pelo qual o bloco não foi (ainda) incorporado
    pub fn receive_block(&mut self, block: Block) -> Result<Arc<Block>, ReceiveError> {
        let id = block.id()?;

        if self.blocks.contains_key(&id) {
            // Reentrega é inofensiva
            debug!("{}: bloco {id} já recebido anteriormente", self.name);
            return Err(ReceiveError::AlreadyKnown(id));
        }

        if !block.is_genesis() && !block.has_valid_proof() {
            warn!("{}: bloco {id} sem prova válida", self.name);
            return Err(ReceiveError::InvalidProof(id));
        }

        let parent = if block.is_genesis() {
            None
        } else {
            let prev = block.prev_block_hash.ok_or_else(|| {
                BlockchainError::SerializationError(
                    "bloco não-gênese sem hash do bloco anterior".to_string(),
                )
            })?;
            match self.blocks.get(&prev) {
                Some(parent) => Some(Arc::clone(parent)),
                None => {
                    let waiters = self.pending_blocks.entry(prev).or_default();
                    let first_waiter = waiters.is_empty();
                    waiters.push(block);
                    if first_waiter {
                        self.request_missing_block(prev);
                    }
                    return Err(ReceiveError::MissingParent { id, parent: prev });
                }
            }
        };

        let mut block = block;
        if let Some(parent) = &parent {
            block.rerun(parent).map_err(|reason| {
                warn!("{}: bloco {id} rejeitado ao reexecutar: {reason}", self.name);
                ReceiveError::RerunFailure { id, reason }
            })?;
        }

        let block = Arc::new(block);
        self.blocks.insert(id, Arc::clone(&block));

        let better = self
            .last_block
            .as_ref()
            .map_or(true, |head| head.chain_length < block.chain_length);
        if better {
            self.last_block = Some(Arc::clone(&block));
            self.set_last_confirmed();
        }

        // Reprocessa os blocos que esperavam por este.
        if let Some(waiters) = self.pending_blocks.remove(&id) {
            for waiting in waiters {
                debug!("{}: processando bloco desbloqueado por {id}", self.name);
                let _ = self.receive_block(waiting);
            }
        }

        Ok(block)
    }

    /// Pede à rede o ancestral ausente
    fn request_missing_block(&self, missing: BlockId) {
        debug!("{}: pedindo bloco ausente {missing}", self.name);
        self.net.broadcast(&Message::MissingBlock {
            from: self.address.clone(),
            missing,
        });
    }

    /// Responde a um pedido de bloco ausente, se o bloco for conhecido
    pub fn provide_missing_block(&self, from: &str, missing: &BlockId) {
        if let Some(block) = self.blocks.get(missing) {
            debug!("{}: fornecendo bloco {missing}", self.name);
            self.net
                .send(from, Message::ProofFound(block.as_ref().clone()));
        }
    }

    /// Recalcula o último bloco confirmado descendo `confirmed_depth` pais
    /// a partir da ponta (limitado no gênese) e poda as transações
    /// pendentes já presentes no prefixo confirmado.
    fn set_last_confirmed(&mut self) {
        let Some(head) = &self.last_block else {
            return;
        };

        let confirmed_height = head
            .chain_length
            .saturating_sub(self.config.confirmed_depth);
        let mut block = Arc::clone(head);
        while block.chain_length > confirmed_height {
            match block
                .prev_block_hash
                .as_ref()
                .and_then(|prev| self.blocks.get(prev))
            {
                Some(parent) => block = Arc::clone(parent),
                None => {
                    // A recepção só admite blocos de ancestralidade
                    // conhecida, então isto não deve acontecer.
                    warn!("{}: ancestral ausente ao recalcular confirmação", self.name);
                    break;
                }
            }
        }
        self.last_confirmed = Some(Arc::clone(&block));

        // Uma transação vista em qualquer ancestral do confirmado não volta
        // mais: sai da lista de pendentes.
        if !self.pending_outgoing.is_empty() {
            let mut cursor = Some(block);
            while let Some(b) = cursor {
                self.pending_outgoing
                    .retain(|id, _| !b.transactions.contains_key(id));
                cursor = b
                    .prev_block_hash
                    .as_ref()
                    .and_then(|prev| self.blocks.get(prev))
                    .cloned();
            }
        }
    }
}

impl Node for Client {
    fn address(&self) -> &Address {
        &self.address
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::ProofFound(block) => {
                let _ = self.receive_block(block);
            }
            Message::MissingBlock { from, missing } => {
                self.provide_missing_block(&from, &missing);
            }
            // Clientes comuns não mineram nem recolhem transações
            Message::PostTransaction(_) | Message::StartMining => {}
        }
    }
}
