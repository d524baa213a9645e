//! O laço de controle do minerador: intercala a busca de prova de trabalho
//! com o processamento de mensagens e reorganiza o bloco candidato quando
//! uma cadeia concorrente vence.

use crate::block::Block;
use crate::chain::ChainConfig;
use crate::client::Client;
use crate::message::Message;
use crate::net::{FakeNet, Node};
use crate::transaction::Transaction;
use shared::{Address, Amount, TxId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Um minerador embute um cliente e, além da visão da cadeia, mantém um
/// bloco candidato em construção e a fila de transações ainda não
/// mineradas.
pub struct Miner {
    client: Client,
    mining_rounds: u64,
    current_block: Option<Block>,
    pending_txs: Vec<Transaction>,
}

impl Miner {
    /// Cria um minerador com um par de chaves recém-gerado
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
        let mining_rounds = config.mining_rounds;
        Ok(Self {
            client: Client::new(name, net, config, starting_block)?,
            mining_rounds,
            current_block: None,
            pending_txs: Vec::new(),
        })
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Acesso mutável ao cliente embutido (instalação do gênese)
    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    /// Bloco candidato em construção
    #[must_use]
    pub const fn current_block(&self) -> Option<&Block> {
        self.current_block.as_ref()
    }

    #[must_use]
    pub fn pending_txs(&self) -> &[Transaction] {
        &self.pending_txs
    }

    /// Monta o primeiro candidato e agenda o primeiro quantum de mineração
    pub fn initialize(&mut self) {
        self.start_new_search(Vec::new());
        self.client
            .net()
            .send(self.client.address(), Message::StartMining);
    }

    /// Monta um candidato novo sobre a ponta atual do cliente, drenando a
    /// fila de transações (mais o `carryover` de uma reorganização) para
    /// dentro dele. Falhas na inclusão indicam transação já aceita na nova
    /// ponta, ou inválida sobre ela, e são descartadas.
    pub fn start_new_search(&mut self, carryover: Vec<Transaction>) {
        let Some(head) = self.client.head() else {
            warn!("{}: sem gênese, nada a minerar", self.client.name());
            return;
        };
        let parent = Arc::clone(head);

        let mut block = match self
            .client
            .config()
            .make_block(self.client.address().clone(), Some(parent.as_ref()))
        {
            Ok(block) => block,
            Err(e) => {
                warn!("{}: falha ao montar candidato: {e}", self.client.name());
                return;
            }
        };

        self.pending_txs.extend(carryover);
        let mut queued = std::mem::take(&mut self.pending_txs);
        // A fila entra no bloco na mesma ordem canônica que os pares
        // usarão ao reexecutá-lo; construção e reexecução concordam.
        queued.sort_by(Transaction::canonical_order);
        for tx in queued {
            if let Err(err) = block.add_transaction(tx) {
                debug!("{}: transação descartada: {err}", self.client.name());
            }
        }

        // A busca recomeça do zero.
        block.proof = 0;
        self.current_block = Some(block);
    }

    /// Um quantum de busca: até `mining_rounds` tentativas de prova, depois
    /// devolve o controle à fila de mensagens reagendando `StartMining`.
    /// Ao encontrar a prova, difunde o bloco e recomeça sobre ele.
    pub fn find_proof(&mut self) {
        if let Some(mut block) = self.current_block.take() {
            let pause_point = block.proof + self.mining_rounds;
            let mut found = false;
            while block.proof < pause_point {
                if block.has_valid_proof() {
                    found = true;
                    break;
                }
                block.proof += 1;
            }

            if found {
                info!(
                    "{}: prova encontrada para o bloco {}: {}",
                    self.client.name(),
                    block.chain_length,
                    block.proof
                );
                self.announce_proof(&block);
                // Incorpora o próprio bloco; a cópia difundida que voltar
                // será ignorada como duplicata.
                let _ = self.client.receive_block(block);
                self.start_new_search(Vec::new());
            } else {
                self.current_block = Some(block);
            }
        }

        self.client
            .net()
            .send(self.client.address(), Message::StartMining);
    }

    /// Difunde o bloco com a prova válida
    fn announce_proof(&self, block: &Block) {
        self.client.net().broadcast(&Message::ProofFound(block.clone()));
    }

    /// Recebe um bloco de outro minerador através do cliente embutido. Se a
    /// cadeia aceita alcançar o candidato, o minerador migra para ela,
    /// recuperando as transações que a troca descartaria.
    pub fn receive_block(&mut self, block: Block) -> Option<Arc<Block>> {
        let accepted = match self.client.receive_block(block) {
            Ok(accepted) => accepted,
            // Já registrado pelo cliente; duplicatas e órfãos não reorganizam
            Err(_) => return None,
        };

        let reorganize = self
            .current_block
            .as_ref()
            .is_some_and(|current| accepted.chain_length >= current.chain_length);
        if reorganize {
            info!("{}: migrando para a cadeia vencedora", self.client.name());
            let carryover = self.sync_transactions(&accepted);
            self.start_new_search(carryover);
        }
        Some(accepted)
    }

    /// Determina as transações a recuperar na troca de cadeia: desce a
    /// cadeia nova até a altura do candidato, depois desce as duas em passo
    /// conjunto até o ancestral comum, e devolve as transações do lado
    /// abandonado que a cadeia nova não contém.
    fn sync_transactions(&self, new_block: &Arc<Block>) -> Vec<Transaction> {
        let Some(current) = &self.current_block else {
            return Vec::new();
        };

        let mut cb_txs: BTreeMap<TxId, Transaction> = BTreeMap::new();
        let mut nb_txs: BTreeMap<TxId, Transaction> = BTreeMap::new();

        let parent_of = |block: &Block| -> Option<Arc<Block>> {
            block
                .prev_block_hash
                .as_ref()
                .and_then(|prev| self.client.block(prev))
                .cloned()
        };

        // A cadeia nova pode estar à frente do candidato: recua até a
        // altura dele, guardando as transações.
        let mut nb = Arc::clone(new_block);
        while nb.chain_length > current.chain_length {
            for tx in nb.transactions.values() {
                nb_txs.insert(tx.id(), tx.clone());
            }
            match parent_of(&nb) {
                Some(parent) => nb = parent,
                None => break,
            }
        }

        // Recua os dois lados juntos até o ancestral comum.
        let mut cb = Arc::new(current.clone());
        loop {
            let (Ok(cb_id), Ok(nb_id)) = (cb.id(), nb.id()) else {
                break;
            };
            if cb_id == nb_id {
                break;
            }
            for tx in cb.transactions.values() {
                cb_txs.insert(tx.id(), tx.clone());
            }
            for tx in nb.transactions.values() {
                nb_txs.insert(tx.id(), tx.clone());
            }
            match (parent_of(&cb), parent_of(&nb)) {
                (Some(cb_parent), Some(nb_parent)) => {
                    cb = cb_parent;
                    nb = nb_parent;
                }
                // Ancestral ausente: desiste da recuperação
                _ => break,
            }
        }

        // Do lado abandonado, só interessam as que a cadeia nova não tem.
        cb_txs
            .into_values()
            .filter(|tx| !nb_txs.contains_key(&tx.id()))
            .collect()
    }

    /// Guarda a transação na fila e tenta incluí-la no candidato corrente.
    /// A inclusão só fica de pé se o candidato continuar reexecutável na
    /// ordem canônica; caso contrário a transação espera na fila pela
    /// próxima busca.
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        self.pending_txs.push(tx.clone());
        self.include_in_candidate(tx)
    }

    /// Inclui uma transação chegada avulsa sem quebrar a reexecução: o
    /// candidato resultante é reexecutado na ordem canônica e a inclusão é
    /// desfeita se o conjunto inteiro deixar de validar.
    fn include_in_candidate(&mut self, tx: Transaction) -> bool {
        let Some(block) = &self.current_block else {
            return false;
        };
        let Some(parent) = block
            .prev_block_hash
            .as_ref()
            .and_then(|prev| self.client.block(prev))
            .cloned()
        else {
            return false;
        };

        let mut candidate = block.clone();
        if let Err(err) = candidate.add_transaction(tx) {
            debug!("{}: {err}", self.client.name());
            return false;
        }
        if let Err(err) = candidate.rerun(parent.as_ref()) {
            debug!(
                "{}: inclusão desfeita, a reexecução falharia: {err}",
                self.client.name()
            );
            return false;
        }
        self.current_block = Some(candidate);
        true
    }

    /// Quando o próprio minerador origina uma transação, ela também entra
    /// na fila local
    ///
    /// # Errors
    ///
    /// Propaga os erros de [`Client::post_transaction`]
    pub fn post_transaction(
        &mut self,
        outputs: BTreeMap<Address, Amount>,
        fee: Option<Amount>,
    ) -> shared::Result<Transaction> {
        let tx = self.client.post_transaction(outputs, fee)?;
        self.add_transaction(tx.clone());
        Ok(tx)
    }
}

impl Node for Miner {
    fn address(&self) -> &Address {
        self.client.address()
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::StartMining => self.find_proof(),
            Message::PostTransaction(tx) => {
                self.add_transaction(tx);
            }
            Message::ProofFound(block) => {
                self.receive_block(block);
            }
            Message::MissingBlock { from, missing } => {
                self.client.provide_missing_block(&from, &missing);
            }
        }
    }
}
