//! Barramento de difusão em memória que liga os participantes.
//!
//! Cada participante registra o remetente do seu canal de entrada; difundir
//! é entregar uma cópia própria da mensagem a cada endereço registrado, de
//! modo que remetente e destinatário nunca observam mutações um do outro.

use crate::message::Message;
use shared::Address;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::debug;

/// Um participante da rede: processa mensagens em série, na ordem de
/// chegada, uma tarefa lógica por participante.
pub trait Node {
    /// Endereço pelo qual o participante recebe mensagens diretas
    fn address(&self) -> &Address;

    /// Processa uma mensagem de entrada até o fim, sem suspensões internas
    fn handle(&mut self, message: Message);
}

/// A rede simulada: tabela de rotas endereço → canal de entrada
#[derive(Clone, Default)]
pub struct FakeNet {
    routes: Arc<Mutex<HashMap<Address, Sender<Message>>>>,
}

impl FakeNet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra um participante pelo endereço
    pub fn register(&self, address: Address, inbox: Sender<Message>) {
        self.routes.lock().unwrap().insert(address, inbox);
    }

    /// Verdadeiro se o endereço está registrado na rede
    #[must_use]
    pub fn recognizes(&self, address: &str) -> bool {
        self.routes.lock().unwrap().contains_key(address)
    }

    /// Entrega uma cópia da mensagem a todos os participantes registrados.
    /// A ordem de entrega entre destinatários distintos não é garantida.
    pub fn broadcast(&self, message: &Message) {
        let routes = self.routes.lock().unwrap();
        for inbox in routes.values() {
            // Destinatário desligado conta como mensagem perdida.
            let _ = inbox.send(message.clone());
        }
    }

    /// Envia uma mensagem diretamente ao endereço dado
    pub fn send(&self, address: &str, message: Message) {
        let routes = self.routes.lock().unwrap();
        match routes.get(address) {
            Some(inbox) => {
                let _ = inbox.send(message);
            }
            None => debug!("mensagem para endereço desconhecido {address}"),
        }
    }
}

/// Roda um participante em uma thread própria, despachando as mensagens do
/// canal em série até o canal fechar.
pub fn spawn_node<N>(node: Arc<Mutex<N>>, inbox: Receiver<Message>) -> thread::JoinHandle<()>
where
    N: Node + Send + 'static,
{
    thread::spawn(move || {
        while let Ok(message) = inbox.recv() {
            node.lock().unwrap().handle(message);
        }
    })
}
