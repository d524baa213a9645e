//! Cenários de ponta a ponta do simulador: transferências, maturação do
//! coinbase, rejeição de replay, escolha de garfo, recuperação de ancestral
//! ausente e as propriedades universais da cadeia.

use aurum_core::{
    Block, ChainConfig, Client, FakeNet, GenesisError, Message, Miner, ReceiveError, Transaction,
    TxError,
};
use shared::{Amount, KeyPair};
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;

/// Alvo fácil para os testes: um bloco sai em ~256 tentativas
fn fast_config() -> ChainConfig {
    ChainConfig {
        pow_leading_zeroes: 8,
        ..ChainConfig::default()
    }
}

fn mine(block: &mut Block) {
    while !block.has_valid_proof() {
        block.proof += 1;
    }
}

/// Dois pares de chaves com endereços em ordem canônica crescente
fn ordered_keypairs() -> (KeyPair, KeyPair) {
    let a = KeyPair::generate().unwrap();
    let b = KeyPair::generate().unwrap();
    if a.address() <= b.address() {
        (a, b)
    } else {
        (b, a)
    }
}

fn transfer(keypair: &KeyPair, nonce: u64, outputs: &[(&str, Amount)], fee: Amount) -> Transaction {
    let mut map = BTreeMap::new();
    for (address, amount) in outputs {
        map.insert((*address).to_string(), *amount);
    }
    let mut tx = Transaction::new(
        keypair.address(),
        nonce,
        keypair.public_key().clone(),
        map,
        fee,
        String::new(),
    )
    .unwrap();
    tx.sign(keypair).unwrap();
    tx
}

fn assert_conservation(parent: &Block, child: &Block) {
    let parent_sum: Amount = parent.balances.values().sum();
    let child_sum: Amount = child.balances.values().sum();
    let matured = if parent.reward_addr.is_some() {
        parent.total_rewards()
    } else {
        0
    };
    let fees: Amount = child.transactions.values().map(|tx| tx.fee).sum();
    // As taxas do próprio bloco ainda não pagaram ninguém: maturam no filho.
    assert_eq!(child_sum, parent_sum + matured - fees);
}

#[test]
fn single_transfer_updates_balances() {
    let config = fast_config();
    let alice = KeyPair::generate().unwrap();
    let genesis = config
        .genesis()
        .starting_balance(alice.address(), 233)
        .starting_balance("bob".to_string(), 99)
        .build()
        .unwrap();

    let tx = transfer(&alice, 0, &[("bob", 40)], 1);

    let mut block = config
        .make_block("miner-m".to_string(), Some(genesis.as_ref()))
        .unwrap();
    block.add_transaction(tx).unwrap();
    mine(&mut block);

    assert!(block.has_valid_proof());
    assert_eq!(block.balance_of(&alice.address()), 192);
    assert_eq!(block.balance_of("bob"), 139);
    // O coinbase só matura no próximo bloco
    assert_eq!(block.balance_of("miner-m"), 0);
}

#[test]
fn coinbase_matures_in_the_next_block() {
    let config = fast_config();
    let alice = KeyPair::generate().unwrap();
    let genesis = config
        .genesis()
        .starting_balance(alice.address(), 233)
        .starting_balance("bob".to_string(), 99)
        .build()
        .unwrap();

    let mut first = config
        .make_block("miner-m".to_string(), Some(genesis.as_ref()))
        .unwrap();
    first
        .add_transaction(transfer(&alice, 0, &[("bob", 40)], 1))
        .unwrap();
    mine(&mut first);

    let second = config
        .make_block("miner-m".to_string(), Some(&first))
        .unwrap();

    // Coinbase 25 mais a taxa 1 do bloco anterior
    assert_eq!(second.balance_of("miner-m"), 26);
}

#[test]
fn replayed_transaction_is_rejected_everywhere() {
    let config = fast_config();
    let alice = KeyPair::generate().unwrap();
    let genesis = config
        .genesis()
        .starting_balance(alice.address(), 233)
        .build()
        .unwrap();

    let tx = transfer(&alice, 0, &[("bob", 40)], 1);

    let mut first = config
        .make_block("miner-m".to_string(), Some(genesis.as_ref()))
        .unwrap();
    first.add_transaction(tx.clone()).unwrap();
    mine(&mut first);

    // Redifundida, a mesma transação não entra no bloco seguinte
    let mut second = config
        .make_block("miner-m".to_string(), Some(&first))
        .unwrap();
    assert!(matches!(
        second.add_transaction(tx.clone()),
        Err(TxError::ReplayedNonce { .. })
    ));
    assert!(!second.contains(&tx));

    // Nem no mesmo bloco duas vezes
    assert!(matches!(
        first.add_transaction(tx),
        Err(TxError::DuplicateTransaction(_))
    ));
}

#[test]
fn fork_choice_converges_to_longest_chain() {
    let config = fast_config();
    let net = FakeNet::new();
    let genesis = config
        .genesis()
        .starting_balance("alice".to_string(), 100)
        .build()
        .unwrap();

    // Dois mineradores produzem blocos concorrentes na altura 1
    let mut branch_a = config
        .make_block("miner-a".to_string(), Some(genesis.as_ref()))
        .unwrap();
    mine(&mut branch_a);
    let mut branch_b = config
        .make_block("miner-b".to_string(), Some(genesis.as_ref()))
        .unwrap();
    mine(&mut branch_b);

    // Um terceiro bloco estende o ramo A até a altura 2
    let mut tip = config
        .make_block("miner-a".to_string(), Some(&branch_a))
        .unwrap();
    mine(&mut tip);
    let tip_id = tip.id().unwrap();

    // Um observador que vê tudo converge para a ponta de altura 2,
    // independente da ordem de chegada dos ramos
    let mut observer = Client::new("Observer", net.clone(), config.clone(), None).unwrap();
    observer.set_genesis_block(Arc::clone(&genesis));
    observer.receive_block(branch_b.clone()).unwrap();
    observer.receive_block(branch_a.clone()).unwrap();
    observer.receive_block(tip.clone()).unwrap();
    assert_eq!(observer.head().unwrap().id().unwrap(), tip_id);
    assert_eq!(observer.head().unwrap().chain_length, 2);
}

#[test]
fn reorganization_requeues_orphaned_transactions() {
    let config = fast_config();
    let net = FakeNet::new();
    let alice = KeyPair::generate().unwrap();

    let mut miner = Miner::new("Marta", net.clone(), config.clone(), None).unwrap();
    let genesis = config
        .genesis()
        .starting_balance(alice.address(), 100)
        .build()
        .unwrap();
    miner.client_mut().set_genesis_block(Arc::clone(&genesis));
    miner.initialize();

    // O candidato do minerador carrega a transação de Alice
    let tx = transfer(&alice, 0, &[("bob", 40)], 1);
    miner.add_transaction(tx.clone());
    assert!(miner.current_block().unwrap().contains(&tx));

    // Uma cadeia rival de dois blocos vazios vence o candidato
    let mut rival_1 = config
        .make_block("rival".to_string(), Some(genesis.as_ref()))
        .unwrap();
    mine(&mut rival_1);
    let mut rival_2 = config
        .make_block("rival".to_string(), Some(&rival_1))
        .unwrap();
    mine(&mut rival_2);

    miner.receive_block(rival_1);
    miner.receive_block(rival_2.clone());

    // O minerador migrou para a cadeia rival e recuperou a transação
    let candidate = miner.current_block().unwrap();
    assert_eq!(candidate.chain_length, 3);
    assert_eq!(
        candidate.prev_block_hash,
        Some(rival_2.id().unwrap())
    );
    assert!(candidate.contains(&tx));
}

#[test]
fn missing_ancestor_is_requested_and_recovered() {
    let config = fast_config();
    let net = FakeNet::new();

    let mut provider = Client::new("Provider", net.clone(), config.clone(), None).unwrap();
    let mut late = Client::new("Late", net.clone(), config.clone(), None).unwrap();

    let (provider_tx, provider_rx) = mpsc::channel();
    let (late_tx, late_rx) = mpsc::channel();
    net.register(provider.address().clone(), provider_tx);
    net.register(late.address().clone(), late_tx);

    let genesis = config
        .genesis()
        .starting_balance("alice".to_string(), 100)
        .build()
        .unwrap();
    provider.set_genesis_block(Arc::clone(&genesis));
    late.set_genesis_block(Arc::clone(&genesis));

    let mut first = config
        .make_block("miner-m".to_string(), Some(genesis.as_ref()))
        .unwrap();
    mine(&mut first);
    let mut second = config
        .make_block("miner-m".to_string(), Some(&first))
        .unwrap();
    mine(&mut second);

    // O provedor conhece a cadeia toda; o atrasado só vê o bloco de altura 2
    provider.receive_block(first).unwrap();
    assert!(matches!(
        late.receive_block(second),
        Err(ReceiveError::MissingParent { .. })
    ));
    assert_eq!(late.head().unwrap().chain_length, 0);

    // O pedido MissingBlock foi difundido; o provedor responde
    // ponto-a-ponto com ProofFound e o atrasado integra os dois em ordem.
    while let Ok(message) = provider_rx.try_recv() {
        use aurum_core::Node;
        provider.handle(message);
    }
    while let Ok(message) = late_rx.try_recv() {
        use aurum_core::Node;
        late.handle(message);
    }

    assert_eq!(late.head().unwrap().chain_length, 2);
}

#[test]
fn overspending_transaction_never_enters_a_block() {
    let config = fast_config();
    let alice = KeyPair::generate().unwrap();
    let genesis = config
        .genesis()
        .starting_balance(alice.address(), 233)
        .build()
        .unwrap();

    let tx = transfer(&alice, 0, &[("bob", 300)], 1);

    let mut block = config
        .make_block("miner-m".to_string(), Some(genesis.as_ref()))
        .unwrap();
    assert!(matches!(
        block.add_transaction(tx.clone()),
        Err(TxError::InsufficientFunds { .. })
    ));
    assert!(!block.contains(&tx));
    assert!(block.transactions.is_empty());
}

#[test]
fn deterministic_identity_across_the_wire() {
    let config = fast_config();
    let alice = KeyPair::generate().unwrap();
    let genesis = config
        .genesis()
        .starting_balance(alice.address(), 233)
        .build()
        .unwrap();

    let mut block = config
        .make_block("miner-m".to_string(), Some(genesis.as_ref()))
        .unwrap();
    block
        .add_transaction(transfer(&alice, 0, &[("bob", 40)], 1))
        .unwrap();
    mine(&mut block);
    let id = block.id().unwrap();

    // Um participante independente reconstrói o bloco a partir do fio e
    // chega à mesma identidade e ao mesmo estado.
    let mut restored: Block =
        serde_json::from_str(&serde_json::to_string(&block).unwrap()).unwrap();
    restored.balances.clear();
    restored.next_nonce.clear();
    restored.rerun(&genesis).unwrap();

    assert_eq!(restored.id().unwrap(), id);
    assert_eq!(restored.balances, block.balances);
    assert_eq!(restored.next_nonce, block.next_nonce);
}

#[test]
fn conservation_of_gold_along_the_chain() {
    let config = fast_config();
    let alice = KeyPair::generate().unwrap();
    let genesis = config
        .genesis()
        .starting_balance(alice.address(), 233)
        .starting_balance("bob".to_string(), 99)
        .build()
        .unwrap();

    let mut first = config
        .make_block("miner-m".to_string(), Some(genesis.as_ref()))
        .unwrap();
    first
        .add_transaction(transfer(&alice, 0, &[("bob", 40)], 3))
        .unwrap();
    mine(&mut first);
    assert_conservation(&genesis, &first);

    let mut second = config
        .make_block("miner-n".to_string(), Some(&first))
        .unwrap();
    second
        .add_transaction(transfer(&alice, 1, &[("carol", 10)], 1))
        .unwrap();
    mine(&mut second);
    assert_conservation(&first, &second);

    let third = config
        .make_block("miner-m".to_string(), Some(&second))
        .unwrap();
    assert_conservation(&second, &third);
}

#[test]
fn nonce_is_monotonic_along_the_chain() {
    let config = fast_config();
    let alice = KeyPair::generate().unwrap();
    let addr = alice.address();
    let genesis = config
        .genesis()
        .starting_balance(addr.clone(), 233)
        .build()
        .unwrap();

    let mut chain = vec![genesis.as_ref().clone()];
    for nonce in 0..3 {
        let mut block = config
            .make_block("miner-m".to_string(), Some(chain.last().unwrap()))
            .unwrap();
        block
            .add_transaction(transfer(&alice, nonce, &[("bob", 5)], 1))
            .unwrap();
        mine(&mut block);
        chain.push(block);
    }

    let mut previous = 0;
    for block in &chain {
        let next = block.next_nonce.get(&addr).copied().unwrap_or(0);
        assert!(next >= previous);
        previous = next;
    }
    assert_eq!(previous, 3);
}

#[test]
fn confirmed_transactions_leave_the_pending_set() {
    let net = FakeNet::new();
    // Profundidade curta para confirmar rápido no teste
    let config = ChainConfig {
        pow_leading_zeroes: 8,
        confirmed_depth: 2,
        ..ChainConfig::default()
    };

    let mut alice = Client::new("Alice", net.clone(), config.clone(), None).unwrap();
    let genesis = config
        .genesis()
        .starting_balance(alice.address().clone(), 100)
        .build()
        .unwrap();
    alice.set_genesis_block(Arc::clone(&genesis));

    let mut outputs = BTreeMap::new();
    outputs.insert("bob".to_string(), 40);
    let tx = alice.post_transaction(outputs, None).unwrap();
    assert!(alice.pending_outgoing().contains_key(&tx.id()));

    // A transação entra no primeiro bloco minerado
    let mut first = config
        .make_block("miner-m".to_string(), Some(genesis.as_ref()))
        .unwrap();
    first.add_transaction(tx.clone()).unwrap();
    mine(&mut first);
    alice.receive_block(first.clone()).unwrap();

    // Na altura 1 o bloco ainda não está confirmado
    assert!(alice.pending_outgoing().contains_key(&tx.id()));

    let mut parent = first;
    for _ in 0..2 {
        let mut block = config
            .make_block("miner-m".to_string(), Some(&parent))
            .unwrap();
        mine(&mut block);
        alice.receive_block(block.clone()).unwrap();
        parent = block;
    }

    // Com a ponta na altura 3 e profundidade 2, o bloco da transação é
    // ancestral do confirmado: ela sai dos pendentes e não volta.
    assert_eq!(alice.last_confirmed().unwrap().chain_length, 1);
    assert!(alice.pending_outgoing().is_empty());

    let mut block = config
        .make_block("miner-m".to_string(), Some(&parent))
        .unwrap();
    mine(&mut block);
    alice.receive_block(block).unwrap();
    assert!(alice.pending_outgoing().is_empty());
}

#[test]
fn receiving_the_same_block_twice_is_idempotent() {
    let config = fast_config();
    let net = FakeNet::new();
    let alice = KeyPair::generate().unwrap();

    let mut client = Client::new("Observer", net, config.clone(), None).unwrap();
    let genesis = config
        .genesis()
        .starting_balance(alice.address(), 233)
        .build()
        .unwrap();
    client.set_genesis_block(Arc::clone(&genesis));

    let mut block = config
        .make_block("miner-m".to_string(), Some(genesis.as_ref()))
        .unwrap();
    block
        .add_transaction(transfer(&alice, 0, &[("bob", 40)], 1))
        .unwrap();
    mine(&mut block);

    let accepted = client.receive_block(block.clone()).unwrap();
    let head_before = client.head().unwrap().id().unwrap();

    for _ in 0..3 {
        assert!(matches!(
            client.receive_block(block.clone()),
            Err(ReceiveError::AlreadyKnown(_))
        ));
    }

    assert_eq!(client.head().unwrap().id().unwrap(), head_before);
    assert_eq!(
        client.head().unwrap().balance_of("bob"),
        accepted.balance_of("bob")
    );
}

#[test]
fn cross_sender_block_replays_at_remote_peers() {
    let config = fast_config();
    let net = FakeNet::new();
    // O financiador vem primeiro na ordem canônica; o gasto dependente
    // pode entrar no mesmo bloco e ainda reexecutar limpo em todo par.
    let (funder, spender) = ordered_keypairs();

    let mut miner = Miner::new("Marta", net.clone(), config.clone(), None).unwrap();
    let genesis = config
        .genesis()
        .starting_balance(funder.address(), 100)
        .build()
        .unwrap();
    miner.client_mut().set_genesis_block(Arc::clone(&genesis));
    miner.initialize();

    let fund = transfer(&funder, 0, &[(&spender.address(), 50)], 1);
    let spend = transfer(&spender, 0, &[("carol", 30)], 1);
    assert!(miner.add_transaction(fund));
    assert!(miner.add_transaction(spend));

    let mut block = miner.current_block().unwrap().clone();
    mine(&mut block);

    // Um participante remoto reexecuta o bloco inteiro ao recebê-lo
    let mut remote = Client::new("Remote", net, config.clone(), None).unwrap();
    remote.set_genesis_block(Arc::clone(&genesis));
    let accepted = remote.receive_block(block).unwrap();

    assert_eq!(accepted.balance_of("carol"), 30);
    assert_eq!(accepted.balance_of(&spender.address()), 19);
    assert_eq!(remote.head().unwrap().chain_length, 1);
}

#[test]
fn pending_transactions_can_be_rebroadcast() {
    let config = fast_config();
    let net = FakeNet::new();

    let mut alice = Client::new("Alice", net.clone(), config.clone(), None).unwrap();
    let genesis = config
        .genesis()
        .starting_balance(alice.address().clone(), 100)
        .build()
        .unwrap();
    alice.set_genesis_block(genesis);

    // Um par registrado observa as difusões
    let (peer_tx, peer_rx) = mpsc::channel();
    net.register("peer".to_string(), peer_tx);

    let mut outputs = BTreeMap::new();
    outputs.insert("bob".to_string(), 40);
    let tx = alice.post_transaction(outputs, None).unwrap();

    // Enquanto não confirmada, o reenvio difunde a mesma transação de novo
    alice.resend_pending_transactions();

    let posts: Vec<Transaction> = peer_rx
        .try_iter()
        .filter_map(|message| match message {
            Message::PostTransaction(posted) => Some(posted),
            _ => None,
        })
        .collect();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|posted| posted.id() == tx.id()));
}

#[test]
fn genesis_rejects_conflicting_balance_maps() {
    let config = fast_config();
    let net = FakeNet::new();
    let mut client = Client::new("Alice", net, config.clone(), None).unwrap();

    let result = config
        .genesis()
        .starting_balance("alice".to_string(), 100)
        .client(&mut client, 200)
        .build();

    assert!(matches!(
        result,
        Err(GenesisError::ConflictingBalanceMaps)
    ));
}
