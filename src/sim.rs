//! Cenário de demonstração: três clientes e dois mineradores ligados pela
//! rede simulada, cada participante em sua própria thread.

use aurum_core::{spawn_node, ChainConfig, Client, FakeNet, Miner};
use shared::{Address, Amount};
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::info;

/// Roda a simulação por `duration_secs` segundos e imprime os resultados
///
/// # Errors
///
/// Retorna erro se a geração de chaves ou a construção do gênese falharem
pub fn run_demo(duration_secs: u64) -> Result<(), Box<dyn Error>> {
    println!("🔗 Aurum - simulador de blockchain com prova de trabalho");
    println!("========================================================");
    println!("Iniciando a simulação. Isto pode demorar um momento...\n");

    let net = FakeNet::new();
    let config = ChainConfig::default();

    // 1. Participantes
    let mut alice = Client::new("Alice", net.clone(), config.clone(), None)?;
    let mut bob = Client::new("Bob", net.clone(), config.clone(), None)?;
    let mut charlie = Client::new("Charlie", net.clone(), config.clone(), None)?;
    let mut marta = Miner::new("Marta", net.clone(), config.clone(), None)?;
    let mut mateus = Miner::new("Mateus", net.clone(), config.clone(), None)?;

    let roster: Vec<(String, Address)> = [
        ("Alice", alice.address()),
        ("Bob", bob.address()),
        ("Charlie", charlie.address()),
        ("Marta", marta.client().address()),
        ("Mateus", mateus.client().address()),
    ]
    .iter()
    .map(|(name, addr)| ((*name).to_string(), (*addr).clone()))
    .collect();

    // 2. Bloco gênese com os saldos iniciais, instalado em todos
    let genesis = config
        .genesis()
        .client(&mut alice, 233)
        .client(&mut bob, 99)
        .client(&mut charlie, 67)
        .client(marta.client_mut(), 400)
        .client(mateus.client_mut(), 300)
        .build()?;
    info!("gênese criado: {}", genesis.id()?);

    println!("Saldos iniciais (perspectiva de Alice):");
    print_balances(&alice, &roster);

    // 3. Registro na rede: cada participante recebe pelo seu endereço
    let (alice_tx, alice_rx) = mpsc::channel();
    let (bob_tx, bob_rx) = mpsc::channel();
    let (charlie_tx, charlie_rx) = mpsc::channel();
    let (marta_tx, marta_rx) = mpsc::channel();
    let (mateus_tx, mateus_rx) = mpsc::channel();
    net.register(alice.address().clone(), alice_tx);
    net.register(bob.address().clone(), bob_tx);
    net.register(charlie.address().clone(), charlie_tx);
    net.register(marta.client().address().clone(), marta_tx);
    net.register(mateus.client().address().clone(), mateus_tx);

    // 4. Mineradores montam o primeiro candidato e agendam a busca
    marta.initialize();
    mateus.initialize();

    let alice = Arc::new(Mutex::new(alice));
    let bob = Arc::new(Mutex::new(bob));
    let charlie = Arc::new(Mutex::new(charlie));
    let marta = Arc::new(Mutex::new(marta));
    let mateus = Arc::new(Mutex::new(mateus));

    // As threads vivem até o fim do processo; os handles não são aguardados.
    let _threads = [
        spawn_node(Arc::clone(&alice), alice_rx),
        spawn_node(Arc::clone(&bob), bob_rx),
        spawn_node(Arc::clone(&charlie), charlie_rx),
        spawn_node(Arc::clone(&marta), marta_rx),
        spawn_node(Arc::clone(&mateus), mateus_rx),
    ];

    // 5. Alice transfere ouro para Bob e para Charlie
    let bob_addr = roster[1].1.clone();
    let charlie_addr = roster[2].1.clone();
    println!("\nAlice transfere 40 de ouro para Bob e 30 para Charlie (taxa 3).\n");
    {
        let mut outputs = BTreeMap::new();
        outputs.insert(bob_addr, 40);
        outputs.insert(charlie_addr, 30);
        alice.lock().unwrap().post_transaction(outputs, Some(3))?;
    }

    // 6. Deixa a rede trabalhar; na metade do caminho Alice redifunde o
    // que ainda não viu confirmado, caso a primeira difusão tenha se
    // perdido.
    thread::sleep(Duration::from_secs(duration_secs / 2));
    alice.lock().unwrap().resend_pending_transactions();
    thread::sleep(Duration::from_secs(duration_secs - duration_secs / 2));

    // 7. Resultados
    {
        let marta = marta.lock().unwrap();
        let mateus = mateus.lock().unwrap();
        println!(
            "Marta tem uma cadeia de comprimento {}.",
            chain_length(marta.client())
        );
        println!(
            "Mateus tem uma cadeia de comprimento {}.",
            chain_length(mateus.client())
        );

        println!("\nCadeia de Marta, da ponta ao gênese:");
        for id in marta.client().chain_ids() {
            println!("   🧱 {id}");
        }

        println!("\nSaldos finais (perspectiva de Marta):");
        print_balances(marta.client(), &roster);

        println!("\nSaldos finais (perspectiva de Mateus):");
        print_balances(mateus.client(), &roster);
    }

    {
        let alice = alice.lock().unwrap();
        println!("\nSaldos finais (perspectiva de Alice):");
        print_balances(&alice, &roster);
    }

    println!("\n🎉 Simulação concluída.");
    Ok(())
}

fn chain_length(client: &Client) -> u64 {
    client.head().map_or(0, |head| head.chain_length)
}

fn print_balances(client: &Client, roster: &[(String, Address)]) {
    let Some(head) = client.head() else {
        println!("   (sem cadeia)");
        return;
    };
    for (name, address) in roster {
        let balance: Amount = head.balance_of(address);
        println!("   💰 {name} tem {balance} de ouro.");
    }
}
