use clap::{Args, Parser, Subcommand};
use std::error::Error;
use tracing::Level;

mod sim;

#[derive(Parser)]
#[command(name = "aurum")]
#[command(about = "Aurum - Proof-of-Work Blockchain Simulator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo simulation (clients + miners over the fake net)
    Demo(DemoArgs),
    /// Display version information
    Version,
}

#[derive(Args)]
struct DemoArgs {
    /// How long to let the network run, in seconds
    #[arg(short, long, default_value = "12")]
    duration: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Demo(args)) => run_demo(args),
        Some(Commands::Version) => {
            show_version();
            Ok(())
        }
        None => run_demo(&DemoArgs {
            duration: 12,
            log_level: "warn".to_string(),
        }),
    }
}

fn run_demo(args: &DemoArgs) -> Result<(), Box<dyn Error>> {
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    sim::run_demo(args.duration)
}

fn show_version() {
    println!("🔗 Aurum v{}", env!("CARGO_PKG_VERSION"));
    println!("Simulador pedagógico de blockchain com prova de trabalho");
    println!();
    println!("Componentes:");
    println!("  ⛓️  Máquina de estados de blocos e cadeia");
    println!("  📬 Protocolo de recepção por participante");
    println!("  ⛏️  Laço cooperativo de mineração");
}
