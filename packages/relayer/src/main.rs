use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use relay_core::{
    BlockSpec, ChainConnector, ChainRegistry, ChainRole, ContractInfoProvider, EventKind,
    EventScanner, LocalKeySigner, RelayEngine, RelaySigner, RpcConnector, ScanWindow,
    StaticContractInfo,
};
use tokio::sync::{watch, Mutex, RwLock};

use relayer::api;
use relayer::config::Config;
use relayer::cursor::CursorStore;
use relayer::export::export_events;
use relayer::manager::{RelayManager, RelayPass};

#[derive(Parser)]
#[command(name = "bridge-relayer")]
#[command(about = "Relays bridge deposits and unwraps between two EVM chains")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll both chains and relay continuously (default)
    Run {
        /// First block to scan when the cursor file has no position yet
        #[arg(long)]
        from_block: Option<u64>,
    },
    /// Relay a single block window once and print the report
    Scan {
        /// Role of the chain to scan: source or destination
        #[arg(long)]
        role: ChainRole,
        #[arg(long)]
        from: BlockSpec,
        #[arg(long, default_value = "latest")]
        to: BlockSpec,
    },
    /// List bridge events in a window as JSON lines without relaying
    Events {
        #[arg(long)]
        role: ChainRole,
        #[arg(long)]
        from: BlockSpec,
        #[arg(long, default_value = "latest")]
        to: BlockSpec,
        /// Append to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::info!(
        source = %config.source.chain,
        destination = %config.destination.chain,
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Command::Run { from_block: None }) {
        Command::Run { from_block } => run(config, from_block).await,
        Command::Scan { role, from, to } => scan(config, role, from, to).await,
        Command::Events {
            role,
            from,
            to,
            output,
        } => events(config, role, from, to, output).await,
    }
}

/// Connected chains for both roles
struct Chains {
    source: Arc<dyn ChainConnector>,
    destination: Arc<dyn ChainConnector>,
}

impl Chains {
    async fn connect(config: &Config) -> Result<Self> {
        let registry = ChainRegistry::builtin();
        let source = RpcConnector::connect(config.chain_spec(ChainRole::Source, &registry)?)
            .await
            .wrap_err("Failed to connect to source chain")?;
        let destination =
            RpcConnector::connect(config.chain_spec(ChainRole::Destination, &registry)?)
                .await
                .wrap_err("Failed to connect to destination chain")?;
        Ok(Self {
            source: Arc::new(source),
            destination: Arc::new(destination),
        })
    }

    fn get(&self, role: ChainRole) -> Arc<dyn ChainConnector> {
        match role {
            ChainRole::Source => self.source.clone(),
            ChainRole::Destination => self.destination.clone(),
        }
    }

    fn engine(
        &self,
        role: ChainRole,
        config: &Config,
        contracts: &StaticContractInfo,
        signer: Arc<dyn RelaySigner>,
    ) -> Result<RelayEngine> {
        Ok(RelayEngine::new(
            role,
            contracts,
            self.get(role),
            self.get(role.counterpart()),
            signer,
            config.engine_config(),
        )?)
    }
}

async fn run(config: Config, from_block: Option<u64>) -> Result<()> {
    tracing::info!("Starting bridge relayer");

    let contracts = StaticContractInfo::from_file(&config.contract_info_path)?;
    let signer: Arc<dyn RelaySigner> =
        Arc::new(LocalKeySigner::from_private_key(&config.private_key)?);
    let chains = Chains::connect(&config).await?;

    let cursor = Arc::new(Mutex::new(CursorStore::open(&config.cursor_path)?));
    let status = Arc::new(RwLock::new(HashMap::new()));

    let mut passes = Vec::new();
    for role in [ChainRole::Source, ChainRole::Destination] {
        let engine = chains.engine(role, &config, &contracts, signer.clone())?;
        passes.push(
            RelayPass::new(
                engine,
                cursor.clone(),
                status.clone(),
                config.relay.clone(),
                config.pass_deadline(),
                from_block,
            )
            .await,
        );
    }
    tracing::info!(cursor = %config.cursor_path.display(), "Relay passes initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let api_status = status.clone();
    let api_shutdown = shutdown_rx.clone();
    let api_addr = config.api_addr;
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_status, api_shutdown).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    RelayManager::new(passes).run(shutdown_rx).await?;
    tracing::info!("Bridge relayer stopped");
    Ok(())
}

async fn scan(config: Config, role: ChainRole, from: BlockSpec, to: BlockSpec) -> Result<()> {
    let contracts = StaticContractInfo::from_file(&config.contract_info_path)?;
    let signer: Arc<dyn RelaySigner> =
        Arc::new(LocalKeySigner::from_private_key(&config.private_key)?);
    let chains = Chains::connect(&config).await?;

    let mut engine = chains.engine(role, &config, &contracts, signer)?;
    let report = match config.pass_deadline() {
        Some(budget) => {
            let deadline = tokio::time::Instant::now() + budget;
            engine.scan_blocks_until(from, to, Some(deadline)).await?
        }
        None => engine.scan_blocks(from, to).await?,
    };

    tracing::info!(
        role = %role,
        window = %report.window,
        confirmed = report.confirmed(),
        failed = report.failed(),
        duplicates = report.duplicates(),
        unknown = report.unknown_outcomes().len(),
        "Scan complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn events(
    config: Config,
    role: ChainRole,
    from: BlockSpec,
    to: BlockSpec,
    output: Option<PathBuf>,
) -> Result<()> {
    let contracts = StaticContractInfo::from_file(&config.contract_info_path)?;
    let registry = ChainRegistry::builtin();
    let connector: Arc<dyn ChainConnector> =
        Arc::new(RpcConnector::connect(config.chain_spec(role, &registry)?).await?);

    let kind = EventKind::for_role(role);
    let info = contracts.contract_info(role)?;
    info.require_event(role, kind.name(), kind.signature())?;
    let scanner = EventScanner::new(connector, info.address, kind);

    let latest = scanner.connector().current_height().await?;
    let window = ScanWindow::new(from.resolve(latest), to.resolve(latest))?;

    let written = match output {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .wrap_err_with(|| format!("Failed to open {}", path.display()))?;
            export_events(&scanner, window, &mut BufWriter::new(file)).await?
        }
        None => export_events(&scanner, window, &mut io::stdout().lock()).await?,
    };

    tracing::info!(role = %role, window = %window, events = written, "Events exported");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,bridge_relayer=debug,relayer=debug,relay_core=debug")
    });

    // Logs go to stderr so `scan` and `events` output stays parseable
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(io::stderr),
            )
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
