use clap::{Parser, Subcommand};
use gambit::adapters::OkxRestClient;
use gambit::config::{AppConfig, LoggingConfig};
use gambit::error::Result;
use gambit::persistence::SqliteStore;
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gambit", version, about = "EMA-cross perpetual-swap trader")]
struct Cli {
    /// Configuration directory
    #[arg(short, long, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop
    Run,
    /// Show account equity and available margin
    Balance,
    /// Show contract parameters for the configured instrument
    Instrument,
    /// Show recent rows from the local order journal
    Orders {
        #[arg(short = 'n', long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Tabled)]
struct OrderRow {
    ts: String,
    inst: String,
    side: String,
    pos: String,
    sz: String,
    px: String,
    state: String,
    cl_ord_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::load_from(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_logging(&cfg.logging);
            if let Err(errors) = cfg.validate() {
                for e in &errors {
                    eprintln!("config error: {e}");
                }
                std::process::exit(1);
            }
            gambit::runtime::run(cfg).await?;
        }
        Commands::Balance => {
            init_logging_simple();
            let client = OkxRestClient::new(&cfg.exchange, &cfg.trade.td_mode)?;
            let bal = client.fetch_account_balance().await?;
            println!("equity:    {} USD", bal.equity_usd);
            println!("available: {} USDT", bal.avail_usdt);
        }
        Commands::Instrument => {
            init_logging_simple();
            let client = OkxRestClient::new(&cfg.exchange, &cfg.trade.td_mode)?;
            let spec = client.fetch_instrument_spec(&cfg.trade.inst_id).await?;
            println!("{}", cfg.trade.inst_id);
            println!("  ctVal:  {}", spec.ct_val);
            println!("  lotSz:  {}", spec.lot_sz);
            println!("  minSz:  {}", spec.min_sz);
            println!("  tickSz: {}", spec.tick_sz);
        }
        Commands::Orders { limit } => {
            init_logging_simple();
            let store = SqliteStore::open(&cfg.store.path).await?;
            let rows = store.recent_orders(limit).await?;
            if rows.is_empty() {
                println!("(no orders recorded)");
            } else {
                let items: Vec<OrderRow> = rows
                    .into_iter()
                    .map(|r| OrderRow {
                        ts: r.ts.format("%Y-%m-%d %H:%M:%S").to_string(),
                        inst: r.inst_id,
                        side: r.side,
                        pos: r.pos_side,
                        sz: r.sz.to_string(),
                        px: r.px.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                        state: r.state,
                        cl_ord_id: r.cl_ord_id,
                    })
                    .collect();
                println!("{}", Table::new(items));
            }
        }
    }

    Ok(())
}

fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{Layer, Registry};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", cfg.level)));

    // `tracing_appender::rolling::daily` panics if it cannot create the first
    // log file, so writability is probed before the appender is built.
    let file_layer: Option<Box<dyn Layer<Registry> + Send + Sync>> =
        if std::fs::create_dir_all(&cfg.dir).is_ok() {
            let probe = std::path::Path::new(&cfg.dir).join(".gambit_write_test");
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    let appender = tracing_appender::rolling::daily(&cfg.dir, "gambit.log");
                    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                    // The guard must live as long as the process.
                    Box::leak(Box::new(guard));
                    let layer = tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true);
                    if cfg.json {
                        Some(layer.json().boxed())
                    } else {
                        Some(layer.boxed())
                    }
                }
                Err(e) => {
                    eprintln!(
                        "Warning: log directory {} not writable ({}), file logging disabled",
                        cfg.dir, e
                    );
                    None
                }
            }
        } else {
            eprintln!(
                "Warning: could not create log directory {}, file logging disabled",
                cfg.dir
            );
            None
        };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let file_logging = file_layer.is_some();
    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(filter)
        .init();

    if file_logging {
        eprintln!("Logging to: {}/gambit.log", cfg.dir);
    }
}

fn init_logging_simple() {
    // Minimal logging for one-shot CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
