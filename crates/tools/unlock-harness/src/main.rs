//! CLI harness for exercising the seed unlock workflow
//!
//! This tool allows testing:
//! - PIN attempt sequences against a demo wallet
//! - Lockout escalation persisted across runs
//! - Lockout inspection and reset

use anyhow::Context;
use clap::{Parser, Subcommand};
use seedvault_core::{
    Configuration, EncryptionAlgorithm, InMemoryConfiguration, JsonFileRetryStore,
    PinRetryRegistry, RetryStateStore, Seed, SoftwareWallet, SystemClock, UnlockSettings, Wallet,
};
use seedvault_unlock::{
    init_unlock_logging, AttemptOutcome, SessionEvent, SessionOptions, UnlockSession,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Well-known test vector; never a real wallet.
const DEMO_PHRASE: &str = "abandon abandon abandon abandon abandon abandon \
                           abandon abandon abandon abandon abandon about";

#[derive(Parser)]
#[command(name = "unlock-harness")]
#[command(about = "Seed unlock workflow testing harness", long_about = None)]
struct Cli {
    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    /// Settings file (JSON)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Directory holding lockout state
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Wallet identifier
    #[arg(long, global = true, default_value = "demo-wallet")]
    wallet_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a session on the demo wallet and submit PINs in order
    Demo {
        /// PIN the demo wallet is encrypted with
        #[arg(long, default_value = "1234")]
        wallet_pin: String,

        /// PINs to submit
        #[arg(short, long = "pin", required = true)]
        pins: Vec<String>,

        /// Use an unencrypted wallet (no PIN needed)
        #[arg(long)]
        unencrypted: bool,

        /// Tick "written down" after the seed is revealed
        #[arg(long)]
        written_down: bool,
    },

    /// Show the persisted lockout state
    Status,

    /// Clear the persisted lockout state
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_unlock_logging(cli.json_logs)?;

    let settings = match &cli.settings {
        Some(path) => UnlockSettings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => UnlockSettings::default(),
    };
    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("seedvault-unlock-harness"));
    let store = Arc::new(JsonFileRetryStore::open(&state_dir)?);
    let registry = PinRetryRegistry::new(
        settings.lockout.clone(),
        Arc::clone(&store) as Arc<dyn RetryStateStore>,
        Arc::new(SystemClock),
    )?;

    match cli.command {
        Commands::Demo {
            wallet_pin,
            pins,
            unencrypted,
            written_down,
        } => {
            run_demo(
                &registry,
                &settings,
                &cli.wallet_id,
                &wallet_pin,
                &pins,
                unencrypted,
                written_down,
            )
            .await?;
        }
        Commands::Status => {
            let retry = registry.controller_for(&cli.wallet_id)?;
            let state = retry.state();
            info!("Wallet: {}", cli.wallet_id);
            info!("State file: {}", store.path_for(&cli.wallet_id).display());
            info!("Consecutive failures: {}", state.consecutive_failures);
            info!("Locked until: {:?}", state.locked_until);
            info!("Status: {}", retry.remaining_attempts_message());
        }
        Commands::Reset => {
            registry.controller_for(&cli.wallet_id)?.reset()?;
            info!("Lockout state cleared for {}", cli.wallet_id);
        }
    }

    Ok(())
}

async fn run_demo(
    registry: &PinRetryRegistry,
    settings: &UnlockSettings,
    wallet_id: &str,
    wallet_pin: &str,
    pins: &[String],
    unencrypted: bool,
    written_down: bool,
) -> anyhow::Result<()> {
    let seed = Seed::from_phrase(DEMO_PHRASE);
    let wallet: Arc<dyn Wallet> = if unencrypted {
        Arc::new(SoftwareWallet::unencrypted(wallet_id, seed))
    } else {
        info!("Encrypting demo wallet (this runs the KDF once)");
        Arc::new(SoftwareWallet::encrypted(
            wallet_id,
            &seed,
            wallet_pin,
            &settings.kdf_cost,
            EncryptionAlgorithm::ChaCha20Poly1305,
        )?)
    };

    let configuration = Arc::new(InMemoryConfiguration::new(true));
    let mut session = UnlockSession::start(
        wallet,
        registry.controller_for(wallet_id)?,
        Arc::clone(&configuration) as Arc<dyn Configuration>,
        SessionOptions::from(settings),
    )?
    .with_on_end(|| info!("Seed dialog dismissed"));
    info!("Session {} started", session.id());

    let mut revealed = false;
    if !session.config().is_encrypted {
        if let Some(SessionEvent::Outcome(outcome)) = session.next_event().await? {
            revealed = report(&outcome);
        }
    }

    for pin in pins {
        if revealed {
            break;
        }
        let started = std::time::Instant::now();
        match session.submit(pin).await? {
            Some(outcome) => {
                revealed = report(&outcome);
                info!("  Took {:.2}s", started.elapsed().as_secs_f64());
            }
            None => warn!("Attempt ignored"),
        }
        session.pin_edited();
    }

    if revealed && written_down {
        session.set_written_down(true);
    }
    let audit = session.audit().export_events()?;
    session.end();

    info!("Backup reminder armed: {}", configuration.remind_backup_seed());
    info!("Audit trail:\n{}", audit);
    Ok(())
}

fn report(outcome: &AttemptOutcome) -> bool {
    match outcome {
        AttemptOutcome::Revealed(seed) => {
            info!("Seed revealed ({} words)", seed.word_count());
            true
        }
        AttemptOutcome::WrongPassword(message) => {
            warn!("Wrong PIN: {}", message);
            false
        }
        AttemptOutcome::Locked(message) => {
            warn!("Locked: {}", message);
            false
        }
        AttemptOutcome::DerivationFailed(message) => {
            warn!("Derivation failed: {}", message);
            false
        }
    }
}
