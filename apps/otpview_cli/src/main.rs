use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use otpview_adapters::configuration;
use otpview_adapters::telemetry;
use otpview_adapters::TwoFAuthAccountSource;
use otpview_core::config::Settings;
use otpview_core::entities::{Account, AccountId};
use otpview_core::timing::{Clock, SystemClock};
use otpview_core::use_cases::{
    tick, AccountDirectory, CountdownPolicy, CountdownScheduler, RemainingMap,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server URL, overriding the configuration
    #[arg(long, global = true)]
    server: Option<String>,

    /// Personal access token, overriding the configuration
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List accounts with their current codes
    Accounts {
        /// Only show accounts whose service or name contains this text
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show live countdowns, refreshing codes as periods roll over
    Watch {
        /// Only show accounts whose service or name contains this text
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Delete an account on the server
    Remove {
        /// Account id as shown by `accounts`
        id: u32,

        /// Skip the confirmation prompt
        #[arg(short, long, default_value = "false")]
        yes: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut settings = match configuration::get_configuration() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return Err(anyhow::anyhow!("configuration loading failed"));
        }
    };

    let _guard = telemetry::init_subscriber("otpview_cli", &settings.log_level);

    if cli.server.is_some() {
        settings.server.url = cli.server.clone();
    }
    if cli.token.is_some() {
        settings.server.api_token = cli.token.clone();
    }

    match &cli.command {
        Commands::Accounts { search } => {
            let directory = open_directory(&settings).await?;
            let accounts = filtered(&directory, search.as_deref()).await;

            if accounts.is_empty() {
                println!("No accounts found.");
                return Ok(());
            }

            let policy = CountdownPolicy::from(&settings.countdown);
            let remaining =
                tick(&RemainingMap::new(), &accounts, SystemClock.epoch_secs(), &policy).remaining;

            println!("{} accounts:", accounts.len());
            for account in &accounts {
                let code = account
                    .otp
                    .as_ref()
                    .map(|otp| otp.password.as_str())
                    .unwrap_or("------");
                let countdown = remaining
                    .get(&account.id)
                    .map(|secs| format!("{:>3}s", secs))
                    .unwrap_or_default();

                println!(
                    "  [{:>4}] {:<4} {:>10} {:>4}  {}",
                    account.id,
                    account.otp_type,
                    code,
                    countdown,
                    account.display_name()
                );
            }
        }

        Commands::Watch { search } => {
            let directory = Arc::new(open_directory(&settings).await?);
            if let Some(query) = search {
                directory.set_search_query(query).await;
            }
            watch(directory, &settings).await?;
        }

        Commands::Remove { id, yes } => {
            let directory = open_directory(&settings).await?;
            let account_id = AccountId::new(*id);

            let Some(account) = directory
                .accounts()
                .into_iter()
                .find(|a| a.id == account_id)
            else {
                println!("Account {} not found.", id);
                return Ok(());
            };

            if !*yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Delete account '{}'?", account.display_name()))
                    .default(false)
                    .interact()?;

                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            if let Err(e) = directory.delete(account_id).await {
                error!(?e, "failed to delete account");
                return Err(e.into());
            }

            println!(
                "Account '{}' deleted. {} accounts remaining.",
                account.display_name(),
                directory.accounts().len()
            );
        }

        Commands::Config => {
            let mut shown = settings.clone();
            if shown.server.api_token.is_some() {
                shown.server.api_token = Some("********".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
            println!("\nLogs: {}", telemetry::log_dir().display());
        }
    }

    Ok(())
}

async fn open_directory(
    settings: &Settings,
) -> anyhow::Result<AccountDirectory<TwoFAuthAccountSource>> {
    let source = TwoFAuthAccountSource::from_settings(&settings.server)
        .context("set server.url and server.api_token, or pass --server and --token")?;

    let directory = AccountDirectory::new(Arc::new(source));
    directory
        .fetch()
        .await
        .context("failed to load accounts")?;

    Ok(directory)
}

async fn filtered(
    directory: &AccountDirectory<TwoFAuthAccountSource>,
    search: Option<&str>,
) -> Vec<Account> {
    if let Some(query) = search {
        directory.set_search_query(query).await;
    }
    directory.filtered().await
}

// ============================================================================
// Live countdown
// ============================================================================

async fn watch(
    directory: Arc<AccountDirectory<TwoFAuthAccountSource>>,
    settings: &Settings,
) -> anyhow::Result<()> {
    let scheduler = CountdownScheduler::from_settings(Arc::new(SystemClock), &settings.countdown);

    let refresher = directory.clone();
    let mut handle = scheduler.spawn(directory.subscribe(), move || {
        refresher.refresh_in_background();
    });

    let mut remaining = handle.subscribe();
    let mut accounts = directory.subscribe();

    let multi = MultiProgress::new();
    let mut bars: BTreeMap<AccountId, ProgressBar> = BTreeMap::new();
    let policy = CountdownPolicy::from(&settings.countdown);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("watching accounts, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = accounts.changed() => {
                if changed.is_err() {
                    break;
                }
                // A refresh ends with a new list; rebuild so codes stay current
                rebuild_bars(&multi, &mut bars, &directory.filtered().await, &policy)?;
            }
            changed = remaining.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = remaining.borrow_and_update().clone();
                if bars.is_empty() && !current.is_empty() {
                    rebuild_bars(&multi, &mut bars, &directory.filtered().await, &policy)?;
                }
                for (id, bar) in &bars {
                    if let Some(secs) = current.get(id) {
                        bar.set_position(u64::from(*secs));
                    }
                }
            }
        }
    }

    handle.stop();
    for bar in bars.values() {
        bar.finish_and_clear();
    }
    println!("Stopped.");

    Ok(())
}

fn rebuild_bars(
    multi: &MultiProgress,
    bars: &mut BTreeMap<AccountId, ProgressBar>,
    accounts: &[Account],
    policy: &CountdownPolicy,
) -> anyhow::Result<()> {
    for bar in bars.values() {
        multi.remove(bar);
    }
    bars.clear();

    let style = ProgressStyle::default_bar()
        .template("{prefix:<32} {msg:>10} [{bar:30.cyan/blue}] {pos:>3}s")?
        .progress_chars("#>-");

    for account in accounts {
        let Some(period) = account.countdown_period(policy.default_period) else {
            continue;
        };
        let code = account
            .otp
            .as_ref()
            .map(|otp| otp.password.clone())
            .unwrap_or_default();

        let bar = multi.add(ProgressBar::new(u64::from(period)));
        bar.set_style(style.clone());
        bar.set_prefix(account.display_name());
        bar.set_message(code);
        bars.insert(account.id, bar);
    }

    Ok(())
}
