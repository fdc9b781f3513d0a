mod runtime;

use std::{path::PathBuf, time::Duration};

use {
    anyhow::{Context, Result},
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::info,
    wamux_accounts::{AccountInfo, AccountStatus, LoginResponse, WebhookConfig, render_terminal},
    wamux_config::WamuxConfig,
};

/// How long an interactive pairing-code login waits for the phone.
const PAIRING_CODE_WAIT: Duration = Duration::from_secs(180);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Manage WhatsApp accounts multiplexed over one sidecar.
#[derive(Parser, Debug)]
#[command(name = "wamux", version, about)]
struct Cli {
    /// Path to wamux.toml (overrides discovery).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new account.
    Create { id: String },
    /// List all accounts.
    List,
    /// Show one account as JSON.
    Show { id: String },
    /// Delete an account and its local credentials.
    Delete { id: String },
    /// Manage the account's inbound-message webhook.
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
    /// Pair an account interactively, by QR code or phone pairing code.
    Login {
        id: String,
        /// Request a pairing code for this phone number instead of a QR code.
        #[arg(long)]
        phone: Option<String>,
    },
    /// Restore paired sessions and process events until Ctrl-C.
    Serve,
}

#[derive(Subcommand, Debug)]
enum WebhookAction {
    Set {
        id: String,
        url: String,
        /// HMAC key for the X-Hub-Signature-256 header.
        #[arg(long)]
        secret: Option<String>,
    },
    Get { id: String },
}

fn init_tracing(json: bool, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json, &cli.log_level);

    let config = wamux_config::load_config(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Command::Create { id } => {
            let service = runtime::offline(&config).await?;
            let account = service.create(&id).await?;
            println!("created {} ({})", account.id, account.status);
        },
        Command::List => {
            let service = runtime::offline(&config).await?;
            let accounts = service.list().await?;
            if accounts.is_empty() {
                println!("no accounts");
            }
            for info in accounts {
                print_row(&info);
            }
        },
        Command::Show { id } => {
            let service = runtime::offline(&config).await?;
            let info = service.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        },
        Command::Delete { id } => {
            let service = runtime::offline(&config).await?;
            service.delete(&id).await?;
            println!("deleted {id}");
        },
        Command::Webhook { action } => {
            let service = runtime::offline(&config).await?;
            match action {
                WebhookAction::Set { id, url, secret } => {
                    let mut webhook = WebhookConfig::new(url);
                    if let Some(secret) = secret {
                        webhook = webhook.with_secret(secret);
                    }
                    service.set_webhook(&id, webhook).await?;
                    println!("webhook set for {id}");
                },
                WebhookAction::Get { id } => match service.get_webhook(&id).await? {
                    Some(webhook) => println!(
                        "{}{}",
                        webhook.url,
                        if webhook.secret.is_some() { " (signed)" } else { "" }
                    ),
                    None => println!("no webhook configured for {id}"),
                },
            }
        },
        Command::Login { id, phone } => login(&config, &id, phone.as_deref()).await?,
        Command::Serve => serve(&config).await?,
    }
    Ok(())
}

fn print_row(info: &AccountInfo) {
    let live = match (info.is_connected, info.is_logged_in) {
        (_, true) => "online",
        (true, false) => "connecting",
        (false, false) => "-",
    };
    println!(
        "{:<24} {:<13} {:<16} {}",
        info.account.id,
        info.account.status,
        info.account.phone_number.as_deref().unwrap_or("-"),
        live
    );
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

async fn login(config: &WamuxConfig, id: &str, phone: Option<&str>) -> Result<()> {
    let online = runtime::online(config).await?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let result = match phone {
        Some(phone) => code_login(&online, id, phone, &cancel).await,
        None => qr_login(&online, id, &cancel).await,
    };

    online.stop().await;
    result
}

async fn code_login(
    online: &runtime::Online,
    id: &str,
    phone: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let code = online.service.login_with_code(id, phone, cancel).await?;
    println!(
        "Enter this code on the phone (Linked devices > Link with phone number):\n\n    {code}\n"
    );
    wait_for_login(online, id, PAIRING_CODE_WAIT, cancel).await
}

async fn qr_login(online: &runtime::Online, id: &str, cancel: &CancellationToken) -> Result<()> {
    loop {
        let resp = online.service.login(id, cancel).await?;
        if resp.is_already_logged_in() || resp.is_success() {
            println!("{id} is logged in");
            return Ok(());
        }
        print_qr(&resp)?;
        if wait_for_login(online, id, resp.expires_in, cancel).await.is_ok() {
            return Ok(());
        }
        info!(account_id = id, "qr code expired, requesting a new one");
    }
}

fn print_qr(resp: &LoginResponse) -> Result<()> {
    println!("{}", render_terminal(&resp.code)?);
    if let Some(path) = &resp.image_path {
        println!("QR image: {}", path.display());
    }
    println!("Scan within {}s (Linked devices > Link a device).", resp.expires_in.as_secs());
    Ok(())
}

async fn wait_for_login(
    online: &runtime::Online,
    id: &str,
    wait: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let info = online.service.get(id).await?;
        if info.account.status == AccountStatus::LoggedIn {
            println!(
                "{id} paired as {}",
                info.account.phone_number.as_deref().unwrap_or("unknown number")
            );
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("{id} was not paired within {}s", wait.as_secs());
        }
        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("login cancelled"),
            _ = tokio::time::sleep(POLL_INTERVAL) => {},
        }
    }
}

async fn serve(config: &WamuxConfig) -> Result<()> {
    let online = runtime::online(config).await?;
    let restored = online.service.restore_sessions().await?;
    info!(restored, "serving accounts, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    online.stop().await;
    Ok(())
}
