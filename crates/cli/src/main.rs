//! Operator CLI for the dispatch pipeline: register a dispatch row, submit
//! its signed XML, and poll the authority for the verdict.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dispatch::audit::JsonlAudit;
use dispatch::model::Dispatch;
use dispatch::repo::{DispatchRepository, SledRepository};
use dispatch::store::FsStore;
use dispatch::{ChannelFlagsSource, DispatchService};
use gateway::{ose::OseConfig, pse::PseConfig, sunat::SunatConfig, HttpGatewayFactory};
use gre_core::DispatchState;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gre", about = "Electronic dispatch document sender")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a dispatch row for an already-signed document
    Register {
        /// Canonical document filename (signed XML must exist in the store)
        filename: String,
        #[arg(long, default_value = "09")]
        document_type_id: String,
        #[arg(long)]
        series: String,
        #[arg(long)]
        number: u32,
    },
    /// Submit the signed document to the configured gateway
    Send { external_id: String },
    /// Poll the gateway for the document's status
    Status {
        external_id: String,
        /// Omit download links from the answer
        #[arg(long)]
        simple: bool,
    },
    /// List every known dispatch row
    List,
    /// Manage gateway credentials in the OS keychain
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },
}

#[derive(Subcommand)]
enum SecretAction {
    /// Store a credential (sol_password, pse_api_key, ose_client_id, ose_client_secret)
    Set { key: String, value: String },
    Delete { key: String },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Re-reads the tenant config on every call so flag changes reroute the
/// next request without a restart.
struct ConfigFlags;

impl ChannelFlagsSource for ConfigFlags {
    fn current(&self) -> gateway::ChannelFlags {
        config::load()
            .map(|cfg| cfg.provider.channel_flags())
            .unwrap_or_default()
    }
}

fn build_factory(cfg: &config::AppConfig) -> Result<HttpGatewayFactory> {
    let sol_password = config::get_secret("sol_password").unwrap_or_default();
    let pse_api_key = config::get_secret("pse_api_key").unwrap_or_default();
    let ose_client_id = config::get_secret("ose_client_id").unwrap_or_default();
    let ose_client_secret = config::get_secret("ose_client_secret").unwrap_or_default();

    Ok(HttpGatewayFactory {
        sunat: SunatConfig {
            base_url: cfg
                .provider
                .authority_url
                .clone()
                .ok_or_else(|| anyhow!("authority_url not configured"))?,
            ruc: cfg.company.number.clone(),
            sol_username: cfg.company.sol_username.clone(),
            sol_password,
        },
        pse: PseConfig {
            base_url: cfg.provider.pse_base_url.clone().unwrap_or_default(),
            api_key: pse_api_key,
        },
        ose: OseConfig {
            base_url: cfg.provider.ose_base_url.clone().unwrap_or_default(),
            client_id: ose_client_id,
            client_secret: ose_client_secret,
        },
    })
}

fn build_service(cfg: &config::AppConfig) -> Result<(DispatchService, Arc<SledRepository>)> {
    let repo = Arc::new(
        SledRepository::open(&cfg.storage.database_dir)
            .map_err(|e| anyhow!("could not open dispatch database: {e}"))?,
    );
    let store = Arc::new(FsStore::new(&cfg.storage.documents_dir));
    let events = Arc::new(JsonlAudit::new("audit.jsonl"));
    let factory = Arc::new(build_factory(cfg)?);

    let service = DispatchService::new(
        Arc::clone(&repo) as Arc<dyn DispatchRepository>,
        store,
        events,
        factory,
        Arc::new(ConfigFlags),
        cfg.storage.links_base_url.clone(),
    );
    Ok((service, repo))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    // Credential management must work before the endpoints are configured.
    if let Command::Secret { action } = &cli.command {
        match action {
            SecretAction::Set { key, value } => {
                config::store_secret(key, value).context("could not store secret")?;
                println!("stored {key}");
            }
            SecretAction::Delete { key } => {
                config::delete_secret(key).context("could not delete secret")?;
                println!("deleted {key}");
            }
        }
        return Ok(());
    }

    let cfg = config::load().context("could not load configuration")?;
    let (service, repo) = build_service(&cfg)?;

    match cli.command {
        Command::Register {
            filename,
            document_type_id,
            series,
            number,
        } => {
            let external_id = uuid::Uuid::new_v4().to_string();
            let row = Dispatch {
                id: repo
                    .next_id()
                    .map_err(|e| anyhow!("could not allocate dispatch id: {e}"))?,
                external_id: external_id.clone(),
                document_type_id,
                series,
                number,
                filename,
                ticket: None,
                reception_date: None,
                state: DispatchState::Pending,
                has_cdr: false,
                qr_url: None,
            };
            repo.insert(&row)
                .map_err(|e| anyhow!("could not register dispatch: {e}"))?;
            tracing::info!(%external_id, "dispatch registered");
            println!("{external_id}");
        }
        Command::Send { external_id } => {
            let response = service.send(&external_id).await;
            print_json(&response)?;
        }
        Command::Status {
            external_id,
            simple,
        } => {
            let response = service.status_ticket(&external_id, simple).await;
            print_json(&response)?;
        }
        Command::List => {
            let rows = repo
                .list()
                .map_err(|e| anyhow!("could not list dispatches: {e}"))?;
            print_json(&rows)?;
        }
        // handled above, before the service is built
        Command::Secret { .. } => {}
    }

    Ok(())
}
