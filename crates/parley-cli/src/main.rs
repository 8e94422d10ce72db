use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use parley_common::{Agent, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, OwnerId};
use parley_config::{AppConfig, ConfigLoader};
use parley_db::{AgentStore, CredentialStore, SqliteStore, TokenStore};
use parley_gateway::bootstrap::build_provider_registry;
use parley_gateway::{AppState, BearerTokenAuth, GatewayServer};
use parley_security::{RedactingWriter, SecretCipher};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley", version, about = "Agent chat gateway with streamed provider replies")]
struct Cli {
    /// Path to config file (default: ~/.parley/config.yml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print a fresh base64 master key for credential encryption
    Keygen,
    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentCommand,
    },
    /// Manage provider API connections
    Credential {
        #[command(subcommand)]
        action: CredentialCommand,
    },
    /// Manage gateway access tokens
    Token {
        #[command(subcommand)]
        action: TokenCommand,
    },
}

#[derive(Subcommand)]
enum AgentCommand {
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        system_prompt: Option<String>,
        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f64,
        #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
        max_tokens: u32,
    },
    List {
        #[arg(long)]
        owner: String,
    },
}

#[derive(Subcommand)]
enum CredentialCommand {
    Add {
        #[arg(long)]
        owner: String,
        /// Free-text label, e.g. "openai" or "Anthropic prod"
        #[arg(long)]
        service: String,
        #[arg(long, env = "PARLEY_CREDENTIAL_SECRET", hide_env_values = true)]
        secret: String,
    },
    List {
        #[arg(long)]
        owner: String,
    },
}

#[derive(Subcommand)]
enum TokenCommand {
    Issue {
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = ConfigLoader::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Keygen => {
            println!("{}", SecretCipher::generate_key()?);
            Ok(())
        }
        Command::Agent { action } => run_agent(&config, action).await,
        Command::Credential { action } => run_credential(&config, action).await,
        Command::Token { action } => run_token(&config, action).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr());
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(config: &AppConfig) -> Result<Arc<SqliteStore>> {
    let key_env = &config.credentials.master_key_env;
    let key = std::env::var(key_env)
        .with_context(|| format!("{key_env} is not set; generate a key with `parley keygen`"))?;
    let cipher = SecretCipher::from_base64(key.trim())
        .with_context(|| format!("{key_env} is not a valid master key"))?;

    let path = ConfigLoader::database_path(config);
    let store = SqliteStore::open(&path, cipher)?;
    info!("using database {}", path.display());
    Ok(Arc::new(store))
}

async fn serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let store = open_store(&config)?;
    let registry = build_provider_registry(&config.providers);
    let state = AppState::new(
        config,
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(BearerTokenAuth::new(store.clone())),
        registry,
    );

    GatewayServer::new(state).run().await?;
    Ok(())
}

async fn run_agent(config: &AppConfig, action: AgentCommand) -> Result<()> {
    let store = open_store(config)?;
    match action {
        AgentCommand::Create {
            owner,
            name,
            model,
            system_prompt,
            temperature,
            max_tokens,
        } => {
            if !(0.0..=2.0).contains(&temperature) {
                bail!("temperature must be between 0 and 2, got {temperature}");
            }
            let mut agent = Agent::new(OwnerId::from(owner), name, model);
            agent.system_prompt = system_prompt.filter(|p| !p.trim().is_empty());
            agent.temperature = temperature;
            agent.max_tokens = max_tokens;
            store.create_agent(&agent).await?;
            println!("{}", agent.id);
        }
        AgentCommand::List { owner } => {
            for agent in store.list_agents(&OwnerId::from(owner)).await? {
                println!(
                    "{}\t{}\t{}\ttemperature={}\tmax_tokens={}",
                    agent.id, agent.name, agent.model, agent.temperature, agent.max_tokens
                );
            }
        }
    }
    Ok(())
}

async fn run_credential(config: &AppConfig, action: CredentialCommand) -> Result<()> {
    let store = open_store(config)?;
    match action {
        CredentialCommand::Add {
            owner,
            service,
            secret,
        } => {
            if secret.trim().is_empty() {
                bail!("secret must not be empty");
            }
            let credential = store
                .add_credential(&OwnerId::from(owner), &service, secret.trim())
                .await?;
            println!("{}", credential.id);
        }
        CredentialCommand::List { owner } => {
            for credential in store.list_for_owner(&OwnerId::from(owner)).await? {
                println!(
                    "{}\t{}\t{}",
                    credential.id,
                    credential.service,
                    credential.created_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

async fn run_token(config: &AppConfig, action: TokenCommand) -> Result<()> {
    let store = open_store(config)?;
    match action {
        TokenCommand::Issue { owner } => {
            let token = store.issue_token(&OwnerId::from(owner)).await?;
            println!("{token}");
        }
    }
    Ok(())
}
