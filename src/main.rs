use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;

use marketplace_chat::common::{Role, UserProfile};
use marketplace_chat::config;
use marketplace_chat::identity::HandshakeIdentity;
use marketplace_chat::presence::PresenceRouter;
use marketplace_chat::storage::ChatStore;
use marketplace_chat::{ChatServer, ChatService};

#[derive(Parser)]
#[command(
    name = "marketplace-chat",
    version,
    about = "Realtime buyer/seller chat server"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the WebSocket chat server (default)
    Serve,
    /// Create or rename a user profile shown to chat partners
    AddUser {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// buyer (or user) / seller
        #[arg(long, value_parser = parse_role)]
        role: Option<Role>,
    },
}

fn parse_role(value: &str) -> Result<Role, String> {
    Role::parse(value).ok_or_else(|| format!("unknown role `{value}`"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config).with_env_overrides();
    let store = ChatStore::open(&app_config.database_path)?;
    log::info!("Using chat database {}", app_config.database_path);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(&app_config, store).await?,
        Command::AddUser { id, name, role } => {
            store
                .upsert_user(UserProfile { id: id.clone(), name }, role)
                .await?;
            log::info!("Saved profile for {id}");
        }
    }

    Ok(())
}

async fn run_server(
    app_config: &config::AppConfig,
    store: ChatStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let router = Arc::new(PresenceRouter::new());
    let service = Arc::new(ChatService::new(store, Arc::clone(&router)));
    let server = ChatServer::new(service, Arc::new(HandshakeIdentity));

    let listener = TcpListener::bind(app_config.socket_addr()?).await?;

    tokio::select! {
        result = server.serve(listener) => {
            if let Err(err) = result {
                log::error!("Chat server error: {err}");
            }
        }
        _ = signal::ctrl_c() => {
            log::info!("Received shutdown signal, stopping chat server...");
        }
    }

    log::info!("Final statistics: {} live connections", router.connection_count());
    Ok(())
}
