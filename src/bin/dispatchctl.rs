//! Command-line administration tool for the dispatch fabric's AuthZ
//! store. Mirrors the subcommand set of
//! `original_source/sutserver/utility.go` (`addagent`/`remagent`/
//! `addaccount`/`remaccount`), operating directly against the SQLite
//! store without going through the HTTP surface.

use anyhow::Result;
use clap::{Parser, Subcommand};

use dispatch_core::authz::{AuthZ, SqliteAuthZ};

#[derive(Parser)]
#[command(name = "dispatchctl")]
#[command(author, version, about = "Administer the dispatch fabric's AuthZ store")]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, default_value = "dispatch.db")]
    db_path: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register an admin account by bearer token.
    AddAccount { token: String },
    /// Remove an admin account.
    RemoveAccount { token: String },
    /// Register an agent with its hardware credential.
    AddAgent { name: String, hwid: String },
    /// Remove an agent.
    RemoveAgent { name: String },
    /// List every registered agent.
    ListAgents,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = SqliteAuthZ::open(&cli.db_path)?;

    match cli.command {
        Command::AddAccount { token } => {
            store.add_admin(&token).await?;
            println!("OK!");
        }
        Command::RemoveAccount { token } => {
            store.remove_admin(&token).await?;
            println!("OK!");
        }
        Command::AddAgent { name, hwid } => {
            store.add_agent(&name, &hwid).await?;
            println!("OK!");
        }
        Command::RemoveAgent { name } => {
            store.remove_agent(&name).await?;
            println!("OK!");
        }
        Command::ListAgents => {
            for name in store.list_agents().await? {
                println!("{name}");
            }
        }
    }

    Ok(())
}
