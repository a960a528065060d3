use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::records::RecordKind;

#[derive(Parser)]
#[command(name = "callflow", version, about = "Callflow CLI: inspect call records and simulate calls")]
struct Cli {
    /// API base URL
    #[arg(long, env = "CALLFLOW_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Walk a call through the webhooks, printing every markup reply
    Simulate {
        /// Caller number sent as `From`
        #[arg(long)]
        from: String,
        /// Call identifier (generated if omitted)
        #[arg(long)]
        call_id: Option<String>,
        /// Caller utterance, one per turn, in order
        #[arg(long = "say", required = true)]
        say: Vec<String>,
    },
    /// List customers with their service requests
    Customers {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// List service requests with their customer
    Requests {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// List call logs with their conversation trace
    CallLogs {
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let api_url = cli.api_url.trim_end_matches('/').to_string();

    let code = match cli.command {
        Commands::Health => commands::health::run(&api_url).await,
        Commands::Simulate {
            from,
            call_id,
            say,
        } => commands::simulate::run(&api_url, &from, call_id, &say).await,
        Commands::Customers { limit } => {
            commands::records::run(&api_url, RecordKind::Customers, limit).await
        }
        Commands::Requests { limit } => {
            commands::records::run(&api_url, RecordKind::Requests, limit).await
        }
        Commands::CallLogs { limit } => {
            commands::records::run(&api_url, RecordKind::CallLogs, limit).await
        }
    };

    std::process::exit(code);
}
