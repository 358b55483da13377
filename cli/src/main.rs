use clap::{Parser, Subcommand};

mod commands;
mod util;

#[derive(Parser)]
#[command(name = "tally", version, about = "Tally CLI: ask natural-language questions about analytics event data")]
struct Cli {
    /// API base URL
    #[arg(long, env = "TALLY_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session; type exit, quit or 종료 to leave
    Chat,
    /// Ask a single question and print the JSON answer
    Ask {
        /// The question
        #[arg(long)]
        question: String,
        /// Prior conversation as a JSON array of turns ("-" reads stdin)
        #[arg(long)]
        history_file: Option<String>,
    },
    /// Check API health
    Health,
    /// Create the forecast model and helper functions (requires DATABASE_URL)
    Setup {
        /// Schema holding the events table
        #[arg(long, env = "TALLY_SCHEMA", default_value = "analytics")]
        schema: String,
        /// Retrain the model and redefine existing functions
        #[arg(long)]
        replace: bool,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // Human-readable diagnostics on stderr; stdout carries answers and JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Chat => commands::chat::run(&cli.api_url).await,
        Commands::Ask {
            question,
            history_file,
        } => commands::ask::run(&cli.api_url, &question, history_file.as_deref()).await,
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Setup { schema, replace } => commands::setup::run(&schema, replace).await,
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_accepts_schema_and_replace() {
        let cli = Cli::try_parse_from(["tally", "setup", "--schema", "ga4", "--replace"])
            .expect("setup flags parse");
        match cli.command {
            Commands::Setup { schema, replace } => {
                assert_eq!(schema, "ga4");
                assert!(replace);
            }
            _ => panic!("expected setup command"),
        }
    }

    #[test]
    fn setup_has_no_timezone_flag() {
        assert!(Cli::try_parse_from(["tally", "setup", "--timezone", "UTC"]).is_err());
    }

    #[test]
    fn ask_reads_history_file_flag() {
        let cli = Cli::try_parse_from(["tally", "ask", "--question", "q", "--history-file", "-"])
            .expect("ask flags parse");
        assert!(matches!(
            cli.command,
            Commands::Ask { history_file: Some(ref f), .. } if f == "-"
        ));
    }
}
