use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use medflow_consult::{run_turn, Collaborators, ConsultRequest, KeywordIndex};
use medflow_core::config::AppConfig;
use medflow_core::types::{Answer, ConversationTurn, Role};
use medflow_llm::OpenAiClient;
use medflow_memory::SqliteMemory;

#[derive(Parser)]
#[command(name = "medflow", version, about = "Medical consultation assistant")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "medflow.toml")]
    config: PathBuf,

    /// Path to the knowledge-base JSON file
    #[arg(short, long, default_value = "knowledge.json")]
    knowledge: PathBuf,

    /// User identifier memories are stored under
    #[arg(short, long, default_value = "local")]
    user: String,

    /// User role: patient_dental, patient_diabetes, doctor_dental, doctor_endocrine
    #[arg(short, long, default_value = "patient_dental")]
    role: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question and exit
    Ask {
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Start an interactive consultation session
    Repl,
    /// Show the effective configuration
    Config,
}

fn load_config(path: &Path) -> AppConfig {
    if path.exists() {
        match AppConfig::load(path) {
            Ok(config) => return config,
            Err(e) => warn!(error = %e, "config load failed, using defaults"),
        }
    } else {
        info!(path = %path.display(), "no config file, using defaults");
    }
    AppConfig::default()
}

fn collaborators(config: &AppConfig, knowledge: &Path) -> anyhow::Result<Collaborators> {
    let llm = OpenAiClient::from_config(&config.llm)?;
    let memory = SqliteMemory::open(Path::new(&config.memory.db_path))?;
    let search = if knowledge.exists() {
        let index = KeywordIndex::from_json_file(knowledge)?;
        info!(entries = index.len(), "knowledge base loaded");
        index
    } else {
        warn!(path = %knowledge.display(), "knowledge file missing, searching nothing");
        KeywordIndex::new(Vec::new())
    };
    Ok(Collaborators {
        llm: Arc::new(llm),
        search: Arc::new(search),
        memory: Arc::new(memory),
    })
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.explanation);
    if !answer.followups.is_empty() {
        println!("\nBạn có thể hỏi tiếp:");
        for (i, q) in answer.followups.iter().enumerate() {
            println!("  {}. {q}", i + 1);
        }
    }
}

async fn repl(
    collab: &Collaborators,
    config: &AppConfig,
    user: &str,
    role: Role,
) -> anyhow::Result<()> {
    println!("medflow — {} (exit/quit để thoát)", role.display_name());
    let mut history: Vec<ConversationTurn> = Vec::new();
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "exit" | "quit") {
            break;
        }

        let mut request = ConsultRequest::new(user, role, query);
        request.history = history.clone();
        match run_turn(collab, config, request).await {
            Ok(outcome) => {
                print_answer(&outcome.answer);
                println!();
                history.push(ConversationTurn::user(query));
                history.push(ConversationTurn::assistant(&outcome.answer.explanation));
            }
            Err(e) => eprintln!("lỗi: {e}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("medflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config);

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let role: Role = cli.role.parse()?;
    let collab = collaborators(&config, &cli.knowledge)?;

    match cli.command {
        Commands::Ask { query } => {
            let query = query.join(" ");
            if query.trim().is_empty() {
                anyhow::bail!("empty query");
            }
            let request = ConsultRequest::new(&cli.user, role, query);
            let outcome = run_turn(&collab, &config, request).await?;
            info!(
                steps = outcome.report.steps(),
                elapsed_ms = outcome.report.total_elapsed_ms,
                "turn complete"
            );
            print_answer(&outcome.answer);
        }
        Commands::Repl => repl(&collab, &config, &cli.user, role).await?,
        Commands::Config => unreachable!(),
    }

    Ok(())
}
