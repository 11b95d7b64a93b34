//! Querygate CLI
//!
//! Runs the approval workflow and gives approvers a way to see and answer
//! pending requests.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use querygate::notify::create_notifiers;
use querygate::queue::open_queues;
use querygate::services::{FileSchemaSource, HttpExecutor, HttpGenerator, SchemaSource};
use querygate::{
    ApprovalAction, ApprovalQueueClient, ApprovalResponse, Config, Error, Result, WorkflowEngine,
};

#[derive(Parser)]
#[command(name = "querygate")]
#[command(author, version, about = "Human-in-the-loop approval for generated queries")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "QUERYGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a query for a question and run it once approved
    Run {
        /// The question to answer
        question: String,

        /// Schema context file (overrides [schema] in config)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Print the final state as JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// List requests waiting for a decision
    Pending {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Answer a pending request
    Respond {
        /// Run to answer
        #[arg(required_unless_present = "file")]
        thread_id: Option<String>,

        /// approve, refine or reject
        #[arg(required_unless_present = "file")]
        action: Option<String>,

        /// Refinement instructions (required for refine)
        #[arg(long, short)]
        feedback: Option<String>,

        /// Round being answered
        #[arg(long)]
        round: Option<u32>,

        /// Read the decision from a JSON file instead
        #[arg(long, conflicts_with_all = ["thread_id", "action", "feedback", "round"])]
        file: Option<PathBuf>,
    },

    /// Initialize .querygate directory
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Load config
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            question,
            schema,
            json,
        } => {
            let client = Arc::new(ApprovalQueueClient::new(open_queues(&config.queue)?));
            let generator = Arc::new(HttpGenerator::from_config(&config.generation)?);
            let executor = Arc::new(HttpExecutor::from_config(&config.execution)?);
            let notifier = Arc::new(create_notifiers(&config.notifications, &config.notify));

            let schema_context = match schema.or_else(|| config.schema.path()) {
                Some(path) => FileSchemaSource::new(path).fetch().await?,
                None => String::new(),
            };

            let engine = WorkflowEngine::new(
                config.approval.clone(),
                client,
                generator,
                executor,
                notifier,
            );
            let state = engine.run(&question, &schema_context).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                let yaml = serde_yaml::to_string(&state)
                    .map_err(|e| Error::Config(format!("Failed to serialize state: {}", e)))?;
                println!("{}", yaml);
            }
        }

        Commands::Pending { json } => {
            let client = ApprovalQueueClient::new(open_queues(&config.queue)?);
            let pending = client.list_pending().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
            } else if pending.is_empty() {
                println!("No pending approvals");
            } else {
                for request in &pending {
                    println!("{}", request.summary());
                }
            }
        }

        Commands::Respond {
            thread_id,
            action,
            feedback,
            round,
            file,
        } => {
            let response = match (file, thread_id, action) {
                (Some(path), _, _) => ApprovalResponse::parse(&std::fs::read_to_string(&path)?)?,
                (None, Some(thread_id), Some(action)) => {
                    let action: ApprovalAction = action.parse()?;
                    let response = ApprovalResponse::new(&thread_id, action, feedback)?;
                    match round {
                        Some(round) => response.with_round(round),
                        None => response,
                    }
                }
                _ => {
                    return Err(Error::InvalidResponse(
                        "thread_id and action are required".to_string(),
                    ))
                }
            };

            let client = ApprovalQueueClient::new(open_queues(&config.queue)?);
            client.submit(&response).await?;
            info!("Sent {} for {}", response.action, response.thread_id);
        }

        Commands::Init { force } => {
            let path = querygate::config::init(force)?;
            info!("Created default config at {:?}", path);
        }

        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("Failed to serialize config: {}", e),
        },
    }

    Ok(())
}
