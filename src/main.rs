//! agent-handoff command-line entry point

use agent_handoff::agent::{ModelSettings, Runner};
use agent_handoff::config::{load_dotenv, AppConfig, ConfigError};
use agent_handoff::console::{self, ChatLoop};
use agent_handoff::error::sanitize_error_message;
use agent_handoff::llm::{LlmProvider, OpenAiConfig, OpenAiProvider};
use agent_handoff::observability::{self, init_logging_from_env, LogFormat};
use agent_handoff::presets;
use agent_handoff::tools::{self, StdioLauncher, StdioSessionConfig, ToolSet};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Classify-then-route agent pipeline
#[derive(Parser)]
#[command(name = "agent-handoff")]
#[command(about = "Guarded agent routing, chat and browser automation over an OpenAI-compatible API")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "AGENT_HANDOFF_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer math questions through the guarded router
    Route {
        /// Question to ask (repeatable); the sample questions are used when omitted
        #[arg(short, long)]
        question: Vec<String>,
        /// Run the questions concurrently
        #[arg(long)]
        parallel: bool,
        /// Model for the classifier, router and expert
        #[arg(long)]
        model: Option<String>,
    },
    /// Interactive chat with the general assistant
    Chat,
    /// Complete a task with the browser automation tools
    Browse {
        #[arg(short, long)]
        task: String,
    },
    /// Check that the model endpoint answers
    Check,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    load_dotenv();
    init_logging(cli.verbose);

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Route {
            question,
            parallel,
            model,
        } => run_route(&config, question, parallel, model).await,
        Commands::Chat => run_chat(&config).await,
        Commands::Browse { task } => run_browse(&config, &task).await,
        Commands::Check => run_check(&config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", sanitize_error_message(&e.to_string()));
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => return init_logging_from_env(Level::WARN, LogFormat::Compact),
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = std::env::var("LOG_FORMAT")
        .map(|f| LogFormat::parse_or(&f, LogFormat::Compact))
        .unwrap_or(LogFormat::Compact);
    observability::init_logging(level, format, false);
}

fn load_configuration(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return AppConfig::load_from_file(path);
    }

    for candidate in ["agent-handoff.toml", "config/agent-handoff.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return AppConfig::load_from_file(path);
        }
    }

    AppConfig::from_env()
}

fn build_provider(config: &AppConfig) -> Result<OpenAiProvider, Box<dyn std::error::Error>> {
    if config.api_key().trim().is_empty() {
        warn!(
            "{} is not set; model calls will fail until it is",
            config.llm.api_key_env
        );
    }
    Ok(OpenAiProvider::new(OpenAiConfig::from_app_config(config))?)
}

fn build_runner(config: &AppConfig) -> Result<Runner, Box<dyn std::error::Error>> {
    let provider = build_provider(config)?;
    Ok(Runner::from_config(Arc::new(provider), config))
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            token.cancel();
        }
    });
}

async fn run_route(
    config: &AppConfig,
    questions: Vec<String>,
    parallel: bool,
    model: Option<String>,
) -> CliResult {
    let runner = build_runner(config)?;
    let model = ModelSettings {
        model: model.unwrap_or_else(|| config.router.model.clone()),
        temperature: config.llm.temperature,
        max_tokens: config.llm.max_tokens,
    };
    let math = presets::math_router(&runner, &model)?;

    let questions = if questions.is_empty() {
        presets::SAMPLE_QUESTIONS
            .iter()
            .map(|q| q.to_string())
            .collect()
    } else {
        questions
    };

    let mut stdout = tokio::io::stdout();
    let summary = console::run_questions(
        &runner,
        &math.router,
        &questions,
        parallel,
        presets::MATH_REJECTION_MESSAGE,
        &mut stdout,
    )
    .await?;

    info!(
        answered = summary.answered,
        rejected = summary.rejected,
        "Questions processed"
    );
    Ok(())
}

async fn run_chat(config: &AppConfig) -> CliResult {
    let runner = build_runner(config)?;
    let agent = presets::assistant(&ModelSettings::from_llm_section(&config.llm))?;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    ChatLoop::new(&runner, &agent, &config.chat)
        .run(stdin, &mut stdout)
        .await?;
    Ok(())
}

async fn run_browse(config: &AppConfig, task: &str) -> CliResult {
    let runner = build_runner(config)?;
    let agent = presets::browser_agent(&ModelSettings::from_llm_section(&config.llm))?;
    let launcher = StdioLauncher::new(StdioSessionConfig::from(&config.tool_session));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let (runner, agent, cancel) = (&runner, &agent, &cancel);
    let result = tools::with_launched_session(&launcher, move |session| async move {
        let tool_set = ToolSet::discover(session).await?;
        info!(tools = ?tool_set.list_tools(), "Browser tools ready");
        runner
            .run_with_tools_cancellable(agent, task, &tool_set, cancel)
            .await
    })
    .await?;

    println!("{}", result.final_output);
    Ok(())
}

async fn run_check(config: &AppConfig) -> CliResult {
    let provider = build_provider(config)?;
    provider.health_check().await?;
    println!("Model endpoint reachable: {}", config.llm.base_url);
    Ok(())
}

fn handle_config_command(config: &AppConfig, show: bool) -> CliResult {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}
