mod config;
mod error;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use runtime::{Agent, BackendAdapter, McpConnector, ToolConnector, ToolDescriptor, ToolSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use config::{Config, DEFAULT_CONFIG_FILE};
use error::Result;

#[derive(Parser)]
#[command(name = "helmsman")]
#[command(about = "Drive a web browser with a language model over MCP", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults apply if it does not exist)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session (default)
    Chat,
    /// Run a single request and print the answer
    Run {
        /// The request, in plain language
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Start the tool host and list the tools it offers
    Tools,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    // RUST_LOG wins when no -v flag is given.
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "loaded environment file");
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::Chat) | None => cmd_chat(&config).await,
        Some(Commands::Run { prompt }) => cmd_run(&config, &prompt.join(" ")).await,
        Some(Commands::Tools) => cmd_tools(&config).await,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_or_default(path)?;
    if path.exists() {
        debug!(path = %path.display(), "loaded config");
    } else {
        debug!(path = %path.display(), "config file not found, using defaults");
    }
    Ok(config)
}

fn build_agent(config: &Config) -> Result<Agent<BackendAdapter, McpConnector>> {
    let adapter = config.backend_adapter()?;
    let connector = config.connector()?;
    Ok(Agent::new(adapter, connector, config.agent_options()))
}

async fn cmd_chat(config: &Config) -> Result<()> {
    println!("helmsman v{}", env!("CARGO_PKG_VERSION"));

    let mut agent = build_agent(config)?;
    println!("Model: {}", agent.adapter());
    println!("Tool host: {}", config.tool_host.command);
    println!("Discovering tools...");

    let count = agent.prepare().await?.len();
    println!("{count} tools available.");
    println!("Type 'exit' or 'quit' (or Ctrl+D) to leave. Ctrl+C cancels a running request.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            // EOF or Ctrl+C at the prompt
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            println!("Please enter a request, or 'exit' to quit.");
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        match agent.run_task_until(input, tokio::signal::ctrl_c()).await {
            Ok(answer) => println!("\n{answer}\n"),
            Err(runtime::Error::Cancelled) => println!("\nRequest cancelled.\n"),
            Err(e) => {
                eprintln!("\nSorry, something went wrong: {e}");
                eprintln!("Try again, or type 'exit' to quit.\n");
            }
        }
    }

    println!("\nGoodbye.");
    Ok(())
}

async fn cmd_run(config: &Config, prompt: &str) -> Result<()> {
    let mut agent = build_agent(config)?;

    let answer = agent
        .run_task_until(prompt, tokio::signal::ctrl_c())
        .await?;

    println!("{answer}");
    Ok(())
}

async fn cmd_tools(config: &Config) -> Result<()> {
    let connector = config.connector()?;
    println!("Starting: {}", connector.launch_spec().display_command());

    let mut session = connector.connect().await?;
    if let Some(name) = session.server_name() {
        println!("Connected to {name}\n");
    }
    let discovered = session.discover_tools().await;
    session.close().await;

    for tool in discovered? {
        print_tool(&tool);
    }
    Ok(())
}

fn print_tool(tool: &ToolDescriptor) {
    println!("{}", tool.name);
    if let Some(summary) = tool.description.lines().next().filter(|l| !l.is_empty()) {
        println!("    {summary}");
    }
    for param in &tool.parameters {
        let marker = if param.required { "" } else { "?" };
        let kind = param.kind().unwrap_or("string");
        match param.description() {
            Some(description) => {
                println!("    - {}{marker}: {kind}  {description}", param.name)
            }
            None => println!("    - {}{marker}: {kind}", param.name),
        }
    }
}
