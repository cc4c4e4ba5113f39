//! Conduit CLI - chat with a language model through MCP tool providers
//!
//! Manages the provider registry from the command line and runs an
//! interactive shell (or a single prompt) on top of the core orchestrator.

mod commands;
mod repl;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use conduit_core::config::{Config, ConfigManager};
use conduit_core::{GenAIBackend, Orchestrator, ProviderDescriptor, ProviderRegistry, RuntimeKind};

use commands::parse_env_pair;
use repl::{Shell, print_err, print_ok, print_tools, thinking_spinner};

#[derive(Parser)]
#[command(name = "conduit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chat with a language model through MCP tool providers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to <config dir>/conduit/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Model to use (defaults to config setting)
    #[arg(short, long)]
    model: Option<String>,

    /// Server to connect to on startup
    #[arg(short, long)]
    server: Option<String>,

    /// Execute a single prompt and exit (non-interactive mode)
    #[arg(long)]
    one_shot: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive shell (the default)
    Shell,

    /// Manage registered tool servers
    #[command(subcommand)]
    Servers(ServerCommands),

    /// Connect to a server and list its tools
    Tools {
        /// Server name (defaults to the first one that connects)
        server: Option<String>,
    },

    /// Show configuration
    Config,
}

#[derive(Subcommand)]
enum ServerCommands {
    /// List registered servers
    List,

    /// Register a server
    Add {
        /// Unique server name
        name: String,

        /// Script or executable implementing the server
        path: PathBuf,

        /// How to launch it: python, node or executable
        #[arg(short, long, default_value = "python")]
        runtime: RuntimeKind,

        /// Extra environment variable, KEY=VALUE (repeatable)
        #[arg(short, long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Human-readable description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Unregister a server
    Remove {
        /// Server name
        name: String,
    },

    /// Show a server's registration
    Info {
        /// Server name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr at warn by default so they don't interleave with the prompt
    let default_filter = if cli.verbose {
        "info,conduit_core=debug,conduit_mcp=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let mut config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone())?,
        None => ConfigManager::new()?,
    };
    if let Some(model) = &cli.model {
        config_manager.config_mut().model.model = model.clone();
    }

    match cli.command {
        Some(Commands::Servers(cmd)) => handle_server_command(&config_manager, cmd),
        Some(Commands::Config) => {
            show_config(&config_manager);
            Ok(())
        }
        Some(Commands::Tools { server }) => {
            let mut orchestrator = build_orchestrator(&config_manager);
            let result = connect(&mut orchestrator, server.as_deref()).await;
            if result.is_ok() {
                match orchestrator.list_tools().await {
                    Ok(tools) => print_tools(&tools),
                    Err(e) => print_err(e),
                }
            }
            orchestrator.close().await;
            result
        }
        Some(Commands::Shell) | None => {
            let mut orchestrator = build_orchestrator(&config_manager);

            if let Some(prompt) = cli.one_shot {
                let result = run_one_shot(&mut orchestrator, cli.server.as_deref(), &prompt).await;
                orchestrator.close().await;
                return result;
            }

            if let Some(server) = cli.server.as_deref() {
                if let Err(e) = connect(&mut orchestrator, Some(server)).await {
                    tracing::warn!("Startup connect to '{}' failed: {}", server, e);
                    print_err(e);
                }
            }
            Shell::new(orchestrator)?.run().await
        }
    }
}

fn build_orchestrator(config_manager: &ConfigManager) -> Orchestrator {
    let config = config_manager.config();
    let registry = ProviderRegistry::load(config_manager.registry_path());

    let settings = config.generation_settings();
    let backend = match config.model.get_api_key() {
        Some(key) => GenAIBackend::with_api_key(settings, &key),
        None => {
            show_setup_instructions(config);
            GenAIBackend::new(settings)
        }
    };

    Orchestrator::from_config(config, registry, Box::new(backend))
}

/// Connect to `server`, or to the first registered server that comes up.
async fn connect(orchestrator: &mut Orchestrator, server: Option<&str>) -> anyhow::Result<()> {
    let name = match server {
        Some(name) => {
            orchestrator.connect(name).await?;
            name.to_string()
        }
        None => orchestrator.connect_any(&[]).await.inspect_err(|e| {
            tracing::warn!("No registered server could be connected: {}", e);
        })?,
    };
    tracing::debug!("Active server is now '{}'", name);
    print_ok(format!("Connected to '{}'", name));
    Ok(())
}

/// Run a single prompt non-interactively (for scripting/testing)
async fn run_one_shot(orchestrator: &mut Orchestrator, server: Option<&str>, prompt: &str) -> anyhow::Result<()> {
    connect(orchestrator, server).await?;

    let spinner = thinking_spinner();
    let answer = orchestrator.chat(prompt).await;
    spinner.finish_and_clear();

    println!("{}: {}", style("Assistant").bold().green(), answer?);
    Ok(())
}

fn handle_server_command(config_manager: &ConfigManager, cmd: ServerCommands) -> anyhow::Result<()> {
    let mut registry = ProviderRegistry::load(config_manager.registry_path());

    match cmd {
        ServerCommands::List => {
            if registry.is_empty() {
                println!("{}", style("No servers configured").dim());
                return Ok(());
            }
            println!("{}", style("Configured Servers:").bold());
            for descriptor in registry.descriptors() {
                println!(
                    "  {} {}: {} ({})",
                    style("•").cyan(),
                    style(&descriptor.name).bold(),
                    descriptor.executable_path.display(),
                    descriptor.runtime_kind
                );
                if let Some(description) = &descriptor.description {
                    println!("    {}", style(description).dim());
                }
            }
        }
        ServerCommands::Add {
            name,
            path,
            runtime,
            env,
            description,
        } => {
            let mut descriptor = ProviderDescriptor::new(&name, path, runtime);
            descriptor.environment_overrides.extend(env);
            descriptor.description = description;
            registry.add(descriptor)?;
            print_ok(format!("Added server '{}'", name));
        }
        ServerCommands::Remove { name } => {
            if registry.remove(&name)? {
                print_ok(format!("Removed server '{}'", name));
            } else {
                println!("{}", style(format!("Server '{}' is not registered", name)).yellow());
            }
        }
        ServerCommands::Info { name } => {
            let descriptor = registry.get(&name)?;
            println!("{}", style(format!("Server: {}", descriptor.name)).bold());
            println!("  Path: {}", descriptor.executable_path.display());
            println!("  Runtime: {}", descriptor.runtime_kind);
            if let Some(description) = &descriptor.description {
                println!("  Description: {}", description);
            }
            let mut env: Vec<_> = descriptor.environment_overrides.iter().collect();
            env.sort();
            for (key, value) in env {
                println!("  Env: {}={}", key, value);
            }
        }
    }
    Ok(())
}

fn show_config(config_manager: &ConfigManager) {
    let config = config_manager.config();
    let timeouts = config.connection_timeouts();

    println!("{}", style("Configuration:").bold());
    println!();
    println!("  Config file: {}", style(config_manager.config_path().display()).green());
    println!("  Registry: {}", style(config_manager.registry_path().display()).green());
    println!("  Model: {} ({})", style(&config.model.model).cyan(), config.model.provider);
    println!(
        "  API key: {}",
        if config.model.get_api_key().is_some() {
            style("configured").green()
        } else {
            style("missing").red()
        }
    );
    println!("  Memory: {} messages", config.memory.max_messages);
    println!("  Max tool-call rounds: {}", config.tool_loop.max_rounds);
    println!(
        "  Timeouts: connect {:?}, list tools {:?}, invoke {:?}",
        timeouts.connect, timeouts.list_tools, timeouts.invoke
    );
}

fn show_setup_instructions(config: &Config) {
    let env_name = config
        .model
        .api_key_env
        .clone()
        .unwrap_or_else(|| "GEMINI_API_KEY".to_string());
    eprintln!(
        "{}",
        style(format!("Warning: no API key found for '{}'.", config.model.provider)).yellow()
    );
    eprintln!("  Set {} or add api_key under [model] in the config file.", style(env_name).cyan());
}
