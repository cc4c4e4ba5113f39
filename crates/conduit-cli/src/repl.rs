//! Interactive shell
//!
//! A line-oriented command prompt over one [`Orchestrator`], with a nested
//! chat mode where every line goes to the model.

use std::time::Duration;

use console::style;
use conduit_core::{Orchestrator, ProviderDescriptor, Role};
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::commands::{HELP, KNOWN_MODELS, ReplCommand, truncate};

/// How many tool names `status` shows before summarising
const STATUS_TOOL_PREVIEW: usize = 5;

pub struct Shell {
    orchestrator: Orchestrator,
    editor: DefaultEditor,
}

enum Input {
    Line(String),
    Interrupted,
    Eof,
}

impl Shell {
    pub fn new(orchestrator: Orchestrator) -> anyhow::Result<Self> {
        Ok(Self {
            orchestrator,
            editor: DefaultEditor::new()?,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        print_banner();

        loop {
            let line = match self.read_line("conduit> ")? {
                Input::Line(line) => line,
                Input::Interrupted => {
                    println!("Use 'exit' or 'quit' to exit");
                    continue;
                }
                Input::Eof => break,
            };

            match ReplCommand::parse(&line) {
                Ok(Some(ReplCommand::Exit)) => break,
                Ok(Some(command)) => self.dispatch(command).await?,
                Ok(None) => {}
                Err(message) => println!("{}", style(message).yellow()),
            }
        }

        self.orchestrator.close().await;
        println!("Goodbye!");
        Ok(())
    }

    fn read_line(&mut self, prompt: &str) -> anyhow::Result<Input> {
        let read = tokio::task::block_in_place(|| self.editor.readline(prompt));
        match read {
            Ok(line) => {
                let line = line.trim().to_string();
                if !line.is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(Input::Line(line))
            }
            Err(ReadlineError::Interrupted) => Ok(Input::Interrupted),
            Err(ReadlineError::Eof) => Ok(Input::Eof),
            Err(e) => Err(e.into()),
        }
    }

    async fn dispatch(&mut self, command: ReplCommand) -> anyhow::Result<()> {
        match command {
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::ServersList => self.servers_list(),
            ReplCommand::ServersAdd {
                name,
                path,
                runtime,
                description,
            } => {
                let mut descriptor = ProviderDescriptor::new(&name, path, runtime);
                descriptor.description = description;
                match self.orchestrator.add_provider(descriptor) {
                    Ok(()) => print_ok(format!("Added server '{}'", name)),
                    Err(e) => print_err(e),
                }
            }
            ReplCommand::ServersRemove(name) => match self.orchestrator.remove_provider(&name).await {
                Ok(true) => print_ok(format!("Removed server '{}'", name)),
                Ok(false) => println!("Server '{}' is not registered", name),
                Err(e) => print_err(e),
            },
            ReplCommand::ServersInfo(name) => self.servers_info(&name),
            ReplCommand::Connect(name) => match self.orchestrator.connect(&name).await {
                Ok(()) => print_ok(format!("Connected to '{}'", name)),
                Err(e) => print_err(e),
            },
            ReplCommand::Disconnect(name) => {
                self.orchestrator.disconnect(name.as_deref()).await;
                match name {
                    Some(name) => print_ok(format!("Disconnected from '{}'", name)),
                    None => print_ok("Disconnected from all servers"),
                }
            }
            ReplCommand::Status => self.status().await,
            ReplCommand::Tools => self.tools().await,
            ReplCommand::Chat => self.chat_mode().await?,
            ReplCommand::History => self.history(),
            ReplCommand::ClearHistory => {
                self.orchestrator.clear_history();
                print_ok("Conversation history cleared");
            }
            ReplCommand::Model(Some(model)) => {
                self.orchestrator.set_model(&model);
                print_ok(format!("Model set to {}", model));
            }
            ReplCommand::Model(None) => {
                println!("Current model: {}", style(self.orchestrator.model()).cyan());
            }
            ReplCommand::Models => {
                println!();
                println!("{}", style("Known Models:").bold());
                for model in KNOWN_MODELS {
                    let marker = if *model == self.orchestrator.model() { "●" } else { "○" };
                    println!("  {} {}", marker, model);
                }
            }
            ReplCommand::Exit => {}
        }
        Ok(())
    }

    fn servers_list(&self) {
        let registry = self.orchestrator.registry();
        if registry.is_empty() {
            println!("No servers configured");
            return;
        }

        println!();
        println!("{}", style("Configured Servers:").bold());
        let active = self.orchestrator.active_provider();
        for descriptor in registry.descriptors() {
            let status = if Some(descriptor.name.as_str()) == active {
                style("●").green()
            } else if self.orchestrator.connections().is_connected(&descriptor.name) {
                style("●").dim()
            } else {
                style("○").dim()
            };
            println!(
                "  {} {}: {} ({})",
                status,
                style(&descriptor.name).cyan(),
                descriptor.executable_path.display(),
                descriptor.runtime_kind
            );
            if let Some(description) = &descriptor.description {
                println!("      {}", style(description).dim());
            }
        }
    }

    fn servers_info(&self, name: &str) {
        let descriptor = match self.orchestrator.provider(name) {
            Ok(descriptor) => descriptor,
            Err(e) => return print_err(e),
        };

        println!();
        println!("{}", style(format!("Server: {}", descriptor.name)).bold());
        println!("  Path: {}", descriptor.executable_path.display());
        println!("  Runtime: {}", descriptor.runtime_kind);
        if let Some(description) = &descriptor.description {
            println!("  Description: {}", description);
        }
        if !descriptor.environment_overrides.is_empty() {
            let mut keys: Vec<&String> = descriptor.environment_overrides.keys().collect();
            keys.sort();
            println!("  Environment:");
            for key in keys {
                println!("    {}={}", key, descriptor.environment_overrides[key]);
            }
        }
        let connected = self.orchestrator.connections().is_connected(name);
        println!(
            "  Connected: {}",
            if connected { style("yes").green() } else { style("no").dim() }
        );
    }

    async fn status(&self) {
        let Some(active) = self.orchestrator.active_provider() else {
            println!("Not connected to any server");
            return;
        };

        println!("Connected to: {}", style(active).cyan());
        if let Some(info) = self
            .orchestrator
            .connections()
            .active_connection()
            .and_then(|c| c.server_info())
        {
            println!("Server: {} {}", info.name, style(&info.version).dim());
        }
        println!("Model: {}", self.orchestrator.model());

        match self.orchestrator.list_tools().await {
            Ok(tools) => {
                println!("Available tools: {}", tools.len());
                for tool in tools.iter().take(STATUS_TOOL_PREVIEW) {
                    println!("  - {}", tool.name);
                }
                if tools.len() > STATUS_TOOL_PREVIEW {
                    println!("  ... and {} more", tools.len() - STATUS_TOOL_PREVIEW);
                }
            }
            Err(e) => println!("{}", style(format!("Error getting tools: {}", e)).red()),
        }
    }

    async fn tools(&self) {
        match self.orchestrator.list_tools().await {
            Ok(tools) => print_tools(&tools),
            Err(e) => print_err(e),
        }
    }

    fn history(&self) {
        let history = self.orchestrator.history();
        if history.is_empty() {
            println!("No conversation history");
            return;
        }

        println!();
        println!("{}", style("Conversation History:").bold());
        for (i, message) in history.iter().enumerate() {
            let role = match message.role {
                Role::User => style("USER").cyan(),
                Role::Assistant => style("ASSISTANT").green(),
            };
            println!("{}. [{}] {}", i + 1, role, truncate(&message.content, 100));
        }
    }

    async fn chat_mode(&mut self) -> anyhow::Result<()> {
        let Some(active) = self.orchestrator.active_provider().map(str::to_string) else {
            print_err("Not connected to any server");
            println!("Use 'connect <server_name>' first");
            return Ok(());
        };

        println!();
        println!("Chat mode (connected to {})", style(&active).cyan());
        println!("Type 'exit' or 'quit' to return to main menu, 'clear' to clear history");
        println!();

        loop {
            let line = match self.read_line("You: ")? {
                Input::Line(line) => line,
                Input::Interrupted | Input::Eof => break,
            };

            match line.to_ascii_lowercase().as_str() {
                "" => continue,
                "exit" | "quit" => break,
                "clear" => {
                    self.orchestrator.clear_history();
                    println!("Conversation history cleared");
                    continue;
                }
                _ => {}
            }

            let spinner = thinking_spinner();
            let outcome = self.orchestrator.chat_with_outcome(&line).await;
            spinner.finish_and_clear();

            match outcome {
                Ok(outcome) => {
                    if outcome.tool_calls > 0 {
                        println!(
                            "  {}",
                            style(format!(
                                "[{} tool call(s) over {} round(s)]",
                                outcome.tool_calls, outcome.rounds
                            ))
                            .dim()
                        );
                    }
                    println!("{}: {}", style("Assistant").bold().green(), outcome.answer);
                    println!();
                }
                Err(e) => {
                    tracing::debug!("Chat turn failed: {:?}", e);
                    print_err(e);
                    println!();
                }
            }
        }
        Ok(())
    }
}

pub fn print_tools(tools: &[conduit_core::McpTool]) {
    println!();
    println!("{}", style(format!("Available Tools ({} total):", tools.len())).bold());
    for tool in tools {
        println!("  - {}", style(&tool.name).cyan());
        if !tool.description.is_empty() {
            println!("      {}", style(&tool.description).dim());
        }
    }
}

pub fn thinking_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.blue} {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message("Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

pub fn print_ok(message: impl std::fmt::Display) {
    println!("{} {}", style("✓").green(), message);
}

pub fn print_err(message: impl std::fmt::Display) {
    println!("{} {}", style("✗").red(), style(format!("Error: {}", message)).red());
}

fn print_banner() {
    println!();
    println!("{}", style(format!("Conduit v{}", env!("CARGO_PKG_VERSION"))).bold().cyan());
    println!("{}", style("Type 'help' for available commands").dim());
    println!();
}
