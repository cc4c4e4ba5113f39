//! Interactive shell command parsing

use std::path::PathBuf;

use conduit_core::RuntimeKind;

/// Models offered by `models`. Any name genai can route is accepted by `model`.
pub const KNOWN_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gpt-4o",
    "gpt-4o-mini",
    "claude-sonnet-4-20250514",
];

pub const HELP: &str = "\
Available Commands:
  servers add <name> <path> [runtime] [description]  - Add a new server
  servers list                                       - List all servers
  servers remove <name>                              - Remove a server
  servers info <name>                                - Show server info

  connect <server_name>                              - Connect to a server
  disconnect [server_name]                           - Disconnect from server(s)
  status                                             - Show connection status

  tools                                              - List tools of the active server

  chat                                               - Enter chat mode
  history                                            - Show conversation history
  clear-history                                      - Clear conversation history

  model [model_name]                                 - Show or set the model
  models                                             - List known models

  exit, quit                                         - Exit the program
  help                                               - Show this help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    ServersList,
    ServersAdd {
        name: String,
        path: PathBuf,
        runtime: RuntimeKind,
        description: Option<String>,
    },
    ServersRemove(String),
    ServersInfo(String),
    Connect(String),
    Disconnect(Option<String>),
    Status,
    Tools,
    Chat,
    History,
    ClearHistory,
    Model(Option<String>),
    Models,
    Exit,
}

impl ReplCommand {
    /// Parse one input line. Blank lines give `Ok(None)`; errors are
    /// printable usage or "unknown command" messages.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = parts.collect();

        let parsed = match command.to_ascii_lowercase().as_str() {
            "help" | "?" => ReplCommand::Help,
            "servers" => Self::parse_servers(&args)?,
            "connect" => match args.first() {
                Some(name) => ReplCommand::Connect(name.to_string()),
                None => return Err("Usage: connect <server_name>".to_string()),
            },
            "disconnect" => ReplCommand::Disconnect(args.first().map(|s| s.to_string())),
            "status" => ReplCommand::Status,
            "tools" => ReplCommand::Tools,
            "chat" => ReplCommand::Chat,
            "history" => ReplCommand::History,
            "clear-history" => ReplCommand::ClearHistory,
            "model" => ReplCommand::Model(args.first().map(|s| s.to_string())),
            "models" => ReplCommand::Models,
            "exit" | "quit" => ReplCommand::Exit,
            other => {
                return Err(format!(
                    "Unknown command: {}. Type 'help' for available commands.",
                    other
                ));
            }
        };
        Ok(Some(parsed))
    }

    fn parse_servers(args: &[&str]) -> Result<Self, String> {
        match args.split_first() {
            Some((&"add", rest)) => {
                if rest.len() < 2 {
                    return Err("Usage: servers add <name> <path> [runtime] [description]".to_string());
                }
                let runtime = match rest.get(2) {
                    Some(kind) => kind.parse::<RuntimeKind>().map_err(|e| e.to_string())?,
                    None => RuntimeKind::Python,
                };
                let description = if rest.len() > 3 {
                    Some(rest[3..].join(" "))
                } else {
                    None
                };
                Ok(ReplCommand::ServersAdd {
                    name: rest[0].to_string(),
                    path: PathBuf::from(rest[1]),
                    runtime,
                    description,
                })
            }
            Some((&"remove", rest)) => rest
                .first()
                .map(|name| ReplCommand::ServersRemove(name.to_string()))
                .ok_or_else(|| "Usage: servers remove <name>".to_string()),
            Some((&"info", rest)) => rest
                .first()
                .map(|name| ReplCommand::ServersInfo(name.to_string()))
                .ok_or_else(|| "Usage: servers info <name>".to_string()),
            // Bare `servers` and `servers list`
            _ => Ok(ReplCommand::ServersList),
        }
    }
}

/// Parse `KEY=VALUE`
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Shorten `text` to `max` characters for one-line display
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line_is_nothing() {
        assert_eq!(ReplCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_servers_add_defaults_to_python() {
        let cmd = ReplCommand::parse("servers add calc ./calc.py").unwrap().unwrap();
        assert_eq!(
            cmd,
            ReplCommand::ServersAdd {
                name: "calc".into(),
                path: PathBuf::from("./calc.py"),
                runtime: RuntimeKind::Python,
                description: None,
            }
        );
    }

    #[test]
    fn test_servers_add_with_runtime_and_description() {
        let cmd = ReplCommand::parse("servers add weather ./w.js node Forecasts and alerts")
            .unwrap()
            .unwrap();
        match cmd {
            ReplCommand::ServersAdd { runtime, description, .. } => {
                assert_eq!(runtime, RuntimeKind::Node);
                assert_eq!(description.as_deref(), Some("Forecasts and alerts"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_usage_errors() {
        assert!(ReplCommand::parse("servers add calc").unwrap_err().starts_with("Usage"));
        assert!(ReplCommand::parse("connect").unwrap_err().starts_with("Usage"));
        assert!(ReplCommand::parse("servers add x ./x cobol").is_err());
        assert!(ReplCommand::parse("frobnicate").unwrap_err().contains("Unknown command"));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(ReplCommand::parse("servers").unwrap(), Some(ReplCommand::ServersList));
        assert_eq!(ReplCommand::parse("disconnect").unwrap(), Some(ReplCommand::Disconnect(None)));
        assert_eq!(
            ReplCommand::parse("Disconnect calc").unwrap(),
            Some(ReplCommand::Disconnect(Some("calc".into())))
        );
        assert_eq!(ReplCommand::parse("QUIT").unwrap(), Some(ReplCommand::Exit));
        assert_eq!(ReplCommand::parse("clear-history").unwrap(), Some(ReplCommand::ClearHistory));
    }

    #[test]
    fn test_env_pair_and_truncate() {
        assert_eq!(parse_env_pair("A=b=c").unwrap(), ("A".into(), "b=c".into()));
        assert!(parse_env_pair("=x").is_err());
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
    }
}
