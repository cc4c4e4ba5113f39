//! Small utility tool set served by the `conduit-calc` provider binary.
//!
//! Also handy as an in-process peer in tests.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::McpTool;
use crate::server::McpHandler;

#[derive(Debug, Default, Clone, Copy)]
pub struct Calculator;

fn binary_schema(op: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": { "type": "number", "description": format!("Left operand of the {}", op) },
            "b": { "type": "number", "description": format!("Right operand of the {}", op) }
        },
        "required": ["a", "b"]
    })
}

fn text_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "text": { "type": "string" }
        },
        "required": ["text"]
    })
}

fn number_arg(arguments: &Value, key: &str) -> Result<f64, String> {
    match arguments.get(key) {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| format!("'{}' is out of range", key)),
        // Models occasionally quote numbers.
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' must be a number, got {:?}", key, s)),
        Some(other) => Err(format!("'{}' must be a number, got {}", key, other)),
        None => Err(format!("Missing required argument '{}'", key)),
    }
}

fn text_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("Missing required string argument '{}'", key))
}

/// Render integral results without a trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[async_trait]
impl McpHandler for Calculator {
    async fn list_tools(&self) -> Vec<McpTool> {
        vec![
            McpTool::new("add", "Add two numbers", binary_schema("addition")),
            McpTool::new("subtract", "Subtract b from a", binary_schema("subtraction")),
            McpTool::new("multiply", "Multiply two numbers", binary_schema("multiplication")),
            McpTool::new("divide", "Divide a by b", binary_schema("division")),
            McpTool::new("reverse_text", "Reverse a piece of text", text_schema()),
            McpTool::new(
                "count_words",
                "Count words, characters and lines in a piece of text",
                text_schema(),
            ),
            McpTool::new(
                "json_format",
                "Pretty-print a JSON document",
                json!({
                    "type": "object",
                    "properties": { "json_string": { "type": "string" } },
                    "required": ["json_string"]
                }),
            ),
        ]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, String> {
        match name {
            "add" | "subtract" | "multiply" | "divide" => {
                let a = number_arg(&arguments, "a")?;
                let b = number_arg(&arguments, "b")?;
                let result = match name {
                    "add" => a + b,
                    "subtract" => a - b,
                    "multiply" => a * b,
                    _ => {
                        if b == 0.0 {
                            return Err("Division by zero".to_string());
                        }
                        a / b
                    }
                };
                Ok(Value::String(format_number(result)))
            }
            "reverse_text" => {
                let text = text_arg(&arguments, "text")?;
                Ok(Value::String(text.chars().rev().collect()))
            }
            "count_words" => {
                let text = text_arg(&arguments, "text")?;
                Ok(json!({
                    "words": text.split_whitespace().count(),
                    "characters": text.chars().count(),
                    "lines": text.lines().count()
                }))
            }
            "json_format" => {
                let raw = text_arg(&arguments, "json_string")?;
                let parsed: Value =
                    serde_json::from_str(raw).map_err(|e| format!("Invalid JSON: {}", e))?;
                serde_json::to_string_pretty(&parsed)
                    .map(Value::String)
                    .map_err(|e| e.to_string())
            }
            other => Err(format!("Unknown tool: {}", other)),
        }
    }
}
