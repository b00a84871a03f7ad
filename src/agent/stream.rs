//! Events in the agent CLI's `stream-json` output.

use super::{AgentResponse, ToolUse};
use serde::Deserialize;
use serde_json::Value;

/// One line of `--output-format stream-json`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "system")]
    System {},
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse { name: String, input: Value },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// Accumulates a streamed run into a response.
#[derive(Debug, Default)]
pub(crate) struct StreamFold {
    text: String,
    tool_uses: Vec<ToolUse>,
    final_result: Option<String>,
    error: bool,
}

impl StreamFold {
    /// Feed one output line. Lines that are not events are kept as text.
    pub(crate) fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<StreamEvent>(line) {
            Ok(StreamEvent::Assistant { message }) => {
                for block in message.content {
                    match block {
                        ContentBlock::Text { text } => {
                            self.text.push_str(&text);
                            self.text.push('\n');
                        }
                        ContentBlock::ToolUse { name, input } => {
                            tracing::debug!(tool = %name, "{}", describe_tool_use(&name, &input));
                            self.tool_uses.push(ToolUse { name, input });
                        }
                        ContentBlock::Other => {}
                    }
                }
            }
            Ok(StreamEvent::Result { result, is_error }) => {
                self.final_result = result;
                self.error = is_error;
            }
            Ok(StreamEvent::User {} | StreamEvent::System {}) => {}
            Err(_) => {
                self.text.push_str(line);
                self.text.push('\n');
            }
        }
    }

    /// Whether the final result event flagged an error.
    pub(crate) fn is_error(&self) -> bool {
        self.error
    }

    /// The response text: the accumulated assistant text, or the final
    /// result when nothing was streamed.
    pub(crate) fn finish(self) -> AgentResponse {
        let text = if self.text.trim().is_empty() {
            self.final_result.unwrap_or_default()
        } else {
            self.text
        };
        AgentResponse {
            text,
            tool_uses: self.tool_uses,
        }
    }
}

/// Short human-readable description of a tool call.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    match name {
        "Read" => format!("Reading: {}", field("file_path").map(shorten_path).unwrap_or_default()),
        "Write" => format!("Creating: {}", field("file_path").map(shorten_path).unwrap_or_default()),
        "Edit" => format!("Editing: {}", field("file_path").map(shorten_path).unwrap_or_default()),
        "Bash" => format!("Running: {}", field("command").map(|c| truncate_str(c, 40)).unwrap_or_default()),
        "Glob" | "Grep" => format!("{}: {}", name, field("pattern").unwrap_or("*")),
        _ => name.to_string(),
    }
}

/// Last two components of a path.
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
