//! Terminal rendering of conversation messages and streamed runs.

use std::io::{self, Write};

use serde_json::{Map, Value};

use beeswarm_agent::StreamEvent;
use beeswarm_core::{Message, Response, Role, ToolCall};

/// `name(k=v, ...)` with JSON-rendered values.
pub fn format_tool_call(call: &ToolCall) -> String {
    let args = match serde_json::from_str::<Map<String, Value>>(&call.arguments) {
        Ok(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", "),
        Err(_) => call.arguments.clone(),
    };
    format!("{}({args})", call.name)
}

/// Lines for one assistant message; other roles render as nothing.
pub fn format_message(message: &Message) -> Vec<String> {
    if message.role != Role::Assistant {
        return Vec::new();
    }
    let sender = message.sender.as_deref().unwrap_or("assistant");
    let mut lines = Vec::new();
    if !message.content.is_empty() {
        lines.push(format!("{sender}: {}", message.content));
    }
    lines.extend(message.tool_calls.iter().map(format_tool_call));
    lines
}

pub fn print_messages(messages: &[Message]) {
    for line in messages.iter().flat_map(format_message) {
        println!("{line}");
    }
}

/// Writes streamed content as it arrives and tool calls once each message is final.
pub struct StreamPrinter<W: Write> {
    out: W,
    in_message: bool,
    rendered: usize,
}

impl StreamPrinter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> StreamPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            in_message: false,
            rendered: 0,
        }
    }

    pub fn handle(&mut self, event: &StreamEvent) -> io::Result<()> {
        match event {
            StreamEvent::Delta { sender, delta } => {
                let Some(content) = delta.get("content").and_then(Value::as_str) else {
                    return Ok(());
                };
                if content.is_empty() {
                    return Ok(());
                }
                if !self.in_message {
                    write!(self.out, "{sender}: ")?;
                    self.in_message = true;
                }
                write!(self.out, "{content}")?;
                self.out.flush()
            }
            StreamEvent::EndOfMessage => {
                if self.in_message {
                    writeln!(self.out)?;
                    self.in_message = false;
                }
                Ok(())
            }
            StreamEvent::Response(response) | StreamEvent::Completed(response) => {
                self.tool_calls(response)
            }
        }
    }

    fn tool_calls(&mut self, response: &Response) -> io::Result<()> {
        for message in response.messages.iter().skip(self.rendered) {
            for call in &message.tool_calls {
                writeln!(self.out, "{}", format_tool_call(call))?;
            }
        }
        self.rendered = response.messages.len();
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beeswarm_core::{Agent, ContextVariables};
    use serde_json::json;

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    #[test]
    fn test_format_tool_call() {
        assert_eq!(
            format_tool_call(&call("lookup", r#"{"order_id": "7", "qty": 2}"#)),
            r#"lookup(order_id="7", qty=2)"#
        );
        assert_eq!(format_tool_call(&call("ping", "")), "ping()");
    }

    #[test]
    fn test_format_message() {
        let mut message = Message::assistant("Hello").with_sender("Sales");
        message.tool_calls.push(call("transfer_to_billing", "{}"));
        assert_eq!(
            format_message(&message),
            vec!["Sales: Hello".to_string(), "transfer_to_billing()".to_string()]
        );
        assert!(format_message(&Message::user("hi")).is_empty());
    }

    #[test]
    fn test_stream_printer() {
        let mut with_call = Message::assistant("").with_sender("Triage");
        with_call.tool_calls.push(call("transfer_to_sales", "{}"));
        let response = Response {
            messages: vec![with_call],
            agent: Agent::new("Sales", "gpt-4o"),
            context_variables: ContextVariables::new(),
        };

        let mut printer = StreamPrinter::new(Vec::new());
        let events = [
            StreamEvent::Delta {
                sender: "Sales".into(),
                delta: json!({"role": "assistant", "content": "Hel"}),
            },
            StreamEvent::Delta {
                sender: "Sales".into(),
                delta: json!({"content": "lo"}),
            },
            StreamEvent::EndOfMessage,
            StreamEvent::Response(response.clone()),
            StreamEvent::Completed(response),
        ];
        for event in &events {
            printer.handle(event).unwrap();
        }

        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(out, "Sales: Hello\ntransfer_to_sales()\n");
    }
}
