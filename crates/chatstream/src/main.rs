use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use console::style;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

use chatstream::agent::{Agent, SendOutcome, TurnObserver};
use chatstream::config::Settings;
use chatstream::errors::{ToolError, ToolResult, TurnError};
use chatstream::models::message::{Message, Role, ToolCallRequest};
use chatstream::models::tool::Tool;
use chatstream::providers::factory::get_adapter;
use chatstream::systems::{StaticToolRegistry, ToolContext, ToolHandler};
use chatstream::transport::HttpTransport;

/// Chat with a streaming backend from the terminal.
///
/// The backend is configured through the environment, e.g.
/// CHATSTREAM_PROVIDER__TYPE=anthropic and CHATSTREAM_PROVIDER__API_KEY=...
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// System prompt sent at the start of the conversation
    #[arg(short, long, default_value = "You are a helpful assistant.")]
    system: String,

    /// Send this one message and exit instead of starting a session
    #[arg(short, long)]
    message: Option<String>,
}

struct CountWords;

#[async_trait]
impl ToolHandler for CountWords {
    async fn call(&self, arguments: Value, _context: &ToolContext) -> ToolResult<Value> {
        let text = arguments
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidParameters("text is required".to_string()))?;
        Ok(json!({ "count": text.split_whitespace().count() }))
    }
}

/// Prints the streamed answer as it grows
#[derive(Default)]
struct TerminalObserver {
    printed: Mutex<usize>,
}

impl TurnObserver for TerminalObserver {
    fn on_progress(&self, accumulated_text: &str) {
        let mut printed = self.printed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delta) = accumulated_text.get(*printed..) {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }
        *printed = accumulated_text.len();
    }

    fn on_complete(&self, _final_text: &str) {
        println!();
    }

    fn on_error(&self, error: &TurnError) {
        eprintln!("\n{} {}", style("error:").red().bold(), error);
    }

    fn on_tool_call(&self, call: &ToolCallRequest) {
        // the next sub-turn streams a fresh answer
        *self.printed.lock().unwrap_or_else(|e| e.into_inner()) = 0;
        println!(
            "\n{} {}({})",
            style("tool").cyan(),
            call.name,
            style(&call.arguments).dim()
        );
    }

    fn on_tool_result(&self, _call: &ToolCallRequest, result: &Value) {
        println!("{} {}", style("  ->").dim(), style(result).dim());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::new().context("Failed to load configuration")?;
    let max_tool_rounds = settings.context.max_tool_rounds;

    let word_count_tool = Tool::new(
        "count_words",
        "Count the number of words in text",
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The text to count words in"
                }
            },
            "required": ["text"]
        }),
    );
    let registry = StaticToolRegistry::new().with_tool(word_count_tool, CountWords);

    let agent = Agent::new(
        get_adapter(settings.provider_config()),
        Arc::new(HttpTransport::new()?),
        Arc::new(registry),
    )
    .with_max_tool_rounds(max_tool_rounds);

    let mut history = vec![Message::system(cli.system)];

    if let Some(message) = cli.message {
        history.push(Message::user(message));
        run_turn(&agent, &mut history).await;
        return Ok(());
    }

    println!(
        "chatstream {}",
        style("- type \"exit\" to end the session, Ctrl-C stops a reply").dim()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", style(">").green().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().eq_ignore_ascii_case("exit") {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        history.push(Message::user(line));
        run_turn(&agent, &mut history).await;
    }
    Ok(())
}

async fn run_turn(agent: &Agent, history: &mut Vec<Message>) {
    let observer = TerminalObserver::default();
    let outcome = {
        let send = agent.send(history, &observer);
        tokio::pin!(send);

        tokio::select! {
            outcome = &mut send => outcome,
            _ = tokio::signal::ctrl_c() => {
                agent.stop();
                send.await
            }
        }
    };

    if outcome == SendOutcome::Cancelled {
        println!("\n{}", style("(stopped)").dim());
    }
    // an unanswered message would leave two user turns in a row
    if !matches!(outcome, SendOutcome::Completed(_))
        && history.last().is_some_and(|message| message.role == Role::User)
    {
        history.pop();
    }
}
