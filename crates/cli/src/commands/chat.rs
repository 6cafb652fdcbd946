//! `localforge chat`: interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use localforge_agent::{AgentLoop, Transcript};
use localforge_config::AppConfig;
use localforge_core::event::AgentEvent;
use localforge_core::message::Message;
use localforge_core::provider::ModelAdapter;
use localforge_core::CancellationToken;
use localforge_providers::ModelRouter;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Longest tool input or result shown on one line.
const PREVIEW_CHARS: usize = 120;

pub async fn run(model: Option<String>, message: Option<String>) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let router = ModelRouter::from_config(&config);
    let adapter = router.adapter(model.as_deref())?;
    let agent = AgentLoop::from_config(&config, localforge_tools::build_registry(&config));
    debug!(
        provider = adapter.name(),
        model = adapter.model(),
        tools = agent.tools().len(),
        "Chat session starting"
    );

    match message {
        Some(message) => {
            let mut history = vec![Message::user(message)];
            let mut out = std::io::stdout();
            if let Some(error) = run_turn(&agent, adapter, &mut history, &mut out).await? {
                anyhow::bail!(error);
            }
        }
        None => repl(&agent, adapter).await?,
    }

    Ok(())
}

async fn repl(agent: &AgentLoop, adapter: Arc<dyn ModelAdapter>) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    writeln!(out)?;
    writeln!(out, "  LocalForge: interactive mode")?;
    writeln!(out, "  Model:  {} ({})", adapter.model(), adapter.name())?;
    writeln!(out, "  Tools:  {}", agent.tools().names().join(", "))?;
    writeln!(out)?;
    writeln!(out, "  Type your message and press Enter.")?;
    writeln!(out, "  '/clear' starts over, 'exit' or Ctrl+D quits.")?;
    writeln!(out)?;

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        write!(out, "  You > ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/clear" => {
                history.clear();
                writeln!(out, "  (history cleared)")?;
                continue;
            }
            _ => {}
        }

        history.push(Message::user(input));
        write!(out, "\n  Assistant > ")?;
        run_turn(agent, adapter.clone(), &mut history, &mut out).await?;
        writeln!(out)?;
    }

    Ok(())
}

/// Run one turn, render its events and extend `history` with what it
/// produced. Ctrl+C cancels the turn. Returns the turn's error message, if
/// it ended in one.
async fn run_turn(
    agent: &AgentLoop,
    adapter: Arc<dyn ModelAdapter>,
    history: &mut Vec<Message>,
    out: &mut impl Write,
) -> anyhow::Result<Option<String>> {
    let cancel = CancellationToken::new();
    let mut transcript = Transcript::new(adapter.kind());
    let mut renderer = Renderer::default();
    let mut events = agent.run(history.clone(), adapter, Vec::new(), cancel.clone());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                cancel.cancel();
                renderer.interrupted(out)?;
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    transcript.observe(&event);
                    renderer.render(&event, out)?;
                }
                None => break,
            },
        }
    }

    history.extend(transcript.into_messages());
    Ok(renderer.error)
}

/// Draws loop events on a terminal: text inline, tool activity on its own
/// lines.
#[derive(Default)]
struct Renderer {
    mid_line: bool,
    error: Option<String>,
}

impl Renderer {
    fn render(&mut self, event: &AgentEvent, out: &mut impl Write) -> std::io::Result<()> {
        match event {
            AgentEvent::Iteration { .. } => {}
            AgentEvent::TextDelta { text } => {
                write!(out, "{text}")?;
                self.mid_line = !text.ends_with('\n');
                out.flush()?;
            }
            AgentEvent::ToolCall { name, input, .. } => {
                self.end_line(out)?;
                writeln!(out, "  ⚙ {name} {}", preview(&input.to_string()))?;
            }
            AgentEvent::ToolConfirmationNeeded { message, .. } => {
                self.end_line(out)?;
                writeln!(out, "  ⚠ {message}")?;
            }
            AgentEvent::ToolResult { name, result, .. } => {
                self.end_line(out)?;
                writeln!(out, "  ↳ {name}: {}", preview(result))?;
            }
            AgentEvent::Done { .. } => self.end_line(out)?,
            AgentEvent::Error { message } => {
                self.end_line(out)?;
                writeln!(out, "  ✖ Error: {message}")?;
                self.error = Some(message.clone());
            }
        }
        Ok(())
    }

    fn interrupted(&mut self, out: &mut impl Write) -> std::io::Result<()> {
        self.end_line(out)?;
        writeln!(out, "  (interrupted)")
    }

    fn end_line(&mut self, out: &mut impl Write) -> std::io::Result<()> {
        if self.mid_line {
            writeln!(out)?;
            self.mid_line = false;
        }
        Ok(())
    }
}

/// First line of `text`, shortened to fit on one terminal line.
fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    let more_lines = text.trim_end().lines().nth(1).is_some();
    let mut shown: String = first.chars().take(PREVIEW_CHARS).collect();
    if more_lines || first.chars().count() > PREVIEW_CHARS {
        shown.push_str("...");
    }
    shown
}
