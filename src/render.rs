//! Terminal rendering for finalized messages and stats.
//!
//! Assistant text goes to stdout; tool activity, reasoning and stats go to
//! stderr so piped output carries only the answer.

use crate::stats::CumulativeStats;
use crate::types::{Message, MessagePart, MessageStats, Source, StatsStatus, ToolStatus};
use crossterm::style::{Color, Stylize};

const INDENT: &str = "  ";
const GLYPH_TOOL: &str = "▶";
const GLYPH_AGENT_TOOL: &str = "◆";
const GLYPH_SECTION: &str = "•";
const PREVIEW_CHARS: usize = 120;

/// Renders messages with optional ANSI styling.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Print every part of `message`.
    pub fn message(&self, message: &Message) {
        for part in &message.parts {
            match part {
                MessagePart::Text { content } => println!("{content}"),
                other => {
                    for line in self.part_lines(other) {
                        eprintln!("{line}");
                    }
                }
            }
        }
        if message.interrupted {
            self.warn("response interrupted");
        }
    }

    /// Print one message's stats line.
    pub fn stats(&self, stats: &MessageStats) {
        eprintln!("{}", self.stats_line(stats));
    }

    /// Print conversation totals.
    pub fn cumulative(&self, totals: &CumulativeStats) {
        for line in self.cumulative_lines(totals) {
            eprintln!("{line}");
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", self.paint("warning:", Color::Yellow, true) + " " + msg);
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", self.paint("error:", Color::Red, true) + " " + msg);
    }

    /// Stderr lines for a non-text part.
    pub fn part_lines(&self, part: &MessagePart) -> Vec<String> {
        match part {
            MessagePart::Text { content } => vec![content.clone()],
            MessagePart::Reasoning { content } => vec![format!(
                "{INDENT}{} {}",
                self.paint("thinking:", Color::DarkGrey, true),
                self.paint(&preview(content), Color::DarkGrey, false)
            )],
            MessagePart::Tool {
                command,
                content,
                status,
                ..
            } => {
                let mut lines = vec![format!(
                    "{INDENT}{} {} {}",
                    self.paint(GLYPH_TOOL, Color::Cyan, false),
                    self.paint(command, Color::White, true),
                    self.paint(&format!("[{}]", tool_status_label(*status)), status_color(*status), false),
                )];
                if !content.trim().is_empty() {
                    lines.push(format!("{INDENT}{INDENT}{}", preview(content)));
                }
                lines
            }
            MessagePart::AgentTool {
                tool_name,
                tool_args,
                content,
                sources,
                ..
            } => {
                let args = if tool_args.is_null() {
                    String::new()
                } else {
                    preview(&tool_args.to_string())
                };
                let mut lines = vec![format!(
                    "{INDENT}{} {}({})",
                    self.paint(GLYPH_AGENT_TOOL, Color::Magenta, false),
                    self.paint(tool_name, Color::White, true),
                    args
                )];
                if let Some(content) = content.as_deref().filter(|c| !c.trim().is_empty()) {
                    lines.push(format!("{INDENT}{INDENT}{}", preview(content)));
                }
                if let Some(sources) = sources.as_ref().filter(|s| !s.is_empty()) {
                    lines.push(format!("{INDENT}{INDENT}{} sources", sources.len()));
                }
                lines
            }
            MessagePart::Sources { sources } => {
                let mut lines = vec![format!(
                    "{INDENT}{}",
                    self.paint("sources:", Color::Blue, true)
                )];
                lines.extend(
                    sources
                        .iter()
                        .enumerate()
                        .map(|(i, source)| format!("{INDENT}{INDENT}[{}] {}", i + 1, source_label(source))),
                );
                lines
            }
        }
    }

    pub fn stats_line(&self, stats: &MessageStats) -> String {
        let seconds = stats.execution_time_ms as f64 / 1000.0;
        let tokens = if stats.tokens_unavailable {
            "tokens unavailable".to_string()
        } else {
            let t = &stats.tokens;
            format!(
                "prompt:{} completion:{} cached:{} reasoning:{}",
                t.prompt_tokens, t.completion_tokens, t.cached_tokens, t.reasoning_tokens
            )
        };
        format!(
            "{INDENT}{} {tokens} | {seconds:.1}s | {}",
            self.paint("tokens:", Color::DarkGrey, true),
            stats_status_label(stats.stats_status)
        )
    }

    pub fn cumulative_lines(&self, totals: &CumulativeStats) -> Vec<String> {
        let mut lines = vec![format!(
            "{} {}",
            self.paint(GLYPH_SECTION, Color::DarkGrey, false),
            self.paint("conversation", Color::White, true)
        )];
        let fields = [
            ("messages", totals.message_count.to_string()),
            ("prompt tokens", totals.total_prompt_tokens.to_string()),
            ("completion tokens", totals.total_completion_tokens.to_string()),
            ("cached tokens", totals.total_cached_tokens.to_string()),
            ("reasoning tokens", totals.total_reasoning_tokens.to_string()),
            (
                "execution time",
                format!("{:.1}s", totals.total_execution_time_ms as f64 / 1000.0),
            ),
        ];
        for (key, value) in fields {
            lines.push(format!(
                "{INDENT}{} {value}",
                self.paint(&format!("{key}:"), Color::DarkGrey, false)
            ));
        }
        if totals.tokens_unavailable_count > 0 {
            lines.push(format!(
                "{INDENT}{} message(s) without token counts",
                totals.tokens_unavailable_count
            ));
        }
        lines
    }

    fn paint(&self, text: &str, color: Color, bold: bool) -> String {
        if !self.color {
            return text.to_string();
        }
        let styled = text.with(color);
        if bold {
            styled.bold().to_string()
        } else {
            styled.to_string()
        }
    }
}

fn tool_status_label(status: ToolStatus) -> &'static str {
    match status {
        ToolStatus::Queued => "queued",
        ToolStatus::Running => "running",
        ToolStatus::Completed => "done",
        ToolStatus::Error => "error",
    }
}

fn status_color(status: ToolStatus) -> Color {
    match status {
        ToolStatus::Queued | ToolStatus::Running => Color::Yellow,
        ToolStatus::Completed => Color::Green,
        ToolStatus::Error => Color::Red,
    }
}

fn stats_status_label(status: StatsStatus) -> &'static str {
    match status {
        StatsStatus::Pending => "pending",
        StatsStatus::Resolved => "resolved",
        StatsStatus::Unavailable => "unavailable",
        StatsStatus::Failed => "failed",
    }
}

fn source_label(source: &Source) -> String {
    let title = source.title.trim();
    if title.is_empty() {
        source.url.clone()
    } else {
        format!("{title} - {}", source.url)
    }
}

/// Single-line preview clipped to a fixed number of characters.
fn preview(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    let more_lines = text.trim().lines().count() > 1;
    let mut out: String = line.chars().take(PREVIEW_CHARS).collect();
    if more_lines || line.chars().count() > PREVIEW_CHARS {
        out.push_str(" …");
    }
    out
}
