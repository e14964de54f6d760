//! Terminal rendering of turn events.

use std::io::{self, Write};

use crossterm::style::{style, Stylize};

use crate::error::RelayError;
use crate::types::{ConversationMessage, StreamChunk, ToolDescriptor};

const TOOL_OUTPUT_PREVIEW: usize = 200;

/// Writes streamed text and tool activity to a terminal-like sink.
pub struct Renderer<W: Write> {
    out: W,
    color: bool,
    mid_line: bool,
}

impl Renderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), true)
    }
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            mid_line: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn styled(&self, text: &str, paint: fn(&str) -> String) -> String {
        if self.color {
            paint(text)
        } else {
            text.to_string()
        }
    }

    fn end_line(&mut self) -> io::Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
            self.mid_line = false;
        }
        Ok(())
    }

    pub fn banner(&mut self, tools: &[ToolDescriptor]) -> io::Result<()> {
        let mut text = format!("Agent loaded with {} tools:", tools.len());
        for tool in tools {
            text.push_str(&format!("\n- {}", tool.name));
        }
        writeln!(self.out, "{}", self.styled(&text, |t| style(t).blue().to_string()))?;
        writeln!(
            self.out,
            "{}",
            self.styled("Type 'exit' to quit.", |t| style(t).blue().to_string())
        )?;
        self.out.flush()
    }

    pub fn chunk(&mut self, chunk: &StreamChunk) -> io::Result<()> {
        let Some(delta) = chunk.delta.as_ref() else {
            return Ok(());
        };
        if let Some(text) = delta.content.as_deref() {
            write!(self.out, "{text}")?;
            self.mid_line = !text.ends_with('\n');
        }
        for name in delta.tool_calls.iter().filter_map(|f| f.name.as_deref()) {
            self.end_line()?;
            let line = format!("-> {name}");
            writeln!(self.out, "{}", self.styled(&line, |t| style(t).dark_grey().to_string()))?;
        }
        self.out.flush()
    }

    pub fn tool_result(&mut self, message: &ConversationMessage) -> io::Result<()> {
        let ConversationMessage::Tool { name, content, .. } = message else {
            return Ok(());
        };
        self.end_line()?;
        let line = format!("[{name}] {}", preview(content));
        writeln!(self.out, "{}", self.styled(&line, |t| style(t).green().to_string()))?;
        self.out.flush()
    }

    pub fn retrying(&mut self, attempt: u32, max_attempts: u32) -> io::Result<()> {
        self.end_line()?;
        let line = format!("[incomplete response; retrying {attempt}/{max_attempts}]");
        writeln!(self.out, "{}", self.styled(&line, |t| style(t).yellow().to_string()))?;
        self.out.flush()
    }

    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        self.end_line()?;
        writeln!(self.out, "{}", self.styled(text, |t| style(t).blue().to_string()))?;
        self.out.flush()
    }

    pub fn error(&mut self, err: &RelayError) -> io::Result<()> {
        self.end_line()?;
        let line = format!("Error: {}", super::errors::format_error_help(err));
        writeln!(self.out, "{}", self.styled(&line, |t| style(t).red().to_string()))?;
        self.out.flush()
    }

    /// Finish the current response line.
    pub fn finish(&mut self) -> io::Result<()> {
        self.end_line()?;
        self.out.flush()
    }
}

/// Leading slice of tool output, cut on a char boundary.
fn preview(content: &str) -> String {
    if content.len() <= TOOL_OUTPUT_PREVIEW {
        return content.to_string();
    }
    let mut end = TOOL_OUTPUT_PREVIEW;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &content[..end])
}
