// Interactive prompts
//
// The orchestrator never touches the terminal directly; it asks a `Prompter`. The terminal
// implementation reads keys in raw mode on a blocking thread so hidden input is echoed as
// `*` and never lands in shell history or scrollback.

use crate::error::{BootstrapError, BootstrapResult};
use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, Write};

#[async_trait]
pub trait Prompter: Send + Sync {
    /// Ask for a secret; input is not echoed.
    async fn ask_hidden(&self, text: &str) -> BootstrapResult<String>;

    async fn ask_visible(&self, text: &str) -> BootstrapResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditAction {
    Continue,
    Submit,
    Cancel,
}

/// Single-line editor driven by key events. Cursor counts chars, not bytes.
#[derive(Debug, Clone)]
struct LineEditor {
    value: Vec<char>,
    cursor: usize,
    masked: bool,
}

impl LineEditor {
    fn new(masked: bool) -> Self {
        Self {
            value: Vec::new(),
            cursor: 0,
            masked,
        }
    }

    fn display(&self) -> String {
        if self.masked {
            "*".repeat(self.value.len())
        } else {
            self.value.iter().collect()
        }
    }

    fn value(&self) -> String {
        self.value.iter().collect()
    }

    fn handle_key(&mut self, key: KeyEvent) -> EditAction {
        if key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('d'))
        {
            return EditAction::Cancel;
        }

        match key.code {
            KeyCode::Enter => return EditAction::Submit,
            KeyCode::Esc => return EditAction::Cancel,
            KeyCode::Char(c) => {
                self.value.insert(self.cursor, c);
                self.cursor += 1;
            }
            KeyCode::Backspace => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.value.remove(self.cursor);
                }
            }
            KeyCode::Delete => {
                if self.cursor < self.value.len() {
                    self.value.remove(self.cursor);
                }
            }
            KeyCode::Left => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Right => self.cursor = (self.cursor + 1).min(self.value.len()),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.value.len(),
            _ => {}
        }
        EditAction::Continue
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Prompts on the controlling terminal (prompt text goes to stderr).
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }

    async fn ask(&self, text: &str, masked: bool) -> BootstrapResult<String> {
        let text = text.to_string();
        tokio::task::spawn_blocking(move || read_line(&text, masked))
            .await
            .map_err(|e| BootstrapError::Terminal(format!("prompt task failed: {}", e)))?
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn ask_hidden(&self, text: &str) -> BootstrapResult<String> {
        self.ask(text, true).await
    }

    async fn ask_visible(&self, text: &str) -> BootstrapResult<String> {
        self.ask(text, false).await
    }
}

fn read_line(text: &str, masked: bool) -> BootstrapResult<String> {
    let io_err = |e: io::Error| BootstrapError::Terminal(e.to_string());

    let mut err = io::stderr();
    let _raw = RawModeGuard::enable().map_err(io_err)?;
    let mut editor = LineEditor::new(masked);

    write!(err, "{}: ", text).map_err(io_err)?;
    err.flush().map_err(io_err)?;

    loop {
        let Event::Key(key) = event::read().map_err(io_err)? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match editor.handle_key(key) {
            EditAction::Continue => {
                // redraw the whole line; the editor may have moved mid-string
                write!(err, "\r\x1b[2K{}: {}", text, editor.display()).map_err(io_err)?;
                err.flush().map_err(io_err)?;
            }
            EditAction::Submit => {
                write!(err, "\r\n").map_err(io_err)?;
                err.flush().map_err(io_err)?;
                return Ok(editor.value());
            }
            EditAction::Cancel => {
                write!(err, "\r\n").map_err(io_err)?;
                err.flush().map_err(io_err)?;
                return Err(BootstrapError::Cancelled(format!("prompt '{}'", text)));
            }
        }
    }
}

/// Replays canned answers in order, for tests of the credential flows.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedPrompter {
    answers: std::sync::Mutex<std::collections::VecDeque<BootstrapResult<String>>>,
    asked: std::sync::Mutex<Vec<(bool, String)>>,
}

#[cfg(test)]
impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: std::sync::Mutex::new(answers.into_iter().map(|a| Ok(a.into())).collect()),
            asked: Default::default(),
        }
    }

    pub fn then_fail(self, err: BootstrapError) -> Self {
        self.answers.lock().unwrap().push_back(Err(err));
        self
    }

    /// `(hidden, prompt text)` for every question asked so far.
    pub fn asked(&self) -> Vec<(bool, String)> {
        self.asked.lock().unwrap().clone()
    }

    fn next(&self, hidden: bool, text: &str) -> BootstrapResult<String> {
        self.asked.lock().unwrap().push((hidden, text.to_string()));
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected prompt: {}", text))
    }
}

#[cfg(test)]
#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn ask_hidden(&self, text: &str) -> BootstrapResult<String> {
        self.next(true, text)
    }

    async fn ask_visible(&self, text: &str) -> BootstrapResult<String> {
        self.next(false, text)
    }
}
