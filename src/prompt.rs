//! Operator prompts.
use std::io::{self, BufRead, IsTerminal, Write};

/// Source of interactive answers.
pub trait Prompter {
    /// Whether an operator can answer prompts.
    fn can_prompt(&self) -> bool;

    /// Show `message` on `output` and read one line; `None` at end of input.
    fn read_line(&mut self, message: &str, output: &mut dyn Write) -> io::Result<Option<String>>;

    /// Ask a yes/no question; only `y` or `yes` (any case) count as yes.
    fn confirm(&mut self, message: &str, output: &mut dyn Write) -> io::Result<bool> {
        Ok(self
            .read_line(message, output)?
            .is_some_and(|answer| is_yes(&answer)))
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Prompts on the process's stdin when it is a terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn can_prompt(&self) -> bool {
        io::stdin().is_terminal()
    }

    fn read_line(&mut self, message: &str, output: &mut dyn Write) -> io::Result<Option<String>> {
        output.write_all(message.as_bytes())?;
        output.flush()?;
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Never prompts; used for `--no-input` and automation.
#[derive(Debug, Default)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn can_prompt(&self) -> bool {
        false
    }

    fn read_line(&mut self, _message: &str, _output: &mut dyn Write) -> io::Result<Option<String>> {
        Ok(None)
    }
}
