//! Line-oriented dialog loop
//!
//! Reads commands and prompts, streams replies to the output as they grow,
//! and can write the last reply to a file.
//!
//! Commands:
//! - `.exit` ends the dialog
//! - `.regenerate` replaces the last reply with a fresh one
//! - `.update <path>` overwrites `<path>` with the last reply
//! - `.append <path>` appends the last reply to `<path>`
//!
//! Anything else is sent as a prompt after prompt macros are expanded.

use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::{info, warn};

use crate::error::{DialogueError, Result};
use crate::session::{Regeneration, ReplyStream, StreamingSession};

const INPUT_MARKER: &str = "\nUser: ";

/// A parsed line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Regenerate,
    Update(PathBuf),
    Append(PathBuf),
    Prompt(String),
}

impl Command {
    /// Parse one input line; `None` for blank input
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        let command = match input {
            ".exit" => Command::Exit,
            ".regenerate" => Command::Regenerate,
            _ => {
                if let Some(path) = file_argument(input, ".update") {
                    Command::Update(path)
                } else if let Some(path) = file_argument(input, ".append") {
                    Command::Append(path)
                } else {
                    Command::Prompt(input.to_string())
                }
            }
        };
        Some(command)
    }
}

/// Last whitespace-separated word after `name `
fn file_argument(input: &str, name: &str) -> Option<PathBuf> {
    let rest = input.strip_prefix(name)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    rest.split_whitespace().last().map(PathBuf::from)
}

/// Named prompt snippets, invoked as `.name` inside user input
#[derive(Debug, Clone, Default)]
pub struct PromptMacros {
    // longest trigger first so `.tests` wins over `.test`
    replacements: Vec<(String, String)>,
}

impl PromptMacros {
    pub fn new(prompts: &HashMap<String, String>) -> Self {
        let mut replacements: Vec<(String, String)> = prompts
            .iter()
            .map(|(name, text)| (format!(".{name}"), text.clone()))
            .collect();
        replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { replacements }
    }

    /// Replace every macro trigger in `input`
    pub fn expand(&self, input: &str) -> String {
        let mut prompt = input.to_string();
        for (trigger, text) in &self.replacements {
            if prompt.contains(trigger.as_str()) {
                prompt = prompt.replace(trigger.as_str(), text);
            }
        }
        prompt
    }

    /// Triggers offered to the user alongside the built-in commands
    pub fn triggers(&self) -> impl Iterator<Item = &str> {
        self.replacements.iter().map(|(trigger, _)| trigger.as_str())
    }
}

/// Drives a [`StreamingSession`] from a line reader
pub struct DialogController<R, W> {
    session: StreamingSession,
    macros: PromptMacros,
    lines: Lines<R>,
    out: W,
    last_output: String,
}

impl<R, W> DialogController<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(session: StreamingSession, macros: PromptMacros, input: R, out: W) -> Self {
        Self {
            session,
            macros,
            lines: input.lines(),
            out,
            last_output: String::new(),
        }
    }

    pub fn session(&self) -> &StreamingSession {
        &self.session
    }

    /// Text of the most recent reply
    pub fn last_output(&self) -> &str {
        &self.last_output
    }

    /// Run until `.exit` or end of input
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting interactive dialog. Type '.exit' to end the conversation.");

        loop {
            self.out.write_all(INPUT_MARKER.as_bytes()).await?;
            self.out.flush().await?;

            let Some(line) = self.lines.next_line().await? else {
                break;
            };

            let input = self.macros.expand(line.trim());
            let Some(command) = Command::parse(&input) else {
                continue;
            };

            match command {
                Command::Exit => break,
                Command::Regenerate => self.regenerate().await?,
                Command::Update(path) => self.write_last_output(path, false).await?,
                Command::Append(path) => self.write_last_output(path, true).await?,
                Command::Prompt(prompt) => {
                    info!(prompt = %prompt, "Prompt");
                    self.reply(prompt).await?;
                }
            }
        }

        Ok(())
    }

    async fn reply(&mut self, prompt: String) -> Result<()> {
        let outcome = match self.session.submit(prompt, None) {
            Ok(stream) => render_reply(stream, &mut self.out).await,
            Err(e) => Err(e),
        };
        self.finish_turn(outcome).await
    }

    async fn regenerate(&mut self) -> Result<()> {
        let outcome = match self.session.regenerate_last() {
            Ok(Regeneration::Started(stream)) => render_reply(stream, &mut self.out).await,
            Ok(Regeneration::NothingToRegenerate) => {
                self.out.write_all(b"No previous answer to regenerate.\n").await?;
                return Ok(());
            }
            Err(e) => Err(e),
        };
        self.finish_turn(outcome).await
    }

    /// Remember a finished reply, or report a failed one and keep going
    async fn finish_turn(&mut self, outcome: Result<String>) -> Result<()> {
        match outcome {
            Ok(text) => {
                self.last_output = text;
                Ok(())
            }
            Err(DialogueError::Io(e)) => Err(e.into()),
            Err(e) => {
                warn!("Turn failed: {}", e);
                self.out.write_all(format!("\nError: {e}\n").as_bytes()).await?;
                Ok(())
            }
        }
    }

    async fn write_last_output(&mut self, path: PathBuf, append: bool) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await?;
        file.write_all(self.last_output.as_bytes()).await?;
        file.flush().await?;

        info!(path = %path.display(), append, "Reply written");
        self.out
            .write_all(format!("File '{}' has been updated.\n", path.display()).as_bytes())
            .await?;
        Ok(())
    }
}

/// Print snapshots as a continuous stream of text; returns the final text
pub async fn render_reply<W>(mut stream: ReplyStream<'_>, out: &mut W) -> Result<String>
where
    W: AsyncWrite + Unpin,
{
    let mut shown = String::new();
    while let Some(snapshot) = stream.next().await {
        let snapshot = snapshot?;
        match snapshot.strip_prefix(shown.as_str()) {
            Some(delta) => out.write_all(delta.as_bytes()).await?,
            None => {
                out.write_all(b"\n").await?;
                out.write_all(snapshot.as_bytes()).await?;
            }
        }
        out.flush().await?;
        shown = snapshot;
    }
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(shown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TokenBudget;
    use crate::session::SessionSettings;
    use crate::transport::ScriptedTransport;
    use std::sync::Arc;

    fn session(transport: ScriptedTransport) -> StreamingSession {
        let settings = SessionSettings::new("gpt-4", "sys", TokenBudget::new(None, 100));
        StreamingSession::new(settings, Arc::new(transport)).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("   "), None);
        assert_eq!(Command::parse(".exit"), Some(Command::Exit));
        assert_eq!(Command::parse(" .regenerate "), Some(Command::Regenerate));
        assert_eq!(
            Command::parse(".update src/main.rs"),
            Some(Command::Update(PathBuf::from("src/main.rs")))
        );
        assert_eq!(
            Command::parse(".append  notes.md"),
            Some(Command::Append(PathBuf::from("notes.md")))
        );
        assert_eq!(
            Command::parse(".updates are welcome"),
            Some(Command::Prompt(".updates are welcome".to_string()))
        );
        assert_eq!(
            Command::parse(".update"),
            Some(Command::Prompt(".update".to_string()))
        );
    }

    #[test]
    fn test_macro_expansion() {
        let mut prompts = HashMap::new();
        prompts.insert("test".to_string(), "Write a test.".to_string());
        prompts.insert("tests".to_string(), "Write many tests.".to_string());
        let macros = PromptMacros::new(&prompts);

        assert_eq!(macros.expand("Please .tests now"), "Please Write many tests. now");
        assert_eq!(macros.expand(".test"), "Write a test.");
        assert_eq!(macros.expand("plain"), "plain");
        assert_eq!(macros.triggers().collect::<Vec<_>>(), vec![".tests", ".test"]);
    }

    #[tokio::test]
    async fn test_render_reply_prints_deltas() {
        let stream: ReplyStream<'static> = Box::pin(futures::stream::iter(vec![
            Ok("Hello".to_string()),
            Ok("Hello world".to_string()),
        ]));
        let mut out = Vec::new();
        let text = render_reply(stream, &mut out).await.unwrap();
        assert_eq!(text, "Hello world");
        assert_eq!(String::from_utf8(out).unwrap(), "Hello world\n");
    }

    #[tokio::test]
    async fn test_dialog_round_trip() {
        let input: &[u8] = b"first question\n\n.regenerate\n.exit\nnever sent\n";
        let mut out = Vec::new();
        let mut controller = DialogController::new(
            session(ScriptedTransport::new(["Sure", ", here it is."])),
            PromptMacros::default(),
            input,
            &mut out,
        );

        controller.run().await.unwrap();
        assert_eq!(controller.last_output(), "Sure, here it is.");
        assert_eq!(controller.session().history().len(), 2);
        drop(controller);

        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches("Sure, here it is.").count(), 2);
        assert!(!printed.contains("never sent"));
    }

    #[tokio::test]
    async fn test_regenerate_without_history() {
        let input: &[u8] = b".regenerate\n";
        let mut out = Vec::new();
        let mut controller = DialogController::new(
            session(ScriptedTransport::new(["x"])),
            PromptMacros::default(),
            input,
            &mut out,
        );
        controller.run().await.unwrap();
        drop(controller);
        assert!(String::from_utf8(out).unwrap().contains("No previous answer to regenerate."));
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported_and_dialog_continues() {
        let input: &[u8] = b"hello\n";
        let mut out = Vec::new();
        let mut controller = DialogController::new(
            session(ScriptedTransport::new(["x"]).ending_with_error("boom")),
            PromptMacros::default(),
            input,
            &mut out,
        );
        controller.run().await.unwrap();
        assert!(controller.session().history().is_empty());
        drop(controller);
        assert!(String::from_utf8(out).unwrap().contains("Error: API error: boom"));
    }

    #[tokio::test]
    async fn test_update_and_append_write_last_reply() {
        let path = std::env::temp_dir().join(format!("dialogue-{}.txt", uuid::Uuid::new_v4()));
        let script = format!(
            "give me code\n.update {p}\n.append {p}\n.exit\n",
            p = path.display()
        );
        let mut out = Vec::new();
        let mut controller = DialogController::new(
            session(ScriptedTransport::new(["fn main() {}"])),
            PromptMacros::default(),
            script.as_bytes(),
            &mut out,
        );
        controller.run().await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "fn main() {}fn main() {}");
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
