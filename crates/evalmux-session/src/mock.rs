//! Scripted engine for tests and the demo binary.
//!
//! Behaves like a tiny recursive REPL so that nesting, unwinding and error
//! routing can be exercised without a real interpreter process.

use evalmux_core::{CallFlag, Contexts, SessionError};
use tracing::{debug, info};

use crate::coordinator::EngineCallbacks;

#[derive(Clone, Debug)]
pub struct MockEngineConfig {
    /// Prompt shown at top level. Nested frames use `Browse[n]> `.
    pub prompt: String,
    pub max_length: usize,
}

impl Default for MockEngineConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".into(),
            max_length: 4096,
        }
    }
}

/// What one line of input does to the engine.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Nothing,
    Browse,
    Continue,
    Quit,
    Exit,
    Stop(&'a str),
    Echo(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        match line {
            "" => Self::Nothing,
            "browser()" => Self::Browse,
            "c" => Self::Continue,
            "Q" => Self::Quit,
            "q()" => Self::Exit,
            _ => match line
                .strip_prefix("stop(\"")
                .and_then(|rest| rest.strip_suffix("\")"))
            {
                Some(msg) => Self::Stop(msg),
                None => Self::Echo(line),
            },
        }
    }
}

pub struct MockEngine {
    callbacks: EngineCallbacks,
    config: MockEngineConfig,
    frames: Contexts,
}

impl MockEngine {
    pub fn new(callbacks: EngineCallbacks, config: MockEngineConfig) -> Self {
        Self {
            callbacks,
            config,
            frames: Contexts::toplevel(),
        }
    }

    /// Prompt, evaluate and repeat until `q()` arrives or the session closes.
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            let prompt = self.prompt();
            let reply = self.callbacks.on_prompt(
                self.frames.clone(),
                &prompt,
                self.config.max_length,
                true,
            );
            let line = match reply.await {
                Ok(line) => line,
                Err(SessionError::Abandoned) if !self.callbacks.handle().is_closed() => {
                    debug!(depth = self.frames.depth(), "prompt abandoned, asking again");
                    continue;
                }
                Err(SessionError::Abandoned) | Err(SessionError::Closed) => return Ok(()),
                Err(err) => return Err(err),
            };
            if !self.eval(&line) {
                info!("mock engine exiting");
                self.callbacks.close();
                return Ok(());
            }
        }
    }

    fn prompt(&self) -> String {
        match self.frames.depth() {
            0 | 1 => self.config.prompt.clone(),
            depth => format!("Browse[{}]> ", depth - 1),
        }
    }

    /// Returns false once the engine should exit.
    fn eval(&mut self, line: &str) -> bool {
        match Command::parse(line) {
            Command::Nothing => {}
            Command::Browse => self.frames = self.frames.nested(CallFlag::Browser),
            Command::Continue if self.frames.depth() > 1 => {
                self.frames = Contexts::new(self.frames.as_slice()[1..].to_vec());
            }
            Command::Continue => self.echo("c"),
            Command::Quit => self.frames = Contexts::toplevel(),
            Command::Exit => return false,
            Command::Stop(msg) => {
                let raised_at = self.frames.nested(CallFlag::Builtin);
                self.callbacks
                    .on_output(&raised_at, &format!("Error: {msg}\n"), true);
            }
            Command::Echo(text) => self.echo(text),
        }
        true
    }

    fn echo(&mut self, text: &str) {
        self.callbacks
            .on_output(&self.frames, &format!("[1] {text}\n"), false);
    }
}
