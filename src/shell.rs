use std::error::Error;
use std::fmt;
use std::io::Write;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{debug, warn};

use crate::builtin::{match_builtin, BuiltinError, Flow};
use crate::execution::{self, ExecutionError};
use crate::parser::{self, Command, ParseError};

pub(crate) const PROMPT: &str = "myshell> ";

/// Yields one raw input line per call, `None` once input is exhausted.
pub(crate) trait LineSource {
    fn next_line(&mut self, prompt: &str) -> Option<String>;
}

/// Terminal line source backed by rustyline.
pub(crate) struct Editor {
    editor: DefaultEditor,
}

impl Editor {
    pub(crate) fn new() -> rustyline::Result<Editor> {
        Ok(Editor {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for Editor {
    fn next_line(&mut self, prompt: &str) -> Option<String> {
        match self.editor.readline(prompt) {
            Ok(line) => Some(line),
            // Ctrl-C at the prompt just asks for a fresh one
            Err(ReadlineError::Interrupted) => Some(String::new()),
            Err(ReadlineError::Eof) => None,
            Err(e) => {
                warn!(error = %e, "reading input failed");
                None
            }
        }
    }
}

#[derive(Debug)]
pub enum ShellError {
    Parse(ParseError),
    Builtin(BuiltinError),
    Execution(ExecutionError),
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::Parse(e) => write!(f, "{}", e),
            ShellError::Builtin(e) => write!(f, "{}", e),
            ShellError::Execution(e) => write!(f, "{}", e),
        }
    }
}

impl Error for ShellError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ShellError::Parse(e) => Some(e),
            ShellError::Builtin(e) => Some(e),
            ShellError::Execution(e) => Some(e),
        }
    }
}

impl From<ParseError> for ShellError {
    fn from(e: ParseError) -> ShellError {
        ShellError::Parse(e)
    }
}

impl From<BuiltinError> for ShellError {
    fn from(e: BuiltinError) -> ShellError {
        ShellError::Builtin(e)
    }
}

impl From<ExecutionError> for ShellError {
    fn from(e: ExecutionError) -> ShellError {
        ShellError::Execution(e)
    }
}

/// The read-eval loop. Diagnostics go to `display`, one line per error.
pub(crate) struct Shell<L, D> {
    lines: L,
    display: D,
}

impl<L: LineSource, D: Write> Shell<L, D> {
    pub(crate) fn new(lines: L, display: D) -> Self {
        Shell { lines, display }
    }

    /// Runs until `exit` or end of input.
    pub(crate) fn run(&mut self) {
        while let Some(line) = self.lines.next_line(PROMPT) {
            if self.eval(&line) == Flow::Exit {
                debug!("exit requested");
                break;
            }
        }
    }

    pub(crate) fn eval(&mut self, line: &str) -> Flow {
        if line.trim().is_empty() {
            return Flow::Continue;
        }

        match dispatch(line) {
            Ok(flow) => flow,
            Err(e) => {
                let _ = writeln!(self.display, "myshell: {}", e);
                Flow::Continue
            }
        }
    }
}

fn dispatch(line: &str) -> Result<Flow, ShellError> {
    parser::check_length(line)?;

    if let Some(pipeline) = parser::parse_pipeline(line)? {
        execution::run_pipeline(&pipeline)?;
        return Ok(Flow::Continue);
    }

    let (text, background) = parser::strip_background(line);
    let mut argv = parser::tokenize(text);
    let name = match argv.first() {
        Some(name) => *name,
        None => return Ok(Flow::Continue),
    };

    // builtins see the raw vector: redirection never applies to them
    if let Some(builtin) = match_builtin(name) {
        return Ok(builtin(&argv)?);
    }

    let redirection = parser::resolve_redirection(&mut argv);
    let command = Command {
        argv,
        redirection,
        background,
    };
    execution::launch(&command)?;

    Ok(Flow::Continue)
}
