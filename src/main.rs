pub mod builtin;
pub mod execution;
pub mod parser;
pub mod shell;
pub mod sig;
mod sys;

use std::error::Error;
use std::io;

use tracing_subscriber::EnvFilter;

use crate::shell::{Editor, Shell};
use crate::sig::install_handlers;

const LOG_ENV: &str = "MYSH_LOG";

fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    install_handlers()?;

    let editor = Editor::new()?;
    Shell::new(editor, io::stderr()).run();

    Ok(())
}
