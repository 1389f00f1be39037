// https://github.com/Geal/nom/blob/master/doc/choosing_a_combinator.md

use std::error::Error;
use std::fmt;

use nom::{
    bytes::complete::{take_till1, take_while},
    multi::many0,
    sequence::{preceded, terminated},
    IResult,
};
use tracing::trace;

/// Upper bound on argument vector slots, the last one being reserved for the
/// terminating null pointer handed to `execvp`. Tokens past the limit are dropped.
pub(crate) const MAX_ARGS: usize = 64;

/// Lines of this many bytes or more are rejected.
pub(crate) const MAX_INPUT: usize = 1024;

#[derive(Debug, PartialEq)]
pub enum ParseError {
    LineTooLong(usize),
    TooManyPipes,
    MissingCommand,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::LineTooLong(len) => write!(
                f,
                "input line too long ({} bytes, limit {})",
                len,
                MAX_INPUT - 1
            ),
            ParseError::TooManyPipes => write!(f, "only one \"|\" per line is supported"),
            ParseError::MissingCommand => write!(f, "missing command around \"|\""),
        }
    }
}

impl Error for ParseError {}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct Redirection<'a> {
    pub input: Option<&'a str>,
    pub output: Option<&'a str>,
    pub append: bool,
}

#[derive(Debug, PartialEq)]
pub(crate) struct Command<'a> {
    pub argv: Vec<&'a str>,
    pub redirection: Redirection<'a>,
    pub background: bool,
}

impl<'a> Command<'a> {
    pub(crate) fn new(argv: Vec<&'a str>) -> Self {
        Command {
            argv,
            redirection: Redirection::default(),
            background: false,
        }
    }

    pub(crate) fn name(&self) -> Option<&'a str> {
        self.argv.first().copied()
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct Pipeline<'a> {
    pub left: Command<'a>,
    pub right: Command<'a>,
}

pub(crate) fn check_length(line: &str) -> Result<(), ParseError> {
    if line.len() >= MAX_INPUT {
        return Err(ParseError::LineTooLong(line.len()));
    }

    Ok(())
}

fn blank(input: &str) -> IResult<&str, &str> {
    take_while(char::is_whitespace)(input)
}

fn word(input: &str) -> IResult<&str, &str> {
    take_till1(char::is_whitespace)(input)
}

fn words(input: &str) -> IResult<&str, Vec<&str>> {
    preceded(blank, many0(terminated(word, blank)))(input)
}

/// Splits `line` on runs of whitespace. The tokens borrow from `line`.
pub(crate) fn tokenize(line: &str) -> Vec<&str> {
    let mut argv = match words(line) {
        Ok((_, argv)) => argv,
        Err(_) => Vec::new(),
    };

    if argv.len() > MAX_ARGS - 1 {
        trace!(dropped = argv.len() - (MAX_ARGS - 1), "argument limit reached");
        argv.truncate(MAX_ARGS - 1);
    }

    trace!(?argv, "tokenized");
    argv
}

/// Removes a trailing `&`, attached or not, and reports whether it was present.
pub(crate) fn strip_background(line: &str) -> (&str, bool) {
    let trimmed = line.trim_end();
    match trimmed.strip_suffix('&') {
        Some(rest) => (rest, true),
        None => (line, false),
    }
}

/// Honors the first `<`, `>` or `>>` that has a target after it and cuts the
/// vector at that operator. An operator in last position stays as an argument.
pub(crate) fn resolve_redirection<'a>(argv: &mut Vec<&'a str>) -> Redirection<'a> {
    let mut redirection = Redirection::default();

    let operator = argv
        .iter()
        .position(|arg| matches!(*arg, "<" | ">" | ">>"));

    if let Some(pos) = operator {
        if let Some(&target) = argv.get(pos + 1) {
            match argv[pos] {
                "<" => redirection.input = Some(target),
                ">>" => {
                    redirection.output = Some(target);
                    redirection.append = true;
                }
                _ => redirection.output = Some(target),
            }
            argv.truncate(pos);
        }
    }

    redirection
}

/// Returns `None` when the line holds no `|`. Stages are tokenized as is:
/// neither redirection nor `&` is interpreted inside a pipeline.
pub(crate) fn parse_pipeline(line: &str) -> Result<Option<Pipeline<'_>>, ParseError> {
    let (left, right) = match line.split_once('|') {
        Some(stages) => stages,
        None => return Ok(None),
    };

    if right.contains('|') {
        return Err(ParseError::TooManyPipes);
    }

    let left = Command::new(tokenize(left));
    let right = Command::new(tokenize(right));
    if left.argv.is_empty() || right.argv.is_empty() {
        return Err(ParseError::MissingCommand);
    }

    Ok(Some(Pipeline { left, right }))
}

#[cfg(test)]
mod tests {
    use super::{Command, ParseError, Pipeline, Redirection, MAX_ARGS, MAX_INPUT};

    #[test]
    fn test_tokenize() {
        assert_eq!(super::tokenize("ls -l /tmp"), vec!["ls", "-l", "/tmp"]);
        assert_eq!(
            super::tokenize("  echo \t hello   world  "),
            vec!["echo", "hello", "world"]
        );
        assert_eq!(super::tokenize("   "), Vec::<&str>::new());
        assert_eq!(super::tokenize(""), Vec::<&str>::new());
    }

    #[test]
    fn test_tokenize_keeps_quotes_verbatim() {
        assert_eq!(
            super::tokenize("echo 'a b' \"c\""),
            vec!["echo", "'a", "b'", "\"c\""]
        );
    }

    #[test]
    fn test_tokenize_drops_excess_tokens() {
        let line = (0..100).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let argv = super::tokenize(&line);

        assert_eq!(argv.len(), MAX_ARGS - 1);
        assert_eq!(argv[0], "0");
        assert_eq!(argv[MAX_ARGS - 2], "62");
    }

    #[test]
    fn test_check_length() {
        assert_eq!(super::check_length("ls"), Ok(()));
        assert_eq!(super::check_length(&"x".repeat(MAX_INPUT - 1)), Ok(()));
        assert_eq!(
            super::check_length(&"x".repeat(MAX_INPUT)),
            Err(ParseError::LineTooLong(MAX_INPUT))
        );
    }

    #[test]
    fn test_strip_background() {
        assert_eq!(super::strip_background("sleep 5 &"), ("sleep 5 ", true));
        assert_eq!(super::strip_background("sleep 5&  "), ("sleep 5", true));
        assert_eq!(super::strip_background("sleep 5"), ("sleep 5", false));
    }

    #[test]
    fn test_resolve_output_redirection() {
        let mut argv = super::tokenize("echo hi > out.txt");
        let redirection = super::resolve_redirection(&mut argv);

        assert_eq!(argv, vec!["echo", "hi"]);
        assert_eq!(
            redirection,
            Redirection {
                input: None,
                output: Some("out.txt"),
                append: false
            }
        );
    }

    #[test]
    fn test_resolve_append_and_input_redirection() {
        let mut argv = super::tokenize("echo hi >> out.txt");
        assert_eq!(
            super::resolve_redirection(&mut argv),
            Redirection {
                input: None,
                output: Some("out.txt"),
                append: true
            }
        );
        assert_eq!(argv, vec!["echo", "hi"]);

        let mut argv = super::tokenize("cat < in.txt");
        assert_eq!(
            super::resolve_redirection(&mut argv),
            Redirection {
                input: Some("in.txt"),
                output: None,
                append: false
            }
        );
        assert_eq!(argv, vec!["cat"]);
    }

    #[test]
    fn test_first_operator_wins() {
        let mut argv = super::tokenize("sort < in.txt > out.txt");
        let redirection = super::resolve_redirection(&mut argv);

        assert_eq!(argv, vec!["sort"]);
        assert_eq!(redirection.input, Some("in.txt"));
        assert_eq!(redirection.output, None);
    }

    #[test]
    fn test_trailing_operator_is_an_argument() {
        let mut argv = super::tokenize("echo hi >");
        assert_eq!(super::resolve_redirection(&mut argv), Redirection::default());
        assert_eq!(argv, vec!["echo", "hi", ">"]);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut argv = super::tokenize("echo hi > out.txt");
        super::resolve_redirection(&mut argv);
        let truncated = argv.clone();

        assert_eq!(super::resolve_redirection(&mut argv), Redirection::default());
        assert_eq!(argv, truncated);
    }

    #[test]
    fn test_parse_pipeline() {
        assert_eq!(super::parse_pipeline("ls -l"), Ok(None));
        assert_eq!(
            super::parse_pipeline("ls -l |  wc -l"),
            Ok(Some(Pipeline {
                left: Command::new(vec!["ls", "-l"]),
                right: Command::new(vec!["wc", "-l"]),
            }))
        );
    }

    #[test]
    fn test_pipeline_stages_keep_operators() {
        let pipeline = super::parse_pipeline("cat < in.txt|sort &").unwrap().unwrap();

        assert_eq!(pipeline.left.argv, vec!["cat", "<", "in.txt"]);
        assert_eq!(pipeline.right.argv, vec!["sort", "&"]);
        assert!(!pipeline.right.background);
    }

    #[test]
    fn test_parse_pipeline_errors() {
        assert_eq!(super::parse_pipeline("a | b | c"), Err(ParseError::TooManyPipes));
        assert_eq!(super::parse_pipeline("ls |"), Err(ParseError::MissingCommand));
        assert_eq!(super::parse_pipeline(" | wc"), Err(ParseError::MissingCommand));
    }

    #[test]
    fn test_command_name() {
        assert_eq!(Command::new(vec!["ls", "-a"]).name(), Some("ls"));
        assert_eq!(Command::new(vec![]).name(), None);
    }
}
