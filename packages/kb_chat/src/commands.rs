//! Parsing of input lines into client actions.

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Broadcast a question to every pane.
    Submit(String),
    Add,
    Remove,
    Reset,
    /// Select a product by full name.
    Product(String),
    Version(String),
    /// Change the model of one pane (1-based).
    Model { pane: usize, name: String },
    Models,
    Products,
    Show,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command /{0} (try /help)")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid pane number {0:?}")]
    InvalidPane(String),
}

pub const HELP: &str = "\
Type a question to ask every pane. Commands:
  /add                  open another pane
  /remove               close the newest pane
  /reset                clear every pane's conversation
  /product <name>       select a product by full name
  /version <version>    select a version of the current product
  /model <pane> <name>  change the model of one pane
  /products             list products and versions
  /models               list available models
  /show                 print every pane's full transcript
  /help                 show this help
  /quit                 close all panes and exit
Start a line with // to ask a question that begins with /.";

/// Parse one input line. Lines not starting with `/` are questions; an empty
/// line is an (empty) question too.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();

    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(Command::Submit(format!("/{escaped}")));
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Submit(line.to_string()));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name.to_ascii_lowercase().as_str() {
        "add" => Ok(Command::Add),
        "remove" => Ok(Command::Remove),
        "reset" => Ok(Command::Reset),
        "product" => non_empty(args, "/product <full name>").map(Command::Product),
        "version" => non_empty(args, "/version <version>").map(Command::Version),
        "model" => parse_model(args),
        "models" => Ok(Command::Models),
        "products" => Ok(Command::Products),
        "show" => Ok(Command::Show),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

fn non_empty(args: &str, usage: &'static str) -> Result<String, ParseError> {
    if args.is_empty() {
        Err(ParseError::Usage(usage))
    } else {
        Ok(args.to_string())
    }
}

fn parse_model(args: &str) -> Result<Command, ParseError> {
    const USAGE: &str = "/model <pane> <name>";
    let (pane, name) = args
        .split_once(char::is_whitespace)
        .ok_or(ParseError::Usage(USAGE))?;
    let pane: usize = pane
        .parse()
        .ok()
        .filter(|p| *p >= 1)
        .ok_or_else(|| ParseError::InvalidPane(pane.to_string()))?;
    let name = non_empty(name.trim(), USAGE)?;
    Ok(Command::Model { pane, name })
}
