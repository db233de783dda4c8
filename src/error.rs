use std::fmt;

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Pos { line, col }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    IllegalChar { ch: char, state: &'static str },
    Syntax(String),
    UnexpectedEof,
    MatchNameConflict { existing: String, new: String },
    BadMatchNameContext,
    DanglingMatchName(String),
    Structure(String),
    UnknownOperator(String),
    InvalidNegation,
    Operator(String),
    MissingAttribute { element: String, attribute: String },
    UnknownAttribute { element: String, attribute: String, hint: Option<String> },
    ImportNotFound(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::IllegalChar { ch, state } => {
                write!(f, "illegal lexical character \"{}\" (in {} context)", ch, state)
            }
            ErrorKind::Syntax(msg) => write!(f, "{}", msg),
            ErrorKind::UnexpectedEof => write!(f, "unexpected EOF"),
            ErrorKind::MatchNameConflict { existing, new } => write!(
                f,
                "pre-existing match name detected (\"{}\"), conflicts with new \"{}\"",
                existing, new
            ),
            ErrorKind::BadMatchNameContext => {
                write!(f, "match name used outside of a test context")
            }
            ErrorKind::DanglingMatchName(name) => write!(
                f,
                "match name \"{}\" does not apply to any matches operator",
                name
            ),
            ErrorKind::Structure(msg) => write!(f, "{}", msg),
            ErrorKind::UnknownOperator(op) => write!(f, "unknown operator \"{}\"", op),
            ErrorKind::InvalidNegation => {
                write!(f, "only numeric literals can be negated")
            }
            ErrorKind::Operator(msg) => write!(f, "{}", msg),
            ErrorKind::MissingAttribute { element, attribute } => {
                let noun = if element.starts_with("esi:") { "attribute" } else { "parameter" };
                write!(f, "\"{}\" requires {} \"{}\"", element, noun, attribute)
            }
            ErrorKind::UnknownAttribute { element, attribute, hint } => {
                let noun = if element.starts_with("esi:") { "attribute" } else { "parameter" };
                write!(f, "\"{}\" does not accept {} \"{}\"", element, noun, attribute)?;
                if let Some(h) = hint {
                    write!(f, " - did you mean \"{}\"?", h)?;
                }
                Ok(())
            }
            ErrorKind::ImportNotFound(src) => {
                write!(f, "could not find import \"{}\"", src)
            }
        }
    }
}

/// A single diagnostic, optionally pinned to a source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub pos: Option<Pos>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, pos: None }
    }

    pub fn at(kind: ErrorKind, pos: Pos) -> Self {
        Error { kind, pos: Some(pos) }
    }

    pub fn structure(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::Structure(msg.into()))
    }

    /// Lexical and syntax errors are counted and deferred; everything else
    /// aborts the run on the spot.
    pub fn is_counted(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::IllegalChar { .. } | ErrorKind::Syntax(_) | ErrorKind::UnexpectedEof
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl std::error::Error for Error {}

/// Top-level failure of a compile or decompile run.
#[derive(Debug)]
pub enum CompileError {
    /// Accumulated lexical/syntax errors; maps to exit code 100 + count.
    Errors { count: usize, decompiling: bool },
    /// A structural error that aborted the run immediately.
    Fatal(Error),
    Io(std::io::Error),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Errors { count, decompiling } => {
                let what = if *decompiling { "decompilation" } else { "compilation" };
                write!(f, "{} failed with {} error(s)", what, count)
            }
            CompileError::Fatal(e) => e.fmt(f),
            CompileError::Io(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<Error> for CompileError {
    fn from(e: Error) -> Self {
        CompileError::Fatal(e)
    }
}

impl From<std::io::Error> for CompileError {
    fn from(e: std::io::Error) -> Self {
        CompileError::Io(e)
    }
}

/// Collects rendered diagnostics for one input file.
///
/// Lexers and parsers report through this and keep going where they can;
/// the pipeline checks `count` once parsing ends.
#[derive(Debug)]
pub struct Reporter {
    pub filename: String,
    pub count: usize,
    lines: Vec<String>,
}

impl Reporter {
    pub fn new(filename: &str) -> Self {
        Reporter { filename: filename.to_string(), count: 0, lines: Vec::new() }
    }

    pub fn report(&mut self, pos: Pos, message: &dyn fmt::Display) {
        self.count += 1;
        self.lines.push(format!("{}@{}: ERROR: {}", self.filename, pos, message));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn flush_to_stderr(&mut self) {
        for line in self.lines.drain(..) {
            eprintln!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_renders_file_line_col_prefix() {
        let mut r = Reporter::new("input.js");
        r.report(Pos::new(3, 7), &ErrorKind::UnexpectedEof);
        assert_eq!(r.count, 1);
        assert_eq!(r.lines()[0], "input.js@3,7: ERROR: unexpected EOF");
    }

    #[test]
    fn unknown_attribute_hint_wording() {
        let kind = ErrorKind::UnknownAttribute {
            element: "esi:include".to_string(),
            attribute: "onError".to_string(),
            hint: Some("onerror".to_string()),
        };
        let msg = kind.to_string();
        assert!(msg.contains("does not accept attribute"));
        assert!(msg.contains("did you mean \"onerror\"?"));
    }

    #[test]
    fn include_parameter_wording_for_js_side() {
        let kind = ErrorKind::MissingAttribute {
            element: "include".to_string(),
            attribute: "src".to_string(),
        };
        assert_eq!(kind.to_string(), "\"include\" requires parameter \"src\"");
    }
}
