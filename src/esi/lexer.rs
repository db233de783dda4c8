//! Stateful ESI lexer. An explicit stack of modes drives the matcher:
//! raw text, the inside of an XML tag, the three attribute-value flavors,
//! vars-interpolated bodies, and the expression sub-grammar each tokenize
//! differently, and tags/quotes/parens push and pop modes.

use crate::error::{ErrorKind, Pos, Reporter};
use crate::esi::token::{Attr, Element, EsiToken, EsiTokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Initial,
    XmlAttr,
    AttrValue,
    AttrText,
    AttrVars,
    Vars,
    Expr,
    ExprList,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Mode::Initial => "initial",
            Mode::XmlAttr => "xmlattr",
            Mode::AttrValue => "xmlattrvalue",
            Mode::AttrText => "xmlattrtext",
            Mode::AttrVars => "xmlattrvars",
            Mode::Vars => "vars",
            Mode::Expr => "expr",
            Mode::ExprList => "exprlist",
        }
    }
}

pub struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    line_start: usize,
    modes: Vec<Mode>,
    /// Element of the tag whose attributes are being lexed.
    element: Option<Element>,
    reporter: &'a mut Reporter,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, reporter: &'a mut Reporter) -> Self {
        Lexer {
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            line_start: 0,
            modes: Vec::new(),
            element: None,
            reporter,
        }
    }

    pub fn tokenize(self) -> Vec<EsiToken> {
        self.tokenize_with_modes().into_iter().map(|(token, _)| token).collect()
    }

    /// Tokens paired with the lexer mode active after each one; the `-l`
    /// trace prints mode transitions.
    pub fn tokenize_with_modes(mut self) -> Vec<(EsiToken, &'static str)> {
        let mut tokens = Vec::new();
        loop {
            match self.next_token() {
                Some(token) => {
                    let done = token.kind == EsiTokenKind::Eof;
                    tokens.push((token, self.mode().name()));
                    if done {
                        return tokens;
                    }
                }
                None => continue,
            }
        }
    }

    fn mode(&self) -> Mode {
        self.modes.last().copied().unwrap_or(Mode::Initial)
    }

    fn push_mode(&mut self, mode: Mode) {
        self.modes.push(mode);
    }

    fn pop_mode(&mut self) {
        self.modes.pop();
    }

    /// Pops through any attribute-value leftovers up to and including the
    /// enclosing xmlattr mode.
    fn pop_xmlattr(&mut self) {
        while let Some(mode) = self.modes.pop() {
            if mode == Mode::XmlAttr {
                return;
            }
        }
    }

    fn here(&self) -> Pos {
        Pos::new(self.line, (self.pos - self.line_start + 1) as u32)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(b)
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    fn illegal(&mut self) {
        let pos = self.here();
        let ch = self.bytes[self.pos] as char;
        let state = self.mode().name();
        self.reporter.report(pos, &ErrorKind::IllegalChar { ch, state });
        self.bump();
    }

    /// Returns the next token, or None after consuming non-token input
    /// (skipped whitespace, closing quotes, mode switches).
    fn next_token(&mut self) -> Option<EsiToken> {
        let pos = self.here();
        if self.peek().is_none() {
            return Some(EsiToken::new(EsiTokenKind::Eof, pos));
        }
        match self.mode() {
            Mode::Initial => self.text_mode(pos, false, false),
            Mode::Vars => self.text_mode(pos, true, false),
            Mode::AttrVars => self.text_mode(pos, true, true),
            Mode::AttrText => self.attr_text(pos),
            Mode::XmlAttr => self.xml_attr(pos),
            Mode::AttrValue | Mode::Expr | Mode::ExprList => self.expr_mode(pos),
        }
    }

    // ------------------------------------------------------------------
    // raw-text flavored modes

    fn text_mode(&mut self, pos: Pos, vars: bool, in_attr: bool) -> Option<EsiToken> {
        let rest = self.rest();
        match rest[0] {
            b'"' if in_attr => {
                self.bump();
                self.pop_mode();
                None
            }
            b'\\' => {
                self.bump();
                if self.peek().is_none() {
                    return None;
                }
                let c = self.char_at_pos();
                Some(EsiToken::new(EsiTokenKind::Text(c), pos))
            }
            b'$' if vars => self.dollar(pos),
            b'<' if !in_attr && (rest.starts_with(b"<esi:") || rest.starts_with(b"</esi:")) => {
                self.element_token(pos)
            }
            _ => {
                let text = self.text_run(vars, in_attr);
                Some(EsiToken::new(EsiTokenKind::Text(text), pos))
            }
        }
    }

    /// Consumes the escaped character after a backslash.
    fn char_at_pos(&mut self) -> String {
        let start = self.pos;
        self.bump();
        while let Some(b) = self.peek() {
            if b & 0xc0 == 0x80 {
                self.bump();
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    /// A run of plain characters; an optional leading `<` that does not
    /// begin an esi tag is part of the text.
    fn text_run(&mut self, vars: bool, in_attr: bool) -> String {
        let start = self.pos;
        if !in_attr && self.peek() == Some(b'<') {
            self.bump();
        }
        while let Some(b) = self.peek() {
            let stop = match b {
                b'\\' => true,
                b'<' if !in_attr => true,
                b'$' if vars => true,
                b'"' if in_attr => true,
                _ => false,
            };
            if stop {
                break;
            }
            self.bump();
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn dollar(&mut self, pos: Pos) -> Option<EsiToken> {
        for (literal, replacement) in
            [("$dollar", "$"), ("$dquote", "\""), ("$squote", "'")]
        {
            if let Some(len) = self.escape_func_len(literal) {
                self.bump_n(len);
                return Some(EsiToken::new(
                    EsiTokenKind::Text(replacement.to_string()),
                    pos,
                ));
            }
        }
        let rest = self.rest();
        if rest.starts_with(b"$(") {
            if let Some((name, len)) = scan_ref_name(&rest[2..]) {
                self.bump_n(2 + len);
                if self.peek() == Some(b')') {
                    self.bump();
                    return Some(EsiToken::new(EsiTokenKind::VarRefClosed(name), pos));
                }
                self.push_mode(Mode::Expr);
                return Some(EsiToken::new(EsiTokenKind::VarRefOpen(name), pos));
            }
        }
        if let Some((name, len)) = scan_ref_name(&rest[1..]) {
            if rest.get(1 + len) == Some(&b'(') {
                self.bump_n(2 + len);
                self.push_mode(Mode::ExprList);
                return Some(EsiToken::new(EsiTokenKind::FuncCall(name), pos));
            }
        }
        self.illegal();
        None
    }

    /// Length of `$NAME([ws]*)` if the escape-function form matches.
    fn escape_func_len(&self, name: &str) -> Option<usize> {
        let rest = self.rest();
        if !rest.starts_with(name.as_bytes()) {
            return None;
        }
        let mut idx = name.len();
        if rest.get(idx) != Some(&b'(') {
            return None;
        }
        idx += 1;
        while matches!(rest.get(idx), Some(b' ' | b'\t' | b'\n')) {
            idx += 1;
        }
        if rest.get(idx) == Some(&b')') {
            Some(idx + 1)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // tags

    /// `<esi:NAME`, `<esi:NAME>`, `<esi:NAME/>`, `</esi:NAME>`. A tag that
    /// fails to complete is raw text.
    fn element_token(&mut self, pos: Pos) -> Option<EsiToken> {
        let rest = self.rest();
        let closing = rest.starts_with(b"</");
        let name_at = if closing { 6 } else { 5 };
        let mut idx = name_at;
        while matches!(rest.get(idx), Some(b) if b.is_ascii_lowercase()) {
            idx += 1;
        }
        let name = std::str::from_utf8(&rest[name_at..idx]).unwrap_or("");
        let element = Element::from_name(name);
        let mut end = idx;
        while matches!(rest.get(end), Some(b' ' | b'\t' | b'\n')) {
            end += 1;
        }

        if let Some(element) = element {
            if closing {
                if rest.get(end) == Some(&b'>') {
                    self.bump_n(end + 1);
                    self.pop_mode();
                    self.element = None;
                    return Some(EsiToken::new(EsiTokenKind::Close(element), pos));
                }
            } else if element.is_simple() {
                if rest.get(end) == Some(&b'>') {
                    self.bump_n(end + 1);
                    self.push_mode(Mode::Vars);
                    return Some(EsiToken::new(EsiTokenKind::Open(element), pos));
                }
                if rest.get(end) == Some(&b'/') && rest.get(end + 1) == Some(&b'>') {
                    self.bump_n(end + 2);
                    return Some(EsiToken::new(EsiTokenKind::Empty(element), pos));
                }
            } else {
                self.bump_n(end);
                self.element = Some(element);
                self.push_mode(Mode::XmlAttr);
                return Some(EsiToken::new(EsiTokenKind::Start(element), pos));
            }
        }

        // Not a recognizable tag: emit text starting at the '<'.
        let text = self.text_run_after_lt();
        Some(EsiToken::new(EsiTokenKind::Text(text), pos))
    }

    fn text_run_after_lt(&mut self) -> String {
        let start = self.pos;
        self.bump();
        while let Some(b) = self.peek() {
            if b == b'<' || b == b'\\' || (b == b'$' && matches!(self.mode(), Mode::Vars)) {
                break;
            }
            self.bump();
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn xml_attr(&mut self, pos: Pos) -> Option<EsiToken> {
        match self.peek()? {
            b' ' | b'\t' | b'\n' | b'"' => {
                self.bump();
                None
            }
            b'>' => {
                self.bump();
                self.pop_xmlattr();
                let element = self.element.take();
                self.push_mode(if element == Some(Element::Assign) {
                    Mode::Expr
                } else {
                    Mode::Vars
                });
                Some(EsiToken::new(EsiTokenKind::TagEnd, pos))
            }
            b'/' if self.rest().starts_with(b"/>") => {
                self.bump_n(2);
                self.pop_xmlattr();
                self.element = None;
                Some(EsiToken::new(EsiTokenKind::TagEmpty, pos))
            }
            b if b.is_ascii_alphabetic() => self.attr_name(pos),
            _ => {
                self.illegal();
                None
            }
        }
    }

    fn attr_name(&mut self, pos: Pos) -> Option<EsiToken> {
        let rest = self.rest();
        let mut idx = 1;
        while matches!(rest.get(idx), Some(b) if b.is_ascii_alphanumeric() || *b == b'-') {
            idx += 1;
        }
        let name = std::str::from_utf8(&rest[..idx]).unwrap_or("").to_string();
        let mut end = idx;
        while matches!(rest.get(end), Some(b' ' | b'\t' | b'\n')) {
            end += 1;
        }
        if rest.get(end) != Some(&b'=') {
            self.illegal();
            return None;
        }
        end += 1;
        while matches!(rest.get(end), Some(b' ' | b'\t' | b'\n')) {
            end += 1;
        }
        if rest.get(end) != Some(&b'"') {
            self.illegal();
            return None;
        }
        self.bump_n(end + 1);
        match Attr::from_name(&name) {
            Some(attr) => {
                self.push_mode(match attr {
                    Attr::Text | Attr::MatchName => Mode::AttrText,
                    Attr::Src
                    | Attr::Alt
                    | Attr::Dca
                    | Attr::OnError
                    | Attr::MaxWait
                    | Attr::Ttl
                    | Attr::NoStore
                    | Attr::AppendHeader
                    | Attr::RemoveHeader
                    | Attr::SetHeader
                    | Attr::Method
                    | Attr::Entity => Mode::AttrVars,
                    _ => Mode::AttrValue,
                });
                Some(EsiToken::new(EsiTokenKind::Attr(attr), pos))
            }
            None => {
                // Consume the value anyway so parsing can continue past
                // the bad attribute.
                self.push_mode(Mode::AttrVars);
                Some(EsiToken::new(EsiTokenKind::UnknownAttr(name), pos))
            }
        }
    }

    fn attr_text(&mut self, pos: Pos) -> Option<EsiToken> {
        if self.peek() == Some(b'"') {
            self.bump();
            self.pop_mode();
            return None;
        }
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'"' {
                break;
            }
            self.bump();
        }
        let text = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        Some(EsiToken::new(EsiTokenKind::Text(text), pos))
    }

    // ------------------------------------------------------------------
    // expression modes

    fn expr_mode(&mut self, pos: Pos) -> Option<EsiToken> {
        let rest = self.rest();
        match rest[0] {
            b' ' | b'\t' | b'\n' => {
                self.bump();
                None
            }
            b'"' if self.mode() == Mode::AttrValue => {
                self.bump();
                self.pop_mode();
                None
            }
            b'\'' => self.quoted_string(pos),
            open @ (b'(' | b'{' | b'[') => {
                self.bump();
                let kind = match open {
                    b'(' => EsiTokenKind::LParen,
                    b'{' => EsiTokenKind::LBrace,
                    _ => EsiTokenKind::LBracket,
                };
                self.push_mode(Mode::Expr);
                Some(EsiToken::new(kind, pos))
            }
            close @ (b')' | b'}' | b']') if self.mode() != Mode::AttrValue => {
                self.bump();
                let kind = match close {
                    b')' => EsiTokenKind::RParen,
                    b'}' => EsiTokenKind::RBrace,
                    _ => EsiTokenKind::RBracket,
                };
                self.pop_mode();
                Some(EsiToken::new(kind, pos))
            }
            b'0'..=b'9' => {
                let start = self.pos;
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.bump();
                }
                let digits = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("0");
                match digits.parse::<i64>() {
                    Ok(n) => Some(EsiToken::new(EsiTokenKind::Number(n), pos)),
                    Err(_) => {
                        self.reporter.report(pos, &"number literal out of range");
                        Some(EsiToken::new(EsiTokenKind::Number(0), pos))
                    }
                }
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let start = self.pos;
                while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
                    self.bump();
                }
                let word = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
                let kind = match word {
                    "has" => EsiTokenKind::Has,
                    "has_i" => EsiTokenKind::HasI,
                    "matches" => EsiTokenKind::Matches,
                    "matches_i" => EsiTokenKind::MatchesI,
                    other => EsiTokenKind::Symbol(other.to_string()),
                };
                Some(EsiToken::new(kind, pos))
            }
            b'<' if rest.starts_with(b"<!--") => {
                // XML comments inside expressions are dropped.
                match find_sub(rest, b"-->") {
                    Some(end) => self.bump_n(end + 3),
                    None => self.bump_n(rest.len()),
                }
                None
            }
            b'<' if rest.starts_with(b"<esi:") || rest.starts_with(b"</esi:") => {
                self.element_token(pos)
            }
            _ => {
                let table: &[(&[u8], EsiTokenKind)] = &[
                    (b"==", EsiTokenKind::EqEq),
                    (b"!=", EsiTokenKind::NotEq),
                    (b"<<", EsiTokenKind::Shl),
                    (b">>", EsiTokenKind::Shr),
                    (b"<=", EsiTokenKind::Le),
                    (b">=", EsiTokenKind::Ge),
                    (b"&&", EsiTokenKind::AndAnd),
                    (b"||", EsiTokenKind::OrOr),
                    (b"..", EsiTokenKind::Range),
                    (b"<", EsiTokenKind::Lt),
                    (b">", EsiTokenKind::Gt),
                    (b"+", EsiTokenKind::Plus),
                    (b"-", EsiTokenKind::Minus),
                    (b"*", EsiTokenKind::Star),
                    (b"/", EsiTokenKind::Slash),
                    (b"%", EsiTokenKind::Percent),
                    (b"!", EsiTokenKind::Not),
                    (b"~", EsiTokenKind::Tilde),
                    (b"&", EsiTokenKind::Amp),
                    (b"^", EsiTokenKind::Caret),
                    (b"|", EsiTokenKind::Pipe),
                    (b"$", EsiTokenKind::Dollar),
                    (b",", EsiTokenKind::Comma),
                    (b":", EsiTokenKind::Colon),
                ];
                for (text, kind) in table {
                    if rest.starts_with(text) {
                        self.bump_n(text.len());
                        return Some(EsiToken::new(kind.clone(), pos));
                    }
                }
                self.illegal();
                None
            }
        }
    }

    fn quoted_string(&mut self, pos: Pos) -> Option<EsiToken> {
        let rest = self.rest();
        if rest.starts_with(b"'''") {
            if let Some(end) = find_sub(&rest[3..], b"'''") {
                let text = String::from_utf8_lossy(&rest[3..3 + end]).into_owned();
                self.bump_n(3 + end + 3);
                return Some(EsiToken::new(EsiTokenKind::Text(text), pos));
            }
            self.reporter.report(pos, &"unterminated string literal");
            self.bump_n(rest.len());
            return None;
        }
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => {
                    self.reporter.report(pos, &"unterminated string literal");
                    return None;
                }
                Some(b'\'') => return Some(EsiToken::new(EsiTokenKind::Text(text), pos)),
                Some(b'\\') => match self.bump() {
                    None => {
                        self.reporter.report(pos, &"unterminated string literal");
                        return None;
                    }
                    Some(c) => text.push(c as char),
                },
                Some(b) if b.is_ascii() => text.push(b as char),
                Some(b) => {
                    let mut buf = vec![b];
                    while let Some(next) = self.peek() {
                        if next & 0xc0 == 0x80 {
                            buf.push(next);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    text.push_str(&String::from_utf8_lossy(&buf));
                }
            }
        }
    }
}

/// `$(name` / `$name(` identifier: letters, digits, `_`, `-`.
fn scan_ref_name(bytes: &[u8]) -> Option<(String, usize)> {
    let first = *bytes.first()?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let mut idx = 1;
    while matches!(bytes.get(idx), Some(b) if b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
    {
        idx += 1;
    }
    Some((String::from_utf8_lossy(&bytes[..idx]).into_owned(), idx))
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> (Vec<EsiTokenKind>, usize) {
        let mut reporter = Reporter::new("<test>");
        let tokens = Lexer::new(source, &mut reporter).tokenize();
        (tokens.into_iter().map(|t| t.kind).collect(), reporter.count)
    }

    #[test]
    fn assign_attribute_form() {
        let (kinds, errors) = lex("<esi:assign name=\"v\" value=\"4\"/>");
        assert_eq!(errors, 0);
        assert_eq!(
            kinds,
            vec![
                EsiTokenKind::Start(Element::Assign),
                EsiTokenKind::Attr(Attr::Name),
                EsiTokenKind::Symbol("v".into()),
                EsiTokenKind::Attr(Attr::Value),
                EsiTokenKind::Number(4),
                EsiTokenKind::TagEmpty,
                EsiTokenKind::Eof,
            ]
        );
    }

    #[test]
    fn assign_body_form_switches_to_expr() {
        let (kinds, errors) = lex("<esi:assign name=\"v\">'a'+'b'</esi:assign>");
        assert_eq!(errors, 0);
        assert_eq!(
            kinds,
            vec![
                EsiTokenKind::Start(Element::Assign),
                EsiTokenKind::Attr(Attr::Name),
                EsiTokenKind::Symbol("v".into()),
                EsiTokenKind::TagEnd,
                EsiTokenKind::Text("a".into()),
                EsiTokenKind::Plus,
                EsiTokenKind::Text("b".into()),
                EsiTokenKind::Close(Element::Assign),
                EsiTokenKind::Eof,
            ]
        );
    }

    #[test]
    fn simple_elements_lex_whole() {
        let (kinds, _) = lex("<esi:try><esi:attempt>x</esi:attempt></esi:try><esi:break/>");
        assert_eq!(kinds[0], EsiTokenKind::Open(Element::Try));
        assert_eq!(kinds[1], EsiTokenKind::Open(Element::Attempt));
        assert_eq!(kinds[2], EsiTokenKind::Text("x".into()));
        assert_eq!(kinds[3], EsiTokenKind::Close(Element::Attempt));
        assert_eq!(kinds[4], EsiTokenKind::Close(Element::Try));
        assert_eq!(kinds[5], EsiTokenKind::Empty(Element::Break));
    }

    #[test]
    fn vars_body_recognizes_interpolation() {
        let (kinds, errors) = lex("<esi:vars>a $(HTTP_HOST) $fn(1)</esi:vars>");
        assert_eq!(errors, 0);
        assert_eq!(kinds[0], EsiTokenKind::Start(Element::Vars));
        assert_eq!(kinds[1], EsiTokenKind::TagEnd);
        assert_eq!(kinds[2], EsiTokenKind::Text("a ".into()));
        assert_eq!(kinds[3], EsiTokenKind::VarRefClosed("HTTP_HOST".into()));
        assert_eq!(kinds[4], EsiTokenKind::Text(" ".into()));
        assert_eq!(kinds[5], EsiTokenKind::FuncCall("fn".into()));
        assert_eq!(kinds[6], EsiTokenKind::Number(1));
        assert_eq!(kinds[7], EsiTokenKind::RParen);
        assert_eq!(kinds[8], EsiTokenKind::Close(Element::Vars));
    }

    #[test]
    fn varref_with_key_opens_expression() {
        let (kinds, errors) = lex("<esi:vars>$(d{'k'}|'d')</esi:vars>");
        assert_eq!(errors, 0);
        assert_eq!(kinds[2], EsiTokenKind::VarRefOpen("d".into()));
        assert_eq!(kinds[3], EsiTokenKind::LBrace);
        assert_eq!(kinds[4], EsiTokenKind::Text("k".into()));
        assert_eq!(kinds[5], EsiTokenKind::RBrace);
        assert_eq!(kinds[6], EsiTokenKind::Pipe);
        assert_eq!(kinds[7], EsiTokenKind::Text("d".into()));
        assert_eq!(kinds[8], EsiTokenKind::RParen);
    }

    #[test]
    fn escape_functions_become_characters() {
        let (kinds, _) = lex("<esi:vars>$dollar()$squote()$dquote()</esi:vars>");
        assert_eq!(kinds[2], EsiTokenKind::Text("$".into()));
        assert_eq!(kinds[3], EsiTokenKind::Text("'".into()));
        assert_eq!(kinds[4], EsiTokenKind::Text("\"".into()));
    }

    #[test]
    fn backslash_escapes_single_character() {
        let (kinds, _) = lex("a\\$(b)c");
        assert_eq!(kinds[0], EsiTokenKind::Text("a".into()));
        assert_eq!(kinds[1], EsiTokenKind::Text("$".into()));
        assert_eq!(kinds[2], EsiTokenKind::Text("(b)c".into()));
    }

    #[test]
    fn top_level_interpolation_is_plain_text() {
        let (kinds, errors) = lex("hello $(HTTP_HOST)");
        assert_eq!(errors, 0);
        assert_eq!(kinds[0], EsiTokenKind::Text("hello $(HTTP_HOST)".into()));
    }

    #[test]
    fn non_esi_markup_is_text() {
        let (kinds, _) = lex("<div><esi:break/></div>");
        assert_eq!(kinds[0], EsiTokenKind::Text("<div>".into()));
        assert_eq!(kinds[1], EsiTokenKind::Empty(Element::Break));
        assert_eq!(kinds[2], EsiTokenKind::Text("</div>".into()));
    }

    #[test]
    fn include_attrs_use_vars_mode() {
        let (kinds, errors) = lex("<esi:include src=\"/x?h=$(HTTP_HOST)\" maxwait=\"300\"/>");
        assert_eq!(errors, 0);
        assert_eq!(kinds[0], EsiTokenKind::Start(Element::Include));
        assert_eq!(kinds[1], EsiTokenKind::Attr(Attr::Src));
        assert_eq!(kinds[2], EsiTokenKind::Text("/x?h=".into()));
        assert_eq!(kinds[3], EsiTokenKind::VarRefClosed("HTTP_HOST".into()));
        assert_eq!(kinds[4], EsiTokenKind::Attr(Attr::MaxWait));
        assert_eq!(kinds[5], EsiTokenKind::Text("300".into()));
        assert_eq!(kinds[6], EsiTokenKind::TagEmpty);
    }

    #[test]
    fn unknown_attribute_is_flagged_and_value_consumed() {
        let (kinds, _) = lex("<esi:include src=\"/a\" badattr=\"zz\"/>");
        assert!(kinds.contains(&EsiTokenKind::UnknownAttr("badattr".into())));
        assert_eq!(*kinds.last().unwrap(), EsiTokenKind::Eof);
        assert_eq!(kinds[kinds.len() - 2], EsiTokenKind::TagEmpty);
    }

    #[test]
    fn comment_text_is_raw() {
        let (kinds, _) = lex("<esi:comment text=\"a $(b) \\ c\"/>");
        assert_eq!(kinds[1], EsiTokenKind::Attr(Attr::Text));
        assert_eq!(kinds[2], EsiTokenKind::Text("a $(b) \\ c".into()));
    }

    #[test]
    fn when_test_lexes_expressions() {
        let (kinds, errors) =
            lex("<esi:choose><esi:when test=\"$(a) matches 'x'\">y</esi:when></esi:choose>");
        assert_eq!(errors, 0);
        assert_eq!(kinds[0], EsiTokenKind::Open(Element::Choose));
        assert_eq!(kinds[1], EsiTokenKind::Start(Element::When));
        assert_eq!(kinds[2], EsiTokenKind::Attr(Attr::Test));
        assert_eq!(kinds[3], EsiTokenKind::Dollar);
        assert_eq!(kinds[4], EsiTokenKind::LParen);
        assert_eq!(kinds[5], EsiTokenKind::Symbol("a".into()));
        assert_eq!(kinds[6], EsiTokenKind::RParen);
        assert_eq!(kinds[7], EsiTokenKind::Matches);
        assert_eq!(kinds[8], EsiTokenKind::Text("x".into()));
        assert_eq!(kinds[9], EsiTokenKind::TagEnd);
        assert_eq!(kinds[10], EsiTokenKind::Text("y".into()));
        assert_eq!(kinds[11], EsiTokenKind::Close(Element::When));
        assert_eq!(kinds[12], EsiTokenKind::Close(Element::Choose));
    }

    #[test]
    fn triple_quoted_strings_in_expressions() {
        let (kinds, errors) = lex("<esi:assign name=\"v\">'''a\nb'''</esi:assign>");
        assert_eq!(errors, 0);
        assert_eq!(kinds[4], EsiTokenKind::Text("a\nb".into()));
    }
}
