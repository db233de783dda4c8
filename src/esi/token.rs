use crate::error::Pos;

/// The `<esi:...>` vocabulary. Simple elements never carry attributes, so
/// they lex as whole open/empty/close tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Assign,
    Debug,
    Include,
    Eval,
    Vars,
    Try,
    Attempt,
    Except,
    Foreach,
    Break,
    Choose,
    When,
    Otherwise,
    Comment,
    Function,
    Return,
}

impl Element {
    pub fn from_name(name: &str) -> Option<Element> {
        Some(match name {
            "assign" => Element::Assign,
            "debug" => Element::Debug,
            "include" => Element::Include,
            "eval" => Element::Eval,
            "vars" => Element::Vars,
            "try" => Element::Try,
            "attempt" => Element::Attempt,
            "except" => Element::Except,
            "foreach" => Element::Foreach,
            "break" => Element::Break,
            "choose" => Element::Choose,
            "when" => Element::When,
            "otherwise" => Element::Otherwise,
            "comment" => Element::Comment,
            "function" => Element::Function,
            "return" => Element::Return,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Element::Assign => "assign",
            Element::Debug => "debug",
            Element::Include => "include",
            Element::Eval => "eval",
            Element::Vars => "vars",
            Element::Try => "try",
            Element::Attempt => "attempt",
            Element::Except => "except",
            Element::Foreach => "foreach",
            Element::Break => "break",
            Element::Choose => "choose",
            Element::When => "when",
            Element::Otherwise => "otherwise",
            Element::Comment => "comment",
            Element::Function => "function",
            Element::Return => "return",
        }
    }

    pub fn is_simple(self) -> bool {
        matches!(
            self,
            Element::Debug
                | Element::Try
                | Element::Attempt
                | Element::Except
                | Element::Break
                | Element::Choose
                | Element::Otherwise
        )
    }
}

/// Recognized attribute names. The attribute decides which lexer mode its
/// value is read in: raw text, vars-interpolated text, or expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attr {
    Name,
    Value,
    Text,
    Src,
    Alt,
    Dca,
    OnError,
    MaxWait,
    Ttl,
    NoStore,
    AppendHeader,
    RemoveHeader,
    SetHeader,
    Method,
    Entity,
    Collection,
    Item,
    Test,
    MatchName,
}

impl Attr {
    pub fn from_name(name: &str) -> Option<Attr> {
        Some(match name {
            "name" => Attr::Name,
            "value" => Attr::Value,
            "text" => Attr::Text,
            "src" => Attr::Src,
            "alt" => Attr::Alt,
            "dca" => Attr::Dca,
            "onerror" => Attr::OnError,
            "maxwait" => Attr::MaxWait,
            "ttl" => Attr::Ttl,
            "no-store" => Attr::NoStore,
            "appendheader" => Attr::AppendHeader,
            "removeheader" => Attr::RemoveHeader,
            "setheader" => Attr::SetHeader,
            "method" => Attr::Method,
            "entity" => Attr::Entity,
            "collection" => Attr::Collection,
            "item" => Attr::Item,
            "test" => Attr::Test,
            "matchname" => Attr::MatchName,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Attr::Name => "name",
            Attr::Value => "value",
            Attr::Text => "text",
            Attr::Src => "src",
            Attr::Alt => "alt",
            Attr::Dca => "dca",
            Attr::OnError => "onerror",
            Attr::MaxWait => "maxwait",
            Attr::Ttl => "ttl",
            Attr::NoStore => "no-store",
            Attr::AppendHeader => "appendheader",
            Attr::RemoveHeader => "removeheader",
            Attr::SetHeader => "setheader",
            Attr::Method => "method",
            Attr::Entity => "entity",
            Attr::Collection => "collection",
            Attr::Item => "item",
            Attr::Test => "test",
            Attr::MatchName => "matchname",
        }
    }

    /// Canonical include-parameter name, where one exists.
    pub fn include_param(self) -> Option<&'static str> {
        Some(match self {
            Attr::Src => "src",
            Attr::Alt => "alt",
            Attr::Dca => "dca",
            Attr::OnError => "onError",
            Attr::MaxWait => "maxWait",
            Attr::Ttl => "ttl",
            Attr::NoStore => "noStore",
            Attr::AppendHeader => "appendHeader",
            Attr::RemoveHeader => "removeHeader",
            Attr::SetHeader => "setHeader",
            Attr::Method => "method",
            Attr::Entity => "entity",
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EsiTokenKind {
    /// `<esi:NAME` with attributes to follow.
    Start(Element),
    /// `<esi:NAME>` of a simple element.
    Open(Element),
    /// `</esi:NAME>`.
    Close(Element),
    /// `<esi:NAME/>` of a simple element.
    Empty(Element),
    /// `name="` of a recognized attribute.
    Attr(Attr),
    /// `name="` of an unrecognized attribute.
    UnknownAttr(String),
    /// `>` closing an open tag.
    TagEnd,
    /// `/>` closing an empty tag.
    TagEmpty,
    /// Raw or quoted text; whitespace-only text is skippable between
    /// structural elements.
    Text(String),
    Number(i64),
    Symbol(String),
    /// `$(name` — key/default/closing paren follow as expression tokens.
    VarRefOpen(String),
    /// `$(name)`.
    VarRefClosed(String),
    /// `$name(` — arguments follow as an expression list.
    FuncCall(String),
    Dollar,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Pipe,
    Comma,
    Colon,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Range,
    Not,
    AndAnd,
    OrOr,
    Tilde,
    Amp,
    Caret,
    Shl,
    Shr,
    Has,
    HasI,
    Matches,
    MatchesI,
    Eof,
}

impl EsiTokenKind {
    pub fn is_ws_text(&self) -> bool {
        matches!(self, EsiTokenKind::Text(t) if !t.is_empty() && t.chars().all(char::is_whitespace))
    }

    /// Token class name shown in the `-l` trace.
    pub fn name(&self) -> String {
        match self {
            EsiTokenKind::Start(el) => format!("s{}", el.name().to_uppercase()),
            EsiTokenKind::Open(el) => format!("o{}", el.name().to_uppercase()),
            EsiTokenKind::Close(el) => format!("c{}", el.name().to_uppercase()),
            EsiTokenKind::Empty(el) => format!("e{}", el.name().to_uppercase()),
            EsiTokenKind::Attr(attr) => {
                let letters: String =
                    attr.name().chars().filter(|c| c.is_ascii_alphabetic()).collect();
                format!("a{}", letters.to_uppercase())
            }
            EsiTokenKind::UnknownAttr(_) => "ATTR".to_string(),
            EsiTokenKind::TagEnd => "xEND".to_string(),
            EsiTokenKind::TagEmpty => "xEMPTY".to_string(),
            EsiTokenKind::Text(_) => {
                if self.is_ws_text() { "WS" } else { "STRING" }.to_string()
            }
            EsiTokenKind::Number(_) => "NUMBER".to_string(),
            EsiTokenKind::Symbol(_) => "SYMBOL".to_string(),
            EsiTokenKind::VarRefOpen(_) | EsiTokenKind::VarRefClosed(_) => "VARREF".to_string(),
            EsiTokenKind::FuncCall(_) => "FUNCCALL".to_string(),
            EsiTokenKind::Dollar => "DOLLAR".to_string(),
            EsiTokenKind::LParen => "LPAREN".to_string(),
            EsiTokenKind::RParen => "RPAREN".to_string(),
            EsiTokenKind::LBrace => "LBRACE".to_string(),
            EsiTokenKind::RBrace => "RBRACE".to_string(),
            EsiTokenKind::LBracket => "LBRACKET".to_string(),
            EsiTokenKind::RBracket => "RBRACKET".to_string(),
            EsiTokenKind::Pipe => "PIPE".to_string(),
            EsiTokenKind::Comma => "COMMA".to_string(),
            EsiTokenKind::Colon => "COLON".to_string(),
            EsiTokenKind::EqEq => "EQUAL".to_string(),
            EsiTokenKind::NotEq => "NOTEQUAL".to_string(),
            EsiTokenKind::Lt => "LESSERTHAN".to_string(),
            EsiTokenKind::Le => "LESSEROREQUAL".to_string(),
            EsiTokenKind::Gt => "GREATERTHAN".to_string(),
            EsiTokenKind::Ge => "GREATEROREQUAL".to_string(),
            EsiTokenKind::Plus => "PLUS".to_string(),
            EsiTokenKind::Minus => "MINUS".to_string(),
            EsiTokenKind::Star => "MULTIPLY".to_string(),
            EsiTokenKind::Slash => "DIVIDE".to_string(),
            EsiTokenKind::Percent => "MODULUS".to_string(),
            EsiTokenKind::Range => "RANGE".to_string(),
            EsiTokenKind::Not => "NOT".to_string(),
            EsiTokenKind::AndAnd => "AND".to_string(),
            EsiTokenKind::OrOr => "OR".to_string(),
            EsiTokenKind::Tilde => "BITWISENOT".to_string(),
            EsiTokenKind::Amp => "BITWISEAND".to_string(),
            EsiTokenKind::Caret => "BITWISEXOR".to_string(),
            EsiTokenKind::Shl => "SHIFTLEFT".to_string(),
            EsiTokenKind::Shr => "SHIFTRIGHT".to_string(),
            EsiTokenKind::Has => "HAS".to_string(),
            EsiTokenKind::HasI => "HAS_I".to_string(),
            EsiTokenKind::Matches => "MATCHES".to_string(),
            EsiTokenKind::MatchesI => "MATCHES_I".to_string(),
            EsiTokenKind::Eof => "EOF".to_string(),
        }
    }

    /// Surface text for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            EsiTokenKind::Start(el) => format!("<esi:{}", el.name()),
            EsiTokenKind::Open(el) => format!("<esi:{}>", el.name()),
            EsiTokenKind::Close(el) => format!("</esi:{}>", el.name()),
            EsiTokenKind::Empty(el) => format!("<esi:{}/>", el.name()),
            EsiTokenKind::Attr(attr) => format!("{}=\"", attr.name()),
            EsiTokenKind::UnknownAttr(name) => format!("{}=\"", name),
            EsiTokenKind::TagEnd => ">".to_string(),
            EsiTokenKind::TagEmpty => "/>".to_string(),
            EsiTokenKind::Text(t) => t.clone(),
            EsiTokenKind::Number(n) => n.to_string(),
            EsiTokenKind::Symbol(s) => s.clone(),
            EsiTokenKind::VarRefOpen(name) => format!("$({}", name),
            EsiTokenKind::VarRefClosed(name) => format!("$({})", name),
            EsiTokenKind::FuncCall(name) => format!("${}(", name),
            EsiTokenKind::Eof => "EOF".to_string(),
            other => other.name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EsiToken {
    pub kind: EsiTokenKind,
    pub pos: Pos,
}

impl EsiToken {
    pub fn new(kind: EsiTokenKind, pos: Pos) -> Self {
        EsiToken { kind, pos }
    }
}
