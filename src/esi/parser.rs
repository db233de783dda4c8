//! Recursive-descent parser for ESI templates. Raw text becomes Output
//! statements, choose/when chains fold into right-nested Ifs, and include
//! attributes are normalised onto the shared attribute bag.

use crate::ast::{Block, Expr, FunctionDef, If, Include, Op, Output, Stmt, Value};
use crate::error::{Error, ErrorKind, Pos, Reporter};
use crate::esi::token::{Attr, Element, EsiToken, EsiTokenKind};
use crate::suggest::did_you_mean;

pub type ParseResult<T> = Result<T, Error>;

/// XML-side names an include/eval element accepts.
const INCLUDE_ATTRS: &[&str] = &[
    "src", "alt", "dca", "onerror", "maxwait", "ttl", "no-store",
    "method", "entity", "appendheader", "removeheader", "setheader",
];

pub struct Parser<'a> {
    tokens: Vec<EsiToken>,
    pos: usize,
    reporter: &'a mut Reporter,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<EsiToken>, reporter: &'a mut Reporter) -> Self {
        Parser { tokens, pos: 0, reporter }
    }

    pub fn parse_program(&mut self) -> ParseResult<Block> {
        let mut block = Block::new();
        loop {
            match self.peek() {
                EsiTokenKind::Eof => return Ok(block),
                EsiTokenKind::Text(_) => {
                    let text = self.text_merge();
                    block.push(Stmt::Output(Output {
                        parts: vec![Expr::literal(text)],
                        raw: false,
                        vars: false,
                    }));
                }
                _ => {
                    if let Some(stmt) = self.esi_statement()? {
                        block.push(stmt);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // token plumbing

    fn peek(&self) -> &EsiTokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn here(&self) -> Pos {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> EsiTokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &EsiTokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &EsiTokenKind) -> ParseResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_symbol(&mut self) -> ParseResult<String> {
        if let EsiTokenKind::Symbol(name) = self.peek() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&mut self) -> Error {
        let pos = self.here();
        let kind = if matches!(self.peek(), EsiTokenKind::Eof) {
            ErrorKind::UnexpectedEof
        } else {
            ErrorKind::Syntax(format!(
                "unexpected parser {} token: \"{}\"",
                self.peek().name(),
                self.peek().describe()
            ))
        };
        self.reporter.report(pos, &kind);
        Error::at(kind, pos)
    }

    fn syntax_error(&mut self, message: String) -> Error {
        let pos = self.here();
        let kind = ErrorKind::Syntax(message);
        self.reporter.report(pos, &kind);
        Error::at(kind, pos)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_ws_text() {
            self.advance();
        }
    }

    /// Merges a run of adjacent text tokens.
    fn text_merge(&mut self) -> String {
        let mut text = String::new();
        while let EsiTokenKind::Text(piece) = self.peek() {
            text.push_str(piece);
            self.advance();
        }
        text
    }

    // ------------------------------------------------------------------
    // statements

    fn esi_statement(&mut self) -> ParseResult<Option<Stmt>> {
        match self.peek() {
            EsiTokenKind::Start(Element::Assign) => self.assign().map(Some),
            EsiTokenKind::Open(Element::Choose) => self.choose(),
            EsiTokenKind::Open(Element::Try) => self.try_block().map(Some),
            EsiTokenKind::Start(Element::Include) | EsiTokenKind::Start(Element::Eval) => {
                self.include().map(Some)
            }
            EsiTokenKind::Start(Element::Vars) => self.vars(),
            EsiTokenKind::Start(Element::Foreach) => self.foreach().map(Some),
            EsiTokenKind::Start(Element::Function) => self.function().map(Some),
            EsiTokenKind::Start(Element::Return) => self.return_element().map(Some),
            EsiTokenKind::Start(Element::Comment) => self.comment().map(Some),
            EsiTokenKind::Empty(Element::Break) => {
                self.advance();
                Ok(Some(Stmt::Break))
            }
            EsiTokenKind::Empty(Element::Debug) => {
                self.advance();
                Ok(Some(debug_passthrough()))
            }
            EsiTokenKind::Open(Element::Debug) => {
                self.advance();
                self.skip_ws();
                self.expect(&EsiTokenKind::Close(Element::Debug))?;
                Ok(Some(debug_passthrough()))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Body statements up to (and consuming) the matching close tag. Runs
    /// of text and interpolations become Output statements.
    fn statements_until(&mut self, close: Element) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                EsiTokenKind::Close(el) if *el == close => {
                    self.advance();
                    return Ok(stmts);
                }
                EsiTokenKind::Eof => return Err(self.unexpected()),
                EsiTokenKind::Text(_)
                | EsiTokenKind::VarRefOpen(_)
                | EsiTokenKind::VarRefClosed(_)
                | EsiTokenKind::FuncCall(_) => {
                    if let Some(expr) = self.vars_expr()? {
                        stmts.push(Stmt::Output(Output {
                            parts: vec![expr],
                            raw: false,
                            vars: false,
                        }));
                    }
                }
                _ => {
                    if let Some(stmt) = self.esi_statement()? {
                        stmts.push(stmt);
                    }
                }
            }
        }
    }

    fn assign(&mut self) -> ParseResult<Stmt> {
        self.expect(&EsiTokenKind::Start(Element::Assign))?;
        self.expect(&EsiTokenKind::Attr(Attr::Name))?;
        let (name, key) = self.assign_name()?;
        match self.peek() {
            EsiTokenKind::Attr(Attr::Value) => {
                self.advance();
                let value = self.expression()?;
                self.expect(&EsiTokenKind::TagEmpty)?;
                Ok(Stmt::Assign { name, key, value })
            }
            EsiTokenKind::TagEnd => {
                self.advance();
                let value = self.expression()?;
                self.expect(&EsiTokenKind::Close(Element::Assign))?;
                Ok(Stmt::Assign { name, key, value })
            }
            _ => Err(self.unexpected()),
        }
    }

    fn assign_name(&mut self) -> ParseResult<(String, Option<Expr>)> {
        let name = self.expect_symbol()?;
        let key = if self.eat(&EsiTokenKind::LBrace) {
            let key = self.expression()?;
            self.expect(&EsiTokenKind::RBrace)?;
            Some(key)
        } else {
            None
        };
        Ok((name, key))
    }

    /// `<esi:choose>`: when clauses fold from the tail into a right-nested
    /// If chain; a matchname hoists onto the first matches operator in its
    /// test.
    fn choose(&mut self) -> ParseResult<Option<Stmt>> {
        self.expect(&EsiTokenKind::Open(Element::Choose))?;
        let mut whens = Vec::new();
        self.skip_ws();
        while self.eat(&EsiTokenKind::Start(Element::When)) {
            self.expect(&EsiTokenKind::Attr(Attr::Test))?;
            let test = self.expression()?;
            let matchname = if self.eat(&EsiTokenKind::Attr(Attr::MatchName)) {
                Some((self.here(), self.text_merge()))
            } else {
                None
            };
            self.expect(&EsiTokenKind::TagEnd)?;
            let body = self.statements_until(Element::When)?;
            whens.push((test, stmts_to_stmt(body), matchname));
            self.skip_ws();
        }
        let otherwise = if self.eat(&EsiTokenKind::Open(Element::Otherwise)) {
            let body = self.statements_until(Element::Otherwise)?;
            self.skip_ws();
            stmts_to_stmt(body)
        } else {
            None
        };
        self.expect(&EsiTokenKind::Close(Element::Choose))?;

        let mut chain = otherwise;
        for (test, body, matchname) in whens.into_iter().rev() {
            let mut node = If::new(test, body, chain.take());
            if let Some((pos, name)) = matchname {
                if !set_first_match(&mut node.test, &name) {
                    return Err(Error::at(ErrorKind::DanglingMatchName(name), pos));
                }
            }
            chain = Some(Stmt::If(node));
        }
        Ok(chain)
    }

    fn try_block(&mut self) -> ParseResult<Stmt> {
        self.expect(&EsiTokenKind::Open(Element::Try))?;
        self.skip_ws();
        self.expect(&EsiTokenKind::Open(Element::Attempt))?;
        let attempt = self.statements_until(Element::Attempt)?;
        self.skip_ws();
        let except = if self.eat(&EsiTokenKind::Open(Element::Except)) {
            let body = self.statements_until(Element::Except)?;
            self.skip_ws();
            Some(body)
        } else {
            None
        };
        self.expect(&EsiTokenKind::Close(Element::Try))?;
        Ok(Stmt::Try {
            attempt: Box::new(stmts_to_stmt(attempt).unwrap_or_else(empty_block)),
            except: except.map(|body| Box::new(stmts_to_stmt(body).unwrap_or_else(empty_block))),
        })
    }

    fn include(&mut self) -> ParseResult<Stmt> {
        let head = self.here();
        let eval = matches!(self.advance(), EsiTokenKind::Start(Element::Eval));
        let element = if eval { "esi:eval" } else { "esi:include" };
        let mut inc = Include::new(eval, Expr::literal(""));
        let mut have_src = false;
        loop {
            match self.peek().clone() {
                EsiTokenKind::Attr(attr) => {
                    let pos = self.here();
                    let Some(param) = attr.include_param() else {
                        return Err(Error::at(
                            ErrorKind::UnknownAttribute {
                                element: element.to_string(),
                                attribute: attr.name().to_string(),
                                hint: did_you_mean(attr.name(), INCLUDE_ATTRS),
                            },
                            pos,
                        ));
                    };
                    self.advance();
                    let mut value =
                        self.vars_expr()?.unwrap_or_else(|| Expr::literal(""));
                    normalize_include_value(param, &mut value);
                    if param == "src" {
                        inc.src = value;
                        have_src = true;
                    } else {
                        inc.set(param, value);
                    }
                }
                EsiTokenKind::UnknownAttr(name) => {
                    let pos = self.here();
                    return Err(Error::at(
                        ErrorKind::UnknownAttribute {
                            element: element.to_string(),
                            attribute: name.clone(),
                            hint: did_you_mean(&name, INCLUDE_ATTRS),
                        },
                        pos,
                    ));
                }
                EsiTokenKind::TagEmpty => {
                    self.advance();
                    break;
                }
                _ => return Err(self.unexpected()),
            }
        }
        if !have_src {
            return Err(Error::at(
                ErrorKind::MissingAttribute {
                    element: element.to_string(),
                    attribute: "src".to_string(),
                },
                head,
            ));
        }
        Ok(Stmt::Include(inc))
    }

    fn vars(&mut self) -> ParseResult<Option<Stmt>> {
        self.expect(&EsiTokenKind::Start(Element::Vars))?;
        match self.peek() {
            // <esi:vars name="V"/> shorthand.
            EsiTokenKind::Attr(Attr::Name) => {
                self.advance();
                let (name, key) = self.assign_name()?;
                self.expect(&EsiTokenKind::TagEmpty)?;
                Ok(Some(Stmt::Output(Output {
                    parts: vec![Expr::Variable {
                        name,
                        key: key.map(Box::new),
                        default: None,
                    }],
                    raw: false,
                    vars: true,
                })))
            }
            EsiTokenKind::TagEnd => {
                self.advance();
                let mut stmts = self.statements_until(Element::Vars)?;
                if stmts.is_empty() {
                    return Ok(None);
                }
                // A body of pure interpolation text keeps the vars flag; a
                // body with real ESI statements lowers to raw markers.
                if stmts.len() == 1 {
                    if let Stmt::Output(Output { parts, raw: false, vars: false }) = &mut stmts[0] {
                        let parts = std::mem::take(parts);
                        return Ok(Some(Stmt::Output(Output { parts, raw: false, vars: true })));
                    }
                }
                let mut block = Block::new();
                block.push(raw_output("<esi:vars>"));
                for stmt in stmts {
                    block.push(stmt);
                }
                block.push(raw_output("</esi:vars>"));
                Ok(Some(Stmt::Block(block)))
            }
            _ => Err(self.unexpected()),
        }
    }

    fn foreach(&mut self) -> ParseResult<Stmt> {
        let head = self.here();
        self.expect(&EsiTokenKind::Start(Element::Foreach))?;
        let mut collection = None;
        let mut item = None;
        loop {
            match self.peek() {
                EsiTokenKind::Attr(Attr::Collection) => {
                    self.advance();
                    collection = Some(self.expression()?);
                }
                EsiTokenKind::Attr(Attr::Item) => {
                    self.advance();
                    item = Some(self.expect_symbol()?);
                }
                EsiTokenKind::TagEnd => {
                    self.advance();
                    break;
                }
                _ => return Err(self.unexpected()),
            }
        }
        let Some(collection) = collection else {
            return Err(Error::at(
                ErrorKind::MissingAttribute {
                    element: "esi:foreach".to_string(),
                    attribute: "collection".to_string(),
                },
                head,
            ));
        };
        let body = self.statements_until(Element::Foreach)?;
        Ok(Stmt::ForEach {
            collection,
            body: Box::new(stmts_to_stmt(body).unwrap_or_else(empty_block)),
            item,
        })
    }

    /// ESI function bodies carry no parameter list; arguments arrive via
    /// the `ARGS` bag.
    fn function(&mut self) -> ParseResult<Stmt> {
        self.expect(&EsiTokenKind::Start(Element::Function))?;
        self.expect(&EsiTokenKind::Attr(Attr::Name))?;
        let name = self.expect_symbol()?;
        self.expect(&EsiTokenKind::TagEnd)?;
        let body = self.statements_until(Element::Function)?;
        Ok(Stmt::Function(FunctionDef {
            name,
            params: Vec::new(),
            body: Box::new(stmts_to_stmt(body).unwrap_or_else(empty_block)),
            inline: false,
        }))
    }

    fn return_element(&mut self) -> ParseResult<Stmt> {
        self.expect(&EsiTokenKind::Start(Element::Return))?;
        if self.eat(&EsiTokenKind::TagEmpty) {
            return Ok(Stmt::Return(None));
        }
        self.expect(&EsiTokenKind::Attr(Attr::Value))?;
        let value = self.expression()?;
        self.expect(&EsiTokenKind::TagEmpty)?;
        Ok(Stmt::Return(Some(value)))
    }

    fn comment(&mut self) -> ParseResult<Stmt> {
        self.expect(&EsiTokenKind::Start(Element::Comment))?;
        self.expect(&EsiTokenKind::Attr(Attr::Text))?;
        let text = self.text_merge();
        self.expect(&EsiTokenKind::TagEmpty)?;
        Ok(Stmt::Comment(text))
    }

    // ------------------------------------------------------------------
    // vars-interpolated values

    /// A run of text / `$(...)` / `$func(...)` pieces, joined with `+`.
    fn vars_expr(&mut self) -> ParseResult<Option<Expr>> {
        let mut parts: Vec<Expr> = Vec::new();
        loop {
            match self.peek().clone() {
                EsiTokenKind::Text(_) => {
                    let text = self.text_merge();
                    parts.push(Expr::literal(text));
                }
                EsiTokenKind::VarRefClosed(name) => {
                    self.advance();
                    parts.push(Expr::var(name));
                }
                EsiTokenKind::VarRefOpen(name) => {
                    self.advance();
                    let key = if self.eat(&EsiTokenKind::LBrace) {
                        let key = self.expression()?;
                        self.expect(&EsiTokenKind::RBrace)?;
                        Some(Box::new(key))
                    } else {
                        None
                    };
                    let default = if self.eat(&EsiTokenKind::Pipe) {
                        Some(Box::new(self.expression()?))
                    } else {
                        None
                    };
                    self.expect(&EsiTokenKind::RParen)?;
                    parts.push(Expr::Variable { name, key, default });
                }
                EsiTokenKind::FuncCall(name) => {
                    self.advance();
                    let args = self.expression_list()?;
                    self.expect(&EsiTokenKind::RParen)?;
                    parts.push(Expr::call(name, args));
                }
                _ => break,
            }
        }
        Ok(match parts.len() {
            0 => None,
            1 => Some(parts.remove(0)),
            _ => Some(Expr::Op { op: Op::Add, args: parts, match_name: None }),
        })
    }

    // ------------------------------------------------------------------
    // expressions

    pub fn expression(&mut self) -> ParseResult<Expr> {
        self.binary(0)
    }

    /// ESI precedence, low to high: `||`, `&&`, `|`, `^`, `&`, the
    /// relational group, unary `!`/`~`, shifts, then one flat
    /// additive/multiplicative level.
    fn binary(&mut self, level: u8) -> ParseResult<Expr> {
        if level == 5 {
            let mut left = self.unary()?;
            while let Some(op) = level_op(5, self.peek()) {
                self.advance();
                let right = self.unary()?;
                left = combine(op, left, right);
            }
            return Ok(left);
        }
        if level > 7 {
            return self.negation();
        }
        let mut left = self.binary(level + 1)?;
        while let Some(op) = level_op(level, self.peek()) {
            self.advance();
            let right = self.binary(level + 1)?;
            left = combine(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            EsiTokenKind::Not => {
                self.advance();
                Ok(Expr::unary(Op::Not, self.unary()?))
            }
            EsiTokenKind::Tilde => {
                self.advance();
                Ok(Expr::unary(Op::BitNot, self.unary()?))
            }
            _ => self.binary(6),
        }
    }

    fn negation(&mut self) -> ParseResult<Expr> {
        if !matches!(self.peek(), EsiTokenKind::Minus) {
            return self.factor();
        }
        let pos = self.here();
        self.advance();
        match self.negation()? {
            Expr::Literal(Value::Int(n)) => Ok(Expr::Literal(Value::Int(-n))),
            Expr::Literal(Value::Float(f)) => Ok(Expr::Literal(Value::Float(-f))),
            _ => Err(Error::at(ErrorKind::InvalidNegation, pos)),
        }
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        match self.peek().clone() {
            EsiTokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Int(n)))
            }
            EsiTokenKind::Text(_) => {
                let text = self.text_merge();
                Ok(Expr::literal(text))
            }
            // A bare word in expression position is a string literal.
            EsiTokenKind::Symbol(s) => {
                self.advance();
                Ok(Expr::literal(s))
            }
            EsiTokenKind::Dollar => self.dollar_factor(),
            EsiTokenKind::Open(Element::Choose) => self.conditional_factor(),
            EsiTokenKind::LParen => {
                self.advance();
                let e = self.expression()?;
                self.expect(&EsiTokenKind::RParen)?;
                Ok(e)
            }
            EsiTokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !matches!(self.peek(), EsiTokenKind::RBracket) {
                    elements.push(self.list_element()?);
                    if !self.eat(&EsiTokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&EsiTokenKind::RBracket)?;
                Ok(Expr::List(elements))
            }
            EsiTokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !matches!(self.peek(), EsiTokenKind::RBrace) {
                    let key = self.dict_key()?;
                    self.expect(&EsiTokenKind::Colon)?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    if !self.eat(&EsiTokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&EsiTokenKind::RBrace)?;
                Ok(Expr::Dict(entries))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// `$(name{key}|default)` or `$name(args)` in expression context.
    fn dollar_factor(&mut self) -> ParseResult<Expr> {
        self.expect(&EsiTokenKind::Dollar)?;
        if self.eat(&EsiTokenKind::LParen) {
            let name = self.expect_symbol()?;
            let key = if self.eat(&EsiTokenKind::LBrace) {
                let key = self.expression()?;
                self.expect(&EsiTokenKind::RBrace)?;
                Some(Box::new(key))
            } else {
                None
            };
            let default = if self.eat(&EsiTokenKind::Pipe) {
                Some(Box::new(Expr::Literal(self.literal_value()?)))
            } else {
                None
            };
            self.expect(&EsiTokenKind::RParen)?;
            return Ok(Expr::Variable { name, key, default });
        }
        let name = self.expect_symbol()?;
        self.expect(&EsiTokenKind::LParen)?;
        let args = self.expression_list()?;
        self.expect(&EsiTokenKind::RParen)?;
        Ok(Expr::call(name, args))
    }

    /// A choose element in expression position is the serialized form of
    /// a lowered ternary: one when testing a bare variable, and branches
    /// that read the same variable back with a default. Anything else has
    /// no value as an expression.
    fn conditional_factor(&mut self) -> ParseResult<Expr> {
        self.expect(&EsiTokenKind::Open(Element::Choose))?;
        self.skip_ws();
        self.expect(&EsiTokenKind::Start(Element::When))?;
        self.expect(&EsiTokenKind::Attr(Attr::Test))?;
        let test = self.expression()?;
        self.expect(&EsiTokenKind::TagEnd)?;
        let then_read = self.vars_expr()?;
        self.expect(&EsiTokenKind::Close(Element::When))?;
        self.skip_ws();
        self.expect(&EsiTokenKind::Open(Element::Otherwise))?;
        let otherwise_read = self.vars_expr()?;
        self.expect(&EsiTokenKind::Close(Element::Otherwise))?;
        self.skip_ws();
        self.expect(&EsiTokenKind::Close(Element::Choose))?;

        let Expr::Variable { name, key, default: None } = test else {
            return Err(self.syntax_error(
                "a choose in expression position must test a bare variable".to_string(),
            ));
        };
        let then = self.branch_default(&name, &key, then_read)?;
        let otherwise = self.branch_default(&name, &key, otherwise_read)?;
        Ok(Expr::Conditional {
            name,
            key,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    /// Unwraps one ternary branch: a defaulted read of the tested
    /// variable, yielding the default.
    fn branch_default(
        &mut self,
        name: &str,
        key: &Option<Box<Expr>>,
        branch: Option<Expr>,
    ) -> ParseResult<Expr> {
        match branch {
            Some(Expr::Variable { name: bname, key: bkey, default: Some(default) })
                if bname == name && bkey == *key =>
            {
                Ok(*default)
            }
            _ => Err(self.syntax_error(
                "a choose in expression position must default the tested variable \
                 in both branches"
                    .to_string(),
            )),
        }
    }

    fn literal_value(&mut self) -> ParseResult<Value> {
        match self.peek() {
            EsiTokenKind::Number(n) => {
                let n = *n;
                self.advance();
                Ok(Value::Int(n))
            }
            EsiTokenKind::Text(_) => Ok(Value::Str(self.text_merge())),
            _ => Err(self.unexpected()),
        }
    }

    fn dict_key(&mut self) -> ParseResult<Expr> {
        if let EsiTokenKind::Symbol(s) = self.peek() {
            let s = s.clone();
            self.advance();
            return Ok(Expr::literal(s));
        }
        Ok(Expr::Literal(self.literal_value()?))
    }

    fn list_element(&mut self) -> ParseResult<Expr> {
        let e = self.expression()?;
        if self.eat(&EsiTokenKind::Range) {
            let hi = self.expression()?;
            return Ok(Expr::binary(Op::Range, e, hi));
        }
        Ok(e)
    }

    fn expression_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !matches!(self.peek(), EsiTokenKind::RParen) {
            args.push(self.expression()?);
            if !self.eat(&EsiTokenKind::Comma) {
                break;
            }
        }
        Ok(args)
    }
}

fn level_op(level: u8, kind: &EsiTokenKind) -> Option<Op> {
    Some(match (level, kind) {
        (0, EsiTokenKind::OrOr) => Op::Or,
        (1, EsiTokenKind::AndAnd) => Op::And,
        (2, EsiTokenKind::Pipe) => Op::BitOr,
        (3, EsiTokenKind::Caret) => Op::BitXor,
        (4, EsiTokenKind::Amp) => Op::BitAnd,
        (5, EsiTokenKind::EqEq) => Op::Eq,
        (5, EsiTokenKind::NotEq) => Op::Ne,
        (5, EsiTokenKind::Lt) => Op::Lt,
        (5, EsiTokenKind::Le) => Op::Le,
        (5, EsiTokenKind::Gt) => Op::Gt,
        (5, EsiTokenKind::Ge) => Op::Ge,
        (5, EsiTokenKind::Has) => Op::Has,
        (5, EsiTokenKind::HasI) => Op::HasI,
        (5, EsiTokenKind::Matches) => Op::Matches,
        (5, EsiTokenKind::MatchesI) => Op::MatchesI,
        (6, EsiTokenKind::Shl) => Op::Shl,
        (6, EsiTokenKind::Shr) => Op::Shr,
        (7, EsiTokenKind::Plus) => Op::Add,
        (7, EsiTokenKind::Minus) => Op::Sub,
        (7, EsiTokenKind::Star) => Op::Mul,
        (7, EsiTokenKind::Slash) => Op::Div,
        (7, EsiTokenKind::Percent) => Op::Mod,
        _ => return None,
    })
}

fn combine(op: Op, left: Expr, right: Expr) -> Expr {
    if op == Op::Add {
        if let Expr::Op { op: Op::Add, mut args, match_name: None } = left {
            args.push(right);
            return Expr::Op { op: Op::Add, args, match_name: None };
        }
    }
    Expr::binary(op, left, right)
}

/// Hoists a matchname onto the first matches operator, preorder.
fn set_first_match(e: &mut Expr, name: &str) -> bool {
    match e {
        Expr::Op { op, match_name, args } => {
            if op.is_match() {
                *match_name = Some(name.to_string());
                return true;
            }
            for arg in args {
                if set_first_match(arg, name) {
                    return true;
                }
            }
            false
        }
        _ => false,
    }
}

/// One or more statements collapse to a single node the way bodies are
/// stored: nothing, the lone statement, or a grouping block.
fn stmts_to_stmt(stmts: Vec<Stmt>) -> Option<Stmt> {
    match stmts.len() {
        0 => None,
        1 => stmts.into_iter().next(),
        _ => Some(Stmt::Block(Block::of(stmts))),
    }
}

fn empty_block() -> Stmt {
    Stmt::Block(Block::new())
}

fn raw_output(text: &str) -> Stmt {
    Stmt::Output(Output { parts: vec![Expr::literal(text)], raw: true, vars: false })
}

fn debug_passthrough() -> Stmt {
    raw_output("<esi:debug/>")
}

/// The reference parser's attribute repairs: a quoted dca value loses its
/// quotes, and a textual maxwait becomes a number.
fn normalize_include_value(param: &str, value: &mut Expr) {
    match param {
        "dca" => {
            if let Expr::Literal(Value::Str(s)) = value {
                if s.contains('\'') {
                    *value = Expr::literal(s.replace('\'', ""));
                }
            }
        }
        "maxWait" => {
            if let Expr::Literal(Value::Str(s)) = value {
                if let Ok(n) = s.trim().parse::<i64>() {
                    *value = Expr::Literal(Value::Int(n));
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esi::lexer::Lexer;

    fn parse(source: &str) -> Block {
        let mut reporter = Reporter::new("<test>");
        let tokens = Lexer::new(source, &mut reporter).tokenize();
        let tree = Parser::new(tokens, &mut reporter).parse_program().unwrap();
        assert_eq!(reporter.count, 0, "unexpected diagnostics: {:?}", reporter.lines());
        tree
    }

    fn parse_err(source: &str) -> Error {
        let mut reporter = Reporter::new("<test>");
        let tokens = Lexer::new(source, &mut reporter).tokenize();
        Parser::new(tokens, &mut reporter).parse_program().unwrap_err()
    }

    #[test]
    fn assign_forms_are_equivalent() {
        let a = parse("<esi:assign name=\"v\" value=\"4\"/>");
        let b = parse("<esi:assign name=\"v\">4</esi:assign>");
        assert_eq!(a, b);
        assert_eq!(
            a.stmts[0],
            Stmt::Assign { name: "v".into(), key: None, value: Expr::literal(4i64) }
        );
    }

    #[test]
    fn assign_name_may_carry_a_key() {
        let tree = parse("<esi:assign name=\"d{'k'}\" value=\"1\"/>");
        match &tree.stmts[0] {
            Stmt::Assign { name, key, .. } => {
                assert_eq!(name, "d");
                assert_eq!(key, &Some(Expr::literal("k")));
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn bare_symbols_in_expressions_are_strings() {
        let tree = parse("<esi:assign name=\"v\" value=\"abc\"/>");
        assert!(matches!(&tree.stmts[0], Stmt::Assign { value, .. } if value == &Expr::literal("abc")));
    }

    #[test]
    fn choose_folds_into_if_chain() {
        let tree = parse(
            "<esi:choose><esi:when test=\"$(a)\"><esi:break/></esi:when>\
             <esi:when test=\"$(b)\"><esi:break/></esi:when>\
             <esi:otherwise><esi:break/></esi:otherwise></esi:choose>",
        );
        match &tree.stmts[0] {
            Stmt::If(first) => match first.otherwise.as_deref() {
                Some(Stmt::If(second)) => {
                    assert!(matches!(second.otherwise.as_deref(), Some(Stmt::Break)));
                }
                other => panic!("expected nested if, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn pretty_printed_choose_parses() {
        let tree = parse(
            "<esi:choose>\n  <esi:when test=\"$(a)\"><esi:break/></esi:when>\n\
             \x20 <esi:when test=\"$(b)\"><esi:break/></esi:when>\n</esi:choose>",
        );
        assert!(matches!(&tree.stmts[0], Stmt::If(_)));
    }

    #[test]
    fn choose_in_expression_position_reconstructs_a_ternary() {
        let tree = parse(
            "<esi:assign name=\"v\"><esi:choose><esi:when test=\"$(c)\">$(c|'a')</esi:when>\
             <esi:otherwise>$(c|'b')</esi:otherwise></esi:choose></esi:assign>",
        );
        match &tree.stmts[0] {
            Stmt::Assign { value: Expr::Conditional { name, key, then, otherwise }, .. } => {
                assert_eq!(name, "c");
                assert!(key.is_none());
                assert_eq!(**then, Expr::literal("a"));
                assert_eq!(**otherwise, Expr::literal("b"));
            }
            other => panic!("expected conditional assign, got {:?}", other),
        }
    }

    #[test]
    fn expression_choose_keeps_the_tested_key() {
        let tree = parse(
            "<esi:assign name=\"v\"><esi:choose><esi:when test=\"$(d{'k'})\">$(d{'k'}|1)\
             </esi:when><esi:otherwise>$(d{'k'}|2)</esi:otherwise></esi:choose></esi:assign>",
        );
        match &tree.stmts[0] {
            Stmt::Assign { value: Expr::Conditional { name, key, .. }, .. } => {
                assert_eq!(name, "d");
                assert_eq!(key.as_deref(), Some(&Expr::literal("k")));
            }
            other => panic!("expected conditional assign, got {:?}", other),
        }
    }

    #[test]
    fn expression_choose_with_mismatched_branches_is_rejected() {
        let err = parse_err(
            "<esi:assign name=\"v\"><esi:choose><esi:when test=\"$(c)\">$(d|'a')</esi:when>\
             <esi:otherwise>$(c|'b')</esi:otherwise></esi:choose></esi:assign>",
        );
        assert!(matches!(err.kind, ErrorKind::Syntax(ref m) if m.contains("expression position")));
    }

    #[test]
    fn matchname_hoists_onto_matches_operator() {
        let tree = parse(
            "<esi:choose><esi:when test=\"$(h) matches 'x'\" matchname=\"m\">y\
             </esi:when></esi:choose>",
        );
        match &tree.stmts[0] {
            Stmt::If(i) => match &i.test {
                Expr::Op { match_name, .. } => assert_eq!(match_name.as_deref(), Some("m")),
                other => panic!("expected matches, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn matchname_without_matches_dangles() {
        let err = parse_err(
            "<esi:choose><esi:when test=\"$(h)\" matchname=\"m\">y</esi:when></esi:choose>",
        );
        assert!(matches!(err.kind, ErrorKind::DanglingMatchName(ref n) if n == "m"));
    }

    #[test]
    fn include_attributes_normalise() {
        let tree = parse(
            "<esi:include src=\"/a\" onerror=\"continue\" maxwait=\"300\" \
             appendheader=\"X-A: 1\" appendheader=\"X-B: 2\"/>",
        );
        match &tree.stmts[0] {
            Stmt::Include(inc) => {
                assert_eq!(inc.on_error, Some(Expr::literal("continue")));
                assert_eq!(inc.max_wait, Some(Expr::Literal(Value::Int(300))));
                assert_eq!(inc.append_header.len(), 2);
            }
            other => panic!("expected include, got {:?}", other),
        }
    }

    #[test]
    fn include_without_src_is_missing_attribute() {
        let err = parse_err("<esi:include alt=\"/b\"/>");
        assert!(matches!(err.kind, ErrorKind::MissingAttribute { .. }));
    }

    #[test]
    fn include_unknown_attribute_gets_hint() {
        let err = parse_err("<esi:include src=\"/a\" maxWait=\"3\"/>");
        match err.kind {
            ErrorKind::UnknownAttribute { attribute, hint, .. } => {
                assert_eq!(attribute, "maxWait");
                assert_eq!(hint.as_deref(), Some("maxwait"));
            }
            other => panic!("expected unknown attribute, got {:?}", other),
        }
    }

    #[test]
    fn eval_sets_the_flag() {
        let tree = parse("<esi:eval src=\"/frag\"/>");
        assert!(matches!(&tree.stmts[0], Stmt::Include(inc) if inc.eval));
    }

    #[test]
    fn raw_text_becomes_output() {
        let tree = parse("hello <esi:break/> world");
        assert_eq!(tree.stmts.len(), 3);
        assert!(matches!(&tree.stmts[0], Stmt::Output(o) if !o.vars && !o.raw));
        assert!(matches!(&tree.stmts[1], Stmt::Break));
    }

    #[test]
    fn vars_body_joins_pieces_with_add() {
        let tree = parse("<esi:vars>host=$(HTTP_HOST)!</esi:vars>");
        match &tree.stmts[0] {
            Stmt::Output(o) => {
                assert!(o.vars);
                assert_eq!(o.parts.len(), 1);
                match &o.parts[0] {
                    Expr::Op { op: Op::Add, args, .. } => assert_eq!(args.len(), 3),
                    other => panic!("expected concatenation, got {:?}", other),
                }
            }
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[test]
    fn vars_shorthand_reads_one_variable() {
        let tree = parse("<esi:vars name=\"HTTP_HOST\"/>");
        match &tree.stmts[0] {
            Stmt::Output(o) => {
                assert!(o.vars);
                assert_eq!(o.parts[0], Expr::var("HTTP_HOST"));
            }
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[test]
    fn mixed_vars_body_lowers_to_raw_markers() {
        let tree = parse("<esi:vars>a<esi:assign name=\"v\" value=\"1\"/></esi:vars>");
        match &tree.stmts[0] {
            Stmt::Output(o) => {
                assert!(o.raw);
                assert_eq!(o.parts[0], Expr::literal("<esi:vars>"));
            }
            other => panic!("expected raw marker, got {:?}", other),
        }
        assert!(matches!(&tree.stmts[1], Stmt::Output(_)));
        assert!(matches!(&tree.stmts[2], Stmt::Assign { .. }));
        assert!(matches!(&tree.stmts[3], Stmt::Output(o) if o.raw));
    }

    #[test]
    fn foreach_accepts_either_attribute_order() {
        let a = parse("<esi:foreach collection=\"$(list)\" item=\"x\">$(x)</esi:foreach>");
        let b = parse("<esi:foreach item=\"x\" collection=\"$(list)\">$(x)</esi:foreach>");
        assert_eq!(a, b);
        assert!(matches!(&a.stmts[0], Stmt::ForEach { item: Some(i), .. } if i == "x"));
    }

    #[test]
    fn function_and_return_round_into_definition() {
        let tree = parse(
            "<esi:function name=\"i\"><esi:assign name=\"x\" value=\"$(ARGS{0})\"/>\
             <esi:return value=\"$(x)*2\"/></esi:function>",
        );
        match &tree.stmts[0] {
            Stmt::Function(f) => {
                assert_eq!(f.name, "i");
                assert!(f.params.is_empty());
                assert!(!f.inline);
                match f.body.as_ref() {
                    Stmt::Block(b) => assert_eq!(b.stmts.len(), 2),
                    other => panic!("expected block body, got {:?}", other),
                }
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn esi_precedence_is_flat_for_arithmetic() {
        let tree = parse("<esi:assign name=\"v\" value=\"1+2*3\"/>");
        match &tree.stmts[0] {
            Stmt::Assign { value: Expr::Op { op: Op::Mul, args, .. }, .. } => {
                assert!(matches!(args[0], Expr::Op { op: Op::Add, .. }));
            }
            other => panic!("expected left-folded arithmetic, got {:?}", other),
        }
    }

    #[test]
    fn try_attempt_except_structure() {
        let tree = parse(
            "<esi:try><esi:attempt><esi:break/></esi:attempt>\
             <esi:except><esi:break/></esi:except></esi:try>",
        );
        match &tree.stmts[0] {
            Stmt::Try { except, .. } => assert!(except.is_some()),
            other => panic!("expected try, got {:?}", other),
        }
    }

    #[test]
    fn debug_element_passes_through_raw() {
        let tree = parse("<esi:debug/>");
        assert!(matches!(&tree.stmts[0], Stmt::Output(o) if o.raw));
    }
}
