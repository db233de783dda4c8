//! Recursive-descent parser for the JS-dialect. Precedence is handled by
//! climbing through numbered binary levels; the dialect's desugarings
//! (`++`, compound assigns, property access, ternaries, C-style for
//! loops) happen here so the tree only ever holds core node kinds.

use crate::ast::{Block, Expr, FunctionDef, If, Import, Include, Op, Output, Param, Stmt, Value};
use crate::error::{Error, ErrorKind, Pos, Reporter};
use crate::js::token::{Token, TokenKind};
use crate::suggest::did_you_mean;

pub type ParseResult<T> = Result<T, Error>;

const PRINT_NAMES: &[&str] = &["print", "printraw", "printv"];

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    reporter: &'a mut Reporter,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, reporter: &'a mut Reporter) -> Self {
        Parser { tokens, pos: 0, reporter }
    }

    pub fn parse_program(&mut self) -> ParseResult<Block> {
        let mut block = Block::new();
        while !matches!(self.peek(), TokenKind::Eof) {
            self.statement_into(&mut block)?;
        }
        Ok(block)
    }

    // ------------------------------------------------------------------
    // token plumbing

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn here(&self) -> Pos {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> ParseResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_symbol(&mut self) -> ParseResult<String> {
        if let TokenKind::Symbol(name) = self.peek() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.unexpected())
        }
    }

    /// Reports and returns a counted syntax error for the current token.
    fn unexpected(&mut self) -> Error {
        let pos = self.here();
        let kind = if matches!(self.peek(), TokenKind::Eof) {
            ErrorKind::UnexpectedEof
        } else {
            ErrorKind::Syntax(format!(
                "unexpected parser token \"{}\"",
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

    // ------------------------------------------------------------------
    // statements

    /// Parses one declaration into `block`; comment runs can contribute
    /// several statements.
    fn statement_into(&mut self, block: &mut Block) -> ParseResult<()> {
        if matches!(self.peek(), TokenKind::Comment(_)) {
            self.comment_run(block);
            return Ok(());
        }
        if let Some(stmt) = self.statement()? {
            block.push(stmt);
        }
        Ok(())
    }

    fn statement(&mut self) -> ParseResult<Option<Stmt>> {
        match self.peek() {
            TokenKind::Stop => {
                self.advance();
                Ok(None)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut inner = Block::new();
                while !matches!(self.peek(), TokenKind::RBrace) {
                    if matches!(self.peek(), TokenKind::Eof) {
                        return Err(self.unexpected());
                    }
                    self.statement_into(&mut inner)?;
                }
                self.advance();
                Ok(Some(Stmt::Block(inner)))
            }
            TokenKind::If => self.if_statement().map(Some),
            TokenKind::For => self.for_statement().map(Some),
            TokenKind::Try => self.try_statement().map(Some),
            TokenKind::Break => {
                self.advance();
                self.expect(&TokenKind::Stop)?;
                Ok(Some(Stmt::Break))
            }
            TokenKind::Return => self.return_statement().map(Some),
            TokenKind::Require => self.require_statement().map(Some),
            TokenKind::Include | TokenKind::Eval => self.include_statement().map(Some),
            TokenKind::Function => self.function_statement().map(Some),
            TokenKind::Let | TokenKind::Var | TokenKind::Const => {
                self.advance();
                self.assign_statement(true).map(Some)
            }
            TokenKind::Symbol(_) => {
                if matches!(self.peek_at(1), TokenKind::LParen) {
                    self.call_statement().map(Some)
                } else {
                    self.assign_statement(true).map(Some)
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    fn required_statement(&mut self) -> ParseResult<Stmt> {
        Ok(self.statement()?.unwrap_or_else(|| Stmt::Block(Block::new())))
    }

    /// Collects a run of comment tokens. Consecutive non-empty lines merge
    /// into one multi-line comment; an empty comment line separates runs
    /// and is dropped.
    fn comment_run(&mut self, block: &mut Block) {
        let mut runs: Vec<Vec<String>> = vec![Vec::new()];
        while let TokenKind::Comment(text) = self.peek() {
            if text.is_empty() {
                if !runs.last().unwrap().is_empty() {
                    runs.push(Vec::new());
                }
            } else {
                runs.last_mut().unwrap().push(text.clone());
            }
            self.advance();
        }
        for run in runs {
            match run.len() {
                0 => {}
                1 => block.push(Stmt::Comment(run[0].trim_start().to_string())),
                _ => block.push(Stmt::Comment(merge_comment_lines(run))),
            }
        }
    }

    /// `lvalue = expr;` and its compound/increment shorthands. The step
    /// clause of a C-style for loop may omit the terminating semicolon.
    fn assign_statement(&mut self, require_stop: bool) -> ParseResult<Stmt> {
        let name = self.expect_symbol()?;
        let key = if self.eat(&TokenKind::LBracket) {
            let key = self.expression()?;
            self.expect(&TokenKind::RBracket)?;
            Some(key)
        } else {
            None
        };
        let read_back = Expr::Variable {
            name: name.clone(),
            key: key.clone().map(Box::new),
            default: None,
        };
        let (op, value) = match self.peek() {
            TokenKind::Assign => {
                self.advance();
                (None, self.expression()?)
            }
            TokenKind::PlusAssign => {
                self.advance();
                (Some(Op::Add), self.expression()?)
            }
            TokenKind::MinusAssign => {
                self.advance();
                (Some(Op::Sub), self.expression()?)
            }
            TokenKind::StarAssign => {
                self.advance();
                (Some(Op::Mul), self.expression()?)
            }
            TokenKind::SlashAssign => {
                self.advance();
                (Some(Op::Div), self.expression()?)
            }
            TokenKind::PercentAssign => {
                self.advance();
                (Some(Op::Mod), self.expression()?)
            }
            TokenKind::Increment | TokenKind::Decrement => {
                let op = if matches!(self.peek(), TokenKind::Increment) { Op::Add } else { Op::Sub };
                self.advance();
                self.eat(&TokenKind::Stop);
                return Ok(Stmt::Assign {
                    value: Expr::binary(op, read_back, Expr::literal(1i64)),
                    name,
                    key,
                });
            }
            _ => return Err(self.unexpected()),
        };
        if require_stop {
            self.expect(&TokenKind::Stop)?;
        } else {
            self.eat(&TokenKind::Stop);
        }
        let value = match op {
            Some(op) => Expr::binary(op, read_back, value),
            None => value,
        };
        Ok(Stmt::Assign { name, key, value })
    }

    /// A bare call in statement position; the print family lowers to an
    /// Output node here.
    fn call_statement(&mut self) -> ParseResult<Stmt> {
        let name = self.expect_symbol()?;
        self.expect(&TokenKind::LParen)?;
        let args = self.expression_list(&TokenKind::RParen)?;
        self.expect(&TokenKind::RParen)?;
        let stmt = if PRINT_NAMES.contains(&name.as_str()) {
            let raw = name == "printraw";
            if raw {
                for arg in &args {
                    if !matches!(arg, Expr::Literal(_)) {
                        return Err(Error::structure(format!(
                            "\"printraw\" function can only accept literal values \
                             (e.g. strings and numbers), not \"{}\"",
                            arg.kind_name()
                        )));
                    }
                }
            }
            Stmt::Output(Output { parts: args, raw, vars: name == "printv" })
        } else {
            Stmt::Expr(Expr::call(name, args))
        };
        self.expect(&TokenKind::Stop)?;
        Ok(stmt)
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        self.expect(&TokenKind::If)?;
        self.expect(&TokenKind::LParen)?;
        let test = self.test_expression()?;
        self.expect(&TokenKind::RParen)?;
        let then = self.statement()?;
        let otherwise = self.if_otherwise()?;
        Ok(Stmt::If(If::new(test, then, otherwise)))
    }

    fn if_otherwise(&mut self) -> ParseResult<Option<Stmt>> {
        if !self.eat(&TokenKind::Else) {
            return Ok(None);
        }
        if matches!(self.peek(), TokenKind::If) {
            return self.if_statement().map(Some);
        }
        self.statement()
    }

    /// An expression in test position may carry an `as NAME` suffix on a
    /// top-level matches operator.
    fn test_expression(&mut self) -> ParseResult<Expr> {
        let mut e = self.expression()?;
        if self.eat(&TokenKind::As) {
            let name = self.expect_symbol()?;
            match &mut e {
                Expr::Op { op, match_name, .. } if op.is_match() && match_name.is_none() => {
                    *match_name = Some(name);
                }
                _ => return Err(self.syntax_error("unexpected parser token \"as\"".to_string())),
            }
        }
        Ok(e)
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        self.expect(&TokenKind::For)?;
        self.expect(&TokenKind::LParen)?;

        if matches!(self.peek(), TokenKind::Let | TokenKind::Var | TokenKind::Const) {
            if matches!(self.peek_at(1), TokenKind::Symbol(_))
                && matches!(self.peek_at(2), TokenKind::Of)
            {
                self.advance();
                let item = self.expect_symbol()?;
                return self.foreach_tail(Some(item));
            }
            // `for (let i = 0; cond; step)` keeps the declaration prefix.
            self.advance();
            return self.counted_for();
        }
        if matches!(self.peek(), TokenKind::Symbol(_)) && matches!(self.peek_at(1), TokenKind::Of) {
            let item = self.expect_symbol()?;
            return self.foreach_tail(Some(item));
        }
        if self.counted_loop_ahead() {
            return self.counted_for();
        }
        let collection = self.expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.required_statement()?;
        Ok(Stmt::ForEach { collection, body: Box::new(body), item: None })
    }

    fn foreach_tail(&mut self, item: Option<String>) -> ParseResult<Stmt> {
        self.expect(&TokenKind::Of)?;
        let collection = self.expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.required_statement()?;
        Ok(Stmt::ForEach { collection, body: Box::new(body), item })
    }

    /// Does an assignment head the parenthesised clause? That marks the
    /// `for (init; cond; step)` form.
    fn counted_loop_ahead(&self) -> bool {
        let mut idx = self.pos;
        if !matches!(self.tokens.get(idx).map(|t| &t.kind), Some(TokenKind::Symbol(_))) {
            return false;
        }
        idx += 1;
        if matches!(self.tokens.get(idx).map(|t| &t.kind), Some(TokenKind::LBracket)) {
            let mut depth = 1;
            idx += 1;
            while depth > 0 {
                match self.tokens.get(idx).map(|t| &t.kind) {
                    Some(TokenKind::LBracket) => depth += 1,
                    Some(TokenKind::RBracket) => depth -= 1,
                    Some(TokenKind::Eof) | None => return false,
                    _ => {}
                }
                idx += 1;
            }
        }
        matches!(
            self.tokens.get(idx).map(|t| &t.kind),
            Some(
                TokenKind::Assign
                    | TokenKind::PlusAssign
                    | TokenKind::MinusAssign
                    | TokenKind::StarAssign
                    | TokenKind::SlashAssign
                    | TokenKind::PercentAssign
                    | TokenKind::Increment
                    | TokenKind::Decrement
            )
        )
    }

    /// `for (init; cond; step) body` lowers onto a range foreach with an
    /// inverted-test break at the top of the loop body.
    fn counted_for(&mut self) -> ParseResult<Stmt> {
        let init = self.assign_statement(true)?;
        let first = match &init {
            Stmt::Assign { value, .. } => value.clone(),
            _ => unreachable!("counted_loop_ahead only admits assignments"),
        };
        let cond = self.test_expression()?;
        self.expect(&TokenKind::Stop)?;
        let step = self.assign_statement(false)?;
        self.expect(&TokenKind::RParen)?;
        let body = self.required_statement()?;

        let limit = match &cond {
            Expr::Op { args, .. } if args.len() >= 2 => args[1].clone(),
            _ => {
                return Err(self.syntax_error(
                    "for loop condition must compare the loop variable against a bound"
                        .to_string(),
                ))
            }
        };

        let mut loop_body = Block::new();
        loop_body.stmts.push(Stmt::If(If::new(
            Expr::unary(Op::Not, cond),
            Some(Stmt::Break),
            None,
        )));
        loop_body.stmts.push(body);
        loop_body.stmts.push(step);

        let mut lowered = Block::new();
        lowered.stmts.push(init);
        lowered.stmts.push(Stmt::Assign {
            name: "_loop".to_string(),
            key: None,
            value: Expr::List(vec![Expr::binary(Op::Range, first, limit)]),
        });
        lowered.stmts.push(Stmt::ForEach {
            collection: Expr::var("_loop"),
            body: Box::new(Stmt::Block(loop_body)),
            item: None,
        });
        Ok(Stmt::Block(lowered))
    }

    fn try_statement(&mut self) -> ParseResult<Stmt> {
        self.expect(&TokenKind::Try)?;
        let attempt = self.required_statement()?;
        let except = if self.eat(&TokenKind::Except) {
            Some(self.required_statement()?)
        } else if self.eat(&TokenKind::Catch) {
            // The catch parameter list has no ESI counterpart.
            self.expect(&TokenKind::LParen)?;
            self.param_list()?;
            self.expect(&TokenKind::RParen)?;
            Some(self.required_statement()?)
        } else {
            None
        };
        Ok(Stmt::Try { attempt: Box::new(attempt), except: except.map(Box::new) })
    }

    fn return_statement(&mut self) -> ParseResult<Stmt> {
        self.expect(&TokenKind::Return)?;
        if self.eat(&TokenKind::Stop) {
            return Ok(Stmt::Return(None));
        }
        let value = self.expression()?;
        self.expect(&TokenKind::Stop)?;
        Ok(Stmt::Return(Some(value)))
    }

    fn require_statement(&mut self) -> ParseResult<Stmt> {
        self.expect(&TokenKind::Require)?;
        self.expect(&TokenKind::LParen)?;
        let src = match self.peek() {
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                s
            }
            _ => return Err(self.unexpected()),
        };
        let mut force = false;
        while self.eat(&TokenKind::Comma) {
            let pos = self.here();
            let name = self.expect_symbol()?;
            self.expect(&TokenKind::Assign)?;
            let value = self.expression()?;
            if name != "force" {
                return Err(Error::at(
                    ErrorKind::UnknownAttribute {
                        element: "require".to_string(),
                        attribute: name.clone(),
                        hint: did_you_mean(&name, &["force"]),
                    },
                    pos,
                ));
            }
            force = value == Expr::Literal(Value::Bool(true));
        }
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::Stop)?;
        Ok(Stmt::Import(Import { src, force, inline: None }))
    }

    fn include_statement(&mut self) -> ParseResult<Stmt> {
        let element = match self.advance() {
            TokenKind::Eval => "eval",
            _ => "include",
        };
        let head = self.here();
        self.expect(&TokenKind::LParen)?;
        let mut inc = Include::new(element == "eval", Expr::literal(""));
        let mut have_src = false;
        while !matches!(self.peek(), TokenKind::RParen) {
            let pos = self.here();
            let name = self.expect_symbol()?;
            self.expect(&TokenKind::Assign)?;
            let value = self.expression()?;
            if name == "src" {
                inc.src = value;
                have_src = true;
            } else if !inc.set(&name, value) {
                return Err(Error::at(
                    ErrorKind::UnknownAttribute {
                        element: element.to_string(),
                        attribute: name.clone(),
                        hint: did_you_mean(&name, Include::PARAMS),
                    },
                    pos,
                ));
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::Stop)?;
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

    fn function_statement(&mut self) -> ParseResult<Stmt> {
        self.expect(&TokenKind::Function)?;
        let legacy_inline = self.eat(&TokenKind::Inline);
        let name = self.expect_symbol()?;
        self.expect(&TokenKind::LParen)?;
        let params = self.param_list()?;
        self.expect(&TokenKind::RParen)?;

        if legacy_inline || !matches!(self.peek(), TokenKind::LBrace) {
            let body = self.required_statement()?;
            return Ok(Stmt::Function(FunctionDef {
                name,
                params,
                body: Box::new(body),
                inline: legacy_inline,
            }));
        }

        self.advance();
        let mut inline = false;
        if matches!(self.peek(), TokenKind::Inline) {
            self.advance();
            inline = true;
        } else if matches!(self.peek(), TokenKind::Str(_))
            && matches!(self.peek_at(1), TokenKind::Stop)
        {
            // A leading string directive; only `'inline';` means anything.
            if matches!(self.peek(), TokenKind::Str(s) if s == "inline") {
                inline = true;
            }
            self.advance();
            self.advance();
        }
        let mut body = Block::new();
        while !matches!(self.peek(), TokenKind::RBrace) {
            if matches!(self.peek(), TokenKind::Eof) {
                return Err(self.unexpected());
            }
            self.statement_into(&mut body)?;
        }
        self.advance();
        Ok(Stmt::Function(FunctionDef {
            name,
            params,
            body: Box::new(Stmt::Block(body)),
            inline,
        }))
    }

    /// Simple parameters followed by defaulted parameters.
    fn param_list(&mut self) -> ParseResult<Vec<Param>> {
        let mut params = Vec::new();
        if matches!(self.peek(), TokenKind::RParen) {
            return Ok(params);
        }
        let mut seen_default = false;
        loop {
            let name = self.expect_symbol()?;
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.literal_value()?)
            } else {
                None
            };
            if default.is_none() && seen_default {
                return Err(self.syntax_error(
                    "parameters without defaults must precede defaulted parameters".to_string(),
                ));
            }
            seen_default |= default.is_some();
            params.push(Param { name, default });
            if !self.eat(&TokenKind::Comma) {
                return Ok(params);
            }
        }
    }

    fn literal_value(&mut self) -> ParseResult<Value> {
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Value::Int(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                let mut text = s;
                while let TokenKind::Str(next) = self.peek() {
                    text.push_str(next);
                    self.advance();
                }
                Ok(Value::Str(text))
            }
            TokenKind::True => {
                self.advance();
                Ok(Value::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Value::Bool(false))
            }
            _ => Err(self.unexpected()),
        }
    }

    // ------------------------------------------------------------------
    // expressions

    pub fn expression(&mut self) -> ParseResult<Expr> {
        let cond = self.binary(0)?;
        if !self.eat(&TokenKind::Question) {
            return Ok(cond);
        }
        let then = self.expression()?;
        self.expect(&TokenKind::Colon)?;
        let otherwise = self.expression()?;
        match cond {
            Expr::Variable { name, key, default: None } => Ok(Expr::Conditional {
                name,
                key,
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }),
            Expr::Variable { default: Some(_), .. } => Err(Error::structure(
                "ternary condition cannot carry a default value",
            )),
            _ => Err(self.syntax_error(
                "ternary condition must be a simple variable".to_string(),
            )),
        }
    }

    fn binary(&mut self, level: u8) -> ParseResult<Expr> {
        if level > 9 {
            return self.unary();
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
            TokenKind::Not => {
                self.advance();
                Ok(Expr::unary(Op::Not, self.unary()?))
            }
            TokenKind::Tilde => {
                self.advance();
                Ok(Expr::unary(Op::BitNot, self.unary()?))
            }
            _ => self.negation(),
        }
    }

    /// Unary minus folds into numeric literals; nothing else is negatable.
    fn negation(&mut self) -> ParseResult<Expr> {
        if !matches!(self.peek(), TokenKind::Minus) {
            return self.postfix();
        }
        let pos = self.here();
        self.advance();
        match self.negation()? {
            Expr::Literal(Value::Int(n)) => Ok(Expr::Literal(Value::Int(-n))),
            Expr::Literal(Value::Float(f)) => Ok(Expr::Literal(Value::Float(-f))),
            _ => Err(Error::at(ErrorKind::InvalidNegation, pos)),
        }
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut e = self.primary()?;
        while self.eat(&TokenKind::Dot) {
            e = self.property(e)?;
        }
        Ok(e)
    }

    /// The dialect's property sugar: `length`/`indexOf`/`charAt` map to
    /// intrinsics, anything else becomes a string key on the variable.
    fn property(&mut self, base: Expr) -> ParseResult<Expr> {
        let name = self.expect_symbol()?;
        match name.as_str() {
            "length" => Ok(Expr::call("len", vec![base])),
            "indexOf" => {
                self.expect(&TokenKind::LParen)?;
                let needle = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(Expr::call("index", vec![base, needle]))
            }
            "charAt" => {
                self.expect(&TokenKind::LParen)?;
                let index = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                let base_name = match base {
                    Expr::Variable { name, key: None, .. } => name,
                    Expr::Variable { .. } => {
                        return Err(self.syntax_error(
                            "complex expressions are not supported in ESI; break the \
                             expression into multiple variable assignments"
                                .to_string(),
                        ))
                    }
                    _ => {
                        return Err(self.syntax_error(format!(
                            "unknown object property: \"{}\"",
                            name
                        )))
                    }
                };
                let default = if self.eat(&TokenKind::OrOr) {
                    Some(Box::new(self.postfix()?))
                } else {
                    None
                };
                Ok(Expr::Variable { name: base_name, key: Some(Box::new(index)), default })
            }
            _ => {
                if matches!(self.peek(), TokenKind::LParen) {
                    return Err(self.syntax_error(format!(
                        "unknown object property: \"{}\"",
                        name
                    )));
                }
                let (base_name, base_default) = match base {
                    Expr::Variable { name, key: None, default } => (name, default),
                    Expr::Variable { key: Some(_), .. } => {
                        return Err(Error::structure(
                            "property access on an already keyed variable",
                        ))
                    }
                    _ => {
                        return Err(self.syntax_error(format!(
                            "unknown object property: \"{}\"",
                            name
                        )))
                    }
                };
                let default = if self.eat(&TokenKind::OrOr) {
                    if base_default.is_some() {
                        return Err(Error::structure(
                            "property default conflicts with the variable's default",
                        ));
                    }
                    Some(Box::new(self.postfix()?))
                } else {
                    base_default
                };
                Ok(Expr::Variable {
                    name: base_name,
                    key: Some(Box::new(Expr::literal(name))),
                    default,
                })
            }
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Int(n)))
            }
            TokenKind::Str(_) | TokenKind::True | TokenKind::False => {
                Ok(Expr::Literal(self.literal_value()?))
            }
            TokenKind::Symbol(name) => {
                if matches!(self.peek_at(1), TokenKind::LParen) {
                    self.advance();
                    self.advance();
                    let args = self.expression_list(&TokenKind::RParen)?;
                    self.expect(&TokenKind::RParen)?;
                    return Ok(Expr::call(name, args));
                }
                self.advance();
                let key = if self.eat(&TokenKind::LBracket) {
                    let key = self.expression()?;
                    self.expect(&TokenKind::RBracket)?;
                    Some(Box::new(key))
                } else {
                    None
                };
                let default = if self.eat(&TokenKind::OrOr) {
                    Some(Box::new(self.expression()?))
                } else {
                    None
                };
                Ok(Expr::Variable { name, key, default })
            }
            TokenKind::LParen => {
                self.advance();
                let e = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(e)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !matches!(self.peek(), TokenKind::RBracket) {
                    elements.push(self.list_element()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::List(elements))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !matches!(self.peek(), TokenKind::RBrace) {
                    let key = Expr::Literal(self.literal_value()?);
                    self.expect(&TokenKind::Colon)?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                Ok(Expr::Dict(entries))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// List elements additionally admit `a..b` ranges.
    fn list_element(&mut self) -> ParseResult<Expr> {
        let e = self.expression()?;
        if self.eat(&TokenKind::Range) {
            let hi = self.expression()?;
            return Ok(Expr::binary(Op::Range, e, hi));
        }
        Ok(e)
    }

    fn expression_list(&mut self, close: &TokenKind) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        while self.peek() != close {
            args.push(self.expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(args)
    }
}

fn level_op(level: u8, kind: &TokenKind) -> Option<Op> {
    Some(match (level, kind) {
        (0, TokenKind::OrOr) => Op::Or,
        (1, TokenKind::AndAnd) => Op::And,
        (2, TokenKind::Pipe) => Op::BitOr,
        (3, TokenKind::Caret) => Op::BitXor,
        (4, TokenKind::Amp) => Op::BitAnd,
        (5, TokenKind::EqEq) => Op::Eq,
        (5, TokenKind::NotEq) => Op::Ne,
        (6, TokenKind::Lt) => Op::Lt,
        (6, TokenKind::Le) => Op::Le,
        (6, TokenKind::Gt) => Op::Gt,
        (6, TokenKind::Ge) => Op::Ge,
        (6, TokenKind::Has) => Op::Has,
        (6, TokenKind::HasI) => Op::HasI,
        (6, TokenKind::Matches) => Op::Matches,
        (6, TokenKind::MatchesI) => Op::MatchesI,
        (7, TokenKind::Shl) => Op::Shl,
        (7, TokenKind::Shr) => Op::Shr,
        (8, TokenKind::Plus) => Op::Add,
        (8, TokenKind::Minus) => Op::Sub,
        (9, TokenKind::Star) => Op::Mul,
        (9, TokenKind::Slash) => Op::Div,
        (9, TokenKind::Percent) => Op::Mod,
        _ => return None,
    })
}

/// Chained `+` stays one variadic node (string building reads better and
/// folds in one pass); everything else pairs up.
fn combine(op: Op, left: Expr, right: Expr) -> Expr {
    if op == Op::Add {
        if let Expr::Op { op: Op::Add, mut args, match_name: None } = left {
            args.push(right);
            return Expr::Op { op: Op::Add, args, match_name: None };
        }
    }
    Expr::binary(op, left, right)
}

/// Strips the widest common leading whitespace, then joins.
fn merge_comment_lines(mut lines: Vec<String>) -> String {
    loop {
        let Some(first) = lines[0].chars().next() else { break };
        if !first.is_whitespace() {
            break;
        }
        if !lines.iter().all(|l| l.chars().next() == Some(first)) {
            break;
        }
        for line in &mut lines {
            line.remove(0);
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js::lexer::Lexer;

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
    fn increment_desugars_to_assign() {
        let tree = parse("x++;");
        assert_eq!(
            tree.stmts[0],
            Stmt::Assign {
                name: "x".into(),
                key: None,
                value: Expr::binary(Op::Add, Expr::var("x"), Expr::literal(1i64)),
            }
        );
    }

    #[test]
    fn compound_assign_desugars() {
        let tree = parse("x[0] -= 2;");
        match &tree.stmts[0] {
            Stmt::Assign { name, key, value } => {
                assert_eq!(name, "x");
                assert_eq!(key, &Some(Expr::literal(0i64)));
                match value {
                    Expr::Op { op: Op::Sub, args, .. } => {
                        assert_eq!(args[0], Expr::Variable {
                            name: "x".into(),
                            key: Some(Box::new(Expr::literal(0i64))),
                            default: None,
                        });
                    }
                    other => panic!("expected subtraction, got {:?}", other),
                }
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let tree = parse("v = 1 + 2 * 3;");
        match &tree.stmts[0] {
            Stmt::Assign { value: Expr::Op { op: Op::Add, args, .. }, .. } => {
                assert_eq!(args[0], Expr::literal(1i64));
                assert!(matches!(args[1], Expr::Op { op: Op::Mul, .. }));
            }
            other => panic!("expected addition at the top, got {:?}", other),
        }
    }

    #[test]
    fn chained_plus_is_variadic() {
        let tree = parse("v = 'a' + 'b' + 'c';");
        match &tree.stmts[0] {
            Stmt::Assign { value: Expr::Op { op: Op::Add, args, .. }, .. } => {
                assert_eq!(args.len(), 3);
            }
            other => panic!("expected one flat addition, got {:?}", other),
        }
    }

    #[test]
    fn variable_default_beats_logical_or() {
        let tree = parse("v = a || 1;");
        match &tree.stmts[0] {
            Stmt::Assign { value, .. } => assert_eq!(
                value,
                &Expr::Variable {
                    name: "a".into(),
                    key: None,
                    default: Some(Box::new(Expr::literal(1i64))),
                }
            ),
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn property_sugar() {
        let tree = parse("v = a.length; w = a.indexOf(b); x = a.host;");
        assert_eq!(
            tree.stmts[0],
            Stmt::Assign {
                name: "v".into(),
                key: None,
                value: Expr::call("len", vec![Expr::var("a")]),
            }
        );
        assert_eq!(
            tree.stmts[1],
            Stmt::Assign {
                name: "w".into(),
                key: None,
                value: Expr::call("index", vec![Expr::var("a"), Expr::var("b")]),
            }
        );
        assert_eq!(
            tree.stmts[2],
            Stmt::Assign {
                name: "x".into(),
                key: None,
                value: Expr::Variable {
                    name: "a".into(),
                    key: Some(Box::new(Expr::literal("host"))),
                    default: None,
                },
            }
        );
    }

    #[test]
    fn char_at_becomes_keyed_variable() {
        let tree = parse("v = s.charAt(2);");
        match &tree.stmts[0] {
            Stmt::Assign { value, .. } => assert_eq!(
                value,
                &Expr::Variable {
                    name: "s".into(),
                    key: Some(Box::new(Expr::literal(2i64))),
                    default: None,
                }
            ),
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn unknown_property_method_is_an_error() {
        let err = parse_err("v = a.reverse();");
        assert!(matches!(err.kind, ErrorKind::Syntax(ref m) if m.contains("unknown object property")));
    }

    #[test]
    fn negation_requires_a_literal() {
        let err = parse_err("v = -a;");
        assert_eq!(err.kind, ErrorKind::InvalidNegation);
        let tree = parse("v = -3;");
        assert_eq!(
            tree.stmts[0],
            Stmt::Assign { name: "v".into(), key: None, value: Expr::literal(-3i64) }
        );
    }

    #[test]
    fn matches_as_names_the_match() {
        let tree = parse("if (h matches 'x(.*)' as m) v = 1;");
        match &tree.stmts[0] {
            Stmt::If(i) => match &i.test {
                Expr::Op { op: Op::Matches, match_name, .. } => {
                    assert_eq!(match_name.as_deref(), Some("m"));
                }
                other => panic!("expected matches, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn else_if_chains_nest_right() {
        let tree = parse("if (a) x = 1; else if (b) x = 2; else x = 3;");
        match &tree.stmts[0] {
            Stmt::If(i) => match i.otherwise.as_deref() {
                Some(Stmt::If(inner)) => assert!(inner.otherwise.is_some()),
                other => panic!("expected nested if, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn counted_for_lowers_to_range_foreach() {
        let tree = parse("for (i = 0; i < 5; i += 1) v = i;");
        assert_eq!(tree.stmts.len(), 3);
        assert!(matches!(&tree.stmts[0], Stmt::Assign { name, .. } if name == "i"));
        match &tree.stmts[1] {
            Stmt::Assign { name, value: Expr::List(items), .. } => {
                assert_eq!(name, "_loop");
                assert!(matches!(items[0], Expr::Op { op: Op::Range, .. }));
            }
            other => panic!("expected _loop assign, got {:?}", other),
        }
        match &tree.stmts[2] {
            Stmt::ForEach { body, .. } => match body.as_ref() {
                Stmt::Block(b) => {
                    assert_eq!(b.stmts.len(), 3);
                    assert!(matches!(b.stmts[0], Stmt::If(_)));
                }
                other => panic!("expected block body, got {:?}", other),
            },
            other => panic!("expected foreach, got {:?}", other),
        }
    }

    #[test]
    fn for_of_keeps_item_name() {
        let tree = parse("for (let x of list) v = x;");
        assert!(matches!(&tree.stmts[0], Stmt::ForEach { item: Some(name), .. } if name == "x"));
    }

    #[test]
    fn counted_for_accepts_declaration_prefix() {
        let tree = parse("for (let i = 0; i < 3; i++) v = i;");
        assert!(matches!(&tree.stmts[2], Stmt::ForEach { .. }));
    }

    #[test]
    fn print_family_lowers_to_output() {
        let tree = parse("print(x); printraw('lit'); printv(y);");
        assert!(matches!(&tree.stmts[0], Stmt::Output(o) if !o.raw && !o.vars));
        assert!(matches!(&tree.stmts[1], Stmt::Output(o) if o.raw));
        assert!(matches!(&tree.stmts[2], Stmt::Output(o) if o.vars));
    }

    #[test]
    fn printraw_rejects_non_literals() {
        let err = parse_err("printraw(x);");
        assert!(matches!(err.kind, ErrorKind::Structure(ref m) if m.contains("printraw")));
    }

    #[test]
    fn ternary_lowers_to_conditional() {
        let tree = parse("v = c ? 'a' : 'b';");
        match &tree.stmts[0] {
            Stmt::Assign { value: Expr::Conditional { name, .. }, .. } => assert_eq!(name, "c"),
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn include_named_arguments() {
        let tree = parse("include(src='/frag.html', maxWait=300, appendHeader='X-A: 1');");
        match &tree.stmts[0] {
            Stmt::Include(inc) => {
                assert!(!inc.eval);
                assert_eq!(inc.max_wait, Some(Expr::literal(300i64)));
                assert_eq!(inc.append_header.len(), 1);
            }
            other => panic!("expected include, got {:?}", other),
        }
    }

    #[test]
    fn include_unknown_parameter_gets_hint() {
        let err = parse_err("include(src='/a', onerror='continue');");
        match err.kind {
            ErrorKind::UnknownAttribute { hint, .. } => {
                assert_eq!(hint.as_deref(), Some("onError"))
            }
            other => panic!("expected unknown attribute, got {:?}", other),
        }
    }

    #[test]
    fn include_requires_src() {
        let err = parse_err("include(alt='/b');");
        assert!(matches!(err.kind, ErrorKind::MissingAttribute { .. }));
    }

    #[test]
    fn require_parses_force() {
        let tree = parse("require('util.js'); require('all.js', force=true);");
        assert!(matches!(&tree.stmts[0], Stmt::Import(imp) if !imp.force));
        assert!(matches!(&tree.stmts[1], Stmt::Import(imp) if imp.force));
    }

    #[test]
    fn inline_function_markers() {
        for source in [
            "function inline i(x) return x*2;",
            "function i(x) { inline return x*2; }",
            "function i(x) { 'inline'; return x*2; }",
        ] {
            let tree = parse(source);
            assert!(
                matches!(&tree.stmts[0], Stmt::Function(f) if f.inline),
                "not inline for {:?}",
                source
            );
        }
        let tree = parse("function f(x) { return x; }");
        assert!(matches!(&tree.stmts[0], Stmt::Function(f) if !f.inline));
    }

    #[test]
    fn braces_group_rather_than_nest() {
        let tree = parse("{ a = 1; b = 2; } c = 3;");
        assert_eq!(tree.stmts.len(), 3);
    }

    #[test]
    fn comment_runs_merge_and_split() {
        let tree = parse("//### one\n//### two\n//\n//### three\n");
        assert_eq!(tree.stmts.len(), 2);
        assert_eq!(tree.stmts[0], Stmt::Comment("one\ntwo".into()));
        assert_eq!(tree.stmts[1], Stmt::Comment("three".into()));
    }

    #[test]
    fn adjacent_strings_concatenate() {
        let tree = parse("v = 'a' 'b';");
        assert!(matches!(&tree.stmts[0], Stmt::Assign { value, .. } if value == &Expr::literal("ab")));
    }
}
