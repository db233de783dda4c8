use serde::Serialize;

use super::expr::{Expr, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    Block(Block),
    /// Statement run without any brace/grouping behavior of its own.
    Fragment(Vec<Stmt>),
    Assign {
        name: String,
        key: Option<Expr>,
        value: Expr,
    },
    If(If),
    ForEach {
        collection: Expr,
        body: Box<Stmt>,
        /// Iteration variable; `None` and `"item"` are equivalent on the
        /// ESI side.
        item: Option<String>,
    },
    Break,
    Try {
        attempt: Box<Stmt>,
        except: Option<Box<Stmt>>,
    },
    Function(FunctionDef),
    Return(Option<Expr>),
    Include(Include),
    Import(Import),
    Output(Output),
    Comment(String),
    /// An expression in statement position (a bare function call, or the
    /// defaulted variable reads a lowered conditional leaves in a branch).
    Expr(Expr),
    /// Appends its expression to the debug log variable; emitted only when
    /// the context's debug flag is on.
    Debug(Expr),
    /// Brackets its statements with debug-log setup and a response-code
    /// trailer under debug emission; otherwise emits the statements alone.
    DebugBlock(Vec<Stmt>),
    /// Emits its statements only under debug emission.
    IfDebug(Vec<Stmt>),
}

impl Stmt {
    /// Short label for the emitter's node-hierarchy stack.
    pub fn label(&self) -> &'static str {
        match self {
            Stmt::Block(_) => "Block",
            Stmt::Fragment(_) => "BlockFragment",
            Stmt::Assign { .. } => "Assign",
            Stmt::If(_) => "If",
            Stmt::ForEach { .. } => "ForEach",
            Stmt::Break => "Break",
            Stmt::Try { .. } => "Try",
            Stmt::Function(_) => "FunctionDefinition",
            Stmt::Return(_) => "FunctionReturn",
            Stmt::Include(inc) => {
                if inc.eval {
                    "Eval"
                } else {
                    "Include"
                }
            }
            Stmt::Import(_) => "Import",
            Stmt::Output(_) => "Output",
            Stmt::Comment(_) => "Comment",
            Stmt::Expr(_) => "Expression",
            Stmt::Debug(_) => "Debug",
            Stmt::DebugBlock(_) => "DebugBlock",
            Stmt::IfDebug(_) => "IfDebug",
        }
    }
}

/// Ordered statement list. `explicit` forces brace emission in JS output
/// even around a single statement.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub explicit: bool,
}

impl Block {
    pub fn new() -> Block {
        Block::default()
    }

    pub fn of(stmts: Vec<Stmt>) -> Block {
        let mut block = Block::new();
        for stmt in stmts {
            block.push(stmt);
        }
        block
    }

    /// Appends a statement; a plain nested Block is spliced into this one
    /// (braces in source group statements, they do not nest scopes).
    pub fn push(&mut self, stmt: Stmt) {
        match stmt {
            Stmt::Block(inner) => {
                for sub in inner.stmts {
                    self.push(sub);
                }
            }
            other => self.stmts.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct If {
    pub test: Expr,
    pub then: Option<Box<Stmt>>,
    /// `Some(Stmt::If(..))` forms an else-if chain.
    pub otherwise: Option<Box<Stmt>>,
    /// Emitted before the `<esi:choose>` under debug emission.
    pub debug: Option<Box<Stmt>>,
}

impl If {
    pub fn new(test: Expr, then: Option<Stmt>, otherwise: Option<Stmt>) -> If {
        If {
            test,
            then: then.map(Box::new),
            otherwise: otherwise.map(Box::new),
            debug: None,
        }
    }

    /// Attaches a debug marker: the marker statement runs before the
    /// choose, and the branches get yes/no log lines prepended.
    pub fn with_debug(test: Expr, then: Option<Stmt>, otherwise: Option<Stmt>, marker: Stmt) -> If {
        let tag = |label: &str, branch: Option<Stmt>| {
            let mut block = Block::new();
            block.stmts.push(Stmt::Debug(Expr::binary(
                super::Op::Add,
                Expr::literal(label),
                Expr::literal("\n"),
            )));
            if let Some(stmt) = branch {
                block.stmts.push(stmt);
            }
            Some(Stmt::Block(block))
        };
        If {
            test,
            then: tag("yes", then).map(Box::new),
            otherwise: tag("no", otherwise).map(Box::new),
            debug: Some(Box::new(marker)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Box<Stmt>,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
}

/// `<esi:include>` / `<esi:eval>` with the recognized attribute bag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Include {
    pub eval: bool,
    pub src: Expr,
    pub alt: Option<Expr>,
    pub dca: Option<Expr>,
    pub on_error: Option<Expr>,
    pub max_wait: Option<Expr>,
    pub ttl: Option<Expr>,
    pub no_store: Option<Expr>,
    pub method: Option<Expr>,
    pub entity: Option<Expr>,
    pub append_header: Vec<Expr>,
    pub remove_header: Vec<Expr>,
    pub set_header: Vec<Expr>,
}

impl Include {
    /// Canonical parameter names, in emission order.
    pub const PARAMS: &'static [&'static str] = &[
        "src", "alt", "dca", "onError", "maxWait", "ttl", "noStore",
        "method", "entity", "appendHeader", "removeHeader", "setHeader",
    ];

    pub fn new(eval: bool, src: Expr) -> Include {
        Include {
            eval,
            src,
            alt: None,
            dca: None,
            on_error: None,
            max_wait: None,
            ttl: None,
            no_store: None,
            method: None,
            entity: None,
            append_header: Vec::new(),
            remove_header: Vec::new(),
            set_header: Vec::new(),
        }
    }

    pub fn element_name(&self) -> &'static str {
        if self.eval {
            "eval"
        } else {
            "include"
        }
    }

    /// Stores a value under its canonical parameter name. A header value
    /// that is a List contributes its elements; any other header value is
    /// appended as one entry. Returns false for unknown names.
    pub fn set(&mut self, name: &str, value: Expr) -> bool {
        let slot = match name {
            "src" => {
                self.src = value;
                return true;
            }
            "alt" => &mut self.alt,
            "dca" => &mut self.dca,
            "onError" => &mut self.on_error,
            "maxWait" => &mut self.max_wait,
            "ttl" => &mut self.ttl,
            "noStore" => &mut self.no_store,
            "method" => &mut self.method,
            "entity" => &mut self.entity,
            "appendHeader" | "removeHeader" | "setHeader" => {
                let list = match name {
                    "appendHeader" => &mut self.append_header,
                    "removeHeader" => &mut self.remove_header,
                    _ => &mut self.set_header,
                };
                match value {
                    Expr::List(elements) => list.extend(elements),
                    other => list.push(other),
                }
                return true;
            }
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Import {
    pub src: String,
    pub force: bool,
    /// Parsed subtree of the imported file; an empty block marks a
    /// deduplicated transitive import.
    pub inline: Option<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    pub parts: Vec<Expr>,
    /// Literal parts only, emitted verbatim.
    pub raw: bool,
    /// Wrap in `<esi:vars>` on ESI emission.
    pub vars: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_splices_nested_blocks() {
        let mut outer = Block::new();
        let mut inner = Block::new();
        inner.stmts.push(Stmt::Break);
        inner.stmts.push(Stmt::Comment("x".into()));
        outer.push(Stmt::Block(inner));
        outer.push(Stmt::Break);
        assert_eq!(outer.stmts.len(), 3);
        assert!(matches!(outer.stmts[0], Stmt::Break));
        assert!(matches!(outer.stmts[2], Stmt::Break));
    }

    #[test]
    fn include_set_wraps_single_header_value() {
        let mut inc = Include::new(false, Expr::literal("/a"));
        assert!(inc.set("appendHeader", Expr::literal("X-A: 1")));
        assert!(inc.set("appendHeader", Expr::List(vec![
            Expr::literal("X-B: 2"),
            Expr::literal("X-C: 3"),
        ])));
        assert_eq!(inc.append_header.len(), 3);
    }

    #[test]
    fn include_set_rejects_unknown_names() {
        let mut inc = Include::new(false, Expr::literal("/a"));
        assert!(!inc.set("collection", Expr::literal(1i64)));
    }
}
