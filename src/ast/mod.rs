//! The shared tree model both surface languages parse into and both
//! emitters consume. Nodes are plain owned enums; rewrite passes replace
//! subtrees in place and deep-copy (`Clone`) where a value must appear at
//! several sites.

mod expr;
mod stmt;

pub use expr::{Expr, Op, Value, ValueKind};
pub use stmt::{Block, FunctionDef, If, Include, Import, Output, Param, Stmt};
