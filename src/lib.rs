//! Bidirectional translator between a restricted JavaScript dialect and
//! the ESI (Edge Side Includes) template language.
//!
//! Both directions meet in one tree model: compiling parses the
//! JS-dialect, resolves `require` imports, optimizes, and serializes ESI;
//! decompiling parses ESI and pretty-prints the dialect. Either output
//! re-parses to the same tree, so a translation round-trip reaches a
//! fixed point after one round.

pub mod ast;
pub mod cli;
pub mod compile;
pub mod emit;
pub mod error;
pub mod esi;
pub mod imports;
pub mod js;
pub mod optimize;
pub mod suggest;

pub use compile::{compile_str, decompile_str, CompileOptions, GENERATED_WARNING};
pub use error::{CompileError, Error, ErrorKind};
