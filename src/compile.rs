//! End-to-end pipelines: source text in, translated text out. The CLI
//! and the test suite both sit on these entry points.

use std::path::{Path, PathBuf};

use crate::ast::Block;
use crate::emit::{self, Context};
use crate::error::{CompileError, Reporter};
use crate::imports::ImportResolver;
use crate::optimize::optimize;
use crate::{esi, js};

/// Marker prepended to generated ESI unless warnings are disabled.
pub const GENERATED_WARNING: &str =
    "<esi:comment text=\"\n---- WARNING: GENERATED ESI ----\n\"/>";

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// 0–9; see the optimizer for what each threshold enables.
    pub optimize_level: u32,
    /// Emit the generated-ESI warning comment.
    pub warn: bool,
    /// Materialise runtime-debug scaffolding in the output.
    pub debug: bool,
    /// Import lookup path, highest precedence first.
    pub lib: Vec<PathBuf>,
    pub verbose: u8,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { optimize_level: 7, warn: true, debug: false, lib: Vec::new(), verbose: 0 }
    }
}

fn finish_parse(
    reporter: &mut Reporter,
    result: Result<Block, crate::error::Error>,
    decompiling: bool,
) -> Result<Block, CompileError> {
    match result {
        Ok(tree) => {
            reporter.flush_to_stderr();
            if reporter.count > 0 {
                Err(CompileError::Errors { count: reporter.count, decompiling })
            } else {
                Ok(tree)
            }
        }
        Err(err) => {
            reporter.flush_to_stderr();
            if err.is_counted() {
                Err(CompileError::Errors { count: reporter.count.max(1), decompiling })
            } else {
                Err(CompileError::Fatal(err))
            }
        }
    }
}

pub fn parse_js_source(source: &str, filename: &str) -> Result<Block, CompileError> {
    let mut reporter = Reporter::new(filename);
    let tokens = js::lexer::Lexer::new(source, &mut reporter).tokenize();
    let result = js::parser::Parser::new(tokens, &mut reporter).parse_program();
    finish_parse(&mut reporter, result, false)
}

pub fn parse_esi_source(source: &str, filename: &str) -> Result<Block, CompileError> {
    let mut reporter = Reporter::new(filename);
    let tokens = esi::lexer::Lexer::new(source, &mut reporter).tokenize();
    let result = esi::parser::Parser::new(tokens, &mut reporter).parse_program();
    finish_parse(&mut reporter, result, true)
}

/// JS-dialect → ESI: parse, pull in imports, optimize, serialize.
pub fn compile_str(
    source: &str,
    filename: &str,
    opts: &CompileOptions,
) -> Result<String, CompileError> {
    let mut tree = parse_js_source(source, filename)?;
    let mut resolver = ImportResolver::new(opts.lib.clone(), opts.verbose);
    resolver.resolve(&mut tree, Path::new(filename))?;
    optimize(&mut tree, opts.optimize_level)?;

    let mut ctxt = Context::new();
    ctxt.debug = opts.debug;
    if opts.warn {
        ctxt.write(GENERATED_WARNING);
    }
    emit::esi::program(&tree, &mut ctxt)?;
    Ok(ctxt.finish())
}

/// ESI → JS-dialect: parse and pretty-print. No import or optimizer pass
/// applies in this direction.
pub fn decompile_str(source: &str, filename: &str) -> Result<String, CompileError> {
    let tree = parse_esi_source(source, filename)?;
    let mut ctxt = Context::new();
    emit::js::program(&tree, &mut ctxt)?;
    Ok(ctxt.finish())
}
