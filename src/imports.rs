//! `require` resolution: each Import node is looked up across the library
//! path (then the importing file's directory), parsed recursively, and
//! spliced in as its inline subtree. A per-run set of canonical paths
//! deduplicates transitive imports unless `force` is set.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ast::{Block, Import, Stmt};
use crate::compile::parse_js_source;
use crate::error::CompileError;

pub struct ImportResolver {
    lib: Vec<PathBuf>,
    imported: HashSet<PathBuf>,
    verbose: u8,
}

impl ImportResolver {
    pub fn new(lib: Vec<PathBuf>, verbose: u8) -> Self {
        ImportResolver { lib, imported: HashSet::new(), verbose }
    }

    pub fn resolve(&mut self, tree: &mut Block, from: &Path) -> Result<(), CompileError> {
        for stmt in &mut tree.stmts {
            self.resolve_stmt(stmt, from)?;
        }
        Ok(())
    }

    fn resolve_stmt(&mut self, stmt: &mut Stmt, from: &Path) -> Result<(), CompileError> {
        match stmt {
            Stmt::Import(imp) => self.resolve_import(imp, from),
            Stmt::Block(b) => self.resolve(b, from),
            Stmt::Fragment(stmts) | Stmt::DebugBlock(stmts) | Stmt::IfDebug(stmts) => {
                for stmt in stmts {
                    self.resolve_stmt(stmt, from)?;
                }
                Ok(())
            }
            Stmt::If(i) => {
                if let Some(then) = &mut i.then {
                    self.resolve_stmt(then, from)?;
                }
                if let Some(otherwise) = &mut i.otherwise {
                    self.resolve_stmt(otherwise, from)?;
                }
                Ok(())
            }
            Stmt::ForEach { body, .. } => self.resolve_stmt(body, from),
            Stmt::Try { attempt, except } => {
                self.resolve_stmt(attempt, from)?;
                if let Some(except) = except {
                    self.resolve_stmt(except, from)?;
                }
                Ok(())
            }
            Stmt::Function(f) => self.resolve_stmt(&mut f.body, from),
            _ => Ok(()),
        }
    }

    fn resolve_import(&mut self, imp: &mut Import, from: &Path) -> Result<(), CompileError> {
        if imp.inline.is_some() {
            return Ok(());
        }
        if self.verbose >= 1 {
            eprintln!(
                "[  ] resolving import of \"{}\" from \"{}\"...",
                imp.src,
                from.display()
            );
        }
        let parent = from.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let mut found = None;
        for dir in self.lib.iter().chain(std::iter::once(&parent)) {
            let candidate = dir.join(&imp.src);
            match fs::read_to_string(&candidate) {
                Ok(source) => {
                    found = Some((candidate, source));
                    break;
                }
                Err(err) => {
                    if self.verbose >= 3 {
                        if err.kind() == std::io::ErrorKind::NotFound {
                            eprintln!(
                                "[  ]   tried \"{}\" and failed: file not found",
                                candidate.display()
                            );
                        } else {
                            eprintln!(
                                "[  ]   tried \"{}\" and failed: {}",
                                candidate.display(),
                                err
                            );
                        }
                    }
                }
            }
        }
        let Some((path, source)) = found else {
            eprintln!("[**] ERROR: could not find import \"{}\"", imp.src);
            return Err(CompileError::Errors { count: 1, decompiling: false });
        };
        let real = path.canonicalize().unwrap_or_else(|_| path.clone());
        if !imp.force && self.imported.contains(&real) {
            if self.verbose >= 2 {
                eprintln!("[  ] skipping import of \"{}\" (already imported)", path.display());
            }
            imp.inline = Some(Block::new());
            return Ok(());
        }
        if self.verbose >= 1 {
            eprintln!("[  ] importing \"{}\"...", path.display());
        }
        let mut subtree = parse_js_source(&source, &path.display().to_string())?;
        self.imported.insert(real);
        self.resolve(&mut subtree, &path)?;
        imp.inline = Some(subtree);
        Ok(())
    }
}
