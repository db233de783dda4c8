//! Shared emission machinery: the context threaded through every emitter
//! call, with its buffer stack and mode flags.

pub mod esi;
pub mod js;

use std::fmt;
use std::mem;

/// Indent counter; renders two spaces per level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Indent {
    level: usize,
}

impl Indent {
    pub fn inc(&mut self) {
        self.level += 1;
    }

    pub fn dec(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    pub fn level(&self) -> usize {
        self.level
    }
}

impl fmt::Display for Indent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.level {
            f.write_str("  ")?;
        }
        Ok(())
    }
}

/// Mutable state threaded through emission.
#[derive(Debug, Default)]
pub struct Context {
    out: String,
    buffers: Vec<String>,
    pub indent: Indent,
    /// >0 while inside `<esi:choose>`: an If emits `<esi:when>` instead of
    /// opening a fresh choose.
    pub testlevel: u32,
    /// Single-slot reservation carrying a match name from the Matches
    /// operator inside a test up to the enclosing when element.
    pub matchname: Option<String>,
    /// Vars emission mode: literals drop quoting and use `$`/`\` escaping,
    /// operators drop the parentheses around nested operators.
    pub isvars: bool,
    /// Materialise Debug nodes and debug rewrites.
    pub debug: bool,
    /// Stack of node labels currently being emitted (debugging aid).
    pub nodehier: Vec<&'static str>,
    /// Widest lvalue of the current assign group (JS alignment).
    pub assignwidth: usize,
    /// Whether the next comment is the first of its group.
    pub firstcomment: bool,
}

impl Context {
    pub fn new() -> Context {
        Context { firstcomment: true, ..Context::default() }
    }

    pub fn write(&mut self, text: &str) {
        self.out.push_str(text);
    }

    /// Suspends the current sink and collects subsequent writes in a fresh
    /// buffer, for lookahead decisions.
    pub fn push_buffered(&mut self) {
        let suspended = mem::take(&mut self.out);
        self.buffers.push(suspended);
    }

    /// Returns the buffered text and restores the suspended sink.
    pub fn pop_buffered(&mut self) -> String {
        let buffered = mem::replace(&mut self.out, self.buffers.pop().unwrap_or_default());
        buffered
    }

    pub fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indent_renders_two_spaces_per_level() {
        let mut indent = Indent::default();
        assert_eq!(indent.to_string(), "");
        indent.inc();
        indent.inc();
        assert_eq!(indent.to_string(), "    ");
        indent.dec();
        assert_eq!(indent.to_string(), "  ");
    }

    #[test]
    fn indent_does_not_underflow() {
        let mut indent = Indent::default();
        indent.dec();
        assert_eq!(indent.level(), 0);
    }

    #[test]
    fn buffers_nest_and_restore() {
        let mut ctxt = Context::new();
        ctxt.write("a");
        ctxt.push_buffered();
        ctxt.write("b");
        ctxt.push_buffered();
        ctxt.write("c");
        assert_eq!(ctxt.pop_buffered(), "c");
        assert_eq!(ctxt.pop_buffered(), "b");
        ctxt.write("d");
        assert_eq!(ctxt.finish(), "ad");
    }
}
