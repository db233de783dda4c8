//! IR → JS-dialect pretty-printer.

use std::mem::discriminant;

use crate::ast::{Block, Expr, If, Include, Op, Output, Stmt, Value};
use crate::emit::Context;
use crate::error::{Error, ErrorKind};

pub fn program(block: &Block, ctxt: &mut Context) -> Result<(), Error> {
    emit_block(block, ctxt)
}

pub fn stmt(s: &Stmt, ctxt: &mut Context) -> Result<(), Error> {
    ctxt.nodehier.push(s.label());
    let result = stmt_inner(s, ctxt);
    ctxt.nodehier.pop();
    result
}

fn stmt_inner(s: &Stmt, ctxt: &mut Context) -> Result<(), Error> {
    match s {
        Stmt::Block(b) => emit_block(b, ctxt),
        Stmt::Fragment(stmts) => {
            for st in stmts {
                stmt(st, ctxt)?;
            }
            Ok(())
        }
        Stmt::Assign { name, key, value } => assign(name, key.as_ref(), value, ctxt),
        Stmt::If(i) => if_stmt(i, ctxt),
        Stmt::ForEach { collection, body, item } => {
            let item = item.as_deref().unwrap_or("item");
            ctxt.write(&format!("{}for (const {} of ", ctxt.indent, item));
            expr(collection, ctxt)?;
            ctxt.write(")\n");
            ctxt.indent.inc();
            stmt(body, ctxt)?;
            ctxt.indent.dec();
            Ok(())
        }
        Stmt::Break => {
            ctxt.write(&format!("{}break;\n", ctxt.indent));
            Ok(())
        }
        Stmt::Try { attempt, except } => {
            ctxt.write(&format!("{}try\n", ctxt.indent));
            ctxt.indent.inc();
            stmt(attempt, ctxt)?;
            ctxt.indent.dec();
            if let Some(except) = except {
                ctxt.write(&format!("{}catch(e)\n", ctxt.indent));
                ctxt.indent.inc();
                stmt(except, ctxt)?;
                ctxt.indent.dec();
            }
            Ok(())
        }
        Stmt::Function(f) => {
            ctxt.write(&format!("{}function {}(", ctxt.indent, f.name));
            for (idx, param) in f.params.iter().enumerate() {
                if idx != 0 {
                    ctxt.write(", ");
                }
                ctxt.write(&param.name);
                if let Some(default) = &param.default {
                    ctxt.write("=");
                    ctxt.write(&literal(default));
                }
            }
            ctxt.write(")\n");
            ctxt.indent.inc();
            stmt(&f.body, ctxt)?;
            ctxt.indent.dec();
            Ok(())
        }
        Stmt::Return(value) => {
            match value {
                None => ctxt.write(&format!("{}return;\n", ctxt.indent)),
                Some(e) => {
                    ctxt.write(&format!("{}return ", ctxt.indent));
                    expr(e, ctxt)?;
                    ctxt.write(";\n");
                }
            }
            Ok(())
        }
        Stmt::Include(inc) => include(inc, ctxt),
        Stmt::Import(imp) => {
            ctxt.write(&format!("{}require(", ctxt.indent));
            ctxt.write(&quote(&imp.src));
            if imp.force {
                ctxt.write(", force=true");
            }
            ctxt.write(");\n");
            Ok(())
        }
        Stmt::Output(o) => output(o, ctxt),
        Stmt::Comment(message) => {
            if !ctxt.firstcomment {
                ctxt.write(&format!("{}//\n", ctxt.indent));
            }
            ctxt.firstcomment = false;
            let sep = format!("\n{}//### ", ctxt.indent);
            ctxt.write(&format!("{}//### ", ctxt.indent));
            ctxt.write(&message.split('\n').collect::<Vec<_>>().join(&sep));
            ctxt.write("\n");
            Ok(())
        }
        Stmt::Expr(e) => {
            ctxt.write(&ctxt.indent.to_string());
            expr(e, ctxt)?;
            ctxt.write(";\n");
            Ok(())
        }
        // Debug scaffolding has no JS surface.
        Stmt::Debug(_) | Stmt::IfDebug(_) => Ok(()),
        Stmt::DebugBlock(stmts) => {
            for st in stmts {
                stmt(st, ctxt)?;
            }
            Ok(())
        }
    }
}

/// Emits a block: no braces around a single plain statement, otherwise a
/// braced group with consecutive same-kind statements formatted together
/// (assign alignment, comment separation). The braces sit one indent
/// level out from the content.
fn emit_block(b: &Block, ctxt: &mut Context) -> Result<(), Error> {
    if b.stmts.is_empty() {
        ctxt.write(&format!("{}{{}}\n", ctxt.indent));
        return Ok(());
    }
    if b.stmts.len() == 1 && !matches!(b.stmts[0], Stmt::Comment(_)) && !b.explicit {
        return stmt(&b.stmts[0], ctxt);
    }

    let mut groups: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;
    for idx in 1..b.stmts.len() {
        if discriminant(&b.stmts[idx]) != discriminant(&b.stmts[start]) {
            groups.push((start, idx));
            start = idx;
        }
    }
    groups.push((start, b.stmts.len()));

    let outdent = ctxt.indent.level() >= 1;
    if outdent {
        ctxt.indent.dec();
    }
    ctxt.write(&format!("{}{{\n", ctxt.indent));
    ctxt.indent.inc();
    for (lo, hi) in groups {
        let group = &b.stmts[lo..hi];
        ctxt.assignwidth = 0;
        if matches!(group[0], Stmt::Assign { .. }) {
            let mut widest = 0;
            for st in group {
                widest = widest.max(assign_width(st, ctxt)?);
            }
            ctxt.assignwidth = widest;
        }
        ctxt.firstcomment = true;
        for st in group {
            stmt(st, ctxt)?;
        }
    }
    ctxt.indent.dec();
    ctxt.write(&format!("{}}}\n", ctxt.indent));
    if outdent {
        ctxt.indent.inc();
    }
    Ok(())
}

fn assign_width(s: &Stmt, ctxt: &mut Context) -> Result<usize, Error> {
    if let Stmt::Assign { name, key, .. } = s {
        let mut width = name.len();
        if let Some(key) = key {
            width += 2 + expr_buf(key, ctxt)?.len();
        }
        Ok(width)
    } else {
        Ok(0)
    }
}

fn assign(name: &str, key: Option<&Expr>, value: &Expr, ctxt: &mut Context) -> Result<(), Error> {
    ctxt.write(&ctxt.indent.to_string());
    let lvalue = match key {
        Some(key) => format!("{}[{}]", name, expr_buf(key, ctxt)?),
        None => name.to_string(),
    };
    ctxt.write(&lvalue);
    let pad = ctxt.assignwidth.saturating_sub(lvalue.len());
    ctxt.write(&" ".repeat(pad));

    // `a = a + X` folds to `a += X` when the leading operand reads the
    // lvalue back (same name, same key).
    if let Expr::Op { op, args, match_name: None } = value {
        if op.folds() && args.len() >= 2 {
            if let Expr::Variable { name: vname, key: vkey, default: None } = &args[0] {
                let same_key = match (key, vkey) {
                    (None, None) => true,
                    (Some(a), Some(b)) => a == b.as_ref(),
                    _ => false,
                };
                if vname == name && same_key {
                    ctxt.write(&format!(" {}= ", op.symbol()));
                    nary(*op, &args[1..], ctxt)?;
                    ctxt.write(";\n");
                    return Ok(());
                }
            }
        }
    }
    ctxt.write(" = ");
    expr(value, ctxt)?;
    ctxt.write(";\n");
    Ok(())
}

fn if_stmt(i: &If, ctxt: &mut Context) -> Result<(), Error> {
    let priortestlevel = ctxt.testlevel;
    let head = if ctxt.testlevel == 0 { "if ( " } else { "else if ( " };
    ctxt.write(&format!("{}{}", ctxt.indent, head));
    expr(&i.test, ctxt)?;
    ctxt.write(" )\n");
    if let Some(then) = &i.then {
        ctxt.indent.inc();
        ctxt.testlevel = 0;
        if is_single_if(then) {
            // Braces around a lone nested If keep the else-association
            // unambiguous on the round trip.
            let wrapped = Block { stmts: vec![(**then).clone()], explicit: true };
            emit_block(&wrapped, ctxt)?;
        } else {
            stmt(then, ctxt)?;
        }
        ctxt.indent.dec();
    } else {
        ctxt.write(&format!("{}{{}}\n", ctxt.indent));
    }
    if let Some(otherwise) = &i.otherwise {
        if matches!(**otherwise, Stmt::If(_)) {
            ctxt.testlevel = 1;
            stmt(otherwise, ctxt)?;
        } else {
            ctxt.testlevel = 0;
            ctxt.write(&format!("{}else\n", ctxt.indent));
            ctxt.indent.inc();
            stmt(otherwise, ctxt)?;
            ctxt.indent.dec();
        }
    }
    ctxt.testlevel = priortestlevel;
    Ok(())
}

fn is_single_if(s: &Stmt) -> bool {
    match s {
        Stmt::If(_) => true,
        Stmt::Block(b) => b.stmts.len() == 1 && is_single_if(&b.stmts[0]),
        _ => false,
    }
}

fn include(inc: &Include, ctxt: &mut Context) -> Result<(), Error> {
    ctxt.write(&ctxt.indent.to_string());
    ctxt.write(if inc.eval { "eval(" } else { "include(" });
    ctxt.write("src=");
    expr(&inc.src, ctxt)?;
    let named: [(&str, &Option<Expr>); 8] = [
        ("alt", &inc.alt),
        ("dca", &inc.dca),
        ("onError", &inc.on_error),
        ("maxWait", &inc.max_wait),
        ("ttl", &inc.ttl),
        ("noStore", &inc.no_store),
        ("method", &inc.method),
        ("entity", &inc.entity),
    ];
    for (name, value) in named {
        if let Some(value) = value {
            ctxt.write(&format!(", {}=", name));
            expr(value, ctxt)?;
        }
    }
    let headers: [(&str, &Vec<Expr>); 3] = [
        ("appendHeader", &inc.append_header),
        ("removeHeader", &inc.remove_header),
        ("setHeader", &inc.set_header),
    ];
    for (name, values) in headers {
        if values.is_empty() {
            continue;
        }
        ctxt.write(&format!(", {}=[", name));
        for (idx, value) in values.iter().enumerate() {
            if idx != 0 {
                ctxt.write(", ");
            }
            expr(value, ctxt)?;
        }
        ctxt.write("]");
    }
    ctxt.write(");\n");
    Ok(())
}

fn output(o: &Output, ctxt: &mut Context) -> Result<(), Error> {
    if o.parts.len() == 1 && !o.raw {
        let name = if o.vars { "printv" } else { "print" };
        ctxt.write(&format!("{}{}(", ctxt.indent, name));
        expr(&o.parts[0], ctxt)?;
        ctxt.write(");\n");
        return Ok(());
    }
    let name = if o.raw { "printraw" } else { "print" };
    let mut stmts: Vec<Stmt> =
        o.parts.iter().map(|p| Stmt::Expr(Expr::call(name, vec![p.clone()]))).collect();
    if o.vars {
        stmts.insert(0, Stmt::Expr(Expr::call("printraw", vec![Expr::literal("<esi:vars>")])));
        stmts.push(Stmt::Expr(Expr::call("printraw", vec![Expr::literal("</esi:vars>")])));
    }
    emit_block(&Block { stmts, explicit: false }, ctxt)
}

pub fn expr(e: &Expr, ctxt: &mut Context) -> Result<(), Error> {
    match e {
        Expr::Literal(v) => {
            ctxt.write(&literal(v));
            Ok(())
        }
        Expr::Variable { name, key, default } => {
            ctxt.write(name);
            if let Some(key) = key {
                ctxt.write("[");
                expr(key, ctxt)?;
                ctxt.write("]");
            }
            if let Some(default) = default {
                ctxt.write("||");
                expr(default, ctxt)?;
            }
            Ok(())
        }
        Expr::Call { name, args, .. } => {
            ctxt.write(&format!("{}(", name));
            for (idx, arg) in args.iter().enumerate() {
                if idx != 0 {
                    ctxt.write(", ");
                }
                expr(arg, ctxt)?;
            }
            ctxt.write(")");
            Ok(())
        }
        Expr::Op { op, args, match_name } => {
            if op.is_unary() {
                if args.len() != 1 {
                    return Err(Error::new(ErrorKind::Operator(format!(
                        "unary {} operator takes exactly one argument",
                        op.symbol()
                    ))));
                }
                if matches!(args[0], Expr::Op { .. }) {
                    ctxt.write(&format!("{} (", op.symbol()));
                    expr(&args[0], ctxt)?;
                    ctxt.write(")");
                } else {
                    ctxt.write(&format!("{} ", op.symbol()));
                    expr(&args[0], ctxt)?;
                }
                return Ok(());
            }
            nary(*op, args, ctxt)?;
            if let Some(name) = match_name {
                ctxt.write(&format!(" as {}", name));
            }
            Ok(())
        }
        Expr::List(elements) => {
            ctxt.write("[");
            for (idx, element) in elements.iter().enumerate() {
                if idx != 0 {
                    ctxt.write(", ");
                }
                expr(element, ctxt)?;
            }
            ctxt.write("]");
            Ok(())
        }
        Expr::Dict(entries) => {
            ctxt.write("{");
            for (idx, (key, value)) in entries.iter().enumerate() {
                if idx != 0 {
                    ctxt.write(", ");
                }
                expr(key, ctxt)?;
                ctxt.write(": ");
                expr(value, ctxt)?;
            }
            ctxt.write("}");
            Ok(())
        }
        Expr::Conditional { name, key, then, otherwise } => {
            ctxt.write(name);
            if let Some(key) = key {
                ctxt.write("[");
                expr(key, ctxt)?;
                ctxt.write("]");
            }
            ctxt.write(" ? ");
            expr(then, ctxt)?;
            ctxt.write(" : ");
            expr(otherwise, ctxt)?;
            Ok(())
        }
    }
}

/// Interleaves args with the (space-padded) operator symbol, wrapping
/// operator and conditional args in parentheses.
fn nary(op: Op, args: &[Expr], ctxt: &mut Context) -> Result<(), Error> {
    if args.is_empty() {
        return Ok(());
    }
    if args.len() == 1 {
        return expr(&args[0], ctxt);
    }
    for (idx, arg) in args.iter().enumerate() {
        if idx != 0 {
            ctxt.write(&format!(" {} ", op.symbol()));
        }
        if matches!(arg, Expr::Op { .. } | Expr::Conditional { .. }) {
            ctxt.write("(");
            expr(arg, ctxt)?;
            ctxt.write(")");
        } else {
            expr(arg, ctxt)?;
        }
    }
    Ok(())
}

pub fn expr_buf(e: &Expr, ctxt: &mut Context) -> Result<String, Error> {
    ctxt.push_buffered();
    let result = expr(e, ctxt);
    let text = ctxt.pop_buffered();
    result.map(|_| text)
}

fn literal(v: &Value) -> String {
    match v {
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(n) => n.to_string(),
        Value::Str(s) => quote(s),
    }
}

/// Shortest safe string form: single quotes unless the text contains a
/// single quote and no double quote; control characters escaped.
fn quote(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_expr(e: &Expr) -> String {
        let mut ctxt = Context::new();
        expr(e, &mut ctxt).unwrap();
        ctxt.finish()
    }

    fn render_stmt(s: &Stmt) -> String {
        let mut ctxt = Context::new();
        stmt(s, &mut ctxt).unwrap();
        ctxt.finish()
    }

    #[test]
    fn nested_operators_get_parens() {
        let e = Expr::binary(
            Op::Mul,
            Expr::binary(Op::Add, Expr::var("a"), Expr::literal(1i64)),
            Expr::literal(2i64),
        );
        assert_eq!(render_expr(&e), "(a + 1) * 2");
    }

    #[test]
    fn single_arg_operator_emits_bare() {
        let e = Expr::Op { op: Op::Add, args: vec![Expr::var("a")], match_name: None };
        assert_eq!(render_expr(&e), "a");
    }

    #[test]
    fn unary_not_spacing() {
        assert_eq!(render_expr(&Expr::unary(Op::Not, Expr::var("a"))), "! a");
        let nested = Expr::unary(Op::Not, Expr::binary(Op::Eq, Expr::var("a"), Expr::literal(1i64)));
        assert_eq!(render_expr(&nested), "! (a == 1)");
    }

    #[test]
    fn matches_carries_as_clause() {
        let e = Expr::Op {
            op: Op::Matches,
            args: vec![Expr::var("a"), Expr::literal("x.*")],
            match_name: Some("m".to_string()),
        };
        assert_eq!(render_expr(&e), "a matches 'x.*' as m");
    }

    #[test]
    fn compound_assign_folds_when_lvalue_leads() {
        let s = Stmt::Assign {
            name: "a".to_string(),
            key: None,
            value: Expr::binary(Op::Add, Expr::var("a"), Expr::literal(1i64)),
        };
        assert_eq!(render_stmt(&s), "a += 1;\n");
    }

    #[test]
    fn compound_assign_requires_matching_key() {
        let s = Stmt::Assign {
            name: "a".to_string(),
            key: Some(Expr::literal("k")),
            value: Expr::binary(
                Op::Add,
                Expr::Variable {
                    name: "a".to_string(),
                    key: Some(Box::new(Expr::literal("other"))),
                    default: None,
                },
                Expr::literal(1i64),
            ),
        };
        assert_eq!(render_stmt(&s), "a['k'] = a['other'] + 1;\n");
    }

    #[test]
    fn assign_group_aligns_equals() {
        let block = Block {
            stmts: vec![
                Stmt::Assign { name: "a".into(), key: None, value: Expr::literal(1i64) },
                Stmt::Assign { name: "abc".into(), key: None, value: Expr::literal(2i64) },
            ],
            explicit: false,
        };
        assert_eq!(render_stmt(&Stmt::Block(block)), "{\n  a   = 1;\n  abc = 2;\n}\n");
    }

    #[test]
    fn consecutive_comments_are_separated() {
        let block = Block {
            stmts: vec![Stmt::Comment("one".into()), Stmt::Comment("two".into())],
            explicit: false,
        };
        assert_eq!(render_stmt(&Stmt::Block(block)), "{\n  //### one\n  //\n  //### two\n}\n");
    }

    #[test]
    fn single_statement_block_drops_braces() {
        let block = Block { stmts: vec![Stmt::Break], explicit: false };
        assert_eq!(render_stmt(&Stmt::Block(block)), "break;\n");
    }

    #[test]
    fn strings_prefer_single_quotes() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), "\"it's\"");
        assert_eq!(quote("a\nb"), "'a\\nb'");
    }
}
