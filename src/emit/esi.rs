//! IR → ESI serializer. Elements are concatenated without inter-element
//! whitespace; all formatting lives inside attribute values.

use crate::ast::{Block, Expr, If, Include, Op, Output, Stmt, Value};
use crate::emit::Context;
use crate::error::{Error, ErrorKind};

/// Variable the generated debug log accumulates into.
const DEBUG_LOG: &str = "debug_log";
const DEBUG_INDENT: &str = "debug_indent";

pub fn program(block: &Block, ctxt: &mut Context) -> Result<(), Error> {
    for st in &block.stmts {
        stmt(st, ctxt)?;
    }
    Ok(())
}

pub fn stmt(s: &Stmt, ctxt: &mut Context) -> Result<(), Error> {
    ctxt.nodehier.push(s.label());
    let result = stmt_inner(s, ctxt);
    ctxt.nodehier.pop();
    result
}

fn stmt_inner(s: &Stmt, ctxt: &mut Context) -> Result<(), Error> {
    match s {
        Stmt::Block(b) => program(b, ctxt),
        Stmt::Fragment(stmts) => {
            for st in stmts {
                stmt(st, ctxt)?;
            }
            Ok(())
        }
        Stmt::Assign { name, key, value } => {
            ctxt.write("<esi:assign name=\"");
            ctxt.write(name);
            if let Some(key) = key {
                ctxt.write("{");
                expr(key, ctxt, false)?;
                ctxt.write("}");
            }
            ctxt.write("\"");
            let rendered = expr_buf(value, ctxt)?;
            if rendered.contains('\n') || rendered.contains('"') {
                ctxt.write(">");
                ctxt.write(&rendered);
                ctxt.write("</esi:assign>");
            } else {
                ctxt.write(" value=\"");
                ctxt.write(&rendered);
                ctxt.write("\"/>");
            }
            Ok(())
        }
        Stmt::If(i) => if_stmt(i, ctxt),
        Stmt::ForEach { collection, body, item } => {
            ctxt.write("<esi:foreach collection=\"");
            expr(collection, ctxt, false)?;
            match item.as_deref() {
                None | Some("item") => ctxt.write("\">"),
                Some(item) => ctxt.write(&format!("\" item=\"{}\">", item)),
            }
            stmt(body, ctxt)?;
            ctxt.write("</esi:foreach>");
            Ok(())
        }
        Stmt::Break => {
            ctxt.write("<esi:break/>");
            Ok(())
        }
        Stmt::Try { attempt, except } => {
            ctxt.write("<esi:try><esi:attempt>");
            stmt(attempt, ctxt)?;
            ctxt.write("</esi:attempt>");
            if let Some(except) = except {
                ctxt.write("<esi:except>");
                stmt(except, ctxt)?;
                ctxt.write("</esi:except>");
            }
            ctxt.write("</esi:try>");
            Ok(())
        }
        Stmt::Function(f) => {
            if f.inline {
                return Ok(());
            }
            ctxt.write(&format!("<esi:function name=\"{}\">", f.name));
            for (idx, param) in f.params.iter().enumerate() {
                // Parameters materialise as assignments from the ARGS bag.
                let from_args = Stmt::Assign {
                    name: param.name.clone(),
                    key: None,
                    value: Expr::Variable {
                        name: "ARGS".to_string(),
                        key: Some(Box::new(Expr::Literal(Value::Int(idx as i64)))),
                        default: param.default.clone().map(|v| Box::new(Expr::Literal(v))),
                    },
                };
                stmt(&from_args, ctxt)?;
            }
            stmt(&f.body, ctxt)?;
            ctxt.write("</esi:function>");
            Ok(())
        }
        Stmt::Return(value) => {
            match value {
                None => ctxt.write("<esi:return/>"),
                Some(e) => {
                    ctxt.write("<esi:return value=\"");
                    expr(e, ctxt, false)?;
                    ctxt.write("\"/>");
                }
            }
            Ok(())
        }
        Stmt::Include(inc) => include(inc, ctxt),
        Stmt::Import(imp) => {
            if let Some(inline) = &imp.inline {
                program(inline, ctxt)?;
            }
            Ok(())
        }
        Stmt::Output(o) => output(o, ctxt),
        Stmt::Comment(message) => {
            ctxt.write(&format!("<esi:comment text=\"{}\"/>", message));
            Ok(())
        }
        Stmt::Expr(e) => expr(e, ctxt, false),
        Stmt::Debug(e) => {
            if !ctxt.debug {
                return Ok(());
            }
            let log_line = Stmt::Assign {
                name: DEBUG_LOG.to_string(),
                key: None,
                value: Expr::binary(Op::Add, Expr::var(DEBUG_LOG), e.clone()),
            };
            stmt(&log_line, ctxt)
        }
        Stmt::DebugBlock(stmts) => {
            if !ctxt.debug {
                for st in stmts {
                    stmt(st, ctxt)?;
                }
                return Ok(());
            }
            for name in [DEBUG_LOG, DEBUG_INDENT] {
                let init = Stmt::Assign {
                    name: name.to_string(),
                    key: None,
                    value: Expr::literal(""),
                };
                stmt(&init, ctxt)?;
            }
            for st in stmts {
                stmt(st, ctxt)?;
            }
            let trailer = Expr::call(
                "set_response_code",
                vec![Expr::literal(444i64), Expr::var(DEBUG_LOG)],
            );
            expr(&trailer, ctxt, false)
        }
        Stmt::IfDebug(stmts) => {
            if ctxt.debug {
                for st in stmts {
                    stmt(st, ctxt)?;
                }
            }
            Ok(())
        }
    }
}

fn if_stmt(i: &If, ctxt: &mut Context) -> Result<(), Error> {
    if ctxt.testlevel > 0 {
        ctxt.write("<esi:when test=\"");
        expr(&i.test, ctxt, false)?;
        ctxt.write("\"");
        if let Some(name) = ctxt.matchname.take() {
            ctxt.write(&format!(" matchname=\"{}\"", name));
        }
        ctxt.write(">");
        if let Some(then) = &i.then {
            let level = ctxt.testlevel;
            ctxt.testlevel = 0;
            stmt(then, ctxt)?;
            ctxt.testlevel = level;
        }
        ctxt.write("</esi:when>");
        match &i.otherwise {
            None => {}
            Some(chain) if matches!(**chain, Stmt::If(_)) => {
                stmt(chain, ctxt)?;
            }
            Some(tail) => {
                // Buffer the otherwise branch so an empty one leaves no
                // element behind.
                ctxt.push_buffered();
                let level = ctxt.testlevel;
                ctxt.testlevel = 0;
                let result = stmt(tail, ctxt);
                ctxt.testlevel = level;
                let rendered = ctxt.pop_buffered();
                result?;
                if !rendered.is_empty() {
                    ctxt.write("<esi:otherwise>");
                    ctxt.write(&rendered);
                    ctxt.write("</esi:otherwise>");
                }
            }
        }
        Ok(())
    } else {
        if let Some(marker) = &i.debug {
            stmt(marker, ctxt)?;
        }
        ctxt.write("<esi:choose>");
        ctxt.testlevel = 1;
        if_stmt(i, ctxt)?;
        ctxt.testlevel = 0;
        ctxt.write("</esi:choose>");
        Ok(())
    }
}

fn include(inc: &Include, ctxt: &mut Context) -> Result<(), Error> {
    ctxt.write(&format!("<esi:{}", inc.element_name()));
    let named: [(&str, Option<&Expr>); 9] = [
        ("src", Some(&inc.src)),
        ("alt", inc.alt.as_ref()),
        ("dca", inc.dca.as_ref()),
        ("onerror", inc.on_error.as_ref()),
        ("maxwait", inc.max_wait.as_ref()),
        ("ttl", inc.ttl.as_ref()),
        ("no-store", inc.no_store.as_ref()),
        ("method", inc.method.as_ref()),
        ("entity", inc.entity.as_ref()),
    ];
    for (attr, value) in named {
        let Some(value) = value else { continue };
        ctxt.push_buffered();
        let result = expr(value, ctxt, true);
        let mut rendered = ctxt.pop_buffered();
        result?;
        // The downstream dca parser chokes on a bare '>'.
        if attr == "dca" && rendered.contains('>') {
            rendered = format!("'{}'", rendered);
        }
        ctxt.write(&format!(" {}=\"{}\"", attr, rendered));
    }
    let headers: [(&str, &Vec<Expr>); 3] = [
        ("appendheader", &inc.append_header),
        ("removeheader", &inc.remove_header),
        ("setheader", &inc.set_header),
    ];
    for (attr, values) in headers {
        for value in values {
            ctxt.write(&format!(" {}=\"", attr));
            expr(value, ctxt, true)?;
            ctxt.write("\"");
        }
    }
    ctxt.write("/>");
    Ok(())
}

fn output(o: &Output, ctxt: &mut Context) -> Result<(), Error> {
    if o.vars {
        ctxt.write("<esi:vars>");
    }
    if o.raw {
        for part in &o.parts {
            match part {
                Expr::Literal(Value::Str(s)) => ctxt.write(s),
                Expr::Literal(Value::Int(n)) => ctxt.write(&n.to_string()),
                Expr::Literal(Value::Float(n)) => ctxt.write(&n.to_string()),
                Expr::Literal(Value::Bool(b)) => ctxt.write(if *b { "true" } else { "false" }),
                other => expr(other, ctxt, true)?,
            }
        }
    } else {
        for part in &o.parts {
            expr(part, ctxt, true)?;
        }
    }
    if o.vars {
        ctxt.write("</esi:vars>");
    }
    Ok(())
}

/// Emits an expression with the given vars mode; the mode is restored on
/// return so sub-expressions that demand quoting (keys, defaults,
/// call arguments) re-enter with `isvars` off.
pub fn expr(e: &Expr, ctxt: &mut Context, isvars: bool) -> Result<(), Error> {
    let prior = ctxt.isvars;
    ctxt.isvars = isvars;
    let result = expr_inner(e, ctxt);
    ctxt.isvars = prior;
    result
}

fn expr_inner(e: &Expr, ctxt: &mut Context) -> Result<(), Error> {
    match e {
        Expr::Literal(v) => {
            literal(v, ctxt);
            Ok(())
        }
        Expr::Variable { name, key, default } => {
            ctxt.write(&format!("$({}", name));
            if let Some(key) = key {
                ctxt.write("{");
                expr(key, ctxt, false)?;
                ctxt.write("}");
            }
            if let Some(default) = default {
                ctxt.write("|");
                expr(default, ctxt, false)?;
            }
            ctxt.write(")");
            Ok(())
        }
        Expr::Call { name, args, debug } => {
            if ctxt.debug {
                match debug {
                    None => return Ok(()),
                    Some(tag) if *tag == "translate" && name == "add_header" && args.len() >= 2 => {
                        let line = debug_line(vec![
                            Expr::literal("adding response header \""),
                            args[0].clone(),
                            Expr::literal("\" to: "),
                            args[1].clone(),
                        ]);
                        return stmt(&line, ctxt);
                    }
                    _ => {}
                }
            }
            ctxt.write(&format!("${}(", name));
            for (idx, arg) in args.iter().enumerate() {
                if idx != 0 {
                    ctxt.write(",");
                }
                expr(arg, ctxt, false)?;
            }
            ctxt.write(")");
            Ok(())
        }
        Expr::Op { op, args, match_name } => operator(*op, args, match_name.as_deref(), ctxt),
        Expr::List(elements) => {
            ctxt.write("[");
            for (idx, element) in elements.iter().enumerate() {
                if idx != 0 {
                    ctxt.write(",");
                }
                expr(element, ctxt, false)?;
            }
            ctxt.write("]");
            Ok(())
        }
        Expr::Dict(entries) => {
            ctxt.write("{");
            for (idx, (key, value)) in entries.iter().enumerate() {
                if idx != 0 {
                    ctxt.write(",");
                }
                expr(key, ctxt, false)?;
                ctxt.write(":");
                expr(value, ctxt, false)?;
            }
            ctxt.write("}");
            Ok(())
        }
        Expr::Conditional { name, key, then, otherwise } => {
            let head = |ctxt: &mut Context, key: &Option<Box<Expr>>| -> Result<(), Error> {
                ctxt.write(&format!("$({}", name));
                if let Some(key) = key {
                    ctxt.write("{");
                    expr(key, ctxt, false)?;
                    ctxt.write("}");
                }
                Ok(())
            };
            ctxt.write("<esi:choose><esi:when test=\"");
            head(ctxt, key)?;
            ctxt.write(")\">");
            head(ctxt, key)?;
            ctxt.write("|");
            expr(then, ctxt, false)?;
            ctxt.write(")</esi:when><esi:otherwise>");
            head(ctxt, key)?;
            ctxt.write("|");
            expr(otherwise, ctxt, false)?;
            ctxt.write(")</esi:otherwise></esi:choose>");
            Ok(())
        }
    }
}

fn operator(op: Op, args: &[Expr], match_name: Option<&str>, ctxt: &mut Context) -> Result<(), Error> {
    let isvars = ctxt.isvars;
    if op.is_match() {
        if let Some(existing) = &ctxt.matchname {
            return Err(Error::new(ErrorKind::MatchNameConflict {
                existing: existing.clone(),
                new: match_name.unwrap_or("(default)").to_string(),
            }));
        }
        if let Some(name) = match_name {
            if ctxt.testlevel == 0 {
                return Err(Error::new(ErrorKind::BadMatchNameContext));
            }
            ctxt.matchname = Some(name.to_string());
        }
    }

    if op.is_unary() {
        if args.len() != 1 {
            return Err(Error::new(ErrorKind::Operator(format!(
                "unary {} operator takes exactly one argument",
                op.symbol()
            ))));
        }
        if matches!(args[0], Expr::Op { .. }) {
            ctxt.write(&format!("{}(", op.esi_symbol()));
            expr(&args[0], ctxt, isvars)?;
            ctxt.write(")");
        } else {
            ctxt.write(op.esi_symbol());
            expr(&args[0], ctxt, isvars)?;
        }
        return Ok(());
    }

    // And/Or short-circuit when an operand renders to the decisive
    // literal; the probe must not disturb a pending match name.
    if matches!(op, Op::And | Op::Or) {
        let decisive = if op == Op::And { "0" } else { "1" };
        for arg in args {
            let saved = ctxt.matchname.take();
            ctxt.push_buffered();
            let result = expr(arg, ctxt, false);
            let rendered = ctxt.pop_buffered();
            ctxt.matchname = saved;
            result?;
            if rendered == decisive {
                ctxt.write(decisive);
                return Ok(());
            }
        }
    }

    if args.is_empty() {
        return Ok(());
    }
    if args.len() == 1 {
        return expr(&args[0], ctxt, false);
    }
    let separator = if op == Op::Add && isvars { "" } else { op.esi_symbol() };
    for (idx, arg) in args.iter().enumerate() {
        if idx != 0 {
            ctxt.write(separator);
        }
        if matches!(arg, Expr::Op { .. }) && !isvars {
            ctxt.write("(");
            expr(arg, ctxt, isvars)?;
            ctxt.write(")");
        } else {
            expr(arg, ctxt, isvars)?;
        }
    }
    Ok(())
}

/// Renders an expression into a lookahead buffer in non-vars mode.
pub fn expr_buf(e: &Expr, ctxt: &mut Context) -> Result<String, Error> {
    ctxt.push_buffered();
    let result = expr(e, ctxt, false);
    let text = ctxt.pop_buffered();
    result.map(|_| text)
}

fn literal(v: &Value, ctxt: &mut Context) {
    match v {
        Value::Bool(b) => ctxt.write(if *b { "1" } else { "0" }),
        Value::Int(n) => ctxt.write(&n.to_string()),
        Value::Float(n) => ctxt.write(&n.to_string()),
        Value::Str(s) => {
            if ctxt.isvars {
                ctxt.write(&vars_escape(s));
            } else {
                ctxt.write("'");
                ctxt.write(&s.replace('\\', "\\\\").replace('\'', "\\'"));
                ctxt.write("'");
            }
        }
    }
}

/// Vars-mode escaping: `$`, `\`, and a literal `<esi:` must not be taken
/// for interpolation or markup.
fn vars_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find(|c| c == '$' || c == '\\' || c == '<') {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        let c = tail.chars().next().unwrap();
        if c == '<' {
            if tail.starts_with("<esi:") {
                out.push('\\');
            }
            out.push('<');
        } else {
            out.push('\\');
            out.push(c);
        }
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

/// Builds the debug-log append for one log line: a `[  ] ` gutter, the
/// current debug indent, the message pieces, and a newline.
fn debug_line(parts: Vec<Expr>) -> Stmt {
    let mut args = vec![Expr::literal("[  ] "), Expr::var(DEBUG_INDENT)];
    args.extend(parts);
    args.push(Expr::literal("\n"));
    Stmt::Debug(Expr::Op { op: Op::Add, args, match_name: None })
}
