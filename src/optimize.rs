//! Structural optimizations over the tree: literal folding and inline
//! function expansion. Passes mutate in place and report whether they
//! changed anything; drivers loop to a fixed point under a hard
//! iteration cap.

use std::collections::HashMap;

use crate::ast::{Block, Expr, FunctionDef, Op, Stmt, Value, ValueKind};
use crate::error::Error;

/// Whole-tree pass limit; exceeding it means a rewrite is cycling.
const MAX_PASSES: u32 = 1000;

/// Optimization levels are strictly additive:
///   3+  collapse literal arithmetic
///   5+  resolve inline functions
/// Below 5 the inline markers are dropped so the definitions materialise.
pub fn optimize(tree: &mut Block, level: u32) -> Result<(), Error> {
    if level < 5 {
        clear_inline_block(tree);
    } else {
        resolve_inlines(tree)?;
    }
    if level >= 3 {
        fold_literals(tree)?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// un-inline

fn clear_inline_block(block: &mut Block) {
    for stmt in &mut block.stmts {
        clear_inline_stmt(stmt);
    }
}

fn clear_inline_stmt(stmt: &mut Stmt) {
    match stmt {
        Stmt::Function(f) => {
            f.inline = false;
            clear_inline_stmt(&mut f.body);
        }
        Stmt::Block(b) => clear_inline_block(b),
        Stmt::Fragment(stmts) | Stmt::DebugBlock(stmts) | Stmt::IfDebug(stmts) => {
            for stmt in stmts {
                clear_inline_stmt(stmt);
            }
        }
        Stmt::If(i) => {
            if let Some(then) = &mut i.then {
                clear_inline_stmt(then);
            }
            if let Some(otherwise) = &mut i.otherwise {
                clear_inline_stmt(otherwise);
            }
        }
        Stmt::ForEach { body, .. } => clear_inline_stmt(body),
        Stmt::Try { attempt, except } => {
            clear_inline_stmt(attempt);
            if let Some(except) = except {
                clear_inline_stmt(except);
            }
        }
        Stmt::Import(imp) => {
            if let Some(inline) = &mut imp.inline {
                clear_inline_block(inline);
            }
        }
        _ => {}
    }
}

// ----------------------------------------------------------------------
// inline resolution

fn resolve_inlines(tree: &mut Block) -> Result<(), Error> {
    let mut inlines: Vec<(String, FunctionDef)> = Vec::new();
    collect_inlines_block(tree, &mut inlines);
    if inlines.is_empty() {
        return Ok(());
    }

    // First make every inline definition self-contained: expand calls to
    // other inlines, but only once the callee holds no inline calls of
    // its own. That keeps the rewrite convergent and rules recursion out.
    let mut passes = 0;
    loop {
        passes += 1;
        if passes > MAX_PASSES {
            return Err(Error::structure(
                "resolving inlined functions appears to have entered an infinite loop",
            ));
        }
        let mut changed = false;
        for idx in 0..inlines.len() {
            let mut def = inlines[idx].1.clone();
            let mut local = false;
            expand_calls_stmt(&mut def.body, &inlines, true, &mut local)?;
            if local {
                inlines[idx].1 = def;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for (name, def) in &inlines {
        if stmt_calls_inline(&def.body, &inlines) {
            return Err(Error::structure(format!(
                "recursive inlined function {}() detected",
                name
            )));
        }
    }

    replace_defs_block(tree, &inlines);

    loop {
        let mut changed = false;
        for stmt in &mut tree.stmts {
            expand_calls_stmt(stmt, &inlines, false, &mut changed)?;
        }
        if !changed {
            return Ok(());
        }
    }
}

fn collect_inlines_block(block: &Block, into: &mut Vec<(String, FunctionDef)>) {
    for stmt in &block.stmts {
        collect_inlines_stmt(stmt, into);
    }
}

fn collect_inlines_stmt(stmt: &Stmt, into: &mut Vec<(String, FunctionDef)>) {
    match stmt {
        Stmt::Function(f) => {
            if f.inline {
                match into.iter_mut().find(|(name, _)| *name == f.name) {
                    Some(slot) => slot.1 = f.clone(),
                    None => into.push((f.name.clone(), f.clone())),
                }
            }
            collect_inlines_stmt(&f.body, into);
        }
        Stmt::Block(b) => collect_inlines_block(b, into),
        Stmt::Fragment(stmts) | Stmt::DebugBlock(stmts) | Stmt::IfDebug(stmts) => {
            for stmt in stmts {
                collect_inlines_stmt(stmt, into);
            }
        }
        Stmt::If(i) => {
            if let Some(then) = &i.then {
                collect_inlines_stmt(then, into);
            }
            if let Some(otherwise) = &i.otherwise {
                collect_inlines_stmt(otherwise, into);
            }
        }
        Stmt::ForEach { body, .. } => collect_inlines_stmt(body, into),
        Stmt::Try { attempt, except } => {
            collect_inlines_stmt(attempt, into);
            if let Some(except) = except {
                collect_inlines_stmt(except, into);
            }
        }
        Stmt::Import(imp) => {
            if let Some(inline) = &imp.inline {
                collect_inlines_block(inline, into);
            }
        }
        _ => {}
    }
}

fn lookup<'a>(inlines: &'a [(String, FunctionDef)], name: &str) -> Option<&'a FunctionDef> {
    inlines.iter().find(|(n, _)| n == name).map(|(_, def)| def)
}

fn replace_defs_block(block: &mut Block, inlines: &[(String, FunctionDef)]) {
    for stmt in &mut block.stmts {
        replace_defs_stmt(stmt, inlines);
    }
}

fn replace_defs_stmt(stmt: &mut Stmt, inlines: &[(String, FunctionDef)]) {
    match stmt {
        Stmt::Function(f) => {
            if f.inline {
                if let Some(def) = lookup(inlines, &f.name) {
                    *f = def.clone();
                }
            }
            replace_defs_stmt(&mut f.body, inlines);
        }
        Stmt::Block(b) => replace_defs_block(b, inlines),
        Stmt::Fragment(stmts) | Stmt::DebugBlock(stmts) | Stmt::IfDebug(stmts) => {
            for stmt in stmts {
                replace_defs_stmt(stmt, inlines);
            }
        }
        Stmt::If(i) => {
            if let Some(then) = &mut i.then {
                replace_defs_stmt(then, inlines);
            }
            if let Some(otherwise) = &mut i.otherwise {
                replace_defs_stmt(otherwise, inlines);
            }
        }
        Stmt::ForEach { body, .. } => replace_defs_stmt(body, inlines),
        Stmt::Try { attempt, except } => {
            replace_defs_stmt(attempt, inlines);
            if let Some(except) = except {
                replace_defs_stmt(except, inlines);
            }
        }
        Stmt::Import(imp) => {
            if let Some(inline) = &mut imp.inline {
                replace_defs_block(inline, inlines);
            }
        }
        _ => {}
    }
}

fn stmt_calls_inline(stmt: &Stmt, inlines: &[(String, FunctionDef)]) -> bool {
    let mut found = false;
    visit_stmt_exprs(stmt, &mut |e| {
        if let Expr::Call { name, .. } = e {
            if lookup(inlines, name).is_some() {
                found = true;
            }
        }
    });
    found
}

fn visit_stmt_exprs(stmt: &Stmt, visit: &mut impl FnMut(&Expr)) {
    match stmt {
        Stmt::Block(b) => {
            for stmt in &b.stmts {
                visit_stmt_exprs(stmt, visit);
            }
        }
        Stmt::Fragment(stmts) | Stmt::DebugBlock(stmts) | Stmt::IfDebug(stmts) => {
            for stmt in stmts {
                visit_stmt_exprs(stmt, visit);
            }
        }
        Stmt::Assign { key, value, .. } => {
            if let Some(key) = key {
                visit_expr(key, visit);
            }
            visit_expr(value, visit);
        }
        Stmt::If(i) => {
            visit_expr(&i.test, visit);
            if let Some(then) = &i.then {
                visit_stmt_exprs(then, visit);
            }
            if let Some(otherwise) = &i.otherwise {
                visit_stmt_exprs(otherwise, visit);
            }
            if let Some(debug) = &i.debug {
                visit_stmt_exprs(debug, visit);
            }
        }
        Stmt::ForEach { collection, body, .. } => {
            visit_expr(collection, visit);
            visit_stmt_exprs(body, visit);
        }
        Stmt::Try { attempt, except } => {
            visit_stmt_exprs(attempt, visit);
            if let Some(except) = except {
                visit_stmt_exprs(except, visit);
            }
        }
        Stmt::Function(f) => visit_stmt_exprs(&f.body, visit),
        Stmt::Return(value) => {
            if let Some(value) = value {
                visit_expr(value, visit);
            }
        }
        Stmt::Include(inc) => {
            visit_expr(&inc.src, visit);
            for slot in [
                &inc.alt, &inc.dca, &inc.on_error, &inc.max_wait,
                &inc.ttl, &inc.no_store, &inc.method, &inc.entity,
            ] {
                if let Some(value) = slot {
                    visit_expr(value, visit);
                }
            }
            for list in [&inc.append_header, &inc.remove_header, &inc.set_header] {
                for value in list {
                    visit_expr(value, visit);
                }
            }
        }
        Stmt::Import(imp) => {
            if let Some(inline) = &imp.inline {
                for stmt in &inline.stmts {
                    visit_stmt_exprs(stmt, visit);
                }
            }
        }
        Stmt::Output(o) => {
            for part in &o.parts {
                visit_expr(part, visit);
            }
        }
        Stmt::Expr(e) | Stmt::Debug(e) => visit_expr(e, visit),
        Stmt::Break | Stmt::Comment(_) => {}
    }
}

fn visit_expr(e: &Expr, visit: &mut impl FnMut(&Expr)) {
    visit(e);
    match e {
        Expr::Variable { key, default, .. } => {
            if let Some(key) = key {
                visit_expr(key, visit);
            }
            if let Some(default) = default {
                visit_expr(default, visit);
            }
        }
        Expr::Call { args, .. } | Expr::Op { args, .. } | Expr::List(args) => {
            for arg in args {
                visit_expr(arg, visit);
            }
        }
        Expr::Dict(entries) => {
            for (key, value) in entries {
                visit_expr(key, visit);
                visit_expr(value, visit);
            }
        }
        Expr::Conditional { key, then, otherwise, .. } => {
            if let Some(key) = key {
                visit_expr(key, visit);
            }
            visit_expr(then, visit);
            visit_expr(otherwise, visit);
        }
        Expr::Literal(_) => {}
    }
}

/// Expands inline calls in one statement. With `only_ready`, a call is
/// expanded only when its target itself contains no inline calls (the
/// self-containment phase); otherwise every inline call goes.
fn expand_calls_stmt(
    stmt: &mut Stmt,
    inlines: &[(String, FunctionDef)],
    only_ready: bool,
    changed: &mut bool,
) -> Result<(), Error> {
    match stmt {
        Stmt::Block(b) => {
            for stmt in &mut b.stmts {
                expand_calls_stmt(stmt, inlines, only_ready, changed)?;
            }
        }
        Stmt::Fragment(stmts) | Stmt::DebugBlock(stmts) | Stmt::IfDebug(stmts) => {
            for stmt in stmts {
                expand_calls_stmt(stmt, inlines, only_ready, changed)?;
            }
        }
        Stmt::Assign { key, value, .. } => {
            if let Some(key) = key {
                expand_calls_expr(key, inlines, only_ready, changed)?;
            }
            expand_calls_expr(value, inlines, only_ready, changed)?;
        }
        Stmt::If(i) => {
            expand_calls_expr(&mut i.test, inlines, only_ready, changed)?;
            if let Some(then) = &mut i.then {
                expand_calls_stmt(then, inlines, only_ready, changed)?;
            }
            if let Some(otherwise) = &mut i.otherwise {
                expand_calls_stmt(otherwise, inlines, only_ready, changed)?;
            }
        }
        Stmt::ForEach { collection, body, .. } => {
            expand_calls_expr(collection, inlines, only_ready, changed)?;
            expand_calls_stmt(body, inlines, only_ready, changed)?;
        }
        Stmt::Try { attempt, except } => {
            expand_calls_stmt(attempt, inlines, only_ready, changed)?;
            if let Some(except) = except {
                expand_calls_stmt(except, inlines, only_ready, changed)?;
            }
        }
        Stmt::Function(f) => expand_calls_stmt(&mut f.body, inlines, only_ready, changed)?,
        Stmt::Return(value) => {
            if let Some(value) = value {
                expand_calls_expr(value, inlines, only_ready, changed)?;
            }
        }
        Stmt::Include(inc) => {
            expand_calls_expr(&mut inc.src, inlines, only_ready, changed)?;
            for slot in [
                &mut inc.alt, &mut inc.dca, &mut inc.on_error, &mut inc.max_wait,
                &mut inc.ttl, &mut inc.no_store, &mut inc.method, &mut inc.entity,
            ] {
                if let Some(value) = slot {
                    expand_calls_expr(value, inlines, only_ready, changed)?;
                }
            }
            for list in [&mut inc.append_header, &mut inc.remove_header, &mut inc.set_header] {
                for value in list {
                    expand_calls_expr(value, inlines, only_ready, changed)?;
                }
            }
        }
        Stmt::Import(imp) => {
            if let Some(inline) = &mut imp.inline {
                for stmt in &mut inline.stmts {
                    expand_calls_stmt(stmt, inlines, only_ready, changed)?;
                }
            }
        }
        Stmt::Output(o) => {
            for part in &mut o.parts {
                expand_calls_expr(part, inlines, only_ready, changed)?;
            }
        }
        Stmt::Expr(e) | Stmt::Debug(e) => expand_calls_expr(e, inlines, only_ready, changed)?,
        Stmt::Break | Stmt::Comment(_) => {}
    }
    Ok(())
}

fn expand_calls_expr(
    e: &mut Expr,
    inlines: &[(String, FunctionDef)],
    only_ready: bool,
    changed: &mut bool,
) -> Result<(), Error> {
    if let Expr::Call { name, args, .. } = e {
        if let Some(def) = lookup(inlines, name) {
            let ready = !only_ready || !stmt_calls_inline(&def.body, inlines);
            if ready {
                let replacement = inline_expansion(def, args)?;
                *e = replacement;
                *changed = true;
                return Ok(());
            }
        }
    }
    match e {
        Expr::Variable { key, default, .. } => {
            if let Some(key) = key {
                expand_calls_expr(key, inlines, only_ready, changed)?;
            }
            if let Some(default) = default {
                expand_calls_expr(default, inlines, only_ready, changed)?;
            }
        }
        Expr::Call { args, .. } | Expr::Op { args, .. } | Expr::List(args) => {
            for arg in args {
                expand_calls_expr(arg, inlines, only_ready, changed)?;
            }
        }
        Expr::Dict(entries) => {
            for (key, value) in entries {
                expand_calls_expr(key, inlines, only_ready, changed)?;
                expand_calls_expr(value, inlines, only_ready, changed)?;
            }
        }
        Expr::Conditional { key, then, otherwise, .. } => {
            if let Some(key) = key {
                expand_calls_expr(key, inlines, only_ready, changed)?;
            }
            expand_calls_expr(then, inlines, only_ready, changed)?;
            expand_calls_expr(otherwise, inlines, only_ready, changed)?;
        }
        Expr::Literal(_) => {}
    }
    Ok(())
}

/// Builds the replacement expression for one call site. The body must be
/// a single return; arguments are restricted to shapes that cannot
/// change meaning when duplicated into the body.
fn inline_expansion(def: &FunctionDef, args: &[Expr]) -> Result<Expr, Error> {
    let mut body: &Stmt = &def.body;
    loop {
        if let Stmt::Block(b) = body {
            if b.stmts.len() == 1 {
                body = &b.stmts[0];
                continue;
            }
        }
        break;
    }
    let template = match body {
        Stmt::Return(Some(expr)) => expr,
        _ => {
            return Err(Error::structure(format!(
                "inlined function {}() body can currently only comprise a single return statement",
                def.name
            )))
        }
    };

    if args.len() > def.params.len() {
        return Err(Error::structure(format!(
            "inline function {}() takes at most {} argument{} ({} given)",
            def.name,
            def.params.len(),
            if def.params.len() != 1 { "s" } else { "" },
            args.len()
        )));
    }
    for idx in args.len()..def.params.len() {
        if def.params[idx].default.is_none() {
            return Err(Error::structure(format!(
                "call to inline function {}() does not provide a value for parameter \"{}\" (at index {})",
                def.name, def.params[idx].name, idx
            )));
        }
    }
    for arg in args {
        match arg {
            Expr::Literal(_) | Expr::Call { .. } => {}
            Expr::Variable { key: None, default: None, .. } => {}
            Expr::Variable { .. } => {
                return Err(Error::structure(format!(
                    "inline function {}() called with non-simple variable \
                     (i.e. with a subkey or a default)",
                    def.name
                )))
            }
            other => {
                return Err(Error::structure(format!(
                    "inline function {}() called with type \"{}\" (currently, only literals, \
                     simple variables or function calls are allowed)",
                    def.name,
                    other.kind_name()
                )))
            }
        }
    }

    let mut values: HashMap<&str, Expr> = HashMap::new();
    for (idx, param) in def.params.iter().enumerate() {
        let value = match (args.get(idx), &param.default) {
            (Some(arg), _) => arg.clone(),
            (None, Some(default)) => Expr::Literal(default.clone()),
            (None, None) => continue,
        };
        values.insert(param.name.as_str(), value);
    }

    let mut expansion = template.clone();
    substitute(&mut expansion, &values, &def.name)?;
    Ok(expansion)
}

/// Replaces parameter reads with deep copies of the bound arguments.
fn substitute(e: &mut Expr, values: &HashMap<&str, Expr>, fname: &str) -> Result<(), Error> {
    if let Expr::Variable { name, .. } = e {
        if name == "ARGS" {
            return Err(Error::structure(format!(
                "inline function {}() cannot use variable \"ARGS\"",
                fname
            )));
        }
        if let Some(value) = values.get(name.as_str()) {
            *e = value.clone();
            return Ok(());
        }
    }
    match e {
        Expr::Variable { key, default, .. } => {
            if let Some(key) = key {
                substitute(key, values, fname)?;
            }
            if let Some(default) = default {
                substitute(default, values, fname)?;
            }
        }
        Expr::Call { args, .. } | Expr::Op { args, .. } | Expr::List(args) => {
            for arg in args {
                substitute(arg, values, fname)?;
            }
        }
        Expr::Dict(entries) => {
            for (key, value) in entries {
                substitute(key, values, fname)?;
                substitute(value, values, fname)?;
            }
        }
        Expr::Conditional { key, then, otherwise, .. } => {
            if let Some(key) = key {
                substitute(key, values, fname)?;
            }
            substitute(then, values, fname)?;
            substitute(otherwise, values, fname)?;
        }
        Expr::Literal(_) => {}
    }
    Ok(())
}

// ----------------------------------------------------------------------
// literal folding

fn fold_literals(tree: &mut Block) -> Result<(), Error> {
    let mut passes = 0;
    loop {
        passes += 1;
        if passes > MAX_PASSES {
            return Err(Error::structure(
                "collapsing literals appears to have entered an infinite loop",
            ));
        }
        let mut changed = false;
        for stmt in &mut tree.stmts {
            fold_stmt(stmt, &mut changed);
        }
        if !changed {
            return Ok(());
        }
    }
}

fn fold_stmt(stmt: &mut Stmt, changed: &mut bool) {
    match stmt {
        Stmt::Block(b) => {
            for stmt in &mut b.stmts {
                fold_stmt(stmt, changed);
            }
        }
        Stmt::Fragment(stmts) | Stmt::DebugBlock(stmts) | Stmt::IfDebug(stmts) => {
            for stmt in stmts {
                fold_stmt(stmt, changed);
            }
        }
        Stmt::Assign { key, value, .. } => {
            if let Some(key) = key {
                fold_expr(key, changed);
            }
            fold_expr(value, changed);
        }
        Stmt::If(i) => {
            fold_expr(&mut i.test, changed);
            if let Some(then) = &mut i.then {
                fold_stmt(then, changed);
            }
            if let Some(otherwise) = &mut i.otherwise {
                fold_stmt(otherwise, changed);
            }
        }
        Stmt::ForEach { collection, body, .. } => {
            fold_expr(collection, changed);
            fold_stmt(body, changed);
        }
        Stmt::Try { attempt, except } => {
            fold_stmt(attempt, changed);
            if let Some(except) = except {
                fold_stmt(except, changed);
            }
        }
        Stmt::Function(f) => fold_stmt(&mut f.body, changed),
        Stmt::Return(value) => {
            if let Some(value) = value {
                fold_expr(value, changed);
            }
        }
        Stmt::Include(inc) => {
            fold_expr(&mut inc.src, changed);
            for slot in [
                &mut inc.alt, &mut inc.dca, &mut inc.on_error, &mut inc.max_wait,
                &mut inc.ttl, &mut inc.no_store, &mut inc.method, &mut inc.entity,
            ] {
                if let Some(value) = slot {
                    fold_expr(value, changed);
                }
            }
            for list in [&mut inc.append_header, &mut inc.remove_header, &mut inc.set_header] {
                for value in list {
                    fold_expr(value, changed);
                }
            }
        }
        Stmt::Import(imp) => {
            if let Some(inline) = &mut imp.inline {
                for stmt in &mut inline.stmts {
                    fold_stmt(stmt, changed);
                }
            }
        }
        Stmt::Output(o) => {
            for part in &mut o.parts {
                fold_expr(part, changed);
            }
        }
        Stmt::Expr(e) | Stmt::Debug(e) => fold_expr(e, changed),
        Stmt::Break | Stmt::Comment(_) => {}
    }
}

fn fold_expr(e: &mut Expr, changed: &mut bool) {
    match e {
        Expr::Variable { key, default, .. } => {
            if let Some(key) = key {
                fold_expr(key, changed);
            }
            if let Some(default) = default {
                fold_expr(default, changed);
            }
        }
        Expr::Call { args, .. } | Expr::List(args) => {
            for arg in args {
                fold_expr(arg, changed);
            }
        }
        Expr::Dict(entries) => {
            for (key, value) in entries {
                fold_expr(key, changed);
                fold_expr(value, changed);
            }
        }
        Expr::Conditional { key, then, otherwise, .. } => {
            if let Some(key) = key {
                fold_expr(key, changed);
            }
            fold_expr(then, changed);
            fold_expr(otherwise, changed);
        }
        Expr::Op { op, args, .. } => {
            for arg in args.iter_mut() {
                fold_expr(arg, changed);
            }
            // `!literal` stays as-is for now.
            if *op == Op::Not {
                return;
            }
            if !op.folds() || args.is_empty() {
                return;
            }
            let Some(folded) = fold_args(*op, args) else { return };
            *e = Expr::Literal(folded);
            *changed = true;
        }
        Expr::Literal(_) => {}
    }
}

/// Evaluates an operator over all-literal, same-typed args. Returns None
/// when the fold does not apply (mixed shapes, strings under anything but
/// `+`, division by zero).
fn fold_args(op: Op, args: &[Expr]) -> Option<Value> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Expr::Literal(v) => values.push(v),
            _ => return None,
        }
    }
    let kind = values[0].kind();
    if values.iter().any(|v| v.kind() != kind) {
        return None;
    }
    match kind {
        ValueKind::String => {
            if op != Op::Add {
                return None;
            }
            let mut out = String::new();
            for v in &values {
                if let Value::Str(s) = v {
                    out.push_str(s);
                }
            }
            Some(Value::Str(out))
        }
        // Booleans take part in arithmetic as 0/1.
        ValueKind::Boolean | ValueKind::Number => {
            let mut acc = numeric(values[0]);
            for &v in &values[1..] {
                acc = apply(op, acc, numeric(v))?;
            }
            Some(match acc {
                Num::Int(n) => Value::Int(n),
                Num::Float(f) => coerce_whole(f),
            })
        }
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn numeric(v: &Value) -> Num {
    match v {
        Value::Bool(b) => Num::Int(i64::from(*b)),
        Value::Int(n) => Num::Int(*n),
        Value::Float(f) => Num::Float(*f),
        Value::Str(_) => unreachable!("filtered by kind"),
    }
}

fn apply(op: Op, left: Num, right: Num) -> Option<Num> {
    // Division is always evaluated in floating point; a whole result is
    // coerced back afterwards.
    if op == Op::Div {
        let (a, b) = (as_f64(left), as_f64(right));
        if b == 0.0 {
            return None;
        }
        return Some(Num::Float(a / b));
    }
    match (left, right) {
        (Num::Int(a), Num::Int(b)) => {
            let result = match op {
                Op::Add => a.checked_add(b),
                Op::Sub => a.checked_sub(b),
                Op::Mul => a.checked_mul(b),
                Op::Mod => {
                    if b == 0 {
                        None
                    } else {
                        // Remainder takes the divisor's sign.
                        Some(((a % b) + b) % b)
                    }
                }
                _ => None,
            };
            result.map(Num::Int)
        }
        (a, b) => {
            let (a, b) = (as_f64(a), as_f64(b));
            let result = match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Mod => {
                    if b == 0.0 {
                        return None;
                    }
                    a - b * (a / b).floor()
                }
                _ => return None,
            };
            Some(Num::Float(result))
        }
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(n) => n as f64,
        Num::Float(f) => f,
    }
}

fn coerce_whole(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::Int(f as i64)
    } else {
        Value::Float(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Param;

    fn fold(e: Expr) -> Expr {
        let mut tree = Block {
            stmts: vec![Stmt::Assign { name: "v".into(), key: None, value: e }],
            explicit: false,
        };
        fold_literals(&mut tree).unwrap();
        match tree.stmts.into_iter().next() {
            Some(Stmt::Assign { value, .. }) => value,
            _ => unreachable!(),
        }
    }

    #[test]
    fn arithmetic_folds_to_integers() {
        let e = Expr::binary(Op::Add, Expr::literal(3i64), Expr::literal(4i64));
        assert_eq!(fold(e), Expr::literal(7i64));
    }

    #[test]
    fn division_coerces_whole_results() {
        let e = Expr::binary(Op::Div, Expr::literal(8i64), Expr::literal(2i64));
        assert_eq!(fold(e), Expr::literal(4i64));
        let e = Expr::binary(Op::Div, Expr::literal(5i64), Expr::literal(2i64));
        assert_eq!(fold(e), Expr::Literal(Value::Float(2.5)));
    }

    #[test]
    fn division_by_zero_stays_unfolded() {
        let e = Expr::binary(Op::Div, Expr::literal(1i64), Expr::literal(0i64));
        assert_eq!(fold(e.clone()), e);
    }

    #[test]
    fn strings_fold_under_plus_only() {
        let e = Expr::binary(Op::Add, Expr::literal("str"), Expr::literal("ing"));
        assert_eq!(fold(e), Expr::literal("string"));
        let e = Expr::binary(Op::Sub, Expr::literal("a"), Expr::literal("b"));
        assert_eq!(fold(e.clone()), e);
    }

    #[test]
    fn mixed_types_stay_unfolded() {
        let e = Expr::binary(Op::Add, Expr::literal(1i64), Expr::literal("x"));
        assert_eq!(fold(e.clone()), e);
    }

    #[test]
    fn nested_folds_reach_closure() {
        // x * (1 + 1) leaves x * 2.
        let e = Expr::binary(
            Op::Mul,
            Expr::var("x"),
            Expr::binary(Op::Add, Expr::literal(1i64), Expr::literal(1i64)),
        );
        assert_eq!(fold(e), Expr::binary(Op::Mul, Expr::var("x"), Expr::literal(2i64)));
    }

    #[test]
    fn not_of_boolean_literal_is_left_alone() {
        let e = Expr::unary(Op::Not, Expr::literal(true));
        assert_eq!(fold(e.clone()), e);
    }

    #[test]
    fn folding_is_idempotent() {
        let e = Expr::binary(Op::Mul, Expr::literal(2i64), Expr::literal(2i64));
        let once = fold(e);
        assert_eq!(fold(once.clone()), once);
    }

    fn inline_def(name: &str, params: Vec<Param>, body: Expr) -> Stmt {
        Stmt::Function(FunctionDef {
            name: name.into(),
            params,
            body: Box::new(Stmt::Block(Block {
                stmts: vec![Stmt::Return(Some(body))],
                explicit: false,
            })),
            inline: true,
        })
    }

    fn param(name: &str) -> Param {
        Param { name: name.into(), default: None }
    }

    #[test]
    fn inline_call_expands_and_folds() {
        let mut tree = Block {
            stmts: vec![
                inline_def(
                    "i",
                    vec![param("x")],
                    Expr::binary(Op::Mul, Expr::var("x"), Expr::literal(2i64)),
                ),
                Stmt::Assign {
                    name: "v".into(),
                    key: None,
                    value: Expr::call("i", vec![Expr::literal(2i64)]),
                },
            ],
            explicit: false,
        };
        optimize(&mut tree, 7).unwrap();
        assert_eq!(
            tree.stmts[1],
            Stmt::Assign { name: "v".into(), key: None, value: Expr::literal(4i64) }
        );
    }

    #[test]
    fn inline_chains_become_self_contained() {
        let mut tree = Block {
            stmts: vec![
                inline_def(
                    "double",
                    vec![param("x")],
                    Expr::binary(Op::Mul, Expr::var("x"), Expr::literal(2i64)),
                ),
                inline_def(
                    "quad",
                    vec![param("x")],
                    Expr::call("double", vec![Expr::var("x")]),
                ),
                Stmt::Assign {
                    name: "v".into(),
                    key: None,
                    value: Expr::call("quad", vec![Expr::literal(3i64)]),
                },
            ],
            explicit: false,
        };
        optimize(&mut tree, 7).unwrap();
        assert_eq!(
            tree.stmts[2],
            Stmt::Assign { name: "v".into(), key: None, value: Expr::literal(6i64) }
        );
    }

    #[test]
    fn recursive_inline_is_rejected() {
        let mut tree = Block {
            stmts: vec![
                inline_def("a", vec![param("x")], Expr::call("b", vec![Expr::var("x")])),
                inline_def("b", vec![param("x")], Expr::call("a", vec![Expr::var("x")])),
                Stmt::Assign {
                    name: "v".into(),
                    key: None,
                    value: Expr::call("a", vec![Expr::literal(1i64)]),
                },
            ],
            explicit: false,
        };
        let err = optimize(&mut tree, 7).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("recursive inlined function"), "got: {}", message);
    }

    #[test]
    fn level_below_five_clears_inline_markers() {
        let mut tree = Block {
            stmts: vec![inline_def(
                "i",
                vec![param("x")],
                Expr::binary(Op::Mul, Expr::var("x"), Expr::literal(2i64)),
            )],
            explicit: false,
        };
        optimize(&mut tree, 3).unwrap();
        assert!(matches!(&tree.stmts[0], Stmt::Function(f) if !f.inline));
    }

    #[test]
    fn default_parameters_fill_missing_arguments() {
        let mut tree = Block {
            stmts: vec![
                inline_def(
                    "add",
                    vec![
                        param("a"),
                        param("b"),
                        Param { name: "c".into(), default: Some(Value::Int(3)) },
                    ],
                    Expr::Op {
                        op: Op::Add,
                        args: vec![Expr::var("a"), Expr::var("b"), Expr::var("c")],
                        match_name: None,
                    },
                ),
                Stmt::Assign {
                    name: "v".into(),
                    key: None,
                    value: Expr::call("add", vec![Expr::literal(1i64), Expr::literal(2i64)]),
                },
            ],
            explicit: false,
        };
        optimize(&mut tree, 7).unwrap();
        assert_eq!(
            tree.stmts[1],
            Stmt::Assign { name: "v".into(), key: None, value: Expr::literal(6i64) }
        );
    }
}
