//! AST walking.
//!
//! Each method of the `Visitor` trait is a hook into a node of the tree;
//! the default implementations descend into the node's children through
//! the matching `walk_*` function. Override a method to observe a node
//! kind, and call the `walk_*` function from the override to keep
//! descending below it.

use crate::ast::*;

pub trait Visitor<'a>: Sized {
    fn visit_file(&mut self, file: &'a File) {
        walk_file(self, file)
    }

    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        walk_stmt(self, stmt)
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        walk_expr(self, expr)
    }

    fn visit_decl(&mut self, decl: &'a Decl) {
        walk_decl(self, decl)
    }

    fn visit_spec(&mut self, spec: &'a Spec) {
        walk_spec(self, spec)
    }

    fn visit_block(&mut self, block: &'a BlockStmt) {
        walk_block(self, block)
    }

    fn visit_ident(&mut self, _ident: &'a Ident) {}

    fn visit_comment_group(&mut self, _group: &'a CommentGroup) {}
}

pub fn walk_file<'a, V: Visitor<'a>>(visitor: &mut V, file: &'a File) {
    for stmt in &file.stmts {
        visitor.visit_stmt(stmt);
    }
    for group in &file.comments {
        visitor.visit_comment_group(group);
    }
}

pub fn walk_block<'a, V: Visitor<'a>>(visitor: &mut V, block: &'a BlockStmt) {
    for stmt in &block.stmts {
        visitor.visit_stmt(stmt);
    }
}

fn walk_typed_ident<'a, V: Visitor<'a>>(visitor: &mut V, typed: &'a TypedIdent) {
    visitor.visit_ident(&typed.ident);
    for ty in &typed.types {
        visitor.visit_ident(ty);
    }
}

fn walk_call_args<'a, V: Visitor<'a>>(visitor: &mut V, args: &'a CallArgs) {
    for value in &args.args.values {
        visitor.visit_expr(value);
    }
    if let Some(var) = &args.args.var {
        visitor.visit_expr(&var.value);
    }
    for name in &args.named.names {
        visitor.visit_expr(name);
    }
    for value in args.named.values.iter().flatten() {
        visitor.visit_expr(value);
    }
    if let Some(var) = &args.named.var {
        visitor.visit_expr(&var.value);
    }
}

fn walk_func_params<'a, V: Visitor<'a>>(visitor: &mut V, params: &'a FuncParams) {
    for value in &params.args.values {
        walk_typed_ident(visitor, value);
    }
    if let Some(var) = &params.args.var {
        walk_typed_ident(visitor, var);
    }
    for name in &params.named.names {
        walk_typed_ident(visitor, name);
    }
    for value in params.named.values.iter().flatten() {
        visitor.visit_expr(value);
    }
    if let Some(var) = &params.named.var {
        walk_typed_ident(visitor, var);
    }
}

pub fn walk_expr<'a, V: Visitor<'a>>(visitor: &mut V, expr: &'a Expr) {
    match expr {
        Expr::Bad(_) => {}
        Expr::Ident(ident) => visitor.visit_ident(ident),
        Expr::TypedIdent(typed) => walk_typed_ident(visitor, typed),
        Expr::Int(_)
        | Expr::Uint(_)
        | Expr::Float(_)
        | Expr::Decimal(_)
        | Expr::Char(_)
        | Expr::String(_)
        | Expr::RawString(_)
        | Expr::RawHeredoc(_)
        | Expr::Bool(_)
        | Expr::Flag(_)
        | Expr::Nil(_)
        | Expr::StdIn(_)
        | Expr::StdOut(_)
        | Expr::StdErr(_)
        | Expr::DotName(_)
        | Expr::DotFile(_)
        | Expr::IsModule(_)
        | Expr::Callee(_)
        | Expr::CalleeArgs(_)
        | Expr::CalleeNamedArgs(_) => {}
        Expr::Template(t) => visitor.visit_expr(&t.literal),
        Expr::Array(a) => {
            for element in &a.elements {
                visitor.visit_expr(element);
            }
        }
        Expr::Dict(d) => {
            for element in &d.elements {
                visitor.visit_expr(&element.value);
            }
        }
        Expr::KeyValue(kv) => {
            visitor.visit_expr(&kv.key);
            if let Some(value) = &kv.value {
                visitor.visit_expr(value);
            }
        }
        Expr::KeyValueArray(a) => {
            for element in &a.elements {
                visitor.visit_expr(&element.key);
                if let Some(value) = &element.value {
                    visitor.visit_expr(value);
                }
            }
        }
        Expr::ArgVar(v) => visitor.visit_expr(&v.value),
        Expr::NamedArgVar(v) => visitor.visit_expr(&v.value),
        Expr::Paren(p) => visitor.visit_expr(&p.expr),
        Expr::MultiParen(p) => {
            for expr in &p.exprs {
                visitor.visit_expr(expr);
            }
        }
        Expr::Unary(u) => visitor.visit_expr(&u.expr),
        Expr::Binary(b) => {
            visitor.visit_expr(&b.lhs);
            visitor.visit_expr(&b.rhs);
        }
        Expr::Cond(c) => {
            visitor.visit_expr(&c.cond);
            visitor.visit_expr(&c.true_expr);
            visitor.visit_expr(&c.false_expr);
        }
        Expr::Selector(s) => {
            visitor.visit_expr(&s.expr);
            visitor.visit_ident(&s.sel);
        }
        Expr::NullishSelector(s) => {
            visitor.visit_expr(&s.expr);
            visitor.visit_ident(&s.sel);
        }
        Expr::Index(i) => {
            visitor.visit_expr(&i.expr);
            visitor.visit_expr(&i.index);
        }
        Expr::Slice(s) => {
            visitor.visit_expr(&s.expr);
            if let Some(low) = &s.low {
                visitor.visit_expr(low);
            }
            if let Some(high) = &s.high {
                visitor.visit_expr(high);
            }
        }
        Expr::Call(c) => {
            visitor.visit_expr(&c.func);
            walk_call_args(visitor, &c.args);
        }
        Expr::Import(_) => {}
        Expr::Throw(t) => visitor.visit_expr(&t.expr),
        Expr::Return(r) => {
            if let Some(result) = &r.result {
                visitor.visit_expr(result);
            }
        }
        Expr::Func(f) => {
            if let Some(ident) = &f.typ.ident {
                visitor.visit_ident(ident);
            }
            walk_func_params(visitor, &f.typ.params);
            visitor.visit_block(&f.body);
        }
        Expr::Closure(c) => {
            if let Some(ident) = &c.typ.ident {
                visitor.visit_ident(ident);
            }
            walk_func_params(visitor, &c.typ.params);
            visitor.visit_expr(&c.body);
        }
        Expr::Block(b) => visitor.visit_block(&b.block),
        Expr::Stmts(s) => {
            for stmt in &s.stmts {
                visitor.visit_stmt(stmt);
            }
        }
    }
}

pub fn walk_stmt<'a, V: Visitor<'a>>(visitor: &mut V, stmt: &'a Stmt) {
    match stmt {
        Stmt::Bad(_) | Stmt::Empty(_) => {}
        Stmt::Assign(s) => {
            for lhs in &s.lhs {
                visitor.visit_expr(lhs);
            }
            for rhs in &s.rhs {
                visitor.visit_expr(rhs);
            }
        }
        Stmt::Block(s) => visitor.visit_block(s),
        Stmt::Branch(s) => {
            if let Some(label) = &s.label {
                visitor.visit_ident(label);
            }
        }
        Stmt::Expr(s) => visitor.visit_expr(&s.expr),
        Stmt::ForIn(s) => {
            visitor.visit_ident(&s.key);
            visitor.visit_ident(&s.value);
            visitor.visit_expr(&s.iterable);
            visitor.visit_block(&s.body);
            if let Some(else_body) = &s.else_body {
                visitor.visit_block(else_body);
            }
        }
        Stmt::For(s) => {
            if let Some(init) = &s.init {
                visitor.visit_stmt(init);
            }
            if let Some(cond) = &s.cond {
                visitor.visit_expr(cond);
            }
            if let Some(post) = &s.post {
                visitor.visit_stmt(post);
            }
            visitor.visit_block(&s.body);
        }
        Stmt::If(s) => {
            if let Some(init) = &s.init {
                visitor.visit_stmt(init);
            }
            visitor.visit_expr(&s.cond);
            visitor.visit_block(&s.body);
            if let Some(else_stmt) = &s.else_stmt {
                visitor.visit_stmt(else_stmt);
            }
        }
        Stmt::IncDec(s) => visitor.visit_expr(&s.expr),
        Stmt::Return(s) => {
            if let Some(result) = &s.result {
                visitor.visit_expr(result);
            }
        }
        Stmt::Try(s) => {
            visitor.visit_block(&s.body);
            if let Some(catch) = &s.catch {
                if let Some(ident) = &catch.ident {
                    visitor.visit_ident(ident);
                }
                visitor.visit_block(&catch.body);
            }
            if let Some(finally) = &s.finally {
                visitor.visit_block(&finally.body);
            }
        }
        Stmt::Throw(s) => visitor.visit_expr(&s.expr),
        Stmt::Decl(s) => visitor.visit_decl(&s.decl),
        Stmt::MixedText(_) | Stmt::CodeBegin(_) | Stmt::CodeEnd(_) => {}
        Stmt::MixedValue(s) => visitor.visit_expr(&s.expr),
        Stmt::ExprToText(s) => visitor.visit_expr(&s.expr),
        Stmt::Config(s) => {
            for option in &s.options {
                visitor.visit_expr(&option.key);
                if let Some(value) = &option.value {
                    visitor.visit_expr(value);
                }
            }
        }
    }
}

pub fn walk_decl<'a, V: Visitor<'a>>(visitor: &mut V, decl: &'a Decl) {
    match decl {
        Decl::Bad(_) => {}
        Decl::Gen(g) => {
            for spec in &g.specs {
                visitor.visit_spec(spec);
            }
        }
    }
}

pub fn walk_spec<'a, V: Visitor<'a>>(visitor: &mut V, spec: &'a Spec) {
    match spec {
        Spec::Param(s) => walk_typed_ident(visitor, &s.ident),
        Spec::NamedParam(s) => {
            walk_typed_ident(visitor, &s.ident);
            if let Some(value) = &s.value {
                visitor.visit_expr(value);
            }
        }
        Spec::Value(s) => {
            for ident in &s.idents {
                visitor.visit_ident(ident);
            }
            for value in s.values.iter().flatten() {
                visitor.visit_expr(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::FileSet;
    use crate::parse::{parse_source, ParseMode};

    struct IdentCollector {
        names: Vec<String>,
    }

    impl<'a> Visitor<'a> for IdentCollector {
        fn visit_ident(&mut self, ident: &'a Ident) {
            self.names.push(ident.name.clone());
        }
    }

    #[test]
    fn collects_idents_in_source_order() {
        let fset = FileSet::new();
        let (file, errors) = parse_source(
            &fset,
            "t",
            "var total = 0\nfor k, v in m { total += v }",
            ParseMode::empty(),
        );
        assert!(errors.is_empty(), "{}", errors);

        let mut collector = IdentCollector { names: Vec::new() };
        collector.visit_file(&file);
        assert_eq!(collector.names, vec!["total", "k", "v", "m", "total", "v"]);
    }

    #[test]
    fn descends_into_closures_and_calls() {
        let fset = FileSet::new();
        let (file, errors) = parse_source(
            &fset,
            "t",
            "f((a, *rest; x=1, **kw) => g(a, x))",
            ParseMode::empty(),
        );
        assert!(errors.is_empty(), "{}", errors);

        let mut collector = IdentCollector { names: Vec::new() };
        collector.visit_file(&file);
        assert_eq!(
            collector.names,
            vec!["f", "a", "rest", "x", "kw", "g", "a", "x"]
        );
    }
}
