//! The main parser interface
//!
//! A bunch of utility functions of the form parse_<thing> tie the pieces
//! together: they allocate a `SourceFile` in the caller's `FileSet`, run a
//! `Parser` over it and hand back the AST root together with the sorted
//! diagnostic list. The literal decoding helpers that turn token text into
//! values (`int_value`, `unquote_string`, ...) also live here; the scanner
//! has already validated the shapes they rely on.

use std::cell::RefCell;
use std::io;
use std::iter::Peekable;
use std::path::Path;
use std::rc::Rc;
use std::str::Chars;

use crate::ast;
use crate::fileset::FileSet;

use gad_errors::ErrorList;

pub mod lexer;
pub mod parser;
pub mod reader;
pub mod token;

pub use self::parser::{Bailout, PResult, ParseMode, Parser, MAX_ERRORS};

/// Parses `src` as a source unit named `filename`, registering it in
/// `fset`.
pub fn parse_source(
    fset: &FileSet,
    filename: &str,
    src: &str,
    mode: ParseMode,
) -> (ast::File, ErrorList) {
    let file = fset.add_file(filename.to_string(), src.to_string());
    let errors = Rc::new(RefCell::new(ErrorList::new()));
    Parser::new(file, errors, mode).parse_file()
}

/// Reads and parses the file at `path` through the set's file loader.
pub fn parse_file(
    fset: &FileSet,
    path: &Path,
    mode: ParseMode,
) -> io::Result<(ast::File, ErrorList)> {
    let file = fset.load_file(path)?;
    let errors = Rc::new(RefCell::new(ErrorList::new()));
    Ok(Parser::new(file, errors, mode).parse_file())
}

/// Parses a single expression followed by end of input.
pub fn parse_expr(
    fset: &FileSet,
    filename: &str,
    src: &str,
    mode: ParseMode,
) -> (ast::Expr, ErrorList) {
    let file = fset.add_file(filename.to_string(), src.to_string());
    let errors = Rc::new(RefCell::new(ErrorList::new()));
    Parser::new(file, errors, mode).parse_expr_file()
}

// _____________________________________________________________________________
// Literal decoding
//

fn split_radix(lit: &str) -> (&str, u32) {
    let bytes = lit.as_bytes();
    if bytes.len() > 2 && bytes[0] == b'0' {
        match bytes[1] {
            b'x' | b'X' => return (&lit[2..], 16),
            b'o' | b'O' => return (&lit[2..], 8),
            b'b' | b'B' => return (&lit[2..], 2),
            _ => {}
        }
    }
    (lit, 10)
}

/// Decodes an integer literal (decimal, or `0x`/`0o`/`0b` prefixed).
pub fn int_value(lit: &str) -> Option<i64> {
    let (digits, radix) = split_radix(lit);
    i64::from_str_radix(digits, radix).ok()
}

/// Decodes a uint literal; the scanner guarantees the trailing `u`.
pub fn uint_value(lit: &str) -> Option<u64> {
    let lit = lit.strip_suffix('u')?;
    let (digits, radix) = split_radix(lit);
    u64::from_str_radix(digits, radix).ok()
}

/// Decodes a float literal.
pub fn float_value(lit: &str) -> Option<f64> {
    lit.parse().ok()
}

fn unescape(chars: &mut Peekable<Chars>) -> Option<char> {
    let c = chars.next()?;
    Some(match c {
        'a' => '\u{07}',
        'b' => '\u{08}',
        'f' => '\u{0C}',
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'v' => '\u{0B}',
        '\\' => '\\',
        '\'' => '\'',
        '"' => '"',
        '0'..='7' => {
            let mut value = c.to_digit(8)?;
            for _ in 0..2 {
                value = value * 8 + chars.next()?.to_digit(8)?;
            }
            if value > 0xFF {
                return None;
            }
            std::char::from_u32(value)?
        }
        'x' | 'u' | 'U' => {
            let digits = match c {
                'x' => 2,
                'u' => 4,
                _ => 8,
            };
            let mut value = 0u32;
            for _ in 0..digits {
                value = value.checked_mul(16)? + chars.next()?.to_digit(16)?;
            }
            if (0xD800..=0xDFFF).contains(&value) {
                return None;
            }
            std::char::from_u32(value)?
        }
        _ => return None,
    })
}

/// Parses a quoted string literal into its final form, unescaping as it
/// goes. The scanner has already rejected malformed escapes.
pub fn unquote_string(lit: &str) -> Option<String> {
    let inner = lit.strip_prefix('"')?.strip_suffix('"')?;
    let mut res = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            res.push(unescape(&mut chars)?);
        } else {
            res.push(c);
        }
    }
    res.shrink_to_fit();
    Some(res)
}

/// Parses a char literal into the single rune it denotes.
pub fn unquote_char(lit: &str) -> Option<char> {
    let inner = lit.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut chars = inner.chars().peekable();
    let c = match chars.next()? {
        '\\' => unescape(&mut chars)?,
        c => c,
    };
    if chars.next().is_some() {
        return None;
    }
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Node, Stmt};
    use crate::parse::token::TokenKind;
    use gad_pos::NO_POS;

    fn parse_str(src: &str, mode: ParseMode) -> (ast::File, ErrorList) {
        let fset = FileSet::new();
        parse_source(&fset, "test.gad", src, mode)
    }

    fn must_parse(src: &str, mode: ParseMode) -> ast::File {
        let (file, errors) = parse_str(src, mode);
        assert!(errors.is_empty(), "unexpected errors: {}", errors);
        file
    }

    fn must_parse_expr(src: &str) -> Expr {
        let fset = FileSet::new();
        let (expr, errors) = parse_expr(&fset, "test.gad", src, ParseMode::empty());
        assert!(errors.is_empty(), "unexpected errors: {}", errors);
        expr
    }

    // _________________________________________________________________________
    // Literal decoding
    //

    #[test]
    fn int_values() {
        assert_eq!(int_value("42"), Some(42));
        assert_eq!(int_value("0x1f"), Some(31));
        assert_eq!(int_value("0o17"), Some(15));
        assert_eq!(int_value("0b101"), Some(5));
        assert_eq!(int_value("9223372036854775808"), None);
    }

    #[test]
    fn uint_values() {
        assert_eq!(uint_value("42u"), Some(42));
        assert_eq!(uint_value("0xffu"), Some(255));
        assert_eq!(uint_value("42"), None);
    }

    #[test]
    fn string_unquoting() {
        assert_eq!(unquote_string(r#""hi""#), Some("hi".to_string()));
        assert_eq!(unquote_string(r#""a\nb""#), Some("a\nb".to_string()));
        assert_eq!(unquote_string(r#""\x41\101A""#), Some("AAA".to_string()));
        assert_eq!(
            unquote_string(r#""\U0001F600""#),
            Some("\u{1F600}".to_string())
        );
        assert_eq!(unquote_string(r#""\q""#), None);
    }

    #[test]
    fn char_unquoting() {
        assert_eq!(unquote_char("'x'"), Some('x'));
        assert_eq!(unquote_char(r"'\t'"), Some('\t'));
        assert_eq!(unquote_char("'é'"), Some('\u{e9}'));
        assert_eq!(unquote_char("'xy'"), None);
    }

    // _________________________________________________________________________
    // End-to-end scenarios
    //

    #[test]
    fn arithmetic_precedence() {
        let file = must_parse("1 + 2 * 3", ParseMode::empty());
        assert_eq!(file.stmts.len(), 1);
        match &file.stmts[0] {
            Stmt::Expr(s) => assert_eq!(s.expr.to_string(), "(1 + (2 * 3))"),
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn for_in_with_else() {
        let file = must_parse(
            r#"for k,v in m { echo(k) } else { echo("empty") }"#,
            ParseMode::empty(),
        );
        assert_eq!(file.stmts.len(), 1);
        match &file.stmts[0] {
            Stmt::ForIn(s) => {
                assert_eq!(s.key.name, "k");
                assert_eq!(s.value.name, "v");
                assert_eq!(s.iterable.to_string(), "m");
                assert_eq!(s.body.stmts.len(), 1);
                assert_eq!(s.body.stmts[0].to_string(), "echo(k)");
                let else_body = s.else_body.as_ref().expect("else body");
                assert_eq!(else_body.stmts[0].to_string(), "echo(\"empty\")");
            }
            other => panic!("expected for-in, got {:?}", other),
        }
    }

    #[test]
    fn single_ident_for_in_binds_key() {
        let file = must_parse("for k in m { }", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::ForIn(s) => {
                assert_eq!(s.key.name, "k");
                assert_eq!(s.value.name, "_");
            }
            other => panic!("expected for-in, got {:?}", other),
        }
    }

    #[test]
    fn mixed_template() {
        let file = must_parse("hello {% if x %}world{% end %}!", ParseMode::PARSE_MIXED);
        assert_eq!(file.stmts.len(), 5, "stmts: {:?}", file.stmts);

        match &file.stmts[0] {
            Stmt::MixedText(t) => assert_eq!(t.literal, "hello "),
            other => panic!("expected text, got {:?}", other),
        }
        assert!(matches!(file.stmts[1], Stmt::CodeBegin(_)));
        match &file.stmts[2] {
            Stmt::If(s) => {
                assert_eq!(s.cond.to_string(), "x");
                // The body is opened by `%}`: its marker comes first,
                // then the text, then the `{%` before `end`.
                assert!(matches!(s.body.stmts[0], Stmt::CodeEnd(_)));
                match &s.body.stmts[1] {
                    Stmt::MixedText(t) => assert_eq!(t.literal, "world"),
                    other => panic!("expected text, got {:?}", other),
                }
                assert!(matches!(s.body.stmts[2], Stmt::CodeBegin(_)));
                assert!(s.else_stmt.is_none());
            }
            other => panic!("expected if, got {:?}", other),
        }
        assert!(matches!(file.stmts[3], Stmt::CodeEnd(_)));
        match &file.stmts[4] {
            Stmt::MixedText(t) => assert_eq!(t.literal, "!"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn lambda_with_types_and_named_defaults() {
        let expr = must_parse_expr("(a: int|str, *rest, ; x=1, **kw) => a");
        match expr {
            Expr::Closure(c) => {
                let params = &c.typ.params;
                assert_eq!(params.args.values.len(), 1);
                assert_eq!(params.args.values[0].to_string(), "a: int|str");
                assert_eq!(params.args.var.as_ref().unwrap().to_string(), "rest");
                assert_eq!(params.named.names.len(), 1);
                assert_eq!(params.named.names[0].to_string(), "x");
                assert_eq!(params.named.values[0].as_ref().unwrap().to_string(), "1");
                assert_eq!(params.named.var.as_ref().unwrap().to_string(), "kw");
                assert_eq!(c.body.to_string(), "a");
            }
            other => panic!("expected closure, got {:?}", other),
        }
    }

    #[test]
    fn error_recovery_keeps_following_statements() {
        let (file, errors) = parse_str("var x =\nfor i in xs { }", ParseMode::empty());

        assert_eq!(errors.len(), 1, "errors: {}", errors);
        let err = &errors.errors()[0];
        assert_eq!(err.msg, "expected operand, found newline");
        assert_eq!((err.pos.line, err.pos.column), (1, 8));

        assert_eq!(file.stmts.len(), 2);
        match &file.stmts[0] {
            Stmt::Decl(d) => match &d.decl {
                ast::Decl::Gen(g) => {
                    assert_eq!(g.token, TokenKind::Var);
                    match &g.specs[0] {
                        ast::Spec::Value(v) => {
                            assert_eq!(v.idents[0].name, "x");
                            assert!(matches!(v.values[0], Some(Expr::Bad(_))));
                        }
                        other => panic!("expected value spec, got {:?}", other),
                    }
                }
                other => panic!("expected gen decl, got {:?}", other),
            },
            other => panic!("expected decl, got {:?}", other),
        }
        assert!(matches!(file.stmts[1], Stmt::ForIn(_)));
    }

    #[test]
    fn config_preamble_switches_mode() {
        let file = must_parse("# gad: mixed\nhello {% 1+1 %}", ParseMode::empty());
        assert_eq!(file.stmts.len(), 5, "stmts: {:?}", file.stmts);

        match &file.stmts[0] {
            Stmt::Config(c) => {
                assert!(c.parsed.mixed);
                assert_eq!(c.options.len(), 1);
                assert_eq!(c.options[0].to_string(), "mixed");
            }
            other => panic!("expected config, got {:?}", other),
        }
        match &file.stmts[1] {
            Stmt::MixedText(t) => assert_eq!(t.literal, "hello "),
            other => panic!("expected text, got {:?}", other),
        }
        assert!(matches!(file.stmts[2], Stmt::CodeBegin(_)));
        match &file.stmts[3] {
            Stmt::Expr(s) => assert_eq!(s.expr.to_string(), "(1 + 1)"),
            other => panic!("expected expression, got {:?}", other),
        }
        assert!(matches!(file.stmts[4], Stmt::CodeEnd(_)));
    }

    #[test]
    fn config_overrides_delimiters() {
        let file = must_parse(
            "# gad: mixed, mixedStart=\"<?\", mixedEnd=\"?>\"\na<? x ?>b",
            ParseMode::empty(),
        );
        assert!(matches!(file.stmts[0], Stmt::Config(_)));
        match &file.stmts[1] {
            Stmt::MixedText(t) => assert_eq!(t.literal, "a"),
            other => panic!("expected text, got {:?}", other),
        }
        assert!(matches!(file.stmts[2], Stmt::CodeBegin(_)));
        match &file.stmts[3] {
            Stmt::Expr(s) => assert_eq!(s.expr.to_string(), "x"),
            other => panic!("expected expression, got {:?}", other),
        }
    }

    #[test]
    fn mixed_if_else_template() {
        let file = must_parse(
            "{% if x %}a{% else %}b{% end %}",
            ParseMode::PARSE_MIXED,
        );
        assert!(matches!(file.stmts[0], Stmt::CodeBegin(_)));
        match &file.stmts[1] {
            Stmt::If(s) => {
                match &s.body.stmts[1] {
                    Stmt::MixedText(t) => assert_eq!(t.literal, "a"),
                    other => panic!("expected text, got {:?}", other),
                }
                match s.else_stmt.as_deref().unwrap() {
                    Stmt::Block(b) => match &b.stmts[1] {
                        Stmt::MixedText(t) => assert_eq!(t.literal, "b"),
                        other => panic!("expected text, got {:?}", other),
                    },
                    other => panic!("expected else block, got {:?}", other),
                }
            }
            other => panic!("expected if, got {:?}", other),
        }
        assert!(matches!(file.stmts[2], Stmt::CodeEnd(_)));
    }

    #[test]
    fn mixed_for_template() {
        let file = must_parse(
            "{% for x in xs %}item{% end %}",
            ParseMode::PARSE_MIXED,
        );
        match &file.stmts[1] {
            Stmt::ForIn(s) => {
                assert_eq!(s.key.name, "x");
                match &s.body.stmts[1] {
                    Stmt::MixedText(t) => assert_eq!(t.literal, "item"),
                    other => panic!("expected text, got {:?}", other),
                }
            }
            other => panic!("expected for-in, got {:?}", other),
        }
    }

    // _________________________________________________________________________
    // Rewrites and special cases
    //

    #[test]
    fn nil_equality_rewrite() {
        for src in &["x == nil", "nil == x"] {
            match must_parse_expr(src) {
                Expr::Unary(u) => {
                    assert_eq!(u.token, TokenKind::Null);
                    assert_eq!(u.expr.to_string(), "x");
                }
                other => panic!("expected rewrite for {}, got {:?}", src, other),
            }
        }
        match must_parse_expr("x != nil") {
            Expr::Unary(u) => assert_eq!(u.token, TokenKind::NotNull),
            other => panic!("expected rewrite, got {:?}", other),
        }
        // Comparisons not involving nil stay binary.
        assert!(matches!(must_parse_expr("x == y"), Expr::Binary(_)));
    }

    #[test]
    fn pipe_selector_after_call() {
        // Inside a single pipe stage the trailing selector binds to the
        // whole stage.
        match must_parse_expr("x | f(a).b") {
            Expr::Selector(sel) => {
                assert_eq!(sel.sel.name, "b");
                match *sel.expr {
                    Expr::Binary(b) => {
                        assert_eq!(b.token, TokenKind::Or);
                        assert_eq!(b.lhs.to_string(), "x");
                        assert_eq!(b.rhs.to_string(), "f(a)");
                    }
                    other => panic!("expected pipe, got {:?}", other),
                }
            }
            other => panic!("expected selector, got {:?}", other),
        }

        // Without a pipe the selector binds to the call as usual.
        match must_parse_expr("f(a).b") {
            Expr::Selector(sel) => {
                assert_eq!(sel.expr.to_string(), "f(a)");
            }
            other => panic!("expected selector, got {:?}", other),
        }

        // Chained stages: the selector still binds to the whole chain.
        assert_eq!(
            must_parse_expr("a | b | f(x).sel").to_string(),
            "((a | b) | f(x)).sel"
        );
    }

    #[test]
    fn full_precedence_ladder() {
        assert_eq!(
            must_parse_expr("1 << 2 + 3 & 4 | 5 ^ 6").to_string(),
            "(((1 << (2 + 3)) & 4) | (5 ^ 6))"
        );
        assert_eq!(
            must_parse_expr("a || b && c == d < e").to_string(),
            "(a || (b && (c == (d < e))))"
        );
        assert_eq!(must_parse_expr("-a * b").to_string(), "((-a) * b)");
        assert_eq!(must_parse_expr("!a && b").to_string(), "((!a) && b)");
        assert_eq!(must_parse_expr("x in xs == true").to_string(), "((x in xs) == true)");
    }

    #[test]
    fn interpolation_call_may_use_semicolon_but_parens_may_not() {
        let file = must_parse("{{ f(a;b) }}", ParseMode::PARSE_MIXED);
        match &file.stmts[0] {
            Stmt::ExprToText(s) => match &s.expr {
                Expr::Call(call) => {
                    assert_eq!(call.args.args.values.len(), 1);
                    assert_eq!(call.args.named.names.len(), 1);
                    assert_eq!(call.args.named.names[0].to_string(), "b");
                    assert!(call.args.named.values[0].is_none());
                }
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected interpolation, got {:?}", other),
        }

        let (_, errors) = parse_str("{{ (a;b) }}", ParseMode::PARSE_MIXED);
        assert!(!errors.is_empty());
        assert!(
            errors.errors()[0].msg.contains("';'"),
            "unexpected message: {}",
            errors
        );
    }

    #[test]
    fn interpolation_as_value_mode() {
        let file = must_parse(
            "{{ x }}",
            ParseMode::PARSE_MIXED | ParseMode::PARSE_MIXED_EXPR_AS_VALUE,
        );
        assert!(matches!(file.stmts[0], Stmt::MixedValue(_)));

        let file = must_parse("{{ x }}", ParseMode::PARSE_MIXED);
        assert!(matches!(file.stmts[0], Stmt::ExprToText(_)));
    }

    #[test]
    fn cond_expr_short_form() {
        match must_parse_expr("a ? b") {
            Expr::Cond(c) => {
                assert_eq!(c.true_expr.to_string(), "b");
                assert_eq!(c.false_expr.to_string(), "b");
                assert_eq!(c.colon, NO_POS);
            }
            other => panic!("expected conditional, got {:?}", other),
        }
        assert_eq!(must_parse_expr("a ? b : c").to_string(), "(a ? b : c)");
    }

    // _________________________________________________________________________
    // Statements
    //

    #[test]
    fn c_style_and_while_and_infinite_for() {
        let file = must_parse("for i := 0; i < 5; i++ { }", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::For(s) => {
                assert!(s.init.is_some());
                assert_eq!(s.cond.as_ref().unwrap().to_string(), "(i < 5)");
                assert!(s.post.is_some());
            }
            other => panic!("expected for, got {:?}", other),
        }

        let file = must_parse("for x < 10 { }", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::For(s) => {
                assert!(s.init.is_none());
                assert!(s.post.is_none());
                assert_eq!(s.cond.as_ref().unwrap().to_string(), "(x < 10)");
            }
            other => panic!("expected for, got {:?}", other),
        }

        let file = must_parse("for { break }", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::For(s) => {
                assert!(s.cond.is_none());
                assert!(matches!(s.body.stmts[0], Stmt::Branch(_)));
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn if_else_chain_and_keyword_blocks() {
        let file = must_parse(
            "if a { f() } else if b { g() } else { h() }",
            ParseMode::empty(),
        );
        match &file.stmts[0] {
            Stmt::If(s) => {
                assert_eq!(s.cond.to_string(), "a");
                match s.else_stmt.as_deref().unwrap() {
                    Stmt::If(elif) => {
                        assert_eq!(elif.cond.to_string(), "b");
                        assert!(matches!(
                            elif.else_stmt.as_deref().unwrap(),
                            Stmt::Block(_)
                        ));
                    }
                    other => panic!("expected else-if, got {:?}", other),
                }
            }
            other => panic!("expected if, got {:?}", other),
        }

        let file = must_parse("if x then y() else z() end", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::If(s) => {
                assert_eq!(s.body.stmts.len(), 1);
                let else_block = s.else_stmt.as_deref().unwrap();
                assert!(matches!(else_block, Stmt::Block(_)));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn if_with_init_stmt() {
        let file = must_parse("if v := f(); v { use(v) }", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::If(s) => {
                assert!(matches!(s.init.as_deref().unwrap(), Stmt::Assign(_)));
                assert_eq!(s.cond.to_string(), "v");
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn try_catch_finally() {
        let file = must_parse(
            "try { f() } catch err { log(err) } finally { done() }",
            ParseMode::empty(),
        );
        match &file.stmts[0] {
            Stmt::Try(s) => {
                assert_eq!(s.body.stmts.len(), 1);
                let catch = s.catch.as_ref().unwrap();
                assert_eq!(catch.ident.as_ref().unwrap().name, "err");
                assert!(s.finally.is_some());
            }
            other => panic!("expected try, got {:?}", other),
        }

        let file = must_parse("try { f() } finally { g() }", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::Try(s) => {
                assert!(s.catch.is_none());
                assert!(s.finally.is_some());
            }
            other => panic!("expected try, got {:?}", other),
        }
    }

    #[test]
    fn multi_return_materialises_array() {
        let file = must_parse("func f() { return 1, 2 }", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::Expr(s) => match &s.expr {
                Expr::Func(f) => match &f.body.stmts[0] {
                    Stmt::Return(r) => match r.result.as_ref().unwrap() {
                        Expr::Array(a) => {
                            assert_eq!(a.elements.len(), 2);
                            assert_eq!(a.lbrack, NO_POS);
                        }
                        other => panic!("expected array, got {:?}", other),
                    },
                    other => panic!("expected return, got {:?}", other),
                },
                other => panic!("expected func literal, got {:?}", other),
            },
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn assignments_and_inc_dec() {
        let file = must_parse("a, b = 1, 2\nc += 3\nd++", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::Assign(s) => {
                assert_eq!(s.lhs.len(), 2);
                assert_eq!(s.rhs.len(), 2);
                assert_eq!(s.token, TokenKind::Assign);
            }
            other => panic!("expected assign, got {:?}", other),
        }
        match &file.stmts[1] {
            Stmt::Assign(s) => {
                assert_eq!(s.token, TokenKind::AddAssign);
                assert_eq!(s.lhs.len(), 1);
                assert_eq!(s.rhs.len(), 1);
            }
            other => panic!("expected compound assign, got {:?}", other),
        }
        assert!(matches!(file.stmts[2], Stmt::IncDec(_)));
    }

    #[test]
    fn declarations() {
        let file = must_parse(
            "param (a, b: int, *rest, c=1)\nglobal g\nvar x = 1\nconst y = 2",
            ParseMode::empty(),
        );
        match &file.stmts[0] {
            Stmt::Decl(d) => match &d.decl {
                ast::Decl::Gen(g) => {
                    assert_eq!(g.token, TokenKind::Param);
                    assert_eq!(g.specs.len(), 4);
                    assert!(matches!(
                        g.specs[2],
                        ast::Spec::Param(ast::ParamSpec {
                            variadic: Some(ast::VariadicKind::Positional),
                            ..
                        })
                    ));
                    assert!(matches!(g.specs[3], ast::Spec::NamedParam(_)));
                }
                other => panic!("expected gen decl, got {:?}", other),
            },
            other => panic!("expected decl, got {:?}", other),
        }
        assert!(matches!(file.stmts[1], Stmt::Decl(_)));
        assert!(matches!(file.stmts[2], Stmt::Decl(_)));
        assert!(matches!(file.stmts[3], Stmt::Decl(_)));
    }

    #[test]
    fn const_requires_initializer() {
        let (_, errors) = parse_str("const x", ParseMode::empty());
        assert!(!errors.is_empty());
        assert!(errors.errors()[0].msg.contains("missing initializer"));
    }

    #[test]
    fn const_func_is_named_for_recursion() {
        let file = must_parse("const fib = func(n) { return fib(n) }", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::Decl(d) => match &d.decl {
                ast::Decl::Gen(g) => match &g.specs[0] {
                    ast::Spec::Value(v) => match v.values[0].as_ref().unwrap() {
                        Expr::Func(f) => {
                            assert_eq!(f.typ.token, TokenKind::Const);
                            assert_eq!(f.typ.ident.as_ref().unwrap().name, "fib");
                        }
                        other => panic!("expected func, got {:?}", other),
                    },
                    other => panic!("expected value spec, got {:?}", other),
                },
                other => panic!("expected gen decl, got {:?}", other),
            },
            other => panic!("expected decl, got {:?}", other),
        }
    }

    // _________________________________________________________________________
    // Operand coverage
    //

    #[test]
    fn literal_operands() {
        let cases: &[(&str, &str)] = &[
            ("42", "42"),
            ("42u", "42u"),
            ("4.5", "4.5"),
            ("1.5d", "1.5d"),
            ("'x'", "'x'"),
            ("\"hi\"", "\"hi\""),
            ("`raw`", "`raw`"),
            ("true", "true"),
            ("yes", "yes"),
            ("nil", "nil"),
            ("STDIN", "STDIN"),
            ("STDOUT", "STDOUT"),
            (".name", ".name"),
            (".file", ".file"),
            ("is_module", "is_module"),
            (".callee", ".callee"),
            (".args", ".args"),
            (".namedArgs", ".namedArgs"),
            ("$\"tpl\"", "$\"tpl\""),
            ("import(\"strings\")", "import(\"strings\")"),
            ("[1, 2]", "[1, 2]"),
            ("[k=1, v=2]", "[k=1, v=2]"),
            ("{a: 1, b: 2}", "{a: 1, b: 2}"),
        ];
        for (src, want) in cases {
            assert_eq!(must_parse_expr(src).to_string(), *want, "src: {}", src);
        }
    }

    #[test]
    fn slices_and_indexing() {
        assert_eq!(must_parse_expr("a[1]").to_string(), "a[1]");
        assert_eq!(must_parse_expr("a[1:2]").to_string(), "a[1:2]");
        assert_eq!(must_parse_expr("a[:2]").to_string(), "a[:2]");
        assert_eq!(must_parse_expr("a[1:]").to_string(), "a[1:]");
        assert_eq!(must_parse_expr("a[:]").to_string(), "a[:]");
        assert_eq!(must_parse_expr("a?.b").to_string(), "a?.b");
        assert_eq!(must_parse_expr("a.end").to_string(), "a.end");
    }

    #[test]
    fn begin_end_blocks() {
        let file = must_parse("begin f() end", ParseMode::empty());
        match &file.stmts[0] {
            Stmt::Block(b) => assert_eq!(b.stmts.len(), 1),
            other => panic!("expected block, got {:?}", other),
        }

        match must_parse_expr("begin 1 end") {
            Expr::Block(b) => assert_eq!(b.block.stmts.len(), 1),
            other => panic!("expected block expression, got {:?}", other),
        }
    }

    #[test]
    fn closure_with_keyword_body() {
        match must_parse_expr("(a) => do f(a) end") {
            Expr::Closure(c) => match *c.body {
                Expr::Stmts(s) => assert_eq!(s.stmts.len(), 1),
                other => panic!("expected statement body, got {:?}", other),
            },
            other => panic!("expected closure, got {:?}", other),
        }
    }

    #[test]
    fn variadic_ordering_is_validated() {
        let (_, errors) = parse_str("f(*a, b)", ParseMode::empty());
        assert!(errors
            .errors()
            .iter()
            .any(|e| e.msg.contains("after variadic")));

        let (_, errors) = parse_str("f(*a, *b)", ParseMode::empty());
        assert!(errors
            .errors()
            .iter()
            .any(|e| e.msg.contains("variadic")));

        // Well formed calls pass: positional, variadic, named, named
        // variadic in order.
        must_parse("f(a, *b; x=1, flag, **kw)", ParseMode::empty());
    }

    #[test]
    fn throw_forms() {
        let file = must_parse("throw err", ParseMode::empty());
        assert!(matches!(file.stmts[0], Stmt::Throw(_)));

        assert_eq!(
            must_parse_expr("a ?? throw b").to_string(),
            "(a ?? throw b)"
        );
    }

    #[test]
    fn heredoc_operand_and_import_chain() {
        match must_parse_expr("```line1\nline2```") {
            Expr::RawHeredoc(h) => assert_eq!(h.value(), "line1\nline2"),
            other => panic!("expected heredoc, got {:?}", other),
        }

        assert_eq!(
            must_parse_expr("import(\"m\").run()").to_string(),
            "import(\"m\").run()"
        );
    }

    #[test]
    fn branch_statements() {
        let file = must_parse("for { break }\nfor { continue }", ParseMode::empty());
        assert_eq!(file.stmts.len(), 2);
    }

    #[test]
    fn keyword_selector_and_nullish_chain() {
        assert_eq!(
            must_parse_expr("m?.get(1).value").to_string(),
            "m?.get(1).value"
        );
        assert_eq!(must_parse_expr("a ?? b").to_string(), "(a ?? b)");
    }

    // _________________________________________________________________________
    // Testable properties
    //

    #[test]
    fn position_integrity() {
        use crate::visit::{walk_expr, walk_stmt, Visitor};
        use gad_pos::Pos;

        struct PosChecker {
            base: Pos,
            limit: Pos,
            seen: usize,
        }

        impl PosChecker {
            fn check(&mut self, pos: Pos, end: Pos) {
                self.seen += 1;
                assert!(pos == NO_POS || (pos >= self.base && pos <= self.limit));
                assert!(end == NO_POS || (end >= self.base && end <= self.limit));
                assert!(pos <= end);
            }
        }

        impl<'a> Visitor<'a> for PosChecker {
            fn visit_stmt(&mut self, stmt: &'a Stmt) {
                self.check(stmt.pos(), stmt.end());
                walk_stmt(self, stmt);
            }

            fn visit_expr(&mut self, expr: &'a Expr) {
                self.check(expr.pos(), expr.end());
                walk_expr(self, expr);
            }
        }

        let file = must_parse(
            "x = f(a, *b; c=1) + m[1:2]\nif x { return x, x.y }\nfor k, v in m { }",
            ParseMode::empty(),
        );
        let mut checker = PosChecker {
            base: file.input_file.base,
            limit: file.input_file.base + file.input_file.size,
            seen: 0,
        };
        checker.visit_file(&file);
        assert!(checker.seen > 15, "only {} nodes visited", checker.seen);
    }

    #[test]
    fn deterministic_diagnostics() {
        let src = "var x =\nif {\nfunc(\n";
        let (_, first) = parse_str(src, ParseMode::empty());
        let (_, second) = parse_str(src, ParseMode::empty());
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn semicolon_equivalence() {
        let (a, errs_a) = parse_str("a := 1\nb := 2\nc()", ParseMode::empty());
        let (b, errs_b) = parse_str("a := 1;b := 2;c()", ParseMode::empty());
        assert!(errs_a.is_empty() && errs_b.is_empty());
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn bailout_truncates_to_budget() {
        let src = "if\n".repeat(40);
        let (_, errors) = parse_str(&src, ParseMode::empty());
        assert_eq!(errors.len(), MAX_ERRORS);
    }

    #[test]
    fn malformed_lists_terminate() {
        // Unterminated and degenerate inputs must produce errors, not
        // hangs.
        for src in &["f(", "f(,,,", "[1, 2", "{a: ", "(((((((", "f(1 2)"] {
            let (_, errors) = parse_str(src, ParseMode::empty());
            assert!(!errors.is_empty(), "no errors for {}", src);
        }
    }

    #[test]
    fn comment_groups() {
        let file = must_parse("// a\n// b\n\n// c\nx = 1", ParseMode::PARSE_COMMENTS);
        assert_eq!(file.comments.len(), 2);
        assert_eq!(file.comments[0].list.len(), 2);
        assert_eq!(file.comments[0].list[0].text, "// a");
        assert_eq!(file.comments[1].list.len(), 1);
        assert_eq!(file.comments[1].list[0].text, "// c");
    }

    #[test]
    fn trim_flags_propagate_to_text() {
        let file = must_parse("a  {%- x -%}  b", ParseMode::PARSE_MIXED);
        match &file.stmts[0] {
            Stmt::MixedText(t) => {
                assert!(t.flags.contains(ast::TrimFlags::TRIM_RIGHT));
                assert_eq!(t.value(), "a");
            }
            other => panic!("expected text, got {:?}", other),
        }
        match file.stmts.last().unwrap() {
            Stmt::MixedText(t) => {
                assert!(t.flags.contains(ast::TrimFlags::TRIM_LEFT));
                assert_eq!(t.value(), "b");
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn parse_expr_rejects_trailing_tokens() {
        let fset = FileSet::new();
        let (_, errors) = parse_expr(&fset, "t", "1 + 2 extra", ParseMode::empty());
        assert!(!errors.is_empty());
    }

    #[test]
    fn parse_file_reads_through_loader() {
        use crate::fileset::FileLoader;
        use std::path::PathBuf;

        struct FixedLoader;

        impl FileLoader for FixedLoader {
            fn file_exists(&self, _: &Path) -> bool {
                true
            }

            fn abs_path(&self, path: &Path) -> Option<PathBuf> {
                Some(path.to_path_buf())
            }

            fn read_file(&self, _: &Path) -> io::Result<String> {
                Ok("x = 1".to_string())
            }
        }

        let fset = FileSet::with_file_loader(Box::new(FixedLoader));
        let (file, errors) = parse_file(&fset, Path::new("mem.gad"), ParseMode::empty()).unwrap();
        assert!(errors.is_empty());
        assert_eq!(file.stmts.len(), 1);
    }
}
