//! The gad parser: recursive descent over the scanner's token stream.
//!
//! Errors never unwind through the grammar. Each diagnostic is appended to
//! the shared `ErrorList` and the affected node degrades to
//! `BadExpr`/`BadStmt`/`BadDecl`, so ancestors keep building a mostly
//! correct tree. The only early exit is `Bailout`, raised once the error
//! budget is spent and caught exclusively by the entry points.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use bitflags::bitflags;
use log::debug;

use gad_errors::ErrorList;
use gad_pos::{Pos, SourceFile, NO_POS};

use crate::ast;
use crate::ast::{Decl, Expr, Node, Spec, Stmt};
use crate::parse::lexer::{ScanMode, Scanner};
use crate::parse::token::{Token, TokenKind, LOWEST_PREC};
use crate::parse::{float_value, int_value, uint_value, unquote_char, unquote_string};

bitflags! {
    /// Parser option register; mirrors the scanner's `ScanMode`.
    pub struct ParseMode: u32 {
        /// Retain comments in the AST.
        const PARSE_COMMENTS = 1 << 0;
        /// Begin in mixed text+code mode.
        const PARSE_MIXED = 1 << 1;
        /// Do not recognise a config preamble.
        const PARSE_CONFIG_DISABLED = 1 << 2;
        /// Treat template interpolations as value expressions.
        const PARSE_MIXED_EXPR_AS_VALUE = 1 << 3;
    }
}

impl ParseMode {
    pub fn scan_mode(self) -> ScanMode {
        let mut mode = ScanMode::empty();
        if self.contains(ParseMode::PARSE_COMMENTS) {
            mode |= ScanMode::SCAN_COMMENTS;
        }
        if self.contains(ParseMode::PARSE_MIXED) {
            mode |= ScanMode::MIXED;
        }
        if self.contains(ParseMode::PARSE_CONFIG_DISABLED) {
            mode |= ScanMode::CONFIG_DISABLED;
        }
        if self.contains(ParseMode::PARSE_MIXED_EXPR_AS_VALUE) {
            mode |= ScanMode::MIXED_EXPR_AS_VALUE;
        }
        mode
    }
}

/// Raised when the error budget is exhausted; an explicit early-return
/// signal, caught only by the entry points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bailout;

pub type PResult<T> = Result<T, Bailout>;

/// Hard error budget per file.
pub const MAX_ERRORS: usize = 10;

/// Statement-start keywords used as synchronisation points after an
/// error.
const STMT_START: &[TokenKind] = &[
    TokenKind::Param,
    TokenKind::Global,
    TokenKind::Var,
    TokenKind::Const,
    TokenKind::Break,
    TokenKind::Continue,
    TokenKind::For,
    TokenKind::If,
    TokenKind::Return,
    TokenKind::Try,
    TokenKind::Throw,
];

/// The raw shape collected by the paren/call/lambda unifier: everything
/// between `(` and `)`, split at the first explicit `;` into a positional
/// and a named section. `CallArgsOf`/`FuncParamsOf` reinterpret it.
struct ParenList {
    lparen: Pos,
    args: Vec<Expr>,
    named: Vec<Expr>,
    semi_pos: Pos,
    rparen: Pos,
}

pub struct Parser {
    scanner: Scanner,
    errors: Rc<RefCell<ErrorList>>,
    file: Rc<SourceFile>,
    mode: ParseMode,
    /// One-token lookahead buffer.
    token: Token,
    prev_token: Token,
    comments: Vec<ast::CommentGroup>,
    open_comment_group: Option<ast::CommentGroup>,
    last_comment_end_line: u32,
    /// Error-recovery bookkeeping: the position recovery last succeeded
    /// at, and how often it re-entered there.
    sync_pos: Pos,
    sync_count: u32,
    /// Nesting depth of pipe (`|`) right-hand sides being parsed; the
    /// selector-after-call early return fires at depth one.
    pipes: u32,
    /// Inside a `for` header `in` belongs to the statement, not to the
    /// expression grammar.
    in_for_header: bool,
}

impl Parser {
    pub fn new(file: Rc<SourceFile>, errors: Rc<RefCell<ErrorList>>, mode: ParseMode) -> Parser {
        let scanner = Scanner::new(file.clone(), errors.clone(), mode.scan_mode());
        let mut p = Parser {
            scanner,
            errors,
            file,
            mode,
            token: Token::eof(),
            prev_token: Token::eof(),
            comments: Vec::new(),
            open_comment_group: None,
            last_comment_end_line: 0,
            sync_pos: NO_POS,
            sync_count: 0,
            pipes: 0,
            in_for_header: false,
        };
        p.next();
        p
    }

    // _________________________________________________________________________
    // Entry points
    //

    /// Parses the whole file into a statement list. On bailout the
    /// partial statement list collected so far is kept and the
    /// diagnostic list is truncated to the budget.
    pub fn parse_file(mut self) -> (ast::File, ErrorList) {
        let mut stmts = Vec::new();
        let bailed = self.parse_file_stmts(&mut stmts).is_err();
        self.flush_comment_group();

        let mut errors = self.errors.borrow().clone();
        if bailed {
            debug!("parse bailed out after {} errors", errors.len());
            errors.truncate(MAX_ERRORS);
        }
        errors.sort();

        let file = ast::File {
            input_file: self.file.clone(),
            stmts,
            comments: mem::replace(&mut self.comments, Vec::new()),
        };
        (file, errors)
    }

    /// Parses a single expression followed by end of input.
    pub fn parse_expr_file(mut self) -> (Expr, ErrorList) {
        let expr = match self.parse_expr_entry() {
            Ok(expr) => expr,
            Err(Bailout) => Expr::Bad(ast::BadExpr {
                from: self.file.base,
                to: self.file.pos(self.file.size),
            }),
        };
        self.flush_comment_group();
        let mut errors = self.errors.borrow().clone();
        errors.truncate(MAX_ERRORS);
        errors.sort();
        (expr, errors)
    }

    fn parse_expr_entry(&mut self) -> PResult<Expr> {
        let expr = self.parse_expr()?;
        // Trailing newline semicolons are fine, anything else is not.
        while self.token.kind == TokenKind::Semicolon {
            self.next();
        }
        if self.token.kind != TokenKind::Eof {
            self.error_expected(self.token.pos, "end of file")?;
        }
        Ok(expr)
    }

    fn parse_file_stmts(&mut self, stmts: &mut Vec<Stmt>) -> PResult<()> {
        while self.token.kind != TokenKind::Eof {
            match self.token.kind {
                TokenKind::Semicolon => self.next(),
                TokenKind::RBrace
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Catch
                | TokenKind::Finally => {
                    // Closers with no construct to close; skip so the
                    // loop cannot stall on them.
                    self.error_expected(self.token.pos, "statement")?;
                    self.next();
                }
                _ => {
                    let stmt = self.parse_stmt()?;
                    if !stmt.is_empty_stmt() {
                        stmts.push(stmt);
                    }
                }
            }
        }
        Ok(())
    }

    // _________________________________________________________________________
    // Token handling, diagnostics, recovery
    //

    /// Advances to the next non-comment token, grouping comments along
    /// the way.
    fn next(&mut self) {
        self.prev_token = mem::replace(&mut self.token, Token::eof());
        loop {
            let tok = self.scanner.next_token();
            if tok.kind == TokenKind::Comment {
                self.collect_comment(tok);
                continue;
            }
            self.token = tok;
            return;
        }
    }

    fn collect_comment(&mut self, tok: Token) {
        let comment = ast::Comment {
            slash: tok.pos,
            text: tok.literal,
        };
        let start_line = self.file.position(comment.pos()).line;
        let end_line = self.file.position(comment.end()).line;

        if let Some(group) = self.open_comment_group.as_mut() {
            // A blank line ends the group.
            if start_line <= self.last_comment_end_line + 1 {
                group.list.push(comment);
                self.last_comment_end_line = end_line;
                return;
            }
        }
        self.flush_comment_group();
        self.last_comment_end_line = end_line;
        self.open_comment_group = Some(ast::CommentGroup {
            list: vec![comment],
        });
    }

    fn flush_comment_group(&mut self) {
        if let Some(group) = self.open_comment_group.take() {
            self.comments.push(group);
        }
    }

    /// Appends a diagnostic; raises `Bailout` once the budget is spent.
    fn error(&mut self, pos: Pos, msg: &str) -> PResult<()> {
        let fp = if pos.is_valid() && self.file.contains(pos) {
            self.file.position(pos)
        } else {
            self.file.position(NO_POS)
        };
        let mut errors = self.errors.borrow_mut();
        errors.add(fp, msg.to_string());
        if errors.len() > MAX_ERRORS {
            return Err(Bailout);
        }
        Ok(())
    }

    fn error_expected(&mut self, pos: Pos, what: &str) -> PResult<()> {
        let found = self.token.describe();
        self.error(pos, &format!("expected {}, found {}", what, found))
    }

    /// Consumes a token of the given kind and returns its position, or
    /// diagnoses and returns `NO_POS` without consuming.
    fn expect(&mut self, kind: TokenKind) -> PResult<Pos> {
        if self.token.kind == kind {
            let pos = self.token.pos;
            self.next();
            return Ok(pos);
        }
        self.error_expected(self.token.pos, &format!("'{}'", kind))?;
        Ok(NO_POS)
    }

    /// Accepts a statement terminator: a semicolon is consumed, a
    /// closing construct is left in place, anything else is diagnosed
    /// and skipped up to the next statement start.
    fn expect_semi(&mut self) -> PResult<()> {
        use self::TokenKind::*;
        match self.token.kind {
            Semicolon => {
                self.next();
                Ok(())
            }
            RBrace | End | Else | Catch | Finally | Eof | MixedCodeEnd | MixedValueEnd
            | ConfigEnd => Ok(()),
            _ => {
                self.error_expected(self.token.pos, "';'")?;
                self.advance(STMT_START);
                Ok(())
            }
        }
    }

    /// Skips tokens until a synchronisation point. Re-entering at the
    /// same position is tolerated a bounded number of times, after which
    /// the sync point is skipped over; this keeps recovery O(N).
    fn advance(&mut self, to: &[TokenKind]) {
        while self.token.kind != TokenKind::Eof {
            if to.contains(&self.token.kind) {
                if self.token.pos == self.sync_pos && self.sync_count < 10 {
                    self.sync_count += 1;
                    return;
                }
                if self.token.pos > self.sync_pos {
                    self.sync_pos = self.token.pos;
                    self.sync_count = 0;
                    return;
                }
            }
            self.next();
        }
    }

    fn is_block_opener(&self, kind: TokenKind) -> bool {
        use self::TokenKind::*;
        match kind {
            LBrace | Then | Colon | Do | MixedCodeEnd => true,
            _ => false,
        }
    }

    // _________________________________________________________________________
    // Expressions
    //

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        let x = self.parse_binary_expr(LOWEST_PREC + 1)?;
        if self.token.kind == TokenKind::Question {
            return self.parse_cond_expr(x);
        }
        Ok(x)
    }

    /// `cond ? a [: b]`; the short form shares `a` between both arms.
    fn parse_cond_expr(&mut self, cond: Expr) -> PResult<Expr> {
        let question = self.token.pos;
        self.next();
        let true_expr = self.parse_expr()?;
        let (colon, false_expr) = if self.token.kind == TokenKind::Colon {
            let colon = self.token.pos;
            self.next();
            (colon, self.parse_expr()?)
        } else {
            (NO_POS, true_expr.clone())
        };
        Ok(Expr::Cond(ast::CondExpr {
            cond: Box::new(cond),
            question,
            true_expr: Box::new(true_expr),
            colon,
            false_expr: Box::new(false_expr),
        }))
    }

    fn parse_binary_expr(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut x = self.parse_unary_expr()?;
        loop {
            let op = self.token.kind;
            let prec = op.precedence();
            if prec < min_prec {
                return Ok(x);
            }
            if op == TokenKind::In && self.in_for_header {
                return Ok(x);
            }
            let op_pos = self.token.pos;
            self.next();

            let y = if op == TokenKind::Or {
                self.pipes += 1;
                let y = self.parse_binary_expr(prec + 1);
                self.pipes -= 1;
                y?
            } else {
                self.parse_binary_expr(prec + 1)?
            };

            x = self.fold_binary(x, y, op, op_pos);

            // A selector right after a pipe stage binds to the whole
            // stage: `x | f(a).b` groups as `(x | f(a)).b`.
            if op == TokenKind::Or
                && self.pipes == 0
                && matches!(
                    self.token.kind,
                    TokenKind::Period | TokenKind::NullishSelector
                )
            {
                x = self.parse_primary_suffix(x)?;
            }
        }
    }

    /// Builds a binary node, rewriting comparisons against `nil` into
    /// the `Null`/`NotNull` unary operators.
    fn fold_binary(&mut self, x: Expr, y: Expr, op: TokenKind, op_pos: Pos) -> Expr {
        if op == TokenKind::Equal || op == TokenKind::NotEqual {
            let rewritten = if op == TokenKind::Equal {
                TokenKind::Null
            } else {
                TokenKind::NotNull
            };
            if let Expr::Nil(_) = y {
                return Expr::Unary(ast::UnaryExpr {
                    token: rewritten,
                    token_pos: op_pos,
                    expr: Box::new(x),
                });
            }
            if let Expr::Nil(_) = x {
                return Expr::Unary(ast::UnaryExpr {
                    token: rewritten,
                    token_pos: op_pos,
                    expr: Box::new(y),
                });
            }
        }
        Expr::Binary(ast::BinaryExpr {
            lhs: Box::new(x),
            rhs: Box::new(y),
            token: op,
            token_pos: op_pos,
        })
    }

    fn parse_unary_expr(&mut self) -> PResult<Expr> {
        use self::TokenKind::*;
        match self.token.kind {
            Add | Sub | Not | Xor => {
                let token = self.token.kind;
                let token_pos = self.token.pos;
                self.next();
                let expr = self.parse_unary_expr()?;
                Ok(Expr::Unary(ast::UnaryExpr {
                    token,
                    token_pos,
                    expr: Box::new(expr),
                }))
            }
            _ => self.parse_primary_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> PResult<Expr> {
        let x = self.parse_operand()?;
        self.parse_primary_suffix(x)
    }

    fn parse_primary_suffix(&mut self, mut x: Expr) -> PResult<Expr> {
        loop {
            match self.token.kind {
                TokenKind::Period => {
                    self.next();
                    let sel = self.parse_selector_ident()?;
                    x = Expr::Selector(ast::SelectorExpr {
                        expr: Box::new(x),
                        sel,
                    });
                }
                TokenKind::NullishSelector => {
                    self.next();
                    let sel = self.parse_selector_ident()?;
                    x = Expr::NullishSelector(ast::NullishSelectorExpr {
                        expr: Box::new(x),
                        sel,
                    });
                }
                TokenKind::LBrack => {
                    x = self.parse_index_or_slice(x)?;
                }
                TokenKind::LParen => {
                    let args = self.parse_call_args()?;
                    x = Expr::Call(ast::CallExpr {
                        func: Box::new(x),
                        args,
                    });
                    // Inside a single pipe stage the call is the stage's
                    // result; a following selector belongs to the pipe.
                    if self.token.kind == TokenKind::Period && self.pipes == 1 {
                        return Ok(x);
                    }
                }
                _ => return Ok(x),
            }
        }
    }

    /// A selector name: an identifier, or any keyword used as a plain
    /// member name (`x.end`, `x.do`).
    fn parse_selector_ident(&mut self) -> PResult<ast::Ident> {
        if self.token.kind == TokenKind::Ident || self.token.kind.is_keyword() {
            let ident = ast::Ident::new(&self.token.literal, self.token.pos);
            self.next();
            return Ok(ident);
        }
        self.error_expected(self.token.pos, "selector")?;
        Ok(ast::Ident::blank(self.token.pos))
    }

    fn parse_index_or_slice(&mut self, x: Expr) -> PResult<Expr> {
        let lbrack = self.token.pos;
        self.next();

        let low = if self.token.kind == TokenKind::Colon {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };

        if self.token.kind == TokenKind::Colon {
            self.next();
            let high = if self.token.kind == TokenKind::RBrack {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            let rbrack = self.expect(TokenKind::RBrack)?;
            return Ok(Expr::Slice(ast::SliceExpr {
                expr: Box::new(x),
                lbrack,
                low,
                high,
                rbrack,
            }));
        }

        let index = match low {
            Some(index) => index,
            None => {
                // Unreachable in practice: a leading `:` takes the slice
                // path above.
                Box::new(Expr::Bad(ast::BadExpr {
                    from: lbrack,
                    to: self.token.pos,
                }))
            }
        };
        let rbrack = self.expect(TokenKind::RBrack)?;
        Ok(Expr::Index(ast::IndexExpr {
            expr: Box::new(x),
            lbrack,
            index,
            rbrack,
        }))
    }

    // _________________________________________________________________________
    // Operands
    //

    fn parse_operand(&mut self) -> PResult<Expr> {
        use self::TokenKind::*;
        let tok = self.token.clone();
        match tok.kind {
            Ident => {
                self.next();
                Ok(Expr::Ident(ast::Ident::new(&tok.literal, tok.pos)))
            }
            Int => {
                self.next();
                let value = match int_value(&tok.literal) {
                    Some(v) => v,
                    None => {
                        self.error(tok.pos, "invalid integer literal")?;
                        0
                    }
                };
                Ok(Expr::Int(ast::IntLit {
                    value,
                    literal: tok.literal,
                    value_pos: tok.pos,
                }))
            }
            Uint => {
                self.next();
                let value = match uint_value(&tok.literal) {
                    Some(v) => v,
                    None => {
                        self.error(tok.pos, "invalid uint literal")?;
                        0
                    }
                };
                Ok(Expr::Uint(ast::UintLit {
                    value,
                    literal: tok.literal,
                    value_pos: tok.pos,
                }))
            }
            Float => {
                self.next();
                let value = match float_value(&tok.literal) {
                    Some(v) => v,
                    None => {
                        self.error(tok.pos, "invalid float literal")?;
                        0.0
                    }
                };
                Ok(Expr::Float(ast::FloatLit {
                    value,
                    literal: tok.literal,
                    value_pos: tok.pos,
                }))
            }
            Decimal => {
                self.next();
                Ok(Expr::Decimal(ast::DecimalLit {
                    literal: tok.literal,
                    value_pos: tok.pos,
                }))
            }
            Char => {
                self.next();
                let value = match unquote_char(&tok.literal) {
                    Some(v) => v,
                    None => {
                        self.error(tok.pos, "invalid char literal")?;
                        '\u{fffd}'
                    }
                };
                Ok(Expr::Char(ast::CharLit {
                    value,
                    literal: tok.literal,
                    value_pos: tok.pos,
                }))
            }
            String => {
                self.next();
                let value = match unquote_string(&tok.literal) {
                    Some(v) => v,
                    None => {
                        self.error(tok.pos, "invalid string literal")?;
                        std::string::String::new()
                    }
                };
                Ok(Expr::String(ast::StringLit {
                    value,
                    literal: tok.literal,
                    value_pos: tok.pos,
                }))
            }
            RawString => {
                self.next();
                Ok(Expr::RawString(ast::RawStringLit {
                    literal: tok.literal,
                    value_pos: tok.pos,
                }))
            }
            RawHeredoc => {
                self.next();
                Ok(Expr::RawHeredoc(ast::RawHeredocLit {
                    literal: tok.literal,
                    value_pos: tok.pos,
                }))
            }
            True | False => {
                self.next();
                Ok(Expr::Bool(ast::BoolLit {
                    value: tok.kind == True,
                    value_pos: tok.pos,
                }))
            }
            Yes | No => {
                self.next();
                Ok(Expr::Flag(ast::FlagLit {
                    value: tok.kind == Yes,
                    value_pos: tok.pos,
                }))
            }
            Nil => {
                self.next();
                Ok(Expr::Nil(ast::NilLit { token_pos: tok.pos }))
            }
            StdIn => {
                self.next();
                Ok(Expr::StdIn(ast::StdInLit { token_pos: tok.pos }))
            }
            StdOut => {
                self.next();
                Ok(Expr::StdOut(ast::StdOutLit { token_pos: tok.pos }))
            }
            StdErr => {
                self.next();
                Ok(Expr::StdErr(ast::StdErrLit { token_pos: tok.pos }))
            }
            DotName => {
                self.next();
                Ok(Expr::DotName(ast::DotNameLit { token_pos: tok.pos }))
            }
            DotFile => {
                self.next();
                Ok(Expr::DotFile(ast::DotFileLit { token_pos: tok.pos }))
            }
            IsModule => {
                self.next();
                Ok(Expr::IsModule(ast::IsModuleLit { token_pos: tok.pos }))
            }
            Callee => {
                self.next();
                Ok(Expr::Callee(ast::CalleeLit { token_pos: tok.pos }))
            }
            Args => {
                self.next();
                Ok(Expr::CalleeArgs(ast::ArgsLit { token_pos: tok.pos }))
            }
            NamedArgs => {
                self.next();
                Ok(Expr::CalleeNamedArgs(ast::NamedArgsLit {
                    token_pos: tok.pos,
                }))
            }
            Template => self.parse_template_lit(),
            Import => self.parse_import_expr(),
            LParen => self.parse_paren_operand(),
            LBrack => self.parse_array_operand(),
            LBrace => self.parse_dict_lit(),
            Func => self.parse_func_lit(),
            Throw => {
                self.next();
                let expr = self.parse_expr()?;
                Ok(Expr::Throw(ast::ThrowExpr {
                    throw_pos: tok.pos,
                    expr: Box::new(expr),
                }))
            }
            Return => {
                self.next();
                let result = if self.at_expr_end() {
                    None
                } else {
                    Some(Box::new(self.parse_expr()?))
                };
                Ok(Expr::Return(ast::ReturnExpr {
                    return_pos: tok.pos,
                    result,
                }))
            }
            Begin => {
                let block = self.parse_block_stmt(&[])?;
                Ok(Expr::Block(ast::BlockExpr { block }))
            }
            _ => {
                self.error_expected(tok.pos, "operand")?;
                // Leave the offending token in place; statement-level
                // recovery decides how far to skip.
                Ok(Expr::Bad(ast::BadExpr {
                    from: tok.pos,
                    to: tok.pos,
                }))
            }
        }
    }

    fn at_expr_end(&self) -> bool {
        use self::TokenKind::*;
        match self.token.kind {
            Semicolon | RParen | RBrace | RBrack | Comma | Colon | End | Else | Catch
            | Finally | Eof | MixedCodeEnd | MixedValueEnd => true,
            _ => false,
        }
    }

    fn parse_template_lit(&mut self) -> PResult<Expr> {
        let dollar = self.token.pos;
        self.next();
        match self.token.kind {
            TokenKind::String | TokenKind::RawString | TokenKind::RawHeredoc => {
                let literal = self.parse_operand()?;
                Ok(Expr::Template(ast::TemplateLit {
                    dollar,
                    literal: Box::new(literal),
                }))
            }
            _ => {
                self.error_expected(self.token.pos, "string literal after '$'")?;
                Ok(Expr::Bad(ast::BadExpr {
                    from: dollar,
                    to: self.token.pos,
                }))
            }
        }
    }

    fn parse_import_expr(&mut self) -> PResult<Expr> {
        let token_pos = self.token.pos;
        self.next();
        self.expect(TokenKind::LParen)?;
        let module_name = if self.token.kind == TokenKind::String {
            let name = unquote_string(&self.token.literal).unwrap_or_default();
            self.next();
            name
        } else {
            self.error_expected(self.token.pos, "module name string")?;
            std::string::String::new()
        };
        let rparen = self.expect(TokenKind::RParen)?;
        Ok(Expr::Import(ast::ImportExpr {
            module_name,
            token_pos,
            rparen,
        }))
    }

    // _________________________________________________________________________
    // Paren / call / lambda unifier
    //

    /// Parses any `( ... )` group: a parenthesised expression, a tuple,
    /// call arguments, function parameters or a lambda prelude all share
    /// this routine. An explicit `;` switches collection from the
    /// positional to the named section; newline semicolons are plain
    /// separators inside the parens.
    fn parse_paren_list(&mut self) -> PResult<ParenList> {
        let lparen = self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        let mut named = Vec::new();
        let mut semi_pos = NO_POS;

        while self.token.kind != TokenKind::RParen && self.token.kind != TokenKind::Eof {
            let before = self.token.pos;
            match self.token.kind {
                TokenKind::Semicolon if self.token.is_inserted_semi() => self.next(),
                TokenKind::Semicolon => {
                    if semi_pos.is_valid() {
                        self.error(self.token.pos, "multiple ';' separators in argument list")?;
                    } else {
                        semi_pos = self.token.pos;
                    }
                    self.next();
                }
                TokenKind::Comma => {
                    self.error(self.token.pos, "missing argument")?;
                    self.next();
                }
                _ => {
                    let element = self.parse_paren_element()?;
                    if semi_pos.is_valid() {
                        named.push(element);
                    } else {
                        args.push(element);
                    }
                    match self.token.kind {
                        TokenKind::Comma => self.next(),
                        TokenKind::RParen | TokenKind::Semicolon | TokenKind::Eof => {}
                        _ => {
                            let found = self.token.describe();
                            self.error(
                                self.token.pos,
                                &format!("missing ',' before {}", found),
                            )?;
                            // Pretend the comma was there and resume.
                        }
                    }
                }
            }
            if self.token.pos == before && self.token.kind != TokenKind::RParen {
                // Whatever it is, it does not belong here.
                self.next();
            }
        }

        let rparen = self.expect(TokenKind::RParen)?;
        Ok(ParenList {
            lparen,
            args,
            named,
            semi_pos,
            rparen,
        })
    }

    /// One element of a paren group: `*expr`, `**expr`, `ident: types`,
    /// `key=value`, or a plain expression.
    fn parse_paren_element(&mut self) -> PResult<Expr> {
        if self.token.kind == TokenKind::Mul {
            let token_pos = self.token.pos;
            self.next();
            if self.token.kind == TokenKind::Mul {
                self.next();
                let value = self.parse_paren_value()?;
                return Ok(Expr::NamedArgVar(ast::NamedArgVarLit {
                    token_pos,
                    value: Box::new(value),
                }));
            }
            let value = self.parse_paren_value()?;
            return Ok(Expr::ArgVar(ast::ArgVarLit {
                token_pos,
                value: Box::new(value),
            }));
        }
        self.parse_paren_value()
    }

    fn parse_paren_value(&mut self) -> PResult<Expr> {
        let x = self.parse_expr()?;

        // `ident : T1 | T2 ...` forms a typed identifier.
        if self.token.kind == TokenKind::Colon {
            return match x {
                Expr::Ident(ident) => {
                    self.next();
                    let mut types = vec![self.parse_ident()?];
                    while self.token.kind == TokenKind::Or {
                        self.next();
                        types.push(self.parse_ident()?);
                    }
                    let typed = ast::TypedIdent { ident, types };
                    if self.token.kind == TokenKind::Assign {
                        self.next();
                        let value = self.parse_expr()?;
                        return Ok(Expr::KeyValue(ast::KeyValueLit {
                            key: Box::new(Expr::TypedIdent(typed)),
                            value: Some(Box::new(value)),
                        }));
                    }
                    Ok(Expr::TypedIdent(typed))
                }
                x => {
                    self.error_expected(self.token.pos, "')'")?;
                    Ok(x)
                }
            };
        }

        // `key = value` forms a key-value pair.
        if self.token.kind == TokenKind::Assign {
            self.next();
            let value = self.parse_expr()?;
            return Ok(Expr::KeyValue(ast::KeyValueLit {
                key: Box::new(x),
                value: Some(Box::new(value)),
            }));
        }

        Ok(x)
    }

    fn parse_call_args(&mut self) -> PResult<ast::CallArgs> {
        let list = self.parse_paren_list()?;
        self.call_args_of(list)
    }

    /// Reinterprets a paren group as call arguments, validating section
    /// and variadic ordering.
    fn call_args_of(&mut self, list: ParenList) -> PResult<ast::CallArgs> {
        let mut args = ast::CallExprArgs::default();
        let mut named = ast::CallExprNamedArgs::default();

        for element in list.args {
            match element {
                Expr::ArgVar(v) => {
                    if args.var.is_some() {
                        self.error(v.pos(), "multiple variadic arguments")?;
                    } else if !named.is_empty() {
                        self.error(v.pos(), "variadic argument after named arguments")?;
                    } else {
                        args.var = Some(v);
                    }
                }
                Expr::NamedArgVar(v) => {
                    if named.var.is_some() {
                        self.error(v.pos(), "multiple variadic named arguments")?;
                    } else {
                        named.var = Some(v);
                    }
                }
                Expr::KeyValue(kv) => {
                    named.names.push(*kv.key);
                    named.values.push(kv.value.map(|v| *v));
                }
                element => {
                    if args.var.is_some() {
                        self.error(element.pos(), "argument after variadic argument")?;
                    } else if !named.is_empty() {
                        self.error(element.pos(), "positional argument after named arguments")?;
                    }
                    args.values.push(element);
                }
            }
        }

        for element in list.named {
            match element {
                Expr::KeyValue(kv) => {
                    named.names.push(*kv.key);
                    named.values.push(kv.value.map(|v| *v));
                }
                Expr::NamedArgVar(v) => {
                    if named.var.is_some() {
                        self.error(v.pos(), "multiple variadic named arguments")?;
                    } else {
                        named.var = Some(v);
                    }
                }
                Expr::ArgVar(v) => {
                    self.error(v.pos(), "variadic argument must precede ';'")?;
                }
                element @ Expr::Ident(_) | element @ Expr::String(_) => {
                    // A bare name is a flag argument.
                    named.names.push(element);
                    named.values.push(None);
                }
                element => {
                    self.error(element.pos(), "expected named argument")?;
                }
            }
        }

        Ok(ast::CallArgs {
            lparen: list.lparen,
            args,
            named,
            rparen: list.rparen,
        })
    }

    /// Reinterprets a paren group as function parameters.
    fn func_params_of(&mut self, list: ParenList) -> PResult<ast::FuncParams> {
        let mut args = ast::ArgsParams::default();
        let mut named = ast::NamedParams::default();

        for element in list.args {
            match element {
                Expr::ArgVar(v) => {
                    let pos = v.pos();
                    match self.to_typed_ident(*v.value) {
                        Some(t) => {
                            if args.var.is_some() {
                                self.error(pos, "multiple variadic parameters")?;
                            } else {
                                args.var = Some(t);
                            }
                        }
                        None => self.error(pos, "expected parameter name")?,
                    }
                }
                Expr::NamedArgVar(v) => {
                    let pos = v.pos();
                    match self.to_typed_ident(*v.value) {
                        Some(t) => {
                            if named.var.is_some() {
                                self.error(pos, "multiple variadic named parameters")?;
                            } else {
                                named.var = Some(t);
                            }
                        }
                        None => self.error(pos, "expected parameter name")?,
                    }
                }
                Expr::KeyValue(kv) => {
                    let pos = kv.pos();
                    match self.to_typed_ident(*kv.key) {
                        Some(t) => {
                            named.names.push(t);
                            named.values.push(kv.value.map(|v| *v));
                        }
                        None => self.error(pos, "expected parameter name")?,
                    }
                }
                element => {
                    let pos = element.pos();
                    match self.to_typed_ident(element) {
                        Some(t) => {
                            if args.var.is_some() {
                                self.error(pos, "parameter after variadic parameter")?;
                            } else if !named.names.is_empty() {
                                self.error(pos, "positional parameter after named parameters")?;
                            } else {
                                args.values.push(t);
                            }
                        }
                        None => self.error(pos, "expected parameter name")?,
                    }
                }
            }
        }

        for element in list.named {
            match element {
                Expr::KeyValue(kv) => {
                    let pos = kv.pos();
                    match self.to_typed_ident(*kv.key) {
                        Some(t) => {
                            named.names.push(t);
                            named.values.push(kv.value.map(|v| *v));
                        }
                        None => self.error(pos, "expected parameter name")?,
                    }
                }
                Expr::NamedArgVar(v) => {
                    let pos = v.pos();
                    match self.to_typed_ident(*v.value) {
                        Some(t) => {
                            if named.var.is_some() {
                                self.error(pos, "multiple variadic named parameters")?;
                            } else {
                                named.var = Some(t);
                            }
                        }
                        None => self.error(pos, "expected parameter name")?,
                    }
                }
                element => {
                    let pos = element.pos();
                    match self.to_typed_ident(element) {
                        // A named parameter without a default is a
                        // required named parameter.
                        Some(t) => {
                            named.names.push(t);
                            named.values.push(None);
                        }
                        None => self.error(pos, "expected parameter name")?,
                    }
                }
            }
        }

        Ok(ast::FuncParams {
            lparen: list.lparen,
            args,
            named,
            rparen: list.rparen,
        })
    }

    fn to_typed_ident(&self, expr: Expr) -> Option<ast::TypedIdent> {
        match expr {
            Expr::Ident(ident) => Some(ast::TypedIdent::untyped(ident)),
            Expr::TypedIdent(t) => Some(t),
            _ => None,
        }
    }

    /// `(` in operand position: a lambda prelude, or a (multi-)paren
    /// expression.
    fn parse_paren_operand(&mut self) -> PResult<Expr> {
        let list = self.parse_paren_list()?;

        if self.token.kind == TokenKind::Lambda {
            let params = self.func_params_of(list)?;
            self.next();
            let typ = ast::FuncType {
                token: TokenKind::Func,
                func_pos: params.lparen,
                ident: None,
                params,
            };
            let body = self.parse_closure_body()?;
            return Ok(Expr::Closure(ast::ClosureLit {
                typ,
                body: Box::new(body),
            }));
        }

        if list.semi_pos.is_valid() || !list.named.is_empty() {
            self.error(
                list.semi_pos,
                "';' is not allowed in a parenthesized expression",
            )?;
        }

        let ParenList {
            lparen,
            mut args,
            rparen,
            ..
        } = list;
        match args.len() {
            0 => {
                self.error(lparen, "expected expression within parentheses")?;
                Ok(Expr::Bad(ast::BadExpr {
                    from: lparen,
                    to: rparen + 1,
                }))
            }
            1 => Ok(Expr::Paren(ast::ParenExpr {
                lparen,
                expr: Box::new(args.remove(0)),
                rparen,
            })),
            _ => Ok(Expr::MultiParen(ast::MultiParenExpr {
                lparen,
                exprs: args,
                rparen,
            })),
        }
    }

    fn parse_closure_body(&mut self) -> PResult<Expr> {
        match self.token.kind {
            TokenKind::LBrace => {
                let block = self.parse_block_stmt(&[])?;
                Ok(Expr::Block(ast::BlockExpr { block }))
            }
            TokenKind::Do | TokenKind::Then | TokenKind::Colon => {
                let block = self.parse_block_stmt(&[])?;
                Ok(Expr::Stmts(ast::StmtsExpr { stmts: block.stmts }))
            }
            _ => self.parse_expr(),
        }
    }

    // _________________________________________________________________________
    // Composite literal operands
    //

    /// `[` in operand position: an array literal or an ordered
    /// key-value list.
    fn parse_array_operand(&mut self) -> PResult<Expr> {
        let lbrack = self.token.pos;
        self.next();
        self.skip_list_newlines();

        if self.token.kind == TokenKind::RBrack {
            let rbrack = self.token.pos;
            self.next();
            return Ok(Expr::Array(ast::ArrayLit {
                lbrack,
                elements: Vec::new(),
                rbrack,
            }));
        }

        let first = self.parse_expr()?;
        if self.token.kind == TokenKind::Assign {
            return self.parse_key_value_array(lbrack, first);
        }

        let mut elements = vec![first];
        loop {
            self.skip_list_newlines();
            match self.token.kind {
                TokenKind::RBrack | TokenKind::Eof => break,
                TokenKind::Comma => {
                    self.next();
                    self.skip_list_newlines();
                    if self.token.kind == TokenKind::RBrack {
                        break;
                    }
                    elements.push(self.parse_expr()?);
                }
                _ => {
                    let found = self.token.describe();
                    self.error(self.token.pos, &format!("missing ',' before {}", found))?;
                    let before = self.token.pos;
                    elements.push(self.parse_expr()?);
                    if self.token.pos == before {
                        self.next();
                    }
                }
            }
        }
        let rbrack = self.expect(TokenKind::RBrack)?;
        Ok(Expr::Array(ast::ArrayLit {
            lbrack,
            elements,
            rbrack,
        }))
    }

    /// `[key = value, ...]` after the first `=` was seen.
    fn parse_key_value_array(&mut self, lbrack: Pos, first_key: Expr) -> PResult<Expr> {
        self.next(); // '='
        let value = self.parse_expr()?;
        let mut elements = vec![ast::KeyValueLit {
            key: Box::new(first_key),
            value: Some(Box::new(value)),
        }];

        while self.token.kind == TokenKind::Comma {
            self.next();
            self.skip_list_newlines();
            if self.token.kind == TokenKind::RBrack {
                break;
            }
            let key = self.parse_expr()?;
            let value = if self.token.kind == TokenKind::Assign {
                self.next();
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            elements.push(ast::KeyValueLit {
                key: Box::new(key),
                value,
            });
        }

        let rbrack = self.expect(TokenKind::RBrack)?;
        Ok(Expr::KeyValueArray(ast::KeyValueArrayLit {
            lbrack,
            elements,
            rbrack,
        }))
    }

    fn parse_dict_lit(&mut self) -> PResult<Expr> {
        let lbrace = self.token.pos;
        self.next();
        let mut elements = Vec::new();

        while self.token.kind != TokenKind::RBrace && self.token.kind != TokenKind::Eof {
            let before = self.token.pos;
            match self.token.kind {
                TokenKind::Semicolon if self.token.is_inserted_semi() => {
                    self.next();
                    continue;
                }
                TokenKind::Comma => {
                    self.next();
                    continue;
                }
                _ => {}
            }

            let (key, key_pos) = match self.token.kind {
                TokenKind::Ident => (self.token.literal.clone(), self.token.pos),
                TokenKind::String => {
                    let key = unquote_string(&self.token.literal).unwrap_or_default();
                    (key, self.token.pos)
                }
                _ => {
                    self.error_expected(self.token.pos, "dict key")?;
                    self.next();
                    continue;
                }
            };
            self.next();
            let colon = self.expect(TokenKind::Colon)?;
            let value = self.parse_expr()?;
            elements.push(ast::MapElementLit {
                key,
                key_pos,
                colon,
                value,
            });

            match self.token.kind {
                TokenKind::Comma => self.next(),
                TokenKind::RBrace | TokenKind::Eof => {}
                TokenKind::Semicolon if self.token.is_inserted_semi() => self.next(),
                _ => {
                    let found = self.token.describe();
                    self.error(self.token.pos, &format!("missing ',' before {}", found))?;
                    if self.token.pos == before {
                        self.next();
                    }
                }
            }
        }

        let rbrace = self.expect(TokenKind::RBrace)?;
        Ok(Expr::Dict(ast::DictLit {
            lbrace,
            elements,
            rbrace,
        }))
    }

    fn skip_list_newlines(&mut self) {
        while self.token.kind == TokenKind::Semicolon && self.token.is_inserted_semi() {
            self.next();
        }
    }

    /// `func [name] (params)` followed by a block body (`FuncLit`) or a
    /// `=>` body (`ClosureLit`).
    fn parse_func_lit(&mut self) -> PResult<Expr> {
        let func_pos = self.expect(TokenKind::Func)?;
        let ident = if self.token.kind == TokenKind::Ident {
            Some(self.parse_ident()?)
        } else {
            None
        };
        let list = self.parse_paren_list()?;
        let params = self.func_params_of(list)?;
        let typ = ast::FuncType {
            token: TokenKind::Func,
            func_pos,
            ident,
            params,
        };

        if self.token.kind == TokenKind::Lambda {
            self.next();
            let body = self.parse_closure_body()?;
            return Ok(Expr::Closure(ast::ClosureLit {
                typ,
                body: Box::new(body),
            }));
        }

        let body = self.parse_block_stmt(&[])?;
        Ok(Expr::Func(ast::FuncLit { typ, body }))
    }

    fn parse_ident(&mut self) -> PResult<ast::Ident> {
        if self.token.kind == TokenKind::Ident {
            let ident = ast::Ident::new(&self.token.literal, self.token.pos);
            self.next();
            return Ok(ident);
        }
        self.error_expected(self.token.pos, "identifier")?;
        Ok(ast::Ident::blank(self.token.pos))
    }

    // _________________________________________________________________________
    // Statements
    //

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        use self::TokenKind::*;
        match self.token.kind {
            ConfigStart => self.parse_config_stmt(),
            MixedText => {
                let stmt = ast::MixedTextStmt {
                    literal: self.token.literal.clone(),
                    literal_pos: self.token.pos,
                    flags: trim_flags(self.token.data.trim_left, self.token.data.trim_right),
                };
                self.next();
                Ok(Stmt::MixedText(stmt))
            }
            MixedCodeStart => {
                let stmt = ast::CodeBeginStmt {
                    literal_pos: self.token.pos,
                    literal: self.token.literal.clone(),
                    remove_space: self.token.data.trim_left,
                };
                self.next();
                Ok(Stmt::CodeBegin(stmt))
            }
            MixedCodeEnd => {
                let stmt = ast::CodeEndStmt {
                    literal_pos: self.token.pos,
                    literal: self.token.literal.clone(),
                    remove_space: self.token.data.trim_right,
                };
                self.next();
                Ok(Stmt::CodeEnd(stmt))
            }
            MixedValueStart => self.parse_mixed_value_stmt(),
            Param | Global | Var | Const => {
                let decl = self.parse_decl()?;
                self.expect_semi()?;
                Ok(Stmt::Decl(ast::DeclStmt { decl }))
            }
            Return => self.parse_return_stmt(),
            If => self.parse_if_stmt(),
            For => self.parse_for_stmt(),
            Try => self.parse_try_stmt(),
            Throw => {
                let throw_pos = self.token.pos;
                self.next();
                let expr = self.parse_expr()?;
                self.expect_semi()?;
                Ok(Stmt::Throw(ast::ThrowStmt { throw_pos, expr }))
            }
            Break | Continue => {
                let token = self.token.kind;
                let token_pos = self.token.pos;
                self.next();
                let label = if self.token.kind == Ident {
                    Some(self.parse_ident()?)
                } else {
                    None
                };
                self.expect_semi()?;
                Ok(Stmt::Branch(ast::BranchStmt {
                    token,
                    token_pos,
                    label,
                }))
            }
            Begin => {
                let block = self.parse_block_stmt(&[])?;
                Ok(Stmt::Block(block))
            }
            Semicolon => {
                let stmt = ast::EmptyStmt {
                    semicolon: self.token.pos,
                    implicit: self.token.is_inserted_semi(),
                };
                self.next();
                Ok(Stmt::Empty(stmt))
            }
            RBrace => {
                // An implicit empty statement; the closing brace belongs
                // to the enclosing block.
                Ok(Stmt::Empty(ast::EmptyStmt {
                    semicolon: self.token.pos,
                    implicit: true,
                }))
            }
            _ => {
                let stmt = self.parse_simple_stmt()?;
                self.expect_semi()?;
                Ok(stmt)
            }
        }
    }

    /// An expression list and what follows it: assignment, for-in
    /// header, compound assignment, `++`/`--`, or a bare expression.
    fn parse_simple_stmt(&mut self) -> PResult<Stmt> {
        use self::TokenKind::*;

        let first = self.parse_expr()?;
        let mut exprs = vec![first];
        while self.token.kind == Comma {
            self.next();
            exprs.push(self.parse_expr()?);
        }

        match self.token.kind {
            Assign | Define => {
                let token = self.token.kind;
                let token_pos = self.token.pos;
                self.next();
                let mut rhs = vec![self.parse_expr()?];
                while self.token.kind == Comma {
                    self.next();
                    rhs.push(self.parse_expr()?);
                }
                Ok(Stmt::Assign(ast::AssignStmt {
                    lhs: exprs,
                    rhs,
                    token,
                    token_pos,
                }))
            }
            In if self.in_for_header => {
                self.next();
                self.in_for_header = false;
                let (key, value) = self.for_in_idents(exprs)?;
                let iterable = self.parse_expr()?;
                Ok(Stmt::ForIn(ast::ForInStmt {
                    for_pos: NO_POS,
                    key,
                    value,
                    iterable,
                    body: empty_block(),
                    else_body: None,
                }))
            }
            kind if kind.is_compound_assign() => {
                let token = kind;
                let token_pos = self.token.pos;
                if exprs.len() != 1 {
                    self.error(
                        exprs[1].pos(),
                        &format!("1 expression expected on left side of '{}'", token),
                    )?;
                }
                self.next();
                let rhs = self.parse_expr()?;
                Ok(Stmt::Assign(ast::AssignStmt {
                    lhs: vec![exprs.swap_remove(0)],
                    rhs: vec![rhs],
                    token,
                    token_pos,
                }))
            }
            Inc | Dec => {
                let token = self.token.kind;
                let token_pos = self.token.pos;
                if exprs.len() != 1 {
                    self.error(exprs[1].pos(), "1 expression expected")?;
                }
                self.next();
                Ok(Stmt::IncDec(ast::IncDecStmt {
                    expr: exprs.swap_remove(0),
                    token,
                    token_pos,
                }))
            }
            _ => {
                if exprs.len() > 1 {
                    self.error(exprs[1].pos(), "1 expression expected")?;
                }
                Ok(Stmt::Expr(ast::ExprStmt {
                    expr: exprs.swap_remove(0),
                }))
            }
        }
    }

    /// Validates the variable list of a for-in header. Anything that is
    /// not an identifier degrades to `_` with a diagnostic; a single
    /// identifier binds the key.
    fn for_in_idents(&mut self, exprs: Vec<Expr>) -> PResult<(ast::Ident, ast::Ident)> {
        let mut idents = Vec::with_capacity(2);
        if exprs.len() > 2 {
            self.error(exprs[2].pos(), "at most 2 variables allowed in for-in")?;
        }
        for expr in exprs.into_iter().take(2) {
            match expr {
                Expr::Ident(ident) => idents.push(ident),
                other => {
                    self.error(other.pos(), "expected identifier")?;
                    idents.push(ast::Ident::blank(other.pos()));
                }
            }
        }
        let mut iter = idents.into_iter();
        let first = iter.next().unwrap_or_else(|| ast::Ident::blank(NO_POS));
        match iter.next() {
            Some(second) => Ok((first, second)),
            // A single identifier binds the key; the value is blank.
            None => Ok((first, ast::Ident::blank(NO_POS))),
        }
    }

    fn parse_return_stmt(&mut self) -> PResult<Stmt> {
        let return_pos = self.token.pos;
        self.next();

        let result = if self.at_expr_end() {
            None
        } else {
            let mut exprs = vec![self.parse_expr()?];
            while self.token.kind == TokenKind::Comma {
                self.next();
                exprs.push(self.parse_expr()?);
            }
            if exprs.len() == 1 {
                Some(exprs.swap_remove(0))
            } else {
                // Multiple results travel as one array value.
                Some(Expr::Array(ast::ArrayLit {
                    lbrack: NO_POS,
                    elements: exprs,
                    rbrack: NO_POS,
                }))
            }
        };
        self.expect_semi()?;
        Ok(Stmt::Return(ast::ReturnStmt { return_pos, result }))
    }

    fn parse_if_stmt(&mut self) -> PResult<Stmt> {
        let if_pos = self.expect(TokenKind::If)?;
        let mut init = None;

        let cond = if self.is_block_opener(self.token.kind) {
            self.error(self.token.pos, "missing condition in if statement")?;
            Expr::Bad(ast::BadExpr {
                from: self.token.pos,
                to: self.token.pos,
            })
        } else {
            let s1 = self.parse_simple_stmt()?;
            if self.token.kind == TokenKind::Semicolon {
                self.next();
                if self.is_block_opener(self.token.kind) {
                    self.error(self.token.pos, "missing condition in if statement")?;
                    init = Some(Box::new(s1));
                    Expr::Bad(ast::BadExpr {
                        from: self.token.pos,
                        to: self.token.pos,
                    })
                } else {
                    let s2 = self.parse_simple_stmt()?;
                    init = Some(Box::new(s1));
                    self.cond_of(s2)?
                }
            } else {
                self.cond_of(s1)?
            }
        };

        let body = self.parse_block_stmt(&[TokenKind::Else])?;
        let else_stmt = if self.token.kind == TokenKind::Else {
            self.next();
            if self.token.kind == TokenKind::If {
                Some(Box::new(self.parse_if_stmt()?))
            } else {
                Some(Box::new(Stmt::Block(self.parse_else_block()?)))
            }
        } else {
            None
        };

        Ok(Stmt::If(ast::IfStmt {
            if_pos,
            init,
            cond,
            body,
            else_stmt,
        }))
    }

    /// Extracts the condition expression from a header statement.
    fn cond_of(&mut self, stmt: Stmt) -> PResult<Expr> {
        match stmt {
            Stmt::Expr(s) => Ok(s.expr),
            other => {
                let (from, to) = (other.pos(), other.end());
                self.error(from, "expected condition expression")?;
                Ok(Expr::Bad(ast::BadExpr { from, to }))
            }
        }
    }

    fn parse_for_stmt(&mut self) -> PResult<Stmt> {
        let for_pos = self.expect(TokenKind::For)?;

        // `for { ... }` loops forever.
        if self.is_block_opener(self.token.kind) {
            let body = self.parse_block_stmt(&[])?;
            return Ok(Stmt::For(ast::ForStmt {
                for_pos,
                init: None,
                cond: None,
                post: None,
                body,
            }));
        }

        let s1 = if self.token.kind == TokenKind::Semicolon {
            None
        } else {
            self.in_for_header = true;
            let s1 = self.parse_simple_stmt();
            self.in_for_header = false;
            Some(s1?)
        };

        // For-in came back from the header in one piece; attach the
        // body and the optional else block.
        let s1 = match s1 {
            Some(Stmt::ForIn(mut for_in)) => {
                for_in.for_pos = for_pos;
                for_in.body = self.parse_block_stmt(&[TokenKind::Else])?;
                if self.token.kind == TokenKind::Else {
                    self.next();
                    for_in.else_body = Some(self.parse_else_block()?);
                }
                return Ok(Stmt::ForIn(for_in));
            }
            s1 => s1,
        };

        if self.token.kind == TokenKind::Semicolon {
            // C-style header.
            self.next();
            let cond = if self.token.kind == TokenKind::Semicolon {
                None
            } else if self.is_block_opener(self.token.kind) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            if self.token.kind == TokenKind::Semicolon {
                self.next();
            } else if !self.is_block_opener(self.token.kind) {
                self.error_expected(self.token.pos, "';'")?;
            }
            let post = if self.is_block_opener(self.token.kind) {
                None
            } else {
                Some(Box::new(self.parse_simple_stmt()?))
            };
            let body = self.parse_block_stmt(&[])?;
            return Ok(Stmt::For(ast::ForStmt {
                for_pos,
                init: s1.map(Box::new),
                cond,
                post,
                body,
            }));
        }

        // While form: the single header statement is the condition.
        let cond = match s1 {
            Some(stmt) => Some(self.cond_of(stmt)?),
            None => None,
        };
        let body = self.parse_block_stmt(&[])?;
        Ok(Stmt::For(ast::ForStmt {
            for_pos,
            init: None,
            cond,
            post: None,
            body,
        }))
    }

    fn parse_try_stmt(&mut self) -> PResult<Stmt> {
        let try_pos = self.expect(TokenKind::Try)?;
        let body = self.parse_block_stmt(&[TokenKind::Catch, TokenKind::Finally])?;

        let catch = if self.token.kind == TokenKind::Catch {
            let catch_pos = self.token.pos;
            self.next();
            let ident = if self.token.kind == TokenKind::Ident {
                Some(self.parse_ident()?)
            } else {
                None
            };
            let body = self.parse_block_stmt(&[TokenKind::Finally])?;
            Some(ast::CatchStmt {
                catch_pos,
                ident,
                body,
            })
        } else {
            None
        };

        let finally = if self.token.kind == TokenKind::Finally {
            let finally_pos = self.token.pos;
            self.next();
            let body = self.parse_block_stmt(&[])?;
            Some(ast::FinallyStmt { finally_pos, body })
        } else {
            None
        };

        Ok(Stmt::Try(ast::TryStmt {
            try_pos,
            body,
            catch,
            finally,
        }))
    }

    // _________________________________________________________________________
    // Blocks
    //

    /// Parses a block in any of its forms: `{ ... }`, a keyword block
    /// (`then`/`do`/`:`/`begin` ... `end`), or a template block opened
    /// by `%}`. `sentinels` are caller-owned terminators (`else`,
    /// `catch`, ...) that end the block without being consumed.
    fn parse_block_stmt(&mut self, sentinels: &[TokenKind]) -> PResult<ast::BlockStmt> {
        use self::TokenKind::*;
        match self.token.kind {
            LBrace => {
                let lbrace = self.token.pos;
                self.next();
                let stmts = self.parse_stmt_list(&[RBrace])?;
                let rbrace = self.expect(RBrace)?;
                Ok(ast::BlockStmt {
                    lbrace,
                    stmts,
                    rbrace,
                })
            }
            Then | Colon | Do | Begin => {
                let lbrace = self.token.pos;
                self.next();
                let mut stop = vec![End];
                stop.extend_from_slice(sentinels);
                let stmts = self.parse_stmt_list(&stop)?;
                let rbrace = if self.token.kind == End {
                    let pos = self.token.pos;
                    self.next();
                    pos
                } else {
                    NO_POS
                };
                Ok(ast::BlockStmt {
                    lbrace,
                    stmts,
                    rbrace,
                })
            }
            MixedCodeEnd => {
                // `%}` takes the place of `{`; the paired marker is the
                // first statement of the block.
                let lbrace = self.token.pos;
                let marker = Stmt::CodeEnd(ast::CodeEndStmt {
                    literal_pos: self.token.pos,
                    literal: self.token.literal.clone(),
                    remove_space: self.token.data.trim_right,
                });
                self.next();
                let mut stop = vec![End];
                stop.extend_from_slice(sentinels);
                let mut stmts = vec![marker];
                stmts.extend(self.parse_stmt_list(&stop)?);
                let rbrace = if self.token.kind == End {
                    let pos = self.token.pos;
                    self.next();
                    pos
                } else {
                    NO_POS
                };
                Ok(ast::BlockStmt {
                    lbrace,
                    stmts,
                    rbrace,
                })
            }
            _ => {
                self.error_expected(self.token.pos, "'{'")?;
                Ok(ast::BlockStmt {
                    lbrace: NO_POS,
                    stmts: Vec::new(),
                    rbrace: NO_POS,
                })
            }
        }
    }

    /// The body of an `else` branch. Brace and keyword openers take the
    /// regular block path; in the bare keyword form (`else stmts end`)
    /// the statements run up to the closing `end`.
    fn parse_else_block(&mut self) -> PResult<ast::BlockStmt> {
        if self.is_block_opener(self.token.kind) {
            return self.parse_block_stmt(&[]);
        }
        let lbrace = self.token.pos;
        let stmts = self.parse_stmt_list(&[TokenKind::End])?;
        let rbrace = if self.token.kind == TokenKind::End {
            let pos = self.token.pos;
            self.next();
            pos
        } else {
            NO_POS
        };
        Ok(ast::BlockStmt {
            lbrace,
            stmts,
            rbrace,
        })
    }

    fn parse_stmt_list(&mut self, stop: &[TokenKind]) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let kind = self.token.kind;
            if kind == TokenKind::Eof || stop.contains(&kind) {
                return Ok(stmts);
            }
            match kind {
                TokenKind::Semicolon => self.next(),
                TokenKind::RBrace
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Catch
                | TokenKind::Finally => {
                    // Not a terminator of this block; skip with a
                    // diagnostic rather than loop.
                    self.error_expected(self.token.pos, "statement")?;
                    self.next();
                }
                _ => {
                    let stmt = self.parse_stmt()?;
                    if !stmt.is_empty_stmt() {
                        stmts.push(stmt);
                    }
                }
            }
        }
    }

    // _________________________________________________________________________
    // Template statements and the config preamble
    //

    fn parse_mixed_value_stmt(&mut self) -> PResult<Stmt> {
        let start = self.token.pos;
        self.next();

        let expr = if self.token.kind == TokenKind::MixedValueEnd {
            self.error(start, "missing expression in template value")?;
            Expr::Bad(ast::BadExpr {
                from: start,
                to: self.token.pos,
            })
        } else {
            self.parse_expr()?
        };

        let end_pos = if self.token.kind == TokenKind::MixedValueEnd {
            let end = self.token.end();
            self.next();
            end
        } else {
            self.error_expected(self.token.pos, &format!("'{}'", TokenKind::MixedValueEnd))?;
            self.advance(STMT_START);
            self.prev_token.end()
        };

        if self.mode.contains(ParseMode::PARSE_MIXED_EXPR_AS_VALUE) {
            Ok(Stmt::MixedValue(ast::MixedValueStmt {
                start,
                expr,
                end_pos,
            }))
        } else {
            Ok(Stmt::ExprToText(ast::ExprToTextStmt {
                start,
                expr,
                end_pos,
            }))
        }
    }

    /// Parses `# gad: key=value, ...` as a key-value list and applies it
    /// to the scanner before the token after `ConfigEnd` is fetched.
    fn parse_config_stmt(&mut self) -> PResult<Stmt> {
        let config_pos = self.token.pos;
        self.next();

        let mut options = Vec::new();
        let mut parsed = ast::ConfigOptions::default();

        while self.token.kind != TokenKind::ConfigEnd && self.token.kind != TokenKind::Eof {
            if self.token.kind == TokenKind::Comma {
                self.next();
                continue;
            }
            let before = self.token.pos;
            let key = self.parse_ident()?;
            let value = if self.token.kind == TokenKind::Assign {
                self.next();
                Some(self.parse_expr()?)
            } else {
                None
            };

            self.apply_config_option(&key, &value, &mut parsed)?;
            options.push(ast::KeyValueLit {
                key: Box::new(Expr::Ident(key)),
                value: value.map(Box::new),
            });

            if self.token.pos == before {
                self.next();
            }
        }

        // Mutate the scanner while `ConfigEnd` is still the lookahead;
        // the next fetched token must already see the new mode.
        if parsed.mixed {
            self.mode |= ParseMode::PARSE_MIXED;
            self.scanner.set_mode(self.scanner.mode() | ScanMode::MIXED);
        }
        if parsed.mixed_start.is_some() || parsed.mixed_end.is_some() {
            let mut delims = self.scanner.code_delims().clone();
            if let Some(start) = &parsed.mixed_start {
                delims.start = start.clone();
            }
            if let Some(end) = &parsed.mixed_end {
                delims.end = end.clone();
            }
            self.scanner.set_code_delims(delims);
        }

        let end_pos = if self.token.kind == TokenKind::ConfigEnd {
            let pos = self.token.pos;
            self.next();
            pos
        } else {
            self.token.pos
        };

        Ok(Stmt::Config(ast::ConfigStmt {
            config_pos,
            options,
            end_pos,
            parsed,
        }))
    }

    fn apply_config_option(
        &mut self,
        key: &ast::Ident,
        value: &Option<Expr>,
        parsed: &mut ast::ConfigOptions,
    ) -> PResult<()> {
        match key.name.as_str() {
            "mixed" => parsed.mixed = config_truth(value),
            "writer" => parsed.writer = config_truth(value),
            "mixedStart" => match config_string(value) {
                Some(s) if !s.is_empty() => parsed.mixed_start = Some(s),
                _ => self.error(key.pos(), "mixedStart requires a string value")?,
            },
            "mixedEnd" => match config_string(value) {
                Some(s) if !s.is_empty() => parsed.mixed_end = Some(s),
                _ => self.error(key.pos(), "mixedEnd requires a string value")?,
            },
            _ => {
                let msg = format!("unknown config option '{}'", key.name);
                self.error(key.pos(), &msg)?;
            }
        }
        Ok(())
    }

    // _________________________________________________________________________
    // Declarations
    //

    fn parse_decl(&mut self) -> PResult<Decl> {
        let token = self.token.kind;
        let token_pos = self.token.pos;
        self.next();

        let mut lparen = NO_POS;
        let mut rparen = NO_POS;
        let mut specs = Vec::new();

        if self.token.kind == TokenKind::LParen {
            lparen = self.token.pos;
            self.next();
            while self.token.kind != TokenKind::RParen && self.token.kind != TokenKind::Eof {
                if self.token.kind == TokenKind::Comma || self.token.kind == TokenKind::Semicolon
                {
                    self.next();
                    continue;
                }
                let before = self.token.pos;
                specs.push(self.parse_spec(token)?);
                if self.token.pos == before {
                    self.next();
                }
            }
            rparen = self.expect(TokenKind::RParen)?;
        } else {
            specs.push(self.parse_spec(token)?);
        }

        if specs.is_empty() {
            let (from, to) = (token_pos, self.prev_token.end());
            self.error(from, &format!("empty {} declaration", token))?;
            return Ok(Decl::Bad(ast::BadDecl { from, to }));
        }

        Ok(Decl::Gen(ast::GenDecl {
            token,
            token_pos,
            lparen,
            specs,
            rparen,
        }))
    }

    fn parse_spec(&mut self, keyword: TokenKind) -> PResult<Spec> {
        match keyword {
            TokenKind::Param => self.parse_param_spec(),
            TokenKind::Global => self.parse_global_spec(),
            _ => self.parse_value_spec(keyword),
        }
    }

    fn parse_param_spec(&mut self) -> PResult<Spec> {
        let mut variadic = None;
        if self.token.kind == TokenKind::Mul {
            self.next();
            variadic = if self.token.kind == TokenKind::Mul {
                self.next();
                Some(ast::VariadicKind::Named)
            } else {
                Some(ast::VariadicKind::Positional)
            };
        }

        let ident = self.parse_typed_ident()?;

        if self.token.kind == TokenKind::Assign {
            self.next();
            let value = self.parse_expr()?;
            if variadic.is_some() {
                self.error(value.pos(), "variadic parameter cannot have a default value")?;
            }
            return Ok(Spec::NamedParam(ast::NamedParamSpec {
                ident,
                value: Some(value),
            }));
        }

        Ok(Spec::Param(ast::ParamSpec { ident, variadic }))
    }

    fn parse_global_spec(&mut self) -> PResult<Spec> {
        let ident = self.parse_ident()?;
        if self.token.kind == TokenKind::Assign {
            self.error(self.token.pos, "global declaration cannot be initialized")?;
            self.next();
            let _ = self.parse_expr()?;
        }
        Ok(Spec::Value(ast::ValueSpec {
            idents: vec![ident],
            values: vec![None],
        }))
    }

    fn parse_value_spec(&mut self, keyword: TokenKind) -> PResult<Spec> {
        let ident = self.parse_ident()?;
        let mut value = None;

        if self.token.kind == TokenKind::Assign {
            self.next();
            let mut v = self.parse_expr()?;
            // A function value declared through var/const can refer to
            // itself via the declared name; record the declaration
            // keyword (and, for const, the name) on the literal.
            match &mut v {
                Expr::Func(f) => {
                    f.typ.token = keyword;
                    if keyword == TokenKind::Const && f.typ.ident.is_none() {
                        f.typ.ident = Some(ident.clone());
                    }
                }
                Expr::Closure(c) => {
                    c.typ.token = keyword;
                    if keyword == TokenKind::Const && c.typ.ident.is_none() {
                        c.typ.ident = Some(ident.clone());
                    }
                }
                _ => {}
            }
            value = Some(v);
        } else if keyword == TokenKind::Const {
            self.error(ident.end(), "missing initializer in const declaration")?;
        }

        Ok(Spec::Value(ast::ValueSpec {
            idents: vec![ident],
            values: vec![value],
        }))
    }

    fn parse_typed_ident(&mut self) -> PResult<ast::TypedIdent> {
        let ident = self.parse_ident()?;
        let mut types = Vec::new();
        if self.token.kind == TokenKind::Colon {
            self.next();
            types.push(self.parse_ident()?);
            while self.token.kind == TokenKind::Or {
                self.next();
                types.push(self.parse_ident()?);
            }
        }
        Ok(ast::TypedIdent { ident, types })
    }
}

fn empty_block() -> ast::BlockStmt {
    ast::BlockStmt {
        lbrace: NO_POS,
        stmts: Vec::new(),
        rbrace: NO_POS,
    }
}

fn trim_flags(left: bool, right: bool) -> ast::TrimFlags {
    let mut flags = ast::TrimFlags::default();
    if left {
        flags |= ast::TrimFlags::TRIM_LEFT;
    }
    if right {
        flags |= ast::TrimFlags::TRIM_RIGHT;
    }
    flags
}

fn config_truth(value: &Option<Expr>) -> bool {
    match value {
        None => true,
        Some(Expr::Bool(b)) => b.value,
        Some(Expr::Flag(f)) => f.value,
        Some(_) => true,
    }
}

fn config_string(value: &Option<Expr>) -> Option<String> {
    match value {
        Some(Expr::String(s)) => Some(s.value.clone()),
        Some(Expr::RawString(s)) => Some(s.value()),
        _ => None,
    }
}
