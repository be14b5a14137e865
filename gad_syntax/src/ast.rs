//! The gad abstract syntax tree.
//!
//! Nodes are plain sum types: `Expr`, `Stmt`, `Decl` and `Spec` each carry
//! one struct per concrete node. Every node knows its first (`pos`) and
//! one-past-last (`end`) position and renders itself back to source-shaped
//! text through `fmt::Display`. The tree owns its children by value; there
//! are no cycles and no parent links.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use gad_pos::{Pos, SourceFile, NO_POS};

use crate::parse::token::TokenKind;

/// Positioned node capability: the first position of the node and the
/// position immediately after it.
pub trait Node: fmt::Display {
    fn pos(&self) -> Pos;
    fn end(&self) -> Pos;
}

fn join<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

// _____________________________________________________________________________
// File, comments
//

/// The root of a parsed source unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct File {
    pub input_file: Rc<SourceFile>,
    pub stmts: Vec<Stmt>,
    pub comments: Vec<CommentGroup>,
}

impl Node for File {
    fn pos(&self) -> Pos {
        match self.stmts.first() {
            Some(s) => s.pos(),
            None => self.input_file.base,
        }
    }

    fn end(&self) -> Pos {
        match self.stmts.last() {
            Some(s) => s.end(),
            None => self.input_file.base,
        }
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&join(&self.stmts, "; "))
    }
}

/// A single `//` or `/* */` comment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub slash: Pos,
    pub text: String,
}

impl Node for Comment {
    fn pos(&self) -> Pos {
        self.slash
    }

    fn end(&self) -> Pos {
        self.slash + self.text.len() as u32
    }
}

impl fmt::Display for Comment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A sequence of comments with no blank line between them.
/// The list is never empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommentGroup {
    pub list: Vec<Comment>,
}

impl Node for CommentGroup {
    fn pos(&self) -> Pos {
        self.list[0].pos()
    }

    fn end(&self) -> Pos {
        self.list[self.list.len() - 1].end()
    }
}

impl fmt::Display for CommentGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&join(&self.list, "\n"))
    }
}

// _____________________________________________________________________________
// Identifiers
//

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    pub name_pos: Pos,
}

impl Ident {
    pub fn new(name: &str, name_pos: Pos) -> Ident {
        Ident {
            name: name.to_string(),
            name_pos,
        }
    }

    /// The blank identifier used where a name is required but absent.
    pub fn blank(pos: Pos) -> Ident {
        Ident::new("_", pos)
    }
}

impl Node for Ident {
    fn pos(&self) -> Pos {
        self.name_pos
    }

    fn end(&self) -> Pos {
        self.name_pos + self.name.len() as u32
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An identifier with an optional union-type annotation:
/// `name : T1 | T2`. The types are stored, never resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypedIdent {
    pub ident: Ident,
    pub types: Vec<Ident>,
}

impl TypedIdent {
    pub fn untyped(ident: Ident) -> TypedIdent {
        TypedIdent {
            ident,
            types: Vec::new(),
        }
    }
}

impl Node for TypedIdent {
    fn pos(&self) -> Pos {
        self.ident.pos()
    }

    fn end(&self) -> Pos {
        match self.types.last() {
            Some(t) => t.end(),
            None => self.ident.end(),
        }
    }
}

impl fmt::Display for TypedIdent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.types.is_empty() {
            write!(f, "{}", self.ident)
        } else {
            write!(f, "{}: {}", self.ident, join(&self.types, "|"))
        }
    }
}

// _____________________________________________________________________________
// Literal expressions
//

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntLit {
    pub value: i64,
    pub literal: String,
    pub value_pos: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UintLit {
    pub value: u64,
    pub literal: String,
    pub value_pos: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FloatLit {
    pub value: f64,
    pub literal: String,
    pub value_pos: Pos,
}

/// Decimal literals keep their textual form; numeric interpretation is
/// the evaluator's concern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecimalLit {
    pub literal: String,
    pub value_pos: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharLit {
    pub value: char,
    pub literal: String,
    pub value_pos: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StringLit {
    /// The unescaped value.
    pub value: String,
    /// The literal as written, including quotes.
    pub literal: String,
    pub value_pos: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawStringLit {
    pub literal: String,
    pub value_pos: Pos,
}

impl RawStringLit {
    /// The contents between the backticks, with carriage returns dropped.
    pub fn value(&self) -> String {
        self.literal
            .trim_matches('`')
            .chars()
            .filter(|&c| c != '\r')
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawHeredocLit {
    pub literal: String,
    pub value_pos: Pos,
}

impl RawHeredocLit {
    pub fn value(&self) -> String {
        self.literal
            .trim_matches('`')
            .chars()
            .filter(|&c| c != '\r')
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoolLit {
    pub value: bool,
    pub value_pos: Pos,
}

/// `yes` / `no`: boolean values whose spelling is kept distinct from
/// `true` / `false` so rendering round-trips.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlagLit {
    pub value: bool,
    pub value_pos: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NilLit {
    pub token_pos: Pos,
}

macro_rules! word_lit {
    ($(#[$doc:meta])* $name:ident, $text:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            pub token_pos: Pos,
        }

        impl Node for $name {
            fn pos(&self) -> Pos {
                self.token_pos
            }

            fn end(&self) -> Pos {
                self.token_pos + $text.len() as u32
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($text)
            }
        }
    };
}

word_lit!(/** The standard input stream literal. */ StdInLit, "STDIN");
word_lit!(/** The standard output stream literal. */ StdOutLit, "STDOUT");
word_lit!(/** The standard error stream literal. */ StdErrLit, "STDERR");
word_lit!(/** The current module name literal. */ DotNameLit, ".name");
word_lit!(/** The current file path literal. */ DotFileLit, ".file");
word_lit!(/** Whether the unit runs as a module. */ IsModuleLit, "is_module");
word_lit!(/** The currently executing callable. */ CalleeLit, ".callee");
word_lit!(/** The positional arguments of the current call. */ ArgsLit, ".args");
word_lit!(/** The named arguments of the current call. */ NamedArgsLit, ".namedArgs");

/// `$` followed by a string-family literal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateLit {
    pub dollar: Pos,
    pub literal: Box<Expr>,
}

// _____________________________________________________________________________
// Container literals
//

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArrayLit {
    pub lbrack: Pos,
    pub elements: Vec<Expr>,
    pub rbrack: Pos,
}

/// One `key: value` entry of a dict literal. The key is an identifier or
/// a string literal; its raw text is kept.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapElementLit {
    pub key: String,
    pub key_pos: Pos,
    pub colon: Pos,
    pub value: Expr,
}

impl Node for MapElementLit {
    fn pos(&self) -> Pos {
        self.key_pos
    }

    fn end(&self) -> Pos {
        self.value.end()
    }
}

impl fmt::Display for MapElementLit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DictLit {
    pub lbrace: Pos,
    pub elements: Vec<MapElementLit>,
    pub rbrace: Pos,
}

/// `key = value`, or a bare `key` acting as a presence-only flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyValueLit {
    pub key: Box<Expr>,
    pub value: Option<Box<Expr>>,
}

impl Node for KeyValueLit {
    fn pos(&self) -> Pos {
        self.key.pos()
    }

    fn end(&self) -> Pos {
        match &self.value {
            Some(v) => v.end(),
            None => self.key.end(),
        }
    }
}

impl fmt::Display for KeyValueLit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.key, v),
            None => write!(f, "{}", self.key),
        }
    }
}

/// An ordered `[k=v, ...]` pair list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyValueArrayLit {
    pub lbrack: Pos,
    pub elements: Vec<KeyValueLit>,
    pub rbrack: Pos,
}

/// `*expr`: a variadic positional argument or parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArgVarLit {
    pub token_pos: Pos,
    pub value: Box<Expr>,
}

impl Node for ArgVarLit {
    fn pos(&self) -> Pos {
        self.token_pos
    }

    fn end(&self) -> Pos {
        self.value.end()
    }
}

impl fmt::Display for ArgVarLit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "*{}", self.value)
    }
}

/// `**expr`: a variadic named argument or parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedArgVarLit {
    pub token_pos: Pos,
    pub value: Box<Expr>,
}

impl Node for NamedArgVarLit {
    fn pos(&self) -> Pos {
        self.token_pos
    }

    fn end(&self) -> Pos {
        self.value.end()
    }
}

impl fmt::Display for NamedArgVarLit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "**{}", self.value)
    }
}

// _____________________________________________________________________________
// Call shapes
//

/// Positional section of a call's arguments: fixed values, then at most
/// one `*rest`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallExprArgs {
    pub values: Vec<Expr>,
    pub var: Option<ArgVarLit>,
}

impl CallExprArgs {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.var.is_none()
    }
}

/// Named section of a call's arguments: `name=value` pairs (a missing
/// value marks a flag), then at most one `**rest`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallExprNamedArgs {
    pub names: Vec<Expr>,
    pub values: Vec<Option<Expr>>,
    pub var: Option<NamedArgVarLit>,
}

impl CallExprNamedArgs {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.var.is_none()
    }
}

/// The parenthesised argument structure of a call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    pub lparen: Pos,
    pub args: CallExprArgs,
    pub named: CallExprNamedArgs,
    pub rparen: Pos,
}

impl Node for CallArgs {
    fn pos(&self) -> Pos {
        self.lparen
    }

    fn end(&self) -> Pos {
        self.rparen + 1
    }
}

impl fmt::Display for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts: Vec<String> = self.args.values.iter().map(|v| v.to_string()).collect();
        if let Some(v) = &self.args.var {
            parts.push(v.to_string());
        }
        let mut named: Vec<String> = Vec::new();
        for (name, value) in self.named.names.iter().zip(&self.named.values) {
            match value {
                Some(v) => named.push(format!("{}={}", name, v)),
                None => named.push(name.to_string()),
            }
        }
        if let Some(v) = &self.named.var {
            named.push(v.to_string());
        }
        write!(f, "({}", parts.join(", "))?;
        if !named.is_empty() {
            if !parts.is_empty() {
                f.write_str("; ")?;
            }
            f.write_str(&named.join(", "))?;
        }
        f.write_str(")")
    }
}

/// Positional section of a function's parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgsParams {
    pub values: Vec<TypedIdent>,
    pub var: Option<TypedIdent>,
}

/// Named section of a function's parameters. A parameter without a
/// default value is a required named parameter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedParams {
    pub names: Vec<TypedIdent>,
    pub values: Vec<Option<Expr>>,
    pub var: Option<TypedIdent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FuncParams {
    pub lparen: Pos,
    pub args: ArgsParams,
    pub named: NamedParams,
    pub rparen: Pos,
}

impl FuncParams {
    pub fn empty(lparen: Pos, rparen: Pos) -> FuncParams {
        FuncParams {
            lparen,
            args: ArgsParams::default(),
            named: NamedParams::default(),
            rparen,
        }
    }
}

impl Node for FuncParams {
    fn pos(&self) -> Pos {
        self.lparen
    }

    fn end(&self) -> Pos {
        self.rparen + 1
    }
}

impl fmt::Display for FuncParams {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts: Vec<String> = self.args.values.iter().map(|v| v.to_string()).collect();
        if let Some(v) = &self.args.var {
            parts.push(format!("*{}", v));
        }
        let mut named: Vec<String> = Vec::new();
        for (name, value) in self.named.names.iter().zip(&self.named.values) {
            match value {
                Some(v) => named.push(format!("{}={}", name, v)),
                None => named.push(name.to_string()),
            }
        }
        if let Some(v) = &self.named.var {
            named.push(format!("**{}", v));
        }
        write!(f, "({}", parts.join(", "))?;
        if !named.is_empty() {
            if !parts.is_empty() {
                f.write_str("; ")?;
            }
            f.write_str(&named.join(", "))?;
        }
        f.write_str(")")
    }
}

// _____________________________________________________________________________
// Functions
//

/// The header of a function or closure literal. `token` records how the
/// function was introduced (`func`, or the `var`/`const` of a declaration
/// it was assigned to, enabling recursion through the declared name).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FuncType {
    pub token: TokenKind,
    pub func_pos: Pos,
    pub ident: Option<Ident>,
    pub params: FuncParams,
}

impl Node for FuncType {
    fn pos(&self) -> Pos {
        self.func_pos
    }

    fn end(&self) -> Pos {
        self.params.end()
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.ident {
            Some(ident) => write!(f, "func {}{}", ident, self.params),
            None => write!(f, "func{}", self.params),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FuncLit {
    pub typ: FuncType,
    pub body: BlockStmt,
}

/// `(params) => body`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClosureLit {
    pub typ: FuncType,
    pub body: Box<Expr>,
}

/// A block in expression position (a closure body written with braces).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockExpr {
    pub block: BlockStmt,
}

/// A statement sequence in expression position; produced for keyword
/// block bodies in templates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StmtsExpr {
    pub stmts: Vec<Stmt>,
}

impl Node for StmtsExpr {
    fn pos(&self) -> Pos {
        match self.stmts.first() {
            Some(s) => s.pos(),
            None => NO_POS,
        }
    }

    fn end(&self) -> Pos {
        match self.stmts.last() {
            Some(s) => s.end(),
            None => NO_POS,
        }
    }
}

impl fmt::Display for StmtsExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&join(&self.stmts, "; "))
    }
}

// _____________________________________________________________________________
// Operation expressions
//

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub token: TokenKind,
    pub token_pos: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub token: TokenKind,
    pub token_pos: Pos,
    pub expr: Box<Expr>,
}

/// `cond ? a : b`. The short form `cond ? a` stores the same expression
/// on both arms and leaves `colon` invalid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CondExpr {
    pub cond: Box<Expr>,
    pub question: Pos,
    pub true_expr: Box<Expr>,
    pub colon: Pos,
    pub false_expr: Box<Expr>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParenExpr {
    pub lparen: Pos,
    pub expr: Box<Expr>,
    pub rparen: Pos,
}

/// `(a, b, ...)`: more than one parenthesised expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiParenExpr {
    pub lparen: Pos,
    pub exprs: Vec<Expr>,
    pub rparen: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectorExpr {
    pub expr: Box<Expr>,
    pub sel: Ident,
}

/// `expr?.sel`: selection that yields nil when the receiver is nil.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NullishSelectorExpr {
    pub expr: Box<Expr>,
    pub sel: Ident,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexExpr {
    pub expr: Box<Expr>,
    pub lbrack: Pos,
    pub index: Box<Expr>,
    pub rbrack: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SliceExpr {
    pub expr: Box<Expr>,
    pub lbrack: Pos,
    pub low: Option<Box<Expr>>,
    pub high: Option<Box<Expr>>,
    pub rbrack: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    pub func: Box<Expr>,
    pub args: CallArgs,
}

/// `import("name")`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportExpr {
    pub module_name: String,
    pub token_pos: Pos,
    pub rparen: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThrowExpr {
    pub throw_pos: Pos,
    pub expr: Box<Expr>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReturnExpr {
    pub return_pos: Pos,
    pub result: Option<Box<Expr>>,
}

/// Placeholder for an expression that could not be parsed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BadExpr {
    pub from: Pos,
    pub to: Pos,
}

// _____________________________________________________________________________
// Expr
//

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Bad(BadExpr),
    Ident(Ident),
    TypedIdent(TypedIdent),
    Int(IntLit),
    Uint(UintLit),
    Float(FloatLit),
    Decimal(DecimalLit),
    Char(CharLit),
    String(StringLit),
    RawString(RawStringLit),
    RawHeredoc(RawHeredocLit),
    Bool(BoolLit),
    Flag(FlagLit),
    Nil(NilLit),
    StdIn(StdInLit),
    StdOut(StdOutLit),
    StdErr(StdErrLit),
    DotName(DotNameLit),
    DotFile(DotFileLit),
    IsModule(IsModuleLit),
    Callee(CalleeLit),
    CalleeArgs(ArgsLit),
    CalleeNamedArgs(NamedArgsLit),
    Template(TemplateLit),
    Array(ArrayLit),
    Dict(DictLit),
    KeyValue(KeyValueLit),
    KeyValueArray(KeyValueArrayLit),
    ArgVar(ArgVarLit),
    NamedArgVar(NamedArgVarLit),
    Paren(ParenExpr),
    MultiParen(MultiParenExpr),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Cond(CondExpr),
    Selector(SelectorExpr),
    NullishSelector(NullishSelectorExpr),
    Index(IndexExpr),
    Slice(SliceExpr),
    Call(CallExpr),
    Import(ImportExpr),
    Throw(ThrowExpr),
    Return(ReturnExpr),
    Func(FuncLit),
    Closure(ClosureLit),
    Block(BlockExpr),
    Stmts(StmtsExpr),
}

impl Node for Expr {
    fn pos(&self) -> Pos {
        use self::Expr::*;
        match self {
            Bad(e) => e.from,
            Ident(e) => e.pos(),
            TypedIdent(e) => e.pos(),
            Int(e) => e.value_pos,
            Uint(e) => e.value_pos,
            Float(e) => e.value_pos,
            Decimal(e) => e.value_pos,
            Char(e) => e.value_pos,
            String(e) => e.value_pos,
            RawString(e) => e.value_pos,
            RawHeredoc(e) => e.value_pos,
            Bool(e) => e.value_pos,
            Flag(e) => e.value_pos,
            Nil(e) => e.token_pos,
            StdIn(e) => e.pos(),
            StdOut(e) => e.pos(),
            StdErr(e) => e.pos(),
            DotName(e) => e.pos(),
            DotFile(e) => e.pos(),
            IsModule(e) => e.pos(),
            Callee(e) => e.pos(),
            CalleeArgs(e) => e.pos(),
            CalleeNamedArgs(e) => e.pos(),
            Template(e) => e.dollar,
            // A multi-value return materialises an ArrayLit with no
            // bracket tokens; fall back to the elements.
            Array(e) => {
                if e.lbrack.is_valid() {
                    e.lbrack
                } else {
                    e.elements.first().map(|x| x.pos()).unwrap_or(NO_POS)
                }
            }
            Dict(e) => e.lbrace,
            KeyValue(e) => e.pos(),
            KeyValueArray(e) => e.lbrack,
            ArgVar(e) => e.pos(),
            NamedArgVar(e) => e.pos(),
            Paren(e) => e.lparen,
            MultiParen(e) => e.lparen,
            Unary(e) => match e.token {
                TokenKind::Null | TokenKind::NotNull => e.expr.pos(),
                _ => e.token_pos,
            },
            Binary(e) => e.lhs.pos(),
            Cond(e) => e.cond.pos(),
            Selector(e) => e.expr.pos(),
            NullishSelector(e) => e.expr.pos(),
            Index(e) => e.expr.pos(),
            Slice(e) => e.expr.pos(),
            Call(e) => e.func.pos(),
            Import(e) => e.token_pos,
            Throw(e) => e.throw_pos,
            Return(e) => e.return_pos,
            Func(e) => e.typ.pos(),
            Closure(e) => e.typ.params.pos(),
            Block(e) => e.block.pos(),
            Stmts(e) => e.pos(),
        }
    }

    fn end(&self) -> Pos {
        use self::Expr::*;
        match self {
            Bad(e) => e.to,
            Ident(e) => e.end(),
            TypedIdent(e) => e.end(),
            Int(e) => e.value_pos + e.literal.len() as u32,
            Uint(e) => e.value_pos + e.literal.len() as u32,
            Float(e) => e.value_pos + e.literal.len() as u32,
            Decimal(e) => e.value_pos + e.literal.len() as u32,
            Char(e) => e.value_pos + e.literal.len() as u32,
            String(e) => e.value_pos + e.literal.len() as u32,
            RawString(e) => e.value_pos + e.literal.len() as u32,
            RawHeredoc(e) => e.value_pos + e.literal.len() as u32,
            Bool(e) => e.value_pos + if e.value { 4 } else { 5 },
            Flag(e) => e.value_pos + if e.value { 3 } else { 2 },
            Nil(e) => e.token_pos + 3,
            StdIn(e) => e.end(),
            StdOut(e) => e.end(),
            StdErr(e) => e.end(),
            DotName(e) => e.end(),
            DotFile(e) => e.end(),
            IsModule(e) => e.end(),
            Callee(e) => e.end(),
            CalleeArgs(e) => e.end(),
            CalleeNamedArgs(e) => e.end(),
            Template(e) => e.literal.end(),
            Array(e) => {
                if e.rbrack.is_valid() {
                    e.rbrack + 1
                } else {
                    e.elements.last().map(|x| x.end()).unwrap_or(NO_POS)
                }
            }
            Dict(e) => e.rbrace + 1,
            KeyValue(e) => e.end(),
            KeyValueArray(e) => e.rbrack + 1,
            ArgVar(e) => e.end(),
            NamedArgVar(e) => e.end(),
            Paren(e) => e.rparen + 1,
            MultiParen(e) => e.rparen + 1,
            Unary(e) => e.expr.end(),
            Binary(e) => e.rhs.end(),
            Cond(e) => e.false_expr.end(),
            Selector(e) => e.sel.end(),
            NullishSelector(e) => e.sel.end(),
            Index(e) => e.rbrack + 1,
            Slice(e) => e.rbrack + 1,
            Call(e) => e.args.end(),
            Import(e) => e.rparen + 1,
            Throw(e) => e.expr.end(),
            Return(e) => match &e.result {
                Some(r) => r.end(),
                None => e.return_pos + 6,
            },
            Func(e) => e.body.end(),
            Closure(e) => e.body.end(),
            Block(e) => e.block.end(),
            Stmts(e) => e.end(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Expr::*;
        match self {
            Bad(_) => f.write_str("<bad expression>"),
            Ident(e) => write!(f, "{}", e),
            TypedIdent(e) => write!(f, "{}", e),
            Int(e) => f.write_str(&e.literal),
            Uint(e) => f.write_str(&e.literal),
            Float(e) => f.write_str(&e.literal),
            Decimal(e) => f.write_str(&e.literal),
            Char(e) => f.write_str(&e.literal),
            String(e) => f.write_str(&e.literal),
            RawString(e) => f.write_str(&e.literal),
            RawHeredoc(e) => f.write_str(&e.literal),
            Bool(e) => f.write_str(if e.value { "true" } else { "false" }),
            Flag(e) => f.write_str(if e.value { "yes" } else { "no" }),
            Nil(_) => f.write_str("nil"),
            StdIn(e) => write!(f, "{}", e),
            StdOut(e) => write!(f, "{}", e),
            StdErr(e) => write!(f, "{}", e),
            DotName(e) => write!(f, "{}", e),
            DotFile(e) => write!(f, "{}", e),
            IsModule(e) => write!(f, "{}", e),
            Callee(e) => write!(f, "{}", e),
            CalleeArgs(e) => write!(f, "{}", e),
            CalleeNamedArgs(e) => write!(f, "{}", e),
            Template(e) => write!(f, "${}", e.literal),
            Array(e) => write!(f, "[{}]", join(&e.elements, ", ")),
            Dict(e) => write!(f, "{{{}}}", join(&e.elements, ", ")),
            KeyValue(e) => write!(f, "{}", e),
            KeyValueArray(e) => write!(f, "[{}]", join(&e.elements, ", ")),
            ArgVar(e) => write!(f, "{}", e),
            NamedArgVar(e) => write!(f, "{}", e),
            Paren(e) => write!(f, "({})", e.expr),
            MultiParen(e) => write!(f, "({})", join(&e.exprs, ", ")),
            Unary(e) => match e.token {
                TokenKind::Null => write!(f, "({} == nil)", e.expr),
                TokenKind::NotNull => write!(f, "({} != nil)", e.expr),
                _ => write!(f, "({}{})", e.token, e.expr),
            },
            Binary(e) => write!(f, "({} {} {})", e.lhs, e.token, e.rhs),
            Cond(e) => write!(f, "({} ? {} : {})", e.cond, e.true_expr, e.false_expr),
            Selector(e) => write!(f, "{}.{}", e.expr, e.sel),
            NullishSelector(e) => write!(f, "{}?.{}", e.expr, e.sel),
            Index(e) => write!(f, "{}[{}]", e.expr, e.index),
            Slice(e) => {
                write!(f, "{}[", e.expr)?;
                if let Some(low) = &e.low {
                    write!(f, "{}", low)?;
                }
                f.write_str(":")?;
                if let Some(high) = &e.high {
                    write!(f, "{}", high)?;
                }
                f.write_str("]")
            }
            Call(e) => write!(f, "{}{}", e.func, e.args),
            Import(e) => write!(f, "import({:?})", e.module_name),
            Throw(e) => write!(f, "throw {}", e.expr),
            Return(e) => match &e.result {
                Some(r) => write!(f, "return {}", r),
                None => f.write_str("return"),
            },
            Func(e) => write!(f, "{} {}", e.typ, e.body),
            Closure(e) => write!(f, "{} => {}", e.typ.params, e.body),
            Block(e) => write!(f, "{}", e.block),
            Stmts(e) => write!(f, "{}", e),
        }
    }
}

// _____________________________________________________________________________
// Statements
//

bitflags! {
    /// Whitespace stripping requested by `-` template delimiters adjacent
    /// to a text segment.
    #[derive(Default)]
    pub struct TrimFlags: u32 {
        /// Strip leading whitespace of the segment.
        const TRIM_LEFT = 1 << 0;
        /// Strip trailing whitespace of the segment.
        const TRIM_RIGHT = 1 << 1;
    }
}

impl Serialize for TrimFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for TrimFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Ok(TrimFlags::from_bits_truncate(bits))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssignStmt {
    pub lhs: Vec<Expr>,
    pub rhs: Vec<Expr>,
    pub token: TokenKind,
    pub token_pos: Pos,
}

/// A braced or keyword-delimited statement list. Never contains
/// `EmptyStmt` entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockStmt {
    pub lbrace: Pos,
    pub stmts: Vec<Stmt>,
    pub rbrace: Pos,
}

impl Node for BlockStmt {
    fn pos(&self) -> Pos {
        self.lbrace
    }

    fn end(&self) -> Pos {
        if self.rbrace.is_valid() {
            self.rbrace + 1
        } else {
            match self.stmts.last() {
                Some(s) => s.end(),
                None => self.lbrace + 1,
            }
        }
    }
}

impl fmt::Display for BlockStmt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}}}", join(&self.stmts, "; "))
    }
}

/// `break` or `continue`, with an optional label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchStmt {
    pub token: TokenKind,
    pub token_pos: Pos,
    pub label: Option<Ident>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmptyStmt {
    pub semicolon: Pos,
    pub implicit: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExprStmt {
    pub expr: Expr,
}

/// `for key, value in iterable { body } [else { ... }]`. The `else`
/// block runs when the iterable yielded no value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForInStmt {
    pub for_pos: Pos,
    pub key: Ident,
    pub value: Ident,
    pub iterable: Expr,
    pub body: BlockStmt,
    pub else_body: Option<BlockStmt>,
}

/// `for [init]; [cond]; [post] { body }`, or the degenerate while and
/// infinite forms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForStmt {
    pub for_pos: Pos,
    pub init: Option<Box<Stmt>>,
    pub cond: Option<Expr>,
    pub post: Option<Box<Stmt>>,
    pub body: BlockStmt,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IfStmt {
    pub if_pos: Pos,
    pub init: Option<Box<Stmt>>,
    pub cond: Expr,
    pub body: BlockStmt,
    /// `BlockStmt` for a final else, `IfStmt` for an else-if chain.
    pub else_stmt: Option<Box<Stmt>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncDecStmt {
    pub expr: Expr,
    pub token: TokenKind,
    pub token_pos: Pos,
}

/// `return [expr]`. Multiple comma-separated results are materialised
/// into a single `ArrayLit` at parse time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReturnStmt {
    pub return_pos: Pos,
    pub result: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TryStmt {
    pub try_pos: Pos,
    pub body: BlockStmt,
    pub catch: Option<CatchStmt>,
    pub finally: Option<FinallyStmt>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatchStmt {
    pub catch_pos: Pos,
    pub ident: Option<Ident>,
    pub body: BlockStmt,
}

impl Node for CatchStmt {
    fn pos(&self) -> Pos {
        self.catch_pos
    }

    fn end(&self) -> Pos {
        self.body.end()
    }
}

impl fmt::Display for CatchStmt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.ident {
            Some(ident) => write!(f, "catch {} {}", ident, self.body),
            None => write!(f, "catch {}", self.body),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinallyStmt {
    pub finally_pos: Pos,
    pub body: BlockStmt,
}

impl Node for FinallyStmt {
    fn pos(&self) -> Pos {
        self.finally_pos
    }

    fn end(&self) -> Pos {
        self.body.end()
    }
}

impl fmt::Display for FinallyStmt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "finally {}", self.body)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThrowStmt {
    pub throw_pos: Pos,
    pub expr: Expr,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeclStmt {
    pub decl: Decl,
}

/// A raw template text segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixedTextStmt {
    pub literal: String,
    pub literal_pos: Pos,
    pub flags: TrimFlags,
}

impl MixedTextStmt {
    /// The text with the whitespace stripping requested by neighbouring
    /// delimiters applied.
    pub fn value(&self) -> &str {
        let mut s = self.literal.as_str();
        if self.flags.contains(TrimFlags::TRIM_LEFT) {
            s = s.trim_start();
        }
        if self.flags.contains(TrimFlags::TRIM_RIGHT) {
            s = s.trim_end();
        }
        s
    }
}

/// `{{ expr }}` parsed as a value expression
/// (`ScanMode::MIXED_EXPR_AS_VALUE`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixedValueStmt {
    pub start: Pos,
    pub expr: Expr,
    pub end_pos: Pos,
}

/// `{{ expr }}` in its default reading: evaluate and write as text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExprToTextStmt {
    pub start: Pos,
    pub expr: Expr,
    pub end_pos: Pos,
}

/// Marker for a `{%` delimiter inside a template body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodeBeginStmt {
    pub literal_pos: Pos,
    pub literal: String,
    pub remove_space: bool,
}

/// Marker for a `%}` delimiter inside a template body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodeEndStmt {
    pub literal_pos: Pos,
    pub literal: String,
    pub remove_space: bool,
}

/// The interpreted options of a `# gad:` preamble.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOptions {
    pub mixed: bool,
    pub writer: bool,
    pub mixed_start: Option<String>,
    pub mixed_end: Option<String>,
}

/// The configuration preamble statement, `# gad: key=value, ...`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigStmt {
    pub config_pos: Pos,
    pub options: Vec<KeyValueLit>,
    pub end_pos: Pos,
    pub parsed: ConfigOptions,
}

/// Placeholder for a statement that could not be parsed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BadStmt {
    pub from: Pos,
    pub to: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Bad(BadStmt),
    Assign(AssignStmt),
    Block(BlockStmt),
    Branch(BranchStmt),
    Empty(EmptyStmt),
    Expr(ExprStmt),
    ForIn(ForInStmt),
    For(ForStmt),
    If(IfStmt),
    IncDec(IncDecStmt),
    Return(ReturnStmt),
    Try(TryStmt),
    Throw(ThrowStmt),
    Decl(DeclStmt),
    MixedText(MixedTextStmt),
    MixedValue(MixedValueStmt),
    ExprToText(ExprToTextStmt),
    CodeBegin(CodeBeginStmt),
    CodeEnd(CodeEndStmt),
    Config(ConfigStmt),
}

impl Stmt {
    /// Reports whether this statement is an (explicit or implicit)
    /// empty statement; blocks never store these.
    pub fn is_empty_stmt(&self) -> bool {
        match self {
            Stmt::Empty(_) => true,
            _ => false,
        }
    }
}

impl Node for Stmt {
    fn pos(&self) -> Pos {
        use self::Stmt::*;
        match self {
            Bad(s) => s.from,
            Assign(s) => s.lhs.first().map(|e| e.pos()).unwrap_or(s.token_pos),
            Block(s) => s.pos(),
            Branch(s) => s.token_pos,
            Empty(s) => s.semicolon,
            Expr(s) => s.expr.pos(),
            ForIn(s) => s.for_pos,
            For(s) => s.for_pos,
            If(s) => s.if_pos,
            IncDec(s) => s.expr.pos(),
            Return(s) => s.return_pos,
            Try(s) => s.try_pos,
            Throw(s) => s.throw_pos,
            Decl(s) => s.decl.pos(),
            MixedText(s) => s.literal_pos,
            MixedValue(s) => s.start,
            ExprToText(s) => s.start,
            CodeBegin(s) => s.literal_pos,
            CodeEnd(s) => s.literal_pos,
            Config(s) => s.config_pos,
        }
    }

    fn end(&self) -> Pos {
        use self::Stmt::*;
        match self {
            Bad(s) => s.to,
            Assign(s) => s.rhs.last().map(|e| e.end()).unwrap_or(s.token_pos),
            Block(s) => s.end(),
            Branch(s) => match &s.label {
                Some(label) => label.end(),
                None => s.token_pos + s.token.as_str().len() as u32,
            },
            Empty(s) => s.semicolon + 1,
            Expr(s) => s.expr.end(),
            ForIn(s) => match &s.else_body {
                Some(b) => b.end(),
                None => s.body.end(),
            },
            For(s) => s.body.end(),
            If(s) => match &s.else_stmt {
                Some(e) => e.end(),
                None => s.body.end(),
            },
            IncDec(s) => s.token_pos + 2,
            Return(s) => match &s.result {
                Some(r) => r.end(),
                None => s.return_pos + 6,
            },
            Try(s) => {
                if let Some(fin) = &s.finally {
                    fin.end()
                } else if let Some(catch) = &s.catch {
                    catch.end()
                } else {
                    s.body.end()
                }
            }
            Throw(s) => s.expr.end(),
            Decl(s) => s.decl.end(),
            MixedText(s) => s.literal_pos + s.literal.len() as u32,
            MixedValue(s) => s.end_pos,
            ExprToText(s) => s.end_pos,
            CodeBegin(s) => s.literal_pos + s.literal.len() as u32,
            CodeEnd(s) => s.literal_pos + s.literal.len() as u32,
            Config(s) => s.end_pos,
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Stmt::*;
        match self {
            Bad(_) => f.write_str("<bad statement>"),
            Assign(s) => write!(
                f,
                "{} {} {}",
                join(&s.lhs, ", "),
                s.token,
                join(&s.rhs, ", ")
            ),
            Block(s) => write!(f, "{}", s),
            Branch(s) => match &s.label {
                Some(label) => write!(f, "{} {}", s.token, label),
                None => write!(f, "{}", s.token),
            },
            Empty(_) => f.write_str(";"),
            Expr(s) => write!(f, "{}", s.expr),
            ForIn(s) => {
                write!(
                    f,
                    "for {}, {} in {} {}",
                    s.key, s.value, s.iterable, s.body
                )?;
                if let Some(e) = &s.else_body {
                    write!(f, " else {}", e)?;
                }
                Ok(())
            }
            For(s) => {
                f.write_str("for ")?;
                if let Some(init) = &s.init {
                    write!(f, "{}", init)?;
                    f.write_str("; ")?;
                }
                if let Some(cond) = &s.cond {
                    write!(f, "{}", cond)?;
                    f.write_str(" ")?;
                }
                if let Some(post) = &s.post {
                    write!(f, "; {} ", post)?;
                }
                write!(f, "{}", s.body)
            }
            If(s) => {
                f.write_str("if ")?;
                if let Some(init) = &s.init {
                    write!(f, "{}; ", init)?;
                }
                write!(f, "{} {}", s.cond, s.body)?;
                if let Some(e) = &s.else_stmt {
                    write!(f, " else {}", e)?;
                }
                Ok(())
            }
            IncDec(s) => write!(f, "{}{}", s.expr, s.token),
            Return(s) => match &s.result {
                Some(r) => write!(f, "return {}", r),
                None => f.write_str("return"),
            },
            Try(s) => {
                write!(f, "try {}", s.body)?;
                if let Some(c) = &s.catch {
                    write!(f, " {}", c)?;
                }
                if let Some(fin) = &s.finally {
                    write!(f, " {}", fin)?;
                }
                Ok(())
            }
            Throw(s) => write!(f, "throw {}", s.expr),
            Decl(s) => write!(f, "{}", s.decl),
            MixedText(s) => f.write_str(s.value()),
            MixedValue(s) => write!(f, "{{= {} =}}", s.expr),
            ExprToText(s) => write!(f, "{{{{ {} }}}}", s.expr),
            CodeBegin(s) => f.write_str(&s.literal),
            CodeEnd(s) => f.write_str(&s.literal),
            Config(s) => {
                write!(f, "# gad:")?;
                if !s.options.is_empty() {
                    write!(f, " {}", join(&s.options, ", "))?;
                }
                Ok(())
            }
        }
    }
}

// _____________________________________________________________________________
// Declarations
//

/// How a declared parameter is variadic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariadicKind {
    /// `*rest`
    Positional,
    /// `**rest`
    Named,
}

/// One positional parameter of a `param` declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub ident: TypedIdent,
    pub variadic: Option<VariadicKind>,
}

impl Node for ParamSpec {
    fn pos(&self) -> Pos {
        self.ident.pos()
    }

    fn end(&self) -> Pos {
        self.ident.end()
    }
}

impl fmt::Display for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.variadic {
            Some(VariadicKind::Positional) => write!(f, "*{}", self.ident),
            Some(VariadicKind::Named) => write!(f, "**{}", self.ident),
            None => write!(f, "{}", self.ident),
        }
    }
}

/// One named parameter of a `param` declaration; without a default it is
/// a required named parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedParamSpec {
    pub ident: TypedIdent,
    pub value: Option<Expr>,
}

impl Node for NamedParamSpec {
    fn pos(&self) -> Pos {
        self.ident.pos()
    }

    fn end(&self) -> Pos {
        match &self.value {
            Some(v) => v.end(),
            None => self.ident.end(),
        }
    }
}

impl fmt::Display for NamedParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.ident, v),
            None => write!(f, "{}", self.ident),
        }
    }
}

/// Names with optional initializers of a `var`/`const`/`global`
/// declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueSpec {
    pub idents: Vec<Ident>,
    pub values: Vec<Option<Expr>>,
}

impl Node for ValueSpec {
    fn pos(&self) -> Pos {
        self.idents.first().map(|i| i.pos()).unwrap_or(NO_POS)
    }

    fn end(&self) -> Pos {
        if let Some(Some(v)) = self.values.last() {
            return v.end();
        }
        self.idents.last().map(|i| i.end()).unwrap_or(NO_POS)
    }
}

impl fmt::Display for ValueSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts = Vec::new();
        for (i, ident) in self.idents.iter().enumerate() {
            match self.values.get(i) {
                Some(Some(v)) => parts.push(format!("{} = {}", ident, v)),
                _ => parts.push(ident.to_string()),
            }
        }
        f.write_str(&parts.join(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Spec {
    Param(ParamSpec),
    NamedParam(NamedParamSpec),
    Value(ValueSpec),
}

impl Node for Spec {
    fn pos(&self) -> Pos {
        match self {
            Spec::Param(s) => s.pos(),
            Spec::NamedParam(s) => s.pos(),
            Spec::Value(s) => s.pos(),
        }
    }

    fn end(&self) -> Pos {
        match self {
            Spec::Param(s) => s.end(),
            Spec::NamedParam(s) => s.end(),
            Spec::Value(s) => s.end(),
        }
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Spec::Param(s) => write!(f, "{}", s),
            Spec::NamedParam(s) => write!(f, "{}", s),
            Spec::Value(s) => write!(f, "{}", s),
        }
    }
}

/// A `param`, `global`, `var` or `const` declaration. The parenthesised
/// form groups several specs; the single-spec form leaves the paren
/// positions invalid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenDecl {
    pub token: TokenKind,
    pub token_pos: Pos,
    pub lparen: Pos,
    pub specs: Vec<Spec>,
    pub rparen: Pos,
}

/// Placeholder for a declaration that could not be parsed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BadDecl {
    pub from: Pos,
    pub to: Pos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Gen(GenDecl),
    Bad(BadDecl),
}

impl Node for Decl {
    fn pos(&self) -> Pos {
        match self {
            Decl::Gen(d) => d.token_pos,
            Decl::Bad(d) => d.from,
        }
    }

    fn end(&self) -> Pos {
        match self {
            Decl::Gen(d) => {
                if d.rparen.is_valid() {
                    d.rparen + 1
                } else {
                    d.specs.last().map(|s| s.end()).unwrap_or(d.token_pos)
                }
            }
            Decl::Bad(d) => d.to,
        }
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Decl::Gen(d) => {
                if d.lparen.is_valid() {
                    write!(f, "{} ({})", d.token, join(&d.specs, ", "))
                } else {
                    write!(f, "{} {}", d.token, join(&d.specs, ", "))
                }
            }
            Decl::Bad(_) => f.write_str("<bad declaration>"),
        }
    }
}
