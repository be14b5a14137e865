//! The gad scanner: converts a source file into a token stream.
//!
//! The scanner runs in one of two lexical modes. In code mode it produces
//! ordinary language tokens; in text mode (active between template
//! delimiters when `ScanMode::MIXED` is set) it accumulates raw text into
//! `MixedText` tokens. Delimiters switch the mode mid-scan, and the parser
//! may mutate the mode register and the delimiter pairs while a scan is in
//! progress (a `# gad:` config preamble does exactly that).

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use log::debug;
use unicode_xid::UnicodeXID;

use gad_errors::ErrorList;
use gad_pos::SourceFile;

use crate::parse::reader::{Reader, EOF_RUNE};
use crate::parse::token::{lookup_ident, Token, TokenData, TokenKind};

bitflags! {
    /// Scanner option register. Mutable during a scan: a config preamble
    /// may set `MIXED` after the first line.
    pub struct ScanMode: u32 {
        /// Emit comment tokens instead of discarding them.
        const SCAN_COMMENTS = 1 << 0;
        /// Begin in mixed text+code mode.
        const MIXED = 1 << 1;
        /// Do not recognise a `# gad:` configuration preamble.
        const CONFIG_DISABLED = 1 << 2;
        /// Interpolations are value expressions rather than text writes.
        const MIXED_EXPR_AS_VALUE = 1 << 3;
    }
}

/// A start/end delimiter pair for template regions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelimPair {
    pub start: String,
    pub end: String,
}

impl DelimPair {
    pub fn new(start: &str, end: &str) -> DelimPair {
        DelimPair {
            start: start.to_string(),
            end: end.to_string(),
        }
    }
}

/// Default code block delimiters, `{% ... %}`.
pub fn default_code_delims() -> DelimPair {
    DelimPair::new("{%", "%}")
}

/// Default value interpolation delimiters, `{{ ... }}`.
pub fn default_value_delims() -> DelimPair {
    DelimPair::new("{{", "}}")
}

/// The configuration preamble introducer.
pub const CONFIG_START: &str = "# gad:";

pub struct Scanner {
    reader: Reader,
    mode: ScanMode,
    code_delims: DelimPair,
    value_delims: DelimPair,
    /// Kind of the last emitted non-comment token; drives automatic
    /// semicolon insertion and dot-literal disambiguation.
    last_kind: TokenKind,
    /// Currently accumulating raw template text.
    in_text: bool,
    /// Inside a value interpolation; the matching end returns to text.
    in_value: bool,
    /// Inside the config preamble line.
    in_config: bool,
    /// Whether any token has been produced yet (config preamble and the
    /// initial text-mode switch are only decided once, up front).
    started: bool,
    /// A `-` end delimiter asked for the next text segment's leading
    /// whitespace to be stripped.
    pending_trim: bool,
    /// Bracket nesting inside a template region; end delimiters are only
    /// recognised at depth zero.
    depth: i32,
}

impl Scanner {
    pub fn new(file: Rc<SourceFile>, errors: Rc<RefCell<ErrorList>>, mode: ScanMode) -> Scanner {
        Scanner {
            reader: Reader::new(file, errors),
            mode,
            code_delims: default_code_delims(),
            value_delims: default_value_delims(),
            last_kind: TokenKind::Eof,
            in_text: false,
            in_value: false,
            in_config: false,
            started: false,
            pending_trim: false,
            depth: 0,
        }
    }

    pub fn file(&self) -> &Rc<SourceFile> {
        self.reader.file()
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Replaces the mode register. Turning `MIXED` on outside a template
    /// region switches the scanner into text mode for the following input.
    pub fn set_mode(&mut self, mode: ScanMode) {
        let was_mixed = self.mode.contains(ScanMode::MIXED);
        self.mode = mode;
        if !was_mixed && mode.contains(ScanMode::MIXED) && !self.in_value && !self.in_config {
            self.in_text = true;
        }
        debug!("scanner mode set to {:?}", mode);
    }

    pub fn code_delims(&self) -> &DelimPair {
        &self.code_delims
    }

    pub fn set_code_delims(&mut self, delims: DelimPair) {
        debug!("code delimiters set to {:?}", delims);
        self.code_delims = delims;
    }

    pub fn value_delims(&self) -> &DelimPair {
        &self.value_delims
    }

    pub fn set_value_delims(&mut self, delims: DelimPair) {
        self.value_delims = delims;
    }

    fn error(&self, offset: u32, msg: &str) {
        self.reader.error(offset, msg);
    }

    fn token_at(&self, kind: TokenKind, start_offset: u32) -> Token {
        let literal = self.reader.file().src[start_offset as usize..self.reader.offset as usize]
            .to_string();
        Token::new(kind, self.reader.file().pos(start_offset), literal)
    }

    /// Scans and returns the next token.
    pub fn next_token(&mut self) -> Token {
        if !self.started {
            self.started = true;
            if !self.mode.contains(ScanMode::CONFIG_DISABLED)
                && self.reader.offset == 0
                && self.reader.at_str(CONFIG_START)
            {
                return self.scan_config_start();
            }
            if self.mode.contains(ScanMode::MIXED) {
                self.in_text = true;
            }
        }

        if self.in_config {
            return self.scan_config_token();
        }

        if self.in_text {
            return self.scan_text();
        }

        self.scan_code_token()
    }

    // _________________________________________________________________________
    // Config preamble
    //

    fn scan_config_start(&mut self) -> Token {
        let start = self.reader.offset;
        self.consume_bytes(CONFIG_START.len());
        self.in_config = true;
        self.reader.escape_newline = true;
        let tok = self.token_at(TokenKind::ConfigStart, start);
        self.last_kind = tok.kind;
        debug!("config preamble opened");
        tok
    }

    fn scan_config_token(&mut self) -> Token {
        self.reader.skip_whitespace(false);
        if self.reader.ch == '\n' as i32 || self.reader.ch == EOF_RUNE {
            let start = self.reader.offset;
            if self.reader.ch == '\n' as i32 {
                self.reader.next();
            }
            self.in_config = false;
            self.reader.escape_newline = false;
            if self.mode.contains(ScanMode::MIXED) {
                self.in_text = true;
            }
            let mut tok = self.token_at(TokenKind::ConfigEnd, start);
            tok.literal.clear();
            self.last_kind = tok.kind;
            debug!("config preamble closed");
            return tok;
        }
        self.scan_code_token()
    }

    // _________________________________________________________________________
    // Text mode
    //

    /// True when the reader sits on the start of a template delimiter.
    fn at_region_start(&self) -> bool {
        self.reader.at_str(&self.value_delims.start) || self.reader.at_str(&self.code_delims.start)
    }

    fn scan_text(&mut self) -> Token {
        if self.reader.ch == EOF_RUNE {
            return self.eof_token();
        }
        if self.at_region_start() {
            return self.scan_region_start();
        }

        let start = self.reader.offset;
        let mut data = TokenData::default();
        data.trim_left = self.pending_trim;
        self.pending_trim = false;

        while self.reader.ch != EOF_RUNE && !self.at_region_start() {
            self.reader.next();
        }

        // A `{%-` ahead strips this segment's trailing whitespace.
        if self.reader.at_str(&self.code_delims.start) {
            let after = self.reader.offset as usize + self.code_delims.start.len();
            if self.reader.file().src[after..].starts_with('-') {
                data.trim_right = true;
            }
        }

        let mut tok = self.token_at(TokenKind::MixedText, start);
        tok.data = data;
        self.last_kind = tok.kind;
        tok
    }

    fn scan_region_start(&mut self) -> Token {
        let start = self.reader.offset;
        // Longest delimiter first, in case one pair prefixes the other.
        let value_first = self.value_delims.start.len() >= self.code_delims.start.len();
        let is_value = if value_first {
            self.reader.at_str(&self.value_delims.start)
        } else {
            !self.reader.at_str(&self.code_delims.start)
        };

        let (kind, delim_len) = if is_value {
            (TokenKind::MixedValueStart, self.value_delims.start.len())
        } else {
            (TokenKind::MixedCodeStart, self.code_delims.start.len())
        };
        self.consume_bytes(delim_len);

        let mut data = TokenData::default();
        match kind {
            TokenKind::MixedCodeStart => {
                if self.reader.ch == '-' as i32 {
                    data.trim_left = true;
                    self.reader.next();
                }
                self.in_value = false;
            }
            _ => {
                // `{{=` is accepted as an alias of the value opener.
                if self.reader.ch == '=' as i32 {
                    self.reader.next();
                }
                self.in_value = true;
            }
        }

        self.in_text = false;
        self.depth = 0;
        let mut tok = self.token_at(kind, start);
        tok.data = data;
        self.last_kind = tok.kind;
        debug!("template region opened at {}", tok.pos);
        tok
    }

    /// Recognises an end delimiter in code mode. Only fires at bracket
    /// depth zero so `{{ m["}}"[0:1]] }}` style nesting survives.
    fn scan_region_end(&mut self) -> Option<Token> {
        if !self.mode.contains(ScanMode::MIXED) || self.depth > 0 {
            return None;
        }
        let start = self.reader.offset;
        if self.in_value {
            let alias = format!("={}", self.value_delims.end);
            let len = if self.reader.at_str(&alias) {
                alias.len()
            } else if self.reader.at_str(&self.value_delims.end) {
                self.value_delims.end.len()
            } else {
                return None;
            };
            self.consume_bytes(len);
            self.in_value = false;
            self.in_text = true;
            return Some(self.token_at(TokenKind::MixedValueEnd, start));
        }

        let trimmed = format!("-{}", self.code_delims.end);
        let (len, trim) = if self.reader.at_str(&trimmed) {
            (trimmed.len(), true)
        } else if self.reader.at_str(&self.code_delims.end) {
            (self.code_delims.end.len(), false)
        } else {
            return None;
        };
        self.consume_bytes(len);
        self.in_text = true;
        self.pending_trim = trim;
        let mut tok = self.token_at(TokenKind::MixedCodeEnd, start);
        tok.data.trim_right = trim;
        Some(tok)
    }

    fn consume_bytes(&mut self, n: usize) {
        let target = self.reader.offset as usize + n;
        while (self.reader.offset as usize) < target && self.reader.ch != EOF_RUNE {
            self.reader.next();
        }
    }

    // _________________________________________________________________________
    // Code mode
    //

    fn eof_token(&mut self) -> Token {
        let tok = Token::new(
            TokenKind::Eof,
            self.reader.file().pos(self.reader.file().size),
            String::new(),
        );
        self.last_kind = tok.kind;
        tok
    }

    fn scan_code_token(&mut self) -> Token {
        loop {
            self.reader.skip_whitespace(false);

            if self.reader.ch == '\n' as i32 {
                if self.last_kind.insert_semi_after() {
                    let tok = Token::new(
                        TokenKind::Semicolon,
                        self.reader.pos(),
                        "\n".to_string(),
                    );
                    self.reader.next();
                    self.last_kind = tok.kind;
                    return tok;
                }
                self.reader.next();
                continue;
            }

            if let Some(tok) = self.scan_region_end() {
                self.last_kind = tok.kind;
                return tok;
            }

            if self.reader.ch == EOF_RUNE {
                return self.eof_token();
            }

            let ch = self.reader.ch as u32;
            let c = std::char::from_u32(ch).unwrap_or('\u{fffd}');

            if is_ident_start(c) {
                let tok = self.scan_ident();
                self.last_kind = tok.kind;
                return tok;
            }
            if c.is_ascii_digit() {
                let tok = self.scan_number();
                self.last_kind = tok.kind;
                return tok;
            }

            let tok = match c {
                '"' => self.scan_string(),
                '\'' => self.scan_char(),
                '`' => {
                    if self.reader.at_str("```") {
                        self.scan_heredoc()
                    } else {
                        self.scan_raw_string()
                    }
                }
                '/' => {
                    if self.reader.peek() == '/' as i32 || self.reader.peek() == '*' as i32 {
                        let comment = self.scan_comment();
                        if self.mode.contains(ScanMode::SCAN_COMMENTS) {
                            // Comments are transparent to semicolon
                            // insertion; `last_kind` stays untouched.
                            return comment;
                        }
                        continue;
                    }
                    self.scan_operator()
                }
                '.' => self.scan_dot(),
                _ => self.scan_operator(),
            };
            self.last_kind = tok.kind;
            return tok;
        }
    }

    fn scan_ident(&mut self) -> Token {
        let start = self.reader.offset;
        while self.reader.ch != EOF_RUNE {
            let c = std::char::from_u32(self.reader.ch as u32).unwrap_or('\0');
            if !is_ident_continue(c) {
                break;
            }
            self.reader.next();
        }
        let mut tok = self.token_at(TokenKind::Ident, start);
        tok.kind = lookup_ident(&tok.literal);
        tok
    }

    // Numbers: decimal, 0x/0o/0b prefixed integers, floats with fraction
    // and/or exponent; `u` suffixes a uint, `d` a decimal.
    fn scan_number(&mut self) -> Token {
        let start = self.reader.offset;
        let mut kind = TokenKind::Int;

        if self.reader.ch == '0' as i32 {
            let radix = match self.reader.peek() {
                x if x == 'x' as i32 || x == 'X' as i32 => Some((16, "hexadecimal")),
                o if o == 'o' as i32 || o == 'O' as i32 => Some((8, "octal")),
                b if b == 'b' as i32 || b == 'B' as i32 => Some((2, "binary")),
                _ => None,
            };
            if let Some((radix, what)) = radix {
                self.reader.next();
                self.reader.next();
                if self.scan_digits(radix) == 0 {
                    self.error(start, &format!("illegal {} number", what));
                }
                return self.finish_number(start, TokenKind::Int);
            }
        }

        self.scan_digits(10);

        if self.reader.ch == '.' as i32 && digit_value(self.reader.peek()) < 10 {
            kind = TokenKind::Float;
            self.reader.next();
            self.scan_digits(10);
        }
        if self.reader.ch == 'e' as i32 || self.reader.ch == 'E' as i32 {
            kind = TokenKind::Float;
            self.reader.next();
            if self.reader.ch == '+' as i32 || self.reader.ch == '-' as i32 {
                self.reader.next();
            }
            if self.scan_digits(10) == 0 {
                self.error(start, "illegal floating-point exponent");
            }
        }

        self.finish_number(start, kind)
    }

    fn finish_number(&mut self, start: u32, kind: TokenKind) -> Token {
        let mut kind = kind;
        if self.reader.ch == 'u' as i32 {
            if kind == TokenKind::Float {
                self.error(start, "invalid 'u' suffix on float literal");
            }
            kind = TokenKind::Uint;
            self.reader.next();
        } else if self.reader.ch == 'd' as i32 {
            kind = TokenKind::Decimal;
            self.reader.next();
        }
        self.token_at(kind, start)
    }

    fn scan_digits(&mut self, radix: u32) -> usize {
        let mut n = 0;
        while self.reader.ch != EOF_RUNE && digit_value(self.reader.ch) < radix {
            n += 1;
            self.reader.next();
        }
        n
    }

    fn scan_string(&mut self) -> Token {
        let start = self.reader.offset;
        self.reader.next(); // opening quote
        loop {
            match self.reader.ch {
                EOF_RUNE => {
                    self.error(start, "string literal not terminated");
                    break;
                }
                c if c == '\n' as i32 => {
                    self.error(start, "string literal not terminated");
                    break;
                }
                c if c == '"' as i32 => {
                    self.reader.next();
                    break;
                }
                c if c == '\\' as i32 => {
                    self.scan_escape('"');
                }
                _ => self.reader.next(),
            }
        }
        self.token_at(TokenKind::String, start)
    }

    fn scan_char(&mut self) -> Token {
        let start = self.reader.offset;
        self.reader.next(); // opening quote
        let mut n = 0;
        loop {
            match self.reader.ch {
                EOF_RUNE => {
                    self.error(start, "char literal not terminated");
                    break;
                }
                c if c == '\n' as i32 => {
                    self.error(start, "char literal not terminated");
                    break;
                }
                c if c == '\'' as i32 => {
                    self.reader.next();
                    break;
                }
                c if c == '\\' as i32 => {
                    n += 1;
                    self.scan_escape('\'');
                }
                _ => {
                    n += 1;
                    self.reader.next();
                }
            }
        }
        if n != 1 {
            self.error(start, "illegal char literal");
        }
        self.token_at(TokenKind::Char, start)
    }

    /// Validates one escape sequence after the backslash. The decoded
    /// value is produced later by the unquote helpers; the scanner only
    /// guarantees the sequence is well formed.
    fn scan_escape(&mut self, quote: char) {
        let start = self.reader.offset;
        self.reader.next(); // backslash

        let (digits, base, max): (u32, u32, u32) = match self.reader.ch {
            c if c == quote as i32 => {
                self.reader.next();
                return;
            }
            c if c == 'a' as i32
                || c == 'b' as i32
                || c == 'f' as i32
                || c == 'n' as i32
                || c == 'r' as i32
                || c == 't' as i32
                || c == 'v' as i32
                || c == '\\' as i32
                || c == '\'' as i32
                || c == '"' as i32 =>
            {
                self.reader.next();
                return;
            }
            c if c >= '0' as i32 && c <= '7' as i32 => (3, 8, 0xFF),
            c if c == 'x' as i32 => {
                self.reader.next();
                (2, 16, 0xFF)
            }
            c if c == 'u' as i32 => {
                self.reader.next();
                (4, 16, 0x0010_FFFF)
            }
            c if c == 'U' as i32 => {
                self.reader.next();
                (8, 16, 0x0010_FFFF)
            }
            EOF_RUNE => {
                self.error(start, "escape sequence not terminated");
                return;
            }
            _ => {
                self.error(start, "unknown escape sequence");
                self.reader.next();
                return;
            }
        };

        let mut value: u32 = 0;
        let mut n = digits;
        while n > 0 {
            let d = digit_value(self.reader.ch);
            if d >= base {
                if self.reader.ch == EOF_RUNE {
                    self.error(start, "escape sequence not terminated");
                } else {
                    self.error(self.reader.offset, "illegal character in escape sequence");
                }
                return;
            }
            value = value * base + d;
            self.reader.next();
            n -= 1;
        }

        if value > max || (0xD800..=0xDFFF).contains(&value) {
            self.error(start, "escape sequence is invalid Unicode code point");
        }
    }

    fn scan_raw_string(&mut self) -> Token {
        let start = self.reader.offset;
        self.reader.next(); // opening backtick
        loop {
            match self.reader.ch {
                EOF_RUNE => {
                    self.error(start, "raw string literal not terminated");
                    break;
                }
                c if c == '`' as i32 => {
                    self.reader.next();
                    break;
                }
                _ => self.reader.next(),
            }
        }
        self.token_at(TokenKind::RawString, start)
    }

    // A heredoc opens with three or more backticks and closes with a run
    // of backticks of at least the same length.
    fn scan_heredoc(&mut self) -> Token {
        let start = self.reader.offset;
        let mut open = 0usize;
        while self.reader.ch == '`' as i32 {
            open += 1;
            self.reader.next();
        }
        let mut run = 0usize;
        loop {
            if self.reader.ch == EOF_RUNE {
                self.error(start, "heredoc literal not terminated");
                break;
            }
            if self.reader.ch == '`' as i32 {
                run += 1;
                self.reader.next();
                if run == open {
                    break;
                }
            } else {
                run = 0;
                self.reader.next();
            }
        }
        self.token_at(TokenKind::RawHeredoc, start)
    }

    fn scan_comment(&mut self) -> Token {
        let start = self.reader.offset;
        self.reader.next(); // '/'
        if self.reader.ch == '/' as i32 {
            while self.reader.ch != EOF_RUNE && self.reader.ch != '\n' as i32 {
                self.reader.next();
            }
        } else {
            // Block comment, balanced once.
            self.reader.next(); // '*'
            let mut terminated = false;
            while self.reader.ch != EOF_RUNE {
                if self.reader.ch == '*' as i32 && self.reader.peek() == '/' as i32 {
                    self.reader.next();
                    self.reader.next();
                    terminated = true;
                    break;
                }
                self.reader.next();
            }
            if !terminated {
                self.error(start, "comment not terminated");
            }
        }
        self.token_at(TokenKind::Comment, start)
    }

    // `.` produces a file-context or callee literal only where the
    // previous token cannot end an expression; after an expression it is
    // always the selector operator.
    fn scan_dot(&mut self) -> Token {
        let start = self.reader.offset;
        if !self.last_kind.insert_semi_after() {
            for (name, kind) in &[
                ("name", TokenKind::DotName),
                ("file", TokenKind::DotFile),
                ("callee", TokenKind::Callee),
                ("args", TokenKind::Args),
                ("namedArgs", TokenKind::NamedArgs),
            ] {
                let mut probe = String::with_capacity(name.len() + 1);
                probe.push('.');
                probe.push_str(name);
                if self.reader.at_str(&probe) && !self.ident_continues_after(probe.len()) {
                    self.consume_bytes(probe.len());
                    return self.token_at(*kind, start);
                }
            }
        }
        self.reader.next();
        if self.reader.ch == '.' as i32 && self.reader.peek() == '.' as i32 {
            self.reader.next();
            self.reader.next();
            return self.token_at(TokenKind::Ellipsis, start);
        }
        self.token_at(TokenKind::Period, start)
    }

    fn ident_continues_after(&self, len: usize) -> bool {
        match self.reader.file().src[self.reader.offset as usize + len..]
            .chars()
            .next()
        {
            Some(c) => is_ident_continue(c),
            None => false,
        }
    }

    fn scan_operator(&mut self) -> Token {
        use self::TokenKind::*;
        let start = self.reader.offset;
        let c = std::char::from_u32(self.reader.ch as u32).unwrap_or('\u{fffd}');
        self.reader.next();

        let kind = match c {
            '+' => self.switch3(Add, AddAssign, '+', Inc),
            '-' => self.switch3(Sub, SubAssign, '-', Dec),
            '*' => self.switch2(Mul, MulAssign),
            '/' => self.switch2(Quo, QuoAssign),
            '%' => self.switch2(Rem, RemAssign),
            '^' => self.switch2(Xor, XorAssign),
            '<' => {
                if self.reader.ch == '<' as i32 {
                    self.reader.next();
                    self.switch2(Shl, ShlAssign)
                } else {
                    self.switch2(Less, LessEq)
                }
            }
            '>' => {
                if self.reader.ch == '>' as i32 {
                    self.reader.next();
                    self.switch2(Shr, ShrAssign)
                } else {
                    self.switch2(Greater, GreaterEq)
                }
            }
            '=' => {
                if self.reader.ch == '=' as i32 {
                    self.reader.next();
                    Equal
                } else if self.reader.ch == '>' as i32 {
                    self.reader.next();
                    Lambda
                } else {
                    Assign
                }
            }
            '!' => self.switch2(Not, NotEqual),
            ':' => self.switch2(Colon, Define),
            '&' => {
                if self.reader.ch == '&' as i32 {
                    self.reader.next();
                    LAnd
                } else if self.reader.ch == '^' as i32 {
                    self.reader.next();
                    self.switch2(AndNot, AndNotAssign)
                } else {
                    self.switch2(And, AndAssign)
                }
            }
            '|' => {
                if self.reader.ch == '|' as i32 {
                    self.reader.next();
                    self.switch2(LOr, LOrAssign)
                } else {
                    self.switch2(Or, OrAssign)
                }
            }
            '?' => {
                if self.reader.ch == '?' as i32 {
                    self.reader.next();
                    self.switch2(NullishCoalesce, NullishAssign)
                } else if self.reader.ch == '.' as i32 {
                    self.reader.next();
                    NullishSelector
                } else {
                    Question
                }
            }
            '(' => {
                self.depth += 1;
                LParen
            }
            ')' => {
                self.depth -= 1;
                RParen
            }
            '[' => {
                self.depth += 1;
                LBrack
            }
            ']' => {
                self.depth -= 1;
                RBrack
            }
            '{' => {
                self.depth += 1;
                LBrace
            }
            '}' => {
                self.depth -= 1;
                RBrace
            }
            ',' => Comma,
            ';' => Semicolon,
            '$' => Template,
            _ => {
                self.error(start, &format!("illegal character {:?}", c));
                Illegal
            }
        };
        if self.depth < 0 {
            self.depth = 0;
        }
        self.token_at(kind, start)
    }

    fn switch2(&mut self, tok0: TokenKind, tok1: TokenKind) -> TokenKind {
        if self.reader.ch == '=' as i32 {
            self.reader.next();
            tok1
        } else {
            tok0
        }
    }

    fn switch3(&mut self, tok0: TokenKind, tok1: TokenKind, ch2: char, tok2: TokenKind) -> TokenKind {
        if self.reader.ch == '=' as i32 {
            self.reader.next();
            tok1
        } else if self.reader.ch == ch2 as i32 {
            self.reader.next();
            tok2
        } else {
            tok0
        }
    }
}

pub fn is_ident_start(c: char) -> bool {
    c == '_' || UnicodeXID::is_xid_start(c)
}

pub fn is_ident_continue(c: char) -> bool {
    c == '_' || UnicodeXID::is_xid_continue(c)
}

fn digit_value(ch: i32) -> u32 {
    match std::char::from_u32(ch as u32) {
        Some(c) => c.to_digit(16).unwrap_or(36),
        None => 36,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::token::TokenKind::*;
    use gad_pos::Pos;

    fn scan_all(src: &str, mode: ScanMode) -> (Vec<Token>, ErrorList) {
        let file = Rc::new(SourceFile::new("test".to_string(), Pos(1), src.to_string()));
        let errors = Rc::new(RefCell::new(ErrorList::new()));
        let mut s = Scanner::new(file, errors.clone(), mode);
        let mut toks = Vec::new();
        loop {
            let tok = s.next_token();
            let done = tok.kind == Eof;
            toks.push(tok);
            if done {
                break;
            }
        }
        let errs = errors.borrow().clone();
        (toks, errs)
    }

    fn kinds(src: &str, mode: ScanMode) -> Vec<TokenKind> {
        let (toks, errs) = scan_all(src, mode);
        assert!(errs.is_empty(), "unexpected errors: {}", errs);
        toks.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn operators_and_literals() {
        assert_eq!(
            kinds("a + 2 * 3", ScanMode::empty()),
            vec![Ident, Add, Int, Mul, Int, Eof]
        );
        assert_eq!(
            kinds("x ??= y ?? z?.w", ScanMode::empty()),
            vec![Ident, NullishAssign, Ident, NullishCoalesce, Ident, NullishSelector, Ident, Eof]
        );
        assert_eq!(
            kinds("a &^= b << 2u", ScanMode::empty()),
            vec![Ident, AndNotAssign, Ident, Shl, Uint, Eof]
        );
        assert_eq!(
            kinds("(a, b) => a", ScanMode::empty()),
            vec![LParen, Ident, Comma, Ident, RParen, Lambda, Ident, Eof]
        );
    }

    #[test]
    fn numbers() {
        let (toks, errs) = scan_all("1 23u 4.5 6d 7.8d 0x1f 0b101 0o17 1e9 2.5e-3", ScanMode::empty());
        assert!(errs.is_empty(), "{}", errs);
        let got: Vec<_> = toks.iter().map(|t| (t.kind, t.literal.as_str())).collect();
        assert_eq!(
            got,
            vec![
                (Int, "1"),
                (Uint, "23u"),
                (Float, "4.5"),
                (Decimal, "6d"),
                (Decimal, "7.8d"),
                (Int, "0x1f"),
                (Int, "0b101"),
                (Int, "0o17"),
                (Float, "1e9"),
                (Float, "2.5e-3"),
                (Eof, ""),
            ]
        );
    }

    #[test]
    fn bad_numbers_diagnose() {
        let (_, errs) = scan_all("0x", ScanMode::empty());
        assert_eq!(errs.len(), 1);
        assert!(errs.errors()[0].msg.contains("hexadecimal"));

        let (_, errs) = scan_all("1e+", ScanMode::empty());
        assert!(errs.errors()[0].msg.contains("exponent"));
    }

    #[test]
    fn strings_chars_and_raw_forms() {
        let src = r#""hi\n" 'x' 'é' `raw` "#;
        let (toks, errs) = scan_all(src, ScanMode::empty());
        assert!(errs.is_empty(), "{}", errs);
        let got: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(got, vec![String, Char, Char, RawString, Eof]);

        let (toks, errs) = scan_all("```one\ntwo```", ScanMode::empty());
        assert!(errs.is_empty(), "{}", errs);
        assert_eq!(toks[0].kind, RawHeredoc);
        assert_eq!(toks[0].literal, "```one\ntwo```");
    }

    #[test]
    fn bad_escapes_diagnose() {
        let (_, errs) = scan_all(r#""\q""#, ScanMode::empty());
        assert!(errs.errors()[0].msg.contains("unknown escape"));

        let (_, errs) = scan_all(r#""\ud800""#, ScanMode::empty());
        assert!(errs.errors()[0].msg.contains("Unicode"));

        let (_, errs) = scan_all("\"abc", ScanMode::empty());
        assert!(errs.errors()[0].msg.contains("not terminated"));
    }

    #[test]
    fn semicolon_insertion() {
        let (toks, _) = scan_all("a\nb", ScanMode::empty());
        let got: Vec<_> = toks.iter().map(|t| (t.kind, t.literal.as_str())).collect();
        assert_eq!(
            got,
            vec![(Ident, "a"), (Semicolon, "\n"), (Ident, "b"), (Eof, "")]
        );

        // No insertion after an operator.
        assert_eq!(kinds("a +\nb", ScanMode::empty()), vec![Ident, Add, Ident, Eof]);

        // Explicit semicolons keep their literal.
        let (toks, _) = scan_all("a;b", ScanMode::empty());
        assert_eq!(toks[1].literal, ";");
    }

    #[test]
    fn comments() {
        // Discarded by default.
        assert_eq!(
            kinds("a // hi\nb /* x\ny */ c", ScanMode::empty()),
            vec![Ident, Semicolon, Ident, Ident, Eof]
        );
        // Kept when asked for.
        let got = kinds("a // hi\n", ScanMode::SCAN_COMMENTS);
        assert_eq!(got, vec![Ident, Comment, Semicolon, Eof]);
    }

    #[test]
    fn dot_literals_only_in_operand_position() {
        assert_eq!(kinds(".name", ScanMode::empty()), vec![DotName, Eof]);
        assert_eq!(kinds("x = .file", ScanMode::empty()), vec![Ident, Assign, DotFile, Eof]);
        assert_eq!(
            kinds(".callee .args .namedArgs", ScanMode::empty()),
            vec![Callee, Args, NamedArgs, Eof]
        );
        // After an expression the dot is a selector.
        assert_eq!(kinds("x.name", ScanMode::empty()), vec![Ident, Period, Ident, Eof]);
        // `.named` is not `.name`.
        assert_eq!(kinds(".named", ScanMode::empty()), vec![Period, Ident, Eof]);
    }

    #[test]
    fn word_literals() {
        assert_eq!(
            kinds("true false yes no nil STDIN STDOUT STDERR is_module", ScanMode::empty()),
            vec![True, False, Yes, No, Nil, StdIn, StdOut, StdErr, IsModule, Eof]
        );
    }

    #[test]
    fn mixed_text_and_regions() {
        let (toks, errs) = scan_all("hello {% if x %}world{% end %}!", ScanMode::MIXED);
        assert!(errs.is_empty(), "{}", errs);
        let got: Vec<_> = toks.iter().map(|t| (t.kind, t.literal.as_str())).collect();
        assert_eq!(
            got,
            vec![
                (MixedText, "hello "),
                (MixedCodeStart, "{%"),
                (If, "if"),
                (Ident, "x"),
                (MixedCodeEnd, "%}"),
                (MixedText, "world"),
                (MixedCodeStart, "{%"),
                (End, "end"),
                (MixedCodeEnd, "%}"),
                (MixedText, "!"),
                (Eof, ""),
            ]
        );
    }

    #[test]
    fn mixed_value_interpolation() {
        let (toks, errs) = scan_all("a{{ x + 1 }}b", ScanMode::MIXED);
        assert!(errs.is_empty(), "{}", errs);
        let got: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            got,
            vec![MixedText, MixedValueStart, Ident, Add, Int, MixedValueEnd, MixedText, Eof]
        );

        // The `{{= ... =}}` alias scans identically.
        let got = kinds("a{{= x =}}b", ScanMode::MIXED);
        assert_eq!(
            got,
            vec![MixedText, MixedValueStart, Ident, MixedValueEnd, MixedText, Eof]
        );
    }

    #[test]
    fn trim_variants_mark_text_tokens() {
        let (toks, _) = scan_all("a  {%- x -%}  b", ScanMode::MIXED);
        assert_eq!(toks[0].kind, MixedText);
        assert!(toks[0].data.trim_right);
        assert!(!toks[0].data.trim_left);

        assert_eq!(toks[1].kind, MixedCodeStart);
        assert!(toks[1].data.trim_left);

        let end = toks.iter().find(|t| t.kind == MixedCodeEnd).unwrap();
        assert!(end.data.trim_right);

        let tail = toks.iter().rev().find(|t| t.kind == MixedText).unwrap();
        assert!(tail.data.trim_left);
    }

    #[test]
    fn region_end_ignored_at_depth() {
        let got = kinds("a{{ m[\"}}\"] }}b", ScanMode::MIXED);
        assert_eq!(
            got,
            vec![
                MixedText,
                MixedValueStart,
                Ident,
                LBrack,
                String,
                RBrack,
                MixedValueEnd,
                MixedText,
                Eof
            ]
        );
    }

    #[test]
    fn config_preamble_tokens() {
        let (toks, errs) = scan_all("# gad: mixed, writer\nx", ScanMode::empty());
        assert!(errs.is_empty(), "{}", errs);
        let got: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            got,
            vec![ConfigStart, Ident, Comma, Ident, ConfigEnd, Ident, Eof]
        );
    }

    #[test]
    fn config_disabled() {
        // `#` is not part of the language outside the preamble.
        let (toks, errs) = scan_all("# gad: mixed\n", ScanMode::CONFIG_DISABLED);
        assert_eq!(toks[0].kind, Illegal);
        assert!(!errs.is_empty());
    }

    #[test]
    fn mode_switch_mid_scan() {
        let file = Rc::new(SourceFile::new(
            "t".to_string(),
            Pos(1),
            "# gad: mixed\nhi {% x %}".to_string(),
        ));
        let errors = Rc::new(RefCell::new(ErrorList::new()));
        let mut s = Scanner::new(file, errors, ScanMode::empty());

        assert_eq!(s.next_token().kind, ConfigStart);
        assert_eq!(s.next_token().kind, Ident); // mixed
        assert_eq!(s.next_token().kind, ConfigEnd);
        // The parser reacts to the config by enabling mixed mode before
        // pulling the next token.
        s.set_mode(ScanMode::MIXED);
        let tok = s.next_token();
        assert_eq!((tok.kind, tok.literal.as_str()), (MixedText, "hi "));
        assert_eq!(s.next_token().kind, MixedCodeStart);
        assert_eq!(s.next_token().kind, Ident);
        assert_eq!(s.next_token().kind, MixedCodeEnd);
        assert_eq!(s.next_token().kind, Eof);
    }

    #[test]
    fn custom_delimiters() {
        let file = Rc::new(SourceFile::new(
            "t".to_string(),
            Pos(1),
            "a<? x ?>b".to_string(),
        ));
        let errors = Rc::new(RefCell::new(ErrorList::new()));
        let mut s = Scanner::new(file, errors, ScanMode::MIXED);
        s.set_code_delims(DelimPair::new("<?", "?>"));
        let mut got = Vec::new();
        loop {
            let t = s.next_token();
            let done = t.kind == Eof;
            got.push(t.kind);
            if done {
                break;
            }
        }
        assert_eq!(
            got,
            vec![MixedText, MixedCodeStart, Ident, MixedCodeEnd, MixedText, Eof]
        );
    }
}
