//! Byte-level cursor over one source file.
//!
//! The reader hands the scanner one Unicode scalar at a time, keeps the
//! file's line table up to date and offers limited lookahead. Newlines are
//! normalised here: the scanner never sees a bare `'\r'`, and a CRLF pair
//! collapses into a single `'\n'` of byte width two.

use std::cell::RefCell;
use std::rc::Rc;

use gad_errors::ErrorList;
use gad_pos::{Pos, SourceFile};

/// Sentinel rune marking the end of the source.
pub const EOF_RUNE: i32 = -1;

pub struct Reader {
    file: Rc<SourceFile>,
    src: Rc<String>,
    errors: Rc<RefCell<ErrorList>>,
    /// Current rune, or `EOF_RUNE` once the source is exhausted.
    pub ch: i32,
    /// Byte offset of the current rune.
    pub offset: u32,
    /// Byte offset of the rune after the current one.
    pub read_offset: u32,
    /// When set, a backslash immediately before a newline consumes both
    /// characters and the leading whitespace of the next line.
    pub escape_newline: bool,
}

impl Reader {
    pub fn new(file: Rc<SourceFile>, errors: Rc<RefCell<ErrorList>>) -> Reader {
        let src = file.src.clone();
        let mut r = Reader {
            file,
            src,
            errors,
            ch: EOF_RUNE,
            offset: 0,
            read_offset: 0,
            escape_newline: false,
        };
        // A byte order mark at offset 0 is skipped without comment; the
        // file set normally strips it before the file reaches us.
        if r.src.starts_with('\u{feff}') {
            r.read_offset = 3;
        }
        r.next();
        r
    }

    pub fn file(&self) -> &Rc<SourceFile> {
        &self.file
    }

    /// The `Pos` of the current rune.
    pub fn pos(&self) -> Pos {
        self.file.pos(self.offset)
    }

    pub fn error(&self, offset: u32, msg: &str) {
        let fp = self.file.position(self.file.pos(offset.min(self.file.size)));
        self.errors.borrow_mut().add(fp, msg.to_string());
    }

    /// Advances to the next rune.
    pub fn next(&mut self) {
        loop {
            if self.read_offset as usize >= self.src.len() {
                self.offset = self.src.len() as u32;
                self.ch = EOF_RUNE;
                return;
            }
            self.offset = self.read_offset;
            let rest = &self.src[self.read_offset as usize..];
            let mut c = rest.chars().next().unwrap();
            let mut width = c.len_utf8() as u32;

            if c == '\r' {
                // CRLF counts as one newline; bare CR becomes one too.
                if rest[1..].starts_with('\n') {
                    width += 1;
                }
                c = '\n';
            }

            if c == '\0' {
                self.error(self.offset, "illegal character NUL");
            } else if c == '\u{feff}' && self.offset > 0 {
                // Stray byte order marks are diagnosed and dropped.
                self.error(self.offset, "illegal byte order mark");
                self.read_offset += width;
                continue;
            }

            if self.escape_newline && c == '\\' {
                if let Some(nl_width) = self.newline_width(self.read_offset + width) {
                    self.read_offset += width;
                    self.file.add_line(self.read_offset + nl_width);
                    self.read_offset += nl_width;
                    while let Some(ws) = self.horizontal_space_at(self.read_offset) {
                        self.read_offset += ws;
                    }
                    continue;
                }
            }

            if c == '\n' {
                self.file.add_line(self.read_offset + width);
            }

            self.read_offset += width;
            self.ch = c as i32;
            return;
        }
    }

    fn newline_width(&self, offset: u32) -> Option<u32> {
        let rest = self.src.get(offset as usize..)?;
        if rest.starts_with("\r\n") {
            Some(2)
        } else if rest.starts_with('\n') || rest.starts_with('\r') {
            Some(1)
        } else {
            None
        }
    }

    fn horizontal_space_at(&self, offset: u32) -> Option<u32> {
        match self.src.get(offset as usize..).and_then(|s| s.chars().next()) {
            Some(' ') | Some('\t') => Some(1),
            _ => None,
        }
    }

    /// The rune after the current one, without advancing.
    pub fn peek(&self) -> i32 {
        self.peek_n(0)
    }

    /// The rune `n` positions after `peek()`, without advancing.
    pub fn peek_n(&self, n: usize) -> i32 {
        let rest = match self.src.get(self.read_offset as usize..) {
            Some(r) => r,
            None => return EOF_RUNE,
        };
        match rest.chars().map(normalize_cr).nth(n) {
            Some(c) => c as i32,
            None => EOF_RUNE,
        }
    }

    /// Reports whether the source at the current rune starts with `s`.
    pub fn at_str(&self, s: &str) -> bool {
        self.src[self.offset as usize..].starts_with(s)
    }

    /// Skips horizontal whitespace (and optionally newlines) ahead of the
    /// current rune, then compares the upcoming bytes against `s`. Never
    /// advances the cursor.
    pub fn peek_no_space_eq(&self, s: &str, skip_newline: bool) -> bool {
        let mut off = self.offset as usize;
        let bytes = self.src.as_bytes();
        while off < bytes.len() {
            match bytes[off] {
                b' ' | b'\t' => off += 1,
                b'\n' | b'\r' if skip_newline => off += 1,
                _ => break,
            }
        }
        self.src[off..].starts_with(s)
    }

    /// Reports whether the source at the current rune is exactly the
    /// identifier `s` (i.e. followed by a non-identifier rune).
    pub fn peek_ident_eq(&self, s: &str) -> bool {
        if !self.at_str(s) {
            return false;
        }
        match self.src[self.offset as usize + s.len()..].chars().next() {
            Some(c) => !crate::parse::lexer::is_ident_continue(c),
            None => true,
        }
    }

    /// Skips spaces and tabs (and newlines when `newline_too` is set).
    pub fn skip_whitespace(&mut self, newline_too: bool) {
        while self.ch == ' ' as i32
            || self.ch == '\t' as i32
            || (newline_too && self.ch == '\n' as i32)
        {
            self.next();
        }
    }
}

fn normalize_cr(c: char) -> char {
    if c == '\r' {
        '\n'
    } else {
        c
    }
}
