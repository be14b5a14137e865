//! Diagnostics for the gad parser
//!
//! Parsing never aborts on the first problem; the scanner and parser append
//! `Error` records to a shared `ErrorList` and keep going. The list sorts
//! lexicographically by decoded position so diagnostics are deterministic
//! regardless of the order recovery produced them in.

#![deny(warnings)]

use std::fmt;
use std::io::{self, Write};
use std::slice;

use serde::{Deserialize, Serialize};

use gad_pos::FilePos;

// _____________________________________________________________________________
// Error
//

/// A single diagnostic: a decoded source position and a message.
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Error {
    pub pos: FilePos,
    pub msg: String,
}

impl Error {
    pub fn new(pos: FilePos, msg: String) -> Error {
        Error { pos, msg }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.pos.is_valid() || !self.pos.filename.is_empty() {
            write!(f, "Parse Error: {}\n\tat {}", self.msg, self.pos)
        } else {
            write!(f, "Parse Error: {}", self.msg)
        }
    }
}

impl std::error::Error for Error {}

// _____________________________________________________________________________
// ErrorList
//

/// An ordered collection of diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorList {
    list: Vec<Error>,
}

impl ErrorList {
    pub fn new() -> ErrorList {
        ErrorList::default()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Appends a diagnostic. An error on the same file and line as the
    /// previously added one is discarded: the first error on a line is
    /// usually the informative one and the rest are cascades.
    pub fn add(&mut self, pos: FilePos, msg: String) {
        if let Some(last) = self.list.last() {
            if last.pos.filename == pos.filename && last.pos.line == pos.line {
                return;
            }
        }
        self.list.push(Error::new(pos, msg));
    }

    /// Appends a diagnostic unconditionally, bypassing same-line
    /// suppression.
    pub fn add_forced(&mut self, pos: FilePos, msg: String) {
        self.list.push(Error::new(pos, msg));
    }

    /// Sorts by (filename, line, column, message).
    pub fn sort(&mut self) {
        self.list
            .sort_by(|a, b| a.pos.cmp(&b.pos).then_with(|| a.msg.cmp(&b.msg)));
    }

    pub fn errors(&self) -> &[Error] {
        &self.list
    }

    pub fn iter(&self) -> slice::Iter<'_, Error> {
        self.list.iter()
    }

    /// Truncates the list to at most `n` entries.
    pub fn truncate(&mut self, n: usize) {
        self.list.truncate(n);
    }

    /// Returns the combined error message: the first error, plus a count of
    /// the remaining ones. `None` when the list is empty.
    pub fn err(&self) -> Option<String> {
        match self.list.len() {
            0 => None,
            1 => Some(self.list[0].to_string()),
            n => Some(format!(
                "{}\n\t(and {} more errors)",
                self.list[0],
                n - 1
            )),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.err() {
            Some(msg) => f.write_str(&msg),
            None => f.write_str("no errors"),
        }
    }
}

impl IntoIterator for ErrorList {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.list.into_iter()
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a Error;
    type IntoIter = slice::Iter<'a, Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.list.iter()
    }
}

// _____________________________________________________________________________
// Emitters
//

/// Something that can render diagnostics for a human.
pub trait Emitter {
    fn emit(&mut self, err: &Error);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorConfig {
    Auto,
    Always,
    Never,
}

impl ColorConfig {
    fn use_color(self) -> bool {
        match self {
            ColorConfig::Always => true,
            ColorConfig::Never => false,
            ColorConfig::Auto => stderr_isatty(),
        }
    }
}

/// Writes diagnostics to a terminal or any `Write` sink, coloring the
/// `Parse Error` heading when the destination supports it.
pub struct EmitterWriter {
    dst: Destination,
}

enum Destination {
    Terminal(Box<term::StderrTerminal>),
    Raw(Box<dyn Write + Send>),
}

impl EmitterWriter {
    pub fn stderr(color_config: ColorConfig) -> EmitterWriter {
        if color_config.use_color() {
            if let Some(t) = term::stderr() {
                return EmitterWriter {
                    dst: Destination::Terminal(t),
                };
            }
        }
        EmitterWriter {
            dst: Destination::Raw(Box::new(io::stderr())),
        }
    }

    pub fn new(dst: Box<dyn Write + Send>) -> EmitterWriter {
        EmitterWriter {
            dst: Destination::Raw(dst),
        }
    }

    fn emit_inner(&mut self, err: &Error) -> io::Result<()> {
        match self.dst {
            Destination::Terminal(ref mut t) => {
                let _ = t.attr(term::Attr::Bold);
                let _ = t.fg(term::color::RED);
                write!(t, "Parse Error")?;
                let _ = t.reset();
                write!(t, ": {}", err.msg)?;
                if err.pos.is_valid() || !err.pos.filename.is_empty() {
                    write!(t, "\n\tat ")?;
                    let _ = t.fg(term::color::CYAN);
                    write!(t, "{}", err.pos)?;
                    let _ = t.reset();
                }
                writeln!(t)
            }
            Destination::Raw(ref mut w) => writeln!(w, "{}", err),
        }
    }
}

impl Emitter for EmitterWriter {
    fn emit(&mut self, err: &Error) {
        if let Err(e) = self.emit_inner(err) {
            panic!("failed to emit error: {}", e);
        }
    }
}

#[cfg(unix)]
fn stderr_isatty() -> bool {
    unsafe { libc::isatty(libc::STDERR_FILENO) != 0 }
}

#[cfg(not(unix))]
fn stderr_isatty() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, b: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(b)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.lock().unwrap().flush()
        }
    }

    fn fp(file: &str, line: u32, col: u32) -> FilePos {
        FilePos {
            filename: file.to_string(),
            offset: 0,
            line,
            column: col,
        }
    }

    #[test]
    fn error_display() {
        let e = Error::new(fp("x.gad", 3, 7), "expected ')'".to_string());
        assert_eq!(e.to_string(), "Parse Error: expected ')'\n\tat x.gad:3:7");

        let e = Error::new(FilePos::default(), "boom".to_string());
        assert_eq!(e.to_string(), "Parse Error: boom");
    }

    #[test]
    fn same_line_suppression() {
        let mut list = ErrorList::new();
        list.add(fp("a", 1, 2), "first".to_string());
        list.add(fp("a", 1, 9), "cascade".to_string());
        list.add(fp("a", 2, 1), "second line".to_string());
        assert_eq!(list.len(), 2);
        assert_eq!(list.errors()[1].msg, "second line");
    }

    #[test]
    fn sort_is_lexicographic() {
        let mut list = ErrorList::new();
        list.add_forced(fp("b", 1, 1), "z".to_string());
        list.add_forced(fp("a", 2, 5), "m".to_string());
        list.add_forced(fp("a", 2, 1), "n".to_string());
        list.sort();
        let lines: Vec<_> = list.iter().map(|e| (e.pos.filename.clone(), e.pos.line, e.pos.column)).collect();
        assert_eq!(
            lines,
            vec![
                ("a".to_string(), 2, 1),
                ("a".to_string(), 2, 5),
                ("b".to_string(), 1, 1)
            ]
        );
    }

    #[test]
    fn combined_err() {
        let mut list = ErrorList::new();
        assert_eq!(list.err(), None);

        list.add(fp("a", 1, 1), "one".to_string());
        assert_eq!(list.err().unwrap(), "Parse Error: one\n\tat a:1:1");

        list.add(fp("a", 2, 1), "two".to_string());
        list.add(fp("a", 3, 1), "three".to_string());
        assert_eq!(
            list.err().unwrap(),
            "Parse Error: one\n\tat a:1:1\n\t(and 2 more errors)"
        );
    }

    #[test]
    fn raw_emitter_writes_plain_text() {
        let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
        {
            let mut w =
                EmitterWriter::new(Box::new(SharedBuf(buf.clone())) as Box<dyn Write + Send>);
            w.emit(&Error::new(fp("t", 1, 1), "bad".to_string()));
        }
        let s = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert_eq!(s, "Parse Error: bad\n\tat t:1:1\n");
    }
}
