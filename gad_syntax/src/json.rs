//! A JSON emitter for diagnostics, for consumption by tools that sit on
//! top of the parser (editors, build drivers). One JSON object per line.

use std::io::{self, Write};

use serde::Serialize;

use gad_errors::{Emitter, Error, ErrorList};

pub struct JsonEmitter {
    dst: Box<dyn Write + Send>,
    pretty: bool,
}

impl JsonEmitter {
    pub fn stderr(pretty: bool) -> JsonEmitter {
        JsonEmitter {
            dst: Box::new(io::stderr()),
            pretty,
        }
    }

    pub fn new(dst: Box<dyn Write + Send>, pretty: bool) -> JsonEmitter {
        JsonEmitter { dst, pretty }
    }

    /// Emits every entry of the list in order.
    pub fn emit_list(&mut self, errors: &ErrorList) {
        for err in errors {
            self.emit(err);
        }
    }
}

impl Emitter for JsonEmitter {
    fn emit(&mut self, err: &Error) {
        let data = Diagnostic::from_error(err);
        let result = if self.pretty {
            serde_json::to_writer_pretty(&mut self.dst, &data)
        } else {
            serde_json::to_writer(&mut self.dst, &data)
        }
        .and_then(|_| writeln!(&mut self.dst).map_err(serde_json::Error::io));
        if let Err(e) = result {
            panic!("failed to print diagnostics: {:?}", e);
        }
    }
}

/// The wire shape of one diagnostic.
#[derive(Serialize)]
struct Diagnostic<'a> {
    message: &'a str,
    filename: &'a str,
    line: u32,
    column: u32,
    offset: u32,
}

impl<'a> Diagnostic<'a> {
    fn from_error(err: &'a Error) -> Diagnostic<'a> {
        Diagnostic {
            message: &err.msg,
            filename: &err.pos.filename,
            line: err.pos.line,
            column: err.pos.column,
            offset: err.pos.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gad_pos::FilePos;
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

    #[test]
    fn line_delimited_output() {
        let mut list = ErrorList::new();
        list.add(
            FilePos {
                filename: "t.gad".to_string(),
                offset: 4,
                line: 1,
                column: 5,
            },
            "expected ')'".to_string(),
        );
        list.add(
            FilePos {
                filename: "t.gad".to_string(),
                offset: 9,
                line: 2,
                column: 1,
            },
            "expected operand, found newline".to_string(),
        );

        let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
        {
            let mut emitter = JsonEmitter::new(Box::new(SharedBuf(buf.clone())), false);
            emitter.emit_list(&list);
        }
        let out = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"message":"expected ')'","filename":"t.gad","line":1,"column":5,"offset":4}"#
        );
        assert!(lines[1].contains("\"line\":2"));
    }
}
