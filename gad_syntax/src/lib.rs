//! Scanner, parser and AST for the gad scripting and templating
//! language.
//!
//! The crate is the parser core only: given a source blob and a file
//! name it produces a concrete syntax tree with position information,
//! or a sorted list of diagnostics. Evaluation, compilation, module
//! resolution and the CLI live elsewhere and consume this crate.
//!
//! ```
//! use gad_syntax::fileset::FileSet;
//! use gad_syntax::parse::{parse_source, ParseMode};
//!
//! let fset = FileSet::new();
//! let (file, errors) = parse_source(&fset, "hello.gad", "1 + 2 * 3", ParseMode::empty());
//! assert!(errors.is_empty());
//! assert_eq!(file.to_string(), "(1 + (2 * 3))");
//! ```

pub use gad_errors as errors;
pub use gad_pos as pos;

pub mod ast;
pub mod fileset;
pub mod json;
pub mod parse;
pub mod visit;

pub use crate::ast::Node;
pub use crate::fileset::{FileLoader, FileSet, RealFileLoader};
pub use crate::parse::{parse_expr, parse_file, parse_source, ParseMode};
