//! The FileSet tracks all the source code parsed into one position space,
//! mapping from integer positions to the original source location. Each
//! source added to the set covers a contiguous range of positions and is
//! represented by a `SourceFile`; ranges never overlap, so a `Pos` stored in
//! the AST identifies both the file and the byte within it. Upon request a
//! position converts to file/line/column information.

use std::cell::{Ref, RefCell};
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use gad_pos::{FileName, FilePos, Pos, SourceFile};

/// An abstraction over the fs operations used by the parser.
pub trait FileLoader {
    /// Query the existence of a file.
    fn file_exists(&self, path: &Path) -> bool;

    /// Return an absolute path to a file, if possible.
    fn abs_path(&self, path: &Path) -> Option<PathBuf>;

    /// Read the contents of an UTF-8 file into memory.
    fn read_file(&self, path: &Path) -> io::Result<String>;
}

/// A FileLoader that uses std::fs to load real files.
pub struct RealFileLoader;

impl FileLoader for RealFileLoader {
    fn file_exists(&self, path: &Path) -> bool {
        fs::metadata(path).is_ok()
    }

    fn abs_path(&self, path: &Path) -> Option<PathBuf> {
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            env::current_dir().ok().map(|cwd| cwd.join(path))
        }
    }

    fn read_file(&self, path: &Path) -> io::Result<String> {
        let mut src = String::new();
        fs::File::open(path)?.read_to_string(&mut src)?;
        Ok(src)
    }
}

// _____________________________________________________________________________
// FileSet
//

pub struct FileSet {
    files: RefCell<Vec<Rc<SourceFile>>>,
    file_loader: Box<dyn FileLoader>,
}

impl FileSet {
    pub fn new() -> FileSet {
        FileSet {
            files: RefCell::new(Vec::new()),
            file_loader: Box::new(RealFileLoader),
        }
    }

    pub fn with_file_loader(file_loader: Box<dyn FileLoader>) -> FileSet {
        FileSet {
            files: RefCell::new(Vec::new()),
            file_loader,
        }
    }

    pub fn files(&self) -> Ref<'_, Vec<Rc<SourceFile>>> {
        self.files.borrow()
    }

    pub fn file_exists(&self, path: &Path) -> bool {
        self.file_loader.file_exists(path)
    }

    fn next_base(&self) -> u32 {
        let files = self.files.borrow();
        match files.last() {
            // Position 0 is reserved for NO_POS.
            None => 1,
            // Add one so there is some space between files. This lets us
            // distinguish positions in the set even in the presence of
            // zero-length files.
            Some(last) => last.base.0 + last.size + 1,
        }
    }

    /// Adds a new source to the set, allocating its position range. A
    /// leading UTF-8 byte order mark is removed before the file is sized.
    pub fn add_file(&self, name: FileName, mut src: String) -> Rc<SourceFile> {
        if src.starts_with('\u{feff}') {
            src.drain(..3);
        }

        let base = self.next_base();
        let file = Rc::new(SourceFile::new(name, Pos(base), src));
        self.files.borrow_mut().push(file.clone());
        file
    }

    /// Reads the file at `path` through the configured loader and adds it
    /// to the set.
    pub fn load_file(&self, path: &Path) -> io::Result<Rc<SourceFile>> {
        let src = self.file_loader.read_file(path)?;
        Ok(self.add_file(path.to_string_lossy().into_owned(), src))
    }

    /// Finds the file containing `pos` by binary search on file bases.
    pub fn file(&self, pos: Pos) -> Option<Rc<SourceFile>> {
        if !pos.is_valid() {
            return None;
        }
        let files = self.files.borrow();
        let idx = match files.binary_search_by(|f| f.base.cmp(&pos)) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let f = &files[idx];
        debug!("pos {} resolved to file {} (base {})", pos, f.name, f.base);
        if f.contains(pos) {
            Some(f.clone())
        } else {
            None
        }
    }

    /// Decodes `pos` into file/line/column information. Positions outside
    /// any file decode to the invalid `FilePos`.
    pub fn position(&self, pos: Pos) -> FilePos {
        match self.file(pos) {
            Some(f) => f.position(pos),
            None => FilePos::default(),
        }
    }
}

impl Default for FileSet {
    fn default() -> FileSet {
        FileSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bases_leave_gaps() {
        let set = FileSet::new();
        let a = set.add_file("a".to_string(), "12345".to_string());
        let b = set.add_file("b".to_string(), "".to_string());
        let c = set.add_file("c".to_string(), "xy".to_string());

        assert_eq!(a.base, Pos(1));
        assert_eq!(b.base, Pos(7));
        assert_eq!(c.base, Pos(8));
    }

    #[test]
    fn bom_is_stripped() {
        let set = FileSet::new();
        let f = set.add_file("bom".to_string(), "\u{feff}abc".to_string());
        assert_eq!(f.size, 3);
        assert_eq!(&*f.src, "abc");
    }

    #[test]
    fn lookup_crosses_files() {
        let set = FileSet::new();
        let a = set.add_file("a".to_string(), "one\ntwo".to_string());
        let b = set.add_file("b".to_string(), "three".to_string());
        a.add_line(4);

        let p = set.position(a.pos(5));
        assert_eq!((p.filename.as_str(), p.line, p.column), ("a", 2, 2));

        let p = set.position(b.pos(0));
        assert_eq!((p.filename.as_str(), p.line, p.column), ("b", 1, 1));

        assert!(set.file(Pos(1000)).is_none());
        assert!(set.file(gad_pos::NO_POS).is_none());
    }
}
