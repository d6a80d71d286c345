//! Directory index and glob resolution over a build's input root.

use crate::error::BuildError;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Characters a glob wildcard may stand for. Never a path separator.
const WILDCARD_CLASS: &str = r"[\w\d._-]";

/// Marks a reference as relative to the input root.
pub const ANCHOR: &str = "./";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    File,
    Directory,
}

/// Every path under a root, taken once when the index is built.
#[derive(Debug, Clone)]
pub struct DirectoryIndex {
    root: PathBuf,
    entries: BTreeMap<PathBuf, EntryKind>,
}

impl DirectoryIndex {
    pub fn build(root: &Path) -> Result<Self, BuildError> {
        let mut entries = BTreeMap::new();
        if root.exists() {
            for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    BuildError::io(root, std::io::Error::new(std::io::ErrorKind::Other, e))
                })?;
                let kind = if entry.file_type().is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                entries.insert(entry.into_path(), kind);
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kind(&self, path: &Path) -> Option<EntryKind> {
        self.entries.get(path).copied()
    }

    /// Resolve a glob to matching paths.
    ///
    /// `./pattern` is anchored at the root. Any other pattern matches at any depth,
    /// starting at a path component boundary.
    pub fn search(&self, glob: &str) -> Result<BTreeMap<PathBuf, EntryKind>, BuildError> {
        let pattern = match glob.strip_prefix(ANCHOR) {
            Some(rest) => format!(
                "^{}/{}$",
                regex::escape(&self.root.to_string_lossy()),
                translate(rest)
            ),
            None => format!("^(?:.*/)?{}$", translate(glob)),
        };
        let re = Regex::new(&pattern)
            .map_err(|e| BuildError::InvalidData(format!("bad glob {:?}: {}", glob, e)))?;

        Ok(self
            .entries
            .iter()
            .filter(|(path, _)| re.is_match(&path.to_string_lossy()))
            .map(|(path, kind)| (path.clone(), *kind))
            .collect())
    }
}

fn translate(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    for ch in glob.chars() {
        match ch {
            '*' => {
                out.push_str(WILDCARD_CLASS);
                out.push('+');
            }
            '?' => out.push_str(WILDCARD_CLASS),
            _ => out.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4]))),
        }
    }
    out
}

pub fn is_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}
