//! Target files: which declarations get reflected, and which input first
//! attributed them.

use crate::error::ReflectionError;
use kan_codegen_core::normalize_path;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// What an emitted declaration inside a target file is allowed to do.
/// Headers get `#include`d when we cross into them; object files get their
/// declarations copied verbatim into `declaration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Header,
    Object,
    Unknown,
}

impl TargetKind {
    fn from_path(path: &str) -> TargetKind {
        match path.rsplit('.').next() {
            Some("h") => TargetKind::Header,
            Some("c") => TargetKind::Object,
            _ => TargetKind::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetFile {
    pub path: String,
    pub kind: TargetKind,
    /// Which preprocessed input first observed this target. `None` until
    /// the parser attributes it; pins every later observation of the same
    /// path to this input so a target seen through two inputs is emitted
    /// only once.
    pub first_input_index: Option<usize>,
}

/// The set of files whose declarations participate in the product. Built
/// once from the target-list file and then mutated only to stamp
/// `first_input_index`.
#[derive(Debug, Default)]
pub struct TargetList {
    files: HashMap<String, TargetFile>,
}

impl TargetList {
    pub fn load(path: &Path) -> Result<Self, ReflectionError> {
        let text = fs::read_to_string(path)
            .map_err(|e| ReflectionError::TargetListLoad(format!("{}: {e}", path.display())))?;
        let mut files = HashMap::new();
        for raw_line in text.lines() {
            let trimmed = raw_line.trim_end_matches(|c: char| c.is_control());
            if trimmed.is_empty() {
                continue;
            }
            let normalized = normalize_path(trimmed);
            let kind = TargetKind::from_path(&normalized);
            files.insert(
                normalized.clone(),
                TargetFile {
                    path: normalized,
                    kind,
                    first_input_index: None,
                },
            );
        }
        if files.is_empty() {
            return Err(ReflectionError::TargetListLoad(format!(
                "{}: target list is empty",
                path.display()
            )));
        }
        Ok(TargetList { files })
    }

    pub fn get(&self, path: &str) -> Option<&TargetFile> {
        self.files.get(&normalize_path(path))
    }

    /// Attribute `path` to `input_index` if it hasn't already been claimed
    /// by an earlier input. Returns the kind so the parser can decide
    /// whether to emit an `#include`, and whether this observation should
    /// actually be attributed here (false if a different, earlier input
    /// already owns it).
    pub fn attribute(&mut self, path: &str, input_index: usize) -> Option<(TargetKind, bool)> {
        let normalized = normalize_path(path);
        let entry = self.files.get_mut(&normalized)?;
        match entry.first_input_index {
            None => {
                entry.first_input_index = Some(input_index);
                Some((entry.kind, true))
            }
            Some(owner) => Some((entry.kind, owner == input_index)),
        }
    }
}

/// `#include` directives already emitted, so the same header is never
/// included twice.
#[derive(Debug, Default)]
pub struct IncludedFiles(HashSet<String>);

impl IncludedFiles {
    pub fn new() -> Self {
        IncludedFiles::default()
    }

    /// Returns true if this is the first time `path` has been requested.
    pub fn insert(&mut self, path: &str) -> bool {
        self.0.insert(normalize_path(path))
    }
}

pub fn load_input_list(path: &Path) -> Result<Vec<String>, ReflectionError> {
    let text = fs::read_to_string(path)
        .map_err(|e| ReflectionError::InputListLoad(format!("{}: {e}", path.display())))?;
    let inputs: Vec<String> = text
        .lines()
        .map(|l| l.trim_end_matches(|c: char| c.is_control()))
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect();
    if inputs.is_empty() {
        return Err(ReflectionError::InputListLoad(format!(
            "{}: input list is empty",
            path.display()
        )));
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{contents}").unwrap();
        f
    }

    #[test]
    fn header_and_object_kinds_derive_from_extension() {
        let f = write_tmp("/a/foo.h\n/a/bar.c\n/a/baz\n");
        let list = TargetList::load(f.path()).unwrap();
        assert_eq!(list.get("/a/foo.h").unwrap().kind, TargetKind::Header);
        assert_eq!(list.get("/a/bar.c").unwrap().kind, TargetKind::Object);
        assert_eq!(list.get("/a/baz").unwrap().kind, TargetKind::Unknown);
    }

    #[test]
    fn first_input_wins_attribution() {
        let f = write_tmp("/a/foo.h\n");
        let mut list = TargetList::load(f.path()).unwrap();
        let first = list.attribute("/a/foo.h", 0).unwrap();
        assert_eq!(first, (TargetKind::Header, true));
        let second = list.attribute("/a/foo.h", 1).unwrap();
        assert_eq!(second, (TargetKind::Header, false));
    }

    #[test]
    fn backslash_paths_normalize_before_matching() {
        let f = write_tmp("C:\\src\\foo.h\n");
        let list = TargetList::load(f.path()).unwrap();
        assert!(list.get("C:/src/foo.h").is_some());
    }

    #[test]
    fn empty_target_list_is_an_error() {
        let f = write_tmp("\n\n");
        assert!(TargetList::load(f.path()).is_err());
    }
}
