//! Path normalization for target-file matching.
//!
//! The upstream preprocessor that feeds us `#line` directives may emit
//! either slash convention depending on the host toolchain. We normalize
//! to forward slashes before ever comparing a path against the target
//! list, and do not assume any particular quoting beyond that single rule
//! (see the "MSVC path normalization" open question).

/// Replace every `\` with `/`. Does not touch case or do any other
/// canonicalization (no `..` resolution, no symlink following) - the
/// target list and the `#line` payloads are compared as plain strings
/// after this one substitution.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_backslashes() {
        assert_eq!(normalize_path(r"C:\src\foo.h"), "C:/src/foo.h");
    }

    #[test]
    fn leaves_forward_slashes_alone() {
        assert_eq!(normalize_path("/src/foo.h"), "/src/foo.h");
    }

    #[test]
    fn mixed_separators_all_convert() {
        assert_eq!(normalize_path(r"a\b/c\d"), "a/b/c/d");
    }
}
