//! Query field name mangling (§4.2.4). Both passes call the same
//! functions so that the scan pass's recorded field name always equals
//! the name the emit pass later references.

use crate::macros::{QueryKind, QueryMode};

fn mode_word(mode: QueryMode) -> &'static str {
    match mode {
        QueryMode::Read => "read",
        QueryMode::Write => "write",
        QueryMode::Update => "update",
        QueryMode::Delete => "delete",
        QueryMode::Insert => "insert",
        QueryMode::Fetch => "fetch",
    }
}

fn mangle_path(path: &str) -> String {
    path.replace('.', "__")
}

/// `read__T` / `write__T`, and the indexed/sequence/event equivalents -
/// every `(name, type)` query shares this shape. The mode word always
/// leads; `IndexedInsert`'s mode is always `Insert` so it has nothing
/// to disambiguate and drops the mode word entirely (`insert__T`, not
/// `insert_insert__T`).
pub fn plain(kind: QueryKind, mode: QueryMode, type_name: &str) -> String {
    match kind {
        QueryKind::Singleton | QueryKind::Event => format!("{}__{type_name}", mode_word(mode)),
        QueryKind::IndexedInsert => format!("insert__{type_name}"),
        QueryKind::Sequence => format!("{}_sequence__{type_name}", mode_word(mode)),
        _ => unreachable!("plain() only applies to NameType-shaped macros"),
    }
}

/// `read_value__T__a__b__c` - value and interval queries (before the
/// interval bounds are appended, which the caller does separately since
/// the scanned query key doesn't carry bound expressions).
pub fn value(kind: QueryKind, mode: QueryMode, type_name: &str, path: &str) -> String {
    let family = match kind {
        QueryKind::Value => "value",
        QueryKind::IntervalAsc => "interval_asc",
        QueryKind::IntervalDesc => "interval_desc",
        _ => unreachable!("value() only applies to path-shaped macros"),
    };
    format!("{}_{family}__{type_name}__{}", mode_word(mode), mangle_path(path))
}

/// `read_signal__T__a__b__42` - signal adds the literal as a suffix.
pub fn signal(mode: QueryMode, type_name: &str, path: &str, literal: &str) -> String {
    format!("{}_signal__{type_name}__{}__{literal}", mode_word(mode), mangle_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_mangling() {
        assert_eq!(plain(QueryKind::Singleton, QueryMode::Read, "TypeA"), "read__TypeA");
        assert_eq!(plain(QueryKind::Singleton, QueryMode::Write, "TypeB"), "write__TypeB");
    }

    #[test]
    fn sequence_mangling_puts_the_mode_word_first() {
        assert_eq!(plain(QueryKind::Sequence, QueryMode::Read, "T"), "read_sequence__T");
        assert_eq!(plain(QueryKind::Sequence, QueryMode::Write, "T"), "write_sequence__T");
    }

    #[test]
    fn indexed_insert_mangling_drops_the_redundant_mode_word() {
        assert_eq!(plain(QueryKind::IndexedInsert, QueryMode::Insert, "T"), "insert__T");
    }

    #[test]
    fn event_mangling_has_no_event_prefix() {
        assert_eq!(plain(QueryKind::Event, QueryMode::Insert, "T"), "insert__T");
        assert_eq!(plain(QueryKind::Event, QueryMode::Fetch, "T"), "fetch__T");
    }

    #[test]
    fn value_mangling_puts_the_mode_word_first_and_replaces_dots() {
        assert_eq!(value(QueryKind::Value, QueryMode::Read, "Widget", "owner.id"), "read_value__Widget__owner__id");
    }

    #[test]
    fn signal_mangling_puts_the_mode_word_first_and_appends_the_literal() {
        assert_eq!(signal(QueryMode::Read, "Widget", "flags.active", "1"), "read_signal__Widget__flags__active__1");
    }

    #[test]
    fn interval_mangling_distinguishes_direction() {
        let asc = value(QueryKind::IntervalAsc, QueryMode::Read, "T", "k");
        let desc = value(QueryKind::IntervalDesc, QueryMode::Read, "T", "k");
        assert_ne!(asc, desc);
    }
}
