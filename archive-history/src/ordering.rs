//! Chronological ordering of sibling records
//!
//! Comparator cascade:
//! 1. sort key descending (skipped when either key is 0)
//! 2. mtime descending
//! 3. name ascending, case-insensitive and numeric-aware
//!
//! [`OrderedList`] remembers the last rendered order and reports whether a
//! fresh listing actually moved anything.

use serde::Serialize;
use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

/// Anything that can be placed on the timeline
pub trait Chronological {
    fn sort_key(&self) -> u32;
    fn mtime(&self) -> i64;
    fn name(&self) -> &str;
}

pub fn compare<T: Chronological>(a: &T, b: &T) -> Ordering {
    let (ka, kb) = (a.sort_key(), b.sort_key());
    let by_key = if ka == 0 || kb == 0 {
        Ordering::Equal
    } else {
        kb.cmp(&ka)
    };

    by_key
        .then_with(|| b.mtime().cmp(&a.mtime()))
        .then_with(|| natural_cmp(a.name(), b.name()))
}

/// Stable in-place sort by [`compare`]
///
/// Mixing zero and non-zero keys makes the cascade intransitive, which
/// `slice::sort_by` may reject with a panic. A plain insertion sort accepts
/// any comparator; sibling counts are small.
pub fn sort<T: Chronological>(items: &mut [T]) {
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && compare(&items[j - 1], &items[j]) == Ordering::Greater {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
}

fn take_number(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Case-insensitive comparison treating digit runs as numbers
///
/// `"Visit 2" < "visit 10"`. Names that differ only in case or leading
/// zeros fall back to a plain byte comparison so the order stays total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ca = a.chars().peekable();
    let mut cb = b.chars().peekable();

    loop {
        match (ca.peek().copied(), cb.peek().copied()) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let na = take_number(&mut ca);
                let nb = take_number(&mut cb);
                match cmp_digit_runs(&na, &nb) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            (Some(x), Some(y)) => {
                let lx = x.to_lowercase();
                let ly = y.to_lowercase();
                match lx.cmp(ly) {
                    Ordering::Equal => {
                        ca.next();
                        cb.next();
                    }
                    other => return other,
                }
            }
        }
    }

    a.cmp(b)
}

/// Whether [`OrderedList::replace`] changed the rendered sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderOutcome {
    Unchanged,
    Reordered,
}

/// Last rendered order of one listing
#[derive(Debug, Clone)]
pub struct OrderedList<T> {
    items: Vec<T>,
}

impl<T> Default for OrderedList<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Chronological> OrderedList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort `fresh` and adopt it, reporting whether the name sequence moved
    ///
    /// Only positions are compared. A record whose contents changed but
    /// whose place did not counts as unchanged.
    pub fn replace(&mut self, mut fresh: Vec<T>) -> ReorderOutcome {
        sort(&mut fresh);

        let same_positions = self.items.len() == fresh.len()
            && self
                .items
                .iter()
                .zip(fresh.iter())
                .all(|(old, new)| old.name() == new.name());

        self.items = fresh;
        if same_positions {
            ReorderOutcome::Unchanged
        } else {
            ReorderOutcome::Reordered
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Item {
        key: u32,
        mtime: i64,
        name: &'static str,
    }

    impl Chronological for Item {
        fn sort_key(&self) -> u32 {
            self.key
        }
        fn mtime(&self) -> i64 {
            self.mtime
        }
        fn name(&self) -> &str {
            self.name
        }
    }

    fn item(key: u32, mtime: i64, name: &'static str) -> Item {
        Item { key, mtime, name }
    }

    fn names(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.name).collect()
    }

    #[test]
    fn test_newer_key_first() {
        let mut items = vec![item(20231231, 0, "old"), item(20240101, 0, "new")];
        sort(&mut items);
        assert_eq!(names(&items), vec!["new", "old"]);
    }

    #[test]
    fn test_equal_keys_fall_back_to_mtime() {
        let mut items = vec![item(20240101, 100, "a"), item(20240101, 200, "b")];
        sort(&mut items);
        assert_eq!(names(&items), vec!["b", "a"]);
    }

    #[test]
    fn test_unknown_key_defers_to_mtime() {
        // the dated record is older on disk, so it loses despite its key
        let mut items = vec![item(20240101, 100, "dated"), item(0, 500, "undated")];
        sort(&mut items);
        assert_eq!(names(&items), vec!["undated", "dated"]);
    }

    #[test]
    fn test_name_tiebreak_is_natural() {
        let mut items = vec![
            item(0, 0, "visit 10"),
            item(0, 0, "Visit 2"),
            item(0, 0, "visit 1"),
        ];
        sort(&mut items);
        assert_eq!(names(&items), vec!["visit 1", "Visit 2", "visit 10"]);
    }

    #[test]
    fn test_natural_cmp_edges() {
        assert_eq!(natural_cmp("abc", "ABC"), "abc".cmp("ABC"));
        assert_eq!(natural_cmp("a", "ab"), Ordering::Less);
        assert_eq!(natural_cmp("a02", "a2"), "a02".cmp("a2"));
        assert_eq!(natural_cmp("a9", "a10"), Ordering::Less);
    }

    #[test]
    fn test_replace_detects_reorder() {
        let mut list = OrderedList::new();
        assert_eq!(
            list.replace(vec![item(20200101, 0, "a"), item(20210101, 0, "b")]),
            ReorderOutcome::Reordered
        );
        assert_eq!(names(list.items()), vec!["b", "a"]);

        // same records in a different input order render identically
        assert_eq!(
            list.replace(vec![item(20200101, 0, "a"), item(20210101, 0, "b")]),
            ReorderOutcome::Unchanged
        );

        // appending the oldest record changes the sequence length
        assert_eq!(
            list.replace(vec![
                item(20200101, 0, "a"),
                item(20210101, 0, "b"),
                item(20190101, 0, "c"),
            ]),
            ReorderOutcome::Reordered
        );
        assert_eq!(list.len(), 3);
    }
}
