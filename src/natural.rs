//! # Natural Order Comparison
//!
//! Orders strings the way a person reads them: embedded digit runs compare by
//! numeric value, so `track2` sorts before `track10`.
//!
//! ## Rules
//!
//! - Digit runs (leading spaces and zeros stripped) with more digits are greater.
//!   Runs of equal length compare digit by digit.
//! - Everything else compares case-insensitively.
//! - Only when two strings are equal ignoring case does a case-sensitive pass
//!   decide, and in that pass a lowercase letter sorts before its uppercase form.
//!
//! Both comparators are pure functions and safe to call from any thread.

use std::cmp::Ordering;
use std::path::{Component, Path};

/// Compares two strings in natural order.
///
/// ```
/// use std::cmp::Ordering;
/// use voice::natural::natural_cmp;
///
/// assert_eq!(natural_cmp("track2", "track10"), Ordering::Less);
/// assert_eq!(natural_cmp("Ab", "aC"), Ordering::Less);
/// ```
pub fn natural_cmp(left: &str, right: &str) -> Ordering {
    if left == right {
        return Ordering::Equal;
    }
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();
    compare_chars(&left, &right, false)
}

/// Compares two paths component by component using [`natural_cmp`].
///
/// When every shared component is equal, the path with fewer components sorts
/// after the longer one, so files nested in a sub-folder come before the files
/// next to that folder.
pub fn natural_path_cmp(left: &Path, right: &Path) -> Ordering {
    let left_parts: Vec<_> = left.components().map(component_str).collect();
    let right_parts: Vec<_> = right.components().map(component_str).collect();

    for (l, r) in left_parts.iter().zip(right_parts.iter()) {
        match natural_cmp(l, r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    right_parts.len().cmp(&left_parts.len())
}

fn component_str(component: Component<'_>) -> String {
    component.as_os_str().to_string_lossy().into_owned()
}

fn is_digit(ch: char) -> bool {
    ch.is_ascii_digit()
}

fn compare_chars(a: &[char], b: &[char], case_sensitive: bool) -> Ordering {
    let (len_a, len_b) = (a.len(), b.len());
    let (mut i, mut j) = (0, 0);

    while i < len_a && j < len_b {
        let ch_a = a[i];
        let ch_b = b[j];

        if (is_digit(ch_a) || ch_a == ' ') && (is_digit(ch_b) || ch_b == ' ') {
            let start_a = skip_padding(a, i);
            let start_b = skip_padding(b, j);

            i = start_a;
            while i < len_a && is_digit(a[i]) {
                i += 1;
            }
            j = start_b;
            while j < len_b && is_digit(b[j]) {
                j += 1;
            }

            // More significant digits always win.
            let run_a = i - start_a;
            let run_b = j - start_b;
            if run_a != run_b {
                return run_a.cmp(&run_b);
            }

            for (da, db) in a[start_a..i].iter().zip(&b[start_b..j]) {
                if da != db {
                    return da.cmp(db);
                }
            }
            continue;
        }

        if ch_a != ch_b {
            if case_sensitive {
                return case_sensitive_cmp(ch_a, ch_b);
            }
            let ordering = fold_cmp(ch_a, ch_b);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        i += 1;
        j += 1;
    }

    if i < len_a {
        return Ordering::Greater;
    }
    if j < len_b {
        return Ordering::Less;
    }

    if !case_sensitive && len_a == len_b {
        return compare_chars(a, b, true);
    }
    len_a.cmp(&len_b)
}

/// Index of the first char at or after `from` that is neither a space nor a zero.
fn skip_padding(chars: &[char], from: usize) -> usize {
    let mut idx = from;
    while idx < chars.len() && (chars[idx] == ' ' || chars[idx] == '0') {
        idx += 1;
    }
    idx
}

fn fold_cmp(a: char, b: char) -> Ordering {
    let upper = a.to_uppercase().cmp(b.to_uppercase());
    if upper == Ordering::Equal {
        return Ordering::Equal;
    }
    a.to_lowercase().cmp(b.to_lowercase())
}

fn case_sensitive_cmp(a: char, b: char) -> Ordering {
    if a.to_lowercase().eq(b.to_lowercase()) {
        // Same letter, different case: lowercase first.
        return match (a.is_lowercase(), b.is_lowercase()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.cmp(&b),
        };
    }
    a.cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_numeric_runs_compare_by_value() {
        assert_eq!(natural_cmp("track2", "track10"), Ordering::Less);
        assert_eq!(natural_cmp("track10", "track2"), Ordering::Greater);
        assert_eq!(natural_cmp("Chapter 9", "Chapter 10"), Ordering::Less);
    }

    #[test]
    fn test_leading_zeros_are_ignored() {
        assert_eq!(natural_cmp("track007", "track7"), Ordering::Greater);
        assert_eq!(natural_cmp("track007", "track8"), Ordering::Less);
        assert_eq!(natural_cmp("01 intro", "2 intro"), Ordering::Less);
    }

    #[test]
    fn test_case_insensitive_first() {
        assert_eq!(natural_cmp("Ab", "aC"), Ordering::Less);
        assert_eq!(natural_cmp("aC", "Ab"), Ordering::Greater);
        assert_eq!(natural_cmp("apple", "Banana"), Ordering::Less);
    }

    #[test]
    fn test_case_breaks_ties_only() {
        assert_eq!(natural_cmp("a", "a"), Ordering::Equal);
        assert_eq!(natural_cmp("a", "A"), Ordering::Less);
        assert_eq!(natural_cmp("A", "a"), Ordering::Greater);
        assert_eq!(natural_cmp("Book b", "book B"), Ordering::Greater);
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert_eq!(natural_cmp("track", "track1"), Ordering::Less);
        assert_eq!(natural_cmp("track1", "track"), Ordering::Greater);
        assert_eq!(natural_cmp("", "a"), Ordering::Less);
    }

    #[test]
    fn test_sorting_a_chapter_list() {
        let mut names = vec!["10.mp3", "2.mp3", "1.mp3", "Intro.mp3", "02b.mp3"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["1.mp3", "2.mp3", "02b.mp3", "10.mp3", "Intro.mp3"]);
    }

    #[test]
    fn test_is_consistent_antisymmetric() {
        let samples = ["a1", "A1", "a01", "a 1", "b", "B", "a10", "a2", "", "x y"];
        for a in samples {
            for b in samples {
                assert_eq!(natural_cmp(a, b), natural_cmp(b, a).reverse(), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn test_path_cmp_orders_components_naturally() {
        let mut paths = vec![
            PathBuf::from("/books/Saga/Part 10/01.mp3"),
            PathBuf::from("/books/Saga/Part 2/01.mp3"),
            PathBuf::from("/books/Saga/Part 2/00.mp3"),
        ];
        paths.sort_by(|a, b| natural_path_cmp(a, b));
        assert_eq!(paths[0], PathBuf::from("/books/Saga/Part 2/00.mp3"));
        assert_eq!(paths[2], PathBuf::from("/books/Saga/Part 10/01.mp3"));
    }

    #[test]
    fn test_path_cmp_deeper_entries_first() {
        let nested = Path::new("/books/Saga/cd1");
        let shallow = Path::new("/books/Saga");
        assert_eq!(natural_path_cmp(nested, shallow), Ordering::Less);
    }
}
