//! Chronological key derivation from folder names
//!
//! Record folders are named by hand (`2015 06 03 Cableway Inspection`,
//! `2024-new-gauge`, ...). The key is a best-effort `YYYYMMDD` integer, `0`
//! when no year is present. Missing month/day default to `12`/`31`, so an
//! under-specified date sorts as the latest day of its year.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static SEPARATOR_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[_\-]+").expect("valid separator regex"));

static YEAR_MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u:\b)((?:19|20)[0-9]{2})(?:\s+([0-9]{1,2}))?(?:\s+([0-9]{1,2}))?")
        .expect("valid date regex")
});

static LEADING_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{4})\s+(.*)$").expect("valid leading year regex"));

static WHITESPACE_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

const DEFAULT_MONTH: u32 = 12;
const DEFAULT_DAY: u32 = 31;

/// Turn runs of `_`/`-` into a single space and trim
pub fn normalize_separators(name: &str) -> String {
    SEPARATOR_RUNS.replace_all(name, " ").trim().to_string()
}

/// Derive the `YYYYMMDD` sort key for a folder name; never fails
pub fn derive_sort_key(name: &str) -> u32 {
    let clean = normalize_separators(name);
    let Some(caps) = YEAR_MONTH_DAY.captures(&clean) else {
        return 0;
    };

    // the regex guarantees four ASCII digits
    let year: u32 = caps[1].parse().unwrap_or(0);
    let month = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(DEFAULT_MONTH)
        .clamp(1, 12);
    let day = caps
        .get(3)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(DEFAULT_DAY)
        .clamp(1, 31);

    year * 10_000 + month * 100 + day
}

/// Display form of a record folder name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderTitle {
    /// Leading four-digit year, if the name starts with one
    pub date: Option<String>,
    pub title: String,
}

impl FolderTitle {
    /// `"<date> - <title>"`, with `" by <inspector>"` when known
    pub fn header(&self, inspector: &str) -> String {
        let mut header = match &self.date {
            Some(date) => format!("{} - {}", date, self.title),
            None => self.title.clone(),
        };
        if !inspector.is_empty() {
            header.push_str(" by ");
            header.push_str(inspector);
        }
        header
    }
}

/// Split a folder name into its leading year and a capitalized title
pub fn parse_folder_title(name: &str) -> FolderTitle {
    let clean = normalize_separators(name);
    let (date, raw_title) = match LEADING_YEAR.captures(&clean) {
        Some(caps) => (Some(caps[1].to_string()), caps[2].to_string()),
        None => (None, clean.clone()),
    };

    let collapsed = WHITESPACE_RUNS.replace_all(raw_title.trim(), " ");
    FolderTitle {
        date,
        title: capitalize_words(&collapsed),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Uppercase the first character of every word, leaving the rest as-is
fn capitalize_words(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_word = false;
    for c in s.chars() {
        if is_word_char(c) && !prev_is_word {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        prev_is_word = is_word_char(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_only_defaults_to_year_end() {
        assert_eq!(derive_sort_key("2024 New Gauge"), 20241231);
        assert_eq!(derive_sort_key("new_gauge_1998"), 19981231);
    }

    #[test]
    fn test_full_date() {
        assert_eq!(derive_sort_key("2015 06 03 Cableway Inspection"), 20150603);
        assert_eq!(derive_sort_key("2015-06-03-cableway"), 20150603);
        assert_eq!(derive_sort_key("2015_6"), 20150631);
    }

    #[test]
    fn test_out_of_range_parts_are_clamped() {
        assert_eq!(derive_sort_key("2015 13 45"), 20151231);
        assert_eq!(derive_sort_key("2015 00 00"), 20150101);
    }

    #[test]
    fn test_year_after_non_ascii_letter() {
        assert_eq!(derive_sort_key("é2015 Cableway"), 20151231);
        assert_eq!(derive_sort_key("Révision 2019 03"), 20190331);
    }

    #[test]
    fn test_no_year_is_zero() {
        assert_eq!(derive_sort_key("Station Photos"), 0);
        assert_eq!(derive_sort_key("1850 survey"), 0);
        assert_eq!(derive_sort_key("x20150"), 0);
        assert_eq!(derive_sort_key(""), 0);
    }

    #[test]
    fn test_parse_folder_title() {
        let t = parse_folder_title("2019_cableway__site-visit");
        assert_eq!(t.date.as_deref(), Some("2019"));
        assert_eq!(t.title, "Cableway Site Visit");

        let t = parse_folder_title("gauge   house o'neil");
        assert_eq!(t.date, None);
        assert_eq!(t.title, "Gauge House O'Neil");
    }

    #[test]
    fn test_header_line() {
        let t = parse_folder_title("2019 cableway inspection");
        assert_eq!(t.header(""), "2019 - Cableway Inspection");
        assert_eq!(t.header("J. Smith"), "2019 - Cableway Inspection by J. Smith");

        let t = parse_folder_title("misc");
        assert_eq!(t.header("A"), "Misc by A");
    }
}
