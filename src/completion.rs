use std::io;

use crate::term::Term;
use crate::unicode;

/// One tab-completion request.
///
/// `word` is the token between the nearest space left of the cursor and the
/// cursor itself; `start`/`end` are its byte offsets in `line`. The whole
/// `line` is included so context-sensitive callbacks can inspect what came
/// before the token.
pub struct CompletionRequest<'a> {
    pub word: &'a str,
    pub start: usize,
    pub end: usize,
    pub line: &'a str,
}

/// Callback invoked on Tab to propose candidates.
pub type CompletionCallback = dyn FnMut(&CompletionRequest<'_>, &mut Completions);

/// Optional display filter: maps each candidate to what the listing shows
/// (e.g. basenames while full paths are inserted).
pub type CompletionFilter = dyn FnMut(&str) -> String;

/// Candidate list a completion callback fills in.
pub struct Completions {
    items: Vec<String>,
    append: Option<char>,
}

impl Completions {
    pub(crate) fn new() -> Self {
        Completions {
            items: Vec::new(),
            append: Some(' '),
        }
    }

    /// Insert `candidate`, keeping the list sorted case-insensitively.
    /// Equal keys keep their insertion order.
    pub fn add(&mut self, candidate: &str) {
        let key = candidate.to_ascii_lowercase();
        let at = self
            .items
            .partition_point(|existing| existing.to_ascii_lowercase() <= key);
        self.items.insert(at, candidate.to_string());
    }

    /// Character appended after a unique completion; defaults to a space.
    /// Callbacks clear it when the candidate should stay open-ended, e.g.
    /// a directory ending in `/`.
    pub fn set_append_char(&mut self, append: Option<char>) {
        self.append = append;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn append_char(&self) -> Option<char> {
        self.append
    }

    pub(crate) fn items(&self) -> &[String] {
        &self.items
    }
}

/// Byte span of the token being completed: from just past the nearest space
/// left of the cursor (or the line start) up to the cursor.
pub(crate) fn word_bounds(line: &str, end: usize) -> (usize, usize) {
    let start = line[..end].rfind(' ').map_or(0, |i| i + 1);
    (start, end)
}

/// Longest prefix shared by every candidate, cut on a scalar boundary.
pub(crate) fn common_prefix(items: &[String]) -> &str {
    let Some(first) = items.first() else {
        return "";
    };
    let mut len = first.len();
    for item in items.iter().skip(1) {
        let mut shared = first.as_bytes()[..len]
            .iter()
            .zip(item.as_bytes())
            .take_while(|(a, b)| a == b)
            .count();
        while shared > 0 && !first.is_char_boundary(shared) {
            shared -= 1;
        }
        len = shared;
    }
    &first[..len]
}

/// Print every candidate below the current line in vertical column-major
/// order, each mapped through `filter` for display and padded to the
/// longest one, two spaces between columns.
pub(crate) fn list_candidates<T: Term>(
    term: &mut T,
    items: &[String],
    mut filter: Option<&mut CompletionFilter>,
    cols: usize,
) -> io::Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let shown: Vec<String> = items
        .iter()
        .map(|item| match filter.as_mut() {
            Some(f) => f(item),
            None => item.clone(),
        })
        .collect();
    let width = shown
        .iter()
        .map(|s| unicode::char_count(s))
        .max()
        .unwrap_or(0);
    let per_row = ((cols + 2) / (width + 2)).max(1);
    let per_col = shown.len().div_ceil(per_row);

    term.write_bytes(b"\n\r")?;
    for row in 0..per_col {
        let mut line = String::new();
        for col in 0..per_row {
            let Some(item) = shown.get(col * per_col + row) else {
                continue;
            };
            if col > 0 {
                line.push_str("  ");
            }
            line.push_str(item);
            for _ in unicode::char_count(item)..width {
                line.push(' ');
            }
        }
        line.push_str("\r\n");
        term.write_bytes(line.as_bytes())?;
    }
    term.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::testing::FakeTerm;

    fn completions_of(candidates: &[&str]) -> Completions {
        let mut list = Completions::new();
        for c in candidates {
            list.add(c);
        }
        list
    }

    #[test]
    fn add_keeps_case_insensitive_order() {
        let list = completions_of(&["Zeta", "alpha", "Beta", "gamma"]);
        assert_eq!(list.items(), ["alpha", "Beta", "gamma", "Zeta"]);
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let list = completions_of(&["apple", "Apple", "APPLE"]);
        assert_eq!(list.items(), ["apple", "Apple", "APPLE"]);
    }

    #[test]
    fn word_bounds_isolate_the_token_under_the_cursor() {
        assert_eq!(word_bounds("echo he", 7), (5, 7));
        assert_eq!(word_bounds("solo", 4), (0, 4));
        assert_eq!(word_bounds("a b ", 4), (4, 4));
        assert_eq!(word_bounds("", 0), (0, 0));
    }

    #[test]
    fn word_bounds_ignore_spaces_right_of_the_cursor() {
        assert_eq!(word_bounds("ab cd ef", 5), (3, 5));
    }

    #[test]
    fn common_prefix_is_the_shared_head() {
        assert_eq!(common_prefix(&["hello".into(), "help".into()]), "hel");
        assert_eq!(common_prefix(&["same".into(), "same".into()]), "same");
        assert_eq!(common_prefix(&["ab".into(), "cd".into()]), "");
        assert_eq!(common_prefix(&["solo".into()]), "solo");
        assert_eq!(common_prefix(&[]), "");
    }

    #[test]
    fn common_prefix_never_splits_a_scalar() {
        // 'é' (c3 a9) and 'è' (c3 a8) share their first byte only.
        assert_eq!(common_prefix(&["é".into(), "è".into()]), "");
        assert_eq!(common_prefix(&["aé1".into(), "aé2".into()]), "aé");
    }

    #[test]
    fn candidates_list_in_column_major_order() {
        let mut term = FakeTerm::new(b"");
        let items: Vec<String> = ["aa", "bb", "cc"].map(String::from).into();
        // (7 + 2) / (2 + 2) = 2 items per row, so 2 per column:
        // aa/bb fill the left column, cc the right.
        list_candidates(&mut term, &items, None, 7).unwrap();
        let out = term.output_str();
        assert_eq!(out, "\n\raa  cc\r\nbb\r\n");
    }

    #[test]
    fn listed_items_pass_through_the_filter() {
        let mut term = FakeTerm::new(b"");
        let items: Vec<String> = ["dir/alpha", "dir/beta"].map(String::from).into();
        let mut basename = |item: &str| item.rsplit('/').next().unwrap_or(item).to_string();
        list_candidates(&mut term, &items, Some(&mut basename), 80).unwrap();
        let out = term.output_str();
        assert!(out.contains("alpha"));
        assert!(!out.contains("dir/"));
    }
}
