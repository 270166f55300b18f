//! Scalar/byte index conversions, centralized so cursor math never
//! hand-rolls UTF-8 walking at call sites.

/// Number of Unicode scalars in `s`.
pub(crate) fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Scalar index of the char starting at byte offset `byte`.
///
/// `byte` must lie on a char boundary (or at the end of `s`); offsets coming
/// out of `str::find` always do.
pub(crate) fn char_index(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_count_counts_scalars_not_bytes() {
        assert_eq!(char_count(""), 0);
        assert_eq!(char_count("abc"), 3);
        assert_eq!(char_count("héllo"), 5); // 'é' is two bytes
        assert_eq!(char_count("日本語"), 3);
    }

    #[test]
    fn char_index_maps_byte_offsets_back_to_scalars() {
        let s = "aéb";
        assert_eq!(char_index(s, 0), 0);
        assert_eq!(char_index(s, 1), 1); // start of 'é'
        assert_eq!(char_index(s, 3), 2); // start of 'b'
        assert_eq!(char_index(s, s.len()), 3);
    }

    #[test]
    fn char_index_of_search_hit_lands_on_the_match() {
        let line = "écho two";
        let at = line.find("two").unwrap();
        assert_eq!(char_index(line, at), 5);
    }
}
