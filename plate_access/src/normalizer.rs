//! Plate text normalization
//!
//! Turns a raw OCR guess into the canonical, space-free plate text used for
//! registry lookups and storage. The rules are narrow heuristics fitted to the
//! plates the detector was trained on (`digits letters digits`, e.g.
//! `34 ABC 123`). Each stage is total: malformed input degrades to pass-through
//! or rejection, never to a panic.

use serde::Serialize;

/// Minimum number of characters (spaces excluded) for a read to be admissible.
pub const MIN_PLATE_CHARS: usize = 4;

const NUMERIC_TOKEN_FIXES: [(char, char); 5] =
    [('B', '8'), ('I', '1'), ('O', '0'), ('S', '5'), ('h', '4')];
const ALPHA_TOKEN_FIXES: [(char, char); 5] =
    [('8', 'B'), ('1', 'I'), ('0', 'O'), ('5', 'S'), ('4', 'H')];

/// Normalized plate text. `text` never contains spaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalPlate {
    pub text: String,
    pub char_count: usize,
}

/// Normalize a raw OCR read.
///
/// Returns `None` when fewer than [`MIN_PLATE_CHARS`] characters survive, which
/// the pipeline treats as "no plate read".
pub fn normalize(raw_text: &str) -> Option<CanonicalPlate> {
    let text = drop_leading_triplet(raw_text.trim());
    let text = filter_characters(text);
    let text = correct_three_tokens(&text);
    let text = clamp_length(&text);

    let text: String = text.chars().filter(|c| *c != ' ').collect();
    let char_count = text.chars().count();
    if char_count < MIN_PLATE_CHARS {
        return None;
    }

    Some(CanonicalPlate { text, char_count })
}

/// A run of exactly three leading digits loses its first digit. A fourth
/// leading digit disables the rule.
fn drop_leading_triplet(text: &str) -> &str {
    let leading_digits = text.chars().take_while(|c| c.is_ascii_digit()).count();
    if leading_digits == 3 {
        // ASCII digit, one byte wide
        &text[1..]
    } else {
        text
    }
}

fn filter_characters(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect()
}

fn correct_three_tokens(text: &str) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() != 3 {
        return text.to_string();
    }

    [
        substitute(tokens[0], &NUMERIC_TOKEN_FIXES),
        substitute(tokens[1], &ALPHA_TOKEN_FIXES),
        substitute(tokens[2], &NUMERIC_TOKEN_FIXES),
    ]
    .join(" ")
}

fn substitute(token: &str, fixes: &[(char, char)]) -> String {
    token
        .chars()
        .map(|c| {
            fixes
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .collect()
}

/// Runaway-noise clamp, not a format check: more than 8 plate characters cuts
/// the spaced string to 8, otherwise it is cut to 10.
fn clamp_length(text: &str) -> String {
    let plate_chars = text.chars().filter(|c| *c != ' ').count();
    let limit = if plate_chars > 8 { 8 } else { 10 };
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(raw: &str) -> Option<String> {
        normalize(raw).map(|plate| plate.text)
    }

    #[test]
    fn test_leading_triplet_drops_first_digit() {
        assert_eq!(drop_leading_triplet("123ABC"), "23ABC");
        assert_eq!(canonical("123ABC"), Some("23ABC".to_string()));
    }

    #[test]
    fn test_leading_triplet_ignores_other_runs() {
        assert_eq!(drop_leading_triplet("12ABC"), "12ABC");
        assert_eq!(drop_leading_triplet("1234ABC"), "1234ABC");
        assert_eq!(drop_leading_triplet("A123"), "A123");
        assert_eq!(drop_leading_triplet(""), "");
    }

    #[test]
    fn test_leading_triplet_short_remainder_is_rejected() {
        assert_eq!(drop_leading_triplet("123"), "23");
        assert_eq!(canonical("123"), None);
        assert_eq!(canonical("123A"), None);
        assert_eq!(canonical("123AB"), Some("23AB".to_string()));
    }

    #[test]
    fn test_leading_triplet_runs_after_trim() {
        assert_eq!(canonical("  134 ABC 12  "), Some("34ABC12".to_string()));
    }

    #[test]
    fn test_filter_removes_punctuation() {
        assert_eq!(filter_characters("34-ABC.56!"), "34ABC56");
        assert_eq!(filter_characters("TR|34 ABC_56"), "TR34 ABC56");
        assert_eq!(filter_characters("\t34\nABC"), "34ABC");
        assert_eq!(filter_characters("İSTANBUL"), "STANBUL");
    }

    #[test]
    fn test_already_canonical_plate_is_stable() {
        let first = canonical("34 ABC 56").unwrap();
        assert_eq!(first, "34ABC56");
        assert_eq!(canonical(&first), Some(first.clone()));
    }

    #[test]
    fn test_three_tokens_correct_shape_unchanged() {
        assert_eq!(correct_three_tokens("34 ABC 56"), "34 ABC 56");
    }

    #[test]
    fn test_three_tokens_positional_substitution() {
        assert_eq!(correct_three_tokens("B4 A8C 5S"), "84 ABC 55");
        assert_eq!(canonical("B4 A8C 5S"), Some("84ABC55".to_string()));
        assert_eq!(correct_three_tokens("IO 4 0S"), "10 H 05");
        assert_eq!(correct_three_tokens("34 81054 12"), "34 BIOSH 12");
    }

    #[test]
    fn test_three_tokens_only_lowercase_h_maps_to_four() {
        assert_eq!(correct_three_tokens("H4 X 2h"), "H4 X 24");
    }

    #[test]
    fn test_three_tokens_collapses_extra_spaces() {
        assert_eq!(correct_three_tokens("34   ABC  56"), "34 ABC 56");
    }

    #[test]
    fn test_other_token_counts_pass_through() {
        assert_eq!(correct_three_tokens("B4A8C5S"), "B4A8C5S");
        assert_eq!(correct_three_tokens("B4 A8C5S"), "B4 A8C5S");
        assert_eq!(correct_three_tokens("B4 A8C 5S 1"), "B4 A8C 5S 1");
        assert_eq!(canonical("B4A8C5S"), Some("B4A8C5S".to_string()));
    }

    #[test]
    fn test_length_clamp_boundary_eight() {
        // 8 plate characters: cut at 10, which keeps everything
        assert_eq!(clamp_length("34 ABC 123"), "34 ABC 123");
        assert_eq!(canonical("34 ABC 123"), Some("34ABC123".to_string()));
    }

    #[test]
    fn test_length_clamp_boundary_nine() {
        // 9 plate characters: spaced string cut at 8
        assert_eq!(clamp_length("34 ABC 1234"), "34 ABC 1");
        assert_eq!(canonical("34 ABC 1234"), Some("34ABC1".to_string()));
    }

    #[test]
    fn test_length_clamp_short_input_untouched() {
        assert_eq!(clamp_length("AB"), "AB");
        assert_eq!(clamp_length(""), "");
    }

    #[test]
    fn test_length_clamp_many_tokens_quirk() {
        // four tokens, 8 plate characters, 11 spaced characters
        assert_eq!(clamp_length("AB CD EF GH"), "AB CD EF G");
        assert_eq!(canonical("AB CD EF GH"), Some("ABCDEFG".to_string()));
    }

    #[test]
    fn test_rejects_short_and_empty_reads() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("   "), None);
        assert_eq!(normalize("AB1"), None);
        assert_eq!(normalize("--!!"), None);
    }

    #[test]
    fn test_char_count_matches_text() {
        let plate = normalize("06 AB 1234").unwrap();
        assert_eq!(plate.text, "06AB1234");
        assert_eq!(plate.char_count, 8);
        assert!(!plate.text.contains(' '));
    }
}
