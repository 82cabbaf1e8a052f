//! Extracts grid coordinates from free-text model answers
//!
//! Models rarely answer in a strict format, so any word-bounded token of one
//! or two letters followed by one or two digits counts: `A1`, `b12`, `"C3"`,
//! `(D4)`, `**E5**`. Tokens outside the grid are ignored.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::error::TriageError;
use crate::grid::Coordinate;

fn coordinate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b([a-z]{1,2})(\d{1,2})\b").expect("coordinate pattern is valid")
    })
}

/// Parse every in-range coordinate mentioned in `text`
///
/// `valid_range` is `(max_row, max_col)`: rows `0..max_row`, columns
/// `1..=max_col`.
///
/// # Errors
/// `NoCoordinatesFound` when no valid coordinate appears, unless the answer
/// is an explicit `NONE`, which is a legitimate empty selection.
pub fn parse_coordinates(
    text: &str,
    valid_range: (u32, u32),
) -> Result<BTreeSet<Coordinate>, TriageError> {
    let (max_row, max_col) = valid_range;

    let coordinates: BTreeSet<Coordinate> = coordinate_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let column: u32 = caps[2].parse().ok()?;
            Coordinate::from_parts(&caps[1], column)
        })
        .filter(|c| c.is_within(max_row, max_col))
        .collect();

    if coordinates.is_empty() && !is_explicit_none(text) {
        return Err(TriageError::NoCoordinatesFound);
    }

    Ok(coordinates)
}

/// A line reading just `NONE` (punctuation and markdown around it allowed)
fn is_explicit_none(text: &str) -> bool {
    text.lines().any(|line| {
        line.trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .eq_ignore_ascii_case("none")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(text: &str, range: (u32, u32)) -> Vec<String> {
        parse_coordinates(text, range)
            .unwrap()
            .into_iter()
            .map(|c| c.to_string())
            .collect()
    }

    #[test]
    fn test_extracts_from_prose_and_markup() {
        let text = r#"The best are "C3", (D4) and **E5**. Also a1 and b12 look sharp."#;
        assert_eq!(coords(text, (20, 20)), vec!["A1", "B12", "C3", "D4", "E5"]);
    }

    #[test]
    fn test_out_of_range_tokens_are_dropped() {
        let result = parse_coordinates("Z99 and A1", (4, 4)).unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.contains(&"A1".parse().unwrap()));

        assert!(matches!(
            parse_coordinates("E1, A5, A0", (4, 4)),
            Err(TriageError::NoCoordinatesFound)
        ));
    }

    #[test]
    fn test_embedded_tokens_are_not_coordinates() {
        assert!(parse_coordinates("Model XA12B scored 100", (20, 20)).is_err());
        assert!(parse_coordinates("ABC1 A123", (30, 30)).is_err());
    }

    #[test]
    fn test_double_letter_rows() {
        assert_eq!(coords("AB3", (30, 30)), vec!["AB3"]);
        assert!(parse_coordinates("AB3", (27, 30)).is_err());
    }

    #[test]
    fn test_duplicates_collapse_and_parse_is_idempotent() {
        let text = "A1, a1, B2, A1";
        let first = parse_coordinates(text, (4, 4)).unwrap();
        assert_eq!(first.len(), 2);

        let rendered = first.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ");
        assert_eq!(parse_coordinates(&rendered, (4, 4)).unwrap(), first);
    }

    #[test]
    fn test_explicit_none_is_empty_selection() {
        assert!(parse_coordinates("NONE", (4, 4)).unwrap().is_empty());
        assert!(parse_coordinates("**None.**", (4, 4)).unwrap().is_empty());
        assert!(parse_coordinates("After review:\nnone", (4, 4)).unwrap().is_empty());
    }

    #[test]
    fn test_prose_without_coordinates_is_an_error() {
        assert!(matches!(
            parse_coordinates("None of these photos really stand out to me", (4, 4)),
            Err(TriageError::NoCoordinatesFound)
        ));
        assert!(parse_coordinates("", (4, 4)).is_err());
    }
}
