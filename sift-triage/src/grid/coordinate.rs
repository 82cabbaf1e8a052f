//! Grid cell coordinates
//!
//! Rows are spreadsheet-style letters (`A`..`Z`, then `AA`, `AB`, ...), columns
//! are 1-based numbers. `T20` is row 20, column 20. Ordering is row-major.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A cell in a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coordinate {
    /// 0-based row index (`A` = 0)
    row: u32,
    /// 1-based column
    column: u32,
}

impl Coordinate {
    /// Coordinate from a 0-based row index and a 1-based column
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// Coordinate of the `index`-th cell (0-based, row-major) of a square grid
    pub fn from_cell_index(index: usize, dimension: u32) -> Self {
        let dimension = dimension.max(1) as usize;
        Self {
            row: (index / dimension) as u32,
            column: (index % dimension) as u32 + 1,
        }
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    /// Row letters for this coordinate
    pub fn row_label(&self) -> String {
        row_label(self.row)
    }

    /// Inside a grid of `max_row` rows and `max_col` columns
    pub fn is_within(&self, max_row: u32, max_col: u32) -> bool {
        self.row < max_row && self.column >= 1 && self.column <= max_col
    }

    /// Parse a row label and column (`"ab"`, `12`); letters are case-insensitive
    pub fn from_parts(letters: &str, column: u32) -> Option<Self> {
        row_index(letters).map(|row| Self { row, column })
    }
}

/// Spreadsheet label for a 0-based row index
pub fn row_label(row: u32) -> String {
    let mut n = row as u64 + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// 0-based row index for a spreadsheet label
pub fn row_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as u64 + 1;
        value = value.checked_mul(26)?.checked_add(digit)?;
    }
    u32::try_from(value - 1).ok()
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row_label(), self.column)
    }
}

impl FromStr for Coordinate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| format!("Invalid coordinate: {}", s))?;
        let (letters, digits) = s.split_at(split);
        let column: u32 = digits
            .parse()
            .map_err(|_| format!("Invalid coordinate column: {}", s))?;
        Coordinate::from_parts(letters, column).ok_or_else(|| format!("Invalid coordinate row: {}", s))
    }
}

impl TryFrom<String> for Coordinate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Coordinate> for String {
    fn from(coordinate: Coordinate) -> Self {
        coordinate.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_labels() {
        assert_eq!(row_label(0), "A");
        assert_eq!(row_label(19), "T");
        assert_eq!(row_label(25), "Z");
        assert_eq!(row_label(26), "AA");
        assert_eq!(row_label(27), "AB");
        assert_eq!(row_label(701), "ZZ");
    }

    #[test]
    fn test_row_index_inverts_label() {
        for row in [0, 1, 25, 26, 51, 52, 701] {
            assert_eq!(row_index(&row_label(row)), Some(row));
        }
        assert_eq!(row_index("ab"), Some(27));
        assert_eq!(row_index(""), None);
        assert_eq!(row_index("A1"), None);
    }

    #[test]
    fn test_display_and_parse() {
        let c = Coordinate::new(19, 20);
        assert_eq!(c.to_string(), "T20");
        assert_eq!("t20".parse::<Coordinate>().unwrap(), c);
        assert_eq!("AB3".parse::<Coordinate>().unwrap(), Coordinate::new(27, 3));
        assert!("12".parse::<Coordinate>().is_err());
    }

    #[test]
    fn test_cell_index_is_row_major() {
        assert_eq!(Coordinate::from_cell_index(0, 4).to_string(), "A1");
        assert_eq!(Coordinate::from_cell_index(3, 4).to_string(), "A4");
        assert_eq!(Coordinate::from_cell_index(4, 4).to_string(), "B1");
        assert!(Coordinate::new(0, 4) < Coordinate::new(1, 1));
    }

    #[test]
    fn test_range_check() {
        assert!(Coordinate::new(19, 20).is_within(20, 20));
        assert!(!Coordinate::new(20, 1).is_within(20, 20));
        assert!(!Coordinate::new(0, 21).is_within(20, 20));
        assert!(!Coordinate::new(0, 0).is_within(20, 20));
    }
}
