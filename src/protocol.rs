//! Core data types for illumination protocols and well assignments.
//!
//! A [`Protocol`] is a named, parameterized illumination program. A
//! [`WellAssignment`] binds a protocol index to one well or a rectangular
//! range of wells. Both types serialize into the shapes used by the
//! persisted store file:
//!
//! ```json
//! { "protocols": [ {"name": "P1", "color": "R", "intensity": 200,
//!                   "active": 5.0, "silent": 2.0, "on": 1.0, "off": 1.0,
//!                   "total": 30.0} ],
//!   "assignments": { "0": [ {"row": "A", "col": "1"}, "B1-B4" ] } }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PlateError;

/// LED color channel recognized by the device.
///
/// The wire and stored form is the single uppercase initial; parsing also
/// accepts the full name, case-insensitively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    #[serde(rename = "R")]
    Red,
    #[serde(rename = "G")]
    Green,
    #[serde(rename = "B")]
    Blue,
}

impl Color {
    /// Single-letter form sent on the wire and stored on disk.
    pub fn letter(self) -> char {
        match self {
            Color::Red => 'R',
            Color::Green => 'G',
            Color::Blue => 'B',
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Color {
    type Err = PlateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "R" | "RED" => Ok(Color::Red),
            "G" | "GREEN" => Ok(Color::Green),
            "B" | "BLUE" => Ok(Color::Blue),
            other => Err(PlateError::Validation(format!(
                "Unrecognized color '{}'. Valid colors: Red, Green, Blue",
                other
            ))),
        }
    }
}

/// A named illumination program.
///
/// All durations are non-negative seconds. `intensity` is bounded to 0-255
/// by its type. `name` is the unique key across the union of the current
/// session's protocols and all previously persisted protocols.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    /// Unique protocol name
    pub name: String,
    /// LED color channel
    pub color: Color,
    /// Drive intensity (0-255)
    pub intensity: u8,
    /// Active phase duration (s)
    pub active: f64,
    /// Silent phase duration (s)
    pub silent: f64,
    /// Pulse on-time within the active phase (s)
    #[serde(rename = "on")]
    pub pulse_on: f64,
    /// Pulse off-time within the active phase (s)
    #[serde(rename = "off")]
    pub pulse_off: f64,
    /// Total program duration (s)
    pub total: f64,
}

impl Protocol {
    /// Duration fields in frame order, paired with their labels for
    /// validation messages.
    pub(crate) fn durations(&self) -> [(&'static str, f64); 5] {
        [
            ("active", self.active),
            ("silent", self.silent),
            ("on", self.pulse_on),
            ("off", self.pulse_off),
            ("total", self.total),
        ]
    }
}

/// A binding of a protocol index to one well or a rectangular range.
///
/// Serializes untagged so the store file holds either a `{row, col}` object
/// or a single `"B1-B4"` composite token for a range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WellAssignment {
    /// A single cell: row letter plus column number.
    Single {
        /// Row letter (e.g. "A")
        row: String,
        /// Column number as entered (e.g. "1")
        col: String,
    },
    /// A rectangular range, stored as a composite `"<start>-<end>"` token
    /// where each endpoint is a row letter followed by the column digits.
    Range(String),
}

impl WellAssignment {
    /// Builds the composite token for a rectangular range.
    pub fn range(start_row: &str, start_col: &str, end_row: &str, end_col: &str) -> Self {
        WellAssignment::Range(format!("{start_row}{start_col}-{end_row}{end_col}"))
    }

    /// Splits a range token back into `(start_row, start_col, end_row,
    /// end_col)`. Returns `None` for single-cell entries or tokens that do
    /// not follow the `<letter><digits>-<letter><digits>` shape.
    pub fn split_range(&self) -> Option<(String, String, String, String)> {
        let WellAssignment::Range(token) = self else {
            return None;
        };
        let (start, end) = token.split_once('-')?;
        let split_cell = |cell: &str| -> Option<(String, String)> {
            let mut chars = cell.chars();
            let row = chars.next().filter(|c| c.is_ascii_alphabetic())?;
            let col: String = chars.collect();
            if col.is_empty() || !col.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Some((row.to_string(), col))
        };
        let (sr, sc) = split_cell(start)?;
        let (er, ec) = split_cell(end)?;
        Some((sr, sc, er, ec))
    }
}

impl fmt::Display for WellAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WellAssignment::Single { row, col } => write!(f, "({row},{col})"),
            WellAssignment::Range(token) => write!(f, "({token})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_parsing() {
        assert_eq!("Red".parse::<Color>().unwrap(), Color::Red);
        assert_eq!("g".parse::<Color>().unwrap(), Color::Green);
        assert_eq!("BLUE".parse::<Color>().unwrap(), Color::Blue);
        assert!("ultraviolet".parse::<Color>().is_err());
    }

    #[test]
    fn test_protocol_store_shape() {
        let p = Protocol {
            name: "P1".into(),
            color: Color::Red,
            intensity: 200,
            active: 5.0,
            silent: 2.0,
            pulse_on: 1.0,
            pulse_off: 1.0,
            total: 30.0,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["color"], "R");
        assert_eq!(json["on"], 1.0);
        assert_eq!(json["off"], 1.0);
        let back: Protocol = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_assignment_store_shapes() {
        let single = WellAssignment::Single {
            row: "A".into(),
            col: "1".into(),
        };
        let range = WellAssignment::range("B", "1", "B", "4");

        let json = serde_json::to_value(vec![single.clone(), range.clone()]).unwrap();
        assert_eq!(json[0]["row"], "A");
        assert_eq!(json[1], "B1-B4");

        let back: Vec<WellAssignment> = serde_json::from_value(json).unwrap();
        assert_eq!(back, vec![single, range]);
    }

    #[test]
    fn test_split_range() {
        let range = WellAssignment::range("B", "1", "C", "12");
        let (sr, sc, er, ec) = range.split_range().unwrap();
        assert_eq!((sr.as_str(), sc.as_str()), ("B", "1"));
        assert_eq!((er.as_str(), ec.as_str()), ("C", "12"));

        assert!(WellAssignment::Range("garbage".into()).split_range().is_none());
        let single = WellAssignment::Single {
            row: "A".into(),
            col: "1".into(),
        };
        assert!(single.split_range().is_none());
    }
}
