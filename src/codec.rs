//! Encoding and parsing of the device's text command protocol.
//!
//! Every command is a single newline-terminated frame of comma-separated
//! fields wrapped in angle brackets, with a fixed tag identifying the
//! command kind:
//!
//! ```text
//! <name,intensity,PROTOCOL,active,silent,on,off,total,color>
//! <row,col,ASSIGN,index>
//! <startRow,startCol,RANGE,endRow,endCol,index>
//! <name,0,START>
//! <0,0,STOP>
//! <0,0,TEMP>
//! ```
//!
//! Telemetry replies are free text; any line containing `TEMP:` carries a
//! temperature reading as the trimmed text after the marker.
//!
//! The functions here are pure: encoding validates its inputs and produces
//! a frame, parsing scans reply lines. All device I/O lives elsewhere.

use crate::error::{AppResult, PlateError};
use crate::protocol::Protocol;

/// Marker identifying a temperature telemetry line.
const TEMP_MARKER: &str = "TEMP:";

/// Rejects empty fields and fields that would corrupt the frame framing.
fn validate_field(label: &str, value: &str) -> AppResult<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PlateError::Validation(format!(
            "Field '{label}' must not be empty"
        )));
    }
    if trimmed.contains(['<', '>', ',']) {
        return Err(PlateError::Validation(format!(
            "Field '{label}' must not contain '<', '>' or ','"
        )));
    }
    Ok(())
}

/// Rows are single ASCII letters; normalized to uppercase by callers.
fn validate_row(label: &str, row: &str) -> AppResult<()> {
    let mut chars = row.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Ok(()),
        _ => Err(PlateError::Validation(format!(
            "Field '{label}' must be a single letter, got '{row}'"
        ))),
    }
}

/// Columns are non-empty strings of ASCII digits.
fn validate_col(label: &str, col: &str) -> AppResult<()> {
    if col.is_empty() || !col.chars().all(|c| c.is_ascii_digit()) {
        return Err(PlateError::Validation(format!(
            "Field '{label}' must be numeric, got '{col}'"
        )));
    }
    Ok(())
}

/// Formats a duration in seconds without a trailing `.0` for whole values,
/// matching what an operator would have typed into the original form.
fn format_secs(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Encodes a protocol-definition frame.
///
/// Fails with a validation error if the name is empty or contains frame
/// delimiters, or if any duration is negative or non-finite.
pub fn encode_create_protocol(protocol: &Protocol) -> AppResult<String> {
    validate_field("name", &protocol.name)?;
    for (label, value) in protocol.durations() {
        if !value.is_finite() || value < 0.0 {
            return Err(PlateError::Validation(format!(
                "Field '{label}' must be a non-negative number of seconds, got {value}"
            )));
        }
    }
    Ok(format!(
        "<{},{},PROTOCOL,{},{},{},{},{},{}>",
        protocol.name.trim(),
        protocol.intensity,
        format_secs(protocol.active),
        format_secs(protocol.silent),
        format_secs(protocol.pulse_on),
        format_secs(protocol.pulse_off),
        format_secs(protocol.total),
        protocol.color.letter(),
    ))
}

/// Encodes a single-well assignment frame.
pub fn encode_assign_well(row: &str, col: &str, index: usize) -> AppResult<String> {
    validate_row("row", row)?;
    validate_col("col", col)?;
    Ok(format!("<{row},{col},ASSIGN,{index}>"))
}

/// Encodes a rectangular-range assignment frame.
///
/// Both endpoints are validated; no ordering between start and end is
/// required, the device owns range semantics.
pub fn encode_assign_range(
    start_row: &str,
    start_col: &str,
    end_row: &str,
    end_col: &str,
    index: usize,
) -> AppResult<String> {
    validate_row("start row", start_row)?;
    validate_col("start col", start_col)?;
    validate_row("end row", end_row)?;
    validate_col("end col", end_col)?;
    Ok(format!(
        "<{start_row},{start_col},RANGE,{end_row},{end_col},{index}>"
    ))
}

/// Encodes an experiment-start frame.
pub fn encode_start(name: &str) -> AppResult<String> {
    validate_field("experiment name", name)?;
    Ok(format!("<{},0,START>", name.trim()))
}

/// Encodes the experiment-stop frame.
pub fn encode_stop() -> String {
    "<0,0,STOP>".to_string()
}

/// Encodes the temperature-request frame.
pub fn encode_temperature_request() -> String {
    "<0,0,TEMP>".to_string()
}

/// Scans reply lines, most recent first, for a temperature telemetry line.
///
/// Returns the trimmed payload after the `TEMP:` marker of the newest
/// matching line, or `None` if the window holds no telemetry. Absence is a
/// normal outcome, not an error.
pub fn extract_temperature<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    lines.iter().rev().find_map(|line| {
        let line = line.as_ref();
        line.rfind(TEMP_MARKER)
            .map(|pos| line[pos + TEMP_MARKER.len()..].trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Color;

    fn sample_protocol() -> Protocol {
        Protocol {
            name: "P1".into(),
            color: Color::Red,
            intensity: 200,
            active: 5.0,
            silent: 2.0,
            pulse_on: 1.0,
            pulse_off: 1.0,
            total: 30.0,
        }
    }

    #[test]
    fn test_encode_create_protocol() {
        let frame = encode_create_protocol(&sample_protocol()).unwrap();
        assert_eq!(frame, "<P1,200,PROTOCOL,5,2,1,1,30,R>");
    }

    #[test]
    fn test_encode_fractional_durations() {
        let mut p = sample_protocol();
        p.pulse_on = 0.5;
        let frame = encode_create_protocol(&p).unwrap();
        assert_eq!(frame, "<P1,200,PROTOCOL,5,2,0.5,1,30,R>");
    }

    #[test]
    fn test_encode_rejects_bad_name() {
        let mut p = sample_protocol();
        p.name = "".into();
        assert!(matches!(
            encode_create_protocol(&p),
            Err(PlateError::Validation(_))
        ));

        p.name = "a,b".into();
        assert!(encode_create_protocol(&p).is_err());
    }

    #[test]
    fn test_encode_rejects_negative_duration() {
        let mut p = sample_protocol();
        p.silent = -1.0;
        assert!(encode_create_protocol(&p).is_err());
    }

    #[test]
    fn test_encode_assign_well() {
        assert_eq!(encode_assign_well("A", "1", 0).unwrap(), "<A,1,ASSIGN,0>");
        assert!(encode_assign_well("AA", "1", 0).is_err());
        assert!(encode_assign_well("A", "x", 0).is_err());
        assert!(encode_assign_well("", "1", 0).is_err());
    }

    #[test]
    fn test_encode_assign_range() {
        assert_eq!(
            encode_assign_range("B", "1", "B", "4", 2).unwrap(),
            "<B,1,RANGE,B,4,2>"
        );
        assert!(encode_assign_range("B", "1", "B4", "4", 2).is_err());
    }

    #[test]
    fn test_fixed_frames() {
        assert_eq!(encode_start("run7").unwrap(), "<run7,0,START>");
        assert!(encode_start("  ").is_err());
        assert_eq!(encode_stop(), "<0,0,STOP>");
        assert_eq!(encode_temperature_request(), "<0,0,TEMP>");
    }

    #[test]
    fn test_extract_temperature_newest_first() {
        let lines = vec![
            "boot ok".to_string(),
            "TEMP: 21.0".to_string(),
            "status led on".to_string(),
            "TEMP: 23.5".to_string(),
            "ack".to_string(),
        ];
        assert_eq!(extract_temperature(&lines).as_deref(), Some("23.5"));
    }

    #[test]
    fn test_extract_temperature_absent() {
        let lines = vec!["ack".to_string(), "ready".to_string()];
        assert_eq!(extract_temperature(&lines), None);
        assert_eq!(extract_temperature::<String>(&[]), None);
    }
}
