//! Davis telemetry line parser
//!
//! The Arduino bridge prints one line per sample:
//!
//! ```text
//! wind: <iteration> <pot_value 0-1024> <rpm_tops> <rpm_raw>
//! ```
//!
//! Lines arrive from a streaming read, so a line may start with the tail of a
//! frame that was cut off when the port was opened. Anything before the
//! `wind:` marker is ignored; anything after the four fields is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::ParseError;

/// Line marker preceding the four numeric fields
pub const FRAME_MARKER: &str = "wind:";

/// One parsed sensor frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Arduino loop counter
    pub iteration: u32,
    /// Raw vane potentiometer reading (documented range 0-1024)
    pub pot_value: u16,
    /// Debounced RPM count, used for speed
    pub rpm_tops: u32,
    /// Raw RPM count (diagnostic only)
    pub rpm_raw: u32,
    /// Host time the line was read
    pub received_at: DateTime<Utc>,
}

impl RawSample {
    /// Format the sample back into its wire representation (without newline)
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {}",
            FRAME_MARKER, self.iteration, self.pot_value, self.rpm_tops, self.rpm_raw
        )
    }
}

/// Parse a line, stamping it with the current time
pub fn parse(line: &str) -> Result<RawSample, ParseError> {
    parse_at(line, Utc::now())
}

/// Parse a line, stamping it with `received_at`
pub fn parse_at(line: &str, received_at: DateTime<Utc>) -> Result<RawSample, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let start = trimmed
        .find(FRAME_MARKER)
        .ok_or_else(|| ParseError::Malformed(trimmed.to_string()))?;
    let body = &trimmed[start + FRAME_MARKER.len()..];

    let fields: Vec<&str> = body.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(ParseError::Malformed(trimmed.to_string()));
    }

    Ok(RawSample {
        iteration: field(fields[0], "iteration")?,
        pot_value: field(fields[1], "pot_value")?,
        rpm_tops: field(fields[2], "rpm_tops")?,
        rpm_raw: field(fields[3], "rpm_raw")?,
        received_at,
    })
}

fn field<T: FromStr>(token: &str, name: &'static str) -> Result<T, ParseError> {
    // Reject signs explicitly; the firmware only ever prints bare digits
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidField {
            field: name,
            value: token.to_string(),
        });
    }
    token.parse().map_err(|_| ParseError::InvalidField {
        field: name,
        value: token.to_string(),
    })
}
