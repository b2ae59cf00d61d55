//! Station broadcast decoding
//!
//! The hub broadcasts JSON datagrams tagged by a `type` field. Only two carry
//! wind: `rapid_wind` (instantaneous, every few seconds) and `obs_st` (the
//! periodic full observation, whose wind is a one-minute average). Every other
//! type (`hub_status`, `device_status`, `evt_precip`, `evt_strike`, ...) is
//! recognised as ignorable rather than treated as an error.
//!
//! ```text
//! {"type":"rapid_wind","serial_number":"ST-00000512","hub_sn":"HB-00013030",
//!  "ob":[1588948614,0.27,144]}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::units::{normalize_degrees, REFERENCE_MPS_TO_KNOTS};

/// Which broadcast a sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    RapidWind,
    ObsSt,
}

/// One reference wind observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSample {
    pub speed_knots: f64,
    /// In `[0, 360)`
    pub direction_deg: f64,
    /// Station timestamp
    pub observed_at: DateTime<Utc>,
    /// Host time the datagram was received; used for pairing and staleness
    pub received_at: DateTime<Utc>,
    pub kind: ReferenceKind,
}

/// Outcome of classifying one datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A usable wind observation
    Wind(ReferenceSample),
    /// A well-formed message of a type we don't use
    Ignored(String),
    /// Not JSON, missing fields, or impossible values
    Malformed(String),
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum StationMessage {
    #[serde(rename = "rapid_wind")]
    RapidWind { ob: Vec<Option<f64>> },
    #[serde(rename = "obs_st")]
    ObsSt { obs: Vec<Vec<Option<f64>>> },
    #[serde(other)]
    Other,
}

/// Decode a datagram into a rapid-wind sample, ignoring everything else
pub fn decode(datagram: &[u8], received_at: DateTime<Utc>) -> Option<ReferenceSample> {
    match classify(datagram, received_at) {
        Decoded::Wind(sample) if sample.kind == ReferenceKind::RapidWind => Some(sample),
        _ => None,
    }
}

/// Classify a datagram, keeping the reason for anything not usable
pub fn classify(datagram: &[u8], received_at: DateTime<Utc>) -> Decoded {
    let message: StationMessage = match serde_json::from_slice(datagram) {
        Ok(m) => m,
        Err(e) => return Decoded::Malformed(e.to_string()),
    };

    match message {
        StationMessage::RapidWind { ob } => {
            wind_from_fields(&ob, 0, 1, 2, ReferenceKind::RapidWind, received_at)
        }
        StationMessage::ObsSt { obs } => match obs.first() {
            Some(row) => wind_from_fields(row, 0, 2, 4, ReferenceKind::ObsSt, received_at),
            None => Decoded::Malformed("obs_st without observations".to_string()),
        },
        StationMessage::Other => Decoded::Ignored(message_type(datagram)),
    }
}

fn wind_from_fields(
    fields: &[Option<f64>],
    time_idx: usize,
    speed_idx: usize,
    dir_idx: usize,
    kind: ReferenceKind,
    received_at: DateTime<Utc>,
) -> Decoded {
    let get = |idx: usize| fields.get(idx).copied().flatten().filter(|v| v.is_finite());

    let (Some(epoch), Some(speed_mps), Some(direction)) = (get(time_idx), get(speed_idx), get(dir_idx))
    else {
        return Decoded::Malformed(format!("{:?}: missing wind fields", kind));
    };
    if speed_mps < 0.0 {
        return Decoded::Malformed(format!("{:?}: negative speed {}", kind, speed_mps));
    }
    let Some(observed_at) = DateTime::from_timestamp(epoch as i64, 0) else {
        return Decoded::Malformed(format!("{:?}: bad timestamp {}", kind, epoch));
    };

    Decoded::Wind(ReferenceSample {
        speed_knots: speed_mps * REFERENCE_MPS_TO_KNOTS,
        direction_deg: normalize_degrees(direction),
        observed_at,
        received_at,
        kind,
    })
}

fn message_type(datagram: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Tag {
        #[serde(rename = "type")]
        kind: String,
    }
    serde_json::from_slice::<Tag>(datagram)
        .map(|t| t.kind)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rapid_wind() {
        let msg = br#"{"type":"rapid_wind","serial_number":"ST-1","ob":[1588948614,5.0,370]}"#;
        let sample = decode(msg, Utc::now()).unwrap();
        assert!((sample.speed_knots - 9.71922).abs() < 1e-6);
        assert_eq!(sample.direction_deg, 10.0);
        assert_eq!(sample.observed_at.timestamp(), 1588948614);
    }

    #[test]
    fn test_other_types_ignored() {
        let msg = br#"{"type":"hub_status","firmware_revision":"35","uptime":1670133}"#;
        assert_eq!(
            classify(msg, Utc::now()),
            Decoded::Ignored("hub_status".to_string())
        );
        assert!(decode(msg, Utc::now()).is_none());
    }

    #[test]
    fn test_obs_st_is_classified_but_not_decoded() {
        let msg = br#"{"type":"obs_st","obs":[[1588948614,0.18,0.22,0.27,144,6,1017.57,22.37,50.26,328,0.03,3,0.0,0,0,0,2.41,1]]}"#;
        match classify(msg, Utc::now()) {
            Decoded::Wind(s) => {
                assert_eq!(s.kind, ReferenceKind::ObsSt);
                assert!((s.speed_knots - 0.22 * 1.943844).abs() < 1e-9);
                assert_eq!(s.direction_deg, 144.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(decode(msg, Utc::now()).is_none());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(classify(b"not json", Utc::now()), Decoded::Malformed(_)));
        assert!(matches!(
            classify(br#"{"type":"rapid_wind","ob":[1588948614,null,144]}"#, Utc::now()),
            Decoded::Malformed(_)
        ));
        assert!(matches!(
            classify(br#"{"type":"rapid_wind","ob":[1588948614]}"#, Utc::now()),
            Decoded::Malformed(_)
        ));
        assert!(matches!(
            classify(br#"{"ob":[1,2,3]}"#, Utc::now()),
            Decoded::Malformed(_)
        ));
    }
}
