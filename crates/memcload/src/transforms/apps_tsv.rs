//! 📥 Ingest: the tab-separated line format.
//!
//! `<dev_type>\t<dev_id>\t<lat>\t<lon>\t<app>,<app>,...`
//!
//! Lines without a single tab fall back to whitespace splitting, because some
//! exports were "tab-separated" in the same way a spork is a fork.

use thiserror::Error;

use super::AppsInstalled;

/// 💀 Why a line didn't make it. Each variant is one flavor of "nope".
#[derive(Debug, Error, PartialEq)]
pub(crate) enum ParseError {
    #[error("expected at least 5 fields, got {0}")]
    TooFewFields(usize),
    #[error("empty device type or device id")]
    MissingIdentity,
    #[error("invalid geo coords: lat={lat:?} lon={lon:?}")]
    InvalidCoords { lat: String, lon: String },
    #[error("line is not valid utf-8")]
    Encoding,
}

/// 🔄 Parse one raw line into a record.
///
/// Coordinates must be real floats. App ids are forgiving: anything that isn't a
/// u32 is quietly skipped, the record survives with whatever was salvageable.
pub(crate) fn parse_line(line: &str) -> Result<AppsInstalled, ParseError> {
    // -- ✂️ only the line terminator goes; a leading tab is an (empty) field, not padding
    let line = line.trim_end_matches(['\n', '\r']);
    let fields: Vec<&str> = if line.contains('\t') {
        line.split('\t').collect()
    } else {
        line.split_whitespace().collect()
    };
    if fields.len() < 5 {
        return Err(ParseError::TooFewFields(fields.len()));
    }

    let (dev_type, dev_id, raw_lat, raw_lon, raw_apps) =
        (fields[0].trim(), fields[1].trim(), fields[2].trim(), fields[3].trim(), fields[4]);
    if dev_type.is_empty() || dev_id.is_empty() {
        return Err(ParseError::MissingIdentity);
    }

    let (lat, lon) = match (raw_lat.parse::<f64>(), raw_lon.parse::<f64>()) {
        (Ok(lat), Ok(lon)) => (lat, lon),
        _ => {
            return Err(ParseError::InvalidCoords {
                lat: raw_lat.to_string(),
                lon: raw_lon.to_string(),
            });
        }
    };

    // -- 🧹 "12,34,,abc,56" → [12, 34, 56]. The rest goes in the bin.
    let apps = raw_apps
        .split(',')
        .filter_map(|raw_app| raw_app.trim().parse::<u32>().ok())
        .collect();

    Ok(AppsInstalled {
        dev_type: dev_type.to_string(),
        dev_id: dev_id.to_string(),
        lat,
        lon,
        apps,
    })
}
