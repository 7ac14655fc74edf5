//! Validator / weight assignments read from a CSV file
//!
//! The file has a header row followed by `validator,weight` rows. Rows that
//! cannot be parsed are logged and skipped; the rest of the batch is kept.

use crate::error::{CompounderError, CompounderResult};

use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Share of the compounded stake delegated to one validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StakeAssignment {
    #[serde(rename = "share")]
    pub weight: u64,
    pub validator: String,
}

/// Read assignments from `path`, in file order
pub fn read_stake_assignments(path: &Path) -> CompounderResult<Vec<StakeAssignment>> {
    let file = File::open(path).map_err(|e| {
        CompounderError::StakeSource(format!("Error opening {}: {}", path.display(), e))
    })?;
    let assignments = parse_stake_assignments(file);
    debug!(
        "Read {} stake assignments from {}",
        assignments.len(),
        path.display()
    );
    Ok(assignments)
}

/// Parse assignments from CSV text, skipping the header row
pub fn parse_stake_assignments<R: Read>(reader: R) -> Vec<StakeAssignment> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut assignments = Vec::new();
    for (index, record) in reader.records().enumerate() {
        // Header is line 1
        let line = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping unreadable stake row {}: {}", line, e);
                continue;
            }
        };

        let (validator, weight) = match (record.get(0), record.get(1)) {
            (Some(validator), Some(weight)) if !validator.is_empty() => (validator, weight),
            _ => {
                warn!("Skipping incomplete stake row {}: {:?}", line, record);
                continue;
            }
        };

        match weight.parse::<u64>() {
            Ok(weight) => assignments.push(StakeAssignment {
                validator: validator.to_string(),
                weight,
            }),
            Err(e) => warn!(
                "Error parsing share from stake row {} ({:?}): {}",
                line, weight, e
            ),
        }
    }

    assignments
}
