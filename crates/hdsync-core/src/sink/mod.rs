//! Measurement sink implementations
//!
//! Both sinks revalidate their input before accepting it: an invalid set
//! is rejected whole, an invalid measurement is skipped and reported.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;

use crate::model::{Measurement, MeasurementSet};

/// A set with its invalid measurements removed
pub(crate) struct Screened {
    pub set: MeasurementSet,
    pub errors: Vec<String>,
}

/// Revalidate one set against `now`
///
/// Returns `Err` with a message when the set itself is invalid.
pub(crate) fn screen(set: &MeasurementSet, now: i64) -> Result<Screened, String> {
    set.validate_fields()
        .map_err(|e| format!("{}: rejected set: {}", set.variable_name, e))?;

    let mut errors = Vec::new();
    let measurements: Vec<Measurement> = set
        .measurements
        .iter()
        .filter(|m| match m.validate_at(now) {
            Ok(()) => true,
            Err(e) => {
                errors.push(format!("{}: {}", set.variable_name, e));
                false
            }
        })
        .cloned()
        .collect();

    Ok(Screened {
        set: MeasurementSet {
            measurements,
            ..set.clone()
        },
        errors,
    })
}
