use std::io::{Read, Write};

use anyhow::Context;
use bubblequant::bootstrap::effective_lengths;
use bubblequant::piecewise::PiecewiseIndex;
use log::{info, warn};

use crate::input::read_targets;

pub(crate) fn lengths<R: Read, W: Write>(
    targets_reader: R,
    writer: W,
    fragment_length: f64,
) -> anyhow::Result<()> {
    let targets = read_targets(targets_reader).context("Could not read targets")?;

    let values = effective_lengths(&targets.lengths, fragment_length);
    if let Some(target) = values.iter().position(|&value| value <= 0.0) {
        warn!(
            "Target {} has a non-positive effective length",
            targets.names[target]
        );
    }

    let index = PiecewiseIndex::from_values(&values);
    index
        .write_versioned(writer)
        .context("Could not write the effective length index")?;
    info!(
        "Stored effective lengths of {} targets in {} runs",
        values.len(),
        index.len()
    );

    Ok(())
}
