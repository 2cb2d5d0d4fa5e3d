use std::io::{Read, Write};
use std::ops::Range;

use anyhow::Context;
use bubblequant::piecewise::PiecewiseIndex;
use log::info;

/// Prints a persisted effective length index, a single value or a slice.
pub(crate) fn inspect<R: Read, W: Write>(
    reader: R,
    mut writer: W,
    at: Option<u64>,
    slice: Option<Range<u64>>,
) -> anyhow::Result<()> {
    let index = PiecewiseIndex::<f64>::read_versioned(reader).context("Could not read the index")?;
    info!(
        "{} intervals covering {} positions",
        index.len(),
        index.length().unwrap_or(0)
    );

    if let Some(position) = at {
        let interval = index
            .find(position)
            .with_context(|| format!("No interval covers position {}", position))?;
        writeln!(
            writer,
            "[{}, {}): {}",
            interval.lower(),
            interval.upper(),
            interval.value()
        )?;
    } else if let Some(range) = slice {
        let slice = index
            .slice(range.start, range.end)
            .with_context(|| format!("Could not slice {}:{}", range.start, range.end))?;
        write!(writer, "{}", slice)?;
    } else {
        write!(writer, "{}", index)?;
    }

    Ok(())
}
