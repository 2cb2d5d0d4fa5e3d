use std::io::{BufRead, Write};

use anyhow::Context;
use bubblequant::bubble::{total_cardinality, PartitionCompactor};
use itertools::Itertools;
use log::info;

use crate::input::read_sets;
use crate::PROGRESS_BAR;

/// Refines over all observation sets, then writes every set rewritten in
/// terms of bubble ids, followed by the bubble table.
pub(crate) fn compact<R: BufRead, W: Write>(reader: R, mut writer: W) -> anyhow::Result<()> {
    let sets = read_sets(reader).context("Could not read observation sets")?;
    PROGRESS_BAR.set_message("Refining");
    PROGRESS_BAR.set_length(sets.len() as u64);

    let mut compactor = PartitionCompactor::new();
    for set in &sets {
        compactor.refine(set);
        PROGRESS_BAR.inc(1);
    }

    let compact = compactor
        .rewrite_all(&sets)
        .context("Could not rewrite observation sets")?;
    info!(
        "Compacted {} elements into {} bubbles; set entries: {} -> {}",
        compactor.num_elements(),
        compactor.num_bubbles(),
        total_cardinality(&sets),
        total_cardinality(&compact)
    );

    for set in &compact {
        writeln!(writer, "{}", set.iter().join(" "))?;
    }
    writeln!(writer)?;

    let mut table = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(&mut writer);
    table.write_record(["bubble", "elements"])?;
    for (bubble, members) in compactor.bubbles() {
        table.write_record([bubble.to_string(), members.iter().sorted().join(",")])?;
    }
    table.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::cmd::compact::compact;

    #[test]
    fn test_compact() {
        let mut output = Vec::new();
        compact("0 1 2\n1 2\n2 3\n".as_bytes(), &mut output).unwrap();
        let output = String::from_utf8(output).unwrap();

        let (sets, table) = output.split_once("\n\n").unwrap();
        let sets: Vec<usize> = sets
            .lines()
            .map(|line| line.split(' ').count())
            .collect();
        assert_eq!(sets, vec![3, 2, 2]);

        let mut rows: Vec<&str> = table.lines().skip(1).collect();
        assert_eq!(table.lines().next(), Some("bubble\telements"));
        rows.sort_unstable_by_key(|row| row.split('\t').nth(1));
        let members: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.split('\t').nth(1))
            .collect();
        assert_eq!(members, vec!["0", "1", "2", "3"]);
    }
}
