use std::io::{BufRead, Read};

use anyhow::{bail, Context};
use bubblequant::bubble::Element;

fn tsv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .from_reader(reader)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Targets {
    pub names: Vec<String>,
    pub lengths: Vec<u32>,
}

/// Reads `name<TAB>length` lines.
pub fn read_targets<R: Read>(reader: R) -> anyhow::Result<Targets> {
    let mut targets = Targets::default();

    for (line, record) in tsv_reader(reader).records().enumerate() {
        let record = record.with_context(|| format!("Could not read target {}", line + 1))?;
        if record.len() != 2 {
            bail!(
                "Target {}: expected 2 columns (name, length), found {}",
                line + 1,
                record.len()
            );
        }

        let length = record[1]
            .trim()
            .parse()
            .with_context(|| format!("Target {}: invalid length `{}`", line + 1, &record[1]))?;
        targets.names.push(record[0].to_owned());
        targets.lengths.push(length);
    }

    Ok(targets)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classes {
    pub classes: Vec<Vec<u32>>,
    pub counts: Vec<u32>,
}

/// Reads `count<TAB>t1,t2,...` lines.
pub fn read_classes<R: Read>(reader: R) -> anyhow::Result<Classes> {
    let mut classes = Classes::default();

    for (line, record) in tsv_reader(reader).records().enumerate() {
        let record = record
            .with_context(|| format!("Could not read equivalence class {}", line + 1))?;
        if record.len() != 2 {
            bail!(
                "Equivalence class {}: expected 2 columns (count, targets), found {}",
                line + 1,
                record.len()
            );
        }

        let count = record[0].trim().parse().with_context(|| {
            format!(
                "Equivalence class {}: invalid count `{}`",
                line + 1,
                &record[0]
            )
        })?;
        let targets = record[1]
            .split(',')
            .map(|target| {
                target.trim().parse::<u32>().with_context(|| {
                    format!(
                        "Equivalence class {}: invalid target `{}`",
                        line + 1,
                        target
                    )
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        classes.counts.push(count);
        classes.classes.push(targets);
    }

    Ok(classes)
}

/// Reads one observation set per line, elements separated by whitespace.
/// Lines starting with `#` are skipped.
pub fn read_sets<R: BufRead>(reader: R) -> anyhow::Result<Vec<Vec<Element>>> {
    let mut sets = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Could not read line {}", line_num + 1))?;
        if line.starts_with('#') {
            continue;
        }

        let set = line
            .split_whitespace()
            .map(|element| {
                element.parse::<Element>().with_context(|| {
                    format!("Line {}: invalid element `{}`", line_num + 1, element)
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        sets.push(set);
    }

    Ok(sets)
}

#[cfg(test)]
mod tests {
    use crate::input::{read_classes, read_sets, read_targets, Classes, Targets};

    #[test]
    fn test_read_targets() {
        let data = "ENST01\t1500\n# comment\nENST02\t 300\n";

        assert_eq!(
            read_targets(data.as_bytes()).unwrap(),
            Targets {
                names: vec!["ENST01".to_owned(), "ENST02".to_owned()],
                lengths: vec![1500, 300],
            }
        );
    }

    #[test]
    fn test_read_targets_invalid() {
        assert!(read_targets("t0\tlong\n".as_bytes()).is_err());
        assert!(read_targets("t0\t1\t2\n".as_bytes()).is_err());
    }

    #[test]
    fn test_read_classes() {
        let data = "10\t0\n5\t0,1, 2\n";

        assert_eq!(
            read_classes(data.as_bytes()).unwrap(),
            Classes {
                classes: vec![vec![0], vec![0, 1, 2]],
                counts: vec![10, 5],
            }
        );
    }

    #[test]
    fn test_read_classes_invalid() {
        assert!(read_classes("x\t0\n".as_bytes()).is_err());
        assert!(read_classes("1\t0,a\n".as_bytes()).is_err());
        assert!(read_classes("1\n".as_bytes()).is_err());
    }

    #[test]
    fn test_read_sets() {
        let data = "0 1 2\n# skipped\n1\t2\n\n2 3\n";

        assert_eq!(
            read_sets(data.as_bytes()).unwrap(),
            vec![vec![0, 1, 2], vec![1, 2], vec![], vec![2, 3]]
        );
        assert!(read_sets("1 x\n".as_bytes()).is_err());
    }
}
