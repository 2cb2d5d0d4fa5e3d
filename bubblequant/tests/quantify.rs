use std::fs;

use bubblequant::_internal_test_data::{random_sets, SMALL_INPUTS, SMALL_TRUE_COUNTS};
use bubblequant::bootstrap::{
    effective_lengths, quantify, seeds_from, BootstrapParams, BootstrapRecord, EmEstimator,
    ModelInputs, MsgpackBootstrapWriter, MsgpackRecordReader, RunMetadata, TsvBootstrapWriter,
};
use bubblequant::bubble::{total_cardinality, PartitionCompactor};
use bubblequant::piecewise::PiecewiseIndex;
use tempfile::TempDir;

#[test_log::test]
fn test_compacted_classes_cover_same_targets() {
    let sets = random_sets(500, 5000, 8);
    let mut compactor = PartitionCompactor::new();
    compactor.refine_all(&sets);

    let compact = compactor.rewrite_all(&sets).unwrap();
    assert!(total_cardinality(&compact) < total_cardinality(&sets));

    for (set, compact_set) in sets.iter().zip(&compact) {
        assert_eq!(&compactor.expand(compact_set).unwrap(), set);
    }
}

#[test_log::test]
fn test_persisted_effective_lengths() {
    let lengths = [1000, 1000, 1000, 150, 150, 2000];
    let index = PiecewiseIndex::from_values(&effective_lengths(&lengths, 200.0));
    assert_eq!(index.len(), 3);

    let mut data = Vec::new();
    index.write_versioned(&mut data).unwrap();
    let index = PiecewiseIndex::<f64>::read_versioned(data.as_slice()).unwrap();

    let names = (0..lengths.len()).map(|i| format!("t{}", i)).collect();
    let inputs = ModelInputs::new(names, lengths.to_vec(), vec![vec![0, 1, 2], vec![3, 4, 5]])
        .unwrap()
        .with_effective_lengths(index)
        .unwrap();

    assert_eq!(
        inputs.dense_effective_lengths(),
        vec![801.0, 801.0, 801.0, 150.0, 150.0, 1801.0]
    );
}

#[test_log::test]
fn test_quantify_to_tsv_directory() {
    let dir = TempDir::new().unwrap();
    let metadata = RunMetadata::new(&SMALL_INPUTS, &SMALL_TRUE_COUNTS, 4)
        .with_call("bubblequant quant -b 4")
        .with_start_time("Thu Jan  1 00:00:00 1970");
    let params = BootstrapParams::builder()
        .seeds(seeds_from(2137, 4))
        .thread_num(2)
        .build();

    let report = quantify(
        &SMALL_INPUTS,
        &SMALL_TRUE_COUNTS,
        &EmEstimator::new(),
        TsvBootstrapWriter::new(dir.path()),
        &metadata,
        params,
    )
    .unwrap();

    assert!(report.is_complete());
    assert!(dir.path().join("run_info.json").exists());
    assert!(dir.path().join("abundance.tsv").exists());
    for id in 0..4 {
        let file = dir.path().join(format!("bs_abundance_{}.tsv", id));
        let contents = fs::read_to_string(file).unwrap();
        assert_eq!(contents.lines().count(), 4);
        assert!(contents.lines().nth(1).unwrap().starts_with("t0\t"));
    }
}

#[test_log::test]
fn test_quantify_to_msgpack_stream() {
    let metadata = RunMetadata::new(&SMALL_INPUTS, &SMALL_TRUE_COUNTS, 6);
    let params = BootstrapParams::builder()
        .seeds(seeds_from(1, 6))
        .thread_num(3)
        .build();

    let report = quantify(
        &SMALL_INPUTS,
        &SMALL_TRUE_COUNTS,
        &EmEstimator::new(),
        MsgpackBootstrapWriter::new(Vec::new()),
        &metadata,
        params,
    )
    .unwrap();
    let data = report.into_writer().into_inner();

    let records = MsgpackRecordReader::new(data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(records.len(), 8);
    assert_eq!(records[0], BootstrapRecord::Info(metadata));
    assert!(matches!(records[1], BootstrapRecord::Main { .. }));

    let mut ids: Vec<usize> = records[2..]
        .iter()
        .filter_map(|record| match record {
            BootstrapRecord::Bootstrap { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
}
