/// Conversion table building and persistence.
mod common;

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use common::{header, meg_header, touch, ScriptedInspector};
use megbids::fiff::constants::FIFFV_STIM_CH;
use megbids::table::{latest_table, log_dir};
use megbids::{Acquisition, ConversionTable, RunConversion, SourceTree, TableBuilder, TaskFlag};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
}

fn triux(root: &Path) -> Vec<SourceTree> {
    vec![SourceTree { acquisition: Acquisition::Triux, root: root.to_path_buf() }]
}

#[test]
fn builder_plans_targets_and_flags_minorities() {
    let src = tempfile::tempdir().unwrap();
    let bids = tempfile::tempdir().unwrap();
    touch(&src.path().join("NatMEG_0123/231101/meg/rest_raw.fif"));
    touch(&src.path().join("NatMEG_0123/231201/meg/rest_raw.fif"));
    touch(&src.path().join("NatMEG_0124/231102/meg/rest_raw.fif"));
    let inspector = ScriptedInspector::new().with("*", meg_header());

    let report = TableBuilder::new(bids.path(), &inspector, day()).build(&triux(src.path()));
    assert!(report.errors.is_empty());
    let rows = &report.table.rows;
    assert_eq!(rows.len(), 3);

    let first = &rows[0];
    assert_eq!(first.participant_from, "NatMEG_0123");
    assert_eq!(first.participant_to, "0123");
    assert_eq!(first.session_to, "231101");
    assert_eq!(first.task, "Rest");
    assert_eq!(first.datatype, "meg");
    assert_eq!(first.acquisition, "triux");
    assert_eq!(first.time_stamp, "20240131");
    assert_eq!(first.run_conversion, RunConversion::Yes);
    assert_eq!(first.bids_name, "sub-0123_ses-231101_task-Rest_acq-triux_meg.fif");
    assert_eq!(
        Path::new(&first.bids_path),
        bids.path().join("sub-0123/ses-231101/meg")
    );

    let flags: Vec<_> = rows.iter().map(|r| (r.participant_to.as_str(), r.task_count, r.task_flag)).collect();
    assert_eq!(
        flags,
        vec![("0123", 2, TaskFlag::Ok), ("0123", 2, TaskFlag::Ok), ("0124", 1, TaskFlag::Check)]
    );
    assert_eq!(report.table.inconsistent_rows().len(), 1);
}

#[test]
fn unplannable_files_are_reported_not_tabled() {
    let src = tempfile::tempdir().unwrap();
    let bids = tempfile::tempdir().unwrap();
    let meg = src.path().join("NatMEG_0123/231101/meg");
    touch(&meg.join("rest_raw.fif"));
    touch(&meg.join("tsss_mc_raw.fif"));
    touch(&meg.join("trigger_raw.fif"));
    let inspector = ScriptedInspector::new()
        .with("trigger_raw.fif", header(&[(FIFFV_STIM_CH, 0)]))
        .with("*", meg_header());

    let report = TableBuilder::new(bids.path(), &inspector, day()).build(&triux(src.path()));
    assert_eq!(report.table.len(), 1);
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().any(|e| e.path.ends_with("tsss_mc_raw.fif")));
    assert!(report.errors.iter().any(|e| e.message.contains("no MEG or EEG")));
}

#[test]
fn existing_targets_are_marked_done() {
    let src = tempfile::tempdir().unwrap();
    let bids = tempfile::tempdir().unwrap();
    touch(&src.path().join("NatMEG_0123/231101/meg/rest_raw.fif"));
    touch(&bids.path().join("sub-0123/ses-231101/meg/sub-0123_ses-231101_task-Rest_acq-triux_split-01_meg.fif"));
    let inspector = ScriptedInspector::new().with("*", meg_header());

    let report = TableBuilder::new(bids.path(), &inspector, day()).build(&triux(src.path()));
    assert_eq!(report.table.rows[0].run_conversion, RunConversion::No);
}

#[test]
fn opm_tree_uses_hedscan_acquisition() {
    let src = tempfile::tempdir().unwrap();
    let bids = tempfile::tempdir().unwrap();
    touch(&src.path().join("sub-0045/20231101_103722_sub-0045_file-AudOddopm_raw.fif"));
    let inspector = ScriptedInspector::new().with("*", meg_header());
    let tree = SourceTree { acquisition: Acquisition::Hedscan, root: src.path().to_path_buf() };

    let report = TableBuilder::new(bids.path(), &inspector, day()).build(&[tree]);
    let row = &report.table.rows[0];
    assert_eq!(row.participant_from, "sub-0045");
    assert_eq!(row.session_to, "231101");
    assert_eq!(row.bids_name, "sub-0045_ses-231101_task-AudOdd_acq-hedscan_meg.fif");
}

#[test]
fn saved_tables_load_back_unchanged() {
    let src = tempfile::tempdir().unwrap();
    let bids = tempfile::tempdir().unwrap();
    touch(&src.path().join("NatMEG_0123/231101/meg/rest_raw.fif"));
    touch(&src.path().join("NatMEG_0123/231101/meg/rest_headpos_raw-1.fif"));
    touch(&src.path().join("NatMEG_0124/231102/meg/rest_tsss_mc.fif"));
    let inspector = ScriptedInspector::new().with("*", meg_header());
    let table = TableBuilder::new(bids.path(), &inspector, day()).build(&triux(src.path())).table;

    let first = table.save_new(bids.path(), day()).unwrap();
    let second = table.save_new(bids.path(), day()).unwrap();
    assert!(first.ends_with("conversion_logs/20240131_conversion.tsv"));
    assert!(second.ends_with("conversion_logs/20240131_r1_conversion.tsv"));
    assert_eq!(latest_table(&log_dir(bids.path())), Some(second.clone()));

    let loaded = ConversionTable::load(&second).unwrap();
    assert_eq!(loaded, table);
    let split = loaded.rows.iter().find(|r| r.is_split()).unwrap();
    assert_eq!(split.split, "01");
    assert_eq!(split.description, "headpos");

    let text = fs::read_to_string(&second).unwrap();
    let header_line = text.lines().next().unwrap();
    assert!(header_line.starts_with("time_stamp\trun_conversion\ttask_count\ttask_flag\t"));
}

#[test]
fn loading_keeps_manual_flag_edits() {
    let dir = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    touch(&src.path().join("NatMEG_0123/231101/meg/rest_raw.fif"));
    touch(&src.path().join("NatMEG_0123/231201/meg/rest_raw.fif"));
    touch(&src.path().join("NatMEG_0124/231102/meg/rest_raw.fif"));
    let inspector = ScriptedInspector::new().with("*", meg_header());
    let mut table = TableBuilder::new(dir.path(), &inspector, day()).build(&triux(src.path())).table;

    for row in &mut table.rows {
        row.task_flag = TaskFlag::Ok;
    }
    let path = table.save_new(dir.path(), day()).unwrap();
    let loaded = ConversionTable::load(&path).unwrap();
    assert!(loaded.inconsistent_rows().is_empty());
}
