/// Filename entity extraction: lab naming scenarios and properties.
use megbids::entity::{extract, Datatype, Description, ProcessingStep};
use megbids::ExtractError;
use proptest::prelude::*;

#[test]
fn triux_task_with_processing() {
    let e = extract("NatMEG_0123/231101/meg/task1_tsss_mc.fif").unwrap();
    assert_eq!(e.subject_raw, "0123");
    assert_eq!(e.task, "Task1");
    assert_eq!(e.processing, vec![ProcessingStep::Tsss, ProcessingStep::Mc]);
    assert_eq!(e.processing_label(), "tsss+mc");
    assert_eq!(e.extension, ".fif");
    assert_eq!(e.split, "");
}

#[test]
fn opm_task_comes_from_file_segment() {
    let e = extract("sub-0045/file-restingstate_opm_raw.fif").unwrap();
    assert_eq!(e.subject_raw, "0045");
    assert_eq!(e.task, "restingstate");
    assert!(e.datatypes.contains(&Datatype::Opm));
}

#[test]
fn opm_export_with_session_prefix() {
    let e = extract("sub-0045/20231101_103722_sub-0045_file-AudOddopm_raw.fif").unwrap();
    assert_eq!(e.task, "AudOdd");
}

#[test]
fn empty_room_before_and_after() {
    let before = extract("NatMEG_0123/231101/meg/emptyroom_before.fif").unwrap();
    let after = extract("NatMEG_0123/231101/meg/emptyroom_after.fif").unwrap();
    assert_eq!(before.task, "NoiseBefore");
    assert_eq!(after.task, "NoiseAfter");
    assert!(before.is_noise());
    assert_eq!(extract("NatMEG_0123/231101/meg/Empty_room.fif").unwrap().task, "Noise");
}

#[test]
fn multi_segment_task_is_camel_cased() {
    let e = extract("NatMEG_0123/231101/meg/aud_odd_ball_raw.fif").unwrap();
    assert_eq!(e.task, "AudOddBall");
    assert_eq!(e.datatypes, vec![Datatype::Raw]);
}

#[test]
fn participant_in_basename_is_removed_from_task() {
    let e = extract("/raw/NatMEG_0123_rest_0123_raw.fif").unwrap();
    assert_eq!(e.subject_raw, "0123");
    assert_eq!(e.task, "Rest");
}

#[test]
fn headpos_description_and_split() {
    let e = extract("NatMEG_0123/231101/meg/rest_headpos_raw-2.fif").unwrap();
    assert_eq!(e.description, vec![Description::Headpos]);
    assert_eq!(e.description_label(), "headpos");
    assert_eq!(e.split, "02");
    assert_eq!(e.task, "Rest");
}

#[test]
fn correlation_token() {
    let e = extract("NatMEG_0123/231101/meg/rest_proc-tsss+corr98+mc_meg.fif").unwrap();
    assert_eq!(
        e.processing,
        vec![ProcessingStep::Tsss, ProcessingStep::Corr(98), ProcessingStep::Mc]
    );
    assert_eq!(e.task, "Rest");
}

#[test]
fn missing_participant_is_malformed() {
    assert!(matches!(
        extract("/data/rest_raw.fif"),
        Err(ExtractError::MalformedFilename(_))
    ));
}

#[test]
fn nothing_left_is_ambiguous() {
    assert!(matches!(
        extract("NatMEG_0123/231101/meg/tsss_mc_raw.fif"),
        Err(ExtractError::AmbiguousTask(_))
    ));
}

fn known_suffix() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["", "_raw", "_tsss", "_tsss_mc", "_meg", "_trans", "-1"]).prop_map(str::to_string)
}

proptest! {
    #[test]
    fn participant_never_reappears_in_task(
        participant in "[0-9]{1,5}",
        task in "[a-z0-9]{1,8}",
        suffix in known_suffix(),
    ) {
        let name = format!("NatMEG_{participant}/231101/meg/{task}{participant}{suffix}.fif");
        match extract(&name) {
            Ok(e) => {
                prop_assert_eq!(&e.subject_raw, &participant);
                prop_assert!(!e.task.contains(&participant), "{} -> {}", name, e.task);
            }
            Err(ExtractError::AmbiguousTask(_)) => {}
            Err(other) => prop_assert!(false, "{name}: {other}"),
        }
    }

    #[test]
    fn noise_recordings_get_a_noise_task(
        marker in prop::sample::select(vec!["empty", "noise", "Empty", "EmptyRoom", "empty_room"]),
        when in prop::sample::select(vec!["", "_before", "_after", "before", "after"]),
        suffix in prop::sample::select(vec!["", "_raw", "_tsss", "_meg"]),
    ) {
        let name = format!("NatMEG_0123/231101/meg/{marker}{when}{suffix}.fif");
        let e = extract(&name).unwrap();
        let expected = if when.contains("before") {
            "NoiseBefore"
        } else if when.contains("after") {
            "NoiseAfter"
        } else {
            "Noise"
        };
        prop_assert_eq!(e.task, expected);
    }
}
