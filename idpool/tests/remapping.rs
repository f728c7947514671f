#![allow(clippy::unwrap_used, clippy::expect_used)]

use booster_idpool::audit::{self, AuditMode};
use booster_idpool::tabular;
use booster_idpool::{
    CorrectionEntry, IdPoolError, IdentifierStore, ProjectId, RemapOptions, RemappingEngine,
    Warning,
};
use pretty_assertions::assert_eq;

fn pid() -> ProjectId {
    ProjectId::new("2311").unwrap()
}

fn bound(store: &IdentifierStore) -> Vec<(String, Option<String>)> {
    store
        .export(&pid())
        .unwrap()
        .into_iter()
        .map(|r| (r.identifier, r.record_key))
        .collect()
}

fn setup(pairs: &[(&str, &str)]) -> (tempfile::TempDir, IdentifierStore, RemappingEngine) {
    let dir = tempfile::tempdir().unwrap();
    let store = IdentifierStore::open(&dir.path().join("id_gen.db")).unwrap();
    let pairs: Vec<(String, String)> = pairs
        .iter()
        .map(|(i, r)| ((*i).to_string(), (*r).to_string()))
        .collect();
    store.import_map(&pid(), &pairs).unwrap();
    let engine = RemappingEngine::new(store.clone());
    (dir, store, engine)
}

#[test]
fn two_way_swap_exchanges_records() {
    let (_dir, store, engine) = setup(&[("X", "r1"), ("Y", "r2")]);
    let report = engine
        .apply(
            &pid(),
            &[CorrectionEntry::new("X", "Y"), CorrectionEntry::new("Y", "X")],
            RemapOptions::default(),
        )
        .unwrap();

    assert_eq!(report.applied.len(), 2);
    assert!(report.released.is_empty());
    assert_eq!(
        bound(&store),
        vec![
            ("X".to_string(), Some("r2".to_string())),
            ("Y".to_string(), Some("r1".to_string())),
        ]
    );
}

#[test]
fn swapped_identifiers_are_returned_for_their_new_records() {
    let (_dir, store, engine) = setup(&[("X", "r1"), ("Y", "r2")]);
    engine
        .apply(
            &pid(),
            &[CorrectionEntry::new("X", "Y"), CorrectionEntry::new("Y", "X")],
            RemapOptions::default(),
        )
        .unwrap();

    assert_eq!(store.get_or_allocate(&pid(), "r1").unwrap().as_deref(), Some("Y"));
    assert_eq!(store.get_or_allocate(&pid(), "r2").unwrap().as_deref(), Some("X"));
}

#[test]
fn csv_batch_drives_a_three_cycle() {
    let (_dir, store, engine) = setup(&[("A", "r1"), ("B", "r2"), ("C", "r3")]);
    let csv = "current_id,corrected_id\nA,B\nB,C\nC,A\n";
    let entries = tabular::read_corrections(csv.as_bytes()).unwrap();

    let report = engine.apply(&pid(), &entries, RemapOptions::default()).unwrap();
    assert_eq!(
        bound(&store),
        vec![
            ("A".to_string(), Some("r3".to_string())),
            ("B".to_string(), Some("r1".to_string())),
            ("C".to_string(), Some("r2".to_string())),
        ]
    );

    let trail = audit::batch_entries(&store, &pid(), &report.batch_id).unwrap();
    assert_eq!(trail.len(), 3);
    assert!(trail.iter().all(|e| e.mode == AuditMode::Remap));
}

#[test]
fn unknown_identifier_strictness() {
    let entries = [CorrectionEntry::new("X", "Y"), CorrectionEntry::new("Y", "NOPE")];

    let (_dir, store, engine) = setup(&[("X", "r1"), ("Y", "r2")]);
    let before = bound(&store);
    let err = engine
        .apply(
            &pid(),
            &entries,
            RemapOptions {
                strict: true,
                dry_run: false,
            },
        )
        .unwrap_err();
    assert!(matches!(err, IdPoolError::Validation { .. }));
    assert_eq!(bound(&store), before);

    // Lenient mode skips the bad entry, which leaves Y's record displaced,
    // so the batch is still rejected as a whole.
    let err = engine
        .apply(&pid(), &entries, RemapOptions::default())
        .unwrap_err();
    assert!(matches!(err, IdPoolError::Validation { .. }));
    assert_eq!(bound(&store), before);
}

#[test]
fn lenient_mode_reports_skipped_entries() {
    let (_dir, store, engine) = setup(&[("X", "r1")]);
    store.load(&pid(), &["Y".to_string()], false).unwrap();

    let report = engine
        .apply(
            &pid(),
            &[
                CorrectionEntry::new("X", "Y"),
                CorrectionEntry::new("GHOST", "X"),
            ],
            RemapOptions::default(),
        )
        .unwrap();

    assert_eq!(
        report.warnings,
        vec![Warning::IdentifierNotFound {
            identifier: "GHOST".to_string(),
            role: "current_id",
        }]
    );
    assert_eq!(report.released, vec!["X".to_string()]);
    assert_eq!(
        bound(&store),
        vec![
            ("X".to_string(), None),
            ("Y".to_string(), Some("r1".to_string())),
        ]
    );
}

#[test]
fn lenient_mode_skips_unknown_corrected_id_and_applies_the_rest() {
    let (_dir, store, engine) = setup(&[("X", "r1"), ("Y", "r2")]);
    store.load(&pid(), &["Z".to_string()], false).unwrap();

    let report = engine
        .apply(
            &pid(),
            &[
                CorrectionEntry::new("X", "NOPE"),
                CorrectionEntry::new("Y", "Z"),
            ],
            RemapOptions::default(),
        )
        .unwrap();

    assert_eq!(
        report.warnings,
        vec![Warning::IdentifierNotFound {
            identifier: "NOPE".to_string(),
            role: "corrected_id",
        }]
    );
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].current_id, "Y");
    assert_eq!(report.applied[0].record.as_deref(), Some("r2"));
    assert_eq!(report.released, vec!["Y".to_string()]);
    assert_eq!(
        bound(&store),
        vec![
            ("X".to_string(), Some("r1".to_string())),
            ("Y".to_string(), None),
            ("Z".to_string(), Some("r2".to_string())),
        ]
    );
}

#[test]
fn dry_run_reports_without_committing() {
    let (_dir, store, engine) = setup(&[("X", "r1"), ("Y", "r2")]);
    let before = bound(&store);
    let report = engine
        .apply(
            &pid(),
            &[CorrectionEntry::new("X", "Y"), CorrectionEntry::new("Y", "X")],
            RemapOptions {
                strict: true,
                dry_run: true,
            },
        )
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.applied.len(), 2);
    assert_eq!(bound(&store), before);
    assert!(
        audit::batch_entries(&store, &pid(), &report.batch_id)
            .unwrap()
            .is_empty()
    );
}
