//! End-to-end builds from line-delimited source files.

use offertrail_core::{
    cache::MemoryCache,
    config::{OrphanPolicy, PipelineConfig},
    error::PipelineError,
    jsonl,
    pipeline::DatasetBuilder,
    store::PipelineStore,
};
use std::path::{Path, PathBuf};

// ── Test helpers ────────────────────────────────────────────────────────────

const PORTFOLIO: &str = r#"{"reward":10,"channels":["email","mobile","social"],"difficulty":10,"duration":7,"offer_type":"bogo","id":"ae264e3637204a6fb9bb56bc8210ddfd"}
{"reward":3,"channels":["email","mobile","web"],"difficulty":7,"duration":7,"offer_type":"discount","id":"2298d6c36e964ae4a3e7e9706d1fb8c2"}
{"reward":0,"channels":["email","mobile","social"],"difficulty":0,"duration":3,"offer_type":"informational","id":"5a8bc65990b245e5a138643cd4eb9837"}
"#;

const PROFILE: &str = r#"{"gender":null,"age":118,"id":"68be06ca386d4c31939f3a4f0e3dd783","became_member_on":20170212,"income":null}
{"gender":"F","age":55,"id":"0610b486422d4921ae7d2bf64640c50b","became_member_on":20170715,"income":112000.0}
"#;

// The last user is absent from the profile source on purpose.
const TRANSCRIPT: &str = r#"{"person":"68be06ca386d4c31939f3a4f0e3dd783","event":"offer received","value":{"offer id":"ae264e3637204a6fb9bb56bc8210ddfd"},"time":0}
{"person":"0610b486422d4921ae7d2bf64640c50b","event":"offer received","value":{"offer id":"2298d6c36e964ae4a3e7e9706d1fb8c2"},"time":0}
{"person":"0610b486422d4921ae7d2bf64640c50b","event":"transaction","value":{"amount":21.51},"time":18}
{"person":"68be06ca386d4c31939f3a4f0e3dd783","event":"offer viewed","value":{"offer id":"ae264e3637204a6fb9bb56bc8210ddfd"},"time":6}

{"person":"0610b486422d4921ae7d2bf64640c50b","event":"offer completed","value":{"offer_id":"2298d6c36e964ae4a3e7e9706d1fb8c2","reward":3},"time":18}
{"person":"0610b486422d4921ae7d2bf64640c50b","event":"offer completed","value":{"offer_id":"2298d6c36e964ae4a3e7e9706d1fb8c2","reward":3},"time":18}
{"person":"68be06ca386d4c31939f3a4f0e3dd783","event":"offer received","value":{"offer id":"5a8bc65990b245e5a138643cd4eb9837"},"time":336}
{"person":"e2127556f4f64592b11af22de27a7932","event":"offer received","value":{"offer id":"5a8bc65990b245e5a138643cd4eb9837"},"time":168}
"#;

fn data_dir(transcript: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = std::env::temp_dir().join(format!("offertrail-e2e-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("portfolio.json"), PORTFOLIO).unwrap();
    std::fs::write(dir.join("profile.json"), PROFILE).unwrap();
    std::fs::write(dir.join("transcript.json"), transcript).unwrap();
    std::fs::write(dir.join("pipeline.json"), r#"{"reference_date":"2018-07-26"}"#).unwrap();
    dir
}

fn builder(dir: &Path) -> DatasetBuilder {
    DatasetBuilder::new(PipelineConfig::load(dir.to_str().unwrap()).unwrap())
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// The full build joins, drops the unknown user, and imputes the profile
/// with missing gender and income.
#[test]
fn build_from_files_produces_tidy_rows() {
    let dir = data_dir(TRANSCRIPT);
    let outcome = builder(&dir).build(&mut MemoryCache::new()).unwrap();

    assert_eq!(outcome.correlation.transactions_discarded, 1);
    assert_eq!(outcome.correlation.duplicates_removed, 1);
    assert_eq!(outcome.correlation.instances, 4);
    assert_eq!(outcome.assembly.dropped_no_user, 1, "Unregistered user must be dropped");
    assert_eq!(outcome.rows.len(), 3);

    let bogo = outcome
        .rows
        .iter()
        .find(|r| r.offer_id == "ae264e3637204a6fb9bb56bc8210ddfd")
        .unwrap();
    assert_eq!(bogo.expiration, 168);
    assert_eq!(bogo.viewed, Some(6));
    assert_eq!(bogo.completed, None);
    assert!(bogo.gender.gender_unknown);
    assert_eq!(bogo.income, 0.0);

    let discount = outcome
        .rows
        .iter()
        .find(|r| r.offer_id == "2298d6c36e964ae4a3e7e9706d1fb8c2")
        .unwrap();
    assert_eq!(discount.completed, Some(18));
    assert_eq!(discount.membership_days, 376);

    std::fs::remove_dir_all(&dir).unwrap();
}

/// A second build against the same SQLite file is served from the cache
/// and produces the same rows; both builds are recorded.
#[test]
fn file_backed_cache_serves_second_build() {
    let dir = data_dir(TRANSCRIPT);
    let config = PipelineConfig::load(dir.to_str().unwrap()).unwrap();
    let db = config.cache_db_path.to_str().unwrap().to_string();

    let mut store = PipelineStore::open(&db).unwrap();
    store.migrate().unwrap();

    let first_builder = DatasetBuilder::new(config.clone());
    let first = first_builder.build(&mut store).unwrap();
    first_builder.record(&store, &first, "test").unwrap();

    let second_builder = DatasetBuilder::new(config);
    let second = second_builder.build(&mut store).unwrap();
    second_builder.record(&store, &second, "test").unwrap();

    assert!(!first.correlation.cache_hit);
    assert!(second.correlation.cache_hit);
    assert_eq!(first.rows, second.rows);
    assert_ne!(first.run_id, second.run_id);

    let runs = store.build_runs().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].dropped_no_user, 1);
    assert_eq!(runs[1].reference_date, "2018-07-26");

    drop(store);
    std::fs::remove_dir_all(&dir).unwrap();
}

/// The written dataset reads back row for row.
#[test]
fn written_dataset_reads_back() {
    let dir = data_dir(TRANSCRIPT);
    let outcome = builder(&dir).build(&mut MemoryCache::new()).unwrap();

    let out = dir.join("out").join("dataset.jsonl");
    jsonl::write_records(&out, &outcome.rows).unwrap();
    let back: Vec<offertrail_core::assembler::DatasetRow> = jsonl::read_records(&out, "dataset").unwrap();

    assert_eq!(back, outcome.rows);
    assert!(!out.with_extension("tmp").exists(), "Temp file must be renamed away");
    std::fs::remove_dir_all(&dir).unwrap();
}

/// A broken transcript line aborts the build and names the line.
#[test]
fn malformed_transcript_line_is_fatal() {
    let broken = format!("{TRANSCRIPT}{{\"person\":\"x\",\"event\":\"offer received\"\n");
    let dir = data_dir(&broken);
    let err = builder(&dir).build(&mut MemoryCache::new()).unwrap_err();

    match err {
        PipelineError::MalformedRecord { source_name, line, .. } => {
            assert_eq!(source_name, "transcript");
            assert_eq!(line, 10, "Blank lines still count towards line numbers");
        }
        other => panic!("Expected MalformedRecord, got {other:?}"),
    }
    std::fs::remove_dir_all(&dir).unwrap();
}

/// An orphan completion aborts under the default policy and is dropped
/// when the config asks for it.
#[test]
fn orphan_policy_comes_from_config() {
    let orphan = r#"{"person":"0610b486422d4921ae7d2bf64640c50b","event":"offer completed","value":{"offer_id":"ae264e3637204a6fb9bb56bc8210ddfd","reward":10},"time":30}
"#;
    let dir = data_dir(&format!("{TRANSCRIPT}{orphan}"));

    let strict = builder(&dir).build(&mut MemoryCache::new());
    assert!(matches!(strict, Err(PipelineError::OrphanEvent { .. })));

    let mut config = PipelineConfig::load(dir.to_str().unwrap()).unwrap();
    config.orphan_policy = OrphanPolicy::Drop;
    let lenient = DatasetBuilder::new(config).build(&mut MemoryCache::new()).unwrap();
    assert_eq!(lenient.correlation.orphans_dropped, 1);
    assert_eq!(lenient.rows.len(), 3);

    std::fs::remove_dir_all(&dir).unwrap();
}
