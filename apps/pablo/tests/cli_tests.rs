//! Integration tests for the Pablo CLI commands.
//!
//! Commands run against temporary directories; assertions read back what
//! they wrote through pablo-core.

use pablo::cli::{
    VocabAction, cmd_build, cmd_decode, cmd_justify, cmd_query, cmd_retain, cmd_rules,
    cmd_status, cmd_vocab, read_unit,
};
use pablo_core::config::PathsConfig;
use pablo_core::{
    EdgeType, LabelId, NodeId, PabloConfig, PabloError, RetainStore, VocabStore, decode_pgraph,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

const DOG_CHASED_CAT: &str = r#"{
  "source_id": 1,
  "graph_id": 1,
  "text_len": 23,
  "tokens": [
    { "start": 0,  "end": 3,  "pos": "DET",   "lemma": "the",   "flags": ["is_capitalized"] },
    { "start": 4,  "end": 7,  "pos": "NOUN",  "lemma": "dog" },
    { "start": 8,  "end": 14, "pos": "VERB",  "lemma": "chase" },
    { "start": 15, "end": 18, "pos": "DET",   "lemma": "the" },
    { "start": 19, "end": 22, "pos": "NOUN",  "lemma": "cat" },
    { "start": 22, "end": 23, "pos": "PUNCT", "lemma": ".",     "flags": ["sent_end_strong"] }
  ]
}"#;

fn fixture_rules() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../crates/pablo-core/tests/fixtures/rules")
}

/// A config whose stores all live under `dir`.
fn config_in(dir: &Path) -> PabloConfig {
    PabloConfig {
        paths: PathsConfig {
            vocab_dir: Some(dir.join("vocab")),
            rules_dir: Some(fixture_rules()),
            store_path: Some(dir.join("retain.redb")),
        },
        ..PabloConfig::default()
    }
}

fn write_unit(dir: &Path, name: &str, json: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, json).expect("write unit");
    path
}

/// Build the reference sentence into `dir/out.pgraph`.
fn built(dir: &TempDir, config: &PabloConfig, compress: bool) -> PathBuf {
    let input = write_unit(dir.path(), "unit.json", DOG_CHASED_CAT);
    let output = dir.path().join("out.pgraph");
    cmd_build(config, true, &input, &output, compress).expect("build");
    output
}

// =============================================================================
// BUILD / DECODE
// =============================================================================

#[test]
fn build_writes_decodable_block() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_in(dir.path());
    let output = built(&dir, &config, false);

    let graph = decode_pgraph(&std::fs::read(&output).expect("read")).expect("decode");
    assert_eq!(graph.live_nodes().count(), 6);
    assert_eq!(graph.g_features().map(<[i8]>::len), Some(64));
    assert!(!graph.trail().is_empty());
    assert!(graph.find_edge(NodeId(2), NodeId(1), EdgeType::Dep).is_some());

    // lemmas and rule labels were interned and flushed
    let vocab = VocabStore::open(dir.path().join("vocab")).expect("vocab");
    assert!(vocab.lookup_id("dog").is_some());
    assert!(vocab.lookup_id("nsubj").is_some());

    cmd_decode(false, &output).expect("decode summary");
    cmd_decode(true, &output).expect("decode json");
}

#[test]
fn compressed_build_sets_block_flag() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_in(dir.path());
    let output = built(&dir, &config, true);

    let bytes = std::fs::read(&output).expect("read");
    assert_eq!(&bytes[..4], b"PGRB");
    assert_eq!(bytes[8] & 1, 1);
    assert!(decode_pgraph(&bytes).is_ok());
}

#[test]
fn build_rejects_malformed_unit() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_in(dir.path());
    let input = write_unit(dir.path(), "bad.json", r#"{ "source_id": 1, "tokens": 3 }"#);
    let output = dir.path().join("out.pgraph");

    let result = cmd_build(&config, false, &input, &output, false);
    assert!(matches!(result, Err(PabloError::InvalidUnit(_))));
    assert!(!output.exists());
}

#[test]
fn build_rejects_missing_output_directory() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_in(dir.path());
    let input = write_unit(dir.path(), "unit.json", DOG_CHASED_CAT);
    let output = dir.path().join("missing").join("out.pgraph");

    let result = cmd_build(&config, false, &input, &output, false);
    assert!(matches!(result, Err(PabloError::Io(_))));
}

#[test]
fn decode_rejects_garbage() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("garbage.pgraph");
    std::fs::write(&path, b"not a block").expect("write");

    let result = cmd_decode(false, &path);
    assert!(matches!(result, Err(PabloError::Format { offset: 0, .. })));
}

#[test]
fn unit_files_parse_with_defaults() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_unit(dir.path(), "unit.json", DOG_CHASED_CAT);
    let unit = read_unit(&path).expect("unit");
    assert_eq!(unit.tokens.len(), 6);
    assert!(unit.tokens[1].flags.is_empty());
    assert_eq!(unit.tokens[2].lemma, "chase");
}

// =============================================================================
// JUSTIFY / RULES
// =============================================================================

#[test]
fn justify_rule_edge() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_in(dir.path());
    let output = built(&dir, &config, false);
    let graph = decode_pgraph(&std::fs::read(&output).expect("read")).expect("decode");
    let subject = graph
        .find_edge(NodeId(2), NodeId(1), EdgeType::Dep)
        .expect("chased -> dog");

    cmd_justify(&config, false, &output, subject.id.0, None).expect("justify");
    cmd_justify(&config, true, &output, subject.id.0, Some(110)).expect("justify json");
}

#[test]
fn justify_unknown_edge_is_an_error() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_in(dir.path());
    let output = built(&dir, &config, false);

    let result = cmd_justify(&config, false, &output, 9_999, None);
    assert!(matches!(result, Err(PabloError::EdgeNotFound(_))));
}

#[test]
fn rules_command_needs_a_directory() {
    let result = cmd_rules(&PabloConfig::default(), false, None);
    assert!(matches!(result, Err(PabloError::Config(_))));

    cmd_rules(&PabloConfig::default(), false, Some(&fixture_rules())).expect("rules");
    cmd_rules(&PabloConfig::default(), true, Some(&fixture_rules())).expect("rules json");
}

#[test]
fn rules_command_reports_bad_files() {
    let dir = TempDir::new().expect("temp dir");
    std::fs::write(dir.path().join("10-broken.toml"), "[[rule]]\nrule_id = \"x\"\n")
        .expect("write");

    let result = cmd_rules(&PabloConfig::default(), false, Some(dir.path()));
    assert!(matches!(result, Err(PabloError::RuleFile(_))));
}

// =============================================================================
// VOCAB
// =============================================================================

#[test]
fn vocab_intern_persists_ids() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_in(dir.path());

    cmd_vocab(
        &config,
        false,
        &VocabAction::Intern {
            entries: vec!["dog".to_string(), "cat".to_string(), "dog".to_string()],
        },
    )
    .expect("intern");

    let vocab = VocabStore::open(dir.path().join("vocab")).expect("vocab");
    assert_eq!(vocab.len(), 2);
    assert_eq!(vocab.lookup_id("dog"), Some(LabelId(1)));
    assert_eq!(vocab.lookup_id("cat"), Some(LabelId(2)));
    drop(vocab);

    cmd_vocab(&config, true, &VocabAction::Lookup { entry: "cat".to_string() }).expect("lookup");
    cmd_vocab(&config, false, &VocabAction::Resolve { id: 1 }).expect("resolve");
    cmd_vocab(&config, false, &VocabAction::Resolve { id: 77 }).expect("resolve missing");
}

#[test]
fn vocab_without_directory_is_config_error() {
    let result = cmd_vocab(
        &PabloConfig::default(),
        false,
        &VocabAction::Lookup {
            entry: "dog".to_string(),
        },
    );
    assert!(matches!(result, Err(PabloError::Config(_))));
}

// =============================================================================
// RETAIN / QUERY / STATUS
// =============================================================================

#[test]
fn retain_then_query() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_in(dir.path());
    let output = built(&dir, &config, false);

    cmd_retain(&config, false, &output, true).expect("retain");
    {
        let store = RetainStore::open(dir.path().join("retain.redb")).expect("store");
        assert_eq!(store.thumbnail_count().expect("count"), 1);
        assert_eq!(store.fact_count().expect("count"), 1);
    }

    cmd_query(&config, false, &output, 3).expect("query");
    cmd_query(&config, true, &output, 3).expect("query json");
    cmd_status(&config, false).expect("status");
    cmd_status(&config, true).expect("status json");
}

#[test]
fn retain_thumbnail_only_keeps_no_facts() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_in(dir.path());
    let output = built(&dir, &config, false);

    cmd_retain(&config, true, &output, false).expect("retain");
    let store = RetainStore::open(dir.path().join("retain.redb")).expect("store");
    assert_eq!(store.thumbnail_count().expect("count"), 1);
    assert_eq!(store.fact_count().expect("count"), 0);
}

#[test]
fn retain_without_store_is_config_error() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = config_in(dir.path());
    let output = built(&dir, &config, false);
    config.paths.store_path = None;

    let result = cmd_retain(&config, false, &output, true);
    assert!(matches!(result, Err(PabloError::Config(_))));
}

#[test]
fn status_without_paths_uses_memory_stores() {
    cmd_status(&PabloConfig::default(), false).expect("status");
}
