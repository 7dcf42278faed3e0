//! # Codec and Engine Benchmarks
//!
//! Encode, decode and full rule runs over a reference sentence workload.
//!
//! Run with: `cargo bench -p pablo-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use pablo_core::rules::load_library;
use pablo_core::{
    EncodeOptions, EngineConfig, Graph, GraphId, Ingestor, RuleEngine, SourceId, TokenUnit,
    UnitToken, VocabStore, decode_pgraph, encode_block, encode_pgraph, encode_pgraph_with,
    score_thumbnail,
};
use std::hint::black_box;
use std::path::PathBuf;
use std::sync::Arc;

const SENTENCE: [(&str, &str); 6] = [
    ("DET", "the"),
    ("NOUN", "dog"),
    ("VERB", "chase"),
    ("DET", "the"),
    ("NOUN", "cat"),
    ("PUNCT", "."),
];

/// `sentences` copies of "The dog chased the cat." in one unit.
fn reference_unit(sentences: usize) -> TokenUnit {
    let mut tokens = Vec::new();
    for s in 0..sentences {
        for (i, (pos, lemma)) in SENTENCE.iter().enumerate() {
            let start = ((s * SENTENCE.len() + i) * 6) as u32;
            tokens.push(UnitToken {
                start,
                end: start + 5,
                pos: (*pos).to_string(),
                lemma: (*lemma).to_string(),
                flags: if *pos == "PUNCT" {
                    vec!["sent_end_strong".to_string()]
                } else {
                    Vec::new()
                },
            });
        }
    }
    TokenUnit {
        source_id: SourceId(1),
        graph_id: GraphId(sentences as u64),
        text_len: (tokens.len() * 6) as u32,
        tokens,
    }
}

fn engine(vocab: &VocabStore) -> RuleEngine {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/rules");
    let library = load_library(dir, vocab, 1).expect("fixture rules");
    RuleEngine::new(Arc::new(library), EngineConfig::default())
}

fn analyzed(sentences: usize) -> Graph {
    let vocab = VocabStore::in_memory();
    let mut graph = Ingestor::ingest(&reference_unit(sentences), &vocab).expect("ingest");
    engine(&vocab).run_all_phases(&mut graph).expect("run");
    graph
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_pgraph");

    for sentences in [1usize, 10, 100] {
        let graph = analyzed(sentences);
        group.bench_with_input(BenchmarkId::new("plain", sentences), &graph, |b, graph| {
            b.iter(|| black_box(encode_pgraph(graph).expect("encode")));
        });
        group.bench_with_input(BenchmarkId::new("zstd", sentences), &graph, |b, graph| {
            b.iter(|| black_box(encode_pgraph_with(graph, &EncodeOptions::zstd(3)).expect("encode")));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_pgraph");

    for sentences in [1usize, 10, 100] {
        let bytes = encode_pgraph(&analyzed(sentences)).expect("encode");
        group.bench_with_input(BenchmarkId::from_parameter(sentences), &bytes, |b, bytes| {
            b.iter(|| black_box(decode_pgraph(bytes).expect("decode")));
        });
    }

    group.finish();
}

fn bench_block(c: &mut Criterion) {
    let graphs: Vec<Graph> = (1..=64).map(|_| analyzed(1)).collect();
    let refs: Vec<&Graph> = graphs.iter().collect();

    c.bench_function("encode_block_64_sentences", |b| {
        b.iter(|| black_box(encode_block(&refs, &EncodeOptions::default()).expect("encode")));
    });
}

fn bench_run_rules(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_all_phases");

    for sentences in [1usize, 10] {
        let vocab = VocabStore::in_memory();
        let engine = engine(&vocab);
        let graph = Ingestor::ingest(&reference_unit(sentences), &vocab).expect("ingest");
        group.bench_with_input(BenchmarkId::from_parameter(sentences), &graph, |b, graph| {
            b.iter(|| {
                let mut graph = graph.clone();
                engine.run_all_phases(&mut graph).expect("run");
                black_box(graph)
            });
        });
    }

    group.finish();
}

fn bench_thumbnail(c: &mut Criterion) {
    let graph = analyzed(10);
    c.bench_function("score_thumbnail_64", |b| {
        b.iter(|| black_box(score_thumbnail(&graph, 64).expect("score")));
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_block,
    bench_run_rules,
    bench_thumbnail
);

criterion_main!(benches);
