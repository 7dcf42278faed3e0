//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use pablo_core::codec::block_digest;
use pablo_core::primitives::MAX_BLOCK_BYTES;
use pablo_core::rules::load_library;
use pablo_core::{
    EdgeId, EncodeOptions, Graph, GraphKey, LabelId, PabloConfig, PabloError, Phase, RuleId,
    RuleLibrary, Session, TokenUnit, VocabStore, decode_block, decode_pgraph, encode_pgraph_with,
    justify_edge,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::VocabAction;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a token unit file (16 MB).
const MAX_UNIT_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), PabloError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| PabloError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(PabloError::Io(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, PabloError> {
    let canonical = path.canonicalize().map_err(|e| {
        PabloError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(PabloError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent of an output path, which must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, PabloError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        PabloError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(PabloError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| PabloError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Read a file after path and size checks.
fn read_input(path: &Path, max_size: u64) -> Result<Vec<u8>, PabloError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, max_size)?;
    std::fs::read(&validated).map_err(|e| PabloError::Io(format!("Read file: {}", e)))
}

fn read_block(path: &Path) -> Result<Vec<u8>, PabloError> {
    read_input(path, MAX_BLOCK_BYTES as u64)
}

/// Parse a collaborator token unit.
pub fn read_unit(path: &Path) -> Result<TokenUnit, PabloError> {
    let bytes = read_input(path, MAX_UNIT_FILE_SIZE)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PabloError::InvalidUnit(format!("{}: {}", path.display(), e)))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), PabloError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| PabloError::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// BUILD COMMAND
// =============================================================================

/// Ingest a token unit, run every phase, attach the thumbnail and encode.
pub fn cmd_build(
    config: &PabloConfig,
    json_mode: bool,
    input: &Path,
    output: &Path,
    compress: bool,
) -> Result<(), PabloError> {
    let validated_output = validate_output_path(output)?;
    let unit = read_unit(input)?;

    tracing::info!(
        input = %input.display(),
        tokens = unit.tokens.len(),
        "building graph"
    );

    let session = Session::open(config.clone())?;
    let analysis = session.analyze(&unit)?;

    let options = if compress {
        EncodeOptions::zstd(config.codec.zstd_level)
    } else {
        config.codec.encode_options()
    };
    let bytes = encode_pgraph_with(&analysis.graph, &options)?;
    std::fs::write(&validated_output, &bytes)
        .map_err(|e| PabloError::Io(format!("Write file: {}", e)))?;
    session.close()?;

    if json_mode {
        let output = serde_json::json!({
            "output": validated_output.to_string_lossy(),
            "bytes": bytes.len(),
            "digest": block_digest(&bytes),
            "nodes": analysis.graph.num_nodes(),
            "edges": analysis.graph.num_edges(),
            "incomplete": analysis.graph.is_incomplete(),
            "report": analysis.report,
        });
        return print_json(&output);
    }

    println!(
        "Built graph {} ({} nodes, {} edges, {} firings)",
        GraphKey::of(&analysis.graph),
        analysis.graph.num_nodes(),
        analysis.graph.num_edges(),
        analysis.report.firings()
    );
    for phase in &analysis.report.phases {
        println!(
            "  {:<10} passes {}  firings {}  slack {}  rejected {}  conflicts {}{}",
            phase.phase.name(),
            phase.passes,
            phase.firings,
            phase.slack_firings,
            phase.rejected,
            phase.conflicts.len(),
            if phase.timed_out {
                "  (timed out)"
            } else if phase.truncated {
                "  (truncated)"
            } else {
                ""
            }
        );
    }
    println!("Wrote {} bytes to {:?}", bytes.len(), validated_output);
    println!("Digest: {}", block_digest(&bytes));

    Ok(())
}

// =============================================================================
// DECODE COMMAND
// =============================================================================

#[derive(Debug)]
struct GraphSummary {
    key: GraphKey,
    graph_type: String,
    nodes: u32,
    edges: u32,
    live_nodes: usize,
    live_edges: usize,
    firings: usize,
    slack_spent: u32,
    incomplete: bool,
    thumbnail_dims: Option<usize>,
}

impl GraphSummary {
    fn of(graph: &Graph) -> Self {
        Self {
            key: GraphKey::of(graph),
            graph_type: graph.graph_type().name().to_string(),
            nodes: graph.num_nodes(),
            edges: graph.num_edges(),
            live_nodes: graph.live_nodes().count(),
            live_edges: graph.live_edges().count(),
            firings: graph.trail().len(),
            slack_spent: graph.slack_spent(),
            incomplete: graph.is_incomplete(),
            thumbnail_dims: graph.g_features().map(<[i8]>::len),
        }
    }
}

/// Decode every record of a block.
pub fn cmd_decode(json_mode: bool, input: &Path) -> Result<(), PabloError> {
    let bytes = read_block(input)?;
    let graphs = decode_block(&bytes)?;

    if json_mode {
        return print_json(&graphs);
    }

    println!("Block {:?}", input);
    println!("  Bytes:   {}", bytes.len());
    println!("  Records: {}", graphs.len());
    println!("  Digest:  {}", block_digest(&bytes));
    for graph in &graphs {
        let summary = GraphSummary::of(graph);
        println!();
        println!("Graph {} ({})", summary.key, summary.graph_type);
        println!("  Nodes:       {} ({} live)", summary.nodes, summary.live_nodes);
        println!("  Edges:       {} ({} live)", summary.edges, summary.live_edges);
        println!("  Firings:     {}", summary.firings);
        println!("  Slack spent: {}", summary.slack_spent);
        if summary.incomplete {
            println!("  INCOMPLETE: a phase ran out of time");
        }
        if let Some(dims) = summary.thumbnail_dims {
            println!("  Thumbnail:   {} dims", dims);
        }
    }

    Ok(())
}

// =============================================================================
// JUSTIFY COMMAND
// =============================================================================

/// Print why an edge exists.
///
/// Rule names come from `paths.rules_dir` when it is configured; the chain
/// itself needs only the block.
pub fn cmd_justify(
    config: &PabloConfig,
    json_mode: bool,
    input: &Path,
    edge: u32,
    rule: Option<u32>,
) -> Result<(), PabloError> {
    let graph = decode_pgraph(&read_block(input)?)?;
    let chain = justify_edge(&graph, EdgeId(edge), rule.map(RuleId))?;

    if json_mode {
        return print_json(&chain);
    }

    let library = match &config.paths.rules_dir {
        Some(dir) => load_library(dir, &VocabStore::in_memory(), 1)?,
        None => RuleLibrary::empty(),
    };

    if chain.is_empty() {
        println!("Edge {} has no recorded firings", EdgeId(edge));
        return Ok(());
    }

    println!("Provenance of edge {}:", EdgeId(edge));
    for step in &chain {
        let j = &step.justification;
        let name = library
            .get(j.rule_id)
            .map(|r| r.name.as_str())
            .unwrap_or("?");
        println!(
            "{:indent$}{} <- {} {} v{} ({}, pass {}) {:?} support {} precision {}",
            "",
            step.element,
            j.rule_id,
            name,
            j.rule_version,
            j.phase.name(),
            j.pass,
            j.outcome,
            j.scores.support,
            j.scores.precision,
            indent = 2 + 2 * step.depth as usize
        );
    }

    Ok(())
}

// =============================================================================
// RULES COMMAND
// =============================================================================

#[derive(Debug, Serialize)]
struct RuleLine<'a> {
    rule_id: RuleId,
    name: &'a str,
    phase: Phase,
    kind: &'static str,
    strength: u64,
    mdl: u32,
    slack_penalty: Option<u16>,
}

/// Load a rule directory and print the execution order per phase.
pub fn cmd_rules(
    config: &PabloConfig,
    json_mode: bool,
    dir: Option<&Path>,
) -> Result<(), PabloError> {
    let dir = dir
        .or(config.paths.rules_dir.as_deref())
        .ok_or_else(|| PabloError::Config("no rule directory given".to_string()))?;
    // labels in rule files are interned, but validation must not grow the real vocabulary
    let library = load_library(dir, &VocabStore::in_memory(), 1)?;

    let order: Vec<RuleLine<'_>> = Phase::ALL
        .iter()
        .flat_map(|&phase| library.phase_order(phase))
        .map(|rule| RuleLine {
            rule_id: rule.id,
            name: &rule.name,
            phase: rule.phase,
            kind: rule.kind.name(),
            strength: rule.strength(),
            mdl: rule.scores.mdl,
            slack_penalty: rule.slack_penalty,
        })
        .collect();

    if json_mode {
        let output = serde_json::json!({
            "dir": dir.to_string_lossy(),
            "rules": library.len(),
            "fingerprint": format!("{:016x}", library.fingerprint()),
            "order": order,
        });
        return print_json(&output);
    }

    println!("Rule library {:?}", dir);
    println!("  Rules:       {}", library.len());
    println!("  Fingerprint: {:016x}", library.fingerprint());
    let mut current = None;
    for line in &order {
        if current != Some(line.phase) {
            println!();
            println!("Phase {}:", line.phase.name());
            current = Some(line.phase);
        }
        println!(
            "  {:>6} {:<32} {:<12} strength {:>8}  mdl {:>4}{}",
            line.rule_id.0,
            line.name,
            line.kind,
            line.strength,
            line.mdl,
            line.slack_penalty
                .map(|p| format!("  slack {}", p))
                .unwrap_or_default()
        );
    }

    Ok(())
}

// =============================================================================
// VOCAB COMMAND
// =============================================================================

fn open_vocab(config: &PabloConfig) -> Result<VocabStore, PabloError> {
    let dir = config
        .paths
        .vocab_dir
        .as_ref()
        .ok_or_else(|| PabloError::Config("no vocab_dir configured".to_string()))?;
    VocabStore::open(dir)
}

/// Intern, look up or resolve vocabulary entries.
pub fn cmd_vocab(
    config: &PabloConfig,
    json_mode: bool,
    action: &VocabAction,
) -> Result<(), PabloError> {
    let vocab = open_vocab(config)?;

    match action {
        VocabAction::Intern { entries } => {
            let mut ids = Vec::with_capacity(entries.len());
            for entry in entries {
                ids.push((entry.as_str(), vocab.get_or_insert(entry)?));
            }
            let flushed = vocab.flush()?;
            tracing::debug!(flushed, "vocabulary flushed");

            if json_mode {
                let output: Vec<_> = ids
                    .iter()
                    .map(|(entry, id)| serde_json::json!({ "entry": entry, "id": id.0 }))
                    .collect();
                return print_json(&output);
            }
            for (entry, id) in &ids {
                println!("{}\t{}", id.0, entry);
            }
        }
        VocabAction::Lookup { entry } => {
            let id = vocab.lookup_id(entry);
            if json_mode {
                return print_json(&serde_json::json!({ "entry": entry, "id": id.map(|i| i.0) }));
            }
            match id {
                Some(id) => println!("{} -> {}", entry, id.0),
                None => println!("{} not found", entry),
            }
        }
        VocabAction::Resolve { id } => {
            let entry = vocab.resolve(LabelId(*id));
            if json_mode {
                return print_json(&serde_json::json!({ "id": id, "entry": entry }));
            }
            match entry {
                Some(entry) => println!("{} -> {}", id, entry),
                None => println!("Id {} not found", id),
            }
        }
    }

    Ok(())
}

// =============================================================================
// RETAIN COMMAND
// =============================================================================

/// Store the thumbnail (and fact block) of every graph in a block.
pub fn cmd_retain(
    config: &PabloConfig,
    json_mode: bool,
    input: &Path,
    keep_facts: bool,
) -> Result<(), PabloError> {
    let graphs = decode_block(&read_block(input)?)?;
    let session = Session::open(config.clone())?;
    if session.store().is_none() {
        return Err(PabloError::Config("no store_path configured".to_string()));
    }

    let mut keys = Vec::with_capacity(graphs.len());
    for graph in &graphs {
        session.retain_graph(graph, keep_facts)?;
        keys.push(GraphKey::of(graph));
    }
    let status = session.status()?;
    session.close()?;

    if json_mode {
        let output = serde_json::json!({
            "retained": keys,
            "facts": keep_facts,
            "stored_thumbnails": status.stored_thumbnails,
            "stored_fact_blocks": status.stored_fact_blocks,
        });
        return print_json(&output);
    }

    for key in &keys {
        println!("Retained {}", key);
    }
    println!(
        "Store now holds {} thumbnails, {} fact blocks",
        status.stored_thumbnails.unwrap_or(0),
        status.stored_fact_blocks.unwrap_or(0)
    );

    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Nearest stored graphs to the first graph of a block.
pub fn cmd_query(
    config: &PabloConfig,
    json_mode: bool,
    input: &Path,
    k: usize,
) -> Result<(), PabloError> {
    let graph = decode_pgraph(&read_block(input)?)?;
    let session = Session::open(config.clone())?;
    let result = session.query_graph(&graph, k)?;

    if json_mode {
        return print_json(&result);
    }

    if result.degraded {
        println!("Index degraded: answered by linear scan");
    }
    if result.hits.is_empty() {
        println!("No stored graphs");
        return Ok(());
    }
    println!("Nearest to {}:", GraphKey::of(&graph));
    for (rank, hit) in result.hits.iter().enumerate() {
        println!("  {:>3}. {}  distance {}", rank + 1, hit.key, hit.distance);
    }

    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show vocabulary, rule library and store status.
pub fn cmd_status(config: &PabloConfig, json_mode: bool) -> Result<(), PabloError> {
    let session = Session::open(config.clone())?;
    let status = session.status()?;

    if json_mode {
        return print_json(&status);
    }

    let stored = |count: Option<usize>| count.map_or_else(|| "-".to_string(), |c| c.to_string());

    println!("Pablo Status");
    println!("============");
    println!("Vocabulary entries:  {}", status.vocab_entries);
    println!("Rule library:        v{} ({} rules)", status.library_version, status.rules);
    println!("Library fingerprint: {:016x}", status.library_fingerprint);
    println!("Indexed thumbnails:  {} ({} pending)", status.indexed, status.pending);
    println!("Stored thumbnails:   {}", stored(status.stored_thumbnails));
    println!("Stored fact blocks:  {}", stored(status.stored_fact_blocks));

    Ok(())
}
