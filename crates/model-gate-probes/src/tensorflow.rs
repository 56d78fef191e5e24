// crates/model-gate-probes/src/tensorflow.rs
// ============================================================================
// Module: TensorFlow Probe
// Description: SavedModel graph and variable bundle checks.
// Purpose: Detect corrupt `saved_model/` directories without loading TensorFlow.
// Dependencies: model-gate-core
// ============================================================================

//! ## Overview
//! A SavedModel directory holds the serialized graph (`saved_model.pb`, or
//! `saved_model.pbtxt` in text form) and, for models with state, a tensor
//! bundle under `variables/`. The probe decodes every meta graph and checks
//! its graph for well-formed nodes, then walks the bundle index and verifies
//! each tensor slice against its data shard and checksum.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;

use crate::crc32c;
use crate::smoke::ArtifactError;
use crate::smoke::ArtifactSummary;
use crate::smoke::SmokeLimits;
use crate::smoke::read_bounded;
use crate::table::read_table;
use crate::wire::Field;
use crate::wire::WireReader;
use crate::wire::skim;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Binary SavedModel file name.
pub const SAVED_MODEL_PB: &str = "saved_model.pb";
/// Text SavedModel file name.
pub const SAVED_MODEL_PBTXT: &str = "saved_model.pbtxt";
/// Variables subdirectory.
const VARIABLES_DIR: &str = "variables";
/// Bundle index file name.
const VARIABLES_INDEX: &str = "variables.index";
/// Graph ops that own a variable and need a bundle entry to restore.
const VARIABLE_OPS: &[&str] = &["VarHandleOp", "VariableV2", "Variable"];
/// Read buffer size for checksumming tensor slices.
const CHUNK_BYTES: usize = 64 * 1024;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Checks a `saved_model/` directory.
///
/// # Errors
///
/// Returns [`ArtifactError`] when the graph file is missing or malformed, or
/// when any variable fails its bounds or checksum check.
pub fn check_saved_model(dir: &Path, limits: &SmokeLimits) -> Result<ArtifactSummary, ArtifactError> {
    let binary = dir.join(SAVED_MODEL_PB);
    let text = dir.join(SAVED_MODEL_PBTXT);
    let graphs = if binary.is_file() {
        let bytes = read_bounded(&binary, limits.max_protobuf_bytes)?;
        check_saved_model_proto(&bytes)?
    } else if text.is_file() {
        let bytes = read_bounded(&text, limits.max_protobuf_bytes)?;
        GraphCounts {
            meta_graphs: check_saved_model_text(&bytes)?,
            ..GraphCounts::default()
        }
    } else {
        return Err(ArtifactError::Invalid(format!(
            "{} contains neither {SAVED_MODEL_PB} nor {SAVED_MODEL_PBTXT}",
            dir.display()
        )));
    };

    let variables_dir = dir.join(VARIABLES_DIR);
    let variables = if variables_dir.join(VARIABLES_INDEX).exists() {
        check_bundle(&variables_dir, limits)?
    } else if variables_dir.exists() || graphs.variable_ops > 0 {
        return Err(ArtifactError::Invalid(format!(
            "{} is missing {VARIABLES_DIR}/{VARIABLES_INDEX}",
            dir.display()
        )));
    } else {
        0
    };

    Ok(ArtifactSummary::TensorFlow {
        meta_graphs: graphs.meta_graphs,
        nodes: graphs.nodes,
        variables,
    })
}

// ============================================================================
// SECTION: Graph
// ============================================================================

/// Totals collected while walking the meta graphs.
#[derive(Debug, Default)]
struct GraphCounts {
    /// Decoded meta graphs.
    meta_graphs: usize,
    /// Graph nodes across all meta graphs.
    nodes: usize,
    /// Nodes whose op owns a variable.
    variable_ops: usize,
}

impl GraphCounts {
    /// Adds another graph's totals.
    const fn add(&mut self, other: &Self) {
        self.meta_graphs += other.meta_graphs;
        self.nodes += other.nodes;
        self.variable_ops += other.variable_ops;
    }
}

/// Decodes a binary `SavedModel`, returning its graph totals.
fn check_saved_model_proto(bytes: &[u8]) -> Result<GraphCounts, ArtifactError> {
    let mut counts = GraphCounts::default();
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => {
                value.int64("saved_model_schema_version")?;
            }
            2 => {
                counts.add(&check_meta_graph(value.bytes("meta_graphs")?)?);
                counts.meta_graphs += 1;
            }
            _ => {}
        }
    }
    if counts.meta_graphs == 0 {
        return Err(ArtifactError::Invalid("SavedModel contains no meta graphs".to_string()));
    }
    Ok(counts)
}

/// Decodes one `MetaGraphDef`, returning its node totals.
fn check_meta_graph(bytes: &[u8]) -> Result<GraphCounts, ArtifactError> {
    let mut counts = GraphCounts::default();
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            2 => counts.add(&check_graph_def(value.bytes("graph_def")?)?),
            1 | 3 ..= 7 => {
                skim(value.bytes("meta_graph_def")?)?;
            }
            _ => {}
        }
    }
    Ok(counts)
}

/// One decoded `NodeDef`.
struct NodeDef<'a> {
    /// Node name.
    name: &'a str,
    /// Operation name.
    op: &'a str,
    /// Input references.
    inputs: Vec<&'a str>,
}

/// Decodes and checks a `GraphDef`, returning its node totals.
fn check_graph_def(bytes: &[u8]) -> Result<GraphCounts, ArtifactError> {
    let mut nodes = Vec::new();
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => nodes.push(decode_node_def(value.bytes("node")?)?),
            2 | 4 => {
                skim(value.bytes("graph_def")?)?;
            }
            3 => {
                value.int32("graph_def.version")?;
            }
            _ => {}
        }
    }

    let mut names: HashSet<&str> = HashSet::with_capacity(nodes.len());
    for node in &nodes {
        if node.name.is_empty() {
            return Err(ArtifactError::Invalid("graph contains a node with an empty name".to_string()));
        }
        if !names.insert(node.name) {
            return Err(ArtifactError::Invalid(format!("graph node name '{}' is not unique", node.name)));
        }
        if node.op.is_empty() {
            return Err(ArtifactError::Invalid(format!("graph node '{}' has an empty op", node.name)));
        }
    }
    for node in &nodes {
        for input in &node.inputs {
            let source = input_source(input);
            if !names.contains(source) {
                return Err(ArtifactError::Invalid(format!(
                    "input '{input}' of graph node '{}' does not refer to a node in the graph",
                    node.name
                )));
            }
        }
    }
    Ok(GraphCounts {
        meta_graphs: 0,
        nodes: nodes.len(),
        variable_ops: nodes.iter().filter(|node| VARIABLE_OPS.contains(&node.op)).count(),
    })
}

/// Decodes a `NodeDef`.
fn decode_node_def(bytes: &[u8]) -> Result<NodeDef<'_>, ArtifactError> {
    let mut node = NodeDef {
        name: "",
        op: "",
        inputs: Vec::new(),
    };
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => node.name = value.string("node.name")?,
            2 => node.op = value.string("node.op")?,
            3 => node.inputs.push(value.string("node.input")?),
            4 => {
                value.string("node.device")?;
            }
            5 => {
                skim(value.bytes("node.attr")?)?;
            }
            _ => {}
        }
    }
    Ok(node)
}

/// Returns the node name an input reference points at.
///
/// Inputs are `name`, `name:port`, or `^name` for control dependencies.
fn input_source(input: &str) -> &str {
    let name = input.strip_prefix('^').unwrap_or(input);
    match name.rsplit_once(':') {
        Some((node, port)) if !port.is_empty() && port.bytes().all(|byte| byte.is_ascii_digit()) => node,
        _ => name,
    }
}

/// Checks a text `SavedModel`, returning the number of meta graphs.
fn check_saved_model_text(bytes: &[u8]) -> Result<usize, ArtifactError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ArtifactError::Invalid(format!("{SAVED_MODEL_PBTXT} is not valid UTF-8")))?;
    let mut depth: usize = 0;
    let mut meta_graphs = 0;
    for line in text.lines() {
        if depth == 0 && line.trim_start().starts_with("meta_graphs") {
            meta_graphs += 1;
        }
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for ch in line.chars() {
            if let Some(open) = quote {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == open {
                    quote = None;
                }
                continue;
            }
            match ch {
                '#' => break,
                '"' | '\'' => quote = Some(ch),
                '{' | '<' => depth += 1,
                '}' | '>' => {
                    depth = depth.checked_sub(1).ok_or_else(|| {
                        ArtifactError::Invalid(format!("{SAVED_MODEL_PBTXT} has an unbalanced closing brace"))
                    })?;
                }
                _ => {}
            }
        }
        if quote.is_some() {
            return Err(ArtifactError::Invalid(format!("{SAVED_MODEL_PBTXT} has an unterminated string")));
        }
    }
    if depth != 0 {
        return Err(ArtifactError::Invalid(format!("{SAVED_MODEL_PBTXT} has unbalanced braces")));
    }
    if meta_graphs == 0 {
        return Err(ArtifactError::Invalid(format!("{SAVED_MODEL_PBTXT} declares no meta_graphs")));
    }
    Ok(meta_graphs)
}

// ============================================================================
// SECTION: Variables Bundle
// ============================================================================

/// Decoded `BundleEntryProto`.
#[derive(Debug, Default)]
struct BundleEntry {
    /// Tensor dtype enum.
    dtype: i32,
    /// Dimension sizes; `None` when the rank or any size is unknown.
    dims: Option<Vec<i64>>,
    /// Data shard index.
    shard_id: i32,
    /// Byte offset within the shard.
    offset: i64,
    /// Byte length within the shard.
    size: i64,
    /// Masked CRC-32C of the slice.
    crc32c: u32,
    /// Number of partition slices; partitioned tensors store no bytes here.
    slices: usize,
}

/// Walks the tensor bundle index and verifies every tensor slice.
fn check_bundle(variables_dir: &Path, limits: &SmokeLimits) -> Result<usize, ArtifactError> {
    let index = read_bounded(&variables_dir.join(VARIABLES_INDEX), limits.max_protobuf_bytes)?;
    let entries = read_table(&index)?;
    let mut entries = entries.iter();
    let header = entries
        .next()
        .filter(|entry| entry.key.is_empty())
        .ok_or_else(|| ArtifactError::Invalid("tensor bundle index has no header entry".to_string()))?;
    let num_shards = decode_bundle_header(&header.value)?;

    let mut shards = ShardSet::new(variables_dir, num_shards);
    let mut variables = 0;
    for entry in entries {
        let name = String::from_utf8_lossy(&entry.key);
        let tensor = decode_bundle_entry(&entry.value)?;
        check_tensor_slice(&name, &tensor, &mut shards)?;
        variables += 1;
    }
    Ok(variables)
}

/// Decodes a `BundleHeaderProto`, returning the shard count.
fn decode_bundle_header(bytes: &[u8]) -> Result<i32, ArtifactError> {
    let mut num_shards = 0;
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => num_shards = value.int32("num_shards")?,
            2 => {
                value.int32("endianness")?;
            }
            3 => {
                skim(value.bytes("version")?)?;
            }
            _ => {}
        }
    }
    if num_shards <= 0 {
        return Err(ArtifactError::Invalid(format!(
            "tensor bundle header declares {num_shards} shards"
        )));
    }
    Ok(num_shards)
}

/// Decodes a `BundleEntryProto`.
fn decode_bundle_entry(bytes: &[u8]) -> Result<BundleEntry, ArtifactError> {
    let mut entry = BundleEntry {
        dims: Some(Vec::new()),
        ..BundleEntry::default()
    };
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => entry.dtype = value.int32("dtype")?,
            2 => entry.dims = decode_shape(value.bytes("shape")?)?,
            3 => entry.shard_id = value.int32("shard_id")?,
            4 => entry.offset = value.int64("offset")?,
            5 => entry.size = value.int64("size")?,
            6 => entry.crc32c = value.fixed32("crc32c")?,
            7 => {
                skim(value.bytes("slices")?)?;
                entry.slices += 1;
            }
            _ => {}
        }
    }
    Ok(entry)
}

/// Decodes a `TensorShapeProto`; unknown rank or sizes yield `None`.
fn decode_shape(bytes: &[u8]) -> Result<Option<Vec<i64>>, ArtifactError> {
    let mut dims = Vec::new();
    let mut known = true;
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            2 => {
                let mut size = 0;
                for dim_field in WireReader::new(value.bytes("shape.dim")?) {
                    let dim_field = dim_field?;
                    match dim_field.number {
                        1 => size = dim_field.value.int64("shape.dim.size")?,
                        2 => {
                            dim_field.value.string("shape.dim.name")?;
                        }
                        _ => {}
                    }
                }
                known &= size >= 0;
                dims.push(size);
            }
            3 => known &= !value.boolean("shape.unknown_rank")?,
            _ => {}
        }
    }
    Ok(known.then_some(dims))
}

/// Verifies one tensor's slice against its shard.
fn check_tensor_slice(name: &str, tensor: &BundleEntry, shards: &mut ShardSet) -> Result<(), ArtifactError> {
    if tensor.slices > 0 {
        return Ok(());
    }
    let (Ok(offset), Ok(size)) = (u64::try_from(tensor.offset), u64::try_from(tensor.size)) else {
        return Err(ArtifactError::Invalid(format!(
            "tensor '{name}' has a negative offset or size"
        )));
    };
    if let (Some(width), Some(dims)) = (dtype_size(tensor.dtype), &tensor.dims) {
        let elements = dims.iter().try_fold(1u64, |acc, dim| {
            u64::try_from(*dim).ok().and_then(|dim| acc.checked_mul(dim))
        });
        if elements.and_then(|elements| elements.checked_mul(width)) != Some(size) {
            let shape = dims.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            return Err(ArtifactError::Invalid(format!(
                "tensor '{name}' holds {size} bytes, which does not match its shape [{shape}]"
            )));
        }
    }

    let shard = shards.open(tensor.shard_id)?;
    let end = offset.checked_add(size).unwrap_or(u64::MAX);
    if end > shard.len {
        return Err(ArtifactError::Invalid(format!(
            "tensor '{name}' spans bytes {offset}..{end} but {} has {} bytes",
            shard.path.display(),
            shard.len
        )));
    }
    if is_bounds_only(tensor.dtype) {
        return Ok(());
    }
    let actual = checksum_range(shard, offset, size)?;
    if actual != crc32c::unmask(tensor.crc32c) {
        return Err(ArtifactError::Invalid(format!(
            "checksum mismatch for tensor '{name}' in {}",
            shard.path.display()
        )));
    }
    Ok(())
}

/// Computes the CRC-32C of `size` bytes at `offset` in a shard.
fn checksum_range(shard: &mut Shard, offset: u64, size: u64) -> Result<u32, ArtifactError> {
    let io_error = |err: std::io::Error| ArtifactError::Io(format!("{}: {err}", shard.path.display()));
    shard.file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
    let mut reader = (&mut shard.file).take(size);
    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut crc = 0;
    let mut total: u64 = 0;
    loop {
        let read = reader.read(&mut buf).map_err(io_error)?;
        if read == 0 {
            break;
        }
        crc = crc32c::extend(crc, &buf[.. read]);
        total += u64::try_from(read).unwrap_or(u64::MAX);
    }
    if total != size {
        return Err(ArtifactError::Invalid(format!(
            "{} ended after {total} of {size} bytes",
            shard.path.display()
        )));
    }
    Ok(crc)
}

/// Open data shards, keyed by shard index.
struct ShardSet<'d> {
    /// Variables directory.
    dir: &'d Path,
    /// Declared shard count.
    num_shards: i32,
    /// Shards opened so far.
    open: HashMap<i32, Shard>,
}

/// One open data shard.
struct Shard {
    /// Shard path.
    path: PathBuf,
    /// Open file handle.
    file: File,
    /// File length in bytes.
    len: u64,
}

impl<'d> ShardSet<'d> {
    /// Creates an empty shard set.
    fn new(dir: &'d Path, num_shards: i32) -> Self {
        Self {
            dir,
            num_shards,
            open: HashMap::new(),
        }
    }

    /// Returns the shard with index `shard_id`, opening it on first use.
    fn open(&mut self, shard_id: i32) -> Result<&mut Shard, ArtifactError> {
        if shard_id < 0 || shard_id >= self.num_shards {
            return Err(ArtifactError::Invalid(format!(
                "shard id {shard_id} is outside the {} declared shards",
                self.num_shards
            )));
        }
        if !self.open.contains_key(&shard_id) {
            let path = self.dir.join(shard_file_name(shard_id, self.num_shards));
            let file = File::open(&path).map_err(|err| {
                ArtifactError::Invalid(format!("missing data shard {}: {err}", path.display()))
            })?;
            let len = file
                .metadata()
                .map_err(|err| ArtifactError::Io(format!("{}: {err}", path.display())))?
                .len();
            self.open.insert(shard_id, Shard {
                path,
                file,
                len,
            });
        }
        self.open
            .get_mut(&shard_id)
            .ok_or_else(|| ArtifactError::Invalid(format!("data shard {shard_id} is unavailable")))
    }
}

/// Returns the data shard file name for a shard index.
#[must_use]
pub fn shard_file_name(shard_id: i32, num_shards: i32) -> String {
    format!("variables.data-{shard_id:05}-of-{num_shards:05}")
}

/// Returns the fixed element size of a TensorFlow dtype, if it has one.
const fn dtype_size(dtype: i32) -> Option<u64> {
    let size = match dtype {
        4 | 6 | 10 | 11 | 12 | 24 | 25 | 26 | 27 => 1,
        5 | 14 | 15 | 16 | 17 | 19 => 2,
        1 | 3 | 13 | 22 => 4,
        2 | 8 | 9 | 23 => 8,
        18 => 16,
        _ => return None,
    };
    Some(size)
}

/// Returns true for dtypes whose bundle bytes are not a plain checksummed slice.
const fn is_bounds_only(dtype: i32) -> bool {
    matches!(dtype, 7 | 20 | 21)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
