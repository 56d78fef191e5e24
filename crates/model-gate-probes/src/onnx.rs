// crates/model-gate-probes/src/onnx.rs
// ============================================================================
// Module: ONNX Probe
// Description: Full decode and structural check of `.onnx` model files.
// Purpose: Detect truncated, bit-flipped, or structurally invalid ONNX models.
// Dependencies: model-gate-core
// ============================================================================

//! ## Overview
//! The probe decodes the whole `ModelProto` with the wire reader, resolves
//! tensors stored in external data files, and then applies the structural
//! rules an ONNX checker enforces: IR version and opset presence, operator
//! schemas at the imported opset, graph naming, topological node order,
//! single assignment of values, and consistent initializer payloads. Subgraphs carried in node attributes are
//! checked recursively with the enclosing scope visible.
//!
//! ## Invariants
//! - The model file is read fully into memory only after a size check.
//! - External data must live inside the model directory.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs;
use std::path::Component;
use std::path::Path;

use crate::onnx_ops::OpStatus;
use crate::onnx_ops::canonical_domain;
use crate::onnx_ops::max_opset_version;
use crate::onnx_ops::resolve_operator;
use crate::smoke::ArtifactError;
use crate::smoke::ArtifactSummary;
use crate::smoke::SmokeLimits;
use crate::smoke::read_bounded;
use crate::wire::Field;
use crate::wire::FieldValue;
use crate::wire::WireReader;
use crate::wire::packed_varints;
use crate::wire::skim;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Newest IR version the checker accepts.
pub const MAX_IR_VERSION: i64 = 11;
/// First IR version that requires `opset_import`.
const OPSET_REQUIRED_IR_VERSION: i64 = 3;
/// Default-domain opset implied by models older than `opset_import`.
const IMPLIED_OPSET_VERSION: i64 = 1;
/// First IR version that allows initializers that are not graph inputs.
const FREE_INITIALIZER_IR_VERSION: i64 = 4;
/// `TensorProto.data_location` value for external storage.
const EXTERNAL_LOCATION: i32 = 1;
/// Maximum nesting depth of attribute subgraphs.
const MAX_SUBGRAPH_DEPTH: usize = 64;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Decodes and checks one ONNX model file.
///
/// # Errors
///
/// Returns [`ArtifactError`] when the file cannot be read, fails to decode,
/// or violates a structural rule.
pub fn check_model(path: &Path, limits: &SmokeLimits) -> Result<ArtifactSummary, ArtifactError> {
    let bytes = read_bounded(path, limits.max_protobuf_bytes)?;
    let model = decode_model(&bytes)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut opsets: BTreeMap<&str, i64> =
        model.opsets.iter().map(|&(domain, version)| (canonical_domain(domain), version)).collect();
    if model.opsets.is_empty() && model.ir_version.is_some_and(|version| version < OPSET_REQUIRED_IR_VERSION) {
        opsets.insert("", IMPLIED_OPSET_VERSION);
    }
    let checker = Checker {
        base_dir,
        opsets,
        functions: model.functions.iter().map(|&(domain, name)| (canonical_domain(domain), name)).collect(),
    };
    checker.check_model(&model)
}

// ============================================================================
// SECTION: Decoded Model
// ============================================================================

/// Decoded `ModelProto` fields the checker needs.
#[derive(Debug, Default)]
struct Model<'a> {
    /// `ir_version`, when present.
    ir_version: Option<i64>,
    /// `opset_import` entries as (domain, version).
    opsets: Vec<(&'a str, i64)>,
    /// Model-local functions as (domain, name).
    functions: Vec<(&'a str, &'a str)>,
    /// Main graph.
    graph: Option<Graph<'a>>,
}

/// Decoded `GraphProto`.
#[derive(Debug, Default)]
struct Graph<'a> {
    /// Graph name.
    name: &'a str,
    /// Nodes in file order.
    nodes: Vec<Node<'a>>,
    /// Dense initializers.
    initializers: Vec<Tensor<'a>>,
    /// Sparse initializers (values and indices tensors).
    sparse_initializers: Vec<SparseTensor<'a>>,
    /// Graph input names.
    inputs: Vec<&'a str>,
    /// Graph output names.
    outputs: Vec<&'a str>,
}

/// Decoded `NodeProto`.
#[derive(Debug, Default)]
struct Node<'a> {
    /// Node name (may be empty).
    name: &'a str,
    /// Operator type.
    op_type: &'a str,
    /// Operator domain; empty for the default domain.
    domain: &'a str,
    /// Input value names; empty strings mark omitted optional inputs.
    inputs: Vec<&'a str>,
    /// Output value names.
    outputs: Vec<&'a str>,
    /// Attributes.
    attributes: Vec<Attribute<'a>>,
}

/// Decoded `AttributeProto` payloads that need checking.
#[derive(Debug, Default)]
struct Attribute<'a> {
    /// Attribute name.
    name: &'a str,
    /// Tensor payloads (`t` and `tensors`).
    tensors: Vec<Tensor<'a>>,
    /// Subgraph payloads (`g` and `graphs`).
    graphs: Vec<Graph<'a>>,
}

/// Decoded `SparseTensorProto`.
#[derive(Debug, Default)]
struct SparseTensor<'a> {
    /// Non-zero values; its name names the sparse tensor.
    values: Tensor<'a>,
    /// Indices of the non-zero values.
    indices: Tensor<'a>,
}

/// Element counts of the typed value fields of a tensor.
#[derive(Debug, Default, Clone, Copy)]
struct ValueCounts {
    /// `float_data`.
    float: usize,
    /// `int32_data`.
    int32: usize,
    /// `string_data`.
    string: usize,
    /// `int64_data`.
    int64: usize,
    /// `double_data`.
    double: usize,
    /// `uint64_data`.
    uint64: usize,
}

impl ValueCounts {
    /// Returns the count stored in `field`.
    const fn get(&self, field: ValueField) -> usize {
        match field {
            ValueField::Float => self.float,
            ValueField::Int32 => self.int32,
            ValueField::String => self.string,
            ValueField::Int64 => self.int64,
            ValueField::Double => self.double,
            ValueField::Uint64 => self.uint64,
        }
    }

    /// Returns the non-empty typed fields.
    fn populated(&self) -> Vec<ValueField> {
        ValueField::ALL.into_iter().filter(|field| self.get(*field) > 0).collect()
    }
}

/// Decoded `TensorProto`.
#[derive(Debug, Default)]
struct Tensor<'a> {
    /// Tensor name.
    name: &'a str,
    /// Dimensions.
    dims: Vec<i64>,
    /// Element type, when present.
    data_type: Option<i32>,
    /// Raw little-endian payload, when present.
    raw_data: Option<&'a [u8]>,
    /// Typed value field counts.
    counts: ValueCounts,
    /// External data key/value pairs.
    external_data: Vec<(&'a str, &'a str)>,
    /// Data location enum.
    data_location: i32,
}

// ============================================================================
// SECTION: Data Types
// ============================================================================

/// Typed value fields of `TensorProto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueField {
    /// `float_data`.
    Float,
    /// `int32_data`.
    Int32,
    /// `string_data`.
    String,
    /// `int64_data`.
    Int64,
    /// `double_data`.
    Double,
    /// `uint64_data`.
    Uint64,
}

impl ValueField {
    /// Every typed value field.
    const ALL: [Self; 6] = [Self::Float, Self::Int32, Self::String, Self::Int64, Self::Double, Self::Uint64];

    /// Returns the proto field name.
    const fn label(self) -> &'static str {
        match self {
            Self::Float => "float_data",
            Self::Int32 => "int32_data",
            Self::String => "string_data",
            Self::Int64 => "int64_data",
            Self::Double => "double_data",
            Self::Uint64 => "uint64_data",
        }
    }
}

/// Storage width of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    /// Fixed number of bytes per element.
    Bytes(u64),
    /// Two elements per byte.
    Nibble,
    /// Variable-length strings.
    Variable,
}

/// Layout facts for one `TensorProto.DataType`.
#[derive(Debug, Clone, Copy)]
struct DataTypeInfo {
    /// Label used in messages.
    label: &'static str,
    /// Raw storage width.
    width: Width,
    /// Typed field that carries values.
    field: ValueField,
    /// Typed field entries per element (2 for complex types).
    per_element: u64,
}

/// Returns layout facts for a data type enum value.
const fn data_type_info(data_type: i32) -> Option<DataTypeInfo> {
    /// Shorthand constructor.
    const fn info(label: &'static str, width: Width, field: ValueField, per_element: u64) -> DataTypeInfo {
        DataTypeInfo {
            label,
            width,
            field,
            per_element,
        }
    }
    let info = match data_type {
        1 => info("FLOAT", Width::Bytes(4), ValueField::Float, 1),
        2 => info("UINT8", Width::Bytes(1), ValueField::Int32, 1),
        3 => info("INT8", Width::Bytes(1), ValueField::Int32, 1),
        4 => info("UINT16", Width::Bytes(2), ValueField::Int32, 1),
        5 => info("INT16", Width::Bytes(2), ValueField::Int32, 1),
        6 => info("INT32", Width::Bytes(4), ValueField::Int32, 1),
        7 => info("INT64", Width::Bytes(8), ValueField::Int64, 1),
        8 => info("STRING", Width::Variable, ValueField::String, 1),
        9 => info("BOOL", Width::Bytes(1), ValueField::Int32, 1),
        10 => info("FLOAT16", Width::Bytes(2), ValueField::Int32, 1),
        11 => info("DOUBLE", Width::Bytes(8), ValueField::Double, 1),
        12 => info("UINT32", Width::Bytes(4), ValueField::Uint64, 1),
        13 => info("UINT64", Width::Bytes(8), ValueField::Uint64, 1),
        14 => info("COMPLEX64", Width::Bytes(8), ValueField::Float, 2),
        15 => info("COMPLEX128", Width::Bytes(16), ValueField::Double, 2),
        16 => info("BFLOAT16", Width::Bytes(2), ValueField::Int32, 1),
        17 => info("FLOAT8E4M3FN", Width::Bytes(1), ValueField::Int32, 1),
        18 => info("FLOAT8E4M3FNUZ", Width::Bytes(1), ValueField::Int32, 1),
        19 => info("FLOAT8E5M2", Width::Bytes(1), ValueField::Int32, 1),
        20 => info("FLOAT8E5M2FNUZ", Width::Bytes(1), ValueField::Int32, 1),
        21 => info("UINT4", Width::Nibble, ValueField::Int32, 1),
        22 => info("INT4", Width::Nibble, ValueField::Int32, 1),
        23 => info("FLOAT4E2M1", Width::Nibble, ValueField::Int32, 1),
        24 => info("FLOAT8E8M0", Width::Bytes(1), ValueField::Int32, 1),
        _ => return None,
    };
    Some(info)
}

// ============================================================================
// SECTION: Decoding
// ============================================================================

/// Decodes a `ModelProto`.
fn decode_model(bytes: &[u8]) -> Result<Model<'_>, ArtifactError> {
    let mut model = Model::default();
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => model.ir_version = Some(value.int64("ir_version")?),
            2 => {
                value.string("producer_name")?;
            }
            3 => {
                value.string("producer_version")?;
            }
            4 => {
                value.string("domain")?;
            }
            5 => {
                value.int64("model_version")?;
            }
            6 => {
                value.string("doc_string")?;
            }
            7 => model.graph = Some(decode_graph(value.bytes("graph")?, 0)?),
            8 => model.opsets.push(decode_opset(value.bytes("opset_import")?)?),
            14 => {
                skim(value.bytes("metadata_props")?)?;
            }
            20 => {
                skim(value.bytes("training_info")?)?;
            }
            25 => model.functions.push(decode_function(value.bytes("functions")?)?),
            _ => {}
        }
    }
    Ok(model)
}

/// Decodes an `OperatorSetIdProto` into (domain, version).
fn decode_opset(bytes: &[u8]) -> Result<(&str, i64), ArtifactError> {
    let mut opset = ("", 0);
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => opset.0 = value.string("opset_import.domain")?,
            2 => opset.1 = value.int64("opset_import.version")?,
            _ => {}
        }
    }
    Ok(opset)
}

/// Decodes the (domain, name) of a `FunctionProto`; its body is only skimmed.
fn decode_function(bytes: &[u8]) -> Result<(&str, &str), ArtifactError> {
    skim(bytes)?;
    let mut function = ("", "");
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => function.1 = value.string("function.name")?,
            10 => function.0 = value.string("function.domain")?,
            _ => {}
        }
    }
    Ok(function)
}

/// Decodes a `GraphProto`.
fn decode_graph(bytes: &[u8], depth: usize) -> Result<Graph<'_>, ArtifactError> {
    if depth > MAX_SUBGRAPH_DEPTH {
        return Err(ArtifactError::Invalid(format!(
            "subgraph nesting exceeds {MAX_SUBGRAPH_DEPTH} levels"
        )));
    }
    let mut graph = Graph::default();
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => graph.nodes.push(decode_node(value.bytes("node")?, depth)?),
            2 => graph.name = value.string("graph.name")?,
            5 => graph.initializers.push(decode_tensor(value.bytes("initializer")?)?),
            10 => {
                value.string("graph.doc_string")?;
            }
            11 => graph.inputs.push(decode_value_info(value.bytes("input")?)?),
            12 => graph.outputs.push(decode_value_info(value.bytes("output")?)?),
            13 => {
                decode_value_info(value.bytes("value_info")?)?;
            }
            14 => {
                skim(value.bytes("quantization_annotation")?)?;
            }
            15 => graph.sparse_initializers.push(decode_sparse_tensor(value.bytes("sparse_initializer")?)?),
            _ => {}
        }
    }
    Ok(graph)
}

/// Decodes a `ValueInfoProto` and returns its name.
fn decode_value_info(bytes: &[u8]) -> Result<&str, ArtifactError> {
    let mut name = "";
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => name = value.string("value_info.name")?,
            2 => {
                skim(value.bytes("value_info.type")?)?;
            }
            3 => {
                value.string("value_info.doc_string")?;
            }
            _ => {}
        }
    }
    Ok(name)
}

/// Decodes a `NodeProto`.
fn decode_node(bytes: &[u8], depth: usize) -> Result<Node<'_>, ArtifactError> {
    let mut node = Node::default();
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => node.inputs.push(value.string("node.input")?),
            2 => node.outputs.push(value.string("node.output")?),
            3 => node.name = value.string("node.name")?,
            4 => node.op_type = value.string("node.op_type")?,
            5 => node.attributes.push(decode_attribute(value.bytes("node.attribute")?, depth)?),
            6 => {
                value.string("node.doc_string")?;
            }
            7 => node.domain = value.string("node.domain")?,
            8 => {
                value.string("node.overload")?;
            }
            _ => {}
        }
    }
    Ok(node)
}

/// Decodes an `AttributeProto`.
fn decode_attribute(bytes: &[u8], depth: usize) -> Result<Attribute<'_>, ArtifactError> {
    let mut attribute = Attribute::default();
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => attribute.name = value.string("attribute.name")?,
            2 => {
                value.fixed32("attribute.f")?;
            }
            3 => {
                value.int64("attribute.i")?;
            }
            4 | 9 => {
                value.bytes("attribute.s")?;
            }
            5 | 10 => attribute.tensors.push(decode_tensor(value.bytes("attribute.t")?)?),
            6 | 11 => attribute.graphs.push(decode_graph(value.bytes("attribute.g")?, depth + 1)?),
            7 => {
                value.repeated_fixed_count("attribute.floats", 4)?;
            }
            8 => {
                value.repeated_varint_count("attribute.ints")?;
            }
            13 | 21 => {
                value.string("attribute.doc_string")?;
            }
            14 | 15 => {
                skim(value.bytes("attribute.tp")?)?;
            }
            20 => {
                value.int32("attribute.type")?;
            }
            22 | 23 => {
                decode_sparse_tensor(value.bytes("attribute.sparse_tensor")?)?;
            }
            _ => {}
        }
    }
    Ok(attribute)
}

/// Decodes a `SparseTensorProto`.
fn decode_sparse_tensor(bytes: &[u8]) -> Result<SparseTensor<'_>, ArtifactError> {
    let mut sparse = SparseTensor::default();
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => sparse.values = decode_tensor(value.bytes("sparse_tensor.values")?)?,
            2 => sparse.indices = decode_tensor(value.bytes("sparse_tensor.indices")?)?,
            3 => {
                value.repeated_varint_count("sparse_tensor.dims")?;
            }
            _ => {}
        }
    }
    Ok(sparse)
}

/// Decodes a `TensorProto`.
fn decode_tensor(bytes: &[u8]) -> Result<Tensor<'_>, ArtifactError> {
    let mut tensor = Tensor::default();
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => match value {
                FieldValue::Bytes(packed) => {
                    for raw in packed_varints(packed)? {
                        tensor.dims.push(FieldValue::Varint(raw).int64("tensor.dims")?);
                    }
                }
                other => tensor.dims.push(other.int64("tensor.dims")?),
            },
            2 => tensor.data_type = Some(value.int32("tensor.data_type")?),
            3 => {
                skim(value.bytes("tensor.segment")?)?;
            }
            4 => tensor.counts.float += value.repeated_fixed_count("tensor.float_data", 4)?,
            5 => tensor.counts.int32 += value.repeated_varint_count("tensor.int32_data")?,
            6 => {
                value.bytes("tensor.string_data")?;
                tensor.counts.string += 1;
            }
            7 => tensor.counts.int64 += value.repeated_varint_count("tensor.int64_data")?,
            8 => tensor.name = value.string("tensor.name")?,
            9 => tensor.raw_data = Some(value.bytes("tensor.raw_data")?),
            10 => tensor.counts.double += value.repeated_fixed_count("tensor.double_data", 8)?,
            11 => tensor.counts.uint64 += value.repeated_varint_count("tensor.uint64_data")?,
            12 => {
                value.string("tensor.doc_string")?;
            }
            13 => tensor.external_data.push(decode_string_pair(value.bytes("tensor.external_data")?)?),
            14 => tensor.data_location = value.int32("tensor.data_location")?,
            _ => {}
        }
    }
    Ok(tensor)
}

/// Decodes a `StringStringEntryProto`.
fn decode_string_pair(bytes: &[u8]) -> Result<(&str, &str), ArtifactError> {
    let mut pair = ("", "");
    for field in WireReader::new(bytes) {
        let Field {
            number,
            value,
        } = field?;
        match number {
            1 => pair.0 = value.string("external_data.key")?,
            2 => pair.1 = value.string("external_data.value")?,
            _ => {}
        }
    }
    Ok(pair)
}

// ============================================================================
// SECTION: Checking
// ============================================================================

/// Structural checker state.
struct Checker<'p> {
    /// Directory external data paths are resolved against.
    base_dir: &'p Path,
    /// Imported opset version per canonical domain.
    opsets: BTreeMap<&'p str, i64>,
    /// Model-local functions as (canonical domain, name).
    functions: HashSet<(&'p str, &'p str)>,
}

impl Checker<'_> {
    /// Checks model-level rules and the main graph.
    fn check_model(&self, model: &Model<'_>) -> Result<ArtifactSummary, ArtifactError> {
        let Some(ir_version) = model.ir_version.filter(|version| *version > 0) else {
            return Err(invalid("the model does not have an ir_version set properly"));
        };
        if ir_version > MAX_IR_VERSION {
            return Err(invalid(format!(
                "model ir_version {ir_version} is newer than the supported ir_version {MAX_IR_VERSION}"
            )));
        }
        if ir_version >= OPSET_REQUIRED_IR_VERSION && model.opsets.is_empty() {
            return Err(invalid(format!(
                "model with ir_version >= {OPSET_REQUIRED_IR_VERSION} must specify opset_import"
            )));
        }
        if ir_version < OPSET_REQUIRED_IR_VERSION && !model.opsets.is_empty() {
            return Err(invalid(format!(
                "model with ir_version < {OPSET_REQUIRED_IR_VERSION} cannot specify opset_import"
            )));
        }
        for (domain, version) in &self.opsets {
            if let Some(max) = max_opset_version(domain).filter(|max| version > max) {
                return Err(invalid(format!(
                    "opset_import for domain '{domain}' has version {version}, newer than the supported version {max}"
                )));
            }
        }
        let Some(graph) = &model.graph else {
            return Err(invalid("model has no graph"));
        };
        self.check_graph(graph, &HashSet::new(), ir_version)?;
        Ok(ArtifactSummary::Onnx {
            ir_version,
            nodes: graph.nodes.len(),
            initializers: graph.initializers.len() + graph.sparse_initializers.len(),
        })
    }

    /// Checks one graph; `outer` holds names visible from enclosing graphs.
    fn check_graph<'a>(
        &self,
        graph: &Graph<'a>,
        outer: &HashSet<&'a str>,
        ir_version: i64,
    ) -> Result<(), ArtifactError> {
        if graph.name.is_empty() {
            return Err(invalid("graph name must be non-empty"));
        }

        let mut defined: HashSet<&'a str> = HashSet::new();
        for &input in &graph.inputs {
            if input.is_empty() {
                return Err(invalid(format!("graph '{}' has an input with an empty name", graph.name)));
            }
            if !defined.insert(input) {
                return Err(invalid(format!(
                    "graph must be in single static assignment form, but '{input}' is used as an input name more than once"
                )));
            }
        }

        let mut initializer_names: HashSet<&'a str> = HashSet::new();
        for tensor in &graph.initializers {
            self.check_initializer(tensor, &mut initializer_names)?;
            if ir_version < FREE_INITIALIZER_IR_VERSION && !defined.contains(tensor.name) {
                return Err(invalid(format!(
                    "initializer '{}' is not a graph input, which ir_version {ir_version} requires",
                    tensor.name
                )));
            }
        }
        for sparse in &graph.sparse_initializers {
            self.check_initializer(&sparse.values, &mut initializer_names)?;
            self.check_tensor(&sparse.indices)?;
        }
        defined.extend(initializer_names);

        for node in &graph.nodes {
            self.check_node(graph.name, node, &defined, outer, ir_version)?;
            for output in node.outputs.iter().copied().filter(|output| !output.is_empty()) {
                if defined.contains(output) || outer.contains(output) {
                    return Err(invalid(format!(
                        "graph must be in single static assignment form, but '{output}' is assigned more than once"
                    )));
                }
                defined.insert(output);
            }
        }

        for output in &graph.outputs {
            if output.is_empty() {
                return Err(invalid(format!("graph '{}' has an output with an empty name", graph.name)));
            }
            if !defined.contains(output) && !outer.contains(output) {
                return Err(invalid(format!(
                    "graph output '{output}' is not produced by any node in graph '{}'",
                    graph.name
                )));
            }
        }
        Ok(())
    }

    /// Checks one node against the names defined before it.
    fn check_node<'a>(
        &self,
        graph_name: &str,
        node: &Node<'a>,
        defined: &HashSet<&'a str>,
        outer: &HashSet<&'a str>,
        ir_version: i64,
    ) -> Result<(), ArtifactError> {
        if node.op_type.is_empty() {
            return Err(invalid(format!(
                "node '{}' in graph '{graph_name}' has an empty op_type",
                node.name
            )));
        }
        self.check_operator(node)?;
        for input in node.inputs.iter().filter(|input| !input.is_empty()) {
            if !defined.contains(input) && !outer.contains(input) {
                return Err(invalid(format!(
                    "nodes must be topologically sorted, but input '{input}' of node '{}' ({}) is not produced by any previous node",
                    node.name, node.op_type
                )));
            }
        }
        for attribute in &node.attributes {
            if attribute.name.is_empty() {
                return Err(invalid(format!(
                    "node '{}' ({}) has an attribute with an empty name",
                    node.name, node.op_type
                )));
            }
            for tensor in &attribute.tensors {
                self.check_tensor(tensor)?;
            }
            if attribute.graphs.is_empty() {
                continue;
            }
            let scope: HashSet<&'a str> = outer.union(defined).copied().collect();
            for subgraph in &attribute.graphs {
                self.check_graph(subgraph, &scope, ir_version)?;
            }
        }
        Ok(())
    }

    /// Checks that a node's operator exists at its domain's imported opset.
    fn check_operator(&self, node: &Node<'_>) -> Result<(), ArtifactError> {
        let domain = canonical_domain(node.domain);
        let Some(&version) = self.opsets.get(domain) else {
            return Err(invalid(format!(
                "No opset import for domain '{}' used by node '{}' ({})",
                node.domain, node.name, node.op_type
            )));
        };
        if self.functions.contains(&(domain, node.op_type)) {
            return Ok(());
        }
        match resolve_operator(domain, node.op_type, version) {
            OpStatus::Registered | OpStatus::CustomDomain => Ok(()),
            OpStatus::Unregistered => Err(invalid(format!(
                "No Op registered for {} with domain_version of {version}",
                node.op_type
            ))),
            OpStatus::Deprecated => Err(invalid(format!(
                "Op registered for {} is deprecated in domain_version of {version}",
                node.op_type
            ))),
        }
    }

    /// Checks an initializer and records its name.
    fn check_initializer<'a>(
        &self,
        tensor: &Tensor<'a>,
        names: &mut HashSet<&'a str>,
    ) -> Result<(), ArtifactError> {
        if tensor.name.is_empty() {
            return Err(invalid("initializer has an empty name"));
        }
        if !names.insert(tensor.name) {
            return Err(invalid(format!(
                "graph must be in single static assignment form, but '{}' is used as an initializer name more than once",
                tensor.name
            )));
        }
        self.check_tensor(tensor)
    }

    /// Checks a tensor's type, shape, and payload consistency.
    fn check_tensor(&self, tensor: &Tensor<'_>) -> Result<(), ArtifactError> {
        let name = tensor.name;
        let data_type = tensor.data_type.unwrap_or(0);
        if data_type == 0 {
            return Err(invalid(format!("tensor '{name}' has an undefined data_type")));
        }
        let info = data_type_info(data_type)
            .ok_or_else(|| invalid(format!("tensor '{name}' has unknown data_type {data_type}")))?;

        let mut elements: u64 = 1;
        for dim in &tensor.dims {
            let dim = u64::try_from(*dim)
                .map_err(|_| invalid(format!("tensor '{name}' has negative dimension {dim}")))?;
            elements = elements
                .checked_mul(dim)
                .ok_or_else(|| invalid(format!("tensor '{name}' element count overflows")))?;
        }

        let raw_len = if tensor.data_location == EXTERNAL_LOCATION {
            if tensor.raw_data.is_some_and(|raw| !raw.is_empty()) || !tensor.counts.populated().is_empty() {
                return Err(invalid(format!(
                    "tensor '{name}' is stored externally and must not carry inline data"
                )));
            }
            Some(self.external_length(tensor)?)
        } else {
            tensor.raw_data.map(|raw| u64::try_from(raw.len()).unwrap_or(u64::MAX))
        };
        let has_raw = raw_len.is_some_and(|len| len > 0);
        let populated = tensor.counts.populated();
        let value_fields = populated.len() + usize::from(has_raw);

        if elements == 0 {
            if value_fields != 0 {
                return Err(invalid(format!("tensor '{name}' has zero elements but contains data")));
            }
            return Ok(());
        }
        if value_fields != 1 {
            return Err(invalid(format!(
                "tensor '{name}' should contain one and only one value field, found {value_fields}"
            )));
        }

        if has_raw {
            let actual = raw_len.unwrap_or(0);
            let expected = match info.width {
                Width::Variable => {
                    return Err(invalid(format!(
                        "STRING data of tensor '{name}' must not be stored in raw_data"
                    )));
                }
                Width::Bytes(width) => elements.checked_mul(width),
                Width::Nibble => Some(elements.div_ceil(2)),
            };
            if expected != Some(actual) {
                return Err(invalid(format!(
                    "tensor '{name}' raw_data holds {actual} bytes, expected {} for {elements} {} elements",
                    expected.map_or_else(|| "an overflowing number of".to_string(), |value| value.to_string()),
                    info.label
                )));
            }
            return Ok(());
        }

        let field = populated.first().copied().unwrap_or(info.field);
        if field != info.field {
            return Err(invalid(format!(
                "values of data_type {} in tensor '{name}' should be stored in {} instead of {}",
                info.label,
                info.field.label(),
                field.label()
            )));
        }
        let expected = if info.width == Width::Nibble {
            Some(elements.div_ceil(2))
        } else {
            elements.checked_mul(info.per_element)
        };
        let actual = u64::try_from(tensor.counts.get(field)).unwrap_or(u64::MAX);
        if expected != Some(actual) {
            return Err(invalid(format!(
                "tensor '{name}' has {actual} entries in {} but its shape needs {}",
                field.label(),
                expected.map_or_else(|| "an overflowing number".to_string(), |value| value.to_string())
            )));
        }
        Ok(())
    }

    /// Resolves external data and returns the referenced byte length.
    fn external_length(&self, tensor: &Tensor<'_>) -> Result<u64, ArtifactError> {
        let name = tensor.name;
        let mut location = None;
        let mut offset: u64 = 0;
        let mut length = None;
        for (key, value) in &tensor.external_data {
            match *key {
                "location" => location = Some(*value),
                "offset" => offset = parse_external_number(name, key, value)?,
                "length" => length = Some(parse_external_number(name, key, value)?),
                _ => {}
            }
        }
        let location = location
            .filter(|location| !location.is_empty())
            .ok_or_else(|| invalid(format!("external tensor '{name}' has no location")))?;
        let relative = Path::new(location);
        if relative.components().any(|part| !matches!(part, Component::Normal(_) | Component::CurDir)) {
            return Err(invalid(format!(
                "external data of tensor '{name}' must stay inside the model directory: {location}"
            )));
        }
        let data_path = self.base_dir.join(relative);
        let file_len = fs::metadata(&data_path)
            .map_err(|err| {
                invalid(format!(
                    "external data file {} for tensor '{name}' is not accessible: {err}",
                    data_path.display()
                ))
            })?
            .len();
        let available = file_len.checked_sub(offset).ok_or_else(|| {
            invalid(format!("external data offset {offset} of tensor '{name}' is past the end of {location}"))
        })?;
        match length {
            Some(length) if length > available => Err(invalid(format!(
                "external data of tensor '{name}' needs {length} bytes at offset {offset} but {location} has {available}"
            ))),
            Some(length) => Ok(length),
            None => Ok(available),
        }
    }
}

/// Parses a numeric external data field.
fn parse_external_number(name: &str, key: &str, value: &str) -> Result<u64, ArtifactError> {
    value
        .parse()
        .map_err(|_| invalid(format!("external data {key} of tensor '{name}' is not a number: {value}")))
}

/// Builds a structural error.
fn invalid(message: impl Into<String>) -> ArtifactError {
    ArtifactError::Invalid(message.into())
}
