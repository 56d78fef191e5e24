// crates/model-gate-probes/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Fixture builders for model-gate-probes tests.
// Purpose: Produce small, byte-exact artifacts for every supported format.
// Dependencies: model-gate-probes, tempfile, zip
// ============================================================================

//! ## Overview
//! Builds protobuf messages, PyTorch pickles and archives, sorted tables, and
//! SavedModel directories in memory so probe tests can corrupt them one byte
//! at a time.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]

use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use model_gate_probes::crc32c;
use model_gate_probes::pytorch::LEGACY_MAGIC;
use model_gate_probes::table::TABLE_MAGIC;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

// ============================================================================
// SECTION: Protobuf Writer
// ============================================================================

/// Minimal protobuf message builder.
#[derive(Debug, Clone, Default)]
pub struct Proto {
    /// Encoded bytes.
    buf: Vec<u8>,
}

impl Proto {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a varint field.
    pub fn varint(mut self, field: u32, value: u64) -> Self {
        put_varint(&mut self.buf, u64::from(field) << 3);
        put_varint(&mut self.buf, value);
        self
    }

    /// Appends a signed varint field.
    pub fn int(self, field: u32, value: i64) -> Self {
        self.varint(field, u64::from_ne_bytes(value.to_ne_bytes()))
    }

    /// Appends a length-delimited field.
    pub fn bytes(mut self, field: u32, value: &[u8]) -> Self {
        put_varint(&mut self.buf, (u64::from(field) << 3) | 2);
        put_varint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    /// Appends a string field.
    pub fn string(self, field: u32, value: &str) -> Self {
        self.bytes(field, value.as_bytes())
    }

    /// Appends an embedded message field.
    pub fn message(self, field: u32, value: &Self) -> Self {
        self.bytes(field, &value.buf)
    }

    /// Appends a fixed32 field.
    pub fn fixed32(mut self, field: u32, value: u32) -> Self {
        put_varint(&mut self.buf, (u64::from(field) << 3) | 5);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Returns the encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Returns the encoded bytes without consuming the builder.
    pub fn encoded(&self) -> &[u8] {
        &self.buf
    }
}

/// Appends a base-128 varint.
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push(u8::try_from(value & 0x7F).unwrap() | 0x80);
        value >>= 7;
    }
    buf.push(u8::try_from(value).unwrap());
}

// ============================================================================
// SECTION: ONNX Builders
// ============================================================================

/// ONNX `FLOAT` data type.
pub const ONNX_FLOAT: i64 = 1;
/// ONNX `STRING` data type.
pub const ONNX_STRING: i64 = 8;

/// Builds a `TensorProto` with raw data.
pub fn onnx_tensor(name: &str, dims: &[i64], data_type: i64, raw: &[u8]) -> Proto {
    let mut tensor = Proto::new();
    for dim in dims {
        tensor = tensor.int(1, *dim);
    }
    tensor.int(2, data_type).string(8, name).bytes(9, raw)
}

/// Builds a `ValueInfoProto` with only a name.
pub fn onnx_value(name: &str) -> Proto {
    Proto::new().string(1, name)
}

/// Builds a `NodeProto`.
pub fn onnx_node(op_type: &str, inputs: &[&str], outputs: &[&str]) -> Proto {
    let mut node = Proto::new();
    for input in inputs {
        node = node.string(1, input);
    }
    for output in outputs {
        node = node.string(2, output);
    }
    node.string(3, &format!("{op_type}_node")).string(4, op_type)
}

/// Builds the reference graph: `y = Add(x, W)` with a 2-element float `W`.
pub fn onnx_graph() -> Proto {
    Proto::new()
        .message(1, &onnx_node("Add", &["x", "W"], &["y"]))
        .string(2, "main")
        .message(5, &onnx_tensor("W", &[2], ONNX_FLOAT, &[0u8; 8]))
        .message(11, &onnx_value("x"))
        .message(12, &onnx_value("y"))
}

/// Wraps a graph in a `ModelProto` with one default-domain opset.
pub fn onnx_model(ir_version: i64, graph: &Proto) -> Vec<u8> {
    let opset = Proto::new().string(1, "").int(2, 17);
    Proto::new()
        .int(1, ir_version)
        .string(2, "model-gate-tests")
        .message(7, graph)
        .message(8, &opset)
        .finish()
}

/// Returns a well-formed ONNX model.
pub fn valid_onnx() -> Vec<u8> {
    onnx_model(8, &onnx_graph())
}

// ============================================================================
// SECTION: Pickle Builders
// ============================================================================

/// Appends a `GLOBAL` opcode.
fn global(buf: &mut Vec<u8>, module: &str, name: &str) {
    buf.push(b'c');
    buf.extend_from_slice(module.as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(name.as_bytes());
    buf.push(b'\n');
}

/// Appends a `BINUNICODE` opcode.
fn unicode(buf: &mut Vec<u8>, text: &str) {
    buf.push(b'X');
    buf.extend_from_slice(&u32::try_from(text.len()).unwrap().to_le_bytes());
    buf.extend_from_slice(text.as_bytes());
}

/// Appends a `BININT1` opcode.
fn int1(buf: &mut Vec<u8>, value: u8) {
    buf.push(b'K');
    buf.push(value);
}

/// Builds a protocol-2 pickle of `OrderedDict({"weight": tensor})`.
///
/// The tensor is a 1-d view of `size` elements over a `FloatStorage` with key
/// `"0"` holding `numel` elements; `module`/`name` name the storage class.
pub fn state_dict_pickle_with(storage_class: (&str, &str), numel: u8, size: u8) -> Vec<u8> {
    state_dict(storage_class, numel, size, None)
}

/// Like [`state_dict_pickle_with`], rebuilt through `_rebuild_tensor_v3`
/// with `torch.<dtype>` as the element type.
pub fn state_dict_v3_pickle(storage_class: (&str, &str), numel: u8, size: u8, dtype: &str) -> Vec<u8> {
    state_dict(storage_class, numel, size, Some(dtype))
}

fn state_dict(storage_class: (&str, &str), numel: u8, size: u8, dtype: Option<&str>) -> Vec<u8> {
    let mut buf = vec![0x80, 0x02];
    global(&mut buf, "collections", "OrderedDict");
    buf.extend_from_slice(b")R");
    buf.extend_from_slice(b"q\x00");
    unicode(&mut buf, "weight");
    let rebuild = if dtype.is_some() { "_rebuild_tensor_v3" } else { "_rebuild_tensor_v2" };
    global(&mut buf, "torch._utils", rebuild);
    buf.push(b'(');
    buf.push(b'(');
    unicode(&mut buf, "storage");
    global(&mut buf, storage_class.0, storage_class.1);
    unicode(&mut buf, "0");
    unicode(&mut buf, "cpu");
    int1(&mut buf, numel);
    buf.extend_from_slice(b"tQ");
    int1(&mut buf, 0);
    int1(&mut buf, size);
    buf.push(0x85);
    int1(&mut buf, 1);
    buf.push(0x85);
    buf.push(0x89);
    global(&mut buf, "collections", "OrderedDict");
    buf.extend_from_slice(b")R");
    if let Some(dtype) = dtype {
        global(&mut buf, "torch", dtype);
    }
    buf.extend_from_slice(b"tRs.");
    buf
}

/// Builds the reference state dict pickle: four floats over four floats.
pub fn state_dict_pickle() -> Vec<u8> {
    state_dict_pickle_with(("torch", "FloatStorage"), 4, 4)
}

/// Sixteen distinctive storage bytes (four floats).
pub const STORAGE_BYTES: &[u8; 16] = b"WEIGHTSWEIGHTS!!";

// ============================================================================
// SECTION: PyTorch Archives
// ============================================================================

/// Writes a zip archive with `records` (stored, uncompressed) to `path`.
pub fn write_zip(path: &Path, records: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, bytes) in records {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}

/// Writes the reference zip checkpoint to `path`.
pub fn write_torch_zip(path: &Path) {
    let pickle = state_dict_pickle();
    write_zip(path, &[
        ("archive/data.pkl", &pickle),
        ("archive/byteorder", b"little"),
        ("archive/data/0", STORAGE_BYTES),
        ("archive/version", b"3\n"),
    ]);
}

/// Builds the reference legacy checkpoint stream.
pub fn legacy_checkpoint() -> Vec<u8> {
    let mut buf = vec![0x80, 0x02, 0x8a, 0x0a];
    buf.extend_from_slice(&LEGACY_MAGIC);
    buf.push(b'.');
    buf.extend_from_slice(&[0x80, 0x02, b'M', 0xe9, 0x03, b'.']);
    buf.extend_from_slice(&[0x80, 0x02, b'}', b'.']);
    buf.extend_from_slice(&state_dict_pickle());
    buf.extend_from_slice(&[0x80, 0x02, b']', b'(']);
    unicode(&mut buf, "0");
    buf.extend_from_slice(b"e.");
    buf.extend_from_slice(&4i64.to_le_bytes());
    buf.extend_from_slice(STORAGE_BYTES);
    buf
}

/// Flips the first occurrence of `needle` in the file at `path`.
pub fn corrupt_first(path: &Path, needle: &[u8]) {
    let mut bytes = fs::read(path).unwrap();
    let offset = bytes
        .windows(needle.len())
        .position(|window| window == needle)
        .unwrap_or_else(|| panic!("needle not found in {}", path.display()));
    bytes[offset] ^= 0xFF;
    fs::write(path, bytes).unwrap();
}

// ============================================================================
// SECTION: Sorted Tables
// ============================================================================

/// Encodes one block with prefix-compressed keys and a single restart.
pub fn table_block(entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut block = Vec::new();
    let mut previous: &[u8] = &[];
    for (key, value) in entries {
        let shared = previous.iter().zip(key.iter()).take_while(|(a, b)| a == b).count();
        put_varint(&mut block, shared as u64);
        put_varint(&mut block, (key.len() - shared) as u64);
        put_varint(&mut block, value.len() as u64);
        block.extend_from_slice(&key[shared ..]);
        block.extend_from_slice(value);
        previous = key;
    }
    block.extend_from_slice(&0u32.to_le_bytes());
    block.extend_from_slice(&1u32.to_le_bytes());
    block
}

/// Appends a block plus trailer, returning its encoded handle.
fn append_block(file: &mut Vec<u8>, block: &[u8]) -> Vec<u8> {
    let mut handle = Vec::new();
    put_varint(&mut handle, file.len() as u64);
    put_varint(&mut handle, block.len() as u64);
    file.extend_from_slice(block);
    file.push(0);
    let crc = crc32c::extend(crc32c::value(block), &[0]);
    file.extend_from_slice(&crc32c::mask(crc).to_le_bytes());
    handle
}

/// Builds a complete sorted table holding `entries` (already sorted).
pub fn build_table(entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut file = Vec::new();
    let data_handle = append_block(&mut file, &table_block(entries));
    let meta_handle = append_block(&mut file, &table_block(&[]));
    let last_key = entries.last().map(|(key, _)| key.clone()).unwrap_or_default();
    let index_handle = append_block(&mut file, &table_block(&[(last_key, data_handle)]));
    let mut footer = Vec::new();
    footer.extend_from_slice(&meta_handle);
    footer.extend_from_slice(&index_handle);
    footer.resize(40, 0);
    footer.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
    file.extend_from_slice(&footer);
    file
}

// ============================================================================
// SECTION: SavedModel Builders
// ============================================================================

/// TensorFlow `DT_FLOAT`.
pub const DT_FLOAT: u64 = 1;
/// Name of the single variable in the reference bundle.
pub const KERNEL: &str = "dense/kernel/.ATTRIBUTES/VARIABLE_VALUE";
/// Bytes of the reference variable (two floats).
pub const KERNEL_BYTES: &[u8; 8] = b"KERNEL!!";

/// Builds a `NodeDef`.
pub fn tf_node(name: &str, op: &str, inputs: &[&str]) -> Proto {
    let mut node = Proto::new().string(1, name).string(2, op);
    for input in inputs {
        node = node.string(3, input);
    }
    node
}

/// Builds a `SavedModel` holding one meta graph with `nodes`.
pub fn saved_model(nodes: &[Proto]) -> Vec<u8> {
    let mut graph = Proto::new();
    for node in nodes {
        graph = graph.message(1, node);
    }
    let meta_info = Proto::new().string(4, "serve");
    let meta_graph = Proto::new().message(1, &meta_info).message(2, &graph);
    Proto::new().int(1, 1).message(2, &meta_graph).finish()
}

/// Builds the reference graph nodes.
pub fn reference_nodes() -> Vec<Proto> {
    vec![
        tf_node("x", "Placeholder", &[]),
        tf_node("kernel", "VarHandleOp", &[]),
        tf_node("read", "ReadVariableOp", &["kernel"]),
        tf_node("y", "MatMul", &["x:0", "read", "^kernel"]),
    ]
}

/// Builds a bundle index for one float variable of two elements.
pub fn bundle_index(crc: u32) -> Vec<u8> {
    let header = Proto::new().varint(1, 1).varint(2, 0).message(3, &Proto::new().varint(1, 1));
    let shape = Proto::new().message(2, &Proto::new().int(1, 2));
    let entry = Proto::new()
        .varint(1, DT_FLOAT)
        .message(2, &shape)
        .varint(3, 0)
        .varint(4, 0)
        .varint(5, KERNEL_BYTES.len() as u64)
        .fixed32(6, crc);
    build_table(&[
        (Vec::new(), header.finish()),
        (KERNEL.as_bytes().to_vec(), entry.finish()),
    ])
}

/// Writes a complete SavedModel under `folder/saved_model`.
pub fn write_saved_model(folder: &Path) -> PathBuf {
    let dir = folder.join("saved_model");
    let variables = dir.join("variables");
    fs::create_dir_all(&variables).unwrap();
    fs::write(dir.join("saved_model.pb"), saved_model(&reference_nodes())).unwrap();
    let crc = crc32c::mask(crc32c::value(KERNEL_BYTES));
    fs::write(variables.join("variables.index"), bundle_index(crc)).unwrap();
    fs::write(variables.join("variables.data-00000-of-00001"), KERNEL_BYTES).unwrap();
    dir
}
