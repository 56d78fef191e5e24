// crates/model-gate-probes/src/pickle.rs
// ============================================================================
// Module: Restricted Unpickler
// Description: Weights-only pickle machine for PyTorch checkpoints.
// Purpose: Fully parse checkpoint pickles without executing arbitrary code.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! PyTorch checkpoints describe tensors with a pickle program that rebuilds
//! tensors from storages referenced by persistent ids. This module runs that
//! program in a sandboxed stack machine: only an allow-list of globals may be
//! named, calls are recorded rather than executed, and persistent ids must be
//! storage descriptors. The result is the decoded object tree plus the set of
//! storages the checkpoint needs, which the caller checks against the bytes
//! actually present.
//!
//! ## Invariants
//! - No opcode executes code; `REDUCE`, `NEWOBJ`, and `BUILD` are recorded.
//! - Every byte read is counted against a hard limit before allocation.
//! - Tensor views built by the rebuild helpers must fit inside their storage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::io::Read;
use std::rc::Rc;

use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Highest pickle protocol understood by the machine.
pub const HIGHEST_PROTOCOL: u8 = 5;
/// Maximum length of a text-mode argument line.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Opcode bytes, named after the pickle protocol definitions.
mod op {
    /// Push a mark onto the mark stack.
    pub const MARK: u8 = b'(';
    /// End of pickle.
    pub const STOP: u8 = b'.';
    /// Discard the top stack item.
    pub const POP: u8 = b'0';
    /// Discard everything down to the last mark.
    pub const POP_MARK: u8 = b'1';
    /// Duplicate the top stack item.
    pub const DUP: u8 = b'2';
    /// Text float.
    pub const FLOAT: u8 = b'F';
    /// Text integer.
    pub const INT: u8 = b'I';
    /// Four-byte signed integer.
    pub const BININT: u8 = b'J';
    /// One-byte unsigned integer.
    pub const BININT1: u8 = b'K';
    /// Text long.
    pub const LONG: u8 = b'L';
    /// Two-byte unsigned integer.
    pub const BININT2: u8 = b'M';
    /// Push `None`.
    pub const NONE: u8 = b'N';
    /// Text persistent id.
    pub const PERSID: u8 = b'P';
    /// Stack persistent id.
    pub const BINPERSID: u8 = b'Q';
    /// Call a callable with an argument tuple.
    pub const REDUCE: u8 = b'R';
    /// Quoted text string.
    pub const STRING: u8 = b'S';
    /// Four-byte-length byte string.
    pub const BINSTRING: u8 = b'T';
    /// One-byte-length byte string.
    pub const SHORT_BINSTRING: u8 = b'U';
    /// Raw-unicode-escaped text string.
    pub const UNICODE: u8 = b'V';
    /// Four-byte-length UTF-8 string.
    pub const BINUNICODE: u8 = b'X';
    /// Append to a list.
    pub const APPEND: u8 = b'a';
    /// Apply state to an object.
    pub const BUILD: u8 = b'b';
    /// Text global reference.
    pub const GLOBAL: u8 = b'c';
    /// Build a dict from marked items.
    pub const DICT: u8 = b'd';
    /// Push an empty dict.
    pub const EMPTY_DICT: u8 = b'}';
    /// Extend a list with marked items.
    pub const APPENDS: u8 = b'e';
    /// Text memo get.
    pub const GET: u8 = b'g';
    /// One-byte memo get.
    pub const BINGET: u8 = b'h';
    /// Four-byte memo get.
    pub const LONG_BINGET: u8 = b'j';
    /// Build a list from marked items.
    pub const LIST: u8 = b'l';
    /// Push an empty list.
    pub const EMPTY_LIST: u8 = b']';
    /// Text memo put.
    pub const PUT: u8 = b'p';
    /// One-byte memo put.
    pub const BINPUT: u8 = b'q';
    /// Four-byte memo put.
    pub const LONG_BINPUT: u8 = b'r';
    /// Set one dict item.
    pub const SETITEM: u8 = b's';
    /// Build a tuple from marked items.
    pub const TUPLE: u8 = b't';
    /// Push an empty tuple.
    pub const EMPTY_TUPLE: u8 = b')';
    /// Set marked dict items.
    pub const SETITEMS: u8 = b'u';
    /// Eight-byte big-endian float.
    pub const BINFLOAT: u8 = b'G';
    /// Protocol header.
    pub const PROTO: u8 = 0x80;
    /// Create an object via `cls.__new__`.
    pub const NEWOBJ: u8 = 0x81;
    /// One-item tuple.
    pub const TUPLE1: u8 = 0x85;
    /// Two-item tuple.
    pub const TUPLE2: u8 = 0x86;
    /// Three-item tuple.
    pub const TUPLE3: u8 = 0x87;
    /// Push `True`.
    pub const NEWTRUE: u8 = 0x88;
    /// Push `False`.
    pub const NEWFALSE: u8 = 0x89;
    /// Long with a one-byte length.
    pub const LONG1: u8 = 0x8a;
    /// Long with a four-byte length.
    pub const LONG4: u8 = 0x8b;
    /// Bytes with a four-byte length.
    pub const BINBYTES: u8 = b'B';
    /// Bytes with a one-byte length.
    pub const SHORT_BINBYTES: u8 = b'C';
    /// UTF-8 string with a one-byte length.
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    /// UTF-8 string with an eight-byte length.
    pub const BINUNICODE8: u8 = 0x8d;
    /// Bytes with an eight-byte length.
    pub const BINBYTES8: u8 = 0x8e;
    /// Push an empty set.
    pub const EMPTY_SET: u8 = 0x8f;
    /// Add marked items to a set.
    pub const ADDITEMS: u8 = 0x90;
    /// Build a frozenset from marked items.
    pub const FROZENSET: u8 = 0x91;
    /// `cls.__new__(cls, *args, **kwargs)`.
    pub const NEWOBJ_EX: u8 = 0x92;
    /// Global reference from two stack strings.
    pub const STACK_GLOBAL: u8 = 0x93;
    /// Memoize the top of stack.
    pub const MEMOIZE: u8 = 0x94;
    /// Frame header.
    pub const FRAME: u8 = 0x95;
    /// Bytearray with an eight-byte length.
    pub const BYTEARRAY8: u8 = 0x96;
}

/// Globals a weights-only load may reference, by module.
const ALLOWED_GLOBALS: &[(&str, &[&str])] = &[
    ("collections", &["OrderedDict"]),
    ("builtins", &["set", "frozenset", "bytearray"]),
    ("_codecs", &["encode"]),
    (
        "torch._utils",
        &[
            "_rebuild_tensor",
            "_rebuild_tensor_v2",
            "_rebuild_tensor_v3",
            "_rebuild_parameter",
            "_rebuild_parameter_with_state",
            "_rebuild_qtensor",
            "_rebuild_sparse_tensor",
            "_rebuild_nested_tensor",
            "_rebuild_wrapper_subclass",
            "_rebuild_meta_tensor_no_storage",
        ],
    ),
    ("torch._tensor", &["_rebuild_from_type_v2"]),
    ("torch.nn.parameter", &["Parameter"]),
    ("torch.serialization", &["_get_layout"]),
    (
        "torch",
        &[
            "Size",
            "Tensor",
            "device",
            "strided",
            "sparse_coo",
            "sparse_csr",
            "per_tensor_affine",
            "per_channel_affine",
            "per_channel_affine_float_qparams",
            "float32",
            "float",
            "float64",
            "double",
            "float16",
            "half",
            "bfloat16",
            "complex64",
            "cfloat",
            "complex128",
            "cdouble",
            "int64",
            "long",
            "int32",
            "int",
            "int16",
            "short",
            "int8",
            "uint8",
            "uint16",
            "uint32",
            "uint64",
            "bool",
            "qint8",
            "quint8",
            "qint32",
            "float8_e4m3fn",
            "float8_e5m2",
        ],
    ),
];

/// Tensor dtypes and their element sizes in bytes.
const DTYPE_SIZES: &[(&str, u64)] = &[
    ("bool", 1),
    ("int8", 1),
    ("uint8", 1),
    ("qint8", 1),
    ("quint8", 1),
    ("float8_e4m3fn", 1),
    ("float8_e5m2", 1),
    ("int16", 2),
    ("short", 2),
    ("uint16", 2),
    ("float16", 2),
    ("half", 2),
    ("bfloat16", 2),
    ("int32", 4),
    ("int", 4),
    ("uint32", 4),
    ("qint32", 4),
    ("float32", 4),
    ("float", 4),
    ("int64", 8),
    ("long", 8),
    ("uint64", 8),
    ("float64", 8),
    ("double", 8),
    ("complex64", 8),
    ("cfloat", 8),
    ("complex128", 16),
    ("cdouble", 16),
];

/// Storage classes and their element sizes in bytes.
const STORAGE_TYPES: &[(&str, u64)] = &[
    ("UntypedStorage", 1),
    ("ByteStorage", 1),
    ("CharStorage", 1),
    ("BoolStorage", 1),
    ("QUInt8Storage", 1),
    ("QInt8Storage", 1),
    ("QUInt4x2Storage", 1),
    ("QUInt2x4Storage", 1),
    ("ShortStorage", 2),
    ("HalfStorage", 2),
    ("BFloat16Storage", 2),
    ("IntStorage", 4),
    ("FloatStorage", 4),
    ("QInt32Storage", 4),
    ("LongStorage", 8),
    ("DoubleStorage", 8),
    ("ComplexFloatStorage", 8),
    ("ComplexDoubleStorage", 16),
];

// ============================================================================
// SECTION: Values
// ============================================================================

/// A module-qualified global reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRef {
    /// Defining module.
    pub module: String,
    /// Attribute name.
    pub name: String,
}

impl GlobalRef {
    /// Returns true when this reference names `module.name`.
    #[must_use]
    pub fn is(&self, module: &str, name: &str) -> bool {
        self.module == module && self.name == name
    }
}

/// A tensor storage referenced by a persistent id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRef {
    /// Storage record key.
    pub key: String,
    /// Storage class name (for example `FloatStorage`).
    pub storage_type: String,
    /// Element size in bytes for the storage class.
    pub element_size: u64,
    /// Device location recorded at save time.
    pub location: String,
    /// Number of elements.
    pub numel: u64,
}

impl StorageRef {
    /// Returns the storage size in bytes, if it fits in `u64`.
    #[must_use]
    pub const fn byte_len(&self) -> Option<u64> {
        self.numel.checked_mul(self.element_size)
    }
}

/// A value on the unpickler stack.
///
/// Containers are reference counted so memo lookups are cheap; mutation
/// copies on write, which gives snapshot semantics for memoized containers.
#[derive(Debug, Clone, PartialEq)]
pub enum PickleValue {
    /// `None`.
    None,
    /// Boolean.
    Bool(bool),
    /// Integer that fits in 64 bits.
    Int(i64),
    /// Wider integer as little-endian two's complement bytes.
    BigInt(Rc<[u8]>),
    /// Float.
    Float(f64),
    /// Text string.
    Str(Rc<str>),
    /// Byte string.
    Bytes(Rc<[u8]>),
    /// Tuple.
    Tuple(Rc<Vec<PickleValue>>),
    /// List.
    List(Rc<Vec<PickleValue>>),
    /// Dict (insertion ordered).
    Dict(Rc<Vec<(PickleValue, PickleValue)>>),
    /// Set or frozenset.
    Set(Rc<Vec<PickleValue>>),
    /// Global reference.
    Global(Rc<GlobalRef>),
    /// Recorded call of an allowed global.
    Object {
        /// Callable or class.
        callable: Rc<GlobalRef>,
        /// Positional arguments.
        args: Rc<Vec<PickleValue>>,
    },
    /// Storage produced by a persistent id.
    Storage(Rc<StorageRef>),
}

impl PickleValue {
    /// Returns a short label for the value kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Global(_) => "global",
            Self::Object {
                ..
            } => "object",
            Self::Storage(_) => "storage",
        }
    }

    /// Returns the string contents when this is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the integer when this is an `Int`.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// Output of a completed load.
#[derive(Debug, Clone, PartialEq)]
pub struct PickleLoad {
    /// Value left by `STOP`.
    pub value: PickleValue,
    /// Root storages referenced by persistent ids, keyed by record key.
    pub storages: BTreeMap<String, StorageRef>,
    /// Bytes consumed from the reader.
    pub consumed: u64,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Restricted unpickling failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickleError {
    /// The stream ended before `STOP`.
    #[error("pickle data was truncated")]
    Truncated,
    /// The stream exceeded the configured byte limit.
    #[error("pickle stream exceeds {limit} bytes")]
    TooLarge {
        /// Configured limit.
        limit: u64,
    },
    /// The underlying reader failed.
    #[error("read failed: {0}")]
    Io(String),
    /// The protocol header names an unknown version.
    #[error("unsupported pickle protocol: {0}")]
    Protocol(u8),
    /// The opcode is unknown or not permitted in a weights-only load.
    #[error("unsupported operand {opcode:#04x} at byte {offset}")]
    UnsupportedOpcode {
        /// Opcode byte.
        opcode: u8,
        /// Offset of the opcode.
        offset: u64,
    },
    /// A global outside the allow-list was referenced.
    #[error("weights only load failed: unsupported global {module}.{name}")]
    ForbiddenGlobal {
        /// Module name.
        module: String,
        /// Attribute name.
        name: String,
    },
    /// The program is structurally invalid.
    #[error("malformed pickle at byte {offset}: {reason}")]
    Malformed {
        /// Offset of the offending opcode.
        offset: u64,
        /// Description of the problem.
        reason: String,
    },
    /// A persistent id is not a storage descriptor.
    #[error("invalid persistent id: {0}")]
    PersistentId(String),
    /// A tensor view does not fit in its storage.
    #[error(
        "tensor view needs {required} elements but storage '{key}' holds {available}"
    )]
    StorageBounds {
        /// Storage key.
        key: String,
        /// Elements required by the view.
        required: u64,
        /// Elements available in the storage.
        available: u64,
    },
    /// A dtype-carrying tensor view reads past the bytes of its storage.
    #[error("tensor view needs {required} bytes but storage '{key}' holds {available}")]
    StorageBytes {
        /// Storage key.
        key: String,
        /// Bytes required by the view.
        required: u64,
        /// Bytes held by the storage.
        available: u64,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Runs one pickle program from `reader` to its `STOP` opcode.
///
/// Reading stops right after `STOP`, so callers can continue consuming the
/// same reader (legacy checkpoints append several pickles and raw storage
/// bytes back to back).
///
/// # Errors
///
/// Returns [`PickleError`] when the program is truncated, exceeds `limit`,
/// references forbidden globals, or is structurally invalid.
pub fn load<R: Read>(reader: &mut R, limit: u64) -> Result<PickleLoad, PickleError> {
    Machine::new(reader, limit).run()
}

/// Returns true when `module.name` is on the weights-only allow-list.
#[must_use]
pub fn is_allowed_global(module: &str, name: &str) -> bool {
    let module = if module == "__builtin__" { "builtins" } else { module };
    if module == "torch" && storage_element_size(name).is_some() {
        return true;
    }
    ALLOWED_GLOBALS
        .iter()
        .any(|(allowed, names)| *allowed == module && names.contains(&name))
}

/// Returns the element size of a tensor dtype, if known.
#[must_use]
pub fn dtype_element_size(name: &str) -> Option<u64> {
    DTYPE_SIZES.iter().find(|(dtype, _)| *dtype == name).map(|(_, size)| *size)
}

/// Returns the element size of a storage class, if known.
#[must_use]
pub fn storage_element_size(name: &str) -> Option<u64> {
    STORAGE_TYPES.iter().find(|(storage, _)| *storage == name).map(|(_, size)| *size)
}

// ============================================================================
// SECTION: Machine
// ============================================================================

/// Pickle stack machine state.
struct Machine<'r, R> {
    /// Source stream.
    reader: &'r mut R,
    /// Maximum bytes that may be consumed.
    limit: u64,
    /// Bytes consumed so far.
    offset: u64,
    /// Offset of the opcode being executed.
    op_offset: u64,
    /// Value stack.
    stack: Vec<PickleValue>,
    /// Stack heights recorded by `MARK`.
    marks: Vec<usize>,
    /// Memo table.
    memo: HashMap<u64, PickleValue>,
    /// Root storages referenced so far.
    storages: BTreeMap<String, StorageRef>,
}

impl<'r, R: Read> Machine<'r, R> {
    /// Creates a machine over `reader`.
    fn new(reader: &'r mut R, limit: u64) -> Self {
        Self {
            reader,
            limit,
            offset: 0,
            op_offset: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
            storages: BTreeMap::new(),
        }
    }

    /// Executes opcodes until `STOP`.
    fn run(mut self) -> Result<PickleLoad, PickleError> {
        loop {
            self.op_offset = self.offset;
            let opcode = self.read_u8()?;
            if opcode == op::STOP {
                return self.finish();
            }
            self.step(opcode)?;
        }
    }

    /// Executes a single opcode other than `STOP`.
    fn step(&mut self, opcode: u8) -> Result<(), PickleError> {
        match opcode {
            op::PROTO => {
                let version = self.read_u8()?;
                if version > HIGHEST_PROTOCOL {
                    return Err(PickleError::Protocol(version));
                }
            }
            op::FRAME => {
                self.read_array::<8>()?;
            }
            op::MARK => self.marks.push(self.stack.len()),
            op::POP => {
                if self.stack.len() > self.mark_base() {
                    self.stack.pop();
                } else {
                    self.pop_mark()?;
                }
            }
            op::POP_MARK => {
                self.pop_mark()?;
            }
            op::DUP => {
                let top = self.top()?.clone();
                self.stack.push(top);
            }
            op::NONE => self.stack.push(PickleValue::None),
            op::NEWTRUE => self.stack.push(PickleValue::Bool(true)),
            op::NEWFALSE => self.stack.push(PickleValue::Bool(false)),
            op::BININT => {
                let value = i32::from_le_bytes(self.read_array()?);
                self.stack.push(PickleValue::Int(i64::from(value)));
            }
            op::BININT1 => {
                let value = self.read_u8()?;
                self.stack.push(PickleValue::Int(i64::from(value)));
            }
            op::BININT2 => {
                let value = u16::from_le_bytes(self.read_array()?);
                self.stack.push(PickleValue::Int(i64::from(value)));
            }
            op::LONG1 => {
                let length = self.read_u8()?;
                let bytes = self.read_vec(u64::from(length))?;
                self.stack.push(decode_long(&bytes));
            }
            op::LONG4 => {
                let length = i32::from_le_bytes(self.read_array()?);
                let length = u64::try_from(length)
                    .map_err(|_| self.malformed("LONG4 with negative byte count"))?;
                let bytes = self.read_vec(length)?;
                self.stack.push(decode_long(&bytes));
            }
            op::INT => {
                let line = self.read_text_line()?;
                let value = match line.as_str() {
                    "00" => PickleValue::Bool(false),
                    "01" => PickleValue::Bool(true),
                    text => PickleValue::Int(
                        text.parse().map_err(|_| self.malformed("invalid INT literal"))?,
                    ),
                };
                self.stack.push(value);
            }
            op::LONG => {
                let line = self.read_text_line()?;
                let digits = line.strip_suffix('L').unwrap_or(&line);
                let value = digits.parse().map_err(|_| self.malformed("invalid LONG literal"))?;
                self.stack.push(PickleValue::Int(value));
            }
            op::BINFLOAT => {
                let value = f64::from_be_bytes(self.read_array()?);
                self.stack.push(PickleValue::Float(value));
            }
            op::FLOAT => {
                let line = self.read_text_line()?;
                let value = line.parse().map_err(|_| self.malformed("invalid FLOAT literal"))?;
                self.stack.push(PickleValue::Float(value));
            }
            op::BINUNICODE => {
                let length = u32::from_le_bytes(self.read_array()?);
                self.push_utf8(u64::from(length))?;
            }
            op::SHORT_BINUNICODE => {
                let length = self.read_u8()?;
                self.push_utf8(u64::from(length))?;
            }
            op::BINUNICODE8 => {
                let length = u64::from_le_bytes(self.read_array()?);
                self.push_utf8(length)?;
            }
            op::UNICODE => {
                let line = self.read_text_line()?;
                self.stack.push(PickleValue::Str(Rc::from(line)));
            }
            op::BINSTRING => {
                let length = i32::from_le_bytes(self.read_array()?);
                let length = u64::try_from(length)
                    .map_err(|_| self.malformed("BINSTRING with negative length"))?;
                self.push_legacy_string(length)?;
            }
            op::SHORT_BINSTRING => {
                let length = self.read_u8()?;
                self.push_legacy_string(u64::from(length))?;
            }
            op::STRING => {
                let line = self.read_text_line()?;
                let quoted = line.len() >= 2
                    && (line.starts_with('\'') && line.ends_with('\'')
                        || line.starts_with('"') && line.ends_with('"'));
                if !quoted {
                    return Err(self.malformed("STRING argument is not quoted"));
                }
                let text = &line[1 .. line.len() - 1];
                self.stack.push(PickleValue::Str(Rc::from(text)));
            }
            op::BINBYTES => {
                let length = u32::from_le_bytes(self.read_array()?);
                let bytes = self.read_vec(u64::from(length))?;
                self.stack.push(PickleValue::Bytes(Rc::from(bytes)));
            }
            op::SHORT_BINBYTES => {
                let length = self.read_u8()?;
                let bytes = self.read_vec(u64::from(length))?;
                self.stack.push(PickleValue::Bytes(Rc::from(bytes)));
            }
            op::BINBYTES8 | op::BYTEARRAY8 => {
                let length = u64::from_le_bytes(self.read_array()?);
                let bytes = self.read_vec(length)?;
                self.stack.push(PickleValue::Bytes(Rc::from(bytes)));
            }
            op::EMPTY_TUPLE => self.stack.push(PickleValue::Tuple(Rc::new(Vec::new()))),
            op::TUPLE => {
                let items = self.pop_mark()?;
                self.stack.push(PickleValue::Tuple(Rc::new(items)));
            }
            op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                let count = usize::from(opcode - op::TUPLE1) + 1;
                let items = self.pop_n(count)?;
                self.stack.push(PickleValue::Tuple(Rc::new(items)));
            }
            op::EMPTY_LIST => self.stack.push(PickleValue::List(Rc::new(Vec::new()))),
            op::LIST => {
                let items = self.pop_mark()?;
                self.stack.push(PickleValue::List(Rc::new(items)));
            }
            op::APPEND => {
                let value = self.pop()?;
                self.extend_list(vec![value])?;
            }
            op::APPENDS => {
                let items = self.pop_mark()?;
                self.extend_list(items)?;
            }
            op::EMPTY_DICT => self.stack.push(PickleValue::Dict(Rc::new(Vec::new()))),
            op::DICT => {
                let items = self.pop_mark()?;
                let pairs = self.pairs(items)?;
                self.stack.push(PickleValue::Dict(Rc::new(pairs)));
            }
            op::SETITEM => {
                let value = self.pop()?;
                let key = self.pop()?;
                self.extend_dict(vec![(key, value)])?;
            }
            op::SETITEMS => {
                let items = self.pop_mark()?;
                let pairs = self.pairs(items)?;
                self.extend_dict(pairs)?;
            }
            op::EMPTY_SET => self.stack.push(PickleValue::Set(Rc::new(Vec::new()))),
            op::ADDITEMS => {
                let items = self.pop_mark()?;
                let offset = self.op_offset;
                match self.top_mut()? {
                    PickleValue::Set(set) => Rc::make_mut(set).extend(items),
                    other => {
                        return Err(malformed_at(
                            offset,
                            format!("ADDITEMS target is a {}", other.kind()),
                        ));
                    }
                }
            }
            op::FROZENSET => {
                let items = self.pop_mark()?;
                self.stack.push(PickleValue::Set(Rc::new(items)));
            }
            op::GLOBAL => {
                let module = self.read_text_line()?;
                let name = self.read_text_line()?;
                let global = resolve_global(module, name)?;
                self.stack.push(global);
            }
            op::STACK_GLOBAL => {
                let name = self.pop()?;
                let module = self.pop()?;
                let (Some(module), Some(name)) = (module.as_str(), name.as_str()) else {
                    return Err(self.malformed("STACK_GLOBAL requires str operands"));
                };
                let global = resolve_global(module.to_string(), name.to_string())?;
                self.stack.push(global);
            }
            op::REDUCE => {
                let args = self.pop()?;
                let callable = self.pop()?;
                let value = self.call(&callable, args)?;
                self.stack.push(value);
            }
            op::NEWOBJ => {
                let args = self.pop()?;
                let class = self.pop()?;
                let value = self.call(&class, args)?;
                self.stack.push(value);
            }
            op::NEWOBJ_EX => {
                let kwargs = self.pop()?;
                if !matches!(kwargs, PickleValue::Dict(_)) {
                    return Err(self.malformed("NEWOBJ_EX kwargs must be a dict"));
                }
                let args = self.pop()?;
                let class = self.pop()?;
                let value = self.call(&class, args)?;
                self.stack.push(value);
            }
            op::BUILD => {
                self.pop()?;
                self.top()?;
            }
            op::PUT => {
                let key = self.read_memo_key_line()?;
                self.memo_put(key)?;
            }
            op::BINPUT => {
                let key = self.read_u8()?;
                self.memo_put(u64::from(key))?;
            }
            op::LONG_BINPUT => {
                let key = u32::from_le_bytes(self.read_array()?);
                self.memo_put(u64::from(key))?;
            }
            op::MEMOIZE => {
                let key = u64::try_from(self.memo.len()).unwrap_or(u64::MAX);
                self.memo_put(key)?;
            }
            op::GET => {
                let key = self.read_memo_key_line()?;
                self.memo_get(key)?;
            }
            op::BINGET => {
                let key = self.read_u8()?;
                self.memo_get(u64::from(key))?;
            }
            op::LONG_BINGET => {
                let key = u32::from_le_bytes(self.read_array()?);
                self.memo_get(u64::from(key))?;
            }
            op::BINPERSID => {
                let pid = self.pop()?;
                let storage = self.persistent_load(&pid)?;
                self.stack.push(storage);
            }
            op::PERSID => {
                return Err(PickleError::PersistentId(
                    "text persistent ids are not supported".to_string(),
                ));
            }
            _ => {
                return Err(PickleError::UnsupportedOpcode {
                    opcode,
                    offset: self.op_offset,
                });
            }
        }
        Ok(())
    }

    /// Completes the load at `STOP`.
    fn finish(mut self) -> Result<PickleLoad, PickleError> {
        if !self.marks.is_empty() {
            return Err(self.malformed("unterminated MARK at STOP"));
        }
        if self.stack.len() != 1 {
            let reason = format!("STOP with {} values on the stack", self.stack.len());
            return Err(self.malformed(&reason));
        }
        let value = self.pop()?;
        Ok(PickleLoad {
            value,
            storages: self.storages,
            consumed: self.offset,
        })
    }

    // ------------------------------------------------------------------------
    // Stack helpers
    // ------------------------------------------------------------------------

    /// Returns the stack height recorded by the innermost mark.
    fn mark_base(&self) -> usize {
        self.marks.last().copied().unwrap_or(0)
    }

    /// Pops one value above the innermost mark.
    fn pop(&mut self) -> Result<PickleValue, PickleError> {
        if self.stack.len() <= self.mark_base() {
            return Err(self.malformed("stack underflow"));
        }
        self.stack.pop().ok_or_else(|| self.malformed("stack underflow"))
    }

    /// Pops `count` values in push order.
    fn pop_n(&mut self, count: usize) -> Result<Vec<PickleValue>, PickleError> {
        if self.stack.len() < self.mark_base() + count {
            return Err(self.malformed("stack underflow"));
        }
        let start = self.stack.len() - count;
        Ok(self.stack.split_off(start))
    }

    /// Pops every value above the innermost mark, and the mark.
    fn pop_mark(&mut self) -> Result<Vec<PickleValue>, PickleError> {
        let base = self.marks.pop().ok_or_else(|| self.malformed("could not find MARK"))?;
        Ok(self.stack.split_off(base))
    }

    /// Returns the top value.
    fn top(&self) -> Result<&PickleValue, PickleError> {
        if self.stack.len() <= self.mark_base() {
            return Err(self.malformed("stack underflow"));
        }
        self.stack.last().ok_or_else(|| self.malformed("stack underflow"))
    }

    /// Returns the top value mutably.
    fn top_mut(&mut self) -> Result<&mut PickleValue, PickleError> {
        if self.stack.len() <= self.mark_base() {
            return Err(self.malformed("stack underflow"));
        }
        let offset = self.op_offset;
        self.stack.last_mut().ok_or_else(|| malformed_at(offset, "stack underflow".to_string()))
    }

    /// Appends items to the list on top of the stack.
    fn extend_list(&mut self, items: Vec<PickleValue>) -> Result<(), PickleError> {
        let offset = self.op_offset;
        match self.top_mut()? {
            PickleValue::List(list) => {
                Rc::make_mut(list).extend(items);
                Ok(())
            }
            other => Err(malformed_at(offset, format!("APPEND target is a {}", other.kind()))),
        }
    }

    /// Inserts pairs into the dict on top of the stack.
    fn extend_dict(&mut self, pairs: Vec<(PickleValue, PickleValue)>) -> Result<(), PickleError> {
        let offset = self.op_offset;
        match self.top_mut()? {
            PickleValue::Dict(dict) => {
                Rc::make_mut(dict).extend(pairs);
                Ok(())
            }
            other => Err(malformed_at(offset, format!("SETITEM target is a {}", other.kind()))),
        }
    }

    /// Groups a flat item list into key/value pairs.
    fn pairs(&self, items: Vec<PickleValue>) -> Result<Vec<(PickleValue, PickleValue)>, PickleError> {
        if items.len() % 2 != 0 {
            return Err(self.malformed("odd number of dict items"));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    /// Stores the top of stack in the memo.
    fn memo_put(&mut self, key: u64) -> Result<(), PickleError> {
        let value = self.top()?.clone();
        self.memo.insert(key, value);
        Ok(())
    }

    /// Pushes a memoized value.
    fn memo_get(&mut self, key: u64) -> Result<(), PickleError> {
        let value = self
            .memo
            .get(&key)
            .cloned()
            .ok_or_else(|| self.malformed(&format!("memo key {key} not found")))?;
        self.stack.push(value);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Calls and persistent ids
    // ------------------------------------------------------------------------

    /// Records a call of an allowed global.
    fn call(&self, callable: &PickleValue, args: PickleValue) -> Result<PickleValue, PickleError> {
        let PickleValue::Global(global) = callable else {
            return Err(self.malformed(&format!("cannot call a {}", callable.kind())));
        };
        let args = match args {
            PickleValue::Tuple(args) => args,
            other => {
                return Err(self.malformed(&format!(
                    "call arguments must be a tuple, got {}",
                    other.kind()
                )));
            }
        };

        if global.is("collections", "OrderedDict") && args.is_empty() {
            return Ok(PickleValue::Dict(Rc::new(Vec::new())));
        }
        if global.is("_codecs", "encode") {
            return encode_latin1(&args).ok_or_else(|| self.malformed("invalid _codecs.encode call"));
        }
        let view = if global.is("torch._utils", "_rebuild_tensor_v2") || global.is("torch._utils", "_rebuild_tensor") {
            Some(check_tensor_view(&args, None))
        } else if global.is("torch._utils", "_rebuild_tensor_v3") {
            let dtype_size = match args.get(6) {
                Some(PickleValue::Global(dtype)) if dtype.module == "torch" => dtype_element_size(&dtype.name),
                _ => None,
            }
            .ok_or_else(|| self.malformed("tensor rebuild needs a known torch dtype"))?;
            Some(check_tensor_view(&args, Some(dtype_size)))
        } else {
            None
        };
        if let Some(view) = view {
            view.map_err(|reason| match reason {
                ViewError::Bounds(err) => err,
                ViewError::Shape(reason) => self.malformed(reason),
            })?;
        }
        Ok(PickleValue::Object {
            callable: Rc::clone(global),
            args,
        })
    }

    /// Resolves a storage persistent id.
    fn persistent_load(&mut self, pid: &PickleValue) -> Result<PickleValue, PickleError> {
        let PickleValue::Tuple(items) = pid else {
            return Err(PickleError::PersistentId(format!("expected a tuple, got {}", pid.kind())));
        };
        let typename = items.first().and_then(PickleValue::as_str);
        if typename != Some("storage") {
            return Err(PickleError::PersistentId(format!(
                "unsupported persistent id type {}",
                typename.unwrap_or("<non-string>")
            )));
        }
        if items.len() != 5 && items.len() != 6 {
            return Err(PickleError::PersistentId(format!(
                "storage descriptor has {} fields",
                items.len()
            )));
        }
        let (storage_type, element_size) = match &items[1] {
            PickleValue::Global(global) if global.module == "torch" => {
                let size = storage_element_size(&global.name).ok_or_else(|| {
                    PickleError::PersistentId(format!("unknown storage type {}", global.name))
                })?;
                (global.name.clone(), size)
            }
            other => {
                return Err(PickleError::PersistentId(format!(
                    "storage type must be a torch storage class, got {}",
                    other.kind()
                )));
            }
        };
        let key = items[2]
            .as_str()
            .ok_or_else(|| PickleError::PersistentId("storage key must be a str".to_string()))?
            .to_string();
        let location = items[3]
            .as_str()
            .ok_or_else(|| PickleError::PersistentId("storage location must be a str".to_string()))?
            .to_string();
        let numel = non_negative(&items[4])
            .ok_or_else(|| PickleError::PersistentId("storage size must be a non-negative int".to_string()))?;

        let root = StorageRef {
            key: key.clone(),
            storage_type,
            element_size,
            location,
            numel,
        };
        if root.byte_len().is_none() {
            return Err(PickleError::PersistentId(format!("storage '{key}' size overflows")));
        }
        match self.storages.get(&key) {
            Some(existing) if *existing != root => {
                return Err(PickleError::PersistentId(format!(
                    "conflicting descriptors for storage '{key}'"
                )));
            }
            Some(_) => {}
            None => {
                self.storages.insert(key, root.clone());
            }
        }

        match items.get(5) {
            None | Some(PickleValue::None) => Ok(PickleValue::Storage(Rc::new(root))),
            Some(PickleValue::Tuple(view)) => view_of(&root, view).map(|view| PickleValue::Storage(Rc::new(view))),
            Some(other) => Err(PickleError::PersistentId(format!(
                "view metadata must be a tuple, got {}",
                other.kind()
            ))),
        }
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Charges `count` bytes against the limit.
    fn charge(&mut self, count: u64) -> Result<(), PickleError> {
        let next = self.offset.checked_add(count).ok_or(PickleError::TooLarge {
            limit: self.limit,
        })?;
        if next > self.limit {
            return Err(PickleError::TooLarge {
                limit: self.limit,
            });
        }
        self.offset = next;
        Ok(())
    }

    /// Fills `buf` from the reader.
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), PickleError> {
        self.charge(u64::try_from(buf.len()).unwrap_or(u64::MAX))?;
        self.reader.read_exact(buf).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                PickleError::Truncated
            } else {
                PickleError::Io(err.to_string())
            }
        })
    }

    /// Reads one byte.
    fn read_u8(&mut self) -> Result<u8, PickleError> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    /// Reads a fixed-size array.
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PickleError> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Reads `length` bytes, checking the limit before allocating.
    fn read_vec(&mut self, length: u64) -> Result<Vec<u8>, PickleError> {
        let remaining = self.limit.saturating_sub(self.offset);
        if length > remaining {
            return Err(PickleError::TooLarge {
                limit: self.limit,
            });
        }
        let length = usize::try_from(length).map_err(|_| PickleError::TooLarge {
            limit: self.limit,
        })?;
        let mut buf = vec![0u8; length];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Reads a newline-terminated argument line as UTF-8.
    fn read_text_line(&mut self) -> Result<String, PickleError> {
        let mut line = Vec::new();
        loop {
            let byte = self.read_u8()?;
            if byte == b'\n' {
                break;
            }
            if line.len() >= MAX_LINE_BYTES {
                return Err(self.malformed("argument line too long"));
            }
            line.push(byte);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line).map_err(|_| self.malformed("argument line is not UTF-8"))
    }

    /// Reads a memo key written as a decimal line.
    fn read_memo_key_line(&mut self) -> Result<u64, PickleError> {
        let line = self.read_text_line()?;
        line.trim().parse().map_err(|_| self.malformed("invalid memo key"))
    }

    /// Reads a UTF-8 string payload and pushes it.
    fn push_utf8(&mut self, length: u64) -> Result<(), PickleError> {
        let bytes = self.read_vec(length)?;
        let text = String::from_utf8(bytes).map_err(|_| self.malformed("string is not UTF-8"))?;
        self.stack.push(PickleValue::Str(Rc::from(text)));
        Ok(())
    }

    /// Reads a protocol-0/1 byte string and pushes it as text.
    fn push_legacy_string(&mut self, length: u64) -> Result<(), PickleError> {
        let bytes = self.read_vec(length)?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.stack.push(PickleValue::Str(Rc::from(text)));
        Ok(())
    }

    /// Builds a malformed-program error at the current opcode.
    fn malformed(&self, reason: &str) -> PickleError {
        malformed_at(self.op_offset, reason.to_string())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a malformed-program error at `offset`.
const fn malformed_at(offset: u64, reason: String) -> PickleError {
    PickleError::Malformed {
        offset,
        reason,
    }
}

/// Resolves a global against the allow-list.
fn resolve_global(module: String, name: String) -> Result<PickleValue, PickleError> {
    if !is_allowed_global(&module, &name) {
        return Err(PickleError::ForbiddenGlobal {
            module,
            name,
        });
    }
    Ok(PickleValue::Global(Rc::new(GlobalRef {
        module,
        name,
    })))
}

/// Decodes a little-endian two's complement integer.
fn decode_long(bytes: &[u8]) -> PickleValue {
    let Some(&last) = bytes.last() else {
        return PickleValue::Int(0);
    };
    if bytes.len() > 8 {
        return PickleValue::BigInt(Rc::from(bytes));
    }
    let mut buf = if last & 0x80 == 0 { [0u8; 8] } else { [0xFFu8; 8] };
    buf[.. bytes.len()].copy_from_slice(bytes);
    PickleValue::Int(i64::from_le_bytes(buf))
}

/// Returns a non-negative integer value.
fn non_negative(value: &PickleValue) -> Option<u64> {
    value.as_int().and_then(|value| u64::try_from(value).ok())
}

/// Evaluates `_codecs.encode(text, "latin1")`.
fn encode_latin1(args: &[PickleValue]) -> Option<PickleValue> {
    let [PickleValue::Str(text), PickleValue::Str(encoding)] = args else {
        return None;
    };
    if !matches!(encoding.as_ref(), "latin1" | "latin-1" | "iso-8859-1") {
        return None;
    }
    let bytes: Option<Vec<u8>> = text.chars().map(|ch| u8::try_from(u32::from(ch)).ok()).collect();
    bytes.map(|bytes| PickleValue::Bytes(Rc::from(bytes)))
}

/// Builds the storage view described by legacy view metadata.
fn view_of(root: &StorageRef, view: &[PickleValue]) -> Result<StorageRef, PickleError> {
    let [PickleValue::Str(view_key), offset, size] = view else {
        return Err(PickleError::PersistentId("view metadata must be (key, offset, size)".to_string()));
    };
    let (Some(offset), Some(size)) = (non_negative(offset), non_negative(size)) else {
        return Err(PickleError::PersistentId("view offset and size must be non-negative".to_string()));
    };
    let required = offset.checked_add(size).unwrap_or(u64::MAX);
    if required > root.numel {
        return Err(PickleError::StorageBounds {
            key: root.key.clone(),
            required,
            available: root.numel,
        });
    }
    Ok(StorageRef {
        key: view_key.to_string(),
        numel: size,
        ..root.clone()
    })
}

/// Tensor view validation failures.
enum ViewError {
    /// The view reads past the storage.
    Bounds(PickleError),
    /// The rebuild arguments have the wrong shape.
    Shape(&'static str),
}

/// Checks that a rebuilt tensor view fits inside its storage.
///
/// Without a dtype the view is counted in storage elements; with one it is
/// counted in bytes against the storage's byte length.
fn check_tensor_view(args: &[PickleValue], dtype_size: Option<u64>) -> Result<(), ViewError> {
    let (Some(PickleValue::Storage(storage)), Some(offset), Some(size), Some(stride)) =
        (args.first(), args.get(1), args.get(2), args.get(3))
    else {
        return Err(ViewError::Shape("tensor rebuild needs storage, offset, size, stride"));
    };
    let offset = non_negative(offset).ok_or(ViewError::Shape("storage offset must be non-negative"))?;
    let (PickleValue::Tuple(size), PickleValue::Tuple(stride)) = (size, stride) else {
        return Err(ViewError::Shape("tensor size and stride must be tuples"));
    };
    if size.len() != stride.len() {
        return Err(ViewError::Shape("tensor size and stride lengths differ"));
    }
    let mut extent: u64 = 0;
    for (dim, step) in size.iter().zip(stride.iter()) {
        let dim = non_negative(dim).ok_or(ViewError::Shape("tensor sizes must be non-negative"))?;
        let step = non_negative(step).ok_or(ViewError::Shape("tensor strides must be non-negative"))?;
        if dim == 0 {
            return Ok(());
        }
        let span = (dim - 1).checked_mul(step).ok_or(ViewError::Shape("tensor view overflows"))?;
        extent = extent.checked_add(span).ok_or(ViewError::Shape("tensor view overflows"))?;
    }
    let required = offset
        .checked_add(extent)
        .and_then(|value| value.checked_add(1))
        .ok_or(ViewError::Shape("tensor view overflows"))?;
    if let Some(dtype_size) = dtype_size {
        let required = required.checked_mul(dtype_size).ok_or(ViewError::Shape("tensor view overflows"))?;
        let available = storage.byte_len().ok_or(ViewError::Shape("storage size overflows"))?;
        if required > available {
            return Err(ViewError::Bounds(PickleError::StorageBytes {
                key: storage.key.clone(),
                required,
                available,
            }));
        }
        return Ok(());
    }
    if required > storage.numel {
        return Err(ViewError::Bounds(PickleError::StorageBounds {
            key: storage.key.clone(),
            required,
            available: storage.numel,
        }));
    }
    Ok(())
}
