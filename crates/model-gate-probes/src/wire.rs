// crates/model-gate-probes/src/wire.rs
// ============================================================================
// Module: Protobuf Wire Reader
// Description: Zero-copy decoder for the protobuf binary wire format.
// Purpose: Let the ONNX and SavedModel probes decode messages field by field.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`WireReader`] walks a serialized message and yields `(field number,
//! value)` pairs without a schema. Probes interpret the fields they know and
//! skip the rest. Any structural damage (truncated varints, lengths that run
//! past the buffer, invalid wire types) is reported as a [`WireError`], which
//! is how truncated or bit-flipped artifacts are detected.
//!
//! ## Invariants
//! - Length-delimited values borrow from the input buffer.
//! - Deprecated group encodings are rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Largest legal protobuf field number.
const MAX_FIELD_NUMBER: u64 = (1 << 29) - 1;
/// Maximum encoded length of a varint.
const MAX_VARINT_BYTES: usize = 10;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Protobuf decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// A varint ran past the end of the buffer.
    #[error("truncated varint at byte {offset}")]
    TruncatedVarint {
        /// Offset where the varint started.
        offset: usize,
    },
    /// A varint was longer than ten bytes or overflowed 64 bits.
    #[error("malformed varint at byte {offset}")]
    VarintOverflow {
        /// Offset where the varint started.
        offset: usize,
    },
    /// A tag carried field number zero or a number above the legal range.
    #[error("invalid field number {number} at byte {offset}")]
    InvalidFieldNumber {
        /// Decoded field number.
        number: u64,
        /// Offset of the tag.
        offset: usize,
    },
    /// A tag carried an undefined or unsupported wire type.
    #[error("unsupported wire type {wire_type} for field {number} at byte {offset}")]
    InvalidWireType {
        /// Field number.
        number: u32,
        /// Raw wire type.
        wire_type: u8,
        /// Offset of the tag.
        offset: usize,
    },
    /// A fixed-width or length-delimited value ran past the end of the buffer.
    #[error("field {number} needs {needed} bytes but only {remaining} remain")]
    Truncated {
        /// Field number.
        number: u32,
        /// Bytes required.
        needed: u64,
        /// Bytes remaining.
        remaining: usize,
    },
    /// A known field was encoded with the wrong wire type.
    #[error("field `{field}` has wire type {found}, expected {expected}")]
    WrongWireType {
        /// Field name.
        field: &'static str,
        /// Expected wire type label.
        expected: &'static str,
        /// Found wire type label.
        found: &'static str,
    },
    /// A string field is not valid UTF-8.
    #[error("field `{field}` is not valid UTF-8")]
    InvalidUtf8 {
        /// Field name.
        field: &'static str,
    },
    /// A scalar does not fit the declared field type.
    #[error("field `{field}` value {value} is out of range")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Raw decoded value.
        value: u64,
    },
    /// A packed repeated field has a length that is not a multiple of its element size.
    #[error("packed field `{field}` has {length} bytes, not a multiple of {width}")]
    PackedLength {
        /// Field name.
        field: &'static str,
        /// Payload length.
        length: usize,
        /// Element width.
        width: usize,
    },
}

// ============================================================================
// SECTION: Field Values
// ============================================================================

/// A decoded field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Wire type 0.
    Varint(u64),
    /// Wire type 1.
    Fixed64(u64),
    /// Wire type 2.
    Bytes(&'a [u8]),
    /// Wire type 5.
    Fixed32(u32),
}

impl<'a> FieldValue<'a> {
    /// Returns a label for the wire type.
    #[must_use]
    pub const fn wire_label(&self) -> &'static str {
        match self {
            Self::Varint(_) => "varint",
            Self::Fixed64(_) => "fixed64",
            Self::Bytes(_) => "length-delimited",
            Self::Fixed32(_) => "fixed32",
        }
    }

    /// Returns the raw varint.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::WrongWireType`] for other wire types.
    pub const fn varint(&self, field: &'static str) -> Result<u64, WireError> {
        match self {
            Self::Varint(value) => Ok(*value),
            other => Err(WireError::WrongWireType {
                field,
                expected: "varint",
                found: other.wire_label(),
            }),
        }
    }

    /// Returns an `int64` field value.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::WrongWireType`] for other wire types.
    #[allow(clippy::cast_possible_wrap, reason = "protobuf int64 is two's complement on the wire.")]
    pub const fn int64(&self, field: &'static str) -> Result<i64, WireError> {
        match self.varint(field) {
            Ok(value) => Ok(value as i64),
            Err(err) => Err(err),
        }
    }

    /// Returns an `int32` or enum field value.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] for other wire types or values outside `i32`.
    pub fn int32(&self, field: &'static str) -> Result<i32, WireError> {
        let raw = self.varint(field)?;
        let wide = self.int64(field)?;
        i32::try_from(wide).map_err(|_| WireError::OutOfRange {
            field,
            value: raw,
        })
    }

    /// Returns a `bool` field value.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::WrongWireType`] for other wire types.
    pub const fn boolean(&self, field: &'static str) -> Result<bool, WireError> {
        match self.varint(field) {
            Ok(value) => Ok(value != 0),
            Err(err) => Err(err),
        }
    }

    /// Returns a `fixed32` field value.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::WrongWireType`] for other wire types.
    pub const fn fixed32(&self, field: &'static str) -> Result<u32, WireError> {
        match self {
            Self::Fixed32(value) => Ok(*value),
            other => Err(WireError::WrongWireType {
                field,
                expected: "fixed32",
                found: other.wire_label(),
            }),
        }
    }

    /// Returns a length-delimited payload (bytes or embedded message).
    ///
    /// # Errors
    ///
    /// Returns [`WireError::WrongWireType`] for other wire types.
    pub const fn bytes(&self, field: &'static str) -> Result<&'a [u8], WireError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            other => Err(WireError::WrongWireType {
                field,
                expected: "length-delimited",
                found: other.wire_label(),
            }),
        }
    }

    /// Returns a UTF-8 string field value.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] for other wire types or invalid UTF-8.
    pub fn string(&self, field: &'static str) -> Result<&'a str, WireError> {
        let bytes = self.bytes(field)?;
        std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8 {
            field,
        })
    }

    /// Returns the number of elements in a repeated varint field occurrence,
    /// accepting both packed and unpacked encodings.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when a packed payload is malformed.
    pub fn repeated_varint_count(&self, field: &'static str) -> Result<usize, WireError> {
        match self {
            Self::Varint(_) => Ok(1),
            Self::Bytes(bytes) => Ok(packed_varints(bytes)?.len()),
            other => Err(WireError::WrongWireType {
                field,
                expected: "varint",
                found: other.wire_label(),
            }),
        }
    }

    /// Returns the element count of a repeated fixed-width field occurrence,
    /// accepting both packed and unpacked encodings.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when the wire type or packed length is wrong.
    pub fn repeated_fixed_count(&self, field: &'static str, width: usize) -> Result<usize, WireError> {
        match (self, width) {
            (Self::Fixed32(_), 4) | (Self::Fixed64(_), 8) => Ok(1),
            (Self::Bytes(bytes), _) => {
                if width == 0 || bytes.len() % width != 0 {
                    return Err(WireError::PackedLength {
                        field,
                        length: bytes.len(),
                        width,
                    });
                }
                Ok(bytes.len() / width)
            }
            (other, _) => Err(WireError::WrongWireType {
                field,
                expected: if width == 8 { "fixed64" } else { "fixed32" },
                found: other.wire_label(),
            }),
        }
    }
}

/// A decoded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    /// Field number from the tag.
    pub number: u32,
    /// Decoded value.
    pub value: FieldValue<'a>,
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Iterator over the fields of one serialized message.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    /// Message bytes.
    buf: &'a [u8],
    /// Current read offset.
    pos: usize,
    /// Set after the first error so iteration stops.
    failed: bool,
}

impl<'a> WireReader<'a> {
    /// Creates a reader over a serialized message.
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    /// Decodes the next field.
    fn next_field(&mut self) -> Result<Field<'a>, WireError> {
        let tag_offset = self.pos;
        let tag = read_varint(self.buf, &mut self.pos)?;
        let number = tag >> 3;
        if number == 0 || number > MAX_FIELD_NUMBER {
            return Err(WireError::InvalidFieldNumber {
                number,
                offset: tag_offset,
            });
        }
        let number = u32::try_from(number).map_err(|_| WireError::InvalidFieldNumber {
            number,
            offset: tag_offset,
        })?;
        let wire_type = u8::try_from(tag & 0x7).unwrap_or(u8::MAX);
        let value = match wire_type {
            0 => FieldValue::Varint(read_varint(self.buf, &mut self.pos)?),
            1 => FieldValue::Fixed64(u64::from_le_bytes(self.take_array(number)?)),
            2 => {
                let length = read_varint(self.buf, &mut self.pos)?;
                FieldValue::Bytes(self.take(number, length)?)
            }
            5 => FieldValue::Fixed32(u32::from_le_bytes(self.take_array(number)?)),
            _ => {
                return Err(WireError::InvalidWireType {
                    number,
                    wire_type,
                    offset: tag_offset,
                });
            }
        };
        Ok(Field {
            number,
            value,
        })
    }

    /// Takes `length` bytes from the buffer.
    fn take(&mut self, number: u32, length: u64) -> Result<&'a [u8], WireError> {
        let remaining = self.buf.len() - self.pos;
        let truncated = WireError::Truncated {
            number,
            needed: length,
            remaining,
        };
        let length = usize::try_from(length).map_err(|_| truncated.clone())?;
        if length > remaining {
            return Err(truncated);
        }
        let start = self.pos;
        self.pos += length;
        Ok(&self.buf[start .. self.pos])
    }

    /// Takes a fixed-width array from the buffer.
    fn take_array<const N: usize>(&mut self, number: u32) -> Result<[u8; N], WireError> {
        let slice = self.take(number, N as u64)?;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }
}

impl<'a> Iterator for WireReader<'a> {
    type Item = Result<Field<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        let result = self.next_field();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a base-128 varint starting at `pos`.
///
/// # Errors
///
/// Returns [`WireError`] when the varint is truncated or overlong.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, WireError> {
    let start = *pos;
    let mut value: u64 = 0;
    for index in 0 .. MAX_VARINT_BYTES {
        let Some(&byte) = buf.get(start + index) else {
            return Err(WireError::TruncatedVarint {
                offset: start,
            });
        };
        if index == MAX_VARINT_BYTES - 1 && byte > 1 {
            return Err(WireError::VarintOverflow {
                offset: start,
            });
        }
        value |= u64::from(byte & 0x7F) << (7 * index);
        if byte & 0x80 == 0 {
            *pos = start + index + 1;
            return Ok(value);
        }
    }
    Err(WireError::VarintOverflow {
        offset: start,
    })
}

/// Decodes a packed run of varints.
///
/// # Errors
///
/// Returns [`WireError`] when any varint is malformed.
pub fn packed_varints(bytes: &[u8]) -> Result<Vec<u64>, WireError> {
    let mut pos = 0;
    let mut values = Vec::new();
    while pos < bytes.len() {
        values.push(read_varint(bytes, &mut pos)?);
    }
    Ok(values)
}

/// Walks every field of a message without interpreting it.
///
/// Used for embedded messages whose contents the probes do not inspect but
/// whose framing must still be intact.
///
/// # Errors
///
/// Returns the first [`WireError`] encountered.
pub fn skim(bytes: &[u8]) -> Result<usize, WireError> {
    let mut count = 0;
    for field in WireReader::new(bytes) {
        field?;
        count += 1;
    }
    Ok(count)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions use unwrap for clarity.")]
mod tests {
    use super::FieldValue;
    use super::WireError;
    use super::WireReader;
    use super::packed_varints;
    use super::read_varint;
    use super::skim;

    #[test]
    fn decodes_varint_and_length_fields() {
        // field 1 varint 150, field 2 string "hi"
        let bytes = [0x08, 0x96, 0x01, 0x12, 0x02, b'h', b'i'];
        let fields: Vec<_> = WireReader::new(&bytes).collect::<Result<_, _>>().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].number, 1);
        assert_eq!(fields[0].value, FieldValue::Varint(150));
        assert_eq!(fields[1].value.string("name").unwrap(), "hi");
    }

    #[test]
    fn truncated_length_is_reported() {
        let bytes = [0x12, 0x05, b'a'];
        let err = skim(&bytes).unwrap_err();
        assert!(matches!(err, WireError::Truncated { number: 2, needed: 5, remaining: 1 }));
    }

    #[test]
    fn field_number_zero_is_invalid() {
        assert!(matches!(skim(&[0x00, 0x01]), Err(WireError::InvalidFieldNumber { .. })));
    }

    #[test]
    fn groups_are_rejected() {
        assert!(matches!(skim(&[0x0B, 0x0C]), Err(WireError::InvalidWireType { .. })));
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let bytes = [0xFF; 11];
        let mut pos = 0;
        assert!(matches!(read_varint(&bytes, &mut pos), Err(WireError::VarintOverflow { .. })));
    }

    #[test]
    fn negative_int32_round_trips() {
        let mut pos = 0;
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let raw = read_varint(&bytes, &mut pos).unwrap();
        assert_eq!(FieldValue::Varint(raw).int32("dims").unwrap(), -1);
    }

    #[test]
    fn packed_varints_decode() {
        assert_eq!(packed_varints(&[0x01, 0x96, 0x01]).unwrap(), vec![1, 150]);
    }

    #[test]
    fn wrong_wire_type_names_field() {
        let err = FieldValue::Varint(3).bytes("graph").unwrap_err();
        assert_eq!(err.to_string(), "field `graph` has wire type varint, expected length-delimited");
    }
}
