// crates/model-gate-core/src/resolve.rs
// ============================================================================
// Module: Plain Scalar Resolution
// Description: YAML 1.1 typing of unquoted top-level metadata values.
// Purpose: Type unquoted declaration values with YAML 1.1 rules.
// Dependencies: serde, serde_yaml
// ============================================================================

//! ## Overview
//! `serde_yaml` types plain scalars with YAML 1.2 rules, while declarations
//! are authored against YAML 1.1 (`yes` is a boolean, `1e10` is text). After
//! the document parses, a second pass over the same bytes recovers the raw
//! text of every top-level scalar and re-types the plain ones:
//! - null: empty, `~`, `null`
//! - booleans: `yes`/`no`, `true`/`false`, `on`/`off` in three casings
//! - integers: binary, octal, decimal, hex, and base-60 with underscores
//! - floats: only with a `.`, signed exponents, `.inf`, `.nan`
//! - timestamps: ISO dates and date-times, tagged `timestamp`
//!
//! Quoted scalars, block scalars, and explicitly tagged scalars keep the type
//! the parser gave them. Nested values are not re-typed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;

use serde::Deserializer;
use serde::de;
use serde::de::DeserializeSeed;
use serde::de::IgnoredAny;
use serde::de::MapAccess;
use serde::de::Visitor;
use serde_yaml::Mapping;
use serde_yaml::Number;
use serde_yaml::Value;
use serde_yaml::value::Tag;
use serde_yaml::value::TaggedValue;

use crate::metadata::MetadataError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Tag attached to timestamp values.
pub(crate) const TIMESTAMP_TAG: &str = "timestamp";

/// Plain scalars that resolve to null.
const NULLS: [&str; 5] = ["", "~", "null", "Null", "NULL"];
/// Plain scalars that resolve to `true`.
const TRUES: [&str; 9] = ["yes", "Yes", "YES", "true", "True", "TRUE", "on", "On", "ON"];
/// Plain scalars that resolve to `false`.
const FALSES: [&str; 9] = ["no", "No", "NO", "false", "False", "FALSE", "off", "Off", "OFF"];

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Re-types the plain top-level scalars of `fields` from the raw `source`.
///
/// # Errors
///
/// Returns [`MetadataError::Parse`] when the second pass fails or a plain
/// scalar resolves to a type that has no value (`=`, `<<`, invalid dates).
pub(crate) fn resolve_plain_scalars(source: &[u8], fields: &mut Mapping) -> Result<(), MetadataError> {
    let scalars = TopLevelScalars {
        fields,
    }
    .deserialize(serde_yaml::Deserializer::from_slice(source))
    .map_err(|err| MetadataError::Parse(err.to_string()))?;

    for (key, text) in scalars {
        let Some(slot) = fields.get_mut(&key) else {
            continue;
        };
        let plain = match &text {
            Cow::Borrowed(slice) => !is_quoted_or_tagged(source, slice),
            Cow::Owned(_) => !matches!(slot, Value::String(_)),
        };
        if plain {
            *slot = resolve_plain(&text)?;
        }
    }
    Ok(())
}

/// Types one plain scalar with YAML 1.1 rules.
///
/// # Errors
///
/// Returns [`MetadataError::Parse`] for scalars that resolve to a type with
/// no value.
pub(crate) fn resolve_plain(text: &str) -> Result<Value, MetadataError> {
    if NULLS.contains(&text) {
        return Ok(Value::Null);
    }
    if TRUES.contains(&text) {
        return Ok(Value::Bool(true));
    }
    if FALSES.contains(&text) {
        return Ok(Value::Bool(false));
    }
    if text == "=" || text == "<<" {
        let tag = if text == "=" { "value" } else { "merge" };
        return Err(MetadataError::Parse(format!(
            "could not determine a constructor for the tag 'tag:yaml.org,2002:{tag}'"
        )));
    }
    if let Some(number) = parse_int(text) {
        return Ok(Value::Number(number));
    }
    if is_float(text) {
        return parse_float(text)
            .map(|value| Value::Number(Number::from(value)))
            .ok_or_else(|| MetadataError::Parse(format!("invalid float '{text}'")));
    }
    if is_timestamp(text) {
        if !has_valid_date(text) {
            return Err(MetadataError::Parse(format!("invalid timestamp '{text}'")));
        }
        return Ok(Value::Tagged(Box::new(TaggedValue {
            tag: Tag::new(TIMESTAMP_TAG),
            value: Value::String(text.to_string()),
        })));
    }
    Ok(Value::String(text.to_string()))
}

// ============================================================================
// SECTION: Raw Text Pass
// ============================================================================

/// Collects the raw text of every top-level value typed as a scalar.
struct TopLevelScalars<'m> {
    /// First-pass fields, used to skip collection values.
    fields: &'m Mapping,
}

impl<'de> DeserializeSeed<'de> for TopLevelScalars<'_> {
    type Value = Vec<(Value, Cow<'de, str>)>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for TopLevelScalars<'_> {
    type Value = Vec<(Value, Cow<'de, str>)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping of fields")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut scalars = Vec::new();
        while let Some(key) = map.next_key::<Value>()? {
            let scalar = matches!(
                self.fields.get(&key),
                Some(Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))
            );
            if scalar {
                let text = map.next_value_seed(RawText)?;
                scalars.push((key, text));
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(scalars)
    }
}

/// Reads a scalar as text, borrowing from the source when possible.
struct RawText;

impl<'de> DeserializeSeed<'de> for RawText {
    type Value = Cow<'de, str>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_str(self)
    }
}

impl<'de> Visitor<'de> for RawText {
    type Value = Cow<'de, str>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar")
    }

    fn visit_borrowed_str<E: de::Error>(self, value: &'de str) -> Result<Self::Value, E> {
        Ok(Cow::Borrowed(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(Cow::Owned(value.to_string()))
    }
}

/// Returns true when the scalar borrowed at `slice` is quoted or carries a tag.
///
/// Quoted scalars borrow their inner text, so the byte before them is the
/// opening quote. Tags precede the scalar, possibly alongside an anchor.
fn is_quoted_or_tagged(source: &[u8], slice: &str) -> bool {
    let Some(start) = slice.as_ptr().addr().checked_sub(source.as_ptr().addr()) else {
        return true;
    };
    let Some(before) = source.get(.. start) else {
        return true;
    };
    if matches!(before.last(), Some(b'\'' | b'"')) {
        return true;
    }
    let mut rest = before.trim_ascii_end();
    loop {
        let token_start = rest.iter().rposition(u8::is_ascii_whitespace).map_or(0, |index| index + 1);
        match rest.get(token_start) {
            Some(b'!') => return true,
            Some(b'&') => rest = rest[.. token_start].trim_ascii_end(),
            _ => return false,
        }
    }
}

// ============================================================================
// SECTION: Numbers
// ============================================================================

/// Splits an optional leading sign.
fn split_sign(text: &str) -> (bool, &str) {
    match text.as_bytes().first() {
        Some(b'-') => (true, &text[1 ..]),
        Some(b'+') => (false, &text[1 ..]),
        _ => (false, text),
    }
}

/// Returns true when `text` is non-empty and every byte satisfies `allowed`.
fn all_of(text: &str, allowed: impl Fn(u8) -> bool) -> bool {
    !text.is_empty() && text.bytes().all(allowed)
}

/// Returns true for the `:[0-5]?[0-9]` parts that follow the first colon.
fn is_base_60_tail(tail: &str) -> bool {
    tail.split(':').all(|part| match part.as_bytes() {
        [digit] => digit.is_ascii_digit(),
        [tens, digit] => (b'0' ..= b'5').contains(tens) && digit.is_ascii_digit(),
        _ => false,
    })
}

/// Returns true for a digit or underscore.
const fn is_digit_or_underscore(byte: u8) -> bool {
    byte.is_ascii_digit() || byte == b'_'
}

/// Returns true for a `[1-9][0-9_]*` run.
fn is_decimal_run(text: &str) -> bool {
    text.as_bytes().first().is_some_and(|byte| (b'1' ..= b'9').contains(byte)) && all_of(text, is_digit_or_underscore)
}

/// Parses a YAML 1.1 integer.
fn parse_int(text: &str) -> Option<Number> {
    let (negative, body) = split_sign(text);
    let magnitude = if let Some(digits) = body.strip_prefix("0b") {
        all_of(digits, |byte| matches!(byte, b'0' | b'1' | b'_')).then(|| accumulate(digits, 2))?
    } else if let Some(digits) = body.strip_prefix("0x") {
        all_of(digits, |byte| byte.is_ascii_hexdigit() || byte == b'_').then(|| accumulate(digits, 16))?
    } else if body == "0" {
        Magnitude::Exact(0)
    } else if let Some(digits) = body.strip_prefix('0') {
        all_of(digits, |byte| matches!(byte, b'0' ..= b'7' | b'_')).then(|| accumulate(digits, 8))?
    } else if let Some((head, tail)) = body.split_once(':') {
        if !is_decimal_run(head) || !is_base_60_tail(tail) {
            return None;
        }
        tail.split(':').fold(accumulate(head, 10), |total, part| total.shift(60, accumulate(part, 10)))
    } else {
        is_decimal_run(body).then(|| accumulate(body, 10))?
    };
    Some(magnitude.into_number(negative))
}

/// An unsigned integer, kept exact while it fits in `u64`.
#[derive(Debug, Clone, Copy)]
enum Magnitude {
    /// Exact value.
    Exact(u64),
    /// Approximation once the value overflows.
    Approximate(f64),
}

impl Magnitude {
    /// Returns `self * radix + low`.
    fn shift(self, radix: u32, low: Self) -> Self {
        if let (Self::Exact(high), Self::Exact(low)) = (self, low)
            && let Some(value) = high.checked_mul(u64::from(radix)).and_then(|value| value.checked_add(low))
        {
            return Self::Exact(value);
        }
        Self::Approximate(self.to_f64().mul_add(f64::from(radix), low.to_f64()))
    }

    /// Returns the value as a float.
    fn to_f64(self) -> f64 {
        match self {
            Self::Exact(value) => value.to_f64(),
            Self::Approximate(value) => value,
        }
    }

    /// Applies the sign and converts to a YAML number.
    fn into_number(self, negative: bool) -> Number {
        match (self, negative) {
            (Self::Exact(value), false) => Number::from(value),
            (Self::Exact(value), true) => i64::try_from(value)
                .map_or_else(|_| Number::from(-value.to_f64()), |value| Number::from(-value)),
            (Self::Approximate(value), false) => Number::from(value),
            (Self::Approximate(value), true) => Number::from(-value),
        }
    }
}

/// Lossy float conversion for integers.
trait ToF64 {
    /// Converts to the nearest `f64`.
    fn to_f64(self) -> f64;
}

impl ToF64 for u64 {
    #[allow(clippy::cast_precision_loss, reason = "Overflowing integers are approximated, as floats are.")]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

/// Accumulates validated digits in `radix`, skipping underscores.
fn accumulate(digits: &str, radix: u32) -> Magnitude {
    digits
        .chars()
        .filter_map(|ch| ch.to_digit(radix))
        .fold(Magnitude::Exact(0), |total, digit| total.shift(radix, Magnitude::Exact(u64::from(digit))))
}

/// Returns true for a `[0-9][0-9_]*` run.
fn is_digit_run(text: &str) -> bool {
    text.as_bytes().first().is_some_and(u8::is_ascii_digit) && all_of(text, is_digit_or_underscore)
}

/// Returns true for an optional `[eE][-+][0-9]+` exponent.
fn is_exponent(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    let bytes = text.as_bytes();
    matches!(bytes.first(), Some(b'e' | b'E'))
        && matches!(bytes.get(1), Some(b'-' | b'+'))
        && all_of(&text[2 ..], |byte| byte.is_ascii_digit())
}

/// Splits a fraction `[0-9_]*` from a following exponent.
fn split_fraction(text: &str) -> (&str, &str) {
    let end = text.find(['e', 'E']).unwrap_or(text.len());
    text.split_at(end)
}

/// Returns true when `text` matches the YAML 1.1 float forms.
fn is_float(text: &str) -> bool {
    if matches!(text, ".nan" | ".NaN" | ".NAN") {
        return true;
    }
    let (signed, body) = split_sign(text);
    let signed = signed || text.starts_with('+');
    if matches!(body, ".inf" | ".Inf" | ".INF") {
        return true;
    }
    let Some((whole, rest)) = body.split_once('.') else {
        return false;
    };
    if whole.is_empty() {
        let (fraction, exponent) = split_fraction(rest);
        return !signed && all_of(fraction, is_digit_or_underscore) && is_exponent(exponent);
    }
    if let Some((head, tail)) = whole.split_once(':') {
        return is_digit_run(head) && is_base_60_tail(tail) && rest.bytes().all(is_digit_or_underscore);
    }
    let (fraction, exponent) = split_fraction(rest);
    is_digit_run(whole) && fraction.bytes().all(is_digit_or_underscore) && is_exponent(exponent)
}

/// Converts a matched YAML 1.1 float.
fn parse_float(text: &str) -> Option<f64> {
    let cleaned = text.replace('_', "").to_ascii_lowercase();
    let (negative, body) = split_sign(&cleaned);
    let sign = if negative { -1.0 } else { 1.0 };
    if body == ".inf" {
        return Some(sign * f64::INFINITY);
    }
    if body == ".nan" {
        return Some(f64::NAN);
    }
    if body.contains(':') {
        let mut total = 0.0;
        for part in body.split(':') {
            total = total * 60.0 + part.parse::<f64>().ok()?;
        }
        return Some(sign * total);
    }
    body.parse::<f64>().ok().map(|value| sign * value)
}

// ============================================================================
// SECTION: Timestamps
// ============================================================================

/// Byte cursor for the timestamp grammar.
struct Cursor<'t> {
    /// Remaining input.
    rest: &'t [u8],
}

impl Cursor<'_> {
    /// Consumes between `min` and `max` ASCII digits.
    fn digits(&mut self, min: usize, max: usize) -> bool {
        let count = self.rest.iter().take(max).take_while(|byte| byte.is_ascii_digit()).count();
        self.rest = &self.rest[count ..];
        count >= min
    }

    /// Consumes `byte` if it is next.
    fn eat(&mut self, byte: u8) -> bool {
        if self.rest.first() == Some(&byte) {
            self.rest = &self.rest[1 ..];
            true
        } else {
            false
        }
    }

    /// Consumes spaces and tabs, returning how many.
    fn blanks(&mut self) -> usize {
        let count = self.rest.iter().take_while(|byte| matches!(byte, b' ' | b'\t')).count();
        self.rest = &self.rest[count ..];
        count
    }
}

/// Returns true when `text` matches the YAML 1.1 timestamp forms.
fn is_timestamp(text: &str) -> bool {
    let bytes = text.as_bytes();
    let date_only = bytes.len() == 10
        && bytes.iter().enumerate().all(|(index, byte)| {
            if index == 4 || index == 7 { *byte == b'-' } else { byte.is_ascii_digit() }
        });
    if date_only {
        return true;
    }
    let mut cursor = Cursor {
        rest: bytes,
    };
    let date = cursor.digits(4, 4)
        && cursor.eat(b'-')
        && cursor.digits(1, 2)
        && cursor.eat(b'-')
        && cursor.digits(1, 2);
    if !date {
        return false;
    }
    let separated = cursor.eat(b'T') || cursor.eat(b't') || cursor.blanks() > 0;
    let time = separated
        && cursor.digits(1, 2)
        && cursor.eat(b':')
        && cursor.digits(2, 2)
        && cursor.eat(b':')
        && cursor.digits(2, 2);
    if !time {
        return false;
    }
    if cursor.eat(b'.') {
        cursor.digits(0, usize::MAX);
    }
    cursor.blanks();
    if cursor.eat(b'Z') {
        return cursor.rest.is_empty();
    }
    if cursor.eat(b'-') || cursor.eat(b'+') {
        if !cursor.digits(1, 2) {
            return false;
        }
        if cursor.eat(b':') && !cursor.digits(2, 2) {
            return false;
        }
    }
    cursor.rest.is_empty()
}

/// Returns true when the date part of a matched timestamp is a real date.
fn has_valid_date(text: &str) -> bool {
    let mut parts = text.splitn(3, '-');
    let (Some(year), Some(month), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let day = rest.split(|ch: char| !ch.is_ascii_digit()).next().unwrap_or_default();
    let (Ok(year), Ok(month), Ok(day)) = (year.parse::<u32>(), month.parse::<u32>(), day.parse::<u32>()) else {
        return false;
    };
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let days = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => return false,
    };
    year >= 1 && (1 ..= days).contains(&day)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
