//! Value coercion: `value` + `valueType` attributes to typed defaults.

use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::MAX_DEFAULT_LENGTH;
use crate::dom::{DataElement, ElementKind, Endian, LengthType, Variant};
use crate::expression::{EvalScope, ExpressionEvaluator};

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static RE_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\\\|\\n|\\r|\\t").expect("valid regex"));

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static RE_HEX_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[h{},\s\r\n:-]+").expect("valid regex"));

/// Declared interpretation of a `value` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    Hex,
    #[default]
    String,
    Literal,
    Ipv4,
    Ipv6,
}

impl ValueKind {
    /// Parse a `valueType`, ignoring case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hex" => Some(Self::Hex),
            "string" => Some(Self::String),
            "literal" => Some(Self::Literal),
            "ipv4" => Some(Self::Ipv4),
            "ipv6" => Some(Self::Ipv6),
            _ => None,
        }
    }
}

/// Replace `\\`, `\n`, `\r` and `\t` escapes.
#[must_use]
pub fn unescape(value: &str) -> Cow<'_, str> {
    RE_ESCAPE.replace_all(value, |caps: &Captures<'_>| match &caps[0] {
        r"\n" => "\n",
        r"\r" => "\r",
        r"\t" => "\t",
        _ => "\\",
    })
}

/// Decode a hex string, tolerating whitespace, separators and `0x`/`\x`
/// markers.
///
/// # Examples
/// ```
/// use pit_compiler::coercion::decode_hex;
///
/// assert_eq!(decode_hex("48 65 6c").unwrap(), b"Hel".to_vec());
/// assert_eq!(decode_hex("0x01,0x02").unwrap(), vec![1, 2]);
/// assert!(decode_hex("123").is_err());
/// ```
pub fn decode_hex(value: &str) -> Result<Vec<u8>, String> {
    let stripped = RE_HEX_NOISE.replace_all(value, "");
    let digits = stripped.replace("0x", "").replace("\\x", "");
    if digits.len() % 2 != 0 {
        return Err(format!(
            "the hex value must contain an even number of characters: {digits}"
        ));
    }
    hex::decode(&digits).map_err(|_| format!("the value contains invalid hex characters: {digits}"))
}

/// Parse an IP address of the requested family into network-order bytes.
pub fn parse_ip(value: &str, v6: bool) -> Result<Vec<u8>, String> {
    match value.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) if !v6 => Ok(addr.octets().to_vec()),
        Ok(IpAddr::V6(addr)) if v6 => Ok(addr.octets().to_vec()),
        _ => Err(format!(
            "the value '{value}' is not a valid {} address",
            if v6 { "IPv6" } else { "IPv4" }
        )),
    }
}

/// Coerce a raw `value` attribute into a [`Variant`].
///
/// Escapes are processed first for every kind.
pub fn coerce(
    raw: &str,
    kind: ValueKind,
    evaluator: &dyn ExpressionEvaluator,
    scope: &EvalScope<'_>,
) -> Result<Variant, String> {
    let value = unescape(raw);
    match kind {
        ValueKind::String => Ok(Variant::String(value.into_owned())),
        ValueKind::Hex => decode_hex(&value).map(Variant::Bytes),
        ValueKind::Ipv4 => parse_ip(&value, false).map(Variant::Bytes),
        ValueKind::Ipv6 => parse_ip(&value, true).map(Variant::Bytes),
        ValueKind::Literal => {
            let result = evaluator
                .eval(&value, scope)
                .map_err(|e| format!("failed to evaluate '{value}': {e}"))?;
            result
                .into_variant()
                .ok_or_else(|| "the value of the eval statement returned None".to_string())
        }
    }
}

/// Fit a coerced value to the element it belongs to.
pub fn sanitize(element: &DataElement, value: Variant) -> Result<Variant, String> {
    match &element.kind {
        ElementKind::Number(spec) => fit_integer(value, spec.size, spec.signed, spec.endian),
        ElementKind::Flags(spec) => fit_integer(value, spec.size, false, spec.endian),
        ElementKind::Flag(spec) => fit_integer(value, spec.size, false, Endian::Big),
        ElementKind::Double(spec) => fit_double(value, spec.size, spec.endian),
        ElementKind::String(_) => Ok(match value {
            Variant::String(_) | Variant::Bytes(_) => value,
            other => Variant::String(other.to_string()),
        }),
        ElementKind::Blob => fit_blob(value, element.length, element.length_type),
        ElementKind::Padding(_)
        | ElementKind::Block(_)
        | ElementKind::Choice(_)
        | ElementKind::Array(_) => Err(format!(
            "<{}> elements do not take a value",
            element.tag()
        )),
    }
}

fn integer_from_bytes(bytes: &[u8], endian: Endian) -> i128 {
    let fold = |acc: i128, b: &u8| (acc << 8) | i128::from(*b);
    match endian {
        Endian::Big => bytes.iter().fold(0, fold),
        Endian::Little => bytes.iter().rev().fold(0, fold),
    }
}

fn fit_integer(value: Variant, size: u32, signed: bool, endian: Endian) -> Result<Variant, String> {
    let number = match &value {
        Variant::Bytes(bytes) => {
            if size % 8 != 0 || bytes.len() as u64 != u64::from(size / 8) {
                return Err(format!(
                    "{} bytes of data cannot be stored in a {size} bit number",
                    bytes.len()
                ));
            }
            let raw = integer_from_bytes(bytes, endian);
            if signed && size > 0 && (raw >> (size - 1)) & 1 == 1 {
                raw - (1i128 << size)
            } else {
                raw
            }
        }
        Variant::String(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|_| format!("string value '{s}' could not be converted to a number"))?,
        other => other
            .as_i128()
            .ok_or_else(|| format!("value '{other}' could not be converted to a number"))?,
    };

    let (min, max) = if signed {
        (-(1i128 << (size - 1)), (1i128 << (size - 1)) - 1)
    } else {
        (0, (1i128 << size) - 1)
    };
    if number < min || number > max {
        return Err(format!(
            "value {number} does not fit in a {size} bit {} number",
            if signed { "signed" } else { "unsigned" }
        ));
    }

    let converted = if signed {
        i64::try_from(number).map(Variant::Int).ok()
    } else {
        u64::try_from(number).map(Variant::UInt).ok()
    };
    converted.ok_or_else(|| format!("value {number} is out of range"))
}

fn fit_double(value: Variant, size: u32, endian: Endian) -> Result<Variant, String> {
    let number = match &value {
        Variant::Double(d) => *d,
        Variant::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("string value '{s}' could not be converted to a double"))?,
        Variant::Bytes(bytes) => {
            let mut ordered = bytes.clone();
            if endian == Endian::Little {
                ordered.reverse();
            }
            match (size, ordered.as_slice()) {
                (32, &[a, b, c, d]) => f64::from(f32::from_be_bytes([a, b, c, d])),
                (64, slice) if slice.len() == 8 => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(slice);
                    f64::from_be_bytes(buf)
                }
                _ => {
                    return Err(format!(
                        "{} bytes of data cannot be stored in a {size} bit double",
                        bytes.len()
                    ))
                }
            }
        }
        other => other
            .as_i128()
            .map(|i| i as f64)
            .ok_or_else(|| format!("value '{other}' could not be converted to a double"))?,
    };
    if size == 32 && number.is_finite() && number.abs() > f64::from(f32::MAX) {
        return Err(format!("value {number} does not fit in a 32 bit double"));
    }
    Ok(Variant::Double(number))
}

fn fit_blob(value: Variant, length: Option<u64>, length_type: LengthType) -> Result<Variant, String> {
    let mut bytes = value.to_bytes();
    let limit = match (length, length_type) {
        (Some(bits), LengthType::Bits) => Some(bits.div_ceil(8)),
        (limit, _) => limit,
    };
    if let Some(limit) = limit {
        if limit > MAX_DEFAULT_LENGTH {
            return Err(format!(
                "length {limit} bytes exceeds the limit of {MAX_DEFAULT_LENGTH} bytes"
            ));
        }
        let limit = usize::try_from(limit).map_err(|_| format!("length {limit} is too large"))?;
        if bytes.len() > limit {
            return Err(format!(
                "value is {} bytes but the element length is {limit} bytes",
                bytes.len()
            ));
        }
        bytes.resize(limit, 0);
    }
    Ok(Variant::Bytes(bytes))
}
