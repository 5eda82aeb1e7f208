//! Format strings for the fixed-size records of a trajectory log.
//!
//! The second header line of a log is a struct-style format string, the
//! same notation the engine's logger emits: an optional byte-order prefix
//! followed by type codes, each optionally preceded by a repeat count.
//!
//! | code | type  | size |
//! |------|-------|------|
//! | `x`  | pad   | 1    |
//! | `c`  | char  | 1    |
//! | `b`/`B` | i8/u8 | 1 |
//! | `?`  | bool  | 1    |
//! | `h`/`H` | i16/u16 | 2 |
//! | `i`/`I` | i32/u32 | 4 |
//! | `l`/`L` | i64/u64 native, i32/u32 with a prefix | 8 or 4 |
//! | `q`/`Q` | i64/u64 | 8 |
//! | `f`  | f32   | 4    |
//! | `d`  | f64   | 8    |
//!
//! Without a prefix (or with `@`) fields are aligned to their own size and
//! the record is little-endian, which is what the recorder writes. `=` and
//! `<` are little-endian with no padding, `>` and `!` big-endian with no
//! padding.

use nom::{
    character::complete::{anychar, one_of, u32},
    combinator::{all_consuming, map, map_opt, opt},
    error::Error,
    multi::many0,
    sequence::tuple,
    Finish, IResult,
};

use std::{borrow::Cow, fmt, str::FromStr};

/// Byte order and alignment rule selected by the format prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian with native alignment (`@` or no prefix).
    Native,
    /// Little-endian, packed (`=` or `<`).
    Little,
    /// Big-endian, packed (`>` or `!`).
    Big,
}

/// The type of a single field in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A padding byte, carries no value.
    Pad,
    /// A single byte character.
    Char,
    /// Signed byte.
    I8,
    /// Unsigned byte.
    U8,
    /// A byte that is either 0 or 1.
    Bool,
    /// Signed 16 bit integer.
    I16,
    /// Unsigned 16 bit integer.
    U16,
    /// Signed 32 bit integer.
    I32,
    /// Unsigned 32 bit integer.
    U32,
    /// Signed 64 bit integer.
    I64,
    /// Unsigned 64 bit integer.
    U64,
    /// Single precision float.
    F32,
    /// Double precision float.
    F64,
}

/// Largest record a format may describe, in bytes.
pub const MAX_RECORD_SIZE: usize = 1 << 20;

impl FieldKind {
    fn from_code(code: char, order: ByteOrder) -> Option<Self> {
        let native = order == ByteOrder::Native;
        let kind = match code {
            'x' => FieldKind::Pad,
            'c' => FieldKind::Char,
            'b' => FieldKind::I8,
            'B' => FieldKind::U8,
            '?' => FieldKind::Bool,
            'h' => FieldKind::I16,
            'H' => FieldKind::U16,
            'i' => FieldKind::I32,
            'I' => FieldKind::U32,
            'l' if native => FieldKind::I64,
            'L' if native => FieldKind::U64,
            'l' => FieldKind::I32,
            'L' => FieldKind::U32,
            'q' => FieldKind::I64,
            'Q' => FieldKind::U64,
            'f' => FieldKind::F32,
            'd' => FieldKind::F64,
            _ => return None,
        };
        Some(kind)
    }

    /// The format character for this kind.
    pub fn code(self) -> char {
        match self {
            FieldKind::Pad => 'x',
            FieldKind::Char => 'c',
            FieldKind::I8 => 'b',
            FieldKind::U8 => 'B',
            FieldKind::Bool => '?',
            FieldKind::I16 => 'h',
            FieldKind::U16 => 'H',
            FieldKind::I32 => 'i',
            FieldKind::U32 => 'I',
            FieldKind::I64 => 'q',
            FieldKind::U64 => 'Q',
            FieldKind::F32 => 'f',
            FieldKind::F64 => 'd',
        }
    }

    /// Width of the field in bytes.
    pub fn size(self) -> usize {
        match self {
            FieldKind::Pad | FieldKind::Char | FieldKind::I8 | FieldKind::U8 | FieldKind::Bool => 1,
            FieldKind::I16 | FieldKind::U16 => 2,
            FieldKind::I32 | FieldKind::U32 | FieldKind::F32 => 4,
            FieldKind::I64 | FieldKind::U64 | FieldKind::F64 => 8,
        }
    }
}

/// One decoded field of a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// `c`
    Char(u8),
    /// `b`
    I8(i8),
    /// `B`
    U8(u8),
    /// `?`
    Bool(bool),
    /// `h`
    I16(i16),
    /// `H`
    U16(u16),
    /// `i`
    I32(i32),
    /// `I`
    U32(u32),
    /// `q`
    I64(i64),
    /// `Q`
    U64(u64),
    /// `f`
    F32(f32),
    /// `d`
    F64(f64),
}

impl Value {
    /// The value widened to an `f64`, whatever its stored type.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Char(v) | Value::U8(v) => v as f64,
            Value::I8(v) => v as f64,
            Value::Bool(v) => v as u8 as f64,
            Value::I16(v) => v as f64,
            Value::U16(v) => v as f64,
            Value::I32(v) => v as f64,
            Value::U32(v) => v as f64,
            Value::I64(v) => v as f64,
            Value::U64(v) => v as f64,
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
        }
    }

    fn kind(&self) -> FieldKind {
        match self {
            Value::Char(_) => FieldKind::Char,
            Value::I8(_) => FieldKind::I8,
            Value::U8(_) => FieldKind::U8,
            Value::Bool(_) => FieldKind::Bool,
            Value::I16(_) => FieldKind::I16,
            Value::U16(_) => FieldKind::U16,
            Value::I32(_) => FieldKind::I32,
            Value::U32(_) => FieldKind::U32,
            Value::I64(_) => FieldKind::I64,
            Value::U64(_) => FieldKind::U64,
            Value::F32(_) => FieldKind::F32,
            Value::F64(_) => FieldKind::F64,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Char(c) => write!(f, "{:?}", *c as char),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I8(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
        }
    }
}

/// Errors from parsing a format string or from packing/unpacking a record.
#[derive(Debug)]
pub enum FormatError {
    /// The format string is not valid struct notation.
    Parse(Error<String>),

    /// The number of values handed to [RecordFormat::encode] does not match
    /// the number of fields.
    ValueCount {
        /// Fields declared by the format.
        expected: usize,
        /// Values actually provided.
        found: usize,
    },

    /// A value's type does not match the field at that position.
    ValueKind {
        /// Position of the offending value.
        index: usize,
        /// Type the format declares there.
        expected: FieldKind,
    },

    /// The format describes a record larger than [MAX_RECORD_SIZE].
    TooLarge {
        /// Bytes per record allowed.
        limit: usize,
    },

    /// A chunk handed to [RecordFormat::decode] is not exactly one record.
    Length {
        /// Bytes per record.
        expected: usize,
        /// Bytes provided.
        found: usize,
    },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use FormatError as FE;
        let msg = match self {
            FE::Parse(error) => Cow::from(format!("bad format string: {}", error)),
            FE::ValueCount { expected, found } => {
                Cow::from(format!("expected {} values, got {}", expected, found))
            }
            FE::ValueKind { index, expected } => {
                Cow::from(format!("value {} should be {:?}", index, expected))
            }
            FE::TooLarge { limit } => {
                Cow::from(format!("records larger than {} bytes are not supported", limit))
            }
            FE::Length { expected, found } => {
                Cow::from(format!("record is {} bytes, chunk is {}", expected, found))
            }
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for FormatError {}

/// A parsed format string: the byte order plus the ordered field kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFormat {
    spec: String,
    order: ByteOrder,
    fields: Vec<FieldKind>,
}

fn parse_order(s: &str) -> IResult<&str, ByteOrder> {
    map(opt(one_of("@=<>!")), |prefix| match prefix {
        Some('=') | Some('<') => ByteOrder::Little,
        Some('>') | Some('!') => ByteOrder::Big,
        _ => ByteOrder::Native,
    })(s)
}

fn parse_field(order: ByteOrder) -> impl FnMut(&str) -> IResult<&str, (u32, FieldKind)> {
    move |s| {
        tuple((
            map(opt(u32), |n| n.unwrap_or(1)),
            map_opt(anychar, |code| FieldKind::from_code(code, order)),
        ))(s)
    }
}

fn parse_format(s: &str) -> IResult<&str, (ByteOrder, Vec<(u32, FieldKind)>)> {
    let (s, order) = parse_order(s)?;
    let (s, runs) = all_consuming(many0(parse_field(order)))(s)?;
    Ok((s, (order, runs)))
}

/// Size of a record made of `runs`, without expanding the repeat counts.
fn checked_size(order: ByteOrder, runs: &[(u32, FieldKind)]) -> Result<usize, FormatError> {
    let mut size: usize = 0;
    for &(count, kind) in runs {
        if count == 0 {
            continue;
        }
        let width = kind.size();
        if order == ByteOrder::Native {
            size = size.div_ceil(width) * width;
        }
        size = (count as usize)
            .checked_mul(width)
            .and_then(|run| size.checked_add(run))
            .filter(|&total| total <= MAX_RECORD_SIZE)
            .ok_or(FormatError::TooLarge {
                limit: MAX_RECORD_SIZE,
            })?;
    }
    Ok(size)
}

impl FromStr for RecordFormat {
    type Err = FormatError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_format(s).finish() {
            Ok((_remaining, (order, runs))) => {
                checked_size(order, &runs)?;
                let fields = runs
                    .into_iter()
                    .flat_map(|(n, kind)| std::iter::repeat(kind).take(n as usize))
                    .collect();
                Ok(RecordFormat {
                    spec: s.to_owned(),
                    order,
                    fields,
                })
            }
            Err(Error { input, code }) => Err(FormatError::Parse(Error {
                input: input.to_string(),
                code,
            })),
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spec)
    }
}

impl RecordFormat {
    /// A natively aligned format with one code per field.
    pub fn from_fields(fields: Vec<FieldKind>) -> Self {
        RecordFormat {
            spec: fields.iter().map(|k| k.code()).collect(),
            order: ByteOrder::Native,
            fields,
        }
    }

    /// The format string as it appears in the log header.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Byte order selected by the prefix.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Every field, padding included.
    pub fn fields(&self) -> &[FieldKind] {
        &self.fields
    }

    /// Number of values in one record (pad bytes carry none).
    pub fn columns(&self) -> usize {
        self.fields.iter().filter(|k| **k != FieldKind::Pad).count()
    }

    /// Byte length of one encoded record.
    pub fn size(&self) -> usize {
        self.layout().last().map(|(off, k)| off + k.size()).unwrap_or(0)
    }

    /// Offsets of every field, after alignment padding.
    fn layout(&self) -> Vec<(usize, FieldKind)> {
        let mut offset: usize = 0;
        self.fields
            .iter()
            .map(|&kind| {
                if self.order == ByteOrder::Native {
                    let align = kind.size();
                    offset = offset.div_ceil(align) * align;
                }
                let at = offset;
                offset += kind.size();
                (at, kind)
            })
            .collect()
    }

    /// Pack one record. Pad fields and alignment gaps are written as zeros.
    pub fn encode(&self, values: &[Value]) -> Result<Vec<u8>, FormatError> {
        let expected = self.columns();
        if values.len() != expected {
            return Err(FormatError::ValueCount {
                expected,
                found: values.len(),
            });
        }

        let mut out = vec![0u8; self.size()];
        let mut values = values.iter().enumerate();
        for (offset, kind) in self.layout() {
            if kind == FieldKind::Pad {
                continue;
            }
            let Some((index, value)) = values.next() else {
                break;
            };
            if value.kind() != kind {
                return Err(FormatError::ValueKind {
                    index,
                    expected: kind,
                });
            }
            let bytes = self.value_bytes(value);
            out[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }

        Ok(out)
    }

    fn value_bytes(&self, value: &Value) -> Vec<u8> {
        macro_rules! ordered {
            ($v:expr) => {
                match self.order {
                    ByteOrder::Big => $v.to_be_bytes().to_vec(),
                    _ => $v.to_le_bytes().to_vec(),
                }
            };
        }
        match *value {
            Value::Char(v) | Value::U8(v) => vec![v],
            Value::I8(v) => ordered!(v),
            Value::Bool(v) => vec![v as u8],
            Value::I16(v) => ordered!(v),
            Value::U16(v) => ordered!(v),
            Value::I32(v) => ordered!(v),
            Value::U32(v) => ordered!(v),
            Value::I64(v) => ordered!(v),
            Value::U64(v) => ordered!(v),
            Value::F32(v) => ordered!(v),
            Value::F64(v) => ordered!(v),
        }
    }

    /// Unpack one record. `chunk` must be exactly [RecordFormat::size] bytes.
    pub fn decode(&self, chunk: &[u8]) -> Result<Vec<Value>, FormatError> {
        if chunk.len() != self.size() {
            return Err(FormatError::Length {
                expected: self.size(),
                found: chunk.len(),
            });
        }

        macro_rules! read {
            ($t:ty, $bytes:expr) => {{
                let raw: [u8; std::mem::size_of::<$t>()] = $bytes
                    .try_into()
                    .map_err(|_| FormatError::Length {
                        expected: self.size(),
                        found: chunk.len(),
                    })?;
                match self.order {
                    ByteOrder::Big => <$t>::from_be_bytes(raw),
                    _ => <$t>::from_le_bytes(raw),
                }
            }};
        }

        let mut values = Vec::with_capacity(self.columns());
        for (offset, kind) in self.layout() {
            let bytes = &chunk[offset..offset + kind.size()];
            let value = match kind {
                FieldKind::Pad => continue,
                FieldKind::Char => Value::Char(bytes[0]),
                FieldKind::U8 => Value::U8(bytes[0]),
                FieldKind::I8 => Value::I8(bytes[0] as i8),
                FieldKind::Bool => Value::Bool(bytes[0] != 0),
                FieldKind::I16 => Value::I16(read!(i16, bytes)),
                FieldKind::U16 => Value::U16(read!(u16, bytes)),
                FieldKind::I32 => Value::I32(read!(i32, bytes)),
                FieldKind::U32 => Value::U32(read!(u32, bytes)),
                FieldKind::I64 => Value::I64(read!(i64, bytes)),
                FieldKind::U64 => Value::U64(read!(u64, bytes)),
                FieldKind::F32 => Value::F32(read!(f32, bytes)),
                FieldKind::F64 => Value::F64(read!(f64, bytes)),
            };
            values.push(value);
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_calcsize() {
        // Reference values from struct.calcsize
        let cases = [
            ("dddddddd", 64),
            ("di", 12),
            ("id", 16),
            ("<id", 12),
            ("Ifi", 12),
            ("3f", 12),
            ("bH", 4),
            ("xxd", 16),
            ("=xxd", 10),
            ("l", 8),
            ("il", 16),
            ("2L", 16),
            ("<l", 4),
            ("=2L", 8),
            ("!il", 8),
            ("", 0),
        ];
        for (spec, size) in cases {
            let fmt: RecordFormat = spec.parse().unwrap();
            assert_eq!(fmt.size(), size, "size of {:?}", spec);
        }
    }

    #[test]
    fn long_width_follows_the_prefix() {
        let native: RecordFormat = "lL".parse().unwrap();
        assert_eq!(native.fields(), &[FieldKind::I64, FieldKind::U64]);
        assert_eq!(native.spec(), "lL");

        let packed: RecordFormat = ">l".parse().unwrap();
        let chunk = (-2i32).to_be_bytes();
        assert_eq!(packed.decode(&chunk).unwrap(), vec![Value::I32(-2)]);
    }

    #[test]
    fn huge_repeat_counts_are_rejected() {
        assert!(matches!(
            "4000000000d".parse::<RecordFormat>(),
            Err(FormatError::TooLarge { .. })
        ));
        assert!(matches!(
            "<4000000000x".parse::<RecordFormat>(),
            Err(FormatError::TooLarge { .. })
        ));
        let limit = format!("{}B", MAX_RECORD_SIZE);
        assert_eq!(limit.parse::<RecordFormat>().unwrap().size(), MAX_RECORD_SIZE);
    }

    #[test]
    fn repeat_counts_expand() {
        let fmt: RecordFormat = "d2i3f".parse().unwrap();
        assert_eq!(
            fmt.fields(),
            &[
                FieldKind::F64,
                FieldKind::I32,
                FieldKind::I32,
                FieldKind::F32,
                FieldKind::F32,
                FieldKind::F32
            ]
        );
        assert_eq!(fmt.columns(), 6);
        assert_eq!(fmt.spec(), "d2i3f");
    }

    #[test]
    fn built_format_reparses() {
        let built = RecordFormat::from_fields(vec![FieldKind::F64, FieldKind::I32, FieldKind::F32]);
        assert_eq!(built.spec(), "dif");
        assert_eq!(built, "dif".parse().unwrap());
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(matches!(
            "ddz".parse::<RecordFormat>(),
            Err(FormatError::Parse(_))
        ));
        assert!(matches!(
            "d<".parse::<RecordFormat>(),
            Err(FormatError::Parse(_))
        ));
    }

    #[test]
    fn aligned_encode_pads_with_zeros() {
        let fmt: RecordFormat = "id".parse().unwrap();
        let bytes = fmt.encode(&[Value::I32(-1), Value::F64(2.0)]).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &[0xFF; 4]);
        assert_eq!(&bytes[4..8], &[0; 4]);
        assert_eq!(&bytes[8..16], &2.0f64.to_le_bytes());
    }

    #[test]
    fn big_endian_decode() {
        let fmt: RecordFormat = ">Hf".parse().unwrap();
        let mut chunk = vec![0x01, 0x02];
        chunk.extend_from_slice(&1.5f32.to_be_bytes());
        assert_eq!(
            fmt.decode(&chunk).unwrap(),
            vec![Value::U16(0x0102), Value::F32(1.5)]
        );
    }

    #[test]
    fn mismatched_values_are_rejected() {
        let fmt: RecordFormat = "di".parse().unwrap();
        assert!(matches!(
            fmt.encode(&[Value::F64(0.0)]),
            Err(FormatError::ValueCount {
                expected: 2,
                found: 1
            })
        ));
        assert!(matches!(
            fmt.encode(&[Value::F64(0.0), Value::F32(1.0)]),
            Err(FormatError::ValueKind { index: 1, .. })
        ));
        assert!(matches!(
            fmt.decode(&[0; 3]),
            Err(FormatError::Length { .. })
        ));
    }
}
