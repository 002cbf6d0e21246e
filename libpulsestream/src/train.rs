use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{ArrayD, IxDyn};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use super::constants::*;
use super::error::WireError;
use super::record::Value;

/// One pulse: native field identifier -> raw payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pulse {
    fields: BTreeMap<String, Value>,
}

impl Pulse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, native_key: &str, value: impl Into<Value>) -> Self {
        self.insert(native_key, value.into());
        self
    }

    pub fn insert(&mut self, native_key: &str, value: Value) {
        self.fields.insert(native_key.to_string(), value);
    }

    pub fn get(&self, native_key: &str) -> Option<&Value> {
        self.fields.get(native_key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A train is one delivery unit: the ordered pulses recorded during one machine cycle.
///
/// The wire/file layout is big-endian:
///
/// ```text
/// magic(u32) train_id(u64) timestamp_ns(u64) pulse_count(u32)
/// pulse_count x [ n_fields(u32) n_fields x [ name_len(u16) name tag(u8) value ] ]
/// value: scalar f64 | integer i64 | array rank(u8) rank x dim(u32) f64... | text len(u32) bytes
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Train {
    pub train_id: u64,
    pub timestamp: u64,
    pub pulses: Vec<Pulse>,
}

impl Train {
    pub fn new(train_id: u64, timestamp: u64, pulses: Vec<Pulse>) -> Self {
        Self {
            train_id,
            timestamp,
            pulses,
        }
    }

    pub fn pulse_count(&self) -> usize {
        self.pulses.len()
    }

    /// Decode a complete train from a buffer. The buffer must hold exactly one train.
    pub fn from_bytes(buffer: &[u8]) -> Result<Self, WireError> {
        // Running out of buffer is a malformed train, not an IO problem
        Self::decode(buffer).map_err(|e| match e {
            WireError::IOError(_) => WireError::ShortBuffer,
            other => other,
        })
    }

    fn decode(buffer: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(buffer);
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != TRAIN_MAGIC {
            return Err(WireError::IncorrectMagic(magic));
        }
        let train_id = cursor.read_u64::<BigEndian>()?;
        let timestamp = cursor.read_u64::<BigEndian>()?;
        let pulse_count = cursor.read_u32::<BigEndian>()?;
        // Every pulse needs at least its field count
        require(&cursor, pulse_count as u64 * 4)?;
        let mut pulses = Vec::with_capacity(pulse_count as usize);
        for _ in 0..pulse_count {
            pulses.push(read_pulse(&mut cursor)?);
        }
        let trailing = remaining(&cursor);
        if trailing != 0 {
            return Err(WireError::TrailingBytes(trailing));
        }
        Ok(Self {
            train_id,
            timestamp,
            pulses,
        })
    }

    /// Encode the train into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut buffer: Vec<u8> = Vec::new();
        buffer.write_u32::<BigEndian>(TRAIN_MAGIC)?;
        buffer.write_u64::<BigEndian>(self.train_id)?;
        buffer.write_u64::<BigEndian>(self.timestamp)?;
        buffer.write_u32::<BigEndian>(wire_len(self.pulses.len())?)?;
        for pulse in self.pulses.iter() {
            buffer.write_u32::<BigEndian>(wire_len(pulse.len())?)?;
            for (name, value) in pulse.fields() {
                if name.len() > u16::MAX as usize {
                    return Err(WireError::FieldNameTooLong(name.len()));
                }
                buffer.write_u16::<BigEndian>(name.len() as u16)?;
                buffer.write_all(name.as_bytes())?;
                write_value(&mut buffer, value)?;
            }
        }
        Ok(buffer)
    }
}

/// Lengths and counts travel as u32
fn wire_len(len: usize) -> Result<u32, WireError> {
    u32::try_from(len).map_err(|_| WireError::LengthOverflow(len))
}

fn remaining(cursor: &Cursor<&[u8]>) -> u64 {
    cursor.get_ref().len() as u64 - cursor.position()
}

fn require(cursor: &Cursor<&[u8]>, n_bytes: u64) -> Result<(), WireError> {
    let left = remaining(cursor);
    if n_bytes > left {
        Err(WireError::Truncated(n_bytes, left))
    } else {
        Ok(())
    }
}

fn read_pulse(cursor: &mut Cursor<&[u8]>) -> Result<Pulse, WireError> {
    let n_fields = cursor.read_u32::<BigEndian>()?;
    // name length plus tag is the smallest possible field
    require(cursor, n_fields as u64 * 3)?;
    let mut pulse = Pulse::new();
    for _ in 0..n_fields {
        let name_len = cursor.read_u16::<BigEndian>()? as u64;
        require(cursor, name_len)?;
        let mut name = vec![0u8; name_len as usize];
        cursor.read_exact(&mut name)?;
        let name = String::from_utf8(name).map_err(|_| WireError::BadFieldName)?;
        let value = read_value(cursor)?;
        pulse.insert(&name, value);
    }
    Ok(pulse)
}

fn read_value(cursor: &mut Cursor<&[u8]>) -> Result<Value, WireError> {
    let tag = cursor.read_u8()?;
    match tag {
        TAG_SCALAR => Ok(Value::Scalar(cursor.read_f64::<BigEndian>()?)),
        TAG_INTEGER => Ok(Value::Integer(cursor.read_i64::<BigEndian>()?)),
        TAG_ARRAY => {
            let rank = cursor.read_u8()?;
            if rank > MAX_ARRAY_RANK {
                return Err(WireError::BadArrayRank(rank));
            }
            let mut shape: Vec<usize> = Vec::with_capacity(rank as usize);
            let mut n_elements: u64 = 1;
            for _ in 0..rank {
                let dim = cursor.read_u32::<BigEndian>()?;
                n_elements = n_elements.saturating_mul(dim as u64);
                shape.push(dim as usize);
            }
            require(cursor, n_elements.saturating_mul(8))?;
            let mut data: Vec<f64> = vec![0.0; n_elements as usize];
            cursor.read_f64_into::<BigEndian>(&mut data)?;
            let array = ArrayD::from_shape_vec(IxDyn(&shape), data)
                .map_err(|_| WireError::BadArrayShape)?;
            Ok(Value::Array(array))
        }
        TAG_TEXT => {
            let len = cursor.read_u32::<BigEndian>()? as u64;
            require(cursor, len)?;
            let mut text = vec![0u8; len as usize];
            cursor.read_exact(&mut text)?;
            Ok(Value::Text(
                String::from_utf8(text).map_err(|_| WireError::BadText)?,
            ))
        }
        _ => Err(WireError::UnknownValueTag(tag)),
    }
}

fn write_value(buffer: &mut Vec<u8>, value: &Value) -> Result<(), WireError> {
    match value {
        Value::Scalar(v) => {
            buffer.write_u8(TAG_SCALAR)?;
            buffer.write_f64::<BigEndian>(*v)?;
        }
        Value::Integer(v) => {
            buffer.write_u8(TAG_INTEGER)?;
            buffer.write_i64::<BigEndian>(*v)?;
        }
        Value::Array(a) => {
            if a.ndim() > MAX_ARRAY_RANK as usize {
                return Err(WireError::BadArrayRank(a.ndim() as u8));
            }
            buffer.write_u8(TAG_ARRAY)?;
            buffer.write_u8(a.ndim() as u8)?;
            for dim in a.shape() {
                buffer.write_u32::<BigEndian>(wire_len(*dim)?)?;
            }
            // iter() walks logical order regardless of memory layout
            for v in a.iter() {
                buffer.write_f64::<BigEndian>(*v)?;
            }
        }
        Value::Text(s) => {
            buffer.write_u8(TAG_TEXT)?;
            buffer.write_u32::<BigEndian>(wire_len(s.len())?)?;
            buffer.write_all(s.as_bytes())?;
        }
    }
    Ok(())
}

/// Write a length-prefixed train frame
pub fn write_frame<W: Write>(writer: &mut W, train: &Train) -> Result<(), WireError> {
    let bytes = train.to_bytes()?;
    writer.write_u32::<BigEndian>(wire_len(bytes.len())?)?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// Write the zero-length frame that marks the clean end of a stream
pub fn write_end_frame<W: Write>(writer: &mut W) -> Result<(), WireError> {
    writer.write_u32::<BigEndian>(END_OF_DATA_FRAME_LEN)?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` for the end-of-data marker. An IO error of kind `UnexpectedEof` on
/// the length prefix means the peer or file ended on a frame boundary; callers decide
/// what that means for them. Input ending inside the payload is a truncated frame.
///
/// The payload buffer grows with the bytes actually read, never with the declared length.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Train>, WireError> {
    let len = reader.read_u32::<BigEndian>()?;
    if len == END_OF_DATA_FRAME_LEN {
        return Ok(None);
    }
    let mut buffer = Vec::with_capacity((len as usize).min(FRAME_READ_CHUNK));
    let read = reader.take(len as u64).read_to_end(&mut buffer)? as u64;
    if read != len as u64 {
        return Err(WireError::Truncated(len as u64, read));
    }
    Ok(Some(Train::from_bytes(&buffer)?))
}
