//! Level 5 MAT-file reader.
//!
//! Covers what Bpod session files use: numeric and logical arrays, char
//! arrays, cell arrays and structs, optionally wrapped in `miCOMPRESSED`
//! elements. Only little-endian files are accepted.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;

use crate::error::{require_file, ConvertError, Result};

const HEADER_LEN: usize = 128;

// Data element types
const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MI_UTF8: u32 = 16;
const MI_UTF16: u32 = 17;
const MI_UTF32: u32 = 18;

// Array classes
const MX_CELL_CLASS: u8 = 1;
const MX_STRUCT_CLASS: u8 = 2;
const MX_OBJECT_CLASS: u8 = 3;
const MX_CHAR_CLASS: u8 = 4;
const MX_SPARSE_CLASS: u8 = 5;
const MX_DOUBLE_CLASS: u8 = 6;
const MX_UINT64_CLASS: u8 = 15;

/// A MATLAB value.
#[derive(Debug, Clone, PartialEq)]
pub enum MatValue {
    /// Numeric or logical array, values widened to f64, column-major
    Numeric { dims: Vec<usize>, data: Vec<f64> },
    /// Char array read as one string (rows joined column-major)
    Char(String),
    /// Cell array, elements column-major
    Cell { dims: Vec<usize>, items: Vec<MatValue> },
    /// Struct array, one field map per element
    Struct {
        dims: Vec<usize>,
        fields: Vec<String>,
        elements: Vec<BTreeMap<String, MatValue>>,
    },
}

impl MatValue {
    fn kind(&self) -> &'static str {
        match self {
            MatValue::Numeric { .. } => "numeric array",
            MatValue::Char(_) => "char array",
            MatValue::Cell { .. } => "cell array",
            MatValue::Struct { .. } => "struct",
        }
    }

    /// Field of a 1x1 struct.
    pub fn field(&self, name: &str) -> Result<&MatValue> {
        match self {
            MatValue::Struct { elements, .. } if elements.len() == 1 => elements[0]
                .get(name)
                .ok_or_else(|| ConvertError::parse("MAT struct", format!("missing field '{}'", name))),
            other => Err(ConvertError::parse(
                "MAT struct",
                format!("cannot read field '{}' of a {}", name, other.kind()),
            )),
        }
    }

    /// Follows a dotted path of struct fields, e.g. `Info.SessionDate`.
    pub fn path(&self, path: &str) -> Result<&MatValue> {
        path.split('.').try_fold(self, |value, name| value.field(name))
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            MatValue::Numeric { data, .. } if data.len() == 1 => Ok(data[0]),
            other => Err(ConvertError::parse(
                "MAT value",
                format!("expected a scalar, found a {} of {} elements", other.kind(), other.len()),
            )),
        }
    }

    /// Numeric elements in column-major order (scalars give one element).
    pub fn as_f64_slice(&self) -> Result<&[f64]> {
        match self {
            MatValue::Numeric { data, .. } => Ok(data),
            other => Err(ConvertError::parse(
                "MAT value",
                format!("expected a numeric array, found a {}", other.kind()),
            )),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            MatValue::Char(s) => Ok(s),
            other => Err(ConvertError::parse(
                "MAT value",
                format!("expected a char array, found a {}", other.kind()),
            )),
        }
    }

    /// Cell items; any non-cell value is treated as a one-item cell.
    pub fn as_cell(&self) -> Vec<&MatValue> {
        match self {
            MatValue::Cell { items, .. } => items.iter().collect(),
            other => vec![other],
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            MatValue::Numeric { data, .. } => data.len(),
            MatValue::Char(s) => s.chars().count(),
            MatValue::Cell { items, .. } => items.len(),
            MatValue::Struct { elements, .. } => elements.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Top-level variables of a MAT file, by name.
#[derive(Debug, Clone, Default)]
pub struct MatFile {
    pub variables: BTreeMap<String, MatValue>,
}

impl MatFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        require_file(path)?;
        let bytes = fs::read(path)?;
        Self::parse(&bytes).map_err(|e| match e {
            ConvertError::Parse { message, .. } => {
                ConvertError::parse(path.display().to_string(), message)
            }
            other => other,
        })
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ConvertError::parse("MAT file", "shorter than the 128-byte header"));
        }
        if bytes.starts_with(b"\x89HDF") || bytes[HEADER_LEN..].starts_with(b"\x89HDF") {
            return Err(ConvertError::parse("MAT file", "v7.3 (HDF5) files are not supported"));
        }
        match &bytes[126..128] {
            b"IM" => {}
            b"MI" => return Err(ConvertError::parse("MAT file", "big-endian files are not supported")),
            _ => return Err(ConvertError::parse("MAT file", "missing endian indicator, not a level 5 MAT-file")),
        }

        let mut variables = BTreeMap::new();
        let mut cursor = Cursor::new(&bytes[HEADER_LEN..]);
        while (cursor.position() as usize) < bytes.len() - HEADER_LEN {
            if let Some((name, value)) = read_variable(&mut cursor)? {
                variables.insert(name, value);
            }
        }

        Ok(MatFile { variables })
    }

    pub fn get(&self, name: &str) -> Result<&MatValue> {
        self.variables
            .get(name)
            .ok_or_else(|| ConvertError::parse("MAT file", format!("missing variable '{}'", name)))
    }
}

struct Tag {
    data_type: u32,
    num_bytes: usize,
    small: bool,
}

fn read_tag<R: Read>(reader: &mut R) -> Result<Tag> {
    let first = reader.read_u32::<LittleEndian>()?;
    // Small data element: byte count in the upper half, payload in the next 4 bytes
    if first >> 16 != 0 {
        return Ok(Tag {
            data_type: first & 0xFFFF,
            num_bytes: (first >> 16) as usize,
            small: true,
        });
    }
    let num_bytes = reader.read_u32::<LittleEndian>()? as usize;
    Ok(Tag {
        data_type: first,
        num_bytes,
        small: false,
    })
}

fn padded(tag: &Tag) -> usize {
    if tag.small {
        4
    } else {
        (tag.num_bytes + 7) / 8 * 8
    }
}

/// Reads a tag and its padded payload, returning the payload trimmed to size
fn read_element<R: Read>(reader: &mut R) -> Result<(u32, Vec<u8>)> {
    let tag = read_tag(reader)?;
    let mut payload = vec![0u8; padded(&tag)];
    reader.read_exact(&mut payload)?;
    payload.truncate(tag.num_bytes);
    Ok((tag.data_type, payload))
}

fn read_variable(cursor: &mut Cursor<&[u8]>) -> Result<Option<(String, MatValue)>> {
    let tag = read_tag(cursor)?;
    match tag.data_type {
        MI_COMPRESSED => {
            let start = cursor.position() as usize;
            let end = start + tag.num_bytes;
            let compressed = cursor
                .get_ref()
                .get(start..end)
                .ok_or_else(|| ConvertError::parse("MAT file", "compressed element runs past end of file"))?;
            let mut inflated = Vec::new();
            ZlibDecoder::new(compressed).read_to_end(&mut inflated)?;
            cursor.set_position(end as u64);

            let mut inner = Cursor::new(inflated.as_slice());
            let inner_tag = read_tag(&mut inner)?;
            if inner_tag.data_type != MI_MATRIX {
                return Ok(None);
            }
            read_matrix(&mut inner, inner_tag.num_bytes).map(Some)
        }
        MI_MATRIX => {
            let start = cursor.position();
            let named = read_matrix(cursor, tag.num_bytes)?;
            cursor.set_position(start + padded(&tag) as u64);
            Ok(Some(named))
        }
        _ => {
            // Skip anything that is not a variable
            let skip = padded(&tag) as u64;
            cursor.set_position(cursor.position() + skip);
            Ok(None)
        }
    }
}

/// Parses the body of an miMATRIX element of `num_bytes` bytes.
fn read_matrix<R: Read>(reader: &mut R, num_bytes: usize) -> Result<(String, MatValue)> {
    if num_bytes == 0 {
        // Empty element, as used for `[]` inside cells and struct fields
        return Ok((
            String::new(),
            MatValue::Numeric {
                dims: vec![0, 0],
                data: Vec::new(),
            },
        ));
    }

    let mut body = vec![0u8; num_bytes];
    reader.read_exact(&mut body)?;
    let mut body = Cursor::new(body.as_slice());

    let (_, flags) = read_element(&mut body)?;
    if flags.len() < 8 {
        return Err(ConvertError::parse("MAT array", "array flags element too short"));
    }
    let class = flags[0];
    let is_complex = flags[1] & 0x08 != 0;

    let (dims_type, dims_bytes) = read_element(&mut body)?;
    let dims: Vec<usize> = numeric_values(dims_type, &dims_bytes)?
        .into_iter()
        .map(|d| d as usize)
        .collect();
    let count: usize = dims.iter().product();

    let (_, name_bytes) = read_element(&mut body)?;
    let name = String::from_utf8_lossy(&name_bytes).into_owned();

    let value = match class {
        MX_CELL_CLASS => {
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_child(&mut body)?);
            }
            MatValue::Cell { dims, items }
        }
        MX_STRUCT_CLASS => read_struct(&mut body, dims, count)?,
        MX_CHAR_CLASS => {
            let (data_type, bytes) = read_element(&mut body)?;
            MatValue::Char(decode_chars(data_type, &bytes)?)
        }
        MX_DOUBLE_CLASS..=MX_UINT64_CLASS => {
            let (data_type, bytes) = read_element(&mut body)?;
            let data = numeric_values(data_type, &bytes)?;
            if is_complex {
                // Imaginary part is read and dropped; sessions never store complex values
                let _ = read_element(&mut body)?;
            }
            if data.len() != count {
                return Err(ConvertError::parse(
                    format!("MAT array '{}'", name),
                    format!("{} values for dimensions {:?}", data.len(), dims),
                ));
            }
            MatValue::Numeric { dims, data }
        }
        MX_OBJECT_CLASS | MX_SPARSE_CLASS => {
            return Err(ConvertError::parse(
                format!("MAT array '{}'", name),
                "object and sparse arrays are not supported",
            ))
        }
        other => {
            return Err(ConvertError::parse(
                format!("MAT array '{}'", name),
                format!("unknown array class {}", other),
            ))
        }
    };

    Ok((name, value))
}

fn read_child<R: Read>(reader: &mut R) -> Result<MatValue> {
    let tag = read_tag(reader)?;
    if tag.data_type != MI_MATRIX {
        return Err(ConvertError::parse(
            "MAT array",
            format!("expected a nested miMATRIX element, found type {}", tag.data_type),
        ));
    }
    // Nested matrices are always 8-byte aligned, so num_bytes is the padded size
    let (_, value) = read_matrix(reader, tag.num_bytes)?;
    Ok(value)
}

fn read_struct<R: Read>(body: &mut R, dims: Vec<usize>, count: usize) -> Result<MatValue> {
    let (len_type, len_bytes) = read_element(body)?;
    let name_len = numeric_values(len_type, &len_bytes)?
        .first()
        .copied()
        .unwrap_or(0.0) as usize;

    let (_, names_bytes) = read_element(body)?;
    let fields: Vec<String> = if name_len == 0 {
        Vec::new()
    } else {
        names_bytes
            .chunks(name_len)
            .map(|chunk| {
                let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
                String::from_utf8_lossy(&chunk[..end]).into_owned()
            })
            .collect()
    };

    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        let mut element = BTreeMap::new();
        for field in &fields {
            element.insert(field.clone(), read_child(body)?);
        }
        elements.push(element);
    }

    Ok(MatValue::Struct {
        dims,
        fields,
        elements,
    })
}

fn numeric_values(data_type: u32, bytes: &[u8]) -> Result<Vec<f64>> {
    let mut r = Cursor::new(bytes);
    let width = match data_type {
        MI_INT8 | MI_UINT8 => 1,
        MI_INT16 | MI_UINT16 => 2,
        MI_INT32 | MI_UINT32 | MI_SINGLE => 4,
        MI_DOUBLE | MI_INT64 | MI_UINT64 => 8,
        other => {
            return Err(ConvertError::parse(
                "MAT array",
                format!("unsupported numeric storage type {}", other),
            ))
        }
    };

    let mut values = Vec::with_capacity(bytes.len() / width);
    for _ in 0..bytes.len() / width {
        let v = match data_type {
            MI_INT8 => r.read_i8()? as f64,
            MI_UINT8 => r.read_u8()? as f64,
            MI_INT16 => r.read_i16::<LittleEndian>()? as f64,
            MI_UINT16 => r.read_u16::<LittleEndian>()? as f64,
            MI_INT32 => r.read_i32::<LittleEndian>()? as f64,
            MI_UINT32 => r.read_u32::<LittleEndian>()? as f64,
            MI_SINGLE => r.read_f32::<LittleEndian>()? as f64,
            MI_DOUBLE => r.read_f64::<LittleEndian>()?,
            MI_INT64 => r.read_i64::<LittleEndian>()? as f64,
            _ => r.read_u64::<LittleEndian>()? as f64,
        };
        values.push(v);
    }
    Ok(values)
}

fn decode_chars(data_type: u32, bytes: &[u8]) -> Result<String> {
    match data_type {
        MI_UTF8 | MI_UINT8 | MI_INT8 => Ok(String::from_utf8_lossy(bytes).into_owned()),
        MI_UTF16 | MI_UINT16 => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16(&units)
                .map_err(|_| ConvertError::parse("MAT char array", "invalid UTF-16 data"))
        }
        MI_UTF32 => bytes
            .chunks_exact(4)
            .map(|c| {
                char::from_u32(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .ok_or_else(|| ConvertError::parse("MAT char array", "invalid UTF-32 data"))
            })
            .collect(),
        other => Err(ConvertError::parse(
            "MAT char array",
            format!("unsupported char storage type {}", other),
        )),
    }
}
