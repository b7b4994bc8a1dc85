use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::errors::ParserError;

const PARSER: &str = "MAT";
const HEADER_LEN: usize = 128;
const TEXT_LEN: usize = 116;
const LEVEL5_VERSION: u16 = 0x0100;
const HDF5_MAGIC: [u8; 8] = [0x89, b'H', b'D', b'F', 0x0d, 0x0a, 0x1a, 0x0a];

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

const MX_CELL: u8 = 1;
const MX_STRUCT: u8 = 2;
const MX_CHAR: u8 = 4;
const MX_DOUBLE: u8 = 6;
const MX_UINT64: u8 = 15;

const FLAG_COMPLEX: u32 = 0x0800;
const FLAG_LOGICAL: u32 = 0x0200;

const STRUCT_FIELD_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u16(self, b: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(b),
            Endian::Big => BigEndian::read_u16(b),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(b),
            Endian::Big => BigEndian::read_u32(b),
        }
    }

    fn i16(self, b: &[u8]) -> i16 {
        match self {
            Endian::Little => LittleEndian::read_i16(b),
            Endian::Big => BigEndian::read_i16(b),
        }
    }

    fn i32(self, b: &[u8]) -> i32 {
        match self {
            Endian::Little => LittleEndian::read_i32(b),
            Endian::Big => BigEndian::read_i32(b),
        }
    }

    fn i64(self, b: &[u8]) -> i64 {
        match self {
            Endian::Little => LittleEndian::read_i64(b),
            Endian::Big => BigEndian::read_i64(b),
        }
    }

    fn u64(self, b: &[u8]) -> u64 {
        match self {
            Endian::Little => LittleEndian::read_u64(b),
            Endian::Big => BigEndian::read_u64(b),
        }
    }

    fn f32(self, b: &[u8]) -> f32 {
        match self {
            Endian::Little => LittleEndian::read_f32(b),
            Endian::Big => BigEndian::read_f32(b),
        }
    }

    fn f64(self, b: &[u8]) -> f64 {
        match self {
            Endian::Little => LittleEndian::read_f64(b),
            Endian::Big => BigEndian::read_f64(b),
        }
    }

    fn indicator(self) -> &'static [u8; 2] {
        match self {
            Endian::Little => b"IM",
            Endian::Big => b"MI",
        }
    }

    fn put_u16(self, out: &mut Vec<u8>, value: u16) {
        let mut buf = [0u8; 2];
        match self {
            Endian::Little => LittleEndian::write_u16(&mut buf, value),
            Endian::Big => BigEndian::write_u16(&mut buf, value),
        }
        out.extend_from_slice(&buf);
    }

    fn put_u32(self, out: &mut Vec<u8>, value: u32) {
        let mut buf = [0u8; 4];
        match self {
            Endian::Little => LittleEndian::write_u32(&mut buf, value),
            Endian::Big => BigEndian::write_u32(&mut buf, value),
        }
        out.extend_from_slice(&buf);
    }

    fn put_i32(self, out: &mut Vec<u8>, value: i32) {
        let mut buf = [0u8; 4];
        match self {
            Endian::Little => LittleEndian::write_i32(&mut buf, value),
            Endian::Big => BigEndian::write_i32(&mut buf, value),
        }
        out.extend_from_slice(&buf);
    }

    fn put_f64(self, out: &mut Vec<u8>, value: f64) {
        let mut buf = [0u8; 8];
        match self {
            Endian::Little => LittleEndian::write_f64(&mut buf, value),
            Endian::Big => BigEndian::write_f64(&mut buf, value),
        }
        out.extend_from_slice(&buf);
    }
}

/// A decoded MATLAB array. Numeric classes (and logicals) widen to `f64`;
/// all element orders are column-major as stored.
#[derive(Debug, Clone, PartialEq)]
pub enum MatValue {
    Numeric { dims: Vec<usize>, data: Vec<f64> },
    Char { dims: Vec<usize>, text: String },
    Struct(StructArray),
    Cell { dims: Vec<usize>, cells: Vec<MatValue> },
    Empty,
    Unsupported { class: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructArray {
    pub dims: Vec<usize>,
    pub field_names: Vec<String>,
    /// One entry per struct element, each holding a value per field in `field_names` order.
    pub elements: Vec<Vec<MatValue>>,
}

impl StructArray {
    /// Builds a 1xN struct array from records that share `field_names`.
    pub fn from_records(field_names: Vec<String>, elements: Vec<Vec<MatValue>>) -> Self {
        Self {
            dims: vec![1, elements.len()],
            field_names,
            elements,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_names.iter().position(|field| field == name)
    }

    pub fn get(&self, element: usize, field: &str) -> Option<&MatValue> {
        let idx = self.field_index(field)?;
        self.elements.get(element).and_then(|values| values.get(idx))
    }
}

impl MatValue {
    pub fn scalar(value: f64) -> Self {
        MatValue::Numeric {
            dims: vec![1, 1],
            data: vec![value],
        }
    }

    pub fn row(values: Vec<f64>) -> Self {
        if values.is_empty() {
            return MatValue::Empty;
        }
        MatValue::Numeric {
            dims: vec![1, values.len()],
            data: values,
        }
    }

    pub fn text(value: &str) -> Self {
        MatValue::Char {
            dims: vec![1, value.encode_utf16().count()],
            text: value.to_string(),
        }
    }

    /// Builds a 1x1 struct from `(field, value)` pairs.
    pub fn structure<S: Into<String>>(fields: Vec<(S, MatValue)>) -> Self {
        let (names, values): (Vec<String>, Vec<MatValue>) = fields
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .unzip();
        MatValue::Struct(StructArray {
            dims: vec![1, 1],
            field_names: names,
            elements: vec![values],
        })
    }

    pub fn num_elements(&self) -> usize {
        match self {
            MatValue::Numeric { data, .. } => data.len(),
            MatValue::Char { text, .. } => text.chars().count(),
            MatValue::Struct(array) => array.len(),
            MatValue::Cell { cells, .. } => cells.len(),
            MatValue::Empty => 0,
            MatValue::Unsupported { .. } => 0,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MatValue::Numeric { data, .. } if data.len() == 1 => Some(data[0]),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            MatValue::Numeric { data, .. } => Some(data.as_slice()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MatValue::Char { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructArray> {
        match self {
            MatValue::Struct(array) => Some(array),
            _ => None,
        }
    }

    /// Field lookup on a scalar (1x1) struct.
    pub fn field(&self, name: &str) -> Option<&MatValue> {
        match self {
            MatValue::Struct(array) if array.len() == 1 => array.get(0, name),
            _ => None,
        }
    }

    pub fn require_field(&self, parent: &str, name: &str) -> Result<&MatValue, ParserError> {
        self.field(name).ok_or_else(|| ParserError::MissingField {
            parent: parent.to_string(),
            field: name.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MatValue::Numeric { .. } => "numeric",
            MatValue::Char { .. } => "char",
            MatValue::Struct(_) => "struct",
            MatValue::Cell { .. } => "cell",
            MatValue::Empty => "empty",
            MatValue::Unsupported { .. } => "unsupported",
        }
    }
}

/// Contents of a level-5 MAT-file.
#[derive(Debug, Clone)]
pub struct MatFile {
    pub description: String,
    pub endian: Endian,
    variables: Vec<(String, MatValue)>,
}

impl MatFile {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            endian: Endian::Little,
            variables: Vec::new(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, ParserError> {
        let bytes = fs::read(path.as_ref())?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ParserError> {
        if bytes.len() >= 520 && bytes[512..520] == HDF5_MAGIC {
            return Err(ParserError::UnsupportedMatVersion(
                "7.3 (HDF5-based); re-save with -v7".to_string(),
            ));
        }
        if bytes.len() < HEADER_LEN {
            return Err(ParserError::FormatMismatch {
                parser: PARSER,
                reason: format!(
                    "file is {} bytes, shorter than the {HEADER_LEN}-byte header",
                    bytes.len()
                ),
            });
        }

        let description = String::from_utf8_lossy(&bytes[..TEXT_LEN])
            .trim_end_matches([' ', '\0'])
            .to_string();
        if !description.starts_with("MATLAB") {
            return Err(ParserError::FormatMismatch {
                parser: PARSER,
                reason: "header text does not start with 'MATLAB'".to_string(),
            });
        }

        let endian = match &bytes[126..128] {
            b"IM" => Endian::Little,
            b"MI" => Endian::Big,
            other => {
                return Err(ParserError::FormatMismatch {
                    parser: PARSER,
                    reason: format!("invalid endian indicator {other:?}"),
                })
            }
        };

        let version = endian.u16(&bytes[124..126]);
        if version != LEVEL5_VERSION {
            return Err(ParserError::UnsupportedMatVersion(format!("0x{version:04x}")));
        }

        let mut variables = Vec::new();
        let mut reader = ElementReader::new(&bytes[HEADER_LEN..], HEADER_LEN, endian);
        while !reader.is_exhausted() {
            let (data_type, data) = reader.next_element()?;
            match data_type {
                MI_MATRIX => {
                    let (name, value) = parse_matrix(data, endian)?;
                    if !name.is_empty() {
                        variables.push((name, value));
                    }
                }
                MI_COMPRESSED => {
                    let inflated = inflate(data)?;
                    let mut inner = ElementReader::new(&inflated, 0, endian);
                    let (inner_type, inner_data) = inner.next_element()?;
                    if inner_type == MI_MATRIX {
                        let (name, value) = parse_matrix(inner_data, endian)?;
                        if !name.is_empty() {
                            variables.push((name, value));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            description,
            endian,
            variables,
        })
    }

    pub fn push(&mut self, name: impl Into<String>, value: MatValue) {
        self.variables.push((name.into(), value));
    }

    pub fn variable(&self, name: &str) -> Result<&MatValue, ParserError> {
        self.variables
            .iter()
            .find(|(var, _)| var == name)
            .map(|(_, value)| value)
            .ok_or_else(|| ParserError::MissingVariable(name.to_string()))
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|(name, _)| name.as_str())
    }

    /// Serializes the variables as a level-5 MAT-file in `self.endian` byte
    /// order, optionally wrapping each variable in a zlib-compressed element.
    pub fn to_bytes(&self, compress: bool) -> Result<Vec<u8>, ParserError> {
        let endian = self.endian;
        let mut out = Vec::with_capacity(HEADER_LEN);
        let mut text = format!("MATLAB 5.0 MAT-file, {}", self.description).into_bytes();
        text.resize(TEXT_LEN, b' ');
        out.extend_from_slice(&text);
        out.extend_from_slice(&[0u8; 8]);
        endian.put_u16(&mut out, LEVEL5_VERSION);
        out.extend_from_slice(endian.indicator());

        for (name, value) in &self.variables {
            let mut element = Vec::new();
            encode_matrix(name, value, endian, &mut element);
            if compress {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&element)?;
                let compressed = encoder.finish()?;
                endian.put_u32(&mut out, MI_COMPRESSED);
                endian.put_u32(&mut out, compressed.len() as u32);
                out.extend_from_slice(&compressed);
            } else {
                out.extend_from_slice(&element);
            }
        }

        Ok(out)
    }
}

struct ElementReader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
    endian: Endian,
}

impl<'a> ElementReader<'a> {
    fn new(buf: &'a [u8], base: usize, endian: Endian) -> Self {
        Self {
            buf,
            pos: 0,
            base,
            endian,
        }
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ParserError> {
        let available = self.buf.len().saturating_sub(self.pos);
        if len > available {
            return Err(ParserError::Truncated {
                offset: self.base + self.pos,
                needed: len,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn skip_padding(&mut self, len: usize) {
        let pad = (8 - len % 8) % 8;
        self.pos = (self.pos + pad).min(self.buf.len());
    }

    fn next_element(&mut self) -> Result<(u32, &'a [u8]), ParserError> {
        let tag = self.take(8)?;
        let first = self.endian.u32(&tag[..4]);

        // Small data element format: type and size share the first word.
        if first >> 16 != 0 {
            let data_type = first & 0xffff;
            let len = (first >> 16) as usize;
            if len > 4 {
                return Err(ParserError::Validation {
                    parser: PARSER,
                    message: format!("small data element claims {len} bytes"),
                });
            }
            return Ok((data_type, &tag[4..4 + len]));
        }

        let data_type = first;
        let len = self.endian.u32(&tag[4..8]) as usize;
        let data = self.take(len)?;
        if data_type != MI_COMPRESSED {
            self.skip_padding(len);
        }
        Ok((data_type, data))
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, ParserError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(ParserError::Decompress)?;
    Ok(inflated)
}

fn parse_matrix(data: &[u8], endian: Endian) -> Result<(String, MatValue), ParserError> {
    if data.is_empty() {
        return Ok((String::new(), MatValue::Empty));
    }

    let mut reader = ElementReader::new(data, 0, endian);

    let (_, flags_raw) = reader.next_element()?;
    if flags_raw.len() < 4 {
        return Err(ParserError::Validation {
            parser: PARSER,
            message: "array flags sub-element too short".to_string(),
        });
    }
    let flags = endian.u32(&flags_raw[..4]);
    let class = (flags & 0xff) as u8;
    let is_complex = flags & FLAG_COMPLEX != 0;
    let is_logical = flags & FLAG_LOGICAL != 0;

    let (dims_type, dims_raw) = reader.next_element()?;
    let dims: Vec<usize> = decode_numeric(dims_type, dims_raw, endian)?
        .into_iter()
        .map(|dim| dim.max(0.0) as usize)
        .collect();
    let count = dims
        .iter()
        .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
        .ok_or_else(|| ParserError::Validation {
            parser: PARSER,
            message: format!("dimensions {dims:?} overflow the element count"),
        })?;
    // Every element needs at least one 8-byte tag, so the remaining bytes bound
    // how many can really follow.
    let capacity = count.min(data.len() / 8);

    let (_, name_raw) = reader.next_element()?;
    let name = String::from_utf8_lossy(name_raw)
        .trim_end_matches('\0')
        .to_string();

    let value = match class {
        MX_CELL => {
            let mut cells = Vec::with_capacity(capacity);
            for _ in 0..count {
                let (_, cell_data) = reader.next_element()?;
                cells.push(parse_matrix(cell_data, endian)?.1);
            }
            if cells.is_empty() {
                MatValue::Empty
            } else {
                MatValue::Cell { dims, cells }
            }
        }
        MX_STRUCT => {
            let (len_type, len_raw) = reader.next_element()?;
            let name_len = decode_numeric(len_type, len_raw, endian)?
                .first()
                .copied()
                .unwrap_or(0.0) as usize;
            let (_, names_raw) = reader.next_element()?;
            let field_names: Vec<String> = if name_len == 0 {
                Vec::new()
            } else {
                names_raw
                    .chunks(name_len)
                    .map(|chunk| {
                        let end = chunk.iter().position(|b| *b == 0).unwrap_or(chunk.len());
                        String::from_utf8_lossy(&chunk[..end]).to_string()
                    })
                    .collect()
            };

            if field_names.is_empty() && count > data.len() {
                return Err(ParserError::Validation {
                    parser: PARSER,
                    message: format!("struct '{name}' claims {count} elements without fields"),
                });
            }
            let mut elements = Vec::with_capacity(capacity);
            for _ in 0..count {
                let mut values = Vec::with_capacity(field_names.len());
                for _ in 0..field_names.len() {
                    let (_, field_data) = reader.next_element()?;
                    values.push(parse_matrix(field_data, endian)?.1);
                }
                elements.push(values);
            }

            if elements.is_empty() {
                MatValue::Empty
            } else {
                MatValue::Struct(StructArray {
                    dims,
                    field_names,
                    elements,
                })
            }
        }
        MX_CHAR => {
            if count == 0 {
                MatValue::Empty
            } else {
                let (char_type, char_raw) = reader.next_element()?;
                let chars = decode_chars(char_type, char_raw, endian)?;
                MatValue::Char {
                    text: arrange_char_rows(&chars, &dims),
                    dims,
                }
            }
        }
        MX_DOUBLE..=MX_UINT64 => {
            if count == 0 {
                MatValue::Empty
            } else {
                let (real_type, real_raw) = reader.next_element()?;
                let data = decode_numeric(real_type, real_raw, endian)?;
                if is_complex {
                    // Imaginary part follows; only the real part is kept.
                    reader.next_element()?;
                }
                if data.len() != count {
                    return Err(ParserError::Validation {
                        parser: PARSER,
                        message: format!(
                            "array '{name}' has {} values for dimensions {dims:?}",
                            data.len()
                        ),
                    });
                }
                let data = if is_logical {
                    data.into_iter()
                        .map(|v| if v != 0.0 { 1.0 } else { 0.0 })
                        .collect()
                } else {
                    data
                };
                MatValue::Numeric { dims, data }
            }
        }
        other => MatValue::Unsupported { class: other },
    };

    Ok((name, value))
}

fn decode_numeric(data_type: u32, raw: &[u8], endian: Endian) -> Result<Vec<f64>, ParserError> {
    let width = match data_type {
        MI_INT8 | MI_UINT8 => 1,
        MI_INT16 | MI_UINT16 => 2,
        MI_INT32 | MI_UINT32 | MI_SINGLE => 4,
        MI_DOUBLE | MI_INT64 | MI_UINT64 => 8,
        other => return Err(ParserError::UnsupportedDataType(other)),
    };

    let values = raw
        .chunks_exact(width)
        .map(|chunk| match data_type {
            MI_INT8 => chunk[0] as i8 as f64,
            MI_UINT8 => chunk[0] as f64,
            MI_INT16 => endian.i16(chunk) as f64,
            MI_UINT16 => endian.u16(chunk) as f64,
            MI_INT32 => endian.i32(chunk) as f64,
            MI_UINT32 => endian.u32(chunk) as f64,
            MI_SINGLE => endian.f32(chunk) as f64,
            MI_INT64 => endian.i64(chunk) as f64,
            MI_UINT64 => endian.u64(chunk) as f64,
            _ => endian.f64(chunk),
        })
        .collect();
    Ok(values)
}

fn decode_chars(data_type: u32, raw: &[u8], endian: Endian) -> Result<Vec<char>, ParserError> {
    match data_type {
        MI_UINT16 | MI_UTF16 => {
            let units: Vec<u16> = raw.chunks_exact(2).map(|c| endian.u16(c)).collect();
            Ok(char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect())
        }
        MI_UTF8 | MI_UINT8 | MI_INT8 => Ok(String::from_utf8_lossy(raw).chars().collect()),
        MI_UTF32 | MI_UINT32 => Ok(raw
            .chunks_exact(4)
            .map(|c| char::from_u32(endian.u32(c)).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()),
        other => Err(ParserError::UnsupportedDataType(other)),
    }
}

/// Char matrices are column-major; multi-row arrays become newline-joined rows.
fn arrange_char_rows(chars: &[char], dims: &[usize]) -> String {
    let rows = dims.first().copied().unwrap_or(1);
    let count = dims.iter().try_fold(1usize, |acc, dim| acc.checked_mul(*dim));
    if rows <= 1 || count != Some(chars.len()) {
        return chars.iter().collect();
    }
    let cols = chars.len() / rows;
    (0..rows)
        .map(|row| {
            (0..cols)
                .map(|col| chars[col * rows + row])
                .collect::<String>()
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_element(out: &mut Vec<u8>, endian: Endian, data_type: u32, data: &[u8]) {
    endian.put_u32(out, data_type);
    endian.put_u32(out, data.len() as u32);
    out.extend_from_slice(data);
    let pad = (8 - data.len() % 8) % 8;
    out.extend(std::iter::repeat(0u8).take(pad));
}

fn matrix_header(body: &mut Vec<u8>, endian: Endian, class: u8, dims: &[usize], name: &str) {
    let mut flags = Vec::with_capacity(8);
    endian.put_u32(&mut flags, class as u32);
    endian.put_u32(&mut flags, 0);
    push_element(body, endian, MI_UINT32, &flags);

    let mut dims_raw = Vec::with_capacity(dims.len() * 4);
    for dim in dims {
        endian.put_i32(&mut dims_raw, *dim as i32);
    }
    push_element(body, endian, MI_INT32, &dims_raw);
    push_element(body, endian, MI_INT8, name.as_bytes());
}

fn encode_matrix(name: &str, value: &MatValue, endian: Endian, out: &mut Vec<u8>) {
    let mut body = Vec::new();
    match value {
        MatValue::Numeric { dims, data } => {
            matrix_header(&mut body, endian, MX_DOUBLE, dims, name);
            let mut raw = Vec::with_capacity(data.len() * 8);
            for value in data {
                endian.put_f64(&mut raw, *value);
            }
            push_element(&mut body, endian, MI_DOUBLE, &raw);
        }
        MatValue::Char { text, .. } => {
            let units: Vec<u16> = text.encode_utf16().collect();
            matrix_header(&mut body, endian, MX_CHAR, &[1, units.len()], name);
            let mut raw = Vec::with_capacity(units.len() * 2);
            for unit in &units {
                endian.put_u16(&mut raw, *unit);
            }
            push_element(&mut body, endian, MI_UINT16, &raw);
        }
        MatValue::Struct(array) => {
            matrix_header(&mut body, endian, MX_STRUCT, &array.dims, name);
            let mut name_len = Vec::with_capacity(4);
            endian.put_i32(&mut name_len, STRUCT_FIELD_NAME_LEN as i32);
            push_element(&mut body, endian, MI_INT32, &name_len);
            let mut names_raw = Vec::with_capacity(array.field_names.len() * STRUCT_FIELD_NAME_LEN);
            for field in &array.field_names {
                let mut padded = field.as_bytes().to_vec();
                padded.truncate(STRUCT_FIELD_NAME_LEN - 1);
                padded.resize(STRUCT_FIELD_NAME_LEN, 0);
                names_raw.extend_from_slice(&padded);
            }
            push_element(&mut body, endian, MI_INT8, &names_raw);
            for element in &array.elements {
                for field_value in element {
                    encode_matrix("", field_value, endian, &mut body);
                }
            }
        }
        MatValue::Cell { dims, cells } => {
            matrix_header(&mut body, endian, MX_CELL, dims, name);
            for cell in cells {
                encode_matrix("", cell, endian, &mut body);
            }
        }
        MatValue::Empty | MatValue::Unsupported { .. } => {
            matrix_header(&mut body, endian, MX_DOUBLE, &[0, 0], name);
        }
    }
    push_element(out, endian, MI_MATRIX, &body);
}
