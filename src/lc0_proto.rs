// src/lc0_proto.rs
//
// Minimal protobuf wire reader for the lc0 weights container. Only the four
// wire types the format uses are supported; unknown fields are skipped.
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Lc0Error {
    #[error("lc0 loader: {0}")]
    Io(#[from] std::io::Error),
    #[error("protobuf parse error: {0}")]
    Parse(String),
    #[error("lc0 weights: {0}")]
    Shape(String),
    #[error("lc0 forward: {0}")]
    Forward(String),
    #[error("lc0 async worker stopped")]
    WorkerStopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

#[derive(Clone, Copy, Debug)]
pub struct FieldView<'a> {
    pub number: u32,
    pub wire_type: WireType,
    pub varint_value: u64,
    pub fixed32_value: u32,
    pub fixed64_value: u64,
    pub bytes: &'a [u8],
}

pub fn read_varint(data: &[u8], offset: &mut usize) -> Option<u64> {
    let mut out = 0u64;
    let mut shift = 0u32;
    while *offset < data.len() {
        let b = data[*offset];
        *offset += 1;
        out |= u64::from(b & 0x7F) << shift;
        if b & 0x80 == 0 {
            return Some(out);
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    None
}

pub fn next_field<'a>(
    data: &'a [u8],
    offset: &mut usize,
) -> Result<Option<FieldView<'a>>, Lc0Error> {
    if *offset >= data.len() {
        return Ok(None);
    }

    let key = read_varint(data, offset)
        .ok_or_else(|| Lc0Error::Parse("invalid field key varint".into()))?;

    let number = (key >> 3) as u32;
    let mut field = FieldView {
        number,
        wire_type: WireType::Varint,
        varint_value: 0,
        fixed32_value: 0,
        fixed64_value: 0,
        bytes: &[],
    };

    match key & 7 {
        0 => {
            field.wire_type = WireType::Varint;
            field.varint_value = read_varint(data, offset)
                .ok_or_else(|| Lc0Error::Parse("invalid varint value".into()))?;
        }
        1 => {
            field.wire_type = WireType::Fixed64;
            if *offset + 8 > data.len() {
                return Err(Lc0Error::Parse("truncated fixed64 field".into()));
            }
            field.fixed64_value =
                u64::from_le_bytes(data[*offset..*offset + 8].try_into().unwrap());
            *offset += 8;
        }
        2 => {
            field.wire_type = WireType::LengthDelimited;
            let len = read_varint(data, offset)
                .ok_or_else(|| Lc0Error::Parse("invalid length-delimited size".into()))?
                as usize;
            if len > data.len() - *offset {
                return Err(Lc0Error::Parse("truncated length-delimited field".into()));
            }
            field.bytes = &data[*offset..*offset + len];
            *offset += len;
        }
        5 => {
            field.wire_type = WireType::Fixed32;
            if *offset + 4 > data.len() {
                return Err(Lc0Error::Parse("truncated fixed32 field".into()));
            }
            field.fixed32_value =
                u32::from_le_bytes(data[*offset..*offset + 4].try_into().unwrap());
            *offset += 4;
        }
        wt => {
            return Err(Lc0Error::Parse(format!("unsupported wire type {}", wt)));
        }
    }

    Ok(Some(field))
}

pub fn first_field<'a>(
    data: &'a [u8],
    field_number: u32,
    wire_type: WireType,
) -> Result<Option<FieldView<'a>>, Lc0Error> {
    let mut offset = 0;
    while let Some(f) = next_field(data, &mut offset)? {
        if f.number == field_number && f.wire_type == wire_type {
            return Ok(Some(f));
        }
    }
    Ok(None)
}

pub fn first_submessage<'a>(
    data: &'a [u8],
    field_number: u32,
) -> Result<Option<&'a [u8]>, Lc0Error> {
    Ok(first_field(data, field_number, WireType::LengthDelimited)?.map(|f| f.bytes))
}

pub fn all_submessages<'a>(data: &'a [u8], field_number: u32) -> Result<Vec<&'a [u8]>, Lc0Error> {
    let mut out = Vec::new();
    let mut offset = 0;
    while let Some(f) = next_field(data, &mut offset)? {
        if f.number == field_number && f.wire_type == WireType::LengthDelimited {
            out.push(f.bytes);
        }
    }
    Ok(out)
}

pub fn parse_packed_varints(packed: &[u8]) -> Result<Vec<u32>, Lc0Error> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < packed.len() {
        let v = read_varint(packed, &mut offset)
            .ok_or_else(|| Lc0Error::Parse("invalid packed varint stream".into()))?;
        out.push(v as u32);
    }
    Ok(out)
}

pub fn read_gzip_file(path: &Path) -> Result<Vec<u8>, Lc0Error> {
    let file = std::fs::File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut buffer = Vec::new();
    decoder.read_to_end(&mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint_bytes(mut v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut b = (v & 0x7F) as u8;
            v >>= 7;
            if v != 0 {
                b |= 0x80;
            }
            out.push(b);
            if v == 0 {
                return out;
            }
        }
    }

    #[test]
    fn test_varint_round_trip() {
        for v in [0u64, 1, 127, 128, 300, 1 << 20, u64::MAX] {
            let bytes = varint_bytes(v);
            let mut offset = 0;
            assert_eq!(read_varint(&bytes, &mut offset), Some(v));
            assert_eq!(offset, bytes.len());
        }
    }

    #[test]
    fn test_field_parsing() {
        // Field 1, varint 5; field 2, fixed32 0x1c0; field 3, bytes [9, 9]
        let mut data = Vec::new();
        data.extend(varint_bytes(1 << 3));
        data.extend(varint_bytes(5));
        data.extend(varint_bytes((2 << 3) | 5));
        data.extend(0x1c0u32.to_le_bytes());
        data.extend(varint_bytes((3 << 3) | 2));
        data.extend(varint_bytes(2));
        data.extend([9u8, 9u8]);

        let f = first_field(&data, 1, WireType::Varint).unwrap().unwrap();
        assert_eq!(f.varint_value, 5);
        let f = first_field(&data, 2, WireType::Fixed32).unwrap().unwrap();
        assert_eq!(f.fixed32_value, 0x1c0);
        let b = first_submessage(&data, 3).unwrap().unwrap();
        assert_eq!(b, &[9u8, 9u8]);
        assert!(first_submessage(&data, 4).unwrap().is_none());
    }

    #[test]
    fn test_truncated_field_rejected() {
        let mut data = Vec::new();
        data.extend(varint_bytes((1 << 3) | 5));
        data.extend([1u8, 2u8]); // fixed32 needs 4 bytes
        let mut offset = 0;
        assert!(next_field(&data, &mut offset).is_err());
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let mut data = Vec::new();
        data.extend(varint_bytes(7 << 3));
        data.extend(varint_bytes(42));
        data.extend(varint_bytes(1 << 3));
        data.extend(varint_bytes(13));
        let f = first_field(&data, 1, WireType::Varint).unwrap().unwrap();
        assert_eq!(f.varint_value, 13);
    }
}
