//! GREDBIN container: `GREDBIN\0`, u32 LE header length, JSON header,
//! then payload chunks addressed by the header's field table.

use crate::error::ParseError;
use crate::format::{Decoded, Format};
use crate::header::{compute_crc32, header_crc_ok, parse_header, Header, MAGIC_BYTES};
use crate::stream::Stream;
use crate::value::{Buffer, Composite, Record, RecordBuilder, RecordType, Value};
use flate2::read::ZlibDecoder;
use std::io::Read;
use std::rc::Rc;

/// Inflate limit for chunks that do not declare their uncompressed size.
const MAX_INFLATE: u64 = 1 << 30;

#[derive(Debug, Default)]
pub struct GbfFormat;

impl Format for GbfFormat {
    fn name(&self) -> &str {
        "gbf"
    }

    fn description(&self) -> &str {
        "GREDBIN container (JSON header, raw or zlib payload chunks)"
    }

    fn detect(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(&MAGIC_BYTES)
    }

    fn decode(&self, buf: Buffer) -> Decoded {
        let ty = file_type();
        let mut io = Stream::new(buf);
        let mut b = RecordBuilder::new(&ty, &io);
        let res = decode_file(&mut b, &mut io);
        Decoded {
            root: Value::Struct(b.finish()),
            error: res.err(),
        }
    }
}

fn decode_file(b: &mut RecordBuilder, io: &mut Stream) -> Result<(), ParseError> {
    b.read("magic", io, |io| Ok(Value::Bytes(io.ensure_fixed_contents("magic", &MAGIC_BYTES)?)))?;
    b.read("header_len", io, |io| Ok(Value::UInt(io.read_u4le()? as u64)))?;

    let len = b.get("header_len").and_then(Value::as_u64).unwrap_or(0) as usize;
    b.read_substruct("header", io, len, &header_type(), |hb, sub| {
        hb.read("text", sub, |s| {
            let n = s.size();
            Ok(Value::Str(s.read_str_utf8(n)?))
        })
    })?;

    // Surface a malformed header now rather than on the first chunk visit.
    file_header(b.get("header"), len)?;
    Ok(())
}

fn file_type() -> Rc<RecordType> {
    RecordType::new("gbf_file")
        .seq(&["magic", "header_len", "header"])
        .instance("chunks", read_chunks)
        .build()
}

fn header_type() -> Rc<RecordType> {
    RecordType::new("gbf_header")
        .seq(&["text"])
        .instance("format", |r, _| Ok(Value::Str(own_header(r)?.format)))
        .instance("version", |r, _| Ok(Value::UInt(own_header(r)?.version as u64)))
        .instance("root", |r, _| Ok(Value::Str(own_header(r)?.root)))
        .instance("created_utc", |r, _| Ok(Value::Str(own_header(r)?.created_utc)))
        .instance("field_count", |r, _| Ok(Value::UInt(own_header(r)?.fields.len() as u64)))
        .instance("crc_ok", |r, io| {
            let h = own_header(r)?;
            // Reading the text gives the check a span covering the whole header.
            let n = io.size();
            let text = io.read_str_utf8(n)?;
            Ok(match header_crc_ok(&h, &text) {
                Some(ok) => Value::Bool(ok),
                None => Value::Enum("absent".to_string()),
            })
        })
        .build()
}

fn chunk_type() -> Rc<RecordType> {
    RecordType::new("gbf_chunk")
        .seq(&["data"])
        .instance("name", |r, _| param(r, "name"))
        .instance("kind", |r, _| param(r, "kind"))
        .instance("class", |r, _| param(r, "class"))
        .instance("shape", |r, _| param(r, "shape"))
        .instance("compression", |r, _| param(r, "compression"))
        .instance("size", |r, _| param(r, "usize"))
        .instance("decoded", decode_chunk)
        .instance("crc_ok", |r, _| {
            let expected = param_u64(r, "crc32")? as u32;
            if expected == 0 {
                return Ok(Value::Enum("absent".to_string()));
            }
            let decoded = r.instance("decoded")?;
            let bytes = decoded.as_bytes().map(|b| &b[..]).unwrap_or(&[]);
            Ok(Value::Bool(compute_crc32(bytes) == expected))
        })
        .build()
}

fn param(r: &Record, name: &str) -> Result<Value, ParseError> {
    r.param(name)
        .cloned()
        .ok_or_else(|| ParseError::Decode(format!("chunk has no `{name}`")))
}

fn param_u64(r: &Record, name: &str) -> Result<u64, ParseError> {
    param(r, name)?
        .as_u64()
        .ok_or_else(|| ParseError::Decode(format!("chunk `{name}` is not an integer")))
}

fn to_usize(v: u64, what: &str) -> Result<usize, ParseError> {
    usize::try_from(v).map_err(|_| ParseError::Decode(format!("{what} too large for this platform")))
}

fn header_text(header: Option<&Value>) -> Result<String, ParseError> {
    header
        .and_then(Value::as_struct)
        .and_then(|h| h.seq_value("text"))
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| ParseError::Decode("header text missing".to_string()))
}

fn own_header(r: &Record) -> Result<Header, ParseError> {
    let text = r
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::Decode("header text missing".to_string()))?;
    parse_header(text)
}

fn file_header(header: Option<&Value>, header_len: usize) -> Result<(Header, usize), ParseError> {
    let text = header_text(header)?;
    let h = parse_header(&text)?;
    let start = h.payload_start(header_len);
    Ok((h, start))
}

fn read_chunks(r: &Record, io: &mut Stream) -> Result<Value, ParseError> {
    let len = r.get("header_len").and_then(Value::as_u64).unwrap_or(0) as usize;
    let (header, payload_start) = file_header(r.get("header"), len)?;

    let offsets = header
        .fields
        .iter()
        .map(|f| {
            payload_start
                .checked_add(to_usize(f.offset, "chunk offset")?)
                .ok_or_else(|| ParseError::Decode(format!("chunk `{}` offset overflows", f.name)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ty = chunk_type();
    let items = io.repeat_at(&offsets, |io, i| {
        let f = &header.fields[i];
        let mut b = RecordBuilder::new(&ty, io);
        b.param("name", Value::Str(f.name.clone()));
        b.param("kind", Value::Str(f.kind.clone()));
        b.param("class", Value::Str(f.class_name.clone()));
        b.param("shape", Value::array(f.shape.iter().map(|&d| Value::UInt(d)).collect()));
        b.param("compression", Value::Enum(compression_symbol(&f.compression).to_string()));
        b.param("offset", Value::UInt(offsets[i] as u64));
        b.param("csize", Value::UInt(f.csize));
        b.param("usize", Value::UInt(f.usize));
        b.param("crc32", Value::UInt(f.crc32 as u64));

        let csize = to_usize(f.csize, "chunk csize")?;
        b.read("data", io, |io| Ok(Value::Bytes(io.read_bytes(csize)?)))?;
        Ok(Value::Struct(b.finish()))
    })?;
    Ok(Value::array(items))
}

fn compression_symbol(s: &str) -> &'static str {
    match s.to_ascii_lowercase().as_str() {
        "zlib" => "zlib",
        "" | "none" => "none",
        _ => "unknown",
    }
}

fn decode_chunk(r: &Record, io: &mut Stream) -> Result<Value, ParseError> {
    let offset = to_usize(param_u64(r, "offset")?, "chunk offset")?;
    let csize = to_usize(param_u64(r, "csize")?, "chunk csize")?;
    let declared = param_u64(r, "usize")?;
    let name = param(r, "name")?;
    let name = name.as_str().unwrap_or("?");

    io.seek(offset)?;
    let comp = io.read_bytes(csize)?;

    let symbol = param(r, "compression")?;
    match symbol.as_str() {
        Some("zlib") => {
            let limit = if declared > 0 { declared } else { MAX_INFLATE };
            let out = inflate(&comp, limit).map_err(|e| ParseError::Decode(format!("chunk `{name}`: zlib: {e}")))?;
            if out.len() as u64 > limit {
                return Err(ParseError::Validation {
                    field: name.to_string(),
                    message: format!("inflates past the declared {limit} bytes"),
                });
            }
            if declared > 0 && out.len() as u64 != declared {
                return Err(ParseError::Validation {
                    field: name.to_string(),
                    message: format!("inflated to {} bytes, header says {declared}", out.len()),
                });
            }
            Ok(Value::bytes(out))
        }
        Some("none") => Ok(Value::Bytes(comp)),
        _ => Err(ParseError::Decode(format!("chunk `{name}`: unsupported compression"))),
    }
}

fn inflate(comp: &[u8], max_out: u64) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    // One byte past the limit is enough to detect overflow.
    ZlibDecoder::new(comp).take(max_out.saturating_add(1)).read_to_end(&mut out)?;
    Ok(out)
}
