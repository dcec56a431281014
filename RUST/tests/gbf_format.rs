use flate2::write::ZlibEncoder;
use flate2::Compression;
use ksv::*;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::io::Write;
use std::rc::Rc;

struct Chunk {
    name: &'static str,
    raw: Vec<u8>,
    zlib: bool,
    corrupt: bool,
}

fn zlib(bytes: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

/// Builds a GREDBIN file and returns it with its header length.
fn gbf_file(chunks: &[Chunk]) -> (Vec<u8>, usize) {
    let mut payload = Vec::new();
    let mut fields = Vec::new();
    for c in chunks {
        let stored = match (c.zlib, c.corrupt) {
            (_, true) => b"definitely not a zlib stream".to_vec(),
            (true, false) => zlib(&c.raw),
            (false, false) => c.raw.clone(),
        };
        let compression = if c.zlib { "zlib" } else { "none" };
        fields.push(json!({
            "name": c.name,
            "kind": "numeric",
            "class": "uint8",
            "shape": [1, c.raw.len()],
            "complex": false,
            "encoding": "le",
            "compression": compression,
            "offset": payload.len(),
            "csize": stored.len(),
            "usize": c.raw.len(),
            "crc32": compute_crc32(&c.raw),
        }));
        payload.extend(stored);
    }

    let header = json!({
        "format": "GBF",
        "magic": "GREDBIN",
        "version": 1,
        "root": "struct",
        "created_utc": "2024-05-01T12:00:00Z",
        "fields": fields,
        "payload_start": 0,
        "file_size": 0,
        "header_crc32_hex": "00000000",
    })
    .to_string();
    let crc = compute_header_crc32_hex(&header);
    let header = header.replace(
        r#""header_crc32_hex":"00000000""#,
        &format!(r#""header_crc32_hex":"{crc}""#),
    );

    let mut out = MAGIC_BYTES.to_vec();
    out.extend((header.len() as u32).to_le_bytes());
    out.extend(header.as_bytes());
    out.extend(payload);
    (out, header.len())
}

fn sample() -> (Vec<u8>, usize) {
    gbf_file(&[
        Chunk {
            name: "x",
            raw: b"abcabcabcabcabcabc".to_vec(),
            zlib: true,
            corrupt: false,
        },
        Chunk {
            name: "label",
            raw: b"hello".to_vec(),
            zlib: false,
            corrupt: false,
        },
    ])
}

fn labels(f: &Forest, id: NodeId) -> Vec<String> {
    f.node(id).children().iter().map(|&c| f.node(c).label().to_string()).collect()
}

fn open_path(f: &mut Forest, path: &[&str]) -> Result<NodeId> {
    let mut cur = f.root();
    f.open(cur)?;
    for part in path {
        cur = f.child(cur, part).unwrap_or_else(|| panic!("no child `{part}`"));
        f.open(cur)?;
    }
    Ok(cur)
}

#[test]
fn registry_detects_gbf_and_falls_back_to_raw() {
    let reg = FormatRegistry::builtin();
    let (bytes, _) = sample();
    assert_eq!(reg.resolve(None, &bytes).unwrap().name(), "gbf");

    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    let mut noise: Vec<u8> = (0..256).map(|_| rng.gen()).collect();
    noise[0] = 0;
    assert_eq!(reg.resolve(None, &noise).unwrap().name(), "raw");
    assert_eq!(reg.resolve(Some("raw"), &bytes).unwrap().name(), "raw");

    let names: Vec<&str> = reg.list().map(|f| f.name()).collect();
    assert_eq!(names, vec!["gbf", "raw"]);
}

#[test]
fn unknown_formats_produce_structured_errors() {
    let reg = FormatRegistry::builtin();
    let errs = reg.resolve(Some("png"), b"").err().unwrap();
    assert_eq!(errs.0.len(), 1);
    assert_eq!(errs.0[0].path, vec!["format".to_string()]);
    let text = errs.to_string();
    assert!(text.starts_with("Error:\n<command line>:/format: unknown format `png`"), "{text}");

    let errs = reg.resolve(Some("specs/png.ksy"), b"").err().unwrap();
    assert_eq!(errs.0[0].file, "specs/png.ksy");
    assert!(errs.0[0].line.is_none());

    let mut located = CompileError::new("a.ksy", "bad type");
    located.line = Some(3);
    located.col = Some(7);
    located.path = vec!["seq".to_string(), "0".to_string()];
    let text = CompileErrors(vec![located.clone(), located]).to_string();
    assert!(text.starts_with("Errors:\na.ksy:3:7:/seq/0: bad type\n"), "{text}");
}

#[test]
fn gbf_top_level_fields_and_header_substream() {
    let (bytes, header_len) = sample();
    let decoded = GbfFormat.decode(Rc::from(bytes));
    assert!(decoded.error.is_none());

    let mut f = Forest::new(decoded.root, ExplorePolicy::Retry);
    let root = open_path(&mut f, &[]).unwrap();
    assert_eq!(labels(&f, root), vec!["magic", "header_len", "header", "chunks"]);

    let header = f.child(root, "header").unwrap();
    assert_eq!(f.node(header).span(), Some(Span::closed(12, 12 + header_len)));

    let text = open_path(&mut f, &["header", "text"]).unwrap();
    assert_eq!(f.node(text).span(), Some(Span::closed(0, header_len)));
    assert_eq!(f.io(text).unwrap().len(), header_len);

    let crc = open_path(&mut f, &["header", "crc_ok"]).unwrap();
    assert!(matches!(f.node(crc).value(), Some(Value::Bool(true))));
    let count = open_path(&mut f, &["header", "field_count"]).unwrap();
    assert!(matches!(f.node(count).value(), Some(Value::UInt(2))));
    let created = open_path(&mut f, &["header", "created_utc"]).unwrap();
    assert_eq!(f.node(created).value().and_then(Value::as_str), Some("2024-05-01T12:00:00Z"));
}

#[test]
fn gbf_chunks_are_lazy_and_positioned() {
    let (bytes, header_len) = sample();
    let payload = 12 + header_len;
    let stored_x = zlib(b"abcabcabcabcabcabc").len();

    let mut f = Forest::new(GbfFormat.decode(Rc::from(bytes)).root, ExplorePolicy::Retry);
    let root = open_path(&mut f, &[]).unwrap();
    let chunks = f.child(root, "chunks").unwrap();
    assert_eq!(f.node(chunks).kind(), Kind::Deferred);

    f.open(chunks).unwrap();
    assert_eq!(f.node(chunks).span(), Some(Span::closed(payload, payload + stored_x + 5)));
    assert_eq!(labels(&f, chunks), vec!["0", "1"]);
    let second = f.child(chunks, "1").unwrap();
    assert_eq!(f.node(second).span(), Some(Span::closed(payload + stored_x, payload + stored_x + 5)));

    let first = open_path(&mut f, &["chunks", "0"]).unwrap();
    assert_eq!(
        labels(&f, first),
        vec!["data", "name", "kind", "class", "shape", "compression", "size", "decoded", "crc_ok"]
    );

    let decoded = open_path(&mut f, &["chunks", "0", "decoded"]).unwrap();
    assert_eq!(f.node(decoded).value().and_then(Value::as_bytes).map(|b| b.to_vec()), Some(b"abcabcabcabcabcabc".to_vec()));
    assert_eq!(f.node(decoded).span(), Some(Span::closed(payload, payload + stored_x)));

    let comp = open_path(&mut f, &["chunks", "0", "compression"]).unwrap();
    assert!(matches!(f.node(comp).value(), Some(Value::Enum(s)) if s == "zlib"));
    assert_eq!(f.node(comp).kind(), Kind::Symbol);

    let crc = open_path(&mut f, &["chunks", "1", "crc_ok"]).unwrap();
    assert!(matches!(f.node(crc).value(), Some(Value::Bool(true))));
    let name = open_path(&mut f, &["chunks", "1", "name"]).unwrap();
    assert_eq!(f.node(name).value().and_then(Value::as_str), Some("label"));
}

#[test]
fn corrupt_chunk_fails_when_visited() {
    let (bytes, _) = gbf_file(&[Chunk {
        name: "bad",
        raw: vec![1, 2, 3, 4, 5, 6, 7, 8],
        zlib: true,
        corrupt: true,
    }]);
    let decoded = GbfFormat.decode(Rc::from(bytes));
    assert!(decoded.error.is_none());

    let mut f = Forest::new(decoded.root, ExplorePolicy::Retry);
    let chunk = open_path(&mut f, &["chunks", "0"]).unwrap();
    let data = f.child(chunk, "data").unwrap();
    assert!(f.node(data).is_hex());

    let dec = f.child(chunk, "decoded").unwrap();
    let err = f.open(dec).unwrap_err();
    assert!(matches!(err, ParseError::Decode(ref m) if m.contains("zlib")), "{err}");
    assert!(f.open(dec).is_err());
    assert!(f.node(dec).value().is_none());

    let crc = f.child(chunk, "crc_ok").unwrap();
    assert!(f.open(crc).is_err());
}

#[test]
fn bad_magic_stops_before_any_field() {
    let (mut bytes, _) = sample();
    bytes[0] = b'X';
    let decoded = GbfFormat.decode(Rc::from(bytes));
    assert!(matches!(decoded.error, Some(ParseError::Validation { ref field, .. }) if field == "magic"));

    let mut f = Forest::new(decoded.root, ExplorePolicy::Retry);
    let root = open_path(&mut f, &[]).unwrap();
    assert_eq!(labels(&f, root), vec!["chunks"]);
}

#[test]
fn truncated_header_keeps_preamble() {
    let (bytes, _) = sample();
    let decoded = GbfFormat.decode(Rc::from(&bytes[..40]));
    assert!(matches!(decoded.error, Some(ParseError::Eof { pos: 12, .. })));

    let mut f = Forest::new(decoded.root, ExplorePolicy::Retry);
    let root = open_path(&mut f, &[]).unwrap();
    assert_eq!(labels(&f, root), vec!["magic", "header_len", "chunks"]);
}

#[test]
fn header_crc_mismatch_is_reported_not_fatal() {
    let (mut bytes, header_len) = sample();
    let text = String::from_utf8(bytes[12..12 + header_len].to_vec()).unwrap();
    let tampered = text.replace("2024-05-01", "2025-05-01");
    assert_eq!(tampered.len(), text.len());
    bytes[12..12 + header_len].copy_from_slice(tampered.as_bytes());

    let mut f = Forest::new(GbfFormat.decode(Rc::from(bytes)).root, ExplorePolicy::Retry);
    let crc = open_path(&mut f, &["header", "crc_ok"]).unwrap();
    assert!(matches!(f.node(crc).value(), Some(Value::Bool(false))));
}

#[test]
fn placeholder_keeps_spacing_around_colon() {
    let j = r#"{"a":1, "header_crc32_hex" :  "DEADBEEF"}"#;
    assert_eq!(header_json_with_placeholder_crc(j), r#"{"a":1, "header_crc32_hex" :  "00000000"}"#);
    let h = parse_header(j).unwrap();
    assert_eq!(header_crc_ok(&h, j), Some(false));

    let none = parse_header(r#"{"fields": []}"#).unwrap();
    assert_eq!(header_crc_ok(&none, "{}"), None);
    assert_eq!(none.payload_start(100), PREAMBLE_LEN + 100);
}

#[test]
fn raw_format_and_json_dump() {
    let decoded = RawFormat.decode(Rc::from(vec![0xde, 0xad, 0x01]));
    assert!(decoded.error.is_none());
    let json = to_json(&decoded.root).unwrap();
    assert_eq!(json, json!({ "data": "DE AD 01", "length": 3 }));
}

#[test]
fn gbf_dump_computes_every_field() {
    let (bytes, _) = sample();
    let root = GbfFormat.decode(Rc::from(bytes)).root;
    let json = to_json(&root).unwrap();

    assert_eq!(json["magic"], json!("47 52 45 44 42 49 4E 00"));
    assert_eq!(json["header"]["crc_ok"], json!(true));
    assert_eq!(json["chunks"][0]["name"], json!("x"));
    assert_eq!(json["chunks"][0]["decoded"], json!(hex_upper(b"abcabcabcabcabcabc")));
    assert_eq!(json["chunks"][1]["shape"], json!([1, 5]));
    assert_eq!(json["chunks"][1]["compression"], json!("none"));
}
