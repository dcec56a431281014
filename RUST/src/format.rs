//! Top-level formats and their registry.

use crate::error::{CompileError, CompileErrors, ParseError, Result};
use crate::gbf::GbfFormat;
use crate::stream::Stream;
use crate::value::{Buffer, Composite, RecordBuilder, RecordType, Value};
use std::path::Path;
use std::rc::Rc;
use tracing::{info, warn};

/// Result of decoding a whole buffer. `root` is always present; when
/// decoding stopped early it holds everything read before `error`.
#[derive(Debug)]
pub struct Decoded {
    pub root: Value,
    pub error: Option<ParseError>,
}

/// A loadable top-level type.
pub trait Format {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// True when `bytes` look like this format.
    fn detect(&self, _bytes: &[u8]) -> bool {
        false
    }

    fn decode(&self, buf: Buffer) -> Decoded;
}

/// Whole input as one byte field.
#[derive(Debug, Default)]
pub struct RawFormat;

impl Format for RawFormat {
    fn name(&self) -> &str {
        "raw"
    }

    fn description(&self) -> &str {
        "unstructured bytes"
    }

    fn decode(&self, buf: Buffer) -> Decoded {
        let ty = RecordType::new("raw")
            .seq(&["data"])
            .instance("length", |r, _io| Ok(Value::UInt(r.io().len() as u64)))
            .build();

        let mut io = Stream::new(buf);
        let mut b = RecordBuilder::new(&ty, &io);
        let res = b.read("data", &mut io, |io| Ok(Value::Bytes(io.read_bytes_full()?)));
        Decoded {
            root: Value::Struct(b.finish()),
            error: res.err(),
        }
    }
}

pub struct FormatRegistry {
    formats: Vec<Box<dyn Format>>,
}

impl FormatRegistry {
    pub fn builtin() -> Self {
        Self {
            formats: vec![Box::new(GbfFormat), Box::new(RawFormat)],
        }
    }

    pub fn list(&self) -> impl Iterator<Item = &dyn Format> {
        self.formats.iter().map(|f| f.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Format> {
        self.list().find(|f| f.name() == name)
    }

    fn names(&self) -> String {
        self.list().map(|f| f.name()).collect::<Vec<_>>().join(", ")
    }

    /// Picks the format named `name`, or detects one from the leading bytes
    /// (falling back to `raw`).
    pub fn resolve(&self, name: Option<&str>, bytes: &[u8]) -> std::result::Result<&dyn Format, CompileErrors> {
        match name {
            Some(n) => self.get(n).ok_or_else(|| {
                let err = if n.ends_with(".ksy") {
                    CompileError::new(n, format!("format definitions are not compiled at run time; built-in formats: {}", self.names()))
                } else {
                    let mut e = CompileError::new("<command line>", format!("unknown format `{n}`; built-in formats: {}", self.names()));
                    e.path = vec!["format".to_string()];
                    e
                };
                warn!(format = n, "format resolution failed");
                CompileErrors(vec![err])
            }),
            None => {
                let f = self
                    .list()
                    .find(|f| f.detect(bytes))
                    .or_else(|| self.get("raw"))
                    .ok_or_else(|| CompileErrors(vec![CompileError::new("<builtin>", "no fallback format registered")]))?;
                info!(format = f.name(), "detected format");
                Ok(f)
            }
        }
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

pub fn read_input(path: &Path) -> Result<Buffer> {
    let bytes = std::fs::read(path)?;
    Ok(Rc::from(bytes))
}
