use crate::error::ParseError;
use crate::stream::Stream;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Shared backing bytes of a stream.
pub type Buffer = Rc<[u8]>;

/// Half-open byte range `[start, end)`. `end` is absent when decoding stopped
/// inside the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: Option<usize>,
}

impl Span {
    pub fn closed(start: usize, end: usize) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn open(start: usize) -> Self {
        Self { start, end: None }
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && self.end.map_or(true, |e| addr < e)
    }
}

/// Position oracle entry for one field of a composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDebug {
    pub span: Span,
    /// Per-element spans when the field is an array.
    pub arr: Option<Vec<Span>>,
}

#[derive(Clone)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Symbol-like value (enum member name).
    Enum(String),
    Bytes(Rc<[u8]>),
    Array(Rc<[Value]>),
    Struct(Rc<dyn Composite>),
}

impl Value {
    pub fn bytes(b: impl Into<Rc<[u8]>>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::from(items))
    }

    pub fn as_struct(&self) -> Option<&Rc<dyn Composite>> {
        match self {
            Value::Struct(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Rc<[u8]>> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "Int({v})"),
            Value::UInt(v) => write!(f, "UInt({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Enum(s) => write!(f, "Enum({s})"),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::Array(a) => write!(f, "Array({} entries)", a.len()),
            Value::Struct(c) => write!(f, "Struct({})", c.type_name()),
        }
    }
}

/// Field description and access for a decoded composite.
///
/// This is the only way the navigator looks inside a composite: it never
/// introspects decoder internals.
pub trait Composite {
    fn type_name(&self) -> &str;

    /// Sequence fields in declared order, including ones that ended up nil.
    fn seq_fields(&self) -> &[String];

    /// Computed fields, evaluated on demand.
    fn instance_fields(&self) -> &[String];

    /// `None` means the field is nil: decoding stopped before reaching it.
    fn seq_value(&self, name: &str) -> Option<Value>;

    fn instance(&self, name: &str) -> Result<Value, ParseError>;

    fn position(&self, name: &str) -> Option<FieldDebug>;

    fn io(&self) -> Buffer;
}

pub type InstanceFn = Rc<dyn Fn(&Record, &mut Stream) -> Result<Value, ParseError>>;

/// Static per-type field descriptor: declared sequence fields plus computed
/// accessors.
pub struct RecordType {
    name: String,
    seq: Vec<String>,
    instance_names: Vec<String>,
    instances: BTreeMap<String, InstanceFn>,
}

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seq: Vec::new(),
            instance_names: Vec::new(),
            instances: BTreeMap::new(),
        }
    }

    pub fn seq(mut self, names: &[&str]) -> Self {
        self.seq.extend(names.iter().map(|s| s.to_string()));
        self
    }

    pub fn instance<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Record, &mut Stream) -> Result<Value, ParseError> + 'static,
    {
        self.instance_names.push(name.to_string());
        self.instances.insert(name.to_string(), Rc::new(f));
        self
    }

    pub fn build(self) -> Rc<RecordType> {
        Rc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordType")
            .field("name", &self.name)
            .field("seq", &self.seq)
            .field("instances", &self.instance_names)
            .finish()
    }
}

/// A decoded composite built by `RecordBuilder`.
pub struct Record {
    ty: Rc<RecordType>,
    io: Buffer,
    values: BTreeMap<String, Value>,
    params: BTreeMap<String, Value>,
    debug: RefCell<BTreeMap<String, FieldDebug>>,
    cache: RefCell<BTreeMap<String, Value>>,
}

impl Record {
    /// Decoder-supplied value that is not a field (not shown in the tree).
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type", &self.ty.name)
            .field("values", &self.values)
            .field("io_len", &self.io.len())
            .finish()
    }
}

impl Composite for Record {
    fn type_name(&self) -> &str {
        &self.ty.name
    }

    fn seq_fields(&self) -> &[String] {
        &self.ty.seq
    }

    fn instance_fields(&self) -> &[String] {
        &self.ty.instance_names
    }

    fn seq_value(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn instance(&self, name: &str) -> Result<Value, ParseError> {
        if let Some(v) = self.cache.borrow().get(name) {
            return Ok(v.clone());
        }
        let f = self
            .ty
            .instances
            .get(name)
            .cloned()
            .ok_or_else(|| ParseError::Decode(format!("`{}` has no field `{}`", self.ty.name, name)))?;

        let mut io = Stream::new(self.io.clone());
        let v = f(self, &mut io)?;

        if let Some(start) = io.first_read() {
            let dbg = FieldDebug {
                span: Span::closed(start, io.pos().max(start)),
                arr: io.take_element_spans(),
            };
            self.debug.borrow_mut().insert(name.to_string(), dbg);
        }
        self.cache.borrow_mut().insert(name.to_string(), v.clone());
        Ok(v)
    }

    fn position(&self, name: &str) -> Option<FieldDebug> {
        self.debug.borrow().get(name).cloned()
    }

    fn io(&self) -> Buffer {
        self.io.clone()
    }
}

/// Incremental construction of a `Record` while reading a stream.
///
/// Every read records the field's start before decoding and its end after.
/// When a read fails the start stays recorded without an end, the value stays
/// nil (scalars) or partial (nested records and arrays), and the error is
/// returned so the caller can stop.
pub struct RecordBuilder {
    ty: Rc<RecordType>,
    io: Buffer,
    values: BTreeMap<String, Value>,
    params: BTreeMap<String, Value>,
    debug: BTreeMap<String, FieldDebug>,
}

impl RecordBuilder {
    pub fn new(ty: &Rc<RecordType>, io: &Stream) -> Self {
        Self {
            ty: ty.clone(),
            io: io.buffer().clone(),
            values: BTreeMap::new(),
            params: BTreeMap::new(),
            debug: BTreeMap::new(),
        }
    }

    pub fn param(&mut self, name: &str, value: Value) {
        self.params.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn read<F>(&mut self, name: &str, io: &mut Stream, f: F) -> Result<(), ParseError>
    where
        F: FnOnce(&mut Stream) -> Result<Value, ParseError>,
    {
        let start = io.pos();
        self.begin(name, start);
        let v = f(io)?;
        self.end(name, io.pos());
        self.values.insert(name.to_string(), v);
        Ok(())
    }

    /// Reads a nested record from `io`; the partial record is kept even when
    /// its decoding fails.
    pub fn read_struct<F>(&mut self, name: &str, io: &mut Stream, ty: &Rc<RecordType>, f: F) -> Result<(), ParseError>
    where
        F: FnOnce(&mut RecordBuilder, &mut Stream) -> Result<(), ParseError>,
    {
        let start = io.pos();
        self.begin(name, start);
        let mut child = RecordBuilder::new(ty, io);
        let res = f(&mut child, io);
        self.values.insert(name.to_string(), Value::Struct(child.finish()));
        res?;
        self.end(name, io.pos());
        Ok(())
    }

    /// Like `read_struct`, but the record lives in a substream of `size` bytes
    /// carved out of `io`. The field span is relative to `io`; the nested
    /// record's own spans are relative to the substream.
    pub fn read_substruct<F>(
        &mut self,
        name: &str,
        io: &mut Stream,
        size: usize,
        ty: &Rc<RecordType>,
        f: F,
    ) -> Result<(), ParseError>
    where
        F: FnOnce(&mut RecordBuilder, &mut Stream) -> Result<(), ParseError>,
    {
        let start = io.pos();
        self.begin(name, start);
        let mut sub = io.substream(size)?;
        let mut child = RecordBuilder::new(ty, &sub);
        let res = f(&mut child, &mut sub);
        self.values.insert(name.to_string(), Value::Struct(child.finish()));
        self.end(name, io.pos());
        res
    }

    /// Reads `count` elements. Elements decoded before a failure are kept.
    pub fn read_array<F>(&mut self, name: &str, io: &mut Stream, count: usize, mut f: F) -> Result<(), ParseError>
    where
        F: FnMut(&mut Stream, usize) -> Result<Value, ParseError>,
    {
        let start = io.pos();
        self.begin(name, start);
        let mut items = Vec::with_capacity(count.min(4096));
        let mut spans = Vec::with_capacity(count.min(4096));
        let mut res = Ok(());
        for i in 0..count {
            let el_start = io.pos();
            match f(io, i) {
                Ok(v) => {
                    spans.push(Span::closed(el_start, io.pos()));
                    items.push(v);
                }
                Err(e) => {
                    spans.push(Span::open(el_start));
                    res = Err(e);
                    break;
                }
            }
        }
        self.finish_array(name, io, items, spans, res)
    }

    /// Reads `count` nested records; a partially decoded last record is kept.
    pub fn read_struct_array<F>(
        &mut self,
        name: &str,
        io: &mut Stream,
        count: usize,
        ty: &Rc<RecordType>,
        mut f: F,
    ) -> Result<(), ParseError>
    where
        F: FnMut(&mut RecordBuilder, &mut Stream, usize) -> Result<(), ParseError>,
    {
        let start = io.pos();
        self.begin(name, start);
        let mut items = Vec::with_capacity(count.min(4096));
        let mut spans = Vec::with_capacity(count.min(4096));
        let mut res = Ok(());
        for i in 0..count {
            let el_start = io.pos();
            let mut child = RecordBuilder::new(ty, io);
            let r = f(&mut child, io, i);
            items.push(Value::Struct(child.finish()));
            match r {
                Ok(()) => spans.push(Span::closed(el_start, io.pos())),
                Err(e) => {
                    spans.push(Span::open(el_start));
                    res = Err(e);
                    break;
                }
            }
        }
        self.finish_array(name, io, items, spans, res)
    }

    fn finish_array(
        &mut self,
        name: &str,
        io: &Stream,
        items: Vec<Value>,
        spans: Vec<Span>,
        res: Result<(), ParseError>,
    ) -> Result<(), ParseError> {
        if let Some(dbg) = self.debug.get_mut(name) {
            dbg.arr = Some(spans);
        }
        self.values.insert(name.to_string(), Value::array(items));
        res?;
        self.end(name, io.pos());
        Ok(())
    }

    fn begin(&mut self, name: &str, start: usize) {
        self.debug.insert(
            name.to_string(),
            FieldDebug {
                span: Span::open(start),
                arr: None,
            },
        );
    }

    fn end(&mut self, name: &str, end: usize) {
        if let Some(dbg) = self.debug.get_mut(name) {
            dbg.span.end = Some(end);
        }
    }

    pub fn finish(self) -> Rc<Record> {
        Rc::new(Record {
            ty: self.ty,
            io: self.io,
            values: self.values,
            params: self.params,
            debug: RefCell::new(self.debug),
            cache: RefCell::new(BTreeMap::new()),
        })
    }
}
