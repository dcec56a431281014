use crate::error::ParseError;
use crate::value::{Buffer, Span, Value};
use std::rc::Rc;

/// Positioned reader over a shared byte buffer.
///
/// Besides the usual integer/byte reads it keeps two bits of bookkeeping used
/// by the position oracle: the offset of the first read since creation (the
/// start of whatever a computed field consumed) and the per-element spans of
/// the last `repeat` call.
#[derive(Debug, Clone)]
pub struct Stream {
    buf: Buffer,
    pos: usize,
    first_read: Option<usize>,
    last_elements: Option<Vec<Span>>,
}

impl Stream {
    pub fn new(buf: Buffer) -> Self {
        Self {
            buf,
            pos: 0,
            first_read: None,
            last_elements: None,
        }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self::new(Rc::from(bytes))
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buf
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), ParseError> {
        if pos > self.buf.len() {
            return Err(ParseError::Eof {
                pos,
                requested: 0,
                available: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Offset of the first read performed on this stream, if any.
    pub fn first_read(&self) -> Option<usize> {
        self.first_read
    }

    /// Element spans recorded by the most recent `repeat`.
    pub fn take_element_spans(&mut self) -> Option<Vec<Span>> {
        self.last_elements.take()
    }

    fn take(&mut self, n: usize) -> Result<&[u8], ParseError> {
        self.first_read.get_or_insert(self.pos);
        let available = self.buf.len().saturating_sub(self.pos);
        if n > available {
            return Err(ParseError::Eof {
                pos: self.pos,
                requested: n,
                available,
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..start + n])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        let mut a = [0u8; N];
        a.copy_from_slice(self.take(N)?);
        Ok(a)
    }

    pub fn read_u1(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_s1(&mut self) -> Result<i8, ParseError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_u2le(&mut self) -> Result<u16, ParseError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u4le(&mut self) -> Result<u32, ParseError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u8le(&mut self) -> Result<u64, ParseError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_s2le(&mut self) -> Result<i16, ParseError> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_s4le(&mut self) -> Result<i32, ParseError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_s8le(&mut self) -> Result<i64, ParseError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_u2be(&mut self) -> Result<u16, ParseError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_u4be(&mut self) -> Result<u32, ParseError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u8be(&mut self) -> Result<u64, ParseError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn read_f4le(&mut self) -> Result<f32, ParseError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f8le(&mut self) -> Result<f64, ParseError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Rc<[u8]>, ParseError> {
        Ok(Rc::from(self.take(n)?))
    }

    pub fn read_bytes_full(&mut self) -> Result<Rc<[u8]>, ParseError> {
        let n = self.buf.len().saturating_sub(self.pos);
        self.read_bytes(n)
    }

    /// Reads `n` bytes and checks them against `expected`.
    pub fn ensure_fixed_contents(&mut self, field: &str, expected: &[u8]) -> Result<Rc<[u8]>, ParseError> {
        let got = self.read_bytes(expected.len())?;
        if &got[..] != expected {
            return Err(ParseError::Validation {
                field: field.to_string(),
                message: format!("expected {:02X?}, got {:02X?}", expected, &got[..]),
            });
        }
        Ok(got)
    }

    pub fn read_str_utf8(&mut self, n: usize) -> Result<String, ParseError> {
        let bytes = self.take(n)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| ParseError::Decode(format!("invalid UTF-8: {e}")))
    }

    /// Carves `n` bytes into a stream of its own; positions inside it are
    /// relative to the new buffer.
    pub fn substream(&mut self, n: usize) -> Result<Stream, ParseError> {
        let bytes = self.take(n)?;
        Ok(Stream::new(Rc::from(bytes)))
    }

    /// Reads `count` elements, remembering each element's span.
    pub fn repeat<F>(&mut self, count: usize, mut f: F) -> Result<Vec<Value>, ParseError>
    where
        F: FnMut(&mut Stream, usize) -> Result<Value, ParseError>,
    {
        let mut out = Vec::with_capacity(count.min(4096));
        let mut spans = Vec::with_capacity(count.min(4096));
        for i in 0..count {
            let start = self.pos;
            let v = f(self, i)?;
            spans.push(Span::closed(start, self.pos));
            out.push(v);
        }
        self.last_elements = Some(spans);
        Ok(out)
    }

    /// Like `repeat`, but element `i` is read starting at `offsets[i]`.
    pub fn repeat_at<F>(&mut self, offsets: &[usize], mut f: F) -> Result<Vec<Value>, ParseError>
    where
        F: FnMut(&mut Stream, usize) -> Result<Value, ParseError>,
    {
        let mut out = Vec::with_capacity(offsets.len());
        let mut spans = Vec::with_capacity(offsets.len());
        for (i, &start) in offsets.iter().enumerate() {
            self.seek(start)?;
            let v = f(self, i)?;
            spans.push(Span::closed(start, self.pos));
            out.push(v);
        }
        self.last_elements = Some(spans);
        Ok(out)
    }
}
