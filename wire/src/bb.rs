use std::str;
use thiserror::Error;

/// Failure while reading from a [`ByteBuffer`]. Every variant carries the
/// byte offset at which the read started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("unexpected end of buffer at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("invalid boolean byte {value} at offset {offset}")]
    InvalidBool { offset: usize, value: u8 },

    #[error("var-int at offset {offset} does not fit in 32 bits")]
    Overflow { offset: usize },

    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },
}

/// A byte buffer meant for reading.
///
/// ```
/// let mut bb = protoplex_wire::ByteBuffer::new(&[240, 159, 141, 149, 0, 172, 2]);
/// assert_eq!(bb.read_string(), Ok("🍕"));
/// assert_eq!(bb.read_var_uint(), Ok(300));
/// ```
pub struct ByteBuffer<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> ByteBuffer<'a> {
    /// Create a new ByteBuffer that wraps the provided byte slice.
    pub fn new(data: &'a [u8]) -> ByteBuffer<'a> {
        ByteBuffer { data, index: 0 }
    }

    /// Retrieves the underlying byte slice.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Current read offset. Starts at 0 and ends at `data().len()` once
    /// everything has been consumed.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns `true` once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.index >= self.data.len()
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        let offset = self.index;
        match self.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(WireError::InvalidBool { offset, value }),
        }
    }

    pub fn read_byte(&mut self) -> Result<u8, WireError> {
        match self.data.get(self.index) {
            Some(&value) => {
                self.index += 1;
                Ok(value)
            }
            None => Err(WireError::UnexpectedEof { offset: self.index }),
        }
    }

    /// Read exactly `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .index
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(WireError::UnexpectedEof { offset: self.index })?;
        let value = &self.data[self.index..end];
        self.index = end;
        Ok(value)
    }

    /// Read a zigzag-encoded variable-length signed 32-bit integer.
    pub fn read_var_int(&mut self) -> Result<i32, WireError> {
        let value = self.read_var_uint()?;
        Ok((if (value & 1) != 0 {
            !(value >> 1)
        } else {
            value >> 1
        }) as i32)
    }

    /// Read a variable-length unsigned 32-bit integer. At most five bytes are
    /// consumed; a fifth byte carrying bits above 32 is rejected.
    pub fn read_var_uint(&mut self) -> Result<u32, WireError> {
        let offset = self.index;
        let mut shift: u32 = 0;
        let mut result: u32 = 0;

        loop {
            let byte = self.read_byte()?;
            if shift == 28 && (byte & 0xF0) != 0 {
                return Err(WireError::Overflow { offset });
            }
            result |= ((byte & 127) as u32) << shift;
            shift += 7;

            if (byte & 128) == 0 {
                return Ok(result);
            }
            if shift >= 35 {
                return Err(WireError::Overflow { offset });
            }
        }
    }

    /// Read a NUL-terminated UTF-8 string. The returned slice aliases the
    /// underlying memory.
    pub fn read_string(&mut self) -> Result<&'a str, WireError> {
        let start = self.index;
        let len = self.data[start.min(self.data.len())..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(WireError::UnexpectedEof { offset: start })?;

        let bytes = &self.data[start..start + len];
        self.index = start + len + 1;
        str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8 { offset: start })
    }

    /// Read a var-uint count followed by that many NUL-terminated strings.
    pub fn read_string_list(&mut self) -> Result<Vec<&'a str>, WireError> {
        let count = self.read_var_uint()? as usize;
        let mut items = Vec::with_capacity(count.min(self.data.len()));
        for _ in 0..count {
            items.push(self.read_string()?);
        }
        Ok(items)
    }
}

/// A byte buffer meant for writing.
///
/// ```
/// let mut bb = protoplex_wire::ByteBufferMut::new();
/// bb.write_string("🍕");
/// bb.write_var_uint(300);
/// assert_eq!(bb.data(), [240, 159, 141, 149, 0, 172, 2]);
/// ```
#[derive(Debug, Default)]
pub struct ByteBufferMut {
    data: Vec<u8>,
}

impl ByteBufferMut {
    pub fn new() -> ByteBufferMut {
        ByteBufferMut { data: vec![] }
    }

    /// Consumes this buffer and returns the bytes written so far.
    pub fn data(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.push(if value { 1 } else { 0 });
    }

    pub fn write_byte(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Write raw bytes without a length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.data.extend_from_slice(value);
    }

    /// Write a zigzag-encoded variable-length signed 32-bit integer.
    pub fn write_var_int(&mut self, value: i32) {
        self.write_var_uint(((value << 1) ^ (value >> 31)) as u32);
    }

    pub fn write_var_uint(&mut self, mut value: u32) {
        loop {
            let byte = value as u8 & 127;
            value >>= 7;

            if value == 0 {
                self.write_byte(byte);
                return;
            }

            self.write_byte(byte | 128);
        }
    }

    /// Write a string followed by a NUL terminator. Interior NUL bytes would
    /// truncate the value on read, so they are stripped.
    pub fn write_string(&mut self, value: &str) {
        self.data
            .extend(value.as_bytes().iter().copied().filter(|&b| b != 0));
        self.data.push(0);
    }

    pub fn write_string_list<S: AsRef<str>>(&mut self, values: &[S]) {
        self.write_var_uint(values.len() as u32);
        for value in values {
            self.write_string(value.as_ref());
        }
    }
}
