/// Scale of the fixed-point float encoding. Values survive a round trip only
/// down to `1 / FIXED_POINT_SCALE`; anything finer is truncated away.
pub const FIXED_POINT_SCALE: f64 = 100_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("buffer out of range: {needed} bytes requested, {remaining} remaining")]
    OutOfRange { needed: usize, remaining: usize },
    #[error("free space exceeded: {needed} bytes requested, {remaining} available")]
    CapacityExceeded { needed: usize, remaining: usize },
    #[error("length {len} does not fit its prefix")]
    LengthOverflow { len: usize },
    #[error("string is not valid utf-16")]
    InvalidString,
}

#[derive(Debug)]
pub struct NetReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> NetReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], StreamError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(StreamError::OutOfRange { needed, remaining });
        }
        let bytes = &self.buffer[self.position..self.position + needed];
        self.position += needed;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.read_u8()? == 1)
    }

    pub fn read_u16(&mut self) -> Result<u16, StreamError> {
        self.take_array().map(u16::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, StreamError> {
        self.take_array().map(u32::from_be_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, StreamError> {
        self.take_array().map(u64::from_be_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64, StreamError> {
        self.take_array().map(i64::from_be_bytes)
    }

    pub fn read_float(&mut self) -> Result<f64, StreamError> {
        Ok(self.read_i64()? as f64 / FIXED_POINT_SCALE)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], StreamError> {
        self.take(len)
    }

    pub fn read_u16s(&mut self, count: usize) -> Result<Vec<u16>, StreamError> {
        (0..count).map(|_| self.read_u16()).collect()
    }

    pub fn read_u32s(&mut self, count: usize) -> Result<Vec<u32>, StreamError> {
        (0..count).map(|_| self.read_u32()).collect()
    }

    pub fn read_u64s(&mut self, count: usize) -> Result<Vec<u64>, StreamError> {
        (0..count).map(|_| self.read_u64()).collect()
    }

    /// Reads a UTF-16 string prefixed by its length in code units (4 bytes).
    pub fn read_string(&mut self) -> Result<String, StreamError> {
        let len = self.read_u32()? as usize;
        let units = self.read_u16s(len)?;
        String::from_utf16(&units).map_err(|_| StreamError::InvalidString)
    }
}

#[derive(Debug, Clone)]
pub struct NetWriter {
    buffer: Vec<u8>,
    capacity: usize,
}

impl NetWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        let remaining = self.remaining();
        if bytes.len() > remaining {
            return Err(StreamError::CapacityExceeded {
                needed: bytes.len(),
                remaining,
            });
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), StreamError> {
        self.put(&[value])
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), StreamError> {
        self.write_u8(u8::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), StreamError> {
        self.put(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), StreamError> {
        self.put(&value.to_be_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), StreamError> {
        self.put(&value.to_be_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<(), StreamError> {
        self.put(&value.to_be_bytes())
    }

    /// Writes `value * FIXED_POINT_SCALE` truncated to an 8-byte integer.
    pub fn write_float(&mut self, value: f64) -> Result<(), StreamError> {
        self.write_i64((value * FIXED_POINT_SCALE) as i64)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.put(bytes)
    }

    pub fn write_u16s(&mut self, values: &[u16]) -> Result<(), StreamError> {
        values.iter().try_for_each(|v| self.write_u16(*v))
    }

    pub fn write_u32s(&mut self, values: &[u32]) -> Result<(), StreamError> {
        values.iter().try_for_each(|v| self.write_u32(*v))
    }

    pub fn write_u64s(&mut self, values: &[u64]) -> Result<(), StreamError> {
        values.iter().try_for_each(|v| self.write_u64(*v))
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), StreamError> {
        let units: Vec<u16> = value.encode_utf16().collect();
        let len = u32::try_from(units.len())
            .map_err(|_| StreamError::LengthOverflow { len: units.len() })?;
        let needed = 4 + units.len() * 2;
        if needed > self.remaining() {
            return Err(StreamError::CapacityExceeded {
                needed,
                remaining: self.remaining(),
            });
        }
        self.write_u32(len)?;
        self.write_u16s(&units)
    }
}
