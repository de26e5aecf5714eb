//! Bit-addressable stream codec.
//!
//! [`BitReader`] wraps any [`Read`] source and serves reads of 1..=8 bits, whole bytes and
//! multi-byte integers in either byte order, plus "read until end of stream" arrays.
//! [`BitWriter`] is the mirror image over any [`Write`] sink.
//!
//! ## Bit order
//!
//! Bits are always extracted LSB-first from an internal one-byte buffer. In
//! [`BitOrder::Msb0`] mode every byte is bit-reversed as it is loaded from (or written to)
//! the underlying stream, so reading a byte in MSB0 mode yields the LSB0 value with its
//! eight bits reversed.
//!
//! ## Byte counter
//!
//! Both sides keep a running count of whole bytes consumed/produced. A partially consumed
//! byte is counted once its last bit is read or when it is discarded by an align. The
//! counter can be reset mid-stream (the `reset$$` directive) and is what the `$$`
//! expression token observes.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::io::{self, Read, Write};

/// Byte order for multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// Order in which bits of a stream byte are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    /// Least significant bit first (bytes are used as they are).
    #[default]
    Lsb0,
    /// Most significant bit first (every byte is bit-reversed on load/store).
    Msb0,
}

impl BitOrder {
    #[inline]
    fn apply(self, b: u8) -> u8 {
        match self {
            BitOrder::Lsb0 => b,
            BitOrder::Msb0 => b.reverse_bits(),
        }
    }
}

/// Bound on the number of items a whole-stream array may collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayLimit {
    #[default]
    Unlimited,
    /// Stop silently after this many items even if data remains.
    Truncate(usize),
    /// Fail with [`StreamError::ArrayLimitExceeded`] if data remains after this many items.
    Fail(usize),
}

impl ArrayLimit {
    /// Called when more data is available and `read` items were collected so far.
    /// Returns `Ok(false)` when collection must stop.
    pub fn admit(&self, read: usize) -> Result<bool, StreamError> {
        match *self {
            ArrayLimit::Unlimited => Ok(true),
            ArrayLimit::Truncate(max) => Ok(read < max),
            ArrayLimit::Fail(max) if read < max => Ok(true),
            ArrayLimit::Fail(max) => Err(StreamError::ArrayLimitExceeded { limit: max }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    #[error("end of data: got {read} of {requested}")]
    EndOfData { requested: usize, read: usize },
    #[error("bit count must be in 1..=8, got {0}")]
    InvalidBitCount(u32),
    #[error("whole-stream array exceeds limit of {limit} items")]
    ArrayLimitExceeded { limit: usize },
    #[error("invalid string length prefix 0x{0:02x}")]
    InvalidStringPrefix(u8),
    #[error("string is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl StreamError {
    pub fn is_end_of_data(&self) -> bool {
        match self {
            StreamError::EndOfData { .. } => true,
            StreamError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

fn check_bit_count(n: u32) -> Result<(), StreamError> {
    if (1..=8).contains(&n) {
        Ok(())
    } else {
        Err(StreamError::InvalidBitCount(n))
    }
}

#[inline]
fn low_mask(n: u32) -> u32 {
    (1u32 << n) - 1
}

/// Reader over a type-erased source, as handed to field processors.
pub type DynBitReader<'a> = BitReader<dyn Read + 'a>;

/// Bit-level reader. See the [module docs](self).
pub struct BitReader<R: ?Sized> {
    bit_order: BitOrder,
    bit_buffer: u8,
    bits_in_buffer: u8,
    /// Byte fetched by [`BitReader::has_available_data`], already bit-order adjusted.
    peeked: Option<u8>,
    counter: u64,
    /// Bytes pulled from `inner`; never reset.
    pulled: u64,
    inner: R,
}

impl<R: Read> BitReader<R> {
    pub fn new(inner: R, bit_order: BitOrder) -> Self {
        BitReader {
            bit_order,
            bit_buffer: 0,
            bits_in_buffer: 0,
            peeked: None,
            counter: 0,
            pulled: 0,
            inner,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + ?Sized> BitReader<R> {
    pub fn bit_order(&self) -> BitOrder {
        self.bit_order
    }

    /// Whole bytes consumed since creation or the last [`reset_counter`](Self::reset_counter).
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn reset_counter(&mut self) {
        self.counter = 0;
    }

    /// True when a byte is partially consumed.
    pub fn has_buffered_bits(&self) -> bool {
        self.bits_in_buffer > 0
    }

    /// Bits consumed since creation. Unaffected by peeks and counter resets.
    pub fn bit_position(&self) -> u64 {
        let bytes = self.pulled - u64::from(self.peeked.is_some());
        bytes * 8 - u64::from(self.bits_in_buffer)
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.peeked.take() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.pulled += 1;
                    return Ok(Some(self.bit_order.apply(buf[0])));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Read `n` bits (1..=8). Returns `Ok(None)` when the stream is exhausted before the
    /// first bit; running out in the middle of the value is an error.
    pub fn read_bits_opt(&mut self, n: u32) -> Result<Option<u8>, StreamError> {
        self.take_bits(n, false)
    }

    /// Like [`read_bits_opt`](Self::read_bits_opt), but `partial` returns the bits read
    /// so far when the stream ends inside the value.
    fn take_bits(&mut self, n: u32, partial: bool) -> Result<Option<u8>, StreamError> {
        check_bit_count(n)?;
        if self.bits_in_buffer == 0 && n == 8 {
            let b = self.next_byte()?;
            if b.is_some() {
                self.counter += 1;
            }
            return Ok(b);
        }
        let mut result = 0u32;
        let mut got = 0u32;
        while got < n {
            if self.bits_in_buffer == 0 {
                match self.next_byte()? {
                    Some(b) => {
                        self.bit_buffer = b;
                        self.bits_in_buffer = 8;
                    }
                    None if got == 0 => return Ok(None),
                    None if partial => break,
                    None => {
                        return Err(StreamError::EndOfData {
                            requested: n as usize,
                            read: got as usize,
                        })
                    }
                }
            }
            let take = (n - got).min(self.bits_in_buffer as u32);
            let buffer = self.bit_buffer as u32;
            result |= (buffer & low_mask(take)) << got;
            self.bit_buffer = (buffer >> take) as u8;
            self.bits_in_buffer -= take as u8;
            got += take;
            if self.bits_in_buffer == 0 {
                self.counter += 1;
            }
        }
        Ok(Some(result as u8))
    }

    /// Read `n` bits (1..=8), failing at end of stream.
    pub fn read_bits(&mut self, n: u32) -> Result<u8, StreamError> {
        self.read_bits_opt(n)?
            .ok_or(StreamError::EndOfData { requested: n as usize, read: 0 })
    }

    /// Peek whether at least one more bit can be read. Does not consume anything.
    pub fn has_available_data(&mut self) -> Result<bool, StreamError> {
        if self.bits_in_buffer > 0 || self.peeked.is_some() {
            return Ok(true);
        }
        match self.next_byte()? {
            Some(b) => {
                self.peeked = Some(b);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop the rest of a partially consumed byte.
    pub fn align_to_byte(&mut self) {
        if self.bits_in_buffer > 0 {
            self.bits_in_buffer = 0;
            self.bit_buffer = 0;
            self.counter += 1;
        }
    }

    /// Align to a byte boundary, then consume whole bytes until the counter is a multiple of `n`.
    pub fn align(&mut self, n: u64) -> Result<(), StreamError> {
        self.align_to_byte();
        if n > 1 {
            while self.counter % n != 0 {
                self.read_u8()?;
            }
        }
        Ok(())
    }

    /// Skip up to `n` bytes; returns how many were actually skipped.
    pub fn skip(&mut self, n: u64) -> Result<u64, StreamError> {
        if n == 0 {
            return Ok(0);
        }
        if self.bits_in_buffer == 0 {
            let mut skipped = 0u64;
            if self.peeked.take().is_some() {
                skipped = 1;
            }
            if skipped < n {
                let mut rest = (&mut self.inner).take(n - skipped);
                let copied = io::copy(&mut rest, &mut io::sink())?;
                self.pulled += copied;
                skipped += copied;
            }
            self.counter += skipped;
            Ok(skipped)
        } else {
            let mut skipped = 0u64;
            while skipped < n {
                if self.read_bits_opt(8)?.is_none() {
                    break;
                }
                skipped += 1;
            }
            Ok(skipped)
        }
    }

    fn read_byte_array<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        let mut buf = [0u8; N];
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self
                .read_bits_opt(8)?
                .ok_or(StreamError::EndOfData { requested: N, read: i })?;
        }
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        self.read_bits(8)
    }
    pub fn read_i8(&mut self) -> Result<i8, StreamError> {
        Ok(self.read_bits(8)? as i8)
    }
    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.read_u8()? != 0)
    }
    pub fn read_u16(&mut self, order: Endianness) -> Result<u16, StreamError> {
        let b = self.read_byte_array::<2>()?;
        Ok(match order {
            Endianness::Big => BigEndian::read_u16(&b),
            Endianness::Little => LittleEndian::read_u16(&b),
        })
    }
    pub fn read_i16(&mut self, order: Endianness) -> Result<i16, StreamError> {
        Ok(self.read_u16(order)? as i16)
    }
    pub fn read_u32(&mut self, order: Endianness) -> Result<u32, StreamError> {
        let b = self.read_byte_array::<4>()?;
        Ok(match order {
            Endianness::Big => BigEndian::read_u32(&b),
            Endianness::Little => LittleEndian::read_u32(&b),
        })
    }
    pub fn read_i32(&mut self, order: Endianness) -> Result<i32, StreamError> {
        Ok(self.read_u32(order)? as i32)
    }
    pub fn read_u64(&mut self, order: Endianness) -> Result<u64, StreamError> {
        let b = self.read_byte_array::<8>()?;
        Ok(match order {
            Endianness::Big => BigEndian::read_u64(&b),
            Endianness::Little => LittleEndian::read_u64(&b),
        })
    }
    pub fn read_i64(&mut self, order: Endianness) -> Result<i64, StreamError> {
        Ok(self.read_u64(order)? as i64)
    }
    pub fn read_f32(&mut self, order: Endianness) -> Result<f32, StreamError> {
        Ok(f32::from_bits(self.read_u32(order)?))
    }
    pub fn read_f64(&mut self, order: Endianness) -> Result<f64, StreamError> {
        Ok(f64::from_bits(self.read_u64(order)?))
    }

    /// Length-prefixed UTF-8 string; `None` is the encoded null marker.
    ///
    /// Prefix byte: `0x00` empty, `0xFF` null, below `0x80` the length itself,
    /// `0x8N` (N in 1..=4) the length in the next N bytes in the given byte order.
    pub fn read_string(&mut self, order: Endianness) -> Result<Option<String>, StreamError> {
        let prefix = self.read_u8()?;
        let len = match prefix {
            0x00 => return Ok(Some(String::new())),
            0xFF => return Ok(None),
            p if p < 0x80 => p as usize,
            p @ 0x81..=0x84 => {
                let n = (p & 0x0F) as usize;
                let mut buf = [0u8; 4];
                for (i, slot) in buf[..n].iter_mut().enumerate() {
                    *slot = self
                        .read_bits_opt(8)?
                        .ok_or(StreamError::EndOfData { requested: n, read: i })?;
                }
                let len = match order {
                    Endianness::Big => BigEndian::read_uint(&buf[..n], n),
                    Endianness::Little => LittleEndian::read_uint(&buf[..n], n),
                };
                len as usize
            }
            p => return Err(StreamError::InvalidStringPrefix(p)),
        };
        let mut bytes = Vec::with_capacity(len.min(4096));
        for i in 0..len {
            match self.read_bits_opt(8)? {
                Some(b) => bytes.push(b),
                None => return Err(StreamError::EndOfData { requested: len, read: i }),
            }
        }
        Ok(Some(String::from_utf8(bytes)?))
    }

    /// Shared array loop: `Some(count)` reads exactly `count` items, `None` reads until the
    /// stream is exhausted or `limit` stops it.
    fn read_items<T>(
        &mut self,
        count: Option<usize>,
        limit: ArrayLimit,
        mut read_one: impl FnMut(&mut Self) -> Result<T, StreamError>,
    ) -> Result<Vec<T>, StreamError> {
        match count {
            Some(n) => {
                let mut out = Vec::with_capacity(n.min(4096));
                for i in 0..n {
                    match read_one(self) {
                        Ok(v) => out.push(v),
                        Err(e) if e.is_end_of_data() => {
                            return Err(StreamError::EndOfData { requested: n, read: i })
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(out)
            }
            None => {
                let mut out = Vec::new();
                while self.has_available_data()? {
                    if !limit.admit(out.len())? {
                        break;
                    }
                    out.push(read_one(self)?);
                }
                Ok(out)
            }
        }
    }

    pub fn read_bits_array(
        &mut self,
        n: u32,
        count: Option<usize>,
        limit: ArrayLimit,
    ) -> Result<Vec<u8>, StreamError> {
        check_bit_count(n)?;
        match count {
            Some(_) => self.read_items(count, limit, |r| r.read_bits(n)),
            // The last item may be cut short by the end of the stream.
            None => self.read_items(None, limit, |r| Ok(r.take_bits(n, true)?.unwrap_or(0))),
        }
    }
    pub fn read_bool_array(&mut self, count: Option<usize>, limit: ArrayLimit) -> Result<Vec<bool>, StreamError> {
        self.read_items(count, limit, |r| r.read_bool())
    }
    pub fn read_u8_array(&mut self, count: Option<usize>, limit: ArrayLimit) -> Result<Vec<u8>, StreamError> {
        self.read_items(count, limit, |r| r.read_u8())
    }
    pub fn read_i8_array(&mut self, count: Option<usize>, limit: ArrayLimit) -> Result<Vec<i8>, StreamError> {
        self.read_items(count, limit, |r| r.read_i8())
    }
    pub fn read_u16_array(
        &mut self,
        order: Endianness,
        count: Option<usize>,
        limit: ArrayLimit,
    ) -> Result<Vec<u16>, StreamError> {
        self.read_items(count, limit, |r| r.read_u16(order))
    }
    pub fn read_i16_array(
        &mut self,
        order: Endianness,
        count: Option<usize>,
        limit: ArrayLimit,
    ) -> Result<Vec<i16>, StreamError> {
        self.read_items(count, limit, |r| r.read_i16(order))
    }
    pub fn read_u32_array(
        &mut self,
        order: Endianness,
        count: Option<usize>,
        limit: ArrayLimit,
    ) -> Result<Vec<u32>, StreamError> {
        self.read_items(count, limit, |r| r.read_u32(order))
    }
    pub fn read_i32_array(
        &mut self,
        order: Endianness,
        count: Option<usize>,
        limit: ArrayLimit,
    ) -> Result<Vec<i32>, StreamError> {
        self.read_items(count, limit, |r| r.read_i32(order))
    }
    pub fn read_i64_array(
        &mut self,
        order: Endianness,
        count: Option<usize>,
        limit: ArrayLimit,
    ) -> Result<Vec<i64>, StreamError> {
        self.read_items(count, limit, |r| r.read_i64(order))
    }
    pub fn read_f32_array(
        &mut self,
        order: Endianness,
        count: Option<usize>,
        limit: ArrayLimit,
    ) -> Result<Vec<f32>, StreamError> {
        self.read_items(count, limit, |r| r.read_f32(order))
    }
    pub fn read_f64_array(
        &mut self,
        order: Endianness,
        count: Option<usize>,
        limit: ArrayLimit,
    ) -> Result<Vec<f64>, StreamError> {
        self.read_items(count, limit, |r| r.read_f64(order))
    }
    pub fn read_string_array(
        &mut self,
        order: Endianness,
        count: Option<usize>,
        limit: ArrayLimit,
    ) -> Result<Vec<Option<String>>, StreamError> {
        self.read_items(count, limit, |r| r.read_string(order))
    }
}

/// Bit-level writer, the mirror of [`BitReader`].
pub struct BitWriter<W> {
    bit_order: BitOrder,
    bit_buffer: u8,
    bits_in_buffer: u8,
    counter: u64,
    inner: W,
}

impl<W: Write> BitWriter<W> {
    pub fn new(inner: W, bit_order: BitOrder) -> Self {
        BitWriter {
            bit_order,
            bit_buffer: 0,
            bits_in_buffer: 0,
            counter: 0,
            inner,
        }
    }

    /// Flush pending bits and return the sink.
    pub fn into_inner(mut self) -> Result<W, StreamError> {
        self.flush()?;
        Ok(self.inner)
    }

    /// Whole bytes emitted so far (pending bits are not counted).
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn reset_counter(&mut self) {
        self.counter = 0;
    }

    fn emit(&mut self, b: u8) -> Result<(), StreamError> {
        self.inner.write_all(&[self.bit_order.apply(b)])?;
        self.counter += 1;
        Ok(())
    }

    /// Write the low `n` bits (1..=8) of `value`.
    pub fn write_bits(&mut self, n: u32, value: u8) -> Result<(), StreamError> {
        check_bit_count(n)?;
        if self.bits_in_buffer == 0 && n == 8 {
            return self.emit(value);
        }
        let mut v = value as u32 & low_mask(n);
        let mut remaining = n;
        while remaining > 0 {
            let free = 8 - self.bits_in_buffer as u32;
            let take = remaining.min(free);
            let merged = self.bit_buffer as u32 | ((v & low_mask(take)) << self.bits_in_buffer);
            self.bit_buffer = merged as u8;
            self.bits_in_buffer += take as u8;
            v >>= take;
            remaining -= take;
            if self.bits_in_buffer == 8 {
                let b = self.bit_buffer;
                self.bit_buffer = 0;
                self.bits_in_buffer = 0;
                self.emit(b)?;
            }
        }
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        for &b in bytes {
            self.write_bits(8, b)?;
        }
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), StreamError> {
        self.write_bits(8, v)
    }
    pub fn write_i8(&mut self, v: i8) -> Result<(), StreamError> {
        self.write_bits(8, v as u8)
    }
    pub fn write_bool(&mut self, v: bool) -> Result<(), StreamError> {
        self.write_u8(v as u8)
    }
    pub fn write_u16(&mut self, v: u16, order: Endianness) -> Result<(), StreamError> {
        let mut b = [0u8; 2];
        match order {
            Endianness::Big => BigEndian::write_u16(&mut b, v),
            Endianness::Little => LittleEndian::write_u16(&mut b, v),
        }
        self.write_bytes(&b)
    }
    pub fn write_i16(&mut self, v: i16, order: Endianness) -> Result<(), StreamError> {
        self.write_u16(v as u16, order)
    }
    pub fn write_u32(&mut self, v: u32, order: Endianness) -> Result<(), StreamError> {
        let mut b = [0u8; 4];
        match order {
            Endianness::Big => BigEndian::write_u32(&mut b, v),
            Endianness::Little => LittleEndian::write_u32(&mut b, v),
        }
        self.write_bytes(&b)
    }
    pub fn write_i32(&mut self, v: i32, order: Endianness) -> Result<(), StreamError> {
        self.write_u32(v as u32, order)
    }
    pub fn write_u64(&mut self, v: u64, order: Endianness) -> Result<(), StreamError> {
        let mut b = [0u8; 8];
        match order {
            Endianness::Big => BigEndian::write_u64(&mut b, v),
            Endianness::Little => LittleEndian::write_u64(&mut b, v),
        }
        self.write_bytes(&b)
    }
    pub fn write_i64(&mut self, v: i64, order: Endianness) -> Result<(), StreamError> {
        self.write_u64(v as u64, order)
    }
    pub fn write_f32(&mut self, v: f32, order: Endianness) -> Result<(), StreamError> {
        self.write_u32(v.to_bits(), order)
    }
    pub fn write_f64(&mut self, v: f64, order: Endianness) -> Result<(), StreamError> {
        self.write_u64(v.to_bits(), order)
    }

    /// Inverse of [`BitReader::read_string`].
    pub fn write_string(&mut self, v: Option<&str>, order: Endianness) -> Result<(), StreamError> {
        let s = match v {
            None => return self.write_u8(0xFF),
            Some(s) => s,
        };
        let len = s.len();
        if len < 0x80 {
            self.write_u8(len as u8)?;
        } else {
            let n = match len {
                0..=0xFF => 1,
                0x100..=0xFFFF => 2,
                0x1_0000..=0xFF_FFFF => 3,
                _ => 4,
            };
            self.write_u8(0x80 | n as u8)?;
            let mut buf = [0u8; 4];
            match order {
                Endianness::Big => BigEndian::write_uint(&mut buf[..n], len as u64, n),
                Endianness::Little => LittleEndian::write_uint(&mut buf[..n], len as u64, n),
            }
            self.write_bytes(&buf[..n])?;
        }
        self.write_bytes(s.as_bytes())
    }

    /// Emit a partially filled byte, zero padded.
    pub fn align_to_byte(&mut self) -> Result<(), StreamError> {
        if self.bits_in_buffer > 0 {
            let b = self.bit_buffer;
            self.bit_buffer = 0;
            self.bits_in_buffer = 0;
            self.emit(b)?;
        }
        Ok(())
    }

    /// Align to a byte boundary, then pad with zero bytes until the counter is a multiple of `n`.
    pub fn align(&mut self, n: u64) -> Result<(), StreamError> {
        self.align_to_byte()?;
        if n > 1 {
            while self.counter % n != 0 {
                self.emit(0)?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), StreamError> {
        self.align_to_byte()?;
        self.inner.flush()?;
        Ok(())
    }
}
