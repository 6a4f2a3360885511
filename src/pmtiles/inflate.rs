use std::io::{self, Read};

use flate2::read::{GzDecoder, ZlibDecoder};

use crate::pmtiles::types::Compression;

/// Fixed amount added on every growth step.
pub const GROWTH_INCREMENT: usize = 16 * 1024;
/// Most bytes handed to a single decoder read.
pub const READ_CHUNK: usize = 64 * 1024;

/// Output buffer for streaming decompression.
///
/// Growth is explicit: callers ask for a minimum capacity and the buffer
/// grows to at least twice its current capacity plus `GROWTH_INCREMENT`.
#[derive(Debug, Default)]
pub struct InflateBuffer {
    data: Vec<u8>,
}

impl InflateBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn spare(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    pub fn ensure_capacity(&mut self, min_capacity: usize) {
        let current = self.data.capacity();
        if current >= min_capacity {
            return;
        }
        let target = current
            .saturating_mul(2)
            .saturating_add(GROWTH_INCREMENT)
            .max(min_capacity);
        self.data.reserve_exact(target - self.data.len());
    }

    /// Reads once from `reader` into the spare capacity, at most
    /// `READ_CHUNK` bytes. Returns the number of bytes appended; zero means
    /// the stream has ended.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.spare() == 0 {
            self.ensure_capacity(self.data.capacity() + 1);
        }
        let start = self.data.len();
        let end = self.data.capacity().min(start + READ_CHUNK);
        self.data.resize(end, 0);
        loop {
            match reader.read(&mut self.data[start..end]) {
                Ok(n) => {
                    self.data.truncate(start + n);
                    return Ok(n);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.data.truncate(start);
                    return Err(err);
                }
            }
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

fn drain_into<R: Read>(mut reader: R, buffer: &mut InflateBuffer) -> io::Result<()> {
    while buffer.fill_from(&mut reader)? > 0 {}
    Ok(())
}

/// Inflates a gzip or zlib wrapped DEFLATE stream.
pub fn inflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut buffer = InflateBuffer::with_capacity(data.len().saturating_mul(2));
    if data.starts_with(&[0x1f, 0x8b]) {
        drain_into(GzDecoder::new(data), &mut buffer)?;
    } else {
        drain_into(ZlibDecoder::new(data), &mut buffer)?;
    }
    Ok(buffer.into_vec())
}

pub fn decompress(data: Vec<u8>, compression: Compression) -> io::Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data),
        Compression::Gzip => inflate(&data),
        other => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported compression: {other}"),
        )),
    }
}
