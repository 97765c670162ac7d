use kelpie_error::{KelpieError, Result};

/// A forward-only reader over a borrowed byte slice.
///
/// Index values are parsed as a sequence of self-delimiting pieces (record
/// ids, type-bits); this reader is the shared scanning primitive.
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Wrap a byte slice.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether the reader is exhausted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(|| KelpieError::InvalidKey {
            detail: "unexpected end of buffer".to_owned(),
        })?;
        self.pos += 1;
        Ok(b)
    }

    /// Consume `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(KelpieError::InvalidKey {
                detail: format!("need {n} bytes, have {}", self.remaining()),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}
