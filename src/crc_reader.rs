//! Reader that checks a decompressed entry against its central directory record
//!
//! The CRC-32 half follows zip-rs:
//! <https://github.com/mvdnes/zip-rs/commit/b3c836d9c32efa120cdd5366280f940d3c3b985c>

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Validates the CRC-32 and the uncompressed length when it reaches EOF.
pub struct VerifyingReader<R> {
    inner: R,
    hasher: Hasher,
    expected_checksum: u32,
    expected_size: u64,
    seen: u64,
}

impl<R> VerifyingReader<R> {
    pub fn new(inner: R, expected_checksum: u32, expected_size: u64) -> VerifyingReader<R> {
        VerifyingReader {
            inner,
            hasher: Hasher::new(),
            expected_checksum,
            expected_size,
            seen: 0,
        }
    }

    fn verify(&self) -> io::Result<()> {
        if self.seen != self.expected_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "taille incorrecte ({} octets lus, {} attendus)",
                    self.seen, self.expected_size
                ),
            ));
        }
        let actual = self.hasher.clone().finalize();
        if actual != self.expected_checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "somme de contrôle CRC-32 invalide ({actual:08x}, {:08x} attendue)",
                    self.expected_checksum
                ),
            ));
        }
        Ok(())
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        if count == 0 && !buf.is_empty() {
            self.verify()?;
            return Ok(0);
        }
        self.seen += count as u64;
        // Decompression bombs: stop as soon as we pass the advertised size.
        if self.seen > self.expected_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("plus de {} octets décompressés", self.expected_size),
            ));
        }
        self.hasher.update(&buf[0..count]);
        Ok(count)
    }
}
