//! Content hashing.
//!
//! Files are streamed through MD5 in fixed-size chunks; a file is never
//! loaded into memory as a whole.

use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Default read chunk (64KB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Streams file content through an MD5 digest and returns lowercase hex.
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    buffer_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl ContentHasher {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Hash the content of the file at `path`.
    ///
    /// # Returns
    /// * `Ok(String)` - 32 lowercase hex digits
    /// * `Err(io::Error)` - If the file vanished, is unreadable, or a read fails
    pub fn hash_file(&self, path: &Path) -> io::Result<String> {
        let file = File::open(path)?;
        self.hash_reader(file)
    }

    /// Hash everything `reader` yields.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> io::Result<String> {
        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => hasher.update(&buffer[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_known_digests() -> io::Result<()> {
        let hasher = ContentHasher::default();
        assert_eq!(
            hasher.hash_reader(&b""[..])?,
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            hasher.hash_reader(&b"hello world"[..])?,
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        Ok(())
    }

    #[test]
    fn test_chunk_size_does_not_change_digest() -> io::Result<()> {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let small = ContentHasher::new(7).hash_reader(&data[..])?;
        let large = ContentHasher::new(1 << 20).hash_reader(&data[..])?;
        assert_eq!(small, large);
        Ok(())
    }

    #[test]
    fn test_hash_file() -> io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"hello world")?;
        temp_file.flush()?;

        let hash = ContentHasher::default().hash_file(temp_file.path())?;
        assert_eq!(hash, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let result = ContentHasher::default().hash_file(Path::new("/nonexistent/file.bin"));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
