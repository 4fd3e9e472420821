//! Single-worker chunk reader
//!
//! Reads run on the blocking pool one at a time. The caller waits on the
//! in-flight read with a timeout; when the timeout passes it logs, sleeps
//! briefly and keeps waiting on the same read, so a slow device never
//! starts a second concurrent read.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

/// Job file handle shared between the dispatch loop and the read worker
pub type SharedFile = Arc<Mutex<File>>;

/// Reads fixed-size chunks from a job file
#[derive(Debug, Clone)]
pub struct ChunkReader {
    chunk_size: usize,
    timeout: Duration,
    retry: Duration,
}

impl ChunkReader {
    /// Create a reader
    pub fn new(chunk_size: usize, timeout: Duration, retry: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            timeout,
            retry,
        }
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read the next chunk; an empty chunk means end of file
    pub async fn read(&self, file: &SharedFile) -> io::Result<Vec<u8>> {
        let file = Arc::clone(file);
        let size = self.chunk_size;
        let mut task = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; size];
            let mut file = file.lock();
            let mut filled = 0;
            while filled < size {
                match file.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            buf.truncate(filled);
            Ok(buf)
        });

        loop {
            match tokio::time::timeout(self.timeout, &mut task).await {
                Ok(joined) => return joined.map_err(io::Error::other)?,
                Err(_) => {
                    tracing::info!("Read worker still busy");
                    tokio::time::sleep(self.retry).await;
                }
            }
        }
    }
}

/// Move the file cursor to `pos`
pub fn seek(file: &SharedFile, pos: u64) -> io::Result<()> {
    file.lock().seek(SeekFrom::Start(pos)).map(|_| ())
}

/// Read up to `len` bytes at `pos` without disturbing the loop's cursor
///
/// Only safe while no chunk read is in flight.
pub fn read_at(file: &SharedFile, pos: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut file = file.lock();
    let saved = file.stream_position()?;
    file.seek(SeekFrom::Start(pos))?;
    let mut buf = Vec::with_capacity(len);
    let result = (&mut *file).take(len as u64).read_to_end(&mut buf);
    file.seek(SeekFrom::Start(saved))?;
    result.map(|_| buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn shared(content: &[u8]) -> SharedFile {
        let mut tmp = tempfile::tempfile().unwrap();
        tmp.write_all(content).unwrap();
        tmp.seek(SeekFrom::Start(0)).unwrap();
        Arc::new(Mutex::new(tmp))
    }

    #[tokio::test]
    async fn test_reads_in_chunks_until_eof() {
        let file = shared(b"0123456789");
        let reader = ChunkReader::new(4, Duration::from_secs(1), Duration::from_millis(1));
        assert_eq!(reader.read(&file).await.unwrap(), b"0123");
        assert_eq!(reader.read(&file).await.unwrap(), b"4567");
        assert_eq!(reader.read(&file).await.unwrap(), b"89");
        assert!(reader.read(&file).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seek_and_read_at() {
        let file = shared(b"G1 X1\nG1 X2\n");
        seek(&file, 6).unwrap();
        assert_eq!(read_at(&file, 0, 5).unwrap(), b"G1 X1");
        let reader = ChunkReader::new(64, Duration::from_secs(1), Duration::from_millis(1));
        assert_eq!(reader.read(&file).await.unwrap(), b"G1 X2\n");
    }
}
