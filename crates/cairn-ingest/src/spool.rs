//! Staging area for an upload's bytes while they are hashed.

use std::io;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use cairn_store::Content;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

enum Sink {
    Memory(BytesMut),
    File {
        temp: NamedTempFile,
        writer: tokio::fs::File,
    },
}

/// Collects body chunks in memory, switching to a temporary file once the
/// threshold is crossed.
pub(crate) struct Spool {
    sink: Sink,
    threshold: u64,
    dir: Option<PathBuf>,
    written: u64,
}

impl Spool {
    /// A spool for a body of `expected` bytes. Bodies already known to be
    /// larger than `threshold` go straight to disk.
    pub(crate) fn new(expected: u64, threshold: u64, dir: Option<PathBuf>) -> io::Result<Self> {
        let mut spool = Self {
            sink: Sink::Memory(BytesMut::new()),
            threshold,
            dir,
            written: 0,
        };
        if expected > threshold {
            spool.sink = spool.open_file()?;
        } else {
            spool.sink = Sink::Memory(BytesMut::with_capacity(expected as usize));
        }
        Ok(spool)
    }

    fn open_file(&self) -> io::Result<Sink> {
        let temp = match &self.dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                tempfile::Builder::new().prefix("cairn-spool-").tempfile_in(dir)?
            }
            None => tempfile::Builder::new().prefix("cairn-spool-").tempfile()?,
        };
        let writer = tokio::fs::File::from_std(temp.reopen()?);
        tracing::debug!(path = %temp.path().display(), "spooling upload to disk");
        Ok(Sink::File { temp, writer })
    }

    pub(crate) async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.written += chunk.len() as u64;
        if let Sink::Memory(buf) = &self.sink {
            if self.written > self.threshold {
                let buffered = buf.clone().freeze();
                self.sink = self.open_file()?;
                self.write_file(&buffered).await?;
            }
        }
        match &mut self.sink {
            Sink::Memory(buf) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
            Sink::File { writer, .. } => writer.write_all(chunk).await,
        }
    }

    async fn write_file(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.sink {
            Sink::File { writer, .. } => writer.write_all(data).await,
            Sink::Memory(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
        }
    }

    pub(crate) fn is_on_disk(&self) -> bool {
        matches!(self.sink, Sink::File { .. })
    }

    /// Flush everything and hand the bytes over as store [`Content`].
    pub(crate) async fn finish(self) -> io::Result<Content> {
        match self.sink {
            Sink::Memory(buf) => Ok(Content::Memory(Bytes::from(buf))),
            Sink::File { temp, mut writer } => {
                writer.flush().await?;
                writer.sync_data().await?;
                Ok(Content::Spooled(temp))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn small_body_stays_in_memory() {
        let mut spool = Spool::new(5, 16, None).unwrap();
        spool.write(b"hel").await.unwrap();
        spool.write(b"lo").await.unwrap();
        assert!(!spool.is_on_disk());
        let content = spool.finish().await.unwrap();
        assert!(matches!(content, Content::Memory(_)));
        assert_eq!(&content.into_bytes().await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn crossing_threshold_moves_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = Spool::new(4, 8, Some(dir.path().to_path_buf())).unwrap();
        spool.write(b"12345").await.unwrap();
        assert!(!spool.is_on_disk());
        spool.write(b"67890").await.unwrap();
        assert!(spool.is_on_disk());

        let content = spool.finish().await.unwrap();
        assert_eq!(content.len().unwrap(), 10);
        assert!(matches!(content, Content::Spooled(_)));
        assert_eq!(&content.into_bytes().await.unwrap()[..], b"1234567890");
    }

    #[tokio::test]
    async fn large_declared_length_starts_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(100, 8, Some(dir.path().join("spool"))).unwrap();
        assert!(spool.is_on_disk());
        assert_eq!(std::fs::read_dir(dir.path().join("spool")).unwrap().count(), 1);
    }
}
