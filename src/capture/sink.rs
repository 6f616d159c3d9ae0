//! The sink abstraction every output destination implements.

use std::{
    fmt,
    io::{self, Cursor, Read, Write},
    sync::Arc,
};

use url::Url;

use super::types::{CaptureError, EncodingMetadata, OperationOutcome, SinkDescriptor};

/// Independent reader over a sink's written bytes.
pub type SinkReader = Box<dyn Read + Send>;

/// A writable byte destination bound to a single capture operation.
///
/// Lifecycle: constructed by a [`SinkFactory`], written (by the encoder or by a
/// fan-out copy), committed exactly once, then dropped. Dropping without a
/// commit abandons the output.
pub trait Sink: Write + Send {
    /// Whether [`Sink::open_reader`] can replay the written bytes from the start.
    fn is_readable(&self) -> bool {
        false
    }

    /// Opens a reader positioned at the first written byte.
    ///
    /// Every call returns a reader with its own cursor so concurrent workers
    /// never share a read position.
    fn open_reader(&self) -> io::Result<SinkReader> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "sink cannot be read back",
        ))
    }

    /// Finalizes the sink.
    fn commit(self: Box<Self>) -> Result<Committed, CaptureError>;
}

/// Success details returned by [`Sink::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub uri: Option<Url>,
    pub title: String,
    pub content: String,
}

impl Committed {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            uri: None,
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn with_uri(mut self, uri: Url) -> Self {
        self.uri = Some(uri);
        self
    }
}

impl From<Committed> for OperationOutcome {
    fn from(committed: Committed) -> Self {
        OperationOutcome::Success {
            uri: committed.uri,
            title: committed.title,
            content: committed.content,
        }
    }
}

/// Builds sinks of one kind.
pub trait SinkFactory: Send + Sync {
    fn descriptor(&self) -> &SinkDescriptor;

    fn create(&self, metadata: &EncodingMetadata) -> Result<Box<dyn Sink>, CaptureError>;
}

type CreateFn = dyn Fn(&EncodingMetadata) -> Result<Box<dyn Sink>, CaptureError> + Send + Sync;

/// Factory backed by a closure.
pub struct FnSinkFactory {
    descriptor: SinkDescriptor,
    create: Box<CreateFn>,
}

impl FnSinkFactory {
    pub fn new<F>(descriptor: SinkDescriptor, create: F) -> Self
    where
        F: Fn(&EncodingMetadata) -> Result<Box<dyn Sink>, CaptureError> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            create: Box::new(create),
        }
    }
}

impl SinkFactory for FnSinkFactory {
    fn descriptor(&self) -> &SinkDescriptor {
        &self.descriptor
    }

    fn create(&self, metadata: &EncodingMetadata) -> Result<Box<dyn Sink>, CaptureError> {
        (self.create)(metadata)
    }
}

impl fmt::Debug for FnSinkFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSinkFactory")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct SharedBuffer(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Growable in-memory buffer sink.
///
/// Used as the master fallback and as the storage behind memory-backed sinks.
/// Readers share the buffer instead of copying it.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Arc<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Only clones if a reader is still alive, which never happens while encoding.
        Arc::make_mut(&mut self.buffer).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for MemorySink {
    fn is_readable(&self) -> bool {
        true
    }

    fn open_reader(&self) -> io::Result<SinkReader> {
        Ok(Box::new(Cursor::new(SharedBuffer(Arc::clone(&self.buffer)))))
    }

    fn commit(self: Box<Self>) -> Result<Committed, CaptureError> {
        Ok(Committed::new(
            "Capture buffered",
            format!("{} bytes held in memory", self.len()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_readers_have_independent_cursors() {
        let mut sink = MemorySink::new();
        sink.write_all(b"hello world").unwrap();

        let mut first = sink.open_reader().unwrap();
        let mut head = [0u8; 5];
        first.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"hello");

        let mut second = sink.open_reader().unwrap();
        let mut all = Vec::new();
        second.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"hello world");
    }

    #[test]
    fn memory_sink_commit_reports_size() {
        let mut sink = Box::new(MemorySink::new());
        sink.write_all(&[0; 42]).unwrap();
        let committed = sink.commit().unwrap();
        assert!(committed.content.contains("42 bytes"));
        assert!(committed.uri.is_none());
    }

    #[test]
    fn fn_factory_forwards_metadata() {
        let factory = FnSinkFactory::new(SinkDescriptor::new("mem", "Memory"), |metadata| {
            if metadata.width == 0 {
                Err(CaptureError::Encode("empty".into()))
            } else {
                Ok(Box::new(MemorySink::new()) as Box<dyn Sink>)
            }
        });
        let mut metadata = EncodingMetadata {
            media_type: "image/png".into(),
            extension: "png".into(),
            width: 4,
            height: 4,
        };
        assert!(factory.create(&metadata).is_ok());
        metadata.width = 0;
        assert!(factory.create(&metadata).is_err());
        assert_eq!(factory.descriptor().id, "mem");
    }
}
