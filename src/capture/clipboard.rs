//! Clipboard sink for image captures.

use super::{
    sink::{Committed, MemorySink, Sink, SinkFactory, SinkReader},
    types::{CaptureError, EncodingMetadata, SinkDescriptor, ThreadAffinity},
};
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use wl_clipboard_rs::copy::{MimeType, Options, Source};

pub const CLIPBOARD_SINK_ID: &str = "clipboard";

/// Something that can place bytes on the clipboard.
pub trait ClipboardBackend: Send + Sync {
    fn copy(&self, data: &[u8], media_type: &str) -> Result<(), CaptureError>;
}

/// Wayland clipboard via `wl-copy`, falling back to wl-clipboard-rs.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaylandClipboard;

impl ClipboardBackend for WaylandClipboard {
    fn copy(&self, data: &[u8], media_type: &str) -> Result<(), CaptureError> {
        copy_to_clipboard(data, media_type)
    }
}

/// Copy data to the Wayland clipboard.
///
/// Prefers the wl-copy command (provided by the wl-clipboard package) and
/// falls back to the wl-clipboard-rs library if the command fails.
pub fn copy_to_clipboard(data: &[u8], media_type: &str) -> Result<(), CaptureError> {
    log::debug!(
        "Attempting to copy {} bytes of {} to clipboard",
        data.len(),
        media_type
    );

    match copy_via_command(data, media_type) {
        Ok(()) => {
            log::info!("Successfully copied to clipboard via wl-copy command");
            Ok(())
        }
        Err(cmd_err) => {
            log::warn!(
                "wl-copy command path failed ({}). Falling back to wl-clipboard-rs",
                cmd_err
            );
            match copy_via_library(data, media_type) {
                Ok(()) => {
                    log::info!("Successfully copied to clipboard via wl-clipboard-rs fallback");
                    Ok(())
                }
                Err(lib_err) => {
                    let combined = format!(
                        "wl-copy failed: {} ; wl-clipboard-rs failed: {}",
                        cmd_err, lib_err
                    );
                    Err(CaptureError::ClipboardError(combined))
                }
            }
        }
    }
}

fn copy_via_library(data: &[u8], media_type: &str) -> Result<(), CaptureError> {
    use wl_clipboard_rs::copy::ServeRequests;

    let mut opts = Options::new();
    // Serve one paste then exit
    opts.serve_requests(ServeRequests::Only(1));

    opts.copy(
        Source::Bytes(data.into()),
        MimeType::Specific(media_type.to_string()),
    )
    .map_err(|e| CaptureError::ClipboardError(format!("wl-clipboard-rs error: {}", e)))?;

    Ok(())
}

fn copy_via_command(data: &[u8], media_type: &str) -> Result<(), CaptureError> {
    let mut child = Command::new("wl-copy")
        .arg("--type")
        .arg(media_type)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            CaptureError::ClipboardError(format!(
                "Failed to spawn wl-copy (is it installed?): {}",
                e
            ))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(data).map_err(|e| {
            CaptureError::ClipboardError(format!("Failed to write to wl-copy stdin: {}", e))
        })?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| CaptureError::ClipboardError(format!("Failed to wait for wl-copy: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CaptureError::ClipboardError(format!(
            "wl-copy failed: {}",
            stderr.trim()
        )));
    }

    log::debug!("wl-copy command completed successfully");
    Ok(())
}

/// Builds [`ClipboardSink`]s. Only image payloads are accepted.
#[derive(Clone)]
pub struct ClipboardSinkFactory {
    descriptor: SinkDescriptor,
    backend: Arc<dyn ClipboardBackend>,
}

impl ClipboardSinkFactory {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(WaylandClipboard))
    }

    pub fn with_backend(backend: Arc<dyn ClipboardBackend>) -> Self {
        Self {
            descriptor: SinkDescriptor::new(CLIPBOARD_SINK_ID, "Copy to clipboard")
                .in_memory()
                .with_affinity(ThreadAffinity::dedicated(CLIPBOARD_SINK_ID)),
            backend,
        }
    }
}

impl Default for ClipboardSinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkFactory for ClipboardSinkFactory {
    fn descriptor(&self) -> &SinkDescriptor {
        &self.descriptor
    }

    fn create(&self, metadata: &EncodingMetadata) -> Result<Box<dyn Sink>, CaptureError> {
        if !metadata.is_image() {
            return Err(CaptureError::UnsupportedMedia {
                sink: self.descriptor.name.clone(),
                media_type: metadata.media_type.clone(),
            });
        }
        Ok(Box::new(ClipboardSink {
            buffer: MemorySink::new(),
            media_type: metadata.media_type.clone(),
            backend: Arc::clone(&self.backend),
        }))
    }
}

/// Buffers the capture and hands it to the clipboard on commit.
pub struct ClipboardSink {
    buffer: MemorySink,
    media_type: String,
    backend: Arc<dyn ClipboardBackend>,
}

impl Write for ClipboardSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for ClipboardSink {
    fn is_readable(&self) -> bool {
        true
    }

    fn open_reader(&self) -> io::Result<SinkReader> {
        self.buffer.open_reader()
    }

    fn commit(self: Box<Self>) -> Result<Committed, CaptureError> {
        if self.buffer.is_empty() {
            return Err(CaptureError::ClipboardError("nothing to copy".into()));
        }
        self.backend.copy(self.buffer.bytes(), &self.media_type)?;
        Ok(Committed::new(
            "Copied to clipboard",
            format!("{} ({} bytes)", self.media_type, self.buffer.len()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClipboard {
        copies: Mutex<Vec<(Vec<u8>, String)>>,
    }

    impl ClipboardBackend for RecordingClipboard {
        fn copy(&self, data: &[u8], media_type: &str) -> Result<(), CaptureError> {
            self.copies
                .lock()
                .unwrap()
                .push((data.to_vec(), media_type.to_string()));
            Ok(())
        }
    }

    fn metadata(media_type: &str) -> EncodingMetadata {
        EncodingMetadata {
            media_type: media_type.into(),
            extension: "bin".into(),
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn descriptor_requests_dedicated_thread_and_memory() {
        let factory = ClipboardSinkFactory::new();
        let descriptor = factory.descriptor();
        assert!(descriptor.prefers_memory);
        assert_eq!(
            descriptor.affinity,
            ThreadAffinity::Dedicated(CLIPBOARD_SINK_ID.into())
        );
    }

    #[test]
    fn rejects_non_image_payloads() {
        let factory = ClipboardSinkFactory::new();
        match factory.create(&metadata("video/x-capturecast-frames")) {
            Err(CaptureError::UnsupportedMedia { media_type, .. }) => {
                assert_eq!(media_type, "video/x-capturecast-frames");
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("video payloads must be rejected"),
        }
    }

    #[test]
    fn commit_hands_buffer_to_backend() {
        let backend = Arc::new(RecordingClipboard::default());
        let factory = ClipboardSinkFactory::with_backend(backend.clone());

        let mut sink = factory.create(&metadata("image/png")).unwrap();
        sink.write_all(b"png bytes").unwrap();
        assert!(sink.is_readable());
        let committed = sink.commit().unwrap();

        assert_eq!(committed.title, "Copied to clipboard");
        let copies = backend.copies.lock().unwrap();
        assert_eq!(copies.as_slice(), &[(b"png bytes".to_vec(), "image/png".to_string())]);
    }

    #[test]
    fn empty_buffer_fails_commit() {
        let backend = Arc::new(RecordingClipboard::default());
        let factory = ClipboardSinkFactory::with_backend(backend.clone());
        let sink = factory.create(&metadata("image/png")).unwrap();
        assert!(sink.commit().is_err());
        assert!(backend.copies.lock().unwrap().is_empty());
    }
}
