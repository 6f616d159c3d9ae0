//! Upload sink: streams the capture into an external command.
//!
//! The command is started when the sink is built and receives the payload on
//! stdin. On success it is expected to print the resulting URL as the first
//! non-empty line of stdout.

use std::{
    io::{self, Read, Write},
    process::{Child, ChildStdin, Command, Stdio},
    thread::{self, JoinHandle},
};

use url::Url;

use super::{
    sink::{Committed, Sink, SinkFactory},
    types::{CaptureError, EncodingMetadata, SinkDescriptor},
};

pub const UPLOAD_SINK_ID: &str = "upload";

/// Builds a [`CommandSink`] running `argv` for every capture.
///
/// `CAPTURECAST_MEDIA_TYPE` and `CAPTURECAST_EXTENSION` are set in the
/// command's environment.
#[derive(Debug, Clone)]
pub struct CommandSinkFactory {
    descriptor: SinkDescriptor,
    argv: Vec<String>,
}

impl CommandSinkFactory {
    pub fn new(argv: Vec<String>) -> Self {
        Self::with_descriptor(SinkDescriptor::new(UPLOAD_SINK_ID, "Upload"), argv)
    }

    pub fn with_descriptor(descriptor: SinkDescriptor, argv: Vec<String>) -> Self {
        Self { descriptor, argv }
    }
}

impl SinkFactory for CommandSinkFactory {
    fn descriptor(&self) -> &SinkDescriptor {
        &self.descriptor
    }

    fn create(&self, metadata: &EncodingMetadata) -> Result<Box<dyn Sink>, CaptureError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(CaptureError::SinkConstruction {
                sink: self.descriptor.name.clone(),
                reason: "no command configured".into(),
            });
        };

        let mut child = Command::new(program)
            .args(args)
            .env("CAPTURECAST_MEDIA_TYPE", &metadata.media_type)
            .env("CAPTURECAST_EXTENSION", &metadata.extension)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::SinkConstruction {
                sink: self.descriptor.name.clone(),
                reason: format!("failed to spawn {}: {}", program, e),
            })?;

        log::debug!("Started upload command {} (pid {})", program, child.id());
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut sink = CommandSink {
            program: program.clone(),
            child: Some(child),
            stdin,
            stdout: None,
            stderr: None,
        };

        // The command must never block on a full output pipe while stdin is
        // still being written.
        let construction = |e: io::Error| CaptureError::SinkConstruction {
            sink: self.descriptor.name.clone(),
            reason: format!("failed to start output reader: {}", e),
        };
        sink.stdout = stdout
            .map(|pipe| spawn_drain(pipe, "upload-stdout"))
            .transpose()
            .map_err(construction)?;
        sink.stderr = stderr
            .map(|pipe| spawn_drain(pipe, "upload-stderr"))
            .transpose()
            .map_err(construction)?;

        Ok(Box::new(sink))
    }
}

fn spawn_drain<R>(mut pipe: R, name: &str) -> io::Result<JoinHandle<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let mut buffer = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buffer) {
            log::debug!("Reading upload command output failed: {}", e);
        }
        buffer
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Write-only sink backed by a child process.
#[derive(Debug)]
pub struct CommandSink {
    program: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl Write for CommandSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "upload command stdin closed",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl Sink for CommandSink {
    fn commit(mut self: Box<Self>) -> Result<Committed, CaptureError> {
        // Closing stdin signals end of payload.
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| CaptureError::Upload("command already finished".into()))?;

        let status = child
            .wait()
            .map_err(|e| CaptureError::Upload(format!("failed to wait for {}: {}", self.program, e)))?;
        let stdout = collect(self.stdout.take());
        let stderr = collect(self.stderr.take());

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(CaptureError::Upload(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&stdout);
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| CaptureError::Upload(format!("{} printed no URL", self.program)))?;
        let url = Url::parse(line)
            .map_err(|e| CaptureError::Upload(format!("invalid URL '{}': {}", line, e)))?;

        log::info!("Upload finished: {}", url);
        Ok(Committed::new("Capture uploaded", url.to_string()).with_uri(url))
    }
}

impl Drop for CommandSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            log::debug!("Abandoning upload command {}", self.program);
            let _ = child.kill();
            let _ = child.wait();
        }
        // Readers are only joined once they are done; a leftover grandchild
        // may still hold the pipes open.
        if let Some(stderr) = self.stderr.take().filter(JoinHandle::is_finished) {
            let stderr = collect(Some(stderr));
            let message = String::from_utf8_lossy(&stderr);
            if !message.trim().is_empty() {
                log::debug!("{} stderr: {}", self.program, message.trim());
            }
        }
    }
}
