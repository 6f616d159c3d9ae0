//! File sink: writes the capture to a timestamped file.

use super::{
    sink::{Committed, Sink, SinkFactory, SinkReader},
    types::{CaptureError, EncodingMetadata, SinkDescriptor},
};
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use url::Url;

pub const FILE_SINK_ID: &str = "file";

/// Configuration for file saving.
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Directory to save captures to.
    pub save_directory: PathBuf,
    /// Filename template (supports chrono format specifiers).
    pub filename_template: String,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            save_directory: dirs::picture_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("Capturecast"),
            filename_template: "capture_%Y-%m-%d_%H%M%S".to_string(),
        }
    }
}

/// Generate a filename based on the template and current time.
///
/// # Arguments
/// * `template` - Template string with chrono format specifiers
/// * `extension` - File extension (e.g., "ppm")
pub fn generate_filename(template: &str, extension: &str) -> String {
    let now = Local::now();
    let filename = now.format(template).to_string();
    format!("{}.{}", filename, extension)
}

/// Ensure the save directory exists, creating it if necessary.
///
/// # Returns
/// The canonicalized path to the directory
pub fn ensure_directory_exists(directory: &Path) -> Result<PathBuf, CaptureError> {
    if !directory.exists() {
        log::info!("Creating capture directory: {}", directory.display());
        fs::create_dir_all(directory)?;
    }

    let canonical = directory
        .canonicalize()
        .unwrap_or_else(|_| directory.to_path_buf());

    Ok(canonical)
}

/// Expand tilde (~) in path strings.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}

/// Builds a [`FileSink`] per capture.
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    descriptor: SinkDescriptor,
    config: FileSinkConfig,
}

impl FileSinkFactory {
    pub fn new(config: FileSinkConfig) -> Self {
        Self {
            descriptor: SinkDescriptor::new(FILE_SINK_ID, "Save to file"),
            config,
        }
    }
}

impl SinkFactory for FileSinkFactory {
    fn descriptor(&self) -> &SinkDescriptor {
        &self.descriptor
    }

    fn create(&self, metadata: &EncodingMetadata) -> Result<Box<dyn Sink>, CaptureError> {
        let directory = ensure_directory_exists(&self.config.save_directory)?;
        let filename = generate_filename(&self.config.filename_template, &metadata.extension);
        let sink = FileSink::create(&directory, &filename)?;
        log::debug!("Writing capture to {}", sink.path.display());
        Ok(Box::new(sink))
    }
}

/// A newly created file that can be re-read while it is being filled.
///
/// The file is removed if the sink is dropped without a commit.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
    written: u64,
    committed: bool,
}

impl FileSink {
    /// Creates `name` inside `directory`, adding a numeric suffix rather than
    /// overwriting an existing file.
    pub fn create(directory: &Path, name: &str) -> Result<Self, CaptureError> {
        let (stem, extension) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, Some(ext)),
            None => (name, None),
        };

        for attempt in 0u32..1000 {
            let candidate = match (attempt, extension) {
                (0, _) => name.to_string(),
                (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
                (n, None) => format!("{stem}-{n}"),
            };
            let path = directory.join(candidate);
            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => {
                    return Ok(Self {
                        path,
                        file,
                        written: 0,
                        committed: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(CaptureError::SinkConstruction {
            sink: FILE_SINK_ID.to_string(),
            reason: format!("no free filename for {} in {}", name, directory.display()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.file.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Sink for FileSink {
    fn is_readable(&self) -> bool {
        true
    }

    fn open_reader(&self) -> io::Result<SinkReader> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn commit(mut self: Box<Self>) -> Result<Committed, CaptureError> {
        self.file.flush()?;
        self.file.sync_all()?;

        // Set permissions to user read/write only
        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, Permissions::from_mode(0o600))?;
        }

        let uri = Url::from_file_path(&self.path).map_err(|()| CaptureError::Commit {
            sink: FILE_SINK_ID.to_string(),
            reason: format!("{} is not an absolute path", self.path.display()),
        })?;

        log::info!(
            "Capture saved successfully: {} ({} bytes)",
            self.path.display(),
            self.written
        );
        self.committed = true;
        Ok(Committed::new("Capture saved", self.path.display().to_string()).with_uri(uri))
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if !self.committed {
            log::debug!("Discarding uncommitted capture file {}", self.path.display());
            if let Err(err) = fs::remove_file(&self.path) {
                log::warn!("Failed to remove {}: {}", self.path.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn metadata() -> EncodingMetadata {
        EncodingMetadata {
            media_type: "image/x-portable-pixmap".into(),
            extension: "ppm".into(),
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn test_generate_filename() {
        let filename = generate_filename("test_%Y%m%d", "ppm");
        assert!(filename.starts_with("test_"));
        assert!(filename.ends_with(".ppm"));
        assert!(filename.contains("20"));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/Pictures");
        assert!(!expanded.to_string_lossy().starts_with("~"));

        let no_tilde = expand_tilde("/absolute/path");
        assert_eq!(no_tilde, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_default_config() {
        let config = FileSinkConfig::default();
        assert!(
            config
                .save_directory
                .to_string_lossy()
                .contains("Capturecast")
        );
    }

    #[test]
    fn commit_returns_file_uri() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FileSinkFactory::new(FileSinkConfig {
            save_directory: dir.path().join("nested"),
            filename_template: "shot".into(),
        });

        let mut sink = factory.create(&metadata()).unwrap();
        sink.write_all(b"P6 data").unwrap();
        let committed = sink.commit().unwrap();

        let uri = committed.uri.unwrap();
        assert_eq!(uri.scheme(), "file");
        let path = uri.to_file_path().unwrap();
        assert!(path.ends_with("shot.ppm"));
        assert_eq!(fs::read(&path).unwrap(), b"P6 data");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn readers_start_at_the_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(dir.path(), "master.bin").unwrap();
        sink.write_all(b"0123456789").unwrap();
        sink.flush().unwrap();

        let mut first = sink.open_reader().unwrap();
        let mut second = sink.open_reader().unwrap();
        let mut head = [0u8; 4];
        first.read_exact(&mut head).unwrap();
        let mut all = Vec::new();
        second.read_to_end(&mut all).unwrap();
        assert_eq!(&head, b"0123");
        assert_eq!(all, b"0123456789");
    }

    #[test]
    fn existing_files_are_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shot.ppm"), b"old").unwrap();

        let sink = Box::new(FileSink::create(dir.path(), "shot.ppm").unwrap());
        assert!(sink.path().ends_with("shot-1.ppm"));
        sink.commit().unwrap();
        assert_eq!(fs::read(dir.path().join("shot.ppm")).unwrap(), b"old");
    }

    #[test]
    fn uncommitted_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut sink = FileSink::create(dir.path(), "partial.ppm").unwrap();
            sink.write_all(b"half").unwrap();
            sink.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
