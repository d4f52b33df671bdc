//! Host-side ports used by the probes: where test images go and where
//! USB evidence comes from.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info};

use crate::aggregator::RunSummary;
use crate::error::{Error, Result};
use crate::traits::{FourCC, Frame};

/// Destination for frames captured by the "Capture Test Image" probe.
pub trait ImageSink: Send + Sync {
    /// Persist `frame` under a name derived from `name` and return where it
    /// was written.
    fn save(&self, frame: &Frame, name: &str) -> Result<PathBuf>;
}

/// Output encoding for [`DirectoryImageSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageEncoding {
    /// Lossless PNG.
    #[default]
    Png,
    /// JPEG. MJPG frames are written without re-encoding.
    Jpeg,
}

impl ImageEncoding {
    const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// Writes images into a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirectoryImageSink {
    dir: PathBuf,
    encoding: ImageEncoding,
}

impl DirectoryImageSink {
    /// Sink writing PNG files into `dir`.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            encoding: ImageEncoding::Png,
        }
    }

    /// Choose the output encoding.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: ImageEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ImageSink for DirectoryImageSink {
    fn save(&self, frame: &Frame, name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("{name}.{}", self.encoding.extension()));

        if self.encoding == ImageEncoding::Jpeg && frame.fourcc == FourCC::MJPG {
            fs::write(&path, &frame.data)?;
        } else {
            let rgb = frame.to_rgb()?;
            let image = RgbImage::from_raw(frame.width, frame.height, rgb).ok_or_else(|| {
                Error::ImageSink(format!(
                    "{}x{} {} frame does not fill an RGB image",
                    frame.width, frame.height, frame.fourcc
                ))
            })?;
            image
                .save(&path)
                .map_err(|err| Error::ImageSink(err.to_string()))?;
        }

        info!(path = %path.display(), "test image saved");
        Ok(path)
    }
}

/// Source of free-text device listings from the host.
pub trait ProcessInfo: Send + Sync {
    /// Return the listing text.
    fn query(&self) -> Result<String>;
}

const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs a listing command and returns its standard output. A command that
/// outlives its timeout is killed.
#[derive(Debug, Clone)]
pub struct CommandProcessInfo {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProcessInfo {
    /// Run `program` with `args`.
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_owned(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }

    /// Kill the command if it has not exited after `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn read_stdout(&self, child: &mut Child) -> thread::JoinHandle<String> {
        let pipe = child.stdout.take();
        let program = self.program.clone();
        thread::spawn(move || {
            let mut text = Vec::new();
            if let Some(mut pipe) = pipe {
                if let Err(err) = pipe.read_to_end(&mut text) {
                    debug!(%program, error = %err, "listing output truncated");
                }
            }
            String::from_utf8_lossy(&text).into_owned()
        })
    }

    /// The host's USB listing command: `system_profiler SPUSBDataType` on
    /// macOS, `lsusb` elsewhere.
    #[must_use]
    pub fn usb_listing() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("system_profiler", ["SPUSBDataType"])
        } else {
            Self::new("lsusb", Vec::<String>::new())
        }
    }
}

impl ProcessInfo for CommandProcessInfo {
    fn query(&self) -> Result<String> {
        debug!(program = %self.program, args = ?self.args, "querying process info");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| Error::ProcessInfo(format!("{}: {err}", self.program)))?;
        // Stdout is drained concurrently; a full pipe would block the child
        // before it exits.
        let reader = self.read_stdout(&mut child);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    if let Err(err) = child.kill() {
                        debug!(program = %self.program, error = %err, "kill failed");
                    }
                    let _ = child.wait();
                    let _ = reader.join();
                    return Err(Error::ProcessInfo(format!(
                        "{} timed out after {} ms",
                        self.program,
                        self.timeout.as_millis()
                    )));
                }
                Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::ProcessInfo(format!("{}: {err}", self.program)));
                }
            }
        };

        let stdout = reader
            .join()
            .map_err(|_| Error::ProcessInfo(format!("{}: output reader panicked", self.program)))?;
        if !status.success() {
            return Err(Error::ProcessInfo(format!("{} exited with {status}", self.program)));
        }
        Ok(stdout)
    }
}

/// Consumer of finished run summaries.
pub trait ReportSink {
    /// Publish `summary` for the camera identified by `camera`.
    fn publish(&mut self, camera: &str, summary: &RunSummary) -> Result<()>;
}
