use crate::error::Error;
use image::DynamicImage;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Frame access through the `ffprobe`/`ffmpeg` binaries. Every call is
/// bounded by a timeout; a child that overruns is killed.
#[derive(Debug, Clone)]
pub struct VideoTools {
    ffmpeg: String,
    ffprobe: String,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
struct FfInfo {
    #[serde(default)]
    streams: Vec<FfStream>,
    format: Option<FfFormat>,
}

#[derive(Debug, Deserialize)]
struct FfStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfFormat {
    duration: Option<String>,
}

impl VideoTools {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn inspect(&self, path: &Path) -> Result<VideoInfo, Error> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height:format=duration",
                "-of",
                "json",
            ])
            .arg(path);
        let output = run_with_timeout(&mut command, &self.ffprobe, self.timeout)?;

        if !output.status.success() {
            return Err(Error::Video(format!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_info(&output.stdout)
    }

    /// Decode one frame at `seconds` into an image.
    pub fn frame_at(&self, path: &Path, seconds: f64) -> Result<DynamicImage, Error> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-v", "error", "-ss", &format!("{:.3}", seconds), "-i"])
            .arg(path)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "pipe:1"]);
        let output = run_with_timeout(&mut command, &self.ffmpeg, self.timeout)?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(Error::Video(format!(
                "no frame at {:.3}s in {}",
                seconds,
                path.display()
            )));
        }
        Ok(image::load_from_memory(&output.stdout)?)
    }

    /// Decode up to `samples` frames evenly spread over the duration.
    /// Frames that fail are dropped.
    pub fn sample_frames(&self, path: &Path, samples: usize) -> Result<Vec<DynamicImage>, Error> {
        let info = self.inspect(path)?;
        let mut frames = Vec::with_capacity(samples);
        for t in sample_times(info.duration, samples) {
            match self.frame_at(path, t) {
                Ok(frame) => frames.push(frame),
                Err(e) => warn!("Dropping frame sample: {}", e),
            }
        }
        debug!(
            "Sampled {}/{} frames from {}",
            frames.len(),
            samples,
            path.display()
        );
        Ok(frames)
    }
}

/// Run `command` to completion, capturing stdout and stderr, or kill it
/// once `timeout` has passed.
fn run_with_timeout(command: &mut Command, program: &str, timeout: Duration) -> Result<Output, Error> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Video(format!("failed to run {}: {}", program, e)))?;

    // A child blocks once a pipe fills, so both are drained while waiting.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Video(format!(
                    "{} timed out after {:.1}s",
                    program,
                    timeout.as_secs_f64()
                )));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(Error::Video(format!("waiting for {}: {}", program, e)));
            }
        }
    };

    let collect = |reader: Option<thread::JoinHandle<Vec<u8>>>| {
        reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    };
    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn parse_info(stdout: &[u8]) -> Result<VideoInfo, Error> {
    let parsed: FfInfo = serde_json::from_slice(stdout)
        .map_err(|e| Error::Video(format!("unreadable ffprobe output: {}", e)))?;
    let stream = parsed
        .streams
        .first()
        .ok_or_else(|| Error::Video("no video stream".to_string()))?;
    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);
    Ok(VideoInfo {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        duration,
    })
}

/// Midpoints of `samples` equal slices of the clip. Unknown duration
/// collapses to a single sample at the start.
pub fn sample_times(duration: f64, samples: usize) -> Vec<f64> {
    if duration <= 0.0 || samples == 0 {
        return vec![0.0];
    }
    (0..samples)
        .map(|i| duration * (i as f64 + 0.5) / samples as f64)
        .collect()
}
