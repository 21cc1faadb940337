use std::{
    io::{self, Read},
    path::PathBuf,
    process::{Child, ChildStderr, ChildStdout, Command, Stdio},
    thread,
};

use anyhow::anyhow;
use chrono::Utc;
use tracing::{debug, warn};

use crate::types::{DecodeError, Frame, FrameFormat};

/// Decoder invocation for a single video file.
#[derive(Clone, Debug)]
pub struct DecoderSettings {
    /// Decoder executable, normally `ffmpeg` resolved through `PATH`.
    pub program: PathBuf,
    pub input: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl DecoderSettings {
    /// Build the ffmpeg command line that writes scaled `rgb24` frames to stdout.
    pub fn command(&self) -> Command {
        let scale_arg = format!("scale={}:{}", self.width, self.height);
        let mut cmd = Command::new(&self.program);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(&self.input)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg(FrameFormat::Rgb8.ffmpeg_pix_fmt())
            .arg("-vf")
            .arg(&scale_arg)
            .arg("pipe:1");
        cmd
    }
}

/// Splits a raw video byte stream into fixed-size frames.
///
/// A short read at end of input terminates the sequence; the trailing partial
/// frame is discarded rather than padded.
pub struct RawFrameReader<R> {
    reader: R,
    width: u32,
    height: u32,
    frame_bytes: usize,
    exhausted: bool,
}

impl<R: Read> RawFrameReader<R> {
    pub fn new(reader: R, width: u32, height: u32) -> Self {
        let frame_bytes = Frame::byte_len(width, height, FrameFormat::Rgb8);
        Self {
            reader,
            width,
            height,
            frame_bytes,
            exhausted: frame_bytes == 0,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Read the next complete frame, or `None` once the input is exhausted.
    pub fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < buffer.len() {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.exhausted = true;
                    return Err(err);
                }
            }
        }

        if filled < self.frame_bytes {
            if filled > 0 {
                debug!(
                    discarded = filled,
                    frame_bytes = self.frame_bytes,
                    "dropping partial trailing frame"
                );
            }
            self.exhausted = true;
            return Ok(None);
        }

        Ok(Some(Frame {
            data: buffer,
            width: self.width,
            height: self.height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Rgb8,
        }))
    }
}

impl<R: Read> Iterator for RawFrameReader<R> {
    type Item = io::Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_frame().transpose()
    }
}

/// Lazily decoded frames from a managed decoder child process.
///
/// Yields `Ok(frame)` until the decoder's stdout is exhausted, then reaps the
/// process and yields a single [`DecodeError::ProcessFailed`] if it exited
/// unsuccessfully. The sequence is fused after that.
pub struct FrameSource {
    child: Option<Child>,
    reader: RawFrameReader<ChildStdout>,
    stderr_drain: Option<thread::JoinHandle<String>>,
    finished: bool,
}

impl FrameSource {
    /// Spawn ffmpeg for `settings.input`.
    pub fn ffmpeg(settings: &DecoderSettings) -> Result<Self, DecodeError> {
        Self::spawn(settings.command(), settings.width, settings.height)
    }

    /// Spawn an arbitrary decoder that writes packed RGB frames of
    /// `width`x`height` to stdout.
    pub fn spawn(mut cmd: Command, width: u32, height: u32) -> Result<Self, DecodeError> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero, got {width}x{height}").into());
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let program = cmd.get_program().to_string_lossy().into_owned();
        let mut child = cmd
            .spawn()
            .map_err(|source| DecodeError::Spawn { program, source })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                reap(&mut child);
                return Err(anyhow!("failed to capture decoder stdout").into());
            }
        };
        let stderr_drain = match child.stderr.take().map(spawn_stderr_drain).transpose() {
            Ok(handle) => handle,
            Err(err) => {
                reap(&mut child);
                return Err(DecodeError::Io(err));
            }
        };

        debug!(pid = child.id(), width, height, "decoder started");

        Ok(Self {
            child: Some(child),
            reader: RawFrameReader::new(stdout, width, height),
            stderr_drain,
            finished: false,
        })
    }

    /// OS process id of the decoder, while it has not been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn frame_bytes(&self) -> usize {
        self.reader.frame_bytes()
    }

    fn finish(&mut self) -> Result<(), DecodeError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        let diagnostics = self
            .stderr_drain
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            debug!(%status, "decoder exited");
            Ok(())
        } else {
            warn!(%status, diagnostics = %diagnostics.trim_end(), "decoder failed");
            Err(DecodeError::ProcessFailed {
                status,
                diagnostics,
            })
        }
    }
}

impl Iterator for FrameSource {
    type Item = Result<Frame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.reader.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                self.finish().err().map(Err)
            }
            Err(err) => {
                self.finished = true;
                Some(Err(DecodeError::Io(err)))
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(pid = child.id(), "stopping decoder");
            reap(&mut child);
        }
        // Detached, not joined: a grandchild may still hold stderr open. The
        // thread exits once every writer of the pipe is gone.
        drop(self.stderr_drain.take());
    }
}

fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        if err.kind() != io::ErrorKind::InvalidInput {
            warn!("failed to kill decoder: {err}");
        }
    }
    if let Err(err) = child.wait() {
        warn!("failed to reap decoder: {err}");
    }
}

fn spawn_stderr_drain(mut stderr: ChildStderr) -> io::Result<thread::JoinHandle<String>> {
    thread::Builder::new()
        .name("decoder-stderr".into())
        .spawn(move || {
            let mut raw = Vec::new();
            if let Err(err) = stderr.read_to_end(&mut raw) {
                warn!("failed to read decoder diagnostics: {err}");
            }
            String::from_utf8_lossy(&raw).into_owned()
        })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn reader_yields_whole_frames_only() {
        let (w, h) = (4, 2);
        let frame = Frame::byte_len(w, h, FrameFormat::Rgb8);

        let exact = RawFrameReader::new(Cursor::new(vec![7u8; frame * 3]), w, h);
        assert_eq!(exact.count(), 3);

        let ragged = RawFrameReader::new(Cursor::new(vec![7u8; frame * 3 + 5]), w, h);
        let frames: Vec<Frame> = ragged.map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.data.len() == frame));
    }

    #[test]
    fn reader_stops_on_empty_input() {
        let mut reader = RawFrameReader::new(Cursor::new(Vec::new()), 8, 8);
        assert!(reader.read_frame().unwrap().is_none());
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn decoder_command_requests_scaled_rgb24() {
        let settings = DecoderSettings {
            program: "ffmpeg".into(),
            input: "traffic.mp4".into(),
            width: 1280,
            height: 720,
        };
        let cmd = settings.command();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.get_program(), "ffmpeg");
        for pair in [
            ["-i", "traffic.mp4"],
            ["-f", "rawvideo"],
            ["-pix_fmt", "rgb24"],
            ["-vf", "scale=1280:720"],
        ] {
            assert!(
                args.windows(2).any(|w| w[0] == pair[0] && w[1] == pair[1]),
                "missing {pair:?} in {args:?}"
            );
        }
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[cfg(unix)]
    #[test]
    fn full_hd_output_with_ragged_tail_yields_whole_frames() {
        let (w, h) = (1280, 720);
        let frame = Frame::byte_len(w, h, FrameFormat::Rgb8);
        let script = format!("head -c {} /dev/zero", frame * 2 + 1000);

        let frames: Vec<Frame> = FrameSource::spawn(shell(&script), w, h)
            .unwrap()
            .map(|f| f.unwrap())
            .collect();

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.width == w && f.height == h));
    }

    #[cfg(unix)]
    #[test]
    fn exact_multiple_yields_exact_count() {
        let (w, h) = (16, 9);
        let frame = Frame::byte_len(w, h, FrameFormat::Rgb8);
        let script = format!("head -c {} /dev/zero", frame * 5);

        let source = FrameSource::spawn(shell(&script), w, h).unwrap();
        assert_eq!(source.frame_bytes(), frame);
        let results: Vec<_> = source.collect();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(Result::is_ok));
    }

    #[cfg(unix)]
    #[test]
    fn failing_decoder_reports_diagnostics() {
        let mut source =
            FrameSource::spawn(shell("printf 'no such file' >&2; exit 1"), 16, 9).unwrap();

        match source.next() {
            Some(Err(DecodeError::ProcessFailed {
                status,
                diagnostics,
            })) => {
                assert_eq!(status.code(), Some(1));
                assert_eq!(diagnostics, "no such file");
            }
            other => panic!("expected decode failure, got {other:?}"),
        }
        assert!(source.next().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn frames_then_failure() {
        let frame = Frame::byte_len(8, 8, FrameFormat::Rgb8);
        let script = format!("head -c {} /dev/zero; echo boom >&2; exit 3", frame * 2);

        let results: Vec<_> = FrameSource::spawn(shell(&script), 8, 8).unwrap().collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(matches!(
            &results[2],
            Err(DecodeError::ProcessFailed { diagnostics, .. }) if diagnostics == "boom\n"
        ));
    }

    #[test]
    fn missing_decoder_is_a_spawn_error() {
        let cmd = Command::new("/nonexistent/decoder-binary");
        match FrameSource::spawn(cmd, 8, 8) {
            Err(DecodeError::Spawn { program, .. }) => {
                assert_eq!(program, "/nonexistent/decoder-binary")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dropping_source_reaps_endless_decoder() {
        let mut source = FrameSource::spawn(shell("exec cat /dev/zero"), 32, 32).unwrap();
        let pid = source.id().unwrap();
        assert!(source.next().unwrap().is_ok());

        drop(source);

        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
    }

    #[cfg(unix)]
    #[test]
    fn drop_does_not_wait_for_stderr_held_by_grandchild() {
        let mut source =
            FrameSource::spawn(shell("sleep 10 & exec cat /dev/zero"), 8, 8).unwrap();
        assert!(source.next().unwrap().is_ok());

        let start = std::time::Instant::now();
        drop(source);

        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }
}
