//! Per-client session: decode, detect, track, annotate, encode.
//!
//! A session is a lazy iterator of encoded frames. It runs on its own thread
//! and hands multipart chunks to the HTTP response through a bounded channel;
//! once the client goes away the channel closes, the session is dropped and
//! the decoder process is reaped with it.

use std::{
    io,
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Instant,
};

use actix_web::web::Bytes;
use anyhow::Result;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{Span, debug, error, info, trace, warn};
use video_ingest::{DecodeError, Frame};

use crate::vision::{
    annotation::annotate_frame,
    data::FramePacket,
    encoding::{encode_jpeg, multipart_chunk},
    processing::SessionTracker,
    telemetry,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Created; no frame requested yet.
    Init,
    Decoding,
    /// Decoder reached the end of the video.
    Done,
    /// Decoder failed; the error was yielded once.
    Failed,
}

#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("video decode failed")]
    Decode(#[from] DecodeError),
}

/// Lazily produced stream of annotated frames for one client.
pub(crate) struct StreamSession<S> {
    source: S,
    tracker: SessionTracker,
    jpeg_quality: u8,
    frame_number: u64,
    emitted: u64,
    state: SessionState,
    span: Span,
}

impl<S> StreamSession<S>
where
    S: Iterator<Item = Result<Frame, DecodeError>>,
{
    pub(crate) fn new(source: S, tracker: SessionTracker, jpeg_quality: u8) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("stream_sessions_total").increment(1);
        let span = tracing::info_span!("stream.session", session = id);
        span.in_scope(|| info!("session started"));
        Self {
            source,
            tracker,
            jpeg_quality,
            frame_number: 0,
            emitted: 0,
            state: SessionState::Init,
            span,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    fn render(&self, frame: &Frame, packet: &mut FramePacket) -> Result<()> {
        let annotate_start = Instant::now();
        let image = annotate_frame(frame, &packet.detections)?;
        record_stage("annotate", annotate_start);

        let encode_start = Instant::now();
        packet.jpeg = encode_jpeg(&image, self.jpeg_quality)?;
        record_stage("encode", encode_start);
        Ok(())
    }
}

impl<S> Iterator for StreamSession<S>
where
    S: Iterator<Item = Result<Frame, DecodeError>>,
{
    type Item = Result<FramePacket, SessionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, SessionState::Done | SessionState::Failed) {
            return None;
        }
        let span = self.span.clone();
        let _guard = span.enter();
        self.state = SessionState::Decoding;

        loop {
            let decode_start = Instant::now();
            let frame = match self.source.next() {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    self.state = SessionState::Failed;
                    metrics::counter!("stream_session_failures_total").increment(1);
                    error!(frames = self.emitted, "session failed: {err}");
                    return Some(Err(err.into()));
                }
                None => {
                    self.state = SessionState::Done;
                    info!(frames = self.emitted, "session finished");
                    return None;
                }
            };
            record_stage("decode", decode_start);

            let frame_number = self.frame_number;
            self.frame_number += 1;
            let _frame_span = tracing::debug_span!("frame", number = frame_number).entered();

            let detect_start = Instant::now();
            let detections = self.tracker.process(&frame, frame_number);
            record_stage("detect", detect_start);

            let mut packet = FramePacket {
                jpeg: Vec::new(),
                detections,
                timestamp_ms: frame.timestamp_ms,
                frame_number,
            };
            if let Err(err) = self.render(&frame, &mut packet) {
                metrics::counter!("stream_encode_failures_total").increment(1);
                warn!(frame = frame_number, "dropping frame: {err:#}");
                continue;
            }

            self.emitted += 1;
            metrics::counter!("stream_frames_emitted_total").increment(1);
            return Some(Ok(packet));
        }
    }
}

fn record_stage(stage: &'static str, start: Instant) {
    metrics::histogram!("stream_stage_latency_seconds", "stage" => stage)
        .record(start.elapsed().as_secs_f64());
}

/// Drive `session` on a dedicated thread, sending one multipart chunk per
/// frame until the video ends, the decoder fails or `tx` is closed.
pub(crate) fn spawn_session_worker<S>(
    session: StreamSession<S>,
    tx: mpsc::Sender<Result<Bytes, SessionError>>,
) -> io::Result<thread::JoinHandle<()>>
where
    S: Iterator<Item = Result<Frame, DecodeError>> + Send + 'static,
{
    telemetry::spawn_thread("stream-session", move || {
        let span = session.span.clone();
        let mut session = session;
        loop {
            if tx.is_closed() {
                debug!(parent: &span, "client disconnected; stopping session");
                break;
            }
            let Some(item) = session.next() else {
                break;
            };
            let chunk = item.map(|packet| {
                trace!(
                    parent: &span,
                    frame = packet.frame_number,
                    timestamp_ms = packet.timestamp_ms,
                    bytes = packet.jpeg.len(),
                    "sending frame"
                );
                multipart_chunk(&packet.jpeg)
            });
            if tx.blocking_send(chunk).is_err() {
                debug!(parent: &span, "client disconnected; stopping session");
                break;
            }
        }
        debug!(parent: &span, state = ?session.state(), "session closed");
    })
}
