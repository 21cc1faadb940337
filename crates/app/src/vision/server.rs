//! Actix Web server exposing the landing page, the MJPEG feed, and metrics.
//!
//! Every `/video_feed` request starts an independent session with its own
//! decoder process and tracker. Only the detector is shared.

use std::sync::Arc;

use actix_web::{App, HttpResponse, HttpServer, http::header, web};
use anyhow::{Context, Result};
use async_stream::stream;
use ml_core::{ObjectDetector, TrackerConfig};
use tokio::sync::mpsc;
use tracing::{error, info};
use video_ingest::{DecodeError, FrameSource};

use crate::vision::{
    config::StreamConfig,
    encoding::MULTIPART_CONTENT_TYPE,
    pipeline::{StreamSession, spawn_session_worker},
    processing::SessionTracker,
    telemetry,
};

/// Starts a fresh decoder for one session.
pub(crate) type SourceFactory = Arc<dyn Fn() -> Result<FrameSource, DecodeError> + Send + Sync>;

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    detector: Arc<dyn ObjectDetector>,
    source_factory: SourceFactory,
    tracker_config: TrackerConfig,
    jpeg_quality: u8,
}

impl ServerState {
    pub(crate) fn from_config(config: &StreamConfig, detector: Arc<dyn ObjectDetector>) -> Self {
        let decoder = config.decoder_settings();
        Self {
            detector,
            source_factory: Arc::new(move || FrameSource::ffmpeg(&decoder)),
            tracker_config: config.tracker.clone(),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// Register every route on an app.
pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/video_feed", web::get().to(video_feed))
        .route("/metrics", web::get().to(metrics_route));
}

/// Bind `config.bind` and serve until the process is signalled.
pub async fn run_server(config: StreamConfig, detector: Arc<dyn ObjectDetector>) -> Result<()> {
    let state = web::Data::new(ServerState::from_config(&config, detector));
    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind(config.bind)
        .with_context(|| format!("failed to bind {}", config.bind))?;

    info!(
        addr = %config.bind,
        video = %config.video_path.display(),
        "serving http://{}/",
        config.bind
    );
    server.run().await.context("HTTP server error")
}

/// Serve the landing page.
async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::index::INDEX_HTML)
}

/// Stream the annotated video from its first frame as multipart JPEG.
async fn video_feed(state: web::Data<ServerState>) -> HttpResponse {
    let source = match (state.source_factory)() {
        Ok(source) => source,
        Err(err) => {
            metrics::counter!("stream_session_failures_total").increment(1);
            error!("failed to start decoder: {err:#}");
            return HttpResponse::InternalServerError()
                .body(format!("failed to start video decoder: {err}"));
        }
    };

    let tracker = SessionTracker::new(state.detector.clone(), state.tracker_config.clone());
    let session = StreamSession::new(source, tracker, state.jpeg_quality);
    let (tx, mut rx) = mpsc::channel(1);
    if let Err(err) = spawn_session_worker(session, tx) {
        error!("failed to spawn session thread: {err}");
        return HttpResponse::InternalServerError().body("failed to start stream session");
    }

    let body = stream! {
        while let Some(chunk) = rx.recv().await {
            yield chunk.map_err(actix_web::error::ErrorInternalServerError);
        }
    };

    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .content_type(MULTIPART_CONTENT_TYPE)
        .streaming(body)
}

/// Prometheus text exposition of the process metrics.
async fn metrics_route() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use actix_web::{http::StatusCode, test};
    use ml_core::NullDetector;

    use super::*;

    fn state(factory: SourceFactory) -> web::Data<ServerState> {
        web::Data::new(ServerState {
            detector: Arc::new(NullDetector),
            source_factory: factory,
            tracker_config: TrackerConfig::default(),
            jpeg_quality: 80,
        })
    }

    fn shell_source(script: &'static str) -> SourceFactory {
        Arc::new(move || {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            FrameSource::spawn(cmd, 4, 4)
        })
    }

    #[actix_web::test]
    async fn index_embeds_video_feed() {
        let app = test::init_service(
            App::new()
                .app_data(state(shell_source("true")))
                .configure(configure),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert!(std::str::from_utf8(&body).unwrap().contains("src=\"/video_feed\""));
    }

    #[actix_web::test]
    async fn video_feed_streams_one_part_per_frame() {
        let app = test::init_service(
            App::new()
                .app_data(state(shell_source("head -c 144 /dev/zero")))
                .configure(configure),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/video_feed").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            MULTIPART_CONTENT_TYPE
        );
        assert_eq!(resp.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");

        let body = test::read_body(resp).await;
        let parts = body
            .windows(b"--frame\r\n".len())
            .filter(|w| *w == b"--frame\r\n")
            .count();
        assert_eq!(parts, 3);
        assert!(body.ends_with(b"\r\n"));
    }

    #[actix_web::test]
    async fn empty_video_yields_empty_stream() {
        let app = test::init_service(
            App::new()
                .app_data(state(shell_source("true")))
                .configure(configure),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/video_feed").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(test::read_body(resp).await.is_empty());
    }

    #[actix_web::test]
    async fn decoder_failure_mid_stream_aborts_the_body() {
        let app = test::init_service(
            App::new()
                .app_data(state(shell_source(
                    "head -c 96 /dev/zero; printf 'no such file' >&2; exit 1",
                )))
                .configure(configure),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/video_feed").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(actix_web::body::to_bytes(resp.into_body()).await.is_err());
    }

    #[actix_web::test]
    async fn missing_decoder_is_internal_error() {
        let factory: SourceFactory =
            Arc::new(|| FrameSource::spawn(Command::new("/nonexistent/ffmpeg"), 4, 4));
        let app =
            test::init_service(App::new().app_data(state(factory)).configure(configure)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/video_feed").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
