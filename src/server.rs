//! HTTP surface: scan control, camera selection, the MJPEG feed, capture,
//! the color picker and the plotter job, plus the static image directory.

use crate::capture::CaptureOutcome;
use crate::color::ColorSample;
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::models::{Device, ScanProgress, ScanStatusResponse, StartScanResponse};
use crate::plotter::{static_url, PlotOutcome};
use crate::poller::PollerStatsSnapshot;
use crate::stream::MULTIPART_CONTENT_TYPE;
use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub fn router(ctx: AppContext) -> Router {
    let static_files = ServeDir::new(&ctx.static_dir);
    Router::new()
        .route("/", get(status_page).post(select_device))
        .route("/start_scan", post(start_scan))
        .route("/check_scan_status", get(check_scan_status))
        .route("/start_stream", get(start_stream))
        .route("/stop_stream", get(stop_stream))
        .route("/video_feed", get(video_feed))
        .route("/capture_image", get(capture_image))
        .route("/show_processed_image", get(show_processed_image))
        .route("/get_cmyk", post(get_cmyk))
        .route("/run_pycode", post(run_pycode))
        .nest_service("/static", static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serves until Ctrl-C. Streaming is switched off first so open feeds end.
pub async fn serve(ctx: AppContext, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    let stream = ctx.stream.clone();
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
            stream.stop().await;
        })
        .await?;

    Ok(())
}

#[derive(Debug, Serialize)]
struct FrameInfo {
    seq: u64,
    captured_at: DateTime<Utc>,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct StatusPage {
    camera_url: Option<Url>,
    streaming: bool,
    scanning: bool,
    progress: ScanProgress,
    devices: Vec<Device>,
    last_frame: Option<FrameInfo>,
    poller: PollerStatsSnapshot,
}

async fn status_page(State(ctx): State<AppContext>) -> Json<StatusPage> {
    Json(status_of(&ctx))
}

fn status_of(ctx: &AppContext) -> StatusPage {
    let config = ctx.stream.config();
    let scan = ctx.scanner.status();
    StatusPage {
        camera_url: config.camera_base_url,
        streaming: config.enabled,
        scanning: scan.scanning,
        progress: scan.progress,
        devices: ctx.scanner.devices(),
        last_frame: ctx.latest.snapshot().map(|frame| FrameInfo {
            seq: frame.seq,
            captured_at: frame.captured_at,
            width: frame.image.width(),
            height: frame.image.height(),
        }),
        poller: ctx.stream.stats(),
    }
}

#[derive(Debug, Deserialize)]
struct SelectDevice {
    ip_address: String,
}

async fn select_device(
    State(ctx): State<AppContext>,
    Form(form): Form<SelectDevice>,
) -> Result<Json<StatusPage>> {
    let ip: Ipv4Addr = form
        .ip_address
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("invalid IPv4 address: {:?}", form.ip_address)))?;

    ctx.stream.select_camera(ip).await?;
    Ok(Json(status_of(&ctx)))
}

async fn start_scan(State(ctx): State<AppContext>) -> Json<StartScanResponse> {
    Json(StartScanResponse {
        status: ctx.scanner.scan_network(),
    })
}

async fn check_scan_status(State(ctx): State<AppContext>) -> Json<ScanStatusResponse> {
    Json(ctx.scanner.status())
}

async fn start_stream(State(ctx): State<AppContext>) -> Redirect {
    ctx.stream.start().await;
    Redirect::to("/")
}

async fn stop_stream(State(ctx): State<AppContext>) -> Redirect {
    ctx.stream.stop().await;
    Redirect::to("/")
}

async fn video_feed(State(ctx): State<AppContext>) -> Result<Response> {
    let parts = ctx.stream.open_stream()?;
    tracing::info!("Stream client connected");

    Response::builder()
        .header(header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .body(Body::from_stream(parts.map(Ok::<_, Infallible>)))
        .map_err(|e| Error::Internal(e.to_string()))
}

async fn capture_image(State(ctx): State<AppContext>) -> Result<Json<CaptureOutcome>> {
    Ok(Json(ctx.capture.capture().await?))
}

/// Sends the browser to the annotated capture in the static directory.
async fn show_processed_image(State(ctx): State<AppContext>) -> Result<Redirect> {
    static_url(&ctx.static_dir, &ctx.processed_image)
        .map(|url| Redirect::to(&url))
        .ok_or_else(|| {
            Error::NotFound(format!(
                "processed image {} is outside the static directory",
                ctx.processed_image.display()
            ))
        })
}

#[derive(Debug, Deserialize)]
struct PixelRequest {
    x: u32,
    y: u32,
}

async fn get_cmyk(
    State(ctx): State<AppContext>,
    Json(pixel): Json<PixelRequest>,
) -> Result<Json<ColorSample>> {
    Ok(Json(ctx.colors.pick(pixel.x, pixel.y).await?))
}

async fn run_pycode(State(ctx): State<AppContext>) -> Result<Json<PlotOutcome>> {
    Ok(Json(ctx.plotter.run().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::frame::tests::solid_jpeg;
    use crate::poller::tests::ScriptedCamera;
    use crate::prober::LivenessProber;
    use async_trait::async_trait;
    use clap::Parser;
    use reqwest::StatusCode;
    use serde_json::Value;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Nobody answers; probes wait on `gate`.
    struct SilentLan {
        gate: Semaphore,
    }

    #[async_trait]
    impl LivenessProber for SilentLan {
        async fn probe(&self, _ip: Ipv4Addr) -> Option<Device> {
            let _permit = self.gate.acquire().await.ok()?;
            None
        }
    }

    struct Rig {
        base: String,
        client: reqwest::Client,
        lan: Arc<SilentLan>,
        dir: PathBuf,
    }

    impl Rig {
        async fn get(&self, path: &str) -> reqwest::Response {
            self.client.get(format!("{}{path}", self.base)).send().await.unwrap()
        }

        async fn json(&self, response: reqwest::Response) -> Value {
            serde_json::from_str(&response.text().await.unwrap()).unwrap()
        }
    }

    async fn rig(name: &str, frames: usize) -> Rig {
        rig_with(name, frames, &[]).await
    }

    async fn rig_with(name: &str, frames: usize, extra: &[&str]) -> Rig {
        let dir = std::env::temp_dir().join(format!("nail-rig-http-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = |file: &str| dir.join(file).to_str().unwrap().to_string();
        crate::frame::tests::solid(255, 0, 0).save(dir.join("image.png")).unwrap();

        let mut args = vec![
            "nail-printer-rig".to_string(),
            "--capture-path".to_string(),
            path("captured.jpg"),
            "--static-dir".to_string(),
            path(""),
            "--processed-image".to_string(),
            path("annotated_output.jpg"),
            "--color-image".to_string(),
            path("image.png"),
            "--color-output".to_string(),
            path("colour.txt"),
        ];
        args.extend(extra.iter().map(|arg| arg.to_string()));
        let config = Config::parse_from(args);

        let lan = Arc::new(SilentLan {
            gate: Semaphore::new(0),
        });
        let camera = Arc::new(ScriptedCamera::new(
            (0..frames).map(|_| Ok(solid_jpeg(0, 200, 0))).collect(),
        ));
        let ctx = AppContext::with_parts(&config, Arc::clone(&lan) as Arc<dyn LivenessProber>, camera);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(ctx)).await.unwrap();
        });

        Rig {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            lan,
            dir,
        }
    }

    #[tokio::test]
    async fn second_scan_request_is_rejected_while_running() {
        let rig = rig("scan", 0).await;

        let first = rig.client.post(format!("{}/start_scan", rig.base)).send().await.unwrap();
        assert_eq!(rig.json(first).await["status"], "started");

        let second = rig.client.post(format!("{}/start_scan", rig.base)).send().await.unwrap();
        assert_eq!(rig.json(second).await["status"], "already_scanning");

        let status = rig.json(rig.get("/check_scan_status").await).await;
        assert_eq!(status["scanning"], true);
        assert_eq!(status["progress"]["total"], 254);

        rig.lan.gate.add_permits(Semaphore::MAX_PERMITS);
        let done = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let status = rig.json(rig.get("/check_scan_status").await).await;
                if status["scanning"] == false {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(done["progress"]["probed"], 254);
        assert_eq!(done["progress"]["alive"], 0);
    }

    #[tokio::test]
    async fn feed_is_plain_text_without_active_stream() {
        let rig = rig("idle", 0).await;

        let response = rig.get("/video_feed").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.text().await.unwrap().starts_with("No active stream"));

        let response = rig.get("/capture_image").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.text().await.unwrap().starts_with("No frame available"));
    }

    #[tokio::test]
    async fn rejects_malformed_device_address() {
        let rig = rig("form", 0).await;
        let response = rig
            .client
            .post(&rig.base)
            .form(&[("ip_address", "10.0.0.300")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rig.json(response).await["error_code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn select_stream_capture_and_stop() {
        let rig = rig("stream", 1000).await;

        let response = rig
            .client
            .post(&rig.base)
            .form(&[("ip_address", " 10.0.0.5 ")])
            .send()
            .await
            .unwrap();
        let status = rig.json(response).await;
        assert_eq!(status["camera_url"], "http://10.0.0.5/");
        assert_eq!(status["streaming"], false);

        // Redirect lands back on the status page.
        let status = rig.json(rig.get("/start_stream").await).await;
        assert_eq!(status["streaming"], true);

        let mut feed = rig.get("/video_feed").await;
        assert_eq!(feed.headers()[header::CONTENT_TYPE], MULTIPART_CONTENT_TYPE);
        let mut received = Vec::new();
        while received.len() < 64 {
            let chunk = tokio::time::timeout(Duration::from_secs(5), feed.chunk())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            received.extend_from_slice(&chunk);
        }
        assert!(received.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: "));

        let capture = rig.json(rig.get("/capture_image").await).await;
        let path = PathBuf::from(capture["path"].as_str().unwrap());
        assert_eq!(path, rig.dir.join("captured.jpg"));
        assert!(path.exists());

        rig.get("/stop_stream").await;
        let ended = tokio::time::timeout(Duration::from_secs(5), async {
            while feed.chunk().await.unwrap().is_some() {}
        })
        .await;
        assert!(ended.is_ok(), "feed kept streaming after stop");
    }

    #[tokio::test]
    async fn picks_color_from_reference_image() {
        let rig = rig("color", 0).await;
        let response = rig
            .client
            .post(format!("{}/get_cmyk", rig.base))
            .header(header::CONTENT_TYPE, "application/json")
            .body(r#"{"x": 3, "y": 3}"#)
            .send()
            .await
            .unwrap();
        let sample = rig.json(response).await;
        assert_eq!(sample["r"], 255);
        assert_eq!(sample["m"], 1.0);
        assert_eq!(
            std::fs::read_to_string(rig.dir.join("colour.txt")).unwrap(),
            "C:0.00\nM:1.00\nY:1.00\nK:0.00\n"
        );

        let response = rig
            .client
            .post(format!("{}/get_cmyk", rig.base))
            .header(header::CONTENT_TYPE, "application/json")
            .body(r#"{"x": 8, "y": 0}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn serves_processed_and_color_images() {
        let rig = rig("static", 0).await;
        let annotated = solid_jpeg(10, 20, 30);
        std::fs::write(rig.dir.join("annotated_output.jpg"), &annotated).unwrap();

        let response = rig.get("/show_processed_image").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.url().path(), "/static/annotated_output.jpg");
        assert_eq!(response.bytes().await.unwrap(), annotated);

        let response = rig.get("/static/image.png").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        let response = rig.get("/static/missing.jpg").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn plot_job_requires_a_command() {
        let rig = rig("plot-unset", 0).await;
        let response = rig.client.post(format!("{}/run_pycode", rig.base)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_plot_job_is_server_error() {
        let rig = rig_with("plot-fail", 0, &["--plot-command", "false"]).await;
        let response = rig.client.post(format!("{}/run_pycode", rig.base)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(rig.json(response).await["error_code"], "COMMAND_FAILED");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_plot_job_points_at_output_image() {
        let rig = rig_with("plot-ok", 0, &["--plot-command", "true"]).await;
        let response = rig.client.post(format!("{}/run_pycode", rig.base)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let outcome = rig.json(response).await;
        assert_eq!(outcome["success"], true);
        assert_eq!(outcome["image_url"], "/static/image.png");

        let image = rig.get("/static/image.png").await;
        assert_eq!(image.status(), StatusCode::OK);
    }
}
