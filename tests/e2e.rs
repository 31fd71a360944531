//! End-to-end integration tests for edgequake-formula.
//!
//! Rendering tests run against real SVG files written to a temp dir.
//! Recognition tests use an in-process fake backend, or a one-shot HTTP stub
//! on localhost standing in for Azure OpenAI, so they need no network.
//!
//! The live test at the bottom calls a real deployment. It is gated behind
//! `E2E_ENABLED` and reads `AZURE_OPENAI_ENDPOINT` / `AZURE_OPENAI_DEPLOYMENT`:
//!
//!   E2E_ENABLED=1 cargo test --test e2e live_ -- --nocapture

use async_trait::async_trait;
use edgequake_formula::pipeline::llm::build_http_client;
use edgequake_formula::{
    batch_png_to_latex, png_to_latex, svg_to_png, AzureOpenAiBackend, AzureTarget,
    BatchProgressCallback, ErrorKind, FormulaError, RecognizerConfig, RenderConfig,
    StaticTokenCredential, VisionBackend, VisionRequest,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// ── Test helpers ─────────────────────────────────────────────────────────────

const OPAQUE_SQUARE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
  <rect x="0" y="0" width="10" height="10" fill="#000000"/>
</svg>"##;

const TRANSLUCENT_SQUARE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20">
  <rect x="0" y="0" width="10" height="10" fill="#000000" fill-opacity="0.5"/>
</svg>"##;

const WIDE_CIRCLE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="50">
  <circle cx="25" cy="25" r="20" fill="#1a1a1a"/>
</svg>"##;

/// Send library logs through the test harness; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    init_tracing();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn write_png(dir: &Path, name: &str) -> PathBuf {
    init_tracing();
    let path = dir.join(name);
    image::RgbImage::from_pixel(4, 4, image::Rgb([255, 255, 255]))
        .save(&path)
        .unwrap();
    path
}

/// Answers every request with a fixed reply and counts calls.
///
/// When `fail_on_call` is set, that (1-indexed) call returns an error.
struct FakeBackend {
    reply: String,
    calls: AtomicUsize,
    fail_on_call: Option<usize>,
    last_request: Mutex<Option<VisionRequest>>,
}

impl FakeBackend {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            fail_on_call: None,
            last_request: Mutex::new(None),
        })
    }

    fn failing_on(reply: &str, call: usize) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            fail_on_call: Some(call),
            last_request: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, request: &VisionRequest) -> Result<String, FormulaError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_request.lock().unwrap() = Some(request.clone());
        if self.fail_on_call == Some(n) {
            return Err(FormulaError::LlmApiError {
                status: 500,
                message: "simulated outage".into(),
            });
        }
        Ok(self.reply.clone())
    }
}

fn config_with(backend: Arc<FakeBackend>) -> RecognizerConfig {
    init_tracing();
    RecognizerConfig::builder()
        .backend(backend)
        .build()
        .unwrap()
}

/// A captured HTTP request from the stub server.
struct Captured {
    head: String,
    body: String,
}

/// Accept a single connection, capture the request, reply with `status` and
/// `body`, then close.
async fn serve_once(
    status_line: &'static str,
    body: String,
) -> (String, tokio::task::JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers were complete");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let body_in = String::from_utf8_lossy(&buf[header_end..]).to_string();

        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();

        Captured {
            head,
            body: body_in,
        }
    });

    (format!("http://{addr}"), handle)
}

fn stub_backend(endpoint: &str) -> Arc<dyn VisionBackend> {
    let target = AzureTarget {
        endpoint: endpoint.to_string(),
        deployment: "vision-dep".to_string(),
        api_version: "2024-02-15-preview".to_string(),
    };
    let client = build_http_client(None).unwrap();
    Arc::new(AzureOpenAiBackend::with_client(
        client,
        target,
        Arc::new(StaticTokenCredential::new("test-token")),
    ))
}

// ── svg2png ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn svg_to_png_default_destination() {
    let dir = tempfile::tempdir().unwrap();
    let svg = write_file(dir.path(), "formula.svg", OPAQUE_SQUARE);

    let out = svg_to_png(&svg, None, &RenderConfig::default()).await.unwrap();

    assert_eq!(out, dir.path().join("formula.svg.png"));
    let meta = std::fs::metadata(&out).unwrap();
    assert!(meta.len() > 0);
    assert_eq!(image::image_dimensions(&out).unwrap(), (20, 20));
}

#[tokio::test]
async fn svg_to_png_missing_input_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let svg = dir.path().join("absent.svg");
    let dest = dir.path().join("absent.png");

    let err = svg_to_png(&svg, Some(&dest), &RenderConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FormulaError::FileNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!dest.exists());
}

#[tokio::test]
async fn svg_to_png_invalid_svg_is_rendering_failure() {
    let dir = tempfile::tempdir().unwrap();
    let svg = write_file(dir.path(), "broken.svg", "this is not svg");
    let dest = dir.path().join("broken.png");

    let err = svg_to_png(&svg, Some(&dest), &RenderConfig::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RenderingFailure);
    assert!(!dest.exists());
}

#[tokio::test]
async fn svg_to_png_overwrites_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    let svg = write_file(dir.path(), "f.svg", OPAQUE_SQUARE);
    let dest = dir.path().join("f.png");
    std::fs::write(&dest, b"stale").unwrap();

    let out = svg_to_png(&svg, Some(&dest), &RenderConfig::default())
        .await
        .unwrap();
    assert_eq!(out, dest);
    assert_eq!(image::image_dimensions(&dest).unwrap(), (20, 20));

    // Second run replaces the first without complaint.
    svg_to_png(&svg, Some(&dest), &RenderConfig::default())
        .await
        .unwrap();
    assert_eq!(image::image_dimensions(&dest).unwrap(), (20, 20));
}

#[tokio::test]
async fn svg_to_png_output_is_opaque_rgb() {
    let dir = tempfile::tempdir().unwrap();
    let svg = write_file(dir.path(), "opaque.svg", OPAQUE_SQUARE);

    let out = svg_to_png(&svg, None, &RenderConfig::default()).await.unwrap();
    let img = image::open(&out).unwrap();

    assert_eq!(img.color(), image::ColorType::Rgb8);
    let rgb = img.to_rgb8();
    assert_eq!(rgb.get_pixel(5, 5).0, [0, 0, 0]);
    assert_eq!(rgb.get_pixel(15, 15).0, [255, 255, 255]);
}

#[tokio::test]
async fn svg_to_png_flattens_transparency_onto_white() {
    let dir = tempfile::tempdir().unwrap();
    let svg = write_file(dir.path(), "translucent.svg", TRANSLUCENT_SQUARE);

    let out = svg_to_png(&svg, None, &RenderConfig::default()).await.unwrap();
    let rgb = image::open(&out).unwrap().to_rgb8();

    // Uncovered area is pure white, never black.
    assert_eq!(rgb.get_pixel(15, 15).0, [255, 255, 255]);
    assert_eq!(rgb.get_pixel(19, 0).0, [255, 255, 255]);

    // Half-transparent black over white is mid grey.
    let [r, g, b] = rgb.get_pixel(5, 5).0;
    assert_eq!(r, g);
    assert_eq!(g, b);
    assert!((100..=160).contains(&r), "expected mid grey, got {r}");
}

#[tokio::test]
async fn svg_to_png_scale_multiplies_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let svg = write_file(dir.path(), "circle.svg", WIDE_CIRCLE);

    let one = dir.path().join("x1.png");
    let two = dir.path().join("x2.png");
    svg_to_png(&svg, Some(&one), &RenderConfig::default())
        .await
        .unwrap();
    let config = RenderConfig::builder().scale(2.0).build().unwrap();
    svg_to_png(&svg, Some(&two), &config).await.unwrap();

    assert_eq!(image::image_dimensions(&one).unwrap(), (100, 50));
    assert_eq!(image::image_dimensions(&two).unwrap(), (200, 100));
}

#[tokio::test]
async fn svg_to_png_creates_missing_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let svg = write_file(dir.path(), "f.svg", OPAQUE_SQUARE);
    let dest = dir.path().join("nested/out/f.png");

    svg_to_png(&svg, Some(&dest), &RenderConfig::default())
        .await
        .unwrap();
    assert!(dest.is_file());
}

// ── png2latex ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn png_to_latex_returns_trimmed_reply() {
    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "f.png");
    let backend = FakeBackend::new("  \\frac{a}{b}\n\n");

    let result = png_to_latex(&png, &config_with(backend.clone()))
        .await
        .unwrap();

    assert_eq!(result.latex, "\\frac{a}{b}");
    assert_eq!(result.path, png);
    assert_eq!(backend.calls(), 1);

    let request = backend.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(request.temperature, 0.0);
    assert_eq!(request.max_tokens, 512);
    assert_eq!(request.image.mime_type, "image/png");
    assert!(request.image.to_data_uri().starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn png_to_latex_passes_unrecognized_through() {
    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "blank.png");
    let backend = FakeBackend::new("Unrecognized");

    let result = png_to_latex(&png, &config_with(backend)).await.unwrap();
    assert_eq!(result.latex, edgequake_formula::prompts::UNRECOGNIZED);
}

#[tokio::test]
async fn png_to_latex_missing_file_makes_no_call() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new("x");

    let err = png_to_latex(dir.path().join("nope.png"), &config_with(backend.clone()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn png_to_latex_without_configuration_fails_before_network() {
    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "f.png");
    let config = RecognizerConfig::from_lookup(|_| None);

    let err = png_to_latex(&png, &config).await.unwrap_err();

    assert!(matches!(err, FormulaError::MissingConfiguration { .. }));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn png_to_latex_backend_error_is_remote_failure() {
    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "f.png");
    let backend = FakeBackend::failing_on("x", 1);

    let err = png_to_latex(&png, &config_with(backend)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteServiceFailure);
}

// ── batch-png2latex ──────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl BatchProgressCallback for RecordingCallback {
    fn on_batch_start(&self, _directory: &Path, total_files: usize) {
        self.events.lock().unwrap().push(format!("start {total_files}"));
    }

    fn on_file_complete(&self, index: usize, _total: usize, _path: &Path, latex: &str) {
        self.events.lock().unwrap().push(format!("ok {index} {latex}"));
    }

    fn on_file_error(&self, index: usize, _total: usize, _path: &Path, _error: &str) {
        self.events.lock().unwrap().push(format!("err {index}"));
    }

    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {success_count}/{total_files}"));
    }
}

#[tokio::test]
async fn batch_empty_directory_makes_no_calls() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "readme.txt", "not an image");
    let backend = FakeBackend::new("x");

    let output = batch_png_to_latex(dir.path(), &config_with(backend.clone()))
        .await
        .unwrap();

    assert!(output.is_empty());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn batch_empty_directory_needs_no_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let config = RecognizerConfig::from_lookup(|_| None);

    let output = batch_png_to_latex(dir.path(), &config).await.unwrap();
    assert!(output.is_empty());
}

#[tokio::test]
async fn batch_missing_directory_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new("x");

    let err = batch_png_to_latex(dir.path().join("gone"), &config_with(backend))
        .await
        .unwrap_err();

    assert!(matches!(err, FormulaError::DirectoryNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn batch_processes_every_png_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "b.png");
    write_png(dir.path(), "a.png");
    write_png(dir.path(), "c.PNG");
    write_file(dir.path(), "notes.txt", "skip me");
    std::fs::create_dir(dir.path().join("sub.png")).unwrap();
    write_png(&dir.path().join("sub.png"), "nested.png");

    let backend = FakeBackend::new("x^2");
    let output = batch_png_to_latex(dir.path(), &config_with(backend.clone()))
        .await
        .unwrap();

    assert_eq!(backend.calls(), 3);
    let names: Vec<_> = output
        .entries
        .iter()
        .map(|e| e.path.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["a.png", "b.png", "c.PNG"]);
    assert!(output.entries.iter().all(|e| e.latex.as_deref() == Some("x^2")));
    assert_eq!(output.succeeded(), 3);
}

#[tokio::test]
async fn batch_continues_after_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "1.png");
    write_png(dir.path(), "2.png");
    write_png(dir.path(), "3.png");

    let backend = FakeBackend::failing_on("y", 2);
    let callback = Arc::new(RecordingCallback::default());
    let config = RecognizerConfig::builder()
        .backend(backend.clone())
        .progress_callback(callback.clone())
        .build()
        .unwrap();

    let output = batch_png_to_latex(dir.path(), &config).await.unwrap();

    assert_eq!(backend.calls(), 3);
    assert_eq!(output.succeeded(), 2);
    assert_eq!(output.failed(), 1);
    assert!(output.entries[1].error.as_deref().unwrap().contains("simulated outage"));
    assert!(output.entries[2].is_success());

    let events = callback.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec!["start 3", "ok 1 y", "err 2", "ok 3 y", "done 2/3"]
    );
}

// ── Azure OpenAI wire format ─────────────────────────────────────────────────

#[tokio::test]
async fn azure_backend_sends_bearer_request() {
    let reply = serde_json::json!({
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": "  E = mc^2 \n" },
            "finish_reason": "stop"
        }]
    })
    .to_string();
    let (endpoint, server) = serve_once("200 OK", reply).await;

    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "f.png");
    let config = RecognizerConfig::builder()
        .backend(stub_backend(&endpoint))
        .build()
        .unwrap();

    let result = png_to_latex(&png, &config).await.unwrap();
    assert_eq!(result.latex, "E = mc^2");

    let captured = server.await.unwrap();
    let request_line = captured.head.lines().next().unwrap();
    assert_eq!(
        request_line,
        "POST /openai/deployments/vision-dep/chat/completions?api-version=2024-02-15-preview HTTP/1.1"
    );
    assert!(captured
        .head
        .lines()
        .any(|l| l.eq_ignore_ascii_case("authorization: Bearer test-token")));
    assert!(!captured.head.to_ascii_lowercase().contains("api-key"));

    let body: serde_json::Value = serde_json::from_str(&captured.body).unwrap();
    assert_eq!(body["temperature"], 0.0);
    assert_eq!(body["max_tokens"], 512);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["role"], "user");
    let parts = messages[1]["content"].as_array().unwrap();
    assert_eq!(parts[0]["type"], "text");
    assert_eq!(parts[1]["type"], "image_url");
    assert!(parts[1]["image_url"]["url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn azure_backend_maps_unauthorized() {
    let reply = serde_json::json!({
        "error": { "code": "PermissionDenied", "message": "token rejected" }
    })
    .to_string();
    let (endpoint, server) = serve_once("401 Unauthorized", reply).await;

    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "f.png");
    let config = RecognizerConfig::builder()
        .backend(stub_backend(&endpoint))
        .build()
        .unwrap();

    let err = png_to_latex(&png, &config).await.unwrap_err();
    match err {
        FormulaError::AuthError { status, ref detail, .. } => {
            assert_eq!(status, 401);
            assert!(detail.contains("token rejected"));
        }
        other => panic!("expected AuthError, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn azure_backend_maps_rate_limit() {
    let (endpoint, server) = serve_once("429 Too Many Requests", "{}".to_string()).await;

    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "f.png");
    let config = RecognizerConfig::builder()
        .backend(stub_backend(&endpoint))
        .build()
        .unwrap();

    let err = png_to_latex(&png, &config).await.unwrap_err();
    assert!(matches!(err, FormulaError::RateLimitExceeded { .. }));
    assert_eq!(err.kind(), ErrorKind::RemoteServiceFailure);
    server.await.unwrap();
}

// ── Live ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_svg_roundtrip_to_latex() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run live tests");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let svg = write_file(
        dir.path(),
        "sum.svg",
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="120" height="40">
  <text x="10" y="28" font-size="24" font-family="serif">a + b = c</text>
</svg>"#,
    );
    let config = RenderConfig::builder().scale(3.0).build().unwrap();
    let png = svg_to_png(&svg, None, &config).await.unwrap();

    let result = png_to_latex(&png, &RecognizerConfig::from_env())
        .await
        .unwrap();
    println!("LaTeX: {}", result.latex);
    assert!(!result.latex.is_empty());
    assert_eq!(result.latex, result.latex.trim());
}
