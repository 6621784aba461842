use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::routing::get;
use axum::Router;
use clip_search::{
    server, Embedder, FetchConfig, ImageFetcher, Result, SearchEngine, SearchError,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use ndarray::{array, Array1, Array2, Array3, Array4, Axis};
use serde_json::{json, Value};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Embeds images as their mean colour and texts as the colour words they name.
struct ColorModel {
    image_batches: Arc<AtomicUsize>,
}

impl Embedder for ColorModel {
    fn preprocess(&self, image: &DynamicImage) -> Result<Array3<f32>> {
        let rgb = image.to_rgb8();
        #[allow(clippy::cast_precision_loss)]
        let n = (rgb.width() * rgb.height()) as f32;
        let mut out = Array3::zeros((3, 1, 1));
        for p in rgb.pixels() {
            for c in 0..3 {
                out[[c, 0, 0]] += f32::from(p[c]) / 255.0 / n;
            }
        }
        Ok(out)
    }

    fn encode_images(&mut self, batch: Array4<f32>) -> Result<Array2<f32>> {
        self.image_batches.fetch_add(1, Ordering::SeqCst);
        let n = batch.len_of(Axis(0));
        Ok(batch.into_shape_with_order((n, 3))?)
    }

    fn encode_text(&mut self, text: &str) -> Result<Array1<f32>> {
        let mut v = Array1::zeros(3);
        for word in text.split_whitespace() {
            v += &match word {
                "red" => array![1.0, 0.0, 0.0],
                "green" => array![0.0, 1.0, 0.0],
                "blue" => array![0.0, 0.0, 1.0],
                _ => array![0.0, 0.0, 0.0],
            };
        }
        Ok(v)
    }

    fn device(&self) -> &str {
        "cpu"
    }
}

/// Preprocesses fine but fails every forward pass.
struct BrokenModel;

impl Embedder for BrokenModel {
    fn preprocess(&self, _image: &DynamicImage) -> Result<Array3<f32>> {
        Ok(Array3::zeros((3, 1, 1)))
    }

    fn encode_images(&mut self, _batch: Array4<f32>) -> Result<Array2<f32>> {
        Err(SearchError::Inference("visual session failed".into()))
    }

    fn encode_text(&mut self, _text: &str) -> Result<Array1<f32>> {
        Ok(array![1.0, 0.0, 0.0])
    }

    fn device(&self) -> &str {
        "cpu"
    }
}

fn png(image: DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn solid_png(rgb: [u8; 3]) -> Vec<u8> {
    png(DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb(rgb))))
}

/// Serve a handful of test images on a random local port.
async fn spawn_image_server() -> SocketAddr {
    let red = solid_png([255, 0, 0]);
    let pink = solid_png([255, 128, 128]);
    let green = solid_png([0, 255, 0]);
    let big_blue = png(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        1200,
        600,
        Rgba([0, 0, 255, 255]),
    )));

    let png_route = |bytes: Vec<u8>| get(move || async move { ([(header::CONTENT_TYPE, "image/png")], bytes) });
    let app = Router::new()
        .route("/red.png", png_route(red))
        .route("/pink.png", png_route(pink))
        .route("/green.png", png_route(green))
        .route("/blue.png", png_route(big_blue))
        .route("/broken.png", get(|| async { "definitely not a png" }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Harness {
    app: Router,
    base: String,
    image_batches: Arc<AtomicUsize>,
}

async fn harness() -> Harness {
    let image_batches = Arc::new(AtomicUsize::new(0));
    let model = ColorModel {
        image_batches: Arc::clone(&image_batches),
    };
    harness_with(Box::new(model), image_batches).await
}

async fn harness_with(model: Box<dyn Embedder>, image_batches: Arc<AtomicUsize>) -> Harness {
    let addr = spawn_image_server().await;
    let fetcher = ImageFetcher::new(FetchConfig {
        timeout: Duration::from_secs(5),
        ..FetchConfig::default()
    })
    .unwrap();
    let engine = SearchEngine::new(model, fetcher, 64, 30);
    Harness {
        app: server::router(Arc::new(engine)),
        base: format!("http://{addr}"),
        image_batches,
    }
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::post(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    call(app, request).await
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_model_and_device() {
    let h = harness().await;
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = call(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "healthy", "model_loaded": true, "device": "cpu" })
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn analyze_scores_a_single_image() {
    let h = harness().await;
    let (status, body) = post(
        &h.app,
        "/analyze",
        json!({ "url": format!("{}/red.png", h.base), "query": "red" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["matches"], true);
    assert!((body["similarity"].as_f64().unwrap() - 1.0).abs() < 1e-4);

    let (_, body) = post(
        &h.app,
        "/analyze",
        json!({ "url": format!("{}/green.png", h.base), "query": "red" }),
    )
    .await;
    assert_eq!(body["matches"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn analyze_of_a_missing_image_is_not_a_match() {
    let h = harness().await;
    let (status, body) = post(
        &h.app,
        "/analyze",
        json!({ "url": format!("{}/nope.png", h.base), "query": "red" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "matches": false, "similarity": 0.0 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn analyze_requires_url_and_query() {
    let h = harness().await;
    let (status, body) = post(&h.app, "/analyze", json!({ "query": "red" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Missing url or query parameter");

    let (status, _) = post(&h.app, "/analyze", json!({ "url": "http://x/y.png", "query": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::post("/analyze")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = call(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn search_returns_sorted_matches_and_skips_failures() {
    let h = harness().await;
    let files = json!([
        { "url": format!("{}/green.png", h.base), "resource_type": "image", "name": "green" },
        { "url": format!("{}/pink.png", h.base), "resource_type": "image", "name": "pink" },
        { "url": format!("{}/red.png", h.base), "name": "red" },
        { "url": format!("{}/broken.png", h.base), "resource_type": "image" },
        { "url": format!("{}/nope.png", h.base), "resource_type": "image" },
        { "url": format!("{}/red.png", h.base), "resource_type": "raw", "name": "doc" },
    ]);
    let (status, body) = post(&h.app, "/search", json!({ "files": files, "query": "  RED " })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 2);
    assert!((body["threshold_used"].as_f64().unwrap() - 0.18).abs() < 1e-6);
    assert!(body["processing_time"].as_f64().unwrap() >= 0.0);

    let matched = body["files"].as_array().unwrap();
    let names: Vec<&str> = matched.iter().map(|f| f["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["red", "pink"]);
    let scores: Vec<f64> = matched
        .iter()
        .map(|f| f["similarity"].as_f64().unwrap())
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert!(scores.iter().all(|s| (-1.0..=1.0).contains(s)));
    assert_eq!(h.image_batches.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn large_rgba_images_are_scored() {
    let h = harness().await;
    let files = json!([{ "url": format!("{}/blue.png", h.base) }]);
    let (status, body) = post(&h.app, "/search", json!({ "files": files, "query": "blue" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert!((body["files"][0]["similarity"].as_f64().unwrap() - 1.0).abs() < 1e-3);
}

#[tokio::test(flavor = "multi_thread")]
async fn search_with_no_files_skips_the_model() {
    let h = harness().await;
    let (status, body) = post(&h.app, "/search", json!({ "files": [], "query": "red" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "files": [], "processing_time": 0 }));
    assert!(body["processing_time"].is_u64());
    assert_eq!(h.image_batches.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn search_requires_a_query() {
    let h = harness().await;
    let (status, body) = post(&h.app, "/search", json!({ "files": [], "query": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing query parameter");

    let (status, _) = post(&h.app, "/search", json!({ "files": [] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn every_unreachable_image_drops_out() {
    let h = harness().await;
    let files: Vec<Value> = ["red", "pink", "missing-a", "missing-b"]
        .iter()
        .map(|name| json!({ "url": format!("{}/{name}.png", h.base) }))
        .collect();
    let (_, body) = post(&h.app, "/search", json!({ "files": files, "query": "red" })).await;
    assert_eq!(body["count"], 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_file_entries_do_not_fail_the_search() {
    let h = harness().await;
    let red = format!("{}/red.png", h.base);
    let files = json!([
        { "url": red, "resource_type": 7, "name": "bad type" },
        { "url": red, "resource_type": null, "name": "null type" },
        { "url": 42 },
        "not an object",
        { "url": red, "name": "red", "similarity": "stale" },
    ]);
    let (status, body) = post(&h.app, "/search", json!({ "files": files, "query": "red" })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 1);
    let file = &body["files"][0];
    assert_eq!(file["name"], "red");
    assert!((file["similarity"].as_f64().unwrap() - 1.0).abs() < 1e-4);
}

#[tokio::test(flavor = "multi_thread")]
async fn model_failures_are_internal_errors() {
    let h = harness_with(Box::new(BrokenModel), Arc::new(AtomicUsize::new(0))).await;
    let red = format!("{}/red.png", h.base);

    let (status, body) = post(&h.app, "/analyze", json!({ "url": red, "query": "red" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Inference error: visual session failed");

    let files = json!([{ "url": red }]);
    let (status, body) = post(&h.app, "/search", json!({ "files": files, "query": "red" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Inference error: visual session failed");
}
