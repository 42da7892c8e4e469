use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use fieldsurvey::aggregate::{aggregate, InputFile};
use fieldsurvey::artifact::{ArtifactWriter, DirectDownload, PhotoWrite};
use fieldsurvey::geocode::{AddressResolver, KakaoResolver};
use fieldsurvey::geojson::decode_record;
use fieldsurvey::projection::ColorToken;
use fieldsurvey::sampler::{ConfirmationGate, FixSampler, SampleRequest, ScriptedProvider, WindowSummary};
use fieldsurvey::{
    GeoFix, PhotoAttachment, PhotoConfig, PhotoSlot, SurveyError, SurveyOutcome, SurveyPipeline,
};

// ---

struct FixedResolver(&'static str);

#[async_trait]
impl AddressResolver for FixedResolver {
    async fn resolve(&self, _lat: f64, _lon: f64) -> String {
        self.0.to_string()
    }
}

struct DeclineGate;

#[async_trait]
impl ConfirmationGate for DeclineGate {
    async fn confirm(&self, _summary: &WindowSummary) -> bool {
        false
    }
}

fn create_test_request(name: &str, secs: u64) -> SampleRequest {
    // ---
    SampleRequest {
        investigator_name: name.to_string(),
        place_name: "north gate".to_string(),
        duration: Duration::from_secs(secs),
    }
}

fn create_test_pipeline(provider: ScriptedProvider, dir: &Path) -> SurveyPipeline {
    create_test_pipeline_with(FixSampler::new(provider), dir)
}

fn create_test_pipeline_with(sampler: FixSampler, dir: &Path) -> SurveyPipeline {
    // ---
    let writer = ArtifactWriter::new(Box::new(DirectDownload::new(dir)), PhotoConfig::default());
    SurveyPipeline::new(sampler, FixedResolver("서울특별시 강남구 테헤란로 152"), writer)
}

fn create_test_png() -> Vec<u8> {
    // ---
    let img = image::RgbImage::from_pixel(64, 48, image::Rgb([120, 160, 90]));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .expect("encode test png");
    buf
}

fn geojson_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    // ---
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "geojson") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Serve exactly one HTTP response and hand back the raw request text.
async fn spawn_stub_server(status: &'static str, body: &'static str) -> Result<(String, JoinHandle<String>)> {
    // ---
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut chunk).await.expect("read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json;charset=UTF-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.expect("write response");
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&request).into_owned()
    });

    Ok((format!("http://{addr}/v2/local/geo/coord2address.json"), handle))
}

// ---

#[tokio::test(start_paused = true)]
async fn survey_saves_best_fix_and_photos() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let provider = ScriptedProvider::fixes_every(
        Duration::from_secs(1),
        [
            GeoFix::new(37.4980, 127.0270, 12.0, 1_743_555_600_000),
            GeoFix::new(37.4979, 127.0276, 4.0, 1_743_555_601_000),
            GeoFix::new(37.4981, 127.0279, 8.0, 1_743_555_602_000),
        ],
    );
    let pipeline = create_test_pipeline(provider.clone(), dir.path());

    let photos = vec![
        PhotoAttachment::new(PhotoSlot::Wide, create_test_png()),
        PhotoAttachment::new(PhotoSlot::Close, vec![0u8; 5 * 1024 * 1024 + 1]),
    ];
    let outcome = tokio_test::assert_ok!(pipeline.run(create_test_request("kim", 5), photos).await);

    let SurveyOutcome::Saved(saved) = outcome else {
        panic!("expected a saved survey");
    };
    assert!(provider.released(), "subscription must be released after the window");
    assert_eq!(saved.fixes_collected, 3);
    assert_eq!(saved.record.accuracy_meters, 4.0);
    assert_eq!(saved.record.road_address, "서울특별시 강남구 테헤란로 152");
    assert_eq!(saved.marker.color, ColorToken::Red);
    assert_eq!(saved.legend.label, "kim (today)");

    // Record round-trips from disk.
    let record_path = saved.report.record.as_ref().expect("record written");
    let decoded = decode_record("saved", &std::fs::read(record_path)?)?;
    assert_eq!(decoded, saved.record);

    // Wide photo re-encoded at half size; oversize close-up skipped.
    let PhotoWrite::Written(wide_path) = saved.report.photo(PhotoSlot::Wide) else {
        panic!("wide photo should be written");
    };
    assert!(wide_path.to_string_lossy().ends_with("_wide.jpg"));
    let wide = image::load_from_memory(&std::fs::read(wide_path)?)?;
    assert_eq!((wide.width(), wide.height()), (32, 24));
    assert!(matches!(
        saved.report.photo(PhotoSlot::Close),
        PhotoWrite::Failed(SurveyError::OversizeAttachment { .. })
    ));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn empty_window_writes_nothing() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let pipeline = create_test_pipeline(ScriptedProvider::new(vec![]), dir.path());

    let photos = vec![PhotoAttachment::new(PhotoSlot::Wide, create_test_png())];
    let result = pipeline.run(create_test_request("lee", 3), photos).await;

    assert!(matches!(result, Err(SurveyError::NoFix)));
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn declined_window_writes_nothing() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let provider = ScriptedProvider::fixes_every(
        Duration::from_millis(500),
        [GeoFix::new(37.4979, 127.0276, 5.0, 1_743_555_600_000)],
    );
    let sampler = FixSampler::new(provider.clone()).with_gate(DeclineGate);
    let pipeline = create_test_pipeline_with(sampler, dir.path());

    let photos = vec![
        PhotoAttachment::new(PhotoSlot::Wide, create_test_png()),
        PhotoAttachment::new(PhotoSlot::Close, create_test_png()),
    ];
    let outcome = pipeline.run(create_test_request("kim", 2), photos).await?;

    assert!(matches!(outcome, SurveyOutcome::Cancelled { .. }));
    assert!(provider.released());
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn blank_investigator_is_rejected_before_sampling() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let provider = ScriptedProvider::fixes_every(Duration::from_secs(1), [GeoFix::new(1.0, 2.0, 3.0, 0)]);
    let pipeline = create_test_pipeline(provider.clone(), dir.path());

    let result = pipeline.run(create_test_request("   ", 3), vec![]).await;

    assert!(matches!(result, Err(SurveyError::Validation(_))));
    assert_eq!(provider.subscriptions(), 0);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn saved_surveys_aggregate() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    for (name, accuracy) in [("kim", 6.0), ("lee", 14.0)] {
        let provider = ScriptedProvider::fixes_every(
            Duration::from_millis(500),
            [GeoFix::new(37.5, 127.0, accuracy, 1_743_555_600_000)],
        );
        let pipeline = create_test_pipeline(provider, dir.path());
        pipeline.run(create_test_request(name, 2), vec![]).await?;
    }

    let mut inputs = Vec::new();
    for path in geojson_files(dir.path())? {
        inputs.push(InputFile::read(&path).await?);
    }
    inputs.push(InputFile::new("notes.geojson", b"[]".to_vec()));

    let report = aggregate(&inputs);
    assert_eq!(report.stats.total(), 2);
    assert_eq!(report.skipped_files(), 1);
    assert_eq!(report.stats.by_region["강남구"], 2);
    assert_eq!(report.stats.mean_accuracy(), Some(10.0));
    assert_eq!(report.stats.accuracy_histogram[&0], 1);
    assert_eq!(report.stats.accuracy_histogram[&10], 1);
    Ok(())
}

// ---

#[tokio::test]
async fn kakao_resolver_reads_road_address() -> Result<()> {
    // ---
    let body = r#"{"meta":{"total_count":1},"documents":[{"road_address":{"address_name":"서울특별시 강남구 테헤란로 152"},"address":{"address_name":"서울 강남구 역삼동 737"}}]}"#;
    let (url, server) = spawn_stub_server("200 OK", body).await?;

    let resolver = KakaoResolver::new(url, "testkey", Duration::from_secs(5));
    let address = resolver.resolve(37.4979, 127.0276).await;
    assert_eq!(address, "서울특별시 강남구 테헤란로 152");

    let request = server.await?.to_ascii_lowercase();
    assert!(request.contains("x=127.0276"), "request: {request}");
    assert!(request.contains("y=37.4979"), "request: {request}");
    assert!(request.contains("authorization: kakaoak testkey"), "request: {request}");
    Ok(())
}

#[tokio::test]
async fn kakao_resolver_error_status_is_empty() -> Result<()> {
    // ---
    let (url, server) = spawn_stub_server("401 Unauthorized", r#"{"errorType":"AccessDeniedError"}"#).await?;

    let resolver = KakaoResolver::new(url, "badkey", Duration::from_secs(5));
    assert_eq!(resolver.resolve(37.4979, 127.0276).await, "");
    server.await?;
    Ok(())
}
