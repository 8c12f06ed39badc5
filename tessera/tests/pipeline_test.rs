use std::sync::Arc;

use image::Luma;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use tessera::config::Config;
use tessera::error::TesseraError;
use tessera::ocr::{
    Attempt, OcrPipeline, OcrProvider, OcrResponse, RecognitionOutcome, RecognitionParams,
    SegmentationMode,
};

mod common;
use common::{banner, blank_image, encode_png, glyph_row, init_test_logger, page, ScriptedEngine};

fn pipeline(engine: Arc<ScriptedEngine>) -> OcrPipeline {
    init_test_logger();
    OcrPipeline::new(
        OcrProvider::with_engine(engine, 4),
        Arc::new(Config::default()),
    )
}

fn params(mode: &str) -> RecognitionParams {
    RecognitionParams {
        mode: Some(mode.to_string()),
        ..RecognitionParams::default()
    }
}

async fn run(
    pipeline: &OcrPipeline,
    image: Vec<u8>,
    params: &RecognitionParams,
) -> Result<RecognitionOutcome, TesseraError> {
    let request = pipeline.resolve(params)?;
    pipeline
        .run(image, &request, &CancellationToken::new())
        .await
}

fn approx(value: Option<f32>, expected: f32) -> bool {
    value.is_some_and(|v| (v - expected).abs() < 1e-5)
}

#[tokio::test]
async fn test_recognition_is_idempotent() {
    let engine = Arc::new(ScriptedEngine::new(30.0, 70.0));
    let pipeline = pipeline(engine);
    let image = encode_png(&page(320, 200));

    let first = run(&pipeline, image.clone(), &params("auto")).await.unwrap();
    let second = run(&pipeline, image, &params("auto")).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_confident_initial_attempt_is_accepted() {
    let engine = Arc::new(ScriptedEngine::new(90.0, 99.0));
    let pipeline = pipeline(engine.clone());

    let outcome = run(&pipeline, encode_png(&glyph_row(5)), &params("auto"))
        .await
        .unwrap();

    assert!(!outcome.fallback_ran);
    assert_eq!(outcome.selected, Attempt::Initial);
    assert!(approx(outcome.scene.aggregate, 0.9));
    assert_eq!(engine.calls_in(SegmentationMode::SingleChar), 0);
}

#[tokio::test]
async fn test_fallback_selected_when_more_confident() {
    let engine = Arc::new(ScriptedEngine::new(30.0, 80.0));
    let pipeline = pipeline(engine);

    let outcome = run(&pipeline, encode_png(&glyph_row(5)), &params("auto"))
        .await
        .unwrap();

    assert!(outcome.fallback_ran);
    assert_eq!(outcome.selected, Attempt::Fallback);
    assert!(approx(outcome.scene.aggregate, 0.8));
    assert_eq!(outcome.scene.tokens.len(), 5);
}

#[tokio::test]
async fn test_initial_kept_when_fallback_is_worse_or_equal() {
    for (line, glyph, expected) in [(40.0, 20.0, 0.4), (30.0, 30.0, 0.3)] {
        let engine = Arc::new(ScriptedEngine::new(line, glyph));
        let pipeline = pipeline(engine);

        let outcome = run(&pipeline, encode_png(&glyph_row(4)), &params("auto"))
            .await
            .unwrap();

        assert!(outcome.fallback_ran);
        assert_eq!(outcome.selected, Attempt::Initial, "line={line} glyph={glyph}");
        assert!(approx(outcome.scene.aggregate, expected));
        assert_eq!(outcome.scene.tokens[0].text, "line");
    }
}

#[tokio::test]
async fn test_unknown_initial_confidence_loses_to_any_fallback() {
    let engine = Arc::new(ScriptedEngine::new(-1.0, 5.0));
    let pipeline = pipeline(engine);

    let outcome = run(&pipeline, encode_png(&glyph_row(3)), &params("single_block"))
        .await
        .unwrap();

    assert_eq!(outcome.selected, Attempt::Fallback);
    assert!(approx(outcome.scene.aggregate, 0.05));
}

#[tokio::test]
async fn test_single_char_mode_never_falls_back() {
    let engine = Arc::new(ScriptedEngine::new(10.0, 10.0));
    let pipeline = pipeline(engine.clone());

    let outcome = run(&pipeline, encode_png(&glyph_row(3)), &params("single_char"))
        .await
        .unwrap();

    assert!(!outcome.fallback_ran);
    assert_eq!(outcome.scene.tokens.len(), 1);
    let calls = engine.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].mode, SegmentationMode::SingleChar);
}

#[tokio::test]
async fn test_low_confidence_multi_glyph_runs_exactly_one_fallback() {
    let engine = Arc::new(ScriptedEngine::new(20.0, 40.0));
    let pipeline = pipeline(engine.clone());

    let outcome = run(&pipeline, encode_png(&glyph_row(5)), &params("auto"))
        .await
        .unwrap();

    assert!(outcome.fallback_ran);
    // One line in the initial attempt, then one call per glyph.
    assert_eq!(engine.calls_in(SegmentationMode::Auto), 1);
    assert_eq!(engine.calls_in(SegmentationMode::SingleChar), 5);
    assert_eq!(engine.calls().len(), 6);
}

#[tokio::test]
async fn test_psm_override_applies_to_initial_attempt_only() {
    let engine = Arc::new(ScriptedEngine::new(10.0, 20.0));
    let pipeline = pipeline(engine.clone());
    let params = RecognitionParams {
        psm: Some("7".to_string()),
        ..params("auto")
    };

    run(&pipeline, encode_png(&glyph_row(3)), &params)
        .await
        .unwrap();

    assert_eq!(engine.calls_in(SegmentationMode::SingleLine), 1);
    assert_eq!(engine.calls_in(SegmentationMode::SingleChar), 3);
}

#[tokio::test]
async fn test_polygons_stay_inside_rotated_image() {
    let mut engine = ScriptedEngine::new(20.0, 30.0);
    engine.oversized_boxes = true;
    let engine = Arc::new(engine);
    let pipeline = pipeline(engine);

    let (width, height) = (320, 200);
    let rotated = rotate_about_center(
        &page(width, height),
        6f32.to_radians(),
        Interpolation::Bilinear,
        Luma([255]),
    );

    let outcome = run(&pipeline, encode_png(&rotated), &params("auto"))
        .await
        .unwrap();

    assert!(!outcome.scene.tokens.is_empty());
    for token in &outcome.scene.tokens {
        for [x, y] in token.region {
            assert!((0.0..=width as f32).contains(&x), "x = {x}");
            assert!((0.0..=height as f32).contains(&y), "y = {y}");
        }
    }
}

#[tokio::test]
async fn test_allow_and_deny_are_sanitized_and_disjoint() {
    let engine = Arc::new(ScriptedEngine::new(90.0, 90.0));
    let pipeline = pipeline(engine.clone());
    let params = RecognitionParams {
        whitelist: Some("abc;$ d\"".to_string()),
        blacklist: Some("c|".to_string()),
        ..params("single_line")
    };

    run(&pipeline, encode_png(&banner(200)), &params)
        .await
        .unwrap();

    let calls = engine.calls();
    assert_eq!(calls[0].allow.as_deref(), Some("abd"));
    assert_eq!(calls[0].deny.as_deref(), Some("c"));
}

#[tokio::test]
async fn test_banner_in_single_line_mode() {
    let engine = Arc::new(ScriptedEngine::new(95.0, 10.0));
    let pipeline = pipeline(engine);
    let width = 400;

    let outcome = run(&pipeline, encode_png(&banner(width)), &params("single_line"))
        .await
        .unwrap();

    assert_eq!(outcome.scene.tokens.len(), 1);
    let token = &outcome.scene.tokens[0];
    assert!(token.confidence.unwrap() >= 0.9);
    let xs: Vec<f32> = token.region.iter().map(|[x, _]| *x).collect();
    let min_x = xs.iter().cloned().fold(f32::MAX, f32::min);
    let max_x = xs.iter().cloned().fold(f32::MIN, f32::max);
    assert!(min_x <= 1.0, "min_x = {min_x}");
    assert!(max_x >= width as f32 - 1.0, "max_x = {max_x}");
}

#[tokio::test]
async fn test_blank_image_is_empty_success() {
    let engine = Arc::new(ScriptedEngine::new(90.0, 90.0));
    let pipeline = pipeline(engine.clone());

    let outcome = run(&pipeline, encode_png(&blank_image(120, 80)), &params("auto"))
        .await
        .unwrap();

    assert!(outcome.scene.is_empty());
    assert!(engine.calls().is_empty());
    assert_eq!(
        serde_json::to_value(OcrResponse::success(&[outcome.scene])).unwrap(),
        serde_json::json!({"msg": "Success", "results": [[]]})
    );
}

#[tokio::test]
async fn test_corrupted_bytes_are_decode_errors() {
    let engine = Arc::new(ScriptedEngine::new(90.0, 90.0));
    let pipeline = pipeline(engine.clone());

    let mut bytes = encode_png(&glyph_row(3));
    bytes.truncate(bytes.len() / 3);

    let result = run(&pipeline, bytes, &params("auto")).await;
    assert!(matches!(result, Err(TesseraError::Decode(_))));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_parameters_fail_before_recognition() {
    let engine = Arc::new(ScriptedEngine::new(90.0, 90.0));
    let pipeline = pipeline(engine.clone());

    for params in [
        params("diagonal"),
        RecognitionParams {
            psm: Some("2".to_string()),
            ..RecognitionParams::default()
        },
        RecognitionParams {
            psm: Some("fourteen".to_string()),
            ..RecognitionParams::default()
        },
    ] {
        let result = run(&pipeline, encode_png(&glyph_row(3)), &params).await;
        assert!(matches!(result, Err(TesseraError::Config(_))), "{params:?}");
    }
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_engine_failure_aborts_request() {
    let mut engine = ScriptedEngine::new(90.0, 90.0);
    engine.fail = true;
    let pipeline = pipeline(Arc::new(engine));

    let result = run(&pipeline, encode_png(&glyph_row(3)), &params("auto")).await;
    assert!(matches!(result, Err(TesseraError::Engine(_))));
}

#[tokio::test]
async fn test_unavailable_engine() {
    init_test_logger();
    let pipeline = OcrPipeline::new(
        OcrProvider::unavailable("not installed"),
        Arc::new(Config::default()),
    );

    let result = run(&pipeline, encode_png(&glyph_row(3)), &params("auto")).await;
    assert!(matches!(result, Err(TesseraError::EngineUnavailable(_))));
}

#[tokio::test]
async fn test_cancelled_request_skips_engine() {
    let engine = Arc::new(ScriptedEngine::new(90.0, 90.0));
    let pipeline = pipeline(engine.clone());
    let request = pipeline.resolve(&params("auto")).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = pipeline
        .run(encode_png(&glyph_row(3)), &request, &cancel)
        .await;

    assert!(matches!(result, Err(TesseraError::Cancelled)));
    assert!(engine.calls().is_empty());
}
