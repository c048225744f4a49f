mod common;

use sharedvision::{
    subsystems::ml::{ClassifyOutcome, ModelManager, ModelStatus, TensorData},
    Error,
};

use common::{frame, model_manager, write_model, MockRuntime};

#[test]
fn classify_before_initialize_is_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = MockRuntime::new(vec![1.0, 2.0]);
    let models = model_manager(&runtime, dir.path());

    let outcome = models.classify(&frame(0));
    assert!(matches!(outcome, ClassifyOutcome::NotInitialized));

    let result = outcome.into_result();
    assert_eq!(result.top_prediction, "Model not initialized");
    assert_eq!(result.confidence, 0.0);
    assert!(result.all_predictions.is_empty());
    assert_eq!(runtime.invocations.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn initialize_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_model(
        dir.path(),
        "manat",
        &[("", "one\nfive\n"), ("ru", "один\nпять\n")],
    );
    let runtime = MockRuntime::new(vec![1.0, 2.0]);
    let models = model_manager(&runtime, dir.path());
    assert_eq!(models.status(), ModelStatus::Uninitialized);

    models.initialize("manat", "en").unwrap();
    models.initialize("manat", "en").unwrap();
    assert_eq!(models.load_count(), 1);
    assert!(models.is_ready());

    let state = models.model_state();
    assert!(state.loaded);
    assert_eq!(state.model_id, "manat");
    assert_eq!(state.labels, vec!["one", "five"]);

    // A different label language is a different configuration
    models.initialize("manat", "ru").unwrap();
    assert_eq!(models.load_count(), 2);
    assert_eq!(models.model_state().labels, vec!["один", "пять"]);
}

#[test]
fn failed_load_needs_explicit_reload() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = MockRuntime::new(vec![1.0]);
    let models = model_manager(&runtime, dir.path());

    let err = models.initialize("dollar", "en").unwrap_err();
    assert!(matches!(err, Error::FailedToReadModel { .. }));
    assert_eq!(models.status(), ModelStatus::Failed);
    assert!(models.last_error().is_some());
    assert!(matches!(
        models.classify(&frame(0)),
        ClassifyOutcome::NotInitialized
    ));

    // Same model again doesn't retry
    assert!(models.initialize("dollar", "en").is_err());
    assert_eq!(models.load_count(), 1);

    write_model(dir.path(), "dollar", &[]);
    models.reload().unwrap();
    assert_eq!(models.load_count(), 2);
    assert!(models.is_ready());
}

#[test]
fn cleanup_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "manat", &[]);
    let runtime = MockRuntime::new(vec![1.0]);
    let models = model_manager(&runtime, dir.path());

    models.initialize("manat", "en").unwrap();
    models.cleanup();
    models.cleanup();

    assert_eq!(models.status(), ModelStatus::Uninitialized);
    assert!(!models.model_state().loaded);
    assert!(matches!(
        models.classify(&frame(0)),
        ClassifyOutcome::NotInitialized
    ));
    assert!(models.reload().is_err());
}

#[test]
fn classifies_with_labels_and_fallback_names() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "manat", &[("", "1 manat\n5 manat\n")]);
    let runtime = MockRuntime::new(vec![0.1, 2.0, 1.0]);
    let models = model_manager(&runtime, dir.path());
    models.initialize("manat", "en").unwrap();

    let ClassifyOutcome::Classified(result) = models.classify(&frame(0)) else {
        panic!("expected a classification");
    };

    assert_eq!(result.top_prediction, "5 manat");
    assert!((result.confidence - 0.659).abs() < 1e-3);

    let labels: Vec<_> = result
        .all_predictions
        .iter()
        .map(|p| p.label.as_str())
        .collect();
    assert_eq!(labels, vec!["5 manat", "Class_2", "1 manat"]);
    assert!(result
        .all_predictions
        .windows(2)
        .all(|w| w[0].confidence >= w[1].confidence));
}

#[test]
fn quantized_models_get_bytes() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "manat", &[]);
    let runtime = MockRuntime::new(vec![1.0, 0.0]).quantized();
    let models = model_manager(&runtime, dir.path());
    models.initialize("manat", "en").unwrap();

    assert!(models.classify(&frame(0)).is_classified());

    match runtime.written.lock().as_ref() {
        Some(TensorData::UInt8(data)) => {
            assert_eq!(data.len(), common::INPUT_SIZE * common::INPUT_SIZE * 3);
            // Mid-grey frame, scale 1/255
            assert!(data.iter().all(|&v| (127..=128).contains(&v)));
        }
        other => panic!("expected uint8 input, got {other:?}"),
    };
}

#[test]
fn undecodable_frames_fail_distinctly() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "manat", &[]);
    let runtime = MockRuntime::new(vec![1.0]);
    let models = model_manager(&runtime, dir.path());
    models.initialize("manat", "en").unwrap();

    let bad = sharedvision::cameras::Frame::new(
        4,
        4,
        sharedvision::cameras::PixelFormat::Other(0x11),
        vec![],
        std::time::Duration::ZERO,
    );
    let outcome = models.classify(&bad);
    assert!(matches!(
        outcome,
        ClassifyOutcome::Failed(Error::UnsupportedFormat { .. })
    ));
    assert!(outcome
        .into_result()
        .top_prediction
        .starts_with("Classification error: "));
}

#[test]
fn failed_invocation_is_reported_and_not_retried() {
    use std::sync::atomic::Ordering;

    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "manat", &[]);
    let runtime = MockRuntime::new(vec![1.0, 0.5]);
    let models = model_manager(&runtime, dir.path());
    models.initialize("manat", "en").unwrap();

    runtime.fail_invoke.store(true, Ordering::SeqCst);
    let outcome = models.classify(&frame(0));
    assert!(matches!(
        outcome,
        ClassifyOutcome::Failed(Error::InferenceFailed { .. })
    ));
    assert_eq!(
        outcome.into_result().top_prediction,
        "Classification error: Inference failed: delegate crashed"
    );
    assert_eq!(runtime.invocations.load(Ordering::SeqCst), 1);

    // The model stays usable
    assert_eq!(models.status(), ModelStatus::Ready);
    runtime.fail_invoke.store(false, Ordering::SeqCst);
    assert!(models.classify(&frame(1)).is_classified());
    assert_eq!(models.load_count(), 1);
}

#[test]
fn switching_models_closes_the_previous_one() {
    use std::sync::atomic::Ordering;

    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "manat", &[("", "1 manat\n")]);
    write_model(dir.path(), "dollar", &[("", "1 dollar\n")]);
    let runtime = MockRuntime::new(vec![1.0]);
    let models = model_manager(&runtime, dir.path());

    models.initialize("manat", "en").unwrap();
    assert_eq!(runtime.live.load(Ordering::SeqCst), 1);

    models.initialize("dollar", "en").unwrap();
    assert_eq!(runtime.loads.load(Ordering::SeqCst), 2);
    assert_eq!(runtime.live.load(Ordering::SeqCst), 1);

    let state = models.model_state();
    assert_eq!(state.model_id, "dollar");
    assert_eq!(state.labels, vec!["1 dollar"]);

    models.cleanup();
    assert_eq!(runtime.live.load(Ordering::SeqCst), 0);
}

#[test]
fn last_error_survives_until_a_successful_load() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "manat", &[]);
    let runtime = MockRuntime::new(vec![1.0]);
    let models = model_manager(&runtime, dir.path());

    assert!(models.initialize("dollar", "en").is_err());
    let first = models.last_error().unwrap();
    assert!(first.contains("dollar"), "{first}");

    assert!(models.initialize("euro", "en").is_err());
    assert!(models.last_error().unwrap().contains("euro"));

    models.initialize("manat", "en").unwrap();
    assert_eq!(models.last_error(), None);
}

#[test]
fn never_more_than_ten_predictions() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "manat", &[]);
    let runtime = MockRuntime::new((0..15).map(|i| i as f32).collect());
    let opts = sharedvision::subsystems::ml::ClassifierOptions {
        top_k: 50,
        ..common::options(dir.path())
    };
    let models = ModelManager::new(std::sync::Arc::new(runtime), opts);
    models.initialize("manat", "en").unwrap();

    let ClassifyOutcome::Classified(result) = models.classify(&frame(0)) else {
        panic!("expected a classification");
    };
    assert_eq!(result.all_predictions.len(), 10);
    assert_eq!(result.top_prediction, "Class_14");
}

#[test]
fn debug_dumps_raw_and_processed_images() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "manat", &[]);
    let raw = tempfile::tempdir().unwrap();
    let processed = tempfile::tempdir().unwrap();

    let opts = sharedvision::subsystems::ml::ClassifierOptions {
        save_raw_dir: Some(raw.path().to_path_buf()),
        save_processed_dir: Some(processed.path().to_path_buf()),
        ..common::options(dir.path())
    };
    let models = ModelManager::new(std::sync::Arc::new(MockRuntime::new(vec![1.0])), opts);
    models.initialize("manat", "en").unwrap();

    assert!(models.classify(&frame(0)).is_classified());
    assert!(models.classify(&frame(1)).is_classified());

    let raw_img = image::open(raw.path().join("raw_000001.jpg")).unwrap();
    assert_eq!((raw_img.width(), raw_img.height()), (40, 30));

    let processed_img = image::open(processed.path().join("processed_000000.jpg")).unwrap();
    let size = common::INPUT_SIZE as u32;
    assert_eq!((processed_img.width(), processed_img.height()), (size, size));
}
