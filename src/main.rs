#[macro_use]
extern crate log;

use std::{path::PathBuf, sync::Arc};

use sharedvision::{
    cameras::{CamManager, FrameThrottle, ReplaySource},
    config::{Config, SettingsStore},
    logger::Logger,
    speech::TtsManager,
    subsystems::{
        ml::{ClassifierOptions, InferenceRuntime, ModelManager},
        SubsysManager,
    },
    utils::Locale,
};

/// Places the config file is looked for, in order
const CONFIG_PATHS: &[&str] = &["/etc/sharedvision.toml", "./sharedvision.toml"];

fn find_config() -> Option<PathBuf> {
    CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

#[cfg(feature = "onnx")]
fn runtime(cfgg: &Config) -> Arc<dyn InferenceRuntime> {
    Arc::new(sharedvision::subsystems::ml::OnnxRuntime::new(
        cfgg.pipeline.input_size,
    ))
}

#[cfg(not(feature = "onnx"))]
fn runtime(_cfgg: &Config) -> Arc<dyn InferenceRuntime> {
    Arc::new(sharedvision::subsystems::ml::UnavailableRuntime)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg_path = find_config();
    let (cfgg, cfg_err) = match &cfg_path {
        Some(path) => match Config::load(path) {
            Ok(cfgg) => (cfgg, None),
            Err(err) => (Config::default(), Some(err)),
        },
        None => (Config::default(), None),
    };

    let mut logger = Logger::new().with_path_prefix("sharedvision");
    if let Some(filter) = &cfgg.log_filter {
        logger = logger.with_filter(filter);
    }
    logger.init()?;

    info!("SharedVision starting up...");
    match (&cfg_path, cfg_err) {
        (_, Some(err)) => warn!("{err}, using defaults"),
        (Some(path), None) => info!("loaded config from {path:?}"),
        (None, None) => info!("no config file found, using defaults"),
    }

    let settings = SettingsStore::new(cfgg.clone(), cfg_path);

    let models = Arc::new(ModelManager::new(
        runtime(&cfgg),
        ClassifierOptions::from(&cfgg.pipeline),
    ));
    let tts = Arc::new(TtsManager::new(Locale::system_default()));

    let manager = SubsysManager::new(models.clone(), tts.clone(), settings.clone());
    #[cfg(feature = "tesseract")]
    let manager = manager.with_ocr(sharedvision::subsystems::ocr::TextRecognition::new(
        Box::new(sharedvision::subsystems::ocr::TesseractRecognizer::new("eng")),
    ));

    if let Err(err) = manager.sync_model().await {
        error!("model not loaded: {err}");
    }
    let _settings_watcher = manager.watch_settings();

    let mut cams = match &cfgg.camera.replay_dir {
        Some(dir) => {
            let source = ReplaySource::open(dir, cfgg.camera.replay_fps)?;
            let throttle = Arc::new(FrameThrottle::new(cfgg.pipeline.capture_interval()));
            let cams = CamManager::spawn(source, throttle)?;

            let frames = cams.frames();
            let manager = manager.clone();
            tokio::spawn(async move { manager.run(frames).await });

            Some(cams)
        }
        None => {
            warn!("no camera configured");
            None
        }
    };

    #[cfg(feature = "web")]
    {
        let manager = manager.clone();
        let api = cfgg.api.clone();
        tokio::spawn(async move {
            if let Err(err) = sharedvision::api::run_api(manager, api.bind_address, api.port).await {
                error!("API server failed: {err}");
            }
        });
    }

    info!("SharedVision ready");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
    }

    info!("shutting down...");
    if let Some(cams) = cams.as_mut() {
        cams.stop();
    }
    models.cleanup();
    tts.shutdown();

    Ok(())
}
