use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};

use super::{
    ml::{ClassificationResult, ClassifyOutcome, ModelManager, ModelState, ModelStatus},
    ocr::{RecognitionResult, TextRecognition},
};
use crate::{
    cameras::{Frame, FrameThrottle, LatestFrame},
    config::{Settings, SettingsStore},
    error::Error,
    speech::TtsManager,
};

/// How frames get picked for classification
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "web", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ReaderMode {
    /// Classify the latest frame every `auto_read_interval_ms`
    #[default]
    Auto,
    /// Classify the next frame after [`SubsysManager::request_capture`]
    Manual,
}

/// Snapshot of the reader's state
#[derive(Serialize, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "web", derive(utoipa::ToSchema))]
pub struct ReaderStatus {
    pub mode: ReaderMode,
    pub model_status: ModelStatus,
    pub model: ModelState,
    pub last_error: Option<String>,
    pub busy: bool,
    pub speaking: bool,
}

/// Single-flight gate, released on drop
struct InFlight(Arc<AtomicBool>);
impl InFlight {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}
impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Glues the frame stream, the model, speech and text recognition together
///
/// At most one classification runs at a time. Frames arriving while one is running are dropped.
#[derive(Clone)]
pub struct SubsysManager {
    models: Arc<ModelManager>,
    tts: Arc<TtsManager>,
    ocr: Option<Arc<TextRecognition>>,
    settings: SettingsStore,
    mode: Arc<RwLock<ReaderMode>>,
    capture_requested: Arc<AtomicBool>,
    auto_throttle: Arc<FrameThrottle>,
    in_flight: Arc<AtomicBool>,
    results: Arc<watch::Sender<Option<ClassificationResult>>>,
}
impl SubsysManager {
    pub fn new(models: Arc<ModelManager>, tts: Arc<TtsManager>, settings: SettingsStore) -> Self {
        let (results, _rx) = watch::channel(None);

        Self {
            models,
            tts,
            ocr: None,
            settings,
            mode: Arc::new(RwLock::new(ReaderMode::default())),
            capture_requested: Arc::new(AtomicBool::new(false)),
            auto_throttle: Arc::new(FrameThrottle::default()),
            in_flight: Arc::new(AtomicBool::new(false)),
            results: Arc::new(results),
        }
    }

    pub fn with_ocr(mut self, ocr: TextRecognition) -> Self {
        self.ocr = Some(Arc::new(ocr));
        self
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn mode(&self) -> ReaderMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: ReaderMode) {
        let prev = std::mem::replace(&mut *self.mode.write(), mode);
        if prev != mode {
            info!("switched to {mode:?} mode");
            self.capture_requested.store(false, Ordering::Release);
            self.auto_throttle.reset();
        }
    }

    /// Classify the next frame (manual mode)
    pub fn request_capture(&self) {
        self.capture_requested.store(true, Ordering::Release);
    }

    /// Whether a classification is running
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The last delivered result
    pub fn latest_result(&self) -> Option<ClassificationResult> {
        self.results.borrow().clone()
    }

    /// Watch delivered results
    pub fn subscribe_results(&self) -> watch::Receiver<Option<ClassificationResult>> {
        self.results.subscribe()
    }

    pub fn status(&self) -> ReaderStatus {
        ReaderStatus {
            mode: self.mode(),
            model_status: self.models.status(),
            model: self.models.model_state(),
            last_error: self.models.last_error(),
            busy: self.is_busy(),
            speaking: self.tts.is_speaking(),
        }
    }

    /// Consume throttled frames until the source closes
    pub async fn run(&self, frames: Arc<LatestFrame>) {
        while let Some(frame) = frames.next().await {
            self.handle_frame(frame).await;
        }
        info!("frame stream closed");
    }

    /// Decide whether a frame gets classified and, if so, classify it
    ///
    /// Returns the delivered result, or [`None`] if the frame was dropped.
    pub async fn handle_frame(&self, frame: Frame) -> Option<ClassificationResult> {
        let mode = self.mode();
        let wanted = match mode {
            ReaderMode::Auto => self.auto_throttle.should_emit(frame.timestamp()),
            ReaderMode::Manual => self.capture_requested.load(Ordering::Acquire),
        };
        if !wanted {
            return None;
        }

        let Some(guard) = InFlight::claim(&self.in_flight) else {
            trace!("classification in progress, dropping frame");
            return None;
        };
        if mode == ReaderMode::Manual {
            self.capture_requested.store(false, Ordering::Release);
        }

        self.classify_claimed(guard, frame).await
    }

    /// Classify a frame right away, unless another classification is running
    pub async fn classify(&self, frame: Frame) -> Option<ClassificationResult> {
        let Some(guard) = InFlight::claim(&self.in_flight) else {
            debug!("classification in progress, dropping request");
            return None;
        };

        self.classify_claimed(guard, frame).await
    }

    async fn classify_claimed(&self, _guard: InFlight, frame: Frame) -> Option<ClassificationResult> {
        let models = self.models.clone();
        let outcome = match tokio::task::spawn_blocking(move || models.classify(&frame)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("classification task failed: {err}");
                return None;
            }
        };

        self.deliver(outcome).await
    }

    async fn deliver(&self, outcome: ClassifyOutcome) -> Option<ClassificationResult> {
        if let ClassifyOutcome::Busy = outcome {
            return None;
        }

        let classified = outcome.is_classified();
        let result = outcome.into_result();
        self.results.send_replace(Some(result.clone()));

        if classified {
            let settings = self.settings.settings().await;
            if settings.tts_enabled && settings.passes_threshold(result.confidence) {
                let tts = self.tts.clone();
                let text = result.top_prediction.clone();
                let spoken = tokio::task::spawn_blocking(move || tts.speak(&text)).await;
                match spoken {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!("failed to speak result: {err}"),
                    Err(err) => error!("speech task failed: {err}"),
                }
            } else {
                trace!(
                    "not announcing {} ({:.1}%)",
                    result.top_prediction,
                    result.confidence * 100.0
                );
            }
        }

        Some(result)
    }

    /// Run text recognition on a frame
    ///
    /// Returns [`None`] if no OCR engine is attached.
    pub async fn recognize_text(&self, frame: Frame) -> Option<RecognitionResult> {
        let ocr = self.ocr.clone()?;
        match tokio::task::spawn_blocking(move || ocr.recognize(&frame)).await {
            Ok(result) => Some(result),
            Err(err) => {
                error!("text recognition task failed: {err}");
                Some(RecognitionResult::default())
            }
        }
    }

    /// Bring the model, speech and throttle in line with the stored settings
    pub async fn sync_model(&self) -> Result<(), Error> {
        let settings = self.settings.settings().await;
        self.apply_settings(&settings).await
    }

    pub async fn apply_settings(&self, settings: &Settings) -> Result<(), Error> {
        self.tts
            .set_voice_language(Some(settings.voice_language.clone()));
        self.auto_throttle
            .set_interval(settings.auto_read_interval());

        let models = self.models.clone();
        let model_id = settings.current_model.clone();
        let lang = settings.label_language.clone();
        match tokio::task::spawn_blocking(move || models.initialize(&model_id, &lang)).await {
            Ok(res) => res,
            Err(err) => Err(Error::FailedToLoadModel {
                reason: err.to_string(),
            }),
        }
    }

    /// Force the current model to be loaded again
    pub async fn reload_model(&self) -> Result<(), Error> {
        let models = self.models.clone();
        match tokio::task::spawn_blocking(move || models.reload()).await {
            Ok(res) => res,
            Err(err) => Err(Error::FailedToLoadModel {
                reason: err.to_string(),
            }),
        }
    }

    /// Apply every settings change as it comes in
    pub fn watch_settings(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let mut rx = self.settings.subscribe();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let settings = rx.borrow_and_update().clone();
                if let Err(err) = manager.apply_settings(&settings).await {
                    warn!("failed to apply settings: {err}");
                }
            }
        })
    }
}
