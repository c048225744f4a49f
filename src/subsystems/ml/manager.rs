use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::{
    classifier::{Classifier, ClassifierOptions},
    runtime::InferenceRuntime,
    ClassifyOutcome,
};
use crate::{cameras::Frame, error::Error};

/// Lifecycle of the loaded model
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "web", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

/// Which model is (or should be) loaded
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "web", derive(utoipa::ToSchema))]
pub struct ModelState {
    pub loaded: bool,
    pub model_id: String,
    pub label_language: String,
    pub labels: Vec<String>,
}

#[derive(Default)]
struct Inner {
    status: ModelStatus,
    model: ModelState,
    last_error: Option<String>,
}

/// Owns the loaded model
///
/// Lifecycle calls (`initialize`, `reload`, `cleanup`) are serialized and block, so call them off
/// the async executor. Only one classification runs at a time: a request that finds the model
/// busy gets [`ClassifyOutcome::Busy`].
pub struct ModelManager {
    runtime: Arc<dyn InferenceRuntime>,
    options: ClassifierOptions,
    lifecycle: Mutex<()>,
    inner: RwLock<Inner>,
    classifier: Mutex<Option<Classifier>>,
    load_count: AtomicUsize,
}
impl ModelManager {
    pub fn new(runtime: Arc<dyn InferenceRuntime>, options: ClassifierOptions) -> Self {
        Self {
            runtime,
            options,
            lifecycle: Mutex::new(()),
            inner: RwLock::new(Inner::default()),
            classifier: Mutex::new(None),
            load_count: AtomicUsize::new(0),
        }
    }

    /// Load `model_id` with labels in `label_language`
    ///
    /// Does nothing if that exact model and language are already loaded (or already failed to
    /// load, use [`ModelManager::reload`] to retry). Otherwise the current model is closed first.
    pub fn initialize(&self, model_id: &str, label_language: &str) -> Result<(), Error> {
        let _lifecycle = self.lifecycle.lock();

        {
            let inner = self.inner.read();
            if inner.model.model_id == model_id && inner.model.label_language == label_language {
                match inner.status {
                    ModelStatus::Ready => {
                        debug!("model {model_id} ({label_language}) already loaded");
                        return Ok(());
                    }
                    ModelStatus::Failed => {
                        return Err(Error::FailedToLoadModel {
                            reason: inner.last_error.clone().unwrap_or_default(),
                        });
                    }
                    ModelStatus::Uninitialized | ModelStatus::Loading => {}
                }
            }
        }

        self.load(model_id, label_language)
    }

    /// Force a reload of the current model
    pub fn reload(&self) -> Result<(), Error> {
        let _lifecycle = self.lifecycle.lock();

        let (model_id, label_language) = {
            let inner = self.inner.read();
            (inner.model.model_id.clone(), inner.model.label_language.clone())
        };
        if model_id.is_empty() {
            return Err(Error::FailedToLoadModel {
                reason: String::from("no model selected"),
            });
        }

        self.load(&model_id, &label_language)
    }

    /// Release the model
    ///
    /// Safe to call any number of times.
    pub fn cleanup(&self) {
        let _lifecycle = self.lifecycle.lock();

        self.close();
        *self.inner.write() = Inner::default();

        debug!("model manager cleaned up");
    }

    /// Classify a frame with the loaded model
    pub fn classify(&self, frame: &Frame) -> ClassifyOutcome {
        if self.status() != ModelStatus::Ready {
            return ClassifyOutcome::NotInitialized;
        }

        let Some(mut classifier) = self.classifier.try_lock() else {
            return ClassifyOutcome::Busy;
        };
        let Some(classifier) = classifier.as_mut() else {
            return ClassifyOutcome::NotInitialized;
        };

        match classifier.classify(frame) {
            Ok(result) => {
                debug!(
                    "classified as {} ({:.1}%)",
                    result.top_prediction,
                    result.confidence * 100.0
                );
                ClassifyOutcome::Classified(result)
            }
            Err(err) => {
                warn!("classification failed: {err}");
                ClassifyOutcome::Failed(err)
            }
        }
    }

    pub fn status(&self) -> ModelStatus {
        self.inner.read().status
    }

    pub fn is_ready(&self) -> bool {
        self.status() == ModelStatus::Ready
    }

    pub fn model_state(&self) -> ModelState {
        self.inner.read().model.clone()
    }

    /// Why the last load failed
    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    /// How many times a model load was attempted
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::Relaxed)
    }

    /// Drop the current classifier, waiting for a running classification to finish
    fn close(&self) {
        if let Some(classifier) = self.classifier.lock().take() {
            drop(classifier);
            debug!("closed model");
        }
    }

    fn load(&self, model_id: &str, label_language: &str) -> Result<(), Error> {
        self.close();

        {
            let mut inner = self.inner.write();
            inner.status = ModelStatus::Loading;
            inner.model = ModelState {
                loaded: false,
                model_id: model_id.to_owned(),
                label_language: label_language.to_owned(),
                labels: Vec::new(),
            };
        }
        self.load_count.fetch_add(1, Ordering::Relaxed);

        info!("loading model {model_id} ({label_language})");

        match Classifier::load(&*self.runtime, &self.options, model_id, label_language) {
            Ok(classifier) => {
                let labels = classifier.labels().to_vec();
                *self.classifier.lock() = Some(classifier);

                let mut inner = self.inner.write();
                inner.status = ModelStatus::Ready;
                inner.model.loaded = true;
                inner.model.labels = labels;
                inner.last_error = None;

                Ok(())
            }
            Err(err) => {
                error!("failed to load model {model_id}: {err}");

                let mut inner = self.inner.write();
                inner.status = ModelStatus::Failed;
                inner.last_error = Some(err.to_string());

                Err(err)
            }
        }
    }
}
