//!
//! Machine learning subsystem
//!
//! Classifies camera frames with an image classification model. See [`ModelManager`] for the
//! lifecycle and [`Classifier`] for the actual frame → ranked predictions path.
//!

mod classifier;
mod manager;
#[cfg(feature = "onnx")]
mod onnx;
mod preproc;
mod runtime;

use serde::Serialize;

pub use classifier::{
    load_labels, quantize, rank, softmax, Classifier, ClassifierOptions, MAX_PREDICTIONS,
};
pub use manager::{ModelManager, ModelState, ModelStatus};
#[cfg(feature = "onnx")]
pub use onnx::OnnxRuntime;
pub use preproc::{center_crop, to_tensor, Preprocessor, Tensor};
pub use runtime::{
    InferenceRuntime, Interpreter, Model, Quantization, TensorData, TensorInfo, TensorKind,
    UnavailableRuntime,
};

use crate::error::Error;

/// A single label and its probability
#[derive(Serialize, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "web", derive(utoipa::ToSchema))]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// Ranked classification output
#[derive(Serialize, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "web", derive(utoipa::ToSchema))]
pub struct ClassificationResult {
    pub top_prediction: String,
    pub confidence: f32,
    /// Best first, at most `top_k` entries
    pub all_predictions: Vec<Prediction>,
}
impl ClassificationResult {
    /// Build a result from ranked predictions
    pub fn from_predictions(all_predictions: Vec<Prediction>) -> Result<Self, Error> {
        let top = all_predictions.first().ok_or(Error::NoPredictions)?;

        Ok(Self {
            top_prediction: top.label.clone(),
            confidence: top.confidence,
            all_predictions,
        })
    }

    /// A result that only carries a message
    pub fn sentinel(message: impl Into<String>) -> Self {
        Self {
            top_prediction: message.into(),
            confidence: 0.0,
            all_predictions: Vec::new(),
        }
    }
}

/// What happened to a classification request
#[derive(Debug)]
pub enum ClassifyOutcome {
    Classified(ClassificationResult),
    /// No model is loaded
    NotInitialized,
    /// Another classification is in progress, this one was dropped
    Busy,
    Failed(Error),
}
impl ClassifyOutcome {
    pub fn is_classified(&self) -> bool {
        matches!(self, Self::Classified(_))
    }

    /// Flatten into a displayable result, with a message in place of the label on failure
    pub fn into_result(self) -> ClassificationResult {
        match self {
            Self::Classified(result) => result,
            Self::NotInitialized => ClassificationResult::sentinel("Model not initialized"),
            Self::Busy => ClassificationResult::sentinel("Classification in progress"),
            Self::Failed(Error::NoPredictions) => ClassificationResult::sentinel("No predictions"),
            Self::Failed(err) => ClassificationResult::sentinel(format!("Classification error: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels() {
        let result = ClassifyOutcome::NotInitialized.into_result();
        assert_eq!(result.top_prediction, "Model not initialized");
        assert_eq!(result.confidence, 0.0);
        assert!(result.all_predictions.is_empty());

        let result = ClassifyOutcome::Failed(Error::NoPredictions).into_result();
        assert_eq!(result.top_prediction, "No predictions");

        let result = ClassifyOutcome::Failed(Error::InferenceFailed {
            reason: String::from("boom"),
        })
        .into_result();
        assert_eq!(result.top_prediction, "Classification error: Inference failed: boom");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn top_prediction_comes_first() {
        let result = ClassificationResult::from_predictions(vec![
            Prediction {
                label: String::from("100 manat"),
                confidence: 0.7,
            },
            Prediction {
                label: String::from("50 manat"),
                confidence: 0.3,
            },
        ])
        .unwrap();

        assert_eq!(result.top_prediction, "100 manat");
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.all_predictions.len(), 2);

        assert!(matches!(
            ClassificationResult::from_predictions(Vec::new()),
            Err(Error::NoPredictions)
        ));
    }
}
