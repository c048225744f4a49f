use std::path::{Path, PathBuf};

use snafu::ResultExt;

use super::{
    preproc::{to_tensor, Preprocessor},
    runtime::{InferenceRuntime, Interpreter, Model, Quantization, TensorData, TensorInfo, TensorKind},
    ClassificationResult, Prediction,
};
use crate::{
    cameras::{encode_jpeg, Frame},
    config,
    error::{Error, FailedToSaveImageSnafu},
};

/// Upper bound on ranked predictions kept per result
pub const MAX_PREDICTIONS: usize = 10;

/// Where models live and how to run them
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOptions {
    /// Directory holding one subdirectory per model id
    pub models_dir: PathBuf,
    /// Model file name inside a model's directory
    pub model_file: String,
    /// Used when the model doesn't report an NHWC input shape
    pub input_size: u32,
    /// Capped at [`MAX_PREDICTIONS`]
    pub top_k: usize,
    /// Write every captured frame here as JPEG
    pub save_raw_dir: Option<PathBuf>,
    /// Write every preprocessed image here as JPEG
    pub save_processed_dir: Option<PathBuf>,
}
impl Default for ClassifierOptions {
    fn default() -> Self {
        Self::from(&config::Pipeline::default())
    }
}
impl From<&config::Pipeline> for ClassifierOptions {
    fn from(cfgg: &config::Pipeline) -> Self {
        Self {
            models_dir: cfgg.models_dir.clone(),
            model_file: cfgg.model_file.clone(),
            input_size: cfgg.input_size,
            top_k: cfgg.top_k.min(MAX_PREDICTIONS),
            save_raw_dir: cfgg.save_raw_dir.clone(),
            save_processed_dir: cfgg.save_processed_dir.clone(),
        }
    }
}

/// A loaded model plus everything needed to turn frames into ranked predictions
pub struct Classifier {
    interpreter: Box<dyn Interpreter>,
    preproc: Preprocessor,
    labels: Vec<String>,
    top_k: usize,
    save_raw_dir: Option<PathBuf>,
    save_processed_dir: Option<PathBuf>,
    saved: usize,
}
impl Classifier {
    /// Load `<models_dir>/<model_id>/<model_file>` and its labels for `label_language`
    pub fn load(
        runtime: &dyn InferenceRuntime,
        opts: &ClassifierOptions,
        model_id: &str,
        label_language: &str,
    ) -> Result<Self, Error> {
        let model_dir = opts.models_dir.join(model_id);
        let model = Model::from_file(model_dir.join(&opts.model_file))?;
        let interpreter = runtime.interpreter(&model)?;
        let labels = load_labels(&model_dir, label_language);

        Ok(Self::new(interpreter, labels, opts))
    }

    /// Wrap an already created interpreter
    pub fn new(interpreter: Box<dyn Interpreter>, labels: Vec<String>, opts: &ClassifierOptions) -> Self {
        let input = interpreter.input_info();
        let output = interpreter.output_info();

        // NHWC: [1, height, width, 3]
        let input_size = match input.shape.as_slice() {
            [_, h, w, 3] if h == w && *h > 0 => *h as u32,
            _ => opts.input_size,
        };

        info!(
            "model ready: input {:?} {}, output {:?} {}, {} labels",
            input.shape,
            input.kind,
            output.shape,
            output.kind,
            labels.len()
        );

        Self {
            interpreter,
            preproc: Preprocessor::new(input_size),
            labels,
            top_k: opts.top_k.min(MAX_PREDICTIONS),
            save_raw_dir: opts.save_raw_dir.clone(),
            save_processed_dir: opts.save_processed_dir.clone(),
            saved: 0,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn input_size(&self) -> u32 {
        self.preproc.input_size()
    }

    /// Classify a single frame
    pub fn classify(&mut self, frame: &Frame) -> Result<ClassificationResult, Error> {
        let seq = self.saved;
        self.saved += 1;

        if let Some(dir) = &self.save_raw_dir {
            dump_jpeg(dir.join(format!("raw_{seq:06}.jpg")), || frame.to_jpeg(95));
        }

        let img = self.preproc.prepare(frame)?;

        if let Some(dir) = &self.save_processed_dir {
            dump_jpeg(dir.join(format!("processed_{seq:06}.jpg")), || encode_jpeg(&img, 95));
        }

        let tensor = to_tensor(&img);
        let predictions = self.run(&tensor.data)?;
        ClassificationResult::from_predictions(predictions)
    }

    /// Run the model on a preprocessed tensor
    pub fn run(&mut self, input: &[f32]) -> Result<Vec<Prediction>, Error> {
        let input_info = self.interpreter.input_info();
        if input.len() != input_info.len() {
            return Err(Error::TensorSizeMismatch {
                expected: input_info.len(),
                actual: input.len(),
            });
        }

        let data = match input_info.kind {
            TensorKind::Float32 => TensorData::Float32(input.to_vec()),
            TensorKind::UInt8 => TensorData::UInt8(quantize(input, input_quantization(&input_info))),
            TensorKind::Int8 => {
                TensorData::Int8(quantize_i8(input, input_quantization(&input_info)))
            }
        };

        self.interpreter.write_input(data)?;
        self.interpreter.invoke()?;
        let output = self.interpreter.read_output()?;
        let output_info = self.interpreter.output_info();

        let mut logits = dequantize(output, output_info.quantization);

        // [batch, classes]
        let classes = output_info.shape.get(1).copied().unwrap_or(logits.len());
        logits.truncate(classes);

        if logits.is_empty() {
            return Err(Error::NoPredictions);
        }

        Ok(rank(&softmax(&logits), &self.labels, self.top_k))
    }
}

/// Write a debug image, logging instead of failing
fn dump_jpeg(path: PathBuf, encode: impl FnOnce() -> Result<Vec<u8>, Error>) {
    let written = encode().and_then(|jpeg| {
        std::fs::write(&path, jpeg).context(FailedToSaveImageSnafu { path: &path })
    });
    match written {
        Ok(()) => trace!("saved {path:?}"),
        Err(err) => warn!("failed to save debug image: {err}"),
    }
}

fn input_quantization(info: &TensorInfo) -> Quantization {
    match info.quantization {
        Some(q) if q.scale > 0.0 => q,
        _ => Quantization {
            scale: 1.0 / 255.0,
            zero_point: 0,
        },
    }
}

/// Requantize floats into unsigned 8-bit values
///
/// `q = clamp(trunc(v / scale + zero_point), 0, 255)`
pub fn quantize(values: &[f32], q: Quantization) -> Vec<u8> {
    values
        .iter()
        .map(|&v| ((v / q.scale + q.zero_point as f32) as i32).clamp(0, 255) as u8)
        .collect()
}

fn quantize_i8(values: &[f32], q: Quantization) -> Vec<i8> {
    values
        .iter()
        .map(|&v| ((v / q.scale + q.zero_point as f32) as i32).clamp(-128, 127) as i8)
        .collect()
}

fn dequantize(data: TensorData, q: Option<Quantization>) -> Vec<f32> {
    let (scale, zero_point) = match q {
        Some(q) if q.scale > 0.0 => (q.scale, q.zero_point as f32),
        _ => (1.0, 0.0),
    };

    match data {
        TensorData::Float32(data) => data,
        TensorData::UInt8(data) => data
            .into_iter()
            .map(|v| (v as f32 - zero_point) * scale)
            .collect(),
        TensorData::Int8(data) => data
            .into_iter()
            .map(|v| (v as f32 - zero_point) * scale)
            .collect(),
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }

    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|e| e / sum).collect()
}

/// Label and sort probabilities, best first, keeping `top_k`
///
/// Indices without a label are named `Class_<i>`. Ties keep their index order.
pub fn rank(probs: &[f32], labels: &[String], top_k: usize) -> Vec<Prediction> {
    let mut predictions: Vec<Prediction> = probs
        .iter()
        .enumerate()
        .map(|(i, &confidence)| Prediction {
            label: labels
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("Class_{i}")),
            confidence,
        })
        .collect();

    predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    predictions.truncate(top_k);
    predictions
}

/// Read the label list for a model
///
/// Tries `labels/labels-<lang>.txt` first, then `labels/labels.txt`. Lines are trimmed and empty
/// ones dropped. Missing labels aren't fatal: an empty list is returned and generated names are
/// used instead.
pub fn load_labels(model_dir: &Path, lang: &str) -> Vec<String> {
    let labels_dir = model_dir.join("labels");
    let candidates = [
        labels_dir.join(format!("labels-{lang}.txt")),
        labels_dir.join("labels.txt"),
    ];

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(buf) => {
                debug!("loading labels from {path:?}");
                return buf
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(String::from)
                    .collect();
            }
            Err(err) => trace!("no labels at {path:?}: {err}"),
        }
    }

    warn!("no labels found for {model_dir:?} ({lang}), using generated names");
    Vec::new()
}
