#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use sharedvision::{
    cameras::Frame,
    config::{Config, SettingsStore},
    speech::{SpeechSynthesizer, TtsManager},
    subsystems::{
        ml::{
            ClassifierOptions, InferenceRuntime, Interpreter, Model, ModelManager, TensorData,
            TensorInfo, TensorKind,
        },
        SubsysManager,
    },
    utils::Locale,
    Error,
};

pub const INPUT_SIZE: usize = 16;

/// Interpreter returning canned logits
pub struct MockInterpreter {
    input: TensorInfo,
    output: TensorInfo,
    logits: Vec<f32>,
    delay: Duration,
    written: Arc<Mutex<Option<TensorData>>>,
    invocations: Arc<AtomicUsize>,
    fail_invoke: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}
impl Drop for MockInterpreter {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
impl Interpreter for MockInterpreter {
    fn input_info(&self) -> TensorInfo {
        self.input.clone()
    }
    fn output_info(&self) -> TensorInfo {
        self.output.clone()
    }
    fn write_input(&mut self, data: TensorData) -> Result<(), Error> {
        *self.written.lock() = Some(data);
        Ok(())
    }
    fn invoke(&mut self) -> Result<(), Error> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if self.fail_invoke.load(Ordering::SeqCst) {
            return Err(Error::InferenceFailed {
                reason: String::from("delegate crashed"),
            });
        }
        Ok(())
    }
    fn read_output(&self) -> Result<TensorData, Error> {
        Ok(TensorData::Float32(self.logits.clone()))
    }
}

/// Runtime handing out [`MockInterpreter`]s
#[derive(Clone)]
pub struct MockRuntime {
    pub input_kind: TensorKind,
    pub logits: Vec<f32>,
    pub delay: Duration,
    pub loads: Arc<AtomicUsize>,
    pub written: Arc<Mutex<Option<TensorData>>>,
    pub invocations: Arc<AtomicUsize>,
    /// Make every `invoke` fail while set
    pub fail_invoke: Arc<AtomicBool>,
    /// Interpreters created and not yet dropped
    pub live: Arc<AtomicUsize>,
}
impl MockRuntime {
    pub fn new(logits: Vec<f32>) -> Self {
        Self {
            input_kind: TensorKind::Float32,
            logits,
            delay: Duration::ZERO,
            loads: Arc::new(AtomicUsize::new(0)),
            written: Arc::new(Mutex::new(None)),
            invocations: Arc::new(AtomicUsize::new(0)),
            fail_invoke: Arc::new(AtomicBool::new(false)),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn quantized(mut self) -> Self {
        self.input_kind = TensorKind::UInt8;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}
impl InferenceRuntime for MockRuntime {
    fn interpreter(&self, _model: &Model) -> Result<Box<dyn Interpreter>, Error> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);

        let shape = vec![1, INPUT_SIZE, INPUT_SIZE, 3];
        let input = match self.input_kind {
            TensorKind::Float32 => TensorInfo::new(TensorKind::Float32, shape),
            kind => TensorInfo::new(kind, shape).with_quantization(1.0 / 255.0, 0),
        };

        Ok(Box::new(MockInterpreter {
            input,
            output: TensorInfo::new(TensorKind::Float32, vec![1, self.logits.len()]),
            logits: self.logits.clone(),
            delay: self.delay,
            written: self.written.clone(),
            invocations: self.invocations.clone(),
            fail_invoke: self.fail_invoke.clone(),
            live: self.live.clone(),
        }))
    }
}

/// Lay out `<dir>/<model_id>/model.tflite` plus optional labels
pub fn write_model(dir: &Path, model_id: &str, labels: &[(&str, &str)]) {
    let model_dir = dir.join(model_id);
    std::fs::create_dir_all(model_dir.join("labels")).unwrap();
    std::fs::write(model_dir.join("model.tflite"), b"TFL3").unwrap();

    for (lang, contents) in labels {
        let name = if lang.is_empty() {
            String::from("labels.txt")
        } else {
            format!("labels-{lang}.txt")
        };
        std::fs::write(model_dir.join("labels").join(name), contents).unwrap();
    }
}

pub fn options(models_dir: &Path) -> ClassifierOptions {
    ClassifierOptions {
        models_dir: models_dir.to_path_buf(),
        input_size: INPUT_SIZE as u32,
        ..ClassifierOptions::default()
    }
}

pub fn model_manager(runtime: &MockRuntime, models_dir: &Path) -> Arc<ModelManager> {
    Arc::new(ModelManager::new(
        Arc::new(runtime.clone()),
        options(models_dir),
    ))
}

/// Speech engine that writes down what it was asked to say
#[derive(Clone, Default)]
pub struct RecordingSpeech {
    pub spoken: Arc<Mutex<Vec<String>>>,
}
impl SpeechSynthesizer for RecordingSpeech {
    fn is_language_available(&self, _locale: &Locale) -> bool {
        true
    }
    fn speak(&mut self, text: &str, _locale: &Locale) -> Result<(), Error> {
        self.spoken.lock().push(text.to_owned());
        Ok(())
    }
    fn stop(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn is_speaking(&self) -> bool {
        false
    }
    fn shutdown(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

pub struct Harness {
    pub manager: SubsysManager,
    pub models: Arc<ModelManager>,
    pub runtime: MockRuntime,
    pub speech: RecordingSpeech,
    pub settings: SettingsStore,
    _dir: tempfile::TempDir,
}

/// A reader with the default "manat" model loaded
pub async fn harness(runtime: MockRuntime) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    write_model(
        dir.path(),
        "manat",
        &[("", "1 manat\n5 manat\n10 manat\n")],
    );

    let models = model_manager(&runtime, dir.path());
    let speech = RecordingSpeech::default();
    let tts = Arc::new(TtsManager::new(Locale::new("en")));
    tts.initialize(Box::new(speech.clone()));

    let settings = SettingsStore::new(Config::default(), None);
    let manager = SubsysManager::new(models.clone(), tts, settings.clone());
    manager.sync_model().await.unwrap();

    Harness {
        manager,
        models,
        runtime,
        speech,
        settings,
        _dir: dir,
    }
}

pub fn frame(ts_ms: u64) -> Frame {
    let (w, h) = (40u32, 30u32);
    Frame::rgba(
        w,
        h,
        vec![128; (w * h * 4) as usize],
        w as usize * 4,
        Duration::from_millis(ts_ms),
    )
}
