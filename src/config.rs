//!
//! Persisted configuration and user settings
//!

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::sync::{watch, RwLock};

use crate::error::{
    Error, FailedToReadConfigSnafu, FailedToSerializeConfigSnafu, FailedToWriteConfigSnafu,
    InvalidConfigSnafu,
};

macro_rules! def_cfg {
    ($(
        $(# [ $smeta:meta ])*
        $struct_ident:ident {
            $(
            $(# [ $meta:meta ])*
            $ident:ident : $ty:ty ,
            )*
        }
    )*) => {
       $(
           #[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
           #[serde(default)]
           $(#[$smeta])*
           pub struct $struct_ident {
               $(
                $(#[$meta])*
                pub $ident: $ty,
               )*
           }
       )*
    };
}

def_cfg! {
    Config {
        log_filter: Option<String>,
        settings: Settings,
        pipeline: Pipeline,
        camera: Camera,
        api: Api,
    }
    #[cfg_attr(feature = "web", derive(utoipa::ToSchema))]
    Settings {
        /// UI language, `None` follows the system
        selected_language: Option<String>,
        auto_read_interval_ms: u64,
        tts_enabled: bool,
        current_model: String,
        label_language: String,
        voice_language: String,
        /// Minimum confidence (percent) a result needs to be read aloud
        prediction_threshold: u8,
        access_code: String,
    }
    Pipeline {
        capture_interval_ms: u64,
        input_size: u32,
        models_dir: PathBuf,
        model_file: String,
        top_k: usize,
        save_raw_dir: Option<PathBuf>,
        save_processed_dir: Option<PathBuf>,
    }
    Camera {
        replay_dir: Option<PathBuf>,
        replay_fps: u32,
    }
    Api {
        bind_address: String,
        port: u16,
    }
}

impl Config {
    /// Load the configuration from the specified path
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let buf = std::fs::read_to_string(path).context(FailedToReadConfigSnafu { path })?;
        let mut cfgg: Self = toml::from_str(&buf).context(InvalidConfigSnafu)?;
        cfgg.settings.normalize();
        Ok(cfgg)
    }

    /// Save the configuration to the specified path
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let toml_cfgg = toml::to_string_pretty(&self).context(FailedToSerializeConfigSnafu)?;
        tokio::fs::write(path, toml_cfgg)
            .await
            .context(FailedToWriteConfigSnafu { path })
    }
}
impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: None,
            settings: Settings::default(),
            pipeline: Pipeline::default(),
            camera: Camera::default(),
            api: Api::default(),
        }
    }
}

impl Settings {
    pub fn auto_read_interval(&self) -> Duration {
        Duration::from_millis(self.auto_read_interval_ms)
    }

    /// Bring out-of-range values back into range
    pub fn normalize(&mut self) {
        self.prediction_threshold = self.prediction_threshold.min(100);
    }

    /// Whether a confidence in `[0, 1]` clears the announcement threshold
    pub fn passes_threshold(&self, confidence: f32) -> bool {
        confidence * 100.0 >= self.prediction_threshold as f32
    }
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            selected_language: None,
            auto_read_interval_ms: 5000,
            tts_enabled: false,
            current_model: String::from("manat"),
            label_language: String::from("en"),
            voice_language: String::from("en-US"),
            prediction_threshold: 20,
            access_code: String::new(),
        }
    }
}

impl Pipeline {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }
}
impl Default for Pipeline {
    fn default() -> Self {
        Self {
            capture_interval_ms: 200,
            input_size: 224,
            models_dir: PathBuf::from("models"),
            model_file: String::from("model.tflite"),
            top_k: 10,
            save_raw_dir: None,
            save_processed_dir: None,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            replay_dir: None,
            replay_fps: 30,
        }
    }
}

impl Default for Api {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: 6942,
        }
    }
}

/// Key-value settings store backed by the config file
///
/// Every change is broadcast to [`SettingsStore::subscribe`]rs and, if the store has a
/// backing path, written back to disk.
#[derive(Clone)]
pub struct SettingsStore {
    cfgg: Arc<RwLock<Config>>,
    path: Option<PathBuf>,
    tx: Arc<watch::Sender<Settings>>,
}
impl SettingsStore {
    pub fn new(cfgg: Config, path: Option<PathBuf>) -> Self {
        let (tx, _rx) = watch::channel(cfgg.settings.clone());

        Self {
            cfgg: Arc::new(RwLock::new(cfgg)),
            path,
            tx: Arc::new(tx),
        }
    }

    /// Get a copy of the whole configuration
    pub async fn config(&self) -> Config {
        self.cfgg.read().await.clone()
    }

    /// Get a copy of the user settings
    pub async fn settings(&self) -> Settings {
        self.cfgg.read().await.settings.clone()
    }

    /// Watch for settings changes
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Replace the user settings
    pub async fn set_settings(&self, settings: Settings) -> Result<Settings, Error> {
        self.update(move |s| *s = settings).await
    }

    /// Modify the user settings in place
    ///
    /// The write lock is held until the file is saved, so saves land in update order.
    pub async fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<Settings, Error> {
        let mut cfgg = self.cfgg.write().await;
        let mut settings = cfgg.settings.clone();
        f(&mut settings);
        settings.normalize();

        let prev = std::mem::replace(&mut cfgg.settings, settings.clone());
        if let Some(path) = &self.path {
            if let Err(err) = cfgg.save(path).await {
                cfgg.settings = prev;
                return Err(err);
            }
            trace!("saved settings to {path:?}");
        }

        self.tx.send_replace(settings.clone());

        Ok(settings)
    }

    pub async fn set_selected_language(&self, code: Option<String>) -> Result<Settings, Error> {
        self.update(|s| s.selected_language = code).await
    }

    pub async fn set_auto_read_interval(&self, interval: Duration) -> Result<Settings, Error> {
        self.update(|s| s.auto_read_interval_ms = interval.as_millis() as u64)
            .await
    }

    pub async fn set_tts_enabled(&self, enabled: bool) -> Result<Settings, Error> {
        self.update(|s| s.tts_enabled = enabled).await
    }

    pub async fn set_current_model(&self, model_id: impl Into<String>) -> Result<Settings, Error> {
        let model_id = model_id.into();
        self.update(|s| s.current_model = model_id).await
    }

    pub async fn set_label_language(&self, code: impl Into<String>) -> Result<Settings, Error> {
        let code = code.into();
        self.update(|s| s.label_language = code).await
    }

    pub async fn set_voice_language(&self, code: impl Into<String>) -> Result<Settings, Error> {
        let code = code.into();
        self.update(|s| s.voice_language = code).await
    }

    pub async fn set_prediction_threshold(&self, percent: u8) -> Result<Settings, Error> {
        self.update(|s| s.prediction_threshold = percent).await
    }

    pub async fn set_access_code(&self, code: impl Into<String>) -> Result<Settings, Error> {
        let code = code.into();
        self.update(|s| s.access_code = code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let cfgg: Config = toml::from_str(
            r#"
            [settings]
            tts_enabled = true
            current_model = "dollar"

            [pipeline]
            capture_interval_ms = 100
            "#,
        )
        .unwrap();

        assert!(cfgg.settings.tts_enabled);
        assert_eq!(cfgg.settings.current_model, "dollar");
        assert_eq!(cfgg.settings.label_language, "en");
        assert_eq!(cfgg.settings.auto_read_interval_ms, 5000);
        assert_eq!(cfgg.pipeline.capture_interval(), Duration::from_millis(100));
        assert_eq!(cfgg.pipeline.input_size, 224);
        assert_eq!(cfgg.api.port, 6942);
    }

    #[test]
    fn threshold_is_a_percentage() {
        let settings = Settings::default();
        assert!(settings.passes_threshold(0.2));
        assert!(settings.passes_threshold(0.95));
        assert!(!settings.passes_threshold(0.19));
    }

    #[tokio::test]
    async fn store_persists_and_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sharedvision.toml");

        let store = SettingsStore::new(Config::default(), Some(path.clone()));
        let mut rx = store.subscribe();

        store.set_label_language("ru").await.unwrap();
        store.set_prediction_threshold(250).await.unwrap();

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.label_language, "ru");
        assert_eq!(seen.prediction_threshold, 100);

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.settings, seen);
    }

    #[tokio::test]
    async fn every_write_path_clamps_threshold() {
        let store = SettingsStore::new(Config::default(), None);

        let saved = store
            .set_settings(Settings {
                prediction_threshold: 250,
                ..Settings::default()
            })
            .await
            .unwrap();
        assert_eq!(saved.prediction_threshold, 100);
        assert_eq!(store.settings().await.prediction_threshold, 100);
        assert!(store.settings().await.passes_threshold(1.0));

        let saved = store.update(|s| s.prediction_threshold = 101).await.unwrap();
        assert_eq!(saved.prediction_threshold, 100);
    }

    #[test]
    fn loaded_threshold_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sharedvision.toml");
        std::fs::write(&path, "[settings]\nprediction_threshold = 180\n").unwrap();

        let cfgg = Config::load(&path).unwrap();
        assert_eq!(cfgg.settings.prediction_threshold, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_persist_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sharedvision.toml");
        let store = SettingsStore::new(Config::default(), Some(path.clone()));

        let tasks: Vec<_> = (0..16u8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.set_prediction_threshold(i).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let on_disk = Config::load(&path).unwrap();
        assert_eq!(on_disk.settings, store.settings().await);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::FailedToReadConfig { .. }));
    }
}
