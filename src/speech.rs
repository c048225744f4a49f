//!
//! Text-to-speech
//!
//! The speech engine itself is platform specific and lives behind [`SpeechSynthesizer`].
//! [`TtsManager`] handles everything around it: queueing until the engine is up, picking the
//! voice locale and falling back when a language isn't installed.
//!

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::{error::Error, utils::Locale};

/// Texts kept while the engine isn't initialized yet
const MAX_PENDING: usize = 32;

/// A speech engine
pub trait SpeechSynthesizer: Send {
    /// Whether the engine has a voice for `locale`
    fn is_language_available(&self, locale: &Locale) -> bool;

    /// Speak `text`, interrupting anything currently being spoken
    fn speak(&mut self, text: &str, locale: &Locale) -> Result<(), Error>;

    fn stop(&mut self) -> Result<(), Error>;

    fn is_speaking(&self) -> bool;

    fn shutdown(&mut self) -> Result<(), Error>;
}

struct Inner {
    engine: Option<Box<dyn SpeechSynthesizer>>,
    pending: VecDeque<String>,
    voice_language: Option<String>,
}

/// Speech manager
pub struct TtsManager {
    inner: Mutex<Inner>,
    default_locale: Locale,
}
impl TtsManager {
    pub fn new(default_locale: Locale) -> Self {
        Self {
            inner: Mutex::new(Inner {
                engine: None,
                pending: VecDeque::new(),
                voice_language: None,
            }),
            default_locale,
        }
    }

    /// Attach the speech engine and speak anything queued so far
    ///
    /// Does nothing if an engine is already attached.
    pub fn initialize(&self, engine: Box<dyn SpeechSynthesizer>) {
        let mut inner = self.inner.lock();
        if inner.engine.is_some() {
            debug!("speech engine already initialized");
            return;
        }

        inner.engine = Some(engine);
        info!("speech engine initialized");

        let pending: Vec<String> = inner.pending.drain(..).collect();
        if !pending.is_empty() {
            debug!("speaking {} pending texts", pending.len());
        }
        for text in pending {
            if let Err(err) = self.speak_locked(&mut inner, &text) {
                error!("failed to speak pending text: {err}");
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().engine.is_some()
    }

    /// Set the preferred voice language (`en`, `en-US`, `en_US`...)
    ///
    /// [`None`] or a blank code means the default locale.
    pub fn set_voice_language(&self, code: Option<String>) {
        self.inner.lock().voice_language = code;
    }

    /// Speak `text` in the preferred voice language
    ///
    /// Blank text is skipped. If the engine isn't initialized yet, the text is queued.
    pub fn speak(&self, text: &str) -> Result<(), Error> {
        if text.trim().is_empty() {
            trace!("skipping empty text");
            return Ok(());
        }

        let mut inner = self.inner.lock();
        if inner.engine.is_none() {
            warn!("speech engine not initialized, queueing text");
            if inner.pending.len() >= MAX_PENDING {
                inner.pending.pop_front();
            }
            inner.pending.push_back(text.to_owned());
            return Ok(());
        }

        self.speak_locked(&mut inner, text)
    }

    fn speak_locked(&self, inner: &mut Inner, text: &str) -> Result<(), Error> {
        let target = inner
            .voice_language
            .as_deref()
            .and_then(Locale::parse)
            .unwrap_or_else(|| self.default_locale.clone());

        let Some(engine) = inner.engine.as_mut() else {
            return Ok(());
        };

        let locale = if engine.is_language_available(&target) {
            target
        } else {
            warn!("voice language {target} not available, falling back to {}", self.default_locale);
            if !engine.is_language_available(&self.default_locale) {
                error!("default voice language {} not available either", self.default_locale);
            }
            self.default_locale.clone()
        };

        debug!("speaking in {locale}: {}", text.chars().take(50).collect::<String>());
        engine.speak(text, &locale)
    }

    /// The locale the next utterance would use
    pub fn resolved_locale(&self) -> Locale {
        let inner = self.inner.lock();
        let target = inner
            .voice_language
            .as_deref()
            .and_then(Locale::parse)
            .unwrap_or_else(|| self.default_locale.clone());

        match inner.engine.as_ref() {
            Some(engine) if !engine.is_language_available(&target) => self.default_locale.clone(),
            _ => target,
        }
    }

    pub fn stop(&self) {
        if let Some(engine) = self.inner.lock().engine.as_mut() {
            if let Err(err) = engine.stop() {
                error!("failed to stop speech: {err}");
            }
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.inner
            .lock()
            .engine
            .as_ref()
            .is_some_and(|engine| engine.is_speaking())
    }

    /// Detach and shut down the engine, dropping anything queued
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();

        if let Some(mut engine) = inner.engine.take() {
            debug!("shutting down speech engine");
            if let Err(err) = engine.stop().and_then(|()| engine.shutdown()) {
                error!("failed to shut down speech engine: {err}");
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }
}
