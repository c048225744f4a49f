//!
//! Small utility functions
//!

use std::fmt;

/// A language tag, e.g. `en`, `en-US` or `en_US_POSIX`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    pub language: String,
    pub country: Option<String>,
    pub variant: Option<String>,
}
impl Locale {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            country: None,
            variant: None,
        }
    }

    /// Parse a language code
    ///
    /// Accepts `-` or `_` as separators with up to three parts.
    /// Returns [`None`] for an empty code or one with more than three parts.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }

        let mut parts = code.split(['-', '_']).filter(|part| !part.is_empty());
        let language = parts.next()?.to_lowercase();
        let country = parts.next().map(str::to_uppercase);
        let variant = parts.next().map(String::from);

        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            language,
            country,
            variant,
        })
    }

    /// The system locale, read from `LANG`
    ///
    /// `en_US.UTF-8` becomes `en-US`. Falls back to `en`.
    pub fn system_default() -> Self {
        std::env::var("LANG")
            .ok()
            .and_then(|lang| {
                let code = lang.split(['.', '@']).next().unwrap_or_default().to_owned();
                match code.as_str() {
                    "C" | "POSIX" => None,
                    _ => Self::parse(&code),
                }
            })
            .unwrap_or_else(|| Self::new("en"))
    }
}
impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.language)?;
        if let Some(country) = &self.country {
            write!(f, "-{country}")?;
        }
        if let Some(variant) = &self.variant {
            write!(f, "-{variant}")?;
        }
        Ok(())
    }
}
