//!
//! Text recognition subsystem
//!

use std::collections::BTreeMap;

use image::RgbImage;
use serde::Serialize;

use crate::{cameras::Frame, error::Error};

/// A block of recognized text, split into lines
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "web", derive(utoipa::ToSchema))]
pub struct TextBlock {
    pub text: String,
    pub lines: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "web", derive(utoipa::ToSchema))]
pub struct RecognitionResult {
    pub text: String,
    pub blocks: Vec<TextBlock>,
}
impl RecognitionResult {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// An OCR engine
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, img: &RgbImage) -> Result<RecognitionResult, Error>;
}

/// One recognized word with its position in the page layout
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub block_num: i32,
    pub line_num: i32,
    pub word_num: i32,
    pub text: String,
    pub conf: f32,
}

/// Group words into blocks and lines, in reading order
///
/// Empty and zero-confidence words are dropped.
pub fn group_words(words: impl IntoIterator<Item = Word>) -> Vec<TextBlock> {
    let mut blocks: BTreeMap<i32, BTreeMap<i32, Vec<(i32, String)>>> = BTreeMap::new();
    for word in words {
        if word.text.trim().is_empty() || word.conf <= 0.0 {
            continue;
        }
        blocks
            .entry(word.block_num)
            .or_default()
            .entry(word.line_num)
            .or_default()
            .push((word.word_num, word.text));
    }

    blocks
        .into_values()
        .map(|lines| {
            let lines: Vec<String> = lines
                .into_values()
                .map(|mut words| {
                    words.sort_by_key(|(num, _)| *num);
                    words
                        .into_iter()
                        .map(|(_, text)| text)
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect();

            TextBlock {
                text: lines.join("\n"),
                lines,
            }
        })
        .collect()
}

/// Text recognition manager
///
/// Never fails: engine errors are logged and give an empty result.
pub struct TextRecognition {
    engine: Box<dyn TextRecognizer>,
}
impl TextRecognition {
    pub fn new(engine: Box<dyn TextRecognizer>) -> Self {
        Self { engine }
    }

    /// Recognize text in a camera frame
    pub fn recognize(&self, frame: &Frame) -> RecognitionResult {
        match frame.to_rgb() {
            Ok(img) => self.recognize_image(&img),
            Err(err) => {
                error!("text recognition failed: {err}");
                RecognitionResult::default()
            }
        }
    }

    pub fn recognize_image(&self, img: &RgbImage) -> RecognitionResult {
        debug!("starting text recognition on {}x{} image", img.width(), img.height());

        match self.engine.recognize(img) {
            Ok(result) => {
                info!(
                    "text recognition completed, {} characters in {} blocks",
                    result.text.chars().count(),
                    result.blocks.len()
                );
                result
            }
            Err(err) => {
                error!("text recognition failed: {err}");
                RecognitionResult::default()
            }
        }
    }
}

#[cfg(feature = "tesseract")]
pub use self::tesseract::TesseractRecognizer;

#[cfg(feature = "tesseract")]
mod tesseract {
    use std::collections::HashMap;

    use image::{DynamicImage, RgbImage};
    use rusty_tesseract::{Args, Image};

    use super::{group_words, RecognitionResult, TextRecognizer, Word};
    use crate::error::Error;

    /// [`TextRecognizer`] backed by the `tesseract` binary
    pub struct TesseractRecognizer {
        lang: String,
    }
    impl TesseractRecognizer {
        /// `lang` is a tesseract language code, e.g. `eng` or `eng+rus`
        pub fn new(lang: impl Into<String>) -> Self {
            Self { lang: lang.into() }
        }

        fn args(&self) -> Args {
            Args {
                lang: self.lang.clone(),
                config_variables: HashMap::new(),
                dpi: Some(150),
                psm: Some(3),
                oem: Some(3),
            }
        }
    }
    impl TextRecognizer for TesseractRecognizer {
        fn recognize(&self, img: &RgbImage) -> Result<RecognitionResult, Error> {
            let dynamic = DynamicImage::ImageRgb8(img.clone());
            let tess_img = Image::from_dynamic_image(&dynamic).map_err(|err| {
                Error::RecognitionFailed {
                    reason: err.to_string(),
                }
            })?;
            let args = self.args();

            let text = rusty_tesseract::image_to_string(&tess_img, &args).map_err(|err| {
                Error::RecognitionFailed {
                    reason: err.to_string(),
                }
            })?;
            let data = rusty_tesseract::image_to_data(&tess_img, &args).map_err(|err| {
                Error::RecognitionFailed {
                    reason: err.to_string(),
                }
            })?;

            let blocks = group_words(data.data.into_iter().map(|d| Word {
                block_num: d.block_num,
                line_num: d.line_num,
                word_num: d.word_num,
                text: d.text,
                conf: d.conf,
            }));

            Ok(RecognitionResult {
                text: text.trim().to_owned(),
                blocks,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn word(block_num: i32, line_num: i32, word_num: i32, text: &str, conf: f32) -> Word {
        Word {
            block_num,
            line_num,
            word_num,
            text: text.to_owned(),
            conf,
        }
    }

    #[test]
    fn words_group_in_reading_order() {
        let blocks = group_words(vec![
            word(2, 1, 1, "bank", 90.0),
            word(1, 2, 1, "manat", 80.0),
            word(1, 1, 2, "hundred", 95.0),
            word(1, 1, 1, "one", 95.0),
            word(1, 1, 3, "  ", 95.0),
            word(2, 1, 2, "noise", -1.0),
        ]);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lines, vec!["one hundred", "manat"]);
        assert_eq!(blocks[0].text, "one hundred\nmanat");
        assert_eq!(blocks[1].text, "bank");
    }

    struct Failing;
    impl TextRecognizer for Failing {
        fn recognize(&self, _img: &RgbImage) -> Result<RecognitionResult, Error> {
            Err(Error::RecognitionFailed {
                reason: String::from("engine crashed"),
            })
        }
    }

    #[test]
    fn failures_give_empty_result() {
        let ocr = TextRecognition::new(Box::new(Failing));
        let frame = Frame::rgba(2, 2, vec![0; 16], 8, Duration::ZERO);
        assert_eq!(ocr.recognize(&frame), RecognitionResult::default());

        let bad = Frame::jpeg(2, 2, vec![1, 2, 3], Duration::ZERO);
        assert!(ocr.recognize(&bad).is_empty());
    }
}
