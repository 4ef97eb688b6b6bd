use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cogt::error::CogtError;

/// What to run OCR on. Exactly one of the two URIs is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrInput {
    pub image_uri: Option<String>,
    pub pdf_uri: Option<String>,
}

impl OcrInput {
    pub fn new(image_uri: Option<String>, pdf_uri: Option<String>) -> Result<Self, CogtError> {
        if image_uri.is_some() == pdf_uri.is_some() {
            return Err(CogtError::OcrInput(
                "exactly one of 'image_uri' or 'pdf_uri' must be provided".to_string(),
            ));
        }
        Ok(OcrInput { image_uri, pdf_uri })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrJobParams {
    pub should_caption_images: bool,
    pub should_include_screenshots: bool,
    pub screenshots_dpi: u32,
}

impl Default for OcrJobParams {
    fn default() -> Self {
        Self {
            should_caption_images: false,
            should_include_screenshots: false,
            screenshots_dpi: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub image_id: String,
    #[serde(default)]
    pub base_64: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrPage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub extracted_images: Vec<ExtractedImage>,
    #[serde(default)]
    pub screenshot: Option<ExtractedImage>,
}

/// Pages keyed by their 1-based page number.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrOutput {
    pub pages: BTreeMap<usize, OcrPage>,
}

impl OcrOutput {
    pub fn concatenated_text(&self) -> String {
        self.pages
            .values()
            .filter_map(|page| page.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ocr_input_needs_exactly_one_source() {
        assert!(OcrInput::new(Some("a.png".into()), None).is_ok());
        assert!(OcrInput::new(None, None).is_err());
        assert!(OcrInput::new(Some("a.png".into()), Some("b.pdf".into())).is_err());
    }

    #[test]
    fn test_concatenated_text_skips_empty_pages() {
        let mut output = OcrOutput::default();
        output.pages.insert(1, OcrPage { text: Some("one".into()), ..Default::default() });
        output.pages.insert(2, OcrPage::default());
        output.pages.insert(3, OcrPage { text: Some("three".into()), ..Default::default() });
        assert_eq!(output.concatenated_text(), "one\nthree");
    }
}
