use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::cogt::llm::LlmPrompt;
use crate::core::concept::StructureClass;
use crate::core::error::PipelexError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberContent {
    pub number: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageContent {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_64: Option<String>,
}

impl ImageContent {
    pub fn from_url(url: impl Into<String>) -> Self {
        ImageContent {
            url: url.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfContent {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextAndImagesContent {
    #[serde(default)]
    pub text: Option<TextContent>,
    #[serde(default)]
    pub images: Vec<ImageContent>,
}

/// One page of a document: its text, the images found on it and an
/// optional rendering of the whole page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageContent {
    pub text_and_images: TextAndImagesContent,
    #[serde(default)]
    pub page_view: Option<ImageContent>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListContent {
    pub items: Vec<StuffContent>,
}

/// Content of a user-declared structure: named fields holding content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructuredContent {
    pub class_name: String,
    pub fields: BTreeMap<String, StuffContent>,
}

/// The payload of a [`Stuff`](crate::Stuff).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StuffContent {
    Text(TextContent),
    Number(NumberContent),
    Image(ImageContent),
    Pdf(PdfContent),
    TextAndImages(TextAndImagesContent),
    Page(PageContent),
    LlmPrompt(LlmPrompt),
    List(ListContent),
    Structured(StructuredContent),
}

/// Tag naming the variant of a [`StuffContent`], used to request a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Number,
    Image,
    Pdf,
    TextAndImages,
    Page,
    LlmPrompt,
    List,
    Structured,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentKind::Text => "text",
            ContentKind::Number => "number",
            ContentKind::Image => "image",
            ContentKind::Pdf => "pdf",
            ContentKind::TextAndImages => "text_and_images",
            ContentKind::Page => "page",
            ContentKind::LlmPrompt => "llm_prompt",
            ContentKind::List => "list",
            ContentKind::Structured => "structured",
        };
        f.write_str(name)
    }
}

impl StuffContent {
    pub fn text(text: impl Into<String>) -> Self {
        StuffContent::Text(TextContent { text: text.into() })
    }

    pub fn number(number: f64) -> Self {
        StuffContent::Number(NumberContent { number })
    }

    pub fn image(url: impl Into<String>) -> Self {
        StuffContent::Image(ImageContent::from_url(url))
    }

    pub fn list(items: Vec<StuffContent>) -> Self {
        StuffContent::List(ListContent { items })
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            StuffContent::Text(_) => ContentKind::Text,
            StuffContent::Number(_) => ContentKind::Number,
            StuffContent::Image(_) => ContentKind::Image,
            StuffContent::Pdf(_) => ContentKind::Pdf,
            StuffContent::TextAndImages(_) => ContentKind::TextAndImages,
            StuffContent::Page(_) => ContentKind::Page,
            StuffContent::LlmPrompt(_) => ContentKind::LlmPrompt,
            StuffContent::List(_) => ContentKind::List,
            StuffContent::Structured(_) => ContentKind::Structured,
        }
    }

    /// Looks up one attribute by name. List items are addressed by their
    /// decimal index.
    pub fn attribute(&self, name: &str) -> Option<StuffContent> {
        match self {
            StuffContent::TextAndImages(content) => match name {
                "text" => content.text.clone().map(StuffContent::Text),
                "images" => Some(StuffContent::list(
                    content.images.iter().cloned().map(StuffContent::Image).collect(),
                )),
                _ => None,
            },
            StuffContent::Page(page) => match name {
                "text_and_images" => Some(StuffContent::TextAndImages(page.text_and_images.clone())),
                "page_view" => page.page_view.clone().map(StuffContent::Image),
                _ => None,
            },
            StuffContent::LlmPrompt(prompt) => match name {
                "system_text" => prompt.system_text.clone().map(StuffContent::text),
                "user_text" => prompt.user_text.clone().map(StuffContent::text),
                _ => None,
            },
            StuffContent::Image(image) => match name {
                "url" => Some(StuffContent::text(image.url.clone())),
                "caption" => image.caption.clone().map(StuffContent::text),
                _ => None,
            },
            StuffContent::List(list) => {
                let index: usize = name.parse().ok()?;
                list.items.get(index).cloned()
            }
            StuffContent::Structured(structured) => structured.fields.get(name).cloned(),
            StuffContent::Text(_) | StuffContent::Number(_) | StuffContent::Pdf(_) => None,
        }
    }

    /// Plain-text rendering used when content is injected into prompts.
    pub fn rendered_str(&self) -> String {
        match self {
            StuffContent::Text(content) => content.text.clone(),
            StuffContent::Number(content) => format_number(content.number),
            StuffContent::Image(image) => image.url.clone(),
            StuffContent::Pdf(pdf) => pdf.url.clone(),
            StuffContent::TextAndImages(content) => render_text_and_images(content),
            StuffContent::Page(page) => render_text_and_images(&page.text_and_images),
            StuffContent::LlmPrompt(prompt) => prompt.desc(),
            StuffContent::List(list) => list
                .items
                .iter()
                .map(StuffContent::rendered_str)
                .collect::<Vec<_>>()
                .join("\n"),
            StuffContent::Structured(_) => {
                serde_json::to_string_pretty(&self.to_template_value()).unwrap_or_default()
            }
        }
    }

    /// Value handed to template rendering: text becomes a string, lists
    /// become arrays, structures become objects.
    pub fn to_template_value(&self) -> Value {
        match self {
            StuffContent::Text(content) => Value::String(content.text.clone()),
            StuffContent::Number(content) => serde_json::Number::from_f64(content.number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            StuffContent::List(list) => Value::Array(
                list.items.iter().map(StuffContent::to_template_value).collect(),
            ),
            StuffContent::Structured(structured) => Value::Object(
                structured
                    .fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_template_value()))
                    .collect(),
            ),
            StuffContent::Image(inner) => serde_json::to_value(inner).unwrap_or(Value::Null),
            StuffContent::Pdf(inner) => serde_json::to_value(inner).unwrap_or(Value::Null),
            StuffContent::TextAndImages(inner) => serde_json::to_value(inner).unwrap_or(Value::Null),
            StuffContent::Page(inner) => serde_json::to_value(inner).unwrap_or(Value::Null),
            StuffContent::LlmPrompt(inner) => serde_json::to_value(inner).unwrap_or(Value::Null),
        }
    }

    /// Converts a JSON value produced by a provider into content of the
    /// given structural class.
    pub fn from_json_value(class: &StructureClass, value: Value) -> Result<StuffContent, PipelexError> {
        let content = match class {
            StructureClass::Text => match value {
                Value::String(text) => StuffContent::text(text),
                Value::Object(mut map) => match map.remove("text") {
                    Some(Value::String(text)) => StuffContent::text(text),
                    _ => StuffContent::text(Value::Object(map).to_string()),
                },
                other => StuffContent::text(other.to_string()),
            },
            StructureClass::Number => match value.as_f64() {
                Some(number) => StuffContent::number(number),
                None => {
                    return Err(PipelexError::StuffContentType {
                        path: "<generated>".to_string(),
                        wanted: ContentKind::Number.to_string(),
                        actual: value.to_string(),
                    });
                }
            },
            StructureClass::Image => match value {
                Value::String(url) => StuffContent::image(url),
                other => StuffContent::Image(serde_json::from_value(other)?),
            },
            StructureClass::Pdf => match value {
                Value::String(url) => StuffContent::Pdf(PdfContent { url }),
                other => StuffContent::Pdf(serde_json::from_value(other)?),
            },
            StructureClass::TextAndImages => StuffContent::TextAndImages(serde_json::from_value(value)?),
            StructureClass::Page => StuffContent::Page(serde_json::from_value(value)?),
            StructureClass::LlmPrompt => StuffContent::LlmPrompt(serde_json::from_value(value)?),
            StructureClass::List | StructureClass::Dynamic => infer_content("", value),
            StructureClass::Structured(class_name) => match value {
                Value::Object(map) => structured_from_map(class_name, map),
                other => {
                    return Err(PipelexError::StuffContentType {
                        path: "<generated>".to_string(),
                        wanted: class_name.clone(),
                        actual: other.to_string(),
                    });
                }
            },
        };
        Ok(content)
    }
}

impl From<String> for StuffContent {
    fn from(text: String) -> Self {
        StuffContent::text(text)
    }
}

impl From<&str> for StuffContent {
    fn from(text: &str) -> Self {
        StuffContent::text(text)
    }
}

impl From<Vec<StuffContent>> for StuffContent {
    fn from(items: Vec<StuffContent>) -> Self {
        StuffContent::list(items)
    }
}

fn infer_content(class_name: &str, value: Value) -> StuffContent {
    match value {
        Value::String(text) => StuffContent::text(text),
        Value::Number(number) => StuffContent::number(number.as_f64().unwrap_or_default()),
        Value::Bool(flag) => StuffContent::text(flag.to_string()),
        Value::Null => StuffContent::text(String::new()),
        Value::Array(items) => {
            StuffContent::list(items.into_iter().map(|item| infer_content("", item)).collect())
        }
        Value::Object(map) => {
            if map.contains_key("kind") {
                if let Ok(tagged) = serde_json::from_value::<StuffContent>(Value::Object(map.clone())) {
                    return tagged;
                }
            }
            structured_from_map(class_name, map)
        }
    }
}

fn structured_from_map(class_name: &str, map: Map<String, Value>) -> StuffContent {
    let fields = map
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key, infer_content("", value)))
        .collect();
    StuffContent::Structured(StructuredContent {
        class_name: class_name.to_string(),
        fields,
    })
}

fn render_text_and_images(content: &TextAndImagesContent) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(text) = &content.text {
        parts.push(text.text.clone());
    }
    parts.extend(content.images.iter().map(|image| image.url.clone()));
    parts.join("\n")
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}
