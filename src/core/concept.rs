use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::PipelexError;

/// Domains that are reserved by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialDomain {
    Native,
    Implicit,
}

impl SpecialDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialDomain::Native => "native",
            SpecialDomain::Implicit => "implicit",
        }
    }
}

/// The closed set of structural content classes a concept can denote.
///
/// User-declared classes (anything the engine does not know natively) are
/// kept as [`StructureClass::Structured`] and carried as field maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureClass {
    Dynamic,
    Text,
    Image,
    Pdf,
    TextAndImages,
    Number,
    LlmPrompt,
    Page,
    List,
    Structured(String),
}

impl StructureClass {
    /// Resolves a declared class name such as `"TextContent"`.
    pub fn from_class_name(name: &str) -> StructureClass {
        match name {
            "DynamicContent" => StructureClass::Dynamic,
            "TextContent" => StructureClass::Text,
            "ImageContent" => StructureClass::Image,
            "PDFContent" | "PdfContent" => StructureClass::Pdf,
            "TextAndImagesContent" => StructureClass::TextAndImages,
            "NumberContent" => StructureClass::Number,
            "LLMPromptContent" | "LlmPromptContent" => StructureClass::LlmPrompt,
            "PageContent" => StructureClass::Page,
            "ListContent" => StructureClass::List,
            other => StructureClass::Structured(other.to_string()),
        }
    }

    pub fn class_name(&self) -> &str {
        match self {
            StructureClass::Dynamic => "DynamicContent",
            StructureClass::Text => "TextContent",
            StructureClass::Image => "ImageContent",
            StructureClass::Pdf => "PDFContent",
            StructureClass::TextAndImages => "TextAndImagesContent",
            StructureClass::Number => "NumberContent",
            StructureClass::LlmPrompt => "LLMPromptContent",
            StructureClass::Page => "PageContent",
            StructureClass::List => "ListContent",
            StructureClass::Structured(name) => name,
        }
    }
}

impl fmt::Display for StructureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

/// Concepts that ship with the engine, all living in the `native` domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeConcept {
    Dynamic,
    Text,
    Image,
    Pdf,
    TextAndImages,
    Number,
    LlmPrompt,
    Page,
}

impl NativeConcept {
    pub const ALL: [NativeConcept; 8] = [
        NativeConcept::Dynamic,
        NativeConcept::Text,
        NativeConcept::Image,
        NativeConcept::Pdf,
        NativeConcept::TextAndImages,
        NativeConcept::Number,
        NativeConcept::LlmPrompt,
        NativeConcept::Page,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NativeConcept::Dynamic => "Dynamic",
            NativeConcept::Text => "Text",
            NativeConcept::Image => "Image",
            NativeConcept::Pdf => "PDF",
            NativeConcept::TextAndImages => "TextAndImages",
            NativeConcept::Number => "Number",
            NativeConcept::LlmPrompt => "LlmPrompt",
            NativeConcept::Page => "Page",
        }
    }

    /// Fully qualified code, e.g. `native.Text`.
    pub fn code(&self) -> String {
        format!("{}.{}", SpecialDomain::Native.as_str(), self.name())
    }

    pub fn structure_class(&self) -> StructureClass {
        match self {
            NativeConcept::Dynamic => StructureClass::Dynamic,
            NativeConcept::Text => StructureClass::Text,
            NativeConcept::Image => StructureClass::Image,
            NativeConcept::Pdf => StructureClass::Pdf,
            NativeConcept::TextAndImages => StructureClass::TextAndImages,
            NativeConcept::Number => StructureClass::Number,
            NativeConcept::LlmPrompt => StructureClass::LlmPrompt,
            NativeConcept::Page => StructureClass::Page,
        }
    }

    pub fn definition(&self) -> &'static str {
        match self {
            NativeConcept::Dynamic => "A dynamic concept",
            NativeConcept::Text => "A text",
            NativeConcept::Image => "An image",
            NativeConcept::Pdf => "A PDF",
            NativeConcept::TextAndImages => "A text and an image",
            NativeConcept::Number => "A number",
            NativeConcept::LlmPrompt => "A prompt for an LLM",
            NativeConcept::Page => {
                "The content of a page of a document, comprising text and linked images as well as an optional page view image"
            }
        }
    }

    pub fn from_name(name: &str) -> Option<NativeConcept> {
        NativeConcept::ALL.into_iter().find(|native| native.name() == name)
    }

    pub fn is_native_name(name: &str) -> bool {
        NativeConcept::from_name(name).is_some()
    }

    pub fn make_concept(&self) -> Concept {
        Concept {
            code: self.code(),
            domain: SpecialDomain::Native.as_str().to_string(),
            definition: self.definition().to_string(),
            structure_class: self.structure_class(),
            refines: Vec::new(),
        }
    }

    pub fn all_concepts() -> Vec<Concept> {
        NativeConcept::ALL.iter().map(NativeConcept::make_concept).collect()
    }
}

/// A typed category of content identified by `domain.Code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub code: String,
    pub domain: String,
    pub definition: String,
    pub structure_class: StructureClass,
    #[serde(default)]
    pub refines: Vec<String>,
}

impl Concept {
    /// Builds a concept after checking the code and its refines.
    pub fn new(
        code: &str,
        definition: impl Into<String>,
        structure_class: StructureClass,
        refines: Vec<String>,
    ) -> Result<Self, PipelexError> {
        let (domain, _) = split_concept_code(code)?;
        for refined in &refines {
            if refined.contains('.') {
                split_concept_code(refined)?;
            } else {
                check_concept_name(refined, refined)?;
            }
        }
        Ok(Concept {
            code: code.to_string(),
            domain: domain.to_string(),
            definition: definition.into(),
            structure_class,
            refines,
        })
    }

    /// The part after the domain separator.
    pub fn name(&self) -> &str {
        self.code
            .split_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.code)
    }
}

/// Splits `domain.Code` into its two parts, validating both.
pub fn split_concept_code(code: &str) -> Result<(&str, &str), PipelexError> {
    if code.matches('.').count() != 1 {
        return Err(PipelexError::ConceptCode {
            code: code.to_string(),
            reason: "a concept code must contain exactly one '.' between domain and name".to_string(),
        });
    }
    let Some((domain, name)) = code.split_once('.') else {
        return Err(PipelexError::ConceptCode {
            code: code.to_string(),
            reason: "missing domain separator".to_string(),
        });
    };
    check_domain_code(domain).map_err(|reason| PipelexError::ConceptCode {
        code: code.to_string(),
        reason,
    })?;
    check_concept_name(code, name)?;
    Ok((domain, name))
}

/// Domains are snake_case: `^[a-z][a-z0-9_]*$`.
pub fn check_domain_code(domain: &str) -> Result<(), String> {
    let mut chars = domain.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return Err(format!("domain '{domain}' must start with a lowercase letter")),
    }
    if chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        Ok(())
    } else {
        Err(format!("domain '{domain}' must be snake_case"))
    }
}

// Names are PascalCase: `^[A-Z][a-zA-Z0-9]*$`.
fn check_concept_name(code: &str, name: &str) -> Result<(), PipelexError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(first) if first.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(PipelexError::ConceptCode {
            code: code.to_string(),
            reason: format!("concept name '{name}' must be PascalCase"),
        })
    }
}

/// Qualifies a concept name as it appears in a pipe declaration: native
/// names go to `native`, other bare names to the declaring domain.
pub fn qualify_concept_code(domain: &str, name_or_code: &str) -> String {
    if name_or_code.contains('.') {
        name_or_code.to_string()
    } else if NativeConcept::is_native_name(name_or_code) {
        format!("{}.{}", SpecialDomain::Native.as_str(), name_or_code)
    } else {
        format!("{domain}.{name_or_code}")
    }
}
