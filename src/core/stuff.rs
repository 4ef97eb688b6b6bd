use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::concept::{split_concept_code, StructureClass};
use crate::core::error::PipelexError;
use crate::core::stuff_content::{ContentKind, StructuredContent, StuffContent};

/// Which pipe produced a [`Stuff`], and from what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuffCreationRecord {
    pub pipe_code: String,
    #[serde(default)]
    pub pipe_layers: Vec<String>,
    #[serde(default)]
    pub input_stuff_codes: Vec<String>,
}

/// A named, concept-tagged unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stuff {
    pub stuff_code: String,
    #[serde(default)]
    pub stuff_name: Option<String>,
    pub concept_code: String,
    pub content: StuffContent,
    #[serde(default)]
    pub creation_record: Option<StuffCreationRecord>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Stuff {
    pub fn kind(&self) -> ContentKind {
        self.content.kind()
    }

    pub fn with_creation_record(mut self, record: StuffCreationRecord) -> Self {
        self.creation_record = Some(record);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Same concept and same content, regardless of name or identity.
    pub fn has_same_content(&self, other: &Stuff) -> bool {
        self.concept_code == other.concept_code && self.content == other.content
    }

    pub fn as_text(&self) -> Result<&str, PipelexError> {
        match &self.content {
            StuffContent::Text(content) => Ok(&content.text),
            other => Err(self.type_error(ContentKind::Text, other)),
        }
    }

    pub fn as_number(&self) -> Result<f64, PipelexError> {
        match &self.content {
            StuffContent::Number(content) => Ok(content.number),
            other => Err(self.type_error(ContentKind::Number, other)),
        }
    }

    pub fn as_list(&self) -> Result<&[StuffContent], PipelexError> {
        match &self.content {
            StuffContent::List(list) => Ok(&list.items),
            other => Err(self.type_error(ContentKind::List, other)),
        }
    }

    pub(crate) fn type_error(&self, wanted: ContentKind, found: &StuffContent) -> PipelexError {
        PipelexError::StuffContentType {
            path: self
                .stuff_name
                .clone()
                .unwrap_or_else(|| self.stuff_code.clone()),
            wanted: wanted.to_string(),
            actual: found.kind().to_string(),
        }
    }
}

/// Declarative form of a stuff supplied at pipeline entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuffBlueprint {
    pub name: String,
    pub concept: String,
    pub value: String,
}

pub struct StuffFactory;

impl StuffFactory {
    /// A fresh short identity code.
    pub fn make_stuff_code() -> String {
        let mut code = uuid::Uuid::new_v4().simple().to_string();
        code.truncate(12);
        code
    }

    pub fn make_stuff(
        concept_code: &str,
        content: StuffContent,
        name: Option<&str>,
    ) -> Result<Stuff, PipelexError> {
        Self::make_stuff_with_code(concept_code, content, name, None)
    }

    /// Like [`make_stuff`](Self::make_stuff), pinning the identity code when
    /// one is given.
    pub fn make_stuff_with_code(
        concept_code: &str,
        content: StuffContent,
        name: Option<&str>,
        stuff_code: Option<&str>,
    ) -> Result<Stuff, PipelexError> {
        let (_, concept_name) = split_concept_code(concept_code)?;
        let stuff_name = name
            .map(str::to_string)
            .unwrap_or_else(|| to_snake_case(concept_name));
        Ok(Stuff {
            stuff_code: stuff_code
                .map(str::to_string)
                .unwrap_or_else(Self::make_stuff_code),
            stuff_name: Some(stuff_name),
            concept_code: concept_code.to_string(),
            content,
            creation_record: None,
            session_id: None,
        })
    }

    /// Builds text-like content from a string, according to the class.
    pub fn make_from_str(
        concept_code: &str,
        structure_class: &StructureClass,
        text: &str,
        name: Option<&str>,
    ) -> Result<Stuff, PipelexError> {
        let content = match structure_class {
            StructureClass::Image => StuffContent::image(text),
            StructureClass::Pdf => StuffContent::Pdf(crate::core::stuff_content::PdfContent {
                url: text.to_string(),
            }),
            StructureClass::Number => match text.trim().parse::<f64>() {
                Ok(number) => StuffContent::number(number),
                Err(_) => {
                    return Err(PipelexError::StuffContentType {
                        path: name.unwrap_or(concept_code).to_string(),
                        wanted: ContentKind::Number.to_string(),
                        actual: text.to_string(),
                    });
                }
            },
            _ => StuffContent::text(text),
        };
        Self::make_stuff(concept_code, content, name)
    }

    pub fn make_from_blueprint(
        blueprint: &StuffBlueprint,
        structure_class: &StructureClass,
    ) -> Result<Stuff, PipelexError> {
        Self::make_from_str(
            &blueprint.concept,
            structure_class,
            &blueprint.value,
            Some(&blueprint.name),
        )
    }

    /// Gathers several named contents into one structured stuff.
    pub fn combine_stuffs(
        concept_code: &str,
        stuff_contents: BTreeMap<String, StuffContent>,
        name: Option<&str>,
    ) -> Result<Stuff, PipelexError> {
        let (_, class_name) = split_concept_code(concept_code)?;
        let content = StuffContent::Structured(StructuredContent {
            class_name: class_name.to_string(),
            fields: stuff_contents,
        });
        Self::make_stuff(concept_code, content, name)
    }
}

fn to_snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    for (index, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if index > 0 {
                snake.push('_');
            }
            snake.push(c.to_ascii_lowercase());
        } else {
            snake.push(c);
        }
    }
    snake
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_stuff_defaults_name_from_concept() {
        let stuff =
            StuffFactory::make_stuff("zoo.VisualDescription", StuffContent::text("a cat"), None).unwrap();
        assert_eq!(stuff.stuff_name.as_deref(), Some("visual_description"));
        assert_eq!(stuff.stuff_code.len(), 12);
        assert!(StuffFactory::make_stuff("NoDomain", StuffContent::text("x"), None).is_err());
    }

    #[test]
    fn test_pinned_code() {
        let stuff = StuffFactory::make_stuff_with_code(
            "native.Text",
            StuffContent::text("x"),
            Some("out"),
            Some("batch-1-branch-0"),
        )
        .unwrap();
        assert_eq!(stuff.stuff_code, "batch-1-branch-0");
    }

    #[test]
    fn test_make_from_str_by_class() {
        let number =
            StuffFactory::make_from_str("native.Number", &StructureClass::Number, " 42 ", None).unwrap();
        assert_eq!(number.as_number().unwrap(), 42.0);
        assert!(StuffFactory::make_from_str("native.Number", &StructureClass::Number, "x", None).is_err());

        let image = StuffFactory::make_from_str("native.Image", &StructureClass::Image, "u", None).unwrap();
        assert_eq!(image.kind(), ContentKind::Image);
        assert!(image.as_text().is_err());
    }

    #[test]
    fn test_combine_stuffs() {
        let mut contents = BTreeMap::new();
        contents.insert("title".to_string(), StuffContent::text("Q3"));
        contents.insert("total".to_string(), StuffContent::number(12.5));
        let stuff = StuffFactory::combine_stuffs("finance.Report", contents, Some("report")).unwrap();
        assert_eq!(stuff.content.attribute("total"), Some(StuffContent::number(12.5)));
    }
}
