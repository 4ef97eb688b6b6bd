use serde_json::{Map, Value};
use std::sync::Arc;

use crate::cogt::llm::LlmDeck;
use crate::cogt::ContentGenerator;
use crate::core::concept::NativeConcept;
use crate::core::concept_library::ConceptLibrary;
use crate::core::config::PipelexConfig;
use crate::core::context::{PipelexContext, PipelexContextBuilder};
use crate::core::domain::{Domain, DomainLibrary};
use crate::core::error::PipelexError;
use crate::core::pipe::{LibraryContext, Pipe};
use crate::core::pipe_library::PipeLibrary;
use crate::library::blueprint::{ConceptBlueprint, PipeBlueprint};

const CONCEPT_KEY: &str = "concept";
const PIPE_KEY: &str = "pipe";
const ALLOWED_ROOT_ATTRIBUTES: [&str; 5] = [
    "domain",
    "definition",
    "system_prompt",
    "system_prompt_to_structure",
    "prompt_template_to_structure",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LibraryComponent {
    Concept,
    Pipe,
}

impl LibraryComponent {
    fn key(&self) -> &'static str {
        match self {
            LibraryComponent::Concept => CONCEPT_KEY,
            LibraryComponent::Pipe => PIPE_KEY,
        }
    }
}

/// Loads declared domains, concepts and pipes, validates them together and
/// hands them over to a [`PipelexContextBuilder`].
///
/// A library is a JSON object with a root `domain` code, optional domain
/// attributes, and nested `concept` / `pipe` tables. Any other nested object
/// is a sub-group of the same domain.
pub struct LibraryManager {
    config: PipelexConfig,
    domain_library: DomainLibrary,
    concept_library: ConceptLibrary,
    pipe_library: PipeLibrary,
    llm_deck: LlmDeck,
}

impl LibraryManager {
    /// Starts with the native concepts only.
    pub fn new(config: PipelexConfig) -> Result<Self, PipelexError> {
        let mut concept_library =
            ConceptLibrary::new().with_implicit_concepts(config.concepts.allow_implicit_concepts);
        concept_library.add_concepts(NativeConcept::all_concepts())?;
        Ok(LibraryManager {
            config,
            domain_library: DomainLibrary::new(),
            concept_library,
            pipe_library: PipeLibrary::new(),
            llm_deck: LlmDeck::default(),
        })
    }

    pub fn with_llm_deck(mut self, llm_deck: LlmDeck) -> Self {
        self.llm_deck = llm_deck;
        self
    }

    pub fn config(&self) -> &PipelexConfig {
        &self.config
    }

    pub fn domain_library(&self) -> &DomainLibrary {
        &self.domain_library
    }

    pub fn concept_library(&self) -> &ConceptLibrary {
        &self.concept_library
    }

    pub fn pipe_library(&self) -> &PipeLibrary {
        &self.pipe_library
    }

    pub fn add_domain(&mut self, domain: Domain) -> Result<(), PipelexError> {
        self.domain_library.add_new_domain(domain)
    }

    pub fn add_pipe(&mut self, pipe: Arc<dyn Pipe>) -> Result<(), PipelexError> {
        self.pipe_library.add_new_pipe(pipe)
    }

    /// Loads a JSON document holding either one library object or an array
    /// of them.
    pub fn load_from_json_str(&mut self, json: &str) -> Result<(), PipelexError> {
        match serde_json::from_str(json)? {
            Value::Array(libraries) => self.load_from_values(&libraries),
            library @ Value::Object(_) => self.load_from_values(&[library]),
            other => Err(PipelexError::LibraryParsing(format!(
                "a library document must be an object or an array of objects, got '{other}'"
            ))),
        }
    }

    /// Loads several libraries at once: every domain first, then every
    /// concept, then every pipe, so declarations may refer to each other in
    /// any order.
    pub fn load_from_values(&mut self, libraries: &[Value]) -> Result<(), PipelexError> {
        let libraries = libraries
            .iter()
            .enumerate()
            .map(|(index, value)| match value {
                Value::Object(library) => Ok(library),
                _ => Err(PipelexError::LibraryParsing(format!("library #{index} is not an object"))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        for library in &libraries {
            self.load_domain(library)?;
        }

        for library in &libraries {
            let nb_concepts_before = self.concept_library.len();
            let domain_code = self.known_domain_code(library)?;
            self.load_components(&domain_code, library, LibraryComponent::Concept)
                .map_err(|err| {
                    PipelexError::LibraryParsing(format!("error parsing library of domain '{domain_code}': {err}"))
                })?;
            log::debug!(
                "Loaded {} concepts from domain '{domain_code}'",
                self.concept_library.len() - nb_concepts_before
            );
        }

        for library in &libraries {
            let nb_pipes_before = self.pipe_library.len();
            let domain_code = self.known_domain_code(library)?;
            self.load_components(&domain_code, library, LibraryComponent::Pipe)?;
            log::debug!(
                "Loaded {} pipes from domain '{domain_code}'",
                self.pipe_library.len() - nb_pipes_before
            );
        }
        Ok(())
    }

    fn load_domain(&mut self, library: &Map<String, Value>) -> Result<(), PipelexError> {
        let domain_code = domain_code_of(library)?;
        // A domain is defined exactly once; other libraries only reference it.
        let Some(definition) = library.get("definition").and_then(Value::as_str) else {
            return Ok(());
        };
        let text_attribute = |key: &str| library.get(key).and_then(Value::as_str).map(str::to_string);
        let domain = Domain {
            system_prompt: text_attribute("system_prompt"),
            system_prompt_to_structure: text_attribute("system_prompt_to_structure"),
            prompt_template_to_structure: text_attribute("prompt_template_to_structure"),
            ..Domain::new(domain_code)?.with_definition(definition)
        };
        self.domain_library.add_new_domain(domain)
    }

    fn known_domain_code(&self, library: &Map<String, Value>) -> Result<String, PipelexError> {
        let domain_code = domain_code_of(library)?;
        if self.domain_library.get_domain(domain_code).is_none() {
            return Err(PipelexError::LibraryParsing(format!(
                "domain '{domain_code}' has not been defined, make sure exactly one library gives it a definition"
            )));
        }
        Ok(domain_code.to_string())
    }

    fn load_components(
        &mut self,
        domain_code: &str,
        group: &Map<String, Value>,
        component: LibraryComponent,
    ) -> Result<(), PipelexError> {
        for (key, value) in group {
            match value {
                Value::String(_) if ALLOWED_ROOT_ATTRIBUTES.contains(&key.as_str()) => {}
                Value::String(_) => {
                    return Err(PipelexError::LibraryParsing(format!(
                        "domain '{domain_code}' has an unexpected root attribute '{key}'"
                    )));
                }
                Value::Object(table) if key == component.key() => match component {
                    LibraryComponent::Concept => self.load_concepts(domain_code, table)?,
                    LibraryComponent::Pipe => self.load_pipes(domain_code, table)?,
                },
                Value::Object(_) if key == CONCEPT_KEY || key == PIPE_KEY => {}
                Value::Object(sub_group) => self.load_components(domain_code, sub_group, component)?,
                other => {
                    return Err(PipelexError::LibraryParsing(format!(
                        "only an object or a string is expected under '{key}' in domain '{domain_code}', got '{other}'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn load_concepts(&mut self, domain_code: &str, table: &Map<String, Value>) -> Result<(), PipelexError> {
        for (concept_name, value) in table {
            let blueprint: ConceptBlueprint = serde_json::from_value(value.clone()).map_err(|err| {
                PipelexError::ConceptLibrary(format!(
                    "error loading concept '{concept_name}' from domain '{domain_code}': {err}"
                ))
            })?;
            let concept = blueprint.make_concept(domain_code, concept_name)?;
            self.concept_library.add_new_concept(concept)?;
        }
        Ok(())
    }

    fn load_pipes(&mut self, domain_code: &str, table: &Map<String, Value>) -> Result<(), PipelexError> {
        for (pipe_code, value) in table {
            let blueprint: PipeBlueprint = serde_json::from_value(value.clone()).map_err(|err| {
                PipelexError::PipeLibrary(format!(
                    "error loading pipe '{pipe_code}' from domain '{domain_code}': {err}"
                ))
            })?;
            let pipe = blueprint.make_pipe(domain_code, pipe_code)?;
            self.pipe_library.add_new_pipe(pipe)?;
        }
        Ok(())
    }

    pub fn library_context(&self) -> LibraryContext<'_> {
        LibraryContext {
            config: &self.config,
            domain_library: &self.domain_library,
            concept_library: &self.concept_library,
            pipe_library: &self.pipe_library,
            llm_deck: &self.llm_deck,
        }
    }

    /// Checks concepts first, then every pipe against all the libraries.
    pub fn validate(&self) -> Result<(), PipelexError> {
        log::debug!("Validating libraries");
        self.config.validate()?;
        self.concept_library.validate_with_libraries()?;
        self.pipe_library.validate_with_libraries(&self.library_context())
    }

    /// Validates, then freezes the libraries into a context builder.
    pub fn into_context_builder(
        self,
        content_generator: Arc<dyn ContentGenerator>,
    ) -> Result<PipelexContextBuilder, PipelexError> {
        self.validate()?;
        Ok(PipelexContext::builder(content_generator)
            .with_config(self.config)
            .with_libraries(self.domain_library, self.concept_library, self.pipe_library)
            .with_llm_deck(self.llm_deck))
    }
}

fn domain_code_of(library: &Map<String, Value>) -> Result<&str, PipelexError> {
    library
        .get("domain")
        .and_then(Value::as_str)
        .ok_or_else(|| PipelexError::LibraryParsing("library has no domain set".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn zoo_library() -> Value {
        json!({
            "domain": "zoo",
            "definition": "Everything about animals",
            "system_prompt": "You are a zookeeper",
            "concept": {
                "Animal": "A living creature",
                "Description": {"definition": "A text describing something", "refines": "Text"}
            },
            "pipe": {
                "describe_animal": {
                    "type": "PipeLLM",
                    "input": "Animal",
                    "output": "Description",
                    "prompt_template": "Describe {{ animal }}"
                }
            }
        })
    }

    #[test]
    fn test_load_three_passes() {
        let mut manager = LibraryManager::new(PipelexConfig::default()).unwrap();
        // The pipe library references a domain defined in a later document.
        let pipes_first = json!({
            "domain": "zoo",
            "pipe": {
                "describe_twice": {
                    "type": "PipeSequence",
                    "output": "Description",
                    "steps": [{"pipe": "describe_animal"}, {"pipe": "describe_animal"}]
                }
            }
        });
        manager.load_from_values(&[pipes_first, zoo_library()]).unwrap();

        let domain = manager.domain_library().get_required_domain("zoo").unwrap();
        assert_eq!(domain.system_prompt.as_deref(), Some("You are a zookeeper"));
        assert!(manager.concept_library().get_concept("zoo.Animal").is_some());
        assert!(manager.concept_library().get_concept("native.Text").is_some());
        assert_eq!(manager.pipe_library().pipe_codes(), vec!["describe_animal", "describe_twice"]);
        manager.validate().unwrap();
    }

    #[test]
    fn test_unknown_root_attribute() {
        let mut manager = LibraryManager::new(PipelexConfig::default()).unwrap();
        let err = manager
            .load_from_values(&[json!({"domain": "zoo", "definition": "Animals", "colour": "blue"})])
            .unwrap_err();
        assert!(matches!(err, PipelexError::LibraryParsing(_)));
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_undefined_domain_and_missing_domain() {
        let mut manager = LibraryManager::new(PipelexConfig::default()).unwrap();
        let err = manager.load_from_values(&[json!({"domain": "zoo"})]).unwrap_err();
        assert!(err.to_string().contains("has not been defined"));

        let err = manager.load_from_values(&[json!({"definition": "Animals"})]).unwrap_err();
        assert!(err.to_string().contains("no domain"));
    }

    #[test]
    fn test_nested_groups_share_the_domain() {
        let mut manager = LibraryManager::new(PipelexConfig::default()).unwrap();
        manager
            .load_from_values(&[json!({
                "domain": "zoo",
                "definition": "Animals",
                "mammals": {"concept": {"Cat": "A small feline"}}
            })])
            .unwrap();
        assert!(manager.concept_library().get_concept("zoo.Cat").is_some());
    }

    #[test]
    fn test_duplicate_pipe_is_an_error() {
        let mut manager = LibraryManager::new(PipelexConfig::default()).unwrap();
        manager.load_from_values(&[zoo_library()]).unwrap();
        let again = json!({
            "domain": "zoo",
            "pipe": {"describe_animal": {"type": "PipeFunc", "output": "Text", "function_name": "noop"}}
        });
        let err = manager.load_from_values(&[again]).unwrap_err();
        assert!(matches!(err, PipelexError::PipeLibrary(_)));
    }

    #[test]
    fn test_validation_catches_missing_dependency() {
        let mut manager = LibraryManager::new(PipelexConfig::default()).unwrap();
        manager
            .load_from_json_str(
                r#"{
                    "domain": "zoo",
                    "definition": "Animals",
                    "pipe": {
                        "describe_all": {"type": "PipeBatch", "output": "Text", "branch_pipe_code": "ghost"}
                    }
                }"#,
            )
            .unwrap();
        let err = manager.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unknown_pipe_type() {
        let mut manager = LibraryManager::new(PipelexConfig::default()).unwrap();
        let err = manager
            .load_from_values(&[json!({
                "domain": "zoo",
                "definition": "Animals",
                "pipe": {"dance": {"type": "PipeDance", "output": "Text"}}
            })])
            .unwrap_err();
        assert!(err.to_string().contains("dance"));
    }
}
