use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::concept::check_domain_code;
use crate::core::error::PipelexError;

/// A namespace grouping concepts and pipes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub code: String,
    #[serde(default)]
    pub definition: Option<String>,
    /// Default system prompt for LLM pipes of this domain that declare none.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub system_prompt_to_structure: Option<String>,
    #[serde(default)]
    pub prompt_template_to_structure: Option<String>,
}

impl Domain {
    pub fn new(code: impl Into<String>) -> Result<Self, PipelexError> {
        let code = code.into();
        check_domain_code(&code).map_err(PipelexError::DomainLibrary)?;
        Ok(Domain {
            code,
            ..Default::default()
        })
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct DomainLibrary {
    domains: HashMap<String, Domain>,
}

impl DomainLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_new_domain(&mut self, domain: Domain) -> Result<(), PipelexError> {
        if self.domains.contains_key(&domain.code) {
            return Err(PipelexError::DomainLibrary(format!(
                "domain '{}' already exists in the library",
                domain.code
            )));
        }
        self.domains.insert(domain.code.clone(), domain);
        Ok(())
    }

    pub fn get_domain(&self, code: &str) -> Option<&Domain> {
        self.domains.get(code)
    }

    pub fn get_required_domain(&self, code: &str) -> Result<&Domain, PipelexError> {
        self.domains
            .get(code)
            .ok_or_else(|| PipelexError::DomainLibrary(format!("domain '{code}' not found")))
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
