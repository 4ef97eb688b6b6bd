use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::PipelexError;
use crate::core::stuff_content::StuffContent;
use crate::core::working_memory::WorkingMemory;

/// A function a `PipeFunc` can apply to the working memory.
pub type PipeFunction = Arc<dyn Fn(&WorkingMemory) -> Result<StuffContent, PipelexError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FuncRegistry {
    functions: HashMap<String, PipeFunction>,
}

impl FuncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&WorkingMemory) -> Result<StuffContent, PipelexError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.functions.contains_key(&name) {
            log::warn!("Function '{name}' is already registered, overwriting it");
        }
        self.functions.insert(name, Arc::new(function));
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&WorkingMemory) -> Result<StuffContent, PipelexError> + Send + Sync + 'static,
    {
        self.register(name, function);
        self
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get_required_function(&self, name: &str) -> Result<PipeFunction, PipelexError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| PipelexError::FuncNotFound(name.to_string()))
    }
}
