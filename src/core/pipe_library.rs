use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::error::PipelexError;
use crate::core::pipe::{LibraryContext, Pipe};

#[derive(Clone, Default)]
pub struct PipeLibrary {
    pipes: HashMap<String, Arc<dyn Pipe>>,
}

impl PipeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_new_pipe(&mut self, pipe: Arc<dyn Pipe>) -> Result<(), PipelexError> {
        let code = pipe.code().to_string();
        if self.pipes.contains_key(&code) {
            return Err(PipelexError::PipeLibrary(format!(
                "pipe '{code}' already exists in the library"
            )));
        }
        self.pipes.insert(code, pipe);
        Ok(())
    }

    pub fn get_optional_pipe(&self, pipe_code: &str) -> Option<Arc<dyn Pipe>> {
        self.pipes.get(pipe_code).cloned()
    }

    pub fn get_required_pipe(&self, pipe_code: &str) -> Result<Arc<dyn Pipe>, PipelexError> {
        self.get_optional_pipe(pipe_code).ok_or_else(|| {
            PipelexError::PipeLibrary(format!("pipe '{pipe_code}' not found in the library"))
        })
    }

    pub fn pipe_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.pipes.keys().map(String::as_str).collect();
        codes.sort();
        codes
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    /// Validates every pipe, then checks that all dependencies exist and
    /// that no controller ends up running itself.
    pub fn validate_with_libraries(&self, libraries: &LibraryContext<'_>) -> Result<(), PipelexError> {
        for code in self.pipe_codes() {
            let pipe = &self.pipes[code];
            pipe.validate_with_libraries(libraries)?;
            for dependency in pipe.pipe_dependencies() {
                if !self.pipes.contains_key(&dependency) {
                    return Err(PipelexError::PipeLibrary(format!(
                        "pipe '{code}' depends on pipe '{dependency}' which is not in the library"
                    )));
                }
            }
        }

        let mut done: HashSet<String> = HashSet::new();
        for code in self.pipe_codes() {
            let mut path: Vec<String> = Vec::new();
            self.check_no_cycle(code, &mut path, &mut done)?;
        }
        Ok(())
    }

    fn check_no_cycle(
        &self,
        code: &str,
        path: &mut Vec<String>,
        done: &mut HashSet<String>,
    ) -> Result<(), PipelexError> {
        if done.contains(code) {
            return Ok(());
        }
        if path.iter().any(|seen| seen == code) {
            path.push(code.to_string());
            return Err(PipelexError::PipeLibrary(format!(
                "pipe dependency cycle detected: {}",
                path.join(" -> ")
            )));
        }
        let Some(pipe) = self.pipes.get(code) else {
            return Ok(());
        };
        path.push(code.to_string());
        for dependency in pipe.pipe_dependencies() {
            self.check_no_cycle(&dependency, path, done)?;
        }
        path.pop();
        done.insert(code.to_string());
        Ok(())
    }
}
