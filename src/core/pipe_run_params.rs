use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::error::PipelexError;
use crate::core::working_memory::{BATCH_ITEM_STUFF_NAME, MAIN_STUFF_NAME};

/// Requested output multiplicity: `true`/`false`, or a fixed count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipeOutputMultiplicity {
    Flag(bool),
    Count(usize),
}

/// Result of combining a pipe's declared multiplicity with a caller's
/// override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedMultiplicity {
    pub applied: Option<PipeOutputMultiplicity>,
    pub is_multiple: bool,
    pub fixed_count: Option<usize>,
}

/// The override always wins when present. A boolean `true` override keeps
/// the count declared by the pipe, if any.
pub fn output_multiplicity_to_apply(
    base: Option<PipeOutputMultiplicity>,
    override_: Option<PipeOutputMultiplicity>,
) -> AppliedMultiplicity {
    use PipeOutputMultiplicity::{Count, Flag};
    let (applied, is_multiple, fixed_count) = match (override_, base) {
        (None, None) | (None, Some(Flag(false))) => (Some(Flag(false)), false, None),
        (None, Some(Flag(true))) => (Some(Flag(true)), true, None),
        (None, Some(Count(count))) => (Some(Count(count)), true, Some(count)),
        (Some(Flag(true)), Some(Count(count))) => (Some(Count(count)), true, Some(count)),
        (Some(Flag(true)), _) => (Some(Flag(true)), true, None),
        (Some(Flag(false)), _) => (Some(Flag(false)), false, None),
        (Some(Count(count)), _) => (Some(Count(count)), true, Some(count)),
    };
    AppliedMultiplicity {
        applied,
        is_multiple,
        fixed_count,
    }
}

/// Names the list to iterate over and the per-item stuff of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchParams {
    pub input_list_stuff_name: String,
    pub input_item_stuff_name: String,
}

impl Default for BatchParams {
    fn default() -> Self {
        Self {
            input_list_stuff_name: MAIN_STUFF_NAME.to_string(),
            input_item_stuff_name: BATCH_ITEM_STUFF_NAME.to_string(),
        }
    }
}

impl BatchParams {
    pub fn new(input_list_stuff_name: impl Into<String>, input_item_stuff_name: impl Into<String>) -> Self {
        Self {
            input_list_stuff_name: input_list_stuff_name.into(),
            input_item_stuff_name: input_item_stuff_name.into(),
        }
    }
}

/// Parameters carried down the call tree. Each nested call receives its own
/// copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeRunParams {
    pub pipe_stack_limit: usize,
    #[serde(default)]
    pub pipe_layers: Vec<String>,
    #[serde(default)]
    pub output_multiplicity: Option<PipeOutputMultiplicity>,
    #[serde(default)]
    pub dynamic_output_concept_code: Option<String>,
    #[serde(default)]
    pub batch_params: Option<BatchParams>,
    #[serde(default)]
    pub final_stuff_code: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

impl PipeRunParams {
    pub fn new(pipe_stack_limit: usize) -> Self {
        Self {
            pipe_stack_limit,
            pipe_layers: Vec::new(),
            output_multiplicity: None,
            dynamic_output_concept_code: None,
            batch_params: None,
            final_stuff_code: None,
            params: HashMap::new(),
        }
    }

    pub fn with_output_multiplicity(mut self, output_multiplicity: Option<PipeOutputMultiplicity>) -> Self {
        self.output_multiplicity = output_multiplicity;
        self
    }

    pub fn with_dynamic_output_concept_code(mut self, concept_code: Option<String>) -> Self {
        self.dynamic_output_concept_code = concept_code;
        self
    }

    pub fn with_batch_params(mut self, batch_params: Option<BatchParams>) -> Self {
        self.batch_params = batch_params;
        self
    }

    pub fn with_final_stuff_code(mut self, final_stuff_code: Option<String>) -> Self {
        self.final_stuff_code = final_stuff_code;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Enters `pipe_code`, failing once the stack budget is used up.
    pub fn push_pipe_layer(&mut self, pipe_code: &str) -> Result<(), PipelexError> {
        if self.pipe_layers.len() >= self.pipe_stack_limit {
            let mut pipe_layers = self.pipe_layers.clone();
            pipe_layers.push(pipe_code.to_string());
            return Err(PipelexError::PipeStackOverflow {
                pipe_code: pipe_code.to_string(),
                limit: self.pipe_stack_limit,
                pipe_layers,
            });
        }
        self.pipe_layers.push(pipe_code.to_string());
        Ok(())
    }

    pub fn current_pipe_code(&self) -> Option<&str> {
        self.pipe_layers.last().map(String::as_str)
    }

    pub fn is_multiple_output_required(&self) -> bool {
        match self.output_multiplicity {
            Some(PipeOutputMultiplicity::Flag(flag)) => flag,
            Some(PipeOutputMultiplicity::Count(_)) => true,
            None => false,
        }
    }

    /// Copy for a sub-call, with a different multiplicity request.
    pub fn copy_by_injecting_multiplicity(&self, output_multiplicity: Option<PipeOutputMultiplicity>) -> Self {
        let mut copy = self.clone();
        copy.output_multiplicity = output_multiplicity;
        copy
    }

    /// Copy for a sub-call whose output identity is pinned.
    pub fn deep_copy_with_final_stuff_code(&self, final_stuff_code: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.final_stuff_code = Some(final_stuff_code.into());
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipeOutputMultiplicity::{Count, Flag};

    #[test]
    fn test_override_always_wins() {
        let applied = output_multiplicity_to_apply(Some(Flag(true)), Some(Count(3)));
        assert_eq!(applied.fixed_count, Some(3));
        assert!(applied.is_multiple);

        let applied = output_multiplicity_to_apply(Some(Count(5)), Some(Flag(false)));
        assert!(!applied.is_multiple);
        assert_eq!(applied.fixed_count, None);

        let applied = output_multiplicity_to_apply(Some(Count(5)), Some(Flag(true)));
        assert_eq!(applied.fixed_count, Some(5));
    }

    #[test]
    fn test_declared_multiplicity_without_override() {
        let applied = output_multiplicity_to_apply(Some(Flag(true)), None);
        assert!(applied.is_multiple);
        assert_eq!(applied.fixed_count, None);

        let applied = output_multiplicity_to_apply(None, None);
        assert!(!applied.is_multiple);
    }

    #[test]
    fn test_stack_limit_names_the_stack() {
        let mut params = PipeRunParams::new(2);
        params.push_pipe_layer("outer").unwrap();
        params.push_pipe_layer("middle").unwrap();
        let err = params.push_pipe_layer("inner").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Pipe stack limit of 2 exceeded when entering pipe 'inner' (stack: outer > middle > inner)"
        );
        assert_eq!(params.current_pipe_code(), Some("middle"));
    }

    #[test]
    fn test_multiplicity_deserializes_from_bool_or_int() {
        let flag: PipeOutputMultiplicity = serde_json::from_str("true").unwrap();
        assert_eq!(flag, Flag(true));
        let count: PipeOutputMultiplicity = serde_json::from_str("3").unwrap();
        assert_eq!(count, Count(3));
    }
}
