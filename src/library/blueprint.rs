use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cogt::imgg::{AspectRatio, Seed};
use crate::cogt::llm::{LlmSettingChoices, LlmSettingOrPresetId};
use crate::cogt::templating::{Jinja2TemplateCategory, PromptingStyle};
use crate::core::concept::{qualify_concept_code, Concept, StructureClass};
use crate::core::error::PipelexError;
use crate::core::pipe::{Pipe, PipeCore};
use crate::core::pipe_run_params::{BatchParams, PipeOutputMultiplicity};
use crate::pipe_controllers::{PipeBatch, PipeCondition, PipeSequence, SubPipe};
use crate::pipe_operators::llm::StructuringMethod;
use crate::pipe_operators::llm_prompt::{PipeLlmPrompt, PromptSource};
use crate::pipe_operators::{PipeFunc, PipeImgGen, PipeJinja2, PipeLlm, PipeOcr};

// ============================================================================
// CONCEPTS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

/// Declared form of a concept, either a bare definition string or a detail
/// object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConceptBlueprint {
    Definition(String),
    Details(ConceptDetails),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConceptDetails {
    pub definition: String,
    /// Class name such as `TextContent`; text when absent.
    #[serde(default)]
    pub structure: Option<String>,
    #[serde(default)]
    refines: OneOrMany,
}

impl ConceptBlueprint {
    pub fn make_concept(self, domain: &str, concept_name: &str) -> Result<Concept, PipelexError> {
        let code = qualify_concept_code(domain, concept_name);
        match self {
            ConceptBlueprint::Definition(definition) => {
                Concept::new(&code, definition, StructureClass::Text, Vec::new())
            }
            ConceptBlueprint::Details(details) => {
                let structure_class = details
                    .structure
                    .as_deref()
                    .map(StructureClass::from_class_name)
                    .unwrap_or(StructureClass::Text);
                let refines = details
                    .refines
                    .into_vec()
                    .iter()
                    .map(|refined| qualify_concept_code(domain, refined))
                    .collect();
                Concept::new(&code, details.definition, structure_class, refines)
            }
        }
    }
}

// ============================================================================
// PIPES
// ============================================================================

/// Declared form of a pipe, discriminated by its `type` key.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PipeBlueprint {
    #[serde(rename = "PipeLLM")]
    Llm(PipeLlmBlueprint),
    #[serde(rename = "PipeJinja2")]
    Jinja2(PipeJinja2Blueprint),
    #[serde(rename = "PipeOcr")]
    Ocr(PipeOcrBlueprint),
    #[serde(rename = "PipeImgGen")]
    ImgGen(PipeImgGenBlueprint),
    #[serde(rename = "PipeFunc")]
    Func(PipeFuncBlueprint),
    #[serde(rename = "PipeSequence")]
    Sequence(PipeSequenceBlueprint),
    #[serde(rename = "PipeBatch")]
    Batch(PipeBatchBlueprint),
    #[serde(rename = "PipeCondition")]
    Condition(PipeConditionBlueprint),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeLlmBlueprint {
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    pub output: String,

    #[serde(default)]
    pub system_prompt_template: Option<String>,
    #[serde(default)]
    pub system_prompt_template_name: Option<String>,
    #[serde(default)]
    pub system_prompt_name: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub prompt_name: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub prompting_style: Option<PromptingStyle>,

    #[serde(default)]
    pub images: Vec<String>,

    #[serde(default)]
    pub llm: Option<LlmSettingOrPresetId>,
    #[serde(default)]
    pub llm_to_structure: Option<LlmSettingOrPresetId>,
    #[serde(default)]
    pub llm_to_structure_direct: Option<LlmSettingOrPresetId>,
    #[serde(default)]
    pub llm_to_structure_list: Option<LlmSettingOrPresetId>,
    #[serde(default)]
    pub llm_to_structure_list_direct: Option<LlmSettingOrPresetId>,

    #[serde(default)]
    pub structuring_method: Option<StructuringMethod>,
    #[serde(default)]
    pub prompt_template_to_structure: Option<String>,
    #[serde(default)]
    pub system_prompt_to_structure: Option<String>,

    #[serde(default)]
    pub nb_output: Option<usize>,
    #[serde(default)]
    pub multiple_output: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeJinja2Blueprint {
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default = "native_text")]
    pub output: String,
    #[serde(default)]
    pub jinja2: Option<String>,
    #[serde(default)]
    pub jinja2_name: Option<String>,
    #[serde(default)]
    pub prompting_style: Option<PromptingStyle>,
    #[serde(default)]
    pub template_category: Option<Jinja2TemplateCategory>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeOcrBlueprint {
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    pub output: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub pdf: Option<String>,
    #[serde(default)]
    pub ocr_handle: Option<String>,
    #[serde(default)]
    pub should_caption_images: Option<bool>,
    #[serde(default)]
    pub should_include_screenshots: Option<bool>,
    #[serde(default)]
    pub screenshots_dpi: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeImgGenBlueprint {
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    pub output: String,
    #[serde(default)]
    pub imgg_prompt: Option<String>,
    #[serde(default)]
    pub imgg_prompt_stuff_name: Option<String>,
    #[serde(default)]
    pub imgg_handle: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
    #[serde(default)]
    pub nb_steps: Option<u32>,
    #[serde(default)]
    pub guidance_scale: Option<f32>,
    #[serde(default)]
    pub is_safety_checker_enabled: Option<bool>,
    #[serde(default)]
    pub safety_tolerance: Option<u8>,
    #[serde(default)]
    pub is_raw: Option<bool>,
    #[serde(default)]
    pub seed: Option<Seed>,
    #[serde(default)]
    pub nb_output: Option<usize>,
    #[serde(default)]
    pub multiple_output: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeFuncBlueprint {
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    pub output: String,
    pub function_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeSequenceBlueprint {
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    pub output: String,
    pub steps: Vec<SubPipe>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeBatchBlueprint {
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    pub output: String,
    pub branch_pipe_code: String,
    #[serde(default)]
    pub batch_params: Option<BatchParams>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeConditionBlueprint {
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    pub output: String,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub expression_template: Option<String>,
    pub pipe_map: BTreeMap<String, String>,
    #[serde(default)]
    pub default_pipe_code: Option<String>,
}

fn native_text() -> String {
    "native.Text".to_string()
}

fn make_core(domain: &str, pipe_code: &str, definition: Option<String>, input: Option<String>, output: &str) -> PipeCore {
    let mut core = PipeCore::new(domain, pipe_code, qualify_concept_code(domain, output));
    if let Some(input) = input {
        core = core.with_input(qualify_concept_code(domain, &input));
    }
    if let Some(definition) = definition {
        core = core.with_definition(definition);
    }
    core
}

fn make_output_multiplicity(
    nb_output: Option<usize>,
    multiple_output: Option<bool>,
) -> Result<Option<PipeOutputMultiplicity>, String> {
    match (nb_output, multiple_output) {
        (Some(_), Some(_)) => Err("only one of 'nb_output' or 'multiple_output' can be set".to_string()),
        (Some(count), None) => Ok(Some(PipeOutputMultiplicity::Count(count))),
        (None, Some(flag)) => Ok(Some(PipeOutputMultiplicity::Flag(flag))),
        (None, None) => Ok(None),
    }
}

impl PipeBlueprint {
    /// Builds the pipe declared under `pipe_code` in `domain`.
    pub fn make_pipe(self, domain: &str, pipe_code: &str) -> Result<Arc<dyn Pipe>, PipelexError> {
        let definition_error = |message: String| PipelexError::PipeDefinition {
            pipe_code: pipe_code.to_string(),
            message,
        };

        let pipe: Arc<dyn Pipe> = match self {
            PipeBlueprint::Llm(blueprint) => {
                let core = make_core(domain, pipe_code, blueprint.definition, blueprint.input, &blueprint.output);
                let system_prompt = PromptSource::exactly_one(
                    "system prompt",
                    blueprint.system_prompt,
                    blueprint.system_prompt_template,
                    blueprint.system_prompt_template_name,
                    blueprint.system_prompt_name,
                )
                .map_err(definition_error)?;
                let user_prompt = PromptSource::exactly_one(
                    "user prompt",
                    blueprint.prompt,
                    blueprint.prompt_template,
                    blueprint.template_name,
                    blueprint.prompt_name,
                )
                .map_err(definition_error)?
                .unwrap_or_else(|| PromptSource::Jinja2Name(pipe_code.to_string()));

                let mut llm_prompt = PipeLlmPrompt::new(domain, user_prompt).with_user_images(blueprint.images);
                if let Some(system_prompt) = system_prompt {
                    llm_prompt = llm_prompt.with_system_prompt(system_prompt);
                }
                if let Some(prompting_style) = blueprint.prompting_style {
                    llm_prompt = llm_prompt.with_prompting_style(prompting_style);
                }

                let llm_choices = LlmSettingChoices {
                    for_text: blueprint.llm,
                    for_object: blueprint.llm_to_structure,
                    for_object_direct: blueprint.llm_to_structure_direct,
                    for_object_list: blueprint.llm_to_structure_list,
                    for_object_list_direct: blueprint.llm_to_structure_list_direct,
                };

                let mut pipe = PipeLlm::new(core, llm_prompt);
                if llm_choices != LlmSettingChoices::default() {
                    pipe = pipe.with_llm_choices(llm_choices);
                }
                if let Some(method) = blueprint.structuring_method {
                    pipe = pipe.with_structuring_method(method);
                }
                if let Some(multiplicity) = make_output_multiplicity(blueprint.nb_output, blueprint.multiple_output)
                    .map_err(definition_error)?
                {
                    pipe = pipe.with_output_multiplicity(multiplicity);
                }
                pipe.prompt_template_to_structure = blueprint.prompt_template_to_structure;
                pipe.system_prompt_to_structure = blueprint.system_prompt_to_structure;
                Arc::new(pipe)
            }
            PipeBlueprint::Jinja2(blueprint) => {
                let core = make_core(domain, pipe_code, blueprint.definition, blueprint.input, &blueprint.output);
                let mut pipe = match (blueprint.jinja2, blueprint.jinja2_name) {
                    (Some(jinja2), None) => PipeJinja2::from_template(core, jinja2),
                    (None, Some(jinja2_name)) => PipeJinja2::from_template_name(core, jinja2_name),
                    _ => {
                        return Err(definition_error(
                            "exactly one of 'jinja2' or 'jinja2_name' must be provided".to_string(),
                        ));
                    }
                };
                if let Some(prompting_style) = blueprint.prompting_style {
                    pipe = pipe.with_prompting_style(prompting_style);
                }
                if let Some(category) = blueprint.template_category {
                    pipe = pipe.with_template_category(category);
                }
                Arc::new(pipe)
            }
            PipeBlueprint::Ocr(blueprint) => {
                let core = make_core(domain, pipe_code, blueprint.definition, blueprint.input, &blueprint.output);
                let mut pipe = match (blueprint.image, blueprint.pdf) {
                    (Some(image), None) => PipeOcr::for_image(core, image),
                    (None, Some(pdf)) => PipeOcr::for_pdf(core, pdf),
                    _ => return Err(definition_error("either 'image' or 'pdf' must be provided".to_string())),
                };
                if let Some(ocr_handle) = blueprint.ocr_handle {
                    pipe = pipe.with_ocr_handle(ocr_handle);
                }
                pipe.should_caption_images = blueprint.should_caption_images;
                pipe.should_include_screenshots = blueprint.should_include_screenshots;
                pipe.screenshots_dpi = blueprint.screenshots_dpi;
                Arc::new(pipe)
            }
            PipeBlueprint::ImgGen(blueprint) => {
                let core = make_core(domain, pipe_code, blueprint.definition, blueprint.input, &blueprint.output);
                let mut pipe = PipeImgGen::new(core);
                pipe.imgg_prompt = blueprint.imgg_prompt;
                pipe.imgg_prompt_stuff_name = blueprint.imgg_prompt_stuff_name;
                pipe.imgg_handle = blueprint.imgg_handle;
                pipe.aspect_ratio = blueprint.aspect_ratio;
                pipe.nb_steps = blueprint.nb_steps;
                pipe.guidance_scale = blueprint.guidance_scale;
                pipe.is_safety_checker_enabled = blueprint.is_safety_checker_enabled;
                pipe.safety_tolerance = blueprint.safety_tolerance;
                pipe.is_raw = blueprint.is_raw;
                pipe.seed = blueprint.seed;
                pipe.output_multiplicity =
                    make_output_multiplicity(blueprint.nb_output, blueprint.multiple_output).map_err(definition_error)?;
                Arc::new(pipe)
            }
            PipeBlueprint::Func(blueprint) => {
                let core = make_core(domain, pipe_code, blueprint.definition, blueprint.input, &blueprint.output);
                Arc::new(PipeFunc::new(core, blueprint.function_name))
            }
            PipeBlueprint::Sequence(blueprint) => {
                let core = make_core(domain, pipe_code, blueprint.definition, blueprint.input, &blueprint.output);
                Arc::new(PipeSequence::new(core, blueprint.steps))
            }
            PipeBlueprint::Batch(blueprint) => {
                let core = make_core(domain, pipe_code, blueprint.definition, blueprint.input, &blueprint.output);
                let mut pipe = PipeBatch::new(core, blueprint.branch_pipe_code);
                if let Some(batch_params) = blueprint.batch_params {
                    pipe = pipe.with_batch_params(batch_params);
                }
                match blueprint.max_concurrency {
                    Some(0) => return Err(definition_error("max_concurrency must be greater than 0".to_string())),
                    Some(max_concurrency) => pipe = pipe.with_concurrency(max_concurrency),
                    None => {}
                }
                Arc::new(pipe)
            }
            PipeBlueprint::Condition(blueprint) => {
                let core = make_core(domain, pipe_code, blueprint.definition, blueprint.input, &blueprint.output);
                let mut pipe = match (blueprint.expression, blueprint.expression_template) {
                    (Some(expression), None) => PipeCondition::new(core, &expression, blueprint.pipe_map),
                    (None, Some(template)) => PipeCondition::with_template(core, template, blueprint.pipe_map),
                    _ => {
                        return Err(definition_error(
                            "exactly one of 'expression' or 'expression_template' must be provided".to_string(),
                        ));
                    }
                };
                if let Some(default_pipe_code) = blueprint.default_pipe_code {
                    pipe = pipe.with_default_pipe(default_pipe_code);
                }
                Arc::new(pipe)
            }
        };
        Ok(pipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipe::PipeKind;
    use serde_json::json;

    fn make(value: serde_json::Value) -> Result<Arc<dyn Pipe>, PipelexError> {
        let blueprint: PipeBlueprint = serde_json::from_value(value).unwrap();
        blueprint.make_pipe("zoo", "describe")
    }

    #[test]
    fn test_llm_blueprint_qualifies_concepts() {
        let pipe = make(json!({
            "type": "PipeLLM",
            "input": "Image",
            "output": "Description",
            "prompt_template": "Describe {{ photo }}",
            "images": ["photo"],
            "llm": "cheap"
        }))
        .unwrap();
        assert_eq!(pipe.kind(), PipeKind::Llm);
        assert_eq!(pipe.core().input_concept_code.as_deref(), Some("native.Image"));
        assert_eq!(pipe.core().output_concept_code, "zoo.Description");
        assert_eq!(pipe.required_variables(), vec!["photo"]);
    }

    #[test]
    fn test_llm_blueprint_rejects_two_user_prompts() {
        let err = make(json!({
            "type": "PipeLLM",
            "output": "Text",
            "prompt": "hello",
            "template_name": "greeting"
        }))
        .err()
        .unwrap();
        assert!(matches!(err, PipelexError::PipeDefinition { .. }));
    }

    #[test]
    fn test_llm_blueprint_rejects_both_multiplicities() {
        let err = make(json!({
            "type": "PipeLLM",
            "output": "Text",
            "prompt": "hello",
            "nb_output": 2,
            "multiple_output": true
        }))
        .err()
        .unwrap();
        assert!(err.to_string().contains("nb_output"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: Result<PipeBlueprint, _> = serde_json::from_value(json!({
            "type": "PipeFunc",
            "output": "Text",
            "function_name": "noop",
            "colour": "blue"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_condition_needs_one_expression() {
        let err = make(json!({
            "type": "PipeCondition",
            "output": "Text",
            "pipe_map": {"a": "pipe_a"}
        }))
        .err()
        .unwrap();
        assert!(err.to_string().contains("expression"));
    }

    #[test]
    fn test_batch_zero_concurrency_is_a_definition_error() {
        let err = make(json!({
            "type": "PipeBatch",
            "output": "Text",
            "branch_pipe_code": "describe_one",
            "max_concurrency": 0
        }))
        .err()
        .unwrap();
        assert!(matches!(err, PipelexError::PipeDefinition { .. }));
    }

    #[test]
    fn test_concept_blueprint_forms() {
        let concept: ConceptBlueprint = serde_json::from_value(json!("A living creature")).unwrap();
        let concept = concept.make_concept("zoo", "Animal").unwrap();
        assert_eq!(concept.code, "zoo.Animal");
        assert_eq!(concept.structure_class, StructureClass::Text);

        let concept: ConceptBlueprint = serde_json::from_value(json!({
            "definition": "A photo of an animal",
            "structure": "ImageContent",
            "refines": "Image"
        }))
        .unwrap();
        let concept = concept.make_concept("zoo", "AnimalPhoto").unwrap();
        assert_eq!(concept.structure_class, StructureClass::Image);
        assert_eq!(concept.refines, vec!["native.Image"]);
    }
}
