use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cogt::llm::{LlmDeck, LlmSetting, LlmSettingChoices, LlmSettingOrPresetId};
use crate::cogt::LlmPromptFactory;
use crate::core::concept::{NativeConcept, StructureClass};
use crate::core::config::StructureConfig;
use crate::core::context::PipelexContext;
use crate::core::domain::Domain;
use crate::core::error::PipelexError;
use crate::core::pipe::{LibraryContext, Pipe, PipeCore, PipeKind};
use crate::core::pipe_run_params::{output_multiplicity_to_apply, PipeOutputMultiplicity, PipeRunParams};
use crate::core::stuff::Stuff;
use crate::core::stuff_content::StuffContent;
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::{JobCategory, JobMetadata};
use crate::pipe_operators::llm_prompt::{PipeLlmPrompt, PipedLlmPromptFactory, PromptSource};
use crate::pipe_operators::store_operator_output;

/// How structured outputs are obtained from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuringMethod {
    /// Ask for the structure in one structured-output call.
    Direct,
    /// Generate free text first, then extract the structure from it.
    PreliminaryText,
}

/// Prompts an LLM and stores its text or structured answer.
pub struct PipeLlm {
    pub core: PipeCore,
    pub llm_prompt: PipeLlmPrompt,
    pub llm_choices: Option<LlmSettingChoices>,
    pub structuring_method: Option<StructuringMethod>,
    pub prompt_template_to_structure: Option<String>,
    pub system_prompt_to_structure: Option<String>,
    pub output_multiplicity: Option<PipeOutputMultiplicity>,
}

impl PipeLlm {
    pub fn new(core: PipeCore, llm_prompt: PipeLlmPrompt) -> Self {
        PipeLlm {
            core,
            llm_prompt,
            llm_choices: None,
            structuring_method: None,
            prompt_template_to_structure: None,
            system_prompt_to_structure: None,
            output_multiplicity: None,
        }
    }

    pub fn with_llm_choices(mut self, llm_choices: LlmSettingChoices) -> Self {
        self.llm_choices = Some(llm_choices);
        self
    }

    pub fn with_structuring_method(mut self, structuring_method: StructuringMethod) -> Self {
        self.structuring_method = Some(structuring_method);
        self
    }

    pub fn with_output_multiplicity(mut self, output_multiplicity: PipeOutputMultiplicity) -> Self {
        self.output_multiplicity = Some(output_multiplicity);
        self
    }

    fn llm_setting(
        &self,
        llm_deck: &LlmDeck,
        pick: fn(&LlmSettingChoices) -> Option<&LlmSettingOrPresetId>,
        fallback: fn(&LlmSettingChoices) -> Option<&LlmSettingOrPresetId>,
    ) -> Result<LlmSetting, PipelexError> {
        let choices = self.llm_choices.as_ref();
        Ok(llm_deck.get_llm_setting(choices.and_then(pick), choices.and_then(fallback))?)
    }

    fn llm_setting_main(&self, llm_deck: &LlmDeck) -> Result<LlmSetting, PipelexError> {
        self.llm_setting(llm_deck, |c| c.for_text.as_ref(), |_| None)
    }

    fn llm_setting_for_object(&self, llm_deck: &LlmDeck) -> Result<LlmSetting, PipelexError> {
        self.llm_setting(llm_deck, |c| c.for_object.as_ref(), |c| c.for_text.as_ref())
    }

    fn llm_setting_for_object_direct(&self, llm_deck: &LlmDeck) -> Result<LlmSetting, PipelexError> {
        self.llm_setting(llm_deck, |c| c.for_object_direct.as_ref(), |c| c.for_object.as_ref())
    }

    fn llm_setting_for_object_list(&self, llm_deck: &LlmDeck) -> Result<LlmSetting, PipelexError> {
        self.llm_setting(llm_deck, |c| c.for_object_list.as_ref(), |c| c.for_object.as_ref())
    }

    fn llm_setting_for_object_list_direct(&self, llm_deck: &LlmDeck) -> Result<LlmSetting, PipelexError> {
        self.llm_setting(
            llm_deck,
            |c| c.for_object_list_direct.as_ref(),
            |c| c.for_object_list.as_ref(),
        )
    }

    /// Second-stage prompt factory, when the structure is to be extracted
    /// from preliminary text. A method declared on the pipe wins over the
    /// configured default.
    fn structuring_prompt_factory(
        &self,
        ctx: &PipelexContext,
        job_metadata: &JobMetadata,
    ) -> Option<PipedLlmPromptFactory> {
        let use_preliminary_text = match self.structuring_method {
            Some(StructuringMethod::Direct) => false,
            Some(StructuringMethod::PreliminaryText) => true,
            None => ctx.config().structure.is_default_text_then_structure,
        };
        if !use_preliminary_text {
            return None;
        }
        let structure_config = &ctx.config().structure;
        let domain = ctx.domain_library().get_domain(&self.core.domain);
        let template_name = self
            .prompt_template_to_structure
            .clone()
            .or_else(|| domain.and_then(|d| d.prompt_template_to_structure.clone()))
            .unwrap_or_else(|| structure_config.default_prompt_template_to_structure.clone());
        let system_prompt = self.system_prompt_to_structure(domain, structure_config);
        let pipe_llm_prompt = PipeLlmPrompt::new(self.core.domain.clone(), PromptSource::Jinja2Name(template_name))
            .with_system_prompt(PromptSource::Fixed(system_prompt));
        Some(PipedLlmPromptFactory::new(
            ctx.clone(),
            job_metadata.for_content_generation("structuring_prompt", JobCategory::PromptingJob),
            pipe_llm_prompt,
        ))
    }

    /// The pipe's own structuring prompt, then the domain's, then the
    /// domain's system prompt, then the configured default.
    fn system_prompt_to_structure(&self, domain: Option<&Domain>, structure_config: &StructureConfig) -> String {
        self.system_prompt_to_structure
            .clone()
            .or_else(|| domain.and_then(|d| d.system_prompt_to_structure.clone()))
            .or_else(|| domain.and_then(|d| d.system_prompt.clone()))
            .unwrap_or_else(|| structure_config.default_system_prompt_to_structure.clone())
    }
}

#[async_trait]
impl Pipe for PipeLlm {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn kind(&self) -> PipeKind {
        PipeKind::Llm
    }

    fn required_variables(&self) -> Vec<String> {
        self.llm_prompt.required_variables()
    }

    fn validate_with_libraries(&self, libraries: &LibraryContext<'_>) -> Result<(), PipelexError> {
        let concepts = libraries.concept_library;
        if self.structuring_method.is_some()
            && concepts.structure_class_of(&self.core.output_concept_code)? == StructureClass::Text
        {
            return Err(self.core.definition_error(format!(
                "output concept '{}' is a text concept, so it cannot be structured",
                self.core.output_concept_code
            )));
        }
        if let Some(input_concept_code) = &self.core.input_concept_code {
            if concepts.is_compatible_by_concept_code(input_concept_code, &NativeConcept::Image.code())
                && self.llm_prompt.user_images.is_empty()
            {
                return Err(self.core.definition_error(format!(
                    "input concept '{input_concept_code}' is an image but no user images are provided"
                )));
            }
        }
        if let Some(choices) = &self.llm_choices {
            for choice in [
                &choices.for_text,
                &choices.for_object,
                &choices.for_object_direct,
                &choices.for_object_list,
                &choices.for_object_list_direct,
            ]
            .into_iter()
            .flatten()
            {
                libraries
                    .llm_deck
                    .check_llm_setting(choice)
                    .map_err(|message| self.core.definition_error(message))?;
            }
        }
        Ok(())
    }

    async fn run_pipe(
        &self,
        ctx: &PipelexContext,
        job_metadata: &JobMetadata,
        working_memory: &mut WorkingMemory,
        run_params: PipeRunParams,
        output_name: Option<&str>,
    ) -> Result<Stuff, PipelexError> {
        let output_concept_code = if self.core.output_concept_code == NativeConcept::Dynamic.code() {
            run_params.dynamic_output_concept_code.clone().ok_or_else(|| {
                self.core
                    .run_params_error(&run_params, "no output concept code provided for a dynamic output")
            })?
        } else {
            self.core.output_concept_code.clone()
        };
        let output_concept = ctx.concept_library().get_required_concept(&output_concept_code)?;
        let applied = output_multiplicity_to_apply(self.output_multiplicity, run_params.output_multiplicity);
        log::debug!(
            "PipeLLM '{}' applies multiplicity {:?} to '{}'",
            self.core.code,
            applied.applied,
            output_concept_code
        );

        let prompt_run_params = run_params.copy_by_injecting_multiplicity(None);
        let mut llm_prompt = self
            .llm_prompt
            .make_llm_prompt(
                ctx,
                &job_metadata.for_content_generation("make_llm_prompt", JobCategory::PromptingJob),
                working_memory,
                &prompt_run_params,
            )
            .await
            .map_err(|err| err.in_pipe(&self.core.code, &run_params.pipe_layers))?;
        if llm_prompt.system_text.is_none() {
            llm_prompt.system_text = ctx
                .domain_library()
                .get_domain(&self.core.domain)
                .and_then(|domain| domain.system_prompt.clone());
        }
        if let Some(input_concept_code) = &self.core.input_concept_code {
            if ctx
                .concept_library()
                .is_compatible_by_concept_code(input_concept_code, &NativeConcept::Image.code())
                && llm_prompt.user_images.is_empty()
            {
                return Err(self.core.execution_error(
                    &run_params,
                    format!("input concept '{input_concept_code}' requires user images but the prompt has none"),
                ));
            }
        }

        let llm_deck = ctx.llm_deck();
        let content_generator = ctx.content_generator();
        let object_class = &output_concept.structure_class;
        let content = if *object_class == StructureClass::Text && !applied.is_multiple {
            let llm_job = job_metadata.for_content_generation(&format!("{}_gen_text", self.core.code), JobCategory::LlmJob);
            let text = content_generator
                .make_llm_text(&llm_job, &self.llm_setting_main(llm_deck)?, &llm_prompt)
                .await?;
            StuffContent::text(text)
        } else if applied.is_multiple {
            let nb_items = applied.fixed_count.ok_or_else(|| {
                self.core.run_params_error(
                    &run_params,
                    format!(
                        "Cannot guess how many outputs to generate if multiplicity is just true: \
                         pipe declares {:?}, run params request {:?}",
                        self.output_multiplicity, run_params.output_multiplicity
                    ),
                )
            })?;
            let llm_job = job_metadata.for_content_generation(
                &format!("{}_gen_{nb_items}x{}", self.core.code, object_class),
                JobCategory::LlmJob,
            );
            let mut items = match self.structuring_prompt_factory(ctx, job_metadata) {
                Some(factory) => {
                    content_generator
                        .make_text_then_object_list(
                            &llm_job,
                            object_class,
                            &self.llm_setting_main(llm_deck)?,
                            &self.llm_setting_for_object_list(llm_deck)?,
                            &llm_prompt,
                            Some(&factory as &dyn LlmPromptFactory),
                            Some(nb_items),
                        )
                        .await?
                }
                None => {
                    content_generator
                        .make_object_list_direct(
                            &llm_job,
                            object_class,
                            &self.llm_setting_for_object_list_direct(llm_deck)?,
                            &llm_prompt,
                            Some(nb_items),
                        )
                        .await?
                }
            };
            if items.len() < nb_items {
                return Err(self.core.execution_error(
                    &run_params,
                    format!("expected {nb_items} outputs but the model produced {}", items.len()),
                ));
            }
            items.truncate(nb_items);
            StuffContent::list(items)
        } else {
            let llm_job = job_metadata.for_content_generation(
                &format!("{}_gen_single_{}", self.core.code, object_class),
                JobCategory::LlmJob,
            );
            match self.structuring_prompt_factory(ctx, job_metadata) {
                Some(factory) => {
                    content_generator
                        .make_text_then_object(
                            &llm_job,
                            object_class,
                            &self.llm_setting_main(llm_deck)?,
                            &self.llm_setting_for_object(llm_deck)?,
                            &llm_prompt,
                            Some(&factory as &dyn LlmPromptFactory),
                        )
                        .await?
                }
                None => {
                    content_generator
                        .make_object_direct(
                            &llm_job,
                            object_class,
                            &self.llm_setting_for_object_direct(llm_deck)?,
                            &llm_prompt,
                        )
                        .await?
                }
            }
        };

        store_operator_output(
            &self.core,
            &run_params,
            working_memory,
            &output_concept_code,
            content,
            &self.required_variables(),
            output_name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cogt::llm::LlmSetting;
    use crate::core::concept::Concept;
    use crate::core::concept_library::ConceptLibrary;
    use crate::core::config::PipelexConfig;
    use crate::core::domain::DomainLibrary;
    use crate::core::pipe_library::PipeLibrary;

    fn describe_pipe(output_concept_code: &str) -> PipeLlm {
        PipeLlm::new(
            PipeCore::new("zoo", "describe", output_concept_code),
            PipeLlmPrompt::new("zoo", PromptSource::Fixed("Describe an animal".to_string())),
        )
    }

    fn validate(pipe: &PipeLlm, concepts: &ConceptLibrary, llm_deck: &LlmDeck) -> Result<(), PipelexError> {
        let config = PipelexConfig::default();
        let domains = DomainLibrary::default();
        let pipes = PipeLibrary::default();
        pipe.validate_with_libraries(&LibraryContext {
            config: &config,
            domain_library: &domains,
            concept_library: concepts,
            pipe_library: &pipes,
            llm_deck,
        })
    }

    #[test]
    fn test_text_output_cannot_be_structured() {
        let mut concepts = ConceptLibrary::new();
        concepts.add_concepts(NativeConcept::all_concepts()).unwrap();
        let pipe = describe_pipe("native.Text").with_structuring_method(StructuringMethod::Direct);
        let err = validate(&pipe, &concepts, &LlmDeck::default()).unwrap_err();
        assert!(err.to_string().contains("cannot be structured"));

        concepts
            .add_new_concept(
                Concept::new(
                    "zoo.Animal",
                    "An animal",
                    StructureClass::Structured("Animal".to_string()),
                    vec![],
                )
                .unwrap(),
            )
            .unwrap();
        let pipe = describe_pipe("zoo.Animal").with_structuring_method(StructuringMethod::PreliminaryText);
        assert!(validate(&pipe, &concepts, &LlmDeck::default()).is_ok());
    }

    #[test]
    fn test_structuring_system_prompt_falls_back_to_domain() {
        let structure_config = StructureConfig::default();
        let pipe = describe_pipe("native.Text");
        let domain = Domain::new("zoo").unwrap().with_system_prompt("You are a zookeeper.");

        assert_eq!(
            pipe.system_prompt_to_structure(Some(&domain), &structure_config),
            "You are a zookeeper."
        );

        let structuring_domain = Domain {
            system_prompt_to_structure: Some("Extract animal records.".to_string()),
            ..domain
        };
        assert_eq!(
            pipe.system_prompt_to_structure(Some(&structuring_domain), &structure_config),
            "Extract animal records."
        );
        assert_eq!(
            pipe.system_prompt_to_structure(None, &structure_config),
            structure_config.default_system_prompt_to_structure
        );
    }

    #[test]
    fn test_image_input_needs_user_images() {
        let mut concepts = ConceptLibrary::new();
        concepts.add_concepts(NativeConcept::all_concepts()).unwrap();
        let mut pipe = describe_pipe("native.Text");
        pipe.core = pipe.core.clone().with_input("native.Image");
        assert!(validate(&pipe, &concepts, &LlmDeck::default()).is_err());

        pipe.llm_prompt = pipe.llm_prompt.clone().with_user_images(vec!["image".to_string()]);
        assert!(validate(&pipe, &concepts, &LlmDeck::default()).is_ok());
    }

    #[test]
    fn test_unknown_preset_is_a_definition_error() {
        let concepts = ConceptLibrary::new();
        let pipe = describe_pipe("native.Text").with_llm_choices(LlmSettingChoices {
            for_text: Some(LlmSettingOrPresetId::PresetId("cheap".to_string())),
            ..Default::default()
        });
        assert!(validate(&pipe, &concepts, &LlmDeck::default()).is_err());

        let deck = LlmDeck::default().with_preset("cheap", LlmSetting::new("small-model", 0.1));
        assert!(validate(&pipe, &concepts, &deck).is_ok());
        assert_eq!(pipe.llm_setting_main(&deck).unwrap().llm_handle, "small-model");
        assert_eq!(pipe.llm_setting_for_object_direct(&deck).unwrap().llm_handle, "gpt-4o-mini");
    }
}
