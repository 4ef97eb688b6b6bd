use async_trait::async_trait;

use crate::cogt::imgg::{AspectRatio, GeneratedImage, ImggJobParams, ImggPrompt, Seed};
use crate::core::config::ImggParamDefaults;
use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe::{LibraryContext, Pipe, PipeCore, PipeKind};
use crate::core::pipe_run_params::{output_multiplicity_to_apply, PipeOutputMultiplicity, PipeRunParams};
use crate::core::stuff::Stuff;
use crate::core::stuff_content::{ImageContent, StuffContent};
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::{JobCategory, JobMetadata};
use crate::pipe_operators::store_operator_output;

pub const DEFAULT_IMGG_PROMPT_STUFF_NAME: &str = "imgg_prompt";

/// Generates one or several images from a text prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeImgGen {
    pub core: PipeCore,
    pub imgg_prompt: Option<String>,
    pub imgg_prompt_stuff_name: Option<String>,
    pub imgg_handle: Option<String>,
    pub aspect_ratio: Option<AspectRatio>,
    pub nb_steps: Option<u32>,
    pub guidance_scale: Option<f32>,
    pub is_safety_checker_enabled: Option<bool>,
    pub safety_tolerance: Option<u8>,
    pub is_raw: Option<bool>,
    pub seed: Option<Seed>,
    pub output_multiplicity: Option<PipeOutputMultiplicity>,
}

impl PipeImgGen {
    pub fn new(core: PipeCore) -> Self {
        PipeImgGen {
            core,
            imgg_prompt: None,
            imgg_prompt_stuff_name: None,
            imgg_handle: None,
            aspect_ratio: None,
            nb_steps: None,
            guidance_scale: None,
            is_safety_checker_enabled: None,
            safety_tolerance: None,
            is_raw: None,
            seed: None,
            output_multiplicity: None,
        }
    }

    pub fn with_prompt(mut self, imgg_prompt: impl Into<String>) -> Self {
        self.imgg_prompt = Some(imgg_prompt.into());
        self
    }

    pub fn with_output_multiplicity(mut self, output_multiplicity: PipeOutputMultiplicity) -> Self {
        self.output_multiplicity = Some(output_multiplicity);
        self
    }

    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    fn prompt_stuff_name(&self) -> &str {
        self.imgg_prompt_stuff_name
            .as_deref()
            .unwrap_or(DEFAULT_IMGG_PROMPT_STUFF_NAME)
    }

    fn job_params(&self, defaults: &ImggParamDefaults) -> ImggJobParams {
        ImggJobParams {
            aspect_ratio: self.aspect_ratio.unwrap_or(defaults.aspect_ratio),
            nb_steps: self.nb_steps.or(defaults.nb_steps),
            guidance_scale: self.guidance_scale.unwrap_or(defaults.guidance_scale),
            is_safety_checker_enabled: self
                .is_safety_checker_enabled
                .unwrap_or(defaults.is_safety_checker_enabled),
            safety_tolerance: self.safety_tolerance.unwrap_or(defaults.safety_tolerance),
            is_raw: self.is_raw.unwrap_or(defaults.is_raw),
            output_format: defaults.output_format,
            seed: self.seed.as_ref().unwrap_or(&defaults.seed).resolve(),
        }
    }
}

fn image_content(image: GeneratedImage, prompt_text: &str) -> StuffContent {
    StuffContent::Image(ImageContent {
        url: image.url,
        source_prompt: Some(prompt_text.to_string()),
        caption: None,
        base_64: None,
    })
}

#[async_trait]
impl Pipe for PipeImgGen {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn kind(&self) -> PipeKind {
        PipeKind::ImgGen
    }

    fn required_variables(&self) -> Vec<String> {
        match self.imgg_prompt {
            Some(_) => Vec::new(),
            None => vec![self.prompt_stuff_name().to_string()],
        }
    }

    fn validate_with_libraries(&self, _libraries: &LibraryContext<'_>) -> Result<(), PipelexError> {
        if let Some(tolerance) = self.safety_tolerance {
            if !(1..=6).contains(&tolerance) {
                return Err(self
                    .core
                    .definition_error(format!("safety_tolerance must be between 1 and 6, got {tolerance}")));
            }
        }
        if self.nb_steps == Some(0) {
            return Err(self.core.definition_error("nb_steps must be greater than 0"));
        }
        if matches!(self.guidance_scale, Some(scale) if scale <= 0.0) {
            return Err(self.core.definition_error("guidance_scale must be greater than 0"));
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
        let applied = output_multiplicity_to_apply(self.output_multiplicity, run_params.output_multiplicity);
        if applied.is_multiple && applied.fixed_count.is_none() {
            return Err(self.core.run_params_error(
                &run_params,
                format!(
                    "Cannot guess how many images to generate if multiplicity is just true: \
                     pipe declares {:?}, run params request {:?}",
                    self.output_multiplicity, run_params.output_multiplicity
                ),
            ));
        }
        let nb_images = applied.fixed_count.unwrap_or(1);

        let prompt_text = match &self.imgg_prompt {
            Some(text) => text.clone(),
            None => working_memory
                .get_stuff_as_text(self.prompt_stuff_name())
                .map_err(|err| err.in_pipe(&self.core.code, &run_params.pipe_layers))?
                .to_string(),
        };
        let imgg_prompt = ImggPrompt {
            positive_text: prompt_text.clone(),
        };
        imgg_prompt.validate_before_execution()?;

        let imgg_config = &ctx.config().imgg;
        let imgg_handle = self.imgg_handle.as_deref().unwrap_or(&imgg_config.default_imgg_handle);
        let imgg_job_params = self.job_params(&imgg_config.param_defaults);
        let imgg_job = job_metadata.for_content_generation(&format!("{}_imgg", self.core.code), JobCategory::ImggJob);
        log::debug!("PipeImgGen '{}' generating {nb_images} image(s) with '{imgg_handle}'", self.core.code);

        let content_generator = ctx.content_generator();
        let content = if nb_images > 1 {
            let images = content_generator
                .make_image_list(&imgg_job, imgg_handle, &imgg_prompt, nb_images, &imgg_job_params)
                .await?;
            StuffContent::list(images.into_iter().map(|image| image_content(image, &prompt_text)).collect())
        } else {
            let image = content_generator
                .make_single_image(&imgg_job, imgg_handle, &imgg_prompt, &imgg_job_params)
                .await?;
            image_content(image, &prompt_text)
        };

        store_operator_output(
            &self.core,
            &run_params,
            working_memory,
            &self.core.output_concept_code,
            content,
            &self.required_variables(),
            output_name,
        )
    }
}
