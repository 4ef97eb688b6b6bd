use async_trait::async_trait;

use crate::cogt::ocr::{ExtractedImage, OcrInput, OcrJobParams, OcrOutput};
use crate::core::context::PipelexContext;
use crate::core::error::PipelexError;
use crate::core::pipe::{LibraryContext, Pipe, PipeCore, PipeKind};
use crate::core::pipe_run_params::PipeRunParams;
use crate::core::stuff::Stuff;
use crate::core::stuff_content::{ImageContent, PageContent, StuffContent, TextAndImagesContent, TextContent};
use crate::core::working_memory::WorkingMemory;
use crate::mission::job_metadata::{JobCategory, JobMetadata};
use crate::pipe_operators::store_operator_output;

/// Extracts the pages of an image or a PDF found in the working memory.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeOcr {
    pub core: PipeCore,
    pub image_stuff_name: Option<String>,
    pub pdf_stuff_name: Option<String>,
    pub ocr_handle: Option<String>,
    pub should_caption_images: Option<bool>,
    pub should_include_screenshots: Option<bool>,
    pub screenshots_dpi: Option<u32>,
}

impl PipeOcr {
    fn with_source(core: PipeCore, image_stuff_name: Option<String>, pdf_stuff_name: Option<String>) -> Self {
        PipeOcr {
            core,
            image_stuff_name,
            pdf_stuff_name,
            ocr_handle: None,
            should_caption_images: None,
            should_include_screenshots: None,
            screenshots_dpi: None,
        }
    }

    pub fn for_image(core: PipeCore, image_stuff_name: impl Into<String>) -> Self {
        Self::with_source(core, Some(image_stuff_name.into()), None)
    }

    pub fn for_pdf(core: PipeCore, pdf_stuff_name: impl Into<String>) -> Self {
        Self::with_source(core, None, Some(pdf_stuff_name.into()))
    }

    pub fn with_ocr_handle(mut self, ocr_handle: impl Into<String>) -> Self {
        self.ocr_handle = Some(ocr_handle.into());
        self
    }

    pub fn with_screenshots(mut self, dpi: Option<u32>) -> Self {
        self.should_include_screenshots = Some(true);
        self.screenshots_dpi = dpi;
        self
    }

    fn input_name(&self) -> Option<&str> {
        self.image_stuff_name.as_deref().or(self.pdf_stuff_name.as_deref())
    }

    fn pages_content(ocr_output: OcrOutput) -> StuffContent {
        let pages = ocr_output
            .pages
            .into_values()
            .map(|page| {
                StuffContent::Page(PageContent {
                    text_and_images: TextAndImagesContent {
                        text: page.text.map(|text| TextContent { text }),
                        images: page.extracted_images.into_iter().map(extracted_image_content).collect(),
                    },
                    page_view: page.screenshot.map(extracted_image_content),
                })
            })
            .collect();
        StuffContent::list(pages)
    }
}

fn extracted_image_content(image: ExtractedImage) -> ImageContent {
    ImageContent {
        url: image.image_id,
        source_prompt: None,
        caption: image.caption,
        base_64: image.base_64,
    }
}

#[async_trait]
impl Pipe for PipeOcr {
    fn core(&self) -> &PipeCore {
        &self.core
    }

    fn kind(&self) -> PipeKind {
        PipeKind::Ocr
    }

    fn required_variables(&self) -> Vec<String> {
        self.input_name().map(str::to_string).into_iter().collect()
    }

    fn validate_with_libraries(&self, _libraries: &LibraryContext<'_>) -> Result<(), PipelexError> {
        if self.image_stuff_name.is_some() == self.pdf_stuff_name.is_some() {
            return Err(self
                .core
                .definition_error("exactly one of 'image_stuff_name' or 'pdf_stuff_name' must be provided"));
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
        let in_pipe = |err: PipelexError| err.in_pipe(&self.core.code, &run_params.pipe_layers);
        let ocr_input = match (&self.image_stuff_name, &self.pdf_stuff_name) {
            (Some(image_name), None) => {
                let image = working_memory.get_stuff_as_image(image_name).map_err(in_pipe)?;
                OcrInput::new(Some(image.url.clone()), None)?
            }
            (None, Some(pdf_name)) => {
                let pdf = working_memory.get_stuff_as_pdf(pdf_name).map_err(in_pipe)?;
                OcrInput::new(None, Some(pdf.url.clone()))?
            }
            _ => {
                return Err(self.core.run_params_error(
                    &run_params,
                    "exactly one of 'image_stuff_name' or 'pdf_stuff_name' must be provided",
                ));
            }
        };

        let ocr_config = &ctx.config().ocr;
        let ocr_job_params = OcrJobParams {
            should_caption_images: self
                .should_caption_images
                .unwrap_or(ocr_config.default_should_caption_images),
            should_include_screenshots: self
                .should_include_screenshots
                .unwrap_or(ocr_config.default_should_include_screenshots),
            screenshots_dpi: self.screenshots_dpi.unwrap_or(ocr_config.default_screenshots_dpi),
        };
        let ocr_handle = self.ocr_handle.as_deref().unwrap_or(&ocr_config.default_ocr_handle);
        log::debug!("PipeOcr '{}' extracting pages with '{ocr_handle}'", self.core.code);

        let ocr_output = ctx
            .content_generator()
            .make_ocr_extract_pages(
                &job_metadata.for_content_generation(&format!("{}_ocr", self.core.code), JobCategory::OcrJob),
                &ocr_input,
                ocr_handle,
                &ocr_job_params,
            )
            .await?;

        store_operator_output(
            &self.core,
            &run_params,
            working_memory,
            &self.core.output_concept_code,
            Self::pages_content(ocr_output),
            &self.required_variables(),
            output_name,
        )
    }
}
