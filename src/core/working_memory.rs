use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::core::concept_library::ConceptLibrary;
use crate::core::error::PipelexError;
use crate::core::stuff::{Stuff, StuffBlueprint, StuffFactory};
use crate::core::stuff_content::{
    ContentKind, ImageContent, PageContent, PdfContent, StuffContent,
};

/// Reserved name of the main entry.
pub const MAIN_STUFF_NAME: &str = "main_stuff";
/// Default name given to the current item inside a batch branch.
pub const BATCH_ITEM_STUFF_NAME: &str = "_batch_item";

/// The mutable named store of [`Stuff`] for one pipeline execution.
///
/// Direct entries live in `root`; `aliases` maps extra names onto direct
/// entries. Cloning yields a fully independent copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemory {
    root: BTreeMap<String, Stuff>,
    aliases: BTreeMap<String, String>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Direct names first, then aliases, each sorted.
    pub fn list_keys(&self) -> Vec<String> {
        self.root
            .keys()
            .chain(self.aliases.keys())
            .cloned()
            .collect()
    }

    pub fn make_deep_copy(&self) -> WorkingMemory {
        self.clone()
    }

    pub fn get_optional_stuff(&self, name: &str) -> Option<&Stuff> {
        if let Some(stuff) = self.root.get(name) {
            return Some(stuff);
        }
        self.aliases
            .get(name)
            .and_then(|target| self.root.get(target))
    }

    pub fn get_stuff(&self, name: &str) -> Result<&Stuff, PipelexError> {
        if let Some(stuff) = self.root.get(name) {
            return Ok(stuff);
        }
        if let Some(target) = self.aliases.get(name) {
            return self.root.get(target).ok_or_else(|| PipelexError::WorkingMemoryAlias {
                alias: name.to_string(),
                message: format!("alias points to '{target}' which is not in working memory"),
            });
        }
        Err(PipelexError::StuffNotFound {
            name: name.to_string(),
            valid_keys: self.list_keys(),
        })
    }

    pub fn get_main_stuff(&self) -> Result<&Stuff, PipelexError> {
        self.get_stuff(MAIN_STUFF_NAME)
    }

    /// Walks a dotted path such as `page.page_view` from a named stuff down
    /// into its content, optionally checking the kind found at the end.
    pub fn get_stuff_attribute(
        &self,
        path: &str,
        wanted: Option<ContentKind>,
    ) -> Result<StuffContent, PipelexError> {
        let mut segments = path.split('.');
        let stuff_name = segments.next().unwrap_or_default();
        let mut content = self.get_stuff(stuff_name)?.content.clone();
        let mut walked = stuff_name.to_string();
        for segment in segments {
            content = content
                .attribute(segment)
                .ok_or_else(|| PipelexError::StuffAttributeNotFound {
                    path: path.to_string(),
                    reason: format!(
                        "'{walked}' of kind '{}' has no attribute '{segment}'",
                        content.kind()
                    ),
                })?;
            walked.push('.');
            walked.push_str(segment);
        }
        if let Some(wanted) = wanted {
            if content.kind() != wanted {
                return Err(PipelexError::StuffContentType {
                    path: path.to_string(),
                    wanted: wanted.to_string(),
                    actual: content.kind().to_string(),
                });
            }
        }
        Ok(content)
    }

    pub fn is_stuff_code_used(&self, stuff_code: &str) -> bool {
        self.root.values().any(|stuff| stuff.stuff_code == stuff_code)
    }

    /// Adds `stuff` under `name`, plus the given aliases.
    ///
    /// Re-adding an equal stuff is a no-op. Replacing a different stuff under
    /// the same name is allowed and logged. A stuff whose code is already held
    /// by another entry with different content is rejected.
    pub fn add_new_stuff(
        &mut self,
        name: &str,
        stuff: Stuff,
        aliases: &[&str],
    ) -> Result<(), PipelexError> {
        if let Some(existing) = self.get_optional_stuff(name) {
            if *existing == stuff {
                log::debug!("Stuff '{name}' is already in working memory, nothing to add");
                let target = if self.root.contains_key(name) {
                    name.to_string()
                } else {
                    self.aliases.get(name).cloned().unwrap_or_else(|| name.to_string())
                };
                return self.point_aliases(aliases, &target);
            }
        }
        if let Some((existing_name, existing)) = self
            .root
            .iter()
            .find(|(key, existing)| key.as_str() != name && existing.stuff_code == stuff.stuff_code)
        {
            if existing.has_same_content(&stuff) {
                log::debug!(
                    "Stuff code '{}' already held by '{existing_name}' with the same content, nothing to add",
                    stuff.stuff_code
                );
                let existing_name = existing_name.clone();
                return self.point_aliases(aliases, &existing_name);
            }
            return Err(PipelexError::DuplicateStuffCode {
                stuff_code: stuff.stuff_code.clone(),
                existing_name: existing_name.clone(),
            });
        }
        if self.root.contains_key(name) {
            log::warn!("Stuff '{name}' already exists in working memory, replacing it");
        }
        self.aliases.remove(name);
        self.root.insert(name.to_string(), stuff);
        self.point_aliases(aliases, name)
    }

    fn point_aliases(&mut self, aliases: &[&str], target: &str) -> Result<(), PipelexError> {
        for alias in aliases.iter().filter(|alias| **alias != target) {
            self.set_alias(alias, target)?;
        }
        Ok(())
    }

    /// Removes a direct entry and every alias pointing at it.
    pub fn remove_stuff(&mut self, name: &str) -> Option<Stuff> {
        let removed = self.root.remove(name);
        if removed.is_some() {
            self.aliases.retain(|_, target| target != name);
        }
        removed
    }

    pub fn set_alias(&mut self, alias: &str, target: &str) -> Result<(), PipelexError> {
        if alias == target {
            return Err(PipelexError::WorkingMemoryAlias {
                alias: alias.to_string(),
                message: "an alias cannot point to itself".to_string(),
            });
        }
        if !self.root.contains_key(target) {
            return Err(PipelexError::WorkingMemoryAlias {
                alias: alias.to_string(),
                message: format!(
                    "target '{target}' is not in working memory, valid keys are: [{}]",
                    self.list_keys().join(", ")
                ),
            });
        }
        self.aliases.insert(alias.to_string(), target.to_string());
        Ok(())
    }

    /// Like [`set_alias`](Self::set_alias) but refuses to shadow a direct entry.
    pub fn add_alias(&mut self, alias: &str, target: &str) -> Result<(), PipelexError> {
        if self.root.contains_key(alias) {
            return Err(PipelexError::WorkingMemoryAlias {
                alias: alias.to_string(),
                message: "a stuff with this name already exists".to_string(),
            });
        }
        self.set_alias(alias, target)
    }

    /// Makes `stuff` the main stuff. With a name it is stored under that name
    /// and aliased as main; without one it is stored under the main key.
    pub fn set_new_main_stuff(&mut self, stuff: Stuff, name: Option<&str>) -> Result<(), PipelexError> {
        match name {
            Some(name) => {
                self.remove_stuff(MAIN_STUFF_NAME);
                self.add_new_stuff(name, stuff, &[MAIN_STUFF_NAME])
            }
            None => {
                self.aliases.remove(MAIN_STUFF_NAME);
                self.root.insert(MAIN_STUFF_NAME.to_string(), stuff);
                Ok(())
            }
        }
    }

    /// Checks every stored concept code is known to (or can be implied by)
    /// the concept library.
    pub fn validate_concepts(&self, concept_library: &ConceptLibrary) -> Result<(), PipelexError> {
        for stuff in self.root.values() {
            concept_library.get_required_concept(&stuff.concept_code)?;
        }
        Ok(())
    }

    /// Variables for template rendering: every name, including aliases.
    pub fn jinja2_context(&self) -> Map<String, Value> {
        let mut context: Map<String, Value> = self
            .root
            .iter()
            .map(|(name, stuff)| (name.clone(), stuff.content.to_template_value()))
            .collect();
        for (alias, target) in &self.aliases {
            if let Some(stuff) = self.root.get(target) {
                context.insert(alias.clone(), stuff.content.to_template_value());
            }
        }
        context
    }

    // Typed accessors

    pub fn get_stuff_as_text(&self, name: &str) -> Result<&str, PipelexError> {
        self.get_stuff(name)?.as_text()
    }

    pub fn get_stuff_as_number(&self, name: &str) -> Result<f64, PipelexError> {
        self.get_stuff(name)?.as_number()
    }

    pub fn get_stuff_as_list(&self, name: &str) -> Result<&[StuffContent], PipelexError> {
        self.get_stuff(name)?.as_list()
    }

    pub fn get_stuff_as_image(&self, name: &str) -> Result<&ImageContent, PipelexError> {
        let stuff = self.get_stuff(name)?;
        match &stuff.content {
            StuffContent::Image(image) => Ok(image),
            other => Err(stuff.type_error(ContentKind::Image, other)),
        }
    }

    pub fn get_stuff_as_pdf(&self, name: &str) -> Result<&PdfContent, PipelexError> {
        let stuff = self.get_stuff(name)?;
        match &stuff.content {
            StuffContent::Pdf(pdf) => Ok(pdf),
            other => Err(stuff.type_error(ContentKind::Pdf, other)),
        }
    }

    pub fn get_stuff_as_page(&self, name: &str) -> Result<&PageContent, PipelexError> {
        let stuff = self.get_stuff(name)?;
        match &stuff.content {
            StuffContent::Page(page) => Ok(page),
            other => Err(stuff.type_error(ContentKind::Page, other)),
        }
    }

    pub fn main_stuff_as_text(&self) -> Result<&str, PipelexError> {
        self.get_stuff_as_text(MAIN_STUFF_NAME)
    }

    pub fn main_stuff_as_list(&self) -> Result<&[StuffContent], PipelexError> {
        self.get_stuff_as_list(MAIN_STUFF_NAME)
    }

    pub fn main_stuff_as_image(&self) -> Result<&ImageContent, PipelexError> {
        self.get_stuff_as_image(MAIN_STUFF_NAME)
    }
}

pub struct WorkingMemoryFactory;

impl WorkingMemoryFactory {
    pub fn make_empty() -> WorkingMemory {
        WorkingMemory::new()
    }

    pub fn make_from_single_stuff(stuff: Stuff) -> Result<WorkingMemory, PipelexError> {
        let name = stuff
            .stuff_name
            .clone()
            .unwrap_or_else(|| MAIN_STUFF_NAME.to_string());
        let mut working_memory = WorkingMemory::new();
        if name == MAIN_STUFF_NAME {
            working_memory.set_new_main_stuff(stuff, None)?;
        } else {
            working_memory.add_new_stuff(&name, stuff, &[MAIN_STUFF_NAME])?;
        }
        Ok(working_memory)
    }

    /// Main is `main_name` when given, otherwise the first stuff.
    pub fn make_from_multiple_stuffs(
        stuffs: Vec<Stuff>,
        main_name: Option<&str>,
    ) -> Result<WorkingMemory, PipelexError> {
        let mut working_memory = WorkingMemory::new();
        let mut first_name: Option<String> = None;
        for stuff in stuffs {
            let name = stuff
                .stuff_name
                .clone()
                .unwrap_or_else(|| stuff.stuff_code.clone());
            first_name.get_or_insert_with(|| name.clone());
            working_memory.add_new_stuff(&name, stuff, &[])?;
        }
        if let Some(main_name) = main_name.map(str::to_string).or(first_name) {
            working_memory.set_alias(MAIN_STUFF_NAME, &main_name)?;
        }
        Ok(working_memory)
    }

    pub fn make_from_text(text: &str, concept_code: &str, name: Option<&str>) -> Result<WorkingMemory, PipelexError> {
        let stuff = StuffFactory::make_stuff(
            concept_code,
            StuffContent::text(text),
            Some(name.unwrap_or("text")),
        )?;
        Self::make_from_single_stuff(stuff)
    }

    pub fn make_from_image(url: &str, concept_code: &str, name: Option<&str>) -> Result<WorkingMemory, PipelexError> {
        let stuff = StuffFactory::make_stuff(
            concept_code,
            StuffContent::image(url),
            Some(name.unwrap_or("image")),
        )?;
        Self::make_from_single_stuff(stuff)
    }

    pub fn make_from_pdf(url: &str, concept_code: &str, name: Option<&str>) -> Result<WorkingMemory, PipelexError> {
        let stuff = StuffFactory::make_stuff(
            concept_code,
            StuffContent::Pdf(PdfContent { url: url.to_string() }),
            Some(name.unwrap_or("pdf")),
        )?;
        Self::make_from_single_stuff(stuff)
    }

    /// Every value becomes a `native.Text` stuff named after its key.
    pub fn make_from_strings(strings: &HashMap<String, String>) -> Result<WorkingMemory, PipelexError> {
        let mut names: Vec<&String> = strings.keys().collect();
        names.sort();
        let stuffs = names
            .into_iter()
            .map(|name| StuffFactory::make_stuff("native.Text", StuffContent::text(&strings[name]), Some(name)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::make_from_multiple_stuffs(stuffs, None)
    }

    pub fn make_from_blueprints(
        blueprints: &[StuffBlueprint],
        concept_library: &ConceptLibrary,
    ) -> Result<WorkingMemory, PipelexError> {
        let stuffs = blueprints
            .iter()
            .map(|blueprint| {
                let class = concept_library.structure_class_of(&blueprint.concept)?;
                StuffFactory::make_from_blueprint(blueprint, &class)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::make_from_multiple_stuffs(stuffs, None)
    }
}
