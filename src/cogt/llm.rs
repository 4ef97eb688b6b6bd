//! LLM prompts, settings and the deck of presets.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cogt::error::CogtError;

/// An image handed to a vision-capable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PromptImage {
    Url { url: String },
    Base64 { base_64: String },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmPrompt {
    #[serde(default)]
    pub system_text: Option<String>,
    #[serde(default)]
    pub user_text: Option<String>,
    #[serde(default)]
    pub user_images: Vec<PromptImage>,
}

impl LlmPrompt {
    pub fn user(text: impl Into<String>) -> Self {
        LlmPrompt {
            user_text: Some(text.into()),
            ..Default::default()
        }
    }

    /// A prompt needs some user text; a system text, when present, must
    /// not be blank.
    pub fn validate_before_execution(&self) -> Result<(), CogtError> {
        if let Some(system_text) = &self.system_text {
            if system_text.trim().is_empty() {
                log::warn!("system_text should be None or contain text");
            }
        }
        match &self.user_text {
            Some(text) if !text.trim().is_empty() => Ok(()),
            _ => Err(CogtError::Prompt("user_text should contain text".to_string())),
        }
    }

    pub fn desc(&self) -> String {
        let mut description = String::from("LLM Prompt:");
        if let Some(system_text) = &self.system_text {
            description.push_str(&format!("\nsystem_text:\n{system_text}\n"));
        }
        if let Some(user_text) = &self.user_text {
            description.push_str(&format!("\nuser_text:\n{user_text}\n"));
        }
        if !self.user_images.is_empty() {
            description.push_str(&format!("\nuser_images: {}\n", self.user_images.len()));
        }
        description
    }
}

/// Which family of prompt conventions a model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptingTarget {
    OpenAi,
    Anthropic,
    Mistral,
    Gemini,
    Fal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSetting {
    pub llm_handle: String,
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub prompting_target: Option<PromptingTarget>,
}

impl LlmSetting {
    pub fn new(llm_handle: impl Into<String>, temperature: f32) -> Self {
        LlmSetting {
            llm_handle: llm_handle.into(),
            temperature,
            max_tokens: None,
            prompting_target: None,
        }
    }

    /// Temperature is normalized to `[0, 1]` across providers.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(format!(
                "temperature of '{}' must be between 0 and 1, got {}",
                self.llm_handle, self.temperature
            ));
        }
        Ok(())
    }
}

/// Either a full setting or the name of a preset in the [`LlmDeck`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LlmSettingOrPresetId {
    Setting(LlmSetting),
    PresetId(String),
}

/// Per-purpose setting choices of an LLM pipe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmSettingChoices {
    #[serde(default)]
    pub for_text: Option<LlmSettingOrPresetId>,
    #[serde(default)]
    pub for_object: Option<LlmSettingOrPresetId>,
    #[serde(default)]
    pub for_object_direct: Option<LlmSettingOrPresetId>,
    #[serde(default)]
    pub for_object_list: Option<LlmSettingOrPresetId>,
    #[serde(default)]
    pub for_object_list_direct: Option<LlmSettingOrPresetId>,
}

impl LlmSettingChoices {
    pub fn list_used_presets(&self) -> Vec<&str> {
        [
            &self.for_text,
            &self.for_object,
            &self.for_object_direct,
            &self.for_object_list,
            &self.for_object_list_direct,
        ]
        .into_iter()
        .filter_map(|choice| match choice {
            Some(LlmSettingOrPresetId::PresetId(preset)) => Some(preset.as_str()),
            _ => None,
        })
        .collect()
    }
}

/// Named LLM presets plus the defaults used when a pipe leaves a purpose
/// unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmDeck {
    #[serde(default)]
    pub llm_presets: HashMap<String, LlmSetting>,
    pub llm_choice_default: LlmSetting,
}

impl Default for LlmDeck {
    fn default() -> Self {
        Self {
            llm_presets: HashMap::new(),
            llm_choice_default: LlmSetting::new("gpt-4o-mini", 0.5),
        }
    }
}

impl LlmDeck {
    pub fn with_preset(mut self, preset_id: impl Into<String>, setting: LlmSetting) -> Self {
        self.llm_presets.insert(preset_id.into(), setting);
        self
    }

    pub fn check_llm_setting(&self, choice: &LlmSettingOrPresetId) -> Result<(), String> {
        match choice {
            LlmSettingOrPresetId::Setting(setting) => setting.validate(),
            LlmSettingOrPresetId::PresetId(preset) if self.llm_presets.contains_key(preset) => Ok(()),
            LlmSettingOrPresetId::PresetId(preset) => {
                Err(format!("LLM preset '{preset}' is not in the deck"))
            }
        }
    }

    /// Resolves a choice, falling back to `fallback` and then to the deck
    /// default.
    pub fn get_llm_setting(
        &self,
        choice: Option<&LlmSettingOrPresetId>,
        fallback: Option<&LlmSettingOrPresetId>,
    ) -> Result<LlmSetting, CogtError> {
        match choice.or(fallback) {
            None => Ok(self.llm_choice_default.clone()),
            Some(LlmSettingOrPresetId::Setting(setting)) => Ok(setting.clone()),
            Some(LlmSettingOrPresetId::PresetId(preset)) => self
                .llm_presets
                .get(preset)
                .cloned()
                .ok_or_else(|| CogtError::ProviderNotConfigured(format!("LLM preset '{preset}' not found"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setting_or_preset_deserialization() {
        let choices: LlmSettingChoices = serde_json::from_value(json!({
            "for_text": "cheap",
            "for_object": {"llm_handle": "gpt-4o", "temperature": 0.1}
        }))
        .unwrap();
        assert_eq!(choices.list_used_presets(), vec!["cheap"]);
        assert!(matches!(choices.for_object, Some(LlmSettingOrPresetId::Setting(_))));
    }

    #[test]
    fn test_deck_resolution() {
        let deck = LlmDeck::default().with_preset("cheap", LlmSetting::new("small-model", 0.2));
        let preset = LlmSettingOrPresetId::PresetId("cheap".to_string());
        assert_eq!(deck.get_llm_setting(Some(&preset), None).unwrap().llm_handle, "small-model");
        assert_eq!(deck.get_llm_setting(None, None).unwrap().llm_handle, "gpt-4o-mini");
        let missing = LlmSettingOrPresetId::PresetId("nope".to_string());
        assert!(deck.check_llm_setting(&missing).is_err());
        assert!(deck.get_llm_setting(Some(&missing), None).is_err());
    }

    #[test]
    fn test_prompt_validation() {
        assert!(LlmPrompt::user("Describe the image").validate_before_execution().is_ok());
        assert!(LlmPrompt::default().validate_before_execution().is_err());
    }
}
