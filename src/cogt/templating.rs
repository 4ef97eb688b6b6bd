use minijinja::{AutoEscape, Environment};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::cogt::error::CogtError;

/// Name of the builtin template rendering the second stage of a "text then
/// object" generation.
pub const STRUCTURE_FROM_PRELIMINARY_TEXT: &str = "structure_from_preliminary_text_user";

const STRUCTURE_FROM_PRELIMINARY_TEXT_SOURCE: &str = "Your job is to extract the data from the text below and \
return it as JSON matching the requested structure.

{{ preliminary_text|tag(\"text\") }}
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jinja2TemplateCategory {
    Html,
    Markdown,
    Mermaid,
    #[default]
    LlmPrompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagStyle {
    #[default]
    NoTag,
    TicksOnly,
    XmlTags,
    SquareBrackets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    #[default]
    Plain,
    Markdown,
    Html,
    Json,
}

/// How variables get wrapped when they are injected into a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PromptingStyle {
    #[serde(default)]
    pub tag_style: TagStyle,
    #[serde(default)]
    pub text_format: TextFormat,
}

impl PromptingStyle {
    /// Wraps `text` named `name` according to the tag style.
    pub fn tag(&self, name: &str, text: &str) -> String {
        match self.tag_style {
            TagStyle::NoTag => text.to_string(),
            TagStyle::TicksOnly => format!("```\n{text}\n```"),
            TagStyle::XmlTags => format!("<{name}>\n{text}\n</{name}>"),
            TagStyle::SquareBrackets => format!("[{name}]\n{text}\n[/{name}]"),
        }
    }
}

/// Named jinja2 templates plus the rendering of inline ones.
///
/// Every render builds a fresh minijinja environment holding the named
/// templates and a `tag` filter bound to the requested [`PromptingStyle`].
#[derive(Debug, Clone)]
pub struct Jinja2Library {
    templates: HashMap<String, String>,
}

impl Default for Jinja2Library {
    fn default() -> Self {
        let mut library = Jinja2Library {
            templates: HashMap::new(),
        };
        library.add_template(STRUCTURE_FROM_PRELIMINARY_TEXT, STRUCTURE_FROM_PRELIMINARY_TEXT_SOURCE);
        library
    }
}

impl Jinja2Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.add_template(name, source);
        self
    }

    /// Replaces any template already registered under `name`.
    pub fn add_template(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn get_template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// Source of a named template, as registered.
    pub fn get_required_template(&self, name: &str) -> Result<String, CogtError> {
        self.get_template(name)
            .map(str::to_string)
            .ok_or_else(|| CogtError::Prompt(format!("template '{name}' not found")))
    }

    /// Renders either the named template or the inline one. Exactly one of
    /// them must be given.
    pub fn render(
        &self,
        context: &Map<String, Value>,
        jinja2_name: Option<&str>,
        jinja2: Option<&str>,
        prompting_style: Option<&PromptingStyle>,
        template_category: Jinja2TemplateCategory,
    ) -> Result<String, CogtError> {
        let mut env = Environment::new();
        for (name, source) in &self.templates {
            env.add_template(name.as_str(), source.as_str())
                .map_err(|err| CogtError::Prompt(format!("template '{name}' does not parse: {err}")))?;
        }
        let style = prompting_style.copied().unwrap_or_default();
        env.add_filter("tag", move |text: String, name: String| style.tag(&name, &text));
        if template_category == Jinja2TemplateCategory::Html {
            env.set_auto_escape_callback(|_| AutoEscape::Html);
        }

        let template = match (jinja2_name, jinja2) {
            (Some(name), None) => env
                .get_template(name)
                .map_err(|err| CogtError::Prompt(format!("template '{name}' not found: {err}")))?,
            (None, Some(source)) => env
                .template_from_str(source)
                .map_err(|err| CogtError::Prompt(format!("template does not parse: {err}")))?,
            _ => {
                return Err(CogtError::Prompt(
                    "exactly one of a template name or an inline template must be given".to_string(),
                ));
            }
        };
        template
            .render(minijinja::Value::from_serialize(context))
            .map_err(|err| CogtError::Prompt(format!("template render error: {err}")))
    }
}

/// Root context names a template reads, leaving out names it binds itself
/// and the environment's builtin globals. A template that does not parse
/// reads nothing; the parse error surfaces when it is rendered.
pub fn template_variables(source: &str) -> Vec<String> {
    let env = Environment::new();
    let Ok(template) = env.template_from_str(source) else {
        return Vec::new();
    };
    let globals: HashSet<&str> = env.globals().map(|(name, _)| name).collect();
    let mut names: Vec<String> = template
        .undeclared_variables(false)
        .into_iter()
        .filter(|name| !globals.contains(name.as_str()))
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_styles() {
        let xml = PromptingStyle {
            tag_style: TagStyle::XmlTags,
            ..Default::default()
        };
        assert_eq!(xml.tag("doc", "hi"), "<doc>\nhi\n</doc>");
        assert_eq!(PromptingStyle::default().tag("doc", "hi"), "hi");
    }

    #[test]
    fn test_render_inline_and_named() {
        let library = Jinja2Library::new().with_template("greet", "Hello {{ name }}!");
        let context = json!({"name": "Ada", "pet": {"kind": "cat"}});
        let context = context.as_object().unwrap();

        let named = library
            .render(context, Some("greet"), None, None, Jinja2TemplateCategory::LlmPrompt)
            .unwrap();
        assert_eq!(named, "Hello Ada!");

        let inline = library
            .render(context, None, Some("{{ pet.kind }}"), None, Jinja2TemplateCategory::Markdown)
            .unwrap();
        assert_eq!(inline, "cat");
    }

    #[test]
    fn test_tag_filter_follows_prompting_style() {
        let style = PromptingStyle {
            tag_style: TagStyle::SquareBrackets,
            ..Default::default()
        };
        let context = json!({"doc": "hi"});
        let rendered = Jinja2Library::new()
            .render(
                context.as_object().unwrap(),
                None,
                Some("{{ doc|tag(\"doc\") }}"),
                Some(&style),
                Jinja2TemplateCategory::LlmPrompt,
            )
            .unwrap();
        assert_eq!(rendered, "[doc]\nhi\n[/doc]");
    }

    #[test]
    fn test_template_variables() {
        let template = "Describe {{ animal.name|upper }} from {{ zoo }}.\n\
                        {% for keeper in keepers %}- {{ keeper.name }} ({{ loop.index }}){% endfor %}\n\
                        {% set total = 3 %}{{ total }} {{ \"literal\" }}";
        assert_eq!(template_variables(template), vec!["animal", "keepers", "zoo"]);
    }

    #[test]
    fn test_template_variables_inside_expressions() {
        assert_eq!(template_variables("{{ 'Describe ' ~ animal }}"), vec!["animal"]);
        assert_eq!(
            template_variables("{% if not animal %}nothing{% else %}{{ animal }}{% endif %}"),
            vec!["animal"]
        );
        assert_eq!(
            template_variables("{{ greeting | default(animal) }}"),
            vec!["animal", "greeting"]
        );
        assert_eq!(
            template_variables("{% for i in range(3) %}{{ i }}{% endfor %}"),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_named_template_source_is_raw() {
        let library = Jinja2Library::new().with_template("raw", "Keep {{ braces }} as is");
        assert_eq!(library.get_required_template("raw").unwrap(), "Keep {{ braces }} as is");
        assert!(library.get_required_template("missing").is_err());
    }

    #[test]
    fn test_render_errors() {
        let library = Jinja2Library::new();
        let context = Map::new();
        assert!(library
            .render(&context, Some("missing"), None, None, Jinja2TemplateCategory::LlmPrompt)
            .is_err());
        assert!(library
            .render(&context, None, None, None, Jinja2TemplateCategory::LlmPrompt)
            .is_err());
    }
}
