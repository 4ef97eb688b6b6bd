mod common;

use common::{make_context, MockContentGenerator};
use pipelex::cogt::llm::{LlmDeck, LlmSetting};
use pipelex::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn load(config: PipelexConfig, libraries: &[serde_json::Value]) -> Result<LibraryManager, PipelexError> {
    let mut manager = LibraryManager::new(config)?;
    manager.load_from_values(libraries)?;
    Ok(manager)
}

#[tokio::test]
async fn test_domain_split_across_libraries() {
    let definitions = json!({
        "domain": "cooking",
        "definition": "Recipes and ingredients",
        "system_prompt": "You are a chef.",
        "concept": {"Recipe": "A recipe", "Dish": "The name of a dish"}
    });
    let pipes = json!({
        "domain": "cooking",
        "pipe": {
            "write_recipe": {
                "type": "PipeLLM",
                "input": "Dish",
                "output": "Recipe",
                "prompt_template": "Write a recipe for {{ dish }}"
            }
        }
    });
    let generator = Arc::new(MockContentGenerator::new());
    let ctx = make_context(generator.clone(), PipelexConfig::default(), &[pipes, definitions]);
    let memory = WorkingMemoryFactory::make_from_text("ratatouille", "cooking.Dish", Some("dish")).unwrap();

    let (output, _) = ctx.execute("write_recipe", Some(memory), None, None, None).await.unwrap();

    assert_eq!(output.main_stuff().unwrap().concept_code, "cooking.Recipe");
    assert_eq!(
        output.main_stuff_as_text().unwrap(),
        "Generated from: Write a recipe for ratatouille"
    );
    assert_eq!(
        ctx.domain_library().get_required_domain("cooking").unwrap().system_prompt.as_deref(),
        Some("You are a chef.")
    );
}

#[tokio::test]
async fn test_pipes_can_reach_across_domains() {
    let text_tools = json!({
        "domain": "text_tools",
        "definition": "Generic text utilities",
        "pipe": {
            "shorten": {"type": "PipeLLM", "output": "Text", "prompt_template": "Shorten {{ draft }}"}
        }
    });
    let news = json!({
        "domain": "news",
        "definition": "News writing",
        "concept": {"Headline": {"definition": "A headline", "refines": "Text"}},
        "pipe": {
            "draft": {"type": "PipeLLM", "output": "Text", "prompt_template": "Draft about {{ topic }}"},
            "headline": {
                "type": "PipeSequence",
                "output": "Headline",
                "steps": [
                    {"pipe": "draft", "result": "draft"},
                    {"pipe": "shorten", "result": "headline"}
                ]
            }
        }
    });
    let generator = Arc::new(MockContentGenerator::new());
    let ctx = make_context(generator, PipelexConfig::default(), &[text_tools, news]);
    let memory = WorkingMemoryFactory::make_from_text("tides", "native.Text", Some("topic")).unwrap();

    let (output, _) = ctx.execute("headline", Some(memory), None, None, None).await.unwrap();

    assert_eq!(
        output.working_memory.get_stuff_as_text("headline").unwrap(),
        "Generated from: Shorten Generated from: Draft about tides"
    );
    assert!(ctx
        .concept_library()
        .is_compatible_by_concept_code("news.Headline", "native.Text"));
}

#[test]
fn test_json_array_of_libraries() {
    let mut manager = LibraryManager::new(PipelexConfig::default()).unwrap();
    manager
        .load_from_json_str(
            r#"[
                {"domain": "a", "definition": "First", "pipe": {"hello": {"type": "PipeJinja2", "jinja2": "hi"}}},
                {"domain": "b", "definition": "Second", "pipe": {"bye": {"type": "PipeJinja2", "jinja2": "bye"}}}
            ]"#,
        )
        .unwrap();

    assert_eq!(manager.domain_library().len(), 2);
    assert_eq!(manager.pipe_library().len(), 2);
    manager.validate().unwrap();
}

#[test]
fn test_malformed_json_document() {
    let mut manager = LibraryManager::new(PipelexConfig::default()).unwrap();
    let err = manager.load_from_json_str("{\"domain\": ").unwrap_err();
    assert!(matches!(err, PipelexError::Serialization(_)));

    let err = manager.load_from_json_str("42").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Definition);
}

#[test]
fn test_image_input_without_images_is_rejected_at_validation() {
    let manager = load(
        PipelexConfig::default(),
        &[json!({
            "domain": "vision",
            "definition": "Looking at pictures",
            "pipe": {
                "caption": {"type": "PipeLLM", "input": "Image", "output": "Text", "prompt": "Caption this"}
            }
        })],
    )
    .unwrap();

    let err = manager
        .into_context_builder(Arc::new(MockContentGenerator::new()))
        .err()
        .unwrap();

    let PipelexError::PipeDefinition { pipe_code, message } = &err else {
        panic!("expected a definition error, got {err:?}");
    };
    assert_eq!(pipe_code, "caption");
    assert!(message.contains("no user images"));
}

#[test]
fn test_llm_presets_are_checked_against_the_deck() {
    let library = json!({
        "domain": "budget",
        "definition": "Cheap generations",
        "pipe": {
            "summarize": {"type": "PipeLLM", "output": "Text", "prompt": "Summarize", "llm": "cheap"}
        }
    });

    let manager = load(PipelexConfig::default(), &[library.clone()]).unwrap();
    let err = manager.validate().unwrap_err();
    assert!(err.to_string().contains("LLM preset 'cheap' is not in the deck"));

    let deck = LlmDeck::default().with_preset("cheap", LlmSetting::new("small-model", 0.2));
    let manager = load(PipelexConfig::default(), &[library]).unwrap().with_llm_deck(deck);
    manager.validate().unwrap();
}

#[tokio::test]
async fn test_inline_llm_setting_is_used() {
    let library = json!({
        "domain": "tuned",
        "definition": "Pipes with their own settings",
        "pipe": {
            "summarize": {
                "type": "PipeLLM",
                "output": "Text",
                "prompt": "Summarize everything",
                "llm": {"llm_handle": "precise-model", "temperature": 0.0}
            }
        }
    });
    let generator = Arc::new(MockContentGenerator::new());
    let ctx = make_context(generator.clone(), PipelexConfig::default(), &[library]);

    ctx.execute("summarize", None, None, None, None).await.unwrap();

    assert_eq!(generator.calls_to("make_llm_text")[0].handle, "precise-model");
}

#[test]
fn test_dependency_cycle_is_rejected() {
    let manager = load(
        PipelexConfig::default(),
        &[json!({
            "domain": "loops",
            "definition": "Pipes calling each other",
            "pipe": {
                "ping": {"type": "PipeSequence", "output": "Text", "steps": [{"pipe": "pong"}]},
                "pong": {"type": "PipeSequence", "output": "Text", "steps": [{"pipe": "ping"}]}
            }
        })],
    )
    .unwrap();

    let err = manager.validate().unwrap_err();

    assert!(matches!(err, PipelexError::PipeLibrary(_)));
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn test_concept_refining_unknown_concept() {
    let manager = load(
        PipelexConfig::default(),
        &[json!({
            "domain": "legal",
            "definition": "Contracts",
            "concept": {"Clause": {"definition": "A contract clause", "refines": "Paragraph"}}
        })],
    )
    .unwrap();

    let err = manager.validate().unwrap_err();

    assert!(matches!(err, PipelexError::ConceptLibrary(_)));
    assert!(err.to_string().contains("legal.Paragraph"));
}

#[tokio::test]
async fn test_implicit_concepts_can_be_disabled() {
    let library = json!({
        "domain": "strict",
        "definition": "Only declared concepts",
        "pipe": {"echo": {"type": "PipeJinja2", "jinja2": "{{ note }}"}}
    });
    let memory = || WorkingMemoryFactory::make_from_text("hello", "strict.Note", Some("note")).unwrap();

    let lenient = make_context(
        Arc::new(MockContentGenerator::new()),
        PipelexConfig::default(),
        &[library.clone()],
    );
    let (output, _) = lenient.execute("echo", Some(memory()), None, None, None).await.unwrap();
    assert_eq!(output.main_stuff_as_text().unwrap(), "hello");

    let strict = make_context(
        Arc::new(MockContentGenerator::new()),
        PipelexConfig::default().with_implicit_concepts(false),
        &[library],
    );
    let err = strict.execute("echo", Some(memory()), None, None, None).await.unwrap_err();
    assert!(matches!(err, PipelexError::ConceptLibrary(_)));
    assert!(err.to_string().contains("strict.Note"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = PipelexConfig::from_json_str(r#"{"pipe_run": {"batch_max_concurrency": 0}}"#).unwrap_err();
    assert!(matches!(err, PipelexError::Config(_)));
}
