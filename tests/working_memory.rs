use pipelex::prelude::*;
use serde_json::json;

#[test]
fn test_missing_stuff_on_empty_memory() {
    let memory = WorkingMemoryFactory::make_empty();

    let err = memory.get_stuff("nonexistent").unwrap_err();

    let PipelexError::StuffNotFound { name, valid_keys } = &err else {
        panic!("expected a missing stuff error, got {err:?}");
    };
    assert_eq!(name, "nonexistent");
    assert!(valid_keys.is_empty());
    assert_eq!(err.category(), ErrorCategory::WorkingMemory);
}

#[test]
fn test_stuff_survives_json() {
    let stuff = StuffFactory::make_stuff(
        "zoo.Animal",
        StuffContent::list(vec![StuffContent::text("lion"), StuffContent::image("https://example.com/lion.png")]),
        Some("animals"),
    )
    .unwrap();

    let encoded = serde_json::to_value(&stuff).unwrap();
    let decoded: Stuff = serde_json::from_value(encoded).unwrap();

    assert_eq!(decoded, stuff);
    assert_eq!(decoded.as_list().unwrap().len(), 2);
}

#[test]
fn test_memory_copies_are_independent() {
    let mut memory = WorkingMemoryFactory::make_from_text("original", "native.Text", None).unwrap();
    let copy = memory.make_deep_copy();

    let replacement = StuffFactory::make_stuff("native.Text", StuffContent::text("changed"), Some("text")).unwrap();
    memory.set_new_main_stuff(replacement, Some("text")).unwrap();

    assert_eq!(memory.main_stuff_as_text().unwrap(), "changed");
    assert_eq!(copy.main_stuff_as_text().unwrap(), "original");
}

#[test]
fn test_structured_attributes_are_reachable() {
    let content = StuffContent::from_json_value(
        &StructureClass::Structured("Invoice".to_string()),
        json!({"customer": {"name": "Ada"}, "total": 42.5}),
    )
    .unwrap();
    let stuff = StuffFactory::make_stuff("billing.Invoice", content, Some("invoice")).unwrap();
    let memory = WorkingMemoryFactory::make_from_single_stuff(stuff).unwrap();

    let name = memory
        .get_stuff_attribute("invoice.customer.name", Some(ContentKind::Text))
        .unwrap();
    assert_eq!(name.rendered_str(), "Ada");
    assert_eq!(memory.jinja2_context()["invoice"]["total"], json!(42.5));

    let err = memory.get_stuff_attribute("invoice.customer.age", None).unwrap_err();
    assert!(matches!(err, PipelexError::StuffAttributeNotFound { .. }));
}
