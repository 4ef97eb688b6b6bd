use std::collections::{HashMap, HashSet};

use crate::core::concept::{split_concept_code, Concept, SpecialDomain, StructureClass};
use crate::core::error::PipelexError;

/// Authoritative store of concept definitions.
///
/// Filled once at library load, then only read.
#[derive(Debug, Clone)]
pub struct ConceptLibrary {
    concepts: HashMap<String, Concept>,
    allow_implicit: bool,
}

impl Default for ConceptLibrary {
    fn default() -> Self {
        Self {
            concepts: HashMap::new(),
            allow_implicit: true,
        }
    }
}

impl ConceptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables the implicit-concept fallback of [`get_required_concept`](Self::get_required_concept).
    pub fn with_implicit_concepts(mut self, allow_implicit: bool) -> Self {
        self.allow_implicit = allow_implicit;
        self
    }

    pub fn add_new_concept(&mut self, concept: Concept) -> Result<(), PipelexError> {
        if self.concepts.contains_key(&concept.code) {
            return Err(PipelexError::ConceptLibrary(format!(
                "concept '{}' already exists in the library",
                concept.code
            )));
        }
        self.concepts.insert(concept.code.clone(), concept);
        Ok(())
    }

    pub fn add_concepts(&mut self, concepts: Vec<Concept>) -> Result<(), PipelexError> {
        for concept in concepts {
            self.add_new_concept(concept)?;
        }
        Ok(())
    }

    pub fn get_concept(&self, code: &str) -> Option<&Concept> {
        self.concepts.get(code)
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn list_concepts_by_domain(&self, domain: &str) -> Vec<&Concept> {
        let mut found: Vec<&Concept> = self
            .concepts
            .values()
            .filter(|concept| concept.domain == domain)
            .collect();
        found.sort_by(|a, b| a.code.cmp(&b.code));
        found
    }

    /// Returns the declared concept, or synthesizes an implicit one in the
    /// reserved `implicit` domain. Fails only if the code cannot be parsed,
    /// or if implicit concepts are disabled.
    pub fn get_required_concept(&self, code: &str) -> Result<Concept, PipelexError> {
        if let Some(concept) = self.concepts.get(code) {
            return Ok(concept.clone());
        }
        split_concept_code(code)?;
        if !self.allow_implicit {
            return Err(PipelexError::ConceptLibrary(format!(
                "concept '{code}' is not declared and implicit concepts are disabled"
            )));
        }
        log::warn!("Concept '{code}' is not declared, using an implicit concept");
        Ok(Concept {
            code: code.to_string(),
            domain: SpecialDomain::Implicit.as_str().to_string(),
            definition: code.to_string(),
            structure_class: StructureClass::Text,
            refines: Vec::new(),
        })
    }

    pub fn is_concept_implicit(&self, code: &str) -> bool {
        !self.concepts.contains_key(code)
    }

    /// The structural class of the concept; implicit concepts hold text.
    pub fn structure_class_of(&self, code: &str) -> Result<StructureClass, PipelexError> {
        Ok(self.get_required_concept(code)?.structure_class)
    }

    /// True if `tested` is `wanted`, or refines it through any chain of
    /// ancestors.
    pub fn is_compatible(&self, tested: &Concept, wanted: &Concept) -> bool {
        self.is_compatible_by_concept_code(&tested.code, &wanted.code)
    }

    pub fn is_compatible_by_concept_code(&self, tested_code: &str, wanted_code: &str) -> bool {
        let mut visited = HashSet::new();
        self.refines_transitively(tested_code, wanted_code, &mut visited)
    }

    fn refines_transitively(
        &self,
        tested_code: &str,
        wanted_code: &str,
        visited: &mut HashSet<String>,
    ) -> bool {
        if tested_code == wanted_code {
            return true;
        }
        if !visited.insert(tested_code.to_string()) {
            return false;
        }
        let Some(tested) = self.concepts.get(tested_code) else {
            return false;
        };
        tested.refines.iter().any(|refined| {
            let refined_code = qualify_refine(&tested.domain, refined);
            self.refines_transitively(&refined_code, wanted_code, visited)
        })
    }

    /// Checks every `refines` entry resolves and that the refinement graph
    /// is acyclic.
    pub fn validate_with_libraries(&self) -> Result<(), PipelexError> {
        for concept in self.concepts.values() {
            for refined in &concept.refines {
                let refined_code = qualify_refine(&concept.domain, refined);
                if !self.concepts.contains_key(&refined_code) {
                    let reason = if refined.contains('.') {
                        "it is not in the library"
                    } else {
                        "unqualified refines must be declared in the same domain"
                    };
                    return Err(PipelexError::ConceptLibrary(format!(
                        "concept '{}' refines '{}' but {}",
                        concept.code, refined_code, reason
                    )));
                }
            }
        }

        let mut done: HashSet<&str> = HashSet::new();
        let mut codes: Vec<&String> = self.concepts.keys().collect();
        codes.sort();
        for code in codes {
            let mut path: Vec<String> = Vec::new();
            self.check_no_cycle(code, &mut path, &mut done)?;
        }
        Ok(())
    }

    fn check_no_cycle<'a>(
        &'a self,
        code: &'a str,
        path: &mut Vec<String>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), PipelexError> {
        if done.contains(code) {
            return Ok(());
        }
        if path.iter().any(|seen| seen == code) {
            path.push(code.to_string());
            return Err(PipelexError::ConceptLibrary(format!(
                "refinement cycle detected: {}",
                path.join(" -> ")
            )));
        }
        let Some((stored_code, concept)) = self.concepts.get_key_value(code) else {
            return Ok(());
        };
        path.push(code.to_string());
        for refined in &concept.refines {
            let refined_code = qualify_refine(&concept.domain, refined);
            if let Some((key, _)) = self.concepts.get_key_value(&refined_code) {
                self.check_no_cycle(key, path, done)?;
            }
        }
        path.pop();
        done.insert(stored_code.as_str());
        Ok(())
    }
}

fn qualify_refine(domain: &str, refined: &str) -> String {
    if refined.contains('.') {
        refined.to_string()
    } else {
        format!("{domain}.{refined}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::concept::NativeConcept;

    fn concept(code: &str, refines: &[&str]) -> Concept {
        Concept::new(
            code,
            code,
            StructureClass::Text,
            refines.iter().map(|r| r.to_string()).collect(),
        )
        .unwrap()
    }

    fn library() -> ConceptLibrary {
        let mut library = ConceptLibrary::new();
        library.add_concepts(NativeConcept::all_concepts()).unwrap();
        library
    }

    #[test]
    fn test_compatibility_is_transitive() {
        let mut library = library();
        library.add_new_concept(concept("zoo.Animal", &[])).unwrap();
        library.add_new_concept(concept("zoo.Mammal", &["Animal"])).unwrap();
        library.add_new_concept(concept("zoo.Cat", &["zoo.Mammal"])).unwrap();
        library.validate_with_libraries().unwrap();

        assert!(library.is_compatible_by_concept_code("zoo.Cat", "zoo.Animal"));
        assert!(library.is_compatible_by_concept_code("zoo.Cat", "zoo.Cat"));
        assert!(!library.is_compatible_by_concept_code("zoo.Animal", "zoo.Cat"));
        assert!(!library.is_compatible_by_concept_code("zoo.Cat", "native.Text"));
    }

    #[test]
    fn test_duplicate_concept_is_rejected() {
        let mut library = library();
        let err = library.add_new_concept(NativeConcept::Text.make_concept()).unwrap_err();
        assert!(err.to_string().contains("native.Text"));
    }

    #[test]
    fn test_refines_must_resolve_in_same_domain() {
        let mut library = library();
        library.add_new_concept(concept("zoo.Cat", &["Animal"])).unwrap();
        library.add_new_concept(concept("farm.Animal", &[])).unwrap();
        let err = library.validate_with_libraries().unwrap_err();
        assert!(err.to_string().contains("zoo.Animal"));
    }

    #[test]
    fn test_refinement_cycle_is_a_validation_error() {
        let mut library = library();
        library.add_new_concept(concept("zoo.A", &["B"])).unwrap();
        library.add_new_concept(concept("zoo.B", &["C"])).unwrap();
        library.add_new_concept(concept("zoo.C", &["A"])).unwrap();
        let err = library.validate_with_libraries().unwrap_err();
        assert!(err.to_string().contains("cycle"));
        // runtime checks still terminate
        assert!(!library.is_compatible_by_concept_code("zoo.A", "native.Text"));
    }

    #[test]
    fn test_implicit_concepts() {
        let library = library();
        let implicit = library.get_required_concept("zoo.Unicorn").unwrap();
        assert_eq!(implicit.domain, "implicit");
        assert!(library.is_concept_implicit("zoo.Unicorn"));
        assert!(library.get_required_concept("Unicorn").is_err());

        let strict = ConceptLibrary::new().with_implicit_concepts(false);
        assert!(strict.get_required_concept("zoo.Unicorn").is_err());
    }
}
