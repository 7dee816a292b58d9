//! Variable nodes.
//!
//! A name without braces resolves once, at construction, to a
//! [`VariableReference`]; evaluating it is a slot lookup. A name with
//! `{expr}` segments is split into literal and expression parts and rebuilt
//! on every evaluation.

use super::node::{prune_child, ComponentNode};
use super::parser;
use crate::context::{ContextState, VariableReference};
use crate::error::{KarlError, MadaraResult};
use crate::record::KnowledgeRecord;
use crate::settings::{KnowledgeReferenceSettings, KnowledgeUpdateSettings};

#[derive(Debug)]
enum Segment {
    Literal(String),
    Expression(Box<ComponentNode>),
}

#[derive(Debug)]
enum Resolution {
    Resolved(VariableReference),
    Interpolated(Vec<Segment>),
}

/// A variable read or write target.
#[derive(Debug)]
pub struct VariableNode {
    name: String,
    resolution: Resolution,
}

fn check_braces(name: &str) -> Result<(), KarlError> {
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => {
                return Err(KarlError::compile(
                    "Variable",
                    format!("'{name}' closes a brace before opening one; names must have matching braces"),
                ))
            }
            '}' => depth -= 1,
            _ => {}
        }
    }
    if depth == 0 {
        Ok(())
    } else {
        Err(KarlError::compile(
            "Variable",
            format!("'{name}' does not have matching braces"),
        ))
    }
}

impl VariableNode {
    /// Builds a node for `name`, resolving brace-free names immediately.
    pub(crate) fn new(name: &str, state: &mut ContextState) -> MadaraResult<Self> {
        check_braces(name)?;

        if !name.contains('{') {
            let reference = state
                .get_ref(name, &KnowledgeReferenceSettings::NO_EXPAND)
                .ok_or_else(|| KarlError::compile("Variable", "empty variable name"))?;
            return Ok(Self {
                name: name.to_string(),
                resolution: Resolution::Resolved(reference),
            });
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut depth = 0usize;
        let mut open = 0usize;
        for (pos, c) in name.char_indices() {
            match c {
                '{' => {
                    if depth == 0 {
                        open = pos;
                    }
                    depth += 1;
                }
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let inner = &name[open + 1..pos];
                        if inner.trim().is_empty() {
                            return Err(KarlError::compile("Variable", format!("'{name}' contains an empty {{}}")).into());
                        }
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        let expression = parser::parse(inner, state)?;
                        segments.push(Segment::Expression(Box::new(expression)));
                    }
                }
                _ if depth == 0 => literal.push(c),
                _ => {}
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            name: name.to_string(),
            resolution: Resolution::Interpolated(segments),
        })
    }

    /// The name as written in the source.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the name is rebuilt on each evaluation.
    #[must_use]
    pub const fn is_interpolated(&self) -> bool {
        matches!(self.resolution, Resolution::Interpolated(_))
    }

    /// Effective name for this evaluation.
    pub fn expand_name(&mut self, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<String> {
        match &mut self.resolution {
            Resolution::Resolved(reference) => Ok(reference.name().to_string()),
            Resolution::Interpolated(segments) => {
                let mut expanded = String::new();
                for segment in segments.iter_mut() {
                    match segment {
                        Segment::Literal(text) => expanded.push_str(text),
                        Segment::Expression(node) => {
                            let value = node.evaluate(state, settings)?;
                            expanded.push_str(&state.render(&value, ", "));
                        }
                    }
                }
                Ok(expanded)
            }
        }
    }

    /// Resolves the reference for this evaluation.
    pub(crate) fn resolve(&mut self, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<VariableReference> {
        if let Resolution::Resolved(reference) = &mut self.resolution {
            state.refresh(reference);
            return Ok(reference.clone());
        }
        let expanded = self.expand_name(state, settings)?;
        state
            .get_ref(&expanded, &KnowledgeReferenceSettings::NO_EXPAND)
            .ok_or_else(|| KarlError::runtime("Variable", format!("'{}' expanded to an empty name", self.name)).into())
    }

    pub(crate) fn item(&self, state: &ContextState) -> KnowledgeRecord {
        let found = match &self.resolution {
            Resolution::Resolved(reference) => state
                .record(reference)
                .cloned()
                .or_else(|| state.find_ref(reference.name()).and_then(|r| state.record(&r).cloned())),
            Resolution::Interpolated(segments) => {
                let expanded: String = segments
                    .iter()
                    .map(|segment| match segment {
                        Segment::Literal(text) => text.clone(),
                        Segment::Expression(node) => state.render(&node.item(state), ", "),
                    })
                    .collect();
                state.find_ref(&expanded).and_then(|r| state.record(&r).cloned())
            }
        };
        found.unwrap_or_default()
    }

    pub(crate) fn prune(&mut self, state: &mut ContextState) -> MadaraResult<KnowledgeRecord> {
        if let Resolution::Interpolated(segments) = &mut self.resolution {
            let mut unused = false;
            for segment in segments.iter_mut() {
                if let Segment::Expression(node) = segment {
                    prune_child(node, &mut unused, state)?;
                }
            }
        }
        Ok(self.item(state))
    }

    pub(crate) fn evaluate(&mut self, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        let reads = settings.reference();
        if let Resolution::Resolved(reference) = &mut self.resolution {
            state.refresh(reference);
            return state.get_by_ref(reference, &reads);
        }
        let reference = self.resolve(state, settings)?;
        state.get_by_ref(&reference, &reads)
    }
}
