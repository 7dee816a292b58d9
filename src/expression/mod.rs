//! KaRL expressions: tokenizing, parsing, pruning and evaluation.
//!
//! Source text is parsed into a tree of [`ComponentNode`]s owned by a
//! [`CompiledExpression`]. Pruning folds constant subtrees into leaves and
//! may be skipped; evaluation walks the tree against a locked
//! [`ContextState`].

mod lexer;
mod node;
pub(crate) mod parser;
mod system_call;
mod variable;
mod visitor;

use std::fmt;

pub use node::{ArrayRefNode, AssignOp, BinaryOp, ComponentNode, StepOp, Target, UnaryOp};
pub use system_call::{SystemCallKind, SystemCallNode};
pub use variable::VariableNode;
pub use visitor::{NodeCounter, PrintVisitor, Visitor};

use crate::context::ContextState;
use crate::error::MadaraResult;
use crate::record::KnowledgeRecord;
use crate::settings::KnowledgeUpdateSettings;

/// The root of a parsed KaRL program.
#[derive(Debug)]
pub struct CompiledExpression {
    source: String,
    root: ComponentNode,
}

impl CompiledExpression {
    pub(crate) fn new(source: &str, root: ComponentNode) -> Self {
        Self {
            source: source.to_string(),
            root,
        }
    }

    /// The text this expression was parsed from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Root node.
    #[must_use]
    pub const fn root(&self) -> &ComponentNode {
        &self.root
    }

    /// Folds constant subtrees. Running it again changes nothing.
    pub fn prune(&mut self, state: &mut ContextState) -> MadaraResult<()> {
        let mut unused = false;
        node::prune_child(&mut self.root, &mut unused, state)?;
        Ok(())
    }

    /// Evaluates the tree. The caller holds the context lock for the whole
    /// call.
    pub fn evaluate(&mut self, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        self.root.evaluate(state, settings)
    }

    /// Walks the tree with `visitor`.
    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        self.root.accept(visitor);
    }
}

impl fmt::Display for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.root, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_folds_constants() {
        let mut state = ContextState::default();
        let expression = state.compile("x = 2 * 3 + 1").unwrap();
        assert_eq!(expression.to_string(), "(x = 7)");
        assert_eq!(expression.source(), "x = 2 * 3 + 1");
    }

    #[test]
    fn test_prune_is_idempotent() {
        let mut state = ContextState::default();
        let mut expression = state.parse("a + (1 + 2) * b ; 4 / 2").unwrap();
        expression.prune(&mut state).unwrap();
        let once = expression.to_string();
        expression.prune(&mut state).unwrap();
        assert_eq!(expression.to_string(), once);
        assert_eq!(once, "((a + (3 * b)) ; 2)");
    }

    #[test]
    fn test_evaluate_repeats() {
        let mut state = ContextState::default();
        let settings = KnowledgeUpdateSettings::default();
        let mut expression = state.compile("++n").unwrap();
        for expected in 1..=3 {
            assert_eq!(expression.evaluate(&mut state, &settings).unwrap().to_integer(), expected);
        }
    }
}
