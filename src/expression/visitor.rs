//! Tree walking over compiled expressions.

use std::fmt::Write as _;

use super::node::{ArrayRefNode, AssignOp, BinaryOp, ComponentNode, StepOp, Target, UnaryOp};
use super::system_call::SystemCallNode;
use super::variable::VariableNode;
use crate::record::{KnowledgeRecord, RecordValue};

/// Double dispatch target for [`ComponentNode::accept`].
///
/// Each method receives the node's parts; visitors that need children call
/// `accept` on them.
pub trait Visitor {
    /// A constant.
    fn visit_leaf(&mut self, value: &KnowledgeRecord);
    /// A variable read.
    fn visit_variable(&mut self, variable: &VariableNode);
    /// `name[index]`.
    fn visit_array_ref(&mut self, array: &ArrayRefNode);
    /// `[a, b, ...]`.
    fn visit_const_array(&mut self, elements: &[ComponentNode]);
    /// Prefix operator.
    fn visit_unary(&mut self, op: UnaryOp, operand: &ComponentNode);
    /// Infix operator.
    fn visit_binary(&mut self, op: BinaryOp, left: &ComponentNode, right: &ComponentNode);
    /// Assignment.
    fn visit_assign(&mut self, op: AssignOp, target: &Target, value: &ComponentNode);
    /// `++` or `--`.
    fn visit_step(&mut self, op: StepOp, prefix: bool, target: &Target);
    /// Builtin call.
    fn visit_system_call(&mut self, call: &SystemCallNode);
    /// User function call.
    fn visit_function(&mut self, name: &str, args: &[ComponentNode]);
}

/// Renders an expression back to fully parenthesized KaRL.
#[derive(Debug, Default)]
pub struct PrintVisitor {
    out: String,
}

impl PrintVisitor {
    /// Text rendered so far.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.out
    }

    /// Consumes the printer.
    #[must_use]
    pub fn into_string(self) -> String {
        self.out
    }

    fn list(&mut self, nodes: &[ComponentNode]) {
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            node.accept(self);
        }
    }

    fn target(&mut self, target: &Target) {
        match target {
            Target::Variable(variable) => self.visit_variable(variable),
            Target::ArrayRef(array) => self.visit_array_ref(array),
        }
    }
}

impl Visitor for PrintVisitor {
    fn visit_leaf(&mut self, value: &KnowledgeRecord) {
        match value.value() {
            RecordValue::String(text) => {
                let _ = write!(self.out, "{text:?}");
            }
            RecordValue::IntegerArray(_) | RecordValue::DoubleArray(_) => {
                let _ = write!(self.out, "[{}]", value.to_string_with(", "));
            }
            _ => {
                let _ = write!(self.out, "{value}");
            }
        }
    }

    fn visit_variable(&mut self, variable: &VariableNode) {
        self.out.push_str(variable.name());
    }

    fn visit_array_ref(&mut self, array: &ArrayRefNode) {
        self.out.push_str(array.variable().name());
        self.out.push('[');
        array.index().accept(self);
        self.out.push(']');
    }

    fn visit_const_array(&mut self, elements: &[ComponentNode]) {
        self.out.push('[');
        self.list(elements);
        self.out.push(']');
    }

    fn visit_unary(&mut self, op: UnaryOp, operand: &ComponentNode) {
        self.out.push('(');
        self.out.push_str(op.symbol());
        operand.accept(self);
        self.out.push(')');
    }

    fn visit_binary(&mut self, op: BinaryOp, left: &ComponentNode, right: &ComponentNode) {
        self.out.push('(');
        left.accept(self);
        let _ = write!(self.out, " {} ", op.symbol());
        right.accept(self);
        self.out.push(')');
    }

    fn visit_assign(&mut self, op: AssignOp, target: &Target, value: &ComponentNode) {
        self.out.push('(');
        self.target(target);
        let _ = write!(self.out, " {} ", op.symbol());
        value.accept(self);
        self.out.push(')');
    }

    fn visit_step(&mut self, op: StepOp, prefix: bool, target: &Target) {
        self.out.push('(');
        if prefix {
            self.out.push_str(op.symbol());
            self.target(target);
        } else {
            self.target(target);
            self.out.push_str(op.symbol());
        }
        self.out.push(')');
    }

    fn visit_system_call(&mut self, call: &SystemCallNode) {
        self.out.push_str(call.kind().name());
        self.out.push('(');
        self.list(call.args());
        self.out.push(')');
    }

    fn visit_function(&mut self, name: &str, args: &[ComponentNode]) {
        self.out.push_str(name);
        self.out.push('(');
        self.list(args);
        self.out.push(')');
    }
}

/// Counts nodes by walking the whole tree.
#[derive(Debug, Default)]
pub struct NodeCounter {
    /// Nodes seen.
    pub nodes: usize,
    /// Variable and array element reads or writes seen.
    pub variables: usize,
}

impl NodeCounter {
    fn target(&mut self, target: &Target) {
        match target {
            Target::Variable(variable) => self.visit_variable(variable),
            Target::ArrayRef(array) => self.visit_array_ref(array),
        }
    }
}

impl Visitor for NodeCounter {
    fn visit_leaf(&mut self, _value: &KnowledgeRecord) {
        self.nodes += 1;
    }

    fn visit_variable(&mut self, _variable: &VariableNode) {
        self.nodes += 1;
        self.variables += 1;
    }

    fn visit_array_ref(&mut self, array: &ArrayRefNode) {
        self.nodes += 1;
        self.variables += 1;
        array.index().accept(self);
    }

    fn visit_const_array(&mut self, elements: &[ComponentNode]) {
        self.nodes += 1;
        elements.iter().for_each(|e| e.accept(self));
    }

    fn visit_unary(&mut self, _op: UnaryOp, operand: &ComponentNode) {
        self.nodes += 1;
        operand.accept(self);
    }

    fn visit_binary(&mut self, _op: BinaryOp, left: &ComponentNode, right: &ComponentNode) {
        self.nodes += 1;
        left.accept(self);
        right.accept(self);
    }

    fn visit_assign(&mut self, _op: AssignOp, target: &Target, value: &ComponentNode) {
        self.nodes += 1;
        self.target(target);
        value.accept(self);
    }

    fn visit_step(&mut self, _op: StepOp, _prefix: bool, target: &Target) {
        self.nodes += 1;
        self.target(target);
    }

    fn visit_system_call(&mut self, call: &SystemCallNode) {
        self.nodes += 1;
        call.args().iter().for_each(|a| a.accept(self));
    }

    fn visit_function(&mut self, _name: &str, args: &[ComponentNode]) {
        self.nodes += 1;
        args.iter().for_each(|a| a.accept(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextState;
    use crate::expression::parser::parse;

    #[test]
    fn test_print_strings_are_quoted() {
        let mut state = ContextState::default();
        let node = parse(r#"name = "a\"b""#, &mut state).unwrap();
        assert_eq!(node.to_string(), r#"(name = "a\"b")"#);
    }

    #[test]
    fn test_print_compound_assign_and_postfix() {
        let mut state = ContextState::default();
        let node = parse("total += x--", &mut state).unwrap();
        assert_eq!(node.to_string(), "(total += (x--))");
    }

    #[test]
    fn test_node_counter() {
        let mut state = ContextState::default();
        let node = parse("a = b[1] + #sqrt(c)", &mut state).unwrap();
        let mut counter = NodeCounter::default();
        node.accept(&mut counter);
        // assign, a, +, b[1], 1, #sqrt, c
        assert_eq!(counter.nodes, 7);
        assert_eq!(counter.variables, 3);
    }
}
