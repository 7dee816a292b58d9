//! Expression tree nodes.
//!
//! Every node supports the same four operations: `item` (a side-effect free
//! read), `prune` (one-time constant folding), `evaluate` (the hot path) and
//! `accept` (visitor dispatch). Nodes own their children; pruning replaces a
//! constant child in place with a [`ComponentNode::Leaf`].

use std::cmp::Ordering;
use std::fmt;

use super::system_call::SystemCallNode;
use super::variable::VariableNode;
use super::visitor::{PrintVisitor, Visitor};
use crate::context::{ContextState, VariableReference};
use crate::error::{KarlError, MadaraResult};
use crate::filters::Variables;
use crate::record::{KnowledgeRecord, RecordValue, MAX_ARRAY_SIZE};
use crate::settings::KnowledgeUpdateSettings;

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Negate,
    /// `!x`
    Not,
}

impl UnaryOp {
    /// Source symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Negate => "-",
            Self::Not => "!",
        }
    }

    fn apply(self, value: &KnowledgeRecord) -> KnowledgeRecord {
        match self {
            Self::Negate => -value,
            Self::Not => KnowledgeRecord::from(value.is_false()),
        }
    }
}

/// Infix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `a ; b` evaluates both and returns the larger value.
    Both,
    /// `a ;> b` evaluates both and returns the right value.
    ReturnRight,
    /// `a , b` evaluates both and returns the right value.
    Sequence,
    /// `a => b` evaluates `b` only if `a` is true.
    Implies,
    /// `||`
    Or,
    /// `&&`
    And,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulus,
}

impl BinaryOp {
    /// Source symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Both => ";",
            Self::ReturnRight => ";>",
            Self::Sequence => ",",
            Self::Implies => "=>",
            Self::Or => "||",
            Self::And => "&&",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulus => "%",
        }
    }

    fn apply(self, left: &KnowledgeRecord, right: &KnowledgeRecord) -> KnowledgeRecord {
        let ordering = || left.compare(right);
        match self {
            Self::Both => {
                if ordering() == Some(Ordering::Less) {
                    right.clone()
                } else {
                    left.clone()
                }
            }
            Self::ReturnRight | Self::Sequence => right.clone(),
            Self::Implies => {
                if left.is_true() {
                    right.clone()
                } else {
                    KnowledgeRecord::from(0)
                }
            }
            Self::Or => KnowledgeRecord::from(left.is_true() || right.is_true()),
            Self::And => KnowledgeRecord::from(left.is_true() && right.is_true()),
            Self::Equal => KnowledgeRecord::from(left == right),
            Self::NotEqual => KnowledgeRecord::from(left != right),
            Self::Less => KnowledgeRecord::from(ordering() == Some(Ordering::Less)),
            Self::LessEqual => KnowledgeRecord::from(matches!(ordering(), Some(Ordering::Less | Ordering::Equal))),
            Self::Greater => KnowledgeRecord::from(ordering() == Some(Ordering::Greater)),
            Self::GreaterEqual => KnowledgeRecord::from(matches!(ordering(), Some(Ordering::Greater | Ordering::Equal))),
            Self::Add => left + right,
            Self::Subtract => left - right,
            Self::Multiply => left * right,
            Self::Divide => left / right,
            Self::Modulus => left % right,
        }
    }
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Set,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Div,
}

impl AssignOp {
    /// Source symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Set => "=",
            Self::Add => "+=",
            Self::Sub => "-=",
            Self::Mul => "*=",
            Self::Div => "/=",
        }
    }

    fn combine(self, current: &KnowledgeRecord, value: KnowledgeRecord) -> KnowledgeRecord {
        match self {
            Self::Set => value,
            Self::Add => current + &value,
            Self::Sub => current - &value,
            Self::Mul => current * &value,
            Self::Div => current / &value,
        }
    }
}

/// `++` and `--`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOp {
    /// `++`
    Increment,
    /// `--`
    Decrement,
}

impl StepOp {
    /// Source symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Increment => "++",
            Self::Decrement => "--",
        }
    }
}

/// `name[index]`: one element of an array variable.
#[derive(Debug)]
pub struct ArrayRefNode {
    variable: VariableNode,
    index: Box<ComponentNode>,
}

impl ArrayRefNode {
    pub(crate) fn new(variable: VariableNode, index: ComponentNode) -> Self {
        Self {
            variable,
            index: Box::new(index),
        }
    }

    /// The array variable.
    #[must_use]
    pub const fn variable(&self) -> &VariableNode {
        &self.variable
    }

    /// The index expression.
    #[must_use]
    pub fn index(&self) -> &ComponentNode {
        &self.index
    }

    fn locate(&mut self, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<(VariableReference, usize)> {
        let index = self.index.evaluate(state, settings)?.to_integer();
        let index = usize::try_from(index).map_err(|_| {
            KarlError::runtime(
                "ArrayRef",
                format!("{}[{index}] uses a negative index", self.variable.name()),
            )
        })?;
        if index >= MAX_ARRAY_SIZE {
            return Err(KarlError::runtime(
                "ArrayRef",
                format!("{}[{index}] is past the array limit of {MAX_ARRAY_SIZE}", self.variable.name()),
            )
            .into());
        }
        let reference = self.variable.resolve(state, settings)?;
        Ok((reference, index))
    }

    fn item(&self, state: &ContextState) -> KnowledgeRecord {
        let index = usize::try_from(self.index.item(state).to_integer()).unwrap_or(usize::MAX);
        self.variable.item(state).retrieve_index(index)
    }

    fn prune(&mut self, state: &mut ContextState) -> MadaraResult<KnowledgeRecord> {
        let mut unused = false;
        let index = prune_child(&mut self.index, &mut unused, state)?;
        if let ComponentNode::Leaf(value) = self.index.as_ref() {
            if matches!(value.value(), RecordValue::Double(d) if !d.is_finite()) {
                return Err(KarlError::compile(
                    "ArrayRef",
                    format!("'{}' is a reserved word and cannot index {}", index, self.variable.name()),
                )
                .into());
            }
        }
        self.variable.prune(state)?;
        Ok(self.item(state))
    }

    fn evaluate(&mut self, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        let (reference, index) = self.locate(state, settings)?;
        state.retrieve_index_by_ref(&reference, index, &settings.reference())
    }
}

/// Resolved storage location of an assignment target.
enum Location {
    Variable(VariableReference),
    Element(VariableReference, usize),
}

/// Left side of an assignment or `++`/`--`.
#[derive(Debug)]
pub enum Target {
    /// A whole variable.
    Variable(VariableNode),
    /// One array element.
    ArrayRef(ArrayRefNode),
}

impl TryFrom<ComponentNode> for Target {
    type Error = ComponentNode;

    fn try_from(node: ComponentNode) -> Result<Self, ComponentNode> {
        match node {
            ComponentNode::Variable(variable) => Ok(Self::Variable(variable)),
            ComponentNode::ArrayRef(array) => Ok(Self::ArrayRef(array)),
            other => Err(other),
        }
    }
}

impl Target {
    fn locate(&mut self, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<Location> {
        match self {
            Self::Variable(variable) => Ok(Location::Variable(variable.resolve(state, settings)?)),
            Self::ArrayRef(array) => {
                let (reference, index) = array.locate(state, settings)?;
                Ok(Location::Element(reference, index))
            }
        }
    }

    fn item(&self, state: &ContextState) -> KnowledgeRecord {
        match self {
            Self::Variable(variable) => variable.item(state),
            Self::ArrayRef(array) => array.item(state),
        }
    }

    fn prune(&mut self, state: &mut ContextState) -> MadaraResult<KnowledgeRecord> {
        match self {
            Self::Variable(variable) => variable.prune(state),
            Self::ArrayRef(array) => array.prune(state),
        }
    }

    fn assign(
        &mut self,
        op: AssignOp,
        value: KnowledgeRecord,
        state: &mut ContextState,
        settings: &KnowledgeUpdateSettings,
    ) -> MadaraResult<KnowledgeRecord> {
        let reads = settings.reference();
        match self.locate(state, settings)? {
            Location::Variable(reference) => {
                let value = if op == AssignOp::Set {
                    value
                } else {
                    op.combine(&state.get_by_ref(&reference, &reads)?, value)
                };
                state.set_by_ref(&reference, value, settings);
                Ok(state.record(&reference).cloned().unwrap_or_default())
            }
            Location::Element(reference, index) => {
                let value = if op == AssignOp::Set {
                    value
                } else {
                    op.combine(&state.retrieve_index_by_ref(&reference, index, &reads)?, value)
                };
                state.set_index_by_ref(&reference, index, value, settings)?;
                Ok(state.record(&reference).map(|r| r.retrieve_index(index)).unwrap_or_default())
            }
        }
    }

    fn step(
        &mut self,
        op: StepOp,
        prefix: bool,
        state: &mut ContextState,
        settings: &KnowledgeUpdateSettings,
    ) -> MadaraResult<KnowledgeRecord> {
        let location = self.locate(state, settings)?;
        let (before, after) = match &location {
            Location::Variable(reference) => {
                let before = state.record(reference).cloned().unwrap_or_default();
                let after = match op {
                    StepOp::Increment => state.inc_by_ref(reference, settings),
                    StepOp::Decrement => state.dec_by_ref(reference, settings),
                };
                (before, after)
            }
            Location::Element(reference, index) => {
                let before = state.record(reference).map(|r| r.retrieve_index(*index)).unwrap_or_default();
                let after = match op {
                    StepOp::Increment => state.inc_index_by_ref(reference, *index, settings)?,
                    StepOp::Decrement => state.dec_index_by_ref(reference, *index, settings)?,
                };
                (before, after)
            }
        };
        Ok(if prefix { after } else { before })
    }
}

/// One node of a compiled KaRL expression.
#[derive(Debug)]
pub enum ComponentNode {
    /// A constant.
    Leaf(KnowledgeRecord),
    /// A variable read.
    Variable(VariableNode),
    /// An array element read.
    ArrayRef(ArrayRefNode),
    /// `[a, b, ...]`
    ConstArray(Vec<ComponentNode>),
    /// Prefix operator.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<ComponentNode>,
    },
    /// Infix operator.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<ComponentNode>,
        /// Right operand.
        right: Box<ComponentNode>,
    },
    /// Assignment or compound assignment.
    Assign {
        /// Operator.
        op: AssignOp,
        /// Written location.
        target: Target,
        /// Assigned expression.
        value: Box<ComponentNode>,
    },
    /// `++` or `--`, prefix or postfix.
    Step {
        /// Operator.
        op: StepOp,
        /// True for `++x`, false for `x++`.
        prefix: bool,
        /// Mutated location.
        target: Target,
    },
    /// Builtin `#call(args)`.
    SystemCall(SystemCallNode),
    /// User function registered with `define_function`.
    Function {
        /// Function name.
        name: String,
        /// Argument expressions.
        args: Vec<ComponentNode>,
    },
}

/// Prunes `child` and folds it into a leaf if it cannot change.
pub(crate) fn prune_child(child: &mut ComponentNode, can_change: &mut bool, state: &mut ContextState) -> MadaraResult<KnowledgeRecord> {
    let mut child_changes = false;
    let value = child.prune(&mut child_changes, state)?;
    if child_changes {
        *can_change = true;
    } else if !child.is_leaf() {
        *child = ComponentNode::Leaf(value.clone());
    }
    Ok(value)
}

fn build_array(values: &[KnowledgeRecord]) -> KnowledgeRecord {
    if values.iter().all(|v| matches!(v.value(), RecordValue::Integer(_))) {
        KnowledgeRecord::from(values.iter().map(KnowledgeRecord::to_integer).collect::<Vec<_>>())
    } else {
        KnowledgeRecord::from(values.iter().map(KnowledgeRecord::to_double).collect::<Vec<_>>())
    }
}

impl ComponentNode {
    pub(crate) fn unary(op: UnaryOp, operand: Self) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub(crate) fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Returns true for constant leaves.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    /// Current value without side effects. Interpolated names are rebuilt
    /// from their segments' current values; system and user calls read as
    /// uncreated.
    #[must_use]
    pub fn item(&self, state: &ContextState) -> KnowledgeRecord {
        match self {
            Self::Leaf(value) => value.clone(),
            Self::Variable(variable) => variable.item(state),
            Self::ArrayRef(array) => array.item(state),
            Self::ConstArray(elements) => {
                let values: Vec<_> = elements.iter().map(|e| e.item(state)).collect();
                build_array(&values)
            }
            Self::Unary { op, operand } => op.apply(&operand.item(state)),
            Self::Binary { op, left, right } => op.apply(&left.item(state), &right.item(state)),
            Self::Assign { value, .. } => value.item(state),
            Self::Step { target, .. } => target.item(state),
            Self::SystemCall(_) | Self::Function { .. } => KnowledgeRecord::new(),
        }
    }

    /// Folds constant subtrees into leaves. Sets `can_change` if this node's
    /// value may differ between evaluations.
    pub fn prune(&mut self, can_change: &mut bool, state: &mut ContextState) -> MadaraResult<KnowledgeRecord> {
        match self {
            Self::Leaf(value) => Ok(value.clone()),
            Self::Variable(variable) => {
                *can_change = true;
                variable.prune(state)
            }
            Self::ArrayRef(array) => {
                *can_change = true;
                array.prune(state)
            }
            Self::ConstArray(elements) => {
                let values = elements
                    .iter_mut()
                    .map(|element| prune_child(element, can_change, state))
                    .collect::<MadaraResult<Vec<_>>>()?;
                Ok(build_array(&values))
            }
            Self::Unary { op, operand } => {
                let value = prune_child(operand, can_change, state)?;
                Ok(op.apply(&value))
            }
            Self::Binary { op, left, right } => {
                let left = prune_child(left, can_change, state)?;
                let right = prune_child(right, can_change, state)?;
                Ok(op.apply(&left, &right))
            }
            Self::Assign { target, value, .. } => {
                *can_change = true;
                target.prune(state)?;
                prune_child(value, can_change, state)
            }
            Self::Step { target, .. } => {
                *can_change = true;
                target.prune(state)
            }
            Self::SystemCall(call) => {
                *can_change = true;
                call.prune(state)
            }
            Self::Function { args, .. } => {
                *can_change = true;
                for arg in args.iter_mut() {
                    prune_child(arg, can_change, state)?;
                }
                Ok(KnowledgeRecord::new())
            }
        }
    }

    /// Evaluates the node against the locked context.
    pub fn evaluate(&mut self, state: &mut ContextState, settings: &KnowledgeUpdateSettings) -> MadaraResult<KnowledgeRecord> {
        match self {
            Self::Leaf(value) => Ok(value.clone()),
            Self::Variable(variable) => variable.evaluate(state, settings),
            Self::ArrayRef(array) => array.evaluate(state, settings),
            Self::ConstArray(elements) => {
                let values = elements
                    .iter_mut()
                    .map(|element| element.evaluate(state, settings))
                    .collect::<MadaraResult<Vec<_>>>()?;
                Ok(build_array(&values))
            }
            Self::Unary { op, operand } => Ok(op.apply(&operand.evaluate(state, settings)?)),
            Self::Binary { op, left, right } => {
                let left = left.evaluate(state, settings)?;
                match op {
                    BinaryOp::And if left.is_false() => return Ok(KnowledgeRecord::from(0)),
                    BinaryOp::Or if left.is_true() => return Ok(KnowledgeRecord::from(1)),
                    BinaryOp::Implies if left.is_false() => return Ok(KnowledgeRecord::from(0)),
                    _ => {}
                }
                let right = right.evaluate(state, settings)?;
                Ok(op.apply(&left, &right))
            }
            Self::Assign { op, target, value } => {
                let value = value.evaluate(state, settings)?;
                target.assign(*op, value, state, settings)
            }
            Self::Step { op, prefix, target } => target.step(*op, *prefix, state, settings),
            Self::SystemCall(call) => call.evaluate(state, settings),
            Self::Function { name, args } => {
                let Some(function) = state.function(name) else {
                    return Err(KarlError::runtime(name.as_str(), "function is not defined").into());
                };
                let mut values = args
                    .iter_mut()
                    .map(|arg| arg.evaluate(state, settings))
                    .collect::<MadaraResult<Vec<_>>>()?;
                let mut variables = Variables::with_settings(state, *settings);
                Ok(function(&mut values, &mut variables))
            }
        }
    }

    /// Dispatches to the matching visitor method.
    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) {
        match self {
            Self::Leaf(value) => visitor.visit_leaf(value),
            Self::Variable(variable) => visitor.visit_variable(variable),
            Self::ArrayRef(array) => visitor.visit_array_ref(array),
            Self::ConstArray(elements) => visitor.visit_const_array(elements),
            Self::Unary { op, operand } => visitor.visit_unary(*op, operand),
            Self::Binary { op, left, right } => visitor.visit_binary(*op, left, right),
            Self::Assign { op, target, value } => visitor.visit_assign(*op, target, value),
            Self::Step { op, prefix, target } => visitor.visit_step(*op, *prefix, target),
            Self::SystemCall(call) => visitor.visit_system_call(call),
            Self::Function { name, args } => visitor.visit_function(name, args),
        }
    }
}

impl fmt::Display for ComponentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = PrintVisitor::default();
        self.accept(&mut printer);
        f.write_str(printer.as_str())
    }
}
