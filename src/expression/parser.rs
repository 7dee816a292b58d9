//! Precedence-climbing KaRL parser.
//!
//! Lowest to highest: `;` `;>`, `,`, `=>`, assignment, `||`, `&&`,
//! comparison, additive, multiplicative, prefix, postfix, atoms.

use super::lexer::{tokenize, Spanned, Symbol, Token};
use super::node::{ArrayRefNode, AssignOp, BinaryOp, ComponentNode, StepOp, Target, UnaryOp};
use super::system_call::SystemCallNode;
use super::variable::VariableNode;
use crate::context::ContextState;
use crate::error::{KarlError, MadaraResult};
use crate::record::KnowledgeRecord;

/// Parses `source` into an unpruned tree. Variable nodes resolve their
/// references against `state` as they are built.
pub(crate) fn parse(source: &str, state: &mut ContextState) -> MadaraResult<ComponentNode> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Ok(ComponentNode::Leaf(KnowledgeRecord::new()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        state,
    };
    let root = parser.statements()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(KarlError::compile(
            "KaRL parser",
            format!("unexpected token {:?} at offset {}", extra.token, extra.offset),
        )
        .into());
    }
    Ok(root)
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    state: &'a mut ContextState,
}

fn error(reason: impl Into<String>) -> crate::error::MadaraError {
    KarlError::compile("KaRL parser", reason).into()
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_symbol(&self) -> Option<Symbol> {
        match self.peek() {
            Some(Token::Symbol(symbol)) => Some(*symbol),
            _ => None,
        }
    }

    fn eat(&mut self, symbol: Symbol) -> bool {
        if self.peek_symbol() == Some(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, symbol: Symbol, what: &str) -> MadaraResult<()> {
        if self.eat(symbol) {
            return Ok(());
        }
        let found = self
            .tokens
            .get(self.pos)
            .map_or_else(|| "end of input".to_string(), |s| format!("{:?} at offset {}", s.token, s.offset));
        Err(error(format!("expected {what}, found {found}")))
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Symbol(Symbol::RParen | Symbol::RBracket | Symbol::Both | Symbol::ReturnRight)))
    }

    fn statements(&mut self) -> MadaraResult<ComponentNode> {
        let mut left = self.sequence()?;
        loop {
            let op = match self.peek_symbol() {
                Some(Symbol::Both) => BinaryOp::Both,
                Some(Symbol::ReturnRight) => BinaryOp::ReturnRight,
                _ => return Ok(left),
            };
            self.pos += 1;
            if self.at_statement_end() {
                continue;
            }
            let right = self.sequence()?;
            left = ComponentNode::binary(op, left, right);
        }
    }

    fn sequence(&mut self) -> MadaraResult<ComponentNode> {
        let mut left = self.implies()?;
        while self.eat(Symbol::Comma) {
            let right = self.implies()?;
            left = ComponentNode::binary(BinaryOp::Sequence, left, right);
        }
        Ok(left)
    }

    fn implies(&mut self) -> MadaraResult<ComponentNode> {
        let left = self.assignment()?;
        if self.eat(Symbol::Implies) {
            let right = self.implies()?;
            return Ok(ComponentNode::binary(BinaryOp::Implies, left, right));
        }
        Ok(left)
    }

    fn assignment(&mut self) -> MadaraResult<ComponentNode> {
        let left = self.or()?;
        let op = match self.peek_symbol() {
            Some(Symbol::Assign) => AssignOp::Set,
            Some(Symbol::AddAssign) => AssignOp::Add,
            Some(Symbol::SubAssign) => AssignOp::Sub,
            Some(Symbol::MulAssign) => AssignOp::Mul,
            Some(Symbol::DivAssign) => AssignOp::Div,
            _ => return Ok(left),
        };
        self.pos += 1;
        let target = Target::try_from(left).map_err(|_| error("left side of an assignment must be a variable or array element"))?;
        let value = self.assignment()?;
        Ok(ComponentNode::Assign {
            op,
            target,
            value: Box::new(value),
        })
    }

    fn or(&mut self) -> MadaraResult<ComponentNode> {
        let mut left = self.and()?;
        while self.eat(Symbol::Or) {
            let right = self.and()?;
            left = ComponentNode::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> MadaraResult<ComponentNode> {
        let mut left = self.comparison()?;
        while self.eat(Symbol::And) {
            let right = self.comparison()?;
            left = ComponentNode::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn comparison(&mut self) -> MadaraResult<ComponentNode> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek_symbol() {
                Some(Symbol::Equal) => BinaryOp::Equal,
                Some(Symbol::NotEqual) => BinaryOp::NotEqual,
                Some(Symbol::Less) => BinaryOp::Less,
                Some(Symbol::LessEqual) => BinaryOp::LessEqual,
                Some(Symbol::Greater) => BinaryOp::Greater,
                Some(Symbol::GreaterEqual) => BinaryOp::GreaterEqual,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = ComponentNode::binary(op, left, right);
        }
    }

    fn additive(&mut self) -> MadaraResult<ComponentNode> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek_symbol() {
                Some(Symbol::Plus) => BinaryOp::Add,
                Some(Symbol::Minus) => BinaryOp::Subtract,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = ComponentNode::binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> MadaraResult<ComponentNode> {
        let mut left = self.prefix()?;
        loop {
            let op = match self.peek_symbol() {
                Some(Symbol::Star) => BinaryOp::Multiply,
                Some(Symbol::Slash) => BinaryOp::Divide,
                Some(Symbol::Percent) => BinaryOp::Modulus,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.prefix()?;
            left = ComponentNode::binary(op, left, right);
        }
    }

    fn prefix(&mut self) -> MadaraResult<ComponentNode> {
        let step = match self.peek_symbol() {
            Some(Symbol::Minus) => {
                self.pos += 1;
                return Ok(ComponentNode::unary(UnaryOp::Negate, self.prefix()?));
            }
            Some(Symbol::Not) => {
                self.pos += 1;
                return Ok(ComponentNode::unary(UnaryOp::Not, self.prefix()?));
            }
            Some(Symbol::Increment) => StepOp::Increment,
            Some(Symbol::Decrement) => StepOp::Decrement,
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = self.prefix()?;
        let target = Target::try_from(operand).map_err(|_| error("++ and -- require a variable or array element"))?;
        Ok(ComponentNode::Step {
            op: step,
            prefix: true,
            target,
        })
    }

    fn postfix(&mut self) -> MadaraResult<ComponentNode> {
        let node = self.atom()?;
        let step = match self.peek_symbol() {
            Some(Symbol::Increment) => StepOp::Increment,
            Some(Symbol::Decrement) => StepOp::Decrement,
            _ => return Ok(node),
        };
        let target = match Target::try_from(node) {
            Ok(target) => target,
            Err(node) => return Ok(node),
        };
        self.pos += 1;
        Ok(ComponentNode::Step {
            op: step,
            prefix: false,
            target,
        })
    }

    fn arguments(&mut self, closing: Symbol) -> MadaraResult<Vec<ComponentNode>> {
        let mut args = Vec::new();
        if self.eat(closing) {
            return Ok(args);
        }
        loop {
            args.push(self.implies()?);
            if self.eat(closing) {
                return Ok(args);
            }
            self.expect(Symbol::Comma, "',' between arguments")?;
        }
    }

    fn atom(&mut self) -> MadaraResult<ComponentNode> {
        let Some(spanned) = self.tokens.get(self.pos).cloned() else {
            return Err(error("unexpected end of expression"));
        };
        self.pos += 1;

        match spanned.token {
            Token::Integer(i) => Ok(ComponentNode::Leaf(KnowledgeRecord::from(i))),
            Token::Double(d) => Ok(ComponentNode::Leaf(KnowledgeRecord::from(d))),
            Token::Str(s) => Ok(ComponentNode::Leaf(KnowledgeRecord::from(s))),
            Token::SystemCall(name) => {
                self.expect(Symbol::LParen, "'(' after a system call")?;
                let args = self.arguments(Symbol::RParen)?;
                Ok(ComponentNode::SystemCall(SystemCallNode::new(&name, args)?))
            }
            Token::Name(name) => {
                if self.eat(Symbol::LParen) {
                    let args = self.arguments(Symbol::RParen)?;
                    return Ok(ComponentNode::Function { name, args });
                }
                let variable = VariableNode::new(&name, self.state)?;
                if self.eat(Symbol::LBracket) {
                    let index = self.statements()?;
                    self.expect(Symbol::RBracket, "']' after an array index")?;
                    return Ok(ComponentNode::ArrayRef(ArrayRefNode::new(variable, index)));
                }
                Ok(ComponentNode::Variable(variable))
            }
            Token::Symbol(Symbol::LParen) => {
                let inner = self.statements()?;
                self.expect(Symbol::RParen, "')'")?;
                Ok(inner)
            }
            Token::Symbol(Symbol::LBracket) => {
                let elements = self.arguments(Symbol::RBracket)?;
                Ok(ComponentNode::ConstArray(elements))
            }
            Token::Symbol(symbol) => Err(error(format!("unexpected {symbol:?} at offset {}", spanned.offset))),
        }
    }
}
