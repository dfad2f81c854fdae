//! Expression AST nodes

use crate::member::Parameter;
use crate::stmt::Statement;
use crate::types::TypeRef;

/// Binary operators
///
/// Comparisons and identity map to dedicated runtime comparison helpers;
/// arithmetic and bitwise operators map to dynamic method dispatch under
/// the fixed operator-name convention (see `BinaryOp::operator_name`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Identical,
    NotIdentical,
    And,
    Or,
}

impl BinaryOp {
    /// Operator-overload method name for dynamically dispatched operators.
    /// Returns None for comparisons, identity and logical operators, which
    /// lower to dedicated opcodes instead.
    pub fn operator_name(&self) -> Option<&'static str> {
        match self {
            BinaryOp::Add => Some("plus"),
            BinaryOp::Sub => Some("minus"),
            BinaryOp::Mul => Some("multiply"),
            BinaryOp::Div => Some("div"),
            BinaryOp::Mod => Some("mod"),
            BinaryOp::BitAnd => Some("and"),
            BinaryOp::BitOr => Some("or"),
            BinaryOp::BitXor => Some("xor"),
            BinaryOp::Shl => Some("leftShift"),
            BinaryOp::Shr => Some("rightShift"),
            _ => None,
        }
    }

    /// True for operators whose result is a branch-friendly boolean
    pub fn is_boolean_result(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Identical
                | BinaryOp::NotIdentical
                | BinaryOp::And
                | BinaryOp::Or
        )
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn operator_name(&self) -> Option<&'static str> {
        match self {
            UnaryOp::Neg => Some("negative"),
            UnaryOp::BitNot => Some("bitwiseNegate"),
            UnaryOp::Not => None,
        }
    }
}

/// Expression nodes
#[derive(Debug, Clone)]
pub enum Expression {
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),
    BoolLit(bool),
    NullLit,

    /// Reference to a local variable or parameter
    Var(String),
    This,

    /// Instance field or property access; `is_super` marks `super.x`
    FieldAccess {
        receiver: Box<Expression>,
        name: String,
        is_super: bool,
    },
    /// Static field access on a named class
    StaticField {
        class_name: String,
        name: String,
    },
    /// `target[index]`
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },

    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Assign {
        target: Box<Expression>,
        value: Box<Expression>,
    },
    /// `target op= value`; re-uses plain-assignment lowering after
    /// computing the binary form
    CompoundAssign {
        op: BinaryOp,
        target: Box<Expression>,
        value: Box<Expression>,
    },
    Ternary {
        cond: Box<Expression>,
        then_value: Box<Expression>,
        else_value: Box<Expression>,
    },

    /// Instance method call; `is_super` marks `super.m(...)`
    MethodCall {
        receiver: Box<Expression>,
        name: String,
        args: Vec<Expression>,
        is_super: bool,
    },
    StaticCall {
        class_name: String,
        name: String,
        args: Vec<Expression>,
    },
    ConstructorCall {
        class_name: String,
        args: Vec<Expression>,
    },

    /// Closure literal; becomes a synthetic nested class at generation time
    Closure {
        params: Vec<Parameter>,
        body: Box<Statement>,
    },
    /// A named type used as a runtime class value
    ClassLiteral(String),
    Cast {
        target_type: TypeRef,
        operand: Box<Expression>,
    },

    ListLit(Vec<Expression>),
    MapLit(Vec<(Expression, Expression)>),
}

impl Expression {
    pub fn boxed(self) -> Box<Expression> {
        Box::new(self)
    }

    pub fn is_map_literal(&self) -> bool {
        matches!(self, Expression::MapLit(_))
    }

    /// True for expressions with no side effects
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Expression::IntLit(_)
                | Expression::FloatLit(_)
                | Expression::StringLit(_)
                | Expression::BoolLit(_)
                | Expression::NullLit
                | Expression::ClassLiteral(_)
        )
    }
}
