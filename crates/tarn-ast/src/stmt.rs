//! Statement AST nodes

use crate::expr::Expression;
use crate::span::Span;
use crate::types::TypeRef;

/// A statement with its source position
#[derive(Debug, Clone)]
pub struct Statement {
    pub span: Span,
    pub kind: StmtKind,
}

impl Statement {
    pub fn new(kind: StmtKind) -> Self {
        Statement {
            span: Span::synthetic(),
            kind,
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn block(stmts: Vec<Statement>) -> Self {
        Statement::new(StmtKind::Block(stmts))
    }

    pub fn expr(e: Expression) -> Self {
        Statement::new(StmtKind::Expr(e))
    }

    pub fn ret(value: Option<Expression>) -> Self {
        Statement::new(StmtKind::Return(value))
    }

    pub fn empty() -> Self {
        Statement::new(StmtKind::Empty)
    }

    /// True if this statement is a `this(...)` or `super(...)` delegation
    pub fn is_ctor_delegation(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::ThisCtorCall(_) | StmtKind::SuperCtorCall(_)
        )
    }

    /// True if every path through this statement ends in return/throw
    pub fn always_exits(&self) -> bool {
        match &self.kind {
            StmtKind::Return(_) | StmtKind::Throw(_) => true,
            StmtKind::Block(stmts) => stmts.last().is_some_and(|s| s.always_exits()),
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                then_branch.always_exits()
                    && else_branch.as_ref().is_some_and(|e| e.always_exits())
            }
            StmtKind::Labeled { body, .. } => body.always_exits(),
            StmtKind::Synchronized { body, .. } => body.always_exits(),
            StmtKind::Try { body, catches, .. } => {
                body.always_exits() && catches.iter().all(|c| c.body.always_exits())
            }
            _ => false,
        }
    }
}

/// One `catch (Type name)` clause
#[derive(Debug, Clone)]
pub struct CatchClause {
    pub param_name: String,
    pub param_type: TypeRef,
    pub body: Statement,
}

/// One `case value:` arm of a switch
#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub value: Expression,
    pub body: Vec<Statement>,
}

/// Statement kinds
#[derive(Debug, Clone)]
pub enum StmtKind {
    Block(Vec<Statement>),
    Expr(Expression),
    VarDecl {
        name: String,
        ty: TypeRef,
        init: Option<Expression>,
    },
    If {
        cond: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        cond: Expression,
        body: Box<Statement>,
    },
    DoWhile {
        body: Box<Statement>,
        cond: Expression,
    },
    For {
        init: Option<Box<Statement>>,
        cond: Option<Expression>,
        update: Option<Expression>,
        body: Box<Statement>,
    },
    /// Desugars to the iterator protocol at generation time
    ForEach {
        var_name: String,
        var_type: TypeRef,
        iterable: Expression,
        body: Box<Statement>,
    },
    /// Sequential is-case comparison chain with fallthrough-by-default
    Switch {
        subject: Expression,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Statement>>,
    },
    Break(Option<String>),
    Continue(Option<String>),
    Labeled {
        label: String,
        body: Box<Statement>,
    },
    Return(Option<Expression>),
    Throw(Expression),
    Try {
        body: Box<Statement>,
        catches: Vec<CatchClause>,
        finally: Option<Box<Statement>>,
    },
    Synchronized {
        monitor: Expression,
        body: Box<Statement>,
    },
    /// Explicit same-class constructor delegation; only legal as the
    /// first statement of a constructor body
    ThisCtorCall(Vec<Expression>),
    /// Explicit superclass constructor delegation
    SuperCtorCall(Vec<Expression>),
    Empty,
}
