//! Abstract syntax tree produced by the (external, out-of-scope) parser for
//! the PHP/C#-flavored surface grammar `spec.md` describes.
//!
//! Shaped like the teacher's own `expressions.rs` node hierarchy (now
//! deleted as Python-AST-specific) filtered through `monty`'s smaller
//! `Node`/`Expr` split, which survives in the pack and generalizes more
//! directly to a class-based language: a flat `Stmt`/`Expr` enum pair rather
//! than one node type per statement kind.

use std::sync::Arc;

use crate::intern::StringId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub namespace: Option<String>,
    pub uses: Vec<UseDecl>,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub struct UseDecl {
    pub path: String,
    pub alias: Option<StringId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Item {
    Function(FunctionDecl),
    Class(ClassDecl),
    Interface(InterfaceDecl),
    Enum(EnumDecl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Internal,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: StringId,
    pub default: Option<Expr>,
    pub variadic: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: StringId,
    pub visibility: Visibility,
    pub is_static: bool,
    pub params: Vec<Param>,
    pub body: Arc<Block>,
    pub annotations: Vec<Annotation>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Annotation {
    pub name: StringId,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: StringId,
    pub default: Option<Expr>,
    pub is_static: bool,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: StringId,
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub parent: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FunctionDecl>,
    pub annotations: Vec<Annotation>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct InterfaceMethodDecl {
    pub name: StringId,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone)]
pub struct InterfaceDecl {
    pub name: StringId,
    pub visibility: Visibility,
    pub extends: Vec<String>,
    pub methods: Vec<InterfaceMethodDecl>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EnumMemberDecl {
    pub name: StringId,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: StringId,
    pub visibility: Visibility,
    pub fields: Vec<StringId>,
    pub members: Vec<EnumMemberDecl>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Let { name: StringId, value: Expr, span: Span },
    Assign { target: Expr, value: Expr, span: Span },
    If { cond: Expr, then_branch: Block, else_branch: Option<Block> },
    While { cond: Expr, body: Block },
    For { init: Option<Box<Stmt>>, cond: Option<Expr>, step: Option<Box<Stmt>>, body: Block },
    ForRange { var: StringId, start: Expr, end: Expr, inclusive: bool, body: Block },
    ForEach { var: StringId, key: Option<StringId>, iterable: Expr, body: Block },
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Try { body: Block, catches: Vec<CatchClause>, finally: Option<Block> },
    Switch { subject: Expr, cases: Vec<SwitchCase>, default: Option<Block> },
    Spawn(Expr),
    Block(Block),
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub exception_type: Option<String>,
    pub binding: StringId,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub value: Expr,
    pub body: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Identifier(StringId),
    This,
    ArrayLiteral(Vec<Expr>),
    MapLiteral(Vec<(Expr, Expr)>),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnOp, operand: Box<Expr> },
    Ternary { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Index { target: Box<Expr>, index: Box<Expr> },
    Property { target: Box<Expr>, name: StringId },
    StaticProperty { class_path: String, name: StringId },
    MethodCall { target: Box<Expr>, name: StringId, args: Vec<Expr> },
    StaticCall { class_path: String, name: StringId, args: Vec<Expr>, via_static_binding: bool },
    New { class_path: String, args: Vec<Expr> },
    Super { method: StringId, args: Vec<Expr> },
    InstanceOf { value: Box<Expr>, type_path: String },
    /// `x as T` (`safe: false`, raises `TypeError` on mismatch) or `x as? T`
    /// (`safe: true`, yields `null` on mismatch) — `spec.md` §4.3/§4.4/§8.
    TypeAssert { value: Box<Expr>, type_path: String, safe: bool },
    Closure { params: Vec<Param>, body: Arc<Block>, captures_this: bool },
    FString { parts: Vec<FStringPart> },
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(Arc<str>),
    Expr(Expr),
}
