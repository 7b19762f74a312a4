//! Configuration tree
//!
//! A configuration is a [`Body`] of attributes and named blocks. A block
//! has a dotted name (its kind, e.g. `testcomponents.count`), an optional
//! quoted label and a nested body. Attribute values are [`Expr`]essions
//! evaluated against other nodes' exports.

use crate::ids::NodeId;
use crate::value::Value;

/// Source position of a block or attribute (1-based)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

/// A sequence of attributes and blocks
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Body {
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(&self, name: &str) -> Option<&Expr> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.blocks.is_empty()
    }
}

/// `name = expr`
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

/// `dotted.name "label" { body }`
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub name: Vec<String>,
    pub label: Option<String>,
    pub body: Body,
    pub span: Span,
}

impl Block {
    /// The dotted block name, which is the node kind
    pub fn kind(&self) -> String {
        self.name.join(".")
    }

    pub fn id(&self) -> NodeId {
        NodeId::from_block(&self.name, self.label.as_deref())
    }

    pub fn attribute(&self, name: &str) -> Option<&Expr> {
        self.body.attribute(name)
    }

    /// Argument expressions of a component block
    ///
    /// Attributes map to themselves. Unlabeled nested blocks become object
    /// expressions keyed by block name; a name repeated across several
    /// nested blocks becomes an array of objects.
    pub fn argument_exprs(&self) -> Vec<(String, Expr)> {
        let mut out: Vec<(String, Expr)> = self
            .body
            .attributes
            .iter()
            .map(|a| (a.name.clone(), a.value.clone()))
            .collect();

        let mut grouped: Vec<(String, Vec<Expr>)> = Vec::new();
        for block in &self.body.blocks {
            let key = block.kind();
            let expr = Expr::Object(block.argument_exprs());
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, exprs)) => exprs.push(expr),
                None => grouped.push((key, vec![expr])),
            }
        }
        for (key, mut exprs) in grouped {
            let expr = if exprs.len() == 1 {
                exprs.remove(0)
            } else {
                Expr::Array(exprs)
            };
            out.push((key, expr));
        }
        out
    }
}

/// Unary operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
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
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "&&",
            Self::Or => "||",
        };
        f.write_str(s)
    }
}

/// Attribute expression
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted identifier chain, e.g. `testcomponents.count.inc.count`
    Reference(Vec<String>),
    /// Field access on a computed value, e.g. `list[0].name`
    Access(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Every reference path in this expression, in source order
    pub fn references(&self) -> Vec<&[String]> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a [String]>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(path) => out.push(path),
            Self::Access(inner, _) | Self::Unary(_, inner) => inner.collect_references(out),
            Self::Index(target, index) => {
                target.collect_references(out);
                index.collect_references(out);
            }
            Self::Array(items) => items.iter().for_each(|e| e.collect_references(out)),
            Self::Object(fields) => fields.iter().for_each(|(_, e)| e.collect_references(out)),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_references(out);
                rhs.collect_references(out);
            }
        }
    }

    /// Whether the expression can be evaluated without any scope
    pub fn is_constant(&self) -> bool {
        self.references().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(path: &str) -> Expr {
        Expr::Reference(path.split('.').map(String::from).collect())
    }

    fn block(name: &str, label: Option<&str>, body: Body) -> Block {
        Block {
            name: name.split('.').map(String::from).collect(),
            label: label.map(String::from),
            body,
            span: Span::default(),
        }
    }

    #[test]
    fn test_block_identity() {
        let b = block("testcomponents.count", Some("inc"), Body::new());
        assert_eq!(b.kind(), "testcomponents.count");
        assert_eq!(b.id().as_str(), "testcomponents.count.inc");
    }

    #[test]
    fn test_references_in_source_order() {
        let expr = Expr::Binary(
            BinaryOp::Add,
            Box::new(reference("a.b.out")),
            Box::new(Expr::Index(
                Box::new(reference("c.d.list")),
                Box::new(Expr::Literal(Value::from(0))),
            )),
        );
        let refs: Vec<String> = expr.references().iter().map(|p| p.join(".")).collect();
        assert_eq!(refs, vec!["a.b.out", "c.d.list"]);
        assert!(!expr.is_constant());
        assert!(Expr::Literal(Value::from(1)).is_constant());
    }

    #[test]
    fn test_nested_blocks_become_arguments() {
        let rule = |v: i64| {
            block(
                "rule",
                None,
                Body {
                    attributes: vec![Attribute {
                        name: "n".into(),
                        value: Expr::Literal(Value::from(v)),
                        span: Span::default(),
                    }],
                    blocks: vec![],
                },
            )
        };
        let parent = block(
            "x.y",
            Some("z"),
            Body {
                attributes: vec![Attribute {
                    name: "input".into(),
                    value: reference("a.b.c"),
                    span: Span::default(),
                }],
                blocks: vec![rule(1), rule(2), block("limits", None, Body::new())],
            },
        );

        let args = parent.argument_exprs();
        let names: Vec<&str> = args.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["input", "rule", "limits"]);
        assert!(matches!(&args[1].1, Expr::Array(items) if items.len() == 2));
        assert!(matches!(&args[2].1, Expr::Object(fields) if fields.is_empty()));
    }
}
