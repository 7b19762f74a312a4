//! Expression evaluator
//!
//! Evaluation is a pure function of the expression and a [`Scope`] snapshot
//! of export values: the same inputs always give the same result. Integer
//! arithmetic is checked and never wraps.

use std::cmp::Ordering;
use std::collections::HashMap;

use flow_types::{BinaryOp, EvalError, Expr, Number, TypeSpec, UnaryOp, Value, ValueMap};

/// Lookup of the values an expression can reference.
pub trait Scope {
    /// Resolve the longest prefix of `path` that names a value.
    ///
    /// Returns how many segments were consumed together with the value;
    /// the remaining segments are field accesses into it.
    fn resolve(&self, path: &[String]) -> Option<(usize, &Value)>;
}

/// Scope with nothing in it, for constant expressions.
pub struct EmptyScope;

impl Scope for EmptyScope {
    fn resolve(&self, _path: &[String]) -> Option<(usize, &Value)> {
        None
    }
}

/// Scope backed by a map of dotted ids to values.
#[derive(Debug, Clone, Default)]
pub struct MapScope {
    values: HashMap<String, Value>,
}

impl MapScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, value: Value) {
        self.values.insert(id.into(), value);
    }

    pub fn with(mut self, id: impl Into<String>, value: Value) -> Self {
        self.insert(id, value);
        self
    }
}

impl Scope for MapScope {
    fn resolve(&self, path: &[String]) -> Option<(usize, &Value)> {
        (1..=path.len())
            .rev()
            .find_map(|n| self.values.get(&path[..n].join(".")).map(|v| (n, v)))
    }
}

/// Evaluate an expression against a scope.
pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Reference(path) => resolve_reference(path, scope),
        Expr::Access(inner, field) => {
            let value = evaluate(inner, scope)?;
            field_of(&value, field, "expression").cloned()
        }
        Expr::Index(target, index) => {
            let target = evaluate(target, scope)?;
            let index = evaluate(index, scope)?;
            index_value(target, &index)
        }
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Object(fields) => {
            let mut map = ValueMap::with_capacity(fields.len());
            for (key, value) in fields {
                map.insert(key.clone(), evaluate(value, scope)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Unary(op, inner) => unary(*op, evaluate(inner, scope)?),
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !as_bool(evaluate(lhs, scope)?)? {
                return Ok(Value::Bool(false));
            }
            as_bool(evaluate(rhs, scope)?).map(Value::Bool)
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if as_bool(evaluate(lhs, scope)?)? {
                return Ok(Value::Bool(true));
            }
            as_bool(evaluate(rhs, scope)?).map(Value::Bool)
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, evaluate(lhs, scope)?, evaluate(rhs, scope)?),
    }
}

/// Evaluate an expression that must not reference anything.
pub fn evaluate_constant(expr: &Expr) -> Result<Value, EvalError> {
    evaluate(expr, &EmptyScope)
}

/// Schema-directed conversion of a value.
pub fn coerce(value: Value, ty: &TypeSpec) -> Result<Value, EvalError> {
    ty.coerce(value)
}

fn resolve_reference(path: &[String], scope: &dyn Scope) -> Result<Value, EvalError> {
    let (consumed, root) = scope
        .resolve(path)
        .ok_or_else(|| EvalError::UnknownReference(path.join(".")))?;

    let mut current = root;
    for (i, field) in path[consumed..].iter().enumerate() {
        let at = path[..consumed + i].join(".");
        current = field_of(current, field, &at)?;
    }
    Ok(current.clone())
}

fn field_of<'a>(value: &'a Value, field: &str, at: &str) -> Result<&'a Value, EvalError> {
    match value {
        Value::Object(map) => map.get(field).ok_or_else(|| EvalError::FieldNotFound {
            path: at.to_string(),
            field: field.to_string(),
        }),
        Value::Null => Err(EvalError::FieldNotFound {
            path: at.to_string(),
            field: field.to_string(),
        }),
        other => Err(EvalError::mismatch(
            "object",
            format!("{} at {at}", other.describe()),
        )),
    }
}

fn index_value(target: Value, index: &Value) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Array(mut items), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or_else(|| EvalError::mismatch("integer index", format!("number {n}")))?;
            let len = items.len();
            match usize::try_from(i) {
                Ok(idx) if idx < len => Ok(items.swap_remove(idx)),
                _ => Err(EvalError::IndexOutOfRange { index: i, len }),
            }
        }
        (Value::Object(mut map), Value::String(key)) => {
            map.swap_remove(key).ok_or_else(|| EvalError::FieldNotFound {
                path: "object".into(),
                field: key.clone(),
            })
        }
        (Value::Array(_), other) => Err(EvalError::mismatch("integer index", other.describe())),
        (Value::Object(_), other) => Err(EvalError::mismatch("string key", other.describe())),
        (other, _) => Err(EvalError::mismatch("array or object", other.describe())),
    }
}

fn as_bool(value: Value) -> Result<bool, EvalError> {
    value
        .as_bool()
        .ok_or_else(|| EvalError::mismatch("bool", value.describe()))
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Number(Number::Int(i))) => i
            .checked_neg()
            .map(Value::from)
            .ok_or(EvalError::Overflow),
        (UnaryOp::Neg, Value::Number(Number::Float(f))) => Ok(Value::from(-f)),
        (UnaryOp::Neg, other) => Err(EvalError::mismatch("number", other.describe())),
        (UnaryOp::Not, other) => as_bool(other).map(|b| Value::Bool(!b)),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    use BinaryOp::*;
    match op {
        Eq => Ok(Value::Bool(lhs == rhs)),
        NotEq => Ok(Value::Bool(lhs != rhs)),
        Lt | LtEq | Gt | GtEq => {
            let ord = compare(&lhs, &rhs)?;
            Ok(Value::Bool(match op {
                Lt => ord == Ordering::Less,
                LtEq => ord != Ordering::Greater,
                Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        Add => match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => arithmetic(op, a, b),
            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Ok(Value::Array(a))
            }
            (a, b) => Err(operand_mismatch(op, &a, &b)),
        },
        Sub | Mul | Div | Mod => match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => arithmetic(op, a, b),
            (a, b) => Err(operand_mismatch(op, &a, &b)),
        },
        // Short-circuit operators are handled by `evaluate`.
        And | Or => Ok(Value::Bool(as_bool(lhs)? && as_bool(rhs)?)),
    }
}

fn operand_mismatch(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::mismatch(
        format!("compatible operands for {op}"),
        format!("{} and {}", lhs.describe(), rhs.describe()),
    )
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, EvalError> {
    match (lhs, rhs) {
        (Value::Number(Number::Int(a)), Value::Number(Number::Int(b))) => Ok(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .ok_or_else(|| EvalError::mismatch("comparable numbers", "NaN")),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (a, b) => Err(EvalError::mismatch(
            "two numbers or two strings",
            format!("{} and {}", a.describe(), b.describe()),
        )),
    }
}

fn arithmetic(op: BinaryOp, lhs: Number, rhs: Number) -> Result<Value, EvalError> {
    if let (Number::Int(a), Number::Int(b)) = (lhs, rhs) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                match a.checked_rem(b) {
                    Some(0) => a.checked_div(b),
                    Some(_) => return Ok(Value::from(a as f64 / b as f64)),
                    None => None,
                }
            }
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.checked_rem(b)
            }
            _ => None,
        };
        return result.map(Value::from).ok_or(EvalError::Overflow);
    }

    let (a, b) = (lhs.as_f64(), rhs.as_f64());
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => return Err(EvalError::mismatch("arithmetic operator", op.to_string())),
    };
    if result.is_finite() {
        Ok(Value::from(result))
    } else {
        Err(EvalError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_dsl::parse_expression;

    fn eval(src: &str, scope: &dyn Scope) -> Result<Value, EvalError> {
        evaluate(&parse_expression(src).unwrap(), scope)
    }

    fn scope() -> MapScope {
        MapScope::new()
            .with(
                "testcomponents.count.inc",
                Value::object([("count", Value::from(3))]),
            )
            .with(
                "argument.input",
                Value::object([("value", Value::from(-10))]),
            )
            .with(
                "source.list",
                Value::object([(
                    "items",
                    Value::Array(vec![
                        Value::object([("name", Value::from("first"))]),
                        Value::object([("name", Value::from("second"))]),
                    ]),
                )]),
            )
    }

    #[test]
    fn test_reference_longest_prefix() {
        let s = scope();
        assert_eq!(eval("testcomponents.count.inc.count", &s).unwrap(), Value::from(3));
        assert_eq!(eval("argument.input.value", &s).unwrap(), Value::from(-10));
        assert_eq!(
            eval("testcomponents.count.inc", &s).unwrap(),
            Value::object([("count", Value::from(3))])
        );
    }

    #[test]
    fn test_missing_field() {
        let err = eval("testcomponents.count.inc.total", &scope()).unwrap_err();
        assert_eq!(
            err,
            EvalError::FieldNotFound {
                path: "testcomponents.count.inc".into(),
                field: "total".into()
            }
        );
    }

    #[test]
    fn test_unknown_reference() {
        let err = eval("nothing.here", &scope()).unwrap_err();
        assert_eq!(err, EvalError::UnknownReference("nothing.here".into()));
    }

    #[test]
    fn test_access_into_scalar_is_mismatch() {
        let err = eval("testcomponents.count.inc.count.deeper", &scope()).unwrap_err();
        assert!(matches!(err, EvalError::TypeMismatch { .. }));
    }

    #[test]
    fn test_index_and_access() {
        let s = scope();
        assert_eq!(eval("source.list.items[1].name", &s).unwrap(), Value::from("second"));
        assert_eq!(
            eval("source.list.items[2]", &s).unwrap_err(),
            EvalError::IndexOutOfRange { index: 2, len: 2 }
        );
        assert_eq!(eval(r#"{ a = 1 }["a"]"#, &s).unwrap(), Value::from(1));
        assert!(matches!(
            eval("source.list.items[\"x\"]", &s).unwrap_err(),
            EvalError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_arithmetic() {
        let s = EmptyScope;
        assert_eq!(eval("1 + 2 * 3", &s).unwrap(), Value::from(7));
        assert_eq!(eval("7 / 2", &s).unwrap(), Value::from(3.5));
        assert_eq!(eval("8 / 2", &s).unwrap(), Value::from(4));
        assert_eq!(eval("7 % 4", &s).unwrap(), Value::from(3));
        assert_eq!(eval("1.5 + 1", &s).unwrap(), Value::from(2.5));
        assert_eq!(eval(r#""a" + "b""#, &s).unwrap(), Value::from("ab"));
        assert_eq!(
            eval("[1] + [2]", &s).unwrap(),
            Value::Array(vec![Value::from(1), Value::from(2)])
        );
    }

    #[test]
    fn test_arithmetic_errors() {
        let s = EmptyScope;
        assert_eq!(eval("1 / 0", &s).unwrap_err(), EvalError::DivisionByZero);
        assert_eq!(eval("1.0 % 0", &s).unwrap_err(), EvalError::DivisionByZero);
        assert_eq!(
            eval("9223372036854775807 + 1", &s).unwrap_err(),
            EvalError::Overflow
        );
        assert!(matches!(
            eval(r#"1 + "a""#, &s).unwrap_err(),
            EvalError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_comparison_and_logic() {
        let s = scope();
        assert_eq!(eval("testcomponents.count.inc.count > 2", &s).unwrap(), Value::Bool(true));
        assert_eq!(eval(r#""a" < "b" && 1 == 1.0"#, &s).unwrap(), Value::Bool(true));
        assert_eq!(eval("false && nothing.here", &s).unwrap(), Value::Bool(false));
        assert_eq!(eval("true || nothing.here", &s).unwrap(), Value::Bool(true));
        assert_eq!(eval("!(1 != 1)", &s).unwrap(), Value::Bool(true));
        assert!(eval("1 && true", &s).is_err());
        assert!(eval("[1] < [2]", &s).is_err());
    }

    #[test]
    fn test_negation() {
        let s = scope();
        assert_eq!(eval("-argument.input.value", &s).unwrap(), Value::from(10));
        assert!(matches!(
            eval(r#"-"x""#, &s).unwrap_err(),
            EvalError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_collections_with_references() {
        let v = eval(
            "{ total = testcomponents.count.inc.count, list = [argument.input.value, 1] }",
            &scope(),
        )
        .unwrap();
        assert_eq!(v.get("total"), Some(&Value::from(3)));
        assert_eq!(
            v.get("list"),
            Some(&Value::Array(vec![Value::from(-10), Value::from(1)]))
        );
    }

    #[test]
    fn test_constant_evaluation() {
        let expr = parse_expression("2 * 21").unwrap();
        assert_eq!(evaluate_constant(&expr).unwrap(), Value::from(42));
        let reference = parse_expression("a.b").unwrap();
        assert!(evaluate_constant(&reference).is_err());
    }

    #[test]
    fn test_coerce_follows_schema_type() {
        assert_eq!(coerce(Value::from(2.0), &TypeSpec::Int).unwrap(), Value::from(2));
        assert!(coerce(Value::Array(vec![]), &TypeSpec::String).is_err());
    }
}
