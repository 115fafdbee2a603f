use std::cmp::Ordering;

use serde_json::Value;

use crate::error::ExprError;
use crate::parser::{BinaryOp, Expr, Function, Path, PathSegment};

static NULL: Value = Value::Null;

/// Named roots an expression may read. Nothing else is reachable.
#[derive(Debug, Default, Clone)]
pub struct Scope<'a> {
    roots: Vec<(&'a str, &'a Value)>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self { roots: Vec::new() }
    }

    /// Bind `name` to `value`. A later binding shadows an earlier one.
    pub fn bind(mut self, name: &'a str, value: &'a Value) -> Self {
        self.roots.push((name, value));
        self
    }

    fn lookup(&self, name: &str) -> Option<&'a Value> {
        self.roots
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}

impl Expr {
    /// Evaluate against `scope`. Unresolvable paths yield `null`.
    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path(path) => Ok(resolve(path, scope).clone()),
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&inner.evaluate(scope)?))),
            Expr::Neg(inner) => {
                let n = as_number(&inner.evaluate(scope)?, "unary '-'")?;
                number(-n)
            }
            Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, scope),
            Expr::Call { function, args } => eval_call(*function, args, scope),
        }
    }

    /// Evaluate and coerce to a boolean by truthiness.
    pub fn evaluate_bool(&self, scope: &Scope<'_>) -> Result<bool, ExprError> {
        Ok(truthy(&self.evaluate(scope)?))
    }

    /// Evaluate and require a numeric result.
    pub fn evaluate_number(&self, scope: &Scope<'_>) -> Result<f64, ExprError> {
        as_number(&self.evaluate(scope)?, "expression result")
    }
}

fn resolve<'a>(path: &Path, scope: &Scope<'a>) -> &'a Value {
    let Some(mut current) = scope.lookup(&path.root) else {
        return &NULL;
    };
    for segment in &path.segments {
        let next = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key),
            (PathSegment::Index(idx), Value::Array(items)) => items.get(*idx),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return &NULL,
        }
    }
    current
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &Scope<'_>) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Or => {
            if lhs.evaluate_bool(scope)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(rhs.evaluate_bool(scope)?))
        }
        BinaryOp::And => {
            if !lhs.evaluate_bool(scope)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(rhs.evaluate_bool(scope)?))
        }
        _ => {
            let l = lhs.evaluate(scope)?;
            let r = rhs.evaluate(scope)?;
            match op {
                BinaryOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
                BinaryOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
                BinaryOp::Gt => Ok(Value::Bool(compare(&l, &r)? == Ordering::Greater)),
                BinaryOp::Ge => Ok(Value::Bool(compare(&l, &r)? != Ordering::Less)),
                BinaryOp::Lt => Ok(Value::Bool(compare(&l, &r)? == Ordering::Less)),
                BinaryOp::Le => Ok(Value::Bool(compare(&l, &r)? != Ordering::Greater)),
                BinaryOp::Add => match (&l, &r) {
                    (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
                    _ => number(as_number(&l, "'+'")? + as_number(&r, "'+'")?),
                },
                BinaryOp::Sub => number(as_number(&l, "'-'")? - as_number(&r, "'-'")?),
                BinaryOp::Mul => number(as_number(&l, "'*'")? * as_number(&r, "'*'")?),
                BinaryOp::Div => {
                    let divisor = as_number(&r, "'/'")?;
                    if divisor == 0.0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    number(as_number(&l, "'/'")? / divisor)
                }
                BinaryOp::Rem => {
                    let divisor = as_number(&r, "'%'")?;
                    if divisor == 0.0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    number(as_number(&l, "'%'")? % divisor)
                }
                BinaryOp::Or => Ok(Value::Bool(truthy(&l) || truthy(&r))),
                BinaryOp::And => Ok(Value::Bool(truthy(&l) && truthy(&r))),
            }
        }
    }
}

fn eval_call(function: Function, args: &[Expr], scope: &Scope<'_>) -> Result<Value, ExprError> {
    match function {
        Function::Len => match args[0].evaluate(scope)? {
            Value::Null => Ok(Value::from(0u64)),
            Value::String(s) => Ok(Value::from(s.chars().count() as u64)),
            Value::Array(items) => Ok(Value::from(items.len() as u64)),
            Value::Object(map) => Ok(Value::from(map.len() as u64)),
            other => Err(ExprError::TypeMismatch(format!(
                "len() expects string, array or object, got {}",
                type_name(&other)
            ))),
        },
        Function::Exists => Ok(Value::Bool(!args[0].evaluate(scope)?.is_null())),
        Function::Abs => number(as_number(&args[0].evaluate(scope)?, "abs()")?.abs()),
        Function::Min | Function::Max => {
            let mut acc: Option<f64> = None;
            for arg in args {
                let n = as_number(&arg.evaluate(scope)?, function.name())?;
                acc = Some(match (acc, function) {
                    (None, _) => n,
                    (Some(a), Function::Min) => a.min(n),
                    (Some(a), _) => a.max(n),
                });
            }
            // arity >= 1 is enforced by the parser
            number(acc.unwrap_or_default())
        }
    }
}

/// JSON truthiness: `null`, `false`, `0`, `""` and empty containers are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Structural equality with value-based numbers (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Ordering for number/number and string/string pairs.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering, ExprError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y)
                .ok_or_else(|| ExprError::TypeMismatch("numbers are not comparable".into()))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ExprError::TypeMismatch(format!(
            "cannot order {} and {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

/// Short JSON type name used in messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_number(value: &Value, what: &str) -> Result<f64, ExprError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or(ExprError::NonFinite),
        other => Err(ExprError::TypeMismatch(format!(
            "{} expects a number, got {}",
            what,
            type_name(other)
        ))),
    }
}

fn number(n: f64) -> Result<Value, ExprError> {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or(ExprError::NonFinite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use serde_json::json;

    fn eval(source: &str, data: &Value) -> Result<Value, ExprError> {
        let expr = parse(source).unwrap();
        let scope = Scope::new().bind("data", data);
        expr.evaluate(&scope)
    }

    #[test]
    fn boolean_connectives_over_fields() {
        let data = json!({"amount": 150, "status": "approved"});
        assert_eq!(
            eval("data.amount > 100 && data.status == 'approved'", &data).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("data.amount > 200 || data.status != 'approved'", &data).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn missing_paths_resolve_to_null() {
        let data = json!({"a": {"b": 1}});
        assert_eq!(eval("data.a.c", &data).unwrap(), Value::Null);
        assert_eq!(eval("other.x", &data).unwrap(), Value::Null);
        assert_eq!(eval("exists(data.a.b)", &data).unwrap(), json!(true));
        assert_eq!(eval("!exists(data.z)", &data).unwrap(), json!(true));
    }

    #[test]
    fn and_short_circuits_before_type_errors() {
        let data = json!({"x": "text"});
        assert_eq!(eval("false && data.x > 1", &data).unwrap(), json!(false));
        assert!(matches!(
            eval("true && data.x > 1", &data).unwrap_err(),
            ExprError::TypeMismatch(_)
        ));
    }

    #[test]
    fn arithmetic_and_functions() {
        let data = json!({"items": [1, 2, 3], "name": "abc", "delta": -4});
        assert_eq!(eval("len(data.items) * 2", &data).unwrap(), json!(6.0));
        assert_eq!(eval("len(data.name)", &data).unwrap(), json!(3));
        assert_eq!(eval("abs(data.delta)", &data).unwrap(), json!(4.0));
        assert_eq!(eval("max(1, data.items[2], 2)", &data).unwrap(), json!(3.0));
        assert_eq!(eval("min(5, -1)", &data).unwrap(), json!(-1.0));
        assert_eq!(eval("7 % 4 + 10 / 4", &data).unwrap(), json!(5.5));
    }

    #[test]
    fn numeric_equality_ignores_representation() {
        let data = json!({"n": 1});
        assert_eq!(eval("data.n == 1.0", &data).unwrap(), json!(true));
        assert!(values_equal(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2.0]})));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let data = json!({});
        assert_eq!(eval("1 / 0", &data).unwrap_err(), ExprError::DivisionByZero);
        assert_eq!(eval("1 % 0", &data).unwrap_err(), ExprError::DivisionByZero);
    }

    #[test]
    fn strings_compare_lexicographically() {
        let data = json!({"s": "beta"});
        assert_eq!(eval("data.s > 'alpha'", &data).unwrap(), json!(true));
        assert_eq!(eval("'a' + 'b' == 'ab'", &data).unwrap(), json!(true));
    }

    #[test]
    fn truthiness_rules() {
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!({"k": 1})));
        assert!(truthy(&json!(0.1)));
    }

    #[test]
    fn later_binding_shadows_earlier() {
        let a = json!({"v": 1});
        let b = json!({"v": 2});
        let expr = parse("data.v").unwrap();
        let scope = Scope::new().bind("data", &a).bind("data", &b);
        assert_eq!(expr.evaluate(&scope).unwrap(), json!(2));
    }
}
