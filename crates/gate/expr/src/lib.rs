//! Gate expression language.
//!
//! A closed, side-effect-free grammar used wherever a gate definition
//! needs a computed predicate or metric (execution preconditions, quality
//! rules). Expressions can read only the roots the caller binds into a
//! [`Scope`]; there is no assignment, looping, user-defined function or
//! host access.
//!
//! ```text
//! data.amount > 100 && data.status == 'approved'
//! len(after.items) / max(len(before.items), 1)
//! exists(context.actorId) && context.actorType != 'agent'
//! ```
//!
//! Parsing happens once, when a gate is constructed, so a malformed
//! expression is rejected as a configuration error before any evaluation.

#![deny(unsafe_code)]

pub mod error;
pub mod eval;
mod lexer;
pub mod parser;

pub use error::ExprError;
pub use eval::{compare, truthy, type_name, values_equal, Scope};
pub use parser::{BinaryOp, Expr, Function, Path, PathSegment, MAX_DEPTH};

/// Parse an expression.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    parser::parse_expr(source)
}

/// Parse an expression and check that it only reads the given roots.
pub fn parse_with_roots(source: &str, allowed: &[&str]) -> Result<Expr, ExprError> {
    let expr = parse(source)?;
    if let Some(root) = expr.roots().into_iter().find(|r| !allowed.contains(r)) {
        return Err(ExprError::UnknownRoot {
            root: root.to_string(),
            allowed: allowed.join(", "),
        });
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn restricted_roots_are_enforced() {
        assert!(parse_with_roots("data.a > context.b", &["data", "context"]).is_ok());
        let err = parse_with_roots("process.env", &["data", "context"]).unwrap_err();
        assert_eq!(
            err,
            ExprError::UnknownRoot {
                root: "process".into(),
                allowed: "data, context".into(),
            }
        );
    }

    #[test]
    fn quality_metric_example() {
        let before = json!({"items": [1, 2]});
        let after = json!({"items": [1, 2, 3, 4]});
        let expr = parse("len(after.items) / max(len(before.items), 1)").unwrap();
        let scope = Scope::new().bind("before", &before).bind("after", &after);
        assert_eq!(expr.evaluate_number(&scope).unwrap(), 2.0);
    }

    proptest! {
        #[test]
        fn integer_comparisons_match_native(a in -1000i64..1000, b in -1000i64..1000) {
            let data = json!({"a": a, "b": b});
            let scope = Scope::new().bind("data", &data);
            let lt = parse("data.a < data.b").unwrap().evaluate_bool(&scope).unwrap();
            let ge = parse("data.a >= data.b").unwrap().evaluate_bool(&scope).unwrap();
            prop_assert_eq!(lt, a < b);
            prop_assert_eq!(ge, a >= b);
            prop_assert!(lt != ge);
        }

        #[test]
        fn arbitrary_input_never_panics(source in "[a-z0-9 .()\\[\\]'!&|=<>+*/%-]{0,40}") {
            if let Ok(expr) = parse(&source) {
                let data = json!({"a": 1, "b": "x"});
                let scope = Scope::new().bind("data", &data);
                let _ = expr.evaluate(&scope);
            }
        }
    }
}
