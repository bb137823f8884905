//! Expression evaluation
//!
//! Evaluates small source-language expressions against the current
//! frame of a paused session. Identifiers resolve to locals first, then
//! to fields of `this`; calls and member access go through remote
//! invocation. Failures are returned as an outcome, never propagated:
//! an evaluation error is an answer, not a session fault.

pub mod ast;
pub mod parse;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::session::DebugSession;
use crate::vm::Value;
use ast::{BinaryOp, Expr, Literal, UnaryOp};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Identifier not found: {0}")]
    IdentifierNotFound(String),

    #[error("Operand is not numeric: {0}")]
    NotNumeric(String),

    #[error("Condition is not boolean: {0}")]
    NotBoolean(String),

    #[error("Not an array: {0}")]
    NotAnArray(String),

    #[error("Bad array index: {0}")]
    BadIndex(String),

    #[error("No current frame")]
    NoCurrentFrame,

    #[error("Invocation failed: {0}")]
    Invocation(String),

    #[error("Operands do not support {op}: {lhs}, {rhs}")]
    BadOperands { op: &'static str, lhs: String, rhs: String },
}

/// Result of evaluating one expression. Both variants are ordinary
/// answers to show the user.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    Value(Value),
    Error(EvalError),
}

impl fmt::Display for EvalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Error(e) => write!(f, "{e}"),
        }
    }
}

type EvalFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, EvalError>> + Send + 'a>>;

pub struct ExpressionEvaluator<'a> {
    session: &'a DebugSession,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(session: &'a DebugSession) -> Self {
        Self { session }
    }

    /// Evaluate an expression against the current frame.
    pub async fn evaluate(&self, source: &str) -> EvalOutcome {
        let expr = match parse::parse(source) {
            Ok(expr) => expr,
            Err(e) => return EvalOutcome::Error(e),
        };
        match self.eval_expr(&expr).await {
            Ok(value) => EvalOutcome::Value(value),
            Err(e) => EvalOutcome::Error(e),
        }
    }

    // Recursion through a boxed future; expression trees are small.
    fn eval_expr<'s>(&'s self, expr: &'s Expr) -> EvalFuture<'s> {
        Box::pin(async move {
            match expr {
                Expr::Literal(lit) => Ok(literal_value(lit)),
                Expr::Ident(name) => self.eval_ident(name, None).await,
                Expr::Call { name, args } => self.eval_call(name, args, None).await,
                Expr::Index { array, index } => {
                    let array_value = self.eval_expr(array).await?;
                    let index_value = self.eval_expr(index).await?;
                    self.eval_index(array_value, index_value).await
                }
                Expr::Member { base, member } => {
                    let base_value = self.eval_expr(base).await?;
                    self.eval_member(base_value, member).await
                }
                Expr::Unary { op, operand } => {
                    let value = self.eval_expr(operand).await?;
                    eval_unary(*op, value)
                }
                Expr::Binary { op, lhs, rhs } => {
                    let lhs_value = self.eval_expr(lhs).await?;
                    let rhs_value = self.eval_expr(rhs).await?;
                    self.eval_binary(*op, lhs_value, rhs_value).await
                }
                Expr::Ternary { cond, then_branch, else_branch } => {
                    let cond_value = self.eval_expr(cond).await?;
                    match cond_value.as_bool() {
                        Some(true) => self.eval_expr(then_branch).await,
                        Some(false) => self.eval_expr(else_branch).await,
                        None => Err(EvalError::NotBoolean(cond_value.to_string())),
                    }
                }
            }
        })
    }

    /// Resolve a name: `this`, then a visible local, then a field of
    /// the receiver.
    async fn eval_ident(&self, name: &str, receiver: Option<&Value>) -> Result<Value, EvalError> {
        match receiver {
            Some(receiver) => {
                // Scoped lookup: only fields of the receiver.
                if name == "length" {
                    if let Value::Array(a) = receiver {
                        return Ok(Value::Int(a.length as i32));
                    }
                }
                if let Value::Object(object) = receiver {
                    if let Ok(Some(value)) = self.session.field_value(object, name).await {
                        return Ok(value);
                    }
                }
                Err(EvalError::IdentifierNotFound(name.to_string()))
            }
            None => {
                if name == "this" {
                    return match self.this_object().await? {
                        Some(this) => Ok(this),
                        None => Err(EvalError::IdentifierNotFound(name.to_string())),
                    };
                }
                if let Ok(Some(value)) = self.session.visible_variable(name).await {
                    return Ok(value);
                }
                if let Some(Value::Object(this)) = self.this_object().await? {
                    if let Ok(Some(value)) = self.session.field_value(&this, name).await {
                        return Ok(value);
                    }
                }
                Err(EvalError::IdentifierNotFound(name.to_string()))
            }
        }
    }

    async fn eval_call(
        &self,
        name: &str,
        args: &[Expr],
        receiver: Option<Value>,
    ) -> Result<Value, EvalError> {
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.eval_expr(arg).await?);
        }
        let receiver = match receiver {
            Some(r) => r,
            None => match self.this_object().await? {
                Some(this) => this,
                None => return Err(EvalError::Invocation(format!(
                    "no receiver for {name}"
                ))),
            },
        };
        self.session
            .invoke_method(&receiver, name, arg_values)
            .await
            .map_err(|e| EvalError::Invocation(e.to_string()))
    }

    async fn eval_member(&self, base: Value, member: &Expr) -> Result<Value, EvalError> {
        match member {
            Expr::Ident(name) => self.eval_ident(name, Some(&base)).await,
            Expr::Call { name, args } => self.eval_call(name, args, Some(base)).await,
            other => Err(EvalError::Parse(format!("bad member expression {other:?}"))),
        }
    }

    async fn eval_index(&self, array: Value, index: Value) -> Result<Value, EvalError> {
        let array_ref = match &array {
            Value::Array(a) => a,
            other => return Err(EvalError::NotAnArray(other.to_string())),
        };
        let i = match index.as_i64() {
            Some(i) if i >= 0 => i as usize,
            _ => return Err(EvalError::BadIndex(index.to_string())),
        };
        if i >= array_ref.length {
            return Err(EvalError::BadIndex(format!(
                "{i} out of bounds for length {}",
                array_ref.length
            )));
        }
        self.session
            .array_element(array_ref.id, i)
            .await
            .map_err(|e| EvalError::Invocation(e.to_string()))
    }

    async fn eval_binary(
        &self,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, EvalError> {
        match op {
            BinaryOp::Add => {
                // String concatenation wins when either side is one.
                if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
                    let left = self.session.value_to_string(&lhs).await;
                    let right = self.session.value_to_string(&rhs).await;
                    return Ok(Value::Str(format!("{left}{right}")));
                }
                numeric_op(op, &lhs, &rhs, |a, b| a + b)
            }
            BinaryOp::Sub => numeric_op(op, &lhs, &rhs, |a, b| a - b),
            BinaryOp::Mul => numeric_op(op, &lhs, &rhs, |a, b| a * b),
            BinaryOp::Div => numeric_op(op, &lhs, &rhs, |a, b| a / b),
            BinaryOp::Rem => {
                if lhs.is_integral() && rhs.is_integral() {
                    let (a, b) = match (lhs.as_i64(), rhs.as_i64()) {
                        (Some(a), Some(b)) => (a, b),
                        _ => return Err(bad_operands(op, &lhs, &rhs)),
                    };
                    if b == 0 {
                        return Err(EvalError::BadOperands {
                            op: op_symbol(op),
                            lhs: lhs.to_string(),
                            rhs: "0".into(),
                        });
                    }
                    return Ok(Value::promoted((a % b) as f64, &lhs, &rhs));
                }
                numeric_op(op, &lhs, &rhs, |a, b| a % b)
            }
            BinaryOp::Eq => Ok(Value::Boolean(values_equal(&lhs, &rhs))),
            BinaryOp::Ne => Ok(Value::Boolean(!values_equal(&lhs, &rhs))),
            BinaryOp::Lt => compare_op(op, &lhs, &rhs, |o| o == std::cmp::Ordering::Less),
            BinaryOp::Gt => compare_op(op, &lhs, &rhs, |o| o == std::cmp::Ordering::Greater),
            BinaryOp::Le => compare_op(op, &lhs, &rhs, |o| o != std::cmp::Ordering::Greater),
            BinaryOp::Ge => compare_op(op, &lhs, &rhs, |o| o != std::cmp::Ordering::Less),
            BinaryOp::And | BinaryOp::Or => {
                let (a, b) = match (lhs.as_bool(), rhs.as_bool()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return Err(bad_operands(op, &lhs, &rhs)),
                };
                Ok(Value::Boolean(match op {
                    BinaryOp::And => a && b,
                    _ => a || b,
                }))
            }
        }
    }

    async fn this_object(&self) -> Result<Option<Value>, EvalError> {
        self.session
            .this_object()
            .await
            .map_err(|_| EvalError::NoCurrentFrame)
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(v) => Value::Boolean(*v),
        Literal::Int(v) => Value::Int(*v),
        Literal::Long(v) => Value::Long(*v),
        Literal::Float(v) => Value::Float(*v),
        Literal::Double(v) => Value::Double(*v),
        Literal::Char(v) => Value::Char(*v),
        Literal::Str(v) => Value::Str(v.clone()),
    }
}

fn eval_unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => match value.as_bool() {
            Some(v) => Ok(Value::Boolean(!v)),
            None => Err(EvalError::NotBoolean(value.to_string())),
        },
        UnaryOp::Neg => match value.as_f64() {
            Some(v) => Ok(Value::promoted(-v, &value, &Value::Int(0))),
            None => Err(EvalError::NotNumeric(value.to_string())),
        },
    }
}

fn numeric_op(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::promoted(f(a, b), lhs, rhs)),
        _ => Err(bad_operands(op, lhs, rhs)),
    }
}

fn compare_op(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, EvalError> {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => match a.partial_cmp(&b) {
            Some(ordering) => Ok(Value::Boolean(accept(ordering))),
            None => Ok(Value::Boolean(false)),
        },
        _ => Err(bad_operands(op, lhs, rhs)),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if lhs.is_numeric() && rhs.is_numeric() {
        return lhs.as_f64() == rhs.as_f64();
    }
    match (lhs, rhs) {
        (Value::Object(a), Value::Object(b)) => a.id == b.id,
        (Value::Array(a), Value::Array(b)) => a.id == b.id,
        _ => lhs == rhs,
    }
}

fn bad_operands(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::BadOperands {
        op: op_symbol(op),
        lhs: lhs.to_string(),
        rhs: rhs.to_string(),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Gt => ">",
        BinaryOp::Le => "<=",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_negation_keeps_operand_type() {
        assert_eq!(eval_unary(UnaryOp::Neg, Value::Int(5)).unwrap(), Value::Int(-5));
        assert_eq!(
            eval_unary(UnaryOp::Neg, Value::Double(2.5)).unwrap(),
            Value::Double(-2.5)
        );
        assert!(eval_unary(UnaryOp::Neg, Value::Boolean(true)).is_err());
        assert_eq!(
            eval_unary(UnaryOp::Not, Value::Boolean(true)).unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn numeric_equality_crosses_widths() {
        assert!(values_equal(&Value::Int(3), &Value::Long(3)));
        assert!(values_equal(&Value::Int(3), &Value::Double(3.0)));
        assert!(!values_equal(&Value::Int(3), &Value::Int(4)));
        assert!(!values_equal(&Value::Int(3), &Value::Str("3".into())));
    }
}
