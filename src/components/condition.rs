//! 规则过滤条件
//!
//! 语法: `path OP literal`, 使用 `and`/`&&`、`or`/`||` 和括号组合, `and` 优先级更高.
//! OP 为 `== != > >= < <=`, 字面量支持数字、带引号的字符串、`true`、`false`、`null`.

use crate::types::RuleError;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use winnow::ascii::{multispace0, multispace1};
use winnow::combinator::{alt, cut_err, delimited, peek, preceded, repeat};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{literal, take_while};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        path: Vec<String>,
        op: CmpOp,
        value: Value,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

/// 解析条件表达式, 语法错误属于配置错误
pub fn parse_condition(input: &str) -> Result<Condition, RuleError> {
    delimited(multispace0, or_expr, multispace0)
        .parse(input)
        .map_err(|e| RuleError::Config(format!("invalid condition '{}': {}", input, e)))
}

impl Condition {
    /// 对 JSON 文档求值. 路径不存在时比较结果为 false, 类型无法比较时报错
    pub fn eval(&self, doc: &Value) -> Result<bool, RuleError> {
        match self {
            Condition::Compare { path, op, value } => match lookup_path(doc, path.as_slice()) {
                Some(actual) => compare(actual, *op, value),
                None => Ok(false),
            },
            Condition::And(lhs, rhs) => Ok(lhs.eval(doc)? && rhs.eval(doc)?),
            Condition::Or(lhs, rhs) => Ok(lhs.eval(doc)? || rhs.eval(doc)?),
        }
    }
}

/// 按路径查找 JSON 值, 数字段可以索引数组
pub fn lookup_path<'a, S: AsRef<str>>(doc: &'a Value, path: &[S]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |current, part| {
        let part = part.as_ref();
        match current {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

fn compare(actual: &Value, op: CmpOp, expected: &Value) -> Result<bool, RuleError> {
    match op {
        CmpOp::Eq => Ok(values_equal(actual, expected)),
        CmpOp::Ne => Ok(!values_equal(actual, expected)),
        _ => {
            let ordering = order(actual, expected)?;
            Ok(matches!(
                (op, ordering),
                (CmpOp::Gt, Ordering::Greater)
                    | (CmpOp::Ge, Ordering::Greater | Ordering::Equal)
                    | (CmpOp::Lt, Ordering::Less)
                    | (CmpOp::Le, Ordering::Less | Ordering::Equal)
            ))
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn order(actual: &Value, expected: &Value) -> Result<Ordering, RuleError> {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
                .ok_or_else(|| RuleError::Extract(format!("cannot order {} and {}", a, b)))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(RuleError::Extract(format!(
            "cannot order {} against {}",
            actual, expected
        ))),
    }
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

fn or_expr(input: &mut &str) -> ModalResult<Condition> {
    let first = and_expr.parse_next(input)?;
    let rest: Vec<Condition> = repeat(0.., preceded(or_op, cut_err(and_expr))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, c| Condition::Or(Box::new(acc), Box::new(c))))
}

fn and_expr(input: &mut &str) -> ModalResult<Condition> {
    let first = term.parse_next(input)?;
    let rest: Vec<Condition> = repeat(0.., preceded(and_op, cut_err(term))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, c| Condition::And(Box::new(acc), Box::new(c))))
}

fn or_op(input: &mut &str) -> ModalResult<()> {
    alt((
        (multispace0, literal("||"), multispace0).void(),
        (multispace0, literal("or"), keyword_end).void(),
    ))
    .parse_next(input)
}

fn and_op(input: &mut &str) -> ModalResult<()> {
    alt((
        (multispace0, literal("&&"), multispace0).void(),
        (multispace0, literal("and"), keyword_end).void(),
    ))
    .parse_next(input)
}

/// 关键字后面必须是空白或左括号
fn keyword_end(input: &mut &str) -> ModalResult<()> {
    alt((multispace1.void(), peek(literal("(")).void())).parse_next(input)
}

fn term(input: &mut &str) -> ModalResult<Condition> {
    alt((
        delimited(
            (literal("("), multispace0),
            or_expr,
            (
                multispace0,
                cut_err(literal(")")).context(StrContext::Expected(
                    StrContextValue::Description("closing parenthesis"),
                )),
            ),
        ),
        comparison,
    ))
    .parse_next(input)
}

fn comparison(input: &mut &str) -> ModalResult<Condition> {
    let path = path.parse_next(input)?;
    multispace0.parse_next(input)?;
    let op = cut_err(cmp_op)
        .context(StrContext::Expected(StrContextValue::Description(
            "comparison operator",
        )))
        .parse_next(input)?;
    multispace0.parse_next(input)?;
    let value = cut_err(literal_value)
        .context(StrContext::Expected(StrContextValue::Description("literal")))
        .parse_next(input)?;
    Ok(Condition::Compare { path, op, value })
}

fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)
}

fn path(input: &mut &str) -> ModalResult<Vec<String>> {
    let first = ident.parse_next(input)?;
    let rest: Vec<&str> = repeat(0.., preceded(literal("."), cut_err(ident))).parse_next(input)?;
    Ok(std::iter::once(first)
        .chain(rest)
        .map(str::to_string)
        .collect())
}

fn cmp_op(input: &mut &str) -> ModalResult<CmpOp> {
    alt((
        literal("==").value(CmpOp::Eq),
        literal("!=").value(CmpOp::Ne),
        literal(">=").value(CmpOp::Ge),
        literal("<=").value(CmpOp::Le),
        literal(">").value(CmpOp::Gt),
        literal("<").value(CmpOp::Lt),
    ))
    .parse_next(input)
}

fn literal_value(input: &mut &str) -> ModalResult<Value> {
    alt((
        literal("true").value(Value::Bool(true)),
        literal("false").value(Value::Bool(false)),
        literal("null").value(Value::Null),
        quoted_string,
        number,
    ))
    .parse_next(input)
}

fn quoted_string(input: &mut &str) -> ModalResult<Value> {
    alt((
        delimited(
            literal("\""),
            take_while(0.., |c: char| c != '"'),
            cut_err(literal("\"")),
        ),
        delimited(
            literal("'"),
            take_while(0.., |c: char| c != '\''),
            cut_err(literal("'")),
        ),
    ))
    .map(|s: &str| Value::String(s.to_string()))
    .parse_next(input)
}

fn number(input: &mut &str) -> ModalResult<Value> {
    let digits = take_while(1.., |c: char| {
        c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
    })
    .parse_next(input)?;

    if let Ok(i) = digits.parse::<i64>() {
        return Ok(Value::Number(i.into()));
    }
    let f: f64 = digits
        .parse()
        .map_err(|_| ErrMode::Cut(ContextError::new()))?;
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ErrMode::Cut(ContextError::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_simple_comparison() {
        let cond = parse_condition("temperature > 30").unwrap();
        assert_eq!(
            cond,
            Condition::Compare {
                path: vec!["temperature".to_string()],
                op: CmpOp::Gt,
                value: json!(30),
            }
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let cond = parse_condition("a == 1 or b == 2 and c == 3").unwrap();
        match cond {
            Condition::Or(_, rhs) => assert!(matches!(*rhs, Condition::And(_, _))),
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn evaluates_nested_paths_and_groups() {
        let doc = json!({ "sensor": { "temp": 42.5, "unit": "C" }, "ok": true });
        let cond = parse_condition("(sensor.temp >= 40 && sensor.unit == 'C') || ok == false").unwrap();
        assert!(cond.eval(&doc).unwrap());

        let cond = parse_condition("sensor.temp < 40 and ok == true").unwrap();
        assert!(!cond.eval(&doc).unwrap());
    }

    #[test]
    fn keywords_may_touch_parentheses() {
        let doc = json!({ "a": 1, "b": 2 });
        let cond = parse_condition("(a == 1)and(b == 2)").unwrap();
        assert!(matches!(cond, Condition::And(_, _)));
        assert!(cond.eval(&doc).unwrap());

        let cond = parse_condition("(a == 2)or (b == 2)").unwrap();
        assert!(cond.eval(&doc).unwrap());

        // 关键字不能吞掉后面的标识符
        assert!(parse_condition("a == 1 orb == 2").is_err());
    }

    #[test]
    fn integer_and_float_compare_numerically() {
        let cond = parse_condition("a == 1.0").unwrap();
        assert!(cond.eval(&json!({ "a": 1 })).unwrap());
    }

    #[test]
    fn missing_path_is_false() {
        let cond = parse_condition("missing != 1").unwrap();
        assert!(!cond.eval(&json!({ "a": 1 })).unwrap());
    }

    #[test]
    fn ordering_mismatched_types_fails() {
        let cond = parse_condition("a > 1").unwrap();
        assert!(matches!(
            cond.eval(&json!({ "a": "high" })),
            Err(RuleError::Extract(_))
        ));
    }

    #[test]
    fn malformed_condition_is_config_error() {
        for bad in ["a >", "a ?? 1", "(a == 1", "== 1", "a == 1 and"] {
            assert!(
                matches!(parse_condition(bad), Err(RuleError::Config(_))),
                "expected error for {:?}",
                bad
            );
        }
    }

    #[test]
    fn lookup_indexes_arrays() {
        let doc = json!({ "list": [ { "v": 7 } ] });
        assert_eq!(lookup_path(&doc, &["list", "0", "v"]), Some(&json!(7)));
    }
}
