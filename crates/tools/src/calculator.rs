//! Calculator tool: numeric expressions over a closed function whitelist.

use evalexpr::{
    eval_with_context, Context, ContextWithMutableFunctions, ContextWithMutableVariables,
    DefaultNumericTypes, Function, HashMapContext, Value as EvalValue,
};
use regex::Regex;
use serde_json::Value;

use cl_domain::tool::{error_kind, ToolResult};

use crate::registry::Tool;

/// Identifiers the evaluator accepts: whitelisted functions plus the two
/// constants. Anything else in the expression is rejected up front.
const ALLOWED_NAMES: &[&str] = &[
    "abs", "round", "min", "max", "sum", "pow", "sqrt", "sin", "cos", "tan", "asin", "acos",
    "atan", "sinh", "cosh", "tanh", "log", "log10", "log2", "exp", "floor", "ceil", "factorial",
    "gcd", "pi", "e", "radians", "degrees",
];

pub struct CalculatorTool;

impl CalculatorTool {
    fn context() -> HashMapContext<DefaultNumericTypes> {
        let mut ctx = HashMapContext::new();
        ctx.set_builtin_functions_disabled(true)
            .expect("HashMapContext supports disabling builtins");

        ctx.set_value("pi".into(), EvalValue::Float(std::f64::consts::PI))
            .expect("set constant");
        ctx.set_value("e".into(), EvalValue::Float(std::f64::consts::E))
            .expect("set constant");

        let unary: &[(&str, fn(f64) -> f64)] = &[
            ("abs", f64::abs),
            ("sqrt", f64::sqrt),
            ("sin", f64::sin),
            ("cos", f64::cos),
            ("tan", f64::tan),
            ("asin", f64::asin),
            ("acos", f64::acos),
            ("atan", f64::atan),
            ("sinh", f64::sinh),
            ("cosh", f64::cosh),
            ("tanh", f64::tanh),
            ("log10", f64::log10),
            ("log2", f64::log2),
            ("exp", f64::exp),
            ("floor", f64::floor),
            ("ceil", f64::ceil),
            ("radians", f64::to_radians),
            ("degrees", f64::to_degrees),
        ];
        for (name, f) in unary {
            let f = *f;
            ctx.set_function(
                (*name).into(),
                Function::new(move |arg| Ok(EvalValue::Float(f(arg.as_number()?)))),
            )
            .expect("set function");
        }

        ctx.set_function(
            "round".into(),
            Function::new(|arg| {
                let n: f64 = arg.as_number()?;
                Ok(EvalValue::Int(n.round() as i64))
            }),
        )
        .expect("set function");

        ctx.set_function(
            "pow".into(),
            Function::new(|arg| {
                let args = arg.as_fixed_len_tuple(2)?;
                let base: f64 = args[0].as_number()?;
                let exp: f64 = args[1].as_number()?;
                Ok(EvalValue::Float(base.powf(exp)))
            }),
        )
        .expect("set function");

        // log(x) is the natural log; log(x, base) matches the usual
        // two-argument convention.
        ctx.set_function(
            "log".into(),
            Function::new(|arg| match arg {
                EvalValue::Tuple(items) if items.len() == 2 => {
                    let x: f64 = items[0].as_number()?;
                    let base: f64 = items[1].as_number()?;
                    Ok(EvalValue::Float(x.ln() / base.ln()))
                }
                other => {
                    let n: f64 = other.as_number()?;
                    Ok(EvalValue::Float(n.ln()))
                }
            }),
        )
        .expect("set function");

        let folds: &[(&str, fn(&[f64]) -> f64)] = &[
            ("min", |xs| xs.iter().copied().fold(f64::INFINITY, f64::min)),
            ("max", |xs| {
                xs.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            }),
            ("sum", |xs| xs.iter().sum()),
        ];
        for (name, f) in folds {
            let f = *f;
            ctx.set_function(
                (*name).into(),
                Function::new(move |arg| {
                    let nums = numbers_of(arg)?;
                    Ok(EvalValue::Float(f(&nums)))
                }),
            )
            .expect("set function");
        }

        ctx.set_function(
            "factorial".into(),
            Function::new(|arg| {
                let n = arg.as_int()?;
                if !(0..=20).contains(&n) {
                    // 21! overflows i64.
                    return Ok(EvalValue::Float(f64::INFINITY));
                }
                Ok(EvalValue::Int((1..=n).product::<i64>().max(1)))
            }),
        )
        .expect("set function");

        ctx.set_function(
            "gcd".into(),
            Function::new(|arg| {
                let args = arg.as_fixed_len_tuple(2)?;
                let a0: i64 = args[0].as_int()?;
                let b0: i64 = args[1].as_int()?;
                let (mut a, mut b) = (a0.abs(), b0.abs());
                while b != 0 {
                    (a, b) = (b, a % b);
                }
                Ok(EvalValue::Int(a))
            }),
        )
        .expect("set function");

        ctx
    }
}

fn numbers_of(
    arg: &EvalValue<DefaultNumericTypes>,
) -> Result<Vec<f64>, evalexpr::EvalexprError<DefaultNumericTypes>> {
    match arg {
        EvalValue::Tuple(items) => items.iter().map(|v| v.as_number()).collect(),
        other => Ok(vec![other.as_number()?]),
    }
}

/// Integral floats print as integers; everything else uses the shortest
/// round-trip representation.
fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[async_trait::async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a numeric expression: arithmetic, trigonometry, logarithms, \
         powers. Use when a calculation is needed."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Math expression, e.g. '2+3*4', 'sqrt(16)', 'sin(pi/2)', 'log(100, 10)'"
                }
            },
            "required": ["expression"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(expression) = args.get("expression").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'expression' argument", error_kind::INVALID_INPUT);
        };

        // Python-style exponent operator is common in model output.
        let expr = expression.trim().replace("**", "^");

        let ident_re = Regex::new(r"[a-zA-Z_][a-zA-Z0-9_]*").expect("static regex");
        for ident in ident_re.find_iter(&expr) {
            if !ALLOWED_NAMES.contains(&ident.as_str()) {
                return ToolResult::fail(
                    format!("Unsupported function or name: {}", ident.as_str()),
                    "invalid_identifier",
                );
            }
        }

        let ctx = Self::context();
        let result = match eval_with_context(&expr, &ctx) {
            Ok(value) => value,
            Err(e) => {
                let msg = e.to_string();
                if msg.to_lowercase().contains("division") {
                    return ToolResult::fail(
                        "Error: division by zero",
                        "division_by_zero",
                    );
                }
                return ToolResult::fail(
                    format!("Calculation error: {msg}"),
                    error_kind::INVALID_INPUT,
                );
            }
        };

        let (text, numeric) = match result {
            EvalValue::Int(i) => (i.to_string(), i as f64),
            EvalValue::Float(f) => {
                if f.is_infinite() {
                    return ToolResult::fail("Error: division by zero", "division_by_zero");
                }
                if f.is_nan() {
                    return ToolResult::fail(
                        "Calculation error: result is undefined",
                        error_kind::INVALID_INPUT,
                    );
                }
                (format_number(f), f)
            }
            other => (other.to_string(), f64::NAN),
        };

        ToolResult::ok_with_data(
            format!("Result: {expression} = {text}"),
            serde_json::json!({"expression": expression, "result": numeric}),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(expr: &str) -> ToolResult {
        CalculatorTool
            .execute(serde_json::json!({"expression": expr}))
            .await
    }

    #[tokio::test]
    async fn basic_arithmetic() {
        let r = run("2+3*4").await;
        assert!(r.success);
        assert!(r.output.contains("= 14"));
    }

    #[tokio::test]
    async fn sqrt_plus_constant() {
        let r = run("sqrt(144)+3").await;
        assert!(r.success, "{:?}", r.output);
        assert!(r.output.contains("15"), "{}", r.output);
    }

    #[tokio::test]
    async fn two_argument_log() {
        let r = run("log(100, 10)").await;
        assert!(r.success, "{:?}", r.output);
        assert!(r.output.contains("= 2"), "{}", r.output);
    }

    #[tokio::test]
    async fn constants_are_available() {
        let r = run("cos(pi)").await;
        assert!(r.success);
        assert!(r.output.contains("-1"), "{}", r.output);
    }

    #[tokio::test]
    async fn unknown_identifier_is_rejected() {
        let r = run("__import__('os')").await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("invalid_identifier"));
    }

    #[tokio::test]
    async fn variables_are_rejected() {
        let r = run("x + 1").await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("invalid_identifier"));
    }

    #[tokio::test]
    async fn division_by_zero() {
        let r = run("1/0").await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("division_by_zero"));
    }

    #[tokio::test]
    async fn python_style_power_operator() {
        let r = run("2**10").await;
        assert!(r.success);
        assert!(r.output.contains("1024"), "{}", r.output);
    }

    #[tokio::test]
    async fn factorial_and_gcd() {
        let r = run("factorial(5)").await;
        assert!(r.success);
        assert!(r.output.contains("120"));

        let r = run("gcd(12, 18)").await;
        assert!(r.success);
        assert!(r.output.contains("= 6"), "{}", r.output);
    }

    #[tokio::test]
    async fn missing_expression_is_invalid_input() {
        let r = CalculatorTool.execute(serde_json::json!({})).await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("invalid_input"));
    }
}
