//! Unit converter: length, weight and data sizes go through a base unit;
//! temperature uses the affine formulas.

use serde_json::Value;

use cl_domain::tool::{error_kind, ToolResult};

use crate::registry::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Length,
    Weight,
    Data,
}

/// (unit, factor-to-base, category). Base units: metre, gram, byte.
const CONVERSIONS: &[(&str, f64, Category)] = &[
    ("m", 1.0, Category::Length),
    ("km", 1000.0, Category::Length),
    ("cm", 0.01, Category::Length),
    ("mm", 0.001, Category::Length),
    ("mile", 1609.344, Category::Length),
    ("yard", 0.9144, Category::Length),
    ("foot", 0.3048, Category::Length),
    ("inch", 0.0254, Category::Length),
    ("g", 1.0, Category::Weight),
    ("kg", 1000.0, Category::Weight),
    ("mg", 0.001, Category::Weight),
    ("ton", 1_000_000.0, Category::Weight),
    ("lb", 453.592, Category::Weight),
    ("oz", 28.3495, Category::Weight),
    ("B", 1.0, Category::Data),
    ("KB", 1024.0, Category::Data),
    ("MB", 1048576.0, Category::Data),
    ("GB", 1073741824.0, Category::Data),
    ("TB", 1099511627776.0, Category::Data),
    ("byte", 1.0, Category::Data),
    ("bit", 0.125, Category::Data),
];

fn lookup(unit: &str) -> Option<(f64, Category)> {
    CONVERSIONS
        .iter()
        .find(|(name, _, _)| *name == unit)
        .map(|(_, factor, cat)| (*factor, *cat))
}

fn is_celsius(unit: &str) -> bool {
    matches!(unit.to_lowercase().as_str(), "celsius" | "c")
}

fn is_fahrenheit(unit: &str) -> bool {
    matches!(unit.to_lowercase().as_str(), "fahrenheit" | "f")
}

/// Up to six significant decimals, trailing zeros trimmed.
fn fmt_result(v: f64) -> String {
    let s = format!("{v:.6}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

pub struct UnitConverterTool;

#[async_trait::async_trait]
impl Tool for UnitConverterTool {
    fn name(&self) -> &str {
        "unit_converter"
    }

    fn description(&self) -> &str {
        "Convert between common units: length, weight, temperature, and \
         data sizes."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "value": {"type": "number", "description": "the value to convert"},
                "from_unit": {
                    "type": "string",
                    "description": "source unit, e.g. 'km', 'mile', 'kg', 'lb', 'celsius', 'GB'"
                },
                "to_unit": {"type": "string", "description": "target unit"},
            },
            "required": ["value", "from_unit", "to_unit"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(value) = args.get("value").and_then(Value::as_f64) else {
            return ToolResult::fail("Missing numeric 'value' argument", error_kind::INVALID_INPUT);
        };
        let Some(from_unit) = args.get("from_unit").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'from_unit' argument", error_kind::INVALID_INPUT);
        };
        let Some(to_unit) = args.get("to_unit").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'to_unit' argument", error_kind::INVALID_INPUT);
        };

        let data = |result: f64| {
            serde_json::json!({
                "value": value,
                "from": from_unit,
                "to": to_unit,
                "result": result,
            })
        };

        // Temperature is affine, not multiplicative.
        if is_celsius(from_unit) && is_fahrenheit(to_unit) {
            let result = value * 9.0 / 5.0 + 32.0;
            return ToolResult::ok_with_data(
                format!("{value}\u{b0}C = {:.2}\u{b0}F", result),
                data(result),
            );
        }
        if is_fahrenheit(from_unit) && is_celsius(to_unit) {
            let result = (value - 32.0) * 5.0 / 9.0;
            return ToolResult::ok_with_data(
                format!("{value}\u{b0}F = {:.2}\u{b0}C", result),
                data(result),
            );
        }

        let Some((from_factor, from_cat)) = lookup(from_unit) else {
            return ToolResult::fail(
                format!("Unsupported source unit: {from_unit}"),
                "unsupported_unit",
            );
        };
        let Some((to_factor, to_cat)) = lookup(to_unit) else {
            return ToolResult::fail(
                format!("Unsupported target unit: {to_unit}"),
                "unsupported_unit",
            );
        };

        if from_cat != to_cat {
            return ToolResult::fail(
                format!(
                    "Cannot convert between unit categories: {from_unit} ({from_cat:?}) -> {to_unit} ({to_cat:?})"
                ),
                "category_mismatch",
            );
        }

        let result = value * from_factor / to_factor;
        ToolResult::ok_with_data(
            format!("{value} {from_unit} = {} {to_unit}", fmt_result(result)),
            data(result),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn convert(value: f64, from: &str, to: &str) -> ToolResult {
        UnitConverterTool
            .execute(serde_json::json!({"value": value, "from_unit": from, "to_unit": to}))
            .await
    }

    #[tokio::test]
    async fn km_to_mile() {
        let r = convert(10.0, "km", "mile").await;
        assert!(r.success);
        let result = r.data.unwrap()["result"].as_f64().unwrap();
        assert!((result - 6.213712).abs() < 1e-4);
    }

    #[tokio::test]
    async fn celsius_to_fahrenheit() {
        let r = convert(100.0, "celsius", "fahrenheit").await;
        assert!(r.success);
        assert_eq!(r.data.unwrap()["result"].as_f64().unwrap(), 212.0);
    }

    #[tokio::test]
    async fn fahrenheit_to_celsius_case_insensitive() {
        let r = convert(32.0, "F", "C").await;
        assert!(r.success);
        assert_eq!(r.data.unwrap()["result"].as_f64().unwrap(), 0.0);
    }

    #[tokio::test]
    async fn data_sizes_use_1024() {
        let r = convert(1.0, "GB", "MB").await;
        assert!(r.success);
        assert_eq!(r.data.unwrap()["result"].as_f64().unwrap(), 1024.0);
    }

    #[tokio::test]
    async fn cross_category_is_rejected() {
        let r = convert(1.0, "kg", "km").await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("category_mismatch"));
    }

    #[tokio::test]
    async fn unknown_unit_is_rejected() {
        let r = convert(1.0, "parsec", "km").await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("unsupported_unit"));
    }
}
