//! Strict per-tool input schemas.
//!
//! Extra fields are forbidden, types are exact: money is a decimal (string
//! or number, parsed as such), symbols are charset-constrained uppercase,
//! enums are closed. A failed check is a VALIDATION_FAILED denial; nothing
//! downstream ever sees an unvalidated parameter object.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum FieldType {
    String,
    /// Uppercase ticker: `[A-Z][A-Z0-9.]{0,11}`.
    Symbol,
    Decimal,
    Integer,
    Boolean,
    Enum(&'static [&'static str]),
    Uuid,
    /// Structured payload validated downstream (e.g. an order intent, which
    /// deserializes with unknown-field rejection).
    Object,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub ty: FieldType,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(ty: FieldType) -> Self {
        Self { ty, required: true }
    }

    pub fn optional(ty: FieldType) -> Self {
        Self {
            ty,
            required: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolSchema {
    pub fields: BTreeMap<&'static str, FieldSpec>,
}

impl ToolSchema {
    pub fn new(fields: impl IntoIterator<Item = (&'static str, FieldSpec)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Validate a parameter object. Returns the first violation.
    pub fn validate(&self, params: &Value) -> Result<(), String> {
        let obj = params
            .as_object()
            .ok_or_else(|| "parameters must be a JSON object".to_string())?;

        for key in obj.keys() {
            if !self.fields.contains_key(key.as_str()) {
                return Err(format!("unknown field: {key}"));
            }
        }
        for (name, spec) in &self.fields {
            match obj.get(*name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(format!("missing required field: {name}"));
                    }
                }
                Some(value) => check_type(name, value, &spec.ty)?,
            }
        }
        Ok(())
    }
}

fn check_type(name: &str, value: &Value, ty: &FieldType) -> Result<(), String> {
    match ty {
        FieldType::String => {
            value
                .as_str()
                .ok_or_else(|| format!("{name} must be a string"))?;
            Ok(())
        }
        FieldType::Symbol => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("{name} must be a string"))?;
            if is_symbol(s) {
                Ok(())
            } else {
                Err(format!("{name} is not a valid symbol: {s:?}"))
            }
        }
        FieldType::Decimal => match value {
            Value::String(s) => s
                .parse::<Decimal>()
                .map(|_| ())
                .map_err(|_| format!("{name} is not a decimal: {s:?}")),
            Value::Number(_) => {
                let repr = value.to_string();
                repr.parse::<Decimal>()
                    .map(|_| ())
                    .map_err(|_| format!("{name} is not a representable decimal"))
            }
            _ => Err(format!("{name} must be a decimal")),
        },
        FieldType::Integer => {
            if value.as_u64().is_some() {
                Ok(())
            } else {
                Err(format!("{name} must be a non-negative integer"))
            }
        }
        FieldType::Boolean => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(format!("{name} must be a boolean"))
            }
        }
        FieldType::Enum(allowed) => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("{name} must be a string"))?;
            if allowed.contains(&s) {
                Ok(())
            } else {
                Err(format!("{name} must be one of {allowed:?}, got {s:?}"))
            }
        }
        FieldType::Uuid => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("{name} must be a string"))?;
            uuid::Uuid::parse_str(s)
                .map(|_| ())
                .map_err(|_| format!("{name} is not a UUID"))
        }
        FieldType::Object => {
            if value.is_object() {
                Ok(())
            } else {
                Err(format!("{name} must be an object"))
            }
        }
    }
}

/// `[A-Z][A-Z0-9.]{0,11}`: uppercase only, no lowercase normalization at
/// the gateway: the caller states exactly what it means.
fn is_symbol(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    s.len() <= 12
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.')
}

const TIMEFRAMES: &[&str] = &["1min", "5min", "15min", "30min", "1h", "1d"];
const SEC_TYPES: &[&str] = &["STK", "ETF", "FUT", "FX", "CRYPTO"];

/// The schema table for the production tool surface.
pub fn default_schemas() -> BTreeMap<&'static str, ToolSchema> {
    use FieldSpec as F;
    use FieldType::*;

    let mut m = BTreeMap::new();
    for tool in ["get_portfolio", "get_positions", "get_cash", "get_open_orders"] {
        m.insert(tool, ToolSchema::new([("account_id", F::required(String))]));
    }
    m.insert(
        "get_market_snapshot",
        ToolSchema::new([
            ("symbol", F::required(Symbol)),
            ("sec_type", F::optional(Enum(SEC_TYPES))),
            ("exchange", F::optional(String)),
            ("currency", F::optional(String)),
        ]),
    );
    m.insert(
        "get_market_bars",
        ToolSchema::new([
            ("symbol", F::required(Symbol)),
            ("timeframe", F::required(Enum(TIMEFRAMES))),
            ("limit", F::optional(Integer)),
        ]),
    );
    m.insert(
        "instrument_search",
        ToolSchema::new([
            ("q", F::optional(String)),
            ("type", F::optional(Enum(SEC_TYPES))),
            ("exchange", F::optional(String)),
            ("currency", F::optional(String)),
            ("limit", F::optional(Integer)),
        ]),
    );
    m.insert(
        "instrument_resolve",
        ToolSchema::new([
            ("con_id", F::optional(Integer)),
            ("symbol", F::optional(Symbol)),
        ]),
    );
    for tool in ["simulate_order", "evaluate_risk"] {
        m.insert(tool, ToolSchema::new([("intent", F::required(Object))]));
    }
    m.insert(
        "request_approval",
        ToolSchema::new([("intent", F::required(Object))]),
    );
    m.insert(
        "request_order_cancel",
        ToolSchema::new([
            ("broker_order_id", F::required(String)),
            ("reason", F::required(String)),
        ]),
    );
    m.insert(
        "request_order_modify",
        ToolSchema::new([
            ("broker_order_id", F::required(String)),
            ("quantity", F::optional(Decimal)),
            ("limit_price", F::optional(Decimal)),
            ("reason", F::required(String)),
        ]),
    );
    m
}
