use anyhow::Result;
use serde_json::{Number, Value};

use crate::model::{
    Schema, TYPE_ARRAY, TYPE_BOOLEAN, TYPE_INTEGER, TYPE_NUMBER, TYPE_OBJECT,
};

/// Best-effort conversion of string-encoded request values into the types a
/// schema asks for. Query strings and form bodies arrive with every leaf as
/// a string, so numbers and booleans need coercing before validation.
///
/// Coercion never rejects a value: anything that can't be converted is left
/// untouched for the validator to report.
pub struct Coercer;

impl Coercer {
    pub fn coerce_params(schema: &Schema, data: &mut Value) -> Result<()> {
        Self::coerce_value(schema, data);
        Ok(())
    }

    fn coerce_value(schema: &Schema, value: &mut Value) {
        match schema.schema_type.as_deref() {
            Some(TYPE_BOOLEAN) => {
                if let Value::String(s) = value {
                    match s.as_str() {
                        "true" => *value = Value::Bool(true),
                        "false" => *value = Value::Bool(false),
                        _ => {}
                    }
                }
            }
            Some(TYPE_INTEGER) => {
                if let Value::String(s) = value {
                    if let Ok(n) = s.parse::<i64>() {
                        *value = Value::Number(Number::from(n));
                    }
                }
            }
            Some(TYPE_NUMBER) => {
                if let Value::String(s) = value {
                    if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
                        *value = Value::Number(n);
                    }
                }
            }
            Some(TYPE_ARRAY) => {
                if !value.is_array() {
                    // A singleton becomes a one-element list.
                    let element = value.take();
                    *value = Value::Array(vec![element]);
                }
                if let (Value::Array(items), Some(item_schema)) = (&mut *value, &schema.items) {
                    for item in items {
                        Self::coerce_value(item_schema, item);
                    }
                }
            }
            Some(TYPE_OBJECT) | None => {
                if let Value::Object(map) = value {
                    for (name, prop_schema) in &schema.properties {
                        if let Some(prop_value) = map.get_mut(name) {
                            Self::coerce_value(prop_schema, prop_value);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}
