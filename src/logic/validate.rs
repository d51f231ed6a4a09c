use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use serde_json::Value;

use crate::model::{
    ref_name, Schema, TYPE_ARRAY, TYPE_BOOLEAN, TYPE_INTEGER, TYPE_NUMBER, TYPE_OBJECT,
    TYPE_STRING,
};

/// Checks a decoded request payload against a schema. Only request data is
/// ever validated; generated responses are trusted.
///
/// Covers the documented subset: required fields, type checks, enum
/// membership, numeric bounds, string length and pattern, array items,
/// object properties, and anyOf/oneOf branch selection. Failures carry the
/// violated constraint in the message.
pub struct Validator<'a> {
    schemas: &'a HashMap<String, Schema>,
}

impl<'a> Validator<'a> {
    pub fn new(schemas: &'a HashMap<String, Schema>) -> Self {
        Validator { schemas }
    }

    pub fn validate(&self, schema: &Schema, data: &Value) -> Result<()> {
        self.check(schema, data, "")
    }

    fn resolve<'s>(&self, schema: &'s Schema) -> Result<&'s Schema>
    where
        'a: 's,
    {
        let Some(reference) = &schema.reference else {
            return Ok(schema);
        };
        self.schemas
            .get(ref_name(reference))
            .ok_or_else(|| anyhow!("unresolved $ref '{reference}' in #/components/schemas/"))
    }

    fn check(&self, schema: &Schema, data: &Value, path: &str) -> Result<()> {
        let schema = self.resolve(schema)?;

        for member in &schema.all_of {
            self.check(member, data, path)?;
        }

        // Null is acceptable only when the schema says so; otherwise it is
        // judged against the branch and type checks like any other value.
        if data.is_null() && schema.nullable {
            return Ok(());
        }

        if !schema.any_of.is_empty() {
            let matched = schema
                .any_of
                .iter()
                .any(|branch| self.check(branch, data, path).is_ok());
            if !matched {
                bail!("{}: value matches no `anyOf` variant", describe(path));
            }
        }

        if !schema.one_of.is_empty() {
            let matched = schema
                .one_of
                .iter()
                .any(|branch| self.check(branch, data, path).is_ok());
            if !matched {
                bail!("{}: value matches no `oneOf` variant", describe(path));
            }
        }

        if !schema.enum_values.is_empty() && !schema.enum_values.contains(data) {
            bail!(
                "{}: value {data} is not one of the allowed `enum` values",
                describe(path)
            );
        }

        if let Some(expected) = schema.schema_type.as_deref() {
            let ok = match expected {
                TYPE_ARRAY => data.is_array(),
                TYPE_BOOLEAN => data.is_boolean(),
                TYPE_INTEGER => data.is_i64() || data.is_u64(),
                TYPE_NUMBER => data.is_number(),
                TYPE_OBJECT => data.is_object(),
                TYPE_STRING => data.is_string(),
                other => bail!("{}: unsupported schema type `{other}`", describe(path)),
            };
            if !ok {
                bail!(
                    "{}: expected type `{expected}`, got {}",
                    describe(path),
                    type_name(data)
                );
            }
        }

        if let Some(s) = data.as_str() {
            let length = s.chars().count() as u64;
            if let Some(min) = schema.min_length {
                if length < min {
                    bail!(
                        "{}: string is shorter than `minLength` {min}",
                        describe(path)
                    );
                }
            }
            if let Some(max) = schema.max_length {
                if length > max {
                    bail!("{}: string is longer than `maxLength` {max}", describe(path));
                }
            }
            if let Some(pattern) = &schema.pattern {
                let re = Regex::new(pattern).map_err(|e| {
                    anyhow!("{}: invalid `pattern` {pattern:?}: {e}", describe(path))
                })?;
                if !re.is_match(s) {
                    bail!(
                        "{}: string does not match `pattern` {pattern:?}",
                        describe(path)
                    );
                }
            }
        }

        if let Some(n) = data.as_f64() {
            if let Some(min) = schema.minimum {
                if n < min {
                    bail!("{}: value {n} is below `minimum` {min}", describe(path));
                }
            }
            if let Some(max) = schema.maximum {
                if n > max {
                    bail!("{}: value {n} is above `maximum` {max}", describe(path));
                }
            }
        }

        if let Some(items) = data.as_array() {
            if let Some(item_schema) = &schema.items {
                for (index, item) in items.iter().enumerate() {
                    self.check(item_schema, item, &join_index(path, index))?;
                }
            }
        }

        if let Some(map) = data.as_object() {
            for name in &schema.required {
                if !map.contains_key(name) {
                    bail!("{}: missing required property `{name}`", describe(path));
                }
            }
            for (name, prop_schema) in &schema.properties {
                if let Some(prop_value) = map.get(name) {
                    self.check(prop_schema, prop_value, &join_key(path, name))?;
                }
            }
        }

        Ok(())
    }
}

fn describe(path: &str) -> String {
    if path.is_empty() {
        "request".to_string()
    } else {
        format!("`{path}`")
    }
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn join_index(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_from(value: Value) -> Schema {
        serde_json::from_value(value).unwrap()
    }

    fn validate(schema: &Schema, data: &Value) -> Result<()> {
        let schemas = HashMap::new();
        Validator::new(&schemas).validate(schema, data)
    }

    #[test]
    fn test_missing_required_property() {
        let schema = schema_from(json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"],
        }));

        let err = validate(&schema, &json!({})).unwrap_err().to_string();
        assert!(err.contains("missing required property `name`"), "{err}");
        assert!(validate(&schema, &json!({"name": "x"})).is_ok());
    }

    #[test]
    fn test_type_mismatch() {
        let schema = schema_from(json!({
            "type": "object",
            "properties": {"count": {"type": "integer"}},
        }));

        let err = validate(&schema, &json!({"count": "three"}))
            .unwrap_err()
            .to_string();
        assert!(err.contains("expected type `integer`"), "{err}");
    }

    #[test]
    fn test_integer_rejects_float() {
        let schema = schema_from(json!({"type": "integer"}));
        assert!(validate(&schema, &json!(2.5)).is_err());
        assert!(validate(&schema, &json!(2)).is_ok());
    }

    #[test]
    fn test_enum_membership() {
        let schema = schema_from(json!({"type": "string", "enum": ["on", "off"]}));
        assert!(validate(&schema, &json!("on")).is_ok());
        let err = validate(&schema, &json!("maybe")).unwrap_err().to_string();
        assert!(err.contains("enum"), "{err}");
    }

    #[test]
    fn test_numeric_bounds() {
        let schema = schema_from(json!({"type": "integer", "minimum": 1, "maximum": 10}));
        assert!(validate(&schema, &json!(5)).is_ok());
        assert!(validate(&schema, &json!(0)).is_err());
        assert!(validate(&schema, &json!(11)).is_err());
    }

    #[test]
    fn test_string_length_and_pattern() {
        let schema = schema_from(json!({
            "type": "string",
            "minLength": 2,
            "maxLength": 5,
            "pattern": "^[a-z]+$",
        }));
        assert!(validate(&schema, &json!("abc")).is_ok());
        assert!(validate(&schema, &json!("a")).is_err());
        assert!(validate(&schema, &json!("abcdef")).is_err());
        assert!(validate(&schema, &json!("ABC")).is_err());
    }

    #[test]
    fn test_array_items() {
        let schema = schema_from(json!({
            "type": "array",
            "items": {"type": "integer"},
        }));
        assert!(validate(&schema, &json!([1, 2])).is_ok());
        let err = validate(&schema, &json!([1, "x"])).unwrap_err().to_string();
        assert!(err.contains("[1]"), "{err}");
    }

    #[test]
    fn test_any_of_branch_selection() {
        let schema = schema_from(json!({
            "anyOf": [
                {"type": "string"},
                {"type": "integer"},
            ],
        }));
        assert!(validate(&schema, &json!("x")).is_ok());
        assert!(validate(&schema, &json!(3)).is_ok());
        assert!(validate(&schema, &json!(true)).is_err());
    }

    #[test]
    fn test_nullable() {
        let schema = schema_from(json!({"type": "string", "nullable": true}));
        assert!(validate(&schema, &Value::Null).is_ok());

        let strict = schema_from(json!({"type": "string"}));
        assert!(validate(&strict, &Value::Null).is_err());
    }

    #[test]
    fn test_null_is_judged_against_branches() {
        // A typeless anyOf schema rejects null unless a branch accepts it.
        let schema = schema_from(json!({
            "anyOf": [
                {"type": "string"},
                {"type": "integer"},
            ],
        }));
        let err = validate(&schema, &Value::Null).unwrap_err().to_string();
        assert!(err.contains("anyOf"), "{err}");

        let with_nullable_branch = schema_from(json!({
            "anyOf": [
                {"type": "string", "nullable": true},
            ],
        }));
        assert!(validate(&with_nullable_branch, &Value::Null).is_ok());

        let one_of = schema_from(json!({
            "oneOf": [
                {"type": "string"},
            ],
        }));
        assert!(validate(&one_of, &Value::Null).is_err());
    }

    #[test]
    fn test_resolves_refs() {
        let mut schemas = HashMap::new();
        schemas.insert("Name".to_string(), schema_from(json!({"type": "string"})));
        let schema = schema_from(json!({"$ref": "#/components/schemas/Name"}));

        let validator = Validator::new(&schemas);
        assert!(validator.validate(&schema, &json!("x")).is_ok());
        assert!(validator.validate(&schema, &json!(1)).is_err());
    }

    #[test]
    fn test_unknown_properties_tolerated() {
        // additionalProperties is outside the supported subset; unknown
        // keys such as `expand` pass through validation.
        let schema = schema_from(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {"name": {"type": "string"}},
        }));
        assert!(validate(&schema, &json!({"name": "x", "expand": "anything"})).is_ok());
    }
}
