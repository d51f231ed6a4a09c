use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::model::{ref_name, Parameter, Operation, Schema, PARAMETER_QUERY, TYPE_OBJECT};

/// Synthesizes an object schema from an operation's query parameters.
/// Unlike request bodies, OpenAPI keeps query parameters in a non-schema
/// part of the operation, so GET/DELETE validation needs this pseudo-schema
/// built for it.
pub fn build_query_schema(
    operation: &Operation,
    parameters: &HashMap<String, Parameter>,
) -> Result<Schema> {
    let mut schema = Schema {
        additional_properties: Some(Value::Bool(false)),
        schema_type: Some(TYPE_OBJECT.to_string()),
        ..Schema::default()
    };

    for param in &operation.parameters {
        let param = match &param.reference {
            Some(reference) => parameters
                .get(ref_name(reference))
                .ok_or_else(|| anyhow!("invalid $ref '{reference}'"))?,
            None => param,
        };

        if param.location != PARAMETER_QUERY {
            continue;
        }

        // A parameter without a schema is accepted permissively.
        let param_schema = param.schema.clone().unwrap_or(Schema {
            schema_type: Some(TYPE_OBJECT.to_string()),
            ..Schema::default()
        });
        schema.properties.insert(param.name.clone(), param_schema);

        if param.required {
            schema.required.push(param.name.clone());
        }
    }

    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PARAMETER_PATH, TYPE_STRING};

    fn query_param(name: &str, required: bool, schema: Option<Schema>) -> Parameter {
        Parameter {
            location: PARAMETER_QUERY.to_string(),
            name: name.to_string(),
            required,
            schema,
            reference: None,
        }
    }

    fn string_schema() -> Schema {
        Schema {
            schema_type: Some(TYPE_STRING.to_string()),
            ..Schema::default()
        }
    }

    #[test]
    fn test_build_query_schema() {
        let operation = Operation {
            parameters: vec![query_param("name", false, Some(string_schema()))],
            ..Operation::default()
        };

        let schema = build_query_schema(&operation, &HashMap::new()).unwrap();

        assert_eq!(schema.additional_properties, Some(Value::Bool(false)));
        assert_eq!(schema.properties.len(), 1);
        assert!(schema.required.is_empty());
        assert_eq!(
            schema.properties["name"].schema_type.as_deref(),
            Some(TYPE_STRING)
        );
    }

    #[test]
    fn test_skips_non_query_parameters() {
        let operation = Operation {
            parameters: vec![Parameter {
                location: PARAMETER_PATH.to_string(),
                name: "name".to_string(),
                required: false,
                schema: None,
                reference: None,
            }],
            ..Operation::default()
        };

        let schema = build_query_schema(&operation, &HashMap::new()).unwrap();
        assert!(schema.properties.is_empty());
    }

    #[test]
    fn test_required_parameter() {
        let operation = Operation {
            parameters: vec![query_param("name", true, Some(string_schema()))],
            ..Operation::default()
        };

        let schema = build_query_schema(&operation, &HashMap::new()).unwrap();
        assert_eq!(schema.required, vec!["name".to_string()]);
    }

    #[test]
    fn test_parameter_without_schema_is_permissive() {
        let operation = Operation {
            parameters: vec![query_param("name", false, None)],
            ..Operation::default()
        };

        let schema = build_query_schema(&operation, &HashMap::new()).unwrap();
        assert_eq!(
            schema.properties["name"].schema_type.as_deref(),
            Some(TYPE_OBJECT)
        );
    }

    #[test]
    fn test_ref_parameter_resolves() {
        let operation = Operation {
            parameters: vec![Parameter {
                location: String::new(),
                name: String::new(),
                required: false,
                schema: None,
                reference: Some("#/components/parameters/PageNum".to_string()),
            }],
            ..Operation::default()
        };

        let mut parameters = HashMap::new();
        parameters.insert(
            "PageNum".to_string(),
            query_param("page", false, Some(string_schema())),
        );

        let schema = build_query_schema(&operation, &parameters).unwrap();
        assert_eq!(schema.properties.len(), 1);
        assert!(schema.properties.contains_key("page"));
    }

    #[test]
    fn test_broken_ref_parameter_errors() {
        let operation = Operation {
            parameters: vec![Parameter {
                location: String::new(),
                name: String::new(),
                required: false,
                schema: None,
                reference: Some("#/components/parameters/PageNum".to_string()),
            }],
            ..Operation::default()
        };

        assert!(build_query_schema(&operation, &HashMap::new()).is_err());
    }
}
