use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Map, Value};

use crate::logic::reflect::{
    distribute_replaced_ids, record_and_replace_ids, reflect_request_data,
};
use crate::model::{
    ref_name, ExpansionLevel, Fixtures, PathParams, Schema, TYPE_ARRAY, TYPE_BOOLEAN,
    TYPE_INTEGER, TYPE_NUMBER, TYPE_OBJECT, TYPE_STRING,
};

/// Inputs for one generation run. The schema itself is passed separately;
/// everything here stays stable across recursion levels.
pub struct GenerateParams<'a> {
    /// Expansions requested for the top level of generation.
    pub expansions: Option<&'a ExpansionLevel>,
    /// Identifiers captured from the request path, reflected into the
    /// generated value in a post-processing step.
    pub path_params: Option<&'a mut PathParams>,
    /// Decoded request payload, reflected into POST/PATCH responses.
    pub request_data: &'a Map<String, Value>,
    pub request_method: &'a str,
    /// Used to populate the `url` of generated list envelopes.
    pub request_path: &'a str,
    /// Wrap the generated object in a one-element `data` list with `meta`.
    pub wrap_with_list: bool,
}

/// Produces example response data from a response schema, the component
/// schema table, and the fixture store.
pub struct DataGenerator<'a> {
    schemas: &'a HashMap<String, Schema>,
    fixtures: &'a Fixtures,
}

impl<'a> DataGenerator<'a> {
    pub fn new(schemas: &'a HashMap<String, Schema>, fixtures: &'a Fixtures) -> Self {
        DataGenerator { schemas, fixtures }
    }

    /// Generates the response envelope: `{"data": ...}` or, for list
    /// operations, `{"data": [...], "meta": ...}`.
    pub fn generate(
        &self,
        data_schema: &Schema,
        meta_schema: Option<&Schema>,
        params: GenerateParams<'_>,
    ) -> Result<Value> {
        let flattened = data_schema.flatten_all_of();
        let mut data = self.generate_internal(
            &flattened,
            params.expansions,
            data_schema.example.clone(),
            params.request_method,
            params.request_path,
        )?;

        let meta = match meta_schema {
            Some(schema) => self.generate_internal(
                &schema.flatten_all_of(),
                None,
                schema.example.clone(),
                params.request_method,
                params.request_path,
            )?,
            None => Value::Null,
        };

        if let Some(path_params) = params.path_params {
            // The record pass rewrites ids found in the generated value and
            // remembers the fixture ids it displaced; the distribute pass
            // then rewrites any further occurrence of those.
            record_and_replace_ids(path_params, &mut data);
            distribute_replaced_ids(path_params, &mut data);
        }

        if params.request_method == "POST" || params.request_method == "PATCH" {
            if let Value::Object(map) = &mut data {
                reflect_request_data(params.request_data, map);
            }
        }

        if params.wrap_with_list {
            Ok(json!({"data": [data], "meta": meta}))
        } else {
            Ok(json!({"data": data}))
        }
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

    fn generate_internal(
        &self,
        schema: &Schema,
        expansions: Option<&ExpansionLevel>,
        example: Option<Value>,
        method: &str,
        path: &str,
    ) -> Result<Value> {
        let schema = self.resolve(schema)?;

        if let (Some(levels), Some(expandable)) = (expansions, &schema.x_expandable_fields) {
            for key in levels.expansions.keys() {
                if !expandable.contains(key) {
                    bail!("expansion not supported for field `{key}`");
                }
            }
        }

        let mut example = example;
        if matches!(example, None | Some(Value::Null)) {
            if let Some(resource_id) = &schema.x_resource_id {
                // A caller-provided example wins over the fixture; with
                // none, the fixture is the canonical sample. Its absence is
                // a bug in the loaded assets, not a request error.
                let fixture = self
                    .fixtures
                    .resources
                    .get(resource_id)
                    .unwrap_or_else(|| panic!("missing fixture for resource '{resource_id}'"));
                example = Some(fixture.clone());
            }
        }

        if let Some(resources) = &schema.x_expansion_resources {
            if expansions.is_some() {
                let expanded = resources
                    .one_of
                    .first()
                    .ok_or_else(|| anyhow!("x-expansionResources has no oneOf alternative"))?;
                return self.generate_internal(expanded, expansions, None, method, path);
            }

            // Not expanding: the unexpanded form is the first anyOf branch.
            let unexpanded = schema
                .any_of
                .first()
                .ok_or_else(|| anyhow!("expandable field has no unexpanded anyOf form"))?;
            return self.generate_internal(unexpanded, expansions, example, method, path);
        }

        if schema.any_of.len() == 1 && schema.nullable {
            if matches!(example, Some(Value::Null)) {
                if expansions.is_none() {
                    return Ok(Value::Null);
                }
            } else {
                return self.generate_internal(
                    &schema.any_of[0],
                    expansions,
                    example,
                    method,
                    path,
                );
            }
        }

        if !schema.any_of.is_empty() {
            let branch = self.find_any_of_branch(schema, method == "DELETE")?;
            let branch = branch.unwrap_or(&schema.any_of[0]);
            // The example's branch is unknown, so it is discarded.
            return self.generate_internal(branch, expansions, None, method, path);
        }

        if !schema.one_of.is_empty() {
            return self.generate_internal(&schema.one_of[0], expansions, example, method, path);
        }

        if is_list_resource(schema) {
            return self.generate_list_resource(schema, expansions, example.as_ref(), method, path);
        }

        if example.is_none() && schema.x_resource_id.is_none() {
            example = Some(self.generate_synthetic_fixture(schema)?);
        }

        let Some(example) = example else {
            bail!("cannot find or generate an example for schema");
        };

        if example.is_null() {
            if expansions.is_some() {
                bail!("asked to expand a key whose example is null");
            }
            return Ok(Value::Null);
        }

        if !schema.enum_values.is_empty() {
            return Ok(example);
        }

        match schema.schema_type.as_deref() {
            Some(TYPE_BOOLEAN) | Some(TYPE_INTEGER) | Some(TYPE_NUMBER) | Some(TYPE_STRING) => {
                return Ok(example);
            }
            // A generic object with no declared properties can't contain
            // expandable fields or list envelopes.
            Some(TYPE_OBJECT) if schema.properties.is_empty() => return Ok(example),
            // Same for arrays outside a list envelope.
            Some(TYPE_ARRAY) => return Ok(example),
            _ => {}
        }

        if schema.schema_type.is_none() && schema.properties.is_empty() {
            return Ok(example);
        }

        if matches!(schema.schema_type.as_deref(), Some(TYPE_OBJECT) | None)
            && !schema.properties.is_empty()
        {
            let Value::Object(example_map) = &example else {
                bail!("schema is an object but its example is not");
            };

            let empty_level = ExpansionLevel::default();
            let mut result = Map::new();

            for (key, sub_schema) in &schema.properties {
                let sub_expansions = match expansions {
                    Some(levels) => match levels.expansions.get(key) {
                        Some(child) => Some(child),
                        // The wildcard covers keys not named explicitly.
                        None if levels.wildcard => Some(&empty_level),
                        None => None,
                    },
                    None => None,
                };

                let sub_example = example_map.get(key).cloned();
                if sub_example.is_none() && sub_expansions.is_none() {
                    // The example omitted this key, so the response does
                    // too, unless it has to be generated for an expansion.
                    continue;
                }

                let value =
                    self.generate_internal(sub_schema, sub_expansions, sub_example, method, path)?;
                result.insert(key.clone(), value);
            }

            return Ok(Value::Object(result));
        }

        bail!("unexpected schema shape reached during generation");
    }

    /// Finds the `anyOf` branch whose deletedness matches the request: a
    /// DELETE wants the branch carrying a `deleted` property, anything else
    /// wants one without it.
    fn find_any_of_branch<'s>(&self, schema: &'s Schema, deleted: bool) -> Result<Option<&'s Schema>>
    where
        'a: 's,
    {
        for branch in &schema.any_of {
            let branch = self.resolve(branch)?;
            if is_deleted_resource(branch) == deleted {
                return Ok(Some(branch));
            }
        }
        Ok(None)
    }

    /// Fills a list envelope with exactly one generated item and fixed
    /// values for the bookkeeping fields.
    fn generate_list_resource(
        &self,
        schema: &Schema,
        expansions: Option<&ExpansionLevel>,
        example: Option<&Value>,
        method: &str,
        path: &str,
    ) -> Result<Value> {
        let item_expansions = expansions.and_then(|levels| levels.expansions.get("data"));

        let item_schema = schema
            .properties
            .get("data")
            .and_then(|data| data.items.as_deref())
            .ok_or_else(|| anyhow!("list envelope `data` property has no items"))?;
        let item = self.generate_internal(item_schema, item_expansions, None, method, path)?;

        // Respect whatever properties the envelope schema declares rather
        // than assuming a fixed set.
        let mut list = Map::new();
        for (key, sub_schema) in &schema.properties {
            let value = match key.as_str() {
                "data" => Value::Array(vec![item.clone()]),
                "has_more" => Value::Bool(false),
                "object" => Value::String("list".to_string()),
                "total_count" => json!(1),
                "url" => {
                    if let Some(url) =
                        sub_schema.pattern.as_deref().and_then(|p| p.strip_prefix('^'))
                    {
                        // List URL patterns read "^/v2/whatevers"; cutting
                        // the anchor leaves the URL itself.
                        Value::String(url.to_string())
                    } else if let Some(url) =
                        example.and_then(|e| e.get("url")).and_then(Value::as_str)
                    {
                        Value::String(url.to_string())
                    } else {
                        Value::String(path.to_string())
                    }
                }
                _ => Value::Null,
            };
            list.insert(key.clone(), value);
        }

        Ok(Value::Object(list))
    }

    /// Builds a value from the schema alone, for objects that have no
    /// fixture: prerelease resources, or expansions of embedded objects
    /// that never occur at the top level of the API.
    fn generate_synthetic_fixture(&self, schema: &Schema) -> Result<Value> {
        if let Some(example) = &schema.example {
            return Ok(example.clone());
        }

        if schema.nullable {
            return Ok(Value::Null);
        }

        if schema.reference.is_some() {
            return self.generate_synthetic_fixture(self.resolve(schema)?);
        }

        // An enum member is likelier to be a realistic value than a zero
        // value for the type.
        if let Some(member) = schema.enum_values.first() {
            return Ok(member.clone());
        }

        if !schema.any_of.is_empty() {
            for branch in &schema.any_of {
                if branch.reference.is_some() {
                    continue;
                }
                return self.generate_synthetic_fixture(branch);
            }
            bail!("no usable anyOf branch for synthetic fixture");
        }

        match schema.schema_type.as_deref() {
            Some(TYPE_ARRAY) => Ok(json!([])),
            Some(TYPE_BOOLEAN) => Ok(Value::Bool(true)),
            Some(TYPE_INTEGER) => Ok(json!(0)),
            Some(TYPE_NUMBER) => Ok(json!(0.0)),
            Some(TYPE_OBJECT) => {
                let mut fixture = Map::new();
                for (name, sub_schema) in &schema.properties {
                    fixture.insert(name.clone(), self.generate_synthetic_fixture(sub_schema)?);
                }
                Ok(Value::Object(fixture))
            }
            Some(TYPE_STRING) => Ok(Value::String(String::new())),
            other => bail!(
                "unhandled type {} for synthetic fixture",
                other.unwrap_or("(empty)")
            ),
        }
    }
}

/// A schema is treated as a list envelope when it's an object whose
/// `object` property is an enum with first value "list" and whose `data`
/// property describes its items.
pub fn is_list_resource(schema: &Schema) -> bool {
    if schema.schema_type.as_deref() != Some(TYPE_OBJECT) || schema.properties.is_empty() {
        return false;
    }

    let Some(object) = schema.properties.get("object") else {
        return false;
    };
    if object.enum_values.first() != Some(&Value::String("list".to_string())) {
        return false;
    }

    match schema.properties.get("data") {
        Some(data) => data.items.is_some(),
        None => false,
    }
}

fn is_deleted_resource(schema: &Schema) -> bool {
    schema.properties.contains_key("deleted")
}
