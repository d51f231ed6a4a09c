use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Top-level schema fields we either handle or know are safe to ignore. A
/// field outside this list makes the loader fail so that document drift is
/// caught at startup instead of surfacing as a half-generated response.
const SUPPORTED_SCHEMA_FIELDS: &[&str] = &[
    "$ref",
    "additionalProperties",
    "allOf",
    "anyOf",
    "oneOf",
    "description",
    "discriminator",
    "enum",
    "example",
    "format",
    "items",
    "maxLength",
    "minLength",
    "maximum",
    "minimum",
    "default",
    "nullable",
    "pattern",
    "properties",
    "required",
    "title",
    "type",
    "readOnly",
    "writeOnly",
    "x-expandableFields",
    "x-expansionResources",
    "x-resourceId",
    "x-enum-descriptions",
    "x-enum-varnames",
];

pub const TYPE_ARRAY: &str = "array";
pub const TYPE_BOOLEAN: &str = "boolean";
pub const TYPE_INTEGER: &str = "integer";
pub const TYPE_NUMBER: &str = "number";
pub const TYPE_OBJECT: &str = "object";
pub const TYPE_STRING: &str = "string";

pub const PARAMETER_PATH: &str = "path";
pub const PARAMETER_QUERY: &str = "query";

/// A JSON schema as it appears in the OpenAPI document, restricted to the
/// subset of keywords the generator and validator understand.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    #[serde(rename = "additionalProperties", skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Value>,
    #[serde(rename = "allOf", skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<Schema>,
    #[serde(rename = "anyOf", skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<Schema>,
    #[serde(rename = "oneOf", skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<Schema>,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Schema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    /// Location of the actual definition when this schema is a JSON
    /// reference. Resolved lazily on every traversal so that cyclic
    /// resource definitions stay representable.
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "x-expandableFields", skip_serializing_if = "Option::is_none")]
    pub x_expandable_fields: Option<Vec<String>>,
    #[serde(rename = "x-expansionResources", skip_serializing_if = "Option::is_none")]
    pub x_expansion_resources: Option<Box<ExpansionResources>>,
    #[serde(rename = "x-resourceId", skip_serializing_if = "Option::is_none")]
    pub x_resource_id: Option<String>,
}

/// Mirror of `Schema` used only during deserialization, after the field
/// allowlist has been checked.
#[derive(Debug, Default, Deserialize)]
struct RawSchema {
    #[serde(rename = "additionalProperties")]
    additional_properties: Option<Value>,
    #[serde(rename = "allOf", default)]
    all_of: Vec<Schema>,
    #[serde(rename = "anyOf", default)]
    any_of: Vec<Schema>,
    #[serde(rename = "oneOf", default)]
    one_of: Vec<Schema>,
    #[serde(rename = "enum", default)]
    enum_values: Vec<Value>,
    format: Option<String>,
    items: Option<Box<Schema>>,
    #[serde(rename = "maxLength")]
    max_length: Option<u64>,
    #[serde(rename = "minLength")]
    min_length: Option<u64>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    #[serde(default)]
    nullable: bool,
    example: Option<Value>,
    pattern: Option<String>,
    #[serde(default)]
    properties: HashMap<String, Schema>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(rename = "type")]
    schema_type: Option<String>,
    #[serde(rename = "$ref")]
    reference: Option<String>,
    #[serde(rename = "x-expandableFields")]
    x_expandable_fields: Option<Vec<String>>,
    #[serde(rename = "x-expansionResources")]
    x_expansion_resources: Option<Box<ExpansionResources>>,
    #[serde(rename = "x-resourceId")]
    x_resource_id: Option<String>,
}

impl From<RawSchema> for Schema {
    fn from(raw: RawSchema) -> Self {
        Schema {
            additional_properties: raw.additional_properties,
            all_of: raw.all_of,
            any_of: raw.any_of,
            one_of: raw.one_of,
            enum_values: raw.enum_values,
            format: raw.format,
            items: raw.items,
            max_length: raw.max_length,
            min_length: raw.min_length,
            minimum: raw.minimum,
            maximum: raw.maximum,
            nullable: raw.nullable,
            example: raw.example,
            pattern: raw.pattern,
            properties: raw.properties,
            required: raw.required,
            schema_type: raw.schema_type,
            reference: raw.reference,
            x_expandable_fields: raw.x_expandable_fields,
            x_expansion_resources: raw.x_expansion_resources,
            x_resource_id: raw.x_resource_id,
        }
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fields = serde_json::Map::deserialize(deserializer)?;
        for key in fields.keys() {
            if !SUPPORTED_SCHEMA_FIELDS.contains(&key.as_str()) {
                return Err(serde::de::Error::custom(format!(
                    "unsupported field in JSON schema: '{key}'"
                )));
            }
        }

        let raw: RawSchema =
            serde_json::from_value(Value::Object(fields)).map_err(serde::de::Error::custom)?;
        Ok(raw.into())
    }
}

impl Schema {
    /// Returns a schema equivalent to the deep union of this schema and
    /// every member of its `allOf`, recursively. Scalar fields keep the
    /// first non-empty value encountered; `properties` are merged by key
    /// union, with same-key schemas merged recursively so that `allOf`
    /// members supplement rather than replace each other. The receiver is
    /// left untouched.
    pub fn flatten_all_of(&self) -> Schema {
        fn fold(out: &mut Schema, input: &Schema) {
            merge_into(out, input);
            for member in &input.all_of {
                fold(out, member);
            }
        }

        let mut out = Schema::default();
        fold(&mut out, self);
        out
    }
}

/// Field-wise merge that fills empty slots in `out` from `src`. `allOf` is
/// intentionally not carried over.
fn merge_into(out: &mut Schema, src: &Schema) {
    if out.additional_properties.is_none() {
        out.additional_properties = src.additional_properties.clone();
    }
    if out.any_of.is_empty() {
        out.any_of = src.any_of.clone();
    }
    if out.one_of.is_empty() {
        out.one_of = src.one_of.clone();
    }
    if out.enum_values.is_empty() {
        out.enum_values = src.enum_values.clone();
    }
    if out.format.is_none() {
        out.format = src.format.clone();
    }
    match (&mut out.items, &src.items) {
        (Some(existing), Some(incoming)) => merge_into(existing, incoming),
        (None, Some(incoming)) => out.items = Some(incoming.clone()),
        _ => {}
    }
    if out.max_length.is_none() {
        out.max_length = src.max_length;
    }
    if out.min_length.is_none() {
        out.min_length = src.min_length;
    }
    if out.minimum.is_none() {
        out.minimum = src.minimum;
    }
    if out.maximum.is_none() {
        out.maximum = src.maximum;
    }
    if !out.nullable {
        out.nullable = src.nullable;
    }
    if out.example.is_none() {
        out.example = src.example.clone();
    }
    if out.pattern.is_none() {
        out.pattern = src.pattern.clone();
    }
    for (name, schema) in &src.properties {
        match out.properties.get_mut(name) {
            Some(existing) => merge_into(existing, schema),
            None => {
                out.properties.insert(name.clone(), schema.clone());
            }
        }
    }
    for name in &src.required {
        if !out.required.contains(name) {
            out.required.push(name.clone());
        }
    }
    if out.schema_type.is_none() {
        out.schema_type = src.schema_type.clone();
    }
    if out.reference.is_none() {
        out.reference = src.reference.clone();
    }
    if out.x_expandable_fields.is_none() {
        out.x_expandable_fields = src.x_expandable_fields.clone();
    }
    if out.x_expansion_resources.is_none() {
        out.x_expansion_resources = src.x_expansion_resources.clone();
    }
    if out.x_resource_id.is_none() {
        out.x_resource_id = src.x_resource_id.clone();
    }
}

/// Alternative schemas to substitute for a field when the client asks for
/// it to be expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionResources {
    #[serde(rename = "oneOf", default)]
    pub one_of: Vec<Schema>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Components {
    #[serde(default)]
    pub schemas: HashMap<String, Schema>,
    #[serde(default)]
    pub parameters: HashMap<String, Parameter>,
    #[serde(default)]
    pub responses: HashMap<String, Response>,
}

impl Components {
    /// Follows a schema's `$ref` into `components/schemas`. A schema
    /// without a reference is returned as-is.
    pub fn resolve_schema_ref<'a>(&'a self, schema: &'a Schema) -> Result<&'a Schema> {
        let Some(reference) = &schema.reference else {
            return Ok(schema);
        };
        let name = ref_name(reference);
        self.schemas
            .get(name)
            .ok_or_else(|| anyhow!("unresolved $ref '{reference}' in #/components/schemas/"))
    }

    /// Follows a response's `$ref` into `components/responses`.
    pub fn resolve_response_ref<'a>(&'a self, response: &'a Response) -> Result<&'a Response> {
        let Some(reference) = &response.reference else {
            return Ok(response);
        };
        let name = ref_name(reference);
        self.responses
            .get(name)
            .ok_or_else(|| anyhow!("unresolved $ref '{reference}' in #/components/responses/"))
    }
}

/// The component name a JSON pointer refers to: the suffix after the last
/// slash.
pub fn ref_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "in", default)]
    pub location: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaType {
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(default)]
    pub content: HashMap<String, MediaType>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(rename = "requestBody", skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
    #[serde(default)]
    pub responses: HashMap<String, Response>,
}

impl Operation {
    /// The single declared request media type and its schema, if the
    /// operation takes a body. Every operation is expected to declare at
    /// most one media type.
    pub fn request_body_schema(&self) -> Option<(&String, Option<&Schema>)> {
        let body = self.request_body.as_ref()?;
        body.content
            .iter()
            .next()
            .map(|(media_type, content)| (media_type, content.schema.as_ref()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub content: HashMap<String, MediaType>,
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// The OpenAPI document, reduced to the two sections the mock consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default)]
    pub components: Components,
    #[serde(default)]
    pub paths: HashMap<String, HashMap<String, Operation>>,
}

impl Spec {
    pub fn from_json_str(raw: &str) -> Result<Spec> {
        let spec: Spec = serde_json::from_str(raw)?;
        Ok(spec)
    }

    /// Replaces every request-body schema by its `flatten_all_of` form so
    /// that per-request validation never has to deal with `allOf`.
    pub fn flatten(&mut self) {
        for verbs in self.paths.values_mut() {
            for operation in verbs.values_mut() {
                let Some(body) = operation.request_body.as_mut() else {
                    continue;
                };
                for media in body.content.values_mut() {
                    if let Some(schema) = &media.schema {
                        media.schema = Some(schema.flatten_all_of());
                    }
                }
            }
        }
    }
}

/// Canonical example values keyed by the `x-resourceId` they belong to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub resources: HashMap<String, Value>,
}

impl Fixtures {
    pub fn from_json_str(raw: &str) -> Result<Fixtures> {
        let fixtures: Fixtures = serde_json::from_str(raw)?;
        Ok(fixtures)
    }
}
