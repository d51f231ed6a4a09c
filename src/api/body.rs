use anyhow::{bail, Result};
use serde_json::{Map, Value};

/// Decodes a query string into a JSON object. Bracket keys follow the
/// conventional form encoding: `page[number]=1` nests an object,
/// `ids[]=a&ids[]=b` collects an array, and a repeated bare key also
/// collects an array. Every leaf arrives as a string; the coercer turns
/// them into the types the operation asks for.
pub fn parse_query(query: &str) -> Map<String, Value> {
    let mut data = Map::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        insert_param(&mut data, &key, value.into_owned());
    }
    data
}

/// Decodes a request body into a JSON object. JSON bodies must hold a
/// top-level object; anything else is decoded as a form.
pub fn parse_body(content_type: &str, body: &[u8]) -> Result<Map<String, Value>> {
    if body.is_empty() {
        return Ok(Map::new());
    }

    if content_type == "application/json" {
        let value: Value = serde_json::from_slice(body)?;
        match value {
            Value::Object(map) => Ok(map),
            other => bail!("JSON body must be an object, got {other}"),
        }
    } else {
        let mut data = Map::new();
        for (key, value) in form_urlencoded::parse(body) {
            insert_param(&mut data, &key, value.into_owned());
        }
        Ok(data)
    }
}

fn insert_param(data: &mut Map<String, Value>, raw_key: &str, value: String) {
    if let Some((base, rest)) = raw_key.split_once('[') {
        if let Some(inner) = rest.strip_suffix(']') {
            if !base.is_empty() && inner.is_empty() {
                push_value(data, base, Value::String(value));
                return;
            }
            if !base.is_empty() && !inner.contains('[') {
                let entry = data
                    .entry(base.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(nested) = entry {
                    insert_flat(nested, inner, value);
                    return;
                }
            }
        }
    }

    insert_flat(data, raw_key, value);
}

fn insert_flat(data: &mut Map<String, Value>, key: &str, value: String) {
    match data.get_mut(key) {
        None => {
            data.insert(key.to_string(), Value::String(value));
        }
        // A repeated key turns the entry into an array.
        Some(Value::Array(items)) => items.push(Value::String(value)),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, Value::String(value)]);
        }
    }
}

fn push_value(data: &mut Map<String, Value>, key: &str, value: Value) {
    match data.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        _ => {
            data.insert(key.to_string(), Value::Array(vec![value]));
        }
    }
}
