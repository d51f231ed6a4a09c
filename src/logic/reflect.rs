use serde_json::{Map, Value};

use crate::model::PathParams;

/// First reflection pass: descends through a generated value looking for
/// object ids and rewrites them with the values captured from the request
/// path. Displaced fixture ids are recorded on `path_params` so the second
/// pass can find any other occurrence of them.
///
/// At the top level only the primary id applies. Below it, an object's `id`
/// is rewritten when a secondary parameter's name matches either the
/// object's `object` field or the key the object is nested under; a plain
/// string field is rewritten when its key matches a secondary parameter's
/// name.
pub fn record_and_replace_ids(path_params: &mut PathParams, data: &mut Value) {
    record_internal(path_params, data, None, 0);
}

fn record_internal(
    path_params: &mut PathParams,
    data: &mut Value,
    parent_key: Option<&str>,
    depth: usize,
) {
    match data {
        Value::Array(items) => {
            for item in items {
                record_internal(path_params, item, None, depth + 1);
            }
        }
        Value::Object(map) => {
            let object_name = map
                .get("object")
                .and_then(Value::as_str)
                .map(str::to_string);
            let keys: Vec<String> = map.keys().cloned().collect();

            for key in keys {
                let is_string = matches!(map.get(&key), Some(Value::String(_)));
                if !is_string {
                    if let Some(child) = map.get_mut(&key) {
                        record_internal(path_params, child, Some(&key), depth + 1);
                    }
                    continue;
                }

                let old = map[&key].as_str().unwrap_or_default().to_string();

                if key == "id" {
                    if depth == 0 {
                        if let Some(primary) = path_params.primary_id.clone() {
                            path_params.replaced_primary_id = Some(old.clone());
                            map.insert("id".to_string(), Value::String(primary));
                        }
                        continue;
                    }

                    if let Some(object_name) = &object_name {
                        for secondary in path_params.secondary_ids.iter_mut() {
                            if object_name == &secondary.name {
                                secondary.append_replaced_id(&old);
                                map.insert("id".to_string(), Value::String(secondary.id.clone()));
                                break;
                            }
                        }
                    }
                    for secondary in path_params.secondary_ids.iter_mut() {
                        if parent_key == Some(secondary.name.as_str()) {
                            secondary.append_replaced_id(&old);
                            map.insert("id".to_string(), Value::String(secondary.id.clone()));
                            break;
                        }
                    }
                    continue;
                }

                // A field named after a secondary parameter holds that
                // entity's id even when the entity itself isn't embedded.
                for secondary in path_params.secondary_ids.iter_mut() {
                    if key == secondary.name {
                        secondary.append_replaced_id(&old);
                        map.insert(key.clone(), Value::String(secondary.id.clone()));
                        break;
                    }
                }
            }
        }
        _ => {}
    }
}

/// Second reflection pass: rewrites any remaining occurrence of a displaced
/// id. A string equal to a recorded id is replaced outright; a `url` field
/// additionally gets its first `/<old>/` path segment rewritten when no
/// exact match applied.
pub fn distribute_replaced_ids(path_params: &PathParams, data: &mut Value) {
    match data {
        Value::Array(items) => {
            for item in items {
                distribute_replaced_ids(path_params, item);
            }
        }
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(replacement) = distribute_in_value(path_params, map.get(&key)) {
                    map.insert(key, Value::String(replacement));
                    continue;
                }
                if key == "url" {
                    if let Some(replacement) = distribute_in_url(path_params, map.get(&key)) {
                        map.insert(key, Value::String(replacement));
                        continue;
                    }
                }
                if let Some(child) = map.get_mut(&key) {
                    distribute_replaced_ids(path_params, child);
                }
            }
        }
        _ => {}
    }
}

fn distribute_in_value(path_params: &PathParams, value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?;

    if let (Some(replaced), Some(primary)) = (
        &path_params.replaced_primary_id,
        &path_params.primary_id,
    ) {
        if s == replaced {
            return Some(primary.clone());
        }
    }

    for secondary in &path_params.secondary_ids {
        for replaced in &secondary.replaced_ids {
            if s == replaced {
                return Some(secondary.id.clone());
            }
        }
    }

    None
}

fn distribute_in_url(path_params: &PathParams, value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?;

    if let (Some(replaced), Some(primary)) = (
        &path_params.replaced_primary_id,
        &path_params.primary_id,
    ) {
        let search = format!("/{replaced}/");
        if s.contains(&search) {
            return Some(s.replacen(&search, &format!("/{primary}/"), 1));
        }
    }

    for secondary in &path_params.secondary_ids {
        for replaced in &secondary.replaced_ids {
            let search = format!("/{replaced}/");
            if s.contains(&search) {
                return Some(s.replacen(&search, &format!("/{}/", secondary.id), 1));
            }
        }
    }

    None
}

/// Overlays request-supplied values onto a generated response so create and
/// update calls echo their input. Only top-level keys are considered, and a
/// value is copied only when both sides hold the same primitive shape;
/// nested objects are never descended into.
pub fn reflect_request_data(request: &Map<String, Value>, response: &mut Map<String, Value>) {
    for (key, request_value) in request {
        let Some(response_value) = response.get(key) else {
            continue;
        };
        if values_compatible(request_value, response_value) {
            response.insert(key.clone(), request_value.clone());
        }
    }
}

fn values_compatible(request: &Value, response: &Value) -> bool {
    match (request, response) {
        (Value::String(_), Value::String(_))
        | (Value::Bool(_), Value::Bool(_))
        | (Value::Number(_), Value::Number(_)) => true,
        (Value::Array(request_items), Value::Array(response_items)) => {
            let Some(kind) = homogeneous_primitive_kind(request_items) else {
                return false;
            };
            response_items.is_empty()
                || homogeneous_primitive_kind(response_items) == Some(kind)
        }
        _ => false,
    }
}

#[derive(PartialEq, Clone, Copy)]
enum PrimitiveKind {
    Bool,
    Number,
    String,
}

fn homogeneous_primitive_kind(items: &[Value]) -> Option<PrimitiveKind> {
    let mut kind = None;
    for item in items {
        let item_kind = match item {
            Value::Bool(_) => PrimitiveKind::Bool,
            Value::Number(_) => PrimitiveKind::Number,
            Value::String(_) => PrimitiveKind::String,
            _ => return None,
        };
        match kind {
            None => kind = Some(item_kind),
            Some(existing) if existing == item_kind => {}
            Some(_) => return None,
        }
    }
    kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SecondaryId;
    use serde_json::json;

    fn reflect(path_params: &mut PathParams, data: &mut Value) {
        record_and_replace_ids(path_params, data);
        distribute_replaced_ids(path_params, data);
    }

    #[test]
    fn test_replaces_primary_id_at_top_level() {
        let mut params = PathParams {
            primary_id: Some("mp_abc".to_string()),
            ..PathParams::default()
        };
        let mut data = json!({"id": "mp_123", "name": "fixture"});

        reflect(&mut params, &mut data);

        assert_eq!(data["id"], "mp_abc");
        assert_eq!(params.replaced_primary_id.as_deref(), Some("mp_123"));
    }

    #[test]
    fn test_distributes_replaced_primary_id() {
        let mut params = PathParams {
            primary_id: Some("mp_abc".to_string()),
            ..PathParams::default()
        };
        let mut data = json!({
            "id": "mp_123",
            "related": {"profile_ref": "mp_123"},
        });

        reflect(&mut params, &mut data);

        assert_eq!(data["related"]["profile_ref"], "mp_abc");
    }

    #[test]
    fn test_replaces_embedded_id_by_object_field() {
        let mut params = PathParams {
            secondary_ids: vec![SecondaryId::new("charge", "ch_new")],
            ..PathParams::default()
        };
        let mut data = json!({
            "id": "re_123",
            "charge_details": {"id": "ch_old", "object": "charge"},
        });

        reflect(&mut params, &mut data);

        assert_eq!(data["charge_details"]["id"], "ch_new");
    }

    #[test]
    fn test_replaces_embedded_id_by_parent_key() {
        let mut params = PathParams {
            secondary_ids: vec![SecondaryId::new("charge", "ch_new")],
            ..PathParams::default()
        };
        let mut data = json!({
            "id": "re_123",
            "charge": {"id": "ch_old", "object": "other"},
        });

        reflect(&mut params, &mut data);

        assert_eq!(data["charge"]["id"], "ch_new");
    }

    #[test]
    fn test_replaces_string_field_named_after_secondary() {
        let mut params = PathParams {
            secondary_ids: vec![SecondaryId::new("fee", "fee_new")],
            ..PathParams::default()
        };
        let mut data = json!({"id": "fr_123", "fee": "fee_old"});

        reflect(&mut params, &mut data);

        assert_eq!(data["fee"], "fee_new");
        assert_eq!(
            params.secondary_ids[0].replaced_ids,
            vec!["fee_old".to_string()]
        );
    }

    #[test]
    fn test_rewrites_url_infix() {
        let mut params = PathParams {
            primary_id: Some("mp_abc".to_string()),
            ..PathParams::default()
        };
        let mut data = json!({
            "id": "mp_123",
            "numbers": {"url": "/v2/messaging_profiles/mp_123/phone_numbers"},
        });

        reflect(&mut params, &mut data);

        assert_eq!(
            data["numbers"]["url"],
            "/v2/messaging_profiles/mp_abc/phone_numbers"
        );
    }

    #[test]
    fn test_reflector_is_idempotent() {
        let mut params = PathParams {
            primary_id: Some("mp_abc".to_string()),
            secondary_ids: vec![SecondaryId::new("charge", "ch_new")],
            ..PathParams::default()
        };
        let mut data = json!({
            "id": "mp_123",
            "charge": {"id": "ch_old", "object": "charge"},
            "url": "/v2/things/mp_123/parts",
        });

        reflect(&mut params, &mut data);
        let once = data.clone();
        reflect(&mut params, &mut data);

        assert_eq!(data, once);
    }

    #[test]
    fn test_reflect_request_data_overlays_scalars() {
        let request = json!({"name": "foo", "enabled": false, "ignored": "x"});
        let mut response = json!({"name": "fixture", "enabled": true, "id": "mp_1"});

        reflect_request_data(
            request.as_object().unwrap(),
            response.as_object_mut().unwrap(),
        );

        assert_eq!(response["name"], "foo");
        assert_eq!(response["enabled"], false);
        assert_eq!(response["id"], "mp_1");
        assert!(response.get("ignored").is_none());
    }

    #[test]
    fn test_reflect_request_data_skips_incompatible_types() {
        let request = json!({"name": 42, "tags": ["a", 1]});
        let mut response = json!({"name": "fixture", "tags": ["x"]});

        reflect_request_data(
            request.as_object().unwrap(),
            response.as_object_mut().unwrap(),
        );

        assert_eq!(response["name"], "fixture");
        assert_eq!(response["tags"], json!(["x"]));
    }

    #[test]
    fn test_reflect_request_data_replaces_primitive_lists() {
        let request = json!({"tags": ["a", "b"]});
        let mut response = json!({"tags": []});

        reflect_request_data(
            request.as_object().unwrap(),
            response.as_object_mut().unwrap(),
        );

        assert_eq!(response["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_reflect_request_data_does_not_recurse() {
        let request = json!({"nested": {"name": "foo"}});
        let mut response = json!({"nested": {"name": "fixture"}});

        reflect_request_data(
            request.as_object().unwrap(),
            response.as_object_mut().unwrap(),
        );

        assert_eq!(response["nested"]["name"], "fixture");
    }
}
