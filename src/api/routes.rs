use std::collections::HashMap;

use anyhow::{Context, Result};
use regex::Regex;

use crate::logic::build_query_schema;
use crate::model::{Operation, PathParams, Schema, SecondaryId, Spec};

/// Path prefix recognized in front of every route.
pub const API_PREFIX: &str = "/v2";

/// Suffixes that mark a route as acting on a specific object, so its last
/// path parameter is the primary id. The action suffixes don't take the
/// standard `{...}` form but still carry the object's id right before them.
/// This list is part of the external contract; keep it stable.
const PRIMARY_ID_SUFFIXES: &[&str] = &[
    "}",
    "/approve",
    "/capture",
    "/cancel",
    "/close",
    "/decline",
    "/finalize",
    "/mark_uncollectible",
    "/pay",
    "/refund",
    "/reject",
    "/send",
    "/verify",
    "/void",
];

/// One compiled (verb, path) pair from the OpenAPI document.
#[derive(Debug, Clone)]
pub struct Route {
    pub has_primary_id: bool,
    pub pattern: Regex,
    pub path_param_names: Vec<String>,
    pub operation: Operation,
    /// Media type of the declared request body, if the operation takes one.
    pub request_media_type: Option<String>,
    /// Schema requests are validated against: the query pseudo-schema for
    /// GET/DELETE, the (flattened) body schema otherwise.
    pub request_schema: Option<Schema>,
}

/// Routing table keyed by uppercase HTTP verb. Routes per verb are ordered
/// by ascending parameter count so that static paths win over templated
/// ones sharing a prefix, e.g. `/v1/invoices/upcoming` over
/// `/v1/invoices/{id}`.
#[derive(Debug, Default)]
pub struct StubRouter {
    routes: HashMap<String, Vec<Route>>,
}

impl StubRouter {
    pub fn from_spec(spec: &Spec) -> Result<StubRouter> {
        let mut routes: HashMap<String, Vec<Route>> = HashMap::new();

        for (path, verbs) in &spec.paths {
            let (pattern, path_param_names) =
                compile_path(path).with_context(|| format!("compiling path '{path}'"))?;

            for (verb, operation) in verbs {
                // GET and DELETE carry parameters in the query string, so
                // their validator schema is synthesized from the declared
                // query parameters. Everything else validates the body.
                let (request_media_type, request_schema) = match verb.as_str() {
                    "get" | "delete" => (
                        None,
                        Some(build_query_schema(
                            operation,
                            &spec.components.parameters,
                        )?),
                    ),
                    _ => match operation.request_body_schema() {
                        Some((media_type, schema)) => {
                            (Some(media_type.clone()), schema.cloned())
                        }
                        None => (None, None),
                    },
                };

                let has_primary_id = PRIMARY_ID_SUFFIXES
                    .iter()
                    .any(|suffix| path.ends_with(suffix));

                routes.entry(verb.to_uppercase()).or_default().push(Route {
                    has_primary_id,
                    pattern: pattern.clone(),
                    path_param_names: path_param_names.clone(),
                    operation: operation.clone(),
                    request_media_type,
                    request_schema,
                });
            }
        }

        for verb_routes in routes.values_mut() {
            verb_routes.sort_by_key(|route| route.path_param_names.len());
        }

        Ok(StubRouter { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches a request to the first matching route for its verb and
    /// extracts the path parameters. `None` if the path lacks the API
    /// prefix or nothing matches.
    pub fn route(&self, method: &str, path: &str) -> Option<(&Route, Option<PathParams>)> {
        let (_, remainder) = path.split_once(API_PREFIX)?;
        let verb_routes = self.routes.get(method)?;

        for route in verb_routes {
            let Some(captures) = route.pattern.captures(remainder) else {
                continue;
            };

            if route.path_param_names.is_empty() {
                return Some((route, None));
            }

            // Secondary ids are every captured id except the primary one;
            // without a primary, all captures are secondary.
            let num_secondary = if route.has_primary_id {
                route.path_param_names.len() - 1
            } else {
                route.path_param_names.len()
            };

            let secondary_ids = (0..num_secondary)
                .map(|i| {
                    SecondaryId::new(
                        route.path_param_names[i].clone(),
                        captures.get(i + 1).map_or("", |m| m.as_str()),
                    )
                })
                .collect();

            let primary_id = route.has_primary_id.then(|| {
                captures
                    .get(route.path_param_names.len())
                    .map_or("", |m| m.as_str())
                    .to_string()
            });

            return Some((
                route,
                Some(PathParams {
                    primary_id,
                    secondary_ids,
                    replaced_primary_id: None,
                }),
            ));
        }

        None
    }
}

/// Compiles a path template into an anchored match pattern plus the ordered
/// parameter names. Literal segments match verbatim; each `{name}` segment
/// matches one or more characters other than `.`, `/` and `?`. Empty
/// segments are skipped.
pub fn compile_path(path: &str) -> Result<(Regex, Vec<String>)> {
    let parameter = Regex::new(r"\{(\w+)\}")?;

    let mut pattern = String::from(r"\A");
    let mut path_param_names = Vec::new();

    for part in path.split('/') {
        if part.is_empty() {
            continue;
        }

        match parameter.captures(part) {
            Some(captures) => {
                pattern.push_str(r"/([^./?]+)");
                path_param_names.push(captures[1].to_string());
            }
            None => {
                pattern.push('/');
                pattern.push_str(&regex::escape(part));
            }
        }
    }

    pattern.push_str(r"\z");
    Ok((Regex::new(&pattern)?, path_param_names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_from(value: serde_json::Value) -> Spec {
        serde_json::from_value(value).unwrap()
    }

    fn operation() -> serde_json::Value {
        json!({"responses": {}})
    }

    #[test]
    fn test_compile_path_literals_and_params() {
        let (pattern, names) =
            compile_path("/messaging_profiles/{id}/phone_numbers").unwrap();

        assert_eq!(names, vec!["id".to_string()]);
        let captures = pattern.captures("/messaging_profiles/mp_123/phone_numbers").unwrap();
        assert_eq!(&captures[1], "mp_123");

        assert!(pattern.captures("/messaging_profiles/mp_123").is_none());
        assert!(pattern
            .captures("/messaging_profiles/mp.123/phone_numbers")
            .is_none());
    }

    #[test]
    fn test_compile_path_skips_empty_segments() {
        let (pattern, names) = compile_path("//widgets/{id}").unwrap();
        assert_eq!(names, vec!["id".to_string()]);
        assert!(pattern.is_match("/widgets/w_1"));
    }

    #[test]
    fn test_static_route_beats_templated_route() {
        let spec = spec_from(json!({
            "components": {},
            "paths": {
                "/invoices/{id}": {"get": operation()},
                "/invoices/upcoming": {"get": operation()},
            },
        }));
        let router = StubRouter::from_spec(&spec).unwrap();

        let (route, params) = router.route("GET", "/v2/invoices/upcoming").unwrap();
        assert!(route.path_param_names.is_empty());
        assert!(params.is_none());

        let (route, params) = router.route("GET", "/v2/invoices/in_123").unwrap();
        assert_eq!(route.path_param_names, vec!["id".to_string()]);
        assert_eq!(params.unwrap().primary_id.as_deref(), Some("in_123"));
    }

    #[test]
    fn test_route_extracts_primary_and_secondary_ids() {
        let spec = spec_from(json!({
            "components": {},
            "paths": {
                "/profiles/{profile_id}/numbers/{id}": {"get": operation()},
            },
        }));
        let router = StubRouter::from_spec(&spec).unwrap();

        let (route, params) = router
            .route("GET", "/v2/profiles/mp_1/numbers/pn_2")
            .unwrap();
        assert!(route.has_primary_id);

        let params = params.unwrap();
        assert_eq!(params.primary_id.as_deref(), Some("pn_2"));
        assert_eq!(params.secondary_ids.len(), 1);
        assert_eq!(params.secondary_ids[0].name, "profile_id");
        assert_eq!(params.secondary_ids[0].id, "mp_1");
    }

    #[test]
    fn test_nested_list_route_has_only_secondary_ids() {
        let spec = spec_from(json!({
            "components": {},
            "paths": {
                "/profiles/{profile_id}/numbers": {"get": operation()},
            },
        }));
        let router = StubRouter::from_spec(&spec).unwrap();

        let (route, params) = router.route("GET", "/v2/profiles/mp_1/numbers").unwrap();
        assert!(!route.has_primary_id);

        let params = params.unwrap();
        assert!(params.primary_id.is_none());
        assert_eq!(params.secondary_ids.len(), 1);
        assert_eq!(params.secondary_ids[0].id, "mp_1");
    }

    #[test]
    fn test_action_suffix_marks_primary_id() {
        let spec = spec_from(json!({
            "components": {},
            "paths": {
                "/invoices/{id}/pay": {"post": operation()},
            },
        }));
        let router = StubRouter::from_spec(&spec).unwrap();

        let (route, params) = router.route("POST", "/v2/invoices/in_1/pay").unwrap();
        assert!(route.has_primary_id);
        assert_eq!(params.unwrap().primary_id.as_deref(), Some("in_1"));
    }

    #[test]
    fn test_unknown_route_and_missing_prefix() {
        let spec = spec_from(json!({
            "components": {},
            "paths": {
                "/widgets": {"get": operation()},
            },
        }));
        let router = StubRouter::from_spec(&spec).unwrap();

        assert!(router.route("GET", "/v2/unknown").is_none());
        assert!(router.route("POST", "/v2/widgets").is_none());
        assert!(router.route("GET", "/widgets").is_none());
    }
}
