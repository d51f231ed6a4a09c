/// Parameter values extracted from a matched request path, handed to the
/// generator so responses can mention the same identifiers the client put
/// in the URL.
///
/// The `replaced_*` fields accumulate the original fixture values that got
/// overwritten during the record pass; the distribute pass then rewrites
/// any further occurrences of those originals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathParams {
    /// Identifier of the object the route acts on directly. `None` for
    /// routes without a terminal parameter, e.g. create and list methods.
    pub primary_id: Option<String>,
    /// Ancestor identifiers in path order, e.g. the profile in
    /// `/v2/messaging_profiles/{messaging_profile_id}/phone_numbers`.
    pub secondary_ids: Vec<SecondaryId>,
    /// The fixture value that `primary_id` displaced, if any.
    pub replaced_primary_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryId {
    /// Value captured from the request path.
    pub id: String,
    /// Parameter name from the enclosing `{}` in the path template.
    pub name: String,
    /// Fixture values this id displaced. A sequence because several fields
    /// generated from independent fixtures can represent the same entity
    /// under different ids.
    pub replaced_ids: Vec<String>,
}

impl SecondaryId {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        SecondaryId {
            id: id.into(),
            name: name.into(),
            replaced_ids: Vec::new(),
        }
    }

    /// Records a displaced id, skipping empty strings.
    pub fn append_replaced_id(&mut self, replaced: &str) {
        if !replaced.is_empty() {
            self.replaced_ids.push(replaced.to_string());
        }
    }
}
