//! Mutable document instances backed by one canonical wire-form map.
//!
//! A [`Document`] holds every field - schema-declared and dynamic alike -
//! in a single `serde_json` object that doubles as the serialization
//! output. Typed access converts on the way in and out of that map through
//! the instance's [`Schema`](crate::schema::Schema); there is no second
//! value store that could drift out of sync with the wire form.
//!
//! Field access is a two-tier resolver: the declared-field table is
//! consulted first, then the dynamic-field set. Both tiers are exposed
//! through the same `get`/`set`/`remove` interface.
//!
//! List- and map-valued fields are mutated in place via
//! [`Document::array_mut`] / [`Document::object_mut`], which hand out
//! mutable borrows of the backing wire-form entry; an append or item
//! assignment is visible in [`Document::to_wire`] immediately, with no
//! reassignment step.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{CouchError, CouchResult};
use crate::schema::{DOC_TYPE_KEY, FieldValue, Schema};

/// A JSON object as stored and transmitted on the wire.
pub type JsonObject = Map<String, Value>;

const ID_KEY: &str = "_id";
const REV_KEY: &str = "_rev";

fn valid_id(value: &str) -> CouchResult<()> {
    if value.is_empty() || value.starts_with('_') {
        return Err(CouchError::BadValue(format!(
            "document id '{value}' is invalid"
        )));
    }
    Ok(())
}

/// A mutable document instance bound to a schema.
///
/// Constructed empty via [`Document::new`], with initial fields via
/// [`Document::from_fields`], or from an existing wire form via
/// [`Document::wrap`]. The persistence lifecycle updates `_id`/`_rev`
/// in place after every successful create, update or delete.
#[derive(Debug, Clone)]
pub struct Document {
    schema: Arc<Schema>,
    doc: JsonObject,
    dynamic: BTreeSet<String>,
}

impl Document {
    /// Creates an instance with every declared field seeded from its
    /// default.
    ///
    /// # Errors
    ///
    /// Fails with `TypeConversion` when a declared default does not match
    /// its property's kind.
    pub fn new(schema: &Arc<Schema>) -> CouchResult<Self> {
        let mut doc = JsonObject::new();
        doc.insert(DOC_TYPE_KEY.to_string(), Value::String(schema.doc_type().to_string()));
        for property in schema.properties() {
            doc.insert(property.name().to_string(), property.to_wire(&property.default())?);
        }
        Ok(Self {
            schema: schema.clone(),
            doc,
            dynamic: BTreeSet::new(),
        })
    }

    /// Creates an instance and sets the given fields.
    ///
    /// Names matching a declared field are type-checked against it; any
    /// other name becomes a dynamic field, or fails with `KeyNotFound`
    /// when the schema denies dynamic fields.
    pub fn from_fields<I, K, V>(schema: &Arc<Schema>, fields: I) -> CouchResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let mut document = Self::new(schema)?;
        for (name, value) in fields {
            document.set(&name.into(), value)?;
        }
        Ok(document)
    }

    /// Wraps an existing wire form into an instance.
    ///
    /// Every declared field present in the map is checked through its
    /// property's `from_wire` conversion (malformed values fail with
    /// `TypeConversion`). Remaining keys that do not start with the
    /// reserved `_` prefix and are not the schema marker become dynamic
    /// fields when the schema permits them, and are silently left
    /// unexposed otherwise.
    pub fn wrap(schema: &Arc<Schema>, mut wire: JsonObject) -> CouchResult<Self> {
        let mut dynamic = BTreeSet::new();
        for property in schema.properties() {
            if let Some(value) = wire.get(property.name()) {
                property.from_wire(value)?;
            }
        }
        for key in wire.keys() {
            if schema.property(key).is_some() || key.starts_with('_') || key == DOC_TYPE_KEY {
                continue;
            }
            if schema.allows_dynamic() {
                dynamic.insert(key.clone());
            }
        }
        wire.entry(DOC_TYPE_KEY.to_string())
            .or_insert_with(|| Value::String(schema.doc_type().to_string()));
        Ok(Self { schema: schema.clone(), doc: wire, dynamic })
    }

    /// Returns the canonical wire form, always including the schema
    /// marker.
    pub fn to_wire(&self) -> JsonObject {
        let mut wire = self.doc.clone();
        wire.entry(DOC_TYPE_KEY.to_string())
            .or_insert_with(|| Value::String(self.schema.doc_type().to_string()));
        wire
    }

    /// Returns the schema this instance is bound to.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the document-type tag recorded in the wire form.
    pub fn doc_type(&self) -> &str {
        self.doc
            .get(DOC_TYPE_KEY)
            .and_then(Value::as_str)
            .unwrap_or_else(|| self.schema.doc_type())
    }

    /// Returns the document's identity token, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.doc.get(ID_KEY).and_then(Value::as_str)
    }

    /// Returns the document's revision token, if known.
    pub fn rev(&self) -> Option<&str> {
        self.doc.get(REV_KEY).and_then(Value::as_str)
    }

    /// Sets the identity token.
    ///
    /// # Errors
    ///
    /// Fails with `BadValue` for an empty id or one starting with the
    /// reserved `_` prefix.
    pub fn set_id(&mut self, id: impl Into<String>) -> CouchResult<()> {
        let id = id.into();
        valid_id(&id)?;
        self.doc.insert(ID_KEY.to_string(), Value::String(id));
        Ok(())
    }

    /// Sets the revision token.
    pub fn set_rev(&mut self, rev: impl Into<String>) -> CouchResult<()> {
        let rev = rev.into();
        if rev.is_empty() {
            return Err(CouchError::BadValue("revision must not be empty".to_string()));
        }
        self.doc.insert(REV_KEY.to_string(), Value::String(rev));
        Ok(())
    }

    /// Removes identity and revision, returning the document to new
    /// status. Called by the lifecycle after a successful delete.
    pub fn clear_identity(&mut self) {
        self.doc.remove(ID_KEY);
        self.doc.remove(REV_KEY);
    }

    /// Returns true while the document has never been saved (no revision).
    pub fn is_new(&self) -> bool {
        self.rev().is_none()
    }

    /// Reads a field as a typed value.
    ///
    /// Declared fields convert through their property (falling back to the
    /// declared default when unset); dynamic and reserved fields convert
    /// structurally. Unknown keys fail with `KeyNotFound`.
    pub fn get(&self, key: &str) -> CouchResult<FieldValue> {
        if let Some(property) = self.schema.property(key) {
            return property.from_wire(self.doc.get(key).unwrap_or(&Value::Null));
        }
        if self.dynamic.contains(key) || key.starts_with('_') || key == DOC_TYPE_KEY {
            return Ok(self
                .doc
                .get(key)
                .map(FieldValue::from_wire_guess)
                .unwrap_or(FieldValue::Null));
        }
        Err(CouchError::KeyNotFound(key.to_string()))
    }

    /// Writes a field.
    ///
    /// `_id`/`_rev` route through [`Document::set_id`] /
    /// [`Document::set_rev`]; declared fields are type-checked against
    /// their property; any other name becomes a dynamic field when the
    /// schema permits. Other `_`-prefixed names and the schema marker are
    /// rejected with `ReservedWord`.
    pub fn set(&mut self, key: &str, value: impl Into<FieldValue>) -> CouchResult<()> {
        let value = value.into();
        if key == ID_KEY {
            return match value {
                FieldValue::String(id) => self.set_id(id),
                other => Err(CouchError::BadValue(format!(
                    "document id must be a string, got {other:?}"
                ))),
            };
        }
        if key == REV_KEY {
            return match value {
                FieldValue::String(rev) => self.set_rev(rev),
                other => Err(CouchError::BadValue(format!(
                    "revision must be a string, got {other:?}"
                ))),
            };
        }
        if let Some(property) = self.schema.property(key) {
            let wire = property.to_wire(&value)?;
            self.doc.insert(key.to_string(), wire);
            return Ok(());
        }
        if key == DOC_TYPE_KEY || key.starts_with('_') {
            return Err(CouchError::ReservedWord(key.to_string()));
        }
        if !self.schema.allows_dynamic() {
            return Err(CouchError::KeyNotFound(format!(
                "'{key}' is not declared in schema '{}' and dynamic fields are disabled",
                self.schema.doc_type()
            )));
        }
        let wire = value.to_wire()?;
        self.doc.insert(key.to_string(), wire);
        self.dynamic.insert(key.to_string());
        Ok(())
    }

    /// Removes a field.
    ///
    /// Reserved keys are removed from the wire form; a declared field
    /// reverts to its default on the next read; removing a key that is
    /// neither declared, dynamic nor reserved fails with `KeyNotFound`.
    pub fn remove(&mut self, key: &str) -> CouchResult<()> {
        if key.starts_with('_') || key == DOC_TYPE_KEY {
            self.doc.remove(key);
            return Ok(());
        }
        if self.schema.property(key).is_some() {
            self.doc.remove(key);
            return Ok(());
        }
        if self.dynamic.remove(key) {
            self.doc.remove(key);
            return Ok(());
        }
        Err(CouchError::KeyNotFound(key.to_string()))
    }

    /// Returns whether a field name is declared, dynamic or present in the
    /// wire form.
    pub fn contains(&self, key: &str) -> bool {
        self.schema.property(key).is_some()
            || self.dynamic.contains(key)
            || self.doc.contains_key(key)
    }

    /// Iterates the union of declared and dynamic field names.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.schema
            .properties()
            .iter()
            .map(|p| p.name())
            .chain(self.dynamic.iter().map(String::as_str))
    }

    /// Returns the names of the dynamic fields.
    pub fn dynamic_fields(&self) -> impl Iterator<Item = &str> {
        self.dynamic.iter().map(String::as_str)
    }

    /// Number of fields (declared plus dynamic).
    pub fn len(&self) -> usize {
        self.schema.len() + self.dynamic.len()
    }

    /// Returns true when the document has no declared or dynamic fields.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows a list-valued field for in-place mutation.
    ///
    /// The returned vector *is* the wire-form entry, so every push,
    /// assignment or removal is immediately reflected in
    /// [`Document::to_wire`].
    pub fn array_mut(&mut self, key: &str) -> CouchResult<&mut Vec<Value>> {
        if !self.contains(key) {
            return Err(CouchError::KeyNotFound(key.to_string()));
        }
        match self.doc.get_mut(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(CouchError::TypeConversion(format!(
                "field '{key}' holds {other}, not a list"
            ))),
            None => Err(CouchError::KeyNotFound(key.to_string())),
        }
    }

    /// Borrows a map-valued field for in-place mutation.
    ///
    /// As with [`Document::array_mut`], the returned map is the wire-form
    /// entry itself.
    pub fn object_mut(&mut self, key: &str) -> CouchResult<&mut JsonObject> {
        if !self.contains(key) {
            return Err(CouchError::KeyNotFound(key.to_string()));
        }
        match self.doc.get_mut(key) {
            Some(Value::Object(map)) => Ok(map),
            Some(other) => Err(CouchError::TypeConversion(format!(
                "field '{key}' holds {other}, not a map"
            ))),
            None => Err(CouchError::KeyNotFound(key.to_string())),
        }
    }

    /// Validates every declared field against its required flag and
    /// custom validators.
    pub fn validate(&self) -> CouchResult<()> {
        for property in self.schema.properties() {
            let value = property.from_wire(self.doc.get(property.name()).unwrap_or(&Value::Null))?;
            property.validate(&value)?;
        }
        Ok(())
    }

    /// Writes a reserved wire-form entry directly, bypassing the reserved
    /// word check. The lifecycle uses this for markers like `_deleted`.
    pub(crate) fn insert_raw(&mut self, key: &str, value: Value) {
        self.doc.insert(key.to_string(), value);
    }

    /// Replaces the wire form with a fresh server copy, recomputing the
    /// dynamic field set. Used after operations that change the document
    /// on the server side (attachment mutation, refresh).
    pub(crate) fn merge_wire(&mut self, wire: JsonObject) {
        self.dynamic = wire
            .keys()
            .filter(|key| {
                self.schema.property(key).is_none()
                    && !key.starts_with('_')
                    && *key != DOC_TYPE_KEY
                    && self.schema.allows_dynamic()
            })
            .cloned()
            .collect();
        self.doc = wire;
    }

    fn field_or_null(&self, key: &str) -> &Value {
        self.doc.get(key).unwrap_or(&Value::Null)
    }
}

impl PartialEq for Document {
    /// Equality over identity, document type and the union of declared and
    /// dynamic fields; unset fields compare equal to explicit nulls.
    fn eq(&self, other: &Self) -> bool {
        if self.doc_type() != other.doc_type() || self.id() != other.id() {
            return false;
        }
        self.field_names()
            .chain(other.field_names())
            .all(|key| self.field_or_null(key) == other.field_or_null(key))
    }
}
