//! Property model and schema assembly for typed documents.
//!
//! This module provides the declarative half of the document mapper:
//!
//! - [`Property`] - one typed field with optional default, required flag and
//!   custom validators, owning the pure wire conversions
//! - [`FieldValue`] - the typed value set, which doubles as the set of
//!   values a dynamic (undeclared) field may hold
//! - [`Schema`] - the immutable, ordered field table consumed by every
//!   document instance, assembled once per document type via
//!   [`SchemaBuilder`]
//!
//! # Schema Building
//!
//! Schemas are constructed with the fluent builder API:
//!
//! ```ignore
//! use couchlayer::schema::{Schema, Property};
//!
//! let schema = Schema::builder("Greeting")
//!     .property(Property::string("author").default_value("anonymous"))
//!     .property(Property::string("content").required())
//!     .property(Property::datetime("date").default_with(chrono::Utc::now))
//!     .build()?;
//! ```
//!
//! Declaring a property under a reserved name (`_id`, `_rev`, `doc_type`)
//! or twice across a builder and its inherited bases fails at build time,
//! never at instance construction or request time.

use bson::Decimal128;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::document::Document;
use crate::error::{CouchError, CouchResult};

/// Field names that can never be declared as properties.
pub const RESERVED_WORDS: [&str; 3] = ["_id", "_rev", DOC_TYPE_KEY];

/// The schema-marker field embedded in every document's wire form.
pub const DOC_TYPE_KEY: &str = "doc_type";

pub(crate) fn check_reserved_word(name: &str) -> CouchResult<()> {
    if RESERVED_WORDS.contains(&name) {
        return Err(CouchError::ReservedWord(name.to_string()));
    }
    Ok(())
}

/// The semantic type of a declared property.
#[derive(Debug, Clone)]
pub enum PropertyKind {
    String,
    Integer,
    Float,
    Boolean,
    /// UTC datetime, `%Y-%m-%dT%H:%M:%SZ` on the wire.
    DateTime,
    /// Calendar date, `%Y-%m-%d` on the wire.
    Date,
    /// Wall-clock time, `%H:%M:%S` on the wire.
    Time,
    /// Arbitrary-precision decimal, carried as a string on the wire.
    Decimal,
    /// A nested document with its own schema.
    Schema(Arc<Schema>),
    /// A list of nested documents sharing one schema.
    SchemaList(Arc<Schema>),
}

impl PropertyKind {
    fn name(&self) -> &'static str {
        match self {
            PropertyKind::String => "string",
            PropertyKind::Integer => "integer",
            PropertyKind::Float => "float",
            PropertyKind::Boolean => "boolean",
            PropertyKind::DateTime => "datetime",
            PropertyKind::Date => "date",
            PropertyKind::Time => "time",
            PropertyKind::Decimal => "decimal",
            PropertyKind::Schema(_) => "document",
            PropertyKind::SchemaList(_) => "document list",
        }
    }
}

/// A typed field value.
///
/// This enum is both the output of typed field access and the complete set
/// of values a dynamic field may hold; a type outside this set simply
/// cannot be assigned.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Decimal(Decimal128),
    /// A JSON list; mutate it in place through
    /// [`Document::array_mut`](crate::document::Document::array_mut).
    List(Vec<Value>),
    /// A JSON map; mutate it in place through
    /// [`Document::object_mut`](crate::document::Document::object_mut).
    Map(Map<String, Value>),
    /// A nested schema-typed document.
    Doc(Box<Document>),
    /// A list of nested schema-typed documents.
    DocList(Vec<Document>),
}

impl FieldValue {
    fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::String(_) => "string",
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::DateTime(_) => "datetime",
            FieldValue::Date(_) => "date",
            FieldValue::Time(_) => "time",
            FieldValue::Decimal(_) => "decimal",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "map",
            FieldValue::Doc(_) => "document",
            FieldValue::DocList(_) => "document list",
        }
    }

    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Returns the contained string, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the contained integer, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Converts this value to its JSON wire representation.
    ///
    /// # Errors
    ///
    /// Fails with `TypeConversion` on a non-finite float, which JSON cannot
    /// carry.
    pub fn to_wire(&self) -> CouchResult<Value> {
        Ok(match self {
            FieldValue::Null => Value::Null,
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::Number((*i).into()),
            FieldValue::Float(f) => Value::Number(Number::from_f64(*f).ok_or_else(|| {
                CouchError::TypeConversion(format!("float {f} has no JSON representation"))
            })?),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::DateTime(dt) => Value::String(datetime_to_wire(dt)),
            FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            FieldValue::Time(t) => Value::String(t.format(TIME_FORMAT).to_string()),
            FieldValue::Decimal(d) => Value::String(d.to_string()),
            FieldValue::List(items) => Value::Array(items.clone()),
            FieldValue::Map(map) => Value::Object(map.clone()),
            FieldValue::Doc(doc) => Value::Object(doc.to_wire()),
            FieldValue::DocList(docs) => {
                Value::Array(docs.iter().map(|d| Value::Object(d.to_wire())).collect())
            }
        })
    }

    /// Converts a wire value read from a dynamic field into a typed value.
    ///
    /// Strings in ISO-8601 datetime/date/time form surface as their
    /// temporal types; everything else maps structurally.
    pub fn from_wire_guess(value: &Value) -> FieldValue {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => {
                if let Some(dt) = parse_datetime(s) {
                    FieldValue::DateTime(dt)
                } else if let Ok(d) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
                    FieldValue::Date(d)
                } else if let Ok(t) = NaiveTime::parse_from_str(s, TIME_FORMAT) {
                    FieldValue::Time(t)
                } else {
                    FieldValue::String(s.clone())
                }
            }
            Value::Array(items) => FieldValue::List(items.clone()),
            Value::Object(map) => FieldValue::Map(map.clone()),
        }
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

fn datetime_to_wire(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(value as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::DateTime(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<NaiveTime> for FieldValue {
    fn from(value: NaiveTime) -> Self {
        FieldValue::Time(value)
    }
}

impl From<Decimal128> for FieldValue {
    fn from(value: Decimal128) -> Self {
        FieldValue::Decimal(value)
    }
}

impl From<Vec<Value>> for FieldValue {
    fn from(value: Vec<Value>) -> Self {
        FieldValue::List(value)
    }
}

impl From<Map<String, Value>> for FieldValue {
    fn from(value: Map<String, Value>) -> Self {
        FieldValue::Map(value)
    }
}

impl From<Document> for FieldValue {
    fn from(value: Document) -> Self {
        FieldValue::Doc(Box::new(value))
    }
}

type Validator = Arc<dyn Fn(&FieldValue) -> Result<(), String> + Send + Sync>;

#[derive(Clone)]
enum DefaultSource {
    Value(FieldValue),
    Producer(Arc<dyn Fn() -> FieldValue + Send + Sync>),
}

/// Declaration of one typed document field.
///
/// A property owns two pure conversions: `to_wire` (typed value to
/// JSON-compatible primitive) and `from_wire` (primitive back to typed
/// value, failing on malformed input), plus required/validator checks.
#[derive(Clone)]
pub struct Property {
    name: String,
    kind: PropertyKind,
    default: Option<DefaultSource>,
    required: bool,
    validators: Vec<Validator>,
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("kind", &self.kind.name())
            .field("required", &self.required)
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl Property {
    /// Declares a property of the given kind.
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            required: false,
            validators: Vec::new(),
        }
    }

    /// Declares a string property.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::String)
    }

    /// Declares an integer property.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Integer)
    }

    /// Declares a float property.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Float)
    }

    /// Declares a boolean property.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Boolean)
    }

    /// Declares a UTC datetime property.
    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::DateTime)
    }

    /// Declares a calendar date property.
    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Date)
    }

    /// Declares a wall-clock time property.
    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Time)
    }

    /// Declares a decimal property.
    pub fn decimal(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Decimal)
    }

    /// Declares a nested-document property.
    pub fn schema(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self::new(name, PropertyKind::Schema(schema))
    }

    /// Declares a list-of-documents property.
    pub fn schema_list(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self::new(name, PropertyKind::SchemaList(schema))
    }

    /// Sets a default value used whenever the field is unset.
    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(DefaultSource::Value(value.into()));
        self
    }

    /// Sets a zero-argument producer evaluated each time a default is
    /// needed (e.g. `Utc::now` for timestamps).
    pub fn default_with<F, V>(mut self, producer: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<FieldValue>,
    {
        self.default = Some(DefaultSource::Producer(Arc::new(move || producer().into())));
        self
    }

    /// Marks the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Adds a custom validator run by [`Property::validate`].
    pub fn validate_with<F>(mut self, validator: F) -> Self
    where
        F: Fn(&FieldValue) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Returns the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared kind.
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// Returns whether the field is required.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Resolves the declared default, `Null` when none was given.
    pub fn default(&self) -> FieldValue {
        match &self.default {
            Some(DefaultSource::Value(v)) => v.clone(),
            Some(DefaultSource::Producer(f)) => f(),
            None => FieldValue::Null,
        }
    }

    fn mismatch(&self, value: &FieldValue) -> CouchError {
        CouchError::TypeConversion(format!(
            "expected {} for field '{}', got {}",
            self.kind.name(),
            self.name,
            value.kind_name()
        ))
    }

    fn malformed(&self, detail: impl fmt::Display) -> CouchError {
        CouchError::TypeConversion(format!(
            "field '{}' holds a malformed {} value: {}",
            self.name,
            self.kind.name(),
            detail
        ))
    }

    /// Converts a typed value to its wire representation.
    ///
    /// # Errors
    ///
    /// Fails with `TypeConversion` when the value's type is incompatible
    /// with the declared kind. Integers are accepted where floats are
    /// declared.
    pub fn to_wire(&self, value: &FieldValue) -> CouchResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match (&self.kind, value) {
            (PropertyKind::String, FieldValue::String(_))
            | (PropertyKind::Integer, FieldValue::Integer(_))
            | (PropertyKind::Float, FieldValue::Float(_))
            | (PropertyKind::Boolean, FieldValue::Boolean(_))
            | (PropertyKind::DateTime, FieldValue::DateTime(_))
            | (PropertyKind::Date, FieldValue::Date(_))
            | (PropertyKind::Time, FieldValue::Time(_))
            | (PropertyKind::Decimal, FieldValue::Decimal(_)) => value.to_wire(),
            (PropertyKind::Float, FieldValue::Integer(i)) => {
                FieldValue::Float(*i as f64).to_wire()
            }
            (PropertyKind::Schema(schema), FieldValue::Doc(doc)) => {
                if doc.doc_type() != schema.doc_type() {
                    return Err(self.mismatch(value));
                }
                value.to_wire()
            }
            (PropertyKind::SchemaList(schema), FieldValue::DocList(docs)) => {
                if docs.iter().any(|d| d.doc_type() != schema.doc_type()) {
                    return Err(self.mismatch(value));
                }
                value.to_wire()
            }
            _ => Err(self.mismatch(value)),
        }
    }

    /// Converts a wire value back to its typed form.
    ///
    /// An absent or null wire value resolves to the declared default; a
    /// present-but-malformed value always fails with `TypeConversion`,
    /// never falls back to the default.
    pub fn from_wire(&self, value: &Value) -> CouchResult<FieldValue> {
        if value.is_null() {
            return Ok(self.default());
        }
        match &self.kind {
            PropertyKind::String => match value {
                Value::String(s) => Ok(FieldValue::String(s.clone())),
                other => Err(self.malformed(other)),
            },
            PropertyKind::Integer => value
                .as_i64()
                .map(FieldValue::Integer)
                .ok_or_else(|| self.malformed(value)),
            PropertyKind::Float => value
                .as_f64()
                .map(FieldValue::Float)
                .ok_or_else(|| self.malformed(value)),
            PropertyKind::Boolean => value
                .as_bool()
                .map(FieldValue::Boolean)
                .ok_or_else(|| self.malformed(value)),
            PropertyKind::DateTime => match value {
                Value::String(s) => parse_datetime(s)
                    .map(FieldValue::DateTime)
                    .ok_or_else(|| self.malformed(format!("'{s}' is not ISO-8601"))),
                other => Err(self.malformed(other)),
            },
            PropertyKind::Date => match value {
                Value::String(s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .map(FieldValue::Date)
                    .map_err(|e| self.malformed(e)),
                other => Err(self.malformed(other)),
            },
            PropertyKind::Time => match value {
                Value::String(s) => NaiveTime::parse_from_str(s, TIME_FORMAT)
                    .map(FieldValue::Time)
                    .map_err(|e| self.malformed(e)),
                other => Err(self.malformed(other)),
            },
            PropertyKind::Decimal => match value {
                Value::String(s) => s
                    .parse::<Decimal128>()
                    .map(FieldValue::Decimal)
                    .map_err(|e| self.malformed(e)),
                other => Err(self.malformed(other)),
            },
            PropertyKind::Schema(schema) => match value {
                Value::Object(map) => Ok(FieldValue::Doc(Box::new(Document::wrap(
                    schema,
                    map.clone(),
                )?))),
                other => Err(self.malformed(other)),
            },
            PropertyKind::SchemaList(schema) => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::Object(map) => Document::wrap(schema, map.clone()),
                        other => Err(self.malformed(other)),
                    })
                    .collect::<CouchResult<Vec<Document>>>()
                    .map(FieldValue::DocList),
                other => Err(self.malformed(other)),
            },
        }
    }

    /// Validates a current value against the required flag and any custom
    /// validators.
    ///
    /// # Errors
    ///
    /// Fails with `BadValue` when a required field is unset or empty, or
    /// when a custom validator rejects the value.
    pub fn validate(&self, value: &FieldValue) -> CouchResult<()> {
        let empty = match value {
            FieldValue::Null => true,
            FieldValue::String(s) => s.is_empty(),
            _ => false,
        };
        if self.required && empty {
            return Err(CouchError::BadValue(format!(
                "field '{}' is required",
                self.name
            )));
        }
        if !value.is_null() {
            for validator in &self.validators {
                validator(value).map_err(|reason| {
                    CouchError::BadValue(format!("field '{}': {}", self.name, reason))
                })?;
            }
        }
        Ok(())
    }
}

/// Immutable field table for one document type.
///
/// Built once via [`SchemaBuilder`] and shared (`Arc`) by every instance
/// of the type. The document-type tag is embedded in each instance's wire
/// form under [`DOC_TYPE_KEY`].
#[derive(Debug, Clone)]
pub struct Schema {
    doc_type: String,
    properties: Vec<Property>,
    index: HashMap<String, usize>,
    allow_dynamic: bool,
}

impl Schema {
    /// Creates a builder for a document type with the given name.
    ///
    /// The name becomes the document-type tag unless overridden with
    /// [`SchemaBuilder::doc_type`].
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Returns the document-type tag.
    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// Looks up a declared property by name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.index.get(name).map(|i| &self.properties[*i])
    }

    /// Returns the declared properties in declaration order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Returns whether instances may carry undeclared (dynamic) fields.
    pub fn allows_dynamic(&self) -> bool {
        self.allow_dynamic
    }

    /// Number of declared properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns true when no properties are declared.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Builder assembling a [`Schema`] from declared properties and inherited
/// base schemas.
///
/// All definition-time errors (reserved words, duplicate fields within the
/// declarations or across bases) surface from [`SchemaBuilder::build`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    doc_type: Option<String>,
    bases: Vec<Schema>,
    properties: Vec<Property>,
    allow_dynamic: bool,
}

impl SchemaBuilder {
    /// Creates a builder for the named document type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc_type: None,
            bases: Vec::new(),
            properties: Vec::new(),
            allow_dynamic: true,
        }
    }

    /// Overrides the document-type tag (defaults to the builder name).
    pub fn doc_type(mut self, tag: impl Into<String>) -> Self {
        self.doc_type = Some(tag.into());
        self
    }

    /// Inherits every property of a base schema.
    pub fn inherit(mut self, base: &Schema) -> Self {
        self.bases.push(base.clone());
        self
    }

    /// Declares a property.
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Rejects undeclared fields on instances of this type instead of
    /// tracking them as dynamic properties.
    pub fn deny_dynamic(mut self) -> Self {
        self.allow_dynamic = false;
        self
    }

    /// Assembles the immutable schema.
    ///
    /// # Errors
    ///
    /// - `ReservedWord` when a declared property uses a reserved name
    /// - `DuplicateProperty` when a field name appears twice, either among
    ///   the declarations or across inherited bases
    pub fn build(self) -> CouchResult<Schema> {
        let mut defined: HashSet<String> = HashSet::new();
        let mut properties: Vec<Property> = Vec::new();

        for base in &self.bases {
            for property in base.properties() {
                if !defined.insert(property.name().to_string()) {
                    return Err(CouchError::DuplicateProperty(format!(
                        "'{}' already defined in base schema '{}'",
                        property.name(),
                        base.doc_type()
                    )));
                }
                properties.push(property.clone());
            }
        }

        for property in self.properties {
            check_reserved_word(property.name())?;
            if !defined.insert(property.name().to_string()) {
                return Err(CouchError::DuplicateProperty(property.name().to_string()));
            }
            properties.push(property);
        }

        let index = properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name().to_string(), i))
            .collect();

        Ok(Schema {
            doc_type: self.doc_type.unwrap_or(self.name),
            properties,
            index,
            allow_dynamic: self.allow_dynamic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn scalar_conversions_round_trip() {
        let cases: Vec<(Property, FieldValue)> = vec![
            (Property::string("s"), FieldValue::String("hello".into())),
            (Property::integer("i"), FieldValue::Integer(-42)),
            (Property::float("f"), FieldValue::Float(2.5)),
            (Property::boolean("b"), FieldValue::Boolean(true)),
            (
                Property::datetime("dt"),
                FieldValue::DateTime(Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap()),
            ),
            (
                Property::date("d"),
                FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()),
            ),
            (
                Property::time("t"),
                FieldValue::Time(NaiveTime::from_hms_opt(14, 30, 5).unwrap()),
            ),
            (
                Property::decimal("dec"),
                FieldValue::Decimal("10.25".parse().unwrap()),
            ),
        ];

        for (property, value) in cases {
            let wire = property.to_wire(&value).unwrap();
            let back = property.from_wire(&wire).unwrap();
            assert_eq!(back, value, "round trip failed for '{}'", property.name());
        }
    }

    #[test]
    fn datetime_wire_format_is_iso_utc() {
        let property = Property::datetime("created");
        let value =
            FieldValue::DateTime(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(
            property.to_wire(&value).unwrap(),
            json!("2024-01-02T03:04:05Z")
        );
    }

    #[test]
    fn malformed_wire_value_never_falls_back_to_default() {
        let property = Property::datetime("created").default_with(Utc::now);
        let err = property.from_wire(&json!("yesterday-ish")).unwrap_err();
        assert!(matches!(err, CouchError::TypeConversion(_)));
    }

    #[test]
    fn absent_wire_value_resolves_to_default() {
        let property = Property::string("author").default_value("anonymous");
        assert_eq!(
            property.from_wire(&Value::Null).unwrap(),
            FieldValue::String("anonymous".into())
        );
    }

    #[test]
    fn default_producer_is_reevaluated() {
        use std::sync::atomic::{AtomicI64, Ordering};
        static COUNTER: AtomicI64 = AtomicI64::new(0);
        let property = Property::integer("seq")
            .default_with(|| COUNTER.fetch_add(1, Ordering::SeqCst));
        assert_eq!(property.default(), FieldValue::Integer(0));
        assert_eq!(property.default(), FieldValue::Integer(1));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let property = Property::integer("count");
        let err = property
            .to_wire(&FieldValue::String("three".into()))
            .unwrap_err();
        assert!(matches!(err, CouchError::TypeConversion(_)));
    }

    #[test]
    fn integers_promote_where_floats_are_declared() {
        let property = Property::float("ratio");
        assert_eq!(
            property.to_wire(&FieldValue::Integer(3)).unwrap(),
            json!(3.0)
        );
    }

    #[test]
    fn required_fields_reject_null_and_empty() {
        let property = Property::string("content").required();
        assert!(matches!(
            property.validate(&FieldValue::Null),
            Err(CouchError::BadValue(_))
        ));
        assert!(matches!(
            property.validate(&FieldValue::String(String::new())),
            Err(CouchError::BadValue(_))
        ));
        assert!(property.validate(&FieldValue::String("hi".into())).is_ok());
    }

    #[test]
    fn custom_validators_run_on_non_null_values() {
        let property = Property::integer("age").validate_with(|v| match v {
            FieldValue::Integer(i) if *i >= 0 => Ok(()),
            _ => Err("must not be negative".into()),
        });
        assert!(property.validate(&FieldValue::Integer(30)).is_ok());
        assert!(matches!(
            property.validate(&FieldValue::Integer(-1)),
            Err(CouchError::BadValue(_))
        ));
        // null is the required flag's business, not the validator's
        assert!(property.validate(&FieldValue::Null).is_ok());
    }

    #[test]
    fn reserved_words_fail_at_build_time() {
        for reserved in RESERVED_WORDS {
            let err = Schema::builder("Broken")
                .property(Property::string(reserved))
                .build()
                .unwrap_err();
            assert!(matches!(err, CouchError::ReservedWord(_)));
        }
    }

    #[test]
    fn duplicate_declarations_fail_at_build_time() {
        let err = Schema::builder("Broken")
            .property(Property::string("name"))
            .property(Property::integer("name"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CouchError::DuplicateProperty(_)));
    }

    #[test]
    fn cross_base_collisions_fail_at_build_time() {
        let base_a = Schema::builder("A")
            .property(Property::string("shared"))
            .build()
            .unwrap();
        let base_b = Schema::builder("B")
            .property(Property::string("shared"))
            .build()
            .unwrap();
        let err = Schema::builder("C")
            .inherit(&base_a)
            .inherit(&base_b)
            .build()
            .unwrap_err();
        assert!(matches!(err, CouchError::DuplicateProperty(_)));
    }

    #[test]
    fn inheritance_keeps_base_order_and_allows_extension() {
        let base = Schema::builder("Base")
            .property(Property::string("first"))
            .build()
            .unwrap();
        let schema = Schema::builder("Child")
            .inherit(&base)
            .property(Property::integer("second"))
            .build()
            .unwrap();
        let names: Vec<&str> = schema.properties().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(schema.doc_type(), "Child");
    }

    #[test]
    fn doc_type_tag_can_be_overridden() {
        let schema = Schema::builder("Greeting")
            .doc_type("greeting-v2")
            .build()
            .unwrap();
        assert_eq!(schema.doc_type(), "greeting-v2");
    }

    #[test]
    fn iso_strings_guess_to_temporal_values() {
        assert!(matches!(
            FieldValue::from_wire_guess(&json!("2024-03-09T14:30:05Z")),
            FieldValue::DateTime(_)
        ));
        assert!(matches!(
            FieldValue::from_wire_guess(&json!("2024-03-09")),
            FieldValue::Date(_)
        ));
        assert!(matches!(
            FieldValue::from_wire_guess(&json!("14:30:05")),
            FieldValue::Time(_)
        ));
        assert_eq!(
            FieldValue::from_wire_guess(&json!("plain text")),
            FieldValue::String("plain text".into())
        );
    }
}
