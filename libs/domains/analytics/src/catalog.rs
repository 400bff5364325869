//! Static schema catalog for event and property names.
//!
//! Analytics data is only useful when everyone sends the same names.
//! Instead of letting each call site invent slightly different event and
//! property names ("Page Load" vs "Viewed Page"), the application registers
//! its vocabulary once at startup and every track/profile call is checked
//! against it.
//!
//! The catalog ships pre-populated with the backend's own reserved
//! (`$`-prefixed) property names; the application supplies its business
//! names through [`CatalogBuilder`]. The built catalog is immutable and safe
//! for unsynchronized concurrent reads.

use crate::error::SchemaError;
use std::collections::HashMap;
use strum::Display;

/// Semantic type a property value must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DataType {
    /// Any JSON string.
    Text,
    /// Integer or float.
    Number,
    Boolean,
    /// A date string, `%Y-%m-%dT%H:%M:%S` or RFC 3339.
    DateTime,
    /// A JSON array.
    List,
    /// No constraint.
    Any,
}

/// Catalog categories. Lookup is exact-match within one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    Event,
    EventProperty,
    ProfileProperty,
    /// Backend behavior overrides such as `$ip` and `$ignore_time`.
    ProfileMeta,
}

/// A single catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    /// Name as it appears on the wire, e.g. "Title" or "$email".
    pub name: String,
    /// Expected value type.
    pub data_type: DataType,
    /// Whether this is one of the backend's own special names.
    pub reserved: bool,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        let reserved = name.starts_with('$');
        Self {
            name,
            data_type,
            reserved,
        }
    }
}

/// Immutable name catalog, one map per category.
#[derive(Debug, Clone)]
pub struct Catalog {
    events: HashMap<String, PropertyDef>,
    event_properties: HashMap<String, PropertyDef>,
    profile_properties: HashMap<String, PropertyDef>,
    profile_meta: HashMap<String, PropertyDef>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    pub fn event(&self, name: &str) -> Option<&PropertyDef> {
        self.events.get(name)
    }

    pub fn event_property(&self, name: &str) -> Option<&PropertyDef> {
        self.event_properties.get(name)
    }

    pub fn profile_property(&self, name: &str) -> Option<&PropertyDef> {
        self.profile_properties.get(name)
    }

    pub fn meta_property(&self, name: &str) -> Option<&PropertyDef> {
        self.profile_meta.get(name)
    }

    /// Find an event property by case-insensitive name. Used when property
    /// names arrive through HTTP headers, which do not preserve case.
    pub fn event_property_ci(&self, name: &str) -> Option<&PropertyDef> {
        self.event_properties
            .values()
            .find(|def| def.name.eq_ignore_ascii_case(name))
    }

    /// Number of entries across all categories.
    pub fn len(&self) -> usize {
        self.events.len()
            + self.event_properties.len()
            + self.profile_properties.len()
            + self.profile_meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builder that assembles a [`Catalog`] from the reserved defaults plus the
/// application's own names, then validates it once at process start.
#[derive(Debug, Clone)]
pub struct CatalogBuilder {
    entries: Vec<(Category, PropertyDef)>,
}

impl CatalogBuilder {
    fn new() -> Self {
        let mut entries = Vec::new();

        // The backend's reserved/special property set. Fixed; applications
        // add their own names on top of these.
        for def in [
            PropertyDef::new("$referrer", DataType::Text),
        ] {
            entries.push((Category::EventProperty, def));
        }
        for def in [
            PropertyDef::new("$created", DataType::DateTime),
            PropertyDef::new("$email", DataType::Text),
            PropertyDef::new("$name", DataType::Text),
            PropertyDef::new("$phone", DataType::Text),
            PropertyDef::new("$unsubscribed", DataType::Any),
        ] {
            entries.push((Category::ProfileProperty, def));
        }
        for def in [
            PropertyDef::new("$ip", DataType::Text),
            PropertyDef::new("$time", DataType::Number),
            PropertyDef::new("$ignore_time", DataType::Boolean),
            PropertyDef::new("$ignore_alias", DataType::Boolean),
        ] {
            entries.push((Category::ProfileMeta, def));
        }

        Self { entries }
    }

    /// Register an event name.
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.entries
            .push((Category::Event, PropertyDef::new(name, DataType::Any)));
        self
    }

    /// Register an event property.
    pub fn event_property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.entries
            .push((Category::EventProperty, PropertyDef::new(name, data_type)));
        self
    }

    /// Register a profile property.
    pub fn profile_property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.entries
            .push((Category::ProfileProperty, PropertyDef::new(name, data_type)));
        self
    }

    /// Register a profile meta property.
    pub fn meta_property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.entries
            .push((Category::ProfileMeta, PropertyDef::new(name, data_type)));
        self
    }

    /// Validate and build the catalog.
    ///
    /// A name declared twice, in one category or across categories, is
    /// rejected here so misconfiguration surfaces at startup rather than at
    /// the first track call.
    pub fn build(self) -> Result<Catalog, SchemaError> {
        let mut seen: HashMap<String, Category> = HashMap::new();
        let mut catalog = Catalog {
            events: HashMap::new(),
            event_properties: HashMap::new(),
            profile_properties: HashMap::new(),
            profile_meta: HashMap::new(),
        };

        for (category, def) in self.entries {
            if let Some(first) = seen.get(&def.name) {
                return Err(SchemaError::DuplicateName {
                    name: def.name,
                    first: *first,
                    second: category,
                });
            }
            seen.insert(def.name.clone(), category);

            let map = match category {
                Category::Event => &mut catalog.events,
                Category::EventProperty => &mut catalog.event_properties,
                Category::ProfileProperty => &mut catalog.profile_properties,
                Category::ProfileMeta => &mut catalog.profile_meta,
            };
            map.insert(def.name.clone(), def);
        }

        Ok(catalog)
    }
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_defaults_present() {
        let catalog = Catalog::builder().build().unwrap();

        let created = catalog.profile_property("$created").unwrap();
        assert_eq!(created.data_type, DataType::DateTime);
        assert!(created.reserved);

        assert!(catalog.event_property("$referrer").is_some());
        assert!(catalog.meta_property("$ignore_alias").is_some());
        // No business names are built in.
        assert!(catalog.event("Page Viewed").is_none());
    }

    #[test]
    fn test_application_names_registered() {
        let catalog = Catalog::builder()
            .event("Signed Up")
            .event_property("Title", DataType::Text)
            .profile_property("plan", DataType::Text)
            .build()
            .unwrap();

        assert!(catalog.event("Signed Up").is_some());
        assert!(!catalog.event_property("Title").unwrap().reserved);
        assert!(catalog.profile_property("plan").is_some());
    }

    #[test]
    fn test_duplicate_within_category_rejected() {
        let err = Catalog::builder()
            .event("Signed Up")
            .event("Signed Up")
            .build()
            .unwrap_err();

        assert!(matches!(err, SchemaError::DuplicateName { ref name, .. } if name == "Signed Up"));
    }

    #[test]
    fn test_duplicate_across_categories_rejected() {
        let err = Catalog::builder()
            .event_property("Plan", DataType::Text)
            .profile_property("Plan", DataType::Text)
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            SchemaError::DuplicateName {
                name: "Plan".to_string(),
                first: Category::EventProperty,
                second: Category::ProfileProperty,
            }
        );
    }

    #[test]
    fn test_case_insensitive_event_property_lookup() {
        let catalog = Catalog::builder()
            .event_property("Title", DataType::Text)
            .build()
            .unwrap();

        assert_eq!(catalog.event_property_ci("title").unwrap().name, "Title");
        assert!(catalog.event_property_ci("unknown").is_none());
    }
}
