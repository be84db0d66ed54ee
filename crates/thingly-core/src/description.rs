// ── Thing description document ──
//
// The construction input for a ThingModel: the device description the
// gateway serves for each thing. Descriptor shape is taken on trust --
// presence is the only thing checked, malformed descriptors produce
// undefined downstream behavior.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// Declared type of a property, driving value coercion on writes.
///
/// Unknown type strings map to `Other`, which passes values through
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum PropertyType {
    Number,
    Integer,
    Boolean,
    String,
    #[default]
    Other,
}

impl From<String> for PropertyType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "number" => Self::Number,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "string" => Self::String,
            _ => Self::Other,
        }
    }
}

/// Descriptor for one property: declared type, resource address, and
/// whatever else the description carries.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDescriptor {
    #[serde(rename = "type", default)]
    pub kind: PropertyType,

    /// Gateway-relative address of the property resource.
    pub href: String,

    /// Optional display label.
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub unit: Option<String>,

    /// Remaining descriptor fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Value,
}

/// Descriptor for one event. Presence in the schema is what matters;
/// the contents are opaque to the model.
#[derive(Debug, Clone, Deserialize)]
pub struct EventDescriptor {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(flatten)]
    pub extra: Value,
}

/// A relation link from the description's `links` array.
#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

/// The device description document served by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct ThingDescription {
    pub name: String,

    #[serde(rename = "type", default)]
    pub thing_type: Option<String>,

    /// Gateway-relative address of the thing resource.
    pub href: String,

    #[serde(default)]
    pub links: Vec<Link>,

    #[serde(default)]
    pub properties: IndexMap<String, PropertyDescriptor>,

    #[serde(default)]
    pub events: IndexMap<String, EventDescriptor>,
}

impl ThingDescription {
    /// Stable identity: the final path segment of the resource address.
    pub fn id(&self) -> String {
        thing_id_from_href(&self.href)
    }

    /// Address of the events collection, from the `rel == "events"` link.
    pub fn events_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "events")
            .map(|l| l.href.as_str())
    }
}

/// Derive a thing id from its resource address.
pub fn thing_id_from_href(href: &str) -> String {
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(href)
        .to_string()
}
