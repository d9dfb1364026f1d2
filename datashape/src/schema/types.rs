use serde::de::{Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A small insertion-ordered string-keyed map.
///
/// Schema documents are order-sensitive: properties are emitted in the order
/// they were declared, and inheritance merges must keep the base order. A
/// plain `HashMap` loses that, so raw configs deserialize into this instead.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<T>(Vec<(String, T)>);

impl<T> OrderedMap<T> {
    pub fn new() -> Self {
        OrderedMap(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Insert preserving an existing key's position; new keys append.
    pub fn insert(&mut self, key: String, value: T) {
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        OrderedMap::new()
    }
}

impl<T> FromIterator<(String, T)> for OrderedMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut map = OrderedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor<T>(std::marker::PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for MapVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(MapVisitor(std::marker::PhantomData))
    }
}

impl<T: Serialize> Serialize for OrderedMap<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Advisory join strategy for an association fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    None,
    Left,
    Inner,
}

/// One level of a schema document as declared, before compilation.
///
/// The same shape serves the root document and every nested property: a
/// property that declares `schema`, `class` or `properties` is itself a
/// schema level, while the extra keys (`source`, `decode`, `hidden`, ...)
/// only carry meaning at property depth.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSchema {
    /// Named schema document to splice in as the inheritance base.
    #[serde(default)]
    pub schema: Option<String>,
    /// Persisted type this level projects.
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default, deserialize_with = "string_or_seq")]
    pub roles: Vec<String>,
    #[serde(default)]
    pub filter_null_values: Option<bool>,
    #[serde(default)]
    pub query: RawQuery,
    #[serde(default)]
    pub properties: OrderedMap<RawSchema>,

    // Property-level options.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub ignore_discriminator_mismatch: bool,
    #[serde(default)]
    pub join: Option<JoinMode>,
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub decode: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQuery {
    #[serde(default)]
    pub selects: OrderedMap<String>,
}

impl RawSchema {
    /// A property is nested when it splices another schema or declares its
    /// own property tree.
    pub fn is_nested(&self) -> bool {
        self.schema.is_some() || !self.properties.is_empty()
    }
}

/// Accept `roles: ROLE_X` as shorthand for `roles: [ROLE_X]`.
fn string_or_seq<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    struct StringOrSeq;

    impl<'de> Visitor<'de> for StringOrSeq {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string or a sequence of strings")
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                out.push(item);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_any(StringOrSeq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_map_preserves_declaration_order() {
        let raw: RawSchema = serde_yaml::from_str(
            r#"
class: Article
properties:
  zeta: { type: string }
  alpha: { type: string }
  mid: { type: integer }
"#,
        )
        .unwrap();

        let keys: Vec<&str> = raw.properties.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_ordered_map_insert_keeps_position_on_override() {
        let mut map = OrderedMap::new();
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        map.insert("a".to_string(), 3);

        let entries: Vec<(&str, &i32)> = map.iter().collect();
        assert_eq!(entries, vec![("a", &3), ("b", &2)]);
    }

    #[test]
    fn test_roles_accepts_string_and_sequence() {
        let raw: RawSchema = serde_yaml::from_str("roles: ROLE_ADMIN").unwrap();
        assert_eq!(raw.roles, vec!["ROLE_ADMIN"]);

        let raw: RawSchema = serde_yaml::from_str("roles: [ROLE_A, ROLE_B]").unwrap();
        assert_eq!(raw.roles, vec!["ROLE_A", "ROLE_B"]);
    }

    #[test]
    fn test_property_options_parse() {
        let raw: RawSchema = serde_yaml::from_str(
            r#"
class: Article
query:
  selects:
    comment_count: "COUNT(c.id)"
properties:
  title: {}
  author:
    schema: author.yml
    join: left
    conditions: ["{{ alias }}.enabled = 1"]
  summary:
    source: body
    decode: "trim | uppercase"
    hidden: true
"#,
        )
        .unwrap();

        assert_eq!(raw.query.selects.get("comment_count").unwrap(), "COUNT(c.id)");
        let author = raw.properties.get("author").unwrap();
        assert!(author.is_nested());
        assert_eq!(author.join, Some(JoinMode::Left));
        assert_eq!(author.conditions.len(), 1);
        let summary = raw.properties.get("summary").unwrap();
        assert!(summary.hidden);
        assert_eq!(summary.source.as_deref(), Some("body"));
        assert_eq!(summary.decode.as_deref(), Some("trim | uppercase"));
    }

    #[test]
    fn test_nested_inline_properties() {
        let raw: RawSchema = serde_yaml::from_str(
            r#"
class: Article
properties:
  author:
    class: Author
    properties:
      name: {}
"#,
        )
        .unwrap();

        let author = raw.properties.get("author").unwrap();
        assert!(author.is_nested());
        assert_eq!(author.class.as_deref(), Some("Author"));
        assert!(author.properties.contains_key("name"));
    }
}
