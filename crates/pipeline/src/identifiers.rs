//! Newtype domain identifiers.
//!
//! Every domain concept with an identity is a distinct newtype wrapping a
//! primitive, so a [`UnitId`] can never be handed somewhere a [`SessionId`]
//! is expected even though both could be rendered as strings.
//!
//! [`UnitId`] deserves a note: descriptor files historically used fractional
//! forms (`"4"`, `"4.5"`) to slot a unit between two neighbours without
//! renumbering. Internally the id is an ordered `(major, minor)` pair of
//! integers; ordering is always numeric, never lexicographic, so `4.10`
//! sorts after `4.5`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// UnitId
// ---------------------------------------------------------------------------

/// Identifies one unit (station) of the pipeline.
///
/// Parsed from the `"major"` or `"major.minor"` textual forms used by
/// descriptor files and file names. A bare major renders without the `.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId {
    major: u32,
    minor: u32,
}

impl UnitId {
    /// Creates a [`UnitId`] from its major/minor parts.
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Creates a [`UnitId`] with a zero minor part.
    pub fn major(major: u32) -> Self {
        Self { major, minor: 0 }
    }

    /// Returns the major part.
    pub fn major_part(self) -> u32 {
        self.major
    }

    /// Returns the minor part (`0` for whole-numbered units).
    pub fn minor_part(self) -> u32 {
        self.minor
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

/// Error produced when a textual unit id cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid unit id '{text}': expected 'major' or 'major.minor' with integer parts")]
pub struct ParseUnitIdError {
    /// The text that failed to parse.
    pub text: String,
}

impl FromStr for UnitId {
    type Err = ParseUnitIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseUnitIdError { text: s.to_string() };
        let mut parts = s.splitn(2, '.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(err)?;
        let minor = match parts.next() {
            None => 0,
            Some(p) => p.parse::<u32>().map_err(|_| err())?,
        };
        Ok(Self { major, minor })
    }
}

impl Serialize for UnitId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UnitId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Descriptor files may write `"id": 4` or `"id": "4.5"`.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u32),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Number(major) => Ok(UnitId::major(major)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Correlates all units' outputs for one end-to-end pipeline run.
///
/// Generated fresh when a run starts and passed back verbatim to resume it;
/// propagated through spans and progress events so all activity for a single
/// session can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`SessionId`] from an existing UUID (e.g. from a resume request).
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// A dotted path to one leaf inside a produced payload
/// (e.g. `"regions[2].settlements[0].name"`).
///
/// Used by validation violations to point at the exact offending field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath(String);

impl FieldPath {
    /// The path of a payload root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Creates a [`FieldPath`] from a pre-rendered path string.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns a child path for an object key.
    pub fn key(&self, key: &str) -> Self {
        if self.0.is_empty() {
            Self(key.to_string())
        } else {
            Self(format!("{}.{}", self.0, key))
        }
    }

    /// Returns a child path for an array index.
    pub fn index(&self, idx: usize) -> Self {
        Self(format!("{}[{}]", self.0, idx))
    }

    /// Returns the final object key of this path, if any.
    ///
    /// Index segments are skipped: the leaf key of `regions[2].name` and of
    /// `names[3]` are `name` and `names` respectively.
    pub fn leaf_key(&self) -> Option<&str> {
        self.0
            .rsplit('.')
            .next()
            .map(|seg| seg.split('[').next().unwrap_or(seg))
            .filter(|k| !k.is_empty())
    }

    /// Returns the path as a string slice (empty for the root).
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "$")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_id_parses_major_and_minor_forms() {
        assert_eq!("4".parse::<UnitId>().unwrap(), UnitId::major(4));
        assert_eq!("4.5".parse::<UnitId>().unwrap(), UnitId::new(4, 5));
        assert!("".parse::<UnitId>().is_err());
        assert!("4.".parse::<UnitId>().is_err());
        assert!("a.b".parse::<UnitId>().is_err());
        assert!("4.5.6".parse::<UnitId>().is_err());
    }

    #[test]
    fn unit_id_orders_numerically_not_lexicographically() {
        // "4.10" < "4.5" as strings; numerically the opposite must hold.
        let a: UnitId = "4.5".parse().unwrap();
        let b: UnitId = "4.10".parse().unwrap();
        assert!(a < b);
        assert!(UnitId::major(4) < a);
        assert!(a < UnitId::major(5));
    }

    #[test]
    fn unit_id_display_omits_zero_minor() {
        assert_eq!(UnitId::major(7).to_string(), "7");
        assert_eq!(UnitId::new(4, 5).to_string(), "4.5");
    }

    #[test]
    fn unit_id_deserialises_from_number_or_string() {
        let n: UnitId = serde_json::from_str("4").unwrap();
        let s: UnitId = serde_json::from_str("\"4.5\"").unwrap();
        assert_eq!(n, UnitId::major(4));
        assert_eq!(s, UnitId::new(4, 5));
    }

    #[test]
    fn field_path_renders_keys_and_indices() {
        let p = FieldPath::root().key("regions").index(2).key("name");
        assert_eq!(p.as_str(), "regions[2].name");
        assert_eq!(p.leaf_key(), Some("name"));
        assert_eq!(FieldPath::root().key("names").index(3).leaf_key(), Some("names"));
        assert_eq!(FieldPath::root().leaf_key(), None);
    }
}
