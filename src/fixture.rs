//! Config-store fixtures.
//!
//! Seeds and inspects alias entries through `git config`, scoped to one
//! storage location, so test cases can declare preconditions and assert
//! postconditions without going through the tool under test.

use crate::error::{FixtureError, SandboxError};
use crate::sandbox::SandboxContext;
use schemars::JsonSchema;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Key prefix every alias entry is stored under.
pub const ENTRY_PREFIX: &str = "alias.";

/// The `git config` flags selecting a storage location.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct Location(Vec<String>);

impl Location {
    pub fn new(flags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(flags.into_iter().map(Into::into).collect())
    }

    pub fn global() -> Self {
        Self::new(["--global"])
    }

    pub fn local() -> Self {
        Self::new(["--local"])
    }

    pub fn system() -> Self {
        Self::new(["--system"])
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self(vec!["--file".to_string(), path.into()])
    }

    pub fn flags(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(default location)");
        }
        f.write_str(&self.0.join(" "))
    }
}

/// Alias name to body, in insertion order.
///
/// Order matters when seeding (the tool lists entries in config-file order)
/// but not when comparing: equality is plain mapping equality.
#[derive(Debug, Clone, Default)]
pub struct EntrySet(Vec<(String, String)>);

impl EntrySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry. Replacing keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, body: impl Into<String>) {
        let name = name.into();
        let body = body.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = body,
            None => self.0.push((name, body)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, b)| (n.as_str(), b.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the named entries, in their current order.
    pub fn pick(&self, names: &[&str]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(n, _)| names.contains(&n.as_str()))
                .cloned()
                .collect(),
        )
    }
}

impl PartialEq for EntrySet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(n, b)| other.get(n) == Some(b))
    }
}

impl Eq for EntrySet {}

impl<N: Into<String>, B: Into<String>> FromIterator<(N, B)> for EntrySet {
    fn from_iter<T: IntoIterator<Item = (N, B)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (name, body) in iter {
            set.insert(name, body);
        }
        set
    }
}

impl fmt::Display for EntrySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, body)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name:?}: {body:?}")?;
        }
        f.write_str("}")
    }
}

impl Serialize for EntrySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, body) in self.iter() {
            map.serialize_entry(name, body)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EntrySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = EntrySet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of alias names to bodies")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<EntrySet, A::Error> {
                let mut set = EntrySet::new();
                while let Some((name, body)) = access.next_entry::<String, String>()? {
                    set.insert(name, body);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

impl JsonSchema for EntrySet {
    fn schema_name() -> String {
        "EntrySet".to_string()
    }

    fn json_schema(generator: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
        <BTreeMap<String, String>>::json_schema(generator)
    }
}

/// Read/write access to alias entries at one location of a sandbox.
pub struct ConfigFixture<'a> {
    ctx: &'a SandboxContext,
    location: &'a Location,
}

impl<'a> ConfigFixture<'a> {
    pub fn new(ctx: &'a SandboxContext, location: &'a Location) -> Self {
        Self { ctx, location }
    }

    /// Write every entry, stopping at the first failure. Entries written
    /// before the failure stay written.
    pub fn add_entries(&self, entries: &EntrySet) -> Result<(), FixtureError> {
        for (name, body) in entries.iter() {
            self.ctx
                .execute_checked(&self.git_config([format!("{ENTRY_PREFIX}{name}"), body.to_string()]))
                .map_err(|source| FixtureError::Write {
                    name: name.to_string(),
                    location: self.location.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Every entry currently stored at this location.
    pub fn get_entries(&self) -> Result<EntrySet, FixtureError> {
        let command = self.git_config([
            "--null".to_string(),
            "--get-regex".to_string(),
            format!("^{}", regex::escape(ENTRY_PREFIX)),
        ]);
        let output = match self.ctx.execute_checked(&command) {
            Ok(output) => output,
            // git exits 1 when nothing matches.
            Err(SandboxError::CommandFailed { code: Some(1), .. }) => return Ok(EntrySet::new()),
            Err(source) => {
                return Err(FixtureError::Read {
                    location: self.location.to_string(),
                    source,
                });
            }
        };
        parse_entries(&output.stdout, self.location)
    }

    /// Unset every entry at this location.
    pub fn clear_entries(&self) -> Result<(), FixtureError> {
        for name in self.get_entries()?.names() {
            self.ctx
                .execute_checked(&self.git_config([
                    "--unset-all".to_string(),
                    format!("{ENTRY_PREFIX}{name}"),
                ]))
                .map_err(|source| FixtureError::Unset {
                    name: name.to_string(),
                    location: self.location.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    fn git_config<const N: usize>(&self, args: [String; N]) -> Vec<String> {
        ["git".to_string(), "config".to_string()]
            .into_iter()
            .chain(self.location.flags().iter().cloned())
            .chain(args)
            .collect()
    }
}

/// Parse `git config --null --get-regex` output: NUL-terminated records of
/// `<key>\n<value>`.
fn parse_entries(raw: &str, location: &Location) -> Result<EntrySet, FixtureError> {
    let mut entries = EntrySet::new();
    for record in raw.split('\0').filter(|r| !r.is_empty()) {
        let (key, body) = record
            .split_once('\n')
            .ok_or_else(|| FixtureError::Malformed {
                location: location.to_string(),
                record: record.to_string(),
            })?;
        let name = key.strip_prefix(ENTRY_PREFIX).unwrap_or(key);
        entries.insert(name, body);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxSettings;
    use tempfile::tempdir;

    fn sandbox() -> (tempfile::TempDir, SandboxContext) {
        let tool = tempdir().unwrap();
        let mut settings = SandboxSettings::new(tool.path());
        settings.scripts.clear();
        let ctx = SandboxContext::create(&settings).unwrap();
        (tool, ctx)
    }

    fn common() -> EntrySet {
        [
            ("foo", "diff"),
            ("ml", "!echo foo\necho bar"),
            ("func", "!f() {}; f"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn parse_splits_on_first_newline() {
        let raw = "alias.foo\ndiff\0alias.ml\n!echo foo\necho bar\0";
        let entries = parse_entries(raw, &Location::global()).unwrap();
        assert_eq!(entries.get("foo"), Some("diff"));
        assert_eq!(entries.get("ml"), Some("!echo foo\necho bar"));
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn parse_rejects_record_without_value() {
        let err = parse_entries("alias.foo\0", &Location::global()).unwrap_err();
        assert!(matches!(err, FixtureError::Malformed { .. }));
    }

    #[test]
    fn entry_set_equality_ignores_order() {
        let a: EntrySet = [("a", "1"), ("b", "2")].into_iter().collect();
        let b: EntrySet = [("b", "2"), ("a", "1")].into_iter().collect();
        let c: EntrySet = [("a", "1"), ("b", "3")].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, a.pick(&["a"]));
    }

    #[test]
    fn entry_set_yaml_keeps_document_order() {
        let set: EntrySet = serde_yaml::from_str("zeta: z\nalpha: a\nmid: m\n").unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn location_display_joins_flags() {
        assert_eq!(Location::file("some file").to_string(), "--file some file");
        assert_eq!(Location::global().to_string(), "--global");
    }

    #[test]
    fn empty_location_reads_as_empty() {
        let (_tool, ctx) = sandbox();
        for location in [Location::global(), Location::local(), Location::system()] {
            let entries = ConfigFixture::new(&ctx, &location).get_entries().unwrap();
            assert!(entries.is_empty(), "{location}: {entries}");
        }
    }

    #[test]
    fn add_get_clear_round_trip() {
        let (_tool, ctx) = sandbox();
        let location = Location::global();
        let fixture = ConfigFixture::new(&ctx, &location);

        fixture.add_entries(&common()).unwrap();
        assert_eq!(fixture.get_entries().unwrap(), common());

        fixture.clear_entries().unwrap();
        assert!(fixture.get_entries().unwrap().is_empty());
    }

    #[test]
    fn locations_do_not_leak_into_each_other() {
        let (_tool, ctx) = sandbox();
        let global = Location::global();
        let file = Location::file("gitconfig-specific-file");
        let other: EntrySet = [("other", "log")].into_iter().collect();
        ConfigFixture::new(&ctx, &global)
            .add_entries(&common())
            .unwrap();
        ConfigFixture::new(&ctx, &file).add_entries(&other).unwrap();

        assert_eq!(ConfigFixture::new(&ctx, &global).get_entries().unwrap(), common());
        assert_eq!(ConfigFixture::new(&ctx, &file).get_entries().unwrap(), other);
        assert!(
            ConfigFixture::new(&ctx, &Location::system())
                .get_entries()
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn separate_sandboxes_do_not_share_entries() {
        let (_tool_a, a) = sandbox();
        let (_tool_b, b) = sandbox();
        let location = Location::global();
        ConfigFixture::new(&a, &location)
            .add_entries(&common())
            .unwrap();
        assert!(ConfigFixture::new(&b, &location).get_entries().unwrap().is_empty());
    }

    #[test]
    fn failed_write_keeps_earlier_entries() {
        let (_tool, ctx) = sandbox();
        let location = Location::global();
        let fixture = ConfigFixture::new(&ctx, &location);
        // An empty name is not a valid config key.
        let entries: EntrySet = [("ok", "diff"), ("", "broken"), ("never", "x")]
            .into_iter()
            .collect();

        let err = fixture.add_entries(&entries).unwrap_err();
        assert!(matches!(err, FixtureError::Write { ref name, .. } if name.is_empty()));
        let stored = fixture.get_entries().unwrap();
        assert_eq!(stored, [("ok", "diff")].into_iter().collect());
    }
}
