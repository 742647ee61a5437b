//! Subject Builder — derives the wire subject tuple from a schema name.

use serde::Serialize;

/// One `(base, wildcard)` pair for a single CRUD method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectGroup {
    pub base: String,
    pub wildcard: String,
}

impl SubjectGroup {
    fn new(base: String) -> Self {
        let wildcard = format!("{base}.>");
        Self { base, wildcard }
    }
}

/// The four subject groups a schema is routed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subjects {
    pub count: SubjectGroup,
    pub create: SubjectGroup,
    pub find: SubjectGroup,
    pub update: SubjectGroup,
}

/// Prefixes for each method, defaulting to `count`/`create`/`find`/`update`.
#[derive(Debug, Clone)]
pub struct Prefixes {
    pub count: String,
    pub create: String,
    pub find: String,
    pub update: String,
}

impl Default for Prefixes {
    fn default() -> Self {
        Self {
            count: "count".to_string(),
            create: "create".to_string(),
            find: "find".to_string(),
            update: "update".to_string(),
        }
    }
}

impl Prefixes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, prefix: impl Into<String>) -> Self {
        self.count = prefix.into();
        self
    }

    pub fn with_create(mut self, prefix: impl Into<String>) -> Self {
        self.create = prefix.into();
        self
    }

    pub fn with_find(mut self, prefix: impl Into<String>) -> Self {
        self.find = prefix.into();
        self
    }

    pub fn with_update(mut self, prefix: impl Into<String>) -> Self {
        self.update = prefix.into();
        self
    }
}

/// Options controlling subject derivation: `{prefixes?, suffix?}`.
#[derive(Debug, Clone, Default)]
pub struct SubjectOptions {
    pub prefixes: Prefixes,
    pub suffix: String,
}

impl SubjectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefixes(mut self, prefixes: Prefixes) -> Self {
        self.prefixes = prefixes;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }
}

/// Build the subject tuple for a schema name.
///
/// `name` is lowercased; each base is `{prefix}.{lowercase-name}[.suffix]`
/// and the wildcard is the base with `.>` appended.
pub fn build(name: &str, opts: &SubjectOptions) -> Subjects {
    let lower = name.to_lowercase();
    let make = |prefix: &str| {
        let base = if opts.suffix.is_empty() {
            format!("{prefix}.{lower}")
        } else {
            format!("{prefix}.{lower}.{}", opts.suffix)
        };
        SubjectGroup::new(base)
    };

    Subjects {
        count: make(&opts.prefixes.count),
        create: make(&opts.prefixes.create),
        find: make(&opts.prefixes.find),
        update: make(&opts.prefixes.update),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_name_and_uses_default_prefixes() {
        let subjects = build("Schema", &SubjectOptions::default());
        assert_eq!(subjects.count.base, "count.schema");
        assert_eq!(subjects.count.wildcard, "count.schema.>");
        assert_eq!(subjects.create.base, "create.schema");
        assert_eq!(subjects.find.base, "find.schema");
        assert_eq!(subjects.update.base, "update.schema");
    }

    #[test]
    fn appends_suffix_with_dot_separator() {
        let opts = SubjectOptions {
            suffix: "v2".to_string(),
            ..Default::default()
        };
        let subjects = build("Widget", &opts);
        assert_eq!(subjects.create.base, "create.widget.v2");
        assert_eq!(subjects.create.wildcard, "create.widget.v2.>");
    }

    #[test]
    fn honors_custom_prefixes() {
        let opts = SubjectOptions {
            prefixes: Prefixes {
                count: "cnt".to_string(),
                ..Prefixes::default()
            },
            ..Default::default()
        };
        let subjects = build("thing", &opts);
        assert_eq!(subjects.count.base, "cnt.thing");
    }

    #[test]
    fn every_group_has_two_subjects() {
        let subjects = build("anything", &SubjectOptions::default());
        for group in [
            &subjects.count,
            &subjects.create,
            &subjects.find,
            &subjects.update,
        ] {
            assert!(group.wildcard.starts_with(&group.base));
            assert!(group.wildcard.ends_with(".>"));
        }
    }
}
