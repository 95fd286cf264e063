//! Binding path expressions.
//!
//! A path navigates from the node holding a binding to the field the
//! binding derives its value from: an ascent step (implicit, a fixed
//! level count, or an ancestor-type match) followed by named descent.

use crate::error::Error;
use internment::Intern;
use std::fmt;

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) enum Ascent {
    /// Nearest ancestor that has a child matching the first segment.
    Auto,
    /// Up exactly `n` levels.
    Levels(usize),
    /// Up to the nearest ancestor of the named type (or a type derived
    /// from it).
    ByType(Intern<String>),
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) struct BindingPath {
    pub ascent: Ascent,
    pub segments: Vec<Intern<String>>,
    text: String,
}

impl BindingPath {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::BindingPathInvalid(text.to_owned()));
        }

        let mut ascent = Ascent::Auto;
        let mut segments = Vec::new();
        for (idx, part) in trimmed.split('/').enumerate() {
            match part {
                "" => return Err(Error::BindingPathInvalid(text.to_owned())),
                ".." => match ascent {
                    Ascent::Auto if idx == 0 => ascent = Ascent::Levels(1),
                    Ascent::Levels(n) if segments.is_empty() => ascent = Ascent::Levels(n + 1),
                    _ => return Err(Error::BindingPathInvalid(text.to_owned())),
                },
                name if name.starts_with('@') => {
                    if idx != 0 || name.len() == 1 {
                        return Err(Error::BindingPathInvalid(text.to_owned()));
                    }
                    ascent = Ascent::ByType(Intern::from_ref(&name[1..]));
                }
                name => segments.push(Intern::from_ref(name)),
            }
        }

        if segments.is_empty() && !matches!(ascent, Ascent::Levels(_)) {
            return Err(Error::BindingPathInvalid(text.to_owned()));
        }

        Ok(Self {
            ascent,
            segments,
            text: trimmed.to_owned(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for BindingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bare_name_is_auto_ascent() {
        let p = BindingPath::parse("length").unwrap();
        assert_eq!(p.ascent, Ascent::Auto);
        assert_eq!(p.segments.len(), 1);
        assert_eq!(p.segments[0].as_str(), "length");
    }

    #[test]
    fn dotdot_counts_levels() {
        let p = BindingPath::parse("../../header/length").unwrap();
        assert_eq!(p.ascent, Ascent::Levels(2));
        assert_eq!(
            p.segments.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            vec!["header", "length"]
        );
    }

    #[test]
    fn at_prefix_matches_ancestor_type() {
        let p = BindingPath::parse("@packet/length").unwrap();
        assert_eq!(p.ascent, Ascent::ByType(Intern::from_ref("packet")));
    }

    #[test]
    fn ancestor_only_path_needs_levels() {
        assert!(BindingPath::parse("..").is_ok());
        assert!(BindingPath::parse("@packet").is_err());
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(BindingPath::parse("").is_err());
        assert!(BindingPath::parse("a//b").is_err());
        assert!(BindingPath::parse("a/../b").is_err());
    }
}
