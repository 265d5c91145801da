use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A resolved network device. Constructed per execution from the inventory
/// provider; never persisted inside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub address: String,
    /// Platform tag used for capability matching and template parsing
    /// (`cisco_ios`, `huawei_vrp`, ...).
    pub platform: String,
    /// Opaque reference handed to the credential provider at connect time.
    #[serde(default)]
    pub credentials_ref: Option<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Device {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Expression designating a device set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    /// A single concrete name.
    Name(String),
    /// Comma-separated list of names.
    Names(Vec<String>),
    /// Every device in the inventory.
    All,
    Group(String),
    Site(String),
    Role(String),
    Platform(String),
}

impl DeviceSelector {
    /// Parse the selector grammar: a name, `a,b,c`, `all`, or a keyed
    /// filter `group:<tag>` / `site:<tag>` / `role:<tag>` /
    /// `platform:<tag>`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("all") {
            return DeviceSelector::All;
        }
        if let Some((key, value)) = raw.split_once(':') {
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "group" => return DeviceSelector::Group(value),
                "site" => return DeviceSelector::Site(value),
                "role" => return DeviceSelector::Role(value),
                "platform" => return DeviceSelector::Platform(value),
                _ => {}
            }
        }
        if raw.contains(',') {
            let names = raw
                .split(',')
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
            return DeviceSelector::Names(names);
        }
        DeviceSelector::Name(raw.to_string())
    }

    /// Whether a device satisfies this selector. Name-based selectors are
    /// handled by the resolver (they also track misses); this predicate
    /// covers the filter forms.
    pub fn filter_matches(&self, device: &Device) -> bool {
        match self {
            DeviceSelector::All => true,
            DeviceSelector::Name(name) => device.name.eq_ignore_ascii_case(name),
            DeviceSelector::Names(names) => {
                names.iter().any(|n| device.name.eq_ignore_ascii_case(n))
            }
            DeviceSelector::Group(tag) => device.groups.contains(tag),
            DeviceSelector::Site(tag) => device.attribute("site") == Some(tag.as_str()),
            DeviceSelector::Role(tag) => device.attribute("role") == Some(tag.as_str()),
            DeviceSelector::Platform(tag) => device.platform.eq_ignore_ascii_case(tag),
        }
    }

    /// The concrete names this selector asks for, if it is name-based.
    pub fn requested_names(&self) -> Option<Vec<&str>> {
        match self {
            DeviceSelector::Name(name) => Some(vec![name.as_str()]),
            DeviceSelector::Names(names) => Some(names.iter().map(String::as_str).collect()),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Name(name) => write!(f, "{name}"),
            DeviceSelector::Names(names) => write!(f, "{}", names.join(",")),
            DeviceSelector::All => write!(f, "all"),
            DeviceSelector::Group(tag) => write!(f, "group:{tag}"),
            DeviceSelector::Site(tag) => write!(f, "site:{tag}"),
            DeviceSelector::Role(tag) => write!(f, "role:{tag}"),
            DeviceSelector::Platform(tag) => write!(f, "platform:{tag}"),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_device(name: &str, platform: &str, groups: &[&str]) -> Device {
    Device {
        name: name.to_string(),
        address: format!("10.0.0.{}", name.len()),
        platform: platform.to_string(),
        credentials_ref: Some("lab".to_string()),
        groups: groups.iter().map(|g| g.to_string()).collect(),
        attributes: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_grammar() {
        assert_eq!(DeviceSelector::parse("ALL"), DeviceSelector::All);
        assert_eq!(
            DeviceSelector::parse("R1"),
            DeviceSelector::Name("R1".into())
        );
        assert_eq!(
            DeviceSelector::parse("R1, R2 ,R3"),
            DeviceSelector::Names(vec!["R1".into(), "R2".into(), "R3".into()])
        );
        assert_eq!(
            DeviceSelector::parse("group:core"),
            DeviceSelector::Group("core".into())
        );
        assert_eq!(
            DeviceSelector::parse("platform:cisco_ios"),
            DeviceSelector::Platform("cisco_ios".into())
        );
    }

    #[test]
    fn unknown_key_is_treated_as_a_name() {
        // "foo:bar" is not a recognised filter key; it resolves (and then
        // misses) as a literal name rather than silently matching nothing.
        assert_eq!(
            DeviceSelector::parse("foo:bar"),
            DeviceSelector::Name("foo:bar".into())
        );
    }

    #[test]
    fn filter_predicates() {
        let mut device = test_device("R1", "cisco_ios", &["core", "edge"]);
        device.attributes.insert("site".into(), "fra1".into());
        device.attributes.insert("role".into(), "pe".into());

        assert!(DeviceSelector::All.filter_matches(&device));
        assert!(DeviceSelector::Group("core".into()).filter_matches(&device));
        assert!(!DeviceSelector::Group("access".into()).filter_matches(&device));
        assert!(DeviceSelector::Site("fra1".into()).filter_matches(&device));
        assert!(DeviceSelector::Role("pe".into()).filter_matches(&device));
        assert!(DeviceSelector::Platform("CISCO_IOS".into()).filter_matches(&device));
        assert!(DeviceSelector::Name("r1".into()).filter_matches(&device));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for raw in ["R1", "R1,R2", "all", "group:core", "site:fra1"] {
            let selector = DeviceSelector::parse(raw);
            assert_eq!(DeviceSelector::parse(&selector.to_string()), selector);
        }
    }
}
