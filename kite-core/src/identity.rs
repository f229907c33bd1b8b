//! Kite identity and registry query types (spec §3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KiteError, Result};

/// The seven fields that uniquely place a Kite in the registry tree, fixed
/// in this order everywhere a path is built or queried (spec §4.6).
pub const FIELD_ORDER: [&str; 7] = [
    "username",
    "environment",
    "name",
    "version",
    "region",
    "hostname",
    "id",
];

/// A running Kite's identity (spec §3). Born at process start, dies with
/// the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KiteIdentity {
    pub username: String,
    pub environment: String,
    pub name: String,
    /// Must be a 3-component semantic version, e.g. "1.0.3".
    pub version: String,
    pub region: String,
    pub hostname: String,
    /// Fresh UUID per process instance (spec invariant I3).
    pub id: Uuid,
    /// The URL at which this process can be reached.
    pub url: String,
}

impl KiteIdentity {
    /// Construct a fresh identity with a newly generated id.
    pub fn new(
        username: impl Into<String>,
        environment: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        region: impl Into<String>,
        hostname: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<Self> {
        let identity = KiteIdentity {
            username: username.into(),
            environment: environment.into(),
            name: name.into(),
            version: version.into(),
            region: region.into(),
            hostname: hostname.into(),
            id: Uuid::new_v4(),
            url: url.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// None of the seven fields may contain `/` or be empty (spec §3).
    pub fn validate(&self) -> Result<()> {
        validate_version(&self.version)?;
        for (field, value) in [
            ("username", self.username.as_str()),
            ("environment", self.environment.as_str()),
            ("name", self.name.as_str()),
            ("version", self.version.as_str()),
            ("region", self.region.as_str()),
            ("hostname", self.hostname.as_str()),
        ] {
            validate_field(field, value)?;
        }
        Ok(())
    }

    /// The canonical slash-joined form (spec §3, §6):
    /// `/username/environment/name/version/region/hostname/id`.
    pub fn canonical(&self) -> String {
        format!(
            "/{}/{}/{}/{}/{}/{}/{}",
            self.username, self.environment, self.name, self.version, self.region, self.hostname, self.id
        )
    }

    /// A `Query` that matches exactly this identity (all fields populated).
    pub fn as_query(&self) -> Query {
        Query {
            username: self.username.clone(),
            environment: self.environment.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            region: self.region.clone(),
            hostname: self.hostname.clone(),
            id: self.id.to_string(),
        }
    }
}

fn validate_field(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(KiteError::Argument(format!("{field} must not be empty")));
    }
    if value.contains('/') {
        return Err(KiteError::Argument(format!("{field} must not contain '/'")));
    }
    Ok(())
}

/// A 3-digit (N.N.N) semantic version, per spec §3.
fn validate_version(version: &str) -> Result<()> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        return Err(KiteError::Argument(format!(
            "version must be 3-digit semantic (got {version})"
        )));
    }
    Ok(())
}

/// A registry lookup. Uses the same seven fields as `KiteIdentity`; any
/// empty field is a wildcard, and wildcards are only meaningful at the tail
/// of the fixed field order (spec §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub id: String,
}

impl Query {
    /// Field values in `FIELD_ORDER`, empty string meaning wildcard.
    pub fn fields(&self) -> [&str; 7] {
        [
            &self.username,
            &self.environment,
            &self.name,
            &self.version,
            &self.region,
            &self.hostname,
            &self.id,
        ]
    }

    /// Whether this query matches the given identity's seven-tuple.
    pub fn matches(&self, identity: &KiteIdentity) -> bool {
        let id_str = identity.id.to_string();
        let candidate = [
            identity.username.as_str(),
            identity.environment.as_str(),
            identity.name.as_str(),
            identity.version.as_str(),
            identity.region.as_str(),
            identity.hostname.as_str(),
            id_str.as_str(),
        ];
        self.fields()
            .iter()
            .zip(candidate.iter())
            .all(|(q, c)| q.is_empty() || q == c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_round_trips_fields() {
        let id = KiteIdentity::new("alice", "prod", "square", "1.0.0", "us-east", "host-1", "ws://host-1:1234")
            .unwrap();
        let canon = id.canonical();
        assert_eq!(canon.matches('/').count(), 7);
        assert!(canon.starts_with("/alice/prod/square/1.0.0/us-east/host-1/"));
    }

    #[test]
    fn rejects_slash_in_field() {
        let err = KiteIdentity::new("al/ice", "prod", "square", "1.0.0", "us-east", "host-1", "ws://x")
            .unwrap_err();
        assert_eq!(err.kind(), "argument");
    }

    #[test]
    fn rejects_non_three_digit_version() {
        let err = KiteIdentity::new("alice", "prod", "square", "1.0", "us-east", "host-1", "ws://x").unwrap_err();
        assert_eq!(err.kind(), "argument");
    }

    #[test]
    fn query_wildcards_match_prefix() {
        let id = KiteIdentity::new("alice", "prod", "square", "1.0.0", "us-east", "host-1", "ws://x").unwrap();
        let q = Query {
            name: "square".into(),
            ..Default::default()
        };
        assert!(q.matches(&id));

        let q2 = Query {
            name: "circle".into(),
            ..Default::default()
        };
        assert!(!q2.matches(&id));
    }
}
