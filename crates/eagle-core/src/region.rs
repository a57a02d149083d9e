use crate::error::{EagleError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// RegionRole
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionRole {
    Primary,
    Secondary,
}

impl RegionRole {
    pub fn as_str(self) -> &'static str {
        match self {
            RegionRole::Primary => "primary",
            RegionRole::Secondary => "secondary",
        }
    }
}

impl fmt::Display for RegionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

/// An independent deployment target: one cluster reached through one
/// control-plane context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub role: RegionRole,
    /// kubectl context name. Defaults to `eagle-<id>` when omitted.
    #[serde(default)]
    pub context: Option<String>,
}

impl Region {
    pub fn new(id: impl Into<String>, role: RegionRole) -> Self {
        Self {
            id: id.into(),
            role,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn context(&self) -> String {
        self.context
            .clone()
            .unwrap_or_else(|| format!("eagle-{}", self.id))
    }

    pub fn is_primary(&self) -> bool {
        self.role == RegionRole::Primary
    }
}

// ---------------------------------------------------------------------------
// RegionSet
// ---------------------------------------------------------------------------

/// The active region set. Construction and `promote` both enforce exactly
/// one primary and unique region ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RegionSet {
    regions: Vec<Region>,
}

impl RegionSet {
    pub fn new(regions: Vec<Region>) -> Result<Self> {
        if regions.is_empty() {
            return Err(EagleError::InvalidRegionSet("no regions configured".into()));
        }
        let primaries = regions.iter().filter(|r| r.is_primary()).count();
        if primaries != 1 {
            return Err(EagleError::InvalidRegionSet(format!(
                "expected exactly one primary region, found {primaries}"
            )));
        }
        for (i, r) in regions.iter().enumerate() {
            if r.id.trim().is_empty() {
                return Err(EagleError::InvalidRegionSet("empty region id".into()));
            }
            if regions[..i].iter().any(|o| o.id == r.id) {
                return Err(EagleError::InvalidRegionSet(format!(
                    "duplicate region '{}'",
                    r.id
                )));
            }
        }
        Ok(Self { regions })
    }

    /// Primary followed by secondaries, in the order given.
    pub fn from_pair(primary: &str, secondary: Option<&str>) -> Result<Self> {
        let mut regions = vec![Region::new(primary, RegionRole::Primary)];
        if let Some(s) = secondary {
            regions.push(Region::new(s, RegionRole::Secondary));
        }
        Self::new(regions)
    }

    pub fn primary(&self) -> &Region {
        // Construction guarantees a primary exists.
        self.regions
            .iter()
            .find(|r| r.is_primary())
            .unwrap_or(&self.regions[0])
    }

    pub fn secondaries(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(|r| !r.is_primary())
    }

    pub fn get(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn into_vec(self) -> Vec<Region> {
        self.regions
    }

    /// Swap roles so `id` becomes primary and the old primary a secondary.
    pub fn promote(&mut self, id: &str) -> Result<()> {
        let target = self
            .regions
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| EagleError::RegionNotFound(id.to_string()))?;
        if self.regions[target].is_primary() {
            return Err(EagleError::InvalidRegionSet(format!(
                "region '{id}' is already primary"
            )));
        }
        for r in &mut self.regions {
            r.role = RegionRole::Secondary;
        }
        self.regions[target].role = RegionRole::Primary;
        Ok(())
    }
}

impl<'de> Deserialize<'de> for RegionSet {
    fn deserialize<D>(d: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let regions = Vec::<Region>::deserialize(d)?;
        RegionSet::new(regions).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> RegionSet {
        RegionSet::from_pair("us-east-1", Some("us-west-2")).unwrap()
    }

    #[test]
    fn pair_has_single_primary() {
        let set = pair();
        assert_eq!(set.primary().id, "us-east-1");
        let secs: Vec<_> = set.secondaries().map(|r| r.id.as_str()).collect();
        assert_eq!(secs, vec!["us-west-2"]);
    }

    #[test]
    fn rejects_two_primaries() {
        let err = RegionSet::new(vec![
            Region::new("a", RegionRole::Primary),
            Region::new("b", RegionRole::Primary),
        ])
        .unwrap_err();
        assert!(matches!(err, EagleError::InvalidRegionSet(_)));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = RegionSet::new(vec![
            Region::new("a", RegionRole::Primary),
            Region::new("a", RegionRole::Secondary),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn promote_swaps_roles() {
        let mut set = pair();
        set.promote("us-west-2").unwrap();
        assert_eq!(set.primary().id, "us-west-2");
        assert_eq!(set.iter().filter(|r| r.is_primary()).count(), 1);
        assert_eq!(
            set.get("us-east-1").unwrap().role,
            RegionRole::Secondary
        );
    }

    #[test]
    fn promote_unknown_region_fails() {
        let mut set = pair();
        assert!(matches!(
            set.promote("eu-west-1"),
            Err(EagleError::RegionNotFound(_))
        ));
    }

    #[test]
    fn default_context_is_prefixed() {
        let r = Region::new("us-east-1", RegionRole::Primary);
        assert_eq!(r.context(), "eagle-us-east-1");
        let r = r.with_context("prod-east");
        assert_eq!(r.context(), "prod-east");
    }

    #[test]
    fn yaml_with_two_primaries_is_rejected() {
        let yaml = "- id: a\n  role: primary\n- id: b\n  role: primary\n";
        assert!(serde_yaml::from_str::<RegionSet>(yaml).is_err());
    }
}
