use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(u32);

impl TaxId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix("taxon:")
            .or_else(|| trimmed.strip_prefix("NCBITaxon:"))
            .unwrap_or(trimmed);
        match digits.parse::<u32>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(KiraError::InvalidTaxId(value.to_string())),
        }
    }
}

impl TryFrom<String> for TaxId {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.to_string()
    }
}

/// Scientific name used by Reactome for the organisms GO publishes annotations for.
pub fn species_name(taxid: TaxId) -> Option<&'static str> {
    match taxid.get() {
        9606 => Some("Homo sapiens"),
        10090 => Some("Mus musculus"),
        10116 => Some("Rattus norvegicus"),
        7955 => Some("Danio rerio"),
        7227 => Some("Drosophila melanogaster"),
        6239 => Some("Caenorhabditis elegans"),
        559292 => Some("Saccharomyces cerevisiae"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Prod,
    Test,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Prod => write!(f, "prod"),
            RunMode::Test => write!(f, "test"),
        }
    }
}

impl FromStr for RunMode {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "prod" | "production" | "live" => Ok(RunMode::Prod),
            "test" | "dry-run" => Ok(RunMode::Test),
            _ => Err(KiraError::InvalidRunMode(value.to_string())),
        }
    }
}

/// What the loader does with an edge whose endpoint is not in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EdgePolicy {
    #[default]
    Skip,
    Fail,
}

impl fmt::Display for EdgePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgePolicy::Skip => write!(f, "skip"),
            EdgePolicy::Fail => write!(f, "fail"),
        }
    }
}

impl FromStr for EdgePolicy {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "skip" => Ok(EdgePolicy::Skip),
            "fail" | "fail-fast" => Ok(EdgePolicy::Fail),
            _ => Err(KiraError::InvalidEdgePolicy(value.to_string())),
        }
    }
}

/// How often an upstream dataset publishes, which fixes the version a fresh
/// local copy must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCadence {
    Monthly,
    Fixed(&'static str),
}

impl ReleaseCadence {
    pub fn version_for(self, today: NaiveDate) -> String {
        match self {
            ReleaseCadence::Monthly => today.format("%Y-%m").to_string(),
            ReleaseCadence::Fixed(release) => release.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_taxid_prefixed() {
        let id: TaxId = "taxon:9606".parse().unwrap();
        assert_eq!(id.get(), 9606);
    }

    #[test]
    fn parse_taxid_invalid() {
        let err = "human".parse::<TaxId>().unwrap_err();
        assert_matches!(err, KiraError::InvalidTaxId(_));
        let err = "0".parse::<TaxId>().unwrap_err();
        assert_matches!(err, KiraError::InvalidTaxId(_));
    }

    #[test]
    fn monthly_version() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(ReleaseCadence::Monthly.version_for(date), "2026-03");
        assert_eq!(ReleaseCadence::Fixed("v8").version_for(date), "v8");
    }
}
