//! Value types stored in item extension fields.

use serde::{Deserialize, Serialize};

/// Impact and risk assessment levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Level::Low),
            "medium" => Ok(Level::Medium),
            "high" => Ok(Level::High),
            _ => anyhow::bail!("Invalid level '{}'. Valid values: low, medium, high", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeLevel {
    Small,
    Medium,
    Large,
}

impl SizeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SizeLevel::Small => "small",
            SizeLevel::Medium => "medium",
            SizeLevel::Large => "large",
        }
    }
}

impl std::fmt::Display for SizeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SizeLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" => Ok(SizeLevel::Small),
            "medium" => Ok(SizeLevel::Medium),
            "large" => Ok(SizeLevel::Large),
            _ => anyhow::bail!("Invalid size '{}'. Valid values: small, medium, large", s),
        }
    }
}

/// Why an item is waiting on a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    /// A question needs answering before work can continue
    Clarification,
    /// A choice between alternatives needs to be made
    Decision,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Clarification => "clarification",
            BlockType::Decision => "decision",
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BlockType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clarification" => Ok(BlockType::Clarification),
            "decision" => Ok(BlockType::Decision),
            _ => anyhow::bail!(
                "Invalid block type '{}'. Valid values: clarification, decision",
                s
            ),
        }
    }
}

/// Fixed-shape description kept as a single extension value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredDescription {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub sizing_rationale: String,
}

impl StructuredDescription {
    pub fn with_context(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.problem.is_empty()
            && self.solution.is_empty()
            && self.impact.is_empty()
            && self.sizing_rationale.is_empty()
    }

    /// Field-wise concatenation used when two items are merged.
    ///
    /// Empty fields on either side are dropped rather than joined.
    pub fn concat(&self, other: &StructuredDescription) -> StructuredDescription {
        fn join(a: &str, b: &str) -> String {
            match (a.trim().is_empty(), b.trim().is_empty()) {
                (true, true) => String::new(),
                (false, true) => a.to_string(),
                (true, false) => b.to_string(),
                (false, false) => format!("{}\n\n{}", a, b),
            }
        }

        StructuredDescription {
            context: join(&self.context, &other.context),
            problem: join(&self.problem, &other.problem),
            solution: join(&self.solution, &other.solution),
            impact: join(&self.impact, &other.impact),
            sizing_rationale: join(&self.sizing_rationale, &other.sizing_rationale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_low_to_high() {
        assert!(Level::Low < Level::Medium);
        assert!(Level::Medium < Level::High);
        assert_eq!("HIGH".parse::<Level>().unwrap(), Level::High);
        assert!("huge".parse::<Level>().is_err());
        assert_eq!("large".parse::<SizeLevel>().unwrap(), SizeLevel::Large);
    }

    #[test]
    fn block_type_parses() {
        assert_eq!(
            "decision".parse::<BlockType>().unwrap(),
            BlockType::Decision
        );
        assert!("question".parse::<BlockType>().is_err());
    }

    #[test]
    fn concat_skips_empty_fields() {
        let a = StructuredDescription {
            context: "Login is slow".into(),
            problem: "N+1 queries".into(),
            ..Default::default()
        };
        let b = StructuredDescription {
            context: "Signup is slow too".into(),
            solution: "Batch the lookups".into(),
            ..Default::default()
        };
        let merged = a.concat(&b);
        assert_eq!(merged.context, "Login is slow\n\nSignup is slow too");
        assert_eq!(merged.problem, "N+1 queries");
        assert_eq!(merged.solution, "Batch the lookups");
        assert!(merged.impact.is_empty());
    }

    #[test]
    fn missing_fields_deserialize_as_empty() {
        let desc: StructuredDescription =
            serde_json::from_str(r#"{"context": "only context"}"#).unwrap();
        assert_eq!(desc, StructuredDescription::with_context("only context"));
        assert!(!desc.is_empty());
        assert!(StructuredDescription::default().is_empty());
    }
}
