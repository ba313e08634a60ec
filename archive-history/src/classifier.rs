//! Inspection vs. construction classification
//!
//! Rules are evaluated in [`ClassificationRule::ORDER`] and the first match
//! wins. A later, weaker signal never withdraws an inspection match, and a
//! folder with no signal at all is construction.
//!
//! | Rule | Signal |
//! |---|---|
//! | `NameMatch` | folder name mentions inspection, assessment, site visit or visit |
//! | `ReportMatch` | subtree holds a `.pdf` whose name contains "inspection" |
//! | `MetadataMatch` | `note.txt` names an inspector |
//! | `Default` | always matches; construction |

use archive_common::events::RecordCategory;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

use crate::metadata::RecordMetadata;
use crate::snapshot::{ArchiveNode, TraversalLimits};
use crate::sort_key::normalize_separators;

static INSPECTION_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(inspection|assessment|site\s*visit|sitevisit|visit)")
        .expect("valid inspection name regex")
});

static STATION_INFO_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^station[_\s-]*info$").expect("valid station info regex"));

static EMAIL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)email").expect("valid email regex"));

/// Folders that are never records (administrative or mail archives)
pub fn is_excluded(name: &str) -> bool {
    STATION_INFO_DIR.is_match(name) || EMAIL_NAME.is_match(name)
}

pub fn name_signals_inspection(name: &str) -> bool {
    INSPECTION_NAME.is_match(&normalize_separators(name))
}

fn is_inspection_report(node: &ArchiveNode) -> bool {
    if !node.is_file() {
        return false;
    }
    let lower = node.name.to_lowercase();
    lower.ends_with(".pdf") && lower.contains("inspection")
}

/// Path of the first inspection PDF under `record`, in pre-order
pub fn find_inspection_report(record: &ArchiveNode, limits: TraversalLimits) -> Option<PathBuf> {
    record
        .find_first(limits, is_inspection_report)
        .and_then(|n| n.path.clone())
}

/// Everything a rule may look at
pub struct ClassificationInput<'a> {
    pub folder: &'a ArchiveNode,
    pub metadata: &'a RecordMetadata,
    pub limits: TraversalLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationRule {
    NameMatch,
    ReportMatch,
    MetadataMatch,
    Default,
}

impl ClassificationRule {
    /// Evaluation order, most decisive first
    pub const ORDER: [ClassificationRule; 4] = [
        ClassificationRule::NameMatch,
        ClassificationRule::ReportMatch,
        ClassificationRule::MetadataMatch,
        ClassificationRule::Default,
    ];

    /// Category assigned when this rule matches
    pub fn category(self) -> RecordCategory {
        match self {
            ClassificationRule::Default => RecordCategory::Construction,
            _ => RecordCategory::Inspection,
        }
    }

    pub fn matches(self, input: &ClassificationInput<'_>) -> bool {
        match self {
            ClassificationRule::NameMatch => name_signals_inspection(&input.folder.name),
            ClassificationRule::ReportMatch => {
                input.folder.find_first(input.limits, is_inspection_report).is_some()
            }
            ClassificationRule::MetadataMatch => input.metadata.has_inspector(),
            ClassificationRule::Default => true,
        }
    }
}

/// Outcome of classification, with the rule that decided it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: RecordCategory,
    pub rule: ClassificationRule,
}

pub fn classify(input: &ClassificationInput<'_>) -> Classification {
    for rule in ClassificationRule::ORDER {
        if rule.matches(input) {
            debug!("{} classified by {:?}", input.folder.name, rule);
            return Classification {
                category: rule.category(),
                rule,
            };
        }
    }
    Classification {
        category: RecordCategory::Construction,
        rule: ClassificationRule::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(name: &str, children: Vec<ArchiveNode>) -> ArchiveNode {
        let mut node = ArchiveNode::folder(name, Some(PathBuf::from("/r").join(name)), 0)
            .with_children(children);
        node.normalize(TraversalLimits::default());
        node
    }

    fn classify_with(node: &ArchiveNode, metadata: &RecordMetadata) -> Classification {
        classify(&ClassificationInput {
            folder: node,
            metadata,
            limits: TraversalLimits::default(),
        })
    }

    #[test]
    fn test_name_rule_ignores_separator_style_and_case() {
        for name in [
            "2015-cableway-inspection",
            "2015_CABLEWAY_INSPECTION",
            "2015 cableway inspection",
            "2018 Site_Visit",
            "2018 sitevisit",
            "2020 Bank Assessment",
        ] {
            let node = folder(name, vec![]);
            let c = classify_with(&node, &RecordMetadata::default());
            assert_eq!(c.category, RecordCategory::Inspection, "{}", name);
            assert_eq!(c.rule, ClassificationRule::NameMatch);
        }
    }

    #[test]
    fn test_report_rule() {
        let node = folder(
            "2021 Gauge Work",
            vec![ArchiveNode::folder("docs", None, 0)
                .with_children(vec![ArchiveNode::file("Annual_Inspection.PDF", None, 0)])],
        );
        let c = classify_with(&node, &RecordMetadata::default());
        assert_eq!(c.rule, ClassificationRule::ReportMatch);
        assert_eq!(
            find_inspection_report(&node, TraversalLimits::default()),
            Some(PathBuf::from("/r/2021 Gauge Work/docs/Annual_Inspection.PDF"))
        );
    }

    #[test]
    fn test_report_rule_requires_pdf() {
        let node = folder(
            "2021 Gauge Work",
            vec![ArchiveNode::file("inspection.txt", None, 0)],
        );
        assert!(!ClassificationRule::ReportMatch.matches(&ClassificationInput {
            folder: &node,
            metadata: &RecordMetadata::default(),
            limits: TraversalLimits::default(),
        }));
    }

    #[test]
    fn test_metadata_rule() {
        let node = folder("2021 Gauge Work", vec![]);
        let meta = RecordMetadata {
            inspector: "J. Smith".to_string(),
            comment: String::new(),
        };
        let c = classify_with(&node, &meta);
        assert_eq!(c.category, RecordCategory::Inspection);
        assert_eq!(c.rule, ClassificationRule::MetadataMatch);
    }

    #[test]
    fn test_no_signal_is_construction() {
        let node = folder("2024 New Gauge", vec![ArchiveNode::file("a.jpg", None, 0)]);
        let c = classify_with(&node, &RecordMetadata::default());
        assert_eq!(c.category, RecordCategory::Construction);
        assert_eq!(c.rule, ClassificationRule::Default);
    }

    #[test]
    fn test_exclusions() {
        assert!(is_excluded("Station Info"));
        assert!(is_excluded("station_info"));
        assert!(is_excluded("STATION-INFO"));
        assert!(is_excluded("stationinfo"));
        assert!(is_excluded("2020 Emails"));
        assert!(!is_excluded("2020 Station Info Update"));
        assert!(!is_excluded("2020 Gauge"));
    }
}
