use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Footnote identifier reserved for a document's introductory notes.
pub const INTRODUCTORY_NOTES_IDENTIFIER: &str = "COMM";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    /// ISO 3166-1 alpha-2
    pub code: String,
    pub name: String,
    pub is_eu: bool,
    pub trade_agreement_title: Option<String>,
}

impl Country {
    pub fn has_trade_agreement(&self) -> bool {
        self.trade_agreement_title.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NomenclatureTree {
    pub id: i64,
    pub region: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl NomenclatureTree {
    pub fn is_active(&self) -> bool {
        self.end_date.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Section,
    Chapter,
    Heading,
    SubHeading,
    Commodity,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Section => "section",
            NodeKind::Chapter => "chapter",
            NodeKind::Heading => "heading",
            NodeKind::SubHeading => "subheading",
            NodeKind::Commodity => "commodity",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "section" => Some(NodeKind::Section),
            "chapter" => Some(NodeKind::Chapter),
            "heading" => Some(NodeKind::Heading),
            "subheading" => Some(NodeKind::SubHeading),
            "commodity" => Some(NodeKind::Commodity),
            _ => None,
        }
    }
}

/// One row of the commodity hierarchy. Sections carry their roman/ordinal
/// position in `code`; every other kind carries a 10-digit commodity code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: i64,
    pub tree_id: i64,
    pub kind: NodeKind,
    pub code: String,
    pub goods_nomenclature_sid: i64,
    pub description: String,
    pub parent_id: Option<i64>,
    pub number_indents: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HsType {
    /// Chapter ("CH")
    Chapter,
    /// Position, i.e. heading or subheading ("PO")
    Position,
}

impl HsType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CH" => Some(HsType::Chapter),
            "PO" => Some(HsType::Position),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HsType::Chapter => "CH",
            HsType::Position => "PO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesDocument {
    pub id: i64,
    pub description: String,
    pub nomenclature_tree_id: i64,
    pub country_codes: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl RulesDocument {
    pub fn is_in_force(&self, on: NaiveDate) -> bool {
        self.start_date <= on && self.end_date.map_or(true, |end| on < end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRule {
    pub order: u32,
    pub description: Option<String>,
    pub rule_text: Option<String>,
    pub alt_rule_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub rules_document_id: i64,
    pub code: Option<String>,
    pub description: String,
    pub hs_from: String,
    pub hs_to: Option<String>,
    pub hs_type: HsType,
    pub is_extract: bool,
    pub rule_text: Option<String>,
    pub alt_rule_text: Option<String>,
    pub subrules: Vec<SubRule>,
}

impl Rule {
    /// A rule without text only heads the rules nested under it.
    pub fn is_leading(&self) -> bool {
        self.rule_text
            .as_deref()
            .map_or(true, |text| text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesDocumentFootnote {
    pub id: i64,
    pub rules_document_id: i64,
    pub number: u32,
    pub identifier: String,
    pub note: String,
}

impl RulesDocumentFootnote {
    pub fn is_introductory(&self) -> bool {
        self.identifier == INTRODUCTORY_NOTES_IDENTIFIER
    }
}

/// Unsaved document aggregate produced by the importer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRulesDocument {
    pub description: String,
    pub nomenclature_tree_id: i64,
    pub country_codes: Vec<String>,
    pub start_date: NaiveDate,
    pub rules: Vec<NewRule>,
    pub footnotes: Vec<NewFootnote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub code: Option<String>,
    pub description: String,
    pub hs_from: String,
    pub hs_to: Option<String>,
    pub hs_type: HsType,
    pub is_extract: bool,
    pub rule_text: Option<String>,
    pub alt_rule_text: Option<String>,
    pub subrules: Vec<SubRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFootnote {
    pub number: u32,
    pub identifier: String,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadRun {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(start: NaiveDate, end: Option<NaiveDate>) -> RulesDocument {
        RulesDocument {
            id: 1,
            description: "UK-Japan CEPA".to_string(),
            nomenclature_tree_id: 1,
            country_codes: vec!["JP".to_string()],
            start_date: start,
            end_date: end,
        }
    }

    #[test]
    fn test_document_in_force_window() {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();

        let open = document(start, None);
        assert!(open.is_in_force(start));
        assert!(!open.is_in_force(NaiveDate::from_ymd_opt(2020, 12, 31).unwrap()));

        let closed = document(start, Some(end));
        assert!(closed.is_in_force(NaiveDate::from_ymd_opt(2021, 6, 1).unwrap()));
        assert!(!closed.is_in_force(end));
    }

    #[test]
    fn test_leading_rule_has_no_text() {
        let mut rule = Rule {
            id: 1,
            rules_document_id: 1,
            code: None,
            description: "Live animals".to_string(),
            hs_from: "01".to_string(),
            hs_to: None,
            hs_type: HsType::Chapter,
            is_extract: false,
            rule_text: None,
            alt_rule_text: None,
            subrules: vec![],
        };
        assert!(rule.is_leading());

        rule.rule_text = Some("   ".to_string());
        assert!(rule.is_leading());

        rule.rule_text = Some("CC".to_string());
        assert!(!rule.is_leading());
    }

    #[test]
    fn test_node_kind_round_trips_through_str() {
        for kind in [
            NodeKind::Section,
            NodeKind::Chapter,
            NodeKind::Heading,
            NodeKind::SubHeading,
            NodeKind::Commodity,
        ] {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(HsType::parse("CH"), Some(HsType::Chapter));
        assert_eq!(HsType::parse("XX"), None);
    }
}
