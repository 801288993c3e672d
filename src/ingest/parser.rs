//! Product-specific rules XML, as published per trade agreement.
//!
//! ```xml
//! <psr>
//!   <meta>
//!     <agreementPartner code="JP"><country code="JP" validFrom="2021-01-01"/></agreementPartner>
//!   </meta>
//!   <positions>
//!     <position code="ch04">
//!       <description>Dairy produce</description>
//!       <rule1><rule>CC</rule></rule1>
//!       <positionCodeXml><inclusions hsFrom="04" hsFromType="CH"/></positionCodeXml>
//!     </position>
//!   </positions>
//!   <notes><note identifier="COMM">...</note></notes>
//! </psr>
//! ```

use crate::utils::error::Result;
use serde::{Deserialize, Serialize};

/// Agreement partner code for the UK itself, which is not a partner country.
const HOME_COUNTRY_CODE: &str = "GB";

#[derive(Debug, Deserialize)]
struct XmlDocument {
    meta: XmlMeta,
    #[serde(default)]
    positions: XmlPositions,
    #[serde(default)]
    notes: XmlNotes,
}

#[derive(Debug, Deserialize)]
struct XmlMeta {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "agreementPartner", default)]
    agreement_partners: Vec<XmlAgreementPartner>,
}

#[derive(Debug, Deserialize)]
struct XmlAgreementPartner {
    #[serde(rename = "@code")]
    code: String,
    country: Option<XmlCountry>,
}

#[derive(Debug, Deserialize)]
struct XmlCountry {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "@validFrom")]
    valid_from: String,
}

#[derive(Debug, Default, Deserialize)]
struct XmlPositions {
    #[serde(rename = "position", default)]
    positions: Vec<XmlPosition>,
}

#[derive(Debug, Deserialize)]
struct XmlPosition {
    #[serde(rename = "@code", default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    rule1: Option<XmlRule>,
    #[serde(default)]
    rule2: Option<XmlRule>,
    #[serde(rename = "positionCodeXml")]
    position_code: XmlPositionCode,
    #[serde(rename = "subposition", default)]
    subpositions: Vec<XmlSubposition>,
}

#[derive(Debug, Deserialize)]
struct XmlSubposition {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    rule1: Option<XmlRule>,
    #[serde(default)]
    rule2: Option<XmlRule>,
}

#[derive(Debug, Deserialize)]
struct XmlRule {
    #[serde(default)]
    rule: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlPositionCode {
    inclusions: XmlInclusion,
}

#[derive(Debug, Deserialize)]
struct XmlInclusion {
    #[serde(rename = "@hsFrom")]
    hs_from: String,
    #[serde(rename = "@hsFromType")]
    hs_from_type: String,
    #[serde(rename = "@hsTo", default)]
    hs_to: Option<String>,
    #[serde(rename = "@hsToType", default)]
    hs_to_type: Option<String>,
    #[serde(rename = "@ex", default)]
    ex: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct XmlNotes {
    #[serde(rename = "note", default)]
    notes: Vec<XmlNote>,
}

#[derive(Debug, Deserialize)]
struct XmlNote {
    #[serde(rename = "@identifier")]
    identifier: String,
    #[serde(rename = "$text", default)]
    content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartnerCountry {
    pub code: String,
    pub valid_from: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inclusion {
    pub hs_from: String,
    pub hs_from_type: String,
    pub hs_to: Option<String>,
    pub hs_to_type: Option<String>,
    pub is_extract: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedSubposition {
    pub description: Option<String>,
    pub rule_text: Option<String>,
    pub alt_rule_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedPosition {
    pub code: Option<String>,
    pub description: String,
    pub rule_text: Option<String>,
    pub alt_rule_text: Option<String>,
    pub inclusion: Inclusion,
    pub subpositions: Vec<ParsedSubposition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedNote {
    pub identifier: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedDocument {
    pub name: String,
    pub partners: Vec<PartnerCountry>,
    pub positions: Vec<ParsedPosition>,
    pub notes: Vec<ParsedNote>,
}

fn rule_text(rule: Option<XmlRule>) -> Option<String> {
    rule.and_then(|r| r.rule)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses one document. `fallback_name` (usually the file stem) names the
/// document when its metadata carries no name.
pub fn parse_document(xml: &str, fallback_name: &str) -> Result<ParsedDocument> {
    let raw: XmlDocument = quick_xml::de::from_str(xml)?;

    let partners = raw
        .meta
        .agreement_partners
        .into_iter()
        .filter(|partner| partner.code != HOME_COUNTRY_CODE)
        .filter_map(|partner| partner.country)
        .map(|country| PartnerCountry {
            code: country.code,
            valid_from: country.valid_from,
        })
        .collect();

    let positions = raw
        .positions
        .positions
        .into_iter()
        .map(|position| ParsedPosition {
            code: non_empty(position.code),
            description: position.description.unwrap_or_default().trim().to_string(),
            rule_text: rule_text(position.rule1),
            alt_rule_text: rule_text(position.rule2),
            inclusion: Inclusion {
                hs_from: position.position_code.inclusions.hs_from,
                hs_from_type: position.position_code.inclusions.hs_from_type,
                hs_to: non_empty(position.position_code.inclusions.hs_to),
                hs_to_type: non_empty(position.position_code.inclusions.hs_to_type),
                is_extract: position.position_code.inclusions.ex.as_deref() == Some("true"),
            },
            subpositions: position
                .subpositions
                .into_iter()
                .map(|sub| ParsedSubposition {
                    description: non_empty(sub.description),
                    rule_text: rule_text(sub.rule1),
                    alt_rule_text: rule_text(sub.rule2),
                })
                .collect(),
        })
        .collect();

    let notes = raw
        .notes
        .notes
        .into_iter()
        .map(|note| ParsedNote {
            identifier: note.identifier,
            content: note.content.trim().to_string(),
        })
        .collect();

    Ok(ParsedDocument {
        name: non_empty(raw.meta.name).unwrap_or_else(|| fallback_name.to_string()),
        partners,
        positions,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHILE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<psr>
  <meta>
    <agreementPartner code="GB"><country code="GB" validFrom="2021-01-01"/></agreementPartner>
    <agreementPartner code="CL"><country code="CL" validFrom="2021-01-01"/></agreementPartner>
  </meta>
  <positions>
    <position code="ch04">
      <description>Dairy produce</description>
      <rule1><rule>Manufacture in which all the materials of Chapter 4 used are wholly obtained [1]</rule></rule1>
      <positionCodeXml><inclusions hsFrom="04" hsFromType="CH"/></positionCodeXml>
    </position>
    <position>
      <description>ex Chapter 61</description>
      <rule1><rule>CTH</rule></rule1>
      <rule2><rule>MaxNOM 50 %</rule></rule2>
      <positionCodeXml><inclusions hsFrom="6101" hsFromType="PO" hsTo="6117" hsToType="PO" ex="true"/></positionCodeXml>
      <subposition>
        <description>Embroidered</description>
        <rule1><rule>CC</rule></rule1>
      </subposition>
    </position>
  </positions>
  <notes>
    <note identifier="COMM">Introductory notes</note>
    <note identifier="1">Note one</note>
  </notes>
</psr>"#;

    #[test]
    fn test_parse_document() {
        let parsed = parse_document(CHILE_XML, "PSRO_UK_EN-UK-CL-FTA").unwrap();

        assert_eq!(parsed.name, "PSRO_UK_EN-UK-CL-FTA");
        assert_eq!(
            parsed.partners,
            vec![PartnerCountry {
                code: "CL".to_string(),
                valid_from: "2021-01-01".to_string()
            }]
        );

        assert_eq!(parsed.positions.len(), 2);
        let chapter = &parsed.positions[0];
        assert_eq!(chapter.code.as_deref(), Some("ch04"));
        assert_eq!(chapter.inclusion.hs_from_type, "CH");
        assert!(!chapter.inclusion.is_extract);
        assert!(chapter.alt_rule_text.is_none());

        let ranged = &parsed.positions[1];
        assert!(ranged.code.is_none());
        assert_eq!(ranged.inclusion.hs_to.as_deref(), Some("6117"));
        assert!(ranged.inclusion.is_extract);
        assert_eq!(ranged.alt_rule_text.as_deref(), Some("MaxNOM 50 %"));
        assert_eq!(ranged.subpositions[0].rule_text.as_deref(), Some("CC"));

        assert_eq!(parsed.notes.len(), 2);
        assert_eq!(parsed.notes[0].identifier, "COMM");
        assert_eq!(parsed.notes[1].content, "Note one");
    }

    #[test]
    fn test_parse_malformed_document() {
        assert!(parse_document("<psr><positions>", "broken").is_err());
    }
}
