use anyhow::Result;
use chrono::NaiveDate;
use tariff_helpdesk::core::annotate::RuleTextAnnotator;
use tariff_helpdesk::core::hierarchy::NomenclatureIndex;
use tariff_helpdesk::domain::model::{
    Country, HierarchyNode, HsType, NewFootnote, NewRule, NewRulesDocument, NodeKind,
    RulesDocument,
};
use tariff_helpdesk::domain::ports::{RulesRepository, RulesStore};
use tariff_helpdesk::{HelpdeskError, MemoryStore, RulesOfOriginResolver};

const TREE_ID: i64 = 1;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn country(code: &str, is_eu: bool) -> Country {
    Country {
        code: code.to_string(),
        name: code.to_string(),
        is_eu,
        trade_agreement_title: Some(format!("UK-{} agreement", code)),
    }
}

fn rule(hs_from: &str, hs_to: Option<&str>, is_extract: bool, text: &str) -> NewRule {
    NewRule {
        code: None,
        description: format!("Products of {}", hs_from),
        hs_from: hs_from.to_string(),
        hs_to: hs_to.map(str::to_string),
        hs_type: if hs_from.len() == 2 {
            HsType::Chapter
        } else {
            HsType::Position
        },
        is_extract,
        rule_text: Some(text.to_string()),
        alt_rule_text: None,
        subrules: vec![],
    }
}

fn footnote(number: u32, identifier: &str, note: &str) -> NewFootnote {
    NewFootnote {
        number,
        identifier: identifier.to_string(),
        note: note.to_string(),
    }
}

fn save(
    store: &MemoryStore,
    name: &str,
    countries: &[&str],
    start_date: NaiveDate,
    rules: Vec<NewRule>,
    footnotes: Vec<NewFootnote>,
) -> Result<RulesDocument> {
    Ok(store.save_document(NewRulesDocument {
        description: name.to_string(),
        nomenclature_tree_id: TREE_ID,
        country_codes: countries.iter().map(|c| c.to_string()).collect(),
        start_date,
        rules,
        footnotes,
    })?)
}

/// UK-Australia FTA with a chapter-level extract rule overridden by a
/// heading rule, a range rule and an unrelated heading.
fn australia() -> Result<MemoryStore> {
    let store = MemoryStore::new();
    store.upsert_country(&country("AU", false))?;
    save(
        &store,
        "UK-Australia FTA",
        &["AU"],
        date(2023, 5, 31),
        vec![
            rule("04", None, true, "CC"),
            rule("0403", None, false, "CTH [1]; see @{doc:COMM}[Note 3]"),
            rule("0401", Some("0402"), false, "CTH"),
            rule("0405", None, false, "CTSH"),
        ],
        vec![
            footnote(1, "COMM", "Introductory notes"),
            footnote(2, "1", "Milk must be wholly obtained"),
        ],
    )?;
    Ok(store)
}

#[test]
fn test_resolves_heading_rule_over_chapter_extract() -> Result<()> {
    let store = australia()?;
    let resolver = RulesOfOriginResolver::new(&store, TREE_ID);

    let resolved = resolver.resolve("0403103900", "AU", date(2024, 1, 1))?;

    assert_eq!(resolved.len(), 1);
    let document = &resolved[0];
    assert_eq!(document.document.description, "UK-Australia FTA");
    assert_eq!(document.rules.len(), 1);
    assert_eq!(document.rules[0].hs_from, "0403");
    assert_eq!(
        document.rules[0].rule_text.as_deref(),
        Some(
            r##"CTH <sup><a href="#roo_note_1" class="govuk-link">1)</a></sup>; see Note 3 (below)"##
        )
    );

    assert_eq!(document.footnotes.len(), 1);
    assert_eq!(document.footnotes[0].number, 1);
    assert_eq!(document.footnotes[0].note, "Milk must be wholly obtained");
    assert_eq!(
        document.introductory_notes.as_ref().map(|n| n.note.as_str()),
        Some("Introductory notes")
    );
    Ok(())
}

#[test]
fn test_chapter_extract_applies_without_deeper_rule() -> Result<()> {
    let store = australia()?;
    let resolver = RulesOfOriginResolver::new(&store, TREE_ID);

    let resolved = resolver.resolve("0406100000", "AU", date(2024, 1, 1))?;
    let hs_from: Vec<&str> = resolved[0].rules.iter().map(|r| r.hs_from.as_str()).collect();
    assert_eq!(hs_from, vec!["04"]);

    let ranged = resolver.resolve("04.02.10", "AU", date(2024, 1, 1))?;
    let hs_from: Vec<&str> = ranged[0].rules.iter().map(|r| r.hs_from.as_str()).collect();
    assert_eq!(hs_from, vec!["0401"]);
    Ok(())
}

#[test]
fn test_resolution_never_writes_back() -> Result<()> {
    let store = australia()?;
    let resolver = RulesOfOriginResolver::new(&store, TREE_ID);
    let document_id = store.documents()?[0].id;

    resolver.resolve("0403103900", "AU", date(2024, 1, 1))?;

    let stored = store.rules(document_id)?;
    let heading = stored.iter().find(|r| r.hs_from == "0403").unwrap();
    assert_eq!(
        heading.rule_text.as_deref(),
        Some("CTH [1]; see @{doc:COMM}[Note 3]")
    );
    Ok(())
}

#[test]
fn test_documents_outside_their_validity_are_ignored() -> Result<()> {
    let store = australia()?;
    let resolver = RulesOfOriginResolver::new(&store, TREE_ID);

    assert!(resolver.resolve("0403103900", "AU", date(2023, 5, 30))?.is_empty());
    Ok(())
}

#[test]
fn test_every_document_in_force_is_resolved() -> Result<()> {
    let store = australia()?;
    save(
        &store,
        "GSP",
        &["AU"],
        date(2022, 1, 1),
        vec![rule("04", None, false, "Wholly obtained")],
        vec![footnote(1, "COMM", "GSP notes")],
    )?;
    let resolver = RulesOfOriginResolver::new(&store, TREE_ID);

    let resolved = resolver.resolve("0403103900", "AU", date(2024, 1, 1))?;
    let names: Vec<&str> = resolved
        .iter()
        .map(|r| r.document.description.as_str())
        .collect();
    assert_eq!(names, vec!["UK-Australia FTA", "GSP"]);
    Ok(())
}

#[test]
fn test_eu_members_share_the_representative_documents() -> Result<()> {
    let store = MemoryStore::new();
    store.upsert_country(&country("FR", true))?;
    store.upsert_country(&country("DE", true))?;
    save(
        &store,
        "UK-EU TCA",
        &["FR"],
        date(2021, 1, 1),
        vec![rule("04", None, false, "CC")],
        vec![footnote(1, "COMM", "Introductory notes")],
    )?;
    let resolver = RulesOfOriginResolver::new(&store, TREE_ID);

    for code in ["EU", "FR", "DE"] {
        let resolved = resolver.resolve("0403103900", code, date(2024, 1, 1))?;
        assert_eq!(resolved.len(), 1, "lookup through {}", code);
        assert_eq!(resolved[0].document.description, "UK-EU TCA");
    }
    Ok(())
}

#[test]
fn test_unknown_country() -> Result<()> {
    let store = australia()?;
    let resolver = RulesOfOriginResolver::new(&store, TREE_ID);

    let err = resolver
        .resolve("0403103900", "XX", date(2024, 1, 1))
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::CountryNotFound { ref code } if code == "XX"));
    Ok(())
}

#[test]
fn test_references_without_footnotes_fail() -> Result<()> {
    let store = MemoryStore::new();
    store.upsert_country(&country("JP", false))?;
    save(
        &store,
        "UK-Japan CEPA",
        &["JP"],
        date(2021, 1, 1),
        vec![rule("04", None, false, "CC [2]")],
        vec![footnote(1, "COMM", "Introductory notes")],
    )?;
    let resolver = RulesOfOriginResolver::new(&store, TREE_ID);

    let err = resolver
        .resolve("0403103900", "JP", date(2024, 1, 1))
        .unwrap_err();
    assert!(err.to_string().contains("missing expected footnotes"));
    Ok(())
}

#[test]
fn test_invalid_commodity_code() -> Result<()> {
    let store = australia()?;
    let resolver = RulesOfOriginResolver::new(&store, TREE_ID);

    assert!(matches!(
        resolver.resolve("04ab", "AU", date(2024, 1, 1)),
        Err(HelpdeskError::InvalidCommodityCode { .. })
    ));
    Ok(())
}

#[test]
fn test_annotated_lookup_links_codes_before_rendering_footnotes() -> Result<()> {
    let store = MemoryStore::new();
    store.upsert_country(&country("JP", false))?;
    let mut chapter_rule = rule("04", None, false, "CC, provided that 10 materials are used [1]");
    chapter_rule.alt_rule_text = Some("Manufacture from materials of any heading [10]; except chapter 10".to_string());
    save(
        &store,
        "UK-Japan CEPA",
        &["JP"],
        date(2021, 1, 1),
        vec![chapter_rule],
        vec![
            footnote(1, "COMM", "Introductory notes"),
            footnote(2, "1", "Wholly obtained"),
            footnote(3, "10", "Cereals excluded"),
        ],
    )?;
    let index = NomenclatureIndex::new(vec![HierarchyNode {
        id: 10,
        tree_id: TREE_ID,
        kind: NodeKind::Chapter,
        code: "1000000000".to_string(),
        goods_nomenclature_sid: 27010,
        description: "Cereals".to_string(),
        parent_id: None,
        number_indents: 0,
    }]);
    let annotator = RuleTextAnnotator::new("JP", Some(&index));
    let resolver = RulesOfOriginResolver::new(&store, TREE_ID).with_annotator(&annotator);

    let resolved = resolver.resolve("0403103900", "JP", date(2024, 1, 1))?;

    let sup = |n: u32| format!(r##"<sup><a href="#roo_note_{n}" class="govuk-link">{n})</a></sup>"##);
    let rule = &resolved[0].rules[0];
    assert_eq!(
        rule.rule_text.as_deref(),
        Some(
            format!(
                r#"<abbr title="Change of Chapter">CC</abbr>, provided that 10 materials are used {}"#,
                sup(1)
            )
            .as_str()
        )
    );
    assert_eq!(
        rule.alt_rule_text.as_deref(),
        Some(
            format!(
                r#"Manufacture from materials of any heading {}; except chapter <a class="govuk-link hierarchy-modal" data-toggle="modal" data-target="hierarchy-modal" data-href="/hierarchy-context-tree/chapter/1000000000/27010/jp" href="/country/jp/chapter/1000000000/27010">10</a>"#,
                sup(2)
            )
            .as_str()
        )
    );
    let numbers: Vec<(&str, u32)> = resolved[0]
        .footnotes
        .iter()
        .map(|n| (n.identifier.as_str(), n.number))
        .collect();
    assert_eq!(numbers, vec![("1", 1), ("10", 2)]);
    Ok(())
}
