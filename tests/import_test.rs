use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tariff_helpdesk::core::annotate::linkify_hs_codes;
use tariff_helpdesk::core::conflicts::{find_conflicts, write_report};
use tariff_helpdesk::core::hierarchy::{swap_tree, NomenclatureIndex};
use tariff_helpdesk::domain::model::{HierarchyNode, NodeKind};
use tariff_helpdesk::domain::ports::{NomenclatureRepository, RulesRepository};
use tariff_helpdesk::ingest::{
    check_countries_consistency, parse_document, read_countries, seed_countries, RulesImporter,
};
use tariff_helpdesk::{HelpdeskError, RulesOfOriginResolver, SqliteStore};
use tempfile::TempDir;

const COUNTRIES_CSV: &str = "\
code,name,is_eu,trade_agreement_title
CL,Chile,false,UK-Chile Association Agreement
JP,Japan,false,UK-Japan CEPA
";

const CHILE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<psr>
  <meta>
    <agreementPartner code="GB"><country code="GB" validFrom="2021-01-01"/></agreementPartner>
    <agreementPartner code="CL"><country code="CL" validFrom="2021-01-01"/></agreementPartner>
  </meta>
  <positions>
    <position code="ch04">
      <description>Dairy produce</description>
      <rule1><rule>Manufacture from materials of any heading, except those of Chapter 4 [1]</rule></rule1>
      <positionCodeXml><inclusions hsFrom="04" hsFromType="CH" ex="true"/></positionCodeXml>
    </position>
    <position>
      <description>Buttermilk, curdled milk and cream</description>
      <rule1><rule>CTSH</rule></rule1>
      <positionCodeXml><inclusions hsFrom="0403.10" hsFromType="PO"/></positionCodeXml>
      <subposition>
        <description>Flavoured</description>
        <rule1><rule>MaxNOM 50 %</rule></rule1>
      </subposition>
    </position>
  </positions>
  <notes>
    <note identifier="COMM">Introductory notes to the list</note>
    <note identifier="1">All the materials of Chapter 4 used must be wholly obtained</note>
  </notes>
</psr>"#;

fn node(id: i64, tree_id: i64, kind: NodeKind, code: &str, parent_id: Option<i64>) -> HierarchyNode {
    HierarchyNode {
        id,
        tree_id,
        kind,
        code: code.to_string(),
        goods_nomenclature_sid: id + 27000,
        description: format!("{:?} {}", kind, code),
        parent_id,
        number_indents: 0,
    }
}

fn seeded_store(dir: &TempDir) -> Result<(SqliteStore, i64)> {
    let store = SqliteStore::open(dir.path().join("helpdesk.db"))?;
    seed_countries(&store, &read_countries(COUNTRIES_CSV.as_bytes())?)?;

    let tree = store.create_tree("UK", Utc::now())?;
    store.insert_node(&node(1, tree.id, NodeKind::Section, "I", None))?;
    store.insert_node(&node(2, tree.id, NodeKind::Chapter, "0400000000", Some(1)))?;
    store.insert_node(&node(3, tree.id, NodeKind::Heading, "0403000000", Some(2)))?;
    swap_tree(&store, "UK")?;
    Ok((store, tree.id))
}

#[test]
fn test_import_and_resolve_from_sqlite() -> Result<()> {
    let dir = TempDir::new()?;
    let (store, tree_id) = seeded_store(&dir)?;

    let parsed = parse_document(CHILE_XML, "PSRO_UK_EN-UK-CL-FTA")?;
    let document = RulesImporter::new("UK").import(&store, &parsed)?;
    assert_eq!(document.nomenclature_tree_id, tree_id);
    assert_eq!(document.country_codes, vec!["CL".to_string()]);
    drop(store);

    // everything survives a reopen
    let store = SqliteStore::open(dir.path().join("helpdesk.db"))?;
    let rules = store.rules(document.id)?;
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[1].hs_from, "040310");
    assert_eq!(rules[1].subrules[0].order, 1);
    assert_eq!(store.footnotes(document.id)?.len(), 2);

    let resolver = RulesOfOriginResolver::for_active_tree(&store, "UK")?;
    let resolved = resolver.resolve("0403103900", "CL", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())?;
    assert_eq!(resolved.len(), 1);
    let hs_from: Vec<&str> = resolved[0].rules.iter().map(|r| r.hs_from.as_str()).collect();
    assert_eq!(hs_from, vec!["040310"]);
    assert!(resolved[0].footnotes.is_empty());

    // chapter 05 is outside every rule
    let other = resolver.resolve("0511000000", "CL", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())?;
    assert!(other[0].rules.is_empty());
    Ok(())
}

#[test]
fn test_consistency_and_conflicts_after_import() -> Result<()> {
    let dir = TempDir::new()?;
    let (store, tree_id) = seeded_store(&dir)?;
    let parsed = parse_document(CHILE_XML, "PSRO_UK_EN-UK-CL-FTA")?;
    RulesImporter::new("UK").import(&store, &parsed)?;

    let missing = check_countries_consistency(&store, tree_id)?;
    let codes: Vec<&str> = missing.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(codes, vec!["JP"]);

    let conflicts = find_conflicts(&store, tree_id, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())?;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].probe_code, "040310");
    assert_eq!(conflicts[0].conflicting_hs_from, "04");

    let mut report = Vec::new();
    write_report(&conflicts, &mut report)?;
    let report = String::from_utf8(report)?;
    assert!(report.starts_with("document,rule_id,"));
    assert!(report.contains("040310"));
    Ok(())
}

#[test]
fn test_import_rejects_unknown_partner() -> Result<()> {
    let dir = TempDir::new()?;
    let (store, _) = seeded_store(&dir)?;

    let xml = CHILE_XML.replace(r#"code="CL""#, r#"code="PE""#);
    let parsed = parse_document(&xml, "PSRO_UK_EN-UK-PE-FTA")?;
    let err = RulesImporter::new("UK").import(&store, &parsed).unwrap_err();

    assert!(matches!(err, HelpdeskError::InvalidDocument { .. }));
    assert!(err.to_string().contains("PE"));
    assert!(store.documents()?.is_empty());
    Ok(())
}

#[test]
fn test_rule_text_links_to_loaded_hierarchy() -> Result<()> {
    let dir = TempDir::new()?;
    let (store, _) = seeded_store(&dir)?;
    let index = NomenclatureIndex::load(&store, "UK")?;

    let linked = linkify_hs_codes("Manufacture from materials of heading 04.03", "CL", &index);

    assert!(linked.contains(r#"href="/country/cl/heading/0403000000/27003""#));
    assert!(linked.contains(r#"data-href="/hierarchy-context-tree/heading/0403000000/27003/cl""#));
    Ok(())
}
