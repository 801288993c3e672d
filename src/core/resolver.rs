//! Rules of origin resolution.
//!
//! A rule is bound either to one code (`hs_to` empty), in which case it
//! applies to that code's whole subtree, or to an inclusive range whose
//! upper end also covers the subtree of `hs_to`.

use crate::core::annotate::AnnotateRules;
use crate::core::codes::{strip_separators, CommodityCode};
use crate::core::footnotes::process_footnotes;
use crate::core::hierarchy::active_tree;
use crate::domain::model::{Rule, RulesDocument, RulesDocumentFootnote};
use crate::domain::ports::{NomenclatureRepository, RulesRepository};
use crate::utils::error::{HelpdeskError, Result};
use chrono::NaiveDate;
use serde::Serialize;

/// Rules of origin are identical for every EU member state, so lookups for
/// the EU as a whole go through one representative member.
pub const EU_COUNTRY_CODE: &str = "EU";
pub const EU_REPRESENTATIVE_COUNTRY_CODE: &str = "FR";

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDocument {
    pub document: RulesDocument,
    pub rules: Vec<Rule>,
    pub footnotes: Vec<RulesDocumentFootnote>,
    pub introductory_notes: Option<RulesDocumentFootnote>,
}

/// Candidate rule with its bounds parsed once.
#[derive(Debug)]
struct Candidate<'a> {
    rule: &'a Rule,
    depth: usize,
}

fn bounds(rule: &Rule) -> Result<(CommodityCode, Option<CommodityCode>)> {
    let from = CommodityCode::parse(&rule.hs_from)?;
    let to = match rule.hs_to.as_deref().map(strip_separators) {
        Some(to) if !to.is_empty() => Some(CommodityCode::parse(&to)?),
        _ => None,
    };
    Ok((from, to))
}

/// Whether `rule` is a candidate for `code`, ignoring precedence.
pub fn rule_applies(rule: &Rule, code: &CommodityCode) -> Result<bool> {
    let (from, to) = bounds(rule)?;

    Ok(match to {
        None => code.hierarchy_values().contains(&from.value()),
        Some(to) => from.value() <= code.value() && code.value() <= to.upper_bound(),
    })
}

/// Raw candidate set: single-bound rules on one of the code's hierarchy
/// levels plus ranged rules containing the code. Rules with unparseable
/// bounds are skipped with a warning.
pub fn match_rules<'a>(rules: &'a [Rule], code: &CommodityCode) -> Vec<&'a Rule> {
    rules
        .iter()
        .filter(|rule| match rule_applies(rule, code) {
            Ok(applies) => applies,
            Err(e) => {
                tracing::warn!("Skipping rule {} with invalid bounds: {}", rule.id, e);
                false
            }
        })
        .collect()
}

/// Drops candidates overridden by more specific ones.
///
/// * leading rules (no text) are always kept;
/// * non-extract rules are kept only at the deepest non-extract level;
/// * an extract rule is dropped when a deeper non-extract rule matched and
///   no deeper extract rule did.
pub fn apply_precedence<'a>(candidates: &[&'a Rule]) -> Vec<&'a Rule> {
    let candidates: Vec<Candidate<'a>> = candidates
        .iter()
        .filter_map(|&rule| {
            let (from, _) = bounds(rule).ok()?;
            Some(Candidate {
                rule,
                depth: from.digits().len(),
            })
        })
        .collect();

    let deepest_non_extract = candidates
        .iter()
        .filter(|c| !c.rule.is_extract)
        .map(|c| c.depth)
        .max();

    candidates
        .iter()
        .filter(|candidate| {
            let rule = candidate.rule;
            if rule.is_leading() {
                return true;
            }

            if !rule.is_extract {
                return Some(candidate.depth) == deepest_non_extract;
            }

            let superseded = deepest_non_extract.is_some_and(|depth| depth > candidate.depth);
            let deeper_extract = candidates
                .iter()
                .any(|other| other.rule.is_extract && other.depth > candidate.depth);

            !superseded || deeper_extract
        })
        .map(|candidate| candidate.rule)
        .collect()
}

/// Applicable rules of one document for `code`, broadest first.
pub fn rules_for_document<'a>(rules: &'a [Rule], code: &CommodityCode) -> Vec<&'a Rule> {
    let candidates = match_rules(rules, code);
    let mut applied = apply_precedence(&candidates);

    applied.sort_by_key(|rule| {
        let from = CommodityCode::parse(&rule.hs_from)
            .map(|c| c.value())
            .unwrap_or(u64::MAX);
        (from, rule.id)
    });
    applied
}

/// Reads the documents of one nomenclature tree. Documents imported into a
/// pending tree, or kept with an outdated one, are never returned.
pub struct RulesOfOriginResolver<'r, R: RulesRepository + ?Sized> {
    repository: &'r R,
    tree_id: i64,
    annotator: Option<&'r dyn AnnotateRules>,
}

impl<'r, R: RulesRepository + ?Sized> RulesOfOriginResolver<'r, R> {
    pub fn new(repository: &'r R, tree_id: i64) -> Self {
        Self {
            repository,
            tree_id,
            annotator: None,
        }
    }

    /// Runs `annotator` over the matched rules of every document, on the raw
    /// texts, before footnote references are rendered.
    pub fn with_annotator(mut self, annotator: &'r dyn AnnotateRules) -> Self {
        self.annotator = Some(annotator);
        self
    }

    /// Resolver over the active tree of `region`.
    pub fn for_active_tree(repository: &'r R, region: &str) -> Result<Self>
    where
        R: NomenclatureRepository,
    {
        let tree = active_tree(repository, region)?;
        Ok(Self::new(repository, tree.id))
    }

    /// Documents in force for `country_code` on `on`. The EU and its member
    /// states are looked up through the representative member.
    pub fn documents_for(&self, country_code: &str, on: NaiveDate) -> Result<Vec<RulesDocument>> {
        let country_code = if country_code == EU_COUNTRY_CODE {
            EU_REPRESENTATIVE_COUNTRY_CODE
        } else {
            country_code
        };

        let country = self
            .repository
            .country(country_code)?
            .ok_or_else(|| HelpdeskError::CountryNotFound {
                code: country_code.to_string(),
            })?;

        let lookup_code = if country.is_eu {
            EU_REPRESENTATIVE_COUNTRY_CODE
        } else {
            country.code.as_str()
        };

        Ok(self
            .repository
            .documents_for_country(lookup_code, self.tree_id)?
            .into_iter()
            .filter(|document| document.is_in_force(on))
            .collect())
    }

    pub fn resolve(
        &self,
        commodity_code: &str,
        country_code: &str,
        on: NaiveDate,
    ) -> Result<Vec<ResolvedDocument>> {
        let code = CommodityCode::parse(commodity_code)?;
        let documents = self.documents_for(country_code, on)?;

        tracing::debug!(
            "Resolving rules of origin for {} / {} across {} document(s)",
            code,
            country_code,
            documents.len()
        );

        let mut resolved = Vec::with_capacity(documents.len());
        for document in documents {
            resolved.push(self.resolve_document(document, &code)?);
        }
        Ok(resolved)
    }

    pub fn resolve_document(
        &self,
        document: RulesDocument,
        code: &CommodityCode,
    ) -> Result<ResolvedDocument> {
        let all_rules = self.repository.rules(document.id)?;
        let mut rules: Vec<Rule> = rules_for_document(&all_rules, code)
            .into_iter()
            .cloned()
            .collect();

        if let Some(annotator) = self.annotator {
            annotator.annotate_rules(&mut rules);
        }

        let footnotes = self.repository.footnotes(document.id)?;
        let relevant = process_footnotes(&document.description, &mut rules, &footnotes)?;

        let introductory_notes = footnotes.iter().find(|note| note.is_introductory()).cloned();
        if introductory_notes.is_none() {
            tracing::error!(
                "Could not find introductory notes for {}",
                document.description
            );
        }

        Ok(ResolvedDocument {
            document,
            rules,
            footnotes: relevant,
            introductory_notes,
        })
    }
}
