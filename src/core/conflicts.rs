//! Offline check for authoring mistakes: a subheading-level rule that is also
//! shadowed by a broader extract rule.

use crate::core::codes::{strip_separators, CommodityCode};
use crate::core::resolver::{match_rules, RulesOfOriginResolver};
use crate::domain::model::Rule;
use crate::domain::ports::RulesRepository;
use crate::utils::error::{HelpdeskError, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::io;

const SUBHEADING_DIGITS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleConflict {
    pub document: String,
    pub rule_id: i64,
    pub rule_hs_from: String,
    pub rule_hs_to: Option<String>,
    pub probe_code: String,
    pub conflicting_document: String,
    pub conflicting_rule_id: i64,
    pub conflicting_hs_from: String,
    pub conflicting_hs_to: Option<String>,
}

fn bound_digits(rule: &Rule) -> Vec<String> {
    std::iter::once(rule.hs_from.as_str())
        .chain(rule.hs_to.as_deref())
        .map(strip_separators)
        .filter(|digits| !digits.is_empty())
        .collect()
}

fn is_subheading_rule(rule: &Rule) -> bool {
    !rule.is_extract
        && bound_digits(rule)
            .iter()
            .any(|digits| digits.len() >= SUBHEADING_DIGITS)
}

fn is_broad_extract(rule: &Rule) -> bool {
    rule.is_extract
        && bound_digits(rule)
            .iter()
            .any(|digits| digits.len() < SUBHEADING_DIGITS)
}

/// Checks the documents of nomenclature tree `tree_id` against each other.
pub fn find_conflicts<R: RulesRepository + ?Sized>(
    repository: &R,
    tree_id: i64,
    on: NaiveDate,
) -> Result<Vec<RuleConflict>> {
    let resolver = RulesOfOriginResolver::new(repository, tree_id);
    let mut rules_cache: HashMap<i64, Vec<Rule>> = HashMap::new();
    let mut conflicts = Vec::new();

    let documents = repository
        .documents()?
        .into_iter()
        .filter(|document| document.nomenclature_tree_id == tree_id);

    for document in documents {
        let Some(country_code) = document.country_codes.first() else {
            tracing::warn!("Document '{}' has no countries, skipping", document.description);
            continue;
        };

        let partner_documents = match resolver.documents_for(country_code, on) {
            Ok(documents) => documents,
            Err(HelpdeskError::CountryNotFound { code }) => {
                tracing::warn!(
                    "Document '{}' lists unknown country {}, skipping",
                    document.description,
                    code
                );
                continue;
            }
            Err(e) => return Err(e),
        };
        let rules = repository.rules(document.id)?;

        for rule in rules.iter().filter(|rule| is_subheading_rule(rule)) {
            for probe in bound_digits(rule) {
                let code = match CommodityCode::parse(&probe) {
                    Ok(code) => code,
                    Err(e) => {
                        tracing::warn!("Rule {} has an invalid bound: {}", rule.id, e);
                        continue;
                    }
                };

                for other_document in &partner_documents {
                    if !rules_cache.contains_key(&other_document.id) {
                        rules_cache.insert(other_document.id, repository.rules(other_document.id)?);
                    }
                    let other_rules = &rules_cache[&other_document.id];

                    for other in match_rules(other_rules, &code) {
                        if other.id == rule.id || !is_broad_extract(other) {
                            continue;
                        }
                        conflicts.push(RuleConflict {
                            document: document.description.clone(),
                            rule_id: rule.id,
                            rule_hs_from: rule.hs_from.clone(),
                            rule_hs_to: rule.hs_to.clone(),
                            probe_code: probe.clone(),
                            conflicting_document: other_document.description.clone(),
                            conflicting_rule_id: other.id,
                            conflicting_hs_from: other.hs_from.clone(),
                            conflicting_hs_to: other.hs_to.clone(),
                        });
                    }
                }
            }
        }
    }

    tracing::info!("Found {} rule conflict(s)", conflicts.len());
    Ok(conflicts)
}

pub fn write_report<W: io::Write>(conflicts: &[RuleConflict], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for conflict in conflicts {
        csv_writer.serialize(conflict)?;
    }
    csv_writer.flush()?;
    Ok(())
}
