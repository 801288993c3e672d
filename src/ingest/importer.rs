use crate::core::codes::strip_separators;
use crate::core::hierarchy::active_tree;
use crate::core::resolver::EU_REPRESENTATIVE_COUNTRY_CODE;
use crate::domain::model::{
    Country, HsType, NewFootnote, NewRule, NewRulesDocument, RulesDocument, SubRule,
};
use crate::domain::ports::{NomenclatureRepository, RulesRepository, RulesStore};
use crate::ingest::parser::{Inclusion, ParsedDocument};
use crate::utils::error::{HelpdeskError, Result};
use chrono::NaiveDate;
use std::collections::BTreeSet;

fn invalid(message: String) -> HelpdeskError {
    HelpdeskError::InvalidDocument { message }
}

/// Turns parsed XML into a rules document bound to a nomenclature tree.
#[derive(Debug, Clone)]
pub struct RulesImporter {
    region: String,
}

impl RulesImporter {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    pub fn build_document<R: RulesRepository + ?Sized>(
        &self,
        repository: &R,
        parsed: &ParsedDocument,
        nomenclature_tree_id: i64,
    ) -> Result<NewRulesDocument> {
        let start_date = single_start_date(parsed)?;
        let country_codes: Vec<String> = parsed.partners.iter().map(|p| p.code.clone()).collect();

        let mut missing = BTreeSet::new();
        for code in &country_codes {
            if repository.country(code)?.is_none() {
                missing.insert(code.as_str());
            }
        }
        if !missing.is_empty() {
            return Err(invalid(format!(
                "Couldn't find countries with country codes: {:?}",
                missing
            )));
        }

        let mut rules = Vec::with_capacity(parsed.positions.len());
        for position in &parsed.positions {
            let (hs_type, hs_from, hs_to) = check_inclusion(&position.inclusion)?;

            tracing::debug!(
                "Creating rule {}..",
                position.description.chars().take(25).collect::<String>()
            );
            rules.push(NewRule {
                code: position.code.clone(),
                description: position.description.clone(),
                hs_from,
                hs_to,
                hs_type,
                is_extract: position.inclusion.is_extract,
                rule_text: position.rule_text.clone(),
                alt_rule_text: position.alt_rule_text.clone(),
                subrules: position
                    .subpositions
                    .iter()
                    .zip(1u32..)
                    .map(|(sub, order)| SubRule {
                        order,
                        description: sub.description.clone(),
                        rule_text: sub.rule_text.clone(),
                        alt_rule_text: sub.alt_rule_text.clone(),
                    })
                    .collect(),
            });
        }

        let footnotes = parsed
            .notes
            .iter()
            .zip(1u32..)
            .map(|(note, number)| NewFootnote {
                number,
                identifier: note.identifier.clone(),
                note: note.content.clone(),
            })
            .collect();

        Ok(NewRulesDocument {
            description: parsed.name.clone(),
            nomenclature_tree_id,
            country_codes,
            start_date,
            rules,
            footnotes,
        })
    }

    /// Imports into the active tree of the importer's region.
    pub fn import<S>(&self, store: &S, parsed: &ParsedDocument) -> Result<RulesDocument>
    where
        S: RulesStore + NomenclatureRepository + ?Sized,
    {
        let tree = active_tree(store, &self.region)?;
        self.import_into_tree(store, parsed, tree.id)
    }

    pub fn import_into_tree<S>(
        &self,
        store: &S,
        parsed: &ParsedDocument,
        nomenclature_tree_id: i64,
    ) -> Result<RulesDocument>
    where
        S: RulesStore + ?Sized,
    {
        tracing::info!("Creating document {}..", parsed.name);
        let document = self.build_document(store, parsed, nomenclature_tree_id)?;
        let rule_count = document.rules.len();
        let saved = store.save_document(document)?;
        tracing::info!(
            "Imported '{}' with {} rule(s) for {:?}",
            saved.description,
            rule_count,
            saved.country_codes
        );
        Ok(saved)
    }
}

fn single_start_date(parsed: &ParsedDocument) -> Result<NaiveDate> {
    let dates: BTreeSet<&str> = parsed.partners.iter().map(|p| p.valid_from.as_str()).collect();

    let mut iter = dates.iter();
    match (iter.next(), iter.next()) {
        (Some(date), None) => NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
            invalid(format!("Invalid start date '{}' in {}: {}", date, parsed.name, e))
        }),
        (None, _) => Err(invalid(format!("{} has no agreement partners", parsed.name))),
        (Some(_), Some(_)) => Err(HelpdeskError::MultipleStartDates {
            document: parsed.name.clone(),
            dates: dates.iter().map(|d| d.to_string()).collect(),
        }),
    }
}

/// Validates an inclusion and returns its type and separator-free bounds.
fn check_inclusion(inclusion: &Inclusion) -> Result<(HsType, String, Option<String>)> {
    if let Some(to_type) = &inclusion.hs_to_type {
        if *to_type != inclusion.hs_from_type {
            return Err(invalid(format!(
                "RoO HS range has to be defined in consistent units: {:?}",
                inclusion
            )));
        }
    }

    let hs_from = strip_separators(&inclusion.hs_from);
    let hs_to = inclusion.hs_to.as_deref().map(strip_separators);

    if let Some(hs_to) = &hs_to {
        if hs_to.len() != hs_from.len() {
            return Err(invalid(format!(
                "hsFrom ({}) and hsTo ({}) have to apply to the same level HS codes",
                hs_from, hs_to
            )));
        }
    }

    let hs_type = match (HsType::parse(&inclusion.hs_from_type), hs_from.len()) {
        (Some(HsType::Chapter), 2) => HsType::Chapter,
        (Some(HsType::Position), 4 | 6) => HsType::Position,
        _ => {
            return Err(invalid(format!(
                "Unsupported HS range for hs_type {} and length {}",
                inclusion.hs_from_type,
                hs_from.len()
            )))
        }
    };

    Ok((hs_type, hs_from, hs_to))
}

/// Countries with a trade agreement but no rules document in tree `tree_id`.
pub fn check_countries_consistency<R: RulesRepository + ?Sized>(
    repository: &R,
    tree_id: i64,
) -> Result<Vec<Country>> {
    let mut missing = Vec::new();

    for country in repository.countries()? {
        if !country.has_trade_agreement() {
            continue;
        }
        let lookup_code = if country.is_eu {
            EU_REPRESENTATIVE_COUNTRY_CODE
        } else {
            country.code.as_str()
        };
        if repository
            .documents_for_country(lookup_code, tree_id)?
            .is_empty() {
            tracing::error!(
                "{} ({}) has a trade agreement but no rules of origin document",
                country.name,
                country.code
            );
            missing.push(country);
        }
    }

    Ok(missing)
}
