use crate::domain::model::Country;
use crate::domain::ports::RulesStore;
use crate::utils::error::Result;
use std::io;

/// Reads `code,name,is_eu,trade_agreement_title` rows; an empty agreement
/// title means no trade agreement.
pub fn read_countries<R: io::Read>(reader: R) -> Result<Vec<Country>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut countries = Vec::new();
    for row in csv_reader.deserialize() {
        let mut country: Country = row?;
        country.code = country.code.to_uppercase();
        if country
            .trade_agreement_title
            .as_deref()
            .is_some_and(|title| title.is_empty())
        {
            country.trade_agreement_title = None;
        }
        countries.push(country);
    }
    Ok(countries)
}

pub fn seed_countries<S: RulesStore + ?Sized>(store: &S, countries: &[Country]) -> Result<usize> {
    for country in countries {
        store.upsert_country(country)?;
    }
    tracing::info!("Seeded {} countries", countries.len());
    Ok(countries.len())
}
