// Rules of origin ingestion: country seeds, XML parsing and import into a store.

pub mod countries;
pub mod importer;
pub mod parser;

pub use countries::{read_countries, seed_countries};
pub use importer::{check_countries_consistency, RulesImporter};
pub use parser::{parse_document, ParsedDocument};
