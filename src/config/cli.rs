use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "tariff-helpdesk")]
#[command(about = "Rules of origin lookup and data maintenance for the trade tariff helpdesk")]
pub struct CliConfig {
    #[arg(long, global = true, help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override the database path from the configuration")]
    pub database: Option<String>,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Rules of origin that apply to a commodity for a country
    Lookup {
        commodity_code: String,
        country_code: String,
        #[arg(long, help = "Date the documents must be in force on (default: today)")]
        date: Option<NaiveDate>,
        #[arg(long, help = "Print the result as JSON")]
        json: bool,
        #[arg(long, help = "Abbreviation tooltips and HS code links in the rule text")]
        annotate: bool,
    },
    /// Footnotes referenced by the rules of a commodity
    Footnotes {
        commodity_code: String,
        country_code: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Report extract rules shadowing more specific rules
    CheckConflicts {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, help = "CSV output file (default: stdout)")]
        output: Option<PathBuf>,
    },
    /// Import rules of origin XML files into the active nomenclature tree
    ImportRoo {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, help = "CSV of countries to seed before importing")]
        countries: Option<PathBuf>,
    },
    /// Run the nightly data reload
    Reload {
        #[arg(long, help = "JSON logs for scheduled runs")]
        batch: bool,
    },
    /// Apply pending database migrations
    Migrate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lookup() {
        let cli = CliConfig::parse_from([
            "tariff-helpdesk",
            "--verbose",
            "lookup",
            "0403103900",
            "AU",
            "--date",
            "2024-01-01",
            "--json",
        ]);

        assert!(cli.verbose);
        match cli.command {
            Command::Lookup {
                commodity_code,
                country_code,
                date,
                json,
                annotate,
            } => {
                assert_eq!(commodity_code, "0403103900");
                assert_eq!(country_code, "AU");
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 1));
                assert!(json);
                assert!(!annotate);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_import_requires_files() {
        assert!(CliConfig::try_parse_from(["tariff-helpdesk", "import-roo"]).is_err());

        let cli = CliConfig::try_parse_from([
            "tariff-helpdesk",
            "import-roo",
            "PSRO_UK_EN-UK-CL-FTA.xml",
            "--database",
            "/tmp/roo.db",
        ])
        .unwrap();
        assert_eq!(cli.database.as_deref(), Some("/tmp/roo.db"));
        assert!(matches!(cli.command, Command::ImportRoo { ref files, .. } if files.len() == 1));
    }
}
