use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::Parser;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tariff_helpdesk::app::{ReloadContext, ReloadJob};
use tariff_helpdesk::config::{AppConfig, CliConfig, Command, StorageConfig};
use tariff_helpdesk::core::annotate::RuleTextAnnotator;
use tariff_helpdesk::core::conflicts::{find_conflicts, write_report};
use tariff_helpdesk::core::hierarchy::{active_tree, NomenclatureIndex};
use tariff_helpdesk::domain::ports::Storage;
use tariff_helpdesk::ingest::{parse_document, read_countries, seed_countries, RulesImporter};
use tariff_helpdesk::utils::error::HelpdeskError;
use tariff_helpdesk::utils::logger;
use tariff_helpdesk::utils::validation::{validate_country_code, validate_file_extensions, Validate};
use tariff_helpdesk::{
    LocalStorage, ResolvedDocument, RulesOfOriginResolver, SqliteStore, TradeTariffClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    match cli.command {
        Command::Reload { batch: true } => logger::init_batch_logger(),
        _ => logger::init_cli_logger(cli.verbose),
    }
    tracing::debug!("CLI config: {:?}", cli);

    if let Err(e) = run(&cli).await {
        let Some(error) = e.downcast_ref::<HelpdeskError>() else {
            return Err(e);
        };

        tracing::error!(
            "❌ {} failed: {} (Category: {:?}, Severity: {:?})",
            command_name(&cli.command),
            error,
            error.category(),
            error.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", error.recovery_suggestion());
        eprintln!("❌ {}", error.user_friendly_message());
        eprintln!("💡 {}", error.recovery_suggestion());

        std::process::exit(error.severity().exit_code());
    }

    Ok(())
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Lookup { .. } => "lookup",
        Command::Footnotes { .. } => "footnotes",
        Command::CheckConflicts { .. } => "check-conflicts",
        Command::ImportRoo { .. } => "import-roo",
        Command::Reload { .. } => "reload",
        Command::Migrate => "migrate",
    }
}

fn load_config(cli: &CliConfig) -> Result<AppConfig, HelpdeskError> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    config.validate()?;
    Ok(config)
}

fn country_argument(code: &str) -> Result<String, HelpdeskError> {
    let code = code.trim().to_uppercase();
    validate_country_code("country_code", &code)?;
    Ok(code)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn run(cli: &CliConfig) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let store = SqliteStore::open(&config.database.path)?;

    match &cli.command {
        Command::Lookup {
            commodity_code,
            country_code,
            date,
            json,
            annotate,
        } => {
            let country_code = country_argument(country_code)?;
            let region = &config.nomenclature.region;
            let index = if *annotate {
                nomenclature_index(&store, region)
            } else {
                None
            };
            let annotator = RuleTextAnnotator::new(&country_code, index.as_ref());

            let mut resolver = RulesOfOriginResolver::for_active_tree(&store, region)?;
            if *annotate {
                resolver = resolver.with_annotator(&annotator);
            }
            let documents =
                resolver.resolve(commodity_code, &country_code, date.unwrap_or_else(today))?;

            if *json {
                let stdout = io::stdout();
                serde_json::to_writer_pretty(stdout.lock(), &documents)
                    .context("failed to write lookup result")?;
                println!();
            } else {
                print_documents(commodity_code, &country_code, &documents);
            }
        }
        Command::Footnotes {
            commodity_code,
            country_code,
            date,
        } => {
            let country_code = country_argument(country_code)?;
            let resolver =
                RulesOfOriginResolver::for_active_tree(&store, &config.nomenclature.region)?;
            for resolved in
                resolver.resolve(commodity_code, &country_code, date.unwrap_or_else(today))?
            {
                println!("📄 {}", resolved.document.description);
                for note in &resolved.footnotes {
                    println!("  {}) {}", note.number, note.note);
                }
            }
        }
        Command::CheckConflicts { date, output } => {
            let tree = active_tree(&store, &config.nomenclature.region)?;
            let conflicts = find_conflicts(&store, tree.id, date.unwrap_or_else(today))?;
            match output {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("cannot create {}", path.display()))?;
                    write_report(&conflicts, file)?;
                    println!("📁 {} conflict(s) written to {}", conflicts.len(), path.display());
                }
                None => write_report(&conflicts, io::stdout().lock())?,
            }
        }
        Command::ImportRoo { files, countries } => {
            let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
            validate_file_extensions("files", &names, &["xml"])?;

            if let Some(path) = countries {
                let file =
                    File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
                seed_countries(&store, &read_countries(file)?)?;
            }

            let importer = RulesImporter::new(config.nomenclature.region.clone());
            for path in files {
                let xml = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                let parsed = parse_document(&xml, &file_stem(path))?;
                let document = importer.import(&store, &parsed)?;
                println!(
                    "✅ Imported '{}' for {}",
                    document.description,
                    document.country_codes.join(", ")
                );
            }
        }
        Command::Reload { .. } => {
            let client = TradeTariffClient::new(config.tariff_api.clone());
            match &config.storage {
                StorageConfig::Local { path } => {
                    reload(store, LocalStorage::new(path), client, &config).await?
                }
                #[cfg(feature = "s3")]
                StorageConfig::S3 { bucket, region } => {
                    let storage =
                        tariff_helpdesk::S3Storage::from_env(bucket.clone(), region.clone()).await;
                    reload(store, storage, client, &config).await?
                }
                #[cfg(not(feature = "s3"))]
                StorageConfig::S3 { .. } => {
                    return Err(HelpdeskError::ConfigError {
                        message: "S3 storage requires a build with the `s3` feature".to_string(),
                    }
                    .into())
                }
            }
            println!("✅ Reload data completed successfully!");
        }
        // Opening the store already applied pending migrations.
        Command::Migrate => {
            println!(
                "✅ Database {} at schema version {}",
                config.database.path,
                store.schema_version()?
            );
        }
    }

    Ok(())
}

async fn reload<T: Storage>(
    store: SqliteStore,
    storage: T,
    client: TradeTariffClient,
    config: &AppConfig,
) -> Result<(), HelpdeskError> {
    let ctx = ReloadContext {
        store,
        storage,
        client,
        region: config.nomenclature.region.clone(),
        keep_trees: config.nomenclature.keep_trees,
    };
    ReloadJob::standard().run(&ctx).await
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// HS codes are left unlinked when the nomenclature is not loaded.
fn nomenclature_index(store: &SqliteStore, region: &str) -> Option<NomenclatureIndex> {
    match NomenclatureIndex::load(store, region) {
        Ok(index) => Some(index),
        Err(e) => {
            tracing::warn!("HS codes left unlinked: {}", e);
            None
        }
    }
}

fn print_documents(commodity_code: &str, country_code: &str, documents: &[ResolvedDocument]) {
    if documents.is_empty() {
        println!("No rules of origin in force for {} / {}", commodity_code, country_code);
        return;
    }

    let mut out = io::stdout().lock();
    for resolved in documents {
        let _ = writeln!(
            out,
            "📄 {} (in force from {})",
            resolved.document.description, resolved.document.start_date
        );
        if resolved.rules.is_empty() {
            let _ = writeln!(out, "  No product-specific rules for {}", commodity_code);
        }
        for rule in &resolved.rules {
            let range = match &rule.hs_to {
                Some(hs_to) => format!("{}-{}", rule.hs_from, hs_to),
                None => rule.hs_from.clone(),
            };
            let extract = if rule.is_extract { "ex " } else { "" };
            let _ = writeln!(out, "  • {}{} {}", extract, range, rule.description);
            if let Some(text) = &rule.rule_text {
                let _ = writeln!(out, "      {}", text);
            }
            if let Some(text) = &rule.alt_rule_text {
                let _ = writeln!(out, "      or {}", text);
            }
            for subrule in &rule.subrules {
                let _ = writeln!(
                    out,
                    "      - {} {}",
                    subrule.description.as_deref().unwrap_or_default(),
                    subrule.rule_text.as_deref().unwrap_or_default()
                );
            }
        }
        for note in &resolved.footnotes {
            let _ = writeln!(out, "  {}) {}", note.number, note.note);
        }
    }
}
