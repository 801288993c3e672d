//! Nightly data reload: refresh the nomenclature from the tariff API, re-import
//! the rules of origin files against it and promote it once everything passed.

use crate::adapters::tariff_api::{SectionJson, TradeTariffClient};
use crate::core::hierarchy::{delete_outdated_trees, swap_tree};
use crate::domain::model::{HierarchyNode, NodeKind, NomenclatureTree};
use crate::domain::ports::{
    NomenclatureRepository, ReloadTracking, RulesStore, Storage,
};
use crate::ingest::{check_countries_consistency, parse_document, RulesImporter};
use crate::utils::error::{HelpdeskError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use std::time::Instant;

pub const ROO_FILES_PREFIX: &str = "rules_of_origin/";
pub const API_SNAPSHOT_PREFIX: &str = "api/";

/// Everything a reload needs to write to.
pub trait ReloadStore: RulesStore + NomenclatureRepository + ReloadTracking {}

impl<T: RulesStore + NomenclatureRepository + ReloadTracking + ?Sized> ReloadStore for T {}

pub struct ReloadContext<S, T> {
    pub store: S,
    pub storage: T,
    pub client: TradeTariffClient,
    pub region: String,
    pub keep_trees: usize,
}

#[async_trait]
pub trait ReloadStep<S: ReloadStore, T: Storage>: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &ReloadContext<S, T>) -> Result<()>;
}

pub struct ReloadJob<S, T> {
    steps: Vec<Box<dyn ReloadStep<S, T>>>,
}

impl<S: ReloadStore, T: Storage> ReloadJob<S, T> {
    pub fn new(steps: Vec<Box<dyn ReloadStep<S, T>>>) -> Self {
        Self { steps }
    }

    /// pull_api_update, import_rules_of_origin, check_rules_of_origin,
    /// swap_tree, clear_old_data
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(PullApiUpdate),
            Box::new(ImportRulesOfOrigin),
            Box::new(CheckRulesOfOrigin),
            Box::new(SwapTree),
            Box::new(ClearOldData),
        ])
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub async fn run(&self, ctx: &ReloadContext<S, T>) -> Result<()> {
        if !ctx.store.open_runs()?.is_empty() {
            tracing::warn!("⏳ Already running reload data");
            return Err(HelpdeskError::ReloadLocked);
        }

        let run = ctx.store.start_run(Utc::now())?;
        let started = Instant::now();
        tracing::info!("🚀 Starting reload data (run {})", run.id);

        for step in &self.steps {
            let step_started = Instant::now();
            tracing::info!("🔄 {}", step.name());

            if let Err(e) = step.run(ctx).await {
                let failure = HelpdeskError::ReloadStepFailed {
                    step: step.name().to_string(),
                    message: e.to_string(),
                };
                let reason = failure.to_string();
                tracing::error!("❌ {}", reason);
                ctx.store.finish_run(run.id, Utc::now(), Some(&reason))?;
                return Err(failure);
            }

            tracing::info!("✅ {} done in {:.2?}", step.name(), step_started.elapsed());
        }

        ctx.store.finish_run(run.id, Utc::now(), None)?;
        tracing::info!("🏁 Reload data finished in {:.2?}", started.elapsed());
        Ok(())
    }
}

/// Snapshots sections and chapters into storage and builds a pending tree
/// with their section, chapter and heading nodes.
pub struct PullApiUpdate;

fn json_bytes(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(value)?)
}

fn section_code(section: &SectionJson) -> String {
    section
        .numeral()
        .map(str::to_string)
        .or_else(|| section.position().map(|p| p.to_string()))
        .unwrap_or_default()
}

#[async_trait]
impl<S: ReloadStore, T: Storage> ReloadStep<S, T> for PullApiUpdate {
    fn name(&self) -> &'static str {
        "pull_api_update"
    }

    async fn run(&self, ctx: &ReloadContext<S, T>) -> Result<()> {
        let sections = ctx.client.sections().await?;
        tracing::info!("📡 Fetched {} sections from {}", sections.len(), ctx.client.base_url());

        let snapshot = Value::Array(sections.iter().map(|s| s.0.clone()).collect());
        ctx.storage
            .write_file(&format!("{}sections.json", API_SNAPSHOT_PREFIX), &json_bytes(&snapshot)?)
            .await?;

        let mut chapters = Vec::new();
        for (section_index, section) in sections.iter().enumerate() {
            for chapter_id in section.chapter_ids() {
                let chapter = ctx.client.chapter(&chapter_id).await?;
                ctx.storage
                    .write_file(
                        &format!("{}chapters/{}.json", API_SNAPSHOT_PREFIX, chapter_id),
                        &json_bytes(&chapter.0)?,
                    )
                    .await?;
                chapters.push((section_index, chapter));
            }
        }

        let tree = ctx.store.create_tree(&ctx.region, Utc::now())?;
        let mut next_id = 0i64;
        let mut node = |kind, code: String, sid, description: String, parent_id, tree_id| {
            next_id += 1;
            HierarchyNode {
                id: next_id,
                tree_id,
                kind,
                code,
                goods_nomenclature_sid: sid,
                description,
                parent_id,
                number_indents: 0,
            }
        };

        let mut section_ids = Vec::with_capacity(sections.len());
        for section in &sections {
            let section_node = node(
                NodeKind::Section,
                section_code(section),
                section.position().unwrap_or_default(),
                section.title().unwrap_or_default().to_string(),
                None,
                tree.id,
            );
            ctx.store.insert_node(&section_node)?;
            section_ids.push(section_node.id);
        }

        let mut inserted = sections.len();
        for (section_index, chapter) in &chapters {
            let Some(code) = chapter.code() else {
                tracing::warn!("Skipping chapter without goods_nomenclature_item_id");
                continue;
            };
            let chapter_node = node(
                NodeKind::Chapter,
                code.to_string(),
                chapter.goods_nomenclature_sid().unwrap_or_default(),
                chapter.title().unwrap_or_default().to_string(),
                Some(section_ids[*section_index]),
                tree.id,
            );
            ctx.store.insert_node(&chapter_node)?;
            inserted += 1;

            for heading in chapter.headings() {
                let Some(heading_code) = heading
                    .get("goods_nomenclature_item_id")
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                let description = heading
                    .get("formatted_description")
                    .or_else(|| heading.get("description"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let heading_node = node(
                    NodeKind::Heading,
                    heading_code.to_string(),
                    heading
                        .get("goods_nomenclature_sid")
                        .and_then(Value::as_i64)
                        .unwrap_or_default(),
                    description,
                    Some(chapter_node.id),
                    tree.id,
                );
                ctx.store.insert_node(&heading_node)?;
                inserted += 1;
            }
        }

        tracing::info!(
            "🌳 Nomenclature tree {} ({}) created with {} nodes",
            tree.id,
            ctx.region,
            inserted
        );
        Ok(())
    }
}

/// Most recent tree of the region, which is still pending during a reload.
fn latest_tree<S: ReloadStore, T>(ctx: &ReloadContext<S, T>) -> Result<NomenclatureTree> {
    ctx.store
        .trees(&ctx.region)?
        .pop()
        .ok_or_else(|| HelpdeskError::NoActiveTree {
            region: ctx.region.clone(),
        })
}

/// Re-imports every `rules_of_origin/*.xml` file into the latest tree.
pub struct ImportRulesOfOrigin;

#[async_trait]
impl<S: ReloadStore, T: Storage> ReloadStep<S, T> for ImportRulesOfOrigin {
    fn name(&self) -> &'static str {
        "import_rules_of_origin"
    }

    async fn run(&self, ctx: &ReloadContext<S, T>) -> Result<()> {
        let tree = latest_tree(ctx)?;

        let files: Vec<String> = ctx
            .storage
            .list_files(ROO_FILES_PREFIX)
            .await?
            .into_iter()
            .filter(|key| key.ends_with(".xml"))
            .collect();
        if files.is_empty() {
            return Err(HelpdeskError::StorageError {
                message: "No Rules of Origin files in storage".to_string(),
            });
        }

        let removed = ctx.store.delete_documents_for_tree(tree.id)?;
        if removed > 0 {
            tracing::info!("Removed {} documents from tree {}", removed, tree.id);
        }

        let importer = RulesImporter::new(ctx.region.clone());
        for key in &files {
            let bytes = ctx.storage.read_file(key).await?;
            let xml = String::from_utf8(bytes).map_err(|e| HelpdeskError::InvalidDocument {
                message: format!("{} is not valid UTF-8: {}", key, e),
            })?;
            let stem = Path::new(key)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(key.as_str());

            tracing::info!("📥 Importing {}", key);
            let parsed = parse_document(&xml, stem)?;
            importer.import_into_tree(&ctx.store, &parsed, tree.id)?;
        }

        tracing::info!("Imported {} rules of origin files into tree {}", files.len(), tree.id);
        Ok(())
    }
}

/// Logs countries with an agreement but no document in the new tree. Missing
/// documents never fail the run.
pub struct CheckRulesOfOrigin;

#[async_trait]
impl<S: ReloadStore, T: Storage> ReloadStep<S, T> for CheckRulesOfOrigin {
    fn name(&self) -> &'static str {
        "check_rules_of_origin"
    }

    async fn run(&self, ctx: &ReloadContext<S, T>) -> Result<()> {
        let tree = latest_tree(ctx)?;
        let missing = check_countries_consistency(&ctx.store, tree.id)?;
        if !missing.is_empty() {
            tracing::warn!("⚠️ {} countries have no rules of origin", missing.len());
        }
        Ok(())
    }
}

pub struct SwapTree;

#[async_trait]
impl<S: ReloadStore, T: Storage> ReloadStep<S, T> for SwapTree {
    fn name(&self) -> &'static str {
        "swap_tree"
    }

    async fn run(&self, ctx: &ReloadContext<S, T>) -> Result<()> {
        swap_tree(&ctx.store, &ctx.region)?;
        Ok(())
    }
}

pub struct ClearOldData;

#[async_trait]
impl<S: ReloadStore, T: Storage> ReloadStep<S, T> for ClearOldData {
    fn name(&self) -> &'static str {
        "clear_old_data"
    }

    async fn run(&self, ctx: &ReloadContext<S, T>) -> Result<()> {
        let deleted = delete_outdated_trees(&ctx.store, &ctx.region, ctx.keep_trees)?;
        tracing::info!("🧹 Deleted {} outdated nomenclature trees", deleted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::adapters::storage::LocalStorage;
    use crate::adapters::tariff_api::TariffApiConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Counting(&'static str, Arc<AtomicUsize>);

    #[async_trait]
    impl ReloadStep<MemoryStore, LocalStorage> for Counting {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn run(&self, _ctx: &ReloadContext<MemoryStore, LocalStorage>) -> Result<()> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ReloadStep<MemoryStore, LocalStorage> for Failing {
        fn name(&self) -> &'static str {
            "import_rules_of_origin"
        }

        async fn run(&self, _ctx: &ReloadContext<MemoryStore, LocalStorage>) -> Result<()> {
            Err(HelpdeskError::StorageError {
                message: "No Rules of Origin files in storage".to_string(),
            })
        }
    }

    fn context(dir: &TempDir) -> ReloadContext<MemoryStore, LocalStorage> {
        ReloadContext {
            store: MemoryStore::new(),
            storage: LocalStorage::new(dir.path()),
            client: TradeTariffClient::new(TariffApiConfig::new("http://127.0.0.1:9/api/v2/")),
            region: "UK".to_string(),
            keep_trees: 1,
        }
    }

    #[test]
    fn test_standard_step_order() {
        let job: ReloadJob<MemoryStore, LocalStorage> = ReloadJob::standard();
        assert_eq!(
            job.step_names(),
            vec![
                "pull_api_update",
                "import_rules_of_origin",
                "check_rules_of_origin",
                "swap_tree",
                "clear_old_data"
            ]
        );
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_close_the_run() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let counter = Arc::new(AtomicUsize::new(0));
        let job = ReloadJob::new(vec![
            Box::new(Counting("first", counter.clone())),
            Box::new(Counting("second", counter.clone())),
        ]);

        job.run(&ctx).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(ctx.store.open_runs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_run_locks_reload() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        ctx.store.start_run(Utc::now()).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let job = ReloadJob::new(vec![Box::new(Counting("first", counter.clone()))]);

        let err = job.run(&ctx).await.unwrap_err();
        assert!(matches!(err, HelpdeskError::ReloadLocked));
        assert_eq!(err.to_string(), "Already running reload data");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_step_aborts_and_records_reason() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let counter = Arc::new(AtomicUsize::new(0));
        let job = ReloadJob::new(vec![
            Box::new(Failing),
            Box::new(Counting("after", counter.clone())),
        ]);

        let err = job.run(&ctx).await.unwrap_err();
        assert!(matches!(err, HelpdeskError::ReloadStepFailed { ref step, .. } if step == "import_rules_of_origin"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(ctx.store.open_runs().unwrap().is_empty());

        // the lock is released, so the next run starts
        let retry = ReloadJob::new(vec![Box::new(Counting("after", counter.clone()))]);
        retry.run(&ctx).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_import_without_files_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        ctx.store.create_tree("UK", Utc::now()).unwrap();

        let err = ReloadStep::run(&ImportRulesOfOrigin, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("No Rules of Origin files"));
    }
}
