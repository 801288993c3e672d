use crate::domain::model::{
    Country, HierarchyNode, NewRulesDocument, NomenclatureTree, ReloadRun, Rule, RulesDocument,
    RulesDocumentFootnote,
};
use crate::utils::error::Result;
use chrono::{DateTime, Utc};

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn list_files(
        &self,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
}

/// Read side of the rules of origin tables.
pub trait RulesRepository: Send + Sync {
    fn country(&self, code: &str) -> Result<Option<Country>>;
    fn countries(&self) -> Result<Vec<Country>>;
    fn documents(&self) -> Result<Vec<RulesDocument>>;
    /// Documents of one nomenclature tree listing `country_code`.
    fn documents_for_country(&self, country_code: &str, tree_id: i64)
        -> Result<Vec<RulesDocument>>;
    fn rules(&self, document_id: i64) -> Result<Vec<Rule>>;
    /// Ordered by insertion, which is the document's own note order.
    fn footnotes(&self, document_id: i64) -> Result<Vec<RulesDocumentFootnote>>;
}

pub trait RulesStore: RulesRepository {
    fn upsert_country(&self, country: &Country) -> Result<()>;
    fn save_document(&self, document: NewRulesDocument) -> Result<RulesDocument>;
    fn delete_documents_for_tree(&self, tree_id: i64) -> Result<usize>;
}

pub trait NomenclatureRepository: Send + Sync {
    /// All trees of a region ordered by start date, oldest first.
    fn trees(&self, region: &str) -> Result<Vec<NomenclatureTree>>;
    /// New trees start end-dated so readers keep using the active tree
    /// until `swap_tree` promotes them.
    fn create_tree(&self, region: &str, start_date: DateTime<Utc>) -> Result<NomenclatureTree>;
    fn set_tree_end_date(&self, tree_id: i64, end_date: Option<DateTime<Utc>>) -> Result<()>;
    fn delete_tree(&self, tree_id: i64) -> Result<()>;
    fn nodes(&self, tree_id: i64) -> Result<Vec<HierarchyNode>>;
    fn insert_node(&self, node: &HierarchyNode) -> Result<()>;

    fn active_tree(&self, region: &str) -> Result<Option<NomenclatureTree>> {
        Ok(self.trees(region)?.into_iter().find(|tree| tree.is_active()))
    }
}

pub trait ReloadTracking: Send + Sync {
    fn open_runs(&self) -> Result<Vec<ReloadRun>>;
    fn start_run(&self, at: DateTime<Utc>) -> Result<ReloadRun>;
    fn finish_run(&self, run_id: i64, at: DateTime<Utc>, reason: Option<&str>) -> Result<()>;
}
