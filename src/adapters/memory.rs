use crate::domain::model::{
    Country, HierarchyNode, NewRulesDocument, NomenclatureTree, ReloadRun, Rule, RulesDocument,
    RulesDocumentFootnote,
};
use crate::domain::ports::{NomenclatureRepository, ReloadTracking, RulesRepository, RulesStore};
use crate::utils::error::{HelpdeskError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    countries: BTreeMap<String, Country>,
    documents: BTreeMap<i64, RulesDocument>,
    rules: BTreeMap<i64, Vec<Rule>>,
    footnotes: BTreeMap<i64, Vec<RulesDocumentFootnote>>,
    trees: BTreeMap<i64, NomenclatureTree>,
    nodes: BTreeMap<i64, Vec<HierarchyNode>>,
    runs: BTreeMap<i64, ReloadRun>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store kept entirely in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| HelpdeskError::StorageError {
            message: "memory store lock poisoned".to_string(),
        })
    }
}

impl RulesRepository for MemoryStore {
    fn country(&self, code: &str) -> Result<Option<Country>> {
        Ok(self.lock()?.countries.get(code).cloned())
    }

    fn countries(&self) -> Result<Vec<Country>> {
        Ok(self.lock()?.countries.values().cloned().collect())
    }

    fn documents(&self) -> Result<Vec<RulesDocument>> {
        Ok(self.lock()?.documents.values().cloned().collect())
    }

    fn documents_for_country(&self, country_code: &str, tree_id: i64) -> Result<Vec<RulesDocument>> {
        Ok(self
            .lock()?
            .documents
            .values()
            .filter(|doc| doc.nomenclature_tree_id == tree_id)
            .filter(|doc| doc.country_codes.iter().any(|code| code == country_code))
            .cloned()
            .collect())
    }

    fn rules(&self, document_id: i64) -> Result<Vec<Rule>> {
        Ok(self
            .lock()?
            .rules
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }

    fn footnotes(&self, document_id: i64) -> Result<Vec<RulesDocumentFootnote>> {
        Ok(self
            .lock()?
            .footnotes
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl RulesStore for MemoryStore {
    fn upsert_country(&self, country: &Country) -> Result<()> {
        self.lock()?
            .countries
            .insert(country.code.clone(), country.clone());
        Ok(())
    }

    fn save_document(&self, document: NewRulesDocument) -> Result<RulesDocument> {
        let mut state = self.lock()?;
        let document_id = state.next_id();

        let saved = RulesDocument {
            id: document_id,
            description: document.description,
            nomenclature_tree_id: document.nomenclature_tree_id,
            country_codes: document.country_codes,
            start_date: document.start_date,
            end_date: None,
        };

        let mut rules = Vec::with_capacity(document.rules.len());
        for rule in document.rules {
            let id = state.next_id();
            rules.push(Rule {
                id,
                rules_document_id: document_id,
                code: rule.code,
                description: rule.description,
                hs_from: rule.hs_from,
                hs_to: rule.hs_to,
                hs_type: rule.hs_type,
                is_extract: rule.is_extract,
                rule_text: rule.rule_text,
                alt_rule_text: rule.alt_rule_text,
                subrules: rule.subrules,
            });
        }

        let mut footnotes = Vec::with_capacity(document.footnotes.len());
        for note in document.footnotes {
            let id = state.next_id();
            footnotes.push(RulesDocumentFootnote {
                id,
                rules_document_id: document_id,
                number: note.number,
                identifier: note.identifier,
                note: note.note,
            });
        }

        state.rules.insert(document_id, rules);
        state.footnotes.insert(document_id, footnotes);
        state.documents.insert(document_id, saved.clone());
        Ok(saved)
    }

    fn delete_documents_for_tree(&self, tree_id: i64) -> Result<usize> {
        let mut state = self.lock()?;
        let ids: Vec<i64> = state
            .documents
            .values()
            .filter(|doc| doc.nomenclature_tree_id == tree_id)
            .map(|doc| doc.id)
            .collect();

        for id in &ids {
            state.documents.remove(id);
            state.rules.remove(id);
            state.footnotes.remove(id);
        }
        Ok(ids.len())
    }
}

impl NomenclatureRepository for MemoryStore {
    fn trees(&self, region: &str) -> Result<Vec<NomenclatureTree>> {
        let mut trees: Vec<NomenclatureTree> = self
            .lock()?
            .trees
            .values()
            .filter(|tree| tree.region == region)
            .cloned()
            .collect();
        trees.sort_by_key(|tree| (tree.start_date, tree.id));
        Ok(trees)
    }

    fn create_tree(&self, region: &str, start_date: DateTime<Utc>) -> Result<NomenclatureTree> {
        let mut state = self.lock()?;
        let tree = NomenclatureTree {
            id: state.next_id(),
            region: region.to_string(),
            start_date,
            end_date: Some(start_date),
        };
        state.trees.insert(tree.id, tree.clone());
        Ok(tree)
    }

    fn set_tree_end_date(&self, tree_id: i64, end_date: Option<DateTime<Utc>>) -> Result<()> {
        let mut state = self.lock()?;
        let tree = state
            .trees
            .get_mut(&tree_id)
            .ok_or_else(|| HelpdeskError::StorageError {
                message: format!("nomenclature tree {} does not exist", tree_id),
            })?;
        tree.end_date = end_date;
        Ok(())
    }

    fn delete_tree(&self, tree_id: i64) -> Result<()> {
        {
            let mut state = self.lock()?;
            state.trees.remove(&tree_id);
            state.nodes.remove(&tree_id);
        }
        self.delete_documents_for_tree(tree_id)?;
        Ok(())
    }

    fn nodes(&self, tree_id: i64) -> Result<Vec<HierarchyNode>> {
        Ok(self
            .lock()?
            .nodes
            .get(&tree_id)
            .cloned()
            .unwrap_or_default())
    }

    fn insert_node(&self, node: &HierarchyNode) -> Result<()> {
        self.lock()?
            .nodes
            .entry(node.tree_id)
            .or_default()
            .push(node.clone());
        Ok(())
    }
}

impl ReloadTracking for MemoryStore {
    fn open_runs(&self) -> Result<Vec<ReloadRun>> {
        Ok(self
            .lock()?
            .runs
            .values()
            .filter(|run| run.end_time.is_none())
            .cloned()
            .collect())
    }

    fn start_run(&self, at: DateTime<Utc>) -> Result<ReloadRun> {
        let mut state = self.lock()?;
        let run = ReloadRun {
            id: state.next_id(),
            start_time: at,
            end_time: None,
            reason: None,
        };
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }

    fn finish_run(&self, run_id: i64, at: DateTime<Utc>, reason: Option<&str>) -> Result<()> {
        let mut state = self.lock()?;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| HelpdeskError::StorageError {
                message: format!("reload run {} does not exist", run_id),
            })?;
        run.end_time = Some(at);
        run.reason = reason.map(str::to_string);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{HsType, NewFootnote, NewRule};
    use chrono::NaiveDate;

    fn new_document(tree_id: i64) -> NewRulesDocument {
        NewRulesDocument {
            description: "UK-Australia FTA".to_string(),
            nomenclature_tree_id: tree_id,
            country_codes: vec!["AU".to_string()],
            start_date: NaiveDate::from_ymd_opt(2023, 5, 31).unwrap(),
            rules: vec![NewRule {
                code: Some("ch04".to_string()),
                description: "Dairy produce".to_string(),
                hs_from: "04".to_string(),
                hs_to: None,
                hs_type: HsType::Chapter,
                is_extract: false,
                rule_text: Some("CC".to_string()),
                alt_rule_text: None,
                subrules: vec![],
            }],
            footnotes: vec![NewFootnote {
                number: 1,
                identifier: "COMM".to_string(),
                note: "Introductory notes".to_string(),
            }],
        }
    }

    #[test]
    fn test_save_and_read_document() {
        let store = MemoryStore::new();
        let saved = store.save_document(new_document(1)).unwrap();

        assert_eq!(store.documents_for_country("AU", 1).unwrap(), vec![saved.clone()]);
        assert!(store.documents_for_country("AU", 2).unwrap().is_empty());
        assert!(store.documents_for_country("NZ", 1).unwrap().is_empty());

        let rules = store.rules(saved.id).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rules_document_id, saved.id);
        assert_eq!(store.footnotes(saved.id).unwrap()[0].identifier, "COMM");

        assert_eq!(store.delete_documents_for_tree(1).unwrap(), 1);
        assert!(store.documents().unwrap().is_empty());
        assert!(store.rules(saved.id).unwrap().is_empty());
    }

    #[test]
    fn test_created_tree_is_inactive_until_swapped() {
        let store = MemoryStore::new();
        let tree = store.create_tree("UK", Utc::now()).unwrap();
        assert!(store.active_tree("UK").unwrap().is_none());

        store.set_tree_end_date(tree.id, None).unwrap();
        assert_eq!(store.active_tree("UK").unwrap().unwrap().id, tree.id);
        assert!(store.active_tree("EU").unwrap().is_none());
    }

    #[test]
    fn test_reload_runs() {
        let store = MemoryStore::new();
        let run = store.start_run(Utc::now()).unwrap();
        assert_eq!(store.open_runs().unwrap().len(), 1);

        store.finish_run(run.id, Utc::now(), Some("boom")).unwrap();
        assert!(store.open_runs().unwrap().is_empty());
        assert!(store.finish_run(999, Utc::now(), None).is_err());
    }
}
