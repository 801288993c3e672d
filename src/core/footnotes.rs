use crate::domain::model::{Rule, RulesDocumentFootnote};
use crate::utils::error::{HelpdeskError, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static NOTE_REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[A-Za-z0-9.]+\]").unwrap());

static INTRODUCTORY_NOTE_REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\{doc:COMM\}\[([A-Za-z0-9\s]+)\]").unwrap());

/// Numbers note references in the order they are first met across several
/// rule texts. `[A] [B] [C] [B]` is rendered as 1, 2, 3, 2.
///
/// Numbering depends on which rules were resolved for a given code and
/// country, so a processor lives for exactly one lookup.
#[derive(Debug, Default)]
pub struct FootnoteReferenceProcessor {
    found_note_ids: Vec<String>,
    unique_note_ids: Vec<String>,
    note_number_by_id: HashMap<String, u32>,
}

impl FootnoteReferenceProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all_notes_references(&mut self, text: &str) -> String {
        NOTE_REFERENCE_RE
            .replace_all(text, |caps: &Captures| {
                let ref_id = caps[0].trim_matches(&['[', ']'][..]).to_string();
                let note_number = self.register(ref_id);

                format!(
                    r##"<sup><a href="#roo_note_{n}" class="govuk-link">{n})</a></sup>"##,
                    n = note_number
                )
            })
            .into_owned()
    }

    pub fn replace_all_introductory_notes_references(&self, text: &str) -> String {
        INTRODUCTORY_NOTE_REFERENCE_RE
            .replace_all(text, |caps: &Captures| format!("{} (below)", &caps[1]))
            .into_owned()
    }

    /// Introductory references first: their bracketed part must not be taken
    /// for a note reference.
    pub fn render(&mut self, text: &str) -> String {
        let text = self.replace_all_introductory_notes_references(text);
        self.replace_all_notes_references(&text)
    }

    pub fn note_number(&self, ref_id: &str) -> Option<u32> {
        self.note_number_by_id.get(ref_id).copied()
    }

    /// Unique reference ids in display order.
    pub fn unique_note_ids(&self) -> &[String] {
        &self.unique_note_ids
    }

    pub fn found_note_ids(&self) -> &[String] {
        &self.found_note_ids
    }

    fn register(&mut self, ref_id: String) -> u32 {
        self.found_note_ids.push(ref_id.clone());

        if let Some(number) = self.note_number_by_id.get(&ref_id) {
            return *number;
        }

        self.unique_note_ids.push(ref_id.clone());
        let number = self.unique_note_ids.len() as u32;
        self.note_number_by_id.insert(ref_id, number);
        number
    }
}

/// Renders footnote references in every text of `rules` (in place, on the
/// caller's copies) and returns the footnotes they point at, renumbered by
/// display order.
pub fn process_footnotes(
    document_name: &str,
    rules: &mut [Rule],
    footnotes: &[RulesDocumentFootnote],
) -> Result<Vec<RulesDocumentFootnote>> {
    let mut processor = FootnoteReferenceProcessor::new();

    for rule in rules.iter_mut() {
        rule.description = processor.render(&rule.description);
        render_optional(&mut processor, &mut rule.rule_text);
        render_optional(&mut processor, &mut rule.alt_rule_text);

        for subrule in rule.subrules.iter_mut() {
            render_optional(&mut processor, &mut subrule.description);
            render_optional(&mut processor, &mut subrule.rule_text);
            render_optional(&mut processor, &mut subrule.alt_rule_text);
        }
    }

    let notes: Vec<&RulesDocumentFootnote> =
        footnotes.iter().filter(|note| !note.is_introductory()).collect();

    if processor.unique_note_ids().is_empty() {
        return Ok(Vec::new());
    }
    if notes.is_empty() {
        return Err(HelpdeskError::MissingFootnotes {
            document: document_name.to_string(),
        });
    }

    let mut relevant: Vec<RulesDocumentFootnote> = Vec::new();
    for ref_id in processor.unique_note_ids() {
        let Some(note) = find_note(&notes, ref_id) else {
            tracing::warn!(
                "Footnote reference [{}] in '{}' has no matching note",
                ref_id,
                document_name
            );
            continue;
        };

        if relevant.iter().any(|seen| seen.id == note.id) {
            continue;
        }

        let mut rendered = note.clone();
        rendered.number = processor.note_number(ref_id).unwrap_or_default();
        rendered.note = processor.replace_all_introductory_notes_references(&note.note);
        relevant.push(rendered);
    }

    Ok(relevant)
}

fn render_optional(processor: &mut FootnoteReferenceProcessor, text: &mut Option<String>) {
    if let Some(value) = text.as_deref() {
        if !value.is_empty() {
            *text = Some(processor.render(value));
        }
    }
}

/// Exact identifier, then numeric (`2` = `002`), then alphabetical
/// position (`b` = second note).
fn find_note<'a>(
    notes: &[&'a RulesDocumentFootnote],
    ref_id: &str,
) -> Option<&'a RulesDocumentFootnote> {
    if let Some(note) = notes.iter().copied().find(|note| note.identifier == ref_id) {
        return Some(note);
    }

    if let Ok(number) = ref_id.parse::<u32>() {
        let numeric = notes
            .iter()
            .copied()
            .find(|note| note.identifier.parse::<u32>().ok() == Some(number));
        if numeric.is_some() {
            return numeric;
        }
    }

    let mut chars = ref_id.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) if letter.is_ascii_alphabetic() => {
            let position = (letter.to_ascii_lowercase() as u8 - b'a') as usize;
            notes.get(position).copied()
        }
        _ => None,
    }
}
