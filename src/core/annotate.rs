//! Presentation helpers for rule texts: abbreviation markup and links from
//! HS codes mentioned in the text to their nomenclature pages.

use crate::core::hierarchy::NomenclatureIndex;
use crate::domain::model::{HierarchyNode, NodeKind, Rule};
use regex::{Captures, Regex};
use std::ops::Range;
use std::sync::LazyLock;

static ABBREVIATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(CC|CTH|CTSH|MaxNOM)\b").unwrap());

static CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(chapter|chapters|heading|headings|subheading|subheadings).*(\.\D|;|\s*$)")
        .unwrap()
});

/// `chapter N` with a single digit, else `NN`, `NNNN`, `NN.NN` or `NNNN.NN`
/// at a word start. Exclusions are applied to the match in `find_codes`.
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bchapter (?P<chapter>\d)[^.\d]|\b(?P<code>\d{2}(?:\d{2})?(?:\.\d{2})?)")
        .unwrap()
});

pub fn abbreviation_definition(abbreviation: &str) -> Option<&'static str> {
    match abbreviation {
        "CC" => Some("Change of Chapter"),
        "CTH" => Some("Change in tariff heading"),
        "CTSH" => Some("Change in tariff subheading"),
        "MaxNOM" => Some("Maximum value of non-originating materials"),
        _ => None,
    }
}

pub fn annotate_abbreviations(text: &str) -> String {
    ABBREVIATION_RE
        .replace_all(text, |caps: &Captures| {
            let abbreviation = &caps[0];
            match abbreviation_definition(abbreviation) {
                Some(title) => format!(r#"<abbr title="{}">{}</abbr>"#, title, abbreviation),
                None => abbreviation.to_string(),
            }
        })
        .into_owned()
}

/// Resolves an HS code found in rule text to the node its link points at.
pub trait HierarchyLookup {
    fn find_node(&self, code: &str, kinds: &[NodeKind]) -> Option<&HierarchyNode>;
}

impl HierarchyLookup for NomenclatureIndex {
    fn find_node(&self, code: &str, kinds: &[NodeKind]) -> Option<&HierarchyNode> {
        self.find_by_code(code, kinds)
    }
}

/// Node kinds tried, in order, for a code with this many digits.
fn kinds_for_length(digits: usize) -> &'static [NodeKind] {
    match digits {
        2 => &[NodeKind::Chapter],
        4 => &[NodeKind::SubHeading, NodeKind::Heading],
        6 => &[NodeKind::Commodity, NodeKind::SubHeading],
        _ => &[],
    }
}

pub fn detail_url(node: &HierarchyNode, country_code: &str) -> String {
    format!(
        "/country/{}/{}/{}/{}",
        country_code.to_lowercase(),
        node.kind.as_str(),
        node.code,
        node.goods_nomenclature_sid
    )
}

pub fn hierarchy_context_url(node: &HierarchyNode, country_code: &str) -> String {
    format!(
        "/hierarchy-context-tree/{}/{}/{}/{}",
        node.kind.as_str(),
        node.code,
        node.goods_nomenclature_sid,
        country_code.to_lowercase()
    )
}

/// Links HS codes inside chapter/heading/subheading clauses of `text`.
pub fn linkify_hs_codes<L: HierarchyLookup + ?Sized>(
    text: &str,
    country_code: &str,
    lookup: &L,
) -> String {
    CLAUSE_RE
        .replace_all(text, |caps: &Captures| {
            linkify_clause(&caps[0], country_code, lookup)
        })
        .into_owned()
}

fn linkify_clause<L: HierarchyLookup + ?Sized>(clause: &str, country_code: &str, lookup: &L) -> String {
    let mut out = String::with_capacity(clause.len());
    let mut last = 0;

    for found in find_codes(clause) {
        let code = &clause[found.clone()];
        out.push_str(&clause[last..found.start]);
        out.push_str(&link_for(code, country_code, lookup).unwrap_or_else(|| code.to_string()));
        last = found.end;
    }
    out.push_str(&clause[last..]);
    out
}

fn link_for<L: HierarchyLookup + ?Sized>(code: &str, country_code: &str, lookup: &L) -> Option<String> {
    let mut digits: String = code.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 1 {
        digits.insert(0, '0');
    }

    let node_code = format!("{:0<10}", digits);
    let node = lookup.find_node(&node_code, kinds_for_length(digits.len()));
    let Some(node) = node else {
        tracing::warn!("Couldn't find hierarchy node for HS code {}", node_code);
        return None;
    };

    Some(format!(
        r#"<a class="govuk-link hierarchy-modal" data-toggle="modal" data-target="hierarchy-modal" data-href="{}" href="{}">{}</a>"#,
        hierarchy_context_url(node, country_code),
        detail_url(node, country_code),
        code
    ))
}

/// Code spans in a clause, left to right. A candidate is dropped when it
/// follows `[` (a footnote reference), runs into further digits, or is a
/// percentage not closed by `,` or `)`.
fn find_codes(clause: &str) -> Vec<Range<usize>> {
    CODE_RE
        .captures_iter(clause)
        .filter_map(|caps| {
            let rest = &clause[caps.get(0)?.end()..];

            if let Some(digit) = caps.name("chapter") {
                let keep = closes_code(rest) || !starts_with_percent(rest);
                return keep.then(|| digit.range());
            }

            let code = caps.name("code")?;
            let keep = !clause[..code.start()].ends_with('[')
                && !runs_into_digits(rest)
                && (closes_code(rest) || !is_percentage(rest));
            keep.then(|| code.range())
        })
        .collect()
}

fn closes_code(rest: &str) -> bool {
    rest.starts_with([',', ')'])
}

/// One more character, then a digit: `0101.5`, `10,5`.
fn runs_into_digits(rest: &str) -> bool {
    let mut chars = rest.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(c), Some(d)) if c != '\n' && d.is_ascii_digit()
    )
}

fn starts_with_percent(rest: &str) -> bool {
    rest.strip_prefix(char::is_whitespace)
        .unwrap_or(rest)
        .starts_with('%')
}

fn is_percentage(rest: &str) -> bool {
    let head: String = rest.chars().take(9).collect::<String>().to_lowercase();
    starts_with_percent(rest) || head.starts_with(" per cent") || head.starts_with(" percent")
}

/// Marks up rule texts before their footnote references are rendered.
/// Codes are linked first so that neither `<sup>` footnote markers nor
/// abbreviation titles are mistaken for clauses or codes.
pub struct RuleTextAnnotator<'a, L: ?Sized> {
    country_code: &'a str,
    lookup: Option<&'a L>,
}

impl<'a, L: HierarchyLookup + ?Sized> RuleTextAnnotator<'a, L> {
    /// Without a `lookup` only abbreviations are marked up.
    pub fn new(country_code: &'a str, lookup: Option<&'a L>) -> Self {
        Self {
            country_code,
            lookup,
        }
    }

    pub fn annotate(&self, text: &str) -> String {
        let linked = match self.lookup {
            Some(lookup) => linkify_hs_codes(text, self.country_code, lookup),
            None => text.to_string(),
        };
        annotate_abbreviations(&linked)
    }

    fn annotate_optional(&self, text: &mut Option<String>) {
        if let Some(value) = text.as_deref() {
            *text = Some(self.annotate(value));
        }
    }
}

/// Hook the resolver runs over matched rules ahead of footnote rendering.
pub trait AnnotateRules {
    fn annotate_rules(&self, rules: &mut [Rule]);
}

impl<L: HierarchyLookup + ?Sized> AnnotateRules for RuleTextAnnotator<'_, L> {
    fn annotate_rules(&self, rules: &mut [Rule]) {
        for rule in rules.iter_mut() {
            self.annotate_optional(&mut rule.rule_text);
            self.annotate_optional(&mut rule.alt_rule_text);
            for subrule in rule.subrules.iter_mut() {
                self.annotate_optional(&mut subrule.rule_text);
                self.annotate_optional(&mut subrule.alt_rule_text);
            }
        }
    }
}
