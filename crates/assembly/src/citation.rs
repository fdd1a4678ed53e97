use crate::error::Result;
use context_protocol::{Citation, SourceType};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// Which citations a piece of text references, and which of its markers
/// resolve to nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationReport {
    pub referenced: BTreeSet<usize>,
    pub dangling: Vec<String>,
}

impl CitationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty()
    }
}

/// Resolves `[Document N]`, `[Web N]`, bare `[N]` and `[title](url)` markers
/// against the citation map of an assembled context.
pub struct CitationLinker {
    typed: Regex,
    numeric: Regex,
    link: Regex,
}

impl CitationLinker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            typed: Regex::new(r"\[(Document|Web) (\d+)\]")?,
            numeric: Regex::new(r"\[(\d+)\]")?,
            link: Regex::new(r"\[([^\]]+)\]\((https?://(?:[^()\s]|\([^()\s]*\))+)\)")?,
        })
    }

    /// Scan `text` for markers. Dangling markers are listed once each, in
    /// order of first appearance.
    #[must_use]
    pub fn link(&self, text: &str, citations: &BTreeMap<usize, Citation>) -> CitationReport {
        let mut report = CitationReport::default();
        let mut seen = BTreeSet::new();
        let mut dangling = |marker: &str, report: &mut CitationReport| {
            if seen.insert(marker.to_string()) {
                report.dangling.push(marker.to_string());
            }
        };

        for caps in self.typed.captures_iter(text) {
            let marker = &caps[0];
            let wants_web = &caps[1] == "Web";
            let resolved = caps[2]
                .parse::<usize>()
                .ok()
                .and_then(|id| citations.get(&id))
                .filter(|citation| (citation.source_type == SourceType::Web) == wants_web);
            match resolved {
                Some(citation) => {
                    report.referenced.insert(citation.citation_id);
                }
                None => dangling(marker, &mut report),
            }
        }

        for caps in self.numeric.captures_iter(text) {
            let marker = &caps[0];
            match caps[1].parse::<usize>().ok().filter(|id| citations.contains_key(id)) {
                Some(id) => {
                    report.referenced.insert(id);
                }
                None => dangling(marker, &mut report),
            }
        }

        for caps in self.link.captures_iter(text) {
            let url = normalize_url(&caps[2]);
            let resolved = citations.values().find(|citation| {
                citation
                    .url
                    .as_deref()
                    .is_some_and(|candidate| normalize_url(candidate) == url)
            });
            match resolved {
                Some(citation) => {
                    report.referenced.insert(citation.citation_id);
                }
                None => dangling(&caps[0], &mut report),
            }
        }

        report
    }
}

fn normalize_url(url: &str) -> &str {
    url.trim_end_matches('/')
}
