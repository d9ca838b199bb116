use crate::error::ResolveError;
use crate::models::PollRecord;
use crate::store::PollStore;
use lazy_static::lazy_static;
use regex::Regex;

// Characters of the id shown in list labels
pub const DEFAULT_SUFFIX_LEN: usize = 6;
const LABEL_QUESTION_LEN: usize = 50;

lazy_static! {
    static ref LABEL_ID: Regex = Regex::new(r"\(ID: \.\.\.([^()\s]+)\)$").unwrap();
}

// Recovers canonical poll ids from the shortened form shown in list labels
pub struct IdResolver<'a> {
    store: &'a PollStore,
}

impl<'a> IdResolver<'a> {
    pub fn new(store: &'a PollStore) -> Self {
        Self { store }
    }

    // Find the single id ending with `suffix`
    pub fn resolve(&self, suffix: &str) -> Result<String, ResolveError> {
        if suffix.is_empty() {
            return Err(ResolveError::NotFound(String::new()));
        }

        let mut candidates: Vec<String> = self
            .store
            .ids()
            .into_iter()
            .filter(|id| id.ends_with(suffix))
            .collect();

        match candidates.len() {
            0 => Err(ResolveError::NotFound(suffix.to_string())),
            1 => Ok(candidates.remove(0)),
            _ => {
                candidates.sort();
                Err(ResolveError::Ambiguous {
                    suffix: suffix.to_string(),
                    candidates,
                })
            }
        }
    }

    // Same as resolve, but starting from a full list label
    pub fn resolve_label(&self, label: &str) -> Result<String, ResolveError> {
        match suffix_from_label(label) {
            Some(suffix) => self.resolve(suffix),
            None => Err(ResolveError::NotFound(label.to_string())),
        }
    }
}

// Last `len` characters of an id (the whole id if it is shorter)
pub fn display_suffix(id: &str, len: usize) -> &str {
    let start = id
        .char_indices()
        .rev()
        .nth(len.saturating_sub(1))
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    if len == 0 { "" } else { &id[start..] }
}

// "Question text (ID: ...abc123)"
pub fn display_label(record: &PollRecord, suffix_len: usize) -> String {
    let question = if record.question.is_empty() {
        "Unnamed Poll"
    } else {
        record.question.as_str()
    };
    let mut shown: String = question.chars().take(LABEL_QUESTION_LEN).collect();
    if question.chars().count() > LABEL_QUESTION_LEN {
        shown.push_str("...");
    }
    format!("{} (ID: ...{})", shown, display_suffix(&record.id, suffix_len))
}

pub fn suffix_from_label(label: &str) -> Option<&str> {
    LABEL_ID
        .captures(label.trim_end())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
