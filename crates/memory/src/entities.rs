//! Entity extraction and pronoun reference resolution.

use parley_common::ConversationTurn;
use regex::{NoExpand, Regex};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Pronoun forms, most specific first, and whether each is plural.
const PRONOUNS: &[(&str, bool)] = &[
    ("the subscription", false),
    ("them", true),
    ("those", true),
    ("that", false),
    ("this", false),
    ("it", false),
];

static PRONOUN_PATTERNS: LazyLock<Vec<(Regex, bool)>> = LazyLock::new(|| {
    PRONOUNS
        .iter()
        .map(|(form, plural)| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(form));
            (Regex::new(&pattern).expect("pronoun patterns are valid"), *plural)
        })
        .collect()
});

/// Capitalised words that are never entities on their own.
const NON_ENTITIES: &[&str] = &[
    "i", "i'm", "i've", "i'd", "i'll", "me", "my", "you", "your", "we", "our", "they", "he", "she", "it",
    "the", "a", "an", "and", "or", "but", "if", "this", "that", "those", "these", "them", "what", "when",
    "where", "why", "how", "who", "which", "can", "could", "would", "should", "will", "please", "thanks",
    "thank", "hi", "hello", "hey", "yes", "no", "ok", "okay", "sure", "also", "monday", "tuesday",
    "wednesday", "thursday", "friday", "saturday", "sunday", "cancel", "pause", "resume", "update", "show",
    "add", "remove", "delete", "check", "pay", "set", "find", "tell", "give", "list", "stop", "start",
    "change", "move", "book", "call", "send", "get", "make", "remind", "schedule",
];

fn is_non_entity(word: &str) -> bool {
    let lowered = word.to_lowercase();
    NON_ENTITIES.contains(&lowered.as_str())
}

/// Word with inner capitals or mixed letters and digits, e.g. `iPhone`, `HBO`, `Web3`.
fn is_distinctive(word: &str) -> bool {
    let letters = word.chars().filter(|c| c.is_alphabetic()).count();
    let inner_upper = word.chars().skip(1).any(char::is_uppercase);
    let has_digit = word.chars().any(|c| c.is_ascii_digit());
    letters >= 2 && (inner_upper || has_digit)
}

fn starts_upper(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
}

fn flush_run(current: &mut Vec<&str>, opens_sentence: bool, entities: &mut Vec<String>) {
    // A plain capitalised sentence opener is taken as an ordinary word
    let start = usize::from(opens_sentence && current.first().is_some_and(|w| !is_distinctive(w)));
    if current.len() > start {
        let entity = current[start..].join(" ");
        if !entities.contains(&entity) {
            entities.push(entity);
        }
    }
    current.clear();
}

/// Extract likely named entities from free text, in order of appearance.
///
/// Runs of capitalised words are joined (`Amazon Prime`). The first word of
/// a sentence only counts when it is distinctive on its own (`iPhone`), so
/// `Compare Spotify with Netflix` yields `Spotify` and `Netflix`.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_opens_sentence = false;
    let mut sentence_start = true;

    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '+' && c != '&');
        let word = word.trim_end_matches("'s").trim_end_matches("\u{2019}s");
        let ends_sentence = raw.ends_with(['.', '!', '?']);
        let breaks_run = ends_sentence || raw.ends_with([',', ';', ':']);

        let candidate = !word.is_empty() && !is_non_entity(word) && (starts_upper(word) || is_distinctive(word));

        if candidate {
            if current.is_empty() {
                current_opens_sentence = sentence_start;
            }
            current.push(word);
        } else {
            flush_run(&mut current, current_opens_sentence, &mut entities);
        }

        if breaks_run {
            flush_run(&mut current, current_opens_sentence, &mut entities);
        }
        sentence_start = ends_sentence;
    }
    flush_run(&mut current, current_opens_sentence, &mut entities);

    entities
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "how", "its", "may", "new", "now", "see", "who", "did", "get",
    "let", "she", "too", "use", "what", "when", "where", "which", "why", "with", "this", "that", "those",
    "them", "they", "then", "than", "there", "their", "from", "into", "about", "would", "could", "should",
    "will", "just", "some", "been", "were", "does", "show", "find", "tell", "give", "please", "my", "me",
];

/// Keywords of a search query: lowercase tokens of three or more characters
/// that are not stop words, deduplicated in order of appearance.
pub fn query_keywords(query: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for token in query.split(|c: char| !c.is_alphanumeric()) {
        let token = token.to_lowercase();
        if token.chars().count() < 3 || STOP_WORDS.contains(&token.as_str()) || keywords.contains(&token) {
            continue;
        }
        keywords.push(token);
    }
    keywords
}

/// Entities across `turns`, ordered by last mention (oldest first).
pub fn collect_entities(turns: &[ConversationTurn]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    for turn in turns {
        let mut seen_in_turn = HashSet::new();
        for entity in &turn.entities {
            if !seen_in_turn.insert(entity.as_str()) {
                continue;
            }
            ordered.retain(|e| e != entity);
            ordered.push(entity.clone());
        }
    }
    ordered
}

/// Substitute the first pronoun in `query` with the entity it refers to.
///
/// `entities` are ordered oldest to newest mention. Plural pronouns expand to
/// every entity when more than one is known; anything else takes the most
/// recent one. Pronoun forms are tried most specific first and only one
/// occurrence is replaced.
pub fn resolve_references(query: &str, entities: &[String]) -> String {
    let Some(latest) = entities.last() else {
        return query.to_string();
    };

    for (pattern, plural) in PRONOUN_PATTERNS.iter() {
        if !pattern.is_match(query) {
            continue;
        }
        let replacement = if *plural && entities.len() > 1 {
            entities.join(", ")
        } else {
            latest.clone()
        };
        return pattern.replacen(query, 1, NoExpand(&replacement)).into_owned();
    }

    query.to_string()
}
