//! Reply post-processing.
//!
//! Raw model output is cleaned in a fixed order: the affection line is
//! split off, hallucinated `[speaker]:` labels are stripped, a reply that
//! is one quoted span is unwrapped, and emphasis-only quotation marks are
//! collapsed.

use crate::room::AffectionUpdate;
use once_cell::sync::Lazy;
use regex::Regex;

static NUMERIC_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-]?)(\d{1,6})$").expect("valid regex"));

static AFFECTION_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[\[(（【]?\s*(?:affection|好感度|好感)\s*[:：=]\s*([+-]?)(\d{1,6})\s*[\])）】]?$")
        .expect("valid regex")
});

static SPEAKER_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*\[([^\]\n]{1,40})\][ \t]*[:：][ \t]*").expect("valid regex"));

static QUOTED_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([^"\n]+)"|“([^”\n]+)”|「([^」\n]+)」|『([^』\n]+)』"#).expect("valid regex")
});

/// Sentence-ending characters that mark a quote as real dialogue
const SENTENCE_END: [char; 9] = ['.', '!', '?', '。', '！', '？', '…', '~', '～'];

/// A cleaned reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    /// Text to show; empty means the reply was only an affection update
    pub body: String,
    /// Affection update from the last line
    pub affection: Option<AffectionUpdate>,
}

impl Processed {
    /// Nothing to show, only an affection update
    pub fn is_silent(&self) -> bool {
        self.body.is_empty()
    }
}

/// Cleans raw replies for one persona
#[derive(Debug, Clone)]
pub struct PostProcessor {
    persona_name: String,
    quote_threshold: usize,
    preamble_ratio: f32,
}

impl PostProcessor {
    /// Create a processor for the named persona
    pub fn new(persona_name: impl Into<String>, quote_threshold: usize, preamble_ratio: f32) -> Self {
        Self {
            persona_name: persona_name.into(),
            quote_threshold,
            preamble_ratio,
        }
    }

    /// Run every cleaning step
    pub fn process(&self, raw: &str) -> Processed {
        let (body, affection) = split_affection(raw.trim());
        let body = self.strip_speaker_labels(&body);
        let body = self.unwrap_single_quote(body.trim());
        let body = self.collapse_emphasis_quotes(&body);
        Processed {
            body: body.trim().to_string(),
            affection,
        }
    }

    /// Remove `[speaker]:` labels, keeping this persona's segments
    ///
    /// When no segment belongs to the persona, text before the first label
    /// is kept, or failing that the first labelled segment.
    pub fn strip_speaker_labels(&self, text: &str) -> String {
        let labels: Vec<_> = SPEAKER_LABEL.captures_iter(text).collect();
        if labels.is_empty() {
            return text.to_string();
        }

        let preamble = text[..labels[0].get(0).map_or(0, |m| m.start())].trim();
        let mut own = Vec::new();
        let mut first_segment = None;

        for (i, caps) in labels.iter().enumerate() {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let end = labels
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(text.len(), |m| m.start());
            let segment = text[whole.end()..end].trim();
            if first_segment.is_none() {
                first_segment = Some(segment);
            }
            if name.as_str().trim().eq_ignore_ascii_case(self.persona_name.trim()) && !segment.is_empty() {
                own.push(segment);
            }
        }

        if !own.is_empty() {
            own.join("\n")
        } else if !preamble.is_empty() {
            preamble.to_string()
        } else {
            first_segment.unwrap_or_default().to_string()
        }
    }

    /// Unwrap a reply that is one quoted span, optionally after a short preamble
    pub fn unwrap_single_quote(&self, text: &str) -> String {
        let spans: Vec<_> = QUOTED_SPAN.captures_iter(text).collect();
        let [caps] = spans.as_slice() else {
            return text.to_string();
        };
        let Some(whole) = caps.get(0) else {
            return text.to_string();
        };
        if whole.end() != text.len() {
            return text.to_string();
        }

        let preamble = text[..whole.start()].trim();
        let total = text.chars().count() as f32;
        if preamble.chars().count() as f32 > total * self.preamble_ratio {
            return text.to_string();
        }

        let inner = quote_inner(caps).trim();
        if preamble.is_empty() {
            inner.to_string()
        } else {
            format!("{preamble} {inner}")
        }
    }

    /// Drop quotation marks used only for emphasis
    ///
    /// Quotes wrapping a complete sentence, or longer than the threshold,
    /// are dialogue and stay.
    pub fn collapse_emphasis_quotes(&self, text: &str) -> String {
        QUOTED_SPAN
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let whole = caps.get(0).map_or("", |m| m.as_str());
                let inner = quote_inner(caps);
                let trimmed = inner.trim();
                let sentence = trimmed.ends_with(&SENTENCE_END[..]);
                if sentence || trimmed.chars().count() > self.quote_threshold {
                    whole.to_string()
                } else {
                    inner.to_string()
                }
            })
            .into_owned()
    }
}

fn quote_inner<'t>(caps: &regex::Captures<'t>) -> &'t str {
    (1..=4)
        .find_map(|i| caps.get(i))
        .map_or("", |m| m.as_str())
}

/// Split a trailing affection line off a reply
///
/// A signed number is a delta, an unsigned one an absolute value. The tag
/// form (`affection: 5`, `好感度：+2`) follows the same sign rule.
pub fn split_affection(text: &str) -> (String, Option<AffectionUpdate>) {
    let trimmed = text.trim_end();
    let (head, last) = match trimmed.rfind('\n') {
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("", trimmed),
    };
    let last = last.trim();

    let caps = NUMERIC_LINE
        .captures(last)
        .or_else(|| AFFECTION_TAG.captures(last));
    let Some(caps) = caps else {
        return (text.to_string(), None);
    };
    let sign = caps.get(1).map_or("", |m| m.as_str());
    let Some(value) = caps.get(2).and_then(|m| m.as_str().parse::<i32>().ok()) else {
        return (text.to_string(), None);
    };

    let update = match sign {
        "+" => AffectionUpdate::Delta(value),
        "-" => AffectionUpdate::Delta(-value),
        _ => AffectionUpdate::Set(value),
    };
    (head.trim_end().to_string(), Some(update))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> PostProcessor {
        PostProcessor::new("Alice", 12, 0.3)
    }

    #[test]
    fn test_affection_delta_and_set() {
        assert_eq!(
            split_affection("Sure thing!\n+3"),
            ("Sure thing!".to_string(), Some(AffectionUpdate::Delta(3)))
        );
        assert_eq!(
            split_affection("Hmph.\n-2"),
            ("Hmph.".to_string(), Some(AffectionUpdate::Delta(-2)))
        );
        assert_eq!(
            split_affection("ok\n42"),
            ("ok".to_string(), Some(AffectionUpdate::Set(42)))
        );
        assert_eq!(
            split_affection("好啊\n好感度：+5"),
            ("好啊".to_string(), Some(AffectionUpdate::Delta(5)))
        );
        assert_eq!(
            split_affection("fine\n(affection: 10)"),
            ("fine".to_string(), Some(AffectionUpdate::Set(10)))
        );
    }

    #[test]
    fn test_affection_requires_whole_line() {
        let (body, update) = split_affection("I am 25 years old");
        assert_eq!(body, "I am 25 years old");
        assert_eq!(update, None);

        let (_, update) = split_affection("count to\n3 2 1");
        assert_eq!(update, None);
    }

    #[test]
    fn test_numeric_only_reply_is_silent() {
        let processed = alice().process("+1");
        assert!(processed.is_silent());
        assert_eq!(processed.affection, Some(AffectionUpdate::Delta(1)));
    }

    #[test]
    fn test_strip_labels_keeps_own_segments() {
        let raw = "[Alice]: Morning!\n[Bob]: Hey all\n[Alice]: Coffee?";
        assert_eq!(alice().strip_speaker_labels(raw), "Morning!\nCoffee?");
    }

    #[test]
    fn test_strip_labels_fallbacks() {
        assert_eq!(
            alice().strip_speaker_labels("Sure.\n[Bob]: me too"),
            "Sure."
        );
        assert_eq!(alice().strip_speaker_labels("[Bob]: me too"), "me too");
        assert_eq!(alice().strip_speaker_labels("no labels"), "no labels");
    }

    #[test]
    fn test_unwrap_single_quote() {
        let p = alice();
        assert_eq!(p.unwrap_single_quote("\"Hello there, how are you?\""), "Hello there, how are you?");
        assert_eq!(p.unwrap_single_quote("*waves* \"Hello there, friend!\""), "*waves* Hello there, friend!");
        // preamble too long
        let long = "She looks up from her book slowly and says \"hi\"";
        assert_eq!(p.unwrap_single_quote(long), long);
        // more than one span
        let two = "\"a\" and \"b\"";
        assert_eq!(p.unwrap_single_quote(two), two);
    }

    #[test]
    fn test_collapse_emphasis_quotes() {
        let p = alice();
        assert_eq!(
            p.collapse_emphasis_quotes("That was \"fun\" I guess"),
            "That was fun I guess"
        );
        assert_eq!(
            p.collapse_emphasis_quotes("He said \"Go home.\" and left"),
            "He said \"Go home.\" and left"
        );
        assert_eq!(
            p.collapse_emphasis_quotes("a “really quite long phrase here” b"),
            "a “really quite long phrase here” b"
        );
        assert_eq!(p.collapse_emphasis_quotes("你這個「笨蛋」"), "你這個笨蛋");
    }

    #[test]
    fn test_full_pipeline() {
        let raw = "[Alice]: \"Sure, I'd love to come along!\"\n[Bob]: count me in\n+2";
        let processed = alice().process(raw);
        assert_eq!(processed.body, "Sure, I'd love to come along!");
        assert_eq!(processed.affection, Some(AffectionUpdate::Delta(2)));
    }
}
