//! Mention resolution.
//!
//! Messages reference participants with `@<id>` tokens. Three spellings of
//! the same reference exist:
//! - canonical: `@<participant-id>`, the only form ever persisted;
//! - display: `@<display name>`, what a human reads and types;
//! - ordinal: `@<n>`, a 1-based roster position used inside one outbound
//!   request to keep payloads small.
//!
//! Text is first split into literal and mention segments, then rewritten in
//! a separate pass, so no rewrite ever shifts the offsets of a later token.
//!
//! A mention starts at an `@` that is at the start of the text, directly
//! follows another mention, or follows a character that cannot be part of
//! an id. The id itself is the longest run of ASCII letters, digits, `_`
//! and `-` after the `@`. Maximal munch means `@1` never matches inside
//! `@10`.

use crate::id::ParticipantId;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Reserved id addressing everyone in the room
pub const EVERYONE: &str = "all";

/// Reserved id addressing the human
pub const HUMAN: &str = "user";

/// One piece of tokenized text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text outside any mention
    Literal(&'a str),
    /// The id part of an `@id` token
    Mention(&'a str),
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Split text into literal and mention segments
pub fn tokenize(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut last_mention_end = None;
    let mut i = 0;

    while i < text.len() {
        let Some(c) = text[i..].chars().next() else {
            break;
        };
        if c == '@' && can_start_mention(text, i, last_mention_end) {
            let id_len: usize = text[i + 1..]
                .chars()
                .take_while(|&ch| is_id_char(ch))
                .map(char::len_utf8)
                .sum();
            if id_len > 0 {
                if literal_start < i {
                    segments.push(Segment::Literal(&text[literal_start..i]));
                }
                let end = i + 1 + id_len;
                segments.push(Segment::Mention(&text[i + 1..end]));
                i = end;
                literal_start = end;
                last_mention_end = Some(end);
                continue;
            }
        }
        i += c.len_utf8();
    }

    if literal_start < text.len() {
        segments.push(Segment::Literal(&text[literal_start..]));
    }
    segments
}

fn can_start_mention(text: &str, at: usize, last_mention_end: Option<usize>) -> bool {
    if at == 0 || last_mention_end == Some(at) {
        return true;
    }
    text[..at]
        .chars()
        .next_back()
        .is_none_or(|prev| !is_id_char(prev))
}

/// Mentions found in a piece of canonical text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mentions {
    /// `@all` was present
    pub everyone: bool,
    /// `@user` was present
    pub human: bool,
    /// Other ids, in first-occurrence order, without duplicates
    pub ids: Vec<ParticipantId>,
}

impl Mentions {
    /// Check whether a participant was addressed by id
    pub fn names(&self, id: &ParticipantId) -> bool {
        self.ids.contains(id)
    }
}

/// Collect the mentions in canonical text
pub fn extract_mentions(text: &str) -> Mentions {
    let mut mentions = Mentions::default();
    for segment in tokenize(text) {
        if let Segment::Mention(id) = segment {
            match id {
                EVERYONE => mentions.everyone = true,
                HUMAN => mentions.human = true,
                other => {
                    let id = ParticipantId::new(other);
                    if !mentions.ids.contains(&id) {
                        mentions.ids.push(id);
                    }
                }
            }
        }
    }
    mentions
}

/// Name lookup for one room's participants plus the reserved ids
#[derive(Debug, Clone)]
pub struct MentionMap {
    names: Vec<(ParticipantId, String)>,
    human_name: String,
    everyone_label: String,
}

impl MentionMap {
    /// Create a map from `(id, display name)` pairs in roster order
    pub fn new(
        entries: impl IntoIterator<Item = (ParticipantId, String)>,
        human_name: impl Into<String>,
    ) -> Self {
        Self {
            names: entries.into_iter().collect(),
            human_name: human_name.into(),
            everyone_label: EVERYONE.to_string(),
        }
    }

    /// Set the label rendered for `@all`
    pub fn with_everyone_label(mut self, label: impl Into<String>) -> Self {
        self.everyone_label = label.into();
        self
    }

    /// Display name for an id, including the reserved ids
    pub fn name_of(&self, id: &str) -> Option<&str> {
        match id {
            EVERYONE => Some(&self.everyone_label),
            HUMAN => Some(&self.human_name),
            other => self
                .names
                .iter()
                .find(|(pid, _)| pid.as_str() == other)
                .map(|(_, name)| name.as_str()),
        }
    }

    /// Check whether an id resolves
    pub fn contains(&self, id: &str) -> bool {
        self.name_of(id).is_some()
    }

    /// Render canonical text for a reader: `@<id>` becomes `@<name>`
    ///
    /// Unknown ids are left untouched.
    pub fn to_display(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for segment in tokenize(text) {
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Mention(id) => {
                    out.push('@');
                    out.push_str(self.name_of(id).unwrap_or(id));
                }
            }
        }
        out
    }

    /// Turn human-typed `@<name>` references back into canonical ids
    ///
    /// Names are tried longest first so one name that prefixes another
    /// cannot steal the match; anything that is not a known name falls back
    /// to the generic `@id` token rules.
    pub fn to_canonical(&self, text: &str) -> String {
        let mut candidates: Vec<(&str, &str)> = self
            .names
            .iter()
            .map(|(id, name)| (name.as_str(), id.as_str()))
            .chain([
                (self.human_name.as_str(), HUMAN),
                (self.everyone_label.as_str(), EVERYONE),
            ])
            .filter(|(name, _)| !name.is_empty())
            .collect();
        candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut out = String::with_capacity(text.len());
        let mut last_mention_end = None;
        let mut i = 0;

        while i < text.len() {
            let Some(c) = text[i..].chars().next() else {
                break;
            };
            if c == '@' && can_start_mention(text, i, last_mention_end) {
                let rest = &text[i + 1..];
                let by_name = candidates
                    .iter()
                    .find(|(name, _)| rest.starts_with(name) && ends_cleanly(name, &rest[name.len()..]));
                if let Some((name, id)) = by_name {
                    out.push('@');
                    out.push_str(id);
                    i += 1 + name.len();
                    last_mention_end = Some(i);
                    continue;
                }
                let id_len: usize = rest
                    .chars()
                    .take_while(|&ch| is_id_char(ch))
                    .map(char::len_utf8)
                    .sum();
                if id_len > 0 {
                    out.push_str(&text[i..i + 1 + id_len]);
                    i += 1 + id_len;
                    last_mention_end = Some(i);
                    continue;
                }
            }
            out.push(c);
            i += c.len_utf8();
        }
        out
    }

    /// Normalize mention text
    ///
    /// Unknown ids are dropped. The first occurrence of an id is kept as
    /// `@id`, and a display name standing right after it is removed as
    /// redundant (the reserved ids keep theirs). Later occurrences lose the
    /// `@id` token and read as the plain name, written once and spaced off
    /// from any neighboring mention. Space runs are
    /// collapsed and the result trimmed. Applying this twice changes
    /// nothing.
    pub fn cleanup(&self, text: &str) -> String {
        let segments = tokenize(text);
        let mut out: Vec<Piece> = Vec::with_capacity(segments.len());
        let mut seen: HashSet<&str> = HashSet::new();

        for (idx, segment) in segments.iter().enumerate() {
            match *segment {
                Segment::Literal(lit) => out.push(Piece::Literal(lit.to_string())),
                Segment::Mention(id) => {
                    let Some(name) = self.name_of(id) else {
                        trace!(id, "dropping mention of unknown id");
                        continue;
                    };
                    if seen.insert(id) {
                        out.push(Piece::Mention(id.to_string()));
                        continue;
                    }
                    let next = segments.get(idx + 1);
                    let name_follows = matches!(
                        next,
                        Some(Segment::Literal(lit)) if leading_name_len(lit, name).is_some()
                    );
                    if !name_follows {
                        let mut plain = String::with_capacity(name.len() + 2);
                        if needs_separator(&out) {
                            plain.push(' ');
                        }
                        plain.push_str(name);
                        if matches!(next, Some(Segment::Mention(_))) {
                            plain.push(' ');
                        }
                        out.push(Piece::Literal(plain));
                    }
                }
            }
        }

        let mut merged = merge_literals(out);
        for idx in 0..merged.len() {
            let Piece::Mention(id) = &merged[idx] else {
                continue;
            };
            if id == EVERYONE || id == HUMAN {
                continue;
            }
            let Some(name) = self.name_of(id).map(str::to_string) else {
                continue;
            };
            if let Some(Piece::Literal(lit)) = merged.get_mut(idx + 1) {
                while let Some(len) = leading_name_len(lit, &name) {
                    let ws = lit.len() - lit.trim_start().len();
                    lit.replace_range(ws..len, "");
                }
            }
        }

        let mut rendered = String::with_capacity(text.len());
        for piece in &merged {
            match piece {
                Piece::Literal(lit) => rendered.push_str(lit),
                Piece::Mention(id) => {
                    rendered.push('@');
                    rendered.push_str(id);
                }
            }
        }
        collapse_spaces(&rendered).trim().to_string()
    }
}

enum Piece {
    Literal(String),
    Mention(String),
}

fn merge_literals(pieces: Vec<Piece>) -> Vec<Piece> {
    let mut merged: Vec<Piece> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        match (merged.last_mut(), piece) {
            (Some(Piece::Literal(prev)), Piece::Literal(next)) => prev.push_str(&next),
            (_, piece) => merged.push(piece),
        }
    }
    merged
}

/// A plain name written after this output would fuse with an `@` token
fn needs_separator(out: &[Piece]) -> bool {
    match out.last() {
        Some(Piece::Mention(_)) => true,
        Some(Piece::Literal(lit)) => lit.chars().next_back().is_some_and(|c| c == '@' || is_id_char(c)),
        None => false,
    }
}

/// Byte length of leading whitespace plus `name`, when the name stands alone
///
/// Removing the name must not change how the rest tokenizes, so it cannot
/// run into an id character or into an `@` that would then open a mention.
fn leading_name_len(text: &str, name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    let ws = text.len() - text.trim_start().len();
    let rest = &text[ws..];
    if !rest.starts_with(name) {
        return None;
    }
    let after = &rest[name.len()..];
    let mut rest_chars = after.chars();
    match rest_chars.next() {
        None => Some(ws + name.len()),
        Some(c) if is_id_char(c) => None,
        Some('@') if rest_chars.next().is_some_and(is_id_char) => None,
        Some(c) if c.is_whitespace() || c == '@' || is_punctuation(c) => Some(ws + name.len()),
        Some(_) => None,
    }
}

/// A name match must not run into more ASCII word characters
fn ends_cleanly(name: &str, after: &str) -> bool {
    let ends_ascii_word = name.chars().next_back().is_some_and(|c| c.is_ascii_alphanumeric());
    !ends_ascii_word || after.chars().next().is_none_or(|c| !c.is_ascii_alphanumeric())
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '，' | '。' | '！' | '？' | '、' | '：' | '；' | '「' | '」' | '『' | '』' | '（' | '）'
                | '…' | '～' | '“' | '”' | '‘' | '’' | '—'
        )
}

fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for c in text.chars() {
        if c == ' ' {
            if !prev_space {
                out.push(c);
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

/// Per-request compaction of roster ids to 1-based ordinals
#[derive(Debug, Clone)]
pub struct OrdinalMap {
    by_id: HashMap<ParticipantId, usize>,
    by_ordinal: Vec<ParticipantId>,
}

impl OrdinalMap {
    /// Number the roster in order, starting at 1
    pub fn new(roster: &[ParticipantId]) -> Self {
        let by_ordinal = roster.to_vec();
        let by_id = by_ordinal
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i + 1))
            .collect();
        Self { by_id, by_ordinal }
    }

    /// Ordinal of an id
    pub fn ordinal_of(&self, id: &ParticipantId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Id at an ordinal
    pub fn id_at(&self, ordinal: usize) -> Option<&ParticipantId> {
        ordinal.checked_sub(1).and_then(|i| self.by_ordinal.get(i))
    }

    /// Replace canonical roster mentions with ordinals
    pub fn to_ordinal(&self, text: &str) -> String {
        self.rewrite(text, |id| {
            self.by_id
                .get(&ParticipantId::new(id))
                .map(|n| n.to_string())
        })
    }

    /// Replace ordinal mentions with canonical ids; out-of-range ordinals stay
    pub fn to_canonical(&self, text: &str) -> String {
        self.rewrite(text, |token| {
            token
                .parse::<usize>()
                .ok()
                .and_then(|n| self.id_at(n))
                .map(|id| id.as_str().to_string())
        })
    }

    fn rewrite(&self, text: &str, map: impl Fn(&str) -> Option<String>) -> String {
        let mut out = String::with_capacity(text.len());
        for segment in tokenize(text) {
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Mention(id) => {
                    out.push('@');
                    match map(id) {
                        Some(replacement) => out.push_str(&replacement),
                        None => out.push_str(id),
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> MentionMap {
        MentionMap::new(
            [
                (ParticipantId::new("U1"), "張三".to_string()),
                (ParticipantId::new("U2"), "Bob".to_string()),
                (ParticipantId::new("U3"), "A.B (x)".to_string()),
            ],
            "Me",
        )
    }

    #[test]
    fn test_tokenize_segments() {
        let segments = tokenize("hi @U1, and @U2@U3 mail a@b.c");
        assert_eq!(
            segments,
            vec![
                Segment::Literal("hi "),
                Segment::Mention("U1"),
                Segment::Literal(", and "),
                Segment::Mention("U2"),
                Segment::Mention("U3"),
                Segment::Literal(" mail a@b.c"),
            ]
        );
    }

    #[test]
    fn test_cleanup_repeated_mention_scenario() {
        let map = MentionMap::new([(ParticipantId::new("U1"), "張三".to_string())], "Me");
        assert_eq!(map.cleanup("@U1 張三 你好，@U1 再次"), "@U1 你好，張三 再次");
    }

    #[test]
    fn test_cleanup_drops_unknown_ids() {
        assert_eq!(map().cleanup("@U9 hello @U2 there"), "hello @U2 there");
    }

    #[test]
    fn test_cleanup_keeps_name_glued_to_text() {
        assert_eq!(map().cleanup("@U1 張三豐 來了"), "@U1 張三豐 來了");
    }

    #[test]
    fn test_cleanup_reserved_keep_first_name() {
        assert_eq!(map().cleanup("@all all good morning"), "@all all good morning");
        assert_eq!(map().cleanup("@user Me hi"), "@user Me hi");
    }

    #[test]
    fn test_cleanup_repeat_followed_by_name_is_not_doubled() {
        assert_eq!(map().cleanup("@U2 hey, @U2 Bob again"), "@U2 hey, Bob again");
    }

    #[test]
    fn test_cleanup_adjacent_repeat() {
        assert_eq!(map().cleanup("@U2 @U2 yo"), "@U2 yo");
        assert_eq!(map().cleanup("@U2@U2@U1 yo"), "@U2 @U1 yo");
    }

    #[test]
    fn test_cleanup_repeat_after_mention_keeps_both() {
        let map = map();
        assert_eq!(map.cleanup("@U2 hi @U1@U2"), "@U2 hi @U1 Bob");
        assert_eq!(map.cleanup("@U2 ok @user@U2 bye"), "@U2 ok @user Bob bye");
        let mentions = extract_mentions(&map.cleanup("@U2 hi @U1@U2"));
        assert!(mentions.names(&ParticipantId::new("U1")));
    }

    #[test]
    fn test_cleanup_name_removal_keeps_tokens_intact() {
        // dropping "Bob" here would merge it into a different id or open a new mention
        assert_eq!(map().cleanup("@U2 Bob-x"), "@U2 Bob-x");
        assert_eq!(map().cleanup("@U2 Bob@U1 hi"), "@U2 Bob@U1 hi");
    }

    #[test]
    fn test_cleanup_is_idempotent_on_random_text() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let atoms = [
            "@U1", "@U2", "@U3", "@X", "@all", "@user", "張三", "Bob", "Me", "A.B (x)", "all", " ", "  ",
            "hi", "，", "!", "-", "_", "@", "x", "。",
        ];
        let map = map();
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..20_000 {
            let len = rng.gen_range(1..=10);
            let input: String = (0..len).map(|_| atoms[rng.gen_range(0..atoms.len())]).collect();
            let once = map.cleanup(&input);
            assert_eq!(map.cleanup(&once), once, "input: {input:?}");

            let mut ids: Vec<&str> = tokenize(&once)
                .into_iter()
                .filter_map(|s| match s {
                    Segment::Mention(id) => Some(id),
                    Segment::Literal(_) => None,
                })
                .collect();
            let total = ids.len();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), total, "input: {input:?} cleaned: {once:?}");
        }
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let map = map();
        let inputs = [
            "@U1 張三 你好，@U1 再次",
            "@U2 @U2 yo",
            "@U2@U2@U1 yo",
            "@U9 @U2 Bob Bob Bob hi",
            "  spaced    out   @U1   text  ",
            "@U1 @X 張三 @U1@U1",
            "@all all @all hi @user @user Me",
            "x@U1 @U1 mail@U2",
            "@U3 A.B (x) said @U3",
            "",
            "@",
            "@@U2 Bob",
        ];
        for input in inputs {
            let once = map.cleanup(input);
            assert_eq!(map.cleanup(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_cleanup_leaves_at_most_one_token_per_id() {
        let map = map();
        let out = map.cleanup("@U2 a @U2 b @U2 c @U2");
        assert_eq!(out.matches("@U2").count(), 1);
        assert_eq!(out, "@U2 a Bob b Bob c Bob");
    }

    #[test]
    fn test_display_and_canonical_forms() {
        let map = map();
        assert_eq!(map.to_display("@U1 hi @U2, @user @all"), "@張三 hi @Bob, @Me @all");
        assert_eq!(map.to_canonical("@張三 hi @Bob, @Me @all"), "@U1 hi @U2, @user @all");
    }

    #[test]
    fn test_canonical_escapes_metacharacters() {
        assert_eq!(map().to_canonical("hey @A.B (x) look"), "hey @U3 look");
    }

    #[test]
    fn test_canonical_prefers_longest_name() {
        let map = MentionMap::new(
            [
                (ParticipantId::new("a1"), "Ann".to_string()),
                (ParticipantId::new("a2"), "Anna".to_string()),
            ],
            "Me",
        );
        assert_eq!(map.to_canonical("@Anna and @Ann"), "@a2 and @a1");
        assert_eq!(map.to_canonical("@Annabel"), "@Annabel");
    }

    #[test]
    fn test_extract_mentions() {
        let m = extract_mentions("@all hey @U2 and @U1 @U2 @user");
        assert!(m.everyone);
        assert!(m.human);
        assert_eq!(m.ids, vec![ParticipantId::new("U2"), ParticipantId::new("U1")]);
        assert!(m.names(&ParticipantId::new("U1")));
    }

    #[test]
    fn test_ordinal_does_not_match_prefix() {
        let roster: Vec<ParticipantId> = (1..=10).map(|i| ParticipantId::new(format!("p{i}"))).collect();
        let ordinals = OrdinalMap::new(&roster);
        assert_eq!(ordinals.to_canonical("@10 and @1"), "@p10 and @p1");
        assert_eq!(ordinals.to_canonical("@11 stays"), "@11 stays");
    }

    #[test]
    fn test_ordinal_round_trip() {
        let roster = vec![ParticipantId::new("U1"), ParticipantId::new("U2"), ParticipantId::new("U3")];
        let ordinals = OrdinalMap::new(&roster);
        let messages = [
            "@U1 hi @U3",
            "@U2@U1 @all @user",
            "nothing here",
            "@Ghost stays @U2, x@U1",
        ];
        for m in messages {
            assert_eq!(ordinals.to_canonical(&ordinals.to_ordinal(m)), m);
        }
        assert_eq!(ordinals.to_ordinal("@U1 hi @U3"), "@1 hi @3");
    }
}
