//! Canonical station identity and the merge rules that keep exactly one
//! record per identity.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use airwave_proto::protocol::StationRecord;

/// Which kind of provider a record came from.  Curated records win bitrate
/// ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Generic,
    Curated,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: StationRecord,
    pub origin: Origin,
}

impl Candidate {
    pub fn new(record: StationRecord, origin: Origin) -> Self {
        Self { record, origin }
    }
}

// ── name cleanup ──────────────────────────────────────────────────────────────

/// Branding noise that list providers glue onto station names.
const BRANDING_TOKENS: &[&str] = &[
    "live stream",
    "livestream",
    "online radio",
    "radio online",
    "official stream",
    "(israel)",
    "[israel]",
    "(il)",
    "[il]",
    "- israel",
    "| live",
    "(live)",
    "[live]",
];

fn branding_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = BRANDING_TOKENS
            .iter()
            .map(|t| bounded(t))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!("(?i)(?:{alternation})")).expect("branding tokens are literals")
    })
}

/// Escape `token`, requiring a word boundary at any end that is a word
/// character so "live" never matches inside "Lively".
fn bounded(token: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric());
    let mut pattern = String::new();
    if is_word(token.chars().next()) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(token));
    if is_word(token.chars().last()) {
        pattern.push_str(r"\b");
    }
    pattern
}

/// Strip provider branding, collapse whitespace and dangling separators.
pub fn clean_name(raw: &str) -> String {
    let stripped = branding_regex().replace_all(raw, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '|' | ':' | '•' | '–'))
        .to_string()
}

fn is_hebrew(c: char) -> bool {
    ('\u{0590}'..='\u{05FF}').contains(&c)
}

/// Normalized name slug: lowercase, only alphanumeric and Hebrew characters,
/// trailing "fm" dropped.
pub fn slug(name: &str) -> String {
    let filtered: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || is_hebrew(*c))
        .collect();
    match filtered.strip_suffix("fm") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => filtered,
    }
}

// ── priority aliases ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalName {
    pub key: String,
    pub display: String,
}

/// Curated mapping from observed name variants to one station identity.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    by_slug: HashMap<String, CanonicalName>,
}

/// (key, display name, observed variants)
const BUILTIN_ALIASES: &[(&str, &str, &[&str])] = &[
    ("kan-bet", "כאן ב", &["Kan Bet", "Kan B", "Reshet Bet", "רשת ב", "כאן ב׳", "Kan Bet Radio"]),
    ("kan-gimel", "כאן גימל", &["Kan Gimel", "Kan Gimmel", "Reshet Gimel", "רשת ג", "כאן ג"]),
    ("kan-88", "כאן 88", &["Kan 88", "Kan88", "88FM", "88 FM", "Radio 88"]),
    ("kan-tarbut", "כאן תרבות", &["Kan Tarbut", "Kan Culture"]),
    ("kan-kol-hamusica", "כאן קול המוזיקה", &["Kan Kol HaMusica", "Kol HaMusica", "Kan Classical"]),
    ("kan-reka", "כאן רקע", &["Kan Reka", "Reka"]),
    ("galei-tzahal", "גלי צה\"ל", &["Galei Tzahal", "Galei Zahal", "Galatz", "גלצ", "IDF Radio", "Army Radio"]),
    ("galgalatz", "גלגלצ", &["Galgalatz", "Galgalaz", "GLZ"]),
    ("radio-103", "103FM", &["Radio 103", "Radio 103FM", "רדיו 103", "103 FM", "Radio Lelo Hafsaka"]),
    ("eco-99", "אקו 99", &["Eco 99", "Eco99", "Eco 99FM", "eco99fm", "99FM", "Radio 99"]),
    ("radio-tel-aviv", "רדיו תל אביב 102", &["Radio Tel Aviv", "102FM", "Radio Tel Aviv 102FM", "רדיו תל אביב"]),
    ("radio-haifa", "רדיו חיפה", &["Radio Haifa", "Radio Haifa 107.5", "107.5FM"]),
    ("radio-darom", "רדיו דרום", &["Radio Darom", "Radio Darom 97", "רדיו דרום 97"]),
    ("radio-jerusalem", "רדיו ירושלים 101", &["Radio Jerusalem", "Radio Jerusalem 101", "101FM", "רדיו ירושלים"]),
    ("kol-chai", "קול חי", &["Kol Chai", "Kol Hai", "Radio Kol Chai", "93FM"]),
    ("kol-barama", "קול ברמה", &["Kol Barama", "Kol BaRamah", "Radio Kol Barama"]),
    ("radius-100", "רדיוס 100", &["Radius 100", "Radius100", "100FM", "Radius 100FM"]),
];

impl AliasTable {
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for (key, display, variants) in BUILTIN_ALIASES {
            table.insert(key, display, variants);
        }
        table
    }

    /// Register `display` and every variant as names of `key`.
    pub fn insert(&mut self, key: &str, display: &str, variants: &[&str]) {
        let canonical = CanonicalName {
            key: key.to_string(),
            display: display.to_string(),
        };
        for name in std::iter::once(&display).chain(variants.iter()) {
            let s = slug(name);
            if !s.is_empty() {
                self.by_slug.insert(s, canonical.clone());
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&CanonicalName> {
        self.by_slug.get(&slug(name))
    }

    /// The dedup identity for `name`: the alias key when one matches, else the
    /// name slug.
    pub fn canonical_key(&self, name: &str) -> String {
        match self.resolve(name) {
            Some(c) => c.key.clone(),
            None => slug(name),
        }
    }
}

// ── merge ─────────────────────────────────────────────────────────────────────

/// `challenger` replaces `incumbent` on higher bitrate, or on equal bitrate
/// when it is curated and the incumbent is not.  Anything else keeps the
/// first-seen record.
fn beats(challenger: &Candidate, incumbent: &Candidate) -> bool {
    let (c, i) = (challenger.record.bitrate, incumbent.record.bitrate);
    c > i || (c == i && challenger.origin == Origin::Curated && incumbent.origin == Origin::Generic)
}

/// Clean, validate and deduplicate the concatenated provider results.
pub fn merge(candidates: Vec<Candidate>, aliases: &AliasTable) -> Vec<StationRecord> {
    let mut slots: Vec<(String, Candidate)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut dropped = 0usize;

    for mut candidate in candidates {
        let record = &mut candidate.record;
        record.name = clean_name(&record.name);
        record.stream_url = record.stream_url.trim().to_string();
        record.icon_url = record.icon_url.trim().to_string();
        if record.name.is_empty() || record.stream_url.is_empty() || record.icon_url.is_empty() {
            dropped += 1;
            continue;
        }

        let key = match aliases.resolve(&record.name) {
            Some(canonical) => {
                record.name = canonical.display.clone();
                canonical.key.clone()
            }
            None => slug(&record.name),
        };
        // A name with no usable characters cannot collide with anything.
        let key = if key.is_empty() {
            format!("id:{}", record.id)
        } else {
            key
        };

        match index.get(&key) {
            Some(&i) => {
                if beats(&candidate, &slots[i].1) {
                    debug!(
                        "catalog: '{}' replaced by {:?} record ({} kbps)",
                        key, candidate.origin, candidate.record.bitrate
                    );
                    slots[i].1 = candidate;
                }
            }
            None => {
                index.insert(key.clone(), slots.len());
                slots.push((key, candidate));
            }
        }
    }

    if dropped > 0 {
        debug!("catalog: dropped {} incomplete records", dropped);
    }

    let mut seen_ids = HashSet::new();
    slots
        .into_iter()
        .map(|(key, candidate)| {
            let mut record = candidate.record;
            if record.id.is_empty() {
                record.id = key;
            }
            if !seen_ids.insert(record.id.clone()) {
                let base = record.id.clone();
                let mut n = 2;
                while !seen_ids.insert(format!("{base}-{n}")) {
                    n += 1;
                }
                record.id = format!("{base}-{n}");
            }
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, name: &str, bitrate: u32) -> StationRecord {
        StationRecord {
            id: id.to_string(),
            name: name.to_string(),
            stream_url: format!("http://stream.test/{id}"),
            icon_url: format!("http://stream.test/{id}.png"),
            bitrate,
            ..Default::default()
        }
    }

    fn generic(id: &str, name: &str, bitrate: u32) -> Candidate {
        Candidate::new(rec(id, name, bitrate), Origin::Generic)
    }

    fn curated(id: &str, name: &str, bitrate: u32) -> Candidate {
        Candidate::new(rec(id, name, bitrate), Origin::Curated)
    }

    #[test]
    fn test_slug_rules() {
        assert_eq!(slug("Radio 103 FM"), "radio103");
        assert_eq!(slug("Eco99fm"), "eco99");
        assert_eq!(slug("  גלגלצ!! "), "גלגלצ");
        assert_eq!(slug("FM"), "fm");
        assert_eq!(slug("---"), "");
    }

    #[test]
    fn test_clean_name_strips_branding() {
        assert_eq!(clean_name("Kan Bet - Live Stream"), "Kan Bet");
        assert_eq!(clean_name("Radio Haifa (Israel)"), "Radio Haifa");
        assert_eq!(clean_name("  Galgalatz   [IL] | LIVE "), "Galgalatz");
        assert_eq!(clean_name("Eco 99"), "Eco 99");
    }

    #[test]
    fn test_clean_name_leaves_words_containing_tokens() {
        assert_eq!(clean_name("Radio 100 - Israeli Hits"), "Radio 100 - Israeli Hits");
        assert_eq!(clean_name("Galgalatz | Lively Mix"), "Galgalatz | Lively Mix");
        assert_eq!(clean_name("Deliverance Livestreams"), "Deliverance Livestreams");
        assert_eq!(clean_name("Radio 100 - Israel"), "Radio 100");
    }

    #[test]
    fn test_alias_resolves_variants() {
        let table = AliasTable::builtin();
        assert_eq!(table.canonical_key("Reshet Bet"), "kan-bet");
        assert_eq!(table.canonical_key("רשת ב"), "kan-bet");
        assert_eq!(table.canonical_key("Eco 99 FM"), "eco-99");
        assert_eq!(table.canonical_key("Some Pirate Radio"), "somepirateradio");
    }

    #[test]
    fn test_higher_bitrate_wins_in_any_order() {
        let table = AliasTable::default();
        let a = merge(
            vec![generic("lo", "Jazz One", 64), generic("hi", "Jazz One", 192)],
            &table,
        );
        let b = merge(
            vec![generic("hi", "Jazz One", 192), generic("lo", "Jazz One", 64)],
            &table,
        );
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, "hi");
        assert_eq!(b[0].id, "hi");
    }

    #[test]
    fn test_curated_wins_bitrate_tie() {
        let table = AliasTable::default();
        for input in [
            vec![generic("g", "Jazz One", 128), curated("c", "jazz one", 128)],
            vec![curated("c", "jazz one", 128), generic("g", "Jazz One", 128)],
        ] {
            let out = merge(input, &table);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].id, "c");
        }
    }

    #[test]
    fn test_higher_bitrate_generic_beats_curated() {
        let out = merge(
            vec![curated("c", "Jazz One", 64), generic("g", "Jazz One", 128)],
            &AliasTable::default(),
        );
        assert_eq!(out[0].id, "g");
    }

    #[test]
    fn test_first_seen_wins_full_tie() {
        let out = merge(
            vec![generic("first", "Jazz One", 128), generic("second", "JAZZ ONE", 128)],
            &AliasTable::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "first");
    }

    #[test]
    fn test_alias_merge_takes_canonical_name_and_curated_record() {
        let mut table = AliasTable::default();
        table.insert("radio-x", "רדיו X", &["Radio X"]);
        let out = merge(
            vec![generic("gx", "Radio X", 128), curated("cx", "רדיו X", 128)],
            &table,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "cx");
        assert_eq!(out[0].name, "רדיו X");
    }

    #[test]
    fn test_incomplete_records_are_discarded() {
        let mut no_icon = rec("a", "Jazz One", 128);
        no_icon.icon_url.clear();
        let mut no_stream = rec("b", "Jazz Two", 128);
        no_stream.stream_url = "  ".into();
        let only_branding = rec("c", "Live Stream", 128);
        let out = merge(
            vec![
                Candidate::new(no_icon, Origin::Curated),
                Candidate::new(no_stream, Origin::Generic),
                Candidate::new(only_branding, Origin::Generic),
                generic("d", "Jazz Three", 128),
            ],
            &AliasTable::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "d");
    }

    #[test]
    fn test_at_most_one_record_per_key() {
        let table = AliasTable::builtin();
        let names = [
            "Kan Bet", "רשת ב", "Reshet Bet", "Galgalatz", "גלגלצ", "Eco 99FM", "eco99",
            "Jazz One", "jazz-one", "JAZZ ONE!",
        ];
        let input: Vec<Candidate> = names
            .iter()
            .enumerate()
            .map(|(i, n)| generic(&format!("s{i}"), n, (i as u32 % 3) * 64))
            .collect();
        let out = merge(input, &table);
        let keys: Vec<String> = out.iter().map(|r| table.canonical_key(&r.name)).collect();
        let unique: HashSet<&String> = keys.iter().collect();
        assert_eq!(keys.len(), unique.len());
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_ids_stay_unique() {
        let out = merge(
            vec![generic("dup", "Jazz One", 128), generic("dup", "Rock One", 128)],
            &AliasTable::default(),
        );
        assert_eq!(out.len(), 2);
        assert_ne!(out[0].id, out[1].id);
    }
}
