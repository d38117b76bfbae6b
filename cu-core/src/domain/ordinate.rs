//! Totally-ordered position of a message in a process's log.
//!
//! An ordinate is either a pure integer string (`"1042"`) or a
//! colon-separated compound (`"1337:12:abc"`, `"12:cron:3"`). Segments are
//! compared pairwise: two all-digit segments compare as big integers of
//! arbitrary width, anything else compares lexically, and a shorter ordinate
//! that is a prefix of a longer one sorts first. This is the one ordering
//! used by the message stream, evaluation persistence and pagination.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Width numeric segments are padded to in [`Ordinate::sort_key`]. Wide
/// enough for a u64 nonce and then some; sqlite and filenames both rely on
/// lexicographic order of the padded form matching semantic order.
const SORT_KEY_PAD: usize = 24;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Ordinate(String);

impl Ordinate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The cold-start ordinate, strictly before every real message.
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0.split(':').all(|seg| {
            !seg.is_empty() && seg.chars().all(|c| c == '0')
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ordinate of the `n`-th cron tick interleaved after this position.
    /// `"12".with_cron_tick(3)` is `"12:cron:3"`, sorting after `"12"` and
    /// before `"13"`.
    pub fn with_cron_tick(&self, n: u64) -> Ordinate {
        Ordinate(format!("{}:cron:{n}", self.0))
    }

    /// Tick number if this is a cron ordinate.
    pub fn cron_tick(&self) -> Option<u64> {
        let (base, tick) = self.0.rsplit_once(':')?;
        let (_, marker) = base.rsplit_once(':')?;
        if marker == "cron" {
            tick.parse().ok()
        } else {
            None
        }
    }

    /// The underlying scheduler ordinate with any cron suffix removed.
    pub fn without_cron(&self) -> Ordinate {
        match self.0.find(":cron:") {
            Some(idx) => Ordinate(self.0[..idx].to_string()),
            None => self.clone(),
        }
    }

    /// A string whose plain lexicographic order equals the semantic order of
    /// ordinates: every all-digit segment is left-padded with zeros to a
    /// fixed width, non-numeric segments pass through unchanged.
    pub fn sort_key(&self) -> String {
        let mut out = String::with_capacity(self.0.len() + SORT_KEY_PAD);
        for (i, seg) in self.0.split(':').enumerate() {
            if i > 0 {
                out.push(':');
            }
            if !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()) {
                for _ in seg.len()..SORT_KEY_PAD {
                    out.push('0');
                }
            }
            out.push_str(seg);
        }
        out
    }
}

impl From<u64> for Ordinate {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<&str> for Ordinate {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for Ordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    let a_num = !a.is_empty() && a.bytes().all(|c| c.is_ascii_digit());
    let b_num = !b.is_empty() && b.bytes().all(|c| c.is_ascii_digit());
    if a_num && b_num {
        // Big-integer compare without parsing: strip leading zeros, then
        // longer magnitude wins, equal magnitude falls back to lexical.
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}

impl Ord for Ordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.0.split(':');
        let mut right = other.0.split(':');
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => match compare_segments(a, b) {
                    Ordering::Equal => continue,
                    other => return other,
                },
            }
        }
    }
}

impl PartialOrd for Ordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_compare_by_magnitude() {
        assert!(Ordinate::new("9") < Ordinate::new("10"));
        assert!(Ordinate::new("0100") < Ordinate::new("101"));
        assert!(Ordinate::new("18446744073709551616") > Ordinate::new("18446744073709551615"));
    }

    #[test]
    fn prefix_sorts_before_suffixed() {
        assert!(Ordinate::new("3") < Ordinate::new("3:cron:1"));
        assert!(Ordinate::new("3:cron:1") < Ordinate::new("3:cron:2"));
        assert!(Ordinate::new("3:cron:2") < Ordinate::new("4"));
    }

    #[test]
    fn compound_block_forms_order_numerically() {
        assert!(Ordinate::new("99:2:aa") < Ordinate::new("100:1:zz"));
        assert!(Ordinate::new("100:1:aa") < Ordinate::new("100:2:aa"));
    }

    #[test]
    fn sort_key_matches_semantic_order() {
        let mut ords = vec![
            Ordinate::new("10"),
            Ordinate::new("2"),
            Ordinate::new("2:cron:1"),
            Ordinate::new("100"),
            Ordinate::new("9"),
        ];
        let mut by_key = ords.clone();
        ords.sort();
        by_key.sort_by_key(|o| o.sort_key());
        assert_eq!(ords, by_key);
    }

    #[test]
    fn cron_suffix_round_trips() {
        let base = Ordinate::new("17");
        let tick = base.with_cron_tick(4);
        assert_eq!(tick.as_str(), "17:cron:4");
        assert_eq!(tick.cron_tick(), Some(4));
        assert_eq!(tick.without_cron(), base);
        assert_eq!(base.cron_tick(), None);
        assert_eq!(base.without_cron(), base);
    }

    #[test]
    fn zero_detection() {
        assert!(Ordinate::zero().is_zero());
        assert!(Ordinate::new("000").is_zero());
        assert!(!Ordinate::new("0:cron:1").is_zero());
        assert!(!Ordinate::new("1").is_zero());
    }
}
