//! Text normalization for TTS input.
//!
//! Rewrites model output into prose a speech synthesizer reads well:
//! numbers, clock times, currency, years and symbols become words, and
//! punctuation the synthesizer would mangle is cleaned up.
//!
//! The rules run in a fixed order — earlier rules consume characters later
//! rules would misinterpret (currency before bare integers, times before
//! decimals). `normalize` is idempotent.

use regex::{Captures, Regex};
use std::sync::LazyLock;

const ONES: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const ORDINAL_ONES: [&str; 20] = [
    "zeroth",
    "first",
    "second",
    "third",
    "fourth",
    "fifth",
    "sixth",
    "seventh",
    "eighth",
    "ninth",
    "tenth",
    "eleventh",
    "twelfth",
    "thirteenth",
    "fourteenth",
    "fifteenth",
    "sixteenth",
    "seventeenth",
    "eighteenth",
    "nineteenth",
];

const ORDINAL_TENS: [&str; 10] = [
    "",
    "",
    "twentieth",
    "thirtieth",
    "fortieth",
    "fiftieth",
    "sixtieth",
    "seventieth",
    "eightieth",
    "ninetieth",
];

/// Spell a non-negative integer as space-separated cardinal words.
///
/// Words are deliberately unhyphenated ("twenty four") so the output is a
/// fixed point of the hygiene rules.
#[must_use]
pub fn cardinal(n: u64) -> String {
    if n < 20 {
        return ONES[n as usize].to_owned();
    }
    if n < 100 {
        let tens = TENS[(n / 10) as usize];
        return if n % 10 == 0 {
            tens.to_owned()
        } else {
            format!("{tens} {}", ONES[(n % 10) as usize])
        };
    }
    if n < 1_000 {
        let hundreds = format!("{} hundred", ONES[(n / 100) as usize]);
        return if n % 100 == 0 {
            hundreds
        } else {
            format!("{hundreds} {}", cardinal(n % 100))
        };
    }
    for (scale, name) in [
        (1_000_000_000_000, "trillion"),
        (1_000_000_000, "billion"),
        (1_000_000, "million"),
        (1_000, "thousand"),
    ] {
        if n >= scale {
            let head = format!("{} {name}", cardinal(n / scale));
            return if n % scale == 0 {
                head
            } else {
                format!("{head} {}", cardinal(n % scale))
            };
        }
    }
    unreachable!("all magnitudes below u64::MAX are covered")
}

/// Spell a non-negative integer as ordinal words ("123" -> "one hundred
/// twenty third").
#[must_use]
pub fn ordinal(n: u64) -> String {
    if n < 20 {
        return ORDINAL_ONES[n as usize].to_owned();
    }
    if n < 100 {
        return if n % 10 == 0 {
            ORDINAL_TENS[(n / 10) as usize].to_owned()
        } else {
            format!(
                "{} {}",
                TENS[(n / 10) as usize],
                ORDINAL_ONES[(n % 10) as usize]
            )
        };
    }
    let rem = n % 100;
    if rem == 0 {
        // "one hundred" -> "one hundredth", "two thousand" -> "two thousandth"
        return format!("{}th", cardinal(n));
    }
    format!("{} {}", cardinal(n - rem), ordinal(rem))
}

/// Spell each digit individually ("50" -> "five zero").
fn spell_digits(digits: &str) -> String {
    let words: Vec<&str> = digits
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| ONES[d as usize])
        .collect();
    words.join(" ")
}

/// Spell a four-digit year the way it is said aloud.
fn year_words(year: u64) -> String {
    debug_assert!((1000..3000).contains(&year));
    if (2000..=2009).contains(&year) {
        return if year == 2000 {
            "two thousand".to_owned()
        } else {
            format!("two thousand {}", ONES[(year % 10) as usize])
        };
    }
    let century = cardinal(year / 100);
    let rest = year % 100;
    if rest == 0 {
        format!("{century} hundred")
    } else if rest < 10 {
        format!("{century} oh {}", ONES[rest as usize])
    } else {
        format!("{century} {}", cardinal(rest))
    }
}

// ── Rule 1: clock times ───────────────────────────────────────

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2}):([0-5][0-9])(?:\s*([AaPp])\.?\s*([Mm])\.?)?\b")
        .expect("valid clock regex")
});

fn rewrite_clock_times(text: &str) -> String {
    CLOCK_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let Ok(hour) = caps[1].parse::<u64>() else {
                return caps[0].to_owned();
            };
            let Ok(minute) = caps[2].parse::<u64>() else {
                return caps[0].to_owned();
            };
            let period = caps.get(3).map(|p| {
                format!(
                    "{} {}",
                    p.as_str().to_ascii_uppercase(),
                    caps[4].to_ascii_uppercase()
                )
            });
            let hour_words = cardinal(hour);
            let spoken = if minute == 0 {
                match &period {
                    Some(p) => format!("{hour_words} {p}"),
                    None => format!("{hour_words} o'clock"),
                }
            } else {
                let minute_words = if minute < 10 {
                    format!("oh {}", ONES[minute as usize])
                } else {
                    cardinal(minute)
                };
                match &period {
                    Some(p) => format!("{hour_words} {minute_words} {p}"),
                    None => format!("{hour_words} {minute_words}"),
                }
            };
            spoken
        })
        .into_owned()
}

// ── Rule 2: decimals ──────────────────────────────────────────

static DECIMAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\$?)(\d+)\.(\d+)")
        .expect("valid decimal regex")
});

fn rewrite_decimals(text: &str) -> String {
    DECIMAL_RE
        .replace_all(text, |caps: &Captures<'_>| {
            // Currency amounts are handled by the currency rule.
            if !caps[1].is_empty() {
                return caps[0].to_owned();
            }
            match caps[2].parse::<u64>() {
                Ok(whole) => format!("{} point {}", cardinal(whole), spell_digits(&caps[3])),
                Err(_) => caps[0].to_owned(),
            }
        })
        .into_owned()
}

// ── Rule 3: ordinals ──────────────────────────────────────────

static ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+)(?:st|nd|rd|th)\b")
        .expect("valid ordinal regex")
});

fn rewrite_ordinals(text: &str) -> String {
    ORDINAL_RE
        .replace_all(text, |caps: &Captures<'_>| match caps[1].parse::<u64>() {
            Ok(n) => ordinal(n),
            Err(_) => caps[0].to_owned(),
        })
        .into_owned()
}

// ── Rule 4: currency ──────────────────────────────────────────

static CURRENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\d+)(?:\.(\d{2}))?")
        .expect("valid currency regex")
});

fn rewrite_currency(text: &str) -> String {
    CURRENCY_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let Ok(dollars) = caps[1].parse::<u64>() else {
                return caps[0].to_owned();
            };
            let dollar_part = if dollars == 1 {
                "one dollar".to_owned()
            } else {
                format!("{} dollars", cardinal(dollars))
            };
            let cents = caps
                .get(2)
                .and_then(|c| c.as_str().parse::<u64>().ok())
                .unwrap_or(0);
            if cents == 0 {
                dollar_part
            } else if cents == 1 {
                format!("{dollar_part} and one cent")
            } else {
                format!("{dollar_part} and {} cents", cardinal(cents))
            }
        })
        .into_owned()
}

// ── Rule 5: percent ───────────────────────────────────────────

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+)\s*%").expect("valid percent regex")
});

fn rewrite_percent(text: &str) -> String {
    PERCENT_RE
        .replace_all(text, |caps: &Captures<'_>| match caps[1].parse::<u64>() {
            Ok(n) => format!("{} percent", cardinal(n)),
            Err(_) => caps[0].to_owned(),
        })
        .into_owned()
}

// ── Rule 6: years ─────────────────────────────────────────────

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([12]\d{3})\b").expect("valid year regex")
});

fn rewrite_years(text: &str) -> String {
    YEAR_RE
        .replace_all(text, |caps: &Captures<'_>| match caps[1].parse::<u64>() {
            Ok(y) => year_words(y),
            Err(_) => caps[0].to_owned(),
        })
        .into_owned()
}

// ── Rule 7: remaining integers ────────────────────────────────

static INTEGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+)\b").expect("valid integer regex")
});

fn rewrite_integers(text: &str) -> String {
    INTEGER_RE
        .replace_all(text, |caps: &Captures<'_>| match caps[1].parse::<u64>() {
            Ok(n) => cardinal(n),
            Err(_) => caps[0].to_owned(),
        })
        .into_owned()
}

// ── Rule 8: symbols ───────────────────────────────────────────

static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#([A-Za-z]\w*)").expect("valid hashtag regex")
});

fn rewrite_symbols(text: &str) -> String {
    let text = HASHTAG_RE.replace_all(text, "hashtag $1");
    text.replace('&', " and ")
        .replace('@', " at ")
        .replace('+', " plus ")
        .replace('=', " equals ")
        .replace('#', " number ")
}

// ── Rule 9: punctuation hygiene ───────────────────────────────

static ELLIPSIS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\.{3,}|\u{2026})")
        .expect("valid ellipsis regex")
});

static APOSTROPHE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z])['\u{2019}]([A-Za-z])")
        .expect("valid apostrophe regex")
});

static TRAILING_TERMINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.!?]+\s*$").expect("valid trailing regex")
});

/// Placeholder protecting in-word apostrophes while stray quotes are
/// stripped.
const APOSTROPHE_MARK: char = '\u{1}';

fn punctuation_hygiene(text: &str) -> String {
    let text = ELLIPSIS_RE.replace_all(text, ",");
    let text = APOSTROPHE_RE.replace_all(&text, |caps: &Captures<'_>| {
        format!("{}{APOSTROPHE_MARK}{}", &caps[1], &caps[2])
    });
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ';' | ':' => out.push(','),
            '(' | ')' | '[' | ']' | '{' | '}' => out.push(' '),
            '"' | '\u{201c}' | '\u{201d}' | '\u{201e}' | '\u{ab}' | '\u{bb}' => {}
            '\'' | '\u{2018}' | '\u{2019}' => {}
            '*' | '_' | '~' | '`' => {}
            '-' | '\u{2013}' | '\u{2014}' => out.push(' '),
            APOSTROPHE_MARK => out.push('\''),
            other => out.push(other),
        }
    }
    TRAILING_TERMINAL_RE.replace(&out, "").into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rewrite `text` into TTS-friendly prose.
///
/// Applies the ten rewrite rules in their fixed order and collapses
/// whitespace. Idempotent: `normalize(normalize(x)) == normalize(x)`.
#[must_use]
pub fn normalize(text: &str) -> String {
    let text = rewrite_clock_times(text);
    let text = rewrite_decimals(&text);
    let text = rewrite_ordinals(&text);
    let text = rewrite_currency(&text);
    let text = rewrite_percent(&text);
    let text = rewrite_years(&text);
    let text = rewrite_integers(&text);
    let text = rewrite_symbols(&text);
    let text = punctuation_hygiene(&text);
    collapse_whitespace(&text)
}
