//! Minimal token front for building patterns from literals.
//!
//! The full script language lives outside the engine; what the engine needs
//! is its shape: a literal like `"bd hh sd oh"` becomes an equal-weight
//! sequence of atoms whose values are control maps and whose source chains
//! carry each token's column extent. Columns are 0-based offsets into the
//! literal itself; callers that know where the literal sits in a line apply
//! the quote offset themselves, exactly once.

use crate::fraction::Fraction;
use crate::pattern::{Pattern, SourceSpan, Value};

/// One whitespace-delimited token with its extent in the literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Token<'a> {
    text: &'a str,
    start: u32,
    end: u32,
}

fn tokenize(src: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, ch) in src.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(Token {
                    text: &src[s..i],
                    start: s as u32,
                    end: i as u32,
                });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            text: &src[s..],
            start: s as u32,
            end: src.len() as u32,
        });
    }
    tokens
}

fn token_sequence(src: &str, to_value: impl Fn(&str) -> Option<Value>) -> Pattern {
    let children: Vec<Pattern> = tokenize(src)
        .into_iter()
        .map(|tok| {
            if tok.text == "~" {
                return Pattern::silence();
            }
            match to_value(tok.text) {
                Some(value) => {
                    Pattern::atom_at(value, SourceSpan::new(1, tok.start, tok.end))
                }
                None => Pattern::silence(),
            }
        })
        .collect();
    match children.len() {
        0 => Pattern::silence(),
        1 => children.into_iter().next().unwrap_or_else(Pattern::silence),
        _ => Pattern::sequence(children),
    }
}

/// `sound("bd hh sd:2 ~")`: each token names a sample or synth source;
/// `name:index` selects a numbered sample within a folder.
pub fn sound(src: &str) -> Pattern {
    token_sequence(src, |text| {
        let mut fields: Vec<(&'static str, Value)> = Vec::new();
        match text.split_once(':') {
            Some((name, index)) => {
                fields.push(("s", Value::Str(name.to_string())));
                if let Ok(idx) = index.parse::<f64>() {
                    fields.push(("n", Value::Num(idx)));
                }
            }
            None => fields.push(("s", Value::Str(text.to_string()))),
        }
        Some(Value::map(fields))
    })
}

/// `note("c4 e4 g4")`: note-name tokens resolved to pitch by the decoder.
pub fn note(src: &str) -> Pattern {
    token_sequence(src, |text| {
        Some(Value::map([("note", Value::Str(text.to_string()))]))
    })
}

/// `n("0 2 4")`: numeric index tokens, usually combined with a scale.
pub fn n(src: &str) -> Pattern {
    token_sequence(src, |text| {
        text.parse::<f64>()
            .ok()
            .map(|v| Value::map([("n", Value::Num(v))]))
    })
}

/// Merge a constant control field into every event of a pattern,
/// e.g. `with_control(p, "orbit", Value::Num(2.0))`.
pub fn with_control(pattern: Pattern, key: &'static str, value: Value) -> Pattern {
    pattern.with_value(move |v| v.merged(&Value::map([(key, value.clone())])))
}

/// Euclid shorthand over a sound pattern: `rhythm("bd", 3, 8)`.
pub fn rhythm(src: &str, beats: usize, steps: usize) -> Pattern {
    sound(src).euclid(beats, steps, 0)
}

/// Equal-weight alternation helper used by the demo binary.
pub fn alternate(sources: &[&str]) -> Pattern {
    Pattern::choose(sources.iter().map(|s| sound(s)).collect())
}

impl Pattern {
    /// Convenience for `fast` with an integer factor, mirroring `"bd*4"`.
    pub fn times(self, k: i64) -> Pattern {
        self.fast(Fraction::from_int(k))
    }
}
