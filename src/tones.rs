//! Pitch resolution: note names, scales, and frequency conversion.
//!
//! The engine's slice of the music-theory collaborator. Note names follow the
//! dirt convention (`c4`, `cs4`/`df4`, bare names default to octave 4,
//! numbers pass through as MIDI), A4 = 440 Hz.

use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    static ref PITCH_CLASSES: HashMap<&'static str, i32> = {
        let mut m = HashMap::new();
        m.insert("c", 0);
        m.insert("cs", 1);
        m.insert("df", 1);
        m.insert("d", 2);
        m.insert("ds", 3);
        m.insert("ef", 3);
        m.insert("e", 4);
        m.insert("f", 5);
        m.insert("fs", 6);
        m.insert("gf", 6);
        m.insert("g", 7);
        m.insert("gs", 8);
        m.insert("af", 8);
        m.insert("a", 9);
        m.insert("as", 10);
        m.insert("bf", 10);
        m.insert("b", 11);
        m
    };
    static ref SCALES: HashMap<&'static str, Vec<i32>> = {
        let mut m = HashMap::new();
        m.insert("major", vec![0, 2, 4, 5, 7, 9, 11]);
        m.insert("minor", vec![0, 2, 3, 5, 7, 8, 10]);
        m.insert("harmonic", vec![0, 2, 3, 5, 7, 8, 11]);
        m.insert("dorian", vec![0, 2, 3, 5, 7, 9, 10]);
        m.insert("phrygian", vec![0, 1, 3, 5, 7, 8, 10]);
        m.insert("lydian", vec![0, 2, 4, 6, 7, 9, 11]);
        m.insert("mixolydian", vec![0, 2, 4, 5, 7, 9, 10]);
        m.insert("locrian", vec![0, 1, 3, 5, 6, 8, 10]);
        m.insert("pentatonic", vec![0, 2, 4, 7, 9]);
        m.insert("blues", vec![0, 3, 5, 6, 7, 10]);
        m.insert("chromatic", vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
        m.insert("whole", vec![0, 2, 4, 6, 8, 10]);
        m
    };
}

/// Convert a note name (or numeric MIDI string) to a MIDI note number.
pub fn note_to_midi(note: &str) -> Option<f64> {
    if let Ok(n) = note.parse::<f64>() {
        return Some(n);
    }
    let lower = note.to_lowercase().replace('#', "s");
    // split trailing octave (may be negative, e.g. "c-1")
    let split = lower
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .unwrap_or(lower.len());
    let (name, octave) = lower.split_at(split);
    let class = *PITCH_CLASSES.get(name)?;
    let octave: i32 = if octave.is_empty() {
        4
    } else {
        octave.parse().ok()?
    };
    Some(((octave + 1) * 12 + class) as f64)
}

/// MIDI note number to frequency, A4 = 440 Hz.
pub fn midi_to_hz(midi: f64) -> f64 {
    440.0 * 2f64.powf((midi - 69.0) / 12.0)
}

/// Resolve a note name straight to Hz.
pub fn note_to_hz(note: &str) -> Option<f64> {
    note_to_midi(note).map(midi_to_hz)
}

/// Map a scale degree to a MIDI note. Degrees outside the scale length wrap
/// into adjacent octaves, so `n("7")` in a 7-note scale is the octave.
pub fn scale_degree_to_midi(scale: &str, degree: i32, root_midi: f64) -> Option<f64> {
    let intervals = SCALES.get(scale)?;
    let len = intervals.len() as i32;
    let octave = degree.div_euclid(len);
    let index = degree.rem_euclid(len) as usize;
    Some(root_midi + (octave * 12 + intervals[index]) as f64)
}

pub fn known_scale(scale: &str) -> bool {
    SCALES.contains_key(scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middle_c_is_261_626() {
        let hz = note_to_hz("c4").unwrap();
        assert!((hz - 261.625_565_300_6).abs() < 1e-6);
    }

    #[test]
    fn a4_is_440() {
        assert_eq!(note_to_midi("a4"), Some(69.0));
        assert!((note_to_hz("a4").unwrap() - 440.0).abs() < 1e-9);
    }

    #[test]
    fn accidentals_and_aliases() {
        assert_eq!(note_to_midi("cs4"), note_to_midi("df4"));
        assert_eq!(note_to_midi("c#4"), note_to_midi("cs4"));
        assert_eq!(note_to_midi("bf3"), Some(58.0));
    }

    #[test]
    fn bare_names_default_to_octave_4() {
        assert_eq!(note_to_midi("c"), note_to_midi("c4"));
        assert_eq!(note_to_midi("fs"), note_to_midi("fs4"));
    }

    #[test]
    fn negative_octaves() {
        assert_eq!(note_to_midi("c-1"), Some(0.0));
    }

    #[test]
    fn numeric_passthrough() {
        assert_eq!(note_to_midi("60"), Some(60.0));
    }

    #[test]
    fn scale_degrees_wrap_octaves() {
        let c4 = note_to_midi("c4").unwrap();
        assert_eq!(scale_degree_to_midi("major", 0, c4), Some(c4));
        assert_eq!(scale_degree_to_midi("major", 2, c4), Some(c4 + 4.0));
        assert_eq!(scale_degree_to_midi("major", 7, c4), Some(c4 + 12.0));
        assert_eq!(scale_degree_to_midi("major", -1, c4), Some(c4 - 1.0));
    }

    #[test]
    fn unknown_scale_is_none() {
        assert_eq!(scale_degree_to_midi("nope", 0, 60.0), None);
        assert!(!known_scale("nope"));
        assert!(known_scale("minor"));
    }
}
