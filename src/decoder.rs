//! Event decoder: turns a queried event's control map into a `VoiceSpec`.
//!
//! Field handling follows the dirt conventions: unknown fields are ignored,
//! numeric fields coerce to f64, pan clamps to [-1, 1], envelope times are
//! non-negative and orbits clamp into the pool. An event with neither a
//! `sound` nor a `note` has no voice in it; it is dropped with a trace
//! record, not an error.

use crate::envelope::Adsr;
use crate::filters::{BiquadStage, Bitcrush, Coarse, Distortion, Formant, Phaser, Stage, Tremolo};
use crate::orbit::ORBIT_COUNT;
use crate::osc::OscKind;
use crate::pattern::Value;
use crate::ringlink::SampleRequest;
use crate::tones;
use crate::voice::{SourceSpec, VoiceSpec};
use tracing::trace;

/// Default base pitch assumed for unpitched sample recordings.
pub const DEFAULT_SAMPLE_PITCH_HZ: f64 = 261.625_565_300_6;

/// Default synth frequency when a wave is named without a note.
const DEFAULT_SYNTH_HZ: f64 = 440.0;

fn num(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|k| value.get(k))
        .and_then(|v| v.as_f64())
        .filter(|n| n.is_finite())
}

fn text<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value.get(k)).and_then(|v| v.as_str())
}

/// Resolve the event's pitch in MIDI, if it carries one. `n` acts as a
/// scale degree when a known scale is named, with `note` as the root.
fn resolve_midi(value: &Value) -> Option<f64> {
    let root = match value.get("note") {
        Some(Value::Str(name)) => tones::note_to_midi(name),
        Some(Value::Num(n)) if n.is_finite() => Some(*n),
        _ => None,
    };
    if let Some(scale) = text(value, &["scale"]) {
        if tones::known_scale(scale) {
            let degree = num(value, &["n"]).unwrap_or(0.0) as i32;
            let root = root.unwrap_or(60.0);
            return tones::scale_degree_to_midi(scale, degree, root);
        }
    }
    root
}

fn build_filters(value: &Value, sample_rate: f64) -> Vec<Box<dyn Stage>> {
    let mut filters: Vec<Box<dyn Stage>> = Vec::new();
    let resonance = num(value, &["resonance"]).unwrap_or(0.0).clamp(0.0, 1.0);
    let q = 0.707 + resonance * 10.0;
    if let Some(hcutoff) = num(value, &["hcutoff", "hpf"]) {
        filters.push(Box::new(BiquadStage::highpass(
            hcutoff as f32,
            q as f32,
            sample_rate as f32,
        )));
    }
    if let Some(cutoff) = num(value, &["cutoff", "lpf"]) {
        filters.push(Box::new(BiquadStage::lowpass(
            cutoff as f32,
            q as f32,
            sample_rate as f32,
        )));
    }
    if let Some(vowel) = text(value, &["vowel"]).and_then(|v| v.chars().next()) {
        filters.push(Box::new(Formant::vowel(vowel, sample_rate as f32)));
    }
    if let Some(crush) = num(value, &["crush"]) {
        if crush > 0.0 {
            filters.push(Box::new(Bitcrush::new(crush as f32)));
        }
    }
    if let Some(coarse) = num(value, &["coarse"]) {
        if coarse > 1.0 {
            filters.push(Box::new(Coarse::new(coarse)));
        }
    }
    if let Some(distort) = num(value, &["distort", "shape"]) {
        if distort > 0.0 {
            // shape 0..1 maps onto a 1..30x drive curve
            let drive = 1.0 + distort.clamp(0.0, 1.0) * 29.0;
            filters.push(Box::new(Distortion::new(drive as f32)));
        }
    }
    if let Some(rate) = num(value, &["tremolorate"]) {
        let depth = num(value, &["tremolodepth"]).unwrap_or(0.5);
        filters.push(Box::new(Tremolo::new(
            rate as f32,
            depth as f32,
            sample_rate as f32,
        )));
    }
    if let Some(rate) = num(value, &["phaserrate"]) {
        let depth = num(value, &["phaserdepth"]).unwrap_or(0.5);
        filters.push(Box::new(Phaser::new(
            rate as f32,
            depth as f32,
            sample_rate as f32,
        )));
    }
    filters
}

/// Decode one event value. `None` means the event carries no voice.
pub fn decode(value: &Value, sample_rate: f64) -> Option<VoiceSpec> {
    let sound = text(value, &["s", "wave", "sound"]);
    let midi = resolve_midi(value);

    let source = match sound {
        Some(name) => match OscKind::from_name(name) {
            Some(kind) => SourceSpec::Synth {
                kind,
                freq_hz: midi.map(tones::midi_to_hz).unwrap_or(DEFAULT_SYNTH_HZ),
            },
            None => SourceSpec::Sample {
                req: SampleRequest {
                    bank: text(value, &["bank"]).map(str::to_string),
                    sound: Some(name.to_string()),
                    index: num(value, &["n"]).map(|n| n.max(0.0) as u32),
                    note: midi.map(|m| m.round() as i32),
                },
                target_hz: midi.map(tones::midi_to_hz),
                speed: num(value, &["speed"]).unwrap_or(1.0),
                cycle_unit: text(value, &["unit"]) == Some("c"),
            },
        },
        None => match midi {
            Some(m) => SourceSpec::Synth {
                kind: OscKind::Sine,
                freq_hz: tones::midi_to_hz(m),
            },
            None => {
                trace!(?value, "event has no sound and no note, dropping");
                return None;
            }
        },
    };

    let has_envelope = ["attack", "decay", "sustain", "release"]
        .iter()
        .any(|k| value.get(k).is_some());
    let adsr = Adsr::from_seconds(
        num(value, &["attack"]).unwrap_or(0.001).max(0.0),
        num(value, &["decay"]).unwrap_or(0.0).max(0.0),
        num(value, &["sustain"]).unwrap_or(1.0),
        num(value, &["release"]).unwrap_or(0.01).max(0.0),
        sample_rate,
    );
    let is_sample = matches!(source, SourceSpec::Sample { .. });

    Some(VoiceSpec {
        source,
        orbit: num(value, &["orbit"])
            .unwrap_or(0.0)
            .clamp(0.0, (ORBIT_COUNT - 1) as f64) as usize,
        gain: num(value, &["gain", "amp"]).unwrap_or(1.0).max(0.0),
        pan: num(value, &["pan"]).unwrap_or(0.0).clamp(-1.0, 1.0),
        adsr,
        hold_to_end: is_sample && !has_envelope,
        filters: build_filters(value, sample_rate),
        delay_amount: num(value, &["delay"]).unwrap_or(0.0).clamp(0.0, 1.0),
        delay_time: num(value, &["delaytime"]),
        delay_feedback: num(value, &["delayfeedback"]),
        reverb_room: num(value, &["room"]),
        reverb_size: num(value, &["roomsize", "size"]),
        vib_rate: num(value, &["vib"]).unwrap_or(0.0).max(0.0),
        vib_depth: num(value, &["vibmod"])
            .unwrap_or(if num(value, &["vib"]).is_some() { 0.02 } else { 0.0 })
            .clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 48_000.0;

    fn map(pairs: Vec<(&'static str, Value)>) -> Value {
        Value::map(pairs)
    }

    #[test]
    fn note_only_becomes_a_sine_at_pitch() {
        let spec = decode(&map(vec![("note", Value::Str("c4".into()))]), SR).unwrap();
        match spec.source {
            SourceSpec::Synth { kind, freq_hz } => {
                assert_eq!(kind, OscKind::Sine);
                assert!((freq_hz - 261.625_565_300_6).abs() < 1e-6);
            }
            _ => panic!("expected synth"),
        }
    }

    #[test]
    fn known_wave_names_are_synths() {
        let spec = decode(
            &map(vec![
                ("s", Value::Str("saw".into())),
                ("note", Value::Str("a3".into())),
            ]),
            SR,
        )
        .unwrap();
        match spec.source {
            SourceSpec::Synth { kind, freq_hz } => {
                assert_eq!(kind, OscKind::Saw);
                assert!((freq_hz - 220.0).abs() < 1e-6);
            }
            _ => panic!("expected synth"),
        }
    }

    #[test]
    fn unknown_sound_is_a_sample_request() {
        let spec = decode(
            &map(vec![
                ("s", Value::Str("bd".into())),
                ("n", Value::Num(2.0)),
                ("bank", Value::Str("tr808".into())),
            ]),
            SR,
        )
        .unwrap();
        match &spec.source {
            SourceSpec::Sample { req, .. } => {
                assert_eq!(req.sound.as_deref(), Some("bd"));
                assert_eq!(req.index, Some(2));
                assert_eq!(req.bank.as_deref(), Some("tr808"));
            }
            _ => panic!("expected sample"),
        }
        assert!(spec.hold_to_end);
    }

    #[test]
    fn scale_degrees_resolve_through_tones() {
        let spec = decode(
            &map(vec![
                ("n", Value::Num(2.0)),
                ("scale", Value::Str("major".into())),
            ]),
            SR,
        )
        .unwrap();
        match spec.source {
            // degree 2 of C major is E: midi 64
            SourceSpec::Synth { freq_hz, .. } => {
                assert!((freq_hz - tones::midi_to_hz(64.0)).abs() < 1e-6)
            }
            _ => panic!("expected synth"),
        }
    }

    #[test]
    fn voiceless_events_are_dropped() {
        assert!(decode(&map(vec![("gain", Value::Num(0.5))]), SR).is_none());
        assert!(decode(&Value::Num(1.0), SR).is_none());
    }

    #[test]
    fn pan_and_orbit_are_clamped() {
        let spec = decode(
            &map(vec![
                ("s", Value::Str("bd".into())),
                ("pan", Value::Num(7.0)),
                ("orbit", Value::Num(99.0)),
            ]),
            SR,
        )
        .unwrap();
        assert_eq!(spec.pan, 1.0);
        assert_eq!(spec.orbit, ORBIT_COUNT - 1);
    }

    #[test]
    fn envelope_seconds_convert_to_frames() {
        let spec = decode(
            &map(vec![
                ("s", Value::Str("sine".into())),
                ("attack", Value::Num(0.5)),
                ("release", Value::Num(-3.0)),
            ]),
            SR,
        )
        .unwrap();
        assert_eq!(spec.adsr.attack, 24_000);
        assert_eq!(spec.adsr.release, 0);
        assert!(!spec.hold_to_end);
    }

    #[test]
    fn filter_fields_build_the_chain_in_order() {
        let spec = decode(
            &map(vec![
                ("s", Value::Str("saw".into())),
                ("cutoff", Value::Num(800.0)),
                ("hcutoff", Value::Num(100.0)),
                ("crush", Value::Num(4.0)),
                ("distort", Value::Num(0.5)),
            ]),
            SR,
        )
        .unwrap();
        assert_eq!(spec.filters.len(), 4);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let spec = decode(
            &map(vec![
                ("s", Value::Str("bd".into())),
                ("frobnicate", Value::Num(12.0)),
            ]),
            SR,
        );
        assert!(spec.is_some());
    }

    #[test]
    fn delay_and_reverb_fields_pass_through() {
        let spec = decode(
            &map(vec![
                ("s", Value::Str("bd".into())),
                ("delay", Value::Num(0.5)),
                ("delaytime", Value::Num(0.25)),
                ("delayfeedback", Value::Num(0.6)),
                ("room", Value::Num(0.4)),
                ("roomsize", Value::Num(0.9)),
            ]),
            SR,
        )
        .unwrap();
        assert_eq!(spec.delay_amount, 0.5);
        assert_eq!(spec.delay_time, Some(0.25));
        assert_eq!(spec.delay_feedback, Some(0.6));
        assert_eq!(spec.reverb_room, Some(0.4));
        assert_eq!(spec.reverb_size, Some(0.9));
    }
}
