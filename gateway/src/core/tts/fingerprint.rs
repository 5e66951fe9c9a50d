//! Synthesis request fingerprinting
//!
//! A fingerprint is the process-local cache key for one `(model, voice, text)`
//! triple. Equal fingerprints imply equivalent audio, so the text is NFC
//! normalized and whitespace-trimmed before hashing: a retyped sentence with
//! stray spaces or decomposed codepoints hits the same entry.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Field delimiter inside the hash input. The ASCII unit separator cannot
/// appear in model or voice names, so `("a", "bc")` and `("ab", "c")` never
/// collide.
const FIELD_SEP: u8 = 0x1f;

/// Compute the deterministic fingerprint of a synthesis request.
///
/// SHA-256 over `model ‖ 0x1f ‖ voice ‖ 0x1f ‖ nfc(trim(text))`, hex
/// lowercase. Stable across process restarts and architectures.
pub fn fingerprint(model: &str, voice: &str, text: &str) -> String {
    let normalized: String = text.trim_matches(|c: char| c.is_ascii_whitespace()).nfc().collect();

    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(voice.as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(normalized.as_bytes());

    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
