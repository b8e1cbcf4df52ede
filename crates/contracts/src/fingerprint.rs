use hex::ToHex;
use sha2::Digest;
use unicode_normalization::UnicodeNormalization;

const FINGERPRINT_HEX_CHARS: usize = 16;

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hasher.finalize().encode_hex::<String>()
}

fn canonicalize_text(input: &str) -> String {
    input.trim().nfc().collect::<String>()
}

/// Short, stable stand-in for patient-identifying text in logs and metrics.
///
/// Text is trimmed and NFC-normalized first so that visually identical names
/// typed on different keyboards map to the same fingerprint.
pub fn fingerprint(value: &str) -> String {
    let mut hex = sha256_hex(canonicalize_text(value).as_bytes());
    hex.truncate(FINGERPRINT_HEX_CHARS);
    hex
}
