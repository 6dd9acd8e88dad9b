use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CacheContents, CacheError};

/// How deep the canonicalization walk follows nested structures before
/// rejecting the input.
const MAX_DEPTH: usize = 10;

/// A stable string key derived from a cache input.
///
/// Two inputs that are structurally equal modulo map-key ordering produce
/// equal fingerprints, so they share one cache task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Arc<str>);

impl Fingerprint {
    pub(crate) fn from_digest(digest: String) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user-supplied replacement for the default fingerprint pipeline.
///
/// When configured, canonicalization and hashing are bypassed entirely; the
/// returned string is used as the fingerprint as-is. Distinct inputs mapping
/// to the same string share cache state by contract.
pub type KeyTransform<K> = Arc<dyn Fn(&K) -> CacheContents<String> + Send + Sync>;

/// Derives the [`Fingerprint`] for an input.
///
/// The default pipeline canonicalizes the input's serialized structure
/// (deterministic, order-independent for maps) and hashes the canonical
/// string into a 128-bit lowercase-hex digest.
pub fn fingerprint<K: Serialize>(
    input: &K,
    transform: Option<&KeyTransform<K>>,
) -> CacheContents<Fingerprint> {
    if let Some(transform) = transform {
        return transform(input).map(Fingerprint::from_digest);
    }

    let value = serde_json::to_value(input)
        .map_err(|err| CacheError::Fingerprint(format!("unsupported input: {err}")))?;
    let canonical = canonicalize(&value)?;
    Ok(Fingerprint::from_digest(digest(&canonical)))
}

/// Renders a serialized input into its canonical textual form.
///
/// Mappings become `{k1:v1,k2:v2}` with keys in lexicographic order and
/// absent (null) entries dropped; sequences keep their order as `[a,b,c]`;
/// primitives render as their textual form.
pub fn canonicalize(value: &Value) -> CacheContents<String> {
    let mut out = String::new();
    render(value, 1, &mut out)?;
    Ok(out)
}

fn render(value: &Value, depth: usize, out: &mut String) -> CacheContents<()> {
    // Only containers count towards the nesting limit; a primitive sitting
    // inside the deepest allowed container still renders.
    if depth > MAX_DEPTH && (value.is_array() || value.is_object()) {
        return Err(CacheError::Fingerprint(format!(
            "input nested deeper than {MAX_DEPTH} levels"
        )));
    }

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => render_number(n, out),
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render(item, depth + 1, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.sort_unstable();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push(':');
                render(&map[key.as_str()], depth + 1, out)?;
            }
            out.push('}');
        }
    }

    Ok(())
}

/// Renders a number without trailing zeros.
///
/// Integers (including integer-valued floats) render in base-10 without a
/// fractional part and without precision loss; other floats use the shortest
/// round-trippable form.
fn render_number(n: &serde_json::Number, out: &mut String) {
    use std::fmt::Write;

    if let Some(i) = n.as_i64() {
        write!(out, "{i}").unwrap();
    } else if let Some(u) = n.as_u64() {
        write!(out, "{u}").unwrap();
    } else if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
            write!(out, "{}", f as i64).unwrap();
        } else {
            write!(out, "{f}").unwrap();
        }
    } else {
        // serde_json numbers are always one of the above.
        out.push_str("null");
    }
}

/// Hashes a canonical string into a 128-bit lowercase-hex digest.
fn digest(canonical: &str) -> String {
    hex128(&Sha256::digest(canonical.as_bytes()))
}

fn hex128(hash: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(32);
    for b in &hash[..16] {
        write!(out, "{b:02x}").unwrap();
    }
    out
}

/// Incrementally builds a [`Fingerprint`] from raw contributions.
///
/// This is the companion to the pluggable fingerprinter: a
/// `cache_key_transform` that derives its key from several sources can feed
/// each of them into a builder and end up with the same digest format the
/// default pipeline emits. The contributions must be stable, or equal
/// inputs stop mapping to the same entry.
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Feeds `data` into the fingerprint.
    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        self.hasher.update(data);
    }

    /// Finalizes the 128-bit lowercase-hex fingerprint.
    pub fn finish(self) -> Fingerprint {
        Fingerprint::from_digest(hex128(&self.hasher.finalize()))
    }
}
