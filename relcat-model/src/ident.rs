//! Identifier and literal quoting for generated SQL

use relcat_common::{Error, Result};
use sha2::{Digest, Sha256};

/// Backend limit on identifier length, in bytes.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Quote an identifier, doubling embedded quote characters.
pub fn sql_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a text literal, doubling embedded single quotes.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"schema"."name"`
pub fn qualified_name(schema: &str, name: &str) -> String {
    format!("{}.{}", sql_identifier(schema), sql_identifier(name))
}

/// Text array literal, e.g. for multi-column storage keys.
pub fn sql_text_array(values: &[String]) -> String {
    let items: Vec<String> = values.iter().map(|v| sql_literal(v)).collect();
    format!("ARRAY[{}]::text[]", items.join(", "))
}

/// Reject user-supplied names the backend would silently truncate.
pub fn enforce_identifier_length(name: &str, what: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_BYTES {
        return Err(Error::bad_data(format!(
            "{what} name \"{name}\" exceeds {MAX_IDENTIFIER_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Build a derived object name such as `people_name_1f0c9a2e_idx`.
///
/// The readable prefix joins `parts` with `_` and is cut to fit `maxlen`
/// bytes. The digest covers each part separately, so parts whose joined
/// text coincides (`a_b`+`c` and `a`+`b_c`) still get distinct names.
pub fn derived_identifier(parts: &[&str], kind: &str, maxlen: usize) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(kind.as_bytes());
    let digest = hex::encode(hasher.finalize());
    let tail = format!("_{}_{kind}", &digest[..8]);

    let readable = parts.join("_");
    let mut cut = maxlen.saturating_sub(tail.len()).min(readable.len());
    while !readable.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{tail}", &readable[..cut])
}
