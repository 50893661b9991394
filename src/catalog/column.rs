use anyhow::{anyhow, bail, Result};

/// Widest sheet supported: columns `A` through `XFD`.
pub const MAX_COLUMNS: usize = 16_384;

/// Converts a spreadsheet column code (`A`, `Z`, `AA`, `BC`, ...) into a
/// zero-based ordinal. Lowercase letters are accepted.
pub fn column_ordinal(code: &str) -> Result<usize> {
    let code = code.trim();
    if code.is_empty() {
        bail!("empty column code");
    }

    let mut value: usize = 0;
    for letter in code.chars() {
        if !letter.is_ascii_alphabetic() {
            bail!("invalid column code '{code}': '{letter}' is not a letter");
        }
        let digit = (letter.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        value = value
            .checked_mul(26)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| anyhow!("column code '{code}' is too large"))?;
    }

    let ordinal = value - 1;
    if ordinal >= MAX_COLUMNS {
        bail!(
            "column code '{code}' is past the last column {}",
            column_letters(MAX_COLUMNS - 1)
        );
    }
    Ok(ordinal)
}

/// Inverse of [`column_ordinal`]: `0 -> "A"`, `26 -> "AA"`.
pub fn column_letters(ordinal: usize) -> String {
    let mut n = ordinal + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}
