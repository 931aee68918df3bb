//! License plate canonicalization.

/// Canonical form of a license plate: no spaces or hyphens, no surrounding
/// whitespace, uppercase.
///
/// Spaces and hyphens go before trimming, so whitespace they were shielding
/// is trimmed too and a second pass changes nothing. Two plates are the same
/// plate when their normalized forms are equal.
pub fn normalize(raw: &str) -> String {
    let stripped: String = raw.chars().filter(|c| *c != ' ' && *c != '-').collect();
    stripped
        .trim()
        .chars()
        .flat_map(char::to_uppercase)
        .collect()
}

/// Compare two plates by their normalized forms.
pub fn same_plate(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}
