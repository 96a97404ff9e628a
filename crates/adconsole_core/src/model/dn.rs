//! Distinguished name helpers.
//!
//! # Invariants
//! - Component separators are unescaped commas; `\,` stays inside a value.
//! - DN comparison is ASCII case-insensitive, matching directory semantics.

/// Splits a DN into its RDN components, keeping escapes intact.
pub fn split_dn(dn: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (index, ch) in dn.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            ',' => {
                parts.push(dn[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    let tail = dn[start..].trim();
    if !tail.is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Returns the first RDN, e.g. `CN=John` for `CN=John,OU=Users,DC=x`.
pub fn rdn(dn: &str) -> &str {
    split_dn(dn).first().copied().unwrap_or("")
}

/// Returns the unescaped value of the first RDN, e.g. `John`.
pub fn rdn_value(dn: &str) -> String {
    let first = rdn(dn);
    let value = match first.split_once('=') {
        Some((_, value)) => value,
        None => first,
    };
    unescape_dn_value(value)
}

/// Returns the naming attribute of the first RDN, e.g. `CN`.
pub fn rdn_attribute(dn: &str) -> &str {
    rdn(dn).split_once('=').map_or("", |(name, _)| name.trim())
}

/// Returns the parent DN, or an empty string for a single-component DN.
pub fn parent_dn(dn: &str) -> String {
    let parts = split_dn(dn);
    if parts.len() <= 1 {
        return String::new();
    }
    parts[1..].join(",")
}

/// Returns the DN an object would have after moving under `new_parent_dn`.
pub fn dn_move(dn: &str, new_parent_dn: &str) -> String {
    format!("{},{}", rdn(dn), new_parent_dn)
}

/// Returns the DN an object would have after being renamed to `new_name`.
///
/// The naming attribute of the current RDN is kept.
pub fn dn_rename(dn: &str, new_name: &str) -> String {
    let attribute = rdn_attribute(dn);
    let parent = parent_dn(dn);
    let new_rdn = format!("{attribute}={}", escape_dn_value(new_name));
    if parent.is_empty() {
        new_rdn
    } else {
        format!("{new_rdn},{parent}")
    }
}

/// Returns whether two DNs name the same object.
pub fn dn_equals(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Returns whether `dn` lies strictly below `ancestor`.
pub fn is_descendant_of(dn: &str, ancestor: &str) -> bool {
    let dn = dn.trim();
    let ancestor = ancestor.trim();
    if ancestor.is_empty() || dn.len() <= ancestor.len() + 1 {
        return false;
    }
    let split = dn.len() - ancestor.len();
    dn.is_char_boundary(split)
        && dn[split..].eq_ignore_ascii_case(ancestor)
        && dn[..split].ends_with(',')
        && !dn[..split - 1].ends_with('\\')
}

/// Rewrites the `old_base` suffix of `dn` into `new_base`.
///
/// Returns `None` when `dn` is neither `old_base` nor below it.
pub fn rebase_dn(dn: &str, old_base: &str, new_base: &str) -> Option<String> {
    if dn_equals(dn, old_base) {
        return Some(new_base.to_string());
    }
    if !is_descendant_of(dn, old_base) {
        return None;
    }
    let prefix = &dn.trim()[..dn.trim().len() - old_base.trim().len()];
    Some(format!("{prefix}{new_base}"))
}

/// Escapes one attribute value for use inside a DN (RFC 4514).
pub fn escape_dn_value(value: &str) -> String {
    let count = value.chars().count();
    let mut result = String::with_capacity(value.len() * 2);
    for (index, ch) in value.chars().enumerate() {
        let is_first = index == 0;
        let is_last = index + 1 == count;
        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if is_first || is_last => result.push_str("\\20"),
            '#' if is_first => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }
    result
}

/// Reverses [`escape_dn_value`] for display.
pub fn unescape_dn_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.trim().chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        let mut hex = String::new();
        while hex.len() < 2 {
            match chars.peek() {
                Some(next) if next.is_ascii_hexdigit() => {
                    hex.push(*next);
                    chars.next();
                }
                _ => break,
            }
        }
        if hex.len() == 2 {
            if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                result.push(char::from(byte));
                continue;
            }
        }
        result.push_str(&hex);
        if hex.is_empty() {
            if let Some(next) = chars.next() {
                result.push(next);
            }
        }
    }
    result
}
