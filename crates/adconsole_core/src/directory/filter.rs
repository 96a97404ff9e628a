//! LDAP filter builders and an in-process matcher.
//!
//! Builders produce RFC 4515 strings and skip empty operands, so callers can
//! compose optional clauses without special cases. The parser accepts the
//! subset the browser issues: `&`, `|`, `!`, presence, equality, substring,
//! `>=`, `<=` and the bitwise matching rules used for `userAccountControl`.

use crate::directory::{DirectoryError, DirectoryResult};
use crate::model::entry::{Entry, ATTRIBUTE_OBJECT_CLASS};
use regex::Regex;
use std::cmp::Ordering;

const RULE_BIT_AND: &str = "1.2.840.113556.1.4.803";
const RULE_BIT_OR: &str = "1.2.840.113556.1.4.804";

/// Escapes one assertion value (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn filter_equals(attribute: &str, value: &str) -> String {
    format!("({attribute}={})", escape_filter_value(value))
}

pub fn filter_not_equals(attribute: &str, value: &str) -> String {
    filter_not(&filter_equals(attribute, value))
}

pub fn filter_contains(attribute: &str, value: &str) -> String {
    format!("({attribute}=*{}*)", escape_filter_value(value))
}

pub fn filter_present(attribute: &str) -> String {
    format!("({attribute}=*)")
}

/// Combines filters with `&`. Empty operands are skipped.
pub fn filter_and<S: AsRef<str>>(filters: &[S]) -> String {
    combine('&', filters)
}

/// Combines filters with `|`. Empty operands are skipped.
pub fn filter_or<S: AsRef<str>>(filters: &[S]) -> String {
    combine('|', filters)
}

pub fn filter_not(filter: &str) -> String {
    if filter.trim().is_empty() {
        return String::new();
    }
    format!("(!{filter})")
}

fn combine<S: AsRef<str>>(operator: char, filters: &[S]) -> String {
    let parts: Vec<&str> = filters
        .iter()
        .map(AsRef::as_ref)
        .filter(|value| !value.trim().is_empty())
        .collect();
    match parts.len() {
        0 => String::new(),
        1 => parts[0].to_string(),
        _ => format!("({operator}{})", parts.concat()),
    }
}

/// Parsed filter tree.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Empty filter string.
    MatchAll,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equals(String, String),
    Substring(String, Regex),
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
    BitAnd(String, i64),
    BitOr(String, i64),
}

impl Filter {
    /// Parses a filter string. Blank input matches everything.
    pub fn parse(filter: &str) -> DirectoryResult<Self> {
        let trimmed = filter.trim();
        if trimmed.is_empty() {
            return Ok(Self::MatchAll);
        }
        let wrapped;
        let input = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({trimmed})");
            wrapped.as_str()
        };

        let mut parser = Parser { input, pos: 0 };
        let parsed = parser
            .parse_filter()
            .and_then(|parsed| {
                if parser.pos == input.len() {
                    Ok(parsed)
                } else {
                    Err(format!("unexpected trailing input at {}", parser.pos))
                }
            })
            .map_err(|message| DirectoryError::InvalidFilter {
                filter: filter.to_string(),
                message,
            })?;
        Ok(parsed)
    }

    /// Evaluates this filter against one entry.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Self::MatchAll => true,
            Self::And(items) => items.iter().all(|item| item.matches(entry)),
            Self::Or(items) => items.iter().any(|item| item.matches(entry)),
            Self::Not(item) => !item.matches(entry),
            Self::Present(attribute) => !values_of(entry, attribute).is_empty(),
            Self::Equals(attribute, expected) => values_of(entry, attribute)
                .iter()
                .any(|value| value.eq_ignore_ascii_case(expected)),
            Self::Substring(attribute, pattern) => values_of(entry, attribute)
                .iter()
                .any(|value| pattern.is_match(value)),
            Self::GreaterOrEqual(attribute, expected) => values_of(entry, attribute)
                .iter()
                .any(|value| compare_values(value, expected) != Ordering::Less),
            Self::LessOrEqual(attribute, expected) => values_of(entry, attribute)
                .iter()
                .any(|value| compare_values(value, expected) != Ordering::Greater),
            Self::BitAnd(attribute, mask) => int_values(entry, attribute)
                .into_iter()
                .any(|value| value & mask == *mask),
            Self::BitOr(attribute, mask) => int_values(entry, attribute)
                .into_iter()
                .any(|value| value & mask != 0),
        }
    }
}

/// Parses `filter` and evaluates it against `entry`.
pub fn matches_filter(filter: &str, entry: &Entry) -> DirectoryResult<bool> {
    Ok(Filter::parse(filter)?.matches(entry))
}

fn values_of<'a>(entry: &'a Entry, attribute: &str) -> Vec<&'a str> {
    if attribute.eq_ignore_ascii_case(ATTRIBUTE_OBJECT_CLASS) {
        return entry.object_classes.iter().map(String::as_str).collect();
    }
    if attribute.eq_ignore_ascii_case("distinguishedName") {
        return vec![entry.dn.as_str()];
    }
    entry.get_values(attribute).iter().map(String::as_str).collect()
}

fn int_values(entry: &Entry, attribute: &str) -> Vec<i64> {
    values_of(entry, attribute)
        .into_iter()
        .filter_map(|value| value.trim().parse::<i64>().ok())
        .collect()
}

fn compare_values(value: &str, expected: &str) -> Ordering {
    match (value.trim().parse::<i64>(), expected.trim().parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => value.to_ascii_lowercase().cmp(&expected.to_ascii_lowercase()),
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        match self.peek() {
            Some(ch) if ch == expected => {
                self.pos += ch.len_utf8();
                Ok(())
            }
            Some(ch) => Err(format!("expected `{expected}` at {}, found `{ch}`", self.pos)),
            None => Err(format!("expected `{expected}` at end of input")),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, String> {
        self.expect('(')?;
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err("unexpected end of input".to_string()),
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, String> {
        let mut items = Vec::new();
        while self.peek() == Some('(') {
            items.push(self.parse_filter()?);
        }
        Ok(items)
    }

    fn parse_item(&mut self) -> Result<Filter, String> {
        let start = self.pos;
        let mut escaped = false;
        while let Some(ch) = self.peek() {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == ')' {
                break;
            } else if ch == '(' {
                return Err(format!("unexpected `(` at {}", self.pos));
            }
            self.pos += ch.len_utf8();
        }
        parse_simple(&self.input[start..self.pos])
    }
}

fn parse_simple(item: &str) -> Result<Filter, String> {
    let Some(eq) = item.find('=') else {
        return Err(format!("missing `=` in `{item}`"));
    };
    let lhs = &item[..eq];
    let value = &item[eq + 1..];

    if let Some(attribute) = lhs.strip_suffix('>') {
        let attribute = validate_attribute(attribute)?;
        return Ok(Filter::GreaterOrEqual(attribute, unescape_value(value)));
    }
    if let Some(attribute) = lhs.strip_suffix('<') {
        let attribute = validate_attribute(attribute)?;
        return Ok(Filter::LessOrEqual(attribute, unescape_value(value)));
    }
    if let Some(attribute) = lhs.strip_suffix('~') {
        let attribute = validate_attribute(attribute)?;
        return Ok(Filter::Equals(attribute, unescape_value(value)));
    }
    if let Some((attribute, rule)) = lhs.split_once(':') {
        let attribute = validate_attribute(attribute)?;
        let rule = rule.trim_end_matches(':');
        let mask = unescape_value(value)
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("matching rule value must be an integer: `{value}`"))?;
        return match rule {
            RULE_BIT_AND => Ok(Filter::BitAnd(attribute, mask)),
            RULE_BIT_OR => Ok(Filter::BitOr(attribute, mask)),
            other => Err(format!("unsupported matching rule `{other}`")),
        };
    }

    let attribute = validate_attribute(lhs)?;
    if value == "*" {
        return Ok(Filter::Present(attribute));
    }
    let parts = split_unescaped_stars(value);
    if parts.len() == 1 {
        return Ok(Filter::Equals(attribute, unescape_value(value)));
    }
    let pattern = parts
        .iter()
        .map(|part| regex::escape(&unescape_value(part)))
        .collect::<Vec<_>>()
        .join(".*");
    let regex = Regex::new(&format!("(?is)^{pattern}$")).map_err(|err| err.to_string())?;
    Ok(Filter::Substring(attribute, regex))
}

fn validate_attribute(attribute: &str) -> Result<String, String> {
    let trimmed = attribute.trim();
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == ';' || ch == '.');
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(format!("invalid attribute name `{attribute}`"))
    }
}

fn split_unescaped_stars(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (index, ch) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '*' => {
                parts.push(&value[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn unescape_value(value: &str) -> String {
    let mut bytes = Vec::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0_u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let hi = chars.next_if(char::is_ascii_hexdigit);
        let lo = hi.and_then(|_| chars.next_if(char::is_ascii_hexdigit));
        match (hi.and_then(|c| c.to_digit(16)), lo.and_then(|c| c.to_digit(16))) {
            (Some(hi), Some(lo)) => bytes.push((hi * 16 + lo) as u8),
            _ => {
                if let Some(hi) = hi {
                    bytes.push(hi as u8);
                } else if let Some(next) = chars.next() {
                    let mut buf = [0_u8; 4];
                    bytes.extend_from_slice(next.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::{
        filter_and, filter_contains, filter_equals, filter_not, filter_or, matches_filter, Filter,
    };
    use crate::directory::DirectoryError;
    use crate::model::entry::Entry;

    fn user() -> Entry {
        Entry::new("CN=John Smith,OU=Sales,DC=x", ["top", "user"])
            .with_attribute("name", "John Smith")
            .with_attribute("userAccountControl", "514")
            .with_attribute("description", "a (test) user")
    }

    #[test]
    fn builders_skip_empty_operands_and_escape() {
        assert_eq!(filter_and(&["", "(a=1)"]), "(a=1)");
        assert_eq!(filter_or(&["(a=1)", "(b=2)"]), "(|(a=1)(b=2))");
        assert_eq!(filter_and::<&str>(&[]), "");
        assert_eq!(filter_not(""), "");
        assert_eq!(filter_equals("name", "a*(b)"), "(name=a\\2a\\28b\\29)");
        assert_eq!(filter_contains("name", "x"), "(name=*x*)");
    }

    #[test]
    fn equality_and_object_class_match_case_insensitively() {
        let entry = user();
        assert!(matches_filter("(objectClass=USER)", &entry).unwrap());
        assert!(matches_filter("(NAME=john smith)", &entry).unwrap());
        assert!(!matches_filter("(objectClass=group)", &entry).unwrap());
        assert!(matches_filter("", &entry).unwrap());
    }

    #[test]
    fn substring_and_escaped_values() {
        let entry = user();
        assert!(matches_filter("(name=jo*sm*)", &entry).unwrap());
        assert!(!matches_filter("(name=*smithy)", &entry).unwrap());
        assert!(matches_filter(&filter_equals("description", "a (test) user"), &entry).unwrap());
        assert!(matches_filter(&filter_contains("description", "(test)"), &entry).unwrap());
    }

    #[test]
    fn composite_and_bitwise_rules() {
        let entry = user();
        let disabled = "(userAccountControl:1.2.840.113556.1.4.803:=2)";
        assert!(matches_filter(disabled, &entry).unwrap());
        let filter = filter_and(&[filter_equals("objectClass", "user"), filter_not(disabled)]);
        assert!(!matches_filter(&filter, &entry).unwrap());
        assert!(matches_filter("(userAccountControl>=512)", &entry).unwrap());
        assert!(!matches_filter("(userAccountControl<=100)", &entry).unwrap());
        assert!(matches_filter("(|(name=nobody)(name=*))", &entry).unwrap());
    }

    #[test]
    fn malformed_filters_are_rejected() {
        for bad in ["(name=a", "(=a)", "(&(a=1)", "(a=1))", "(name)"] {
            let error = Filter::parse(bad).unwrap_err();
            assert!(matches!(error, DirectoryError::InvalidFilter { .. }), "{bad}");
        }
    }
}
