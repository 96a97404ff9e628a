//! `gPLink` attribute codec.
//!
//! The attribute lists linked policies as `[LDAP://<policy dn>;<options>]`
//! segments. Options are a bit set: bit 1 disables the link, bit 2 enforces it.

use crate::model::dn::dn_equals;
use std::fmt::{Display, Formatter};

/// One option flag of a policy link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GplinkOption {
    Disabled,
    Enforced,
}

impl GplinkOption {
    fn bit(self) -> u32 {
        match self {
            Self::Disabled => 1,
            Self::Enforced => 2,
        }
    }
}

/// Parsed policy link list of one organizational unit or domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gplink {
    links: Vec<(String, u32)>,
}

impl Gplink {
    /// Parses a raw `gPLink` value. Malformed segments are skipped.
    pub fn parse(value: &str) -> Self {
        let mut links = Vec::new();
        for segment in value.split(']') {
            let Some(start) = segment.find('[') else {
                continue;
            };
            let body = &segment[start + 1..];
            let (path, options) = match body.rsplit_once(';') {
                Some((path, options)) => (path, options.trim().parse::<u32>().unwrap_or(0)),
                None => (body, 0),
            };
            let dn = strip_ldap_prefix(path.trim());
            if dn.is_empty() {
                continue;
            }
            links.push((dn.to_string(), options));
        }
        Self { links }
    }

    /// Returns linked policy DNs in link order.
    pub fn gpo_list(&self) -> Vec<String> {
        self.links.iter().map(|(dn, _)| dn.clone()).collect()
    }

    pub fn contains(&self, gpo_dn: &str) -> bool {
        self.position(gpo_dn).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Appends a link with no options. Returns `false` if already linked.
    pub fn add(&mut self, gpo_dn: &str) -> bool {
        if self.contains(gpo_dn) {
            return false;
        }
        self.links.push((gpo_dn.trim().to_string(), 0));
        true
    }

    /// Removes a link. Returns `false` if it was not linked.
    pub fn remove(&mut self, gpo_dn: &str) -> bool {
        match self.position(gpo_dn) {
            Some(index) => {
                self.links.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn get_option(&self, gpo_dn: &str, option: GplinkOption) -> bool {
        self.position(gpo_dn)
            .is_some_and(|index| self.links[index].1 & option.bit() != 0)
    }

    pub fn set_option(&mut self, gpo_dn: &str, option: GplinkOption, value: bool) {
        if let Some(index) = self.position(gpo_dn) {
            if value {
                self.links[index].1 |= option.bit();
            } else {
                self.links[index].1 &= !option.bit();
            }
        }
    }

    /// Returns linked policies carrying the given option.
    pub fn gpos_with_option(&self, option: GplinkOption) -> Vec<String> {
        self.links
            .iter()
            .filter(|(_, options)| options & option.bit() != 0)
            .map(|(dn, _)| dn.clone())
            .collect()
    }

    fn position(&self, gpo_dn: &str) -> Option<usize> {
        self.links.iter().position(|(dn, _)| dn_equals(dn, gpo_dn))
    }
}

impl Display for Gplink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (dn, options) in &self.links {
            write!(f, "[LDAP://{dn};{options}]")?;
        }
        Ok(())
    }
}

fn strip_ldap_prefix(path: &str) -> &str {
    const PREFIX: &str = "LDAP://";
    if path.len() >= PREFIX.len() && path[..PREFIX.len()].eq_ignore_ascii_case(PREFIX) {
        &path[PREFIX.len()..]
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::{Gplink, GplinkOption};

    const A: &str = "CN={A},CN=Policies,CN=System,DC=x";
    const B: &str = "CN={B},CN=Policies,CN=System,DC=x";

    #[test]
    fn parses_links_and_options() {
        let gplink = Gplink::parse(&format!("[LDAP://{A};0][ldap://{B};3]"));
        assert_eq!(gplink.gpo_list(), vec![A.to_string(), B.to_string()]);
        assert!(!gplink.get_option(A, GplinkOption::Enforced));
        assert!(gplink.get_option(B, GplinkOption::Enforced));
        assert!(gplink.get_option(B, GplinkOption::Disabled));
        assert_eq!(gplink.gpos_with_option(GplinkOption::Enforced), vec![B.to_string()]);
    }

    #[test]
    fn add_is_case_insensitive_and_idempotent() {
        let mut gplink = Gplink::parse("");
        assert!(gplink.is_empty());
        assert!(gplink.add(A));
        assert!(!gplink.add(&A.to_lowercase()));
        assert_eq!(gplink.len(), 1);
        assert_eq!(gplink.to_string(), format!("[LDAP://{A};0]"));
    }

    #[test]
    fn remove_and_set_option() {
        let mut gplink = Gplink::parse(&format!("[LDAP://{A};0][LDAP://{B};0]"));
        gplink.set_option(B, GplinkOption::Enforced, true);
        assert!(gplink.remove(A));
        assert!(!gplink.remove(A));
        assert_eq!(gplink.to_string(), format!("[LDAP://{B};2]"));
    }

    #[test]
    fn skips_malformed_segments() {
        let gplink = Gplink::parse(&format!("garbage[LDAP://;0][LDAP://{A}]"));
        assert_eq!(gplink.gpo_list(), vec![A.to_string()]);
    }
}
