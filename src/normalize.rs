//! # Normalize Module
//!
//! Name and domain normalization. All functions here are pure and
//! idempotent: feeding an output back in returns it unchanged.

use crate::model::{NormalizedKey, OrgRecord};
use std::collections::BTreeSet;

/// Legal-form suffixes stripped from the end of a name. `spa` is left
/// out on purpose: it is often part of a brand rather than the Italian
/// legal form.
const LEGAL_SUFFIXES: &[&str] = &[
    "oy", "oyj", "ab", "as", "gmbh", "ltd", "inc", "sa", "nv", "bv", "srl",
];

/// Weak trailing qualifiers that rarely distinguish organizations,
/// stripped after the legal suffixes ("X Group" vs "X").
const WEAK_SUFFIXES: &[&str] = &["group"];

/// Tokens ignored when checking whether two names share substance.
/// Covers connectives, legal forms kept for safety, and generic
/// institution words that would otherwise link unrelated universities.
const STOPWORDS: &[&str] = &[
    "the",
    "of",
    "and",
    "or",
    "for",
    "in",
    "at",
    "by",
    "oy",
    "oyj",
    "ab",
    "as",
    "gmbh",
    "ltd",
    "inc",
    "sa",
    "spa",
    "nv",
    "bv",
    "srl",
    "company",
    "co",
    "group",
    "university",
    "universitetet",
    "universitet",
    "college",
    "school",
    "academy",
    "akademi",
    "institute",
    "instituutti",
    "institutet",
];

/// Freemail domains ignored when deriving organization domains from
/// contact email addresses.
const FREEMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "yahoo.com",
    "icloud.com",
    "me.com",
    "msn.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
    "mail.com",
    "gmx.com",
];

/// Normalize an organization name for comparison: lowercase, collapse
/// whitespace, then strip trailing legal suffixes and finally trailing
/// weak suffixes.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();

    while matches!(tokens.last(), Some(t) if LEGAL_SUFFIXES.contains(t)) {
        tokens.pop();
    }
    while matches!(tokens.last(), Some(t) if WEAK_SUFFIXES.contains(t)) {
        tokens.pop();
    }

    tokens.join(" ")
}

/// First token of a normalized name, if any.
pub fn first_token(normalized: &str) -> Option<&str> {
    normalized.split_whitespace().next()
}

/// Non-stopword tokens of a normalized name.
pub fn significant_tokens(normalized: &str) -> BTreeSet<String> {
    normalized
        .split_whitespace()
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Whether two normalized names share at least one significant token.
/// When either side has no significant tokens the check degrades to
/// exact equality, so that "university of oslo" cannot pull in every
/// other university.
pub fn has_significant_overlap(a: &str, b: &str) -> bool {
    let sig_a = significant_tokens(a);
    let sig_b = significant_tokens(b);
    if sig_a.is_empty() || sig_b.is_empty() {
        return a == b;
    }
    sig_a.intersection(&sig_b).next().is_some()
}

/// Normalize a raw domain: trim, lowercase, drop trailing dots and a
/// leading `www.`. Returns `None` for empty input. All trailing dots
/// go, not just one, so the output is stable when fed back in.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let mut d = raw.trim().to_lowercase();
    while d.ends_with('.') {
        d.pop();
    }
    if let Some(rest) = d.strip_prefix("www.") {
        d = rest.to_string();
    }
    if d.is_empty() {
        None
    } else {
        Some(d)
    }
}

/// Approximate the registrable root of a domain:
///
///   audionova.dk    -> audionova
///   no.experis.com  -> experis
///   example.co.uk   -> example
///
/// This is a heuristic, not a public-suffix lookup. Only the common
/// two-level suffixes under `uk` are special-cased.
pub fn domain_root(domain: &str) -> Option<String> {
    let d = domain.trim().to_lowercase();
    if d.is_empty() {
        return None;
    }
    let parts: Vec<&str> = d.split('.').collect();
    if parts.len() == 1 {
        return Some(parts[0].to_string());
    }

    let tld = parts[parts.len() - 1];
    let sld = parts[parts.len() - 2];
    if tld == "uk" && matches!(sld, "co" | "ac" | "gov" | "org") {
        if parts.len() >= 3 {
            return Some(parts[parts.len() - 3].to_string());
        }
        return Some(sld.to_string());
    }

    Some(sld.to_string())
}

/// Domain part of an email address, normalized. `None` when the input
/// is not an address.
pub fn email_domain(email: &str) -> Option<String> {
    let (_, domain) = email.split_once('@')?;
    normalize_domain(domain)
}

/// Whether a domain belongs to a known freemail provider.
pub fn is_freemail(domain: &str) -> bool {
    FREEMAIL_DOMAINS.contains(&domain)
}

/// Derive the full normalized view of a record.
pub fn key_for(record: &OrgRecord) -> NormalizedKey {
    let name = normalize_name(&record.name);
    let first = first_token(&name).map(str::to_string);
    let significant = significant_tokens(&name);
    let domain = record.domain.as_deref().and_then(normalize_domain);
    let root = domain.as_deref().and_then(domain_root);

    NormalizedKey {
        name,
        first_token: first,
        significant,
        domain,
        domain_root: root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrgRecord;

    #[test]
    fn test_normalize_name_strips_suffixes() {
        assert_eq!(
            normalize_name("  Oulun   Kuivaustekniikka   Group Oy  "),
            "oulun kuivaustekniikka"
        );
        assert_eq!(normalize_name("Acme Oyj"), "acme");
        assert_eq!(normalize_name("Acme Group"), "acme");
        // Stacked legal suffixes all go.
        assert_eq!(normalize_name("Acme Ltd Inc"), "acme");
    }

    #[test]
    fn test_normalize_name_keeps_interior_suffix_tokens() {
        // "as" is only stripped at the end.
        assert_eq!(normalize_name("As Oy Kotirinne"), "as oy kotirinne");
        // "spa" is deliberately not a legal suffix.
        assert_eq!(normalize_name("Ikaalinen Spa"), "ikaalinen spa");
    }

    #[test]
    fn test_normalize_name_idempotent() {
        let once = normalize_name("Helsingin Yliopisto AB");
        assert_eq!(normalize_name(&once), once);
    }

    #[test]
    fn test_normalize_name_empty() {
        assert_eq!(normalize_name(""), "");
        assert_eq!(normalize_name("   "), "");
        assert_eq!(first_token(""), None);
    }

    #[test]
    fn test_significant_tokens_filters_stopwords() {
        let sig = significant_tokens("university of the arts helsinki");
        assert!(sig.contains("arts"));
        assert!(sig.contains("helsinki"));
        assert!(!sig.contains("university"));
        assert!(!sig.contains("of"));
    }

    #[test]
    fn test_overlap_requires_shared_substance() {
        assert!(has_significant_overlap(
            "university of the arts helsinki",
            "arts academy"
        ));
        assert!(!has_significant_overlap(
            "university of the arts helsinki",
            "university of oslo library"
        ));
    }

    #[test]
    fn test_overlap_falls_back_to_equality() {
        // Both sides all-stopwords: only exact equality passes.
        assert!(has_significant_overlap("the company", "the company"));
        assert!(!has_significant_overlap("the company", "the group"));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(
            normalize_domain(" WWW.Acme.FI. "),
            Some("acme.fi".to_string())
        );
        // Stacked trailing dots all go, keeping the output stable.
        assert_eq!(
            normalize_domain("acme.fi.."),
            Some("acme.fi".to_string())
        );
        assert_eq!(normalize_domain(""), None);
        assert_eq!(normalize_domain("  "), None);
    }

    #[test]
    fn test_domain_root_heuristic() {
        assert_eq!(domain_root("audionova.dk"), Some("audionova".to_string()));
        assert_eq!(domain_root("ttt-teatteri.fi"), Some("ttt-teatteri".to_string()));
        assert_eq!(domain_root("no.experis.com"), Some("experis".to_string()));
        assert_eq!(domain_root("example.co.uk"), Some("example".to_string()));
        assert_eq!(domain_root("co.uk"), Some("co".to_string()));
        assert_eq!(domain_root("localhost"), Some("localhost".to_string()));
        assert_eq!(domain_root(""), None);
    }

    #[test]
    fn test_email_domain() {
        assert_eq!(
            email_domain("mikko@Acme.fi"),
            Some("acme.fi".to_string())
        );
        assert_eq!(email_domain("not-an-address"), None);
        assert!(is_freemail("gmail.com"));
        assert!(!is_freemail("acme.fi"));
    }

    #[test]
    fn test_key_for_record() {
        let rec = OrgRecord::new("1", "TTT-Teatteri Oy").with_domain("www.ttt-teatteri.fi");
        let key = key_for(&rec);
        assert_eq!(key.name, "ttt-teatteri");
        assert_eq!(key.first_token.as_deref(), Some("ttt-teatteri"));
        assert_eq!(key.domain.as_deref(), Some("ttt-teatteri.fi"));
        assert_eq!(key.domain_root.as_deref(), Some("ttt-teatteri"));
    }
}
