use dns_types::protocol::types::DomainName;

/// Registry-operated suffixes whose zone metadata is not worth
/// harvesting: querying `com.` for MX or TXT on every crawl would be
/// noise.  gTLDs, common ccTLDs, and the usual second-level registry
/// suffixes.
static REGISTRAR_SUFFIXES: &[&str] = &[
    "aero", "arpa", "asia", "biz", "cat", "com", "coop", "edu", "gov", "info", "int", "jobs",
    "mil", "mobi", "museum", "name", "net", "org", "pro", "tel", "travel", "xxx",
    // ccTLDs
    "ac", "at", "au", "be", "br", "ca", "cc", "ch", "cn", "co", "cz", "de", "dk", "es", "eu",
    "fi", "fr", "gr", "hk", "hu", "ie", "il", "in", "io", "it", "jp", "kr", "me", "mx", "nl",
    "no", "nz", "pl", "pt", "ro", "ru", "se", "sg", "tr", "tv", "tw", "ua", "uk", "us", "za",
    // second-level registry suffixes
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "net.uk", "com.au", "net.au", "org.au",
    "co.nz", "net.nz", "org.nz", "co.jp", "ne.jp", "or.jp", "ac.jp", "com.cn", "net.cn",
    "org.cn", "com.br", "net.br", "org.br", "co.kr", "or.kr", "co.in", "net.in", "org.in",
    "com.mx", "com.tw", "com.hk", "com.sg", "co.za", "org.za", "com.tr", "com.ua",
];

/// Whether this zone belongs to a registry.  The root counts.
pub fn is_registrar(domain: &DomainName) -> bool {
    if domain.is_root() {
        return true;
    }

    let name = domain.to_dotted_string();
    let name = name.trim_end_matches('.');
    REGISTRAR_SUFFIXES.iter().any(|suffix| *suffix == name)
}

#[cfg(test)]
mod tests {
    use dns_types::protocol::types::test_util::*;
    use dns_types::protocol::types::DomainName;

    use super::*;

    #[test]
    fn root_is_registrar() {
        assert!(is_registrar(&DomainName::root_domain()));
    }

    #[test]
    fn tlds_are_registrars() {
        assert!(is_registrar(&domain("com.")));
        assert!(is_registrar(&domain("net.")));
        assert!(is_registrar(&domain("co.uk.")));
    }

    #[test]
    fn registered_domains_are_not() {
        assert!(!is_registrar(&domain("example.com.")));
        assert!(!is_registrar(&domain("example.co.uk.")));
    }
}
