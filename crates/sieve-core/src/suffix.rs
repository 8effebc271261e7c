//! Registrable-domain heuristics.
//!
//! Party classification only needs to know whether two hosts share a
//! registrable domain (eTLD+1). A full Public Suffix List is overkill on
//! this path; a table of common two-part TLDs plus the last-two-labels
//! default covers the lists this engine is fed. Everything here is a
//! pure function of its inputs.

/// Common two-part TLDs not handled by the last-two-labels default.
const COMMON_TWO_PART_TLDS: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

/// Registrable domain (eTLD+1) of a hostname, as a sub-slice of it.
///
/// Hosts with a single label (or IP-ish inputs without dots) are
/// returned unchanged.
pub fn registrable_domain(host: &str) -> &str {
    let mut dots = [0usize; 2];
    let mut n = 0;
    for (i, b) in host.bytes().enumerate().rev() {
        if b == b'.' {
            dots[n] = i;
            n += 1;
            if n == 2 {
                break;
            }
        }
    }

    match n {
        0 => host,
        1 => host,
        _ => {
            let last_two = &host[dots[1] + 1..];
            if COMMON_TWO_PART_TLDS
                .iter()
                .any(|tld| tld.eq_ignore_ascii_case(last_two))
            {
                // Need three labels: back up one more dot if there is one.
                match host[..dots[1]].rfind('.') {
                    Some(i) => &host[i + 1..],
                    None => host,
                }
            } else {
                &host[dots[1] + 1..]
            }
        }
    }
}

/// A request is third-party when the request host and the initiator host
/// do not share a registrable domain.
pub fn is_third_party(request_host: &str, initiator_host: &str) -> bool {
    !registrable_domain(request_host).eq_ignore_ascii_case(registrable_domain(initiator_host))
}

/// Strip the leftmost label. `None` once the host is a bare TLD.
pub fn parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx + 1 < host.len() => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator over host suffixes from most specific down to the
/// registrable domain, inclusive.
pub struct SuffixIter<'a> {
    current: Option<&'a str>,
    stop_len: usize,
}

impl<'a> Iterator for SuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = match parent_domain(current) {
            Some(parent) if parent.len() >= self.stop_len => Some(parent),
            _ => None,
        };
        Some(current)
    }
}

/// Walk `host`, then each parent, ending at the registrable domain.
pub fn suffixes(host: &str) -> SuffixIter<'_> {
    SuffixIter {
        current: if host.is_empty() { None } else { Some(host) },
        stop_len: registrable_domain(host).len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registrable_domain_basic() {
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("sub.example.com"), "example.com");
        assert_eq!(registrable_domain("a.b.example.com"), "example.com");
        assert_eq!(registrable_domain("localhost"), "localhost");
    }

    #[test]
    fn registrable_domain_two_part_tld() {
        assert_eq!(registrable_domain("sub.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("example.co.uk"), "example.co.uk");
    }

    #[test]
    fn party_classification() {
        assert!(!is_third_party("cdn.example.com", "www.example.com"));
        assert!(is_third_party("ads.tracker.net", "www.example.com"));
        assert!(!is_third_party("example.com", "example.com"));
    }

    #[test]
    fn party_classification_two_part_tld() {
        // distinct registrants under a shared two-part TLD are third-party
        assert!(is_third_party("ads.tracker.co.uk", "www.example.co.uk"));
        assert!(!is_third_party("cdn.example.co.uk", "www.example.co.uk"));
    }

    #[test]
    fn suffix_walk_stops_at_registrable() {
        let all: Vec<&str> = suffixes("a.b.example.com").collect();
        assert_eq!(all, vec!["a.b.example.com", "b.example.com", "example.com"]);
    }

    #[test]
    fn suffix_walk_single_label() {
        let all: Vec<&str> = suffixes("localhost").collect();
        assert_eq!(all, vec!["localhost"]);
    }
}
