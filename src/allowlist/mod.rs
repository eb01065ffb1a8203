//! IP allowlist engine — parser and longest-prefix matcher for mixed
//! IPv4/IPv6 CIDR lists.
//!
//! Parsing is all-or-nothing: a single malformed token rejects the whole
//! list, with every offending token reported. Matching is "any entry wins".

use thiserror::Error;

/// A parsed network with host bits beyond the prefix zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    V4 { bytes: [u8; 4], prefix: u8 },
    V6 { bytes: [u8; 16], prefix: u8 },
}

impl Network {
    pub fn prefix(&self) -> u8 {
        match self {
            Network::V4 { prefix, .. } | Network::V6 { prefix, .. } => *prefix,
        }
    }
}

/// One allowlist entry: the raw token as configured plus its network form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistEntry {
    pub raw: String,
    pub network: Network,
}

/// Every token that failed to parse, reported together so the operator can
/// fix the whole list in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid allowlist entries: {}", invalid.join(", "))]
pub struct AllowlistParseError {
    pub invalid: Vec<String>,
}

/// An ordered list of parsed CIDR entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAllowlist {
    entries: Vec<AllowlistEntry>,
}

impl IpAllowlist {
    /// Parse a comma-separated list of IPs and CIDRs.
    ///
    /// Whitespace around tokens is ignored and empty tokens are skipped, so
    /// `""` parses to an empty list (the caller decides what that means).
    pub fn parse(raw: &str) -> Result<Self, AllowlistParseError> {
        let mut entries = Vec::new();
        let mut invalid = Vec::new();

        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match parse_entry(token) {
                Some(network) => entries.push(AllowlistEntry {
                    raw: token.to_string(),
                    network,
                }),
                None => invalid.push(token.to_string()),
            }
        }

        if invalid.is_empty() {
            Ok(Self { entries })
        } else {
            Err(AllowlistParseError { invalid })
        }
    }

    pub fn entries(&self) -> &[AllowlistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `ip` falls inside any entry. A string that does not parse as
    /// an address never matches.
    pub fn matches(&self, ip: &str) -> bool {
        let Some(addr) = parse_address(ip) else {
            return false;
        };
        self.entries
            .iter()
            .any(|entry| network_contains(entry.network, addr))
    }
}

/// A fully-specified address, normalized the same way entries are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Address {
    V4([u8; 4]),
    V6([u8; 16]),
}

/// Strip surrounding brackets and any IPv6 zone index.
fn normalize_literal(token: &str) -> &str {
    let token = token
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(token);
    token.split('%').next().unwrap_or(token)
}

fn v4_mapped(octets: [u8; 16]) -> Option<[u8; 4]> {
    if octets[..10].iter().all(|&b| b == 0) && octets[10] == 0xff && octets[11] == 0xff {
        Some([octets[12], octets[13], octets[14], octets[15]])
    } else {
        None
    }
}

/// Parse one token into a masked network.
///
/// A v4-mapped literal with prefix ≥ 96 (or none) is normalized into the
/// 32-bit space (`::ffff:127.0.0.1/104` ≡ `127.0.0.0/8`); mapped literals
/// with shorter prefixes stay v6. Queried addresses are normalized the same
/// way, keeping matching internally consistent.
fn parse_entry(token: &str) -> Option<Network> {
    let token = normalize_literal(token);

    let (addr_part, prefix_part) = match token.split_once('/') {
        Some((addr, prefix)) => {
            // At most one '/'.
            if prefix.contains('/') {
                return None;
            }
            (addr, Some(prefix))
        }
        None => (token, None),
    };

    let prefix: Option<u8> = match prefix_part {
        Some(p) => {
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            Some(p.parse().ok()?)
        }
        None => None,
    };

    if let Ok(v4) = addr_part.parse::<std::net::Ipv4Addr>() {
        let prefix = prefix.unwrap_or(32);
        if prefix > 32 {
            return None;
        }
        let mut bytes = v4.octets();
        mask_host_bits(&mut bytes, prefix);
        return Some(Network::V4 { bytes, prefix });
    }

    let v6 = addr_part.parse::<std::net::Ipv6Addr>().ok()?;
    let prefix = prefix.unwrap_or(128);
    if prefix > 128 {
        return None;
    }

    if let Some(v4) = v4_mapped(v6.octets()) {
        if prefix >= 96 {
            let prefix = prefix - 96;
            let mut bytes = v4;
            mask_host_bits(&mut bytes, prefix);
            return Some(Network::V4 { bytes, prefix });
        }
    }

    let mut bytes = v6.octets();
    mask_host_bits(&mut bytes, prefix);
    Some(Network::V6 { bytes, prefix })
}

/// Parse a bare address (no prefix allowed), normalized like entries.
fn parse_address(ip: &str) -> Option<Address> {
    let ip = normalize_literal(ip.trim());
    if ip.contains('/') {
        return None;
    }
    if let Ok(v4) = ip.parse::<std::net::Ipv4Addr>() {
        return Some(Address::V4(v4.octets()));
    }
    let v6 = ip.parse::<std::net::Ipv6Addr>().ok()?;
    if let Some(v4) = v4_mapped(v6.octets()) {
        return Some(Address::V4(v4));
    }
    Some(Address::V6(v6.octets()))
}

/// Zero host bits beyond `prefix`.
fn mask_host_bits(bytes: &mut [u8], prefix: u8) {
    let full = usize::from(prefix / 8);
    let rem = prefix % 8;
    for (i, byte) in bytes.iter_mut().enumerate() {
        if i < full {
            continue;
        }
        if i == full && rem != 0 {
            *byte &= 0xffu8 << (8 - rem);
        } else {
            *byte = 0;
        }
    }
}

/// Byte-wise prefix comparison: full bytes first, then a masked partial byte
/// when the prefix is not byte-aligned.
fn prefix_matches(net: &[u8], addr: &[u8], prefix: u8) -> bool {
    let full = usize::from(prefix / 8);
    let rem = prefix % 8;
    if net[..full] != addr[..full] {
        return false;
    }
    if rem == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rem);
    (net[full] & mask) == (addr[full] & mask)
}

fn network_contains(network: Network, addr: Address) -> bool {
    match (network, addr) {
        (Network::V4 { bytes, prefix }, Address::V4(a)) => prefix_matches(&bytes, &a, prefix),
        (Network::V6 { bytes, prefix }, Address::V6(a)) => prefix_matches(&bytes, &a, prefix),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parsing ──────────────────────────────────────────────

    #[test]
    fn empty_input_yields_empty_list() {
        let list = IpAllowlist::parse("").unwrap();
        assert!(list.is_empty());
        let list = IpAllowlist::parse(" , , ").unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn parses_mixed_v4_v6_entries() {
        let list = IpAllowlist::parse("203.0.113.10, 198.51.100.0/24, 2001:db8::/32, ::1").unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(
            list.entries()[1].network,
            Network::V4 {
                bytes: [198, 51, 100, 0],
                prefix: 24
            }
        );
        assert_eq!(list.entries()[0].raw, "203.0.113.10");
    }

    #[test]
    fn bare_address_gets_full_prefix() {
        let list = IpAllowlist::parse("10.1.2.3").unwrap();
        assert_eq!(list.entries()[0].network.prefix(), 32);
        let list = IpAllowlist::parse("2001:db8::1").unwrap();
        assert_eq!(list.entries()[0].network.prefix(), 128);
    }

    #[test]
    fn host_bits_are_zeroed() {
        let list = IpAllowlist::parse("192.168.1.77/20").unwrap();
        assert_eq!(
            list.entries()[0].network,
            Network::V4 {
                bytes: [192, 168, 0, 0],
                prefix: 20
            }
        );
    }

    #[test]
    fn out_of_range_prefix_rejected_with_token() {
        let err = IpAllowlist::parse("1.2.3.4/33").unwrap_err();
        assert_eq!(err.invalid, vec!["1.2.3.4/33"]);
        let err = IpAllowlist::parse("2001:db8::/129").unwrap_err();
        assert_eq!(err.invalid, vec!["2001:db8::/129"]);
    }

    #[test]
    fn one_bad_token_rejects_whole_list() {
        let err = IpAllowlist::parse("10.0.0.1, not-an-ip, 10.0.0.2, 999.1.1.1").unwrap_err();
        assert_eq!(err.invalid, vec!["not-an-ip", "999.1.1.1"]);
        assert!(err.to_string().contains("not-an-ip"));
    }

    #[test]
    fn rejects_malformed_prefix_forms() {
        assert!(IpAllowlist::parse("10.0.0.0//8").is_err());
        assert!(IpAllowlist::parse("10.0.0.0/").is_err());
        assert!(IpAllowlist::parse("10.0.0.0/ 8").is_err());
        assert!(IpAllowlist::parse("10.0.0.0/-8").is_err());
        assert!(IpAllowlist::parse("10.0.0.0/8/24").is_err());
    }

    #[test]
    fn strips_brackets_and_zone_index() {
        let list = IpAllowlist::parse("[::1], fe80::1%eth0").unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.matches("::1"));
        assert!(list.matches("fe80::1"));
    }

    #[test]
    fn v4_mapped_normalizes_into_v4_space() {
        // /104 in the mapped space is /8 in the v4 space.
        let list = IpAllowlist::parse("::ffff:127.0.0.1/104").unwrap();
        assert_eq!(
            list.entries()[0].network,
            Network::V4 {
                bytes: [127, 0, 0, 0],
                prefix: 8
            }
        );
        assert!(list.matches("127.0.0.1"));
        assert!(list.matches("127.255.0.9"));
        assert!(list.matches("::ffff:127.1.2.3"));
        assert!(!list.matches("128.0.0.1"));
    }

    #[test]
    fn v4_mapped_with_short_prefix_stays_v6() {
        let list = IpAllowlist::parse("::ffff:0.0.0.0/80").unwrap();
        assert!(matches!(
            list.entries()[0].network,
            Network::V6 { prefix: 80, .. }
        ));
    }

    // ── matching ─────────────────────────────────────────────

    #[test]
    fn member_addresses_match_and_others_do_not() {
        let list = IpAllowlist::parse("203.0.113.10,198.51.100.0/24").unwrap();
        assert!(list.matches("203.0.113.10"));
        assert!(list.matches("198.51.100.200"));
        assert!(!list.matches("203.0.113.11"));
        assert!(!list.matches("198.51.101.1"));
    }

    #[test]
    fn partial_byte_prefix_boundaries() {
        let list = IpAllowlist::parse("10.16.0.0/12").unwrap();
        assert!(list.matches("10.16.0.1"));
        assert!(list.matches("10.31.255.255"));
        assert!(!list.matches("10.32.0.0"));
        assert!(!list.matches("10.15.255.255"));
    }

    #[test]
    fn v6_prefix_matching() {
        let list = IpAllowlist::parse("2001:db8:abcd::/48").unwrap();
        assert!(list.matches("2001:db8:abcd::1"));
        assert!(list.matches("2001:db8:abcd:ffff::2"));
        assert!(!list.matches("2001:db8:abce::1"));
    }

    #[test]
    fn zero_prefix_matches_everything_in_version() {
        let list = IpAllowlist::parse("0.0.0.0/0").unwrap();
        assert!(list.matches("8.8.8.8"));
        assert!(list.matches("192.0.2.1"));
        // Version equality is still required.
        assert!(!list.matches("2001:db8::1"));
    }

    #[test]
    fn unparseable_query_never_matches() {
        let list = IpAllowlist::parse("0.0.0.0/0, ::/0").unwrap();
        assert!(!list.matches("example.com"));
        assert!(!list.matches(""));
        assert!(!list.matches("10.0.0.0/8"));
    }

    #[test]
    fn empty_list_matches_nothing() {
        let list = IpAllowlist::parse("").unwrap();
        assert!(!list.matches("127.0.0.1"));
    }
}
