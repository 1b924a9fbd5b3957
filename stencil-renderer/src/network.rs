//! Template functions that report the host's own addresses.
//!
//! | Function                          | Returns                                          |
//! |-----------------------------------|--------------------------------------------------|
//! | `ip_addresses(preference, ver)`   | one global unicast address per interface         |
//! | `ip_address(preference, ver, n)`  | the address of the `n`-th matching interface     |
//! | `any_ip_address()`                | `ip_address("prefer", "ipv4", 0)`                |
//!
//! `preference` is `require` (only interfaces with an address of version
//! `ver`) or `prefer` (fall back to the other version). `ver` is `ipv4` or
//! `ipv6`.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use minijinja::{Environment, Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    Require,
    Prefer,
}

impl FromStr for Preference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "require" => Ok(Preference::Require),
            "prefer" => Ok(Preference::Prefer),
            other => Err(format!(
                "preference argument must be one of [require, prefer], but was: {other}"
            )),
        }
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Preference::Require => "require",
            Preference::Prefer => "prefer",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    fn of(ip: &IpAddr) -> Self {
        match ip.to_canonical() {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

impl FromStr for IpVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipv4" => Ok(IpVersion::V4),
            "ipv6" => Ok(IpVersion::V6),
            other => Err(format!(
                "IP version argument must be one of [ipv4, ipv6], but was: {other}"
            )),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IpVersion::V4 => "ipv4",
            IpVersion::V6 => "ipv6",
        })
    }
}

/// Routable unicast: not unspecified, loopback, multicast, broadcast or
/// link-local. Private ranges count.
pub fn is_global_unicast(ip: &IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_link_local())
        }
        IpAddr::V6(v6) => {
            !(v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                || (v6.segments()[0] & 0xffc0) == 0xfe80)
        }
    }
}

/// Pick at most one address per interface from `(interface, address)`
/// pairs, keeping interface order. An interface contributes its first
/// global unicast address of `version`, or with `Prefer`, its first global
/// unicast address of any version.
pub fn select_addresses(
    addrs: &[(String, IpAddr)],
    preference: Preference,
    version: IpVersion,
) -> Vec<IpAddr> {
    let mut interfaces: Vec<&str> = Vec::new();
    for (name, _) in addrs {
        if !interfaces.contains(&name.as_str()) {
            interfaces.push(name);
        }
    }

    let mut selected = Vec::new();
    for iface in interfaces {
        let mut found: Option<IpAddr> = None;
        for (_, ip) in addrs.iter().filter(|(name, _)| name == iface) {
            if !is_global_unicast(ip) {
                continue;
            }
            if found.map_or(true, |f| IpVersion::of(&f) != version) {
                found = Some(*ip);
            }
            if found.is_some_and(|f| IpVersion::of(&f) == version) {
                break;
            }
        }
        if let Some(ip) = found {
            if preference == Preference::Prefer || IpVersion::of(&ip) == version {
                selected.push(ip);
            }
        }
    }
    selected
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, msg.into())
}

fn parse_args(preference: &str, version: &str) -> Result<(Preference, IpVersion), Error> {
    Ok((
        preference.parse().map_err(invalid)?,
        version.parse().map_err(invalid)?,
    ))
}

fn host_addresses(preference: Preference, version: IpVersion) -> Result<Vec<IpAddr>, Error> {
    let interfaces = if_addrs::get_if_addrs()
        .map_err(|e| invalid(format!("could not list network interfaces: {e}")))?;
    let pairs: Vec<(String, IpAddr)> = interfaces
        .into_iter()
        .map(|iface| {
            let ip = iface.ip();
            (iface.name, ip)
        })
        .collect();
    Ok(select_addresses(&pairs, preference, version))
}

fn nth_address(
    addresses: &[IpAddr],
    preference: Preference,
    version: IpVersion,
    iface: usize,
) -> Result<String, Error> {
    addresses.get(iface).map(IpAddr::to_string).ok_or_else(|| {
        invalid(format!(
            "less than {} interfaces are available with a global unicast address matching '{preference} {version}'",
            iface + 1
        ))
    })
}

pub fn ip_addresses(preference: String, version: String) -> Result<Vec<String>, Error> {
    let (preference, version) = parse_args(&preference, &version)?;
    Ok(host_addresses(preference, version)?
        .iter()
        .map(IpAddr::to_string)
        .collect())
}

pub fn ip_address(preference: String, version: String, iface: Option<usize>) -> Result<String, Error> {
    let (preference, version) = parse_args(&preference, &version)?;
    let addresses = host_addresses(preference, version)?;
    nth_address(&addresses, preference, version, iface.unwrap_or(0))
}

pub fn any_ip_address() -> Result<String, Error> {
    ip_address("prefer".to_string(), "ipv4".to_string(), Some(0))
}

pub fn register_network_functions(env: &mut Environment<'static>) {
    env.add_function("ip_addresses", ip_addresses);
    env.add_function("ip_address", ip_address);
    env.add_function("any_ip_address", any_ip_address);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, IpAddr)> {
        list.iter()
            .map(|(name, ip)| (name.to_string(), ip.parse().expect("ip")))
            .collect()
    }

    fn ips(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|ip| ip.parse().expect("ip")).collect()
    }

    #[rstest]
    #[case("127.0.0.1", false)]
    #[case("0.0.0.0", false)]
    #[case("169.254.1.1", false)]
    #[case("224.0.0.1", false)]
    #[case("255.255.255.255", false)]
    #[case("10.0.0.5", true)]
    #[case("::1", false)]
    #[case("fe80::1", false)]
    #[case("2001:db8::1", true)]
    #[case("::ffff:127.0.0.1", false)]
    fn global_unicast(#[case] ip: &str, #[case] expected: bool) {
        assert_eq!(is_global_unicast(&ip.parse().expect("ip")), expected);
    }

    #[test]
    fn require_keeps_only_matching_interfaces() {
        let addrs = pairs(&[
            ("lo", "127.0.0.1"),
            ("eth0", "fe80::1"),
            ("eth0", "10.0.0.5"),
            ("eth1", "2001:db8::2"),
        ]);
        assert_eq!(
            select_addresses(&addrs, Preference::Require, IpVersion::V4),
            ips(&["10.0.0.5"])
        );
        assert_eq!(
            select_addresses(&addrs, Preference::Require, IpVersion::V6),
            ips(&["2001:db8::2"])
        );
    }

    #[test]
    fn prefer_falls_back_to_other_version() {
        let addrs = pairs(&[
            ("eth0", "2001:db8::1"),
            ("eth0", "10.0.0.5"),
            ("eth1", "2001:db8::2"),
        ]);
        assert_eq!(
            select_addresses(&addrs, Preference::Prefer, IpVersion::V4),
            ips(&["10.0.0.5", "2001:db8::2"])
        );
    }

    #[test]
    fn arguments_are_validated() {
        let err = ip_addresses("maybe".into(), "ipv4".into()).unwrap_err();
        assert!(err
            .to_string()
            .contains("preference argument must be one of [require, prefer], but was: maybe"));
        let err = ip_address("prefer".into(), "ipv5".into(), None).unwrap_err();
        assert!(err
            .to_string()
            .contains("IP version argument must be one of [ipv4, ipv6], but was: ipv5"));
    }

    #[test]
    fn interface_index_out_of_range() {
        let addresses = ips(&["10.0.0.5"]);
        assert_eq!(
            nth_address(&addresses, Preference::Require, IpVersion::V4, 0).expect("first"),
            "10.0.0.5"
        );
        let err = nth_address(&addresses, Preference::Require, IpVersion::V4, 1).unwrap_err();
        assert!(err
            .to_string()
            .contains("less than 2 interfaces are available with a global unicast address matching 'require ipv4'"));
    }

    #[test]
    fn functions_are_callable_from_templates() {
        let mut env = Environment::new();
        register_network_functions(&mut env);
        let out = env
            .render_str("{{ ip_addresses('require', 'ipv4') is sequence }}", ())
            .expect("render");
        assert_eq!(out, "true");
        let err = env
            .render_str("{{ ip_address('always', 'ipv4') }}", ())
            .unwrap_err();
        assert!(err.to_string().contains("preference argument"));
    }
}
