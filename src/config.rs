//! Controller configuration, read once at startup from a TOML file.
//!
//! ```toml
//! listen = "127.0.0.1:6633"
//!
//! [load_balancer]
//! virtual_ip = "10.0.0.10"
//!
//! [[load_balancer.backends]]
//! ip = "10.0.0.5"
//! mac = "00:00:00:00:00:05"
//! port = 5
//! ```

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::packet::MacAddr;

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6633))
}

/// One real server behind the virtual service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Backend {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub port: u16,
}

/// A client whose MAC the controller answers with when a backend ARPs for it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ClientHost {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancerConfig {
    pub virtual_ip: Ipv4Addr,
    /// Backend the round-robin starts at; the first backend when absent.
    #[serde(default)]
    pub initial_backend: Option<Ipv4Addr>,
    pub backends: Vec<Backend>,
    #[serde(default)]
    pub clients: Vec<ClientHost>,
}

impl LoadBalancerConfig {
    /// Check the pool and return the index of the initial backend.
    pub fn validate(&self) -> Result<usize, ConfigError> {
        if self.backends.len() < 2 {
            return Err(ConfigError::TooFewBackends(self.backends.len()));
        }
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.ip) {
                return Err(ConfigError::DuplicateBackend(backend.ip));
            }
        }
        match self.initial_backend {
            None => Ok(0),
            Some(ip) => {
                self.backends
                    .iter()
                    .position(|b| b.ip == ip)
                    .ok_or(ConfigError::UnknownBackendReference(ip))
            }
        }
    }
}

/// Static admission rule of the policy switch.
///
/// A frame from `src` to any of `dst` is dropped, unless the rule carries
/// `valid_hours`, in which case it is forwarded only during those hours.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdmissionRule {
    pub src: MacAddr,
    pub dst: Vec<MacAddr>,
    #[serde(default)]
    pub valid_hours: Option<BTreeSet<u32>>,
}

impl AdmissionRule {
    pub fn matches(&self, src: MacAddr, dst: MacAddr) -> bool {
        self.src == src && self.dst.contains(&dst)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySwitchConfig {
    /// Age out learned MACs after this many seconds. Never ages when absent.
    #[serde(default)]
    pub mac_ttl_secs: Option<u64>,
    #[serde(default)]
    pub rules: Vec<AdmissionRule>,
}

impl PolicySwitchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for rule in &self.rules {
            if let Some(ref hours) = rule.valid_hours {
                if let Some(&bad) = hours.iter().find(|&&h| h > 23) {
                    return Err(ConfigError::InvalidHour(bad));
                }
            }
        }
        Ok(())
    }
}

/// The application a controller process runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppConfig {
    LoadBalancer(LoadBalancerConfig),
    PolicySwitch(PolicySwitchConfig),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_listen")]
    listen: SocketAddr,
    load_balancer: Option<LoadBalancerConfig>,
    policy_switch: Option<PolicySwitchConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub listen: SocketAddr,
    pub app: AppConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        fs::read_to_string(path)?.parse()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Config, ConfigError> {
        let raw: RawConfig = toml::from_str(s)?;
        let app = match (raw.load_balancer, raw.policy_switch) {
            (Some(lb), None) => {
                lb.validate()?;
                AppConfig::LoadBalancer(lb)
            }
            (None, Some(ps)) => {
                ps.validate()?;
                AppConfig::PolicySwitch(ps)
            }
            (None, None) => return Err(ConfigError::NoApplication),
            (Some(_), Some(_)) => return Err(ConfigError::BothApplications),
        };
        Ok(Config {
            listen: raw.listen,
            app: app,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LB: &str = r#"
        [load_balancer]
        virtual_ip = "10.0.0.10"

        [[load_balancer.backends]]
        ip = "10.0.0.5"
        mac = "00:00:00:00:00:05"
        port = 5

        [[load_balancer.backends]]
        ip = "10.0.0.6"
        mac = "00:00:00:00:00:06"
        port = 6

        [[load_balancer.clients]]
        ip = "10.0.0.1"
        mac = "00:00:00:00:00:01"
    "#;

    #[test]
    fn parses_load_balancer() {
        let config: Config = LB.parse().unwrap();
        assert_eq!(config.listen, default_listen());
        match config.app {
            AppConfig::LoadBalancer(lb) => {
                assert_eq!(lb.virtual_ip, Ipv4Addr::new(10, 0, 0, 10));
                assert_eq!(lb.backends.len(), 2);
                assert_eq!(lb.backends[1].mac, MacAddr([0, 0, 0, 0, 0, 6]));
                assert_eq!(lb.clients[0].ip, Ipv4Addr::new(10, 0, 0, 1));
                assert_eq!(lb.validate().unwrap(), 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn initial_backend_must_be_in_pool() {
        let text = LB.replace("virtual_ip = \"10.0.0.10\"",
                              "virtual_ip = \"10.0.0.10\"\ninitial_backend = \"10.0.0.7\"");
        match text.parse::<Config>() {
            Err(ConfigError::UnknownBackendReference(ip)) => {
                assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 7))
            }
            other => panic!("unexpected {:?}", other),
        }
        let text = LB.replace("virtual_ip = \"10.0.0.10\"",
                              "virtual_ip = \"10.0.0.10\"\ninitial_backend = \"10.0.0.6\"");
        match text.parse::<Config>().unwrap().app {
            AppConfig::LoadBalancer(lb) => assert_eq!(lb.validate().unwrap(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn pool_needs_two_distinct_backends() {
        let text = r#"
            [load_balancer]
            virtual_ip = "10.0.0.10"
            [[load_balancer.backends]]
            ip = "10.0.0.5"
            mac = "00:00:00:00:00:05"
            port = 5
        "#;
        match text.parse::<Config>() {
            Err(ConfigError::TooFewBackends(1)) => (),
            other => panic!("unexpected {:?}", other),
        }
        let dup = LB.replace("10.0.0.6", "10.0.0.5");
        match dup.parse::<Config>() {
            Err(ConfigError::DuplicateBackend(_)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_policy_switch() {
        let text = r#"
            listen = "0.0.0.0:6653"

            [policy_switch]
            [[policy_switch.rules]]
            src = "00:00:00:00:00:01"
            dst = ["00:00:00:00:00:19", "00:00:00:00:00:1a"]

            [[policy_switch.rules]]
            src = "00:00:00:00:00:02"
            dst = ["00:00:00:00:00:16"]
            valid_hours = [10, 14, 15]
        "#;
        let config: Config = text.parse().unwrap();
        assert_eq!(config.listen.port(), 6653);
        match config.app {
            AppConfig::PolicySwitch(ps) => {
                assert_eq!(ps.mac_ttl_secs, None);
                assert_eq!(ps.rules.len(), 2);
                assert_eq!(ps.rules[0].valid_hours, None);
                let hours = ps.rules[1].valid_hours.as_ref().unwrap();
                assert!(hours.contains(&14));
                assert!(!hours.contains(&9));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_bad_hours_and_macs() {
        let text = r#"
            [policy_switch]
            [[policy_switch.rules]]
            src = "00:00:00:00:00:02"
            dst = ["00:00:00:00:00:16"]
            valid_hours = [24]
        "#;
        match text.parse::<Config>() {
            Err(ConfigError::InvalidHour(24)) => (),
            other => panic!("unexpected {:?}", other),
        }
        let text = r#"
            [policy_switch]
            [[policy_switch.rules]]
            src = "00:00:00:00:02"
            dst = []
        "#;
        match text.parse::<Config>() {
            Err(ConfigError::Parse(_)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn exactly_one_app() {
        match "listen = \"127.0.0.1:6633\"".parse::<Config>() {
            Err(ConfigError::NoApplication) => (),
            other => panic!("unexpected {:?}", other),
        }
        let both = format!("{}\n[policy_switch]\n", LB);
        match both.parse::<Config>() {
            Err(ConfigError::BothApplications) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn exact_address_matching() {
        let rule = AdmissionRule {
            src: "00:00:00:00:00:01".parse().unwrap(),
            dst: vec!["00:00:00:00:00:19".parse().unwrap()],
            valid_hours: None,
        };
        assert!(rule.matches("00:00:00:00:00:01".parse().unwrap(),
                             "00:00:00:00:00:19".parse().unwrap()));
        assert!(!rule.matches("00:00:00:00:00:01".parse().unwrap(),
                              "00:00:00:00:00:1a".parse().unwrap()));
        assert!(!rule.matches("00:00:00:00:00:19".parse().unwrap(),
                              "00:00:00:00:00:01".parse().unwrap()));
    }
}
