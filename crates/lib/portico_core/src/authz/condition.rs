//! Typed permission and policy conditions.
//!
//! Stored permissions carry a string map; it is parsed into [`Condition`]
//! values before evaluation. Unknown keys become `Unrecognized` and never
//! block.

use std::collections::HashMap;

use chrono::{Timelike, Utc};
use tracing::warn;

use crate::models::authz::AuthorizationContext;

const BUSINESS_HOURS_START: u32 = 8;
const BUSINESS_HOURS_END: u32 = 18;

/// Prefix for claim-equality condition keys, e.g. `claim:department`.
pub const CLAIM_PREFIX: &str = "claim:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    /// 08:00 to 18:00.
    BusinessHours,
}

impl TimeWindow {
    fn contains(&self, hour: u32) -> bool {
        match self {
            Self::BusinessHours => (BUSINESS_HOURS_START..BUSINESS_HOURS_END).contains(&hour),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    TimeOfDay(TimeWindow),
    /// `a.b.c.d/n` (n a multiple of 8) or a bare string prefix.
    IpRange(String),
    RequiredClaim { key: String, value: String },
    Unrecognized { key: String, value: String },
}

impl Condition {
    pub fn parse(key: &str, value: &str) -> Self {
        match (key, value.trim()) {
            ("timeOfDay", "business_hours") => Self::TimeOfDay(TimeWindow::BusinessHours),
            ("ipRange", range) => Self::IpRange(range.to_string()),
            (k, v) if k.starts_with(CLAIM_PREFIX) => Self::RequiredClaim {
                key: k[CLAIM_PREFIX.len()..].to_string(),
                value: v.to_string(),
            },
            (k, v) => Self::Unrecognized {
                key: k.to_string(),
                value: v.to_string(),
            },
        }
    }

    pub fn parse_map(map: &HashMap<String, String>) -> Vec<Self> {
        map.iter().map(|(k, v)| Self::parse(k, v)).collect()
    }

    pub fn evaluate(&self, ctx: &AuthorizationContext) -> bool {
        match self {
            Self::TimeOfDay(window) => {
                let hour = ctx.current_hour.unwrap_or_else(|| Utc::now().hour());
                window.contains(hour)
            }
            Self::IpRange(range) => match ctx.ip_address.as_deref() {
                Some(ip) => ip_in_range(ip, range),
                None => false,
            },
            Self::RequiredClaim { key, value } => ctx.claims.get(key) == Some(value),
            Self::Unrecognized { key, value } => {
                warn!(key = %key, value = %value, "ignoring unrecognized authorization condition");
                true
            }
        }
    }
}

/// Every condition in the map must pass.
pub fn all_pass(map: &HashMap<String, String>, ctx: &AuthorizationContext) -> bool {
    Condition::parse_map(map).iter().all(|c| c.evaluate(ctx))
}

fn ip_in_range(ip: &str, range: &str) -> bool {
    let Some((network, bits)) = range.split_once('/') else {
        return ip.starts_with(range);
    };
    let bits: usize = match bits.trim().parse() {
        Ok(b) if b <= 32 && b % 8 == 0 => b,
        _ => {
            warn!(range = %range, "unsupported ipRange prefix length");
            return false;
        }
    };
    let octets = bits / 8;
    let net: Vec<&str> = network.trim().split('.').collect();
    let addr: Vec<&str> = ip.trim().split('.').collect();
    if net.len() != 4 || addr.len() != 4 {
        return false;
    }
    net[..octets] == addr[..octets]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_hours_bounds() {
        let cond = Condition::parse("timeOfDay", "business_hours");
        let at = |h| AuthorizationContext::default().with_hour(h);
        assert!(!cond.evaluate(&at(7)));
        assert!(cond.evaluate(&at(8)));
        assert!(cond.evaluate(&at(17)));
        assert!(!cond.evaluate(&at(18)));
    }

    #[test]
    fn cidr_compares_leading_octets() {
        let cond = Condition::parse("ipRange", "10.1.0.0/16");
        assert!(cond.evaluate(&AuthorizationContext::default().with_ip("10.1.200.3")));
        assert!(!cond.evaluate(&AuthorizationContext::default().with_ip("10.2.0.1")));
        assert!(!cond.evaluate(&AuthorizationContext::default()));
    }

    #[test]
    fn bare_prefix_is_string_prefix() {
        let cond = Condition::parse("ipRange", "192.168.");
        assert!(cond.evaluate(&AuthorizationContext::default().with_ip("192.168.1.1")));
    }

    #[test]
    fn odd_prefix_lengths_fail_closed() {
        let cond = Condition::parse("ipRange", "10.0.0.0/12");
        assert!(!cond.evaluate(&AuthorizationContext::default().with_ip("10.0.0.1")));
    }

    #[test]
    fn unknown_keys_do_not_block() {
        let cond = Condition::parse("moonPhase", "full");
        assert!(matches!(cond, Condition::Unrecognized { .. }));
        assert!(cond.evaluate(&AuthorizationContext::default()));
    }

    #[test]
    fn claim_conditions_compare_values() {
        let cond = Condition::parse("claim:department", "finance");
        let ctx = AuthorizationContext::default().with_claim("department", "finance");
        assert!(cond.evaluate(&ctx));
        assert!(!cond.evaluate(&AuthorizationContext::default()));
    }
}
