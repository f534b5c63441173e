use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// The action dimensions a rule may carry. `Block` and `Route` are the
/// enforcement pair and are mutually exclusive inside a stored rule;
/// `Server` and `Address` may coexist with either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Block,
    Route,
    Server,
    Address,
}

impl Directive {
    pub fn parse(s: &str) -> Option<Directive> {
        match s {
            "block" => Some(Directive::Block),
            "route" => Some(Directive::Route),
            "server" => Some(Directive::Server),
            "address" => Some(Directive::Address),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::Block => "block",
            Directive::Route => "route",
            Directive::Server => "server",
            Directive::Address => "address",
        }
    }
}

/// Policy for a single domain pattern. The pattern is either a full name
/// (`apple.com`) or a wildcard (`*.apple.com`). Absent directives are
/// omitted from the serialized form, so rules read (and round-trip) as
/// compact JSON objects like `{"domain":"x.com","block":true,"dbr":true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub domain: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub block: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Vec<Ipv4Addr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dbr: bool,
}

fn is_false(b: &bool) -> bool {
    !b
}

impl Rule {
    /// A rule carrying no directives for the passed domain.
    pub fn empty(domain: &str) -> Rule {
        Rule {
            domain: domain.to_string(),
            block: false,
            route: None,
            upstream: None,
            address: None,
            dbr: false,
        }
    }

    /// Reports whether any directive is present. A rule without directives
    /// has no reason to stay in the policy store.
    pub fn has_directives(&self) -> bool {
        self.block || self.route.is_some() || self.upstream.is_some() || self.address.is_some()
    }

    /// Recompute the decide-by-resolution marker: post-resolution
    /// enforcement is needed exactly for block and route rules.
    pub fn refresh_dbr(&mut self) {
        self.dbr = self.block || self.route.is_some();
    }

    /// Merge the directives of `newer` into this rule, later keys winning.
    /// The block/route exclusivity is maintained here: a newer `route`
    /// clears an existing `block` and vice versa. Callers interested in
    /// those flips (to reconcile the forwarding plane) must detect them
    /// before merging.
    pub fn merge_from(&mut self, newer: &Rule) {
        if newer.block {
            self.block = true;
            self.route = None;
        }
        if let Some(nexthop) = newer.route {
            self.route = Some(nexthop);
            self.block = false;
        }
        if let Some(upstream) = &newer.upstream {
            self.upstream = Some(upstream.clone());
        }
        if let Some(address) = newer.address {
            self.address = Some(address);
        }
        self.refresh_dbr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_later_wins() {
        let mut rule = Rule {
            upstream: Some(vec![Ipv4Addr::new(1, 1, 1, 1)]),
            ..Rule::empty("x.com")
        };
        let mut newer = Rule::empty("x.com");
        newer.upstream = Some(vec![Ipv4Addr::new(9, 9, 9, 9)]);
        newer.address = Some(Ipv4Addr::new(10, 0, 0, 1));
        rule.merge_from(&newer);
        assert_eq!(rule.upstream, Some(vec![Ipv4Addr::new(9, 9, 9, 9)]));
        assert_eq!(rule.address, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!rule.dbr);
    }

    #[test]
    fn test_merge_keeps_exclusivity() {
        let mut rule = Rule {
            block: true,
            ..Rule::empty("x.com")
        };
        rule.refresh_dbr();
        let mut newer = Rule::empty("x.com");
        newer.route = Some(Ipv4Addr::new(10, 0, 0, 1));
        newer.refresh_dbr();
        rule.merge_from(&newer);
        assert!(!rule.block);
        assert_eq!(rule.route, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(rule.dbr);

        let mut back = Rule::empty("x.com");
        back.block = true;
        back.refresh_dbr();
        rule.merge_from(&back);
        assert!(rule.block);
        assert_eq!(rule.route, None);
        assert!(rule.dbr);
    }

    #[test]
    fn test_serialized_form_omits_absent_directives() {
        let mut rule = Rule::empty("ads.example.com");
        rule.block = true;
        rule.refresh_dbr();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"domain": "ads.example.com", "block": true, "dbr": true})
        );
        let back: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }
}
