use crate::engine::forwarder::Forwarder;
use crate::engine::rule::{Directive, Rule};
use crate::shared::dns;
use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Validated policy management operations over the live trie and cache.
/// This is the single entry point used by the REST surface: everything
/// reaching the trie from here has passed directive, domain and value
/// validation.
pub struct PolicyService {
    forwarder: Arc<Forwarder>,
}

#[derive(Debug)]
pub enum ServiceErr {
    InvalidDirective(String),
    InvalidDomain(String),
    InvalidValue(String),
}

impl Display for ServiceErr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ServiceErr::InvalidDirective(msg) => write!(f, "invalid directive: {}", msg),
            ServiceErr::InvalidDomain(msg) => write!(f, "invalid domain: {}", msg),
            ServiceErr::InvalidValue(msg) => write!(f, "invalid value: {}", msg),
        }
    }
}

impl PolicyService {
    pub fn new(forwarder: Arc<Forwarder>) -> PolicyService {
        PolicyService { forwarder }
    }

    /// All rules currently stored, in deterministic order.
    pub fn rules(&self) -> Vec<Rule> {
        self.forwarder.trie().flatten()
    }

    /// The rule applicable to the passed domain, wildcard resolution
    /// included.
    pub fn rule(&self, domain: &str) -> Option<Rule> {
        let domain = domain.to_ascii_lowercase();
        self.forwarder.trie().lookup(&domain).ok().flatten()
    }

    /// Validate and insert a rule built from a single directive. Address
    /// rules additionally install their pinned static cache entry.
    pub fn add_rule(&self, directive: &str, domain: &str, value: &str) -> Result<(), ServiceErr> {
        let directive = parse_directive(directive)?;
        let domain = validate_domain(domain)?;
        let rule = build_rule(directive, &domain, value)?;

        // Domain validation makes the insert infallible, but keep the
        // error mapping honest instead of unwrapping.
        self.forwarder
            .trie()
            .cow_insert(rule.clone())
            .map_err(|_| ServiceErr::InvalidDomain("empty domain".to_string()))?;

        if rule.address.is_some() {
            self.forwarder.pin_static_records(&[&rule]);
        }
        Ok(())
    }

    /// Remove a whole rule, or a single directive of it. On success the
    /// cached A answer for the domain is invalidated, so stale policy is
    /// not replayed from the cache. Returns false when nothing matched.
    pub fn remove_rule(&self, domain: &str, directive: Option<&str>) -> Result<bool, ServiceErr> {
        let directive = match directive {
            None => None,
            Some(directive) => Some(parse_directive(directive)?),
        };
        let domain = validate_domain(domain)?;

        let found = self
            .forwarder
            .trie()
            .cow_remove(&domain, directive)
            .map_err(|_| ServiceErr::InvalidDomain("empty domain".to_string()))?;
        if found {
            self.forwarder.cache().remove(&(domain, dns::RecordType::A));
        }
        Ok(found)
    }

    /// Drop the whole rule set and rebuild it from the passed rules in a
    /// single root swap.
    pub fn batch_build(&self, rules: &[Rule]) -> Result<(), ServiceErr> {
        for rule in rules {
            if let Err(err) = dns::validate_domain(&rule.domain, true) {
                let err_msg = format!("'{}': {}", rule.domain, err);
                return Err(ServiceErr::InvalidDomain(err_msg));
            }
            if rule.block && rule.route.is_some() {
                let err_msg = format!("'{}' carries both block and route", rule.domain);
                return Err(ServiceErr::InvalidValue(err_msg));
            }
        }
        self.forwarder.trie().rebuild(rules);
        Ok(())
    }

    /// Purge the trie and the dynamic part of the cache.
    pub fn purge(&self) {
        self.forwarder.trie().purge();
        self.forwarder.purge_cache();
    }
}

fn parse_directive(directive: &str) -> Result<Directive, ServiceErr> {
    Directive::parse(directive)
        .ok_or_else(|| ServiceErr::InvalidDirective(format!("'{}'", directive)))
}

fn validate_domain(domain: &str) -> Result<String, ServiceErr> {
    dns::validate_domain(domain, true)
        .map_err(|err| ServiceErr::InvalidDomain(format!("'{}': {}", domain, err)))?;
    Ok(domain.to_ascii_lowercase())
}

fn build_rule(directive: Directive, domain: &str, value: &str) -> Result<Rule, ServiceErr> {
    let mut rule = Rule::empty(domain);
    match directive {
        Directive::Block => {
            if !value.is_empty() {
                let err_msg = format!("block takes no value, got '{}'", value);
                return Err(ServiceErr::InvalidValue(err_msg));
            }
            rule.block = true;
        }
        Directive::Route => rule.route = Some(parse_ip(value)?),
        Directive::Server => rule.upstream = Some(vec![parse_ip(value)?]),
        Directive::Address => rule.address = Some(parse_ip(value)?),
    }
    rule.refresh_dbr();
    Ok(rule)
}

fn parse_ip(value: &str) -> Result<Ipv4Addr, ServiceErr> {
    value
        .parse()
        .map_err(|_| ServiceErr::InvalidValue(format!("'{}' is not an IPv4 address", value)))
}
