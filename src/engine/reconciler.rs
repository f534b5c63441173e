use crate::engine::cache::ResponseCache;
use crate::engine::forwarder::ResolutionHook;
use crate::engine::nb_api::{FlowCommand, NbApiClient};
use crate::engine::rule::Rule;
use crate::engine::trie::UpdateHook;
use crate::shared::dns;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Glue between name-level policy and the forwarding plane. Registered
/// with the forwarder as the post-resolution callback and with the trie
/// as the directive-flip callback, it translates both kinds of events
/// into northbound controller commands.
pub struct PolicyReconciler {
    nb_client: Arc<NbApiClient>,
    cache: Arc<ResponseCache>,
}

impl PolicyReconciler {
    pub fn new(nb_client: Arc<NbApiClient>, cache: Arc<ResponseCache>) -> PolicyReconciler {
        PolicyReconciler { nb_client, cache }
    }
}

impl ResolutionHook for PolicyReconciler {
    /// Turn a resolved enforceable rule into the matching controller
    /// command. Events are not batched across dns transactions. Failures
    /// are logged and never reach the dns client.
    fn on_resolution(&self, rule: &Rule, ips: &[Ipv4Addr]) {
        let result = if let Some(nexthop) = rule.route {
            self.nb_client.route(nexthop, ips)
        } else if rule.block {
            self.nb_client.block(ips)
        } else {
            return;
        };
        match result {
            Ok(reply) => log::info!("Controller reply for '{}': {}", rule.domain, reply),
            Err(err) => log::error!("Controller command for '{}' failed: {}", rule.domain, err),
        }
    }
}

impl UpdateHook for PolicyReconciler {
    /// Reconcile the forwarding plane after a block<->route flip. If the
    /// domain has no live cache entry the rule was not actively enforced
    /// and there is nothing to converge.
    ///
    /// The two directions are asymmetric on purpose: a route installation
    /// supersedes block flows at the flow-table level, while going back to
    /// block must also withdraw the route explicitly, because kernel
    /// routes outlive flow rules.
    fn on_directive_flip(
        &self,
        domain: &str,
        old_action: &str,
        new_action: &str,
        _old_value: &str,
        new_value: &str,
    ) -> Result<(), String> {
        let key = (domain.to_string(), dns::RecordType::A);
        let cached = match self.cache.get(&key) {
            Some(cached) => cached,
            None => {
                log::debug!("No cached answer for '{}', nothing to reconcile.", domain);
                return Ok(());
            }
        };
        let response = dns::Message::decode(&cached)
            .map_err(|err| format!("undecodable cached response for '{}': {:?}", domain, err))?;
        let ips = response.a_records();

        let result = match (old_action, new_action) {
            ("block", "route") => {
                let nexthop: Ipv4Addr = new_value
                    .parse()
                    .map_err(|_| format!("invalid nexthop '{}' for '{}'", new_value, domain))?;
                self.nb_client.route(nexthop, &ips)
            }
            ("route", "block") => {
                let commands = [
                    FlowCommand {
                        kind: "flow".to_string(),
                        action: "block".to_string(),
                        ips: ips.clone(),
                        nexthop: None,
                    },
                    FlowCommand {
                        kind: "route".to_string(),
                        action: "remove".to_string(),
                        ips,
                        nexthop: None,
                    },
                ];
                self.nb_client.batch(&commands)
            }
            _ => return Ok(()),
        };

        match result {
            Ok(reply) => {
                log::info!("Reconciled '{}' {} -> {}: {}", domain, old_action, new_action, reply);
                Ok(())
            }
            Err(err) => Err(format!(
                "controller call failed for '{}' ({} -> {}): {}",
                domain, old_action, new_action, err
            )),
        }
    }
}
