use crate::engine::cache::{CacheKey, ResponseCache, PINNED_TTL};
use crate::engine::rule::Rule;
use crate::engine::trie::DomainTrie;
use crate::engine::upstream::{self, UpstreamErr, UpstreamParams};
use crate::shared::dns;
use crate::shared::net::{PacketHandler, WireSink};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

/// Callback invoked after a resolution matching a rule with the
/// decide-by-resolution marker: the matched rule plus the addresses it
/// resolved to, ready to be turned into forwarding-plane commands.
/// Failures stay inside the implementor, the dns data path never blocks
/// on control-plane outcomes.
pub trait ResolutionHook: Send + Sync {
    fn on_resolution(&self, rule: &Rule, ips: &[Ipv4Addr]);
}

/// Static ttl used for the answers synthesized from `address` rules.
const STATIC_RECORD_TTL: u32 = 3600;

/// The dns forwarder: answers queries from the response cache or by
/// relaying them to upstream resolvers, applying the policy rules looked
/// up in the domain trie. Rules marked decide-by-resolution additionally
/// feed the resolved addresses to the registered [`ResolutionHook`].
pub struct Forwarder {
    trie: Arc<DomainTrie>,
    cache: Arc<ResponseCache>,
    upstreams: Vec<Ipv4Addr>,
    upstream_params: UpstreamParams,
    hook: Mutex<Option<Arc<dyn ResolutionHook>>>,
}

impl PacketHandler for Forwarder {
    fn handle_packet(&self, wire: &[u8], sink: &mut dyn WireSink) {
        self.handle_query(wire, sink);
    }
}

impl Forwarder {
    pub fn new(
        trie: Arc<DomainTrie>,
        cache: Arc<ResponseCache>,
        upstreams: Vec<Ipv4Addr>,
        upstream_params: UpstreamParams,
    ) -> Forwarder {
        Forwarder {
            trie,
            cache,
            upstreams,
            upstream_params,
            hook: Mutex::new(None),
        }
    }

    /// Register the callback fired on resolutions of enforceable rules.
    pub fn set_resolution_hook(&self, hook: Arc<dyn ResolutionHook>) {
        *self.hook.lock().unwrap() = Some(hook);
    }

    pub fn trie(&self) -> &Arc<DomainTrie> {
        &self.trie
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Serve a single dns query. Malformed datagrams are dropped without
    /// a reply. See the per-step comments for the policy decisions.
    pub fn handle_query(&self, wire: &[u8], sink: &mut dyn WireSink) {
        let query = match dns::Message::decode(wire) {
            Ok(query) => query,
            Err(err) => {
                log::debug!("Dropping undecodable datagram: {:?}", err);
                return;
            }
        };
        if query.header.response {
            log::debug!("[{}] Dropping datagram with response flag set.", query.id());
            return;
        }
        let question = match query.questions.first() {
            Some(question) => question,
            None => {
                log::debug!("[{}] Dropping query without questions.", query.id());
                return;
            }
        };
        let qname = question.name.to_string();
        let qtype = question.qtype;
        if qname.is_empty() {
            log::debug!("[{}] Dropping query for the root name.", query.id());
            return;
        }
        log::info!("[{}] Query for '{}', type {}.", query.id(), qname, qtype);

        let rule = match self.trie.lookup(&qname) {
            Ok(rule) => rule.unwrap_or_else(|| Rule::empty(&qname)),
            Err(_) => return,
        };
        log::debug!("[{}] Matched rule: {:?}", query.id(), rule);

        // IPv6 resolution is suppressed on this engine: AAAA queries get
        // an empty NOERROR answer and never reach the upstreams.
        if qtype == dns::RecordType::AAAA {
            log::info!("[{}] AAAA query for '{}', answering empty.", query.id(), qname);
            let response = dns::Message::response_to(&query, dns::RespCode::NoError);
            reply_message(sink, &response);
            return;
        }

        // Cached responses are replayed under the query id. A blocked
        // domain falls through even on a hit: the client still gets
        // NXDOMAIN and the drop rules are refreshed from a new resolution.
        let cache_key: CacheKey = (qname.clone(), qtype);
        if let Some(mut cached) = self.cache.get(&cache_key) {
            if !rule.block {
                log::info!("[{}] Cache hit for '{}'.", query.id(), qname);
                dns::patch_id(&mut cached, query.id());
                reply_wire(sink, &cached);
                return;
            }
        }

        // Blocked domains are answered immediately, before the upstream
        // round trip that feeds the drop rules.
        if rule.block {
            log::info!("[{}] '{}' is blocked, replying NXDOMAIN.", query.id(), qname);
            let response = dns::Message::response_to(&query, dns::RespCode::NxDomain);
            reply_message(sink, &response);
        }

        let upstreams = rule.upstream.as_deref().unwrap_or(&self.upstreams);
        log::debug!("[{}] Forwarding '{}' to {:?}.", query.id(), qname, upstreams);
        let response_wire = match upstream::forward_query(wire, upstreams, &self.upstream_params) {
            Ok(response_wire) => response_wire,
            Err(UpstreamErr::Exhausted) => {
                log::error!("[{}] All upstreams failed for '{}'.", query.id(), qname);
                if !rule.block {
                    let response = dns::Message::response_to(&query, dns::RespCode::ServFail);
                    reply_message(sink, &response);
                }
                return;
            }
        };
        let response = match dns::Message::decode(&response_wire) {
            Ok(response) => response,
            Err(err) => {
                log::warn!("[{}] Undecodable upstream response: {:?}", query.id(), err);
                return;
            }
        };

        if response.header.resp_code == dns::RespCode::NoError {
            let ttl = response.max_a_ttl().unwrap_or(self.cache.default_ttl());
            self.cache.put(cache_key, response_wire.clone(), ttl);
        }

        if rule.dbr {
            let ips = response.a_records();
            log::debug!("[{}] Enforcing rule for '{}' on {:?}.", query.id(), qname, ips);
            let hook = self.hook.lock().unwrap().clone();
            match hook {
                Some(hook) => hook.on_resolution(&rule, &ips),
                None => log::warn!("[{}] Enforceable rule for '{}' but no reconciler registered.", query.id(), qname),
            }
        }

        if !rule.block {
            reply_wire(sink, &response_wire);
            log::info!("[{}] Request served [{:?}].", query.id(), response.header.resp_code);
        }
    }

    /// Synthesize a pinned cache entry for every static `address` rule.
    /// Called at startup with the configured statics and again by the
    /// policy service when an address rule is added at runtime.
    pub fn pin_static_records(&self, statics: &[&Rule]) {
        for rule in statics {
            let address = match rule.address {
                Some(address) => address,
                None => continue,
            };
            let name = dns::Name::from_text(&rule.domain);
            let message = dns::Message::static_answer(&name, address, STATIC_RECORD_TTL);
            let key = (name.to_string(), dns::RecordType::A);
            self.cache.put(key, message.encode(), PINNED_TTL);
            log::debug!("Pinned static record '{}' -> {}.", rule.domain, address);
        }
    }

    /// Drop every cache entry except the pinned static records.
    pub fn purge_cache(&self) {
        self.cache.purge_dynamic();
    }
}

fn reply_message(sink: &mut dyn WireSink, message: &dns::Message) {
    reply_wire(sink, &message.encode());
}

fn reply_wire(sink: &mut dyn WireSink, wire: &[u8]) {
    if let Err(err) = sink.send(wire) {
        log::error!("Error replying: {}", err);
    }
}
