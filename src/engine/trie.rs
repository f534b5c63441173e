use crate::engine::rule::{Directive, Rule};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Invoked when a mutation replaces one enforcement directive with the
/// conflicting one (block -> route or route -> block). The hook runs
/// inside the mutation's critical section, **before** the new root is
/// published, so the forwarding plane can be reconciled in the order the
/// controller expects. A failing hook is logged by the trie and does not
/// abort the mutation.
pub trait UpdateHook: Send + Sync {
    fn on_directive_flip(
        &self,
        domain: &str,
        old_action: &str,
        new_action: &str,
        old_value: &str,
        new_value: &str,
    ) -> Result<(), String>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum TrieErr {
    EmptyDomain,
}

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    rule: Option<Rule>,
}

/// Rule store keyed by domain pattern, answering lookups with the most
/// specific applicable rule. Labels are stored in reverse order: the child
/// of the root keyed `com` represents the TLD, its child `google` the
/// domain `google.com`. A `*` child matches any label at its position.
///
/// Reads are lock-free on a frozen snapshot: readers clone the root `Arc`
/// out from under a mutex held only for the pointer copy and traverse the
/// immutable tree. Mutations are copy-on-write: the whole tree is deep
/// copied, the copy is mutated and the root pointer is swapped. A separate
/// writer mutex serializes mutations end to end, so concurrent updates
/// cannot lose each other's changes.
pub struct DomainTrie {
    root: Mutex<Arc<TrieNode>>,
    writer: Mutex<()>,
    update_hook: Mutex<Option<Arc<dyn UpdateHook>>>,
}

impl DomainTrie {
    pub fn new() -> DomainTrie {
        DomainTrie {
            root: Mutex::new(Arc::new(TrieNode::default())),
            writer: Mutex::new(()),
            update_hook: Mutex::new(None),
        }
    }

    /// Register the callback fired on conflicting directive updates.
    pub fn set_update_hook(&self, hook: Arc<dyn UpdateHook>) {
        *self.update_hook.lock().unwrap() = Some(hook);
    }

    /// Lookup the most specific rule applicable to the passed domain.
    /// Precedence: a full exact match wins over any wildcard, otherwise
    /// the deepest wildcard seen along the path wins, otherwise no rule.
    pub fn lookup(&self, domain: &str) -> Result<Option<Rule>, TrieErr> {
        if domain.is_empty() {
            return Err(TrieErr::EmptyDomain);
        }
        let root = self.snapshot();
        let labels: Vec<&str> = domain.split('.').rev().collect();

        let mut current = &*root;
        let mut exact: Option<&Rule> = None;
        let mut exact_depth = 0;
        let mut wildcard: Option<&Rule> = None;

        for (depth, label) in labels.iter().enumerate() {
            if let Some(star) = current.children.get("*") {
                wildcard = star.rule.as_ref();
            }
            match current.children.get(*label) {
                Some(child) => {
                    current = child;
                    if current.rule.is_some() {
                        exact = current.rule.as_ref();
                        exact_depth = depth + 1;
                    }
                }
                None => break,
            }
        }

        if exact_depth == labels.len() {
            if let Some(rule) = exact {
                return Ok(Some(rule.clone()));
            }
        }
        Ok(wildcard.cloned())
    }

    /// Insert a rule at runtime with copy-on-write discipline. If a rule
    /// already exists at the exact pattern path (wildcard resolution does
    /// not apply here: inserting `api.example.com` is not an update of an
    /// unrelated `*.example.com` rule), directives are merged with the
    /// later ones winning; a block/route conflict additionally fires the
    /// update hook before the root swap.
    pub fn cow_insert(&self, rule: Rule) -> Result<(), TrieErr> {
        if rule.domain.is_empty() {
            return Err(TrieErr::EmptyDomain);
        }
        let _writer = self.writer.lock().unwrap();

        let mut new_root = (*self.snapshot()).clone();
        let node = descend_or_create(&mut new_root, &rule.domain);
        match &mut node.rule {
            Some(existing) => {
                self.fire_on_conflict(existing, &rule);
                existing.merge_from(&rule);
            }
            None => node.rule = Some(rule),
        }

        self.swap_root(new_root);
        Ok(())
    }

    /// Remove the whole rule at a domain, or a single directive of it.
    /// Returns false when the domain (or the directive) is not present.
    /// A rule left without directives after the removal is deleted.
    pub fn cow_remove(&self, domain: &str, directive: Option<Directive>) -> Result<bool, TrieErr> {
        if domain.is_empty() {
            return Err(TrieErr::EmptyDomain);
        }
        let _writer = self.writer.lock().unwrap();

        let mut new_root = (*self.snapshot()).clone();
        let mut current = &mut new_root;
        for label in domain.split('.').rev() {
            match current.children.get_mut(label) {
                Some(child) => current = child,
                None => return Ok(false),
            }
        }
        let rule = match &mut current.rule {
            Some(rule) => rule,
            None => return Ok(false),
        };

        match directive {
            None => current.rule = None,
            Some(directive) => {
                let removed = match directive {
                    Directive::Block => std::mem::take(&mut rule.block),
                    Directive::Route => rule.route.take().is_some(),
                    Directive::Server => rule.upstream.take().is_some(),
                    Directive::Address => rule.address.take().is_some(),
                };
                if !removed {
                    return Ok(false);
                }
                rule.refresh_dbr();
                if !rule.has_directives() {
                    current.rule = None;
                }
            }
        }

        self.swap_root(new_root);
        Ok(true)
    }

    /// Replace the whole content with the passed rules. The new tree is
    /// fully built off-line and swapped in at once: no lookup ever sees a
    /// half-populated trie. Used both for the startup batch build and for
    /// the batch rebuild REST operation.
    pub fn rebuild(&self, rules: &[Rule]) {
        let _writer = self.writer.lock().unwrap();
        let mut fresh = TrieNode::default();
        for rule in rules {
            let node = descend_or_create(&mut fresh, &rule.domain);
            node.rule = Some(rule.clone());
        }
        self.swap_root(fresh);
    }

    /// Drop every rule.
    pub fn purge(&self) {
        let _writer = self.writer.lock().unwrap();
        self.swap_root(TrieNode::default());
    }

    /// All rules in the trie, flattened in deterministic (sorted) order.
    pub fn flatten(&self) -> Vec<Rule> {
        let root = self.snapshot();
        let mut rules = vec![];
        collect_rules(&root, &mut rules);
        rules
    }

    fn snapshot(&self) -> Arc<TrieNode> {
        self.root.lock().unwrap().clone()
    }

    fn swap_root(&self, new_root: TrieNode) {
        *self.root.lock().unwrap() = Arc::new(new_root);
    }

    // Detect a block<->route flip between the stored rule and the incoming
    // one and run the update hook. Hook errors are logged, the mutation
    // proceeds regardless.
    fn fire_on_conflict(&self, existing: &Rule, incoming: &Rule) {
        let hook = match self.update_hook.lock().unwrap().clone() {
            Some(hook) => hook,
            None => return,
        };
        let result = match (existing.block, existing.route, incoming.block, &incoming.route) {
            (true, _, _, Some(nexthop)) => {
                hook.on_directive_flip(&existing.domain, "block", "route", "", &nexthop.to_string())
            }
            (_, Some(old_nexthop), true, _) => {
                hook.on_directive_flip(&existing.domain, "route", "block", &old_nexthop.to_string(), "")
            }
            _ => return,
        };
        if let Err(err) = result {
            log::error!("Update hook failed for '{}': {}", existing.domain, err);
        }
    }
}

fn descend_or_create<'a>(root: &'a mut TrieNode, domain: &str) -> &'a mut TrieNode {
    let mut current = root;
    for label in domain.split('.').rev() {
        current = current.children.entry(label.to_string()).or_default();
    }
    current
}

fn collect_rules(node: &TrieNode, rules: &mut Vec<Rule>) {
    if let Some(rule) = &node.rule {
        rules.push(rule.clone());
    }
    let mut labels: Vec<&String> = node.children.keys().collect();
    labels.sort();
    for label in labels {
        collect_rules(&node.children[label], rules);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    fn block_rule(domain: &str) -> Rule {
        let mut rule = Rule::empty(domain);
        rule.block = true;
        rule.refresh_dbr();
        rule
    }

    fn route_rule(domain: &str, nexthop: [u8; 4]) -> Rule {
        let mut rule = Rule::empty(domain);
        rule.route = Some(Ipv4Addr::from(nexthop));
        rule.refresh_dbr();
        rule
    }

    #[test]
    fn test_lookup_empty_domain_is_an_error() {
        let trie = DomainTrie::new();
        assert_eq!(trie.lookup("").unwrap_err(), TrieErr::EmptyDomain);
    }

    #[test]
    fn test_insert_then_lookup_roundtrip() {
        let trie = DomainTrie::new();
        let rule = route_rule("apple.com", [192, 168, 2, 1]);
        trie.cow_insert(rule.clone()).unwrap();
        assert_eq!(trie.lookup("apple.com").unwrap(), Some(rule));
        assert_eq!(trie.lookup("com").unwrap(), None);
        assert_eq!(trie.lookup("www.apple.com").unwrap(), None);
    }

    #[test]
    fn test_exact_match_beats_wildcard() {
        let trie = DomainTrie::new();
        trie.rebuild(&[
            block_rule("*.example.com"),
            route_rule("api.example.com", [10, 0, 0, 1]),
        ]);
        let rule = trie.lookup("api.example.com").unwrap().unwrap();
        assert!(!rule.block);
        assert_eq!(rule.route, Some(Ipv4Addr::new(10, 0, 0, 1)));

        let rule = trie.lookup("web.example.com").unwrap().unwrap();
        assert!(rule.block);
    }

    #[test]
    fn test_deepest_wildcard_wins() {
        let trie = DomainTrie::new();
        trie.rebuild(&[
            block_rule("*.google.com"),
            route_rule("*.mail.google.com", [10, 0, 0, 2]),
        ]);
        let rule = trie.lookup("imap.mail.google.com").unwrap().unwrap();
        assert_eq!(rule.route, Some(Ipv4Addr::new(10, 0, 0, 2)));

        let rule = trie.lookup("play.google.com").unwrap().unwrap();
        assert!(rule.block);
    }

    #[test]
    fn test_wildcard_does_not_match_bare_suffix() {
        let trie = DomainTrie::new();
        trie.rebuild(&[block_rule("*.example.com")]);
        assert_eq!(trie.lookup("example.com").unwrap(), None);
        assert!(trie.lookup("deep.sub.example.com").unwrap().is_some());
    }

    #[test]
    fn test_remove_whole_rule() {
        let trie = DomainTrie::new();
        trie.cow_insert(block_rule("x.com")).unwrap();
        assert_eq!(trie.cow_remove("x.com", None).unwrap(), true);
        assert_eq!(trie.lookup("x.com").unwrap(), None);
        assert_eq!(trie.cow_remove("x.com", None).unwrap(), false);
        assert_eq!(trie.cow_remove("never.seen", None).unwrap(), false);
    }

    #[test]
    fn test_remove_single_directive() {
        let trie = DomainTrie::new();
        let mut rule = block_rule("x.com");
        rule.upstream = Some(vec![Ipv4Addr::new(9, 9, 9, 9)]);
        trie.cow_insert(rule).unwrap();

        assert_eq!(trie.cow_remove("x.com", Some(Directive::Block)).unwrap(), true);
        let rule = trie.lookup("x.com").unwrap().unwrap();
        assert!(!rule.block && !rule.dbr);
        assert!(rule.upstream.is_some());

        // Removing the last directive deletes the rule outright.
        assert_eq!(trie.cow_remove("x.com", Some(Directive::Server)).unwrap(), true);
        assert_eq!(trie.lookup("x.com").unwrap(), None);
    }

    #[test]
    fn test_remove_absent_directive_reports_not_found() {
        let trie = DomainTrie::new();
        trie.cow_insert(block_rule("x.com")).unwrap();
        assert_eq!(trie.cow_remove("x.com", Some(Directive::Route)).unwrap(), false);
        assert!(trie.lookup("x.com").unwrap().is_some());
    }

    #[test]
    fn test_directive_exclusivity_after_merge() {
        let trie = DomainTrie::new();
        trie.cow_insert(block_rule("x.com")).unwrap();
        trie.cow_insert(route_rule("x.com", [10, 0, 0, 1])).unwrap();
        let rule = trie.lookup("x.com").unwrap().unwrap();
        assert!(!rule.block);
        assert_eq!(rule.route, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(rule.dbr);

        trie.cow_insert(block_rule("x.com")).unwrap();
        let rule = trie.lookup("x.com").unwrap().unwrap();
        assert!(rule.block);
        assert_eq!(rule.route, None);
    }

    /// Records flip notifications and what a concurrent reader would see
    /// while the hook runs, to verify the hook fires before the swap.
    struct FlipProbe {
        trie: Arc<DomainTrie>,
        calls: Mutex<Vec<(String, String, String, String, String)>>,
        rule_during_hook: Mutex<Option<Rule>>,
    }

    impl UpdateHook for FlipProbe {
        fn on_directive_flip(
            &self,
            domain: &str,
            old_action: &str,
            new_action: &str,
            old_value: &str,
            new_value: &str,
        ) -> Result<(), String> {
            self.calls.lock().unwrap().push((
                domain.to_string(),
                old_action.to_string(),
                new_action.to_string(),
                old_value.to_string(),
                new_value.to_string(),
            ));
            *self.rule_during_hook.lock().unwrap() = self.trie.lookup(domain).unwrap();
            Ok(())
        }
    }

    #[test]
    fn test_flip_fires_hook_before_swap() {
        let trie = Arc::new(DomainTrie::new());
        let probe = Arc::new(FlipProbe {
            trie: Arc::clone(&trie),
            calls: Mutex::new(vec![]),
            rule_during_hook: Mutex::new(None),
        });
        trie.set_update_hook(probe.clone());

        trie.cow_insert(block_rule("x.com")).unwrap();
        trie.cow_insert(route_rule("x.com", [10, 0, 0, 1])).unwrap();

        let calls = probe.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(
                "x.com".to_string(),
                "block".to_string(),
                "route".to_string(),
                "".to_string(),
                "10.0.0.1".to_string(),
            )]
        );
        // While the hook ran, readers still observed the old (block) rule.
        let seen = probe.rule_during_hook.lock().unwrap().clone().unwrap();
        assert!(seen.block);
        assert_eq!(seen.route, None);
    }

    #[test]
    fn test_flip_back_reports_old_nexthop() {
        let trie = Arc::new(DomainTrie::new());
        let probe = Arc::new(FlipProbe {
            trie: Arc::clone(&trie),
            calls: Mutex::new(vec![]),
            rule_during_hook: Mutex::new(None),
        });
        trie.set_update_hook(probe.clone());

        trie.cow_insert(route_rule("x.com", [10, 0, 0, 1])).unwrap();
        trie.cow_insert(block_rule("x.com")).unwrap();

        let calls = probe.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(
                "x.com".to_string(),
                "route".to_string(),
                "block".to_string(),
                "10.0.0.1".to_string(),
                "".to_string(),
            )]
        );
    }

    #[test]
    fn test_non_conflicting_update_fires_no_hook() {
        let trie = Arc::new(DomainTrie::new());
        let probe = Arc::new(FlipProbe {
            trie: Arc::clone(&trie),
            calls: Mutex::new(vec![]),
            rule_during_hook: Mutex::new(None),
        });
        trie.set_update_hook(probe.clone());

        trie.cow_insert(block_rule("x.com")).unwrap();
        let mut upstream = Rule::empty("x.com");
        upstream.upstream = Some(vec![Ipv4Addr::new(9, 9, 9, 9)]);
        trie.cow_insert(upstream).unwrap();

        assert!(probe.calls.lock().unwrap().is_empty());
        let rule = trie.lookup("x.com").unwrap().unwrap();
        assert!(rule.block && rule.upstream.is_some());
    }

    #[test]
    fn test_rebuild_and_flatten_roundtrip() {
        let trie = DomainTrie::new();
        trie.rebuild(&[
            block_rule("facebook.com"),
            route_rule("apple.com", [10, 0, 0, 1]),
            block_rule("*.baidu.com"),
        ]);
        let rules = trie.flatten();
        assert_eq!(rules.len(), 3);

        let rebuilt = DomainTrie::new();
        rebuilt.rebuild(&rules);
        assert_eq!(rebuilt.flatten(), rules);
    }

    #[test]
    fn test_purge_empties_the_trie() {
        let trie = DomainTrie::new();
        trie.cow_insert(block_rule("x.com")).unwrap();
        trie.purge();
        assert!(trie.flatten().is_empty());
        assert_eq!(trie.lookup("x.com").unwrap(), None);
    }

    #[test]
    fn test_concurrent_readers_see_complete_snapshots() {
        let trie = Arc::new(DomainTrie::new());
        trie.rebuild(&[block_rule("a.com"), block_rule("b.com")]);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let trie = Arc::clone(&trie);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        // Both rules enter atomically via rebuild, so any
                        // single snapshot has the pair or (after a purge)
                        // neither, never one of the two.
                        let rules = trie.flatten().len();
                        assert!(rules == 0 || rules == 2);
                    }
                })
            })
            .collect();

        for _ in 0..50 {
            trie.purge();
            trie.rebuild(&[block_rule("a.com"), block_rule("b.com")]);
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
