//! Cycle detection for computed subscriptions.
//!
//! A computed subscription writes its target whenever one of its dependencies changes. Adding
//! one closes a cycle if, following "this dependency is written by that computed subscription"
//! edges from any of its dependencies, we reach a subscription whose target the new one would
//! write into.

use std::collections::HashSet;

use crate::{
    bind_target::{has_overlap, BindTarget},
    subscription::SubscriptionId,
};

use super::state::{ManagerState, Role};

impl ManagerState {
    /// Returns the offending chain of targets, starting and ending at `target`, if a computed
    /// subscription on `target` depending on `dependencies` would feed back into itself.
    pub(crate) fn find_loop(
        &self,
        target: &BindTarget,
        dependencies: &[BindTarget],
    ) -> Option<Vec<BindTarget>> {
        let mut visited = HashSet::new();
        let mut chain = vec![target.clone()];
        for dependency in dependencies {
            chain.push(dependency.clone());
            if has_overlap(target, dependency)
                || self.reaches(target, dependency, &mut chain, &mut visited)
            {
                if chain.last() != Some(target) {
                    chain.push(target.clone());
                }
                return Some(chain);
            }
            chain.pop();
        }
        None
    }

    fn reaches(
        &self,
        origin: &BindTarget,
        dependency: &BindTarget,
        chain: &mut Vec<BindTarget>,
        visited: &mut HashSet<SubscriptionId>,
    ) -> bool {
        for (id, entry) in self.subscriptions.iter() {
            if !has_overlap(&entry.target, dependency) || !visited.insert(*id) {
                continue;
            }
            if has_overlap(origin, &entry.target) {
                return true;
            }
            let Role::Computed(computed) = &entry.role else {
                continue;
            };
            for upstream in computed.dependencies.iter() {
                let Some(upstream) = self.subscriptions.get(upstream) else {
                    continue;
                };
                chain.push(upstream.target.clone());
                if self.reaches(origin, &upstream.target, chain, visited) {
                    return true;
                }
                chain.pop();
            }
        }
        false
    }
}
