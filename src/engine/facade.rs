//! Phase registry: hierarchy lookup and the current-phase cursor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;

use super::phase::Phase;
use super::types::PhaseId;
use crate::error::PhaseError;

/// Groups phases by parent and tracks the current phase under each parent.
///
/// The cursor map is keyed by parent id; `None` is the root level.
pub struct PhaseFacade {
    phases: IndexMap<PhaseId, Arc<Phase>>,
    children: HashMap<Option<PhaseId>, Vec<Arc<Phase>>>,
    current: DashMap<Option<PhaseId>, PhaseId>,
}

impl PhaseFacade {
    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Validation` for duplicate ids, unknown parents,
    /// parent cycles, or two siblings with the same order.
    pub fn new(phases: Vec<Arc<Phase>>) -> Result<Self, PhaseError> {
        let mut by_id = IndexMap::with_capacity(phases.len());
        for phase in phases {
            let id = phase.id();
            if by_id.insert(id, phase).is_some() {
                return Err(PhaseError::Validation(format!("duplicate {id}")));
            }
        }

        let mut children: HashMap<Option<PhaseId>, Vec<Arc<Phase>>> = HashMap::new();
        for phase in by_id.values() {
            if let Some(parent) = phase.parent_id()
                && !by_id.contains_key(&parent)
            {
                return Err(PhaseError::Validation(format!(
                    "{} has unknown parent {parent}",
                    phase.id()
                )));
            }
            children
                .entry(phase.parent_id())
                .or_default()
                .push(Arc::clone(phase));
        }

        for phase in by_id.values() {
            let mut seen = HashSet::from([phase.id()]);
            let mut cursor = phase.parent_id();
            while let Some(parent) = cursor {
                if !seen.insert(parent) {
                    return Err(PhaseError::Validation(format!(
                        "{} is part of a parent cycle",
                        phase.id()
                    )));
                }
                cursor = by_id.get(&parent).and_then(|p| p.parent_id());
            }
        }

        for siblings in children.values_mut() {
            siblings.sort_by_key(|p| p.order());
            if let Some(pair) = siblings.windows(2).find(|w| w[0].order() == w[1].order()) {
                return Err(PhaseError::Validation(format!(
                    "{} and {} share order {}",
                    pair[0].id(),
                    pair[1].id(),
                    pair[0].order()
                )));
            }
        }

        Ok(Self {
            phases: by_id,
            children,
            current: DashMap::new(),
        })
    }

    /// Every phase in declaration order.
    #[must_use]
    pub fn phases(&self) -> Vec<Arc<Phase>> {
        self.phases.values().cloned().collect()
    }

    /// Number of phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Returns `true` if there are no phases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Looks up a phase.
    #[must_use]
    pub fn phase(&self, id: PhaseId) -> Option<Arc<Phase>> {
        self.phases.get(&id).cloned()
    }

    /// Children of `parent` sorted by order.
    #[must_use]
    pub fn children(&self, parent: Option<PhaseId>) -> &[Arc<Phase>] {
        self.children
            .get(&parent)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Lowest-order child of `parent`.
    #[must_use]
    pub fn first_child(&self, parent: Option<PhaseId>) -> Option<Arc<Phase>> {
        self.children(parent).first().cloned()
    }

    /// Sibling whose order is one past `phase`'s.
    #[must_use]
    pub fn sibling_after(&self, phase: &Phase) -> Option<Arc<Phase>> {
        let order = phase.order().checked_add(1)?;
        self.children(phase.parent_id())
            .iter()
            .find(|p| p.order() == order)
            .cloned()
    }

    /// Every phase nested below `id`, depth first.
    #[must_use]
    pub fn descendants(&self, id: PhaseId) -> Vec<Arc<Phase>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(parent) = stack.pop() {
            for child in self.children(Some(parent)) {
                stack.push(child.id());
                out.push(Arc::clone(child));
            }
        }
        out
    }

    /// Current phase under `parent`.
    #[must_use]
    pub fn current(&self, parent: Option<PhaseId>) -> Option<Arc<Phase>> {
        let id = self.current.get(&parent).map(|entry| *entry.value())?;
        self.phase(id)
    }

    /// Records `phase` as current under its parent.
    pub fn set_current(&self, phase: &Phase) {
        self.current.insert(phase.parent_id(), phase.id());
    }

    /// Forgets the current phase under `parent`.
    pub fn clear_current(&self, parent: Option<PhaseId>) {
        self.current.remove(&parent);
    }

    /// Forgets every current phase.
    pub fn reset_current(&self) {
        self.current.clear();
    }

    /// Current phases from the root down to the deepest one.
    #[must_use]
    pub fn current_chain(&self) -> Vec<Arc<Phase>> {
        let mut chain = Vec::new();
        let mut next = self.current(None);
        while let Some(phase) = next {
            if chain.len() > self.phases.len() {
                break;
            }
            next = self.current(Some(phase.id()));
            chain.push(phase);
        }
        chain
    }

    /// Deepest current phase.
    #[must_use]
    pub fn current_leaf(&self) -> Option<Arc<Phase>> {
        self.current_chain().pop()
    }
}

impl std::fmt::Debug for PhaseFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseFacade")
            .field("phases", &self.phases.len())
            .field("current", &self.current.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::phase::PhaseSpec;
    use crate::engine::types::ConditionType;

    fn phase(id: u32, order: u32, parent: Option<u32>) -> Arc<Phase> {
        let mut spec = PhaseSpec::new(id, format!("p{id}"), order, ConditionType::Unspecified);
        if let Some(parent) = parent {
            spec = spec.with_parent(parent);
        }
        Phase::new(spec, vec![]).unwrap()
    }

    #[test]
    fn test_children_sorted_by_order() {
        let facade =
            PhaseFacade::new(vec![phase(1, 3, None), phase(2, 1, None), phase(3, 2, None)]).unwrap();
        let ids: Vec<_> = facade.children(None).iter().map(|p| p.id()).collect();
        assert_eq!(ids, [PhaseId(2), PhaseId(3), PhaseId(1)]);
        assert_eq!(facade.first_child(None).unwrap().id(), PhaseId(2));
        let after = facade.sibling_after(&facade.phase(PhaseId(2)).unwrap()).unwrap();
        assert_eq!(after.id(), PhaseId(3));
        assert!(facade.sibling_after(&facade.phase(PhaseId(1)).unwrap()).is_none());
    }

    #[test]
    fn test_rejects_bad_hierarchies() {
        assert!(PhaseFacade::new(vec![phase(1, 1, None), phase(1, 2, None)]).is_err());
        assert!(PhaseFacade::new(vec![phase(1, 1, Some(9))]).is_err());
        assert!(PhaseFacade::new(vec![phase(1, 1, None), phase(2, 1, None)]).is_err());
        assert!(PhaseFacade::new(vec![phase(1, 1, Some(2)), phase(2, 1, Some(1))]).is_err());
        assert!(PhaseFacade::new(vec![phase(1, 1, Some(1))]).is_err());
    }

    #[test]
    fn test_same_order_under_different_parents_is_fine() {
        let facade = PhaseFacade::new(vec![
            phase(1, 1, None),
            phase(2, 1, Some(1)),
            phase(3, 1, Some(2)),
        ])
        .unwrap();
        let ids: Vec<_> = facade.descendants(PhaseId(1)).iter().map(|p| p.id()).collect();
        assert_eq!(ids, [PhaseId(2), PhaseId(3)]);
    }

    #[test]
    fn test_current_leaf_follows_chain() {
        let facade = PhaseFacade::new(vec![
            phase(1, 1, None),
            phase(2, 1, Some(1)),
            phase(3, 1, Some(2)),
        ])
        .unwrap();
        assert!(facade.current_leaf().is_none());
        for id in 1..=3 {
            facade.set_current(&facade.phase(PhaseId(id)).unwrap());
        }
        assert_eq!(facade.current_leaf().unwrap().id(), PhaseId(3));
        assert_eq!(facade.current_chain().len(), 3);

        facade.clear_current(Some(PhaseId(2)));
        assert_eq!(facade.current_leaf().unwrap().id(), PhaseId(2));
        facade.reset_current();
        assert!(facade.current(None).is_none());
    }
}
