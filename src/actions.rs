//! Set of action indices with O(1) membership, removal and uniform choice.

use rand::Rng;

/// Dense index set over `0..universe`.
///
/// Members live in a vector for uniform sampling; `positions` maps each
/// index back to its slot so removal can `swap_remove`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSet {
    members: Vec<usize>,
    positions: Vec<Option<usize>>,
}

impl ActionSet {
    /// Every index in `0..universe`.
    #[must_use]
    pub fn full(universe: usize) -> Self {
        Self {
            members: (0..universe).collect(),
            positions: (0..universe).map(Some).collect(),
        }
    }

    #[must_use]
    pub fn empty(universe: usize) -> Self {
        Self {
            members: Vec::with_capacity(universe),
            positions: vec![None; universe],
        }
    }

    /// Size of the index universe, not the member count.
    #[must_use]
    pub fn universe(&self) -> usize {
        self.positions.len()
    }

    /// Out-of-range indices are simply not members.
    #[must_use]
    pub fn contains(&self, action: usize) -> bool {
        matches!(self.positions.get(action), Some(Some(_)))
    }

    /// Returns `false` if already present or out of range.
    pub fn insert(&mut self, action: usize) -> bool {
        if !matches!(self.positions.get(action), Some(None)) {
            return false;
        }
        self.positions[action] = Some(self.members.len());
        self.members.push(action);
        true
    }

    /// Returns `false` if the index was not a member.
    pub fn remove(&mut self, action: usize) -> bool {
        let Some(pos) = self.positions.get_mut(action).and_then(Option::take) else {
            return false;
        };

        self.members.swap_remove(pos);
        if let Some(&moved) = self.members.get(pos) {
            self.positions[moved] = Some(pos);
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in internal (not sorted) order.
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.members
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().copied()
    }

    /// Uniformly random member, `None` when empty.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.members.is_empty() {
            None
        } else {
            Some(self.members[rng.gen_range(0..self.members.len())])
        }
    }
}
