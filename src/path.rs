//! Worldline container: bead storage, the next/prev link graph and the
//! worm state.
//!
//! Beads live on a grid of `num_slices` imaginary-time slices, each with
//! a pool of slots. A slot is either active (carries a position and up
//! to two links) or free. Closed worldlines are cycles in the link
//! graph; the worm, when present, is the single open chain whose forward
//! end is the head and whose backward end is the tail.
//!
//! Slot pools grow on demand and never shrink. Equality and consistency
//! checks look only at active beads, so a move that allocates a slot and
//! frees it again on rejection leaves the path equal to its entry state.

use nalgebra::Vector3;

use crate::cell::{Cell, DVec};

/// Coordinate of one bead: imaginary-time slice and within-slice slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeadLocator {
    pub slice: usize,
    pub ptcl: usize,
}

impl BeadLocator {
    pub fn new(slice: usize, ptcl: usize) -> Self {
        Self { slice, ptcl }
    }
}

/// Endpoints of the open worldline.
///
/// The head dangles forward in imaginary time (no next link), the tail
/// dangles backward (no prev link). The missing links between them form
/// the gap that Close must bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Worm {
    pub head: BeadLocator,
    pub tail: BeadLocator,
}

/// The worldline configuration.
#[derive(Debug, Clone)]
pub struct Path {
    pub cell: Cell,
    num_slices: usize,
    positions: Vec<Vec<DVec>>,
    bead_on: Vec<Vec<bool>>,
    link_next: Vec<Vec<Option<BeadLocator>>>,
    link_prev: Vec<Vec<Option<BeadLocator>>>,
    pub worm: Option<Worm>,
}

impl Path {
    /// Build a diagonal configuration with one straight closed worldline
    /// per entry of `positions`.
    pub fn new(cell: Cell, num_slices: usize, positions: &[DVec]) -> Self {
        assert!(num_slices >= 2, "need at least two time slices");
        let n = positions.len();
        let mut path = Self {
            cell,
            num_slices,
            positions: vec![positions.to_vec(); num_slices],
            bead_on: vec![vec![true; n]; num_slices],
            link_next: vec![vec![None; n]; num_slices],
            link_prev: vec![vec![None; n]; num_slices],
            worm: None,
        };
        for s in 0..num_slices {
            let s2 = (s + 1) % num_slices;
            for p in 0..n {
                path.link_next[s][p] = Some(BeadLocator::new(s2, p));
                path.link_prev[s2][p] = Some(BeadLocator::new(s, p));
            }
        }
        path
    }

    pub fn num_slices(&self) -> usize {
        self.num_slices
    }

    /// Current size of the per-slice slot pool.
    pub fn num_slots(&self) -> usize {
        self.bead_on[0].len()
    }

    pub fn bead_on(&self, b: BeadLocator) -> bool {
        self.bead_on[b.slice].get(b.ptcl).copied().unwrap_or(false)
    }

    pub fn pos(&self, b: BeadLocator) -> DVec {
        self.positions[b.slice][b.ptcl]
    }

    pub fn update_bead(&mut self, b: BeadLocator, r: DVec) {
        debug_assert!(self.bead_on(b));
        self.positions[b.slice][b.ptcl] = r;
    }

    pub fn next(&self, b: BeadLocator) -> Option<BeadLocator> {
        self.link_next[b.slice][b.ptcl]
    }

    pub fn prev(&self, b: BeadLocator) -> Option<BeadLocator> {
        self.link_prev[b.slice][b.ptcl]
    }

    /// Follow `n` forward links; `None` if the chain breaks first.
    pub fn next_n(&self, b: BeadLocator, n: usize) -> Option<BeadLocator> {
        let mut cur = b;
        for _ in 0..n {
            cur = self.next(cur)?;
        }
        Some(cur)
    }

    /// Follow `n` backward links; `None` if the chain breaks first.
    pub fn prev_n(&self, b: BeadLocator, n: usize) -> Option<BeadLocator> {
        let mut cur = b;
        for _ in 0..n {
            cur = self.prev(cur)?;
        }
        Some(cur)
    }

    pub fn set_next(&mut self, b: BeadLocator, to: Option<BeadLocator>) {
        self.link_next[b.slice][b.ptcl] = to;
    }

    pub fn set_prev(&mut self, b: BeadLocator, to: Option<BeadLocator>) {
        self.link_prev[b.slice][b.ptcl] = to;
    }

    /// Link `a -> b` in both directions.
    pub fn make_link(&mut self, a: BeadLocator, b: BeadLocator) {
        debug_assert_eq!(b.slice, (a.slice + 1) % self.num_slices);
        self.link_next[a.slice][a.ptcl] = Some(b);
        self.link_prev[b.slice][b.ptcl] = Some(a);
    }

    /// Cut the forward link of `a`, returning the bead it pointed to.
    pub fn break_link(&mut self, a: BeadLocator) -> Option<BeadLocator> {
        let old = self.link_next[a.slice][a.ptcl].take();
        if let Some(n) = old {
            self.link_prev[n.slice][n.ptcl] = None;
        }
        old
    }

    /// Activate a bead in a free slot of `slice`, growing the pool if no
    /// slot is free. The new bead carries no links.
    pub fn add_bead_at(&mut self, slice: usize, r: DVec) -> BeadLocator {
        let ptcl = match self.bead_on[slice].iter().position(|&on| !on) {
            Some(p) => p,
            None => {
                for s in 0..self.num_slices {
                    self.positions[s].push(Vector3::zeros());
                    self.bead_on[s].push(false);
                    self.link_next[s].push(None);
                    self.link_prev[s].push(None);
                }
                self.bead_on[slice].len() - 1
            }
        };
        self.positions[slice][ptcl] = r;
        self.bead_on[slice][ptcl] = true;
        BeadLocator::new(slice, ptcl)
    }

    /// Create a bead on the slice after `b` and link `b` to it.
    pub fn add_next_bead(&mut self, b: BeadLocator, r: DVec) -> BeadLocator {
        let new = self.add_bead_at((b.slice + 1) % self.num_slices, r);
        self.make_link(b, new);
        new
    }

    /// Create a bead on the slice before `b` and link it to `b`.
    pub fn add_prev_bead(&mut self, b: BeadLocator, r: DVec) -> BeadLocator {
        let slice = (b.slice + self.num_slices - 1) % self.num_slices;
        let new = self.add_bead_at(slice, r);
        self.make_link(new, b);
        new
    }

    /// Re-activate a specific slot, as when undoing a deletion. The
    /// slot must exist and be free; the bead comes back without links.
    pub fn restore_bead(&mut self, b: BeadLocator, r: DVec) {
        assert!(
            b.ptcl < self.bead_on[b.slice].len() && !self.bead_on[b.slice][b.ptcl],
            "restore_bead target slot is not free"
        );
        self.positions[b.slice][b.ptcl] = r;
        self.bead_on[b.slice][b.ptcl] = true;
    }

    /// Deactivate a bead, detaching any links into it.
    pub fn del_bead(&mut self, b: BeadLocator) {
        if let Some(p) = self.link_prev[b.slice][b.ptcl].take() {
            self.link_next[p.slice][p.ptcl] = None;
        }
        if let Some(n) = self.link_next[b.slice][b.ptcl].take() {
            self.link_prev[n.slice][n.ptcl] = None;
        }
        self.bead_on[b.slice][b.ptcl] = false;
    }

    pub fn num_beads_at_slice(&self, slice: usize) -> usize {
        self.bead_on[slice].iter().filter(|&&on| on).count()
    }

    pub fn num_active_beads(&self) -> usize {
        (0..self.num_slices).map(|s| self.num_beads_at_slice(s)).sum()
    }

    /// Number of complete worldlines worth of beads currently stored.
    pub fn get_true_num_particles(&self) -> usize {
        self.num_active_beads() / self.num_slices
    }

    pub fn is_diagonal(&self) -> bool {
        self.worm.is_none()
    }

    /// Number of missing links between head and tail, in `[1, M]`.
    pub fn worm_gap(&self) -> Option<usize> {
        let worm = self.worm?;
        let m = self.num_slices;
        let gap = (worm.tail.slice + m - worm.head.slice) % m;
        Some(if gap == 0 { m } else { gap })
    }

    /// Number of links from tail to head, if reachable within `cap`
    /// links. Bounded so that winding worms never force a full walk.
    pub fn worm_length_within(&self, cap: usize) -> Option<usize> {
        let worm = self.worm?;
        let mut cur = worm.tail;
        for n in 0..=cap {
            if cur == worm.head {
                return Some(n);
            }
            cur = self.next(cur)?;
        }
        None
    }

    /// Active beads on `slice`, in slot order.
    pub fn beads_at_slice(&self, slice: usize) -> impl Iterator<Item = BeadLocator> + '_ {
        self.bead_on[slice]
            .iter()
            .enumerate()
            .filter(|&(_, &on)| on)
            .map(move |(p, _)| BeadLocator::new(slice, p))
    }

    /// Uniformly random active bead.
    pub fn random_active_bead<R: rand::Rng>(&self, rng: &mut R) -> Option<BeadLocator> {
        let total = self.num_active_beads();
        if total == 0 {
            return None;
        }
        let mut k = rng.gen_range(0..total);
        for s in 0..self.num_slices {
            for b in self.beads_at_slice(s) {
                if k == 0 {
                    return Some(b);
                }
                k -= 1;
            }
        }
        unreachable!("active bead count changed during selection")
    }

    /// All beads of the worldline containing `b`, in forward link order.
    /// For a closed loop the walk starts at `b`; for the worm it starts
    /// at the tail end of the chain.
    pub fn worldline_containing(&self, b: BeadLocator) -> Vec<BeadLocator> {
        // rewind to an open end, or detect a loop
        let mut start = b;
        loop {
            match self.prev(start) {
                Some(p) if p != b => start = p,
                Some(_) => {
                    start = b; // closed loop
                    break;
                }
                None => break,
            }
        }
        let mut beads = vec![start];
        let mut cur = start;
        while let Some(n) = self.next(cur) {
            if n == start {
                break;
            }
            beads.push(n);
            cur = n;
        }
        beads
    }

    /// Full link-graph and worm-state invariant check. Cheap enough for
    /// `debug_assert!` after every undo.
    pub fn is_consistent(&self) -> bool {
        let mut dangling_next = Vec::new();
        let mut dangling_prev = Vec::new();
        for s in 0..self.num_slices {
            for p in 0..self.bead_on[s].len() {
                let b = BeadLocator::new(s, p);
                if !self.bead_on[s][p] {
                    if self.link_next[s][p].is_some() || self.link_prev[s][p].is_some() {
                        return false;
                    }
                    continue;
                }
                match self.next(b) {
                    Some(n) => {
                        if n.slice != (s + 1) % self.num_slices
                            || !self.bead_on(n)
                            || self.prev(n) != Some(b)
                        {
                            return false;
                        }
                    }
                    None => dangling_next.push(b),
                }
                match self.prev(b) {
                    Some(pr) => {
                        if pr.slice != (s + self.num_slices - 1) % self.num_slices
                            || !self.bead_on(pr)
                            || self.next(pr) != Some(b)
                        {
                            return false;
                        }
                    }
                    None => dangling_prev.push(b),
                }
            }
        }
        match self.worm {
            None => dangling_next.is_empty() && dangling_prev.is_empty(),
            Some(worm) => {
                dangling_next == vec![worm.head] && dangling_prev == vec![worm.tail]
            }
        }
    }
}

/// Structural equality over active beads only: two paths compare equal
/// when they hold the same beads in the same slots with the same
/// positions, links and worm state, regardless of how large the free
/// slot pools have grown.
impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        if self.num_slices != other.num_slices
            || self.cell != other.cell
            || self.worm != other.worm
        {
            return false;
        }
        let slots = self.num_slots().max(other.num_slots());
        for s in 0..self.num_slices {
            for p in 0..slots {
                let b = BeadLocator::new(s, p);
                if self.bead_on(b) != other.bead_on(b) {
                    return false;
                }
                if self.bead_on(b)
                    && (self.pos(b) != other.pos(b)
                        || self.next(b) != other.next(b)
                        || self.prev(b) != other.prev(b))
                {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_particle_path() -> Path {
        Path::new(
            Cell::cube(4.0),
            8,
            &[DVec::new(0.0, 0.0, 0.0), DVec::new(1.0, 0.0, 0.0)],
        )
    }

    #[test]
    fn straight_worldlines_are_consistent_loops() {
        let path = two_particle_path();
        assert!(path.is_consistent());
        assert!(path.is_diagonal());
        assert_eq!(path.get_true_num_particles(), 2);
        let b = BeadLocator::new(0, 0);
        assert_eq!(path.next_n(b, 8), Some(b));
        assert_eq!(path.worldline_containing(b).len(), 8);
    }

    #[test]
    fn break_and_relink_restores_consistency() {
        let mut path = two_particle_path();
        let a = BeadLocator::new(3, 1);
        let b = path.break_link(a).unwrap();
        assert!(path.next(a).is_none());
        assert!(path.prev(b).is_none());
        path.worm = Some(Worm { head: a, tail: b });
        assert!(path.is_consistent());
        assert_eq!(path.worm_gap(), Some(1));
        path.make_link(a, b);
        path.worm = None;
        assert!(path.is_consistent());
    }

    #[test]
    fn add_and_delete_bead_roundtrip() {
        let mut path = two_particle_path();
        let snapshot = path.clone();
        let a = BeadLocator::new(5, 0);
        let cut = path.break_link(a).unwrap();
        let fresh = path.add_next_bead(a, DVec::new(0.2, 0.1, -0.3));
        assert_eq!(fresh.slice, 6);
        assert!(path.bead_on(fresh));
        path.del_bead(fresh);
        path.make_link(a, cut);
        assert!(path.is_consistent());
        assert_eq!(path, snapshot);
    }

    #[test]
    fn slot_pool_growth_preserves_equality() {
        let mut path = two_particle_path();
        let snapshot = path.clone();
        let extra = path.add_bead_at(0, DVec::zeros());
        assert!(path.num_slots() > snapshot.num_slots());
        path.del_bead(extra);
        assert_eq!(path, snapshot);
    }

    #[test]
    fn worm_gap_wraps_modulo_slices() {
        let mut path = two_particle_path();
        let head = BeadLocator::new(6, 0);
        let tail = path.break_link(head).unwrap();
        assert_eq!(tail.slice, 7);
        path.worm = Some(Worm { head, tail });
        assert_eq!(path.worm_gap(), Some(1));
        assert_eq!(path.worm_length_within(8), Some(7));
        assert!(path.worm_length_within(6).is_none());
    }
}
