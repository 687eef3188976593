//! Inclusive N-dimensional boxes and the local/global pair a halo carries.

use super::coordinate::Coordinate;

/// Inclusive box `[first, last]` in the D-dimensional grid.
///
/// Empty iff `first > last` on any axis. The builder intersects boxes by
/// explicit componentwise max/min on the corners.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct IterationSpace<const D: usize> {
    pub first: Coordinate<D>,
    pub last: Coordinate<D>,
}

impl<const D: usize> IterationSpace<D> {
    #[inline]
    pub const fn new(first: Coordinate<D>, last: Coordinate<D>) -> Self {
        Self { first, last }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.first.le_all(self.last)
    }

    /// Number of grid points in the box; 0 when empty.
    pub fn size(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let mut s = 1usize;
        for i in 0..D {
            s *= (self.last[i] - self.first[i] + 1) as usize;
        }
        s
    }

    /// Visit every point of the box in row-major order (last axis fastest).
    /// Pack and unpack both use this traversal, which is what keeps the
    /// packed layout identical on both sides of an exchange.
    pub fn for_each(&self, mut f: impl FnMut(Coordinate<D>)) {
        if self.is_empty() {
            return;
        }
        let mut c = self.first;
        'outer: loop {
            f(c);
            let mut axis = D;
            while axis > 0 {
                axis -= 1;
                if c[axis] < self.last[axis] {
                    c[axis] += 1;
                    for j in axis + 1..D {
                        c[j] = self.first[j];
                    }
                    continue 'outer;
                }
            }
            break;
        }
    }
}

/// A halo region seen from both frames: `local` indexes into the owner's
/// buffer (origin at the domain start, so halo cells can go negative) and
/// `global` is the same box in absolute grid coordinates.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct IterationSpacePair<const D: usize> {
    pub local: IterationSpace<D>,
    pub global: IterationSpace<D>,
}

impl<const D: usize> IterationSpacePair<D> {
    #[inline]
    pub const fn new(local: IterationSpace<D>, global: IterationSpace<D>) -> Self {
        Self { local, global }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.local.size()
    }
}
