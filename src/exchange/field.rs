//! Field descriptor contract and a simple strided-array implementation.

use crate::pattern::coordinate::Coordinate;
use crate::pattern::iteration::IterationSpace;
use crate::pattern::pattern::DomainId;
use bytemuck::Pod;

/// Pack/unpack interface the exchange driver works against.
///
/// Coordinates handed to `get`/`set` are in the owning domain's local frame
/// (origin at the domain start; halo cells go negative), the same frame the
/// pattern's local iteration spaces use.
pub trait FieldDescriptor<const D: usize> {
    /// Size in bytes of one element.
    fn data_type_size(&self) -> usize;

    /// Copy the elements of `space` into `out`, in the space's row-major
    /// traversal order. `out` holds exactly `space.size() * data_type_size()`
    /// bytes.
    fn get(&self, space: &IterationSpace<D>, out: &mut [u8]);

    /// Scatter `data` into the elements of `space`, mirroring `get`.
    fn set(&mut self, space: &IterationSpace<D>, data: &[u8]);
}

/// Row-major field over a borrowed slice, padded with halo cells.
///
/// `offsets` places the domain origin inside the padded array (so a halo
/// width of 1 means `offsets = [1; D]`), and `extents` are the padded array
/// extents. The last axis is contiguous.
pub struct SimpleField<'a, T, const D: usize> {
    id: DomainId,
    data: &'a mut [T],
    offsets: Coordinate<D>,
    strides: [i64; D],
}

impl<'a, T: Pod, const D: usize> SimpleField<'a, T, D> {
    pub fn new(
        id: DomainId,
        data: &'a mut [T],
        offsets: Coordinate<D>,
        extents: Coordinate<D>,
    ) -> Self {
        let mut strides = [1i64; D];
        for i in (0..D.saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * extents[i + 1];
        }
        let total: i64 = strides[0] * extents[0];
        debug_assert_eq!(total as usize, data.len(), "extents do not match storage");
        Self {
            id,
            data,
            offsets,
            strides,
        }
    }

    #[inline]
    pub fn domain_id(&self) -> DomainId {
        self.id
    }

    #[inline]
    fn index(&self, c: Coordinate<D>) -> usize {
        let mut idx = 0i64;
        for i in 0..D {
            idx += (c[i] + self.offsets[i]) * self.strides[i];
        }
        debug_assert!(idx >= 0, "coordinate {c:?} outside the padded array");
        idx as usize
    }

    /// Direct element access in the domain-local frame.
    pub fn at(&self, c: Coordinate<D>) -> &T {
        &self.data[self.index(c)]
    }

    pub fn at_mut(&mut self, c: Coordinate<D>) -> &mut T {
        let idx = self.index(c);
        &mut self.data[idx]
    }
}

impl<T: Pod, const D: usize> FieldDescriptor<D> for SimpleField<'_, T, D> {
    fn data_type_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn get(&self, space: &IterationSpace<D>, out: &mut [u8]) {
        let esz = std::mem::size_of::<T>();
        let mut cursor = 0;
        space.for_each(|c| {
            let idx = self.index(c);
            out[cursor..cursor + esz].copy_from_slice(bytemuck::bytes_of(&self.data[idx]));
            cursor += esz;
        });
        debug_assert_eq!(cursor, out.len(), "pack cursor mismatch");
    }

    fn set(&mut self, space: &IterationSpace<D>, data: &[u8]) {
        let esz = std::mem::size_of::<T>();
        let mut cursor = 0;
        space.for_each(|c| {
            let idx = self.index(c);
            let mut value = T::zeroed();
            bytemuck::bytes_of_mut(&mut value).copy_from_slice(&data[cursor..cursor + esz]);
            self.data[idx] = value;
            cursor += esz;
        });
        debug_assert_eq!(cursor, data.len(), "unpack cursor mismatch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space_1d(a: i64, b: i64) -> IterationSpace<1> {
        IterationSpace::new(Coordinate::new([a]), Coordinate::new([b]))
    }

    #[test]
    fn halo_cells_map_through_offsets() {
        // interior [0..4), one halo cell each side: padded length 6
        let mut raw = [0i32; 6];
        let mut field =
            SimpleField::new(DomainId::new(0), &mut raw, Coordinate::new([1]), Coordinate::new([6]));
        *field.at_mut(Coordinate::new([-1])) = 10;
        *field.at_mut(Coordinate::new([0])) = 20;
        *field.at_mut(Coordinate::new([3])) = 30;
        assert_eq!(raw, [10, 20, 0, 0, 30, 0]);
    }

    #[test]
    fn get_set_round_trip_1d() {
        let mut a_raw = [1i64, 2, 3, 4];
        let mut b_raw = [0i64; 4];
        let a = SimpleField::new(
            DomainId::new(0),
            &mut a_raw,
            Coordinate::new([0]),
            Coordinate::new([4]),
        );
        let mut b = SimpleField::new(
            DomainId::new(1),
            &mut b_raw,
            Coordinate::new([0]),
            Coordinate::new([4]),
        );
        let space = space_1d(1, 2);
        let mut buf = vec![0u8; 2 * 8];
        a.get(&space, &mut buf);
        b.set(&space, &buf);
        assert_eq!(b_raw, [0, 2, 3, 0]);
    }

    #[test]
    fn pack_order_is_row_major_2d() {
        // 2x3 array, no halo
        let mut raw: Vec<u16> = (0..6).collect();
        let field = SimpleField::new(
            DomainId::new(0),
            &mut raw,
            Coordinate::new([0, 0]),
            Coordinate::new([2, 3]),
        );
        let space = IterationSpace::new(Coordinate::new([0, 1]), Coordinate::new([1, 2]));
        let mut buf = vec![0u8; space.size() * 2];
        field.get(&space, &mut buf);
        let expected: &[u16] = &[1, 2, 4, 5];
        assert_eq!(buf, bytemuck::cast_slice::<u16, u8>(expected));
    }
}
