use crate::error::{KernelError, Result};

/// Up to four extents, stored promoted to rank 4 by left-padding with 1s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape {
    dims: [usize; 4],
    rank: usize,
}

impl TensorShape {
    pub fn new(extents: &[usize]) -> Result<Self> {
        let rank = extents.len();
        if rank == 0 || rank > 4 { return Err(KernelError::RankOutOfRange(rank)); }
        if extents.iter().any(|&e| e == 0) { return Err(KernelError::NonPositive { what: "tensor extent" }); }
        let mut dims = [1usize; 4];
        dims[4 - rank..].copy_from_slice(extents);
        Ok(Self { dims, rank })
    }

    /// NHWC shorthand.
    pub fn nhwc(n: usize, h: usize, w: usize, c: usize) -> Result<Self> { Self::new(&[n, h, w, c]) }

    pub fn rank(&self) -> usize { self.rank }
    pub fn dims(&self) -> [usize; 4] { self.dims }
    pub fn extents(&self) -> &[usize] { &self.dims[4 - self.rank..] }
    pub fn len(&self) -> usize { self.dims.iter().product() }
    pub fn is_empty(&self) -> bool { false }

    /// Map an axis of the original rank onto the promoted rank-4 layout.
    pub fn promote_axis(&self, axis: usize) -> usize { axis + 4 - self.rank }

    pub fn batch(&self) -> usize { self.dims[0] }
    pub fn height(&self) -> usize { self.dims[1] }
    pub fn width(&self) -> usize { self.dims[2] }
    pub fn channels(&self) -> usize { self.dims[3] }
}

/// Ordered set of at most four distinct axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSet {
    axes: [usize; 4],
    len: usize,
}

impl AxisSet {
    pub fn empty() -> Self { Self { axes: [0; 4], len: 0 } }

    /// Validate `axes` against `rank`: each in range, none repeated.
    pub fn new(axes: &[usize], rank: usize) -> Result<Self> {
        if axes.len() > 4 { return Err(KernelError::RankOutOfRange(axes.len())); }
        let mut out = Self::empty();
        for &a in axes {
            if a >= rank { return Err(KernelError::AxisOutOfRange { axis: a, rank }); }
            if out.contains(a) { return Err(KernelError::RepeatedAxis(a)); }
            out.axes[out.len] = a;
            out.len += 1;
        }
        Ok(out)
    }

    pub fn as_slice(&self) -> &[usize] { &self.axes[..self.len] }
    pub fn len(&self) -> usize { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }
    pub fn contains(&self, axis: usize) -> bool { self.as_slice().contains(&axis) }

    /// Same axes expressed against the rank-4 promotion of `shape`.
    pub fn promoted(&self, shape: &TensorShape) -> Self {
        let mut out = *self;
        for a in &mut out.axes[..out.len] { *a = shape.promote_axis(*a); }
        out
    }

    /// Move the axis with the largest extent to the front, keeping the rest in order.
    pub fn largest_first(&self, dims: &[usize; 4]) -> Self {
        let mut out = *self;
        if out.len < 2 { return out; }
        let mut best = 0usize;
        for i in 1..out.len {
            if dims[out.axes[i]] > dims[out.axes[best]] { best = i; }
        }
        out.axes[..=best].rotate_right(1);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotes_low_rank_shapes() {
        let s = TensorShape::new(&[5, 3]).unwrap();
        assert_eq!(s.dims(), [1, 1, 5, 3]);
        assert_eq!(s.extents(), &[5, 3]);
        assert_eq!(s.promote_axis(0), 2);
        assert_eq!(s.len(), 15);
    }

    #[test]
    fn rejects_zero_extent_and_bad_rank() {
        assert!(TensorShape::new(&[2, 0, 3]).is_err());
        assert_eq!(TensorShape::new(&[]), Err(KernelError::RankOutOfRange(0)));
        assert_eq!(TensorShape::new(&[1, 1, 1, 1, 1]), Err(KernelError::RankOutOfRange(5)));
    }

    #[test]
    fn axis_set_validation() {
        assert_eq!(AxisSet::new(&[0, 3], 3), Err(KernelError::AxisOutOfRange { axis: 3, rank: 3 }));
        assert_eq!(AxisSet::new(&[1, 1], 3), Err(KernelError::RepeatedAxis(1)));
        let a = AxisSet::new(&[2, 0], 3).unwrap();
        assert_eq!(a.as_slice(), &[2, 0]);
    }

    #[test]
    fn largest_axis_moves_first() {
        let a = AxisSet::new(&[0, 1, 3], 4).unwrap();
        let dims = [2, 3, 9, 7];
        assert_eq!(a.largest_first(&dims).as_slice(), &[3, 0, 1]);
    }
}
