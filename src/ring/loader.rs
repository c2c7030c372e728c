//! Streams padded input columns into the ring.
//!
//! The ring always holds the `kernel_w` tap columns of the window for
//! `LoaderState::position`, oldest tap at the ring cursor. Padding is never
//! stored anywhere else: it is synthesized as the input zero point while the
//! column is written.
use super::planner::{ColumnSource, RingLayout};
use super::CircularBuffer;
use crate::error::{ensure_len, Result};
use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderMode {
    /// Taps are adjacent columns; each step writes `min(stride, kernel_w)` new ones.
    Dense,
    /// Taps are `dilation_w` apart; reuse is possible only when the stride is a
    /// whole number of tap spacings.
    Dilated,
}

impl LoaderMode {
    pub fn for_layout(layout: &RingLayout) -> Self {
        if layout.is_dilated() { LoaderMode::Dilated } else { LoaderMode::Dense }
    }
}

/// Progress along the padded row. `next_column` is one past the furthest
/// column sourced so far; the two `*_consumed` counters split that span into
/// leading padding and real input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderState {
    pub position: usize,
    pub next_column: usize,
    pub left_pad_consumed: usize,
    pub width_consumed: usize,
    pub last_written: usize,
}

impl LoaderState {
    /// Offset, within one input row, of the first column not yet consumed.
    pub fn input_cursor(&self, layout: &RingLayout) -> usize { self.width_consumed * layout.channels }

    fn consume_through(&mut self, layout: &RingLayout, col: usize) {
        if col < self.next_column { return; }
        self.next_column = col + 1;
        self.left_pad_consumed = self.next_column.min(layout.plan.left);
        self.width_consumed = self.next_column.saturating_sub(layout.plan.left).min(layout.width);
    }
}

fn write_plane<T: Copy>(ring: &mut CircularBuffer<'_, T>, layout: &RingLayout, image: &[T], source: ColumnSource, pad: T) -> usize {
    let c = layout.channels;
    ring.fill(pad, layout.plan.top * c);
    match source {
        ColumnSource::Input(x) => {
            let row_stride = layout.width * c;
            for r in 0..layout.height {
                let off = r * row_stride + x * c;
                ring.write(&image[off..off + c]);
            }
        }
        ColumnSource::LeftPad | ColumnSource::RightPad => ring.fill(pad, layout.height * c),
    }
    ring.fill(pad, layout.plan.bottom * c);
    layout.plane_len()
}

/// Fill the ring with the window for output column 0. Returns elements written.
pub fn init_fill<T: Copy>(ring: &mut CircularBuffer<'_, T>, layout: &RingLayout, state: &mut LoaderState, image: &[T], pad: T) -> Result<usize> {
    ensure_len("input image", layout.image_len(), image.len())?;
    ring.reset();
    *state = LoaderState::default();
    let mut written = 0;
    for tap in 0..layout.kernel_w {
        let col = layout.tap_column(0, tap);
        written += write_plane(ring, layout, image, layout.column_source(col), pad);
        state.consume_through(layout, col);
    }
    state.last_written = written;
    trace!("ring primed: {} planes, {} elements", layout.kernel_w, written);
    Ok(written)
}

/// Move the window one output column to the right (adjacent taps).
pub fn slide<T: Copy>(ring: &mut CircularBuffer<'_, T>, layout: &RingLayout, state: &mut LoaderState, image: &[T], pad: T) -> Result<usize> {
    ensure_len("input image", layout.image_len(), image.len())?;
    let (kw, stride) = (layout.kernel_w, layout.stride_w);
    if stride > kw {
        // Columns between windows are never read; step over them.
        let skip_to = state.next_column + (stride - kw);
        state.consume_through(layout, skip_to - 1);
    }
    let mut written = 0;
    for _ in 0..stride.min(kw) {
        let col = state.next_column;
        written += write_plane(ring, layout, image, layout.column_source(col), pad);
        state.consume_through(layout, col);
    }
    state.position += 1;
    state.last_written = written;
    trace!("slide to column {}: {} elements, cursor {}", state.position, written, state.input_cursor(layout));
    Ok(written)
}

/// Move the window one output column to the right (taps `dilation_w` apart).
pub fn slide_dilated<T: Copy>(ring: &mut CircularBuffer<'_, T>, layout: &RingLayout, state: &mut LoaderState, image: &[T], pad: T) -> Result<usize> {
    ensure_len("input image", layout.image_len(), image.len())?;
    let (kw, stride, dilation) = (layout.kernel_w, layout.stride_w, layout.dilation_w);
    let next = state.position + 1;
    // New tap j equals old tap j + stride/dilation when that divides evenly.
    let shift_taps = if stride % dilation == 0 { stride / dilation } else { kw };
    let fresh = shift_taps.min(kw);
    let mut written = 0;
    for tap in kw - fresh..kw {
        let col = layout.tap_column(next, tap);
        written += write_plane(ring, layout, image, layout.column_source(col), pad);
        state.consume_through(layout, col);
    }
    state.position = next;
    state.last_written = written;
    trace!("dilated slide to column {}: {} fresh taps", next, fresh);
    Ok(written)
}

/// Dispatch to the slide that matches `mode`.
pub fn update<T: Copy>(mode: LoaderMode, ring: &mut CircularBuffer<'_, T>, layout: &RingLayout, state: &mut LoaderState, image: &[T], pad: T) -> Result<usize> {
    match mode {
        LoaderMode::Dense => slide(ring, layout, state, image, pad),
        LoaderMode::Dilated => slide_dilated(ring, layout, state, image, pad),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::planner::PaddingPlan;

    fn layout(width: usize, kernel_w: usize, stride_w: usize, dilation_w: usize, left: usize, right: usize) -> RingLayout {
        RingLayout { height: 1, width, channels: 1, kernel_w, stride_w, dilation_w, plan: PaddingPlan { top: 0, bottom: 0, left, right } }
    }

    #[test]
    fn dense_slide_tracks_cursor_through_padding() {
        let l = layout(4, 2, 1, 1, 1, 1);
        let image = [1i8, 2, 3, 4];
        let mut scratch = vec![0i8; l.ring_len()];
        let mut ring = CircularBuffer::new(&mut scratch, l.ring_len()).unwrap();
        let mut st = LoaderState::default();
        init_fill(&mut ring, &l, &mut st, &image, 0).unwrap();
        assert_eq!(ring.snapshot(), vec![0, 1]);
        assert_eq!((st.left_pad_consumed, st.width_consumed), (1, 1));
        for expect in [[1, 2], [2, 3], [3, 4], [4, 0]] {
            slide(&mut ring, &l, &mut st, &image, 0).unwrap();
            assert_eq!(ring.snapshot(), expect.to_vec());
        }
        assert_eq!(st.width_consumed, 4);
        assert_eq!(st.next_column, 6);
    }

    #[test]
    fn stride_past_kernel_skips_columns() {
        let l = layout(7, 2, 3, 1, 0, 0);
        let image = [10i8, 11, 12, 13, 14, 15, 16];
        let mut scratch = vec![0i8; l.ring_len()];
        let mut ring = CircularBuffer::new(&mut scratch, l.ring_len()).unwrap();
        let mut st = LoaderState::default();
        init_fill(&mut ring, &l, &mut st, &image, 0).unwrap();
        let w = slide(&mut ring, &l, &mut st, &image, 0).unwrap();
        assert_eq!(w, 2);
        assert_eq!(ring.snapshot(), vec![13, 14]);
        slide(&mut ring, &l, &mut st, &image, 0).unwrap();
        assert_eq!(ring.snapshot(), vec![16, 0]);
    }

    #[test]
    fn dilated_slide_reuses_taps_when_stride_divides() {
        // taps at 0,2,4 -> 2,4,6 -> 4,6,8 : one fresh tap per step
        let l = layout(9, 3, 2, 2, 0, 0);
        let image: Vec<i8> = (0..9).collect();
        let mut scratch = vec![0i8; l.ring_len()];
        let mut ring = CircularBuffer::new(&mut scratch, l.ring_len()).unwrap();
        let mut st = LoaderState::default();
        init_fill(&mut ring, &l, &mut st, &image, 0).unwrap();
        assert_eq!(ring.snapshot(), vec![0, 2, 4]);
        assert_eq!(slide_dilated(&mut ring, &l, &mut st, &image, 0).unwrap(), 1);
        assert_eq!(ring.snapshot(), vec![2, 4, 6]);
        slide_dilated(&mut ring, &l, &mut st, &image, 0).unwrap();
        assert_eq!(ring.snapshot(), vec![4, 6, 8]);
        assert_eq!(st.width_consumed, 9);
    }

    #[test]
    fn dilated_slide_rewrites_when_stride_is_not_a_multiple() {
        // taps at 0,2 -> 3,5
        let l = layout(6, 2, 3, 2, 0, 0);
        let image: Vec<i8> = (0..6).collect();
        let mut scratch = vec![0i8; l.ring_len()];
        let mut ring = CircularBuffer::new(&mut scratch, l.ring_len()).unwrap();
        let mut st = LoaderState::default();
        init_fill(&mut ring, &l, &mut st, &image, 0).unwrap();
        assert_eq!(slide_dilated(&mut ring, &l, &mut st, &image, 0).unwrap(), 2);
        assert_eq!(ring.snapshot(), vec![3, 5]);
    }
}
