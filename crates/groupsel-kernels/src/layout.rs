//! Packed argument buffer layout.
//!
//! A grouped launch passes all per-member metadata to the kernel in one
//! contiguous block of 64-bit slots: three pointer tables, the warp-offset
//! table, and the packed column-count table. Batching the metadata this way
//! replaces one transfer per member with a single transfer per dispatch.
//!
//! The layout is described by a named, order-preserving list of section
//! descriptors; slot offsets fall out of a running prefix sum. A layout is
//! computed once per dispatch and resolved twice, against the host staging
//! slice (typed sub-slices for filling) and against the device base address
//! after the transfer (raw section addresses for the kernel). Both
//! resolutions read the same descriptor list, so they cannot disagree.
//!
//! The backward pass stages a smaller two-section pointer table through the
//! same machinery.

use groupsel_common::ceil_div;

/// Bytes per metadata slot.
pub const SLOT_BYTES: usize = std::mem::size_of::<i64>();

/// 32-bit values packed into one 64-bit slot.
pub const I32_PER_SLOT: usize = SLOT_BYTES / std::mem::size_of::<i32>();

/// Name and length (in 64-bit slots) of one metadata section.
#[derive(Debug, Clone, Copy)]
pub struct SectionSpec {
    pub name: &'static str,
    pub slots: usize,
}

/// One laid-out section: starting slot and length.
#[derive(Debug, Clone, Copy)]
pub struct Section {
    pub name: &'static str,
    pub offset: usize,
    pub slots: usize,
}

impl Section {
    /// Byte range of this section within the packed buffer.
    pub fn byte_range(&self) -> std::ops::Range<usize> {
        self.offset * SLOT_BYTES..(self.offset + self.slots) * SLOT_BYTES
    }
}

/// Typed host-side views of the five forward sections.
pub struct ForwardStagingViews<'a> {
    pub input_ptrs: &'a mut [i64],
    pub output_ptrs: &'a mut [i64],
    pub indices_ptrs: &'a mut [i64],
    pub warp_offsets: &'a mut [i64],
    pub num_cols: &'a mut [i32],
}

/// Device addresses of the five forward sections.
#[derive(Debug, Clone, Copy)]
pub struct ForwardDeviceArgs {
    pub input_ptrs: u64,
    pub output_ptrs: u64,
    pub indices_ptrs: u64,
    pub warp_offsets: u64,
    pub num_cols: u64,
}

/// Typed host-side views of the two backward sections.
pub struct BackwardStagingViews<'a> {
    pub grad_output_ptrs: &'a mut [i64],
    pub grad_input_ptrs: &'a mut [i64],
}

/// Device addresses of the two backward sections.
#[derive(Debug, Clone, Copy)]
pub struct BackwardDeviceArgs {
    pub grad_output_ptrs: u64,
    pub grad_input_ptrs: u64,
}

/// Prefix-summed layout over an ordered section list.
#[derive(Debug, Clone)]
pub struct ArgsLayout {
    group_size: usize,
    sections: Vec<Section>,
    total_slots: usize,
}

impl ArgsLayout {
    fn new(group_size: usize, specs: &[SectionSpec]) -> Self {
        let mut sections = Vec::with_capacity(specs.len());
        let mut offset = 0;
        for spec in specs {
            sections.push(Section { name: spec.name, offset, slots: spec.slots });
            offset += spec.slots;
        }
        Self { group_size, sections, total_slots: offset }
    }

    /// Forward layout: the five sections in kernel-ABI order. Pointer
    /// tables hold one slot per member, the warp-offset table one extra
    /// slot for the grand total, and the column-count table packs two
    /// 32-bit values per slot.
    pub fn forward(group_size: usize) -> Self {
        Self::new(
            group_size,
            &[
                SectionSpec { name: "input_ptrs", slots: group_size },
                SectionSpec { name: "output_ptrs", slots: group_size },
                SectionSpec { name: "indices_ptrs", slots: group_size },
                SectionSpec { name: "warp_offsets", slots: group_size + 1 },
                SectionSpec { name: "num_cols", slots: ceil_div(group_size, I32_PER_SLOT) },
            ],
        )
    }

    /// Backward layout: the two gradient pointer tables.
    pub fn backward(group_size: usize) -> Self {
        Self::new(
            group_size,
            &[
                SectionSpec { name: "grad_output_ptrs", slots: group_size },
                SectionSpec { name: "grad_input_ptrs", slots: group_size },
            ],
        )
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Total buffer size in 64-bit slots.
    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    /// Total buffer size in bytes.
    pub fn total_bytes(&self) -> usize {
        self.total_slots * SLOT_BYTES
    }

    /// The laid-out sections, in buffer order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn section_addr(&self, base_addr: u64, index: usize) -> u64 {
        base_addr + (self.sections[index].offset * SLOT_BYTES) as u64
    }

    /// Materialize typed sub-views of a forward staging buffer.
    ///
    /// Panics if `slots` does not match the layout; staging buffers are
    /// allocated from the same layout, so a mismatch is a caller bug.
    pub fn split_forward<'a>(&self, slots: &'a mut [i64]) -> ForwardStagingViews<'a> {
        assert_eq!(slots.len(), self.total_slots, "staging buffer does not match layout");
        debug_assert_eq!(self.sections.len(), 5);
        debug_assert_eq!(self.sections[0].name, "input_ptrs");
        debug_assert_eq!(self.sections[4].name, "num_cols");

        let (input_ptrs, rest) = slots.split_at_mut(self.sections[0].slots);
        let (output_ptrs, rest) = rest.split_at_mut(self.sections[1].slots);
        let (indices_ptrs, rest) = rest.split_at_mut(self.sections[2].slots);
        let (warp_offsets, num_cols_slots) = rest.split_at_mut(self.sections[3].slots);
        // Two i32 values per slot; only the first `group_size` are real.
        let num_cols = &mut bytemuck::cast_slice_mut::<i64, i32>(num_cols_slots)[..self.group_size];
        ForwardStagingViews { input_ptrs, output_ptrs, indices_ptrs, warp_offsets, num_cols }
    }

    /// Resolve forward section addresses against a device-side base.
    pub fn resolve_forward(&self, base_addr: u64) -> ForwardDeviceArgs {
        debug_assert_eq!(self.sections.len(), 5);
        ForwardDeviceArgs {
            input_ptrs: self.section_addr(base_addr, 0),
            output_ptrs: self.section_addr(base_addr, 1),
            indices_ptrs: self.section_addr(base_addr, 2),
            warp_offsets: self.section_addr(base_addr, 3),
            num_cols: self.section_addr(base_addr, 4),
        }
    }

    /// Materialize typed sub-views of a backward staging buffer.
    pub fn split_backward<'a>(&self, slots: &'a mut [i64]) -> BackwardStagingViews<'a> {
        assert_eq!(slots.len(), self.total_slots, "staging buffer does not match layout");
        debug_assert_eq!(self.sections.len(), 2);
        debug_assert_eq!(self.sections[0].name, "grad_output_ptrs");

        let (grad_output_ptrs, grad_input_ptrs) = slots.split_at_mut(self.sections[0].slots);
        BackwardStagingViews { grad_output_ptrs, grad_input_ptrs }
    }

    /// Resolve backward section addresses against a device-side base.
    pub fn resolve_backward(&self, base_addr: u64) -> BackwardDeviceArgs {
        debug_assert_eq!(self.sections.len(), 2);
        BackwardDeviceArgs {
            grad_output_ptrs: self.section_addr(base_addr, 0),
            grad_input_ptrs: self.section_addr(base_addr, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_offsets_odd_group() {
        let layout = ArgsLayout::forward(3);
        let offsets: Vec<usize> = layout.sections().iter().map(|s| s.offset).collect();
        let slots: Vec<usize> = layout.sections().iter().map(|s| s.slots).collect();
        assert_eq!(slots, [3, 3, 3, 4, 2]);
        assert_eq!(offsets, [0, 3, 6, 9, 13]);
        assert_eq!(layout.total_slots(), 15);
        assert_eq!(layout.total_bytes(), 120);
    }

    #[test]
    fn forward_offsets_even_group() {
        let layout = ArgsLayout::forward(4);
        let slots: Vec<usize> = layout.sections().iter().map(|s| s.slots).collect();
        // num_cols packs two i32 per slot: ceil(4 / 2) = 2.
        assert_eq!(slots, [4, 4, 4, 5, 2]);
        assert_eq!(layout.total_slots(), 19);
    }

    #[test]
    fn sections_are_disjoint_and_cover_buffer() {
        for group_size in [1usize, 2, 3, 7, 8, 33] {
            let layout = ArgsLayout::forward(group_size);
            let mut covered = 0usize;
            for (i, a) in layout.sections().iter().enumerate() {
                covered += a.byte_range().len();
                for b in layout.sections().iter().skip(i + 1) {
                    let (ra, rb) = (a.byte_range(), b.byte_range());
                    assert!(
                        ra.end <= rb.start || rb.end <= ra.start,
                        "sections {} and {} overlap for group_size {}",
                        a.name,
                        b.name,
                        group_size
                    );
                }
            }
            assert_eq!(covered, layout.total_bytes());
        }
    }

    #[test]
    fn split_forward_views_have_expected_lengths() {
        let layout = ArgsLayout::forward(5);
        let mut slots = vec![0i64; layout.total_slots()];
        let views = layout.split_forward(&mut slots);
        assert_eq!(views.input_ptrs.len(), 5);
        assert_eq!(views.output_ptrs.len(), 5);
        assert_eq!(views.indices_ptrs.len(), 5);
        assert_eq!(views.warp_offsets.len(), 6);
        assert_eq!(views.num_cols.len(), 5);
    }

    #[test]
    fn num_cols_packing_does_not_clobber_neighbors() {
        let layout = ArgsLayout::forward(3);
        let mut slots = vec![0i64; layout.total_slots()];
        {
            let views = layout.split_forward(&mut slots);
            views.warp_offsets.copy_from_slice(&[10, 20, 30, 40]);
            views.num_cols.copy_from_slice(&[7, 8, 9]);
        }
        let views = layout.split_forward(&mut slots);
        assert_eq!(views.warp_offsets, &[10, 20, 30, 40]);
        assert_eq!(views.num_cols, &[7, 8, 9]);
    }

    #[test]
    fn resolve_agrees_with_section_offsets() {
        let layout = ArgsLayout::forward(4);
        let base = 0x1000u64;
        let dev = layout.resolve_forward(base);
        let expect: Vec<u64> = layout
            .sections()
            .iter()
            .map(|s| base + (s.offset * SLOT_BYTES) as u64)
            .collect();
        assert_eq!(
            [dev.input_ptrs, dev.output_ptrs, dev.indices_ptrs, dev.warp_offsets, dev.num_cols],
            expect.as_slice()
        );
    }

    #[test]
    fn backward_layout_two_sections() {
        let layout = ArgsLayout::backward(6);
        assert_eq!(layout.total_slots(), 12);
        let mut slots = vec![0i64; 12];
        let views = layout.split_backward(&mut slots);
        assert_eq!(views.grad_output_ptrs.len(), 6);
        assert_eq!(views.grad_input_ptrs.len(), 6);
        let dev = layout.resolve_backward(0);
        assert_eq!(dev.grad_output_ptrs, 0);
        assert_eq!(dev.grad_input_ptrs, (6 * SLOT_BYTES) as u64);
    }
}
