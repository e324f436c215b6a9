//! Work partitioning across a group.
//!
//! The batched kernel is load-balanced in fixed-size work units: one unit
//! ("warp") covers up to [`COLS_PER_WARP`] columns of one selected row of
//! one member. A member with `cols` columns and selection count `m`
//! contributes `ceil(cols / COLS_PER_WARP) * m` units. The per-member
//! running offsets let the kernel map a flat unit id back to
//! (member, row, column tile) with one search, and the backward pass
//! reuses the identical table, so partition order is group order and
//! nothing about it may depend on runtime state.

use groupsel_common::ceil_div;

/// Columns covered by one work unit: two elements per lane of a 32-lane
/// warp.
pub const COLS_PER_WARP: usize = 64;

/// Work units needed to cover one row of `num_cols` columns. Zero-column
/// members contribute no work units (but still occupy their pointer slots).
pub fn warps_per_row(num_cols: usize) -> usize {
    if num_cols == 0 {
        return 0;
    }
    ceil_div(num_cols, COLS_PER_WARP)
}

/// True when the members disagree on column count, in which case the
/// kernel must read the per-member column table instead of assuming a
/// uniform width.
pub fn use_var_cols(num_cols: &[usize]) -> bool {
    num_cols.windows(2).any(|pair| pair[0] != pair[1])
}

/// Running warp-offset table for one group, built in member order.
#[derive(Debug, Clone)]
pub struct WarpPartition {
    offsets: Vec<i64>,
    next: i64,
}

impl WarpPartition {
    pub fn with_capacity(group_size: usize) -> Self {
        Self { offsets: Vec::with_capacity(group_size + 1), next: 0 }
    }

    /// Record one member's contribution and return its starting offset.
    pub fn push_member(&mut self, num_cols: usize, selection_count: usize) -> i64 {
        let start = self.next;
        self.offsets.push(start);
        self.next += (warps_per_row(num_cols) * selection_count) as i64;
        start
    }

    /// Work units recorded so far; after the last member this is the grand
    /// total that goes into `warp_offsets[group_size]`.
    pub fn total(&self) -> i64 {
        self.next
    }

    /// Append the grand total and yield the finished `group_size + 1`
    /// table.
    pub fn finish(mut self) -> Vec<i64> {
        self.offsets.push(self.next);
        self.offsets
    }

    /// Build the full table for a group in one call.
    pub fn table(num_cols: &[usize], selection_count: usize) -> Vec<i64> {
        let mut partition = Self::with_capacity(num_cols.len());
        for &cols in num_cols {
            partition.push_member(cols, selection_count);
        }
        partition.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warps_per_row_tiles() {
        assert_eq!(warps_per_row(0), 0);
        assert_eq!(warps_per_row(1), 1);
        assert_eq!(warps_per_row(COLS_PER_WARP), 1);
        assert_eq!(warps_per_row(COLS_PER_WARP + 1), 2);
        assert_eq!(warps_per_row(3 * COLS_PER_WARP), 3);
    }

    #[test]
    fn offsets_start_at_zero_and_are_non_decreasing() {
        let table = WarpPartition::table(&[3, 0, 130, 5], 7);
        assert_eq!(table[0], 0);
        assert!(table.windows(2).all(|pair| pair[0] <= pair[1]));
        let expect_total: i64 =
            [3usize, 0, 130, 5].iter().map(|&c| (warps_per_row(c) * 7) as i64).sum();
        assert_eq!(*table.last().unwrap(), expect_total);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn zero_column_member_contributes_nothing() {
        let table = WarpPartition::table(&[4, 0, 4], 2);
        // Members: 2 warps, 0 warps, 2 warps.
        assert_eq!(table, [0, 2, 2, 4]);
    }

    #[test]
    fn two_member_group_offsets() {
        // Shapes (4,3) and (4,5) with m = 3: one warp per row each.
        let table = WarpPartition::table(&[3, 5], 3);
        assert_eq!(table, [0, 3, 6]);
    }

    #[test]
    fn var_cols_detection() {
        assert!(!use_var_cols(&[]));
        assert!(!use_var_cols(&[8]));
        assert!(!use_var_cols(&[8, 8, 8]));
        assert!(use_var_cols(&[8, 8, 9]));
        assert!(use_var_cols(&[3, 5]));
    }

    #[test]
    fn incremental_matches_table() {
        let cols = [64usize, 65, 0, 12];
        let m = 3;
        let mut partition = WarpPartition::with_capacity(cols.len());
        let mut starts = Vec::new();
        for &c in &cols {
            starts.push(partition.push_member(c, m));
        }
        let total = partition.total();
        let table = partition.finish();
        assert_eq!(&table[..cols.len()], starts.as_slice());
        assert_eq!(table[cols.len()], total);
        assert_eq!(table, WarpPartition::table(&cols, m));
    }
}
