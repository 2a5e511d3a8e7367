//! Splits the rows of the grid between the workers of a generation.

use std::ops::Range;

use crate::error::{PoolError, Result};

/// A half-open range of grid rows owned by one worker.
pub type RowRange = Range<usize>;

/// Divide the rows `0..rows` into `workers` contiguous, nearly equal
/// ranges.  The first `rows % workers` ranges get one extra row.  When
/// there are more workers than rows the trailing ranges are empty and
/// all sit at `rows..rows`; they never overlap a real row.
pub fn divide_into_ranges(rows: usize, workers: usize) -> Result<Vec<RowRange>> {
    if workers == 0 {
        return Err(PoolError::ZeroWorkers);
    }

    let base = rows / workers;
    let mut remainder = rows % workers;
    let mut start = 0;
    let mut ranges = Vec::with_capacity(workers);
    for _ in 0..workers {
        let mut size = base;
        if remainder > 0 {
            size += 1;
            remainder -= 1;
        }
        ranges.push(start..start + size);
        start += size;
    }
    Ok(ranges)
}
