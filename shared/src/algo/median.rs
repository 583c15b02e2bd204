//! Quickselect median.
//!
//! The guide loop computes a background estimate for every frame, so the
//! median uses quickselect (Numerical-Recipes style partitioning) instead of
//! a full sort. For even-length input this selects the lower-middle element,
//! which is what the background subtraction wants: a value that at least one
//! pixel actually took.

/// Median of a slice by quickselect; the slice is reordered in place.
///
/// Returns 0.0 for an empty slice.
pub fn quickselect_median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let target = (values.len() - 1) / 2;
    let mut low = 0;
    let mut high = values.len() - 1;

    loop {
        if high <= low {
            return values[target];
        }
        if high == low + 1 {
            if values[low] > values[high] {
                values.swap(low, high);
            }
            return values[target];
        }

        // Median-of-three pivot: order low, middle, high and stash the
        // pivot at low+1.
        let middle = (low + high) / 2;
        if values[middle] > values[high] {
            values.swap(middle, high);
        }
        if values[low] > values[high] {
            values.swap(low, high);
        }
        if values[middle] > values[low] {
            values.swap(middle, low);
        }
        values.swap(middle, low + 1);

        // Partition around the pivot at low.
        let mut ll = low + 1;
        let mut hh = high;
        loop {
            loop {
                ll += 1;
                if values[low] <= values[ll] {
                    break;
                }
            }
            loop {
                hh -= 1;
                if values[hh] <= values[low] {
                    break;
                }
            }
            if hh < ll {
                break;
            }
            values.swap(ll, hh);
        }
        values.swap(low, hh);

        if hh <= target {
            low = ll;
        }
        if hh >= target {
            high = hh.wrapping_sub(1);
            if hh == 0 {
                return values[target];
            }
        }
    }
}
