//! Longest strictly-increasing subsequence, O(n log n) patience sorting
//! (spec §4.6 step 6).
//!
//! Anchor candidates are already sorted by book position (`bp`) when they
//! arrive here; this picks the longest subsequence whose ASR position
//! (`ap`) also increases strictly, which is exactly a monotone one-to-one
//! mapping between book and ASR anchor positions.

/// Returns the indices (into `keys`, ascending) of the longest strictly
/// increasing subsequence of `keys`. Ties in length are broken by patience
/// sorting's natural preference for the earliest-found tail of each
/// length, which favors lower `ap` values at each pile.
pub fn longest_increasing_subsequence(keys: &[f64]) -> Vec<usize> {
    if keys.is_empty() {
        return Vec::new();
    }

    // tails[k] = index into `keys` of the smallest tail value for an
    // increasing subsequence of length k+1.
    let mut tails: Vec<usize> = Vec::new();
    let mut predecessors: Vec<Option<usize>> = vec![None; keys.len()];

    for i in 0..keys.len() {
        let value = keys[i];
        let pos = tails.partition_point(|&idx| keys[idx] < value);
        if pos > 0 {
            predecessors[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut result = Vec::with_capacity(tails.len());
    let mut cur = tails.last().copied();
    while let Some(idx) = cur {
        result.push(idx);
        cur = predecessors[idx];
    }
    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(longest_increasing_subsequence(&[]).is_empty());
    }

    #[test]
    fn fully_increasing_keeps_everything() {
        let keys = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(longest_increasing_subsequence(&keys), vec![0, 1, 2, 3]);
    }

    #[test]
    fn drops_out_of_order_entries() {
        // 10 is a spurious early match; true anchors continue 2,3,4,5.
        let keys = vec![10.0, 2.0, 3.0, 1.0, 4.0, 5.0];
        let lis = longest_increasing_subsequence(&keys);
        let values: Vec<f64> = lis.iter().map(|&i| keys[i]).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn strictly_increasing_excludes_repeats() {
        let keys = vec![1.0, 1.0, 2.0];
        let lis = longest_increasing_subsequence(&keys);
        let values: Vec<f64> = lis.iter().map(|&i| keys[i]).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }
}
