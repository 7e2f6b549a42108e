//! Block-structured LSD radix sort with the same pass layout as the GPU
//! kernels: per-block histograms, an exclusive scan over digits, per-block
//! offsets, then a stable scatter.

use crate::renderer::pipelines::radix_sort::{pass_buffers, BLOCK_SIZE, PASSES, RADIX, RADIX_BITS};
use rayon::prelude::*;

const BLOCK: usize = BLOCK_SIZE as usize;
const BINS: usize = RADIX as usize;

#[inline]
fn digit(key: u32, shift: u32) -> usize {
    ((key >> shift) & (RADIX - 1)) as usize
}

/// One digit pass from `(keys_in, values_in)` into `(keys_out, values_out)`.
fn radix_pass(
    keys_in: &[u32],
    values_in: &[u32],
    keys_out: &mut [u32],
    values_out: &mut [u32],
    shift: u32,
) {
    // histogram
    let mut block_offsets: Vec<[u32; BINS]> = keys_in
        .par_chunks(BLOCK)
        .map(|block| {
            let mut counts = [0u32; BINS];
            for &key in block {
                counts[digit(key, shift)] += 1;
            }
            counts
        })
        .collect();

    // scan_bins
    let mut bin_starts = [0u32; BINS];
    let mut running = 0u32;
    for (bin, start) in bin_starts.iter_mut().enumerate() {
        *start = running;
        running += block_offsets.iter().map(|counts| counts[bin]).sum::<u32>();
    }

    // block_offsets
    for (bin, &start) in bin_starts.iter().enumerate() {
        let mut running = start;
        for counts in block_offsets.iter_mut() {
            let count = counts[bin];
            counts[bin] = running;
            running += count;
        }
    }

    // scatter
    for (b, block) in keys_in.chunks(BLOCK).enumerate() {
        let offsets = &mut block_offsets[b];
        for (lane, &key) in block.iter().enumerate() {
            let d = digit(key, shift);
            let dst = offsets[d] as usize;
            offsets[d] += 1;
            keys_out[dst] = key;
            values_out[dst] = values_in[b * BLOCK + lane];
        }
    }
}

/// Sorts pairs ascending by key. Equal keys keep their input order.
pub fn sort_pairs(keys: &[u32], values: &[u32]) -> (Vec<u32>, Vec<u32>) {
    assert_eq!(keys.len(), values.len(), "one value per key");
    let n = keys.len();
    let mut pairs = [
        (keys.to_vec(), values.to_vec()),
        (vec![0u32; n], vec![0u32; n]),
    ];

    for pass in 0..PASSES {
        let (src, _) = pass_buffers(pass);
        let (front, back) = pairs.split_at_mut(1);
        let (input, output) = if src == 0 {
            (&front[0], &mut back[0])
        } else {
            (&back[0], &mut front[0])
        };
        radix_pass(
            &input.0,
            &input.1,
            &mut output.0,
            &mut output.1,
            pass as u32 * RADIX_BITS,
        );
    }

    let [(keys, values), _] = pairs;
    (keys, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn matches_stable_std_sort() {
        let mut rng = StdRng::seed_from_u64(7);
        for n in [0usize, 1, 255, 256, 257, 1000, 4099] {
            let keys: Vec<u32> = (0..n).map(|_| rng.gen()).collect();
            let values: Vec<u32> = (0..n as u32).collect();

            let mut expected: Vec<(u32, u32)> = keys.iter().copied().zip(values.clone()).collect();
            expected.sort_by_key(|&(k, _)| k);

            let (sorted_keys, sorted_values) = sort_pairs(&keys, &values);
            let got: Vec<(u32, u32)> = sorted_keys.into_iter().zip(sorted_values).collect();
            assert_eq!(got, expected, "n = {}", n);
        }
    }

    #[test]
    fn duplicate_keys_keep_input_order() {
        let keys = [5u32, 1, 5, 0xffff_ffff, 1, 5];
        let values = [0u32, 1, 2, 3, 4, 5];
        let (k, v) = sort_pairs(&keys, &values);
        assert_eq!(k, vec![1, 1, 5, 5, 5, 0xffff_ffff]);
        assert_eq!(v, vec![1, 4, 0, 2, 5, 3]);
    }

    #[test]
    fn output_is_a_permutation_of_indices() {
        let mut rng = StdRng::seed_from_u64(99);
        // Narrow key range forces many equal digits in the upper passes.
        let keys: Vec<u32> = (0..3000).map(|_| rng.gen_range(0..64)).collect();
        let values: Vec<u32> = (0..3000).collect();

        let (k, mut v) = sort_pairs(&keys, &values);
        assert!(k.windows(2).all(|w| w[0] <= w[1]));
        v.sort_unstable();
        assert_eq!(v, values);
    }
}
