//! Connected component analysis.
//!
//! Delineations sometimes contain satellite specks disconnected from the
//! main lesion: stray voxels from semi-automatic growing, or debris left
//! behind by resegmentation. Reducing a mask to its largest 6-connected
//! component keeps the morphology features honest about the primary
//! region.

use ndarray::Array3;

/// Reduce `mask` to its largest 6-connected component.
///
/// Returns the reduced mask and how many components were found. Ties on
/// size keep the component discovered first in scan order, so the result
/// is deterministic. An empty mask stays empty with zero components.
#[must_use = "returns the reduced mask"]
pub fn largest_component(mask: &Array3<bool>) -> (Array3<bool>, usize) {
    let dims = mask.dim();
    let mut labels = Array3::<u32>::zeros(dims);
    let mut sizes: Vec<usize> = Vec::new();
    let mut stack: Vec<(usize, usize, usize)> = Vec::new();

    for ((i, j, k), &inside) in mask.indexed_iter() {
        if !inside || labels[[i, j, k]] != 0 {
            continue;
        }
        #[allow(clippy::cast_possible_truncation)]
        let label = (sizes.len() + 1) as u32;
        let mut size = 0_usize;
        labels[[i, j, k]] = label;
        stack.push((i, j, k));
        while let Some(voxel) = stack.pop() {
            size += 1;
            for neighbour in neighbours_6(voxel, dims) {
                if mask[neighbour] && labels[neighbour] == 0 {
                    labels[neighbour] = label;
                    stack.push(neighbour);
                }
            }
        }
        sizes.push(size);
    }

    let Some(largest) = sizes
        .iter()
        .enumerate()
        // max_by_key returns the last maximum; scan manually to keep
        // the first one on ties.
        .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
        .map(|(index, _)| index)
    else {
        return (Array3::from_elem(dims, false), 0);
    };

    #[allow(clippy::cast_possible_truncation)]
    let winner = (largest + 1) as u32;
    (labels.mapv(|label| label == winner), sizes.len())
}

/// Face-adjacent neighbours inside the grid.
fn neighbours_6(
    (i, j, k): (usize, usize, usize),
    dims: (usize, usize, usize),
) -> impl Iterator<Item = (usize, usize, usize)> {
    let mut out: [Option<(usize, usize, usize)>; 6] = [None; 6];
    let mut slot = 0;
    let mut push = |candidate: Option<(usize, usize, usize)>| {
        out[slot] = candidate;
        slot += 1;
    };
    push(i.checked_sub(1).map(|i| (i, j, k)));
    push((i + 1 < dims.0).then_some((i + 1, j, k)));
    push(j.checked_sub(1).map(|j| (i, j, k)));
    push((j + 1 < dims.1).then_some((i, j + 1, k)));
    push(k.checked_sub(1).map(|k| (i, j, k)));
    push((k + 1 < dims.2).then_some((i, j, k + 1)));
    out.into_iter().flatten()
}
