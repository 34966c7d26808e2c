use thiserror::Error;

use crate::model::Thread;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OneToManyError {
    #[error("keys must be sorted ascending: key {key} at row {row} follows {previous}")]
    Unsorted { row: usize, key: usize, previous: usize },
}

/// Maps each key of a sorted key column to the rows holding it.
///
/// Built once; a changed key column needs a new index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneToManyIndex {
    /// `offsets[k]..offsets[k + 1]` are the rows of key `k`.
    offsets: Vec<usize>,
    /// Row ids, in key order. Identity unless the key column was sorted
    /// from an unsorted one.
    rows: Option<Vec<usize>>,
}

impl OneToManyIndex {
    pub fn new(keys: &[usize]) -> Result<Self, OneToManyError> {
        for (row, pair) in keys.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(OneToManyError::Unsorted {
                    row: row + 1,
                    key: pair[1],
                    previous: pair[0],
                });
            }
        }
        let max = keys.last().map_or(0, |&k| k + 1);
        let mut offsets = Vec::with_capacity(max + 1);
        let mut row = 0;
        for key in 0..max {
            while row < keys.len() && keys[row] < key {
                row += 1;
            }
            offsets.push(row);
        }
        offsets.push(keys.len());
        Ok(Self {
            offsets,
            rows: None,
        })
    }

    /// Rows of every key in `keys`, grouped in the order the keys are
    /// given. Keys past the largest indexed key have no rows.
    pub fn row_indices(&self, keys: &[usize]) -> Vec<usize> {
        let mut out = Vec::new();
        for &key in keys {
            let (Some(&start), Some(&end)) = (self.offsets.get(key), self.offsets.get(key + 1)) else {
                continue;
            };
            match &self.rows {
                Some(rows) => out.extend_from_slice(&rows[start..end]),
                None => out.extend(start..end),
            }
        }
        out
    }
}

/// Index from stack to the samples that resolve to it. Samples without a
/// stack are not indexed.
pub fn sample_index_for_stacks(thread: &Thread) -> OneToManyIndex {
    let stacks = &thread.samples().stack;
    let mut order: Vec<usize> = (0..stacks.len()).filter(|&i| stacks[i].is_some()).collect();
    order.sort_by_key(|&i| stacks[i]);
    let keys: Vec<usize> = order.iter().filter_map(|&i| stacks[i]).collect();
    match OneToManyIndex::new(&keys) {
        Ok(index) => OneToManyIndex {
            rows: Some(order),
            ..index
        },
        Err(_) => OneToManyIndex::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::thread_from_samples;

    #[test]
    fn groups_rows_by_key() {
        let index = OneToManyIndex::new(&[0, 0, 2, 2, 2, 5]).unwrap();
        assert_eq!(index.row_indices(&[2]), vec![2, 3, 4]);
        assert_eq!(index.row_indices(&[0, 5]), vec![0, 1, 5]);
        assert_eq!(index.row_indices(&[5, 0]), vec![5, 0, 1]);
        assert!(index.row_indices(&[1, 3, 4]).is_empty());
        assert!(index.row_indices(&[6, 100]).is_empty());
    }

    #[test]
    fn rejects_unsorted_keys() {
        assert_eq!(
            OneToManyIndex::new(&[0, 3, 1]),
            Err(OneToManyError::Unsorted {
                row: 2,
                key: 1,
                previous: 3
            })
        );
    }

    #[test]
    fn empty_keys() {
        let index = OneToManyIndex::new(&[]).unwrap();
        assert!(index.row_indices(&[0]).is_empty());
    }

    #[test]
    fn samples_by_stack() {
        let thread = thread_from_samples(&[("A;B", 1.0), ("A", 1.0), ("A;B", 1.0), ("", 1.0)]);
        let index = sample_index_for_stacks(&thread);
        assert_eq!(index.row_indices(&[1]), vec![0, 2]);
        assert_eq!(index.row_indices(&[0, 1]), vec![1, 0, 2]);
    }
}
