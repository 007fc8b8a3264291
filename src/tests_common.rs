//! Key-generator helpers shared by property tests and benchmarks across the
//! crate, adapted from the teacher's `tests_common` module.

use std::{collections::HashSet, iter};

use crate::{
    nodes::{operations::insert, OpaqueNodePtr},
    AsBytes,
};

/// Generate an iterator of bytestring keys, with increasing length up to a
/// maximum value.
///
/// Each key has the form `[0*, u8::MAX]`, meaning zero or more 0 values,
/// followed by a single `u8::MAX` value. The final `u8::MAX` value ensures
/// no key generated here is a byte-prefix of another.
///
/// # Panics
///  - Panics if `max_len` is 0.
pub fn generate_keys_skewed(max_len: usize) -> impl Iterator<Item = Box<[u8]>> {
    assert!(max_len > 0, "the fixed key length must be greater than 0");

    iter::successors(Some(vec![u8::MAX; 1].into_boxed_slice()), move |prev| {
        if prev.len() < max_len {
            let mut key = vec![u8::MIN; prev.len()];
            key.push(u8::MAX);
            Some(key.into_boxed_slice())
        } else {
            None
        }
    })
}

/// Generate an iterator of bytestring keys, all with the same length.
///
/// `level_widths` specifies how many distinct values each digit of the key
/// takes on: `[3, 2, 1]` generates length-3 keys with 4 distinct values in
/// the first digit, 3 in the second, 2 in the third, `(3+1)*(2+1)*(1+1)`
/// keys in total.
///
/// # Panics
///  - Panics if `KEY_LENGTH` is 0.
///  - Panics if any entry of `level_widths` is 0.
pub fn generate_key_fixed_length<const KEY_LENGTH: usize>(
    level_widths: [u8; KEY_LENGTH],
) -> impl Iterator<Item = Box<[u8]>> {
    struct FixedLengthKeys<const KEY_LENGTH: usize> {
        increments: [u8; KEY_LENGTH],
        next_value: Option<Box<[u8]>>,
    }

    impl<const KEY_LENGTH: usize> FixedLengthKeys<KEY_LENGTH> {
        fn new(level_widths: [u8; KEY_LENGTH]) -> Self {
            fn div_ceil(lhs: u8, rhs: u8) -> u8 {
                let d = lhs / rhs;
                let r = lhs % rhs;
                if r > 0 && rhs > 0 {
                    d + 1
                } else {
                    d
                }
            }

            assert!(KEY_LENGTH > 0, "the fixed key length must be greater than 0");
            assert!(
                level_widths.iter().all(|value_stops| *value_stops > 0),
                "the number of distinct values for each key digit must be greater than 0"
            );

            let increments = level_widths.map(|value_stops| div_ceil(u8::MAX, value_stops));

            FixedLengthKeys {
                increments,
                next_value: Some(vec![u8::MIN; KEY_LENGTH].into_boxed_slice()),
            }
        }
    }

    impl<const KEY_LENGTH: usize> Iterator for FixedLengthKeys<KEY_LENGTH> {
        type Item = Box<[u8]>;

        fn next(&mut self) -> Option<Self::Item> {
            let next_value = self.next_value.take()?;

            if next_value.iter().all(|digit| *digit == u8::MAX) {
                return Some(next_value);
            }

            let mut new_next_value = next_value.clone();
            for idx in (0..new_next_value.len()).rev() {
                if new_next_value[idx] == u8::MAX {
                    new_next_value[idx] = u8::MIN;
                } else {
                    new_next_value[idx] = new_next_value[idx].saturating_add(self.increments[idx]);
                    break;
                }
            }

            self.next_value = Some(new_next_value);
            Some(next_value)
        }
    }

    FixedLengthKeys::new(level_widths)
}

/// A single expansion applied by [`generate_key_with_prefix`]: take the byte
/// at `base_index` and repeat it `expanded_length` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixExpansion {
    /// The index in the fixed-length key template to expand.
    pub base_index: usize,
    /// The number of copies of that byte to emit.
    pub expanded_length: usize,
}

/// Generate an iterator of fixed-length bytestring keys where specific
/// digits are expanded into runs of repeated bytes, simulating keys that
/// share long common prefixes at particular offsets.
///
/// # Panics
///  - Panics if any `PrefixExpansion` has `expanded_length` equal to 0.
///  - Panics if any `PrefixExpansion` has `base_index` out of range, or a
///    `base_index` shared with another expansion.
pub fn generate_key_with_prefix<const KEY_LENGTH: usize>(
    level_widths: [u8; KEY_LENGTH],
    prefix_expansions: impl AsRef<[PrefixExpansion]>,
) -> impl Iterator<Item = Box<[u8]>> {
    fn apply_expansions_to_key(
        old_key: &[u8],
        new_key_template: &[u8],
        sorted_expansions: &[PrefixExpansion],
    ) -> Box<[u8]> {
        let mut new_key: Box<[u8]> = new_key_template.into();
        let mut new_key_index = 0usize;
        let mut old_key_index = 0usize;

        for expansion in sorted_expansions {
            let before_len = expansion.base_index - old_key_index;
            new_key[new_key_index..(new_key_index + before_len)]
                .copy_from_slice(&old_key[old_key_index..expansion.base_index]);
            new_key[(new_key_index + before_len)..(new_key_index + before_len + expansion.expanded_length)]
                .fill(old_key[expansion.base_index]);

            old_key_index = expansion.base_index + 1;
            new_key_index += before_len + expansion.expanded_length;
        }

        new_key[new_key_index..].copy_from_slice(&old_key[old_key_index..]);

        new_key
    }

    let expansions = prefix_expansions.as_ref();

    assert!(
        expansions.iter().all(|expand| expand.base_index < KEY_LENGTH),
        "the prefix expansion index must be less than the key length"
    );
    assert!(
        expansions.iter().all(|expand| expand.expanded_length > 0),
        "the prefix expansion length must be greater than 0"
    );
    {
        let mut uniq_indices = HashSet::new();
        assert!(
            expansions.iter().all(|expand| uniq_indices.insert(expand.base_index)),
            "the prefix expansion index must be unique"
        );
    }

    let mut sorted_expansions = expansions.to_vec();
    sorted_expansions.sort_by_key(|expand| expand.base_index);

    let full_key_len = expansions
        .iter()
        .map(|expand| expand.expanded_length - 1)
        .sum::<usize>()
        + KEY_LENGTH;
    let full_key_template = vec![u8::MIN; full_key_len].into_boxed_slice();

    generate_key_fixed_length(level_widths)
        .map(move |key| apply_expansions_to_key(&key, &full_key_template, &sorted_expansions))
}

/// Build a single-threaded tree directly out of an entry iterator, via the
/// node engine's `insert` operation, for tests and benchmarks that want a
/// populated tree without going through [`crate::collections::RawTreeMap`]'s
/// bookkeeping.
///
/// # Panics
/// Panics if `entries_it` yields no entries.
pub(crate) fn setup_tree_from_entries<V, const PREFIX_LEN: usize>(
    entries_it: impl Iterator<Item = (Box<[u8]>, V)>,
) -> OpaqueNodePtr<Box<[u8]>, V, PREFIX_LEN>
where
    Box<[u8]>: AsBytes,
{
    let mut root: Option<OpaqueNodePtr<Box<[u8]>, V, PREFIX_LEN>> = None;
    for (key, value) in entries_it {
        unsafe { insert(&mut root, key, value) };
    }
    root.expect("entries_it must yield at least one entry")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skewed_keys_increase_in_length_and_share_no_prefix() {
        let keys: Vec<_> = generate_keys_skewed(5).collect();
        assert_eq!(keys.len(), 5);
        assert_eq!(&*keys[0], &[255][..]);
        assert_eq!(&*keys[4], &[0, 0, 0, 0, 255][..]);
    }

    #[test]
    fn fixed_length_keys_cover_expected_range() {
        let keys: Vec<_> = generate_key_fixed_length([3, 2, 1]).collect();
        assert_eq!(keys.len(), 24);
        assert_eq!(&*keys[0], &[0, 0, 0][..]);
        assert_eq!(&*keys[keys.len() - 1], &[255, 255, 255][..]);
    }

    #[test]
    fn prefix_expansion_repeats_the_expanded_byte() {
        let keys: Vec<_> = generate_key_with_prefix(
            [2; 3],
            [PrefixExpansion {
                base_index: 0,
                expanded_length: 3,
            }],
        )
        .collect();
        assert_eq!(keys.len(), 27);
        assert_eq!(&*keys[0], &[0, 0, 0, 0, 0][..]);
        assert_eq!(&*keys[keys.len() - 1], &[255, 255, 255, 255, 255][..]);
    }

    #[test]
    fn setup_tree_from_entries_builds_a_searchable_tree() {
        let entries = vec![
            (Box::from(*b"aaa"), 1u32),
            (Box::from(*b"aab"), 2u32),
            (Box::from(*b"ccc"), 3u32),
        ];
        let root: OpaqueNodePtr<Box<[u8]>, u32, 8> = setup_tree_from_entries(entries.into_iter());
        let leaf = unsafe { crate::nodes::operations::lookup::lookup(root, b"aab") };
        assert!(leaf.is_some());
    }
}
