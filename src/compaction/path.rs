// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Config;

/// Picks the storage path for output files of the given size.
///
/// Paths are filled in order. The output is expected to keep growing
/// through later merges, so a path is only chosen if its remaining
/// capacity also fits that future growth, which is estimated from the
/// size ratio. The last path takes everything else.
pub fn get_path_id(config: &Config, file_size: u64) -> usize {
    let paths = &config.db_paths;
    let size_ratio = u64::from(config.universal.size_ratio);

    // NOTE: Size ratios >= 100 assume no further growth
    let future_size = file_size.saturating_mul(100u64.saturating_sub(size_ratio)) / 100;

    let mut accumulated_size = 0u64;

    for (idx, path) in paths.iter().enumerate().take(paths.len().saturating_sub(1)) {
        let target_size = path.target_size;

        if target_size > file_size
            && accumulated_size.saturating_add(target_size - file_size) > future_size
        {
            return idx;
        }

        accumulated_size = accumulated_size.saturating_add(target_size);
    }

    paths.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DbPath, UniversalOptions};
    use test_log::test;

    fn config(sizes: &[u64], size_ratio: u32) -> Config {
        Config::default()
            .db_paths(
                sizes
                    .iter()
                    .enumerate()
                    .map(|(idx, size)| DbPath::new(format!("path{idx}"), *size))
                    .collect(),
            )
            .universal(UniversalOptions {
                size_ratio,
                ..Default::default()
            })
    }

    #[test]
    fn path_id_single_path() {
        assert_eq!(0, get_path_id(&config(&[10], 1), 1_000));
    }

    #[test]
    fn path_id_first_fits() {
        // future size = 99, 1_000 - 100 > 99
        assert_eq!(0, get_path_id(&config(&[1_000, 10_000], 1), 100));
    }

    #[test]
    fn path_id_accounts_for_future_growth() {
        // future size = 594, but path 0 only has 400 left
        assert_eq!(1, get_path_id(&config(&[1_000, 10_000, 100_000], 1), 600));
    }

    #[test]
    fn path_id_too_large_goes_last() {
        assert_eq!(2, get_path_id(&config(&[10, 20, 30], 1), 1_000));
    }
}
