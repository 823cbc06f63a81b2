//! Deterministic file naming for one property directory: an unstable
//! slot or stable file id maps to exactly one path, so a re-attempted
//! merge task always targets the same output file it left behind.

use std::path::{Path, PathBuf};

pub fn unstable_table_path(dir: &Path, slot: usize) -> PathBuf {
    dir.join(format!("unstable-{slot}.prop"))
}

pub fn unstable_buffer_path(dir: &Path, slot: usize) -> PathBuf {
    dir.join(format!("unstable-{slot}.buf"))
}

pub fn stable_table_path(dir: &Path, stable_id: u64) -> PathBuf {
    dir.join(format!("stable-{stable_id}.prop"))
}

pub fn stable_buffer_path(dir: &Path, stable_id: u64) -> PathBuf {
    dir.join(format!("stable-{stable_id}.buf"))
}

pub fn metadata_path(root: &Path) -> PathBuf {
    root.join("MERGE-META")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn names_follow_the_slot_and_id_layout() {
        let dir = PathBuf::from("/props/42");
        assert_eq!(
            unstable_table_path(&dir, 2),
            PathBuf::from("/props/42/unstable-2.prop")
        );
        assert_eq!(
            unstable_buffer_path(&dir, 2),
            PathBuf::from("/props/42/unstable-2.buf")
        );
        assert_eq!(
            stable_table_path(&dir, 7),
            PathBuf::from("/props/42/stable-7.prop")
        );
        assert_eq!(
            stable_buffer_path(&dir, 7),
            PathBuf::from("/props/42/stable-7.buf")
        );
    }
}
