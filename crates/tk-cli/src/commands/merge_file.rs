use std::path::Path;

use tk_core::merge::{merge_file, MergeFileOutcome};

/// Git merge-driver entry point: `ticks merge-file %O %A %B %P`. The
/// merged result (or conflict markers) lands in the ours file; exit 0
/// only on a clean merge.
pub fn run(base: &str, ours: &str, theirs: &str, path: &str) -> anyhow::Result<i32> {
    match merge_file(Path::new(base), Path::new(ours), Path::new(theirs), path)? {
        MergeFileOutcome::Merged => Ok(0),
        MergeFileOutcome::Conflicted(reason) => {
            eprintln!("ticks merge-file: {path}: {reason}");
            Ok(1)
        }
    }
}
