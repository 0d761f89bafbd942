use std::path::Path;
use sysinfo::System;

pub struct ProcessChecker;

impl ProcessChecker {
    /// Performs the check. Takes a mutable ref to System to allow
    /// sysinfo to reuse internal buffers for performance.
    pub fn is_running<P: AsRef<Path>>(sys: &mut System, target_paths: &[P]) -> bool {
        sys.refresh_processes();

        sys.processes().values().any(|p| {
            p.exe()
                .map(|exe_path| target_paths.iter().any(|target| exe_path == target.as_ref()))
                .unwrap_or(false)
        })
    }

    /// Same check against the executable name only; used when the game
    /// runs through a compatibility layer that hides the real path.
    pub fn is_name_running(sys: &mut System, exe_names: &[&str]) -> bool {
        sys.refresh_processes();

        sys.processes()
            .values()
            .any(|p| exe_names.iter().any(|name| p.name().eq_ignore_ascii_case(name)))
    }
}
