use std::{
    fs::{self, File, Permissions},
    io,
    os::unix::fs::PermissionsExt,
    path::Path,
};

pub mod peer;
pub mod types;

pub use peer::*;
pub use types::*;

/// Create each directory with the given mode if it does not exist yet.
/// Existing directories are left alone apart from a warning when they are
/// world-accessible.
pub fn ensure_dirs_exist(dirs: &[&Path], mode: u32) -> Result<(), io::Error> {
    for dir in dirs {
        match fs::create_dir(dir) {
            Ok(()) => {
                log::debug!("created dir {}", dir.to_string_lossy());
                fs::set_permissions(dir, Permissions::from_mode(mode))?;
            },
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn_on_dangerous_mode(dir)?;
            },
            Err(e) => {
                return Err(e);
            },
        }
    }
    Ok(())
}

pub fn warn_on_dangerous_mode(path: &Path) -> Result<(), io::Error> {
    let mode = File::open(path)?.metadata()?.permissions().mode() & 0o777;

    if mode & 0o007 != 0 {
        log::warn!(
            "{} is world-accessible (mode is {:#05o}). This is probably not what you want.",
            path.to_string_lossy(),
            mode
        );
    }
    Ok(())
}

/// Updates the permissions of a file. Returns `Ok(true)` if permissions had
/// to be changed, `Ok(false)` if they were already correct.
pub fn chmod(file: &File, new_mode: u32) -> Result<bool, io::Error> {
    let mut permissions = file.metadata()?.permissions();
    let updated = if permissions.mode() & 0o777 != new_mode {
        permissions.set_mode(new_mode);
        file.set_permissions(permissions)?;
        true
    } else {
        false
    };

    Ok(updated)
}
