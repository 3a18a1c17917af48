//! Well-known locations for toolchains, markers and release endpoints.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Candidate order
//!
//! | Root | Consulted as |
//! |------|--------------|
//! | CUDA toolkit | env `CUDA_PATH`, config `cuda_roots`, then the list below |
//! | cuDSS | env `CUDSS_ROOT`, config `cudss_roots`, then the list below |
//! | vcpkg | env `VCPKG_ROOT`, config `vcpkg_roots`, workspace checkouts, then `~/vcpkg` |

use std::path::{Path, PathBuf};

/// Default install marker file name (relative to a target's install root)
pub const DEFAULT_MARKER: &str = ".sfmforge-installed";

/// Default GitHub REST endpoint
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Checksum asset uploaded with every release
pub const CHECKSUM_ASSET: &str = "SHA256SUMS";

/// Directory (relative to the build dir) where wheel builds drop their output
pub const DEFAULT_WHEEL_DIR: &str = "wheels";

/// Directory (relative to the install root) receiving repaired wheels
pub const WHEELHOUSE_DIR: &str = "wheelhouse";

/// Conventional CUDA toolkit locations, newest first
pub fn default_cuda_roots() -> Vec<PathBuf> {
    if cfg!(windows) {
        ["v12.6", "v12.5", "v12.4", "v12.1", "v11.8"]
            .iter()
            .map(|v| PathBuf::from(r"C:\Program Files\NVIDIA GPU Computing Toolkit\CUDA").join(v))
            .collect()
    } else {
        vec![PathBuf::from("/usr/local/cuda"), PathBuf::from("/opt/cuda")]
    }
}

/// Conventional cuDSS locations
pub fn default_cudss_roots() -> Vec<PathBuf> {
    if cfg!(windows) {
        ["v0.5", "v0.4", "v0.3"]
            .iter()
            .map(|v| PathBuf::from(r"C:\Program Files\NVIDIA cuDSS").join(v))
            .collect()
    } else {
        vec![
            PathBuf::from("/usr/local/cudss"),
            PathBuf::from("/opt/nvidia/cudss"),
        ]
    }
}

/// vcpkg checkouts inside the workspace, then a user-level one
pub fn default_vcpkg_roots(workspace: &Path) -> Vec<PathBuf> {
    let mut roots = vec![
        workspace.join("third_party").join("vcpkg"),
        workspace.join("vcpkg"),
    ];
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join("vcpkg"));
    }
    roots
}

pub fn default_vcpkg_triplet() -> &'static str {
    if cfg!(windows) {
        "x64-windows"
    } else if cfg!(target_os = "macos") {
        if cfg!(target_arch = "aarch64") {
            "arm64-osx"
        } else {
            "x64-osx"
        }
    } else if cfg!(target_arch = "aarch64") {
        "arm64-linux"
    } else {
        "x64-linux"
    }
}

/// Directory holding runtime shared libraries below an install prefix
///
/// Windows keeps DLLs next to executables in `bin`; everything else uses `lib`.
pub fn runtime_lib_dir(prefix: &Path) -> PathBuf {
    if cfg!(windows) {
        prefix.join("bin")
    } else {
        prefix.join("lib")
    }
}

/// CUDA runtime library directory below a toolkit root
pub fn cuda_runtime_dir(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("bin")
    } else {
        root.join("lib64")
    }
}

/// vcpkg toolchain file below a vcpkg root
pub fn vcpkg_toolchain_file(root: &Path) -> PathBuf {
    root.join("scripts").join("buildsystems").join("vcpkg.cmake")
}

/// vcpkg executable below a vcpkg root
pub fn vcpkg_executable(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("vcpkg.exe")
    } else {
        root.join("vcpkg")
    }
}

/// vcpkg bootstrap script below a vcpkg root
pub fn vcpkg_bootstrap_script(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("bootstrap-vcpkg.bat")
    } else {
        root.join("bootstrap-vcpkg.sh")
    }
}
