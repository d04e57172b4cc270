use std::env;
use std::path::PathBuf;

#[cfg(target_os = "macos")]
const ORT_LIB_NAME: &str = "libonnxruntime.dylib";
#[cfg(not(target_os = "macos"))]
const ORT_LIB_NAME: &str = "libonnxruntime.so";

/// Point the `ort` loader at an ONNX Runtime shared library before the first
/// session is created.  An `ORT_DYLIB_PATH` already naming an existing file
/// wins; otherwise `models/` directories near the executable and the usual
/// system library directories are probed.
pub fn configure_ort_dylib() {
    if let Some(current) = env::var_os("ORT_DYLIB_PATH") {
        let current = PathBuf::from(current);
        if current.is_file() {
            tracing::debug!(path = %current.display(), "ORT_DYLIB_PATH already set");
            return;
        }
        tracing::warn!(
            path = %current.display(),
            "ORT_DYLIB_PATH points at a missing file; probing known locations"
        );
    }

    match discover_ort_lib() {
        Some(found) => {
            // SAFETY: called once at startup, before any worker threads or
            // ORT sessions exist, so the env mutation cannot race.
            unsafe { env::set_var("ORT_DYLIB_PATH", &found) };
            tracing::info!(path = %found.display(), "using ONNX Runtime library");
        }
        None => tracing::warn!("{ORT_LIB_NAME} not found; set ORT_DYLIB_PATH explicitly"),
    }
}

fn discover_ort_lib() -> Option<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        roots.push(cwd);
    }
    if let Ok(exe) = env::current_exe() {
        roots.extend(exe.ancestors().skip(1).take(7).map(PathBuf::from));
    }

    let near_exe = roots.iter().flat_map(|root| {
        ["models/onnxruntime/lib", "models"]
            .into_iter()
            .map(move |rel| root.join(rel).join(ORT_LIB_NAME))
    });

    near_exe
        .chain(system_lib_dirs().into_iter().map(|d| d.join(ORT_LIB_NAME)))
        .find(|p| p.is_file())
}

#[cfg(target_os = "macos")]
fn system_lib_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/local/lib"),
        PathBuf::from("/opt/homebrew/lib"),
    ]
}

#[cfg(not(target_os = "macos"))]
fn system_lib_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("/usr/local/lib"), PathBuf::from("/usr/lib")]
}
