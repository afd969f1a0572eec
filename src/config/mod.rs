mod file;

pub use file::*;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use directories::ProjectDirs;

pub static CRATE_NAME: &str = env!("CARGO_PKG_NAME");

/// The two platform directories this client needs, resolved together once:
/// an env var override takes priority, then the platform's `ProjectDirs`,
/// then a dotted subdirectory of the current directory as a last resort.
struct Dirs {
    data: PathBuf,
    config: PathBuf,
}

impl Dirs {
    fn resolve() -> Self {
        let project = project_directory();
        Self {
            data: resolve_one(
                &format!("{}_DATA", CRATE_NAME.to_uppercase()),
                project,
                ProjectDirs::data_local_dir,
                ".data",
            ),
            config: resolve_one(
                &format!("{}_CONFIG", CRATE_NAME.to_uppercase()),
                project,
                ProjectDirs::config_local_dir,
                ".config",
            ),
        }
    }
}

fn resolve_one(
    env_var: &str,
    project: Option<&ProjectDirs>,
    from_project: impl FnOnce(&ProjectDirs) -> &Path,
    fallback_subdir: &str,
) -> PathBuf {
    if let Ok(custom_path) = env::var(env_var) {
        return PathBuf::from(custom_path);
    }
    match project {
        Some(proj_dirs) => from_project(proj_dirs).to_path_buf(),
        None => PathBuf::from(".").join(fallback_subdir),
    }
}

fn dirs() -> &'static Dirs {
    static DIRS: OnceLock<Dirs> = OnceLock::new();
    DIRS.get_or_init(Dirs::resolve)
}

#[must_use]
pub fn data_dir() -> &'static Path {
    &dirs().data
}

#[must_use]
#[allow(clippy::module_name_repetitions)]
pub fn config_dir() -> &'static Path {
    &dirs().config
}

#[must_use]
#[allow(clippy::module_name_repetitions)]
pub fn version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION
        .get_or_init(|| {
            format!(
                "{}\n\nConfig directory: {}\nData directory: {}",
                env!("CARGO_PKG_VERSION"),
                config_dir().display(),
                data_dir().display(),
            )
        })
        .as_ref()
}

#[must_use]
#[allow(clippy::module_name_repetitions)]
pub fn default_config_file() -> PathBuf {
    config_dir().join("otelnet.conf")
}

pub fn project_directory() -> Option<&'static ProjectDirs> {
    static PROJECT_DIR: OnceLock<Option<ProjectDirs>> = OnceLock::new();
    PROJECT_DIR
        .get_or_init(|| ProjectDirs::from("net", CRATE_NAME, CRATE_NAME))
        .as_ref()
}
