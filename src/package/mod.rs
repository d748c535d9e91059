use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::RuntimeConfig;

/// Manifest file name
pub const MANIFEST_FILE: &str = "yvm.toml";

/// Project manifest (yvm.toml)
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub package: PackageInfo,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(default = "default_entry")]
    pub entry: String,
}

fn default_entry() -> String {
    "src/main.yasm".to_string()
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("yvm.toml already exists in {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse yvm.toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize yvm.toml: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> PackageError {
    let path = path.to_path_buf();
    move |source| PackageError::Io { action, path, source }
}

impl ProjectManifest {
    /// Create a new manifest with default values
    pub fn new(name: &str) -> Self {
        Self {
            package: PackageInfo {
                name: name.to_string(),
                version: "0.1.0".to_string(),
                entry: default_entry(),
            },
            runtime: RuntimeConfig::default(),
        }
    }

    /// Load manifest from a directory
    pub fn load(dir: &Path) -> Result<Self, PackageError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&manifest_path).map_err(io_error("read", &manifest_path))?;
        Ok(toml::from_str(&content)?)
    }

    /// Save manifest to a directory
    pub fn save(&self, dir: &Path) -> Result<(), PackageError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let content = toml::to_string_pretty(self)?;
        fs::write(&manifest_path, content).map_err(io_error("write", &manifest_path))
    }

    /// Entry listing, resolved against the project directory.
    pub fn entry_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.package.entry)
    }
}

const HELLO_WORLD: &str = r#"; Welcome to yvm!
.data
hello:  .asciz "Hello, world!\n"

.text
main:   IMM hello
        PUSH
        PRTF
        ADJ 1
        IMM 0
        PUSH
        EXIT
"#;

/// Initialize a new yvm project
pub fn init_project(dir: &Path, name: Option<&str>) -> Result<String, PackageError> {
    let project_name = name
        .map(|s| s.to_string())
        .or_else(|| dir.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "myproject".to_string());

    if dir.join(MANIFEST_FILE).exists() {
        return Err(PackageError::AlreadyExists(dir.to_path_buf()));
    }

    let src_dir = dir.join("src");
    fs::create_dir_all(&src_dir).map_err(io_error("create", &src_dir))?;

    let manifest = ProjectManifest::new(&project_name);
    manifest.save(dir)?;

    let main_yasm = manifest.entry_path(dir);
    if !main_yasm.exists() {
        fs::write(&main_yasm, HELLO_WORLD).map_err(io_error("write", &main_yasm))?;
    }

    Ok(project_name)
}
