//! Java runtime discovery
//!
//! Servers need a JVM whose major version matches the game version, so hosts
//! list what is installed before picking a `java_path` for a record.

use crate::error::{HearthError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// A Java runtime found on this machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaInstallation {
    /// Major version (8, 17, 21, ...)
    pub major: u32,
    pub path: PathBuf,
    pub vendor: String,
    /// Version string as printed by `java -version`
    pub full_version: String,
}

/// Version details parsed from `java -version` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaVersion {
    pub major: u32,
    pub full_version: String,
    pub vendor: String,
}

const VENDORS: &[(&[&str], &str)] = &[
    (&["Eclipse Adoptium", "Temurin"], "Eclipse Adoptium"),
    (&["Oracle", "Java(TM)"], "Oracle"),
    (&["Microsoft"], "Microsoft"),
    (&["GraalVM"], "GraalVM"),
    (&["Azul", "Zulu"], "Azul Zulu"),
    (&["Amazon", "Corretto"], "Amazon Corretto"),
    (&["OpenJDK"], "OpenJDK"),
];

/// Parse `java -version` output (which the JVM prints on stderr).
///
/// Legacy `1.8.0_392` reports major 8; modern `17.0.9` reports major 17.
pub fn parse_java_version(output: &str) -> Option<JavaVersion> {
    let full_version = output
        .lines()
        .find(|line| line.contains("version"))?
        .split('"')
        .nth(1)?
        .to_string();

    let major_part = match full_version.strip_prefix("1.") {
        Some(rest) => rest.split('.').next()?,
        None => full_version.split(['.', '-', '+']).next()?,
    };
    let major = major_part.parse::<u32>().ok()?;

    let vendor = VENDORS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| output.contains(n)))
        .map(|(_, name)| *name)
        .unwrap_or("Unknown")
        .to_string();

    Some(JavaVersion {
        major,
        full_version,
        vendor,
    })
}

/// Run `<path> -version` and describe the runtime
pub async fn detect_java_at(path: impl AsRef<Path>) -> Result<JavaInstallation> {
    let path = path.as_ref();
    let output = Command::new(path)
        .arg("-version")
        .output()
        .await
        .map_err(|e| HearthError::Other(format!("Failed to execute {}: {}", path.display(), e)))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let version = parse_java_version(&stderr)
        .or_else(|| parse_java_version(&String::from_utf8_lossy(&output.stdout)))
        .ok_or_else(|| {
            HearthError::Other(format!("Could not parse Java version from {}", path.display()))
        })?;

    Ok(JavaInstallation {
        major: version.major,
        path: path.to_path_buf(),
        vendor: version.vendor,
        full_version: version.full_version,
    })
}

fn java_binary_name() -> &'static str {
    if cfg!(windows) { "java.exe" } else { "java" }
}

/// Directories that conventionally hold one JDK per subdirectory
pub fn platform_search_dirs() -> Vec<PathBuf> {
    let dirs: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Java",
            r"C:\Program Files\Eclipse Adoptium",
            r"C:\Program Files\Microsoft\jdk",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Library/Java/JavaVirtualMachines",
            "/opt/homebrew/opt",
            "/usr/local/opt",
        ]
    } else {
        &["/usr/lib/jvm", "/usr/java"]
    };
    dirs.iter().map(PathBuf::from).collect()
}

/// Java binaries inside the JDK directories under `dir`
fn binaries_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter_map(|jdk| {
            // macOS bundles: <name>.jdk/Contents/Home/bin/java
            let bundled = jdk
                .join("Contents")
                .join("Home")
                .join("bin")
                .join(java_binary_name());
            let plain = jdk.join("bin").join(java_binary_name());
            [bundled, plain].into_iter().find(|p| p.is_file())
        })
        .collect()
}

/// Candidate binaries from `JAVA_HOME`, `PATH` and `search_dirs`, in that order
fn candidate_binaries(search_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(home) = std::env::var_os("JAVA_HOME") {
        let bin = PathBuf::from(home).join("bin").join(java_binary_name());
        if bin.is_file() {
            candidates.push(bin);
        }
    }

    if let Ok(on_path) = which::which("java") {
        candidates.push(on_path);
    }

    for dir in search_dirs {
        candidates.extend(binaries_in(dir));
    }
    candidates
}

/// Probe every candidate, dropping duplicates by canonical path.
/// Sorted by major version, newest first.
pub async fn discover_in(search_dirs: &[PathBuf]) -> Vec<JavaInstallation> {
    let dirs = search_dirs.to_vec();
    let candidates = tokio::task::spawn_blocking(move || candidate_binaries(&dirs))
        .await
        .unwrap_or_default();

    let mut seen = HashSet::new();
    let mut installations = Vec::new();

    for candidate in candidates {
        let key = std::fs::canonicalize(&candidate).unwrap_or_else(|_| candidate.clone());
        if seen.contains(&key) {
            continue;
        }
        match detect_java_at(&candidate).await {
            Ok(installation) => {
                seen.insert(key);
                installations.push(installation);
            }
            Err(e) => debug!(path = %candidate.display(), error = %e, "Skipping Java candidate"),
        }
    }

    installations.sort_by(|a, b| b.major.cmp(&a.major));
    installations
}

/// Discover Java runtimes in the standard locations of this platform
pub async fn discover_installations() -> Vec<JavaInstallation> {
    discover_in(&platform_search_dirs()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_temurin() {
        let output = r#"openjdk version "21.0.3" 2024-04-16 LTS
OpenJDK Runtime Environment Temurin-21.0.3+9 (build 21.0.3+9-LTS)
OpenJDK 64-Bit Server VM Temurin-21.0.3+9 (build 21.0.3+9-LTS, mixed mode, sharing)"#;
        let version = parse_java_version(output).unwrap();
        assert_eq!(version.major, 21);
        assert_eq!(version.full_version, "21.0.3");
        assert_eq!(version.vendor, "Eclipse Adoptium");
    }

    #[test]
    fn test_parse_legacy_oracle() {
        let output = r#"java version "1.8.0_392"
Java(TM) SE Runtime Environment (build 1.8.0_392-b08)
Java HotSpot(TM) 64-Bit Server VM (build 25.392-b08, mixed mode)"#;
        let version = parse_java_version(output).unwrap();
        assert_eq!(version.major, 8);
        assert_eq!(version.full_version, "1.8.0_392");
        assert_eq!(version.vendor, "Oracle");
    }

    #[test]
    fn test_parse_distribution_openjdk() {
        let output = r#"openjdk version "17.0.9" 2023-10-17
OpenJDK Runtime Environment (build 17.0.9+9-Ubuntu-122.04)
OpenJDK 64-Bit Server VM (build 17.0.9+9-Ubuntu-122.04, mixed mode, sharing)"#;
        let version = parse_java_version(output).unwrap();
        assert_eq!(version.major, 17);
        assert_eq!(version.vendor, "OpenJDK");
    }

    #[test]
    fn test_parse_early_access_version() {
        let version = parse_java_version(r#"openjdk version "23-ea" 2024-09-17"#).unwrap();
        assert_eq!(version.major, 23);
        assert_eq!(version.vendor, "Unknown");
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_java_version("").is_none());
        assert!(parse_java_version("command not found").is_none());
        assert!(parse_java_version(r#"java version "abc""#).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_discover_in_fake_jdks() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        for (name, version) in [("jdk-17", "17.0.9"), ("jdk-21", "21.0.3"), ("broken", "")] {
            let bin = root.path().join(name).join("bin");
            std::fs::create_dir_all(&bin).unwrap();
            let script = if version.is_empty() {
                "#!/bin/sh\necho nope >&2\n".to_string()
            } else {
                format!(
                    "#!/bin/sh\necho 'openjdk version \"{}\" 2024-01-01' >&2\necho 'OpenJDK Runtime Environment Temurin' >&2\n",
                    version
                )
            };
            let java = bin.join("java");
            std::fs::write(&java, script).unwrap();
            std::fs::set_permissions(&java, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let found = discover_in(&[root.path().to_path_buf()]).await;
        let ours: Vec<&JavaInstallation> = found
            .iter()
            .filter(|i| i.path.starts_with(root.path()))
            .collect();

        assert_eq!(ours.len(), 2);
        assert_eq!(ours[0].major, 21);
        assert_eq!(ours[1].major, 17);
        assert_eq!(ours[0].vendor, "Eclipse Adoptium");
        assert!(found.windows(2).all(|w| w[0].major >= w[1].major));
    }
}
