//! Built-in server providers

pub mod fabric;
pub mod forge;
pub mod paper;
pub mod vanilla;

pub use fabric::FabricProvider;
pub use forge::ForgeProvider;
pub use paper::PaperProvider;
pub use vanilla::VanillaProvider;

use crate::error::{HearthError, Result};
use crate::model::ServerRecord;
use crate::provider::LaunchParameters;
use std::path::{Path, PathBuf};

/// Installed artifact of a record, resolved against its directory
pub(crate) fn installed_jar(record: &ServerRecord) -> Option<PathBuf> {
    record.jar_path.as_ref().map(|jar| {
        if jar.is_absolute() {
            jar.clone()
        } else {
            record.directory.join(jar)
        }
    })
}

/// `name` as a single path component, or an upstream error.
///
/// Names taken from upstream metadata end up joined onto the server
/// directory, so anything that could climb out of it is refused.
pub(crate) fn plain_file_name(name: &str) -> Result<&str> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    );
    if !single || name.contains(['/', '\\']) {
        return Err(HearthError::Upstream(format!(
            "Refusing unsafe file name from upstream: {:?}",
            name
        )));
    }
    Ok(name)
}

/// Checks shared by every kind: directory, installed artifact and Java executable
pub(crate) fn validate_common(record: &ServerRecord) -> Option<String> {
    if !record.directory.is_dir() {
        return Some(format!(
            "Server directory does not exist: {}",
            record.directory.display()
        ));
    }

    let Some(jar) = installed_jar(record) else {
        return Some("No server artifact installed; download one first".to_string());
    };
    if !jar.is_file() {
        return Some(format!("Server artifact not found: {}", jar.display()));
    }

    let java = Path::new(&record.java_path);
    if java.is_absolute() && !java.exists() {
        return Some(format!("Java executable not found: {}", record.java_path));
    }

    None
}

/// Heap flags followed by the record's own JVM arguments
pub(crate) fn jvm_arguments(record: &ServerRecord) -> Vec<String> {
    let mut args = vec![
        format!("-Xms{}M", record.memory_mb),
        format!("-Xmx{}M", record.memory_mb),
    ];
    args.extend(record.jvm_args.iter().cloned());
    args
}

/// `java <jvm args> -jar <jar> nogui <server args>`
pub(crate) fn jar_launch(record: &ServerRecord) -> Result<LaunchParameters> {
    let jar = installed_jar(record).ok_or_else(|| {
        HearthError::Other(format!("Server {} has no installed artifact", record.id))
    })?;

    let mut arguments = jvm_arguments(record);
    arguments.push("-jar".to_string());
    arguments.push(jar.to_string_lossy().into_owned());
    arguments.push("nogui".to_string());
    arguments.extend(record.server_args.iter().cloned());

    Ok(LaunchParameters {
        executable: record.java_path.clone(),
        arguments,
        working_dir: record.directory.clone(),
    })
}

/// `"latest"` (any case) or empty asks the provider to resolve the newest release
pub(crate) fn wants_latest(version: &str) -> bool {
    version.is_empty() || version.eq_ignore_ascii_case("latest")
}
