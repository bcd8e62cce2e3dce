use std::path::Path;
use std::process::Command;

use serde::Serialize;
use tracing::{debug, instrument};

/// What `java -version` reported for a binary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JavaVersion {
    pub version: String,
    pub major: u32,
    pub vendor: String,
}

#[instrument]
pub fn probe_java(path: &Path) -> Option<JavaVersion> {
    let output = Command::new(path).arg("-version").output().ok()?;
    let text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stderr),
        String::from_utf8_lossy(&output.stdout)
    );
    debug!("Probing {:?}: {}", path, text.lines().next().unwrap_or(""));
    parse_version_output(&text)
}

pub fn parse_version_output(output: &str) -> Option<JavaVersion> {
    let version = parse_version_string(output)?;
    Some(JavaVersion {
        major: parse_major_version(&version),
        vendor: parse_vendor(output),
        version,
    })
}

fn parse_version_string(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let start = line.find('"')?;
        let end = line[start + 1..].find('"')?;
        Some(line[start + 1..start + 1 + end].to_string())
    })
}

/// `1.8.0_392` → 8, `21.0.2` → 21.
pub fn parse_major_version(version: &str) -> u32 {
    let first_part = version.split('.').next().unwrap_or("0");
    let major: u32 = first_part.parse().unwrap_or(0);

    if major == 1 {
        version
            .split('.')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(major)
    } else {
        major
    }
}

fn parse_vendor(output: &str) -> String {
    for needle in ["Temurin", "Adoptium", "Zulu", "GraalVM", "OpenJDK"] {
        if output.contains(needle) {
            return needle.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modern_and_legacy_versions() {
        assert_eq!(parse_major_version("21.0.2"), 21);
        assert_eq!(parse_major_version("1.8.0_392"), 8);
        assert_eq!(parse_major_version("garbage"), 0);
    }

    #[test]
    fn parses_version_banner() {
        let banner = "openjdk version \"21.0.2\" 2024-01-16 LTS\n\
                      OpenJDK Runtime Environment Temurin-21.0.2+13 (build 21.0.2+13-LTS)";
        let parsed = parse_version_output(banner).unwrap();
        assert_eq!(parsed.version, "21.0.2");
        assert_eq!(parsed.major, 21);
        assert_eq!(parsed.vendor, "Temurin");
        assert!(parse_version_output("no quotes here").is_none());
    }
}
