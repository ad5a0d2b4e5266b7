//! Version information for hostbridge.

/// Hostbridge version from Cargo.toml
pub const HOSTBRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    /// Bridge runtime version.
    pub hostbridge: &'static str,
    /// Host application name and version (e.g. "Blender 4.2"), if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            hostbridge: HOSTBRIDGE_VERSION,
            host: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set host application identification.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_default() {
        let info = VersionInfo::new();
        assert_eq!(info.hostbridge, HOSTBRIDGE_VERSION);
        assert!(info.host.is_none());
    }

    #[test]
    fn version_info_skips_missing_host() {
        let json = serde_json::to_value(VersionInfo::new()).unwrap();
        assert!(json.get("host").is_none());

        let json = serde_json::to_value(VersionInfo::new().with_host("FreeCAD 1.0")).unwrap();
        assert_eq!(json["host"], "FreeCAD 1.0");
    }
}
