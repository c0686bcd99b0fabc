//! Build metadata embedded by `build.rs`.

/// Short git commit hash at build time.
pub const GIT_HASH: &str = env!("HEMPCONNECT_GIT_HASH");

/// `debug` or `release`.
pub const BUILD_PROFILE: &str = env!("HEMPCONNECT_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// e.g. `"0.1.0 (abc1234, debug)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

/// `User-Agent` sent on RPC and parameter download requests.
pub fn user_agent() -> String {
    format!("hempconnect/{VERSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string() {
        let v = version_string();
        assert!(v.starts_with(VERSION));
        assert!(v.contains(GIT_HASH));
    }

    #[test]
    fn test_user_agent() {
        assert_eq!(user_agent(), format!("hempconnect/{VERSION}"));
    }

    #[test]
    fn test_build_profile() {
        assert_eq!(BUILD_PROFILE, "debug");
    }
}
