//! SDK 版本与构建元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Build Metadata** → build.rs（vergen）

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（由 vergen 在 build.rs 中生成，缺失时为 "unknown"）
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// build time（由 vergen 在 build.rs 中生成，缺失时为 "unknown"）
pub const BUILD_TIME: &str = match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(ts) => ts,
    None => "unknown",
};

/// 客户端标识，随每个 HTTP 请求发送（`X-Client-Info`）
pub fn client_info() -> String {
    format!("bistro-sdk/{}", SDK_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_info_carries_crate_version() {
        assert_eq!(client_info(), format!("bistro-sdk/{}", env!("CARGO_PKG_VERSION")));
        assert!(!GIT_SHA.is_empty());
        assert!(!BUILD_TIME.is_empty());
    }

    #[test]
    fn package_metadata_comes_from_workspace() {
        assert_eq!(SDK_VERSION, "0.1.0");
        assert_eq!(env!("CARGO_PKG_LICENSE"), "Apache-2.0");
        assert_eq!(env!("CARGO_PKG_AUTHORS"), "Bistro Team");
    }
}
