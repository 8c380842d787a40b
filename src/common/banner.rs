const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

const LOGO: [&str; 3] = [
    "┬─┐┬ ┬┌─┐┌┬┐┌─┐┌┬┐┬─┐ ┬",
    "├┬┘│ │└─┐ │ ├─┤││││┌┴┬┘",
    "┴└─└─┘└─┘ ┴ ┴ ┴┴ ┴┴┴ └─",
];

macro_rules! env_or {
    ($key:literal, $default:literal) => {
        option_env!($key).unwrap_or($default)
    };
}

/// Build metadata injected by `build.rs`.
pub struct BannerInfo {
    pub version: &'static str,
    pub branch: &'static str,
    pub commit_short: &'static str,
    /// Milliseconds since the Unix epoch.
    pub build_time: &'static str,
    pub profile: &'static str,
}

impl Default for BannerInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            branch: env_or!("GIT_BRANCH", "unknown"),
            commit_short: env_or!("GIT_COMMIT_SHORT", "unknown"),
            build_time: env_or!("BUILD_TIME", "unknown"),
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
        }
    }
}

impl BannerInfo {
    /// `branch@commit`, or just the branch when the commit is unknown.
    pub fn revision(&self) -> String {
        if self.commit_short == "unknown" {
            self.branch.to_string()
        } else {
            format!("{}@{}", self.branch, self.commit_short)
        }
    }

    fn rows(&self) -> [(&'static str, String, &'static str); 4] {
        [
            ("Version", self.version.to_string(), CYAN),
            ("Revision", self.revision(), RESET),
            ("Built", self.build_time.to_string(), RESET),
            ("Profile", self.profile.to_string(), YELLOW),
        ]
    }
}

pub fn print_banner(info: &BannerInfo) {
    crate::log_println!();
    for line in LOGO {
        crate::log_println!("{GREEN}  {line}{RESET}");
    }
    crate::log_println!("{DIM}  per-guild voice mixing engine{RESET}");
    crate::log_println!("{DIM}========================================{RESET}");

    for (label, value, color) in info.rows() {
        crate::log_println!("  {BOLD}{label:<10}{RESET}{color}{value}{RESET}");
    }
    crate::log_println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(commit: &'static str) -> BannerInfo {
        BannerInfo {
            version: "0.0.0",
            branch: "main",
            commit_short: commit,
            build_time: "0",
            profile: "debug",
        }
    }

    #[test]
    fn test_revision() {
        assert_eq!(info("abc1234").revision(), "main@abc1234");
        assert_eq!(info("unknown").revision(), "main");
    }
}
