/// Operating-system family a model's command line is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetPlatform {
    Linux,
    /// macOS and the BSDs
    Darwin,
    Windows,
    Other,
}

impl TargetPlatform {
    /// Platform this crate was compiled for
    pub const fn current() -> Self {
        if cfg!(target_os = "linux") || cfg!(target_os = "android") {
            TargetPlatform::Linux
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            TargetPlatform::Darwin
        } else if cfg!(windows) {
            TargetPlatform::Windows
        } else {
            TargetPlatform::Other
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, TargetPlatform::Windows)
    }

    /// Syscall tracer used when a model asks to be run under strace
    pub fn tracer(&self) -> Option<&'static str> {
        match self {
            TargetPlatform::Linux => Some("strace"),
            TargetPlatform::Darwin => Some("dtrace"),
            TargetPlatform::Windows | TargetPlatform::Other => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TargetPlatform::Linux => "linux",
            TargetPlatform::Darwin => "darwin",
            TargetPlatform::Windows => "windows",
            TargetPlatform::Other => "other",
        }
    }
}

impl Default for TargetPlatform {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracers() {
        assert_eq!(TargetPlatform::Linux.tracer(), Some("strace"));
        assert_eq!(TargetPlatform::Darwin.tracer(), Some("dtrace"));
        assert_eq!(TargetPlatform::Windows.tracer(), None);
        assert_eq!(TargetPlatform::Other.tracer(), None);
    }

    #[test]
    fn test_current_matches_cfg() {
        #[cfg(target_os = "linux")]
        assert_eq!(TargetPlatform::current(), TargetPlatform::Linux);
        #[cfg(windows)]
        assert!(TargetPlatform::current().is_windows());
    }
}
