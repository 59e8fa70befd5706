use std::fmt;

/// Name and version of the crate that expanded [`build_info!`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// set by the build environment, if at all
    pub profile: Option<&'static str>,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)?;
        if let Some(profile) = self.profile {
            write!(f, " ({})", profile)?;
        }
        Ok(())
    }
}

/// Build information for the calling crate, read at its compile time
#[macro_export]
macro_rules! build_info {
    () => {
        $crate::version::BuildInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            profile: option_env!("BUILD_PROFILE"),
        }
    };
}
