use bitflags::bitflags;
use std::path::{Path, PathBuf};

bitflags! {
    /// Process-boundary switches for booting a context.
    pub struct BootFlags: u32 {
        /// Let the runtime skip options it does not recognize instead of refusing to boot.
        const IGNORE_UNRECOGNIZED = 0b001;
        /// Convert runtime strings to host strings automatically.
        const CONVERT_STRINGS = 0b010;
        /// Ask the companion to install its interrupt handler.
        const INTERRUPT = 0b100;
    }
}

impl Default for BootFlags {
    fn default() -> Self {
        BootFlags::CONVERT_STRINGS
    }
}

/// Bounds on the transient reference frames used by a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLimits {
    /// Local reference capacity of a frame opened by [`Context::frame`](../context/struct.Context.html#method.frame).
    pub default_capacity: usize,
    /// Local reference capacity of the frame the boot sequence runs in.
    pub boot_capacity: usize,
    /// How many causes to follow when translating a runtime exception.
    pub max_cause_depth: usize,
}

impl FrameLimits {
    pub const fn default() -> FrameLimits {
        FrameLimits {
            default_capacity: 16,
            boot_capacity: 128,
            max_cause_depth: 8,
        }
    }

    pub const fn with_default_capacity(mut self, default_capacity: usize) -> Self {
        self.default_capacity = default_capacity;
        self
    }

    pub const fn with_boot_capacity(mut self, boot_capacity: usize) -> Self {
        self.boot_capacity = boot_capacity;
        self
    }

    pub const fn with_max_cause_depth(mut self, max_cause_depth: usize) -> Self {
        self.max_cause_depth = max_cause_depth;
        self
    }
}

impl Default for FrameLimits {
    fn default() -> FrameLimits {
        FrameLimits::default()
    }
}

/// Everything [`Context::start`](../context/struct.Context.html#method.start) needs to boot a
/// runtime.
#[derive(Clone, Debug)]
pub struct BootConfig {
    pub library_path: PathBuf,
    /// Runtime options, passed through in order.
    pub options: Vec<String>,
    pub flags: BootFlags,
    pub limits: FrameLimits,
}

impl BootConfig {
    pub fn new<P: AsRef<Path>>(library_path: P) -> Self {
        BootConfig {
            library_path: library_path.as_ref().to_path_buf(),
            options: vec![],
            flags: BootFlags::default(),
            limits: FrameLimits::default(),
        }
    }

    pub fn with_option<S: Into<String>>(mut self, option: S) -> Self {
        self.options.push(option.into());
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.extend(options.into_iter().map(Into::into));
        self
    }

    pub fn with_flags(mut self, flags: BootFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_limits(mut self, limits: FrameLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn ignore_unrecognized(&self) -> bool {
        self.flags.contains(BootFlags::IGNORE_UNRECOGNIZED)
    }

    pub fn convert_strings(&self) -> bool {
        self.flags.contains(BootFlags::CONVERT_STRINGS)
    }

    pub fn interrupt(&self) -> bool {
        self.flags.contains(BootFlags::INTERRUPT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_keep_their_order() {
        let config = BootConfig::new("/opt/jdk/lib/server/libjvm.so")
            .with_option("-Xmx64m")
            .with_options(vec!["-Xss1m", "-Djava.awt.headless=true"]);
        assert_eq!(
            config.options,
            vec!["-Xmx64m", "-Xss1m", "-Djava.awt.headless=true"]
        );
        assert!(config.convert_strings());
        assert!(!config.interrupt());
    }

    #[test]
    fn const_limits_builder() {
        const LIMITS: FrameLimits = FrameLimits::default()
            .with_default_capacity(4)
            .with_max_cause_depth(2);
        assert_eq!(LIMITS.default_capacity, 4);
        assert_eq!(LIMITS.boot_capacity, FrameLimits::default().boot_capacity);
        assert_eq!(LIMITS.max_cause_depth, 2);
    }
}
