//! Relocator tunables.

/// Default number of decoded-but-unwritten instructions a relocator holds.
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

const WINDOW_VAR: &str = "MALWI_RELOC_WINDOW";
const ALIGN_ADRP_VAR: &str = "MALWI_RELOC_ALIGN_ADRP";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocatorConfig {
    /// Capacity of the pending-instruction window. Reading further ahead than
    /// this without writing is a fatal error.
    pub window_capacity: usize,
    /// Align the PC down to a 4 KiB page before adding an ADRP displacement.
    ///
    /// Off by default: the rewrite adds the page displacement to the
    /// instruction's own PC.
    pub align_adrp_page: bool,
}

impl Default for RelocatorConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            align_adrp_page: false,
        }
    }
}

impl RelocatorConfig {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            window_capacity: window_capacity.max(1),
            ..Self::default()
        }
    }

    /// Build a config from `MALWI_RELOC_WINDOW` and `MALWI_RELOC_ALIGN_ADRP`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied variable source.
    /// Unparseable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(WINDOW_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(n) => config.window_capacity = n.max(1),
                Err(_) => log::debug!("ignoring {WINDOW_VAR}={raw:?}: not a number"),
            }
        }

        if let Some(raw) = lookup(ALIGN_ADRP_VAR) {
            match parse_flag(&raw) {
                Some(on) => config.align_adrp_page = on,
                None => log::debug!("ignoring {ALIGN_ADRP_VAR}={raw:?}: not a boolean"),
            }
        }

        config
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
