// constants.rs - Subsystem-wide Constants
//
// Centralized timing, geometry and magnifier constants.
// Runtime-tunable values are mirrored in config::CaptureConfig, which
// falls back to these defaults.

/// Capture session timing and geometry
pub mod session {
    /// Resize events are debounced for one frame before being applied
    pub const RESIZE_DEBOUNCE_MS: u64 = 16;
    /// Maximum |w/h - locked ratio| tolerated before the window is corrected
    pub const ASPECT_TOLERANCE: f64 = 0.002;
    /// Minimized-state polling period for native window sources
    pub const MINIMIZED_POLL_MS: u64 = 1000;
    /// Window size used when a source has no usable crop
    pub const FALLBACK_WIDTH: u32 = 400;
    /// Window size used when a source has no usable crop
    pub const FALLBACK_HEIGHT: u32 = 300;
    /// Smallest window edge a session window may be forced to
    pub const MIN_EDGE: u32 = 50;
    /// Notice shown while a native source window is minimized
    pub const MINIMIZED_NOTICE: &str = "Source window is minimized - preview paused";
}

/// Region selection gestures
pub mod selection {
    /// Minimum selection edge in logical pixels
    pub const MIN_SIZE: f64 = 5.0;
    /// Two click-releases within this window count as a double activation
    pub const DOUBLE_ACTIVATION_MS: u64 = 400;
    /// Pointer travel (logical px) below which a press-release is a click
    pub const CLICK_SLOP: f64 = 2.0;
}

/// Source registry behavior
pub mod registry {
    /// Identical adds inside this window are collapsed into one source
    pub const ADD_DEDUP_MS: u64 = 500;
}

/// Snapshot magnifier defaults
pub mod magnifier {
    /// Edge length of the square magnifier canvas (physical px)
    pub const DEFAULT_SIDE: u32 = 120;
    /// Default zoom factor
    pub const DEFAULT_ZOOM: u32 = 4;
    /// Largest accepted zoom factor
    pub const MAX_ZOOM: u32 = 32;
}

/// Event bus
pub mod bus {
    /// Broadcast channel capacity; slow subscribers skip older events
    pub const CAPACITY: usize = 256;
}
