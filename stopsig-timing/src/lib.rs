mod manual;
mod timer;

pub use manual::ManualTimer;
pub use timer::MAX_FRAME_SAMPLES;
pub use timer::{ms_to_ns, CalibrationStats, HighPrecisionTimer, Timer};
