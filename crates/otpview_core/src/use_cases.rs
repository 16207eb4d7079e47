mod countdown;
mod directory;
mod scan;

pub use countdown::{
    is_rollover, remaining_secs, tick, CountdownHandle, CountdownPolicy, CountdownScheduler,
    RemainingMap, Tick,
};
pub use directory::AccountDirectory;
pub use scan::{PendingScan, ScanOutcome, ScanPhase, ScanRequester, ScanSession, SquareGuard};
