//! Workflow Module
//!
//! Drives a node through scan, select, transcode and cleanup. The machine is
//! an explicit transition table interpreted by one event loop per node;
//! entry actions do their work on separate tasks so the loop stays
//! responsive to timers and external events.
//!
//! ```text
//! INITIAL ──FINISHED──> SCAN_MEDIA ──RESULT──> SELECT_MEDIA ──RESULT──> SELECT_PROFILE
//!    │                    │  ^                    │                        │
//!    │               NO_RESULT TIMEOUT        NO_RESULT                 RESULT (publish)
//!    v                    v  │                    v                        v
//! ARBITER               WAIT <────────────────────┘                    TRANSCODE
//!                                                                          │
//! SCAN_MEDIA <──FINISHED── CLEANUP <──FINISHED/CANCELLED (retire)──────────┘
//! ```

pub mod actions;
pub mod machine;
pub mod types;
