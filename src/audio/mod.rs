//! # Audio Module
//!
//! Per-guild playback orchestration for Guild Jukebox.
//!
//! ## Architecture
//!
//! ### [`player`] - Music Player
//! - Public entry point used by the command layer
//! - Resolves tracks before touching any session
//!
//! ### [`registry`] - Session Registry
//! - Exactly one live session per guild
//! - Atomic get-or-create, idempotent removal
//!
//! ### [`session`] - Playback State Machine
//! - One task per guild, reached only through its command channel
//! - `Idle` / `Playing` / `Paused` transitions, idle timer, single teardown path
//!
//! ### [`supervisor`] - Connection Supervisor
//! - Ready timeout, connect-or-reuse, bounded rejoin policy
//!
//! ### [`pipeline`] - Audio Pipeline
//! - ffmpeg decode to 48kHz stereo PCM, Opus encode in 20ms frames
//!
//! ### [`occupancy`] - Occupancy Monitor
//! - Periodic check for remaining human listeners
//!
//! ## Audio Quality
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Bit Depth**: 16-bit signed integers
//! - **Channels**: Stereo (2 channels)
//! - **Encoding**: Opus at 96kbps (configurable)

pub mod occupancy;
pub mod pipeline;
pub mod player;
pub mod queue;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
