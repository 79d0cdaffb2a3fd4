//! MIDI Tuning Standard (MTS) client for audio plugins.
//!
//! Resolves, per MIDI note and channel, the frequency or pitch offset
//! dictated by a microtonal tuning scheme, and keeps that resolution
//! current as tuning changes arrive — from a co-resident master process
//! pushing [`TuningUpdate`] events, or from inbound MTS SysEx bytes.
//!
//! - **Lock-free queries**: per-note lookups take atomic table snapshots
//!   and are safe on the audio thread (no locks, no allocation)
//! - **MTS SysEx decoding**: bulk dump, single note change, and both
//!   scale/octave tuning forms, with checksum validation
//! - **Multi-channel tables**: 16 per-channel tables plus a
//!   channel-independent default; unpopulated channels fall back to the
//!   default
//! - **Unmapped notes**: keyboard mappings may leave keys without a
//!   pitch; those are queryable ([`ClientSession::should_filter_note`]),
//!   never errors
//!
//! # Example
//!
//! ```
//! use mts_client::ClientRegistry;
//!
//! let registry = ClientRegistry::new();
//! let id = registry.register();
//!
//! // Hand the session to the audio thread; queries are lock-free.
//! let session = registry.session(id).unwrap();
//! let hz = session.note_to_frequency(69, None);
//! assert!((hz - 440.0).abs() < 1e-9);
//!
//! // Feed SysEx as it arrives; non-MTS messages are ignored.
//! session.parse_midi_data(&[0xF0, 0x7E, 0x00, 0x08, 0x01, 0xF7]);
//!
//! registry.deregister(id).unwrap();
//! ```

pub mod error;
pub use error::{ConfigError, DecodeError, TableError, UseAfterDeregister};

mod note;
pub use note::{
    hz_to_note, nearest_standard_note, note_to_hz, standard_note_to_hz, Channel, NoteEntry,
    A4_HZ, A4_NOTE, CHANNEL_COUNT, NOTE_COUNT,
};

mod table;
pub use table::TuningTable;

mod store;
pub use store::TuningStore;

pub mod sysex;
pub use sysex::{ChannelMask, TuningUpdate};

mod resolve;

mod client;
pub use client::{ClientConfig, ClientId, ClientRegistry, ClientSession};
