//! Lock-free tuning-table store: a default table plus 16 channel tables.
//!
//! Readers (the audio thread) take immutable snapshots through an atomic
//! pointer load and never block. Writers build a complete replacement
//! table, then publish it with a single swap; they serialize among
//! themselves on one mutex that no reader ever touches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::TableError;
use crate::note::{Channel, NoteEntry, CHANNEL_COUNT, NOTE_COUNT};
use crate::table::TuningTable;

struct Slot {
    table: ArcSwap<TuningTable>,
    /// Set once the channel has received its own table. Unpopulated slots
    /// resolve to the default table.
    populated: AtomicBool,
}

impl Slot {
    fn new(table: Arc<TuningTable>) -> Self {
        Self {
            table: ArcSwap::new(table),
            populated: AtomicBool::new(false),
        }
    }
}

/// The authoritative per-channel note-to-pitch mapping.
///
/// Seventeen logical slots: one channel-independent default table plus one
/// table per MIDI channel. A channel slot that has never been written reads
/// as the default table.
pub struct TuningStore {
    default: ArcSwap<TuningTable>,
    channels: [Slot; CHANNEL_COUNT],
    /// Serializes all writers. Readers never take it.
    write_lock: Mutex<()>,
}

impl TuningStore {
    /// A store where every slot starts at standard 12-TET.
    pub fn new() -> Self {
        let standard = Arc::new(TuningTable::standard());
        Self {
            default: ArcSwap::new(Arc::clone(&standard)),
            channels: std::array::from_fn(|_| Slot::new(Arc::clone(&standard))),
            write_lock: Mutex::new(()),
        }
    }

    /// Point-in-time snapshot of the table a query against `channel`
    /// resolves to. Lock-free; never observes a partially-written table.
    pub fn read(&self, channel: Option<Channel>) -> Arc<TuningTable> {
        match channel {
            Some(ch) => {
                let slot = &self.channels[ch.index()];
                if slot.populated.load(Ordering::Acquire) {
                    slot.table.load_full()
                } else {
                    self.default.load_full()
                }
            }
            None => self.default.load_full(),
        }
    }

    /// Atomically swap in an entire table for one slot.
    pub fn replace_whole(&self, channel: Option<Channel>, table: TuningTable) {
        let table = Arc::new(table);
        let _guard = self.write_lock.lock();
        self.publish(channel, table);
    }

    /// Apply a batch of single-entry replacements to one table. The whole
    /// batch is validated up front; any bad index or frequency rejects the
    /// message without mutating the table.
    pub fn replace_notes(
        &self,
        channel: Option<Channel>,
        updates: &[(u8, NoteEntry)],
    ) -> Result<(), TableError> {
        for &(note, entry) in updates {
            if note as usize >= NOTE_COUNT {
                return Err(TableError::InvalidIndex(note));
            }
            if let NoteEntry::Mapped(hz) = entry {
                // Re-validate at the store boundary; events may arrive from
                // a master push, not only from the decoder.
                NoteEntry::mapped(hz)?;
            }
        }

        let _guard = self.write_lock.lock();
        // Start from the resolved view so a first write to a channel slot
        // inherits the default table rather than resetting to standard.
        let mut next = (*self.read(channel)).clone();
        for &(note, entry) in updates {
            next.set_entry(note, entry)?;
        }
        self.publish(channel, Arc::new(next));
        Ok(())
    }

    /// Rebuild the target table as 12-TET shifted by one cents offset per
    /// pitch class. Derived from the equal-temperament reference across all
    /// 128 entries, not an incremental adjustment.
    pub fn apply_octave_offsets(&self, channel: Option<Channel>, offsets_cents: &[f64; 12]) {
        let table = Arc::new(TuningTable::from_octave_offsets(offsets_cents));
        let _guard = self.write_lock.lock();
        self.publish(channel, table);
    }

    /// True iff any per-channel table has been populated, i.e. a
    /// multi-channel tuning scheme is active.
    pub fn multi_channel_active(&self) -> bool {
        self.channels
            .iter()
            .any(|slot| slot.populated.load(Ordering::Acquire))
    }

    pub fn channel_populated(&self, channel: Channel) -> bool {
        self.channels[channel.index()]
            .populated
            .load(Ordering::Acquire)
    }

    /// Restore every slot to standard tuning and clear all populated flags.
    pub fn reset(&self) {
        let standard = Arc::new(TuningTable::standard());
        let _guard = self.write_lock.lock();
        self.default.store(Arc::clone(&standard));
        for slot in &self.channels {
            slot.table.store(Arc::clone(&standard));
            slot.populated.store(false, Ordering::Release);
        }
    }

    fn publish(&self, channel: Option<Channel>, table: Arc<TuningTable>) {
        match channel {
            Some(ch) => {
                let slot = &self.channels[ch.index()];
                slot.table.store(table);
                slot.populated.store(true, Ordering::Release);
            }
            None => self.default.store(table),
        }
    }
}

impl Default for TuningStore {
    fn default() -> Self {
        Self::new()
    }
}
