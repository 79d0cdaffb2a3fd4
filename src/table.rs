//! The 128-entry tuning table.

use crate::error::TableError;
use crate::note::{standard_note_to_hz, NoteEntry, NOTE_COUNT};

/// Mapping from MIDI note number to pitch for one channel slot.
///
/// Every index holds exactly one entry, mapped or unmapped. Tables are
/// built complete and published immutably; concurrent readers only ever
/// see whole tables.
#[derive(Clone, Debug, PartialEq)]
pub struct TuningTable {
    entries: [NoteEntry; NOTE_COUNT],
}

impl TuningTable {
    /// Standard 12-tone equal temperament at A4 = 440 Hz, all notes mapped.
    pub fn standard() -> Self {
        let mut entries = [NoteEntry::Unmapped; NOTE_COUNT];
        for (note, entry) in entries.iter_mut().enumerate() {
            *entry = NoteEntry::Mapped(standard_note_to_hz(note as u8));
        }
        Self { entries }
    }

    pub fn from_entries(entries: [NoteEntry; NOTE_COUNT]) -> Self {
        Self { entries }
    }

    /// 12-TET shifted by one cents offset per pitch class, all notes
    /// mapped. This is a derived recomputation from the equal-temperament
    /// reference, not an adjustment of the current table.
    pub fn from_octave_offsets(offsets_cents: &[f64; 12]) -> Self {
        let mut entries = [NoteEntry::Unmapped; NOTE_COUNT];
        for (note, entry) in entries.iter_mut().enumerate() {
            let offset = offsets_cents[note % 12];
            let hz = standard_note_to_hz(note as u8) * (offset / 1200.0).exp2();
            *entry = NoteEntry::Mapped(hz);
        }
        Self { entries }
    }

    /// Entry for a MIDI note number. Note numbers are masked to 7 bits,
    /// matching the MIDI data-byte range.
    #[inline]
    pub fn entry(&self, note: u8) -> NoteEntry {
        self.entries[(note & 0x7F) as usize]
    }

    /// Replace a single entry, rejecting out-of-range indices without
    /// mutating the table.
    pub fn set_entry(&mut self, note: u8, entry: NoteEntry) -> Result<(), TableError> {
        let slot = self
            .entries
            .get_mut(note as usize)
            .ok_or(TableError::InvalidIndex(note))?;
        *slot = entry;
        Ok(())
    }

    #[inline]
    pub fn entries(&self) -> &[NoteEntry; NOTE_COUNT] {
        &self.entries
    }

    /// Mapped entries as `(note, frequency)` pairs, ascending note order.
    pub fn iter_mapped(&self) -> impl Iterator<Item = (u8, f64)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(note, entry)| entry.frequency().map(|hz| (note as u8, hz)))
    }

    /// True if at least one note has an assigned pitch.
    pub fn has_mapped(&self) -> bool {
        self.entries.iter().any(|entry| entry.is_mapped())
    }
}

impl Default for TuningTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn standard_table_is_fully_mapped() {
        let table = TuningTable::standard();
        assert!(table.has_mapped());
        assert_eq!(table.iter_mapped().count(), NOTE_COUNT);
        assert_relative_eq!(table.entry(69).frequency().unwrap(), 440.0);
    }

    #[test]
    fn zero_octave_offsets_equal_standard() {
        let table = TuningTable::from_octave_offsets(&[0.0; 12]);
        let standard = TuningTable::standard();
        for note in 0..NOTE_COUNT as u8 {
            assert_relative_eq!(
                table.entry(note).frequency().unwrap(),
                standard.entry(note).frequency().unwrap(),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn octave_offsets_apply_per_pitch_class() {
        let mut offsets = [0.0; 12];
        offsets[9] = 100.0; // every A raised one semitone
        let table = TuningTable::from_octave_offsets(&offsets);
        assert_relative_eq!(
            table.entry(69).frequency().unwrap(),
            standard_note_to_hz(70),
            max_relative = 1e-12
        );
        // Other pitch classes untouched.
        assert_relative_eq!(
            table.entry(60).frequency().unwrap(),
            standard_note_to_hz(60),
            max_relative = 1e-12
        );
    }

    #[test]
    fn set_entry_rejects_out_of_range() {
        let mut table = TuningTable::standard();
        let before = table.clone();
        assert_eq!(
            table.set_entry(128, NoteEntry::Unmapped),
            Err(TableError::InvalidIndex(128))
        );
        assert_eq!(table, before);

        table.set_entry(60, NoteEntry::Unmapped).unwrap();
        assert!(!table.entry(60).is_mapped());
    }
}
