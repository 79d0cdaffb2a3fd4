//! Tuning queries answered against store snapshots.
//!
//! The resolution layer is stateless between calls: every query takes a
//! fresh snapshot so mid-note retunes are visible immediately. No caching
//! sits between callers and the store.

use std::iter;

use crate::note::{nearest_standard_note, standard_note_to_hz, Channel, NoteEntry};
use crate::store::TuningStore;
use crate::table::TuningTable;

/// Frequency of a note under the active tuning.
///
/// Unmapped notes yield the standard 12-TET frequency for that note
/// number; callers that care must ask [`should_filter_note`] separately.
/// Never fails, always finite and positive.
pub fn note_to_frequency(store: &TuningStore, note: u8, channel: Option<Channel>) -> f64 {
    let note = note & 0x7F;
    match store.read(channel).entry(note) {
        NoteEntry::Mapped(hz) => hz,
        NoteEntry::Unmapped => standard_note_to_hz(note),
    }
}

/// Retuning of a note relative to standard tuning, in semitones.
pub fn retuning_in_semitones(store: &TuningStore, note: u8, channel: Option<Channel>) -> f64 {
    12.0 * retuning_as_ratio(store, note, channel).log2()
}

/// Retuning of a note relative to standard tuning, as a frequency ratio.
pub fn retuning_as_ratio(store: &TuningStore, note: u8, channel: Option<Channel>) -> f64 {
    let note = note & 0x7F;
    note_to_frequency(store, note, channel) / standard_note_to_hz(note)
}

/// True iff the note has no assigned pitch and should not be sounded.
pub fn should_filter_note(store: &TuningStore, note: u8, channel: Option<Channel>) -> bool {
    !store.read(channel).entry(note).is_mapped()
}

/// The mapped note whose pitch is nearest `freq` in log-frequency
/// distance. Unmapped entries are never returned. A table with no mapped
/// entries at all falls back to the nearest note under standard tuning.
pub fn frequency_to_note(store: &TuningStore, freq: f64, channel: Option<Channel>) -> u8 {
    if !(freq.is_finite() && freq > 0.0) {
        return 0;
    }
    match nearest_mapped(&store.read(channel), freq.ln()) {
        Some((note, _)) => note,
        None => nearest_standard_note(freq),
    }
}

/// The best (note, channel) pair for `freq` across all active tables.
///
/// With multi-channel tables active, the default table and all 16 channel
/// tables are searched; exact ties prefer the default slot (`None`), then
/// the lowest channel index. Without multi-channel tables this is
/// [`frequency_to_note`] against the default table, and the returned
/// channel is `None` ("send on any channel").
pub fn frequency_to_note_and_channel(store: &TuningStore, freq: f64) -> (u8, Option<Channel>) {
    if !(freq.is_finite() && freq > 0.0) {
        return (0, None);
    }
    if !store.multi_channel_active() {
        return (frequency_to_note(store, freq, None), None);
    }

    let target = freq.ln();
    let mut best: Option<(u8, Option<Channel>, f64)> = None;
    let slots = iter::once(None).chain(Channel::all().map(Some));
    for channel in slots {
        // Unpopulated channel slots resolve to the default table, which is
        // searched first; skip the duplicate scans.
        if let Some(ch) = channel {
            if !store.channel_populated(ch) {
                continue;
            }
        }
        if let Some((note, dist)) = nearest_mapped(&store.read(channel), target) {
            match best {
                Some((_, _, d)) if dist >= d => {}
                _ => best = Some((note, channel, dist)),
            }
        }
    }

    match best {
        Some((note, channel, _)) => (note, channel),
        None => (nearest_standard_note(freq), None),
    }
}

/// Nearest mapped note to a log-frequency target, with its distance.
/// Ascending scan with strict replacement, so ties keep the lower note.
fn nearest_mapped(table: &TuningTable, ln_freq: f64) -> Option<(u8, f64)> {
    let mut best: Option<(u8, f64)> = None;
    for (note, hz) in table.iter_mapped() {
        let dist = (hz.ln() - ln_freq).abs();
        match best {
            Some((_, d)) if dist >= d => {}
            _ => best = Some((note, dist)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::NOTE_COUNT;
    use approx::assert_relative_eq;

    fn ch(n: u8) -> Option<Channel> {
        Some(Channel::new(n).unwrap())
    }

    #[test]
    fn unmapped_note_filters_but_still_resolves() {
        let store = TuningStore::new();
        store.replace_notes(None, &[(60, NoteEntry::Unmapped)]).unwrap();

        assert!(should_filter_note(&store, 60, None));
        assert!(!should_filter_note(&store, 69, None));
        // Deterministic fallback, not an error and not garbage.
        assert_relative_eq!(
            note_to_frequency(&store, 60, None),
            standard_note_to_hz(60)
        );
    }

    #[test]
    fn retuning_tracks_table_updates() {
        let store = TuningStore::new();
        assert_relative_eq!(retuning_in_semitones(&store, 69, None), 0.0);
        assert_relative_eq!(retuning_as_ratio(&store, 69, None), 1.0);

        store
            .replace_notes(None, &[(69, NoteEntry::Mapped(880.0))])
            .unwrap();
        assert_relative_eq!(retuning_in_semitones(&store, 69, None), 12.0, epsilon = 1e-9);
        assert_relative_eq!(retuning_as_ratio(&store, 69, None), 2.0);
    }

    #[test]
    fn exact_frequency_returns_its_note() {
        let store = TuningStore::new();
        for note in [0u8, 60, 69, 127] {
            let hz = standard_note_to_hz(note);
            assert_eq!(frequency_to_note(&store, hz, None), note);
        }
    }

    #[test]
    fn between_two_notes_picks_smaller_log_distance() {
        let store = TuningStore::new();
        // 450 Hz sits between A4 (440) and A#4 (466.16); log-nearer to A4.
        assert_eq!(frequency_to_note(&store, 450.0, None), 69);
        assert_eq!(frequency_to_note(&store, 460.0, None), 70);
    }

    #[test]
    fn ties_resolve_to_lower_note() {
        let store = TuningStore::new();
        // Two notes mapped to the same frequency.
        store
            .replace_notes(
                None,
                &[(69, NoteEntry::Mapped(440.0)), (70, NoteEntry::Mapped(440.0))],
            )
            .unwrap();
        assert_eq!(frequency_to_note(&store, 440.0, None), 69);
    }

    #[test]
    fn unmapped_entries_are_never_candidates() {
        let store = TuningStore::new();
        store.replace_notes(None, &[(69, NoteEntry::Unmapped)]).unwrap();
        // 440 Hz now lands on a neighbor, not the unmapped 69.
        let note = frequency_to_note(&store, 440.0, None);
        assert_ne!(note, 69);
        assert!(store.read(None).entry(note).is_mapped());
    }

    #[test]
    fn empty_table_falls_back_to_standard_nearest() {
        let store = TuningStore::new();
        let empty = crate::table::TuningTable::from_entries([NoteEntry::Unmapped; NOTE_COUNT]);
        store.replace_whole(None, empty);
        assert_eq!(frequency_to_note(&store, 440.0, None), 69);
        assert_eq!(frequency_to_note(&store, 261.6, None), 60);
    }

    #[test]
    fn degenerate_frequencies_resolve_to_note_zero() {
        let store = TuningStore::new();
        assert_eq!(frequency_to_note(&store, 0.0, None), 0);
        assert_eq!(frequency_to_note(&store, -440.0, None), 0);
        assert_eq!(frequency_to_note(&store, f64::NAN, None), 0);
        assert_eq!(frequency_to_note_and_channel(&store, f64::NAN), (0, None));
    }

    #[test]
    fn note_and_channel_without_multi_channel_tables() {
        let store = TuningStore::new();
        assert_eq!(frequency_to_note_and_channel(&store, 440.0), (69, None));
    }

    #[test]
    fn note_and_channel_prefers_best_match_across_tables() {
        let store = TuningStore::new();
        // Channel 2 carries a dedicated table where note 10 is 443 Hz.
        store
            .replace_notes(ch(2), &[(10, NoteEntry::Mapped(443.0))])
            .unwrap();

        let (note, channel) = frequency_to_note_and_channel(&store, 443.0);
        assert_eq!((note, channel), (10, ch(2)));

        // An exact default-table pitch prefers the default slot even
        // though channel 2 also resolves it.
        let (note, channel) = frequency_to_note_and_channel(&store, 440.0);
        assert_eq!((note, channel), (69, None));
    }

    proptest::proptest! {
        #[test]
        fn note_to_frequency_stays_finite_and_positive(
            updates in proptest::collection::vec(
                (0u8..128, proptest::option::of(0.01f64..30_000.0), 0u8..17),
                0..64,
            )
        ) {
            let store = TuningStore::new();
            for (note, freq, slot) in updates {
                let channel = Channel::new(slot); // 16 maps to None
                let entry = match freq {
                    Some(hz) => NoteEntry::Mapped(hz),
                    None => NoteEntry::Unmapped,
                };
                store.replace_notes(channel, &[(note, entry)]).unwrap();
            }
            for note in 0..128u8 {
                for channel in std::iter::once(None).chain(Channel::all().map(Some)) {
                    let hz = note_to_frequency(&store, note, channel);
                    proptest::prop_assert!(hz.is_finite() && hz > 0.0);
                }
            }
        }
    }

    #[test]
    fn note_and_channel_tie_prefers_lowest_channel() {
        let store = TuningStore::new();
        // Same dedicated pitch on channels 5 and 3; nothing comparable on
        // the default table.
        store
            .replace_notes(ch(5), &[(40, NoteEntry::Mapped(10_000.0))])
            .unwrap();
        store
            .replace_notes(ch(3), &[(40, NoteEntry::Mapped(10_000.0))])
            .unwrap();

        let (note, channel) = frequency_to_note_and_channel(&store, 10_000.0);
        assert_eq!((note, channel), (40, ch(3)));
    }
}
