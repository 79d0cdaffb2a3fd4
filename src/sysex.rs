//! MIDI Tuning Standard SysEx decoding.
//!
//! A stateless parser from raw SysEx bytes to [`TuningUpdate`] values.
//! Decoding never touches shared state; the session applies the returned
//! event to its store, and a master transport can feed the same event type
//! through the identical path.
//!
//! Recognized message shapes (realtime `7F` and non-realtime `7E` framings
//! both accepted):
//!
//! - `08 01` Bulk Dump Reply — full 128-note table plus scale name,
//!   checksum-validated
//! - `08 02` Single Note Tuning Change — sparse list of note retunes
//! - `08 08` Scale/Octave Tuning, 1-byte form — 12 pitch-class offsets
//! - `08 09` Scale/Octave Tuning, 2-byte form — same, higher resolution

use smallvec::SmallVec;

use crate::error::DecodeError;
use crate::note::{note_to_hz, Channel, NoteEntry, NOTE_COUNT};
use crate::table::TuningTable;

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

const NON_REALTIME: u8 = 0x7E;
const REALTIME: u8 = 0x7F;

const MIDI_TUNING: u8 = 0x08;

const BULK_DUMP_REPLY: u8 = 0x01;
const SINGLE_NOTE_CHANGE: u8 = 0x02;
const OCTAVE_TUNING_1_BYTE: u8 = 0x08;
const OCTAVE_TUNING_2_BYTE: u8 = 0x09;

/// `F0 7E <dev> 08 01 <program> <16-byte name> <128 x 3-byte pitch>
/// <checksum> F7`
const BULK_DUMP_LEN: usize = 408;
const SCALE_NAME_LEN: usize = 16;
const BULK_DATA_START: usize = 6 + SCALE_NAME_LEN;

/// `F0 7E/7F <dev> 08 08 <3 mask bytes> <12 offsets> F7`
const OCTAVE_1_BYTE_LEN: usize = 21;
/// `F0 7E/7F <dev> 08 09 <3 mask bytes> <12 x 2-byte offsets> F7`
const OCTAVE_2_BYTE_LEN: usize = 33;

/// Denominator of the 14-bit semitone fraction in 3-byte pitch fields.
const PITCH_FRACTION_DENOM: f64 = (1u32 << 14) as f64;

/// Set of MIDI channels addressed by a Scale/Octave Tuning message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelMask(u16);

impl ChannelMask {
    /// All 16 channels.
    pub const ALL: ChannelMask = ChannelMask(0xFFFF);

    /// Decode the three 7-bit mask bytes, highest channels first on the
    /// wire: byte 0 bits 0-1 are channels 14-15, byte 1 bits 0-6 are
    /// channels 7-13, byte 2 bits 0-6 are channels 0-6.
    fn from_wire(bytes: [u8; 3]) -> Self {
        let hi = (bytes[0] & 0x03) as u16;
        let mid = (bytes[1] & 0x7F) as u16;
        let lo = (bytes[2] & 0x7F) as u16;
        ChannelMask(lo | (mid << 7) | (hi << 14))
    }

    #[inline]
    pub fn contains(self, channel: Channel) -> bool {
        self.0 >> channel.index() & 1 == 1
    }

    #[inline]
    pub fn is_all(self) -> bool {
        self.0 == Self::ALL.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Selected channels in ascending order.
    pub fn iter(self) -> impl Iterator<Item = Channel> {
        Channel::all().filter(move |ch| self.contains(*ch))
    }
}

/// A decoded tuning update, phrased as the store operation it requests.
#[derive(Clone, Debug, PartialEq)]
pub enum TuningUpdate {
    /// Replace an entire table (Bulk Dump Reply).
    ReplaceTable {
        target: Option<Channel>,
        /// Scale name carried by bulk dumps; `None` for updates that do
        /// not rename the scale.
        name: Option<String>,
        table: Box<TuningTable>,
    },
    /// Replace a sparse set of notes in one table (Single Note Change).
    ReplaceNotes {
        target: Option<Channel>,
        changes: SmallVec<[(u8, NoteEntry); 16]>,
    },
    /// Rebuild tables from 12 per-pitch-class cent offsets (Scale/Octave
    /// Tuning, either byte form).
    OctaveOffsets {
        channels: ChannelMask,
        offsets_cents: [f64; 12],
    },
}

type ShapeParser = fn(&[u8]) -> Result<TuningUpdate, DecodeError>;

/// Shape dispatch keyed on the MTS sub-ID byte.
const SHAPES: [(u8, ShapeParser); 4] = [
    (BULK_DUMP_REPLY, parse_bulk_dump),
    (SINGLE_NOTE_CHANGE, parse_single_note_change),
    (OCTAVE_TUNING_1_BYTE, parse_octave_tuning_1_byte),
    (OCTAVE_TUNING_2_BYTE, parse_octave_tuning_2_byte),
];

/// Decode one complete SysEx message (`F0 .. F7`).
///
/// The buffer is borrowed, never retained or mutated. Non-MTS messages
/// fail with [`DecodeError::UnrecognizedShape`]; a SysEx bus carries many
/// such messages and callers are expected to drop them silently.
pub fn decode(bytes: &[u8]) -> Result<TuningUpdate, DecodeError> {
    if bytes.len() < 6 {
        return Err(DecodeError::TooShort(bytes.len()));
    }
    if bytes[0] != SYSEX_START
        || !matches!(bytes[1], NON_REALTIME | REALTIME)
        || bytes[3] != MIDI_TUNING
    {
        return Err(DecodeError::UnrecognizedShape);
    }
    if bytes[2] > 0x7F {
        return Err(DecodeError::MalformedField("device id"));
    }

    let sub_id = bytes[4];
    let parser = SHAPES
        .iter()
        .find(|(id, _)| *id == sub_id)
        .map(|(_, parse)| *parse)
        .ok_or(DecodeError::UnrecognizedShape)?;
    parser(bytes)
}

/// Decode a buffer delivered as signed bytes.
///
/// Some hosts hand SysEx around as `c_char`; the bit pattern is what
/// matters, so both representations decode identically.
pub fn decode_i8(bytes: &[i8]) -> Result<TuningUpdate, DecodeError> {
    // SAFETY: i8 and u8 have identical size and alignment; the cast only
    // changes the nominal signedness of each byte.
    let unsigned = unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<u8>(), bytes.len()) };
    decode(unsigned)
}

/// XOR of `bytes` masked to 7 bits, the MTS bulk-dump checksum.
fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, &b| acc ^ b) & 0x7F
}

/// The MTS tuning-program byte doubles as the table selector: programs
/// 0-15 address the matching per-channel table, anything else (including
/// the 0x7F broadcast convention) the channel-independent default table.
fn target_from_program(program: u8) -> Option<Channel> {
    Channel::new(program)
}

/// Decode one 3-byte pitch field: semitone plus 14-bit fraction of a
/// semitone. `7F 7F 7F` is the reserved "no assigned frequency" value.
fn pitch_field(semitone: u8, msb: u8, lsb: u8) -> Result<NoteEntry, DecodeError> {
    if semitone > 0x7F || msb > 0x7F || lsb > 0x7F {
        return Err(DecodeError::MalformedField("pitch field"));
    }
    if semitone == 0x7F && msb == 0x7F && lsb == 0x7F {
        return Ok(NoteEntry::Unmapped);
    }
    let fraction = (((msb as u16) << 7) | lsb as u16) as f64 / PITCH_FRACTION_DENOM;
    Ok(NoteEntry::Mapped(note_to_hz(semitone as f64 + fraction)))
}

fn expect_end(bytes: &[u8]) -> Result<(), DecodeError> {
    if bytes[bytes.len() - 1] != SYSEX_END {
        return Err(DecodeError::MalformedField("end of exclusive"));
    }
    Ok(())
}

fn parse_bulk_dump(bytes: &[u8]) -> Result<TuningUpdate, DecodeError> {
    if bytes.len() < BULK_DUMP_LEN {
        return Err(DecodeError::TooShort(bytes.len()));
    }
    if bytes.len() != BULK_DUMP_LEN {
        return Err(DecodeError::MalformedField("message length"));
    }
    expect_end(bytes)?;

    // Checksum covers everything between the F0 and the checksum byte
    // itself. Verify before interpreting any field.
    let expected = checksum(&bytes[1..BULK_DUMP_LEN - 2]);
    let actual = bytes[BULK_DUMP_LEN - 2];
    if expected != actual {
        return Err(DecodeError::ChecksumMismatch { expected, actual });
    }

    let program = bytes[5];
    if program > 0x7F {
        return Err(DecodeError::MalformedField("tuning program"));
    }

    let name_bytes = &bytes[6..BULK_DATA_START];
    if name_bytes.iter().any(|&b| b > 0x7F) {
        return Err(DecodeError::MalformedField("scale name"));
    }
    let name = String::from_utf8_lossy(name_bytes)
        .trim_end_matches(&[' ', '\0'][..])
        .to_string();

    let mut entries = [NoteEntry::Unmapped; NOTE_COUNT];
    for (note, entry) in entries.iter_mut().enumerate() {
        let base = BULK_DATA_START + note * 3;
        *entry = pitch_field(bytes[base], bytes[base + 1], bytes[base + 2])?;
    }

    Ok(TuningUpdate::ReplaceTable {
        target: target_from_program(program),
        name: Some(name),
        table: Box::new(TuningTable::from_entries(entries)),
    })
}

fn parse_single_note_change(bytes: &[u8]) -> Result<TuningUpdate, DecodeError> {
    if bytes.len() < 8 {
        return Err(DecodeError::TooShort(bytes.len()));
    }
    let program = bytes[5];
    let count = bytes[6] as usize;
    if program > 0x7F || count > 0x7F {
        return Err(DecodeError::MalformedField("header"));
    }
    // The advertised count must match the entries actually present.
    let expected_len = 8 + 4 * count;
    if bytes.len() < expected_len {
        return Err(DecodeError::TooShort(bytes.len()));
    }
    if bytes.len() != expected_len {
        return Err(DecodeError::MalformedField("tuning change count"));
    }
    expect_end(bytes)?;

    let mut changes = SmallVec::new();
    for i in 0..count {
        let base = 7 + i * 4;
        let note = bytes[base];
        if note > 0x7F {
            return Err(DecodeError::MalformedField("note number"));
        }
        let entry = pitch_field(bytes[base + 1], bytes[base + 2], bytes[base + 3])?;
        changes.push((note, entry));
    }

    Ok(TuningUpdate::ReplaceNotes {
        target: target_from_program(program),
        changes,
    })
}

fn parse_octave_tuning_1_byte(bytes: &[u8]) -> Result<TuningUpdate, DecodeError> {
    if bytes.len() < OCTAVE_1_BYTE_LEN {
        return Err(DecodeError::TooShort(bytes.len()));
    }
    if bytes.len() != OCTAVE_1_BYTE_LEN {
        return Err(DecodeError::MalformedField("message length"));
    }
    expect_end(bytes)?;

    let channels = ChannelMask::from_wire([bytes[5], bytes[6], bytes[7]]);
    let mut offsets_cents = [0.0; 12];
    for (offset, &b) in offsets_cents.iter_mut().zip(&bytes[8..20]) {
        // 0x40 is center; out-of-spec senders get clamped, not rejected.
        *offset = (b.min(0x7F) as f64) - 64.0;
    }

    Ok(TuningUpdate::OctaveOffsets {
        channels,
        offsets_cents,
    })
}

fn parse_octave_tuning_2_byte(bytes: &[u8]) -> Result<TuningUpdate, DecodeError> {
    if bytes.len() < OCTAVE_2_BYTE_LEN {
        return Err(DecodeError::TooShort(bytes.len()));
    }
    if bytes.len() != OCTAVE_2_BYTE_LEN {
        return Err(DecodeError::MalformedField("message length"));
    }
    expect_end(bytes)?;

    let channels = ChannelMask::from_wire([bytes[5], bytes[6], bytes[7]]);
    let mut offsets_cents = [0.0; 12];
    for (i, offset) in offsets_cents.iter_mut().enumerate() {
        let base = 8 + i * 2;
        // 14-bit value, 0x2000 center, 100/8192 cent per step. Same clamp
        // policy as the 1-byte form.
        let msb = bytes[base].min(0x7F) as u16;
        let lsb = bytes[base + 1].min(0x7F) as u16;
        let value = (msb << 7) | lsb;
        *offset = (value as f64 - 8192.0) * (100.0 / 8192.0);
    }

    Ok(TuningUpdate::OctaveOffsets {
        channels,
        offsets_cents,
    })
}
