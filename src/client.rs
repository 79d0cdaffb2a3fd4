//! Client sessions and the process-wide registry.
//!
//! A plugin registers once on construction, queries its session from the
//! audio thread, and deregisters on destruction. The registry hands out
//! opaque ids; ids are never reused, so a released id fails fast instead
//! of aliasing a newer session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::{ConfigError, UseAfterDeregister};
use crate::note::Channel;
use crate::resolve;
use crate::store::TuningStore;
use crate::sysex::{self, TuningUpdate};

/// Client behavior knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long after the last master update the connection still counts
    /// as live. Masters send periodic keep-alives; a vanished master goes
    /// stale after this window instead of reading as connected forever.
    pub master_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            master_timeout: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.master_timeout.is_zero() {
            return Err(ConfigError::ZeroMasterTimeout);
        }
        Ok(())
    }
}

const NEVER: u64 = u64::MAX;

/// Liveness of the link to a master process.
struct MasterConnection {
    epoch: Instant,
    /// Milliseconds since `epoch` of the last master touch.
    last_seen_ms: AtomicU64,
    timeout_ms: u64,
}

impl MasterConnection {
    fn new(timeout: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            last_seen_ms: AtomicU64::new(NEVER),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_seen_ms.store(now, Ordering::Release);
    }

    fn connected(&self) -> bool {
        let last = self.last_seen_ms.load(Ordering::Acquire);
        if last == NEVER {
            return false;
        }
        let now = self.epoch.elapsed().as_millis() as u64;
        now.saturating_sub(last) <= self.timeout_ms
    }
}

/// One registered client: a tuning store, the current scale name, and
/// master-connection liveness.
///
/// All query methods are safe to call from the audio thread: they take
/// lock-free snapshots and never allocate beyond an `Arc` refcount bump.
/// Updates (SysEx ingestion, master pushes) may run on any other thread;
/// the store serializes them internally.
pub struct ClientSession {
    store: TuningStore,
    scale_name: ArcSwap<String>,
    master: MasterConnection,
}

impl ClientSession {
    fn new(config: &ClientConfig) -> Self {
        Self {
            store: TuningStore::new(),
            scale_name: ArcSwap::from_pointee(String::new()),
            master: MasterConnection::new(config.master_timeout),
        }
    }

    /// Direct access to the session's tuning store.
    pub fn store(&self) -> &TuningStore {
        &self.store
    }

    /// Frequency of a note under the active tuning. Unmapped notes
    /// resolve to standard 12-TET; see [`should_filter_note`].
    ///
    /// [`should_filter_note`]: Self::should_filter_note
    #[inline]
    pub fn note_to_frequency(&self, note: u8, channel: Option<Channel>) -> f64 {
        resolve::note_to_frequency(&self.store, note, channel)
    }

    /// Retuning of a note relative to standard tuning, in semitones.
    #[inline]
    pub fn retuning_in_semitones(&self, note: u8, channel: Option<Channel>) -> f64 {
        resolve::retuning_in_semitones(&self.store, note, channel)
    }

    /// Retuning of a note relative to standard tuning, as a ratio.
    #[inline]
    pub fn retuning_as_ratio(&self, note: u8, channel: Option<Channel>) -> f64 {
        resolve::retuning_as_ratio(&self.store, note, channel)
    }

    /// True iff the note is unmapped and should not be sounded.
    #[inline]
    pub fn should_filter_note(&self, note: u8, channel: Option<Channel>) -> bool {
        resolve::should_filter_note(&self.store, note, channel)
    }

    /// Mapped note nearest `freq` in log-frequency distance; ties go to
    /// the lower note, and a table with no mapped entries falls back to
    /// standard tuning.
    #[inline]
    pub fn frequency_to_note(&self, freq: f64, channel: Option<Channel>) -> u8 {
        resolve::frequency_to_note(&self.store, freq, channel)
    }

    /// Best (note, channel) pair for `freq` across active tables. A
    /// `None` channel means "send on any channel".
    #[inline]
    pub fn frequency_to_note_and_channel(&self, freq: f64) -> (u8, Option<Channel>) {
        resolve::frequency_to_note_and_channel(&self.store, freq)
    }

    /// Name of the current scale; empty until a bulk dump names one.
    pub fn scale_name(&self) -> Arc<String> {
        self.scale_name.load_full()
    }

    /// True while a master has pushed updates within the liveness window.
    pub fn has_master(&self) -> bool {
        self.master.connected()
    }

    /// Feed raw SysEx bytes. Non-MTS, malformed, or checksum-failing
    /// messages are dropped silently; valid tuning messages update the
    /// store.
    pub fn parse_midi_data(&self, bytes: &[u8]) {
        match sysex::decode(bytes) {
            Ok(update) => self.apply_update(update),
            Err(err) => trace!("ignoring SysEx ({} bytes): {err}", bytes.len()),
        }
    }

    /// [`parse_midi_data`](Self::parse_midi_data) for hosts that hand
    /// SysEx around as signed bytes. Both representations decode
    /// identically.
    pub fn parse_midi_data_i8(&self, bytes: &[i8]) {
        match sysex::decode_i8(bytes) {
            Ok(update) => self.apply_update(update),
            Err(err) => trace!("ignoring SysEx ({} bytes): {err}", bytes.len()),
        }
    }

    /// Apply an update pushed by a master transport. Uses the same event
    /// interface the SysEx decoder produces, so the store never knows the
    /// origin. Refreshes master liveness.
    pub fn apply_master_update(&self, update: TuningUpdate) {
        self.master.touch();
        self.apply_update(update);
    }

    /// Master keep-alive: refreshes liveness without a table change.
    pub fn master_keep_alive(&self) {
        self.master.touch();
    }

    fn apply_update(&self, update: TuningUpdate) {
        match update {
            TuningUpdate::ReplaceTable { target, name, table } => {
                self.store.replace_whole(target, *table);
                if let Some(name) = name {
                    self.scale_name.store(Arc::new(name));
                }
            }
            TuningUpdate::ReplaceNotes { target, changes } => {
                // Decoded events are pre-validated; master pushes are not.
                if let Err(err) = self.store.replace_notes(target, &changes) {
                    debug!("dropping note batch: {err}");
                }
            }
            TuningUpdate::OctaveOffsets { channels, offsets_cents } => {
                if channels.is_all() {
                    // A retune of every channel is a global retune: land it
                    // on the default table so unpopulated channels keep
                    // falling back to it.
                    self.store.apply_octave_offsets(None, &offsets_cents);
                } else {
                    for channel in channels.iter() {
                        self.store.apply_octave_offsets(Some(channel), &offsets_cents);
                    }
                }
            }
        }
    }
}

/// Opaque handle to a registered client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// Process-wide session registry.
///
/// Plugins normally go through [`ClientRegistry::global`]; tests own
/// independent registries. Every id-keyed method fails fast with
/// [`UseAfterDeregister`] once the id has been released — audio threads
/// should grab the session once via [`session`](Self::session) and query
/// it directly instead of going through the map per note.
pub struct ClientRegistry {
    sessions: DashMap<u64, Arc<ClientSession>>,
    next_id: AtomicU64,
    config: ClientConfig,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(0),
            config,
        }
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> &'static ClientRegistry {
        static GLOBAL: OnceLock<ClientRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ClientRegistry::new)
    }

    /// Register a new client. Call from the plugin constructor.
    pub fn register(&self) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .insert(id, Arc::new(ClientSession::new(&self.config)));
        debug!(id, "registered MTS client");
        ClientId(id)
    }

    /// Release a client. Call from the plugin destructor. The id is dead
    /// afterwards; ids are never reused.
    pub fn deregister(&self, id: ClientId) -> Result<(), UseAfterDeregister> {
        let removed = self.sessions.remove(&id.0).is_some();
        if removed {
            debug!(id = id.0, "deregistered MTS client");
            Ok(())
        } else {
            Err(UseAfterDeregister)
        }
    }

    /// The session behind an id.
    pub fn session(&self, id: ClientId) -> Result<Arc<ClientSession>, UseAfterDeregister> {
        self.sessions
            .get(&id.0)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(UseAfterDeregister)
    }

    pub fn is_registered(&self, id: ClientId) -> bool {
        self.sessions.contains_key(&id.0)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // Id-keyed façade mirroring the session queries.

    pub fn has_master(&self, id: ClientId) -> Result<bool, UseAfterDeregister> {
        Ok(self.session(id)?.has_master())
    }

    pub fn should_filter_note(
        &self,
        id: ClientId,
        note: u8,
        channel: Option<Channel>,
    ) -> Result<bool, UseAfterDeregister> {
        Ok(self.session(id)?.should_filter_note(note, channel))
    }

    pub fn note_to_frequency(
        &self,
        id: ClientId,
        note: u8,
        channel: Option<Channel>,
    ) -> Result<f64, UseAfterDeregister> {
        Ok(self.session(id)?.note_to_frequency(note, channel))
    }

    pub fn retuning_in_semitones(
        &self,
        id: ClientId,
        note: u8,
        channel: Option<Channel>,
    ) -> Result<f64, UseAfterDeregister> {
        Ok(self.session(id)?.retuning_in_semitones(note, channel))
    }

    pub fn retuning_as_ratio(
        &self,
        id: ClientId,
        note: u8,
        channel: Option<Channel>,
    ) -> Result<f64, UseAfterDeregister> {
        Ok(self.session(id)?.retuning_as_ratio(note, channel))
    }

    pub fn frequency_to_note(
        &self,
        id: ClientId,
        freq: f64,
        channel: Option<Channel>,
    ) -> Result<u8, UseAfterDeregister> {
        Ok(self.session(id)?.frequency_to_note(freq, channel))
    }

    pub fn frequency_to_note_and_channel(
        &self,
        id: ClientId,
        freq: f64,
    ) -> Result<(u8, Option<Channel>), UseAfterDeregister> {
        Ok(self.session(id)?.frequency_to_note_and_channel(freq))
    }

    pub fn scale_name(&self, id: ClientId) -> Result<Arc<String>, UseAfterDeregister> {
        Ok(self.session(id)?.scale_name())
    }

    pub fn parse_midi_data(&self, id: ClientId, bytes: &[u8]) -> Result<(), UseAfterDeregister> {
        self.session(id)?.parse_midi_data(bytes);
        Ok(())
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn register_and_deregister_lifecycle() {
        let registry = ClientRegistry::new();
        assert!(registry.is_empty());

        let a = registry.register();
        let b = registry.register();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.is_registered(a));

        registry.deregister(a).unwrap();
        assert!(!registry.is_registered(a));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_registered(b));
    }

    #[test]
    fn queries_after_deregister_fail_fast() {
        let registry = ClientRegistry::new();
        let id = registry.register();
        registry.deregister(id).unwrap();

        assert_eq!(registry.deregister(id), Err(UseAfterDeregister));
        assert_eq!(registry.has_master(id), Err(UseAfterDeregister));
        assert_eq!(registry.note_to_frequency(id, 69, None), Err(UseAfterDeregister));
        assert_eq!(registry.should_filter_note(id, 60, None), Err(UseAfterDeregister));
        assert_eq!(registry.frequency_to_note(id, 440.0, None), Err(UseAfterDeregister));
        assert_eq!(registry.scale_name(id), Err(UseAfterDeregister));
        assert_eq!(registry.parse_midi_data(id, &[0xF0, 0xF7]), Err(UseAfterDeregister));
    }

    #[test]
    fn ids_are_never_reused() {
        let registry = ClientRegistry::new();
        let a = registry.register();
        registry.deregister(a).unwrap();
        let b = registry.register();
        assert_ne!(a, b);
        assert_eq!(registry.session(a).err(), Some(UseAfterDeregister));
        assert!(registry.session(b).is_ok());
    }

    #[test]
    fn sessions_do_not_share_tables() {
        let registry = ClientRegistry::new();
        let a = registry.register();
        let b = registry.register();

        let session_a = registry.session(a).unwrap();
        session_a.apply_master_update(TuningUpdate::ReplaceNotes {
            target: None,
            changes: smallvec::smallvec![(69, crate::note::NoteEntry::Mapped(432.0))],
        });

        assert_relative_eq!(registry.note_to_frequency(a, 69, None).unwrap(), 432.0);
        assert_relative_eq!(registry.note_to_frequency(b, 69, None).unwrap(), 440.0);
    }

    #[test]
    fn master_liveness_goes_stale() {
        let registry = ClientRegistry::with_config(ClientConfig {
            master_timeout: Duration::from_millis(40),
        });
        let id = registry.register();
        let session = registry.session(id).unwrap();

        assert!(!session.has_master());
        session.master_keep_alive();
        assert!(session.has_master());

        std::thread::sleep(Duration::from_millis(80));
        assert!(!session.has_master());

        // Any master push revives the connection.
        session.apply_master_update(TuningUpdate::OctaveOffsets {
            channels: crate::sysex::ChannelMask::ALL,
            offsets_cents: [0.0; 12],
        });
        assert!(session.has_master());
    }

    #[test]
    fn sysex_ingestion_does_not_imply_master() {
        let registry = ClientRegistry::new();
        let id = registry.register();
        let session = registry.session(id).unwrap();

        // Garbage and valid-looking-but-short messages: silent no-ops.
        session.parse_midi_data(&[0x12, 0x34]);
        session.parse_midi_data(&[0xF0, 0x7E, 0x00, 0x08, 0x01, 0xF7]);
        assert!(!session.has_master());
        assert_relative_eq!(session.note_to_frequency(69, None), 440.0);
    }

    #[test]
    fn zero_timeout_config_is_invalid() {
        let config = ClientConfig {
            master_timeout: Duration::ZERO,
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroMasterTimeout));
        assert!(ClientConfig::default().validate().is_ok());
    }
}
