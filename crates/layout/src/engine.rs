//! Versioned layout state shared between the session and the compositor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use classcast_media_model::{LayoutEntry, LayoutType, SourceId, SourceKind};
use parking_lot::{Mutex, RwLock};

use crate::pip::{resolve_pip, PipGeometry};

/// The enabled entries in draw order, tagged with the version they were
/// derived from.
#[derive(Debug, Clone)]
pub struct LayoutSnapshot {
    pub version: u64,
    pub entries: Arc<[LayoutEntry]>,
}

#[derive(Debug, Default)]
struct LayoutState {
    layout_type: LayoutType,
    entries: Vec<LayoutEntry>,
    /// Whether `entries` came from the caller rather than a resolution.
    custom: bool,
}

/// Mutable, versioned list of placement rules.
///
/// Every edit bumps the version. Readers compare versions instead of
/// entries to decide whether derived state is stale.
#[derive(Debug)]
pub struct LayoutEngine {
    geometry: PipGeometry,
    state: RwLock<LayoutState>,
    version: AtomicU64,
    cache: Mutex<Option<LayoutSnapshot>>,
}

impl LayoutEngine {
    pub fn new(geometry: PipGeometry) -> Self {
        Self {
            geometry,
            state: RwLock::new(LayoutState::default()),
            version: AtomicU64::new(0),
            cache: Mutex::new(None),
        }
    }

    pub fn geometry(&self) -> &PipGeometry {
        &self.geometry
    }

    /// Current version. Strictly increases with every edit.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn layout_type(&self) -> LayoutType {
        self.state.read().layout_type
    }

    /// All entries, enabled or not, in stored order.
    pub fn get(&self) -> Vec<LayoutEntry> {
        self.state.read().entries.clone()
    }

    /// Replace the layout with caller-supplied entries. Returns the new version.
    pub fn set(&self, entries: Vec<LayoutEntry>) -> u64 {
        self.edit(|state| {
            state.layout_type = LayoutType::Custom;
            state.entries = entries;
            state.custom = true;
            true
        })
        .unwrap_or_else(|| self.version())
    }

    /// Resolve an arrangement for `sources` without storing it.
    ///
    /// `Custom` returns the stored custom entries sorted by `z_index`, or the
    /// PIP arrangement as a starting point when none exist yet. The result is
    /// a pure function of the sources and stored entries.
    pub fn resolve(&self, layout_type: LayoutType, sources: &[SourceKind]) -> Vec<LayoutEntry> {
        match layout_type {
            LayoutType::Pip => resolve_pip(sources, &self.geometry),
            LayoutType::Custom => {
                let state = self.state.read();
                if state.custom {
                    let mut entries = state.entries.clone();
                    entries.sort_by_key(|e| e.z_index);
                    entries
                } else {
                    resolve_pip(sources, &self.geometry)
                }
            }
        }
    }

    /// Resolve and store an arrangement. Returns the new version.
    pub fn apply(&self, layout_type: LayoutType, sources: &[SourceKind]) -> u64 {
        let entries = self.resolve(layout_type, sources);
        self.edit(|state| {
            state.layout_type = layout_type;
            state.custom = layout_type == LayoutType::Custom;
            state.entries = entries;
            true
        })
        .unwrap_or_else(|| self.version())
    }

    /// Toggle one source. Returns the new version, or `None` if no entry
    /// references the source.
    pub fn set_enabled(&self, source_id: &SourceId, enabled: bool) -> Option<u64> {
        self.edit(|state| {
            let mut found = false;
            for entry in state.entries.iter_mut().filter(|e| &e.source_id == source_id) {
                entry.enabled = enabled;
                found = true;
            }
            found
        })
    }

    /// Replace the entry for `entry.source_id`, appending it if absent.
    pub fn update_entry(&self, entry: LayoutEntry) -> u64 {
        self.edit(|state| {
            match state
                .entries
                .iter_mut()
                .find(|e| e.source_id == entry.source_id)
            {
                Some(existing) => *existing = entry,
                None => state.entries.push(entry),
            }
            state.layout_type = LayoutType::Custom;
            state.custom = true;
            true
        })
        .unwrap_or_else(|| self.version())
    }

    /// Move a source above every other entry.
    pub fn bring_to_front(&self, source_id: &SourceId) -> Option<u64> {
        self.edit(|state| {
            let top = state.entries.iter().map(|e| e.z_index).max().unwrap_or(0);
            match state.entries.iter_mut().find(|e| &e.source_id == source_id) {
                Some(entry) => {
                    entry.z_index = top + 1;
                    state.layout_type = LayoutType::Custom;
                    state.custom = true;
                    true
                }
                None => false,
            }
        })
    }

    /// Enabled entries sorted by ascending `z_index`.
    ///
    /// Recomputed only when the version moved since the last call, so the
    /// per-tick cost is a version load and an `Arc` clone.
    pub fn enabled_snapshot(&self) -> LayoutSnapshot {
        let version = self.version();
        let mut cache = self.cache.lock();
        if let Some(snapshot) = cache.as_ref() {
            if snapshot.version == version {
                return snapshot.clone();
            }
        }

        let state = self.state.read();
        let version = self.version();
        let mut entries: Vec<LayoutEntry> =
            state.entries.iter().filter(|e| e.enabled).cloned().collect();
        entries.sort_by_key(|e| e.z_index);
        let snapshot = LayoutSnapshot {
            version,
            entries: entries.into(),
        };
        *cache = Some(snapshot.clone());
        snapshot
    }

    fn edit(&self, f: impl FnOnce(&mut LayoutState) -> bool) -> Option<u64> {
        let mut state = self.state.write();
        if !f(&mut state) {
            return None;
        }
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(version, entries = state.entries.len(), "Layout updated");
        Some(version)
    }
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new(PipGeometry::default())
    }
}
