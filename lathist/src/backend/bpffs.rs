//! # bpffs Persistence
//!
//! Each trace is a directory under the pin root:
//!
//! ```text
//! /sys/fs/bpf/lathist/
//! └── <name>/
//!     ├── kslots       per-CPU slot array (pinned map)
//!     ├── frac_bits    precision record (pinned map)
//!     ├── link_start   fentry link (pinned link)
//!     └── link_end     fexit link (pinned link)
//! ```
//!
//! A pinned link keeps its program attached after the creating process
//! exits. Unlinking the pin drops the last reference and detaches it.

use std::fs::{self, DirBuilder, ReadDir};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use aya::{
    maps::{Array, Map, MapData, PerCpuArray},
    programs::{links::FdLink, FEntry, FExit},
};
use lathist_common::{Slot, END_PROGRAM, FRAC_BITS_MAP, SLOTS_MAP, START_PROGRAM};
use log::{debug, info};

use super::ebpf_setup::LoadedTrace;
use crate::domain::{FracBits, TraceError, TraceName};
use crate::histogram::HistogramSnapshot;
use crate::lifecycle::{Artifact, Persistence};

/// Default pin root
pub const DEFAULT_PIN_ROOT: &str = "/sys/fs/bpf/lathist";

/// Trace namespace rooted at a bpffs directory
#[derive(Debug, Clone)]
pub struct BpfFs {
    root: PathBuf,
}

impl BpfFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the pin root (mode 0700) if it does not exist yet
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created
    pub fn ensure_root(&self) -> Result<(), TraceError> {
        if !self.root.try_exists()? {
            DirBuilder::new().recursive(true).mode(0o700).create(&self.root)?;
            info!("✓ Created pin root {}", self.root.display());
        }
        Ok(())
    }

    fn container(&self, name: &TraceName) -> PathBuf {
        self.root.join(name.as_str())
    }

    fn artifact_path(&self, name: &TraceName, artifact: Artifact) -> PathBuf {
        self.container(name).join(artifact.file_name())
    }

    /// Open a pinned map, mapping a missing pin to `NotFound`
    fn open_pinned(&self, name: &TraceName, artifact: Artifact) -> Result<MapData, TraceError> {
        let path = self.artifact_path(name, artifact);
        if !path.try_exists()? {
            return Err(TraceError::NotFound(name.clone()));
        }
        Ok(MapData::from_pin(&path)?)
    }
}

impl Persistence for BpfFs {
    type Object = LoadedTrace;
    type Names = TraceNames;

    fn exists(&self, name: &TraceName) -> Result<bool, TraceError> {
        Ok(self.container(name).try_exists()?)
    }

    fn create_container(&mut self, name: &TraceName) -> Result<(), TraceError> {
        match DirBuilder::new().mode(0o700).create(self.container(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(TraceError::DuplicateTrace(name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn attach(&mut self, name: &TraceName, mut object: LoadedTrace) -> Result<(), TraceError> {
        let persist_failed = |artifact: Artifact, reason: String| TraceError::Persist {
            name: name.clone(),
            artifact,
            reason,
        };

        for (artifact, map_name) in [(Artifact::Slots, SLOTS_MAP), (Artifact::Precision, FRAC_BITS_MAP)]
        {
            let map = object
                .ebpf
                .map(map_name)
                .ok_or_else(|| persist_failed(artifact, format!("{map_name} map not found")))?;
            map.pin(self.artifact_path(name, artifact))
                .map_err(|e| persist_failed(artifact, e.to_string()))?;
            debug!("Pinned {map_name} as {name}/{artifact}");
        }

        let start_id = object
            .start_link
            .take()
            .ok_or_else(|| persist_failed(Artifact::StartHook, "start hook not attached".into()))?;
        let program: &mut FEntry = object
            .ebpf
            .program_mut(START_PROGRAM)
            .ok_or_else(|| persist_failed(Artifact::StartHook, format!("{START_PROGRAM} not found")))?
            .try_into()?;
        let link: FdLink = program.take_link(start_id)?.into();
        link.pin(self.artifact_path(name, Artifact::StartHook))
            .map_err(|e| persist_failed(Artifact::StartHook, e.to_string()))?;

        let end_id = object
            .end_link
            .take()
            .ok_or_else(|| persist_failed(Artifact::EndHook, "end hook not attached".into()))?;
        let program: &mut FExit = object
            .ebpf
            .program_mut(END_PROGRAM)
            .ok_or_else(|| persist_failed(Artifact::EndHook, format!("{END_PROGRAM} not found")))?
            .try_into()?;
        let link: FdLink = program.take_link(end_id)?.into();
        link.pin(self.artifact_path(name, Artifact::EndHook))
            .map_err(|e| persist_failed(Artifact::EndHook, e.to_string()))?;

        info!("✓ Pinned trace {name} under {}", self.container(name).display());
        Ok(())
    }

    fn detach(&mut self, name: &TraceName, artifact: Artifact) -> Result<(), TraceError> {
        match fs::remove_file(self.artifact_path(name, artifact)) {
            Ok(()) => Ok(()),
            // Already gone counts as released
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_container(&mut self, name: &TraceName) -> Result<(), TraceError> {
        fs::remove_dir(self.container(name))
            .map_err(|source| TraceError::TeardownFailed { name: name.clone(), source })
    }

    fn list_container(&self) -> Result<TraceNames, TraceError> {
        Ok(TraceNames { entries: fs::read_dir(&self.root)? })
    }

    fn load_precision(&self, name: &TraceName) -> Result<FracBits, TraceError> {
        let map = Map::Array(self.open_pinned(name, Artifact::Precision)?);
        let record: Array<_, u32> = Array::try_from(map)?;
        FracBits::new(record.get(&0, 0)?)
    }

    fn load_histogram(
        &self,
        name: &TraceName,
        frac_bits: FracBits,
    ) -> Result<HistogramSnapshot, TraceError> {
        let map = Map::PerCpuArray(self.open_pinned(name, Artifact::Slots)?);
        let slots: PerCpuArray<_, Slot> = PerCpuArray::try_from(map)?;

        let slots = (0..frac_bits.n_slots())
            .map(|index| Ok(slots.get(&index, 0)?.to_vec()))
            .collect::<Result<Vec<_>, TraceError>>()?;

        Ok(HistogramSnapshot { frac_bits, slots })
    }
}

/// Directory scan of the pin root, one pass
///
/// Entries that are not directories or whose names are not valid trace
/// names are skipped.
#[derive(Debug)]
pub struct TraceNames {
    entries: ReadDir,
}

impl Iterator for TraceNames {
    type Item = Result<TraceName, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Ok(name) = TraceName::new(name) {
                return Some(Ok(name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> TraceName {
        TraceName::new(s).unwrap()
    }

    #[test]
    fn test_ensure_root_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BpfFs::new(tmp.path().join("nested/lathist"));
        store.ensure_root().unwrap();
        assert!(store.root().is_dir());
        // Idempotent
        store.ensure_root().unwrap();
    }

    #[test]
    fn test_container_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = BpfFs::new(tmp.path());
        let sleep = name("sleep");

        assert!(!store.exists(&sleep).unwrap());
        store.create_container(&sleep).unwrap();
        assert!(store.exists(&sleep).unwrap());

        // Exclusive create
        assert!(matches!(store.create_container(&sleep), Err(TraceError::DuplicateTrace(_))));

        // Missing artifacts detach cleanly
        for artifact in Artifact::ALL {
            store.detach(&sleep, artifact).unwrap();
        }
        store.remove_container(&sleep).unwrap();
        assert!(!store.exists(&sleep).unwrap());
    }

    #[test]
    fn test_remove_container_fails_when_not_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = BpfFs::new(tmp.path());
        let t = name("busy");
        store.create_container(&t).unwrap();
        fs::write(tmp.path().join("busy/stray"), b"x").unwrap();
        assert!(matches!(store.remove_container(&t), Err(TraceError::TeardownFailed { .. })));
    }

    #[test]
    fn test_detach_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = BpfFs::new(tmp.path());
        let t = name("x");
        store.create_container(&t).unwrap();
        let pin = tmp.path().join("x").join(Artifact::Slots.file_name());
        fs::write(&pin, b"").unwrap();
        store.detach(&t, Artifact::Slots).unwrap();
        assert!(!pin.exists());
    }

    #[test]
    fn test_list_only_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = BpfFs::new(tmp.path());
        store.create_container(&name("a")).unwrap();
        store.create_container(&name("b")).unwrap();
        fs::write(tmp.path().join("not-a-trace"), b"").unwrap();

        let mut names: Vec<String> =
            store.list_container().unwrap().map(|n| n.unwrap().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_list_missing_root_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BpfFs::new(tmp.path().join("missing"));
        assert!(store.list_container().is_err());
    }

    #[test]
    fn test_load_unknown_trace_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BpfFs::new(tmp.path());
        let ghost = name("ghost");
        assert!(matches!(store.load_precision(&ghost), Err(TraceError::NotFound(_))));
        assert!(matches!(
            store.load_histogram(&ghost, FracBits::default()),
            Err(TraceError::NotFound(_))
        ));
    }
}
