use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Local};
use log::*;
use serde::Serialize;

use crate::{RecordBackend, RecordingEvent, SmartRecordConfig, Trigger};

/// Recorder shared between the streaming thread, the record task and the
/// pipeline task.
pub type SharedRecorder = Arc<Mutex<SmartRecorder>>;

pub fn lock_recorder(recorder: &SharedRecorder) -> anyhow::Result<MutexGuard<'_, SmartRecorder>> {
    recorder
        .lock()
        .map_err(|_| anyhow!("smart recorder lock poisoned"))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { back_sec: u32, front_sec: u32 },
    CoolingDown { remaining: Duration },
    UnknownSource,
    Failed { reason: String },
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started { .. })
    }
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started {
                back_sec,
                front_sec,
            } => write!(f, "recording started (-{back_sec}s/+{front_sec}s)"),
            StartOutcome::CoolingDown { remaining } => {
                write!(f, "cooling down, {:.1}s left", remaining.as_secs_f64())
            }
            StartOutcome::UnknownSource => write!(f, "no recorder for this source"),
            StartOutcome::Failed { reason } => write!(f, "recording failed: {reason}"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceStatus {
    pub source_id: u32,
    pub name: String,
    pub backend: &'static str,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub last_label: Option<String>,
    pub last_started_at: Option<DateTime<Local>>,
    pub last_clip: Option<PathBuf>,
}

struct Source {
    name: String,
    backend: Box<dyn RecordBackend>,
    last_start: Option<Instant>,
    started: u64,
    completed: u64,
    failed: u64,
    last_label: Option<String>,
    last_started_at: Option<DateTime<Local>>,
    last_clip: Option<PathBuf>,
}

pub struct SmartRecorder {
    config: SmartRecordConfig,
    dir: PathBuf,
    sources: BTreeMap<u32, Source>,
}

impl SmartRecorder {
    pub fn new(config: SmartRecordConfig) -> anyhow::Result<Self> {
        let dir = if config.dir.is_absolute() {
            config.dir.clone()
        } else {
            std::env::current_dir()
                .context("failed to get working directory")?
                .join(&config.dir)
        };

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create recording directory {}", dir.display()))?;

        debug!("recording into {}", dir.display());

        Ok(Self {
            config,
            dir,
            sources: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &SmartRecordConfig {
        &self.config
    }

    /// Absolute recording directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn attach(
        &mut self,
        source_id: u32,
        name: impl Into<String>,
        backend: Box<dyn RecordBackend>,
    ) {
        let name = name.into();
        info!("attached {} recorder to {name}", backend.kind());

        let previous = self.sources.insert(
            source_id,
            Source {
                name,
                backend,
                last_start: None,
                started: 0,
                completed: 0,
                failed: 0,
                last_label: None,
                last_started_at: None,
                last_clip: None,
            },
        );

        if let Some(previous) = previous {
            warn!("replaced recorder of {}", previous.name);
        }
    }

    pub fn start(&mut self, source_id: u32, trigger: &Trigger, now: Instant) -> StartOutcome {
        let cooldown = self.config.cooldown();
        let cache_sec = self.config.cache_sec;

        let source = match self.sources.get_mut(&source_id) {
            Some(source) => source,
            None => return StartOutcome::UnknownSource,
        };

        if let Some(last) = source.last_start {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < cooldown {
                return StartOutcome::CoolingDown {
                    remaining: cooldown - elapsed,
                };
            }
        }

        let cache_sec = source.backend.cache_sec().unwrap_or(cache_sec).min(cache_sec);
        let back_sec = trigger.back_sec.min(cache_sec);
        let front_sec = trigger.front_sec;

        if back_sec < trigger.back_sec {
            debug!(
                "clamped {}s pre-roll to the {cache_sec}s cache of {}",
                trigger.back_sec, source.name
            );
        }

        match source.backend.start(back_sec, front_sec, &trigger.label) {
            Ok(()) => {
                source.last_start = Some(now);
                source.started += 1;
                source.last_label = Some(trigger.label.clone());
                source.last_started_at = Some(Local::now());

                info!(
                    "recording {} for '{}' (-{back_sec}s/+{front_sec}s)",
                    source.name, trigger.label
                );

                StartOutcome::Started {
                    back_sec,
                    front_sec,
                }
            }
            Err(err) => {
                source.failed += 1;
                warn!("could not record {}: {err:#}", source.name);

                StartOutcome::Failed {
                    reason: format!("{err:#}"),
                }
            }
        }
    }

    /// Drops the backend of one source. Returns whether there was one.
    pub fn detach(&mut self, source_id: u32) -> bool {
        match self.sources.remove(&source_id) {
            Some(source) => {
                info!("detached {} recorder from {}", source.backend.kind(), source.name);
                true
            }
            None => false,
        }
    }

    pub fn stop(&mut self, source_id: u32) -> anyhow::Result<()> {
        let source = self
            .sources
            .get_mut(&source_id)
            .with_context(|| format!("no recorder for source {source_id}"))?;

        source.backend.stop()?;
        info!("stopped recording {}", source.name);

        Ok(())
    }

    pub fn record_completed(&mut self, event: &RecordingEvent) {
        match self.sources.get_mut(&event.source_id) {
            Some(source) => {
                source.completed += 1;
                source.last_clip = Some(event.path());
            }
            None => warn!("clip finished for unknown source {}", event.source_id),
        }
    }

    pub fn status(&self) -> Vec<SourceStatus> {
        self.sources
            .iter()
            .map(|(&source_id, source)| SourceStatus {
                source_id,
                name: source.name.clone(),
                backend: source.backend.kind(),
                started: source.started,
                completed: source.completed,
                failed: source.failed,
                last_label: source.last_label.clone(),
                last_started_at: source.last_started_at,
                last_clip: source.last_clip.clone(),
            })
            .collect()
    }

    /// Drops every backend, destroying native contexts. Must only run once the
    /// pipeline is in `Null`.
    pub fn cleanup(&mut self) {
        for (_, source) in std::mem::take(&mut self.sources) {
            debug!("releasing recorder of {}", source.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        Start(u32, u32, String),
        Stop,
    }

    /// Raises its flag when dropped.
    #[derive(Default)]
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockBackend {
        calls: Arc<Mutex<Vec<Call>>>,
        fail: Arc<AtomicBool>,
        cache_sec: Option<u32>,
        dropped: DropFlag,
    }

    impl RecordBackend for MockBackend {
        fn kind(&self) -> &'static str {
            "mock"
        }

        fn start(&mut self, back_sec: u32, front_sec: u32, label: &str) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("invalid operation");
            }

            self.calls
                .lock()
                .unwrap()
                .push(Call::Start(back_sec, front_sec, label.to_owned()));
            Ok(())
        }

        fn stop(&mut self) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(Call::Stop);
            Ok(())
        }

        fn cache_sec(&self) -> Option<u32> {
            self.cache_sec
        }
    }

    fn recorder(dir: &Path) -> SmartRecorder {
        SmartRecorder::new(SmartRecordConfig {
            dir: dir.join("clips"),
            ..Default::default()
        })
        .unwrap()
    }

    fn person(recorder: &SmartRecorder) -> Trigger {
        Trigger::new(recorder.config(), "person")
    }

    #[test]
    fn creates_recording_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let recorder = recorder(tmp.path());

        assert!(recorder.dir().is_absolute());
        assert!(recorder.dir().is_dir());
    }

    #[test]
    fn unknown_source() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = recorder(tmp.path());
        let trigger = person(&recorder);

        assert_eq!(
            recorder.start(1, &trigger, Instant::now()),
            StartOutcome::UnknownSource
        );
        assert!(recorder.stop(1).is_err());
    }

    #[test]
    fn cooldown_after_successful_start() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = recorder(tmp.path());
        let backend = MockBackend::default();
        let calls = backend.calls.clone();
        recorder.attach(0, "cam0", Box::new(backend));

        let trigger = person(&recorder);
        let t0 = Instant::now();

        assert_eq!(
            recorder.start(0, &trigger, t0),
            StartOutcome::Started {
                back_sec: 10,
                front_sec: 10
            }
        );

        match recorder.start(0, &trigger, t0 + Duration::from_secs(59)) {
            StartOutcome::CoolingDown { remaining } => {
                assert_eq!(remaining, Duration::from_secs(1))
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        assert!(recorder
            .start(0, &trigger, t0 + Duration::from_secs(60))
            .is_started());

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::Start(10, 10, "person".to_owned()),
                Call::Start(10, 10, "person".to_owned()),
            ]
        );
    }

    #[test]
    fn failure_does_not_start_cooldown() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = recorder(tmp.path());
        let backend = MockBackend::default();
        let fail = backend.fail.clone();
        recorder.attach(0, "cam0", Box::new(backend));

        let trigger = person(&recorder);
        let t0 = Instant::now();

        fail.store(true, Ordering::SeqCst);
        match recorder.start(0, &trigger, t0) {
            StartOutcome::Failed { reason } => assert!(reason.contains("invalid operation")),
            other => panic!("unexpected outcome {other:?}"),
        }

        fail.store(false, Ordering::SeqCst);
        assert!(recorder
            .start(0, &trigger, t0 + Duration::from_secs(1))
            .is_started());

        let status = recorder.status();
        assert_eq!(status[0].failed, 1);
        assert_eq!(status[0].started, 1);
    }

    #[test]
    fn zero_cooldown_allows_back_to_back_starts() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = SmartRecorder::new(SmartRecordConfig {
            dir: tmp.path().to_owned(),
            cooldown_sec: 0.0,
            ..Default::default()
        })
        .unwrap();
        recorder.attach(0, "cam0", Box::new(MockBackend::default()));

        let trigger = person(&recorder);
        let now = Instant::now();

        assert!(recorder.start(0, &trigger, now).is_started());
        assert!(recorder.start(0, &trigger, now).is_started());
    }

    #[test]
    fn pre_roll_is_clamped_to_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = recorder(tmp.path());
        let backend = MockBackend {
            cache_sec: Some(5),
            ..Default::default()
        };
        let calls = backend.calls.clone();
        recorder.attach(0, "cam0", Box::new(backend));

        let trigger = Trigger {
            back_sec: 120,
            front_sec: 3,
            label: "manual".to_owned(),
        };

        assert_eq!(
            recorder.start(0, &trigger, Instant::now()),
            StartOutcome::Started {
                back_sec: 5,
                front_sec: 3
            }
        );
        assert_eq!(
            calls.lock().unwrap()[0],
            Call::Start(5, 3, "manual".to_owned())
        );
    }

    #[test]
    fn configured_cache_bounds_backend_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = recorder(tmp.path());
        recorder.attach(
            0,
            "cam0",
            Box::new(MockBackend {
                cache_sec: Some(600),
                ..Default::default()
            }),
        );

        let trigger = Trigger {
            back_sec: 90,
            front_sec: 10,
            label: "manual".to_owned(),
        };

        assert_eq!(
            recorder.start(0, &trigger, Instant::now()),
            StartOutcome::Started {
                back_sec: 60,
                front_sec: 10
            }
        );
    }

    #[test]
    fn completion_updates_status() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = recorder(tmp.path());
        recorder.attach(0, "cam0", Box::new(MockBackend::default()));

        recorder.start(0, &person(&recorder), Instant::now());
        recorder.record_completed(&RecordingEvent {
            source_id: 0,
            session_id: 0,
            label: "person".to_owned(),
            file: "cam0_00001.mp4".to_owned(),
            dir: tmp.path().to_owned(),
            duration_ms: 20_000,
        });

        let status = recorder.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].backend, "mock");
        assert_eq!(status[0].completed, 1);
        assert_eq!(status[0].last_label.as_deref(), Some("person"));
        assert_eq!(
            status[0].last_clip,
            Some(tmp.path().join("cam0_00001.mp4"))
        );
        assert!(status[0].last_started_at.is_some());
    }

    #[test]
    fn stop_reaches_backend() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = recorder(tmp.path());
        let backend = MockBackend::default();
        let calls = backend.calls.clone();
        recorder.attach(0, "cam0", Box::new(backend));

        recorder.stop(0).unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![Call::Stop]);
    }

    #[test]
    fn cleanup_drops_backends_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = recorder(tmp.path());
        let backend = MockBackend::default();
        let dropped = backend.dropped.0.clone();
        recorder.attach(0, "cam0", Box::new(backend));

        recorder.cleanup();
        assert!(dropped.load(Ordering::SeqCst));
        assert!(recorder.status().is_empty());

        recorder.cleanup();
        assert!(recorder.status().is_empty());
    }

    #[test]
    fn detach_drops_one_backend() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = recorder(tmp.path());
        let first = MockBackend::default();
        let first_dropped = first.dropped.0.clone();
        let second = MockBackend::default();
        let second_dropped = second.dropped.0.clone();
        recorder.attach(0, "cam0", Box::new(first));
        recorder.attach(1, "cam1", Box::new(second));

        assert!(recorder.detach(0));
        assert!(first_dropped.load(Ordering::SeqCst));
        assert!(!second_dropped.load(Ordering::SeqCst));
        assert!(!recorder.detach(0));

        let status = recorder.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].source_id, 1);
        assert_eq!(
            recorder.start(0, &person(&recorder), Instant::now()),
            StartOutcome::UnknownSource
        );
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(
            StartOutcome::CoolingDown {
                remaining: Duration::from_millis(12_340)
            }
            .to_string(),
            "cooling down, 12.3s left"
        );
        assert_eq!(
            StartOutcome::Started {
                back_sec: 10,
                front_sec: 10
            }
            .to_string(),
            "recording started (-10s/+10s)"
        );
    }
}
