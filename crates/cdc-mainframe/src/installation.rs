//! `Installation`: owns ECS and the ECS flag register across every
//! mainframe, plus persistence and the operator verbs (`spec.md` §3,
//! §6.3, §6.5).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cdc_channel::{ChSlot, Device, FuncOutcome, TapeStatus, TapeUnit};
use cdc_config::Config;
use cdc_pp::PP_MEM_WORDS;
use tracing::{error, instrument};

use crate::mainframe::Mainframe;

/// Fatal errors surfaced during installation startup (`spec.md` §7
/// "Fatal errors"): impossible configuration, or a persistence file that
/// cannot be read/written at all (as opposed to merely the wrong size,
/// which is a normal re-init per §6.3, not an error).
#[derive(Debug, thiserror::Error)]
pub enum InstallationError {
    #[error("invalid configuration: {0}")]
    Config(#[from] cdc_config::ConfigError),
    #[error("persistence I/O failure on {path}: {source}")]
    Persistence { path: PathBuf, source: io::Error },
}

/// Adapts a channel-shared `TapeUnit` into the `Device` trait so the
/// operator `load`/`unload`/`status` verbs (`spec.md` §6.5) can reach the
/// unit directly while the channel continues to drive its `io` the
/// normal way. Grounded in the same PCI-passthrough shape `cdc-channel`'s
/// other devices use, just with the inner state behind a lock instead of
/// owned outright, since the installation (not the channel) is the
/// handle an operator command addresses.
struct SharedTape(Arc<Mutex<TapeUnit>>);

impl Device for SharedTape {
    fn name(&self) -> &str {
        "tape-unit"
    }

    fn func(&mut self, code: u16) -> FuncOutcome {
        #[allow(clippy::unwrap_used)]
        self.0.lock().unwrap().func(code)
    }

    fn io(&mut self, channel: &mut ChSlot) {
        #[allow(clippy::unwrap_used)]
        self.0.lock().unwrap().io(channel);
    }

    fn activate(&mut self) {
        #[allow(clippy::unwrap_used)]
        self.0.lock().unwrap().activate();
    }

    fn disconnect(&mut self) {
        #[allow(clippy::unwrap_used)]
        self.0.lock().unwrap().disconnect();
    }
}

/// One or two mainframes sharing ECS, the ECS flag register, and a
/// deadstart deck (`spec.md` §3 Data Model "Installation").
pub struct Installation {
    mainframes: Vec<Mainframe>,
    emulation_active: AtomicBool,
    persist_dir: Option<PathBuf>,
    deadstart_sequence: Vec<u16>,
    tapes: HashMap<String, Arc<Mutex<TapeUnit>>>,
}

impl Installation {
    /// Validate `cfg`, allocate ECS and every mainframe, wire configured
    /// tape equipment, and load any existing persistence images.
    ///
    /// `spec.md` §6.4 gives equipment as a flat `(channel, eqNo, unit,
    /// devType, deviceName)` list with no mainframe index; we attach all
    /// configured equipment to mainframe 0, a documented choice since the
    /// spec does not address multi-mainframe equipment routing and
    /// single-mainframe installations are the common case.
    pub fn new(cfg: &Config) -> Result<Self, InstallationError> {
        cfg.validate()?;
        let model = cfg.model.to_model_type();
        let ecs = Arc::new(cdc_mem::ExtendedMemory::new(cfg.ecs_words));
        let ecs_flags = Arc::new(cdc_mem::EcsFlagRegister::new());
        let persist_dir = cfg.persist_dir.as_ref().map(PathBuf::from);

        let mut mainframes = Vec::with_capacity(cfg.mainframes as usize);
        for id in 0..cfg.mainframes {
            let mut mf = Mainframe::new(
                id,
                model,
                cfg.cm_words,
                cfg.pp_count,
                cfg.clock_increment_per_tick,
                Arc::clone(&ecs),
                Arc::clone(&ecs_flags),
            );
            if cfg.cpus == 2 {
                mf.add_second_cpu();
            }
            if let Some(dir) = &persist_dir {
                load_mainframe_image(&mut mf, dir)?;
            }
            mainframes.push(mf);
        }

        let mut tapes = HashMap::new();
        if let Some(mf0) = mainframes.get_mut(0) {
            for eq in &cfg.equipment {
                if !eq.dev_type.eq_ignore_ascii_case("tape") {
                    continue;
                }
                let tape = Arc::new(Mutex::new(TapeUnit::new()));
                if let Some(channel) = mf0.channels.get_mut(usize::from(eq.channel)) {
                    let idx = channel.attach(Box::new(SharedTape(Arc::clone(&tape))));
                    channel.select(idx);
                }
                tapes.insert(eq.device_name.clone(), tape);
            }
        }

        Ok(Self {
            mainframes,
            emulation_active: AtomicBool::new(false),
            persist_dir,
            deadstart_sequence: cfg.deadstart_sequence.clone(),
            tapes,
        })
    }

    /// `deadStart(mainframeId)` (`spec.md` §6.5).
    #[instrument(skip(self))]
    pub fn deadstart(&mut self, mainframe_id: u32) -> bool {
        let Some(mf) = self.mainframes.iter_mut().find(|mf| mf.id == mainframe_id) else {
            return false;
        };
        mf.deadstart(&self.deadstart_sequence);
        true
    }

    /// Run every mainframe's scheduler thread until `shutdown` clears
    /// `emulationActive`; each thread flushes its own CM/PP images on
    /// exit when persistence is configured (`spec.md` §5 "Cancellation").
    ///
    /// When `console` is set, an additional thread watches stdin for a
    /// `shutdown` line and clears `emulationActive` on it — the one piece
    /// of the operator surface (`spec.md` §6.5) the core itself drives,
    /// since every other verb only needs `&self` and can be issued before
    /// the scheduler starts.
    pub fn run_until_shutdown(&mut self, console: bool) {
        self.emulation_active.store(true, Ordering::Relaxed);
        let active = &self.emulation_active;
        let persist_dir = self.persist_dir.as_deref();
        std::thread::scope(|scope| {
            if console {
                scope.spawn(move || {
                    use std::io::BufRead;
                    let stdin = std::io::stdin();
                    for line in stdin.lock().lines().map_while(Result::ok) {
                        if line.trim().eq_ignore_ascii_case("shutdown") {
                            active.store(false, Ordering::Relaxed);
                            break;
                        }
                    }
                });
            }
            for mf in &mut self.mainframes {
                scope.spawn(move || {
                    mf.run_until_shutdown(active);
                    if let Some(dir) = persist_dir {
                        if let Err(err) = save_mainframe_image(mf, dir) {
                            error!(mainframe = mf.id, %err, "failed to flush persistent memory");
                        }
                    }
                });
            }
        });
    }

    /// Signal every mainframe thread to exit at its next tick boundary.
    pub fn shutdown(&self) {
        self.emulation_active.store(false, Ordering::Relaxed);
    }

    /// Load (replace) a configured tape unit's image; `false` if
    /// `device_name` names no configured tape.
    pub fn load_tape(&self, device_name: &str, image: Vec<u8>) -> bool {
        let Some(tape) = self.tapes.get(device_name) else {
            return false;
        };
        #[allow(clippy::unwrap_used)]
        tape.lock().unwrap().load(image);
        true
    }

    /// Unload a configured tape unit; `false` if `device_name` names no
    /// configured tape.
    pub fn unload_tape(&self, device_name: &str) -> bool {
        let Some(tape) = self.tapes.get(device_name) else {
            return false;
        };
        #[allow(clippy::unwrap_used)]
        tape.lock().unwrap().unload();
        true
    }

    /// Show-tape-status operator verb (`spec.md` §6.5).
    #[must_use]
    pub fn tape_status(&self, device_name: &str) -> Option<TapeStatus> {
        #[allow(clippy::unwrap_used)]
        self.tapes.get(device_name).map(|tape| tape.lock().unwrap().status())
    }

    #[must_use]
    pub fn mainframe_count(&self) -> usize {
        self.mainframes.len()
    }
}

fn cm_store_path(dir: &Path, mainframe_id: u32) -> PathBuf {
    dir.join(format!("cmStore{mainframe_id}"))
}

fn pp_store_path(dir: &Path, pp_id: u8, mainframe_id: u32) -> PathBuf {
    dir.join(format!("ppStore-{pp_id}-{mainframe_id}"))
}

/// Load a little-endian 64-bit word image from `path` if its size matches
/// `expected_words`; otherwise zero the in-memory array and (re)create the
/// file at the correct size (`spec.md` §6.3).
fn load_or_reset_words64(path: &Path, expected_words: usize) -> Result<Vec<u64>, InstallationError> {
    let expected_bytes = expected_words * 8;
    let existing = fs::read(path);
    if let Ok(bytes) = &existing {
        if bytes.len() == expected_bytes {
            return Ok(bytes
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                .collect());
        }
    }
    let zeros = vec![0u64; expected_words];
    write_words64(path, &zeros)?;
    Ok(zeros)
}

fn write_words64(path: &Path, words: &[u64]) -> Result<(), InstallationError> {
    let mut buf = Vec::with_capacity(words.len() * 8);
    for word in words {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    fs::write(path, buf).map_err(|source| InstallationError::Persistence { path: path.to_path_buf(), source })
}

fn load_or_reset_words16(path: &Path, expected_words: usize) -> Result<Vec<u16>, InstallationError> {
    let expected_bytes = expected_words * 2;
    let existing = fs::read(path);
    if let Ok(bytes) = &existing {
        if bytes.len() == expected_bytes {
            return Ok(bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes(c.try_into().unwrap_or([0; 2])))
                .collect());
        }
    }
    let zeros = vec![0u16; expected_words];
    write_words16(path, &zeros)?;
    Ok(zeros)
}

fn write_words16(path: &Path, words: &[u16]) -> Result<(), InstallationError> {
    let mut buf = Vec::with_capacity(words.len() * 2);
    for word in words {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    fs::write(path, buf).map_err(|source| InstallationError::Persistence { path: path.to_path_buf(), source })
}

fn load_mainframe_image(mf: &mut Mainframe, dir: &Path) -> Result<(), InstallationError> {
    let cm_path = cm_store_path(dir, mf.id);
    let words = load_or_reset_words64(&cm_path, mf.env.cm.size() as usize)?;
    mf.env.cm.load_image(&words);

    for pp in &mut mf.pps {
        let pp_path = pp_store_path(dir, pp.id, mf.id);
        let words = load_or_reset_words16(&pp_path, PP_MEM_WORDS)?;
        pp.mem[..].copy_from_slice(&words);
    }
    Ok(())
}

fn save_mainframe_image(mf: &Mainframe, dir: &Path) -> Result<(), InstallationError> {
    write_words64(&cm_store_path(dir, mf.id), &mf.env.cm.snapshot())?;
    for pp in &mf.pps {
        write_words16(&pp_store_path(dir, pp.id, mf.id), &pp.mem[..])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_config::ModelName;

    fn cfg() -> Config {
        Config {
            model: ModelName::Model6400,
            cpus: 1,
            mainframes: 1,
            pp_count: 10,
            cm_words: 4096,
            ecs_words: 0,
            clock_increment_per_tick: 1,
            cpu_frequency_mhz: 10,
            deadstart_sequence: vec![0o7433, 0o7432, 0o7431, 0o7430, 0],
            equipment: Vec::new(),
            persist_dir: None,
        }
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut bad = cfg();
        bad.cpus = 5;
        assert!(Installation::new(&bad).is_err());
    }

    #[test]
    fn deadstart_targets_existing_mainframe_only() {
        let mut inst = Installation::new(&cfg()).expect("valid config");
        assert!(inst.deadstart(0));
        assert!(!inst.deadstart(1));
    }

    #[test]
    fn tape_verbs_no_op_on_unknown_device() {
        let inst = Installation::new(&cfg()).expect("valid config");
        assert!(!inst.load_tape("mt0", vec![1, 2, 3]));
        assert_eq!(inst.tape_status("mt0"), None);
    }

    #[test]
    fn configured_tape_loads_and_reports_status() {
        let mut config = cfg();
        config.equipment.push(cdc_config::Equipment {
            channel: 1,
            eq_no: 0,
            unit: 0,
            dev_type: "tape".to_string(),
            device_name: "mt0".to_string(),
        });
        let inst = Installation::new(&config).expect("valid config");
        assert!(inst.load_tape("mt0", vec![1, 2, 3, 4]));
        assert_eq!(inst.tape_status("mt0"), Some(TapeStatus::Loaded { bytes: 4, position: 0 }));
        assert!(inst.unload_tape("mt0"));
        assert_eq!(inst.tape_status("mt0"), Some(TapeStatus::Unloaded));
    }

    #[test]
    fn persistence_round_trips_cm_through_a_tempdir() {
        let dir = std::env::temp_dir().join(format!("cdc-installation-test-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");

        let mut config = cfg();
        config.persist_dir = Some(dir.to_string_lossy().into_owned());

        {
            let inst = Installation::new(&config).expect("valid config");
            inst.mainframes[0].env.cm.write(0, 0o1234_5670);
            save_mainframe_image(&inst.mainframes[0], &dir).expect("save");
        }

        let reloaded = Installation::new(&config).expect("valid config");
        assert_eq!(reloaded.mainframes[0].env.cm.read(0), 0o1234_5670);

        let _ = fs::remove_dir_all(&dir);
    }
}
