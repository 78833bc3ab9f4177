//! Worker thread spawning with explicit core, priority and stack size.
//!
//! Wraps `esp_pthread_set_cfg()` so that `std::thread::spawn` creates a
//! FreeRTOS task with the requested affinity, priority and stack. On
//! non-ESP targets, falls back to a plain named thread.
//!
//! # ESP-IDF Threading Model
//!
//! ESP-IDF implements `std::thread` via pthreads, which are thin wrappers
//! around FreeRTOS tasks. `esp_pthread_set_cfg()` sets thread-local
//! configuration that applies to the *next* `pthread_create()` call from
//! the calling thread. This means the config→spawn pair must not be
//! interleaved with other thread creation on the same thread.
//!
//! | Worker      | Core  | Prio | Stack |
//! |-------------|-------|------|-------|
//! | `button`    | 0     | 5    | 3 KB  |
//! | `cmd`       | any   | 2    | 8 KB  |
//! | `unlock`    | any   | 1    | 4 KB  |
//! | `match`     | any   | 1    | 4 KB  |

use core::fmt;

/// Core affinity for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Core {
    /// Core 0, shared with the radio stack.
    Zero,
    /// Let the scheduler pick.
    Any,
}

impl Core {
    #[cfg(target_os = "espidf")]
    fn affinity(self) -> i32 {
        match self {
            Self::Zero => 0,
            Self::Any => esp_idf_svc::sys::tskNO_AFFINITY as i32,
        }
    }
}

/// Failure to configure or create a worker thread.
#[derive(Debug)]
pub enum TaskError {
    /// `esp_pthread_set_cfg` rejected the configuration.
    Config(i32),
    /// The OS could not create the thread.
    Spawn(std::io::Error),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(rc) => write!(f, "pthread config rejected (rc={})", rc),
            Self::Spawn(e) => write!(f, "thread creation failed: {}", e),
        }
    }
}

impl std::error::Error for TaskError {}

/// Spawn a worker thread with explicit affinity, priority and stack.
///
/// The `name` parameter must be a null-terminated string (e.g. `"cmd\0"`).
#[cfg(target_os = "espidf")]
pub fn spawn_on_core(
    core: Core,
    priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> Result<std::thread::JoinHandle<()>, TaskError> {
    // SAFETY: the config is consumed by the very next pthread_create on
    // this thread, which is the spawn below; `name` is 'static and NUL-terminated.
    unsafe {
        let mut cfg = esp_idf_svc::sys::esp_pthread_get_default_config();
        cfg.pin_to_core = core.affinity();
        cfg.prio = usize::from(priority);
        cfg.stack_size = stack_kb * 1024;
        cfg.thread_name = name.as_ptr().cast();
        let ret = esp_idf_svc::sys::esp_pthread_set_cfg(&cfg);
        if ret != esp_idf_svc::sys::ESP_OK as i32 {
            return Err(TaskError::Config(ret));
        }
    }

    let display_name = name.trim_end_matches('\0');
    log::info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        display_name,
        core,
        priority,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .spawn(f)
        .map_err(TaskError::Spawn)
}

/// Simulation fallback: ignores core affinity and priority.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_on_core(
    _core: Core,
    _priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> Result<std::thread::JoinHandle<()>, TaskError> {
    let display_name = name.trim_end_matches('\0');
    log::info!(
        "Spawning '{}' (sim, no core pinning, stack={}KB)",
        display_name,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(stack_kb.max(64) * 1024)
        .spawn(f)
        .map_err(TaskError::Spawn)
}
