pub mod command;
pub mod config;
pub mod exec;
pub mod peaks;
pub mod probe;
pub mod storage;

pub use command::{container_for_extension, CommandPlan, CommandPlanner};
pub use config::{load_wavetap_config, ConfigError, Result, WavetapConfig};
pub use exec::{
    AudioTapRequest, ExecError, ExecResult, ExecutionReport, Executor, NoopObserver,
    ProgressSample, RunObserver, RunRequest,
};
pub use peaks::{
    NormalizeRange, PeakParams, PeakReducer, PeaksCollector, PeaksData, PeaksError, PeaksFormat,
    PeaksGenerator, PeaksResult,
};
pub use probe::{AudioStreamInfo, MediaProber, ProbeError, ProbeMode};
pub use storage::{FsPayloadStore, PayloadSink, PayloadStore, StorageError};
