mod persist;
mod state;

pub use persist::{
    init_store, load_store, mutate_store, save_store, store_file_path, StoreError,
};
pub use state::{
    BackpressurePolicy, DecisionCard, DecisionOption, DecisionStatus, QueueState, Receipt,
    ReplayFrame, RunEnvelope, RunSource, RunStatus, Schedule, SeatRuntime, SeatStatus, StoreFile,
    WorkspaceState, STORE_VERSION,
};
