//! bandscale-pipeline: distributed upscale-and-filter pipeline (sans-IO).
//!
//! A leader holds a decoded 3-channel image. The pipeline broadcasts it
//! to a fixed pool of workers, each of which takes one horizontal band:
//!
//! plan tile -> upsample (pixel replication) -> smooth all channels ->
//! sharpen the value channel -> quantize -> gather at the leader.
//!
//! The reassembled output is `scale` times larger on both axes than the
//! source. Workers only interact through three blocking collectives
//! (broadcast, variable-count gather, barrier) on an explicit
//! [`Communicator`].
//!
//! This crate has **no I/O dependencies**: it takes and returns
//! [`ImageBuffer`]s. Decoding, color conversion, encoding and timing
//! reports live in `bandscale-io`.

pub mod comm;
pub mod diagnostics;
pub mod distribute;
pub mod driver;
pub mod filter;
pub mod gather;
pub mod layout;
pub mod tiling;
pub mod types;
pub mod upsample;

pub use comm::{CommError, Communicator, GatherTarget, LocalComm, LocalWorld};
pub use diagnostics::{PipelineDiagnostics, TimingRecord, WorkerDiagnostics};
pub use driver::{PipelineOutput, process_serial, process_tile, run_local, run_worker};
pub use layout::OutputLayout;
pub use types::{
    BoundaryPolicy, CHANNELS, ImageBuffer, LEADER_RANK, MAX_SAMPLE, PipelineConfig, PipelineError,
    Shape, TileDescriptor,
};
