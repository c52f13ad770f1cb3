pub mod job;
pub mod queue;
pub mod server;

pub use job::{JobHandle, JobInfo, JobRecord, TaskStats};
pub use queue::PriorityQueue;
pub use server::{NextJob, NodeCapacity, PolicyHandle, PolicyServer, PriorityRevision};
