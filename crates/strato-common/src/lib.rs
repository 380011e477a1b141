pub mod catalog;
pub mod gpu;
pub mod task;

pub use catalog::{BackendCatalog, BackendSpec, ModelCatalog};
pub use gpu::GpuInfo;
pub use task::{InferenceTask, TaskStatus};
