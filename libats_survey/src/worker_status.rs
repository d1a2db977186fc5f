/// Progress message a worker sends over its channel while decoding,
/// materializing or concatenating.
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub worker_id: usize,
    pub label: String,
}

impl WorkerStatus {
    pub fn new(progress: f32, worker_id: usize, label: impl Into<String>) -> Self {
        Self {
            progress,
            worker_id,
            label: label.into(),
        }
    }
}
