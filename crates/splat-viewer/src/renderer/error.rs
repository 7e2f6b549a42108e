use thiserror::Error;

/// Construction-time failures. A frame itself never fails on the CPU side.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("buffer '{label}' has zero size")]
    ZeroSizedBuffer { label: String },

    #[error("initial data for buffer '{label}' is {data} bytes but the buffer holds {size}")]
    InitialDataTooLarge { label: String, data: u64, size: u64 },

    #[error("buffer '{label}' needs {size} bytes, device maximum is {limit}")]
    BufferTooLarge { label: String, size: u64, limit: u64 },

    #[error("storage buffer '{label}' needs {size} bytes, binding maximum is {limit}")]
    StorageBindingTooLarge { label: String, size: u64, limit: u64 },

    #[error("{sh} SH coefficient sets for {primitives} primitives")]
    ShCountMismatch { primitives: usize, sh: usize },

    #[error("{count} primitives exceed the sorter capacity of {max}")]
    TooManyPrimitives { count: usize, max: usize },

    #[error("GPU validation failed while creating {stage}: {message}")]
    Validation { stage: &'static str, message: String },

    #[error("GPU out of memory while creating {stage}")]
    OutOfMemory { stage: &'static str },
}

/// Runs `build` inside validation and out-of-memory error scopes so that
/// wgpu failures come back as errors instead of reaching the uncaptured
/// error handler.
pub async fn error_scope<T>(
    device: &wgpu::Device,
    stage: &'static str,
    build: impl FnOnce() -> Result<T, RendererError>,
) -> Result<T, RendererError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let built = build();

    let validation = device.pop_error_scope().await;
    let oom = device.pop_error_scope().await;

    if let Some(err) = validation {
        return Err(RendererError::Validation {
            stage,
            message: err.to_string(),
        });
    }
    if oom.is_some() {
        return Err(RendererError::OutOfMemory { stage });
    }
    built
}
