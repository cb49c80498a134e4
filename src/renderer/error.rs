use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of an [`Error`], used by callers to decide between
/// aborting, retrying, or fixing their own call sequence.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// The device, driver, or platform failed. Not recoverable.
    DeviceFailure,
    /// The caller broke the usage contract of an API (capacity exceeded,
    /// wrong resource state, call out of frame order, ...).
    ContractViolation,
    /// A fence wait did not complete within the configured timeout.
    SyncTimeout,
    /// A fence wait was abandoned through its cancellation token.
    Cancelled,
    /// The presentation surface no longer matches the swap chain.
    SurfaceOutdated,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("device failure: {context}")]
    DeviceFailure {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("fence did not reach {value} within {timeout:?} (completed {completed})")]
    SyncTimeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },

    #[error("wait for fence value {value} was cancelled")]
    Cancelled { value: u64 },

    #[error("swap chain is out of date with its surface")]
    SurfaceOutdated,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DeviceFailure { .. } => ErrorKind::DeviceFailure,
            Error::ContractViolation(_) => ErrorKind::ContractViolation,
            Error::SyncTimeout { .. } => ErrorKind::SyncTimeout,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::SurfaceOutdated => ErrorKind::SurfaceOutdated,
        }
    }

    /// Only environment failures end the renderer; everything else is
    /// something the caller can react to.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::DeviceFailure
    }

    pub fn device(context: impl Into<String>) -> Self {
        Error::DeviceFailure {
            context: context.into(),
            source: None,
        }
    }

    pub fn device_with<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::DeviceFailure {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Error::ContractViolation(message.into())
    }
}

/// Returns a [`ErrorKind::ContractViolation`] error unless `cond` holds.
macro_rules! ensure_contract {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::renderer::error::Error::contract(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure_contract;

impl From<ash::vk::Result> for Error {
    fn from(result: ash::vk::Result) -> Self {
        match result {
            ash::vk::Result::ERROR_OUT_OF_DATE_KHR => Error::SurfaceOutdated,
            other => Error::device_with("Vulkan call failed", other),
        }
    }
}

impl From<gpu_allocator::AllocationError> for Error {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        Error::device_with("GPU memory allocation failed", err)
    }
}

impl From<gpu_descriptor::AllocationError> for Error {
    fn from(err: gpu_descriptor::AllocationError) -> Self {
        Error::device_with("descriptor set allocation failed", err)
    }
}

impl From<raw_window_handle::HandleError> for Error {
    fn from(err: raw_window_handle::HandleError) -> Self {
        Error::device_with("window handle unavailable", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinguishable() {
        assert_eq!(Error::device("x").kind(), ErrorKind::DeviceFailure);
        assert_eq!(Error::contract("x").kind(), ErrorKind::ContractViolation);
        assert_eq!(Error::Cancelled { value: 3 }.kind(), ErrorKind::Cancelled);
        assert_eq!(Error::SurfaceOutdated.kind(), ErrorKind::SurfaceOutdated);
    }

    #[test]
    fn only_device_failures_are_fatal() {
        assert!(Error::device("lost").is_fatal());
        assert!(!Error::contract("heap full").is_fatal());
        let timeout = Error::SyncTimeout {
            value: 2,
            completed: 1,
            timeout: Duration::from_millis(5),
        };
        assert!(!timeout.is_fatal());
    }

    #[test]
    fn out_of_date_maps_to_surface_outdated() {
        let err: Error = ash::vk::Result::ERROR_OUT_OF_DATE_KHR.into();
        assert_eq!(err.kind(), ErrorKind::SurfaceOutdated);
        let err: Error = ash::vk::Result::ERROR_DEVICE_LOST.into();
        assert_eq!(err.kind(), ErrorKind::DeviceFailure);
    }

    fn checked(value: u32) -> Result<u32> {
        ensure_contract!(value < 4, "value {} out of range", value);
        Ok(value)
    }

    #[test]
    fn ensure_contract_reports_message() {
        assert_eq!(checked(2).unwrap(), 2);
        let err = checked(9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        assert!(err.to_string().contains("value 9 out of range"));
    }
}
