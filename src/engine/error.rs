use crate::source::SourceError;
use crate::status::PresenterError;
use crate::store::StoreError;
use crate::timers::ScheduleError;

#[derive(Debug)]
pub enum EngineError {
    Source(SourceError),
    Store(StoreError),
    Schedule(ScheduleError),
    Presenter(PresenterError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Source(e) => write!(f, "fetch failed: {e}"),
            EngineError::Store(e) => write!(f, "registry storage failed: {e}"),
            EngineError::Schedule(e) => write!(f, "timer scheduling failed: {e}"),
            EngineError::Presenter(e) => write!(f, "status update failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Source(e) => Some(e),
            EngineError::Store(e) => Some(e),
            EngineError::Schedule(e) => Some(e),
            EngineError::Presenter(e) => Some(e),
        }
    }
}

impl From<SourceError> for EngineError {
    fn from(e: SourceError) -> Self {
        EngineError::Source(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

impl From<ScheduleError> for EngineError {
    fn from(e: ScheduleError) -> Self {
        EngineError::Schedule(e)
    }
}

impl From<PresenterError> for EngineError {
    fn from(e: PresenterError) -> Self {
        EngineError::Presenter(e)
    }
}
