use thiserror::Error;

/// Errors produced while sharing values and running worklets across runtimes.
#[derive(Error, Debug)]
pub enum WorkletError {
    #[error("Unsupported value type: {0}")]
    UnsupportedValueType(String),

    #[error("Worklet compile error: {0}")]
    WorkletCompile(String),

    #[error("Javascript worklet error: {message}\nIn file: {location}")]
    JavascriptWorklet { message: String, location: String },

    #[error(
        "Tried to synchronously call function {function} from a different thread.\n\n\
         Occurred in worklet location: {location}\n\n\
         Possible solutions are:\n\
         a) If you want to synchronously execute this method, mark it as a worklet\n\
         b) If you want to execute this method on the JS thread, wrap it using runOnJS"
    )]
    CrossThreadSyncCall { function: String, location: String },

    #[error("Conversion depth exceeded: value graph is deeper than {0} levels")]
    ConversionDepthExceeded(usize),

    #[error("Array too large: length {length} exceeds the limit of {limit} elements")]
    ArrayTooLarge { length: u64, limit: usize },

    #[error("JavaScript execution error: {0}")]
    JavaScriptExecution(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Completion dropped before a result was produced")]
    CompletionDropped,

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl WorkletError {
    /// Builds a worklet execution error, falling back to `unknown` when the
    /// worklet carries no recorded location.
    pub fn javascript_worklet(message: impl Into<String>, location: Option<&str>) -> Self {
        WorkletError::JavascriptWorklet {
            message: message.into(),
            location: location.unwrap_or("unknown").to_string(),
        }
    }

    /// Builds the error raised when a main-thread function is invoked
    /// synchronously from the UI runtime.
    pub fn cross_thread_sync_call(function: impl Into<String>, location: Option<&str>) -> Self {
        let function = function.into();
        WorkletError::CrossThreadSyncCall {
            function: if function.is_empty() { "(anonymous)".to_string() } else { function },
            location: location.unwrap_or("unknown").to_string(),
        }
    }

    /// True for errors caused by the shape of a caller-supplied value rather
    /// than by code that ran.
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            WorkletError::UnsupportedValueType(_)
                | WorkletError::InvalidArgument(_)
                | WorkletError::CrossThreadSyncCall { .. }
                | WorkletError::ConversionDepthExceeded(_)
                | WorkletError::ArrayTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WorkletError>;
