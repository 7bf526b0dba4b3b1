//! Representations of errors returned by this crate.

use thiserror::Error;

/// Any error a session, scanner, or recorder operation may surface.
///
/// Protocol and state errors are returned to the caller of the operation
/// that triggered them. Transport errors raised while tearing a link down
/// are logged and suppressed instead, so that a session always reaches a
/// clean disconnected state.
#[derive(Debug, Error)]
pub enum Error {
    /// The advertised name does not match `"<model> (<id>)"` for a
    /// recognized model.
    #[error("not a valid NeuroPlay device name: {0:?}")]
    NotValidDevice(String),

    /// `connect` was called on a session that is already connected.
    #[error("device is already connected")]
    AlreadyConnected,

    /// The operation requires a live link but the session is not
    /// connected. Also reported when channel validation times out.
    #[error("device is not connected")]
    NotConnected,

    /// The device's GATT table does not expose the EEG service.
    #[error("EEG service not found on device")]
    MissingService,

    /// The EEG service lacks the data or control characteristic.
    #[error("EEG data or control characteristic not found on device")]
    MissingCharacteristic,

    /// `start_recording` was called while a recording is in progress.
    #[error("recording is already started")]
    RecordingAlreadyStarted,

    /// A recorder operation that requires an active recording was called
    /// while idle.
    #[error("recording is not started")]
    RecordingNotStarted,

    /// The staged annotations CSV is missing the `time`/`text` columns
    /// or holds values that cannot be coerced.
    #[error("malformed annotations: {0}")]
    MalformedAnnotations(String),

    /// The scanner was constructed with an empty model filter set.
    #[error("the scanner model filter must not be empty")]
    EmptyFilter,

    /// An error propagated from the BLE stack.
    #[error("transport error: {0}")]
    Transport(#[from] btleplug::Error),

    /// An I/O error from the staging files or the EDF output.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A CSV serialization error from the staging writers.
    #[error(transparent)]
    Csv(#[from] csv::Error),
}
