//! Error taxonomy for the playback core.
//!
//! Errors raised while serving a caller (`enqueue`) are returned as [`PlayerError`].
//! Errors raised during ongoing playback never leave the session task: they are
//! logged and turned into state transitions.

use std::time::Duration;
use thiserror::Error;

/// Fallo al convertir una entrada del usuario en un track reproducible.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// El proceso extractor no arrancó, terminó con código distinto de cero o expiró.
    #[error("extractor failed: {0}")]
    Process(String),

    /// La salida no era JSON válido.
    #[error("extractor returned malformed JSON: {0}")]
    Malformed(String),

    /// El JSON no trae la URL de stream.
    #[error("extractor output has no stream url")]
    MissingStreamUrl,

    /// Se agotó la escalera de intentos; envuelve el último error.
    #[error("all {attempts} resolution attempts failed, last error: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<ResolutionError>,
    },

    /// No hay intentos configurados.
    #[error("no resolution strategies configured")]
    NoStrategies,
}

/// Fallo del transporte de voz.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("voice connection not ready within {0:?}")]
    ReadyTimeout(Duration),

    #[error("voice join failed: {0}")]
    Join(String),

    #[error("voice reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("voice manager unavailable")]
    Unavailable,
}

/// Fallo de la cadena decode → encode.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decoder i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("opus encoder error: {0}")]
    Encoder(String),

    #[error("decoder exited with status {0}")]
    DecoderExit(String),

    #[error("transport rejected the stream: {0}")]
    Transport(String),
}

/// Errores visibles para quien llama a la API del reproductor.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("queue is full (max {0} tracks)")]
    QueueFull(usize),

    /// La resolución terminó después de un `stop` para la misma guild.
    #[error("playback was stopped while the track was being resolved")]
    Superseded,

    /// La sesión terminó antes de poder atender el comando.
    #[error("no active session for this guild")]
    NoSession,
}

pub type PlayerResult<T> = Result<T, PlayerError>;
