use async_trait::async_trait;
use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use std::{path::PathBuf, process::Stdio};
use tokio::{io::AsyncReadExt, process::ChildStdout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// 20ms @ 48kHz por canal
pub const FRAME_SAMPLES: usize = 960;
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * 2;
const MAX_PACKET: usize = 4000;
/// ~1s de audio en buffer
const FRAME_BUFFER: usize = 50;

/// Frames Opus listos para el transporte, en orden.
///
/// Soltar el stream cancela el pipeline que lo alimenta.
pub struct FrameStream {
    frames: flume::Receiver<Result<Bytes, PipelineError>>,
    cancel: CancellationToken,
    bitrate: i32,
}

impl FrameStream {
    pub fn new(
        frames: flume::Receiver<Result<Bytes, PipelineError>>,
        cancel: CancellationToken,
        bitrate: i32,
    ) -> Self {
        Self {
            frames,
            cancel,
            bitrate,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn bitrate(&self) -> i32 {
        self.bitrate
    }

    /// `None` al terminar el stream.
    pub async fn next_frame(&self) -> Option<Result<Bytes, PipelineError>> {
        self.frames.recv_async().await.ok()
    }

    /// Variante bloqueante para lectores síncronos (hilo del mixer).
    pub fn next_frame_blocking(&self) -> Option<Result<Bytes, PipelineError>> {
        self.frames.recv().ok()
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Construye la cadena decode → encode para una URL de stream.
#[async_trait]
pub trait PipelineBuilder: Send + Sync + 'static {
    async fn build(&self, stream_url: &str) -> Result<FrameStream, PipelineError>;
}

/// ffmpeg (decode a PCM s16le) + audiopus (encode a Opus).
pub struct FfmpegOpusPipeline {
    ffmpeg: PathBuf,
    bitrate: i32,
}

impl FfmpegOpusPipeline {
    pub fn new(ffmpeg: impl Into<PathBuf>, bitrate: i32) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            bitrate,
        }
    }

    /// Argumentos del decoder con reconexión ante fallos transitorios de red
    pub fn decoder_args(stream_url: &str) -> Vec<String> {
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_on_network_error",
            "1",
            "-reconnect_delay_max",
            "5",
            "-i",
            stream_url,
            "-vn",
            "-f",
            "s16le",
            "-ar",
            "48000",
            "-ac",
            "2",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn encoder(&self) -> Result<Encoder, PipelineError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(|e| PipelineError::Encoder(e.to_string()))?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(self.bitrate))
            .map_err(|e| PipelineError::Encoder(e.to_string()))?;
        Ok(encoder)
    }

    /// Verifica que ffmpeg esté disponible
    pub async fn verify(&self) -> anyhow::Result<()> {
        let output = tokio::process::Command::new(&self.ffmpeg)
            .arg("-version")
            .output()
            .await?;

        if !output.status.success() {
            anyhow::bail!("ffmpeg no disponible");
        }
        info!("✅ ffmpeg disponible");
        Ok(())
    }
}

#[async_trait]
impl PipelineBuilder for FfmpegOpusPipeline {
    async fn build(&self, stream_url: &str) -> Result<FrameStream, PipelineError> {
        let encoder = self.encoder()?;

        let mut child = tokio::process::Command::new(&self.ffmpeg)
            .args(Self::decoder_args(stream_url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            PipelineError::Io(std::io::Error::other("ffmpeg stdout not captured"))
        })?;

        let (tx, rx) = flume::bounded(FRAME_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => {
                    debug!("⏹️ Pipeline cancelado");
                    Ok(())
                }
                result = pump_frames(stdout, encoder, &tx) => result,
            };

            if token.is_cancelled() {
                let _ = child.kill().await;
                return;
            }

            let result = match (result, child.wait().await) {
                (Err(e), _) => Err(e),
                (Ok(()), Ok(status)) if !status.success() => {
                    Err(PipelineError::DecoderExit(status.to_string()))
                }
                (Ok(()), _) => Ok(()),
            };

            if let Err(e) = result {
                warn!("❌ Error en pipeline: {}", e);
                let _ = tx.send_async(Err(e)).await;
            }
        });

        debug!("🎛️ Pipeline listo para {}", stream_url);
        Ok(FrameStream::new(rx, cancel, self.bitrate))
    }
}

/// Lee PCM en bloques de 20ms, los codifica y los envía hasta EOF
async fn pump_frames(
    mut stdout: ChildStdout,
    encoder: Encoder,
    tx: &flume::Sender<Result<Bytes, PipelineError>>,
) -> Result<(), PipelineError> {
    let mut pcm = vec![0u8; FRAME_BYTES];
    let mut samples = vec![0i16; FRAME_SAMPLES * CHANNELS];
    let mut packet = vec![0u8; MAX_PACKET];

    loop {
        let filled = fill_frame(&mut stdout, &mut pcm).await?;
        if filled == 0 {
            return Ok(());
        }
        // Último frame incompleto: se completa con silencio
        pcm[filled..].fill(0);

        for (sample, bytes) in samples.iter_mut().zip(pcm.chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }

        let len = encoder
            .encode(&samples, &mut packet)
            .map_err(|e| PipelineError::Encoder(e.to_string()))?;

        if tx
            .send_async(Ok(Bytes::copy_from_slice(&packet[..len])))
            .await
            .is_err()
        {
            // El consumidor se fue
            return Ok(());
        }

        if filled < FRAME_BYTES {
            return Ok(());
        }
    }
}

async fn fill_frame(stdout: &mut ChildStdout, buf: &mut [u8]) -> Result<usize, PipelineError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stdout.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_geometry() {
        // 20ms estéreo de 16 bits
        assert_eq!(FRAME_BYTES, 3840);
        assert_eq!(FRAME_SAMPLES as u32 * 1000 / SAMPLE_RATE, 20);
    }

    #[test]
    fn test_decoder_reconnects_and_outputs_raw_stereo() {
        let args = FfmpegOpusPipeline::decoder_args("https://cdn.example.com/a.webm");
        let joined = args.join(" ");
        assert!(joined.contains("-reconnect 1"));
        assert!(joined.contains("-reconnect_streamed 1"));
        assert!(joined.contains("-i https://cdn.example.com/a.webm"));
        assert!(joined.ends_with("-f s16le -ar 48000 -ac 2 pipe:1"));
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_pipeline() {
        let (_tx, rx) = flume::bounded(1);
        let stream = FrameStream::new(rx, CancellationToken::new(), 96_000);
        let token = stream.cancel_token();
        assert!(!token.is_cancelled());
        drop(stream);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_stream_yields_frames_then_ends() {
        let (tx, rx) = flume::bounded(4);
        let stream = FrameStream::new(rx, CancellationToken::new(), 96_000);
        tx.send(Ok(Bytes::from_static(&[1, 2, 3]))).unwrap();
        tx.send(Err(PipelineError::Encoder("boom".into()))).unwrap();
        drop(tx);

        assert_eq!(stream.next_frame().await.unwrap().unwrap().as_ref(), &[1, 2, 3]);
        assert!(stream.next_frame().await.unwrap().is_err());
        assert!(stream.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_io_error() {
        let pipeline = FfmpegOpusPipeline::new("/nonexistent/ffmpeg-binary", 96_000);
        assert!(matches!(
            pipeline.build("https://cdn.example.com/a.webm").await,
            Err(PipelineError::Io(_))
        ));
    }
}
