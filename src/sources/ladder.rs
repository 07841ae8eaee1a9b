use async_trait::async_trait;
use serde::Deserialize;
use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{build_query, ResolvedTrack, TrackResolver};
use crate::error::ResolutionError;

const MOBILE_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 11; SM-A515F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Mobile Safari/537.36";
const IOS_USER_AGENT: &str = "Mozilla/5.0 (iPad; CPU OS 14_0 like Mac OS X)";

/// Un peldaño de la escalera: identidad de cliente, formato y credenciales.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveAttempt {
    pub label: &'static str,
    pub player_client: Option<&'static str>,
    pub user_agent: Option<&'static str>,
    pub format: &'static str,
    pub use_cookies: bool,
}

impl ResolveAttempt {
    /// Escalera por defecto: web con cookies, web sin cookies, android, ios.
    pub fn default_ladder() -> Vec<ResolveAttempt> {
        vec![
            ResolveAttempt {
                label: "web+cookies",
                player_client: None,
                user_agent: None,
                format: "bestaudio[ext=m4a]/bestaudio/best",
                use_cookies: true,
            },
            ResolveAttempt {
                label: "web",
                player_client: None,
                user_agent: None,
                format: "bestaudio/best",
                use_cookies: false,
            },
            ResolveAttempt {
                label: "android",
                player_client: Some("android_embedded"),
                user_agent: Some(MOBILE_USER_AGENT),
                format: "bestaudio[ext=webm]/bestaudio/best",
                use_cookies: false,
            },
            ResolveAttempt {
                label: "ios",
                player_client: Some("ios"),
                user_agent: Some(IOS_USER_AGENT),
                format: "bestaudio/best",
                use_cookies: false,
            },
        ]
    }
}

/// Todo lo que necesita un extractor para ejecutar un intento.
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    pub query: String,
    pub attempt: ResolveAttempt,
    /// Copia temporal de las cookies, válida sólo durante el intento.
    pub cookies: Option<PathBuf>,
}

/// Ejecuta un intento y devuelve la salida JSON cruda.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, plan: &AttemptPlan) -> Result<String, ResolutionError>;
}

/// Copia privada del archivo de cookies; se borra al salir de scope.
struct StagedCredentials {
    file: NamedTempFile,
}

impl StagedCredentials {
    fn stage(source: &Path) -> io::Result<Self> {
        let mut file = NamedTempFile::new()?;
        let mut original = File::open(source)?;
        io::copy(&mut original, file.as_file_mut())?;
        Ok(Self { file })
    }

    fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Resolvedor que recorre la escalera de intentos de forma secuencial.
pub struct LadderResolver {
    extractor: Arc<dyn Extractor>,
    attempts: Vec<ResolveAttempt>,
    cookies: Option<PathBuf>,
    attempt_timeout: Duration,
}

impl LadderResolver {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        cookies: Option<PathBuf>,
        attempt_timeout: Duration,
    ) -> Self {
        // Sin cookies configuradas, los peldaños que las piden no aportan nada
        let attempts = ResolveAttempt::default_ladder()
            .into_iter()
            .filter(|a| !a.use_cookies || cookies.is_some())
            .collect();

        Self {
            extractor,
            attempts,
            cookies,
            attempt_timeout,
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<ResolveAttempt>) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn attempts(&self) -> &[ResolveAttempt] {
        &self.attempts
    }

    async fn run_attempt(
        &self,
        query: &str,
        attempt: &ResolveAttempt,
    ) -> Result<ResolvedTrack, ResolutionError> {
        let staged = match (attempt.use_cookies, &self.cookies) {
            (true, Some(path)) => Some(StagedCredentials::stage(path).map_err(|e| {
                ResolutionError::Process(format!("cookies unavailable at {}: {}", path.display(), e))
            })?),
            (true, None) => {
                return Err(ResolutionError::Process("no cookies configured".into()));
            }
            _ => None,
        };

        let plan = AttemptPlan {
            query: query.to_string(),
            attempt: attempt.clone(),
            cookies: staged.as_ref().map(|s| s.path().to_path_buf()),
        };

        let output = tokio::time::timeout(self.attempt_timeout, self.extractor.extract(&plan))
            .await
            .map_err(|_| {
                ResolutionError::Process(format!("timed out after {:?}", self.attempt_timeout))
            })??;

        // `staged` vive hasta aquí: la copia se elimina pase lo que pase
        drop(staged);

        parse_track(&output, query)
    }
}

#[async_trait]
impl TrackResolver for LadderResolver {
    async fn resolve(&self, input: &str) -> Result<ResolvedTrack, ResolutionError> {
        let query = build_query(input);
        info!("🔍 Resolviendo: {}", query);

        let mut last_error = None;
        for (index, attempt) in self.attempts.iter().enumerate() {
            debug!("🔄 Intento {} ({})", index + 1, attempt.label);
            match self.run_attempt(&query, attempt).await {
                Ok(track) => {
                    info!("✅ Resuelto con '{}': {}", attempt.label, track.title);
                    return Ok(track);
                }
                Err(e) => {
                    warn!("❌ Intento '{}' falló: {}", attempt.label, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => Err(ResolutionError::Exhausted {
                attempts: self.attempts.len(),
                last: Box::new(last),
            }),
            None => Err(ResolutionError::NoStrategies),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtractedInfo {
    url: Option<String>,
    title: Option<String>,
    fulltitle: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
    duration: Option<f64>,
    is_live: Option<bool>,
}

/// Interpreta el JSON del extractor.
pub fn parse_track(raw: &str, query: &str) -> Result<ResolvedTrack, ResolutionError> {
    let info: ExtractedInfo = serde_json::from_str(raw.trim())
        .map_err(|e| ResolutionError::Malformed(e.to_string()))?;

    let stream_url = info
        .url
        .filter(|u| !u.is_empty())
        .ok_or(ResolutionError::MissingStreamUrl)?;

    Ok(ResolvedTrack {
        title: info
            .title
            .or(info.fulltitle)
            .unwrap_or_else(|| "unknown".to_string()),
        webpage_url: info
            .webpage_url
            .or(info.original_url)
            .unwrap_or_else(|| query.to_string()),
        stream_url,
        duration: info
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64),
        is_live: info.is_live,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const GOOD_JSON: &str = r#"{"url":"https://cdn.example.com/a.webm","title":"A","webpage_url":"https://example.com/a.mp3","duration":212.5}"#;

    fn resolver(extractor: MockExtractor, cookies: Option<PathBuf>) -> LadderResolver {
        LadderResolver::new(Arc::new(extractor), cookies, Duration::from_secs(5))
    }

    #[test]
    fn test_parse_full_document() {
        let track = parse_track(GOOD_JSON, "q").unwrap();
        assert_eq!(
            track,
            ResolvedTrack {
                title: "A".into(),
                webpage_url: "https://example.com/a.mp3".into(),
                stream_url: "https://cdn.example.com/a.webm".into(),
                duration: Some(Duration::from_secs_f64(212.5)),
                is_live: None,
            }
        );
    }

    #[test]
    fn test_parse_fallbacks() {
        let raw = r#"{"url":"s","fulltitle":"Full","original_url":"o","is_live":true}"#;
        let track = parse_track(raw, "q").unwrap();
        assert_eq!(track.title, "Full");
        assert_eq!(track.webpage_url, "o");
        assert!(track.is_live());

        let track = parse_track(r#"{"url":"s"}"#, "ytsearch1:x").unwrap();
        assert_eq!(track.title, "unknown");
        assert_eq!(track.webpage_url, "ytsearch1:x");
    }

    #[test]
    fn test_parse_errors_are_distinct() {
        assert!(matches!(
            parse_track("not json", "q"),
            Err(ResolutionError::Malformed(_))
        ));
        assert!(matches!(
            parse_track(r#"{"title":"no url"}"#, "q"),
            Err(ResolutionError::MissingStreamUrl)
        ));
    }

    #[test]
    fn test_cookie_rungs_skipped_without_cookies() {
        let r = resolver(MockExtractor::new(), None);
        assert!(r.attempts().iter().all(|a| !a.use_cookies));
        assert_eq!(r.attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract()
            .times(1)
            .returning(|_| Ok(GOOD_JSON.to_string()));

        let track = resolver(extractor, None).resolve("https://example.com/a.mp3").await.unwrap();
        assert_eq!(track.title, "A");
    }

    #[tokio::test]
    async fn test_falls_through_ladder_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_mock = seen.clone();
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().times(3).returning(move |plan| {
            seen_in_mock.lock().push(plan.attempt.label);
            match plan.attempt.label {
                "web" => Err(ResolutionError::Process("exit 1".into())),
                "android" => Ok("{broken".into()),
                _ => Ok(GOOD_JSON.into()),
            }
        });

        let track = resolver(extractor, None).resolve("some song").await.unwrap();
        assert_eq!(track.stream_url, "https://cdn.example.com/a.webm");
        assert_eq!(*seen.lock(), vec!["web", "android", "ios"]);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract()
            .times(3)
            .returning(|_| Ok(r#"{"title":"x"}"#.into()));

        let err = resolver(extractor, None).resolve("x").await.unwrap_err();
        match err {
            ResolutionError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ResolutionError::MissingStreamUrl));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_search_input_is_wrapped_before_extraction() {
        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract()
            .withf(|plan| plan.query == "ytsearch1:lofi beats")
            .times(1)
            .returning(|_| Ok(GOOD_JSON.into()));

        resolver(extractor, None).resolve("lofi beats").await.unwrap();
    }

    #[tokio::test]
    async fn test_staged_cookies_removed_after_each_attempt() {
        let mut cookies = NamedTempFile::new().unwrap();
        writeln!(cookies, "# Netscape HTTP Cookie File").unwrap();

        let staged_paths = Arc::new(Mutex::new(Vec::new()));
        let staged_in_mock = staged_paths.clone();
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().returning(move |plan| {
            if let Some(path) = &plan.cookies {
                assert!(path.exists());
                staged_in_mock.lock().push(path.clone());
                return Err(ResolutionError::Process("sign in required".into()));
            }
            Ok(GOOD_JSON.into())
        });

        let r = resolver(extractor, Some(cookies.path().to_path_buf()));
        assert_eq!(r.attempts().len(), 4);
        r.resolve("x").await.unwrap();

        let staged = staged_paths.lock();
        assert_eq!(staged.len(), 1);
        assert_ne!(staged[0], cookies.path());
        assert!(!staged[0].exists());
        assert!(cookies.path().exists());
    }

    /// Cuelga en el primer intento y responde bien en los siguientes
    struct HangsOnce {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Extractor for HangsOnce {
        async fn extract(&self, _plan: &AttemptPlan) -> Result<String, ResolutionError> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Ok(GOOD_JSON.into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_attempt_falls_through() {
        let extractor = Arc::new(HangsOnce {
            calls: Default::default(),
        });
        let r = LadderResolver::new(extractor.clone(), None, Duration::from_secs(45));

        let started = tokio::time::Instant::now();
        let track = r.resolve("x").await.unwrap();

        assert_eq!(track.title, "A");
        assert_eq!(started.elapsed(), Duration::from_secs(45));
        assert_eq!(extractor.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_ladder() {
        let r = resolver(MockExtractor::new(), None).with_attempts(Vec::new());
        assert!(matches!(
            r.resolve("x").await,
            Err(ResolutionError::NoStrategies)
        ));
    }
}
