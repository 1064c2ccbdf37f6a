//! Fetcher integration tests against a scripted stand-in for yt-dlp.
//!
//! The retrieval tool is configured as `sh -c <script> tool`, so the
//! fetcher's arguments arrive as `$1..$n` exactly as yt-dlp would see them.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use ladle_core::fetcher::{AuthenticatedFetcher, FetchError, FetcherConfig, SourceFetcher, YtDlpFetcher};
use ladle_core::ErrorCode;

const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
const REEL: &str = "https://www.instagram.com/reel/C0ffee/";

/// Answers thumbnail and metadata lookups; runs `download` for anything else
/// with `$out` set to the `-o` template, `$target` to it with `mp4` as ext
/// and `$all` to the full argument list.
fn fake_tool(download: &str) -> String {
    format!(
        r#"
case "$1" in
  --get-thumbnail) echo "https://cdn.example.com/thumb.jpg"; exit 0 ;;
  --dump-json) echo '{{"title":"Weeknight Pasta","description":"200g spaghetti, 2 eggs","uploader":"chef","duration":61.5}}'; exit 0 ;;
esac
all=" $* "
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
target=$(printf '%s' "$out" | sed 's/%(ext)s/mp4/')
{download}
"#
    )
}

fn config(dir: &Path, script: String) -> FetcherConfig {
    FetcherConfig {
        tool: vec!["sh".to_string(), "-c".to_string(), script, "tool".to_string()],
        temp_dir: dir.join("media"),
        timeout_secs: 10,
        metadata_timeout_secs: 5,
        ..Default::default()
    }
}

fn leftovers(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir.join("media")) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn test_fetch_produces_media_and_thumbnail() {
    let dir = TempDir::new().unwrap();
    let fetcher = YtDlpFetcher::new(config(
        dir.path(),
        fake_tool(r#"printf 'video' > "$target"; printf 'jpg' > "${target%.mp4}.webp""#),
    ));

    let media = fetcher
        .fetch(URL, "job-1", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(media.mime_type, "video/mp4");
    assert_eq!(
        media.thumbnail_url.as_deref(),
        Some("https://cdn.example.com/thumb.jpg")
    );
    let name = media.media_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("ladle-job-1-"));
    assert_eq!(std::fs::read(&media.media_path).unwrap(), b"video");

    // The co-downloaded thumbnail image is cleaned up; only the media stays.
    assert_eq!(leftovers(dir.path()), vec![media.media_path.clone()]);
}

#[tokio::test]
async fn test_probe_parses_metadata() {
    let dir = TempDir::new().unwrap();
    let fetcher = YtDlpFetcher::new(config(dir.path(), fake_tool("exit 0")));

    let metadata = fetcher.probe(URL, &CancellationToken::new()).await.unwrap();
    assert_eq!(metadata.title.as_deref(), Some("Weeknight Pasta"));
    assert_eq!(
        metadata.description.as_deref(),
        Some("200g spaghetti, 2 eggs")
    );
    assert_eq!(metadata.duration_secs, Some(61.5));
}

#[tokio::test]
async fn test_failure_removes_partial_files_and_keeps_diagnostic() {
    let dir = TempDir::new().unwrap();
    let fetcher = YtDlpFetcher::new(config(
        dir.path(),
        fake_tool(
            r#"printf 'half' > "$target.part"; echo "ERROR: [youtube] dQw4w9WgXcQ: Video unavailable" >&2; exit 1"#,
        ),
    ));

    let err = fetcher
        .fetch(URL, "job-2", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::FetchFailed);
    match err {
        FetchError::ToolFailed { exit_code, diagnostic } => {
            assert_eq!(exit_code, Some(1));
            assert!(diagnostic.contains("Video unavailable"));
        }
        other => panic!("expected ToolFailed, got {:?}", other),
    }
    assert!(leftovers(dir.path()).is_empty());
}

#[tokio::test]
async fn test_success_without_output_is_an_error() {
    let dir = TempDir::new().unwrap();
    let fetcher = YtDlpFetcher::new(config(dir.path(), fake_tool("exit 0")));

    let err = fetcher
        .fetch(URL, "job-3", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::OutputMissing { .. }));
}

#[tokio::test]
async fn test_timeout_kills_download() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), fake_tool("exec sleep 30"));
    config.timeout_secs = 1;
    let fetcher = YtDlpFetcher::new(config);

    let start = Instant::now();
    let err = fetcher
        .fetch(URL, "job-4", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Timeout { timeout_secs: 1 }));
    assert_eq!(err.error_code(), ErrorCode::FetchTimeout);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_cancel_kills_running_subprocess() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("tool.pid");
    let fetcher = YtDlpFetcher::new(config(
        dir.path(),
        fake_tool(&format!(
            r#"printf 'half' > "$target.part"; echo $$ > '{}'; exec sleep 30"#,
            pid_file.display()
        )),
    ));

    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    let watched = pid_file.clone();
    let canceller = tokio::spawn(async move {
        for _ in 0..500 {
            if std::fs::read_to_string(&watched).is_ok_and(|s| !s.trim().is_empty()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        trip.cancel();
    });

    let start = Instant::now();
    let err = fetcher.fetch(URL, "job-5", &cancel).await.unwrap_err();
    canceller.await.unwrap();

    assert!(err.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(10));

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let proc_entry = PathBuf::from(format!("/proc/{}", pid.trim()));
    assert!(!proc_entry.exists(), "tool process {} still running", pid.trim());
    assert!(leftovers(dir.path()).is_empty());
}

/// True once `pid` has exited. A zombie waiting for init counts as exited.
#[cfg(target_os = "linux")]
async fn process_gone(pid: &str) -> bool {
    for _ in 0..200 {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => return true,
            Ok(stat) => {
                let state = stat.rsplit(')').next().unwrap_or("").trim_start();
                if state.starts_with('Z') {
                    return true;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_cancel_kills_processes_started_by_the_tool() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("merge.pid");
    // Stands in for the ffmpeg merge yt-dlp runs for split video and audio.
    let fetcher = YtDlpFetcher::new(config(
        dir.path(),
        fake_tool(&format!(
            r#"printf 'half' > "$target.part"; sleep 30 & echo $! > '{0}.tmp'; mv '{0}.tmp' '{0}'; wait"#,
            pid_file.display()
        )),
    ));

    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    let watched = pid_file.clone();
    let canceller = tokio::spawn(async move {
        for _ in 0..500 {
            if watched.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        trip.cancel();
    });

    let err = fetcher.fetch(URL, "job-10", &cancel).await.unwrap_err();
    canceller.await.unwrap();
    assert!(err.is_cancelled());

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    assert!(process_gone(pid.trim()).await, "merge process {} survived cancel", pid.trim());
    assert!(leftovers(dir.path()).is_empty());
}

#[tokio::test]
async fn test_invalid_url_never_spawns() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("spawned");
    let fetcher = YtDlpFetcher::new(config(
        dir.path(),
        format!("touch '{}'", marker.display()),
    ));

    let err = fetcher
        .fetch(
            "https://www.youtube.com/watch?v=x&list=$(reboot)",
            "job-6",
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InvalidUrl);
    assert!(!marker.exists());
}

fn authenticated(dir: &Path, script: String) -> AuthenticatedFetcher {
    let cookies = dir.join("cookies.txt");
    std::fs::write(
        &cookies,
        "# Netscape HTTP Cookie File\n.instagram.com\tTRUE\t/\tTRUE\t1999999999\tsessionid\tabc\n",
    )
    .unwrap();
    let mut config = config(dir, script);
    config.instagram.cookies_path = Some(cookies);
    AuthenticatedFetcher::new(config)
}

#[tokio::test]
async fn test_authenticated_fetch_passes_cookies() {
    let dir = TempDir::new().unwrap();
    let fetcher = authenticated(
        dir.path(),
        fake_tool(
            r#"case "$all" in
  *" --cookies "*) printf 'reel' > "$target" ;;
  *) echo "ERROR: no cookies" >&2; exit 1 ;;
esac"#,
        ),
    );
    assert!(fetcher.is_configured().await);

    let media = fetcher
        .fetch(REEL, "job-7", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&media.media_path).unwrap(), b"reel");
}

#[tokio::test]
async fn test_authenticated_fetch_classifies_expired_session() {
    let dir = TempDir::new().unwrap();
    let fetcher = authenticated(
        dir.path(),
        fake_tool(
            r#"echo "ERROR: [Instagram] C0ffee: Requested content is not available, login required" >&2; exit 1"#,
        ),
    );

    let err = fetcher
        .fetch(REEL, "job-8", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::CredentialsExpired);
}

#[tokio::test]
async fn test_authenticated_fetch_classifies_missing_content() {
    let dir = TempDir::new().unwrap();
    let fetcher = authenticated(
        dir.path(),
        fake_tool(r#"echo "ERROR: [Instagram] C0ffee: HTTP Error 404: Not Found" >&2; exit 1"#),
    );

    let err = fetcher
        .fetch(REEL, "job-9", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::ContentUnavailable);
}
