use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::context::{lock, Context};
use crate::error::{AdmissionDenied, SubmitError, ValidationError};
use crate::models::{Job, Mode, UserId};

#[derive(Deserialize, Debug, Clone)]
pub struct SubmitRequest {
    pub submitter_id: UserId,
    pub source_url: String,
    pub mode: Mode,
    /// 1 = 240p, 2 = 360p, 3 = 480p, 4 = 720p.
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub caption: Option<String>,
    pub delivery_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    QueuedElevated { id: Uuid },
    Queued { id: Uuid, position: usize },
}

impl SubmitOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            SubmitOutcome::QueuedElevated { id } | SubmitOutcome::Queued { id, .. } => *id,
        }
    }
}

fn quality_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"index_\d").expect("quality pattern is valid"))
}

/// Extracts the playlist URL and checks that it comes from the trusted host.
///
/// Accepts the playlist itself or a player link carrying it in its `url`
/// query parameter.
pub fn resolve_locator(
    raw: &str,
    quality: Option<u8>,
    config: &Config,
) -> Result<String, ValidationError> {
    let raw = raw.trim();

    let playlist = if !config.player_prefix.is_empty() && raw.starts_with(&config.player_prefix) {
        let wrapper = Url::parse(raw).map_err(|_| ValidationError::Malformed)?;
        wrapper
            .query_pairs()
            .find(|(key, _)| key == "url")
            .map(|(_, value)| value.into_owned())
            .ok_or(ValidationError::Malformed)?
    } else {
        raw.to_owned()
    };

    let url = Url::parse(&playlist).map_err(|_| ValidationError::Malformed)?;
    let domain = config.trusted_domain.as_str();
    let trusted_host = url
        .host_str()
        .is_some_and(|host| host == domain || host.ends_with(&format!(".{domain}")));

    if url.scheme() != "https" || !trusted_host || !url.path().ends_with(".m3u8") {
        return Err(ValidationError::Untrusted {
            domain: domain.to_owned(),
        });
    }

    match quality {
        None => Ok(playlist),
        Some(index @ 1..=4) => Ok(quality_pattern()
            .replace_all(&playlist, format!("index_{index}").as_str())
            .into_owned()),
        Some(other) => Err(ValidationError::Quality(other)),
    }
}

fn validate_delivery_target(target: &str) -> Result<(), ValidationError> {
    match Url::parse(target) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ValidationError::DeliveryTarget),
    }
}

/// May this user start something new? Elevated users always may.
pub fn check_admission(ctx: &Context, user_id: UserId) -> Result<(), AdmissionDenied> {
    if lock(&ctx.access).is_elevated(user_id) {
        return Ok(());
    }

    let state = ctx.user_state(user_id);
    if state.downloading
        || lock(&ctx.running).contains(user_id)
        || ctx.queue.position_of(user_id).is_some()
    {
        return Err(AdmissionDenied::AlreadyActive);
    }

    if lock(&ctx.access).is_on_cooldown(user_id) {
        return Err(AdmissionDenied::Blocked);
    }

    if state.on_cooldown(Instant::now()) {
        return Err(AdmissionDenied::Cooldown);
    }

    Ok(())
}

pub fn submit(ctx: &Context, request: SubmitRequest) -> Result<SubmitOutcome, SubmitError> {
    let source_url = resolve_locator(&request.source_url, request.quality, &ctx.config)?;
    validate_delivery_target(&request.delivery_url)?;

    // Held until the job is queued so a concurrent submit sees it.
    let _admission = lock(&ctx.admission);
    check_admission(ctx, request.submitter_id)?;
    let elevated = lock(&ctx.access).is_elevated(request.submitter_id);

    let mut caption = request.caption.unwrap_or_default();
    if !ctx.config.caption_footer.is_empty() {
        caption.push_str("\n\n");
        caption.push_str(&ctx.config.caption_footer);
    }

    let job = Job::new(
        request.submitter_id,
        source_url,
        request.mode,
        caption,
        request.delivery_url,
    );
    let id = job.id;

    ctx.progress.register(&job);
    let position = ctx.queue.enqueue(job);

    tracing::info!(job = %id, submitter = request.submitter_id, position, elevated, "job queued");

    if elevated {
        Ok(SubmitOutcome::QueuedElevated { id })
    } else {
        Ok(SubmitOutcome::Queued { id, position })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::job_for;
    use std::time::Duration;

    const PLAYLIST: &str = "https://d1abc.cloudfront.net/videos/index_1.m3u8";

    fn request(user: UserId) -> SubmitRequest {
        SubmitRequest {
            submitter_id: user,
            source_url: PLAYLIST.to_owned(),
            mode: Mode::Live,
            quality: None,
            caption: Some("lecture".to_owned()),
            delivery_url: "https://uploads.example.com/put/1".to_owned(),
        }
    }

    #[test]
    fn direct_playlist_is_accepted() {
        let config = Config::default();
        assert_eq!(resolve_locator(PLAYLIST, None, &config).unwrap(), PLAYLIST);
    }

    #[test]
    fn player_link_is_unwrapped() {
        let config = Config::default();
        let link = format!("{}{}", config.player_prefix, PLAYLIST);
        assert_eq!(resolve_locator(&link, None, &config).unwrap(), PLAYLIST);
    }

    #[test]
    fn quality_rewrites_index() {
        let config = Config::default();
        assert_eq!(
            resolve_locator(PLAYLIST, Some(4), &config).unwrap(),
            "https://d1abc.cloudfront.net/videos/index_4.m3u8"
        );
        assert_eq!(
            resolve_locator(PLAYLIST, Some(5), &config),
            Err(ValidationError::Quality(5))
        );
    }

    #[test]
    fn untrusted_locators_are_rejected() {
        let config = Config::default();
        for bad in [
            "http://d1abc.cloudfront.net/index_1.m3u8",
            "https://evil.example.com/index_1.m3u8",
            "https://cloudfront.net.evil.com/index_1.m3u8",
            "https://d1abc.cloudfront.net/video.mp4",
        ] {
            assert!(
                matches!(
                    resolve_locator(bad, None, &config),
                    Err(ValidationError::Untrusted { .. })
                ),
                "{bad} should be rejected"
            );
        }
        assert_eq!(
            resolve_locator("not a url", None, &config),
            Err(ValidationError::Malformed)
        );
        let empty_wrapper = config.player_prefix.clone();
        assert_eq!(
            resolve_locator(&empty_wrapper, None, &config),
            Err(ValidationError::Malformed)
        );
    }

    #[test]
    fn submit_queues_in_order_with_positions() {
        let ctx = Context::new(Config::default());

        let first = submit(&ctx, request(1)).unwrap();
        let second = submit(&ctx, request(2)).unwrap();

        assert!(matches!(first, SubmitOutcome::Queued { position: 1, .. }));
        assert!(matches!(second, SubmitOutcome::Queued { position: 2, .. }));
        assert_eq!(ctx.queue.try_dequeue_nowait().unwrap().id, first.id());
        assert_eq!(ctx.queue.try_dequeue_nowait().unwrap().id, second.id());
    }

    #[test]
    fn caption_gets_footer() {
        let config = Config {
            caption_footer: "Downloaded via ffqueue".to_owned(),
            ..Config::default()
        };
        let ctx = Context::new(config);

        submit(&ctx, request(1)).unwrap();

        let job = ctx.queue.try_dequeue_nowait().unwrap();
        assert_eq!(job.caption, "lecture\n\nDownloaded via ffqueue");
    }

    #[test]
    fn second_submission_is_denied_while_queued() {
        let ctx = Context::new(Config::default());
        submit(&ctx, request(1)).unwrap();

        let err = submit(&ctx, request(1)).unwrap_err();
        assert!(matches!(err, SubmitError::Denied(AdmissionDenied::AlreadyActive)));
        assert_eq!(ctx.queue.len(), 1);
    }

    #[test]
    fn concurrent_submissions_queue_one_job() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        for _ in 0..200 {
            let ctx = Arc::new(Context::new(Config::default()));
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let (ctx, barrier) = (ctx.clone(), barrier.clone());
                    thread::spawn(move || {
                        barrier.wait();
                        submit(&ctx, request(1)).is_ok()
                    })
                })
                .collect();

            let accepted = handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|ok| *ok)
                .count();

            assert_eq!(accepted, 1);
            assert_eq!(ctx.queue.len(), 1);
        }
    }

    #[test]
    fn running_job_denies_admission() {
        let ctx = Context::new(Config::default());
        ctx.begin(&job_for(1));
        assert_eq!(check_admission(&ctx, 1), Err(AdmissionDenied::AlreadyActive));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_denies_until_it_expires() {
        let ctx = Context::new(Config::default());
        let job = job_for(1);
        ctx.begin(&job);
        ctx.finish(&job);

        assert_eq!(check_admission(&ctx, 1), Err(AdmissionDenied::Cooldown));

        tokio::time::advance(ctx.config.standard_cooldown + Duration::from_secs(1)).await;
        assert_eq!(check_admission(&ctx, 1), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn block_denies_admission() {
        let ctx = Context::new(Config::default());
        lock(&ctx.access).impose_temporary_block(1, Duration::from_secs(1200));
        assert_eq!(check_admission(&ctx, 1), Err(AdmissionDenied::Blocked));
    }

    #[tokio::test(start_paused = true)]
    async fn elevated_user_bypasses_checks_but_not_order() {
        let ctx = Context::new(Config::default());
        lock(&ctx.access).grant_elevated(9);
        lock(&ctx.access).impose_temporary_block(9, Duration::from_secs(1200));

        submit(&ctx, request(1)).unwrap();
        let first = submit(&ctx, request(9)).unwrap();
        let second = submit(&ctx, request(9)).unwrap();

        assert!(matches!(first, SubmitOutcome::QueuedElevated { .. }));
        assert!(matches!(second, SubmitOutcome::QueuedElevated { .. }));
        assert_eq!(ctx.queue.try_dequeue_nowait().unwrap().submitter_id, 1);
        assert_eq!(ctx.queue.len(), 2);
    }

    #[test]
    fn invalid_request_builds_no_job() {
        let ctx = Context::new(Config::default());
        let mut bad = request(1);
        bad.delivery_url = "ftp://example.com/file".to_owned();

        let err = submit(&ctx, bad).unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(ValidationError::DeliveryTarget)));
        assert_eq!(ctx.queue.len(), 0);
        assert!(ctx.progress.snapshot(Duration::from_secs(60)).is_empty());
    }
}
