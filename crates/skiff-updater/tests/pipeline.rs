//! End-to-end update cycles against a distribution root produced by the
//! publisher.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use skiff_publisher::KeyMaterial;
use skiff_updater::{
    ApplyOutcome, CheckOutcome, ConfigDocument, CycleOutcome, DirectorySource, FieldValue,
    ManualClock, ParseOptions, PromotionJournal, UpdateScheduler, UpdateSession, UpdaterConfig,
};
use tempfile::TempDir;

const TEMPLATE: &str = r#"[server]
host = "updates.local"
api_key = { unset = true, hint = "from the portal" }

[ui]
theme = "dark"
"#;

const LIVE: &str = r#"[server]
api_key = "user-secret"
host = { default = "old.local" }

[legacy]
keep = "me"
"#;

struct Fixture {
    dir: TempDir,
    keys: KeyMaterial,
    clock: ManualClock,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("install/keys")).unwrap();
        std::fs::write(dir.path().join("install/config.toml"), LIVE).unwrap();
        Self {
            dir,
            keys: KeyMaterial::generate().unwrap(),
            clock: ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("install")
    }

    fn dist(&self) -> PathBuf {
        self.dir.path().join("dist")
    }

    fn release(&self, version: &str) -> PathBuf {
        let release = self.dir.path().join("build").join(version);
        std::fs::create_dir_all(release.join("bin")).unwrap();
        std::fs::write(release.join("bin/app"), format!("app {version}")).unwrap();
        std::fs::write(release.join("config.toml"), TEMPLATE).unwrap();
        release
    }

    fn publish(&self, version: &str) {
        skiff_publisher::publish(&self.release(version), version, &self.keys, &self.dist())
            .unwrap();
    }

    /// Provision the publisher's artifact key, as an operator would.
    fn share_artifact_key(&self) {
        std::fs::write(
            self.root().join("keys/encryption_key.bin"),
            self.keys.artifact_key.as_bytes(),
        )
        .unwrap();
    }

    fn config(&self, pinned: bool) -> UpdaterConfig {
        let mut config = UpdaterConfig::default();
        if pinned {
            config.security.pinned_public_key =
                Some(self.keys.verifier().to_public_key_pem().unwrap());
        }
        config
    }

    fn session_with(&self, config: UpdaterConfig) -> UpdateSession {
        let mut session = UpdateSession::with_parts(
            self.root(),
            config,
            Arc::new(DirectorySource::new(self.dist())),
            Arc::new(self.clock.clone()),
        )
        .unwrap();
        session.set_scheduler(
            UpdateScheduler::new(Duration::from_secs(86_400), Duration::from_secs(7 * 86_400))
                .without_jitter(),
        );
        session
    }

    fn session(&self) -> UpdateSession {
        self.session_with(self.config(true))
    }

    fn version_file(&self) -> Option<String> {
        std::fs::read_to_string(self.root().join("version.txt")).ok()
    }

    fn live(&self) -> ConfigDocument {
        ConfigDocument::load_live(&self.root().join("config.toml"), &ParseOptions::default())
            .unwrap()
    }
}

fn text(value: &str) -> Option<FieldValue> {
    Some(FieldValue::Default(value.to_string()))
}

fn user(value: &str) -> Option<FieldValue> {
    Some(FieldValue::UserSet(value.to_string()))
}

fn updates_is_empty(root: &Path) -> bool {
    std::fs::read_dir(root.join("updates"))
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

#[tokio::test]
async fn test_publish_check_apply() {
    let fx = Fixture::new();
    fx.publish("1.0.1");
    fx.share_artifact_key();
    let session = fx.session();

    assert_eq!(
        session.check_for_update().await.unwrap(),
        (true, "1.0.1".to_string())
    );
    assert_eq!(
        session.apply_update_if_available().await.unwrap(),
        (true, Some("1.0.1".to_string()))
    );

    assert_eq!(fx.version_file().as_deref(), Some("1.0.1"));
    assert_eq!(
        std::fs::read_to_string(fx.root().join("releases/1.0.1/bin/app")).unwrap(),
        "app 1.0.1"
    );
    assert!(session.restart_required().await);
    assert!(updates_is_empty(&fx.root()));

    let live = fx.live();
    assert_eq!(live.get("server", "api_key").cloned(), user("user-secret"));
    assert_eq!(live.get("server", "host").cloned(), text("updates.local"));
    assert_eq!(live.get("ui", "theme").cloned(), text("dark"));
    assert_eq!(live.get("legacy", "keep").cloned(), user("me"));

    // Same version published again: nothing to do.
    assert_eq!(
        session.check_for_update().await.unwrap(),
        (false, "1.0.1".to_string())
    );
    assert_eq!(
        session.apply_update_if_available().await.unwrap(),
        (false, None)
    );
}

#[tokio::test]
async fn test_trust_on_first_use_caches_key() {
    let fx = Fixture::new();
    fx.publish("1.0.1");
    fx.share_artifact_key();
    let session = fx.session_with(fx.config(false));

    assert_eq!(
        session.apply_update_if_available().await.unwrap(),
        (true, Some("1.0.1".to_string()))
    );
    let cached = std::fs::read_to_string(fx.root().join("keys/public_key.pem")).unwrap();
    assert_eq!(cached, fx.keys.verifier().to_public_key_pem().unwrap());
}

#[tokio::test]
async fn test_corrupted_artifact_leaves_installation_untouched() {
    let fx = Fixture::new();
    fx.publish("1.0.1");
    fx.share_artifact_key();

    let artifact = fx.dist().join("1.0.1/update.tar.gz.enc");
    let mut bytes = std::fs::read(&artifact).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    std::fs::write(&artifact, bytes).unwrap();

    let session = fx.session();
    assert_eq!(
        session.apply_update_if_available().await.unwrap(),
        (false, None)
    );

    assert_eq!(fx.version_file(), None);
    assert_eq!(session.current_version().unwrap(), "0.0.0");
    assert!(!fx.root().join("releases/1.0.1").exists());
    assert_eq!(
        std::fs::read_to_string(fx.root().join("config.toml")).unwrap(),
        LIVE
    );
    assert!(updates_is_empty(&fx.root()));
    assert!(!session.restart_required().await);
}

#[tokio::test]
async fn test_wrong_artifact_key_is_install_failure() {
    let fx = Fixture::new();
    fx.publish("1.0.1");
    // No key provisioned: the installation generates its own, which cannot
    // open the publisher's artifact.
    let session = fx.session();

    match session.run_cycle_now().await {
        CycleOutcome::Completed(ApplyOutcome::InstallFailed(failure)) => {
            assert_eq!(failure.version, "1.0.1");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(session.current_version().unwrap(), "0.0.0");
    assert!(fx.root().join("keys/encryption_key.bin").is_file());
}

#[tokio::test]
async fn test_foreign_signature_is_rejected() {
    let fx = Fixture::new();
    fx.publish("1.0.1");
    fx.share_artifact_key();

    let mut config = UpdaterConfig::default();
    config.security.pinned_public_key = Some(
        KeyMaterial::generate()
            .unwrap()
            .verifier()
            .to_public_key_pem()
            .unwrap(),
    );
    let session = fx.session_with(config);

    assert_eq!(
        session.check_for_update().await.unwrap(),
        (false, "0.0.0".to_string())
    );
    assert!(matches!(
        session.check_detailed().await.unwrap(),
        CheckOutcome::SignatureInvalid { .. }
    ));
    assert_eq!(
        session.apply_update_if_available().await.unwrap(),
        (false, None)
    );
    assert!(!fx.root().join("releases/1.0.1").exists());
}

#[tokio::test]
async fn test_interrupted_promotion_completes_on_open() {
    let fx = Fixture::new();
    let root = fx.root();

    // State after the journal was written but before the release was
    // renamed into place.
    let staged = root.join("updates/staging-1.0.1-0123456789abcdef");
    std::fs::create_dir_all(staged.join("bin")).unwrap();
    std::fs::write(staged.join("bin/app"), "app 1.0.1").unwrap();
    let journal = PromotionJournal {
        version: "1.0.1".to_string(),
        staged_release: staged.clone(),
        release_dir: root.join("releases/1.0.1"),
        staged_config: Some(staged.join(".merged-config.toml")),
        live_config: root.join("config.toml"),
    };
    std::fs::write(
        root.join("promotion.json"),
        serde_json::to_vec(&journal).unwrap(),
    )
    .unwrap();
    let stray = root.join("updates/download-1.0.2-fedcba9876543210.enc");
    std::fs::write(&stray, b"partial").unwrap();

    let session = fx.session();

    assert_eq!(session.current_version().unwrap(), "1.0.1");
    assert!(root.join("releases/1.0.1/bin/app").is_file());
    assert!(!root.join("promotion.json").exists());
    assert!(!staged.exists());
    assert!(!stray.exists());
    assert_eq!(std::fs::read_to_string(root.join("config.toml")).unwrap(), LIVE);
}

#[tokio::test]
async fn test_scheduled_cycles_follow_the_clock() {
    let fx = Fixture::new();
    fx.publish("1.0.1");
    fx.share_artifact_key();
    let session = fx.session();

    match session.run_cycle().await {
        CycleOutcome::Completed(ApplyOutcome::Installed(release)) => {
            assert_eq!(release.version, "1.0.1");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(session.run_cycle().await, CycleOutcome::NotDue));

    fx.publish("1.0.2");
    fx.clock.advance(Duration::from_secs(23 * 3_600));
    assert!(matches!(session.run_cycle().await, CycleOutcome::NotDue));

    fx.clock.advance(Duration::from_secs(3_600));
    let outcome = session.run_cycle().await;
    assert_eq!(outcome.installed(), Some("1.0.2"));
    assert_eq!(fx.version_file().as_deref(), Some("1.0.2"));
}

#[tokio::test]
async fn test_concurrent_apply_runs_once() {
    let fx = Fixture::new();
    fx.publish("1.0.1");
    fx.share_artifact_key();
    let session = Arc::new(fx.session());

    let a = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.apply_update_if_available().await.unwrap() }
    });
    let b = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.apply_update_if_available().await.unwrap() }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    let installed = results.iter().filter(|(ok, _)| *ok).count();
    assert_eq!(installed, 1);
    assert_eq!(fx.version_file().as_deref(), Some("1.0.1"));
}
