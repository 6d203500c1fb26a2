//! Integration tests for the `sops_file` resource lifecycle

mod common;

use camino::Utf8PathBuf;
use common::*;
use sopsfile_core::{AgeBlock, EncryptionConfig, FileResourceConfig, KmsBlock, ProviderConfig};
use sopsfile_engine::TreeValue;
use sopsfile_provider::{
    codes, resolve_master_keys, FileState, PlanAction, ResourceError, SopsProvider,
};
use tempfile::TempDir;

const PROVIDER_ARN: &str = "arn:aws:kms:us-west-2:111122223333:key/provider-key";
const RESOURCE_ARN: &str = "arn:aws:kms:eu-central-1:444455556666:key/resource-key";

fn age_provider(recipient: &str) -> SopsProvider {
    SopsProvider::configure(ProviderConfig {
        age: Some(AgeBlock {
            recipients: Some(recipient.to_string()),
        }),
        ..Default::default()
    })
}

fn content_resource(filename: &str, content: &str) -> FileResourceConfig {
    FileResourceConfig {
        content: Some(content.to_string()),
        filename: filename.to_string(),
        ..Default::default()
    }
}

fn base_dir(temp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap()
}

#[test]
fn test_resource_kms_overrides_provider() {
    let provider = ProviderConfig {
        kms: Some(KmsBlock {
            arn: Some(PROVIDER_ARN.to_string()),
            profile: Some("shared".to_string()),
        }),
        ..Default::default()
    };
    let resource = FileResourceConfig {
        kms: Some(KmsBlock {
            arn: Some(RESOURCE_ARN.to_string()),
            profile: None,
        }),
        ..content_resource("out.yaml", "a: b")
    };

    let config = EncryptionConfig::merge(&provider, &resource).unwrap();
    let keys = resolve_master_keys(&config).unwrap();
    let ids: Vec<_> = keys.iter().map(|k| k.identifier()).collect();
    assert_eq!(ids, [RESOURCE_ARN]);
    assert_eq!(config.kms.unwrap().profile.as_deref(), Some("shared"));
}

#[tokio::test]
async fn test_create_read_delete() {
    let temp = TempDir::new().unwrap();
    let (identity, recipient) = age_keypair();
    let provider = age_provider(&recipient);
    let resource = provider
        .file_resource(
            "basic",
            content_resource("secrets/basic.enc.yaml", &fixture("basic-encrypt.yaml")),
        )
        .with_base_dir(base_dir(&temp));

    let state = resource.create().await.unwrap();
    let target = temp.path().join("secrets/basic.enc.yaml");
    let written = std::fs::read(&target).unwrap();

    assert_eq!(state.filename, "secrets/basic.enc.yaml");
    assert_eq!(state.encrypted_content.as_bytes(), written.as_slice());
    assert_eq!(state.id.len(), 64);
    assert_eq!(state.data["hello"], "world");
    assert_eq!(state.data["integer"], "0");
    assert_eq!(state.data["float"], "0.2");
    assert_eq!(state.data["bool"], "true");
    assert_eq!(state.data["null_value"], "null");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let decrypted = decrypt(provider.stores().for_path(&target), &written, &identity).await;
    assert_eq!(decrypted[0].get("hello"), Some(&TreeValue::String("world".to_string())));

    assert_eq!(resource.read(&state).await.unwrap(), Some(state.clone()));

    resource.delete(&state).await.unwrap();
    assert!(!target.exists());
    assert_eq!(resource.read(&state).await.unwrap(), None);

    // Deleting twice is fine
    resource.delete(&state).await.unwrap();
}

#[test]
fn test_target_path_resolution() {
    let (_, recipient) = age_keypair();
    let provider = age_provider(&recipient);
    let relative = provider
        .file_resource("rel", content_resource("out/app.yaml", "a: b"))
        .with_base_dir(Utf8PathBuf::from("/work"));
    assert_eq!(relative.target_path(), Utf8PathBuf::from("/work/out/app.yaml"));

    let absolute = provider
        .file_resource("abs", content_resource("/etc/app.yaml", "a: b"))
        .with_base_dir(Utf8PathBuf::from("/work"));
    assert_eq!(absolute.target_path(), Utf8PathBuf::from("/etc/app.yaml"));
}

#[tokio::test]
async fn test_read_detects_modified_file() {
    let temp = TempDir::new().unwrap();
    let (_, recipient) = age_keypair();
    let resource = age_provider(&recipient)
        .file_resource("app", content_resource("app.enc.json", r#"{"token": "abc"}"#))
        .with_base_dir(base_dir(&temp));

    let state = resource.create().await.unwrap();
    std::fs::write(temp.path().join("app.enc.json"), "{}").unwrap();
    assert_eq!(resource.read(&state).await.unwrap(), None);
}

#[tokio::test]
async fn test_state_data_from_first_document() {
    let temp = TempDir::new().unwrap();
    let (_, recipient) = age_keypair();
    let resource = age_provider(&recipient)
        .file_resource("multi", content_resource("multi.yaml", "a: 1\n---\nb: 2\n"))
        .with_base_dir(base_dir(&temp));

    let state = resource.create().await.unwrap();
    assert_eq!(state.data.len(), 1);
    assert_eq!(state.data["a"], "1");
}

#[tokio::test]
async fn test_create_from_source() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("plain.env"), fixture("app.env")).unwrap();
    let (_, recipient) = age_keypair();
    let resource = age_provider(&recipient)
        .file_resource(
            "env",
            FileResourceConfig {
                source: Some("plain.env".to_string()),
                filename: "app.enc.env".to_string(),
                ..Default::default()
            },
        )
        .with_base_dir(base_dir(&temp));

    let state = resource.create().await.unwrap();
    assert_eq!(state.data["API_TOKEN"], "s3cr3t");
    assert_eq!(state.data["PASSWORD"], "pa$HOME_not_expanded");
    assert!(state.encrypted_content.contains("sops_mac=ENC["));
    assert!(!state.encrypted_content.contains("s3cr3t"));
}

#[tokio::test]
async fn test_missing_source() {
    let temp = TempDir::new().unwrap();
    let (_, recipient) = age_keypair();
    let resource = age_provider(&recipient)
        .file_resource(
            "missing",
            FileResourceConfig {
                source: Some("nope.yaml".to_string()),
                filename: "out.yaml".to_string(),
                ..Default::default()
            },
        )
        .with_base_dir(base_dir(&temp));

    let err = resource.create().await.unwrap_err();
    assert!(matches!(err, ResourceError::ReadSource { .. }));
    assert_eq!(err.exit_code(), codes::COULD_NOT_READ_INPUT_FILE);
    assert!(!temp.path().join("out.yaml").exists());
}

#[tokio::test]
async fn test_already_encrypted_leaves_no_file() {
    let temp = TempDir::new().unwrap();
    let (_, recipient) = age_keypair();
    let resource = age_provider(&recipient)
        .file_resource(
            "twice",
            content_resource("twice.yaml", &fixture("already-encrypted.yaml")),
        )
        .with_base_dir(base_dir(&temp));

    let err = resource.create().await.unwrap_err();
    assert_eq!(err.exit_code(), codes::FILE_ALREADY_ENCRYPTED);
    assert_eq!(err.to_string(), "File already encrypted");
    assert!(!temp.path().join("twice.yaml").exists());
}

#[tokio::test]
async fn test_invalid_declarations() {
    let (_, recipient) = age_keypair();
    let provider = age_provider(&recipient);

    let both = FileResourceConfig {
        source: Some("a.yaml".to_string()),
        ..content_resource("out.yaml", "a: b")
    };
    let err = provider.file_resource("both", both).create().await.unwrap_err();
    assert!(matches!(err, ResourceError::Config(_)));

    let bad_hint = FileResourceConfig {
        input_type: Some("toml".to_string()),
        ..content_resource("out.yaml", "a: b")
    };
    let err = provider.file_resource("hint", bad_hint).create().await.unwrap_err();
    assert!(matches!(err, ResourceError::InvalidInputType { ref value, .. } if value == "toml"));

    let no_provider = SopsProvider::new()
        .file_resource("bare", content_resource("out.yaml", "a: b"))
        .create()
        .await
        .unwrap_err();
    assert_eq!(no_provider.exit_code(), codes::ERROR_READING_CONFIG);
}

#[tokio::test]
async fn test_plan() {
    let temp = TempDir::new().unwrap();
    let (_, recipient) = age_keypair();
    let provider = age_provider(&recipient);
    let declared = content_resource("plan.yaml", "token: abc\n");
    let resource = provider
        .file_resource("plan", declared.clone())
        .with_base_dir(base_dir(&temp));

    let planned = resource.plan(None).await.unwrap();
    assert_eq!(planned.action, PlanAction::Create);
    assert_eq!(planned.resource, "plan");

    let state = resource.create().await.unwrap();
    assert_eq!(resource.plan(Some(&state)).await.unwrap().action, PlanAction::NoOp);

    let changed = provider
        .file_resource("plan", content_resource("plan.yaml", "token: def\n"))
        .with_base_dir(base_dir(&temp));
    assert_eq!(changed.plan(Some(&state)).await.unwrap().action, PlanAction::Replace);

    let (_, other_recipient) = age_keypair();
    let rekeyed = FileResourceConfig {
        age: Some(AgeBlock {
            recipients: Some(other_recipient),
        }),
        ..declared
    };
    let rekeyed = provider
        .file_resource("plan", rekeyed)
        .with_base_dir(base_dir(&temp));
    assert_eq!(rekeyed.plan(Some(&state)).await.unwrap().action, PlanAction::Replace);

    std::fs::remove_file(temp.path().join("plan.yaml")).unwrap();
    assert_eq!(resource.plan(Some(&state)).await.unwrap().action, PlanAction::Create);
}

#[test]
fn test_state_serde() {
    let state = FileState {
        id: "ab".repeat(32),
        filename: "out.yaml".to_string(),
        encrypted_content: "hello: ENC[...]\n".to_string(),
        data: [("hello".to_string(), "world".to_string())].into_iter().collect(),
        input_hash: "cd".repeat(32),
    };
    let json = serde_json::to_string(&state).unwrap();
    let back: FileState = serde_json::from_str(&json).unwrap();
    assert_eq!(back, state);
}
