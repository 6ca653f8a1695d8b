//! Environment provisioning against a scripted runner

mod helpers;

use std::path::PathBuf;
use std::time::Duration;

use helpers::*;
use testherd::venv::{self, ProvisionError, ProvisionOptions};

fn create_options(packages: &[&str]) -> ProvisionOptions {
    ProvisionOptions {
        adopt: None,
        mirror: "https://mirror.example/simple/".to_string(),
        system_site_packages: false,
        packages: packages.iter().map(|p| p.to_string()).collect(),
        timeout: Duration::from_secs(30),
        keep: false,
    }
}

/// The owned-creation flow shares one pid-derived root, so its phases run
/// sequentially inside a single test.
#[tokio::test]
async fn test_owned_venv_lifecycle() {
    let expected_root =
        std::env::temp_dir().join(format!("testherd_venv_{}", std::process::id()));

    // Creation: the venv module drives the interpreter, writes the mirror
    // config, installs packages, and the handle reclaims the root on drop.
    {
        let runner = ScriptedRunner::new(|spec| {
            if program_name(spec) == "python3" {
                // `python -m venv <root>` creates the tree.
                let root = PathBuf::from(spec.args.last().unwrap());
                std::fs::create_dir_all(root.join("bin")).unwrap();
                std::fs::write(root.join("bin").join("python"), "").unwrap();
                std::fs::write(root.join("bin").join("pip"), "").unwrap();
            }
            Script::ok()
        });

        let env = venv::provision(&runner, &create_options(&["black", "coverage"]))
            .await
            .expect("creation should succeed");
        assert!(env.owned());
        assert_eq!(env.root(), expected_root.as_path());

        let calls = runner.calls();
        assert!(calls[0].contains("-m venv"));
        assert!(calls[1].contains("install --upgrade black coverage"));

        let pip_conf =
            std::fs::read_to_string(expected_root.join("pip.conf")).unwrap();
        assert!(pip_conf.contains("index-url = https://mirror.example/simple/"));

        drop(env);
        assert!(!expected_root.exists(), "owned venv is removed on drop");
    }

    // Install failure: fatal, and the half-built root is reclaimed.
    {
        let runner = ScriptedRunner::new(|spec| {
            match program_name(spec).as_str() {
                "python3" => {
                    let root = PathBuf::from(spec.args.last().unwrap());
                    std::fs::create_dir_all(root.join("bin")).unwrap();
                    std::fs::write(root.join("bin").join("pip"), "").unwrap();
                    Script::ok()
                }
                _ => Script::fails("No matching distribution found\n"),
            }
        });

        let err = venv::provision(&runner, &create_options(&["nonexistent-pkg"]))
            .await
            .expect_err("install failure is fatal");
        assert!(matches!(err, ProvisionError::Install { .. }));
        assert!(!expected_root.exists(), "failed creation leaves nothing behind");
    }

    // Creation timeout: fatal before any pipeline starts.
    {
        let runner = ScriptedRunner::new(|_| Script::TimesOut);
        let err = venv::provision(&runner, &create_options(&[]))
            .await
            .expect_err("creation timeout is fatal");
        assert!(matches!(err, ProvisionError::Timeout(_)));
    }
}

#[tokio::test]
async fn test_adopting_missing_path_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::all_ok();
    let opts = ProvisionOptions {
        adopt: Some(tmp.path().join("nope")),
        ..create_options(&[])
    };
    let err = venv::provision(&runner, &opts).await.unwrap_err();
    assert!(matches!(err, ProvisionError::InvalidAdoptPath(_)));
}
