mod common;

use async_trait::async_trait;
use base64::Engine;
use common::{HEAD_GROMACS, HEAD_RELENG, ScriptedRunner, change_json, init_test_logging};
use gantry_core::ports::MatrixProcessor;
use gantry_core::{BuildConfig, BuildResult, MatrixDescription, Project};
use gantry_integration::ondemand::{
    BuildKind, BuildReport, CrossVerifyInfo, RequestParser, actions_from_triggering_comment,
    do_post_build,
};
use gantry_integration::{
    BuildEnv, GerritConfig, GerritIntegration, PostBuildInput, ProjectSetup, ProjectsManager,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::{Arc, Mutex};

const QUERY: &str = "ssh -p 29418 jenkins@gerrit.gromacs.org gerrit query";
const REVIEW: &str = "ssh -p 29418 jenkins@gerrit.gromacs.org gerrit review";

/// Hands out a fixed matrix and remembers which files were asked for.
#[derive(Default)]
struct StaticMatrix {
    requested: Mutex<Vec<String>>,
}

#[async_trait]
impl MatrixProcessor for StaticMatrix {
    async fn process_matrix_configs(&self, path: &str) -> gantry_core::Result<MatrixDescription> {
        self.requested.lock().unwrap().push(path.to_string());
        let mut config = BuildConfig::new(vec!["gcc-7".to_string(), "mpi".to_string()]);
        config.host = Some("bs_nix1310".to_string());
        Ok(MatrixDescription {
            configs: vec![config],
            as_axis: "\"gcc-7 mpi host=bs_nix1310\"".to_string(),
        })
    }
}

struct Fixture {
    gerrit: GerritIntegration,
    setup: ProjectSetup,
}

async fn fixture(workspace: &Path, env: BuildEnv, runner: Arc<ScriptedRunner>) -> Fixture {
    init_test_logging();
    let env = Arc::new(
        env.with("GROMACS_REFSPEC", "refs/heads/master")
            .with("REGRESSIONTESTS_REFSPEC", "refs/heads/master")
            .with("RELENG_REFSPEC", "refs/heads/master"),
    );
    let gerrit = Arc::new(GerritIntegration::new(
        GerritConfig::default(),
        env.clone(),
        runner.clone(),
    ));
    let manager = ProjectsManager::init(workspace, env.clone(), gerrit, runner.clone())
        .await
        .unwrap();
    Fixture {
        gerrit: GerritIntegration::new(GerritConfig::default(), env, runner),
        setup: ProjectSetup::new(manager),
    }
}

fn releng_change_env(comment: &str) -> BuildEnv {
    let encoded = base64::engine::general_purpose::STANDARD.encode(comment);
    BuildEnv::new()
        .with("GERRIT_PROJECT", "releng")
        .with("GERRIT_REFSPEC", "refs/changes/78/5678/2")
        .with("GERRIT_BRANCH", "master")
        .with("GERRIT_CHANGE_URL", "https://gerrit.example.org/5678")
        .with("GERRIT_PATCHSET_NUMBER", "2")
        .with("BUILD_URL", "http://ci/job/Releng_OnDemand/3/")
        .with("GERRIT_EVENT_COMMENT_TEXT", encoded)
}

fn refspecs(revisions: &[gantry_integration::BuildRevision]) -> Vec<(Project, String)> {
    revisions
        .iter()
        .map(|r| (r.project, r.refspec.clone()))
        .collect()
}

#[tokio::test]
async fn test_cross_verify_from_releng_change() {
    let ws = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond(QUERY, &change_json("gromacs", "release-2018", 1234, 5, HEAD_GROMACS))
            .respond("git rev-list", &format!("{} Fix the thing\n", HEAD_GROMACS))
            .respond("git ls-remote", &format!("{}\trefs/heads/master\n", HEAD_RELENG)),
    );
    let env = releng_change_env("Patch Set 2:\n\n[JENKINS] Cross-verify 1234\n\nThanks");
    let fixture = fixture(ws.path(), env, runner.clone()).await;
    let processor = StaticMatrix::default();

    let actions = actions_from_triggering_comment(&fixture.gerrit, &fixture.setup, &processor)
        .await
        .unwrap();

    let kinds: Vec<BuildKind> = actions.builds.iter().map(|b| b.kind).collect();
    assert_eq!(
        kinds,
        vec![
            BuildKind::Matrix,
            BuildKind::ClangAnalyzer,
            BuildKind::Documentation,
            BuildKind::Uncrustify,
        ]
    );
    assert!(actions.builds.iter().all(|b| b.desc.as_deref() == Some("cross-verify")));
    let matrix = actions.builds[0].matrix.as_ref().unwrap();
    assert_eq!(matrix.configs[0].host.as_deref(), Some("bs_nix1310"));
    assert_eq!(actions.builds[0].matrix_file, None);
    assert_eq!(*processor.requested.lock().unwrap(), vec!["pre-submit-matrix"]);

    assert_eq!(
        refspecs(&actions.revisions),
        vec![
            (Project::Gromacs, "refs/changes/34/1234/5".to_string()),
            (Project::Regressiontests, "refs/heads/release-2018".to_string()),
            (Project::Releng, "refs/changes/78/5678/2".to_string()),
        ]
    );
    assert_eq!(
        actions.gerrit_info,
        Some(CrossVerifyInfo {
            change: 1234,
            patchset: 5
        })
    );

    let lines = runner.lines();
    let fetch = lines
        .iter()
        .position(|l| l.starts_with("git fetch ssh://jenkins@gerrit.gromacs.org:29418/gromacs.git"))
        .expect("cross-verified change is fetched");
    assert!(lines[fetch].ends_with("refs/changes/34/1234/5"));
    assert_eq!(lines[fetch + 1], format!("git checkout -qf {}", HEAD_GROMACS));

    let reviews: Vec<&String> = lines.iter().filter(|l| l.starts_with(REVIEW)).collect();
    assert_eq!(reviews.len(), 1);
    assert_eq!(
        *reviews[0],
        format!(
            "{} 1234,5 -m 'Cross-verify with https://gerrit.example.org/5678 (patch set 2) running at http://ci/job/Releng_OnDemand/3/'",
            REVIEW
        )
    );
}

#[tokio::test]
async fn test_quiet_cross_verify_posts_nothing() {
    let ws = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond(QUERY, &change_json("regressiontests", "master", 4321, 1, HEAD_GROMACS))
            .respond("git rev-list", &format!("{} Update tests\n", HEAD_GROMACS))
            .respond("git ls-remote", &format!("{}\trefs/heads/master\n", HEAD_RELENG)),
    );
    let env = releng_change_env("[JENKINS] cross-verify 4321 quiet coverage");
    let fixture = fixture(ws.path(), env, runner.clone()).await;

    let actions =
        actions_from_triggering_comment(&fixture.gerrit, &fixture.setup, &StaticMatrix::default())
            .await
            .unwrap();

    let kinds: Vec<BuildKind> = actions.builds.iter().map(|b| b.kind).collect();
    assert_eq!(kinds, vec![BuildKind::Coverage]);
    assert_eq!(actions.gerrit_info, None);
    assert!(!runner.lines().iter().any(|l| l.starts_with(REVIEW)));
    assert!(!runner.lines().iter().any(|l| l.starts_with("git fetch")));
}

#[tokio::test]
async fn test_release_branch_request() {
    let ws = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond(QUERY, &change_json("releng", "master", 5678, 2, HEAD_RELENG))
            .respond("git rev-list", &format!("{} Fix the thing\n", HEAD_GROMACS))
            .respond("git ls-remote", &format!("{}\trefs/heads/release-2019\n", HEAD_GROMACS)),
    );
    let env = BuildEnv::new().with("MANUAL_COMMENT_TEXT", "release-2019 release no-dev");
    let fixture = fixture(ws.path(), env, runner.clone()).await;

    let actions =
        actions_from_triggering_comment(&fixture.gerrit, &fixture.setup, &StaticMatrix::default())
            .await
            .unwrap();

    assert_eq!(actions.builds.len(), 1);
    assert_eq!(actions.builds[0].kind, BuildKind::Release);
    assert_eq!(actions.builds[0].release_flag, Some(true));
    assert_eq!(
        refspecs(&actions.revisions),
        vec![
            (Project::Gromacs, "refs/heads/release-2019".to_string()),
            (Project::Regressiontests, "refs/heads/release-2019".to_string()),
            (Project::Releng, "refs/heads/master".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_requests_from_regressiontests_change() {
    let ws = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond("git rev-list", &format!("{} Update tests\n", HEAD_GROMACS))
            .respond("git ls-remote", &format!("{}\trefs/heads/release-2018\n", HEAD_GROMACS)),
    );
    let env = BuildEnv::new()
        .with("GERRIT_PROJECT", "regressiontests")
        .with("GERRIT_REFSPEC", "refs/changes/21/4321/1")
        .with("GERRIT_BRANCH", "release-2018");
    let fixture = fixture(ws.path(), env, runner).await;

    let mut parser = RequestParser::new(&fixture.gerrit, &fixture.setup).unwrap();
    parser.parse("Package\nupdate").await.unwrap();
    let actions = parser.into_actions(&StaticMatrix::default()).await.unwrap();

    let kinds: Vec<BuildKind> = actions.builds.iter().map(|b| b.kind).collect();
    assert_eq!(
        kinds,
        vec![BuildKind::RegtestPackage, BuildKind::RegressiontestsUpdate]
    );
    assert_eq!(
        refspecs(&actions.revisions),
        vec![
            (Project::Gromacs, "refs/heads/release-2018".to_string()),
            (Project::Regressiontests, "refs/changes/21/4321/1".to_string()),
            (Project::Releng, "refs/heads/master".to_string()),
        ]
    );
    assert_eq!(actions.gerrit_info, None);
}

#[tokio::test]
async fn test_invalid_requests() {
    let ws = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond(QUERY, &change_json("gromacs", "master", 1200, 3, HEAD_GROMACS))
            .respond("git rev-list", &format!("{} Fix the thing\n", HEAD_GROMACS)),
    );
    let env = BuildEnv::new()
        .with("GERRIT_PROJECT", "gromacs")
        .with("GERRIT_REFSPEC", "refs/heads/master")
        .with("GERRIT_BRANCH", "master");
    let fixture = fixture(ws.path(), env, runner).await;

    let cases = [
        (
            "cross-verify 1200",
            "Cross-verify is not possible with another change from the same repository",
        ),
        (
            "release-2019",
            "Release branch verification only makes sense for releng changes",
        ),
        ("update", "Update only makes sense for regressiontests changes"),
        ("coverage sanitizers", "Unknown request: coverage sanitizers"),
        ("", "Empty on-demand request"),
    ];
    for (request, expected) in cases {
        let mut parser = RequestParser::new(&fixture.gerrit, &fixture.setup).unwrap();
        let err = parser.parse(request).await.unwrap_err();
        assert_eq!(err.to_string(), expected, "request {:?}", request);
    }
}

#[tokio::test]
async fn test_cross_verify_with_releng_change_is_rejected() {
    let ws = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond(QUERY, &change_json("releng", "master", 5678, 2, HEAD_RELENG))
            .respond("git rev-list", &format!("{} Fix the thing\n", HEAD_GROMACS)),
    );
    let env = BuildEnv::new()
        .with("GERRIT_PROJECT", "gromacs")
        .with("GERRIT_REFSPEC", "refs/heads/master")
        .with("GERRIT_BRANCH", "master");
    let fixture = fixture(ws.path(), env, runner).await;

    let mut parser = RequestParser::new(&fixture.gerrit, &fixture.setup).unwrap();
    let err = parser.parse("cross-verify 5678").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cross-verify with releng changes should be initiated from the releng change"
    );
}

fn report(title: &str, url: Option<&str>, result: BuildResult, reason: Option<&str>) -> BuildReport {
    BuildReport {
        title: Some(title.to_string()),
        url: url.map(str::to_string),
        result,
        reason: reason.map(str::to_string),
        desc: Some("cross-verify".to_string()),
    }
}

#[tokio::test]
async fn test_post_build_single_build() {
    let runner = Arc::new(ScriptedRunner::new());
    let gerrit = GerritIntegration::new(GerritConfig::default(), Arc::new(BuildEnv::new()), runner.clone());
    let input = PostBuildInput {
        builds: vec![report(
            "Coverage",
            Some("http://ci/job/Coverage/7/"),
            BuildResult::Unstable,
            Some("2 tests failed\n"),
        )],
        gerrit_info: None,
    };

    let summary = do_post_build(&gerrit, &input).await.unwrap();
    assert_eq!(summary.url.as_deref(), Some("http://ci/job/Coverage/7/ (cross-verify)"));
    assert_eq!(summary.message.as_deref(), Some("2 tests failed"));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_post_build_reports_cross_verify() {
    let runner = Arc::new(ScriptedRunner::new());
    let env = BuildEnv::new()
        .with("GERRIT_CHANGE_URL", "https://gerrit.example.org/5678")
        .with("GERRIT_PATCHSET_NUMBER", "2");
    let gerrit = GerritIntegration::new(GerritConfig::default(), Arc::new(env), runner.clone());
    let input: PostBuildInput = serde_json::from_str(
        r#"{
            "builds": [
                {"title": "Matrix", "url": "http://ci/job/Matrix/9/", "result": "SUCCESS", "desc": "cross-verify"},
                {"title": "Documentation", "result": "FAILURE", "reason": "Doxygen warnings\n"}
            ],
            "gerrit_info": {"change": 1234, "patchset": 5}
        }"#,
    )
    .unwrap();

    let summary = do_post_build(&gerrit, &input).await.unwrap();
    assert_eq!(summary.url, None);
    assert_eq!(
        summary.message.as_deref(),
        Some("http://ci/job/Matrix/9/ (cross-verify): SUCCESS\nDocumentation: FAILURE <<<\nDoxygen warnings\n>>>")
    );

    let calls = runner.lines();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0],
        format!(
            "{} 1234,5 -m 'Cross-verify with https://gerrit.example.org/5678 (patch set 2) finished\n\n{}\n\n{}'",
            REVIEW,
            "http://ci/job/Matrix/9/ (cross-verify): SUCCESS",
            "Documentation: FAILURE <<<\nDoxygen warnings\n>>>"
        )
    );
}
