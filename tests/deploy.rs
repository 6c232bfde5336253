mod common;

use common::{assert_in_order, collecting_sink, fabric, Rule, ScriptedConnector};
use sshfabric::errors::FabricErrorKind;
use sshfabric::Repository;

#[tokio::test]
async fn install_fresh_target_clones_then_installs() {
    let connector = ScriptedConnector::new();
    let fabric = fabric(&connector);
    let (sink, printed) = collecting_sink();

    fabric
        .install_program("idx", &sink, false)
        .await
        .expect("install");
    drop(sink);

    let lines = printed.await.expect("printer");
    assert_in_order(
        &lines,
        &[
            "Removing directory \"/opt/idx\"",
            "Creating directory \"/opt/idx\"",
            "git clone --quiet 'ssh://h/repo' '/opt/idx'",
            "make",
        ],
    );
    assert!(!lines.iter().any(|l| l.contains("already exists")));

    let commands = connector.commands();
    assert_in_order(
        &commands,
        &[
            "if [ -d '/opt/idx' ]",
            "rm -rf '/opt/idx'",
            "mkdir -p '/opt/idx'",
            "git clone --quiet",
            "cd '/repo' && git diff",
            "make",
        ],
    );
    assert!(!commands.iter().any(|c| c.contains("git apply")));
    fabric.close().await;
}

#[tokio::test]
async fn install_existing_target_skips_clone_but_runs_install() {
    let connector = ScriptedConnector::new().with_dir("/opt/idx");
    let fabric = fabric(&connector);
    let (sink, printed) = collecting_sink();

    fabric
        .install_program("idx", &sink, false)
        .await
        .expect("install");
    drop(sink);

    let lines = printed.await.expect("printer");
    assert_in_order(&lines, &["target \"/opt/idx\" already exists", "make"]);
    let commands = connector.commands();
    assert_eq!(commands.len(), 2);
    assert!(commands[0].starts_with("if [ -d '/opt/idx' ]"));
    assert_eq!(commands[1], "make");
}

#[tokio::test]
async fn forced_install_recreates_existing_target() {
    let connector = ScriptedConnector::new().with_dir("/opt/idx");
    let fabric = fabric(&connector);
    let (sink, _printed) = collecting_sink();

    fabric
        .install_program("idx", &sink, true)
        .await
        .expect("install");

    let commands = connector.commands();
    assert_eq!(commands[0], "rm -rf '/opt/idx'");
    assert!(commands.iter().any(|c| c.starts_with("git clone")));
}

#[tokio::test]
async fn uncommitted_changes_are_applied_to_target() {
    let diff = "diff --git a/main.go b/main.go\n+// local change\n";
    let connector = ScriptedConnector::new().with_rule(Rule::new("git diff").stdout(diff));
    let fabric = fabric(&connector);
    let (sink, printed) = collecting_sink();

    fabric
        .install_program("idx", &sink, false)
        .await
        .expect("install");
    drop(sink);

    let executed = connector.executed();
    let diff_run = executed
        .iter()
        .find(|e| e.command.contains("git diff"))
        .expect("diff executed");
    assert_eq!(diff_run.host, "h");
    assert_eq!(diff_run.user, "couchbase");
    let apply = executed
        .iter()
        .find(|e| e.command.contains("git apply -"))
        .expect("patch applied");
    assert_eq!(apply.host, "h1");
    assert_eq!(apply.command, "cd '/opt/idx' && git apply -");
    assert_eq!(connector.snapshot(|s| s.stdin_received.clone()), vec![diff]);

    let lines = printed.await.expect("printer");
    assert_in_order(&lines, &["git clone", "git diff", "git apply -", "make"]);
}

#[tokio::test]
async fn local_source_cannot_be_diffed() {
    let connector = ScriptedConnector::new();
    let fabric = fabric(&connector);
    let (sink, _printed) = collecting_sink();

    let repo = Repository {
        source: "/home/dev/repo".to_string(),
        target: "/opt/local".to_string(),
        install: vec![],
        uninstall: vec![],
    };
    let err = fabric
        .diff_repository("local", &repo, &sink)
        .await
        .err()
        .expect("local source refused");
    assert_eq!(err.kind(), FabricErrorKind::UnsupportedSource);

    let err = fabric
        .install_program("local", &sink, false)
        .await
        .err()
        .expect("install aborts");
    assert_eq!(err.kind(), FabricErrorKind::UnsupportedSource);
    let commands = connector.commands();
    assert!(!commands.iter().any(|c| c.contains("git apply")));
    assert!(!commands.iter().any(|c| c == "make"));
}

#[tokio::test]
async fn failed_clone_aborts_before_install_commands() {
    let connector = ScriptedConnector::new().with_rule(
        Rule::new("git clone")
            .stderr("fatal: repository not found\n")
            .exit(128),
    );
    let fabric = fabric(&connector);
    let (sink, printed) = collecting_sink();

    let err = fabric
        .install_program("idx", &sink, false)
        .await
        .err()
        .expect("clone fails");
    assert_eq!(err.kind(), FabricErrorKind::RemoteExit);
    assert!(!connector.commands().iter().any(|c| c == "make"));
    drop(sink);
    let lines = printed.await.expect("printer");
    assert!(lines.iter().any(|l| l.contains("repository not found")));
}

#[tokio::test]
async fn install_commands_carry_program_environment() {
    let connector = ScriptedConnector::new().with_dir("/opt/idx");
    let fabric = fabric(&connector);
    let (sink, _printed) = collecting_sink();

    fabric
        .install_program("idx", &sink, false)
        .await
        .expect("install");
    let make = connector
        .executed()
        .into_iter()
        .find(|e| e.command == "make")
        .expect("make executed");
    assert_eq!(make.environ, vec![("GOPATH".to_string(), "/opt/go".to_string())]);
    assert!(!make.pty);
}

#[tokio::test]
async fn uninstall_removes_target_then_runs_uninstall_commands() {
    let connector = ScriptedConnector::new();
    let fabric = fabric(&connector);
    let (sink, printed) = collecting_sink();

    fabric
        .uninstall_program("idx", &sink)
        .await
        .expect("uninstall");
    drop(sink);

    assert_eq!(connector.commands(), vec!["rm -rf '/opt/idx'", "make clean"]);
    let lines = printed.await.expect("printer");
    assert_in_order(&lines, &["Removing directory \"/opt/idx\"", "make clean"]);
}

#[tokio::test]
async fn uninstall_stops_when_removal_fails() {
    let connector = ScriptedConnector::new().with_rule(Rule::new("rm -rf").exit(1));
    let fabric = fabric(&connector);
    let (sink, _printed) = collecting_sink();

    let err = fabric
        .uninstall_program("idx", &sink)
        .await
        .err()
        .expect("removal fails");
    assert_eq!(err.kind(), FabricErrorKind::RemoteExit);
    assert_eq!(connector.commands(), vec!["rm -rf '/opt/idx'"]);
}

#[tokio::test]
async fn unknown_program_is_a_config_error() {
    let connector = ScriptedConnector::new();
    let fabric = fabric(&connector);
    let (sink, _printed) = collecting_sink();

    let err = fabric
        .install_program("nope", &sink, false)
        .await
        .err()
        .expect("unknown program");
    assert_eq!(err.kind(), FabricErrorKind::ConfigFieldMissing);
    assert!(connector.commands().is_empty());
}

#[tokio::test]
async fn diff_path_is_percent_decoded() {
    let connector = ScriptedConnector::new();
    let fabric = fabric(&connector);
    let (sink, _printed) = collecting_sink();

    let repo = Repository {
        source: "ssh://git@h/home/dev/my repo".to_string(),
        target: "/opt/idx".to_string(),
        install: vec![],
        uninstall: vec![],
    };
    fabric
        .diff_repository("idx", &repo, &sink)
        .await
        .expect("diff");

    let executed = connector.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].command, "cd '/home/dev/my repo' && git diff");
    assert_eq!(executed[0].user, "git");
}

#[tokio::test]
async fn undecodable_source_path_is_unsupported() {
    let connector = ScriptedConnector::new();
    let fabric = fabric(&connector);
    let (sink, _printed) = collecting_sink();

    let repo = Repository {
        source: "ssh://h/repo%FF".to_string(),
        target: "/opt/idx".to_string(),
        install: vec![],
        uninstall: vec![],
    };
    let err = fabric
        .diff_repository("idx", &repo, &sink)
        .await
        .err()
        .expect("invalid utf-8 path");
    assert_eq!(err.kind(), FabricErrorKind::UnsupportedSource);
    assert!(connector.commands().is_empty());
}
