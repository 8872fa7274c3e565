use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ldapsync_core::contract::{
    DestinationService, MemberSet, MockDestinationService, MockDirectory, MockNotifier,
};
use ldapsync_core::error::{DestinationError, DirectoryError, NotificationError, PairError};
use ldapsync_core::report::Level;
use ldapsync_core::synchronise::{RunOptions, SyncRunner};
use ldapsync_core::{SyncPair, SyncPairConfig};
use tokio_util::sync::CancellationToken;

fn set(items: &[&str]) -> MemberSet {
    items.iter().map(|s| s.to_string()).collect()
}

fn pairs(destination: &str, items: &[(&str, &str)]) -> SyncPairConfig {
    SyncPairConfig {
        destination: destination.to_string(),
        pairs: items
            .iter()
            .map(|(src, dst)| SyncPair::new(*src, *dst))
            .collect(),
    }
}

fn verbose() -> RunOptions {
    RunOptions {
        report_level: Level::Info,
        ..RunOptions::default()
    }
}

/// Notifier mock that expects exactly one flush and keeps the text.
fn recording_notifier() -> (MockNotifier, Arc<Mutex<Vec<String>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let sink = sent.clone();
    let mut notifier = MockNotifier::new();
    notifier.expect_send_report().times(1).returning(move |text| {
        sink.lock().unwrap().push(text.to_string());
        Ok(())
    });
    (notifier, sent)
}

/// Destination backed by a map, with add-if-absent semantics.
#[derive(Default)]
struct InMemoryDestination {
    groups: Mutex<HashMap<String, MemberSet>>,
    add_calls: AtomicUsize,
    reject: HashSet<String>,
    missing_groups: HashSet<String>,
}

impl InMemoryDestination {
    fn with_group(group: &str, members: &[&str]) -> Self {
        let dest = Self::default();
        dest.groups
            .lock()
            .unwrap()
            .insert(group.to_string(), set(members));
        dest
    }

    fn members(&self, group: &str) -> MemberSet {
        self.groups
            .lock()
            .unwrap()
            .get(group)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DestinationService for InMemoryDestination {
    async fn list_members(&self, group: &str) -> Result<MemberSet, DestinationError> {
        if self.missing_groups.contains(group) {
            return Err(DestinationError::not_found(group));
        }
        Ok(self.members(group))
    }

    async fn add_member(&self, identifier: &str, group: &str) -> Result<(), DestinationError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.contains(identifier) {
            return Err(DestinationError::permission_denied("owner role required"));
        }
        self.groups
            .lock()
            .unwrap()
            .entry(group.to_string())
            .or_default()
            .insert(identifier.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_adds_missing_member_and_reports_drift() {
    let mut directory = MockDirectory::new();
    directory
        .expect_list_group_members()
        .withf(|group| group == "ocfofficers")
        .returning(|_| Ok(set(&["alice", "bob"])));

    let mut destination = MockDestinationService::new();
    destination
        .expect_list_members()
        .withf(|group| group == "officers@example.org")
        .returning(|_| Ok(set(&["bob", "carol"])));
    destination
        .expect_add_member()
        .withf(|id, group| id == "alice" && group == "officers@example.org")
        .times(1)
        .returning(|_, _| Ok(()));

    let (notifier, sent) = recording_notifier();

    let runner = SyncRunner::new(
        Arc::new(directory),
        Arc::new(destination),
        Arc::new(notifier),
        pairs("google_groups", &[("ocfofficers", "officers@example.org")]),
        verbose(),
    );
    let report = runner
        .run(&CancellationToken::new())
        .await
        .expect("run should flush the report");

    assert!(!report.has_errors());
    assert_eq!(report.pairs.len(), 1);
    assert_eq!(report.pairs[0].added, vec!["alice".to_string()]);
    assert_eq!(report.pairs[0].drift, vec!["carol".to_string()]);

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0],
        "WARNING: carol is in officers@example.org but not in LDAP group ocfofficers\n\
         INFO: Added alice to officers@example.org"
    );
}

#[tokio::test]
async fn test_identical_membership_makes_no_calls_and_no_lines() {
    let mut directory = MockDirectory::new();
    directory
        .expect_list_group_members()
        .returning(|_| Ok(set(&["alice", "bob"])));
    let mut destination = MockDestinationService::new();
    destination
        .expect_list_members()
        .returning(|_| Ok(set(&["alice", "bob"])));
    destination.expect_add_member().never();
    let (notifier, sent) = recording_notifier();

    let runner = SyncRunner::new(
        Arc::new(directory),
        Arc::new(destination),
        Arc::new(notifier),
        pairs("forum", &[("staff", "staff")]),
        verbose(),
    );
    let report = runner.run(&CancellationToken::new()).await.unwrap();

    assert!(!report.has_errors());
    assert!(report.text.is_empty());
    assert_eq!(*sent.lock().unwrap(), vec![String::new()]);
}

#[tokio::test]
async fn test_report_flushes_once_when_a_pair_fails_to_fetch() {
    let mut directory = MockDirectory::new();
    directory.expect_list_group_members().returning(|group| {
        if group == "broken" {
            Err(DirectoryError::unavailable("connection refused"))
        } else {
            Ok(set(&["alice"]))
        }
    });
    let mut destination = MockDestinationService::new();
    destination
        .expect_list_members()
        .times(2)
        .returning(|_| Ok(MemberSet::new()));
    destination
        .expect_add_member()
        .times(2)
        .returning(|_, _| Ok(()));
    let (notifier, sent) = recording_notifier();

    let runner = SyncRunner::new(
        Arc::new(directory),
        Arc::new(destination),
        Arc::new(notifier),
        pairs(
            "lists",
            &[("first", "one"), ("broken", "two"), ("third", "three")],
        ),
        RunOptions::default(),
    );
    let report = runner.run(&CancellationToken::new()).await.unwrap();

    assert!(report.has_errors());
    let failed: Vec<_> = report.failed_pairs().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].pair, SyncPair::new("broken", "two"));
    assert!(matches!(
        failed[0].error,
        Some(PairError::Directory(DirectoryError::Unavailable { .. }))
    ));
    assert_eq!(report.pairs[0].added, vec!["alice".to_string()]);
    assert_eq!(report.pairs[2].added, vec!["alice".to_string()]);

    // Default notification level leaves out the Info lines.
    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0],
        "ERROR: Failed to sync broken -> two (DirectoryUnavailable): \
         directory unavailable: connection refused"
    );
}

#[tokio::test]
async fn test_destination_outage_skips_only_that_pair() {
    let mut directory = MockDirectory::new();
    directory
        .expect_list_group_members()
        .returning(|_| Ok(set(&["alice"])));
    let mut destination = MockDestinationService::new();
    destination.expect_list_members().returning(|group| {
        if group == "down" {
            Err(DestinationError::upstream("HTTP 503"))
        } else {
            Ok(MemberSet::new())
        }
    });
    destination
        .expect_add_member()
        .withf(|id, group| id == "alice" && group == "up")
        .times(1)
        .returning(|_, _| Ok(()));
    let (notifier, sent) = recording_notifier();

    let runner = SyncRunner::new(
        Arc::new(directory),
        Arc::new(destination),
        Arc::new(notifier),
        pairs("lists", &[("staff", "down"), ("staff", "up")]),
        verbose(),
    );
    let report = runner.run(&CancellationToken::new()).await.unwrap();

    assert!(report.has_errors());
    assert_eq!(report.failed_pairs().count(), 1);
    let sent = sent.lock().unwrap();
    assert!(sent[0].contains("ERROR: Failed to sync staff -> down (UpstreamUnavailable)"));
    assert!(sent[0].contains("INFO: Added alice to up"));
}

#[tokio::test]
async fn test_dry_run_never_adds() {
    let mut directory = MockDirectory::new();
    directory
        .expect_list_group_members()
        .returning(|_| Ok(set(&["alice", "dave"])));
    let mut destination = MockDestinationService::new();
    destination
        .expect_list_members()
        .returning(|_| Ok(set(&["carol"])));
    destination.expect_add_member().never();
    let (notifier, sent) = recording_notifier();

    let runner = SyncRunner::new(
        Arc::new(directory),
        Arc::new(destination),
        Arc::new(notifier),
        pairs("lists", &[("staff", "staff-list")]),
        RunOptions {
            dry_run: true,
            ..verbose()
        },
    );
    let report = runner.run(&CancellationToken::new()).await.unwrap();

    assert!(report.dry_run);
    assert!(!report.has_errors());
    assert_eq!(
        report.pairs[0].added,
        vec!["alice".to_string(), "dave".to_string()]
    );
    assert!(sent.lock().unwrap()[0].contains("INFO: Would add alice to staff-list"));
}

#[tokio::test]
async fn test_second_run_converges_without_adds() {
    let destination = Arc::new(InMemoryDestination::with_group("list", &["bob", "carol"]));

    for _ in 0..2 {
        let mut directory = MockDirectory::new();
        directory
            .expect_list_group_members()
            .returning(|_| Ok(set(&["alice", "bob"])));
        let (notifier, _) = recording_notifier();

        let runner = SyncRunner::new(
            Arc::new(directory),
            destination.clone(),
            Arc::new(notifier),
            pairs("lists", &[("staff", "list")]),
            RunOptions::default(),
        );
        runner.run(&CancellationToken::new()).await.unwrap();
    }

    // Extra member carol is reported, never removed.
    assert_eq!(destination.members("list"), set(&["alice", "bob", "carol"]));
    assert_eq!(destination.add_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_add_is_reported_and_others_still_added() {
    let destination = Arc::new(InMemoryDestination {
        reject: ["b".to_string()].into_iter().collect(),
        ..InMemoryDestination::default()
    });
    let mut directory = MockDirectory::new();
    directory
        .expect_list_group_members()
        .returning(|_| Ok(set(&["a", "b", "c"])));
    let (notifier, sent) = recording_notifier();

    let runner = SyncRunner::new(
        Arc::new(directory),
        destination.clone(),
        Arc::new(notifier),
        pairs("lists", &[("staff", "list")]),
        RunOptions::default(),
    );
    let report = runner.run(&CancellationToken::new()).await.unwrap();

    assert!(report.has_errors());
    assert_eq!(report.failed_pairs().count(), 0);
    let pair = &report.pairs[0];
    assert_eq!(pair.added, vec!["a".to_string(), "c".to_string()]);
    assert_eq!(pair.failed.len(), 1);
    assert_eq!(pair.failed[0].0, "b");
    assert_eq!(destination.members("list"), set(&["a", "c"]));
    assert!(sent.lock().unwrap()[0].contains("Failed to add b to list (PermissionDenied)"));
}

#[tokio::test]
async fn test_notification_failure_is_returned_after_all_pairs() {
    let mut directory = MockDirectory::new();
    directory
        .expect_list_group_members()
        .times(2)
        .returning(|_| Ok(MemberSet::new()));
    let destination = Arc::new(InMemoryDestination {
        missing_groups: ["gone".to_string()].into_iter().collect(),
        ..InMemoryDestination::default()
    });
    let mut notifier = MockNotifier::new();
    notifier
        .expect_send_report()
        .times(1)
        .returning(|_| Err(NotificationError::new("mail exited with status 1")));

    let runner = SyncRunner::new(
        Arc::new(directory),
        destination,
        Arc::new(notifier),
        pairs("lists", &[("staff", "gone"), ("staff", "list")]),
        RunOptions::default(),
    );
    let err = runner
        .run(&CancellationToken::new())
        .await
        .expect_err("flush failure must surface");
    assert!(err.to_string().contains("mail exited with status 1"));
}

#[tokio::test]
async fn test_cancelled_run_still_flushes() {
    let mut directory = MockDirectory::new();
    directory.expect_list_group_members().never();
    let mut destination = MockDestinationService::new();
    destination.expect_list_members().never();
    let (notifier, sent) = recording_notifier();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let runner = SyncRunner::new(
        Arc::new(directory),
        Arc::new(destination),
        Arc::new(notifier),
        pairs("lists", &[("staff", "one"), ("officers", "two")]),
        RunOptions::default(),
    );
    let report = runner.run(&cancel).await.unwrap();

    assert_eq!(report.failed_pairs().count(), 2);
    assert!(report
        .pairs
        .iter()
        .all(|p| matches!(p.error, Some(PairError::Cancelled))));
    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Failed to sync staff -> one (Cancelled)"));
}

#[tokio::test]
async fn test_cancel_during_adds_keeps_completed_members() {
    let mut directory = MockDirectory::new();
    directory
        .expect_list_group_members()
        .returning(|_| Ok(set(&["alice", "bob", "carol"])));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let mut destination = MockDestinationService::new();
    destination
        .expect_list_members()
        .returning(|_| Ok(MemberSet::new()));
    destination
        .expect_add_member()
        .times(1)
        .returning(move |_, _| {
            trigger.cancel();
            Ok(())
        });
    let (notifier, sent) = recording_notifier();

    let runner = SyncRunner::new(
        Arc::new(directory),
        Arc::new(destination),
        Arc::new(notifier),
        pairs("lists", &[("staff", "staff@example.org")]),
        verbose(),
    );
    let report = runner.run(&cancel).await.unwrap();

    let pair = &report.pairs[0];
    assert_eq!(pair.added, vec!["alice".to_string()]);
    assert!(matches!(pair.error, Some(PairError::Cancelled)));
    assert!(report.has_errors());

    let sent = sent.lock().unwrap();
    assert!(sent[0].contains("INFO: Added alice to staff@example.org"));
    assert!(sent[0].contains("Failed to sync staff -> staff@example.org (Cancelled)"));
    assert!(!sent[0].contains("bob to"));
}

#[tokio::test]
async fn test_concurrent_pairs_keep_configuration_order() {
    let destination = Arc::new(InMemoryDestination::default());
    let mut directory = MockDirectory::new();
    directory
        .expect_list_group_members()
        .returning(|group| Ok(set(&[group])));
    let (notifier, _) = recording_notifier();

    let names: Vec<String> = (0..12).map(|i| format!("group{i}")).collect();
    let config = SyncPairConfig {
        destination: "lists".to_string(),
        pairs: names.iter().map(|n| SyncPair::new(n, n)).collect(),
    };

    let runner = SyncRunner::new(
        Arc::new(directory),
        destination.clone(),
        Arc::new(notifier),
        config,
        RunOptions {
            concurrency: 4,
            ..RunOptions::default()
        },
    );
    let report = runner.run(&CancellationToken::new()).await.unwrap();

    let order: Vec<_> = report.pairs.iter().map(|p| p.pair.source.clone()).collect();
    assert_eq!(order, names);
    for name in &names {
        assert_eq!(destination.members(name), set(&[name.as_str()]));
    }
    assert_eq!(destination.add_calls.load(Ordering::SeqCst), 12);
}
